//! Await/async CPS transform
//!
//! Eliminates `Async`, `Await`, `Throw`, `Try` and the control-flow jumps
//! `Break`/`Ret` that cross suspension points by converting the enclosing
//! context into continuation-passing style. Suspension becomes explicit
//! through the `CpsAsync`/`CpsAwait` primitives; the output flavor clears
//! `has_await`.
//!
//! Expressions are partitioned by effect. Trivial expressions are handled
//! by the structural walk [`t_exp`]; awaitful ones by [`c_exp`], which
//! produces an expression that delivers the value to a continuation. A
//! continuation is either reified ([`Kont::Cont`], a function-valued
//! variable) or meta-level ([`Kont::Meta`], inlined at its single use
//! site); [`letcont`] reifies a meta continuation whenever it would be
//! duplicated.
//!
//! The dynamic extent of `async`, `try` and labels is an explicit
//! [`LabelEnv`] parameter: `Return` and `Throw` are bound to a fresh
//! continuation pair on entering an async block, `Throw` is rebound to
//! the handler's entry on entering a try, and named labels map to either
//! a continuation or a surviving syntactic label. Continuations stored in
//! the environment are always reified.
//!
//! Precondition: unique binders (output of the renaming pass). Bodies
//! moved into continuations are re-renamed so duplicated code keeps the
//! invariant.

use std::collections::HashMap;

use crate::construct::{
    Names, answer_typ, assert_exp, block_exp, call_exp, catch_typ, cont_typ, declare_exp,
    define_exp, err_cont_typ, exp_dec, func_dec, func_exp, let_dec, let_exp, prim_exp,
    ret_exp, switch_exp, tup_exp, unit_exp, var_exp, var_pat,
};
use crate::effect::{infer_effect_dec, infer_effect_exp, is_triv, typ};
use crate::ir::{
    Case, Dec, DecKind, Exp, ExpKind, Flavor, Id, Note, Param, Pat, PatKind, Prim, Prog,
};
use crate::rename;
use rill_core::types::{Control, FuncSort, Type, normalize};

/// Keys of the translation context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LabelKey {
    Return,
    Throw,
    Named(Id),
}

/// What a label is bound to in the current extent.
#[derive(Debug, Clone)]
enum LabelBind {
    /// A reified continuation
    Cont(Exp),
    /// A syntactic label surviving into the output
    Label,
}

type LabelEnv = HashMap<LabelKey, LabelBind>;

type MetaFn = Box<dyn FnOnce(&mut Names, Exp) -> Exp>;
type FinishFn = Box<dyn FnOnce(&mut Names, Vec<Exp>) -> Exp>;
type DoneFn = Box<dyn FnOnce(&mut Names) -> Exp>;

/// A continuation under construction.
enum Kont {
    /// A function-valued expression, freely duplicable.
    Cont(Exp),
    /// A meta-level consumer of the value expression; single-use.
    Meta(Type, MetaFn),
}

impl Kont {
    fn meta(t: Type, f: impl FnOnce(&mut Names, Exp) -> Exp + 'static) -> Kont {
        Kont::Meta(t, Box::new(f))
    }

    /// `k -@- v`: deliver a value to the continuation.
    fn apply(self, names: &mut Names, v: Exp) -> Exp {
        match self {
            Kont::Cont(kv) => call_exp(kv, Vec::new(), v),
            Kont::Meta(_, f) => f(names, v),
        }
    }
}

/// Materialise a meta continuation as a named function so it can be
/// referenced more than once; reified continuations pass through.
fn letcont<F>(names: &mut Names, k: Kont, scope: F) -> Exp
where
    F: FnOnce(&mut Names, &Exp) -> Exp,
{
    match k {
        Kont::Cont(kv) => scope(names, &kv),
        Kont::Meta(t, f) => {
            let k_id = names.fresh("k");
            let v_id = names.fresh("v");
            let body = f(names, var_exp(v_id.clone(), t.clone()));
            let k_var = var_exp(k_id.clone(), cont_typ(&t));
            let dec = func_dec(k_id, vec![Param { id: v_id, typ: t }], Vec::new(), body);
            let inner = scope(names, &k_var);
            block_exp(vec![dec], inner)
        }
    }
}

fn throw_cont(env: &LabelEnv) -> Exp {
    match env.get(&LabelKey::Throw) {
        Some(LabelBind::Cont(k)) => k.clone(),
        _ => panic!("internal compiler error: no throw continuation in context"),
    }
}

fn return_cont(env: &LabelEnv) -> Option<Exp> {
    match env.get(&LabelKey::Return) {
        Some(LabelBind::Cont(k)) => Some(k.clone()),
        _ => None,
    }
}

/// Lower a whole program. Requires unique binders; clears `has_await`.
pub fn transform(names: &mut Names, prog: Prog) -> Prog {
    tracing::debug!(decs = prog.decs.len(), "lowering await/async to CPS");
    let env = LabelEnv::new();
    let decs = prog
        .decs
        .into_iter()
        .map(|d| t_dec(names, &env, d))
        .collect();
    let exp = t_exp(names, &env, prog.exp);
    Prog {
        decs,
        exp,
        flavor: Flavor {
            has_await: false,
            ..prog.flavor
        },
    }
}

// ============================================================================
//                        TRIVIAL TRANSLATION
// ============================================================================

fn t_exps(names: &mut Names, env: &LabelEnv, es: Vec<Exp>) -> Vec<Exp> {
    es.into_iter().map(|e| t_exp(names, env, e)).collect()
}

fn t_cases(names: &mut Names, env: &LabelEnv, cases: Vec<Case>) -> Vec<Case> {
    cases
        .into_iter()
        .map(|c| Case {
            pat: c.pat,
            exp: t_exp(names, env, c.exp),
        })
        .collect()
}

fn t_dec(names: &mut Names, env: &LabelEnv, d: Dec) -> Dec {
    let typ_ = d.note.typ;
    let it = match d.it {
        DecKind::Let(p, e) => DecKind::Let(p, t_exp(names, env, e)),
        DecKind::Var(id, t, e) => DecKind::Var(id, t, t_exp(names, env, e)),
        DecKind::Typ(c) => DecKind::Typ(c),
    };
    let eff = infer_effect_dec(&it);
    Dec {
        it,
        note: Note::new(typ_, eff),
    }
}

/// Structural translation, used outside a suspendable position. Rewrites
/// sub-expressions in place; the only constructs it treats specially are
/// `Async` (which starts a CPS translation of its body), the unconditional
/// jumps (which tail-call a continuation when their target is bound to
/// one), and function bodies (translated under an empty context, since
/// labels and `return` do not cross function boundaries).
fn t_exp(names: &mut Names, env: &LabelEnv, e: Exp) -> Exp {
    let typ_ = e.note.typ;
    let it = match e.it {
        ExpKind::Var(id) => ExpKind::Var(id),
        ExpKind::Lit(l) => ExpKind::Lit(l),
        ExpKind::Prim(p, es) => ExpKind::Prim(p, t_exps(names, env, es)),
        ExpKind::Tup(es) => ExpKind::Tup(t_exps(names, env, es)),
        ExpKind::Proj(e1, i) => ExpKind::Proj(Box::new(t_exp(names, env, *e1)), i),
        ExpKind::Opt(e1) => ExpKind::Opt(Box::new(t_exp(names, env, *e1))),
        ExpKind::Tag(l, e1) => ExpKind::Tag(l, Box::new(t_exp(names, env, *e1))),
        ExpKind::Dot(e1, l) => ExpKind::Dot(Box::new(t_exp(names, env, *e1)), l),
        ExpKind::ActorDot(e1, l) => ExpKind::ActorDot(Box::new(t_exp(names, env, *e1)), l),
        ExpKind::Array(m, es) => ExpKind::Array(m, t_exps(names, env, es)),
        ExpKind::Idx(e1, e2) => ExpKind::Idx(
            Box::new(t_exp(names, env, *e1)),
            Box::new(t_exp(names, env, *e2)),
        ),
        ExpKind::Func {
            name,
            sort,
            control,
            typ_binds,
            params,
            ret,
            body,
        } => {
            let b = *body;
            let body2 = match control {
                Control::Returns => t_exp(names, &LabelEnv::new(), b),
                Control::Promises => {
                    let payload = match normalize(&b.note.typ) {
                        Type::Async(t) => *t,
                        t => panic!(
                            "internal compiler error: promising function body of type {}",
                            t
                        ),
                    };
                    match b.it {
                        ExpKind::Async(inner) => t_async(names, *inner, payload),
                        _ => panic!(
                            "internal compiler error: promising function body is not an async block"
                        ),
                    }
                }
            };
            ExpKind::Func {
                name,
                sort,
                control,
                typ_binds,
                params,
                ret,
                body: Box::new(body2),
            }
        }
        ExpKind::Call(f, ts, a) => ExpKind::Call(
            Box::new(t_exp(names, env, *f)),
            ts,
            Box::new(t_exp(names, env, *a)),
        ),
        ExpKind::Block(ds, e1) => {
            let ds2 = ds.into_iter().map(|d| t_dec(names, env, d)).collect();
            ExpKind::Block(ds2, Box::new(t_exp(names, env, *e1)))
        }
        ExpKind::If(c, a, b) => ExpKind::If(
            Box::new(t_exp(names, env, *c)),
            Box::new(t_exp(names, env, *a)),
            Box::new(t_exp(names, env, *b)),
        ),
        ExpKind::Switch(e1, cases) => ExpKind::Switch(
            Box::new(t_exp(names, env, *e1)),
            t_cases(names, env, cases),
        ),
        ExpKind::Loop(e1) => ExpKind::Loop(Box::new(t_exp(names, env, *e1))),
        ExpKind::Label(id, t, e1) => {
            let mut env2 = env.clone();
            env2.insert(LabelKey::Named(id.clone()), LabelBind::Label);
            ExpKind::Label(id, t, Box::new(t_exp(names, &env2, *e1)))
        }
        // A jump whose target is a continuation calls it, then returns
        // from the enclosing continuation function so the abandoned
        // evaluation context does not resume.
        ExpKind::Break(id, e1) => match env.get(&LabelKey::Named(id.clone())) {
            Some(LabelBind::Cont(kb)) => {
                let kb = kb.clone();
                let jump = call_exp(kb, Vec::new(), t_exp(names, env, *e1));
                return ret_exp(jump);
            }
            Some(LabelBind::Label) | None => {
                ExpKind::Break(id, Box::new(t_exp(names, env, *e1)))
            }
        },
        ExpKind::Ret(e1) => match return_cont(env) {
            Some(kr) => {
                let jump = call_exp(kr, Vec::new(), t_exp(names, env, *e1));
                return ret_exp(jump);
            }
            None => ExpKind::Ret(Box::new(t_exp(names, env, *e1))),
        },
        ExpKind::Async(e1) => {
            let payload = match normalize(&typ_) {
                Type::Async(t) => *t,
                t => panic!("internal compiler error: async expression of type {}", t),
            };
            return t_async(names, *e1, payload);
        }
        ExpKind::Await(_) => {
            panic!("internal compiler error: await outside an async context")
        }
        ExpKind::Throw(_) => {
            panic!("internal compiler error: throw outside an async context")
        }
        ExpKind::Try(..) => {
            panic!("internal compiler error: try outside an async context")
        }
        ExpKind::Assert(e1) => ExpKind::Assert(Box::new(t_exp(names, env, *e1))),
        ExpKind::Assign(e1, e2) => ExpKind::Assign(
            Box::new(t_exp(names, env, *e1)),
            Box::new(t_exp(names, env, *e2)),
        ),
        ExpKind::Declare(id, t, scope) => {
            ExpKind::Declare(id, t, Box::new(t_exp(names, env, *scope)))
        }
        ExpKind::Define(id, e1) => ExpKind::Define(id, Box::new(t_exp(names, env, *e1))),
        ExpKind::NewObj(sort, fields, t) => ExpKind::NewObj(sort, fields, t),
        ExpKind::SelfCall(..) => {
            panic!("internal compiler error: self-call in await lowering input")
        }
    };
    let eff = infer_effect_exp(&it);
    Exp {
        it,
        note: Note::new(typ_, eff),
    }
}

/// Translate an async body into the `CpsAsync` form: a function of the
/// success and failure continuations, with `Return`/`Throw` bound to them
/// in an otherwise empty context.
fn t_async(names: &mut Names, body: Exp, payload: Type) -> Exp {
    // The body is about to be woven into continuations; restore binder
    // uniqueness first.
    let body = rename::rename_bound(names, body);
    let k_ret_id = names.fresh("k_ret");
    let k_fail_id = names.fresh("k_fail");
    let k_ret = var_exp(k_ret_id.clone(), cont_typ(&payload));
    let k_fail = var_exp(k_fail_id.clone(), err_cont_typ());
    let mut env = LabelEnv::new();
    env.insert(LabelKey::Return, LabelBind::Cont(k_ret.clone()));
    env.insert(LabelKey::Throw, LabelBind::Cont(k_fail));
    let inner = c_exp(names, &env, body, Kont::Cont(k_ret));
    let lam = func_exp(
        names.fresh("async"),
        FuncSort::Local,
        Control::Returns,
        Vec::new(),
        vec![
            Param {
                id: k_ret_id,
                typ: cont_typ(&payload),
            },
            Param {
                id: k_fail_id,
                typ: err_cont_typ(),
            },
        ],
        Vec::new(),
        inner,
    );
    prim_exp(Prim::CpsAsync(payload), vec![lam])
}

// ============================================================================
//                          CPS TRANSLATION
// ============================================================================

/// Translate the arguments of an n-ary construct left to right. Trivial
/// arguments followed by a suspending one are `let`-bound to preserve
/// evaluation order; suspending arguments are translated through `c_exp`
/// with a meta continuation accumulating the value list. `finish`
/// receives the argument values in order.
fn c_ops(names: &mut Names, env: &LabelEnv, es: Vec<Exp>, finish: FinishFn) -> Exp {
    c_ops_go(names, env, es.into_iter(), Vec::new(), finish)
}

fn c_ops_go(
    names: &mut Names,
    env: &LabelEnv,
    mut rest: std::vec::IntoIter<Exp>,
    mut vs: Vec<Exp>,
    finish: FinishFn,
) -> Exp {
    match rest.next() {
        None => finish(names, vs),
        Some(e1) => {
            if is_triv(&e1) {
                let suspends_later = rest.as_slice().iter().any(|e| !is_triv(e));
                let e1t = t_exp(names, env, e1);
                if suspends_later {
                    let t1 = typ(&e1t).clone();
                    let v_id = names.fresh("v");
                    vs.push(var_exp(v_id.clone(), t1.clone()));
                    let body = c_ops_go(names, env, rest, vs, finish);
                    let_exp(var_pat(v_id, t1), e1t, body)
                } else {
                    vs.push(e1t);
                    c_ops_go(names, env, rest, vs, finish)
                }
            } else {
                let t1 = typ(&e1).clone();
                let env2 = env.clone();
                c_exp(
                    names,
                    env,
                    e1,
                    Kont::meta(t1, move |n, v| {
                        vs.push(v);
                        c_ops_go(n, &env2, rest, vs, finish)
                    }),
                )
            }
        }
    }
}

/// An unconditional jump: call the bound continuation and discard the
/// current one. Handled before the trivial dispatch so that even a
/// trivial `break`/`return`/`throw` in continuation position drops the
/// dead code after it.
fn c_jump(names: &mut Names, env: &LabelEnv, e: Exp, _k: Kont) -> Exp {
    match e.it {
        ExpKind::Ret(e1) => match return_cont(env) {
            Some(kr) => c_exp(names, env, *e1, Kont::Cont(kr)),
            None => panic!("internal compiler error: return without a continuation in CPS"),
        },
        ExpKind::Throw(e1) => {
            let kf = throw_cont(env);
            c_exp(names, env, *e1, Kont::Cont(kf))
        }
        ExpKind::Break(id, e1) => match env.get(&LabelKey::Named(id.clone())) {
            Some(LabelBind::Cont(kb)) => {
                let kb = kb.clone();
                c_exp(names, env, *e1, Kont::Cont(kb))
            }
            _ => panic!("internal compiler error: break to unbound label {}", id),
        },
        _ => unreachable!("not a jump"),
    }
}

/// Translate `e`, delivering its value to `k`. The result expression has
/// the answer type (unit) and trivial effect.
fn c_exp(names: &mut Names, env: &LabelEnv, e: Exp, k: Kont) -> Exp {
    if matches!(
        &e.it,
        ExpKind::Ret(_) | ExpKind::Throw(_) | ExpKind::Break(..)
    ) {
        return c_jump(names, env, e, k);
    }
    if is_triv(&e) {
        let v = t_exp(names, env, e);
        return k.apply(names, v);
    }
    let note_typ = e.note.typ.clone();
    match e.it {
        ExpKind::Var(_) | ExpKind::Lit(_) | ExpKind::Func { .. } | ExpKind::NewObj(..) => {
            unreachable!("trivial expression in CPS position")
        }
        ExpKind::Prim(p, es) => c_ops(
            names,
            env,
            es,
            Box::new(move |n, vs| {
                let rebuilt = Exp {
                    it: ExpKind::Prim(p, vs),
                    note: Note::triv(note_typ),
                };
                k.apply(n, rebuilt)
            }),
        ),
        ExpKind::Tup(es) => c_ops(
            names,
            env,
            es,
            Box::new(move |n, vs| k.apply(n, tup_exp(vs))),
        ),
        ExpKind::Proj(e1, i) => c_ops(
            names,
            env,
            vec![*e1],
            Box::new(move |n, mut vs| {
                let v = vs.remove(0);
                let rebuilt = Exp {
                    it: ExpKind::Proj(Box::new(v), i),
                    note: Note::triv(note_typ),
                };
                k.apply(n, rebuilt)
            }),
        ),
        ExpKind::Opt(e1) => c_ops(
            names,
            env,
            vec![*e1],
            Box::new(move |n, mut vs| {
                let v = vs.remove(0);
                let rebuilt = Exp {
                    it: ExpKind::Opt(Box::new(v)),
                    note: Note::triv(note_typ),
                };
                k.apply(n, rebuilt)
            }),
        ),
        ExpKind::Tag(l, e1) => c_ops(
            names,
            env,
            vec![*e1],
            Box::new(move |n, mut vs| {
                let v = vs.remove(0);
                let rebuilt = Exp {
                    it: ExpKind::Tag(l, Box::new(v)),
                    note: Note::triv(note_typ),
                };
                k.apply(n, rebuilt)
            }),
        ),
        ExpKind::Dot(e1, l) => c_ops(
            names,
            env,
            vec![*e1],
            Box::new(move |n, mut vs| {
                let v = vs.remove(0);
                let rebuilt = Exp {
                    it: ExpKind::Dot(Box::new(v), l),
                    note: Note::triv(note_typ),
                };
                k.apply(n, rebuilt)
            }),
        ),
        ExpKind::ActorDot(e1, l) => c_ops(
            names,
            env,
            vec![*e1],
            Box::new(move |n, mut vs| {
                let v = vs.remove(0);
                let rebuilt = Exp {
                    it: ExpKind::ActorDot(Box::new(v), l),
                    note: Note::triv(note_typ),
                };
                k.apply(n, rebuilt)
            }),
        ),
        ExpKind::Array(m, es) => c_ops(
            names,
            env,
            es,
            Box::new(move |n, vs| {
                let rebuilt = Exp {
                    it: ExpKind::Array(m, vs),
                    note: Note::triv(note_typ),
                };
                k.apply(n, rebuilt)
            }),
        ),
        ExpKind::Idx(e1, e2) => c_ops(
            names,
            env,
            vec![*e1, *e2],
            Box::new(move |n, mut vs| {
                let v2 = vs.remove(1);
                let v1 = vs.remove(0);
                let rebuilt = Exp {
                    it: ExpKind::Idx(Box::new(v1), Box::new(v2)),
                    note: Note::triv(note_typ),
                };
                k.apply(n, rebuilt)
            }),
        ),
        ExpKind::Call(f, ts, a) => c_ops(
            names,
            env,
            vec![*f, *a],
            Box::new(move |n, mut vs| {
                let va = vs.remove(1);
                let vf = vs.remove(0);
                let rebuilt = Exp {
                    it: ExpKind::Call(Box::new(vf), ts, Box::new(va)),
                    note: Note::triv(note_typ),
                };
                k.apply(n, rebuilt)
            }),
        ),
        ExpKind::Assert(e1) => c_ops(
            names,
            env,
            vec![*e1],
            Box::new(move |n, mut vs| k.apply(n, assert_exp(vs.remove(0)))),
        ),
        ExpKind::Define(id, e1) => c_ops(
            names,
            env,
            vec![*e1],
            Box::new(move |n, mut vs| k.apply(n, define_exp(id, vs.remove(0)))),
        ),
        ExpKind::Assign(lhs, rhs) => {
            let lhs = *lhs;
            let lhs_note = lhs.note.clone();
            match lhs.it {
                ExpKind::Var(id) => c_ops(
                    names,
                    env,
                    vec![*rhs],
                    Box::new(move |n, mut vs| {
                        let target = Exp {
                            it: ExpKind::Var(id),
                            note: lhs_note,
                        };
                        let rebuilt = Exp {
                            it: ExpKind::Assign(Box::new(target), Box::new(vs.remove(0))),
                            note: Note::triv(Type::unit()),
                        };
                        k.apply(n, rebuilt)
                    }),
                ),
                ExpKind::Dot(e11, l) => c_ops(
                    names,
                    env,
                    vec![*e11, *rhs],
                    Box::new(move |n, mut vs| {
                        let v2 = vs.remove(1);
                        let v1 = vs.remove(0);
                        let target = Exp {
                            it: ExpKind::Dot(Box::new(v1), l),
                            note: lhs_note,
                        };
                        let rebuilt = Exp {
                            it: ExpKind::Assign(Box::new(target), Box::new(v2)),
                            note: Note::triv(Type::unit()),
                        };
                        k.apply(n, rebuilt)
                    }),
                ),
                ExpKind::Idx(e11, e12) => c_ops(
                    names,
                    env,
                    vec![*e11, *e12, *rhs],
                    Box::new(move |n, mut vs| {
                        let v3 = vs.remove(2);
                        let v2 = vs.remove(1);
                        let v1 = vs.remove(0);
                        let target = Exp {
                            it: ExpKind::Idx(Box::new(v1), Box::new(v2)),
                            note: lhs_note,
                        };
                        let rebuilt = Exp {
                            it: ExpKind::Assign(Box::new(target), Box::new(v3)),
                            note: Note::triv(Type::unit()),
                        };
                        k.apply(n, rebuilt)
                    }),
                ),
                other => panic!(
                    "internal compiler error: unsupported assignment target {:?}",
                    other
                ),
            }
        }
        ExpKind::If(c, a, b) => letcont(names, k, |names, kv| {
            if is_triv(&c) {
                let c2 = t_exp(names, env, *c);
                let a2 = c_exp(names, env, *a, Kont::Cont(kv.clone()));
                let b2 = c_exp(names, env, *b, Kont::Cont(kv.clone()));
                crate::construct::if_exp(c2, a2, b2, answer_typ())
            } else {
                let ct = typ(&c).clone();
                let env2 = env.clone();
                let kva = kv.clone();
                let kvb = kv.clone();
                let (a, b) = (*a, *b);
                c_exp(
                    names,
                    env,
                    *c,
                    Kont::meta(ct, move |n, vc| {
                        let a2 = c_exp(n, &env2, a, Kont::Cont(kva));
                        let b2 = c_exp(n, &env2, b, Kont::Cont(kvb));
                        crate::construct::if_exp(vc, a2, b2, answer_typ())
                    }),
                )
            }
        }),
        ExpKind::Switch(e1, cases) => letcont(names, k, |names, kv| {
            let env2 = env.clone();
            let kv2 = kv.clone();
            c_ops(
                names,
                env,
                vec![*e1],
                Box::new(move |n, mut vs| {
                    let scrut = vs.remove(0);
                    let cases2 = cases
                        .into_iter()
                        .map(|c| Case {
                            pat: c.pat,
                            exp: c_exp(n, &env2, c.exp, Kont::Cont(kv2.clone())),
                        })
                        .collect();
                    switch_exp(scrut, cases2, answer_typ())
                }),
            )
        }),
        ExpKind::Loop(e1) => {
            // The loop never delivers a value; its continuation is itself
            // and the incoming continuation is dead.
            drop(k);
            let loop_id = names.fresh("loop");
            let body_typ = typ(&e1).clone();
            let loop_var = var_exp(loop_id.clone(), cont_typ(&body_typ));
            let body = c_exp(names, env, *e1, Kont::Cont(loop_var.clone()));
            let v_id = names.fresh("v");
            let dec = func_dec(
                loop_id,
                vec![Param {
                    id: v_id,
                    typ: body_typ,
                }],
                Vec::new(),
                body,
            );
            block_exp(vec![dec], call_exp(loop_var, Vec::new(), unit_exp()))
        }
        ExpKind::Label(id, _t, e1) => letcont(names, k, |names, kv| {
            let mut env2 = env.clone();
            env2.insert(LabelKey::Named(id), LabelBind::Cont(kv.clone()));
            c_exp(names, &env2, *e1, Kont::Cont(kv.clone()))
        }),
        ExpKind::Ret(_) | ExpKind::Throw(_) | ExpKind::Break(..) => {
            unreachable!("jumps are handled before dispatch")
        }
        ExpKind::Await(e1) => {
            let r = throw_cont(env);
            let payload = note_typ;
            letcont(names, k, |names, kv| {
                let kv = kv.clone();
                c_ops(
                    names,
                    env,
                    vec![*e1],
                    Box::new(move |_n, mut vs| {
                        let fut = vs.remove(0);
                        prim_exp(Prim::CpsAwait(payload), vec![fut, tup_exp(vec![kv, r])])
                    }),
                )
            })
        }
        ExpKind::Async(e1) => {
            let payload = match normalize(&note_typ) {
                Type::Async(t) => *t,
                t => panic!("internal compiler error: async expression of type {}", t),
            };
            let v = t_async(names, *e1, payload);
            k.apply(names, v)
        }
        ExpKind::Try(e1, cases) => {
            let f = throw_cont(env);
            letcont(names, k, |names, kv| {
                let x_id = names.fresh("t");
                let x_var = var_exp(x_id.clone(), catch_typ());
                let mut arms: Vec<Case> = Vec::new();
                // Handler arms run in the outer context: a throw inside a
                // handler goes to the enclosing handler.
                for c in cases {
                    arms.push(Case {
                        pat: c.pat,
                        exp: c_exp(names, env, c.exp, Kont::Cont(kv.clone())),
                    });
                }
                // Unmatched errors propagate outward.
                let y_id = names.fresh("t");
                arms.push(Case {
                    pat: var_pat(y_id.clone(), catch_typ()),
                    exp: call_exp(f.clone(), Vec::new(), var_exp(y_id, catch_typ())),
                });
                let throw_id = names.fresh("throw");
                let throw_var = var_exp(throw_id.clone(), err_cont_typ());
                let throw_dec = func_dec(
                    throw_id,
                    vec![Param {
                        id: x_id,
                        typ: catch_typ(),
                    }],
                    Vec::new(),
                    switch_exp(x_var, arms, answer_typ()),
                );
                let mut env2 = env.clone();
                env2.insert(LabelKey::Throw, LabelBind::Cont(throw_var));
                let body = c_exp(names, &env2, *e1, Kont::Cont(kv.clone()));
                block_exp(vec![throw_dec], body)
            })
        }
        ExpKind::Block(ds, e1) => c_block(names, env, ds, *e1, k),
        ExpKind::Declare(id, t, scope) => {
            let inner = c_exp(names, env, *scope, k);
            declare_exp(id, t, inner)
        }
        ExpKind::SelfCall(..) => {
            panic!("internal compiler error: self-call in await lowering input")
        }
    }
}

// ============================================================================
//                         BLOCK TRANSLATION
// ============================================================================

/// Replace a pattern's variables with fresh ones, returning the refreshed
/// pattern and the `Define`s populating the original names from the fresh
/// ones.
fn refresh_pat(names: &mut Names, p: Pat) -> (Pat, Vec<Dec>) {
    let mut bound: Vec<(Id, Id, Type)> = Vec::new();
    let p2 = refresh_pat_go(names, &mut bound, p);
    let defines = bound
        .into_iter()
        .map(|(orig, fresh, t)| exp_dec(define_exp(orig, var_exp(fresh, t))))
        .collect();
    (p2, defines)
}

fn refresh_pat_go(names: &mut Names, bound: &mut Vec<(Id, Id, Type)>, p: Pat) -> Pat {
    let typ_ = p.typ;
    let it = match p.it {
        PatKind::Wild => PatKind::Wild,
        PatKind::Lit(l) => PatKind::Lit(l),
        PatKind::Var(id) => {
            let fresh = names.fresh("pat");
            bound.push((id, fresh.clone(), typ_.clone()));
            PatKind::Var(fresh)
        }
        PatKind::Tup(ps) => PatKind::Tup(
            ps.into_iter()
                .map(|p| refresh_pat_go(names, bound, p))
                .collect(),
        ),
        PatKind::Obj(pfs) => PatKind::Obj(
            pfs.into_iter()
                .map(|mut pf| {
                    pf.pat = refresh_pat_go(names, bound, pf.pat);
                    pf
                })
                .collect(),
        ),
        PatKind::Opt(p1) => PatKind::Opt(Box::new(refresh_pat_go(names, bound, *p1))),
        PatKind::Tag(l, p1) => PatKind::Tag(l, Box::new(refresh_pat_go(names, bound, *p1))),
        PatKind::Alt(p1, p2) => PatKind::Alt(
            Box::new(refresh_pat_go(names, bound, *p1)),
            Box::new(refresh_pat_go(names, bound, *p2)),
        ),
    };
    Pat { it, typ: typ_ }
}

/// Translate a block in CPS. Every value binder is pre-declared as a cell
/// so it stays visible across the suspension points of later initialisers
/// and of the body; each initialiser is bound to a refreshed pattern and
/// the original names are then `Define`d from the fresh ones. Type
/// declarations have no runtime content and are re-emitted up front.
fn c_block(names: &mut Names, env: &LabelEnv, decs: Vec<Dec>, body: Exp, k: Kont) -> Exp {
    letcont(names, k, |names, kv| {
        let mut typ_decs = Vec::new();
        let mut val_decs = Vec::new();
        for d in decs {
            if matches!(d.it, DecKind::Typ(_)) {
                typ_decs.push(d);
            } else {
                val_decs.push(d);
            }
        }
        let mut cells: Vec<(Id, Type)> = Vec::new();
        for d in &val_decs {
            match &d.it {
                DecKind::Let(p, _) => cells.extend(p.vars()),
                DecKind::Var(id, t, _) => cells.push((id.clone(), Type::Mut(Box::new(t.clone())))),
                DecKind::Typ(_) => {}
            }
        }
        let env2 = env.clone();
        let kv2 = kv.clone();
        let done: DoneFn = Box::new(move |n| c_exp(n, &env2, body, Kont::Cont(kv2)));
        let mut out = c_decs(names, env, val_decs.into_iter(), done);
        for (id, t) in cells.into_iter().rev() {
            out = declare_exp(id, t, out);
        }
        block_exp(typ_decs, out)
    })
}

fn c_decs(
    names: &mut Names,
    env: &LabelEnv,
    mut ds: std::vec::IntoIter<Dec>,
    done: DoneFn,
) -> Exp {
    match ds.next() {
        None => done(names),
        Some(d) => match d.it {
            DecKind::Typ(_) => c_decs(names, env, ds, done),
            DecKind::Let(p, e) => {
                let (p2, defines) = refresh_pat(names, p);
                if is_triv(&e) {
                    let e2 = t_exp(names, env, e);
                    let mut group = vec![let_dec(p2, e2)];
                    group.extend(defines);
                    let rest = c_decs(names, env, ds, done);
                    block_exp(group, rest)
                } else {
                    let t = typ(&e).clone();
                    let env2 = env.clone();
                    c_exp(
                        names,
                        env,
                        e,
                        Kont::meta(t, move |n, v| {
                            let mut group = vec![let_dec(p2, v)];
                            group.extend(defines);
                            let rest = c_decs(n, &env2, ds, done);
                            block_exp(group, rest)
                        }),
                    )
                }
            }
            DecKind::Var(id, _t, e) => {
                if is_triv(&e) {
                    let e2 = t_exp(names, env, e);
                    let group = vec![exp_dec(define_exp(id, e2))];
                    let rest = c_decs(names, env, ds, done);
                    block_exp(group, rest)
                } else {
                    let t = typ(&e).clone();
                    let env2 = env.clone();
                    c_exp(
                        names,
                        env,
                        e,
                        Kont::meta(t, move |n, v| {
                            let group = vec![exp_dec(define_exp(id, v))];
                            let rest = c_decs(n, &env2, ds, done);
                            block_exp(group, rest)
                        }),
                    )
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{
        async_exp, await_exp, block_exp, label_exp, let_dec, loop_exp, nat_exp, prim_exp,
        var_exp, var_pat,
    };
    use crate::effect::eff;
    use crate::ir::BinOp;
    use rill_core::types::{Effect, PrimType};

    fn nat() -> Type {
        Type::Prim(PrimType::Nat)
    }

    fn fut_nat() -> Type {
        Type::Async(Box::new(nat()))
    }

    fn prog_of(e: Exp) -> Prog {
        Prog {
            decs: vec![],
            exp: e,
            flavor: Flavor {
                has_await: true,
                has_show: false,
            },
        }
    }

    /// Collect every expression kind discriminant in a tree; shape
    /// assertions below look for survivors and introduced forms.
    fn contains(e: &Exp, pred: &dyn Fn(&ExpKind) -> bool) -> bool {
        if pred(&e.it) {
            return true;
        }
        let sub: Vec<&Exp> = match &e.it {
            ExpKind::Var(_) | ExpKind::Lit(_) | ExpKind::NewObj(..) => vec![],
            ExpKind::Prim(_, es) | ExpKind::Tup(es) | ExpKind::Array(_, es)
            | ExpKind::SelfCall(_, es) => es.iter().collect(),
            ExpKind::Proj(e1, _)
            | ExpKind::Opt(e1)
            | ExpKind::Tag(_, e1)
            | ExpKind::Dot(e1, _)
            | ExpKind::ActorDot(e1, _)
            | ExpKind::Loop(e1)
            | ExpKind::Label(_, _, e1)
            | ExpKind::Break(_, e1)
            | ExpKind::Ret(e1)
            | ExpKind::Throw(e1)
            | ExpKind::Await(e1)
            | ExpKind::Async(e1)
            | ExpKind::Assert(e1)
            | ExpKind::Declare(_, _, e1)
            | ExpKind::Define(_, e1) => vec![e1.as_ref()],
            ExpKind::Idx(e1, e2) | ExpKind::Assign(e1, e2) | ExpKind::Call(e1, _, e2) => {
                vec![e1.as_ref(), e2.as_ref()]
            }
            ExpKind::Func { body, .. } => vec![body.as_ref()],
            ExpKind::Block(ds, e1) => {
                let mut out: Vec<&Exp> = ds
                    .iter()
                    .filter_map(|d| match &d.it {
                        DecKind::Let(_, e) | DecKind::Var(_, _, e) => Some(e),
                        DecKind::Typ(_) => None,
                    })
                    .collect();
                out.push(e1.as_ref());
                out
            }
            ExpKind::If(c, a, b) => vec![c.as_ref(), a.as_ref(), b.as_ref()],
            ExpKind::Switch(e1, cs) | ExpKind::Try(e1, cs) => {
                let mut out = vec![e1.as_ref()];
                out.extend(cs.iter().map(|c| &c.exp));
                out
            }
        };
        sub.into_iter().any(|e| contains(e, pred))
    }

    fn no_high_level_control(e: &Exp) -> bool {
        !contains(
            e,
            &|it| matches!(it, ExpKind::Async(_) | ExpKind::Await(_) | ExpKind::Throw(_) | ExpKind::Try(..)),
        )
    }

    #[test]
    fn test_simple_async_await() {
        // async { await p }  with  p : async Nat
        let p = var_exp("p", fut_nat());
        let e = async_exp(await_exp(p));
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(e));
        assert!(!out.flavor.has_await);
        // CPSAsync(func(k_ret, k_fail) { CPSAwait(p, (k_ret, k_fail)) })
        match &out.exp.it {
            ExpKind::Prim(Prim::CpsAsync(t), args) => {
                assert_eq!(*t, nat());
                match &args[0].it {
                    ExpKind::Func { params, body, .. } => {
                        assert_eq!(params.len(), 2);
                        assert_eq!(params[0].id, "k_ret/0");
                        assert_eq!(params[1].id, "k_fail/0");
                        match &body.it {
                            ExpKind::Prim(Prim::CpsAwait(t2), aws) => {
                                assert_eq!(*t2, nat());
                                assert_eq!(aws[0].it, ExpKind::Var("p".to_string()));
                                match &aws[1].it {
                                    ExpKind::Tup(ks) => {
                                        assert_eq!(ks[0].it, ExpKind::Var("k_ret/0".to_string()));
                                        assert_eq!(
                                            ks[1].it,
                                            ExpKind::Var("k_fail/0".to_string())
                                        );
                                    }
                                    other => panic!("expected continuation pair, got {:?}", other),
                                }
                            }
                            other => panic!("expected CPSAwait, got {:?}", other),
                        }
                    }
                    other => panic!("expected continuation function, got {:?}", other),
                }
            }
            other => panic!("expected CPSAsync, got {:?}", other),
        }
        assert_eq!(eff(&out.exp), Effect::Triv);
    }

    #[test]
    fn test_trivial_program_is_identity_and_idempotent() {
        let e = block_exp(
            vec![let_dec(var_pat("x", nat()), nat_exp(1))],
            var_exp("x", nat()),
        );
        let mut names = Names::new();
        let once = transform(&mut names, prog_of(e));
        let mut names2 = Names::new();
        let twice = transform(&mut names2, once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_awaitful_loop_becomes_recursive_function() {
        // async { loop { let _ = await p } }
        let p = var_exp("p", fut_nat());
        let body = block_exp(
            vec![let_dec(wild_nat_pat(), await_exp(p))],
            crate::construct::unit_exp(),
        );
        let e = async_exp(loop_exp(body));
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(e));
        assert!(no_high_level_control(&out.exp));
        assert!(contains(&out.exp, &|it| matches!(
            it,
            ExpKind::Func { name, .. } if name.starts_with("loop/")
        )));
        assert!(contains(&out.exp, &|it| matches!(
            it,
            ExpKind::Prim(Prim::CpsAwait(_), _)
        )));
    }

    fn wild_nat_pat() -> Pat {
        crate::construct::wild_pat(nat())
    }

    #[test]
    fn test_labelled_break_tail_calls_continuation() {
        // async { label l : Nat { let _ = await p; break l 3 } }
        let p = var_exp("p", fut_nat());
        let inner = block_exp(
            vec![let_dec(wild_nat_pat(), await_exp(p))],
            crate::construct::break_exp("l", nat_exp(3)),
        );
        let e = async_exp(label_exp("l", nat(), inner));
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(e));
        assert!(no_high_level_control(&out.exp));
        // The label itself is gone; the break became a continuation call.
        assert!(!contains(&out.exp, &|it| matches!(it, ExpKind::Label(..))));
        assert!(!contains(&out.exp, &|it| matches!(it, ExpKind::Break(..))));
    }

    #[test]
    fn test_try_throw_builds_local_handler() {
        // async { try { throw err } catch t -> 0 }
        let err = var_exp("err", catch_typ());
        let handler = Case {
            pat: var_pat("c", catch_typ()),
            exp: nat_exp(0),
        };
        let e = async_exp(crate::construct::try_exp(
            crate::construct::throw_exp(err),
            vec![handler],
            nat(),
        ));
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(e));
        assert!(no_high_level_control(&out.exp));
        // A local throw handler switches on the error value with the user
        // arm plus the pass-through arm.
        assert!(contains(&out.exp, &|it| match it {
            ExpKind::Func { name, body, .. } if name.starts_with("throw/") => {
                matches!(&body.it, ExpKind::Switch(_, arms) if arms.len() == 2)
            }
            _ => false,
        }));
    }

    #[test]
    fn test_let_across_await_declares_and_defines() {
        // async { let x = await p; x }
        let p = var_exp("p", fut_nat());
        let body = block_exp(
            vec![let_dec(var_pat("x", nat()), await_exp(p))],
            var_exp("x", nat()),
        );
        let e = async_exp(body);
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(e));
        assert!(no_high_level_control(&out.exp));
        assert!(contains(&out.exp, &|it| matches!(
            it,
            ExpKind::Declare(id, _, _) if id == "x"
        )));
        assert!(contains(&out.exp, &|it| matches!(
            it,
            ExpKind::Define(id, _) if id == "x"
        )));
    }

    #[test]
    fn test_binop_orders_trivial_before_await() {
        // async { x + await f() }
        let f = var_exp(
            "f",
            Type::Func(
                FuncSort::Local,
                Control::Returns,
                vec![],
                vec![],
                vec![fut_nat()],
            ),
        );
        let call = crate::construct::call_exp(f, vec![], crate::construct::unit_exp());
        let sum = prim_exp(
            Prim::BinOp(nat(), BinOp::Add),
            vec![var_exp("x", nat()), await_exp(call)],
        );
        let e = async_exp(sum);
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(e));
        assert!(no_high_level_control(&out.exp));
        // x is let-bound before the await fires.
        assert!(contains(&out.exp, &|it| match it {
            ExpKind::Block(ds, _) => ds.iter().any(|d| match &d.it {
                DecKind::Let(p, e) => {
                    matches!(&p.it, PatKind::Var(v) if v.starts_with("v/"))
                        && e.it == ExpKind::Var("x".to_string())
                }
                _ => false,
            }),
            _ => false,
        }));
        // The addition survives, applied to bound values.
        assert!(contains(&out.exp, &|it| matches!(
            it,
            ExpKind::Prim(Prim::BinOp(_, BinOp::Add), _)
        )));
    }

    #[test]
    fn test_nested_async_shadows_return() {
        // async { let a = async { 1 }; await a }
        let inner = async_exp(nat_exp(1));
        let body = block_exp(
            vec![let_dec(var_pat("a", fut_nat()), inner)],
            await_exp(var_exp("a", fut_nat())),
        );
        let e = async_exp(body);
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(e));
        assert!(no_high_level_control(&out.exp));
        // Two CPSAsync introductions, each with its own continuation pair.
        let mut count = 0;
        count_cps_async(&out.exp, &mut count);
        assert_eq!(count, 2);
    }

    fn count_cps_async(e: &Exp, count: &mut usize) {
        if matches!(&e.it, ExpKind::Prim(Prim::CpsAsync(_), _)) {
            *count += 1;
        }
        match &e.it {
            ExpKind::Prim(_, es) | ExpKind::Tup(es) | ExpKind::Array(_, es)
            | ExpKind::SelfCall(_, es) => {
                for e1 in es {
                    count_cps_async(e1, count);
                }
            }
            ExpKind::Proj(e1, _)
            | ExpKind::Opt(e1)
            | ExpKind::Tag(_, e1)
            | ExpKind::Dot(e1, _)
            | ExpKind::ActorDot(e1, _)
            | ExpKind::Loop(e1)
            | ExpKind::Label(_, _, e1)
            | ExpKind::Break(_, e1)
            | ExpKind::Ret(e1)
            | ExpKind::Throw(e1)
            | ExpKind::Await(e1)
            | ExpKind::Async(e1)
            | ExpKind::Assert(e1)
            | ExpKind::Declare(_, _, e1)
            | ExpKind::Define(_, e1) => count_cps_async(e1, count),
            ExpKind::Idx(e1, e2) | ExpKind::Assign(e1, e2) | ExpKind::Call(e1, _, e2) => {
                count_cps_async(e1, count);
                count_cps_async(e2, count);
            }
            ExpKind::Func { body, .. } => count_cps_async(body, count),
            ExpKind::Block(ds, e1) => {
                for d in ds {
                    if let DecKind::Let(_, e) | DecKind::Var(_, _, e) = &d.it {
                        count_cps_async(e, count);
                    }
                }
                count_cps_async(e1, count);
            }
            ExpKind::If(c, a, b) => {
                count_cps_async(c, count);
                count_cps_async(a, count);
                count_cps_async(b, count);
            }
            ExpKind::Switch(e1, cs) | ExpKind::Try(e1, cs) => {
                count_cps_async(e1, count);
                for c in cs {
                    count_cps_async(&c.exp, count);
                }
            }
            ExpKind::Var(_) | ExpKind::Lit(_) | ExpKind::NewObj(..) => {}
        }
    }

    #[test]
    #[should_panic(expected = "internal compiler error")]
    fn test_await_outside_async_is_rejected() {
        let p = var_exp("p", fut_nat());
        let mut names = Names::new();
        transform(&mut names, prog_of(await_exp(p)));
    }

    #[test]
    #[should_panic(expected = "internal compiler error")]
    fn test_self_call_is_rejected() {
        let e = Exp {
            it: ExpKind::SelfCall(vec![], vec![]),
            note: Note::triv(Type::unit()),
        };
        let mut names = Names::new();
        transform(&mut names, prog_of(e));
    }
}
