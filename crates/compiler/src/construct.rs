//! Construction algebra for the IR
//!
//! Every pass builds IR through these constructors. Each one computes the
//! type and effect annotation of the node it builds from the annotations
//! of its already-constructed sub-terms, and asserts its own
//! preconditions. A violated precondition is a bug in a pass, never in the
//! user program, and panics as an internal compiler error.
//!
//! Fresh names are drawn from a [`Names`] source created per compilation;
//! `fresh("k")` yields `k/0`, `k/1`, ... so dumps stay readable and test
//! output is deterministic.

use std::collections::HashMap;

use crate::effect::{eff, join_decs, typ};
use crate::ir::{
    Case, Dec, DecKind, Exp, ExpKind, Id, Lit, Mutability, NewField, Note, Param, Pat, PatField,
    PatKind, Prim,
};
use rill_core::types::{
    self, Con, Control, Effect, Field, FuncSort, Lab, ObjSort, PrimType, Type, TypBind, eq,
    lookup_field, normalize, open,
};

// ============================================================================
//                            FRESH NAMES
// ============================================================================

/// Per-compilation source of fresh identifiers.
///
/// A map from name base to a monotone counter; `fresh(base)` returns
/// `base/N`. The pipeline creates one `Names` per compilation and threads
/// it through the passes, so repeated compilations produce identical
/// names.
#[derive(Debug, Default)]
pub struct Names {
    counters: HashMap<String, u32>,
}

impl Names {
    pub fn new() -> Names {
        Names::default()
    }

    pub fn fresh(&mut self, base: &str) -> Id {
        let n = self
            .counters
            .entry(base.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(0);
        format!("{}/{}", base, *n)
    }
}

/// A fresh variable expression.
pub fn fresh_var(names: &mut Names, base: &str, typ: Type) -> Exp {
    var_exp(names.fresh(base), typ)
}

// ============================================================================
//                            EXPRESSIONS
// ============================================================================

/// A typed variable reference; trivial effect.
pub fn var_exp(id: impl Into<Id>, typ: Type) -> Exp {
    Exp {
        it: ExpKind::Var(id.into()),
        note: Note::triv(typ),
    }
}

/// A variable reference at mutable-cell type, for use as an assignment
/// target.
pub fn mut_var_exp(id: impl Into<Id>, typ: Type) -> Exp {
    var_exp(id, Type::Mut(Box::new(typ)))
}

pub fn lit_exp(l: Lit) -> Exp {
    let typ = l.typ();
    Exp {
        it: ExpKind::Lit(l),
        note: Note::triv(typ),
    }
}

pub fn nat_exp(n: u128) -> Exp {
    lit_exp(Lit::Nat(n))
}

pub fn bool_exp(b: bool) -> Exp {
    lit_exp(Lit::Bool(b))
}

pub fn text_exp(s: impl Into<String>) -> Exp {
    lit_exp(Lit::Text(s.into()))
}

/// The unit value `()`.
pub fn unit_exp() -> Exp {
    Exp {
        it: ExpKind::Tup(Vec::new()),
        note: Note::triv(Type::unit()),
    }
}

fn prim_result_typ(p: &Prim) -> Type {
    match p {
        Prim::UnOp(t, _) | Prim::BinOp(t, _) => t.clone(),
        Prim::RelOp(_, _) => Type::Prim(PrimType::Bool),
        Prim::Show(_) => Type::Prim(PrimType::Text),
        Prim::ICReply(_) | Prim::ICReject => Type::Non,
        Prim::ICErrorCode => Type::Prim(PrimType::Int32),
        Prim::ICCall => Type::unit(),
        Prim::CpsAsync(t) => Type::Async(Box::new(t.clone())),
        // The transformed await delivers through its continuation argument;
        // the expression itself answers unit.
        Prim::CpsAwait(_) => Type::unit(),
    }
}

/// A primitive application; result type determined by the primitive,
/// effect the join of the arguments'.
pub fn prim_exp(p: Prim, args: Vec<Exp>) -> Exp {
    let note = Note::new(
        prim_result_typ(&p),
        args.iter().fold(Effect::Triv, |a, e| a.join(eff(e))),
    );
    Exp {
        it: ExpKind::Prim(p, args),
        note,
    }
}

pub fn tup_exp(es: Vec<Exp>) -> Exp {
    let note = Note::new(
        Type::Tup(es.iter().map(|e| typ(e).clone()).collect()),
        es.iter().fold(Effect::Triv, |a, e| a.join(eff(e))),
    );
    Exp {
        it: ExpKind::Tup(es),
        note,
    }
}

pub fn proj_exp(e: Exp, i: usize) -> Exp {
    let ts = match normalize(typ(&e)) {
        Type::Tup(ts) => ts,
        t => panic!("internal compiler error: projection from non-tuple type {}", t),
    };
    if i >= ts.len() {
        panic!(
            "internal compiler error: projection index {} out of range for {}",
            i,
            typ(&e)
        );
    }
    let note = Note::new(ts[i].clone(), eff(&e));
    Exp {
        it: ExpKind::Proj(Box::new(e), i),
        note,
    }
}

pub fn opt_exp(e: Exp) -> Exp {
    let note = Note::new(Type::Opt(Box::new(typ(&e).clone())), eff(&e));
    Exp {
        it: ExpKind::Opt(Box::new(e)),
        note,
    }
}

/// Variant introduction at a declared variant type.
pub fn tag_exp(lab: impl Into<Lab>, e: Exp, variant_typ: Type) -> Exp {
    let lab = lab.into();
    debug_assert!(
        lookup_field(normalize(&variant_typ).as_variant(), &lab)
            .is_some_and(|t| eq(t, typ(&e))),
        "tag #{} does not fit variant type {}",
        lab,
        variant_typ
    );
    let note = Note::new(variant_typ, eff(&e));
    Exp {
        it: ExpKind::Tag(lab, Box::new(e)),
        note,
    }
}

/// Field access on a plain object or module.
pub fn dot_exp(e: Exp, lab: impl Into<Lab>) -> Exp {
    let lab = lab.into();
    let (sort, fields) = match normalize(typ(&e)) {
        Type::Obj(s, fs) => (s, fs),
        t => panic!("internal compiler error: field access on non-object type {}", t),
    };
    debug_assert_ne!(sort, ObjSort::Actor, "actor field access must use actor_dot_exp");
    let ft = lookup_field(&fields, &lab).unwrap_or_else(|| {
        panic!("internal compiler error: no field {} in {}", lab, typ(&e))
    });
    let note = Note::new(ft.as_immut().clone(), eff(&e));
    Exp {
        it: ExpKind::Dot(Box::new(e), lab),
        note,
    }
}

/// Field access on an actor.
pub fn actor_dot_exp(e: Exp, lab: impl Into<Lab>) -> Exp {
    let lab = lab.into();
    let fields = match normalize(typ(&e)) {
        Type::Obj(ObjSort::Actor, fs) => fs,
        t => panic!("internal compiler error: actor field access on {}", t),
    };
    let ft = lookup_field(&fields, &lab).unwrap_or_else(|| {
        panic!("internal compiler error: no field {} in {}", lab, typ(&e))
    });
    let note = Note::new(ft.clone(), eff(&e));
    Exp {
        it: ExpKind::ActorDot(Box::new(e), lab),
        note,
    }
}

/// Array construction with a mutability tag and declared element type.
pub fn array_exp(mutability: Mutability, elem_typ: Type, es: Vec<Exp>) -> Exp {
    let elem = match mutability {
        Mutability::Const => elem_typ,
        Mutability::Var => Type::Mut(Box::new(elem_typ)),
    };
    let note = Note::new(
        Type::Array(Box::new(elem)),
        es.iter().fold(Effect::Triv, |a, e| a.join(eff(e))),
    );
    Exp {
        it: ExpKind::Array(mutability, es),
        note,
    }
}

pub fn idx_exp(e1: Exp, e2: Exp) -> Exp {
    let elem = match normalize(typ(&e1)) {
        Type::Array(t) => t.as_immut().clone(),
        t => panic!("internal compiler error: indexing into non-array type {}", t),
    };
    let note = Note::new(elem, eff(&e1).join(eff(&e2)));
    Exp {
        it: ExpKind::Idx(Box::new(e1), Box::new(e2)),
        note,
    }
}

/// An index expression at mutable element type, for use as an assignment
/// target.
pub fn mut_idx_exp(e1: Exp, e2: Exp) -> Exp {
    let elem = match normalize(typ(&e1)) {
        Type::Array(t) if t.is_mut() => (*t).clone(),
        t => panic!("internal compiler error: mutable indexing into {}", t),
    };
    let note = Note::new(elem, eff(&e1).join(eff(&e2)));
    Exp {
        it: ExpKind::Idx(Box::new(e1), Box::new(e2)),
        note,
    }
}

/// A mutable field access, for use as an assignment target.
pub fn mut_dot_exp(e: Exp, lab: impl Into<Lab>) -> Exp {
    let lab = lab.into();
    let fields = match normalize(typ(&e)) {
        Type::Obj(_, fs) => fs,
        t => panic!("internal compiler error: field access on non-object type {}", t),
    };
    let ft = lookup_field(&fields, &lab).unwrap_or_else(|| {
        panic!("internal compiler error: no field {} in {}", lab, typ(&e))
    });
    if !ft.is_mut() {
        panic!("internal compiler error: assignment to immutable field {}", lab);
    }
    let note = Note::new(ft.clone(), eff(&e));
    Exp {
        it: ExpKind::Dot(Box::new(e), lab),
        note,
    }
}

/// A function literal. The annotated type is assembled from the
/// signature; the effect is trivial regardless of the body's.
pub fn func_exp(
    name: impl Into<Id>,
    sort: FuncSort,
    control: Control,
    typ_binds: Vec<TypBind>,
    params: Vec<Param>,
    ret: Vec<Type>,
    body: Exp,
) -> Exp {
    let typ = Type::Func(
        sort,
        control,
        typ_binds.clone(),
        params.iter().map(|p| p.typ.clone()).collect(),
        ret.clone(),
    );
    Exp {
        it: ExpKind::Func {
            name: name.into(),
            sort,
            control,
            typ_binds,
            params,
            ret,
            body: Box::new(body),
        },
        note: Note::triv(typ),
    }
}

/// Local function sugar: `func name(params) : ret = body`.
pub fn lambda_exp(name: impl Into<Id>, params: Vec<Param>, ret: Vec<Type>, body: Exp) -> Exp {
    func_exp(
        name,
        FuncSort::Local,
        Control::Returns,
        Vec::new(),
        params,
        ret,
        body,
    )
}

/// Application. The callee must have function type; the result type is
/// the instantiated return sequence (wrapped in `async` for promising
/// functions).
pub fn call_exp(f: Exp, insts: Vec<Type>, arg: Exp) -> Exp {
    let (_sort, control, typ_binds, _dom, cod) = match normalize(typ(&f)) {
        Type::Func(s, c, tbs, dom, cod) => (s, c, tbs, dom, cod),
        t => panic!("internal compiler error: call of non-function type {}", t),
    };
    if typ_binds.len() != insts.len() {
        panic!(
            "internal compiler error: call instantiates {} type arguments, function takes {}",
            insts.len(),
            typ_binds.len()
        );
    }
    let res = open(&insts, &Type::seq(cod));
    let res = match control {
        Control::Returns => res,
        Control::Promises => Type::Async(Box::new(res)),
    };
    let note = Note::new(res, eff(&f).join(eff(&arg)));
    Exp {
        it: ExpKind::Call(Box::new(f), insts, Box::new(arg)),
        note,
    }
}

fn is_trivial_dec(d: &Dec) -> bool {
    match &d.it {
        DecKind::Let(p, e) => {
            let unit_pat = matches!(&p.it, PatKind::Wild)
                || matches!(&p.it, PatKind::Tup(ps) if ps.is_empty());
            unit_pat && matches!(&e.it, ExpKind::Tup(es) if es.is_empty())
        }
        _ => false,
    }
}

/// A block. Trivial declarations (wildcard or unit-pattern bindings of
/// the unit value) are filtered out; an empty block collapses to its
/// result expression.
pub fn block_exp(decs: Vec<Dec>, e: Exp) -> Exp {
    let decs: Vec<Dec> = decs.into_iter().filter(|d| !is_trivial_dec(d)).collect();
    if decs.is_empty() {
        return e;
    }
    let note = Note::new(typ(&e).clone(), join_decs(&decs).join(eff(&e)));
    Exp {
        it: ExpKind::Block(decs, Box::new(e)),
        note,
    }
}

/// `let pat = e in body` sugar.
pub fn let_exp(p: Pat, e: Exp, body: Exp) -> Exp {
    block_exp(vec![let_dec(p, e)], body)
}

/// A conditional with a declared result type.
pub fn if_exp(c: Exp, a: Exp, b: Exp, typ_: Type) -> Exp {
    debug_assert!(
        eq(&normalize(typ(&c)), &Type::Prim(PrimType::Bool)),
        "condition of type {}",
        typ(&c)
    );
    let note = Note::new(typ_, eff(&c).join(eff(&a)).join(eff(&b)));
    Exp {
        it: ExpKind::If(Box::new(c), Box::new(a), Box::new(b)),
        note,
    }
}

/// A switch with a declared result type.
pub fn switch_exp(e: Exp, cases: Vec<Case>, typ_: Type) -> Exp {
    let cases_eff = cases
        .iter()
        .fold(Effect::Triv, |a, c| a.join(eff(&c.exp)));
    let note = Note::new(typ_, eff(&e).join(cases_eff));
    Exp {
        it: ExpKind::Switch(Box::new(e), cases),
        note,
    }
}

/// Two-way switch on an option value.
pub fn switch_opt_exp(e: Exp, id: impl Into<Id>, some_exp: Exp, null_exp: Exp, typ_: Type) -> Exp {
    let elem = normalize(typ(&e)).as_opt().clone();
    let scrut_typ = Type::Opt(Box::new(elem.clone()));
    let cases = vec![
        Case {
            pat: opt_pat(var_pat(id, elem)),
            exp: some_exp,
        },
        Case {
            pat: Pat {
                it: PatKind::Lit(Lit::Null),
                typ: scrut_typ,
            },
            exp: null_exp,
        },
    ];
    switch_exp(e, cases, typ_)
}

/// Switch on a variant value: one arm per `(label, payload pattern, body)`.
pub fn switch_variant_exp(e: Exp, arms: Vec<(Lab, Pat, Exp)>, typ_: Type) -> Exp {
    let scrut_typ = typ(&e).clone();
    let cases = arms
        .into_iter()
        .map(|(lab, pat, exp)| Case {
            pat: Pat {
                it: PatKind::Tag(lab, Box::new(pat)),
                typ: scrut_typ.clone(),
            },
            exp,
        })
        .collect();
    switch_exp(e, cases, typ_)
}

/// An unconditional loop; exits only via `break`, so the type is `None`.
pub fn loop_exp(e: Exp) -> Exp {
    let note = Note::new(Type::Non, eff(&e));
    Exp {
        it: ExpKind::Loop(Box::new(e)),
        note,
    }
}

pub fn label_exp(id: impl Into<Id>, typ_: Type, e: Exp) -> Exp {
    let note = Note::new(typ_, eff(&e));
    Exp {
        it: ExpKind::Label(id.into(), note.typ.clone(), Box::new(e)),
        note,
    }
}

pub fn break_exp(id: impl Into<Id>, e: Exp) -> Exp {
    let note = Note::new(Type::Non, eff(&e));
    Exp {
        it: ExpKind::Break(id.into(), Box::new(e)),
        note,
    }
}

pub fn ret_exp(e: Exp) -> Exp {
    let note = Note::new(Type::Non, eff(&e));
    Exp {
        it: ExpKind::Ret(Box::new(e)),
        note,
    }
}

pub fn throw_exp(e: Exp) -> Exp {
    Exp {
        it: ExpKind::Throw(Box::new(e)),
        note: Note::new(Type::Non, Effect::Await),
    }
}

pub fn try_exp(e: Exp, cases: Vec<Case>, typ_: Type) -> Exp {
    Exp {
        it: ExpKind::Try(Box::new(e), cases),
        note: Note::new(typ_, Effect::Await),
    }
}

pub fn await_exp(e: Exp) -> Exp {
    let payload = match normalize(typ(&e)) {
        Type::Async(t) => *t,
        t => panic!("internal compiler error: await of non-async type {}", t),
    };
    Exp {
        it: ExpKind::Await(Box::new(e)),
        note: Note::new(payload, Effect::Await),
    }
}

pub fn async_exp(e: Exp) -> Exp {
    let note = Note::new(Type::Async(Box::new(typ(&e).clone())), Effect::Await);
    Exp {
        it: ExpKind::Async(Box::new(e)),
        note,
    }
}

pub fn assert_exp(e: Exp) -> Exp {
    debug_assert!(
        eq(&normalize(typ(&e)), &Type::Prim(PrimType::Bool)),
        "assertion of type {}",
        typ(&e)
    );
    let note = Note::new(Type::unit(), eff(&e));
    Exp {
        it: ExpKind::Assert(Box::new(e)),
        note,
    }
}

/// Assignment. The target's annotated type must be a mutable cell.
pub fn assign_exp(lhs: Exp, rhs: Exp) -> Exp {
    if !typ(&lhs).is_mut() {
        panic!(
            "internal compiler error: assignment to immutable target of type {}",
            typ(&lhs)
        );
    }
    let note = Note::new(Type::unit(), eff(&lhs).join(eff(&rhs)));
    Exp {
        it: ExpKind::Assign(Box::new(lhs), Box::new(rhs)),
        note,
    }
}

/// Introduce `id` as a cell of type `typ_`, visible in `scope`.
pub fn declare_exp(id: impl Into<Id>, typ_: Type, scope: Exp) -> Exp {
    let note = Note::new(typ(&scope).clone(), eff(&scope));
    Exp {
        it: ExpKind::Declare(id.into(), typ_, Box::new(scope)),
        note,
    }
}

/// Assign into a cell introduced by `declare_exp`.
pub fn define_exp(id: impl Into<Id>, e: Exp) -> Exp {
    let note = Note::new(Type::unit(), eff(&e));
    Exp {
        it: ExpKind::Define(id.into(), Box::new(e)),
        note,
    }
}

/// Assemble a record from pre-declared named cells.
pub fn new_obj_exp(sort: ObjSort, fields: Vec<NewField>, typ_: Type) -> Exp {
    Exp {
        it: ExpKind::NewObj(sort, fields, typ_.clone()),
        note: Note::triv(typ_),
    }
}

/// An expression of type `None` that can never produce a value.
pub fn unreachable_exp() -> Exp {
    loop_exp(unit_exp())
}

// ============================================================================
//                         DERIVED CONTROL FORMS
// ============================================================================

/// `while cond body`, expanded to a labelled unconditional loop.
pub fn while_exp(names: &mut Names, cond: Exp, body: Exp) -> Exp {
    let l = names.fresh("continue");
    let step = block_exp(vec![exp_dec(body)], unit_exp());
    let exit = break_exp(l.clone(), unit_exp());
    label_exp(l, Type::unit(), loop_exp(if_exp(cond, step, exit, Type::unit())))
}

/// `loop body while cond`: the body runs at least once.
pub fn loop_while_exp(names: &mut Names, body: Exp, cond: Exp) -> Exp {
    let l = names.fresh("continue");
    let exit = break_exp(l.clone(), unit_exp());
    let step = block_exp(
        vec![exp_dec(body)],
        if_exp(cond, unit_exp(), exit, Type::unit()),
    );
    label_exp(l, Type::unit(), loop_exp(step))
}

/// `for (pat in iter) body`, expanded against the iterator protocol: the
/// iterator is an object with a `next : () -> ?T` method.
pub fn for_exp(names: &mut Names, pat: Pat, iter: Exp, body: Exp) -> Exp {
    let i = fresh_var(names, "iter", typ(&iter).clone());
    let l = names.fresh("continue");
    let next = call_exp(dot_exp(i.clone(), "next"), Vec::new(), unit_exp());
    let opt_typ = typ(&next).clone();
    let step = Case {
        pat: Pat {
            it: PatKind::Opt(Box::new(pat)),
            typ: opt_typ.clone(),
        },
        exp: block_exp(vec![exp_dec(body)], unit_exp()),
    };
    let done = Case {
        pat: Pat {
            it: PatKind::Lit(Lit::Null),
            typ: opt_typ,
        },
        exp: break_exp(l.clone(), unit_exp()),
    };
    let switch = switch_exp(next, vec![step, done], Type::unit());
    let loop_ = label_exp(l, Type::unit(), loop_exp(switch));
    let i_id = match &i.it {
        ExpKind::Var(id) => id.clone(),
        _ => unreachable!(),
    };
    let i_typ = typ(&i).clone();
    let_exp(var_pat(i_id, i_typ), iter, loop_)
}

// ============================================================================
//                        CONTINUATION TYPES
// ============================================================================

/// The error value type caught by handlers.
pub fn catch_typ() -> Type {
    Type::Prim(PrimType::Error)
}

/// `cont(T)`: a local function from `T` to unit. Continuations take
/// exactly one parameter so that materialised continuation functions and
/// their declared types always agree.
pub fn cont_typ(t: &Type) -> Type {
    Type::Func(
        FuncSort::Local,
        Control::Returns,
        Vec::new(),
        vec![t.clone()],
        Vec::new(),
    )
}

/// The error continuation type: `catch -> ()`.
pub fn err_cont_typ() -> Type {
    Type::Func(
        FuncSort::Local,
        Control::Returns,
        Vec::new(),
        vec![catch_typ()],
        Vec::new(),
    )
}

/// `cps(T)`: a local function from `(cont(T), err_cont)` to unit.
pub fn cps_typ(t: &Type) -> Type {
    Type::Func(
        FuncSort::Local,
        Control::Returns,
        Vec::new(),
        vec![cont_typ(t), err_cont_typ()],
        Vec::new(),
    )
}

/// The answer type of CPS-translated expressions.
pub fn answer_typ() -> Type {
    Type::unit()
}

// ============================================================================
//                      PATTERNS AND DECLARATIONS
// ============================================================================

pub fn var_pat(id: impl Into<Id>, typ: Type) -> Pat {
    Pat {
        it: PatKind::Var(id.into()),
        typ,
    }
}

pub fn wild_pat(typ: Type) -> Pat {
    Pat {
        it: PatKind::Wild,
        typ,
    }
}

pub fn unit_pat() -> Pat {
    Pat {
        it: PatKind::Tup(Vec::new()),
        typ: Type::unit(),
    }
}

pub fn tup_pat(ps: Vec<Pat>) -> Pat {
    let typ = Type::Tup(ps.iter().map(|p| p.typ.clone()).collect());
    Pat {
        it: PatKind::Tup(ps),
        typ,
    }
}

pub fn opt_pat(p: Pat) -> Pat {
    let typ = Type::Opt(Box::new(p.typ.clone()));
    Pat {
        it: PatKind::Opt(Box::new(p)),
        typ,
    }
}

pub fn tag_pat(lab: impl Into<Lab>, p: Pat, variant_typ: Type) -> Pat {
    Pat {
        it: PatKind::Tag(lab.into(), Box::new(p)),
        typ: variant_typ,
    }
}

pub fn obj_pat(pfs: Vec<PatField>, obj_typ: Type) -> Pat {
    Pat {
        it: PatKind::Obj(pfs),
        typ: obj_typ,
    }
}

pub fn let_dec(p: Pat, e: Exp) -> Dec {
    let note = Note::new(typ(&e).clone(), eff(&e));
    Dec {
        it: DecKind::Let(p, e),
        note,
    }
}

pub fn var_dec(id: impl Into<Id>, typ_: Type, e: Exp) -> Dec {
    let note = Note::new(Type::Mut(Box::new(typ_.clone())), eff(&e));
    Dec {
        it: DecKind::Var(id.into(), typ_, e),
        note,
    }
}

pub fn typ_dec(c: Con) -> Dec {
    Dec {
        it: DecKind::Typ(c),
        note: Note::triv(Type::unit()),
    }
}

/// An expression in declaration position: `let _ = e`.
pub fn exp_dec(e: Exp) -> Dec {
    let p = wild_pat(typ(&e).clone());
    let_dec(p, e)
}

/// `func name(params) : ret = body` as a declaration binding `name`.
pub fn func_dec(name: impl Into<Id>, params: Vec<Param>, ret: Vec<Type>, body: Exp) -> Dec {
    let name = name.into();
    let f = lambda_exp(name.clone(), params, ret, body);
    let ftyp = typ(&f).clone();
    let_dec(var_pat(name, ftyp), f)
}

/// The fields of an object type, sorted; convenience re-export for passes
/// constructing object types.
pub fn obj_typ(sort: ObjSort, fields: Vec<Field>) -> Type {
    Type::Obj(sort, types::sort_fields(fields))
}

pub fn variant_typ(fields: Vec<Field>) -> Type {
    Type::Variant(types::sort_fields(fields))
}
