//! Show desugaring pass
//!
//! Replaces every `Show` primitive with a call to a synthesised
//! pretty-printer function `@show<typ_id(t)>` and emits the (mutually
//! recursive) set of such functions at the top of the program. The output
//! flavor clears `has_show`.
//!
//! Discovery walks the program once, rewriting occurrences and recording
//! the normalised root types; synthesis then drains a worklist, emitting
//! one declaration per distinct type identifier and enqueueing the
//! structural dependencies. Recursive types terminate because synthesised
//! functions refer to each other by name (late-bound) and the seen-set is
//! populated before dependencies are followed.
//!
//! Leaf cases call the prelude renderers (`@text_of_Nat`,
//! `@text_of_option`, ...); the `@` prefix is reserved for
//! compiler-generated names and cannot collide with user identifiers.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::construct::{
    call_exp, func_exp, let_dec, prim_exp, proj_exp, switch_exp, text_exp, unreachable_exp,
    var_exp, var_pat,
};
use crate::ir::{
    BinOp, Case, Dec, DecKind, Exp, ExpKind, Flavor, Param, Pat, PatKind, Prim, Prog,
};
use rill_core::types::{
    Control, Field, FuncSort, PrimType, Type, TypBind, normalize, typ_id,
};

/// Types with a pending `@show` occurrence, keyed by identifier. A
/// `BTreeMap` keeps synthesis order (and therefore dumps and golden test
/// fixtures) deterministic.
type Roots = BTreeMap<String, Type>;

/// Desugar every `Show` primitive in the program; clears `has_show`.
pub fn transform(prog: Prog) -> Prog {
    let mut roots = Roots::new();
    let decs: Vec<Dec> = prog
        .decs
        .into_iter()
        .map(|d| t_dec(&mut roots, d))
        .collect();
    let exp = t_exp(&mut roots, prog.exp);
    tracing::debug!(roots = roots.len(), "show desugaring discovered root types");
    let mut all = synthesize(roots);
    all.extend(decs);
    Prog {
        decs: all,
        exp,
        flavor: Flavor {
            has_show: false,
            ..prog.flavor
        },
    }
}

fn show_name(id: &str) -> String {
    format!("@show<{}>", id)
}

fn text() -> Type {
    Type::Prim(PrimType::Text)
}

/// A reference to the show function for `t` (late-bound by name).
fn show_var(id: &str, t: &Type) -> Exp {
    var_exp(
        show_name(id),
        Type::Func(
            FuncSort::Local,
            Control::Returns,
            Vec::new(),
            vec![t.clone()],
            vec![text()],
        ),
    )
}

fn show_for(t: &Type) -> Exp {
    let tn = normalize(t);
    show_var(&typ_id(&tn), &tn)
}

// ============================================================================
//                              DISCOVERY
// ============================================================================

fn t_exps(roots: &mut Roots, es: Vec<Exp>) -> Vec<Exp> {
    es.into_iter().map(|e| t_exp(roots, e)).collect()
}

fn t_cases(roots: &mut Roots, cases: Vec<Case>) -> Vec<Case> {
    cases
        .into_iter()
        .map(|c| Case {
            pat: c.pat,
            exp: t_exp(roots, c.exp),
        })
        .collect()
}

fn t_dec(roots: &mut Roots, d: Dec) -> Dec {
    let note = d.note;
    let it = match d.it {
        DecKind::Let(p, e) => DecKind::Let(p, t_exp(roots, e)),
        DecKind::Var(id, t, e) => DecKind::Var(id, t, t_exp(roots, e)),
        DecKind::Typ(c) => DecKind::Typ(c),
    };
    Dec { it, note }
}

fn t_exp(roots: &mut Roots, e: Exp) -> Exp {
    let note = e.note;
    let it = match e.it {
        ExpKind::Prim(Prim::Show(t), mut es) => {
            // The argument first, in case shows nest.
            let arg = t_exp(roots, es.remove(0));
            let tn = normalize(&t);
            let id = typ_id(&tn);
            roots.entry(id.clone()).or_insert_with(|| tn.clone());
            return call_exp(show_var(&id, &tn), Vec::new(), arg);
        }
        ExpKind::Var(id) => ExpKind::Var(id),
        ExpKind::Lit(l) => ExpKind::Lit(l),
        ExpKind::Prim(p, es) => ExpKind::Prim(p, t_exps(roots, es)),
        ExpKind::Tup(es) => ExpKind::Tup(t_exps(roots, es)),
        ExpKind::Proj(e1, i) => ExpKind::Proj(Box::new(t_exp(roots, *e1)), i),
        ExpKind::Opt(e1) => ExpKind::Opt(Box::new(t_exp(roots, *e1))),
        ExpKind::Tag(l, e1) => ExpKind::Tag(l, Box::new(t_exp(roots, *e1))),
        ExpKind::Dot(e1, l) => ExpKind::Dot(Box::new(t_exp(roots, *e1)), l),
        ExpKind::ActorDot(e1, l) => ExpKind::ActorDot(Box::new(t_exp(roots, *e1)), l),
        ExpKind::Array(m, es) => ExpKind::Array(m, t_exps(roots, es)),
        ExpKind::Idx(e1, e2) => ExpKind::Idx(
            Box::new(t_exp(roots, *e1)),
            Box::new(t_exp(roots, *e2)),
        ),
        ExpKind::Func {
            name,
            sort,
            control,
            typ_binds,
            params,
            ret,
            body,
        } => ExpKind::Func {
            name,
            sort,
            control,
            typ_binds,
            params,
            ret,
            body: Box::new(t_exp(roots, *body)),
        },
        ExpKind::Call(f, ts, a) => ExpKind::Call(
            Box::new(t_exp(roots, *f)),
            ts,
            Box::new(t_exp(roots, *a)),
        ),
        ExpKind::Block(ds, e1) => ExpKind::Block(
            ds.into_iter().map(|d| t_dec(roots, d)).collect(),
            Box::new(t_exp(roots, *e1)),
        ),
        ExpKind::If(c, a, b) => ExpKind::If(
            Box::new(t_exp(roots, *c)),
            Box::new(t_exp(roots, *a)),
            Box::new(t_exp(roots, *b)),
        ),
        ExpKind::Switch(e1, cases) => ExpKind::Switch(
            Box::new(t_exp(roots, *e1)),
            t_cases(roots, cases),
        ),
        ExpKind::Loop(e1) => ExpKind::Loop(Box::new(t_exp(roots, *e1))),
        ExpKind::Label(id, t, e1) => ExpKind::Label(id, t, Box::new(t_exp(roots, *e1))),
        ExpKind::Break(id, e1) => ExpKind::Break(id, Box::new(t_exp(roots, *e1))),
        ExpKind::Ret(e1) => ExpKind::Ret(Box::new(t_exp(roots, *e1))),
        ExpKind::Throw(e1) => ExpKind::Throw(Box::new(t_exp(roots, *e1))),
        ExpKind::Try(e1, cases) => ExpKind::Try(
            Box::new(t_exp(roots, *e1)),
            t_cases(roots, cases),
        ),
        ExpKind::Await(e1) => ExpKind::Await(Box::new(t_exp(roots, *e1))),
        ExpKind::Async(e1) => ExpKind::Async(Box::new(t_exp(roots, *e1))),
        ExpKind::Assert(e1) => ExpKind::Assert(Box::new(t_exp(roots, *e1))),
        ExpKind::Assign(e1, e2) => ExpKind::Assign(
            Box::new(t_exp(roots, *e1)),
            Box::new(t_exp(roots, *e2)),
        ),
        ExpKind::Declare(id, t, scope) => {
            ExpKind::Declare(id, t, Box::new(t_exp(roots, *scope)))
        }
        ExpKind::Define(id, e1) => ExpKind::Define(id, Box::new(t_exp(roots, *e1))),
        ExpKind::NewObj(sort, fields, t) => ExpKind::NewObj(sort, fields, t),
        ExpKind::SelfCall(ts, es) => ExpKind::SelfCall(ts, t_exps(roots, es)),
    };
    Exp { it, note }
}

// ============================================================================
//                              SYNTHESIS
// ============================================================================

fn synthesize(roots: Roots) -> Vec<Dec> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<(String, Type)> = roots.into_iter().collect();
    let mut decs = Vec::new();
    while let Some((id, t)) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        let (dec, deps) = show_dec(&id, &t);
        decs.push(dec);
        for dep in deps {
            let dn = normalize(&dep);
            let did = typ_id(&dn);
            if !seen.contains(&did) {
                queue.push_back((did, dn));
            }
        }
    }
    tracing::debug!(decs = decs.len(), "show desugaring synthesised declarations");
    decs
}

fn cat(e1: Exp, e2: Exp) -> Exp {
    prim_exp(Prim::BinOp(text(), BinOp::Cat), vec![e1, e2])
}

/// `open # p1 # sep # p2 # ... # close`
fn bracket(open: &str, sep: &str, close: &str, parts: Vec<Exp>) -> Exp {
    let mut out = text_exp(open);
    for (i, p) in parts.into_iter().enumerate() {
        if i > 0 {
            out = cat(out, text_exp(sep));
        }
        out = cat(out, p);
    }
    cat(out, text_exp(close))
}

/// A prelude renderer for a primitive type: `@text_of_<Name> : t -> Text`.
fn prelude_prim_var(p: PrimType) -> Exp {
    var_exp(
        format!("@text_of_{}", p.name()),
        Type::Func(
            FuncSort::Local,
            Control::Returns,
            Vec::new(),
            vec![Type::Prim(p)],
            vec![text()],
        ),
    )
}

fn generic_bind() -> Vec<TypBind> {
    vec![TypBind {
        var: "T".to_string(),
        bound: Type::Any,
    }]
}

fn generic_var() -> Type {
    Type::Var("T".to_string(), 0)
}

fn show_fn_typ(t: &Type) -> Type {
    Type::Func(
        FuncSort::Local,
        Control::Returns,
        Vec::new(),
        vec![t.clone()],
        vec![text()],
    )
}

/// `@text_of_option : <T>(T -> Text, ?T) -> Text`
fn prelude_option_var() -> Exp {
    var_exp(
        "@text_of_option",
        Type::Func(
            FuncSort::Local,
            Control::Returns,
            generic_bind(),
            vec![show_fn_typ(&generic_var()), Type::Opt(Box::new(generic_var()))],
            vec![text()],
        ),
    )
}

/// `@text_of_variant : <T>(Text, T -> Text, T) -> Text`
fn prelude_variant_var() -> Exp {
    var_exp(
        "@text_of_variant",
        Type::Func(
            FuncSort::Local,
            Control::Returns,
            generic_bind(),
            vec![text(), show_fn_typ(&generic_var()), generic_var()],
            vec![text()],
        ),
    )
}

/// `@text_of_array : <T>(T -> Text, [T]) -> Text`
fn prelude_array_var(mutable: bool) -> Exp {
    let elem = if mutable {
        Type::Mut(Box::new(generic_var()))
    } else {
        generic_var()
    };
    var_exp(
        if mutable {
            "@text_of_array_mut"
        } else {
            "@text_of_array"
        },
        Type::Func(
            FuncSort::Local,
            Control::Returns,
            generic_bind(),
            vec![show_fn_typ(&generic_var()), Type::Array(Box::new(elem))],
            vec![text()],
        ),
    )
}

fn tup2(a: Exp, b: Exp) -> Exp {
    crate::construct::tup_exp(vec![a, b])
}

fn tup3(a: Exp, b: Exp, c: Exp) -> Exp {
    crate::construct::tup_exp(vec![a, b, c])
}

/// Synthesise the show function for one normalised type. Returns the
/// declaration and the types it depends on.
fn show_dec(id: &str, t: &Type) -> (Dec, Vec<Type>) {
    let x = var_exp("x", t.clone());
    let (body, deps): (Exp, Vec<Type>) = match t {
        Type::Prim(p) => match p {
            PrimType::Bool
            | PrimType::Nat
            | PrimType::Int
            | PrimType::Nat8
            | PrimType::Nat16
            | PrimType::Nat32
            | PrimType::Nat64
            | PrimType::Int8
            | PrimType::Int16
            | PrimType::Int32
            | PrimType::Int64
            | PrimType::Text => (
                call_exp(prelude_prim_var(*p), Vec::new(), x.clone()),
                vec![],
            ),
            PrimType::Null => (text_exp("null"), vec![]),
            _ => panic!(
                "internal compiler error: show is not defined for type {}",
                t
            ),
        },
        Type::Func(..) => (text_exp("func"), vec![]),
        Type::Tup(ts) => {
            let parts = ts
                .iter()
                .enumerate()
                .map(|(i, ti)| {
                    call_exp(show_for(ti), Vec::new(), proj_exp(x.clone(), i))
                })
                .collect();
            (bracket("(", ", ", ")", parts), ts.clone())
        }
        Type::Opt(t1) => (
            call_exp(
                prelude_option_var(),
                vec![(**t1).clone()],
                tup2(show_for(t1), x.clone()),
            ),
            vec![(**t1).clone()],
        ),
        Type::Array(elem) => match elem.as_ref() {
            Type::Mut(u) => (
                call_exp(
                    prelude_array_var(true),
                    vec![(**u).clone()],
                    tup2(show_for(u), x.clone()),
                ),
                vec![(**u).clone()],
            ),
            _ => (
                call_exp(
                    prelude_array_var(false),
                    vec![(**elem).clone()],
                    tup2(show_for(elem), x.clone()),
                ),
                vec![(**elem).clone()],
            ),
        },
        Type::Obj(rill_core::types::ObjSort::Object, fields) => {
            let mut deps = Vec::new();
            let parts = fields
                .iter()
                .map(|f| {
                    let ft = f.typ.as_immut().clone();
                    deps.push(ft.clone());
                    let shown = call_exp(
                        show_for(&ft),
                        Vec::new(),
                        field_read(&x, f),
                    );
                    cat(text_exp(format!("{} = ", f.lab)), shown)
                })
                .collect();
            (bracket("{", "; ", "}", parts), deps)
        }
        Type::Variant(fields) => {
            let mut deps = Vec::new();
            let cases = fields
                .iter()
                .map(|f| {
                    deps.push(f.typ.clone());
                    let payload = var_exp("y", f.typ.clone());
                    let arm = call_exp(
                        prelude_variant_var(),
                        vec![f.typ.clone()],
                        tup3(text_exp(f.lab.clone()), show_for(&f.typ), payload),
                    );
                    Case {
                        pat: Pat {
                            it: PatKind::Tag(
                                f.lab.clone(),
                                Box::new(var_pat("y", f.typ.clone())),
                            ),
                            typ: t.clone(),
                        },
                        exp: arm,
                    }
                })
                .collect();
            (switch_exp(x.clone(), cases, text()), deps)
        }
        Type::Non => (unreachable_exp(), vec![]),
        _ => panic!(
            "internal compiler error: show is not defined for type {}",
            t
        ),
    };
    let name = show_name(id);
    let f = func_exp(
        name.clone(),
        FuncSort::Local,
        Control::Returns,
        Vec::new(),
        vec![Param {
            id: "x".to_string(),
            typ: t.clone(),
        }],
        vec![text()],
        body,
    );
    let ftyp = f.note.typ.clone();
    (let_dec(var_pat(name, ftyp), f), deps)
}

/// Read a field of `x`, rebuilding the access node directly so mutable
/// fields read at their content type.
fn field_read(x: &Exp, f: &Field) -> Exp {
    Exp {
        it: ExpKind::Dot(Box::new(x.clone()), f.lab.clone()),
        note: crate::ir::Note::triv(f.typ.as_immut().clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{lit_exp, nat_exp, opt_exp, tag_exp, tup_exp, variant_typ};
    use crate::ir::Lit as IrLit;
    use rill_core::types::{Con, Kind};

    fn nat() -> Type {
        Type::Prim(PrimType::Nat)
    }

    fn prog_of(e: Exp) -> Prog {
        Prog {
            decs: vec![],
            exp: e,
            flavor: Flavor::initial(),
        }
    }

    fn show_of(t: Type, e: Exp) -> Exp {
        prim_exp(Prim::Show(t), vec![e])
    }

    fn dec_names(p: &Prog) -> Vec<String> {
        p.decs
            .iter()
            .filter_map(|d| match &d.it {
                DecKind::Let(pat, _) => match &pat.it {
                    PatKind::Var(id) => Some(id.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_show_nat_literal() {
        // show 42 where 42 : Nat
        let out = transform(prog_of(show_of(nat(), nat_exp(42))));
        assert!(!out.flavor.has_show);
        // Occurrence rewritten to a call of @show<Nat>.
        match &out.exp.it {
            ExpKind::Call(f, _, a) => {
                assert_eq!(f.it, ExpKind::Var("@show<Nat>".to_string()));
                assert_eq!(a.it, ExpKind::Lit(IrLit::Nat(42)));
            }
            other => panic!("expected call, got {:?}", other),
        }
        // One synthesised declaration calling the prelude renderer.
        assert_eq!(dec_names(&out), vec!["@show<Nat>".to_string()]);
        match &out.decs[0].it {
            DecKind::Let(_, f) => match &f.it {
                ExpKind::Func { body, .. } => match &body.it {
                    ExpKind::Call(g, _, _) => {
                        assert_eq!(g.it, ExpKind::Var("@text_of_Nat".to_string()));
                    }
                    other => panic!("expected prelude call, got {:?}", other),
                },
                other => panic!("expected function, got {:?}", other),
            },
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn test_show_structured_value_builds_dag() {
        // show (Some 1, #ok 2) : (?Nat, {#ok : Nat; #err : Text})
        let variant = variant_typ(vec![
            Field {
                lab: "ok".to_string(),
                typ: nat(),
            },
            Field {
                lab: "err".to_string(),
                typ: Type::Prim(PrimType::Text),
            },
        ]);
        let t = Type::Tup(vec![Type::Opt(Box::new(nat())), variant.clone()]);
        let v = tup_exp(vec![
            opt_exp(nat_exp(1)),
            tag_exp("ok", nat_exp(2), variant),
        ]);
        let out = transform(prog_of(show_of(t, v)));
        let names = dec_names(&out);
        // Tuple, option, variant, Nat and Text each get one declaration.
        assert_eq!(names.len(), 5);
        assert!(names.contains(&"@show<(?Nat,{#err:Text;#ok:Nat})>".to_string()));
        assert!(names.contains(&"@show<?Nat>".to_string()));
        assert!(names.contains(&"@show<{#err:Text;#ok:Nat}>".to_string()));
        assert!(names.contains(&"@show<Nat>".to_string()));
        assert!(names.contains(&"@show<Text>".to_string()));
        // No duplicates.
        let mut dedup = names.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), names.len());
    }

    #[test]
    fn test_show_recursive_type_terminates() {
        // type List = ?(Nat, List)
        let c = Con::fresh("List", Kind::Abs(vec![]));
        let body = Type::Opt(Box::new(Type::Tup(vec![
            nat(),
            Type::Con(c.clone(), vec![]),
        ])));
        c.set_kind(Kind::Def(vec![], body));
        let list = Type::Con(c, vec![]);
        let out = transform(prog_of(show_of(
            list.clone(),
            lit_exp(IrLit::Null),
        )));
        let names = dec_names(&out);
        // List itself, the pair, Nat; all recursion resolved by name.
        assert!(names.contains(&"@show<?(Nat,!1)>".to_string()));
        assert!(names.contains(&"@show<Nat>".to_string()));
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_desugaring_is_idempotent() {
        let once = transform(prog_of(show_of(nat(), nat_exp(7))));
        let twice = transform(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_show_unit_and_null() {
        let out = transform(prog_of(show_of(Type::unit(), crate::construct::unit_exp())));
        assert_eq!(dec_names(&out), vec!["@show<()>".to_string()]);
        let out = transform(prog_of(show_of(
            Type::Prim(PrimType::Null),
            lit_exp(IrLit::Null),
        )));
        match &out.decs[0].it {
            DecKind::Let(_, f) => match &f.it {
                ExpKind::Func { body, .. } => {
                    assert_eq!(body.it, ExpKind::Lit(IrLit::Text("null".to_string())));
                }
                other => panic!("expected function, got {:?}", other),
            },
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    #[should_panic(expected = "internal compiler error")]
    fn test_show_on_open_type_is_rejected() {
        let open = Type::Var("A".to_string(), 0);
        transform(prog_of(show_of(open.clone(), var_exp("x", open))));
    }
}
