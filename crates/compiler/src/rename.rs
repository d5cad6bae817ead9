//! Alpha-renaming pass
//!
//! Rewrites a program so that every binder carries a globally unique,
//! freshly generated name while every use still resolves to the same
//! binder. Structure, types and effects are untouched. Type declarations
//! live in a separate namespace and are not renamed.
//!
//! The await pass requires unique binders (it moves code across
//! suspension points and must substitute freely); it also re-runs the
//! renamer on async bodies it duplicates into continuations.

use std::collections::HashMap;

use crate::construct::Names;
use crate::ir::{
    Case, Dec, DecKind, Exp, ExpKind, Id, NewField, Pat, PatKind, Prog,
};

/// Environment mapping original names to their renamed forms. Names not
/// in the environment are free (module imports, prelude names) and kept.
pub type Renaming = HashMap<Id, Id>;

/// Rename every binder in the program.
pub fn transform(names: &mut Names, prog: Prog) -> Prog {
    tracing::debug!(
        decs = prog.decs.len(),
        "alpha-renaming program"
    );
    let rho = Renaming::new();
    let (decs2, rho2) = rename_decs(names, &rho, prog.decs);
    let exp2 = rename_exp(names, &rho2, prog.exp);
    Prog {
        decs: decs2,
        exp: exp2,
        flavor: prog.flavor,
    }
}

/// Rename the binders of an expression in an empty environment; free
/// variables keep their names. Used by the await pass to restore binder
/// uniqueness in code it is about to duplicate.
pub fn rename_bound(names: &mut Names, e: Exp) -> Exp {
    rename_exp(names, &Renaming::new(), e)
}

/// The base of a (possibly already stamped) identifier, so re-renaming
/// yields `x/1`, not `x/0/1`.
fn base_of(id: &str) -> &str {
    id.split('/').next().unwrap_or(id)
}

fn lookup(rho: &Renaming, id: &str) -> Id {
    rho.get(id).cloned().unwrap_or_else(|| id.to_string())
}

fn bind(names: &mut Names, rho: &mut Renaming, id: &str) -> Id {
    let fresh = names.fresh(base_of(id));
    rho.insert(id.to_string(), fresh.clone());
    fresh
}

fn rename_exp(names: &mut Names, rho: &Renaming, e: Exp) -> Exp {
    let note = e.note;
    let it = match e.it {
        ExpKind::Var(id) => ExpKind::Var(lookup(rho, &id)),
        ExpKind::Lit(l) => ExpKind::Lit(l),
        ExpKind::Prim(p, es) => ExpKind::Prim(p, rename_exps(names, rho, es)),
        ExpKind::Tup(es) => ExpKind::Tup(rename_exps(names, rho, es)),
        ExpKind::Proj(e1, i) => ExpKind::Proj(rename_boxed(names, rho, e1), i),
        ExpKind::Opt(e1) => ExpKind::Opt(rename_boxed(names, rho, e1)),
        ExpKind::Tag(l, e1) => ExpKind::Tag(l, rename_boxed(names, rho, e1)),
        ExpKind::Dot(e1, l) => ExpKind::Dot(rename_boxed(names, rho, e1), l),
        ExpKind::ActorDot(e1, l) => ExpKind::ActorDot(rename_boxed(names, rho, e1), l),
        ExpKind::Array(m, es) => ExpKind::Array(m, rename_exps(names, rho, es)),
        ExpKind::Idx(e1, e2) => ExpKind::Idx(
            rename_boxed(names, rho, e1),
            rename_boxed(names, rho, e2),
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
            let mut rho2 = rho.clone();
            let params2 = params
                .into_iter()
                .map(|mut p| {
                    p.id = bind(names, &mut rho2, &p.id);
                    p
                })
                .collect();
            ExpKind::Func {
                name,
                sort,
                control,
                typ_binds,
                params: params2,
                ret,
                body: Box::new(rename_exp(names, &rho2, *body)),
            }
        }
        ExpKind::Call(f, ts, a) => ExpKind::Call(
            rename_boxed(names, rho, f),
            ts,
            rename_boxed(names, rho, a),
        ),
        ExpKind::Block(ds, e1) => {
            let (ds2, rho2) = rename_decs(names, rho, ds);
            ExpKind::Block(ds2, Box::new(rename_exp(names, &rho2, *e1)))
        }
        ExpKind::If(c, a, b) => ExpKind::If(
            rename_boxed(names, rho, c),
            rename_boxed(names, rho, a),
            rename_boxed(names, rho, b),
        ),
        ExpKind::Switch(e1, cases) => ExpKind::Switch(
            rename_boxed(names, rho, e1),
            rename_cases(names, rho, cases),
        ),
        ExpKind::Loop(e1) => ExpKind::Loop(rename_boxed(names, rho, e1)),
        ExpKind::Label(id, t, e1) => {
            let mut rho2 = rho.clone();
            let id2 = bind(names, &mut rho2, &id);
            ExpKind::Label(id2, t, Box::new(rename_exp(names, &rho2, *e1)))
        }
        ExpKind::Break(id, e1) => {
            ExpKind::Break(lookup(rho, &id), rename_boxed(names, rho, e1))
        }
        ExpKind::Ret(e1) => ExpKind::Ret(rename_boxed(names, rho, e1)),
        ExpKind::Throw(e1) => ExpKind::Throw(rename_boxed(names, rho, e1)),
        ExpKind::Try(e1, cases) => ExpKind::Try(
            rename_boxed(names, rho, e1),
            rename_cases(names, rho, cases),
        ),
        ExpKind::Await(e1) => ExpKind::Await(rename_boxed(names, rho, e1)),
        ExpKind::Async(e1) => ExpKind::Async(rename_boxed(names, rho, e1)),
        ExpKind::Assert(e1) => ExpKind::Assert(rename_boxed(names, rho, e1)),
        ExpKind::Assign(e1, e2) => ExpKind::Assign(
            rename_boxed(names, rho, e1),
            rename_boxed(names, rho, e2),
        ),
        ExpKind::Declare(id, t, scope) => {
            let mut rho2 = rho.clone();
            let id2 = bind(names, &mut rho2, &id);
            ExpKind::Declare(id2, t, Box::new(rename_exp(names, &rho2, *scope)))
        }
        ExpKind::Define(id, e1) => {
            ExpKind::Define(lookup(rho, &id), rename_boxed(names, rho, e1))
        }
        ExpKind::NewObj(sort, fields, t) => ExpKind::NewObj(
            sort,
            fields
                .into_iter()
                .map(|f| NewField {
                    lab: f.lab,
                    id: lookup(rho, &f.id),
                })
                .collect(),
            t,
        ),
        ExpKind::SelfCall(ts, es) => ExpKind::SelfCall(ts, rename_exps(names, rho, es)),
    };
    Exp { it, note }
}

fn rename_boxed(names: &mut Names, rho: &Renaming, e: Box<Exp>) -> Box<Exp> {
    Box::new(rename_exp(names, rho, *e))
}

fn rename_exps(names: &mut Names, rho: &Renaming, es: Vec<Exp>) -> Vec<Exp> {
    es.into_iter().map(|e| rename_exp(names, rho, e)).collect()
}

fn rename_cases(names: &mut Names, rho: &Renaming, cases: Vec<Case>) -> Vec<Case> {
    cases
        .into_iter()
        .map(|c| {
            let mut rho2 = rho.clone();
            let pat2 = rename_pat(names, &mut rho2, c.pat);
            Case {
                pat: pat2,
                exp: rename_exp(names, &rho2, c.exp),
            }
        })
        .collect()
}

fn rename_pat(names: &mut Names, rho: &mut Renaming, p: Pat) -> Pat {
    let typ = p.typ;
    let it = match p.it {
        PatKind::Wild => PatKind::Wild,
        PatKind::Lit(l) => PatKind::Lit(l),
        PatKind::Var(id) => PatKind::Var(bind(names, rho, &id)),
        PatKind::Tup(ps) => PatKind::Tup(
            ps.into_iter()
                .map(|p| rename_pat(names, rho, p))
                .collect(),
        ),
        PatKind::Obj(pfs) => PatKind::Obj(
            pfs.into_iter()
                .map(|mut pf| {
                    pf.pat = rename_pat(names, rho, pf.pat);
                    pf
                })
                .collect(),
        ),
        PatKind::Opt(p1) => PatKind::Opt(Box::new(rename_pat(names, rho, *p1))),
        PatKind::Tag(l, p1) => PatKind::Tag(l, Box::new(rename_pat(names, rho, *p1))),
        PatKind::Alt(p1, p2) => {
            // Alternatives may not bind; the elaborator enforces this and
            // the renamer relies on it.
            if !p1.vars().is_empty() || !p2.vars().is_empty() {
                panic!("internal compiler error: variables bound under pattern alternation");
            }
            PatKind::Alt(
                Box::new(rename_pat(names, rho, *p1)),
                Box::new(rename_pat(names, rho, *p2)),
            )
        }
    };
    Pat { it, typ }
}

/// Rename a mutually recursive declaration group: first collect fresh
/// names for every binder, then rewrite right-hand sides under the
/// extended environment, so definitions may refer to one another in any
/// order.
fn rename_decs(names: &mut Names, rho: &Renaming, ds: Vec<Dec>) -> (Vec<Dec>, Renaming) {
    let mut rho2 = rho.clone();
    // Pass 1: binders.
    let staged: Vec<Dec> = ds
        .into_iter()
        .map(|d| {
            let note = d.note;
            let it = match d.it {
                DecKind::Let(p, e) => DecKind::Let(rename_pat(names, &mut rho2, p), e),
                DecKind::Var(id, t, e) => DecKind::Var(bind(names, &mut rho2, &id), t, e),
                DecKind::Typ(c) => DecKind::Typ(c),
            };
            Dec { it, note }
        })
        .collect();
    // Pass 2: right-hand sides.
    let ds2 = staged
        .into_iter()
        .map(|d| {
            let note = d.note;
            let it = match d.it {
                DecKind::Let(p, e) => DecKind::Let(p, rename_exp(names, &rho2, e)),
                DecKind::Var(id, t, e) => DecKind::Var(id, t, rename_exp(names, &rho2, e)),
                DecKind::Typ(c) => DecKind::Typ(c),
            };
            Dec { it, note }
        })
        .collect();
    (ds2, rho2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{
        block_exp, bool_exp, break_exp, if_exp, label_exp, let_dec, loop_exp, nat_exp, tup_pat,
        unit_exp, var_exp, var_pat,
    };
    use crate::ir::{Flavor, Lit};
    use rill_core::types::{PrimType, Type};

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

    #[test]
    fn test_renames_binder_and_use() {
        let e = block_exp(
            vec![let_dec(var_pat("x", nat()), nat_exp(1))],
            var_exp("x", nat()),
        );
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(e));
        match &out.exp.it {
            ExpKind::Block(ds, body) => {
                let bound = match &ds[0].it {
                    DecKind::Let(p, _) => match &p.it {
                        PatKind::Var(id) => id.clone(),
                        other => panic!("expected var pattern, got {:?}", other),
                    },
                    other => panic!("expected let, got {:?}", other),
                };
                assert_eq!(bound, "x/0");
                assert_eq!(body.it, ExpKind::Var("x/0".to_string()));
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_shadowing_resolves_to_nearest_binder() {
        // { let x = 1; { let x = 2; x } }
        let inner = block_exp(
            vec![let_dec(var_pat("x", nat()), nat_exp(2))],
            var_exp("x", nat()),
        );
        let outer = block_exp(vec![let_dec(var_pat("x", nat()), nat_exp(1))], inner);
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(outer));
        match &out.exp.it {
            ExpKind::Block(_, body) => match &body.it {
                ExpKind::Block(ds, use_) => {
                    let bound = match &ds[0].it {
                        DecKind::Let(p, _) => match &p.it {
                            PatKind::Var(id) => id.clone(),
                            other => panic!("unexpected pattern {:?}", other),
                        },
                        other => panic!("unexpected dec {:?}", other),
                    };
                    assert_eq!(bound, "x/1");
                    assert_eq!(use_.it, ExpKind::Var("x/1".to_string()));
                }
                other => panic!("expected inner block, got {:?}", other),
            },
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_free_variables_are_kept() {
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(var_exp("print", nat())));
        assert_eq!(out.exp.it, ExpKind::Var("print".to_string()));
    }

    #[test]
    fn test_label_and_break_renamed_together() {
        // label L loop { if done break L with () }
        let body = loop_exp(if_exp(
            var_exp("done", Type::Prim(PrimType::Bool)),
            break_exp("L", unit_exp()),
            unit_exp(),
            Type::unit(),
        ));
        let labelled = label_exp("L", Type::unit(), body);
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(labelled));
        match &out.exp.it {
            ExpKind::Label(l, _, inner) => {
                assert_eq!(l, "L/0");
                match &inner.it {
                    ExpKind::Loop(e) => match &e.it {
                        ExpKind::If(_, a, _) => {
                            assert!(matches!(&a.it, ExpKind::Break(l2, _) if l2 == "L/0"));
                        }
                        other => panic!("expected if, got {:?}", other),
                    },
                    other => panic!("expected loop, got {:?}", other),
                }
            }
            other => panic!("expected label, got {:?}", other),
        }
    }

    #[test]
    fn test_recursive_group_sees_later_binders() {
        // let f = g; let g = 1  -- f's rhs must resolve to the renamed g
        let decs = vec![
            let_dec(var_pat("f", nat()), var_exp("g", nat())),
            let_dec(var_pat("g", nat()), nat_exp(1)),
        ];
        let mut names = Names::new();
        let out = transform(
            &mut names,
            Prog {
                decs,
                exp: unit_exp(),
                flavor: Flavor::initial(),
            },
        );
        match &out.decs[0].it {
            DecKind::Let(_, e) => assert_eq!(e.it, ExpKind::Var("g/0".to_string())),
            other => panic!("unexpected dec {:?}", other),
        }
    }

    #[test]
    fn test_idempotent_up_to_fresh_names() {
        let e = block_exp(
            vec![let_dec(
                tup_pat(vec![var_pat("a", nat()), var_pat("b", nat())]),
                crate::construct::tup_exp(vec![nat_exp(0), nat_exp(0)]),
            )],
            var_exp("a", nat()),
        );
        let mut n1 = Names::new();
        let once = transform(&mut n1, prog_of(e));
        let mut n2 = Names::new();
        let twice = transform(&mut n2, once.clone());
        // Renaming a renamed program with a fresh name source reproduces it.
        assert_eq!(once, twice);
    }

    #[test]
    #[should_panic(expected = "internal compiler error")]
    fn test_alt_patterns_must_be_variable_free() {
        let alt = Pat {
            it: PatKind::Alt(
                Box::new(var_pat("x", nat())),
                Box::new(var_pat("y", nat())),
            ),
            typ: nat(),
        };
        let e = block_exp(vec![let_dec(alt, nat_exp(1))], unit_exp());
        let mut names = Names::new();
        transform(&mut names, prog_of(e));
    }

    #[test]
    fn test_ignores_condition_uses_before_binding() {
        let mut names = Names::new();
        let out = transform(&mut names, prog_of(bool_exp(true)));
        assert_eq!(out.exp.it, ExpKind::Lit(Lit::Bool(true)));
    }
}
