//! IR validity checker
//!
//! A test and debug aid verifying the invariants the passes rely on and
//! promise: flavor conformance, global binder uniqueness, agreement of
//! the cached effect annotations with a bottom-up recomputation, and a
//! light structural check of type annotations. Wired into the pipeline
//! behind `LowerConfig::check`; not a replacement for the front-end
//! typechecker.

use std::collections::HashSet;

use crate::effect::{infer_effect_dec, infer_effect_exp};
use crate::ir::{Dec, DecKind, Exp, ExpKind, Pat, PatKind, Prim, Prog};
use crate::pretty;
use rill_core::types::{Type, eq};

type CheckFn<'a> = dyn FnMut(&Exp) -> Result<(), String> + 'a;

/// The checks that hold for every well-formed program: flavor
/// conformance, effect agreement, type agreement. Binder uniqueness is a
/// *pass postcondition* (it holds only from the renaming pass onward,
/// and user programs shadow freely before it), so it is a separate entry
/// point.
pub fn check_prog(prog: &Prog) -> Result<(), String> {
    check_flavor(prog)?;
    check_effects(prog)?;
    check_types(prog)?;
    Ok(())
}

// ============================================================================
//                             TRAVERSAL
// ============================================================================

fn visit_prog(prog: &Prog, f: &mut CheckFn) -> Result<(), String> {
    for d in &prog.decs {
        visit_dec(d, f)?;
    }
    visit_exp(&prog.exp, f)
}

fn visit_dec(d: &Dec, f: &mut CheckFn) -> Result<(), String> {
    match &d.it {
        DecKind::Let(_, e) | DecKind::Var(_, _, e) => visit_exp(e, f),
        DecKind::Typ(_) => Ok(()),
    }
}

fn visit_exp(e: &Exp, f: &mut CheckFn) -> Result<(), String> {
    f(e)?;
    match &e.it {
        ExpKind::Var(_) | ExpKind::Lit(_) | ExpKind::NewObj(..) => Ok(()),
        ExpKind::Prim(_, es)
        | ExpKind::Tup(es)
        | ExpKind::Array(_, es)
        | ExpKind::SelfCall(_, es) => {
            for e1 in es {
                visit_exp(e1, f)?;
            }
            Ok(())
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
        | ExpKind::Define(_, e1) => visit_exp(e1, f),
        ExpKind::Idx(e1, e2) | ExpKind::Assign(e1, e2) | ExpKind::Call(e1, _, e2) => {
            visit_exp(e1, f)?;
            visit_exp(e2, f)
        }
        ExpKind::Func { body, .. } => visit_exp(body, f),
        ExpKind::Block(ds, e1) => {
            for d in ds {
                visit_dec(d, f)?;
            }
            visit_exp(e1, f)
        }
        ExpKind::If(c, a, b) => {
            visit_exp(c, f)?;
            visit_exp(a, f)?;
            visit_exp(b, f)
        }
        ExpKind::Switch(e1, cs) | ExpKind::Try(e1, cs) => {
            visit_exp(e1, f)?;
            for c in cs {
                visit_exp(&c.exp, f)?;
            }
            Ok(())
        }
    }
}

// ============================================================================
//                               CHECKS
// ============================================================================

/// No construct excluded by the program's flavor occurs, and no construct
/// introduced by a later pass occurs early.
pub fn check_flavor(prog: &Prog) -> Result<(), String> {
    let flavor = prog.flavor;
    visit_prog(prog, &mut |e: &Exp| {
        match &e.it {
            ExpKind::Prim(Prim::Show(_), _) if !flavor.has_show => Err(format!(
                "show primitive after show desugaring: {}",
                pretty::exp_to_sexp(e)
            )),
            ExpKind::Async(_) | ExpKind::Await(_) | ExpKind::Throw(_) | ExpKind::Try(..)
                if !flavor.has_await =>
            {
                Err(format!(
                    "suspending construct after await lowering: {}",
                    pretty::exp_to_sexp(e)
                ))
            }
            ExpKind::Prim(Prim::CpsAsync(_) | Prim::CpsAwait(_), _) if flavor.has_await => {
                Err(format!(
                    "CPS primitive before await lowering: {}",
                    pretty::exp_to_sexp(e)
                ))
            }
            _ => Ok(()),
        }
    })
}

fn pat_binders(p: &Pat, out: &mut Vec<String>) {
    match &p.it {
        PatKind::Wild | PatKind::Lit(_) => {}
        PatKind::Var(id) => out.push(id.clone()),
        PatKind::Tup(ps) => {
            for p1 in ps {
                pat_binders(p1, out);
            }
        }
        PatKind::Obj(pfs) => {
            for pf in pfs {
                pat_binders(&pf.pat, out);
            }
        }
        PatKind::Opt(p1) | PatKind::Tag(_, p1) => pat_binders(p1, out),
        PatKind::Alt(p1, p2) => {
            pat_binders(p1, out);
            pat_binders(p2, out);
        }
    }
}

/// Every binder in the program is syntactically unique (the postcondition
/// of the renaming pass).
pub fn check_unique_binders(prog: &Prog) -> Result<(), String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut claim = move |binders: Vec<String>| -> Result<(), String> {
        for b in binders {
            if !seen.insert(b.clone()) {
                return Err(format!("duplicate binder '{}'", b));
            }
        }
        Ok(())
    };
    // Top-level and nested declarations both bind; collect through one
    // expression traversal plus the top-level declarations.
    let dec_binders = |d: &Dec| -> Vec<String> {
        let mut out = Vec::new();
        match &d.it {
            DecKind::Let(p, _) => pat_binders(p, &mut out),
            DecKind::Var(id, _, _) => out.push(id.clone()),
            DecKind::Typ(_) => {}
        }
        out
    };
    for d in &prog.decs {
        claim(dec_binders(d))?;
    }
    visit_prog(prog, &mut |e: &Exp| {
        let mut out = Vec::new();
        match &e.it {
            ExpKind::Func { params, .. } => {
                for p in params {
                    out.push(p.id.clone());
                }
            }
            ExpKind::Label(id, _, _) | ExpKind::Declare(id, _, _) => out.push(id.clone()),
            ExpKind::Block(ds, _) => {
                for d in ds {
                    out.extend(dec_binders(d));
                }
            }
            ExpKind::Switch(_, cs) | ExpKind::Try(_, cs) => {
                for c in cs {
                    pat_binders(&c.pat, &mut out);
                }
            }
            _ => {}
        }
        claim(out)
    })
}

/// Every cached effect equals the effect recomputed from the node's
/// children.
pub fn check_effects(prog: &Prog) -> Result<(), String> {
    for d in &prog.decs {
        let expected = infer_effect_dec(&d.it);
        if d.note.eff != expected {
            return Err(format!(
                "declaration effect annotation {} disagrees with inferred {}: {}",
                d.note.eff,
                expected,
                pretty::dec_to_sexp(d)
            ));
        }
    }
    visit_prog(prog, &mut |e: &Exp| {
        let expected = infer_effect_exp(&e.it);
        if e.note.eff != expected {
            return Err(format!(
                "effect annotation {} disagrees with inferred {}: {}",
                e.note.eff,
                expected,
                pretty::exp_to_sexp(e)
            ));
        }
        // Nested declarations are covered by their own annotations.
        if let ExpKind::Block(ds, _) = &e.it {
            for d in ds {
                let expected = infer_effect_dec(&d.it);
                if d.note.eff != expected {
                    return Err(format!(
                        "declaration effect annotation {} disagrees with inferred {}: {}",
                        d.note.eff,
                        expected,
                        pretty::dec_to_sexp(d)
                    ));
                }
            }
        }
        Ok(())
    })
}

/// Structural agreement of type annotations for the constructs whose
/// types are determined by their children alone.
pub fn check_types(prog: &Prog) -> Result<(), String> {
    visit_prog(prog, &mut |e: &Exp| {
        let mismatch = |expected: &Type| {
            Err(format!(
                "type annotation {} disagrees with structural type {}: {}",
                e.note.typ,
                expected,
                pretty::exp_to_sexp(e)
            ))
        };
        match &e.it {
            ExpKind::Lit(l) => {
                let t = l.typ();
                if !eq(&e.note.typ, &t) {
                    return mismatch(&t);
                }
            }
            ExpKind::Tup(es) => {
                let t = Type::Tup(es.iter().map(|e1| e1.note.typ.clone()).collect());
                if !eq(&e.note.typ, &t) {
                    return mismatch(&t);
                }
            }
            ExpKind::Opt(e1) => {
                let t = Type::Opt(Box::new(e1.note.typ.clone()));
                if !eq(&e.note.typ, &t) {
                    return mismatch(&t);
                }
            }
            _ => {}
        }
        Ok(())
    })
}
