//! Effect oracle for the IR
//!
//! Effects are computed bottom-up: a compound expression takes the join of
//! its parts, the suspension-introducing constructs (`Async`, `Await`,
//! `Throw`, `Try`) force `Await`, and function literals are `Triv`
//! regardless of their body (the body's effect is confined to calls).
//!
//! The annotations cached in [`Note`](crate::ir::Note)s are maintained by
//! the construction algebra; [`infer_effect_exp`] recomputes an
//! expression's effect from its children's annotations and is what the IR
//! checker compares against.

use crate::ir::{Case, Dec, DecKind, Exp, ExpKind};
use rill_core::types::{Effect, Type};

/// The annotated effect of an expression.
pub fn eff(e: &Exp) -> Effect {
    e.note.eff
}

/// The annotated type of an expression.
pub fn typ(e: &Exp) -> &Type {
    &e.note.typ
}

pub fn is_triv(e: &Exp) -> bool {
    eff(e) == Effect::Triv
}

fn join_exps(es: &[Exp]) -> Effect {
    es.iter().fold(Effect::Triv, |a, e| a.join(eff(e)))
}

fn join_cases(cs: &[Case]) -> Effect {
    cs.iter().fold(Effect::Triv, |a, c| a.join(eff(&c.exp)))
}

/// Recompute an expression's effect from the cached annotations of its
/// immediate children.
pub fn infer_effect_exp(it: &ExpKind) -> Effect {
    match it {
        ExpKind::Var(_) | ExpKind::Lit(_) | ExpKind::NewObj(..) => Effect::Triv,
        // A function literal does not evaluate its body.
        ExpKind::Func { .. } => Effect::Triv,
        ExpKind::Async(_) | ExpKind::Await(_) | ExpKind::Throw(_) | ExpKind::Try(..) => {
            Effect::Await
        }
        ExpKind::Prim(_, es) | ExpKind::Tup(es) | ExpKind::Array(_, es) => join_exps(es),
        ExpKind::SelfCall(_, es) => join_exps(es),
        ExpKind::Proj(e, _)
        | ExpKind::Opt(e)
        | ExpKind::Tag(_, e)
        | ExpKind::Dot(e, _)
        | ExpKind::ActorDot(e, _)
        | ExpKind::Loop(e)
        | ExpKind::Label(_, _, e)
        | ExpKind::Break(_, e)
        | ExpKind::Ret(e)
        | ExpKind::Assert(e)
        | ExpKind::Declare(_, _, e)
        | ExpKind::Define(_, e) => eff(e),
        ExpKind::Idx(e1, e2) | ExpKind::Assign(e1, e2) | ExpKind::Call(e1, _, e2) => {
            eff(e1).join(eff(e2))
        }
        ExpKind::Block(ds, e) => {
            ds.iter()
                .fold(Effect::Triv, |a, d| a.join(d.note.eff))
                .join(eff(e))
        }
        ExpKind::If(c, a, b) => eff(c).join(eff(a)).join(eff(b)),
        ExpKind::Switch(e, cs) => eff(e).join(join_cases(cs)),
    }
}

/// Recompute a declaration's effect.
pub fn infer_effect_dec(it: &DecKind) -> Effect {
    match it {
        DecKind::Let(_, e) | DecKind::Var(_, _, e) => eff(e),
        DecKind::Typ(_) => Effect::Triv,
    }
}

/// Join of a declaration sequence's effects.
pub fn join_decs(ds: &[Dec]) -> Effect {
    ds.iter().fold(Effect::Triv, |a, d| a.join(d.note.eff))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{await_exp, lit_exp, nat_exp, tup_exp};
    use crate::ir::Lit;

    #[test]
    fn test_literals_are_trivial() {
        let e = lit_exp(Lit::Bool(true));
        assert_eq!(eff(&e), Effect::Triv);
        assert_eq!(infer_effect_exp(&e.it), Effect::Triv);
    }

    #[test]
    fn test_await_forces_await() {
        let fut = crate::construct::var_exp(
            "p",
            Type::Async(Box::new(Type::Prim(rill_core::types::PrimType::Nat))),
        );
        let e = await_exp(fut);
        assert_eq!(eff(&e), Effect::Await);
        let pair = tup_exp(vec![nat_exp(1), e]);
        assert_eq!(eff(&pair), Effect::Await);
        assert_eq!(infer_effect_exp(&pair.it), Effect::Await);
    }
}
