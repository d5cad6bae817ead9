//! S-expression dumps of the IR
//!
//! Every IR node renders as a deterministic S-expression; the output is
//! not semantically significant but is used verbatim by golden test
//! fixtures and by the per-pass dumps enabled through `LowerConfig`.
//! Rendering is total: it never panics, even on IR the checker would
//! reject.

use std::fmt::Write;

use crate::ir::{Case, Dec, DecKind, Exp, ExpKind, Lit, Mutability, Pat, PatKind, Prim, Prog};

pub fn prog_to_sexp(p: &Prog) -> String {
    let mut s = String::new();
    s.push_str("(Prog");
    for d in &p.decs {
        s.push(' ');
        dec(&mut s, d);
    }
    s.push(' ');
    exp(&mut s, &p.exp);
    s.push(')');
    s
}

pub fn exp_to_sexp(e: &Exp) -> String {
    let mut s = String::new();
    exp(&mut s, e);
    s
}

pub fn dec_to_sexp(d: &Dec) -> String {
    let mut s = String::new();
    dec(&mut s, d);
    s
}

pub fn pat_to_sexp(p: &Pat) -> String {
    let mut s = String::new();
    pat(&mut s, p);
    s
}

fn lit(s: &mut String, l: &Lit) {
    let _ = match l {
        Lit::Null => write!(s, "null"),
        Lit::Bool(b) => write!(s, "{}", b),
        Lit::Nat(n) => write!(s, "{}", n),
        Lit::Int(i) => write!(s, "{:+}", i),
        Lit::Nat8(n) => write!(s, "{}", n),
        Lit::Nat16(n) => write!(s, "{}", n),
        Lit::Nat32(n) => write!(s, "{}", n),
        Lit::Nat64(n) => write!(s, "{}", n),
        Lit::Int8(i) => write!(s, "{:+}", i),
        Lit::Int16(i) => write!(s, "{:+}", i),
        Lit::Int32(i) => write!(s, "{:+}", i),
        Lit::Int64(i) => write!(s, "{:+}", i),
        Lit::Float(f) => write!(s, "{}", f),
        Lit::Char(c) => write!(s, "{:?}", c),
        Lit::Text(t) => write!(s, "{:?}", t),
        Lit::Blob(b) => write!(s, "blob[{}]", b.len()),
    };
}

fn prim(s: &mut String, p: &Prim) {
    match p {
        Prim::UnOp(t, op) => {
            let _ = write!(s, "(UnPrim {} {:?})", t, op);
        }
        Prim::BinOp(t, op) => {
            let _ = write!(s, "(BinPrim {} {:?})", t, op);
        }
        Prim::RelOp(t, op) => {
            let _ = write!(s, "(RelPrim {} {:?})", t, op);
        }
        Prim::Show(t) => {
            let _ = write!(s, "(ShowPrim {})", t);
        }
        Prim::ICReply(ts) => {
            s.push_str("(ICReplyPrim");
            for t in ts {
                let _ = write!(s, " {}", t);
            }
            s.push(')');
        }
        Prim::ICReject => s.push_str("ICRejectPrim"),
        Prim::ICErrorCode => s.push_str("ICErrorCodePrim"),
        Prim::ICCall => s.push_str("ICCallPrim"),
        Prim::CpsAsync(t) => {
            let _ = write!(s, "(CPSAsync {})", t);
        }
        Prim::CpsAwait(t) => {
            let _ = write!(s, "(CPSAwait {})", t);
        }
    }
}

fn exps(s: &mut String, es: &[Exp]) {
    for e in es {
        s.push(' ');
        exp(s, e);
    }
}

fn cases(s: &mut String, cs: &[Case]) {
    for c in cs {
        s.push_str(" (case ");
        pat(s, &c.pat);
        s.push(' ');
        exp(s, &c.exp);
        s.push(')');
    }
}

fn exp(s: &mut String, e: &Exp) {
    match &e.it {
        ExpKind::Var(id) => {
            let _ = write!(s, "(VarE {})", id);
        }
        ExpKind::Lit(l) => {
            s.push_str("(LitE ");
            lit(s, l);
            s.push(')');
        }
        ExpKind::Prim(p, es) => {
            s.push_str("(PrimE ");
            prim(s, p);
            exps(s, es);
            s.push(')');
        }
        ExpKind::Tup(es) => {
            s.push_str("(TupE");
            exps(s, es);
            s.push(')');
        }
        ExpKind::Proj(e1, i) => {
            s.push_str("(ProjE ");
            exp(s, e1);
            let _ = write!(s, " {})", i);
        }
        ExpKind::Opt(e1) => {
            s.push_str("(OptE ");
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Tag(l, e1) => {
            let _ = write!(s, "(TagE {} ", l);
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Dot(e1, l) => {
            s.push_str("(DotE ");
            exp(s, e1);
            let _ = write!(s, " {})", l);
        }
        ExpKind::ActorDot(e1, l) => {
            s.push_str("(ActorDotE ");
            exp(s, e1);
            let _ = write!(s, " {})", l);
        }
        ExpKind::Array(m, es) => {
            s.push_str(match m {
                Mutability::Const => "(ArrayE",
                Mutability::Var => "(ArrayE var",
            });
            exps(s, es);
            s.push(')');
        }
        ExpKind::Idx(e1, e2) => {
            s.push_str("(IdxE ");
            exp(s, e1);
            s.push(' ');
            exp(s, e2);
            s.push(')');
        }
        ExpKind::Func { name, params, body, .. } => {
            let _ = write!(s, "(FuncE {}", name);
            for p in params {
                let _ = write!(s, " ({} : {})", p.id, p.typ);
            }
            s.push(' ');
            exp(s, body);
            s.push(')');
        }
        ExpKind::Call(f, ts, a) => {
            s.push_str("(CallE ");
            exp(s, f);
            for t in ts {
                let _ = write!(s, " <{}>", t);
            }
            s.push(' ');
            exp(s, a);
            s.push(')');
        }
        ExpKind::Block(ds, e1) => {
            s.push_str("(BlockE");
            for d in ds {
                s.push(' ');
                dec(s, d);
            }
            s.push(' ');
            exp(s, e1);
            s.push(')');
        }
        ExpKind::If(c, a, b) => {
            s.push_str("(IfE ");
            exp(s, c);
            s.push(' ');
            exp(s, a);
            s.push(' ');
            exp(s, b);
            s.push(')');
        }
        ExpKind::Switch(e1, cs) => {
            s.push_str("(SwitchE ");
            exp(s, e1);
            cases(s, cs);
            s.push(')');
        }
        ExpKind::Loop(e1) => {
            s.push_str("(LoopE ");
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Label(id, _, e1) => {
            let _ = write!(s, "(LabelE {} ", id);
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Break(id, e1) => {
            let _ = write!(s, "(BreakE {} ", id);
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Ret(e1) => {
            s.push_str("(RetE ");
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Throw(e1) => {
            s.push_str("(ThrowE ");
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Try(e1, cs) => {
            s.push_str("(TryE ");
            exp(s, e1);
            cases(s, cs);
            s.push(')');
        }
        ExpKind::Await(e1) => {
            s.push_str("(AwaitE ");
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Async(e1) => {
            s.push_str("(AsyncE ");
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Assert(e1) => {
            s.push_str("(AssertE ");
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Assign(e1, e2) => {
            s.push_str("(AssignE ");
            exp(s, e1);
            s.push(' ');
            exp(s, e2);
            s.push(')');
        }
        ExpKind::Declare(id, t, e1) => {
            let _ = write!(s, "(DeclareE {} {} ", id, t);
            exp(s, e1);
            s.push(')');
        }
        ExpKind::Define(id, e1) => {
            let _ = write!(s, "(DefineE {} ", id);
            exp(s, e1);
            s.push(')');
        }
        ExpKind::NewObj(_, fields, _) => {
            s.push_str("(NewObjE");
            for f in fields {
                let _ = write!(s, " ({} {})", f.lab, f.id);
            }
            s.push(')');
        }
        ExpKind::SelfCall(_, es) => {
            s.push_str("(SelfCallE");
            exps(s, es);
            s.push(')');
        }
    }
}

fn pat(s: &mut String, p: &Pat) {
    match &p.it {
        PatKind::Wild => s.push('_'),
        PatKind::Var(id) => {
            let _ = write!(s, "(VarP {})", id);
        }
        PatKind::Lit(l) => {
            s.push_str("(LitP ");
            lit(s, l);
            s.push(')');
        }
        PatKind::Tup(ps) => {
            s.push_str("(TupP");
            for p1 in ps {
                s.push(' ');
                pat(s, p1);
            }
            s.push(')');
        }
        PatKind::Obj(pfs) => {
            s.push_str("(ObjP");
            for pf in pfs {
                let _ = write!(s, " ({} ", pf.lab);
                pat(s, &pf.pat);
                s.push(')');
            }
            s.push(')');
        }
        PatKind::Opt(p1) => {
            s.push_str("(OptP ");
            pat(s, p1);
            s.push(')');
        }
        PatKind::Tag(l, p1) => {
            let _ = write!(s, "(TagP {} ", l);
            pat(s, p1);
            s.push(')');
        }
        PatKind::Alt(p1, p2) => {
            s.push_str("(AltP ");
            pat(s, p1);
            s.push(' ');
            pat(s, p2);
            s.push(')');
        }
    }
}

fn dec(s: &mut String, d: &Dec) {
    match &d.it {
        DecKind::Let(p, e) => {
            s.push_str("(LetD ");
            pat(s, p);
            s.push(' ');
            exp(s, e);
            s.push(')');
        }
        DecKind::Var(id, t, e) => {
            let _ = write!(s, "(VarD {} {} ", id, t);
            exp(s, e);
            s.push(')');
        }
        DecKind::Typ(c) => {
            let _ = write!(s, "(TypD {})", c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{
        block_exp, let_dec, nat_exp, prim_exp, tup_exp, var_exp, var_pat,
    };
    use rill_core::types::{PrimType, Type};

    fn nat() -> Type {
        Type::Prim(PrimType::Nat)
    }

    #[test]
    fn test_exp_rendering() {
        let e = block_exp(
            vec![let_dec(var_pat("x", nat()), nat_exp(1))],
            tup_exp(vec![var_exp("x", nat()), nat_exp(2)]),
        );
        assert_eq!(
            exp_to_sexp(&e),
            "(BlockE (LetD (VarP x) (LitE 1)) (TupE (VarE x) (LitE 2)))"
        );
    }

    #[test]
    fn test_show_prim_rendering() {
        let e = prim_exp(crate::ir::Prim::Show(nat()), vec![nat_exp(42)]);
        assert_eq!(exp_to_sexp(&e), "(PrimE (ShowPrim Nat) (LitE 42))");
    }

    #[test]
    fn test_pat_rendering() {
        let p = crate::construct::tup_pat(vec![
            var_pat("a", nat()),
            crate::construct::wild_pat(nat()),
        ]);
        assert_eq!(pat_to_sexp(&p), "(TupP (VarP a) _)");
    }
}
