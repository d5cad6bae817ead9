//! End-to-end middle-end scenarios: literal input IR through the passes,
//! with golden S-expression dumps where the output shape is pinned down.

use rillc::check;
use rillc::construct::{
    Names, async_exp, await_exp, block_exp, break_exp, call_exp, catch_typ, if_exp, label_exp,
    let_dec, nat_exp, prim_exp, throw_exp, try_exp, tup_exp, unit_exp, var_exp, wild_pat,
};
use rillc::ir::{ExpKind, Flavor, Prim, Prog};
use rillc::pretty::{dec_to_sexp, exp_to_sexp, prog_to_sexp};
use rillc::{LowerConfig, LowerError, lower};
use rill_core::types::{Control, FuncSort, PrimType, Type};

fn nat() -> Type {
    Type::Prim(PrimType::Nat)
}

fn fut_nat() -> Type {
    Type::Async(Box::new(nat()))
}

fn prog_of(e: rillc::Exp) -> Prog {
    Prog {
        decs: vec![],
        exp: e,
        flavor: Flavor::initial(),
    }
}

fn checked_config() -> LowerConfig {
    LowerConfig {
        check: true,
        ..LowerConfig::default()
    }
}

#[test]
fn test_show_nat_end_to_end() {
    // show 42  ~>  @show<Nat>(42), plus the synthesised declaration
    let prog = prog_of(prim_exp(Prim::Show(nat()), vec![nat_exp(42)]));
    let out = rillc::show_lower::transform(prog);
    assert_eq!(
        exp_to_sexp(&out.exp),
        "(CallE (VarE @show<Nat>) (LitE 42))"
    );
    assert_eq!(
        dec_to_sexp(&out.decs[0]),
        "(LetD (VarP @show<Nat>) (FuncE @show<Nat> (x : Nat) \
         (CallE (VarE @text_of_Nat) (VarE x))))"
    );
}

#[test]
fn test_async_await_golden() {
    // async { await p }  with p : async Nat
    let prog = prog_of(async_exp(await_exp(var_exp("p", fut_nat()))));
    let out = lower(prog, &checked_config()).unwrap();
    assert_eq!(
        exp_to_sexp(&out.exp),
        "(PrimE (CPSAsync Nat) (FuncE async/0 \
         (k_ret/0 : func(Nat) -> ()) (k_fail/0 : func(Error) -> ()) \
         (PrimE (CPSAwait Nat) (VarE p) (TupE (VarE k_ret/0) (VarE k_fail/0)))))"
    );
}

#[test]
fn test_try_without_matching_handler_propagates() {
    // async { try { throw err } }: the synthetic pass-through arm forwards
    // the error to the enclosing failure continuation.
    let body = try_exp(throw_exp(var_exp("err", catch_typ())), vec![], Type::unit());
    let out = lower(prog_of(async_exp(body)), &checked_config()).unwrap();
    let dump = prog_to_sexp(&out);
    assert!(dump.contains("(FuncE throw/0"));
    assert!(dump.contains("SwitchE"));
    // The pass-through arm calls the async failure continuation.
    assert!(dump.contains("(CallE (VarE k_fail/0)"));
    assert!(!dump.contains("ThrowE"));
    assert!(!dump.contains("TryE"));
}

#[test]
fn test_label_loop_lowers_to_recursive_function() {
    // async { label L loop { let _ = await p; if done break L () } }
    let p = var_exp("p", fut_nat());
    let cond = var_exp("done", Type::Prim(PrimType::Bool));
    let loop_body = block_exp(
        vec![let_dec(wild_pat(nat()), await_exp(p))],
        if_exp(cond, break_exp("L", unit_exp()), unit_exp(), Type::unit()),
    );
    let labelled = label_exp("L", Type::unit(), rillc::construct::loop_exp(loop_body));
    let out = lower(prog_of(async_exp(labelled)), &checked_config()).unwrap();
    let dump = prog_to_sexp(&out);
    assert!(dump.contains("(FuncE loop/0"));
    assert!(!dump.contains("LabelE"));
    assert!(!dump.contains("BreakE"));
    assert!(!dump.contains("AwaitE"));
}

#[test]
fn test_show_dag_has_no_duplicates() {
    // show over (?Nat, {#ok : Nat; #err : Text}) emits one declaration
    // per reachable type.
    let variant = rillc::construct::variant_typ(vec![
        rill_core::types::Field {
            lab: "ok".to_string(),
            typ: nat(),
        },
        rill_core::types::Field {
            lab: "err".to_string(),
            typ: Type::Prim(PrimType::Text),
        },
    ]);
    let t = Type::Tup(vec![Type::Opt(Box::new(nat())), variant.clone()]);
    let v = tup_exp(vec![
        rillc::construct::opt_exp(nat_exp(1)),
        rillc::construct::tag_exp("ok", nat_exp(2), variant),
    ]);
    let out = lower(
        prog_of(prim_exp(Prim::Show(t), vec![v])),
        &checked_config(),
    )
    .unwrap();
    let dump = prog_to_sexp(&out);
    // Five reachable types, five declarations, each emitted once.
    for id in [
        "@show<(?Nat,{#err:Text;#ok:Nat})>",
        "@show<?Nat>",
        "@show<{#err:Text;#ok:Nat}>",
        "@show<Nat>",
        "@show<Text>",
    ] {
        let hits = dump.matches(&format!("(VarP {}", id)).count();
        assert_eq!(hits, 1, "expected exactly one declaration of {}", id);
    }
    assert!(!dump.contains("ShowPrim"));
}

#[test]
fn test_trivial_bound_before_awaitful_argument() {
    // fn body: x + await f()
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
    let sum = prim_exp(
        Prim::BinOp(nat(), rillc::ir::BinOp::Add),
        vec![var_exp("x", nat()), await_exp(call_exp(f, vec![], unit_exp()))],
    );
    let out = lower(prog_of(async_exp(sum)), &checked_config()).unwrap();
    let dump = prog_to_sexp(&out);
    // x is let-bound once, before the await fires; the continuation
    // applies the addition and tail-calls the outer continuation.
    assert_eq!(dump.matches("(LetD (VarP v/0) (VarE x))").count(), 1);
    assert!(dump.contains("BinPrim Nat Add"));
    assert!(dump.contains("CPSAwait"));
}

#[test]
fn test_flavor_monotone_and_checked() {
    let prog = prog_of(async_exp(prim_exp(Prim::Show(nat()), vec![nat_exp(7)])));
    let out = lower(prog, &checked_config()).unwrap();
    assert_eq!(out.flavor, Flavor::lowered());
    assert!(check::check_prog(&out).is_ok());
}

#[test]
fn test_await_lowering_is_idempotent() {
    let prog = prog_of(async_exp(await_exp(var_exp("p", fut_nat()))));
    let mut names = Names::new();
    let renamed = rillc::rename::transform(&mut names, prog);
    let once = rillc::await_lower::transform(&mut names, renamed);
    let mut names2 = Names::new();
    let twice = rillc::await_lower::transform(&mut names2, once.clone());
    assert_eq!(once, twice);
}

#[test]
fn test_out_of_order_invocation_is_reported() {
    let prog = Prog {
        decs: vec![],
        exp: unit_exp(),
        flavor: Flavor {
            has_await: true,
            has_show: false,
        },
    };
    match lower(prog, &LowerConfig::default()) {
        Err(LowerError::FlavorMismatch { pass, .. }) => assert_eq!(pass, "show"),
        other => panic!("expected flavor mismatch, got {:?}", other),
    }
}

#[test]
fn test_unit_constructs_introduce_no_dead_bindings() {
    // async { let _ = (); await p }
    let p = var_exp("p", fut_nat());
    let body = block_exp(
        vec![let_dec(wild_pat(Type::unit()), unit_exp())],
        await_exp(p),
    );
    let out = lower(prog_of(async_exp(body)), &checked_config()).unwrap();
    let dump = prog_to_sexp(&out);
    // The unit binding was filtered by the construction algebra before
    // the block was ever CPS-translated.
    assert!(!dump.contains("DeclareE"));
    assert!(matches!(&out.exp.it, ExpKind::Prim(Prim::CpsAsync(_), _)));
}
