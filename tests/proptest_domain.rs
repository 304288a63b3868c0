//! Property-Based Tests - Domain Layer Invariants
//!
//! Uses `proptest` to verify that the validation gate and the result
//! envelope keep their invariants across random inputs.

use proptest::prelude::*;

use order_intake::domain::envelope::{err, ok};
use order_intake::domain::{EnvelopeExt, Fault, FaultKind, OrderRequest, ResultEnvelope, Side, ValidationGate};

fn fault_kind() -> impl Strategy<Value = FaultKind> {
    prop::sample::select(FaultKind::ALL.to_vec())
}

// ── Validation Gate Properties ──────────────────────────────

proptest! {
    /// Non-positive quantities are always rejected as validation failures.
    #[test]
    fn non_positive_quantity_always_rejected(
        symbol in "[A-Z]{1,6}",
        quantity in i64::MIN..=0,
    ) {
        let result = ValidationGate::new().validate(&OrderRequest::buy(symbol, quantity));
        prop_assert_eq!(result.fault_kind(), Some(FaultKind::ValidationFailure));
    }

    /// Well-formed requests always pass and keep symbol, side and quantity.
    #[test]
    fn well_formed_request_preserved(
        symbol in "[A-Z]{1,6}",
        buy in any::<bool>(),
        quantity in 1i64..=1_000_000,
    ) {
        let req = if buy {
            OrderRequest::buy(symbol.clone(), quantity)
        } else {
            OrderRequest::sell(symbol.clone(), quantity)
        };
        let order = ValidationGate::new().validate(&req).unwrap();
        prop_assert_eq!(order.symbol(), symbol.as_str());
        prop_assert_eq!(order.side(), if buy { Side::Buy } else { Side::Sell });
        prop_assert_eq!(order.quantity(), quantity as u64);
    }

    /// Whitespace-only symbols are empty, whatever the other fields.
    #[test]
    fn blank_symbol_rejected(
        symbol in "[ \t]{0,4}",
        quantity in any::<i64>(),
    ) {
        let result = ValidationGate::new().validate(&OrderRequest::sell(symbol, quantity));
        prop_assert_eq!(result, Err(Fault::validation("symbol empty")));
    }

    /// Side parsing ignores ASCII case.
    #[test]
    fn side_parse_ignores_case(side in "[bB][uU][yY]|[sS][eE][lL][lL]") {
        let order = ValidationGate::new()
            .validate(&OrderRequest::new("AAPL", side.clone(), 1))
            .unwrap();
        let expected = if side.eq_ignore_ascii_case("BUY") { Side::Buy } else { Side::Sell };
        prop_assert_eq!(order.side(), expected);
    }

    /// Sides other than BUY/SELL (any case) are rejected.
    #[test]
    fn unknown_side_rejected(side in "[a-z]{1,8}") {
        prop_assume!(side != "buy" && side != "sell");
        let result = ValidationGate::new().validate(&OrderRequest::new("AAPL", side, 1));
        prop_assert_eq!(result.fault_kind(), Some(FaultKind::ValidationFailure));
    }

    /// Validation is deterministic.
    #[test]
    fn validation_is_pure(
        symbol in "[A-Z ]{0,6}",
        side in prop_oneof!["BUY", "SELL", "sell", "HOLD"],
        quantity in -10i64..10,
    ) {
        let gate = ValidationGate::new();
        let req = OrderRequest::new(symbol, side, quantity);
        prop_assert_eq!(gate.validate(&req), gate.validate(&req));
    }
}

// ── Envelope Properties ─────────────────────────────────────

proptest! {
    /// Left identity: ok(x).and_then(f) == f(x).
    #[test]
    fn and_then_left_identity(x in any::<i32>()) {
        let f = |v: i32| -> ResultEnvelope<i64> { ok(i64::from(v) * 2) };
        prop_assert_eq!(ok(x).and_then(f), f(x));
    }

    /// Right identity: e.and_then(ok) == e.
    #[test]
    fn and_then_right_identity(x in any::<i32>(), failed in any::<bool>(), kind in fault_kind()) {
        let env: ResultEnvelope<i32> = if failed { err(kind, "boom", None) } else { ok(x) };
        prop_assert_eq!(env.clone().and_then(ok), env);
    }

    /// Err short-circuits: the continuation never runs and the fault is kept.
    #[test]
    fn and_then_preserves_fault(kind in fault_kind(), message in "[a-z ]{1,20}") {
        let env: ResultEnvelope<i32> = err(kind, message.clone(), None);
        let mut called = false;
        let out = env.and_then(|v| {
            called = true;
            ok(v + 1)
        });
        prop_assert!(!called);
        prop_assert_eq!(out, Err(Fault::new(kind, message)));
    }

    /// match_with runs exactly the branch matching the envelope.
    #[test]
    fn match_with_selects_branch(x in any::<u16>(), failed in any::<bool>()) {
        let env: ResultEnvelope<u16> = if failed { Err(Fault::timeout()) } else { ok(x) };
        let label = env.match_with(|_| "ok", |_| "err");
        prop_assert_eq!(label, if failed { "err" } else { "ok" });
    }
}
