//! Property-based tests (proptest) over the universal IR invariants.

use proptest::prelude::*;

use tensorloom::ir::hash::{hash_stmt, struct_eq_stmt};
use tensorloom::ir::{deep_copy, BinaryOp, Expr, ReduceOp, Stmt};
use tensorloom::pass::{make_reduction_stmt, simplify_stmt};

/// Small integer expressions over two loop iterators.
fn arb_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (-64i64..64).prop_map(Expr::int),
        Just(Expr::var("i")),
        Just(Expr::var("j")),
        Just(Expr::load("m", vec![Expr::var("i")])),
    ];
    leaf.prop_recursive(3, 24, 2, |inner| {
        (
            prop_oneof![
                Just(BinaryOp::Add),
                Just(BinaryOp::Sub),
                Just(BinaryOp::Mul),
                Just(BinaryOp::Min),
                Just(BinaryOp::Max),
            ],
            inner.clone(),
            inner,
        )
            .prop_map(|(op, lhs, rhs)| Expr::binary(op, lhs, rhs))
    })
}

/// Statement trees built from stores, reductions, loops and guards.
fn arb_stmt() -> impl Strategy<Value = Stmt> {
    let leaf = prop_oneof![
        (arb_expr(), arb_expr()).prop_map(|(idx, e)| Stmt::store("a", vec![idx], e)),
        (arb_expr(), arb_expr())
            .prop_map(|(idx, e)| Stmt::reduce_to("a", vec![idx], ReduceOp::Add, e)),
    ];
    leaf.prop_recursive(3, 12, 2, |inner| {
        prop_oneof![
            (1i64..16, inner.clone())
                .prop_map(|(n, body)| Stmt::for_range("k", Expr::int(0), Expr::int(n), body)),
            (arb_expr(), inner.clone()).prop_map(|(c, body)| Stmt::if_then(
                Expr::lt(c, Expr::int(8)),
                body
            )),
            proptest::collection::vec(inner, 1..3).prop_map(Stmt::seq),
        ]
    })
}

proptest! {
    /// deepCopy(t) hashes like t and compares structurally equal.
    #[test]
    fn prop_deep_copy_law(stmt in arb_stmt()) {
        let copy = deep_copy(&stmt);
        prop_assert_eq!(hash_stmt(&copy), hash_stmt(&stmt));
        prop_assert!(struct_eq_stmt(&copy, &stmt));
    }

    /// S(S(t)) is structurally identical to S(t).
    #[test]
    fn prop_simplify_idempotent(stmt in arb_stmt()) {
        let once = simplify_stmt(stmt).expect("first simplify");
        let twice = simplify_stmt(once.clone()).expect("second simplify");
        prop_assert_eq!(
            hash_stmt(&once), hash_stmt(&twice),
            "not a fixed point:\n{}\nvs\n{}", once.pretty_print(0), twice.pretty_print(0)
        );
    }

    /// undo(make_reduction(t)) recovers every store it rewrote.
    #[test]
    fn prop_make_reduction_round_trip(idx in arb_expr(), e in arb_expr()) {
        // `a[idx] = a[idx] + e` must round-trip exactly (modulo IDs)
        prop_assume!(!uses_a(&e));
        let store = Stmt::store(
            "a",
            vec![idx.clone()],
            Expr::add(Expr::load("a", vec![idx]), e),
        );
        let reduced = make_reduction_stmt(store.clone()).expect("make_reduction");
        let undone = tensorloom::pass::undo_make_reduction(wrap(reduced)).expect("undo");
        let original = wrap(store);
        prop_assert!(struct_eq_stmt(&undone.body, &original.body));
    }
}

fn uses_a(e: &Expr) -> bool {
    let mut hit = false;
    tensorloom::ir::visit::walk_expr_pre(e, &mut |e| {
        if matches!(e, Expr::Load { var, .. } if var == "a") {
            hit = true;
        }
    });
    hit
}

fn wrap(stmt: Stmt) -> tensorloom::Func {
    tensorloom::Func::new("f", vec![], std::collections::HashMap::new(), stmt)
}
