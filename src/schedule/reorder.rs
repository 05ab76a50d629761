//! Loop-nest transposition.
//!
//! Reordering is legal when no dependence inverts: for every pair of loops
//! whose relative order flips, the dependence distance on the outer loop and
//! on the inner loop must not have strictly opposite signs. Distances are
//! solved from the linear forms of the access indices; anything the solver
//! cannot pin down is treated as a conflict.

use std::collections::HashMap;

use crate::analyze::find::find_loop;
use crate::error::{Error, Result};
use crate::ir::{Expr, Func, Stmt, StmtId, StmtKind};

use super::util::{collect_accesses, rewrite_at, NestAccess};

/// Outcome of solving `c_a·Δa + c_b·Δb = -k` per dimension for one access
/// pair.
enum Solve {
    NoAlias,
    Conflict,
    Deltas(Option<i64>, Option<i64>),
}

fn solve_pair(x: &NestAccess, y: &NestAccess, iter_a: &str, iter_b: &str) -> Solve {
    let mut delta_a: Option<i64> = None;
    let mut delta_b: Option<i64> = None;
    if x.indices.len() != y.indices.len() {
        return Solve::Conflict;
    }
    for (ix, iy) in x.indices.iter().zip(&y.indices) {
        if !ix.is_affine_in_vars() || !iy.is_affine_in_vars() {
            return Solve::Conflict;
        }
        // Address equality between instance X (at iter + Δ) and instance Y
        // (at iter): with equal per-variable coefficients c, the equation is
        //   c_a·Δa + c_b·Δb + (k_x - k_y) = 0
        // Unequal coefficients couple the distance to absolute positions.
        let mut ca = 0;
        let mut cb = 0;
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for (_, atom) in ix.terms.values().chain(iy.terms.values()) {
            match atom.as_var() {
                Some(v) => {
                    seen.insert(v);
                }
                None => return Solve::Conflict,
            }
        }
        for v in seen {
            let cx = ix.coeff_of_var(v);
            let cy = iy.coeff_of_var(v);
            if cx != cy {
                return Solve::Conflict;
            }
            if v == iter_a {
                ca = cx;
            } else if v == iter_b {
                cb = cx;
            }
        }
        let k = ix.constant - iy.constant;
        match (ca, cb) {
            (0, 0) => {
                if k != 0 {
                    return Solve::NoAlias;
                }
            }
            (ca, 0) => {
                if k % ca != 0 {
                    return Solve::NoAlias;
                }
                let v = -k / ca;
                match delta_a {
                    Some(prev) if prev != v => return Solve::NoAlias,
                    _ => delta_a = Some(v),
                }
            }
            (0, cb) => {
                if k % cb != 0 {
                    return Solve::NoAlias;
                }
                let v = -k / cb;
                match delta_b {
                    Some(prev) if prev != v => return Solve::NoAlias,
                    _ => delta_b = Some(v),
                }
            }
            // Both distances in one equation: the solution space mixes
            // signs freely
            _ => return Solve::Conflict,
        }
    }
    Solve::Deltas(delta_a, delta_b)
}

/// Whether swapping the relative order of loops `a` (currently outer) and
/// `b` could invert a dependence.
fn invert_conflicts(inner_subtree: &Stmt, iter_a: &str, iter_b: &str) -> bool {
    let accesses = collect_accesses(inner_subtree);
    for (i, x) in accesses.iter().enumerate() {
        for y in &accesses[..=i] {
            if x.var != y.var || !(x.kind.writes() || y.kind.writes()) {
                continue;
            }
            if x.commutes_with(y) {
                continue;
            }
            match solve_pair(x, y, iter_a, iter_b) {
                Solve::NoAlias => {}
                Solve::Conflict => return true,
                Solve::Deltas(da, db) => {
                    let bad = match (da, db) {
                        (Some(a), Some(b)) => a != 0 && b != 0 && (a < 0) != (b < 0),
                        (Some(a), None) => a != 0,
                        (None, Some(b)) => b != 0,
                        (None, None) => true,
                    };
                    if bad {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Transpose a perfectly nested chain of loops into `order`.
pub(super) fn reorder(func: Func, order: &[StmtId]) -> Result<(Func, ())> {
    if order.is_empty() {
        return Err(Error::schedule("empty loop order"));
    }
    for id in order {
        find_loop(&func.body, id)?;
    }

    // The outermost listed loop is the one enclosing all others
    let outermost = order
        .iter()
        .find(|cand| {
            order.iter().all(|other| {
                other == *cand || crate::analyze::find::is_ancestor(&func.body, cand, other)
            })
        })
        .cloned()
        .ok_or_else(|| Error::schedule("loops do not form a single nest"))?;

    let func = func.map_body(|body| {
        rewrite_at(body, &outermost, |top| {
            // Collect the chain top-down; each body must be exactly the
            // next loop.
            let mut chain: Vec<(StmtId, String, Expr, Expr, Expr, Expr, crate::ir::ForProperty)> =
                Vec::new();
            let mut cursor = top;
            let innermost_body: Stmt = loop {
                let StmtKind::For {
                    iter,
                    begin,
                    end,
                    step,
                    len,
                    property,
                    body,
                } = cursor.kind
                else {
                    return Err(Error::internal("nest cursor is not a For"));
                };
                chain.push((cursor.id, iter, begin, end, step, len, property));
                if chain.len() == order.len() {
                    break *body;
                }
                let direct = match body.kind {
                    StmtKind::StmtSeq { mut stmts } if stmts.len() == 1 => stmts.remove(0),
                    other => Stmt::new(body.id, other),
                };
                if !direct.is_for() || !order.contains(&direct.id) {
                    return Err(Error::schedule(
                        "loops to reorder are not perfectly nested",
                    ));
                }
                cursor = direct;
            };

            let position: HashMap<&str, usize> = order
                .iter()
                .enumerate()
                .map(|(i, id)| (id.as_str(), i))
                .collect();
            if chain
                .iter()
                .any(|(id, ..)| !position.contains_key(id.as_str()))
            {
                return Err(Error::schedule("order is not a permutation of the nest"));
            }

            // Dependence legality for every inverted pair
            for i in 0..chain.len() {
                for j in i + 1..chain.len() {
                    let (id_i, iter_i, ..) = &chain[i];
                    let (id_j, iter_j, ..) = &chain[j];
                    let inverted = position[id_i.as_str()] > position[id_j.as_str()];
                    if inverted && invert_conflicts(&innermost_body, iter_i, iter_j) {
                        return Err(Error::schedule(format!(
                            "loop-carried dependency prevents reordering {id_i} and {id_j}"
                        )));
                    }
                }
            }

            // Rebuild in the requested order, innermost last
            let mut by_id: HashMap<String, _> = chain
                .into_iter()
                .map(|entry| (entry.0.as_str().to_string(), entry))
                .collect();
            let mut rebuilt = innermost_body;
            for id in order.iter().rev() {
                let Some((id, iter, begin, end, step, len, property)) =
                    by_id.remove(id.as_str())
                else {
                    return Err(Error::internal("permutation check let a loop escape"));
                };
                rebuilt = Stmt::new(
                    id,
                    StmtKind::For {
                        iter,
                        begin,
                        end,
                        step,
                        len,
                        property,
                        body: Box::new(rebuilt),
                    },
                );
            }
            Ok(rebuilt)
        })
    })?;
    Ok((func, ()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessType, Buffer, DataType, MemType, Tensor};

    fn nest(body: Stmt) -> Func {
        let inner = Stmt::for_range("j", Expr::int(0), Expr::int(8), body).with_id("Lj".into());
        let outer = Stmt::for_range("i", Expr::int(0), Expr::int(8), inner).with_id("Li".into());
        Func::with_params(
            "f",
            vec![(
                "a".to_string(),
                Buffer::new(
                    Tensor::new(vec![Expr::int(8), Expr::int(8)], DataType::Float32),
                    AccessType::InOut,
                    MemType::Cpu,
                ),
            )],
            outer,
        )
    }

    #[test]
    fn test_independent_nest_reorders() {
        let body = Stmt::store("a", vec![Expr::var("i"), Expr::var("j")], Expr::int(1));
        let (func, ()) = reorder(nest(body), &["Lj".into(), "Li".into()]).expect("reorder");
        let text = func.body.pretty_print(0);
        let j_pos = text.find("for j").expect("j loop");
        let i_pos = text.find("for i").expect("i loop");
        assert!(j_pos < i_pos, "j now outer: {text}");
    }

    #[test]
    fn test_opposite_sign_dependence_rejected() {
        // a[i, j] = a[i-1, j+1] + 1 : distance (+1, -1)
        let body = Stmt::store(
            "a",
            vec![Expr::var("i"), Expr::var("j")],
            Expr::add(
                Expr::load(
                    "a",
                    vec![
                        Expr::sub(Expr::var("i"), Expr::int(1)),
                        Expr::add(Expr::var("j"), Expr::int(1)),
                    ],
                ),
                Expr::int(1),
            ),
        );
        let err = reorder(nest(body), &["Lj".into(), "Li".into()]).expect_err("must reject");
        match err {
            Error::InvalidSchedule { cause, .. } => {
                assert!(cause.contains("dependency"), "cause: {cause}")
            }
            other => panic!("expected InvalidSchedule, got {other:?}"),
        }
    }

    #[test]
    fn test_same_sign_dependence_allowed() {
        // a[i, j] = a[i-1, j] + 1 : distance (+1, 0), legal either order
        let body = Stmt::store(
            "a",
            vec![Expr::var("i"), Expr::var("j")],
            Expr::add(
                Expr::load(
                    "a",
                    vec![Expr::sub(Expr::var("i"), Expr::int(1)), Expr::var("j")],
                ),
                Expr::int(1),
            ),
        );
        assert!(reorder(nest(body), &["Lj".into(), "Li".into()]).is_ok());
    }

    #[test]
    fn test_non_permutation_rejected() {
        let body = Stmt::store("a", vec![Expr::var("i"), Expr::var("j")], Expr::int(1));
        assert!(reorder(nest(body), &["Lj".into(), "Lx".into()]).is_err());
    }
}
