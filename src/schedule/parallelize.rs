//! Execution-model annotations: `parallelize`, `unroll`, `vectorize`.

use crate::analyze::access::expr_uses_name;
use crate::analyze::deps::loop_carried_deps;
use crate::analyze::find::{find_all, find_loop, is_ancestor};
use crate::analyze::linear::analyze_linear;
use crate::error::{Error, Result};
use crate::ir::visit::{subst_var, walk_expr_pre, walk_stmt_pre};
use crate::ir::{Expr, Func, ParallelScope, Stmt, StmtId, StmtKind};

use super::util::{refresh_ids, rewrite_at};

/// Candidate vector widths, tried widest first.
const VECTOR_WIDTHS: [i64; 2] = [4, 2];

/// Whether any write inside `inner_body` mentions `outer_iter`. Two loops
/// bound to the same hardware axis collapse to one index; a write indexed by
/// the outer iterator would then race across what used to be serial
/// iterations.
fn writes_mention(inner_body: &Stmt, outer_iter: &str) -> bool {
    let mut hit = false;
    walk_stmt_pre(inner_body, &mut |s| {
        if let StmtKind::Store { indices, expr, .. } | StmtKind::ReduceTo { indices, expr, .. } =
            &s.kind
        {
            for e in indices.iter().chain(std::iter::once(expr)) {
                walk_expr_pre(e, &mut |e| {
                    if matches!(e, Expr::Var(n) if n == outer_iter) {
                        hit = true;
                    }
                });
            }
        }
    });
    hit
}

/// Bind `loop_id` to a parallel scope after race and nesting checks.
pub(super) fn parallelize(
    func: Func,
    loop_id: &StmtId,
    scope: ParallelScope,
) -> Result<(Func, ())> {
    let target = find_loop(&func.body, loop_id)?.clone();
    let StmtKind::For { iter, body, .. } = &target.kind else {
        return Err(Error::internal("find_loop returned a non-For"));
    };

    if scope.is_parallel() {
        // Same-scope nesting: legal for collaborative fetches, illegal when
        // the inner loop writes through the outer iterator
        let same_scope = find_all(&func.body, &|s| {
            matches!(&s.kind, StmtKind::For { property, .. } if property.parallel == scope)
        });
        for other in same_scope {
            let StmtKind::For {
                iter: other_iter,
                body: other_body,
                ..
            } = &other.kind
            else {
                continue;
            };
            if is_ancestor(&func.body, &other.id, loop_id) {
                if writes_mention(body, other_iter) {
                    return Err(Error::schedule(format!(
                        "nested {scope:?} loops: the inner writes through \"{other_iter}\""
                    )));
                }
            } else if is_ancestor(&func.body, loop_id, &other.id)
                && writes_mention(other_body, iter)
            {
                return Err(Error::schedule(format!(
                    "nested {scope:?} loops: the inner writes through \"{iter}\""
                )));
            }
        }

        // Cross-iteration races; reductions with a common operator are
        // legalized later by make_parallel_reduction
        let races: Vec<_> = loop_carried_deps(&func.body, loop_id)
            .into_iter()
            .filter(|d| {
                !(d.later.reduce_op.is_some() && d.later.reduce_op == d.earlier.reduce_op)
            })
            .collect();
        if let Some(d) = races.first() {
            return Err(Error::schedule(format!(
                "cross-iteration race: {}",
                d.cause()
            )));
        }
    }

    let func = func.map_body(|body| {
        rewrite_at(body, loop_id, |stmt| {
            let StmtKind::For {
                iter,
                begin,
                end,
                step,
                len,
                mut property,
                body,
            } = stmt.kind
            else {
                return Err(Error::internal("find_loop returned a non-For"));
            };
            property.parallel = scope;
            Ok(Stmt::new(
                stmt.id,
                StmtKind::For {
                    iter,
                    begin,
                    end,
                    step,
                    len,
                    property,
                    body,
                },
            ))
        })
    })?;
    Ok((func, ()))
}

/// Mark a loop for unrolling, or expand it immediately.
pub(super) fn unroll(func: Func, loop_id: &StmtId, immediate: bool) -> Result<(Func, ())> {
    find_loop(&func.body, loop_id)?;
    let func = func.map_body(|body| {
        rewrite_at(body, loop_id, |stmt| {
            let StmtKind::For {
                iter,
                begin,
                end,
                step,
                len,
                mut property,
                body,
            } = stmt.kind
            else {
                return Err(Error::internal("find_loop returned a non-For"));
            };
            if !immediate {
                property.unroll = true;
                return Ok(Stmt::new(
                    stmt.id,
                    StmtKind::For {
                        iter,
                        begin,
                        end,
                        step,
                        len,
                        property,
                        body,
                    },
                ));
            }
            let Some(n) = len.as_int() else {
                return Err(Error::schedule(
                    "immediate unrolling requires a constant trip count",
                ));
            };
            let mut copies = Vec::with_capacity(n.max(0) as usize);
            for k in 0..n {
                let value = analyze_linear(&Expr::add(
                    begin.clone(),
                    Expr::mul(Expr::int(k), step.clone()),
                ))
                .to_expr();
                let copy = subst_var((*body).clone(), &iter, &value)?;
                // Copies duplicate every inner statement; IDs must stay
                // unique within the tree
                copies.push(refresh_ids(copy)?);
            }
            Ok(Stmt::new(stmt.id, StmtKind::StmtSeq { stmts: copies }))
        })
    })?;
    Ok((func, ()))
}

/// Mark a loop for vector lowering; the trip count must be provably
/// divisible by one of the supported widths.
pub(super) fn vectorize(func: Func, loop_id: &StmtId) -> Result<(Func, ())> {
    let target = find_loop(&func.body, loop_id)?;
    let StmtKind::For { len, .. } = &target.kind else {
        return Err(Error::internal("find_loop returned a non-For"));
    };
    let lin = analyze_linear(len);
    if !VECTOR_WIDTHS.iter().any(|w| lin.divisible_by(*w)) {
        return Err(Error::schedule(format!(
            "length {len} is not provably divisible by any vector width in {VECTOR_WIDTHS:?}"
        )));
    }
    let func = func.map_body(|body| {
        rewrite_at(body, loop_id, |stmt| {
            let StmtKind::For {
                iter,
                begin,
                end,
                step,
                len,
                mut property,
                body,
            } = stmt.kind
            else {
                return Err(Error::internal("find_loop returned a non-For"));
            };
            property.vectorize = true;
            Ok(Stmt::new(
                stmt.id,
                StmtKind::For {
                    iter,
                    begin,
                    end,
                    step,
                    len,
                    property,
                    body,
                },
            ))
        })
    })?;
    Ok((func, ()))
}
