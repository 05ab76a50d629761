//! Vector lowering.
//!
//! A loop marked `vectorize` is rewritten into a loop over packed vectors:
//! candidate widths 4 then 2, taking the first that divides the trip count
//! with every access contiguous in the iterator (innermost index is exactly
//! the iterator, other indices invariant). Loads and stores become
//! reinterpret-cast intrinsics of the form `*((float4*)&(a[...]))`. A loop
//! that fails the checks is left serial. Runs after `make_1d_var`, which
//! produces the flat indices this pass requires.

use tracing::{debug, warn};

use crate::analyze::access::expr_uses_name;
use crate::analyze::linear::analyze_linear;
use crate::error::Result;
use crate::ir::visit::{rebuild_stmt, walk_expr_pre, Mutator};
use crate::ir::{DataType, Expr, Func, Stmt, StmtKind};

const WIDTHS: [i64; 2] = [4, 2];

fn vector_type(width: i64) -> DataType {
    DataType::Custom(format!("float{width}"))
}

/// Check one access: the last index must be exactly the iterator, the rest
/// must not mention it.
fn contiguous(indices: &[Expr], iter: &str) -> bool {
    match indices.split_last() {
        Some((last, init)) => {
            matches!(last, Expr::Var(n) if n == iter)
                && init.iter().all(|idx| !expr_uses_name(idx, iter))
        }
        None => false,
    }
}

/// Whether the loop body is vectorizable: stores/loads contiguous in `iter`,
/// and no other use of the iterator.
fn vectorizable(body: &Stmt, iter: &str) -> bool {
    let mut ok = true;
    crate::ir::visit::walk_stmt_pre(body, &mut |s| match &s.kind {
        StmtKind::Store { indices, expr, .. } => {
            if !contiguous(indices, iter) {
                ok = false;
            }
            walk_expr_pre(expr, &mut |e| match e {
                Expr::Load { indices, .. } => {
                    if indices.iter().any(|i| expr_uses_name(i, iter)) && !contiguous(indices, iter)
                    {
                        ok = false;
                    }
                }
                Expr::Var(n) if n == iter => ok = false,
                _ => {}
            });
        }
        StmtKind::StmtSeq { .. } | StmtKind::Eval { .. } => {}
        _ => ok = false,
    });
    ok
}

/// Rewrite one statement for vector width `w`, with the iterator replaced by
/// `w * iter` at access heads.
struct Vectorize<'a> {
    iter: &'a str,
    width: i64,
}

impl Vectorize<'_> {
    fn head_indices(&self, indices: &[Expr]) -> Vec<Expr> {
        indices
            .iter()
            .map(|idx| match idx {
                Expr::Var(n) if n == self.iter => analyze_linear(&Expr::mul(
                    Expr::int(self.width),
                    Expr::var(self.iter),
                ))
                .to_expr(),
                other => other.clone(),
            })
            .collect()
    }

    fn vector_expr(&self, expr: &Expr) -> Expr {
        match expr {
            Expr::Load { var, indices } if indices.iter().any(|i| expr_uses_name(i, self.iter)) => {
                Expr::intrinsic(
                    format!("*((float{}*)&(%))", self.width),
                    vec![Expr::load(var.clone(), self.head_indices(indices))],
                    vector_type(self.width),
                )
            }
            Expr::Binary { op, lhs, rhs } => Expr::binary(
                *op,
                self.vector_expr(lhs),
                self.vector_expr(rhs),
            ),
            Expr::Unary { op, operand } => Expr::unary(*op, self.vector_expr(operand)),
            other => other.clone(),
        }
    }

    fn rewrite(&self, stmt: Stmt) -> Stmt {
        let Stmt { id, kind } = stmt;
        let kind = match kind {
            StmtKind::Store { var, indices, expr } => StmtKind::Eval {
                expr: Expr::intrinsic(
                    format!("*((float{}*)&(%)) = %", self.width),
                    vec![
                        Expr::load(var, self.head_indices(&indices)),
                        self.vector_expr(&expr),
                    ],
                    DataType::Custom("void".to_string()),
                ),
            },
            StmtKind::StmtSeq { stmts } => StmtKind::StmtSeq {
                stmts: stmts.into_iter().map(|s| self.rewrite(s)).collect(),
            },
            other => other,
        };
        Stmt::new(id, kind)
    }
}

struct LowerVector;

impl Mutator for LowerVector {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        if let StmtKind::For {
            iter,
            begin,
            end,
            step,
            len,
            mut property,
            body,
        } = kind
        {
            if property.vectorize {
                let width = len.as_int().and_then(|n| {
                    WIDTHS
                        .iter()
                        .copied()
                        .find(|w| n % w == 0 && vectorizable(&body, &iter))
                });
                match (width, begin.as_int()) {
                    (Some(w), Some(0)) => {
                        property.vectorize = false;
                        let n = match len.as_int() {
                            Some(n) => n,
                            None => {
                                return Err(crate::error::Error::internal(
                                    "constant length vanished during vector lowering",
                                ))
                            }
                        };
                        let body = Vectorize { iter: &iter, width: w }.rewrite(*body);
                        return Ok(Stmt::new(
                            id,
                            StmtKind::For {
                                iter,
                                begin: Expr::int(0),
                                end: Expr::int(n / w),
                                step: Expr::int(1),
                                len: Expr::int(n / w),
                                property,
                                body: Box::new(body),
                            },
                        ));
                    }
                    _ => {
                        warn!(loop_id = %id, "vectorized loop not lowerable, keeping serial");
                        property.vectorize = false;
                    }
                }
            }
            return Ok(Stmt::new(
                id,
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
        Ok(Stmt::new(id, kind))
    }
}

/// Lower `vectorize`-marked loops into packed intrinsic accesses.
pub fn lower_vector(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: gpu::lower_vector");
    func.map_body(|body| LowerVector.mutate_stmt(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_loop(n: i64, body: Stmt) -> Stmt {
        let mut l = Stmt::for_range("i", Expr::int(0), Expr::int(n), body);
        if let StmtKind::For { property, len, .. } = &mut l.kind {
            property.vectorize = true;
            *len = Expr::int(n);
        }
        l
    }

    #[test]
    fn test_contiguous_loop_lowered_to_width_4() {
        let body = Stmt::store(
            "b",
            vec![Expr::var("i")],
            Expr::load("a", vec![Expr::var("i")]),
        );
        let out = LowerVector.mutate_stmt(vec_loop(64, body)).expect("pass");
        match &out.kind {
            StmtKind::For { end, body, .. } => {
                assert_eq!(*end, Expr::int(16));
                let text = body.pretty_print(0);
                assert!(text.contains("float4"), "vector cast: {text}");
                assert!(text.contains("4 * i"), "scaled index: {text}");
            }
            other => panic!("expected For, got {other:?}"),
        }
    }

    #[test]
    fn test_width_2_fallback() {
        let body = Stmt::store(
            "b",
            vec![Expr::var("i")],
            Expr::load("a", vec![Expr::var("i")]),
        );
        let out = LowerVector.mutate_stmt(vec_loop(6, body)).expect("pass");
        match &out.kind {
            StmtKind::For { end, .. } => assert_eq!(*end, Expr::int(3)),
            other => panic!("expected For, got {other:?}"),
        }
    }

    #[test]
    fn test_strided_access_stays_serial() {
        // b[2*i] is not contiguous
        let body = Stmt::store(
            "b",
            vec![Expr::mul(Expr::int(2), Expr::var("i"))],
            Expr::int(0),
        );
        let out = LowerVector.mutate_stmt(vec_loop(64, body)).expect("pass");
        match &out.kind {
            StmtKind::For { end, property, .. } => {
                assert_eq!(*end, Expr::int(64));
                assert!(!property.vectorize);
            }
            other => panic!("expected For, got {other:?}"),
        }
    }
}
