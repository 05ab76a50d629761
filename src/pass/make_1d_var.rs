//! Buffer flattening.
//!
//! Rewrites every multi-dimensional function-local variable into a
//! one-dimensional buffer with row-major linearized indices, the layout the
//! GPU code emitter expects. I/O buffers keep their declared shape; their
//! layout belongs to the caller.

use std::collections::HashSet;

use tracing::debug;

use crate::analyze::linear::analyze_linear;
use crate::error::Result;
use crate::ir::visit::{rebuild_expr, rebuild_stmt, walk_stmt_pre, Mutator};
use crate::ir::{AccessType, Expr, Func, Stmt, StmtKind};

struct Make1dVar {
    /// Variables being flattened, with their original shapes
    shapes: std::collections::HashMap<String, Vec<Expr>>,
}

/// Row-major linearization: `((i0 * d1 + i1) * d2 + i2) ...`.
fn linearize(indices: &[Expr], shape: &[Expr]) -> Expr {
    let mut out = indices.first().cloned().unwrap_or(Expr::int(0));
    for (idx, dim) in indices.iter().zip(shape).skip(1) {
        out = Expr::add(Expr::mul(out, dim.clone()), idx.clone());
    }
    analyze_linear(&out).to_expr()
}

impl Make1dVar {
    fn flatten(&self, var: &str, indices: Vec<Expr>) -> Vec<Expr> {
        match self.shapes.get(var) {
            Some(shape) if shape.len() > 1 => vec![linearize(&indices, shape)],
            _ => indices,
        }
    }
}

impl Mutator for Make1dVar {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        let kind = match kind {
            StmtKind::VarDef {
                name,
                mut buffer,
                pinned,
                body,
            } => {
                if self.shapes.contains_key(&name) && buffer.tensor.ndim() > 1 {
                    let total = buffer
                        .tensor
                        .shape
                        .iter()
                        .cloned()
                        .reduce(Expr::mul)
                        .unwrap_or(Expr::int(1));
                    buffer.tensor.shape = vec![analyze_linear(&total).to_expr()];
                }
                StmtKind::VarDef {
                    name,
                    buffer,
                    pinned,
                    body,
                }
            }
            StmtKind::Store { var, indices, expr } => StmtKind::Store {
                indices: self.flatten(&var, indices),
                var,
                expr,
            },
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                atomic,
            } => StmtKind::ReduceTo {
                indices: self.flatten(&var, indices),
                var,
                op,
                expr,
                atomic,
            },
            other => other,
        };
        Ok(Stmt::new(id, kind))
    }

    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        let expr = rebuild_expr(self, expr)?;
        Ok(match expr {
            Expr::Load { var, indices } => Expr::Load {
                indices: self.flatten(&var, indices),
                var,
            },
            other => other,
        })
    }
}

/// Flatten local buffers to one dimension.
pub fn make_1d_var(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: make_1d_var");
    let io_params: HashSet<String> = func.params.iter().cloned().collect();
    func.map_body(|body| {
        let mut shapes = std::collections::HashMap::new();
        walk_stmt_pre(&body, &mut |s| {
            if let StmtKind::VarDef { name, buffer, .. } = &s.kind {
                if !io_params.contains(name) && buffer.atype == AccessType::Cache {
                    shapes.insert(name.clone(), buffer.tensor.shape.clone());
                }
            }
        });
        Make1dVar { shapes }.mutate_stmt(body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Buffer, DataType, MemType, Tensor};

    #[test]
    fn test_2d_access_linearized() {
        let body = Stmt::var_def(
            "t",
            Buffer::new(
                Tensor::new(vec![Expr::int(4), Expr::int(8)], DataType::Float32),
                AccessType::Cache,
                MemType::GpuLocal,
            ),
            Stmt::store("t", vec![Expr::var("i"), Expr::var("j")], Expr::int(0)),
        );
        let func = Func::new("f", vec![], std::collections::HashMap::new(), body);
        let out = make_1d_var(func).expect("pass");
        let text = out.body.pretty_print(0);
        // t[i, j] with shape [4, 8] becomes t[8 i + j] over t[32]
        assert!(text.contains("[32]"), "flattened allocation: {text}");
        assert!(
            text.contains("8 * i") || text.contains("(8 * i)"),
            "row-major index: {text}"
        );
    }

    #[test]
    fn test_1d_var_unchanged() {
        let body = Stmt::var_def(
            "t",
            Buffer::new(
                Tensor::new(vec![Expr::int(4)], DataType::Float32),
                AccessType::Cache,
                MemType::Cpu,
            ),
            Stmt::store("t", vec![Expr::var("i")], Expr::int(0)),
        );
        let func = Func::new("f", vec![], std::collections::HashMap::new(), body);
        let out = make_1d_var(func).expect("pass");
        let text = out.body.pretty_print(0);
        assert!(text.contains("t[i]"), "unchanged: {text}");
    }
}
