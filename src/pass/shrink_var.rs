//! Shape shrinking.
//!
//! Narrows each dimension of a function-local variable to the range its
//! accesses actually reach, derived from bound analysis under the enclosing
//! loop ranges and conditions. Accesses are re-based at the new lower bound.
//! I/O variables and pinned variables are never touched; a dimension with an
//! access the analysis cannot bound keeps its declared extent.

use std::collections::HashMap;

use tracing::debug;

use crate::analyze::bounds::{const_lower_bound, const_upper_bound, BoundCtx};
use crate::error::Result;
use crate::ir::visit::{rebuild_stmt, walk_stmt, Mutator, Visitor};
use crate::ir::{AccessType, Expr, Func, Stmt, StmtKind};

/// Per-dimension observed access range.
#[derive(Debug, Clone, Copy)]
enum DimRange {
    Unseen,
    Range(i64, i64),
    Unbounded,
}

impl DimRange {
    fn absorb(&mut self, lo: Option<i64>, hi: Option<i64>) {
        *self = match (*self, lo, hi) {
            (DimRange::Unbounded, ..) => DimRange::Unbounded,
            (_, None, _) | (_, _, None) => DimRange::Unbounded,
            (DimRange::Unseen, Some(l), Some(h)) => DimRange::Range(l, h),
            (DimRange::Range(cl, ch), Some(l), Some(h)) => {
                DimRange::Range(cl.min(l), ch.max(h))
            }
        }
    }
}

#[derive(Default)]
struct CollectRanges {
    ctx: BoundCtx,
    ranges: HashMap<String, Vec<DimRange>>,
}

impl CollectRanges {
    fn record(&mut self, var: &str, indices: &[Expr]) {
        let Some(dims) = self.ranges.get_mut(var) else {
            return;
        };
        for (dim, idx) in dims.iter_mut().zip(indices) {
            dim.absorb(
                const_lower_bound(idx, &self.ctx),
                const_upper_bound(idx, &self.ctx),
            );
        }
    }
}

impl Visitor for CollectRanges {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::VarDef { name, buffer, .. } => {
                let track = buffer.atype == AccessType::Cache;
                if track {
                    self.ranges
                        .insert(name.clone(), vec![DimRange::Unseen; buffer.tensor.ndim()]);
                }
                walk_stmt(self, stmt);
            }
            StmtKind::For {
                iter, begin, end, ..
            } => {
                self.ctx.push_loop(iter, begin, end);
                walk_stmt(self, stmt);
                self.ctx.pop_loop(iter);
            }
            StmtKind::If { cond, .. }
            | StmtKind::Assert { cond, .. }
            | StmtKind::Assume { cond, .. } => {
                self.ctx.push_cond(cond);
                walk_stmt(self, stmt);
                self.ctx.pop_cond();
            }
            StmtKind::Store { var, indices, .. } | StmtKind::ReduceTo { var, indices, .. } => {
                self.record(var, indices);
                walk_stmt(self, stmt);
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Load { var, indices } = expr {
            self.record(var, indices);
        }
        crate::ir::visit::walk_expr(self, expr);
    }
}

/// Chosen shrink per variable: per-dimension `(offset, new_extent)`.
type ShrinkPlan = HashMap<String, Vec<Option<(i64, i64)>>>;

struct ApplyShrink {
    plan: ShrinkPlan,
}

impl ApplyShrink {
    fn rebase(&self, var: &str, indices: Vec<Expr>) -> Vec<Expr> {
        let Some(dims) = self.plan.get(var) else {
            return indices;
        };
        indices
            .into_iter()
            .zip(dims)
            .map(|(idx, dim)| match dim {
                Some((offset, _)) if *offset != 0 => {
                    crate::analyze::linear::analyze_linear(&Expr::sub(idx, Expr::int(*offset)))
                        .to_expr()
                }
                _ => idx,
            })
            .collect()
    }
}

impl Mutator for ApplyShrink {
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
                if let Some(dims) = self.plan.get(&name) {
                    for (shape, dim) in buffer.tensor.shape.iter_mut().zip(dims) {
                        if let Some((_, extent)) = dim {
                            *shape = Expr::int(*extent);
                        }
                    }
                }
                StmtKind::VarDef {
                    name,
                    buffer,
                    pinned,
                    body,
                }
            }
            StmtKind::Store { var, indices, expr } => {
                let indices = self.rebase(&var, indices);
                StmtKind::Store { var, indices, expr }
            }
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                atomic,
            } => {
                let indices = self.rebase(&var, indices);
                StmtKind::ReduceTo {
                    var,
                    indices,
                    op,
                    expr,
                    atomic,
                }
            }
            other => other,
        };
        Ok(Stmt::new(id, kind))
    }

    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        let expr = crate::ir::visit::rebuild_expr(self, expr)?;
        Ok(match expr {
            Expr::Load { var, indices } => {
                let indices = self.rebase(&var, indices);
                Expr::Load { var, indices }
            }
            other => other,
        })
    }
}

fn make_plan(body: &Stmt) -> ShrinkPlan {
    let mut collect = CollectRanges::default();
    collect.visit_stmt(body);

    // Declared constant extents, to refuse "shrinks" that would grow
    let mut declared: HashMap<String, Vec<Option<i64>>> = HashMap::new();
    crate::ir::visit::walk_stmt_pre(body, &mut |s| {
        if let StmtKind::VarDef { name, buffer, pinned, .. } = &s.kind {
            if !pinned {
                declared.insert(
                    name.clone(),
                    buffer.tensor.shape.iter().map(Expr::as_int).collect(),
                );
            }
        }
    });

    let mut plan: ShrinkPlan = HashMap::new();
    for (var, dims) in collect.ranges {
        let Some(decl) = declared.get(&var) else {
            continue; // pinned
        };
        let planned: Vec<Option<(i64, i64)>> = dims
            .iter()
            .zip(decl)
            .map(|(dim, declared_extent)| match dim {
                DimRange::Range(lo, hi) => {
                    let extent = hi - lo + 1;
                    match declared_extent {
                        Some(old) if extent >= *old => None,
                        _ => Some((*lo, extent)),
                    }
                }
                // A variable no access reaches is remove_dead_var's business
                DimRange::Unseen | DimRange::Unbounded => None,
            })
            .collect();
        if planned.iter().any(Option::is_some) {
            plan.insert(var, planned);
        }
    }
    plan
}

/// Narrow variable shapes to their used ranges.
pub fn shrink_var(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: shrink_var");
    func.map_body(|body| {
        let plan = make_plan(&body);
        ApplyShrink { plan }.mutate_stmt(body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Buffer, DataType, MemType, Tensor};

    fn cache_def(name: &str, shape: Vec<Expr>, body: Stmt) -> Stmt {
        Stmt::var_def(
            name,
            Buffer::new(
                Tensor::new(shape, DataType::Float32),
                AccessType::Cache,
                MemType::Cpu,
            ),
            body,
        )
    }

    fn func_of(body: Stmt) -> Func {
        Func::new("f", vec![], std::collections::HashMap::new(), body)
    }

    fn shape_of(stmt: &Stmt) -> Vec<Expr> {
        match &stmt.kind {
            StmtKind::VarDef { buffer, .. } => buffer.tensor.shape.clone(),
            other => panic!("expected VarDef, got {other:?}"),
        }
    }

    #[test]
    fn test_shrinks_to_accessed_window() {
        // t[100] but only t[10..18] is touched
        let body = cache_def(
            "t",
            vec![Expr::int(100)],
            Stmt::for_range(
                "i",
                Expr::int(0),
                Expr::int(8),
                Stmt::store(
                    "t",
                    vec![Expr::add(Expr::var("i"), Expr::int(10))],
                    Expr::var("i"),
                ),
            ),
        );
        let out = shrink_var(func_of(body)).expect("pass");
        assert_eq!(shape_of(&out.body), vec![Expr::int(8)]);
        let text = out.body.pretty_print(0);
        assert!(text.contains("t[i] = i"), "access rebased: {text}");
    }

    #[test]
    fn test_io_variable_untouched() {
        let body = Stmt::var_def(
            "out",
            Buffer::new(
                Tensor::new(vec![Expr::int(100)], DataType::Float32),
                AccessType::Output,
                MemType::Cpu,
            ),
            Stmt::store("out", vec![Expr::int(5)], Expr::int(1)),
        );
        let out = shrink_var(func_of(body)).expect("pass");
        assert_eq!(shape_of(&out.body), vec![Expr::int(100)]);
    }

    #[test]
    fn test_unbounded_access_keeps_shape() {
        // Index loaded from memory: no constant bound
        let body = cache_def(
            "t",
            vec![Expr::int(16)],
            Stmt::store("t", vec![Expr::load("idx", vec![])], Expr::int(1)),
        );
        let out = shrink_var(func_of(body)).expect("pass");
        assert_eq!(shape_of(&out.body), vec![Expr::int(16)]);
    }

    #[test]
    fn test_symbolic_shape_becomes_const() {
        let body = cache_def(
            "t",
            vec![Expr::var("n")],
            Stmt::for_range(
                "i",
                Expr::int(0),
                Expr::int(4),
                Stmt::store("t", vec![Expr::var("i")], Expr::int(0)),
            ),
        );
        let out = shrink_var(func_of(body)).expect("pass");
        assert_eq!(shape_of(&out.body), vec![Expr::int(4)]);
    }

    #[test]
    fn test_pinned_variable_untouched() {
        let mut def = cache_def(
            "t",
            vec![Expr::int(100)],
            Stmt::store("t", vec![Expr::int(0)], Expr::int(1)),
        );
        if let StmtKind::VarDef { pinned, .. } = &mut def.kind {
            *pinned = true;
        }
        let out = shrink_var(func_of(def)).expect("pass");
        assert_eq!(shape_of(&out.body), vec![Expr::int(100)]);
    }
}
