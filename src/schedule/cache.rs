//! Access staging through a scratch buffer.
//!
//! `cache` introduces a buffer of the requested memory type covering the
//! variable, fills it before the target statement, redirects the
//! statement's accesses to it, and flushes modified contents back after.
//! `cache_reduction` is the variant for reduction targets: the buffer
//! starts at the operator's neutral element and flushes by reducing back,
//! so partial results combine correctly.

use crate::analyze::find::{ancestors, find_all, find_stmt};
use crate::error::{Error, Result};
use crate::ir::visit::{rebuild_expr, rebuild_stmt, walk_expr_pre, walk_stmt_pre, Mutator};
use crate::ir::{
    AccessType, Buffer, Expr, Func, MemType, ReduceOp, Stmt, StmtId, StmtKind, Tensor,
};

use super::util::rewrite_at;

/// Rename every access of `from` to `to`.
struct RenameAccess<'a> {
    from: &'a str,
    to: &'a str,
}

impl Mutator for RenameAccess<'_> {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        let kind = match kind {
            StmtKind::Store { var, indices, expr } if var == self.from => StmtKind::Store {
                var: self.to.to_string(),
                indices,
                expr,
            },
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                atomic,
            } if var == self.from => StmtKind::ReduceTo {
                var: self.to.to_string(),
                indices,
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
            Expr::Load { var, indices } if var == self.from => Expr::Load {
                var: self.to.to_string(),
                indices,
            },
            other => other,
        })
    }
}

/// A loop nest over the whole shape running `make_leaf(indices)` innermost.
fn copy_nest(shape: &[Expr], iter_prefix: &str, make_leaf: impl FnOnce(Vec<Expr>) -> Stmt) -> Stmt {
    let iters: Vec<String> = (0..shape.len())
        .map(|d| format!("{iter_prefix}.i{d}"))
        .collect();
    let indices: Vec<Expr> = iters.iter().map(|n| Expr::var(n.clone())).collect();
    let mut stmt = make_leaf(indices);
    for (iter, dim) in iters.into_iter().zip(shape).rev() {
        stmt = Stmt::for_range(iter, Expr::int(0), dim.clone(), stmt);
    }
    stmt
}

/// How the target statement touches the variable.
struct AccessProfile {
    reads: bool,
    writes: bool,
    stores: bool,
    reduce_ops: Vec<ReduceOp>,
}

fn profile(stmt: &Stmt, var: &str) -> AccessProfile {
    let mut p = AccessProfile {
        reads: false,
        writes: false,
        stores: false,
        reduce_ops: Vec::new(),
    };
    walk_stmt_pre(stmt, &mut |s| match &s.kind {
        StmtKind::Store { var: v, .. } if v == var => {
            p.writes = true;
            p.stores = true;
        }
        StmtKind::ReduceTo { var: v, op, .. } if v == var => {
            p.writes = true;
            if !p.reduce_ops.contains(op) {
                p.reduce_ops.push(*op);
            }
        }
        _ => {}
    });
    let mut on_expr = |e: &Expr| {
        walk_expr_pre(e, &mut |e| {
            if matches!(e, Expr::Load { var: v, .. } if v == var) {
                p.reads = true;
            }
        });
    };
    walk_stmt_pre(stmt, &mut |s| match &s.kind {
        StmtKind::Store { indices, expr, .. } | StmtKind::ReduceTo { indices, expr, .. } => {
            for i in indices {
                on_expr(i);
            }
            on_expr(expr);
        }
        StmtKind::If { cond, .. } | StmtKind::Assert { cond, .. } | StmtKind::Assume { cond, .. } => {
            on_expr(cond);
        }
        StmtKind::For {
            begin, end, step, ..
        } => {
            on_expr(begin);
            on_expr(end);
            on_expr(step);
        }
        StmtKind::Eval { expr } => on_expr(expr),
        _ => {}
    });
    p
}

pub(super) fn cache(
    func: Func,
    stmt_id: &StmtId,
    var: &str,
    mtype: MemType,
    reduction: bool,
) -> Result<(Func, (StmtId, StmtId, String, StmtId))> {
    let target = find_stmt(&func.body, stmt_id)?.clone();

    // The statement must sit inside the variable's definition
    let def = find_all(&func.body, &|s| {
        matches!(&s.kind, StmtKind::VarDef { name, .. } if name == var)
    });
    let def = def
        .first()
        .ok_or_else(|| Error::schedule(format!("no variable named \"{var}\"")))?;
    let path = ancestors(&func.body, stmt_id)?;
    if !path.contains(&def.id) {
        return Err(Error::schedule(format!(
            "{stmt_id} is outside the definition of \"{var}\""
        )));
    }
    let StmtKind::VarDef { buffer, .. } = &def.kind else {
        return Err(Error::internal("VarDef filter returned a non-VarDef"));
    };
    let shape = buffer.tensor.shape.clone();
    let dtype = buffer.tensor.dtype.clone();

    let prof = profile(&target, var);
    if !prof.reads && !prof.writes {
        return Err(Error::schedule(format!(
            "\"{var}\" is not accessed inside {stmt_id}"
        )));
    }

    let (cache_var, fill_id, flush_id, def_id);
    if reduction {
        if prof.stores || prof.reads {
            return Err(Error::schedule(format!(
                "cache_reduction requires all accesses to \"{var}\" inside {stmt_id} to be reductions"
            )));
        }
        if prof.reduce_ops.len() != 1 {
            return Err(Error::schedule(format!(
                "reductions into \"{var}\" must share one operator, found {}",
                prof.reduce_ops.len()
            )));
        }
        cache_var = format!("{var}.r");
    } else {
        cache_var = format!("{var}.c");
    }
    fill_id = stmt_id.derived(".fill");
    flush_id = stmt_id.derived(".flush");
    def_id = stmt_id.derived(".cache");

    let ret = (
        fill_id.clone(),
        flush_id.clone(),
        cache_var.clone(),
        def_id.clone(),
    );

    let func = func.map_body(|body| {
        rewrite_at(body, stmt_id, |stmt| {
            let redirected = RenameAccess {
                from: var,
                to: &cache_var,
            }
            .mutate_stmt(stmt)?;

            let mut stmts = Vec::new();
            if reduction {
                let op = prof.reduce_ops[0];
                let neutral = op.neutral(&dtype);
                stmts.push(
                    copy_nest(&shape, &cache_var, |idx| {
                        Stmt::store(cache_var.clone(), idx, neutral)
                    })
                    .with_id(fill_id.clone()),
                );
                stmts.push(redirected);
                stmts.push(
                    copy_nest(&shape, &format!("{cache_var}.f"), |idx| {
                        Stmt::reduce_to(
                            var,
                            idx.clone(),
                            op,
                            Expr::load(cache_var.clone(), idx),
                        )
                    })
                    .with_id(flush_id.clone()),
                );
            } else {
                if prof.reads {
                    stmts.push(
                        copy_nest(&shape, &cache_var, |idx| {
                            Stmt::store(
                                cache_var.clone(),
                                idx.clone(),
                                Expr::load(var, idx),
                            )
                        })
                        .with_id(fill_id.clone()),
                    );
                }
                stmts.push(redirected);
                if prof.writes {
                    stmts.push(
                        copy_nest(&shape, &format!("{cache_var}.f"), |idx| {
                            Stmt::store(var, idx.clone(), Expr::load(cache_var.clone(), idx))
                        })
                        .with_id(flush_id.clone()),
                    );
                }
            }

            Ok(Stmt::new(
                def_id.clone(),
                StmtKind::VarDef {
                    name: cache_var.clone(),
                    buffer: Buffer::new(
                        Tensor::new(shape.clone(), dtype.clone()),
                        AccessType::Cache,
                        mtype,
                    ),
                    pinned: false,
                    body: Box::new(Stmt::seq(stmts)),
                },
            ))
        })
    })?;
    Ok((func, ret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DataType;

    fn base_func(target: Stmt) -> Func {
        let buf = |atype| {
            Buffer::new(
                Tensor::new(vec![Expr::int(16)], DataType::Float32),
                atype,
                MemType::Cpu,
            )
        };
        Func::with_params(
            "f",
            vec![
                ("A".to_string(), buf(AccessType::Input)),
                ("B".to_string(), buf(AccessType::InOut)),
            ],
            target,
        )
    }

    fn rw_loop() -> Stmt {
        Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(16),
            Stmt::store(
                "B",
                vec![Expr::var("i")],
                Expr::add(
                    Expr::load("B", vec![Expr::var("i")]),
                    Expr::load("A", vec![Expr::var("i")]),
                ),
            ),
        )
        .with_id("L".into())
    }

    #[test]
    fn test_cache_inserts_fill_and_flush() {
        let func = base_func(rw_loop());
        let (func, (fill, flush, cache_var, cache_def)) =
            cache(func, &"L".into(), "B", MemType::GpuShared, false).expect("cache");
        assert_eq!(cache_var, "B.c");
        assert_eq!(fill.as_str(), "L.fill");
        assert_eq!(flush.as_str(), "L.flush");
        assert_eq!(cache_def.as_str(), "L.cache");
        let text = func.body.pretty_print(0);
        assert!(text.contains("B.c[B.c.i0] = B[B.c.i0]"), "fill: {text}");
        assert!(text.contains("B[B.c.f.i0] = B.c[B.c.f.i0]"), "flush: {text}");
        assert!(text.contains("B.c[i] ="), "redirected store: {text}");
        assert!(text.contains("@GpuShared"), "memory type: {text}");
    }

    #[test]
    fn test_cache_outside_def_rejected() {
        // "A" exists but the target is the whole body including its def:
        // caching a variable around its own VarDef is meaningless
        let func = base_func(rw_loop());
        let root_id = func.body.id.clone();
        assert!(cache(func, &root_id, "ghost", MemType::Cpu, false).is_err());
    }

    #[test]
    fn test_cache_reduction_uses_neutral_and_reduces_back() {
        let target = Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(16),
            Stmt::reduce_to(
                "B",
                vec![Expr::int(0)],
                ReduceOp::Add,
                Expr::load("A", vec![Expr::var("i")]),
            ),
        )
        .with_id("L".into());
        let func = base_func(target);
        let (func, (_, _, cache_var, _)) =
            cache(func, &"L".into(), "B", MemType::GpuLocal, true).expect("cache_reduction");
        assert_eq!(cache_var, "B.r");
        let text = func.body.pretty_print(0);
        assert!(text.contains("B.r[B.r.i0] = 0"), "neutral fill: {text}");
        assert!(text.contains("B[B.r.f.i0] Add= B.r[B.r.f.i0]"), "reduce flush: {text}");
    }

    #[test]
    fn test_cache_reduction_rejects_plain_stores() {
        let func = base_func(rw_loop());
        assert!(cache(func, &"L".into(), "B", MemType::Cpu, true).is_err());
    }
}
