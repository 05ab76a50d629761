//! One-time-use propagation.
//!
//! Inlines a scalar definition consumed by exactly one later read: the store
//! disappears into the load, and `remove_dead_var` collects the then-unused
//! definition. Only fires when the store dominates the read from the same
//! statement sequence and no operand of the stored value is written in
//! between, so the substitution is exact.

use tracing::debug;

use crate::analyze::access::{expr_uses_name, reads, writes};
use crate::error::Result;
use crate::ir::visit::{rebuild_expr, rebuild_stmt, walk_expr_pre, walk_stmt_pre, Mutator};
use crate::ir::{AccessType, Expr, Func, Stmt, StmtKind};

struct PropOneTimeUse;

fn count_accesses(body: &Stmt, var: &str) -> (usize, usize, usize) {
    let mut stores = 0;
    let mut reduces = 0;
    walk_stmt_pre(body, &mut |s| match &s.kind {
        StmtKind::Store { var: v, .. } if v == var => stores += 1,
        StmtKind::ReduceTo { var: v, .. } if v == var => reduces += 1,
        _ => {}
    });
    let mut loads = 0;
    walk_stmt_pre(body, &mut |s| {
        let mut on_expr = |e: &Expr| {
            walk_expr_pre(e, &mut |e| {
                if matches!(e, Expr::Load { var: v, .. } if v == var) {
                    loads += 1;
                }
            });
        };
        match &s.kind {
            StmtKind::Store { indices, expr, .. } | StmtKind::ReduceTo { indices, expr, .. } => {
                for i in indices {
                    on_expr(i);
                }
                on_expr(expr);
            }
            StmtKind::If { cond, .. }
            | StmtKind::Assert { cond, .. }
            | StmtKind::Assume { cond, .. } => on_expr(cond),
            StmtKind::For {
                begin, end, step, ..
            } => {
                on_expr(begin);
                on_expr(end);
                on_expr(step);
            }
            StmtKind::Eval { expr } => on_expr(expr),
            StmtKind::VarDef { buffer, .. } => {
                for dim in &buffer.tensor.shape {
                    on_expr(dim);
                }
            }
            _ => {}
        }
    });
    (stores, reduces, loads)
}

struct ReplaceLoad<'a> {
    var: &'a str,
    value: &'a Expr,
}

impl Mutator for ReplaceLoad<'_> {
    fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
        match &expr {
            Expr::Load { var, indices } if var == self.var && indices.is_empty() => {
                Ok(self.value.clone())
            }
            _ => rebuild_expr(self, expr),
        }
    }
}

/// Look for `{ ...; var = value; ...uses...; }` and inline. Returns the
/// rewritten tree and whether it fired.
fn try_inline(stmt: Stmt, var: &str) -> Result<(Stmt, bool)> {
    let Stmt { id, kind } = stmt;
    match kind {
        StmtKind::StmtSeq { stmts } => {
            let store_at = stmts.iter().position(|s| {
                matches!(&s.kind, StmtKind::Store { var: v, indices, .. } if v == var && indices.is_empty())
            });
            if let Some(i) = store_at {
                let StmtKind::Store { expr: value, .. } = &stmts[i].kind else {
                    return Err(crate::error::Error::internal("position lied about a Store"));
                };
                let value = value.clone();
                // Operands must stay unchanged until the read
                let operands = {
                    let mut names = vec![];
                    walk_expr_pre(&value, &mut |e| match e {
                        Expr::Var(n) => names.push(n.clone()),
                        Expr::Load { var, .. } => names.push(var.clone()),
                        _ => {}
                    });
                    names
                };
                let safe = stmts[i + 1..].iter().all(|s| {
                    let w = writes(s);
                    !w.contains(var) && operands.iter().all(|o| !w.contains(o))
                });
                if safe {
                    let mut out: Vec<Stmt> = stmts[..i].to_vec();
                    let mut replacer = ReplaceLoad { var, value: &value };
                    for s in stmts[i + 1..].iter().cloned() {
                        out.push(replacer.mutate_stmt(s)?);
                    }
                    return Ok((Stmt::new(id, StmtKind::StmtSeq { stmts: out }), true));
                }
            }
            // Recurse looking for the pattern deeper
            let mut fired = false;
            let mut out = Vec::with_capacity(stmts.len());
            for s in stmts {
                if fired {
                    out.push(s);
                } else {
                    let (s, f) = try_inline(s, var)?;
                    fired = f;
                    out.push(s);
                }
            }
            Ok((Stmt::new(id, StmtKind::StmtSeq { stmts: out }), fired))
        }
        StmtKind::For {
            iter,
            begin,
            end,
            step,
            len,
            property,
            body,
        } => {
            let (body, fired) = try_inline(*body, var)?;
            Ok((
                Stmt::new(
                    id,
                    StmtKind::For {
                        iter,
                        begin,
                        end,
                        step,
                        len,
                        property,
                        body: Box::new(body),
                    },
                ),
                fired,
            ))
        }
        StmtKind::VarDef {
            name,
            buffer,
            pinned,
            body,
        } => {
            let (body, fired) = try_inline(*body, var)?;
            Ok((
                Stmt::new(
                    id,
                    StmtKind::VarDef {
                        name,
                        buffer,
                        pinned,
                        body: Box::new(body),
                    },
                ),
                fired,
            ))
        }
        other => Ok((Stmt::new(id, other), false)),
    }
}

impl Mutator for PropOneTimeUse {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        if let StmtKind::VarDef {
            name,
            buffer,
            pinned,
            body,
        } = kind
        {
            if buffer.atype == AccessType::Cache && buffer.tensor.ndim() == 0 {
                let (stores, reduces, loads) = count_accesses(&body, &name);
                if stores == 1 && reduces == 0 && loads == 1 && !reads(&body).is_empty() {
                    let (body, _fired) = try_inline(*body, &name)?;
                    return Ok(Stmt::new(
                        id,
                        StmtKind::VarDef {
                            name,
                            buffer,
                            pinned,
                            body: Box::new(body),
                        },
                    ));
                }
            }
            return Ok(Stmt::new(
                id,
                StmtKind::VarDef {
                    name,
                    buffer,
                    pinned,
                    body,
                },
            ));
        }
        Ok(Stmt::new(id, kind))
    }
}

/// Inline definitions consumed by exactly one later read.
pub fn prop_one_time_use(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: prop_one_time_use");
    func.map_body(|body| PropOneTimeUse.mutate_stmt(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Buffer, DataType, MemType, Tensor};

    fn scalar_cache(name: &str, body: Stmt) -> Stmt {
        Stmt::var_def(
            name,
            Buffer::new(
                Tensor::new(vec![], DataType::Float32),
                AccessType::Cache,
                MemType::Cpu,
            ),
            body,
        )
    }

    #[test]
    fn test_single_use_inlined() {
        let body = scalar_cache(
            "t",
            Stmt::seq(vec![
                Stmt::store("t", vec![], Expr::load("a", vec![Expr::int(0)])),
                Stmt::store("b", vec![], Expr::load("t", vec![])),
            ]),
        );
        let func = Func::new("f", vec![], std::collections::HashMap::new(), body);
        let out = prop_one_time_use(func).expect("pass");
        let text = out.body.pretty_print(0);
        assert!(text.contains("b[] = a[0]"), "load inlined: {text}");
    }

    #[test]
    fn test_two_uses_not_inlined() {
        let body = scalar_cache(
            "t",
            Stmt::seq(vec![
                Stmt::store("t", vec![], Expr::load("a", vec![Expr::int(0)])),
                Stmt::store("b", vec![], Expr::load("t", vec![])),
                Stmt::store("c", vec![], Expr::load("t", vec![])),
            ]),
        );
        let func = Func::new("f", vec![], std::collections::HashMap::new(), body);
        let out = prop_one_time_use(func).expect("pass");
        let text = out.body.pretty_print(0);
        assert!(text.contains("b[] = t[]"), "not inlined: {text}");
    }

    #[test]
    fn test_clobbered_operand_blocks_inline() {
        // t = a; a = 0; b = t  -- inlining would read the new a
        let body = scalar_cache(
            "t",
            Stmt::seq(vec![
                Stmt::store("t", vec![], Expr::load("a", vec![])),
                Stmt::store("a", vec![], Expr::int(0)),
                Stmt::store("b", vec![], Expr::load("t", vec![])),
            ]),
        );
        let func = Func::new("f", vec![], std::collections::HashMap::new(), body);
        let out = prop_one_time_use(func).expect("pass");
        let text = out.body.pretty_print(0);
        assert!(text.contains("b[] = t[]"), "must stay: {text}");
    }

    #[test]
    fn test_use_inside_loop_inlined() {
        let body = scalar_cache(
            "t",
            Stmt::seq(vec![
                Stmt::store("t", vec![], Expr::load("a", vec![])),
                Stmt::for_range(
                    "i",
                    Expr::int(0),
                    Expr::int(4),
                    Stmt::store("b", vec![Expr::var("i")], Expr::load("t", vec![])),
                ),
            ]),
        );
        let func = Func::new("f", vec![], std::collections::HashMap::new(), body);
        let out = prop_one_time_use(func).expect("pass");
        let text = out.body.pretty_print(0);
        assert!(text.contains("b[i] = a[]"), "inlined through loop: {text}");
    }
}
