//! Dead-store elimination.
//!
//! `remove_writes` drops stores whose value can never be observed: stores to
//! a function-local variable with no read between them and the end of the
//! variable's scope, and stores overwritten at the same location before any
//! read. `remove_cyclic_assign` reduces the degenerate `a = a` left behind
//! by propagation.

use tracing::debug;

use crate::analyze::access::{expr_uses_name, reads};
use crate::error::Result;
use crate::ir::hash::struct_eq_expr;
use crate::ir::visit::{rebuild_stmt, Mutator};
use crate::ir::{AccessType, Expr, Func, Stmt, StmtKind};
use crate::scope::ScopeEnv;

/// Remove stores to `var` that no later read (in scope, or in any later
/// iteration of an enclosing loop) can observe. `reads_after` says whether
/// the surrounding context reads `var` after `stmt`.
fn prune_unread(stmt: Stmt, var: &str, reads_after: bool) -> Stmt {
    let Stmt { id, kind } = stmt;
    let kind = match kind {
        StmtKind::Store { var: v, .. } | StmtKind::ReduceTo { var: v, .. }
            if v == var && !reads_after =>
        {
            StmtKind::StmtSeq { stmts: vec![] }
        }
        StmtKind::StmtSeq { stmts } => {
            let mut flag = reads_after;
            let mut out: Vec<Option<Stmt>> = stmts.into_iter().map(Some).collect();
            for slot in out.iter_mut().rev() {
                let Some(child) = slot.take() else { continue };
                let pruned = prune_unread(child, var, flag);
                flag = flag || reads(&pruned).contains(var);
                *slot = Some(pruned);
            }
            StmtKind::StmtSeq {
                stmts: out.into_iter().flatten().collect(),
            }
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
            // A later iteration may read what this one stored
            let carried = reads(&body).contains(var);
            StmtKind::For {
                iter,
                begin,
                end,
                step,
                len,
                property,
                body: Box::new(prune_unread(*body, var, reads_after || carried)),
            }
        }
        StmtKind::If {
            cond,
            then_case,
            else_case,
        } => StmtKind::If {
            cond,
            then_case: Box::new(prune_unread(*then_case, var, reads_after)),
            else_case: else_case.map(|e| Box::new(prune_unread(*e, var, reads_after))),
        },
        StmtKind::VarDef {
            name,
            buffer,
            pinned,
            body,
        } => StmtKind::VarDef {
            name,
            buffer,
            pinned,
            body: Box::new(prune_unread(*body, var, reads_after)),
        },
        StmtKind::Assert { cond, body } => StmtKind::Assert {
            cond,
            body: Box::new(prune_unread(*body, var, reads_after)),
        },
        StmtKind::Assume { cond, body } => StmtKind::Assume {
            cond,
            body: Box::new(prune_unread(*body, var, reads_after)),
        },
        other => other,
    };
    Stmt::new(id, kind)
}

/// Remove stores overwritten at the same location before any read. Applies
/// within one `StmtSeq`: the next sibling touching the variable must be a
/// store with structurally equal indices, and nothing in between may write a
/// variable those indices mention.
struct RemoveOverwritten;

fn store_parts(stmt: &Stmt) -> Option<(&str, &[Expr])> {
    match &stmt.kind {
        StmtKind::Store { var, indices, .. } => Some((var, indices)),
        _ => None,
    }
}

fn overwritten_later(stmts: &[Stmt], var: &str, indices: &[Expr]) -> bool {
    for s in stmts {
        if reads(s).contains(var) {
            return false;
        }
        if let Some((v2, idx2)) = store_parts(s) {
            if v2 == var {
                return indices.len() == idx2.len()
                    && indices
                        .iter()
                        .zip(idx2)
                        .all(|(a, b)| struct_eq_expr(a, b));
            }
        }
        // Any other write to the variable, or a write invalidating the
        // index expressions, blocks the proof
        let w = crate::analyze::access::writes(s);
        if w.contains(var) {
            return false;
        }
        if indices
            .iter()
            .any(|idx| w.iter().any(|wv| expr_uses_name(idx, wv)))
        {
            return false;
        }
        // Control flow in between may read under a condition we cannot see
        if !matches!(
            s.kind,
            StmtKind::Store { .. } | StmtKind::ReduceTo { .. } | StmtKind::Eval { .. }
        ) {
            return false;
        }
    }
    false
}

impl Mutator for RemoveOverwritten {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        let kind = match kind {
            StmtKind::StmtSeq { stmts } => {
                let mut out: Vec<Stmt> = Vec::with_capacity(stmts.len());
                for (i, s) in stmts.iter().enumerate() {
                    let dead = store_parts(s)
                        .is_some_and(|(var, idx)| overwritten_later(&stmts[i + 1..], var, idx));
                    if !dead {
                        out.push(s.clone());
                    }
                }
                StmtKind::StmtSeq { stmts: out }
            }
            other => other,
        };
        Ok(Stmt::new(id, kind))
    }
}

/// Eliminate stores whose value is never read.
pub fn remove_writes(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: remove_writes");
    func.map_body(|mut body| {
        // Scope-end rule, per function-local variable
        let mut env = ScopeEnv::new();
        let cache_vars: Vec<String> = {
            let mut names = Vec::new();
            collect_cache_vars(&body, &mut env, &mut names)?;
            names
        };
        for var in cache_vars {
            body = prune_unread(body, &var, false);
        }
        // Overwrite rule, any variable
        RemoveOverwritten.mutate_stmt(body)
    })
}

fn collect_cache_vars(stmt: &Stmt, env: &mut ScopeEnv, out: &mut Vec<String>) -> Result<()> {
    if let StmtKind::VarDef { name, buffer, body, .. } = &stmt.kind {
        if buffer.atype == AccessType::Cache {
            out.push(name.clone());
        }
        env.push_def(stmt)?;
        collect_cache_vars(body, env, out)?;
        env.pop_def(name);
        return Ok(());
    }
    let mut kids = Vec::new();
    crate::analyze::find::collect_children(stmt, &mut kids);
    for k in kids {
        collect_cache_vars(k, env, out)?;
    }
    Ok(())
}

struct RemoveCyclic;

impl Mutator for RemoveCyclic {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        if let StmtKind::Store { var, indices, expr } = &stmt.kind {
            if let Expr::Load {
                var: lv,
                indices: li,
            } = expr
            {
                if lv == var
                    && indices.len() == li.len()
                    && indices.iter().zip(li).all(|(a, b)| struct_eq_expr(a, b))
                {
                    return Ok(Stmt::new(stmt.id, StmtKind::StmtSeq { stmts: vec![] }));
                }
            }
        }
        Ok(stmt)
    }
}

/// Reduce `a[i] = a[i]` self-assignments to nothing.
pub fn remove_cyclic_assign(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: remove_cyclic_assign");
    func.map_body(|body| RemoveCyclic.mutate_stmt(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Buffer, DataType, MemType, Tensor};

    fn cache_def(name: &str, ndim: usize, body: Stmt) -> Stmt {
        Stmt::var_def(
            name,
            Buffer::new(
                Tensor::new(vec![Expr::int(8); ndim], DataType::Float32),
                AccessType::Cache,
                MemType::Cpu,
            ),
            body,
        )
    }

    fn count_stores(stmt: &Stmt) -> usize {
        let mut n = 0;
        crate::ir::visit::walk_stmt_pre(stmt, &mut |s| {
            if matches!(s.kind, StmtKind::Store { .. }) {
                n += 1;
            }
        });
        n
    }

    #[test]
    fn test_unread_store_removed() {
        let body = cache_def(
            "t",
            0,
            Stmt::seq(vec![
                Stmt::store("t", vec![], Expr::int(1)),
                Stmt::store("out", vec![], Expr::int(2)),
            ]),
        );
        let func = Func::new("f", vec![], std::collections::HashMap::new(), body);
        let out = remove_writes(func).expect("pass");
        assert_eq!(count_stores(&out.body), 1);
    }

    #[test]
    fn test_read_store_kept() {
        let body = cache_def(
            "t",
            0,
            Stmt::seq(vec![
                Stmt::store("t", vec![], Expr::int(1)),
                Stmt::store("out", vec![], Expr::load("t", vec![])),
            ]),
        );
        let func = Func::new("f", vec![], std::collections::HashMap::new(), body);
        let out = remove_writes(func).expect("pass");
        assert_eq!(count_stores(&out.body), 2);
    }

    #[test]
    fn test_loop_carried_read_keeps_store() {
        // for i: { out[i] = t; t = i }  -- next iteration reads t
        let body = cache_def(
            "t",
            0,
            Stmt::for_range(
                "i",
                Expr::int(0),
                Expr::int(4),
                Stmt::seq(vec![
                    Stmt::store("out", vec![Expr::var("i")], Expr::load("t", vec![])),
                    Stmt::store("t", vec![], Expr::var("i")),
                ]),
            ),
        );
        let func = Func::new("f", vec![], std::collections::HashMap::new(), body);
        let out = remove_writes(func).expect("pass");
        assert_eq!(count_stores(&out.body), 2);
    }

    #[test]
    fn test_overwritten_store_removed() {
        let s = Stmt::seq(vec![
            Stmt::store("a", vec![Expr::int(0)], Expr::int(1)),
            Stmt::store("a", vec![Expr::int(0)], Expr::int(2)),
        ]);
        let out = RemoveOverwritten.mutate_stmt(s).expect("pass");
        assert_eq!(count_stores(&out), 1);
    }

    #[test]
    fn test_overwrite_with_read_between_kept() {
        let s = Stmt::seq(vec![
            Stmt::store("a", vec![Expr::int(0)], Expr::int(1)),
            Stmt::store("b", vec![], Expr::load("a", vec![Expr::int(0)])),
            Stmt::store("a", vec![Expr::int(0)], Expr::int(2)),
        ]);
        let out = RemoveOverwritten.mutate_stmt(s).expect("pass");
        assert_eq!(count_stores(&out), 3);
    }

    #[test]
    fn test_cyclic_assign_removed() {
        let s = Stmt::store(
            "a",
            vec![Expr::var("i")],
            Expr::load("a", vec![Expr::var("i")]),
        );
        let out = RemoveCyclic.mutate_stmt(s).expect("pass");
        assert_eq!(count_stores(&out), 0);
    }

    #[test]
    fn test_shifted_self_assign_kept() {
        let s = Stmt::store(
            "a",
            vec![Expr::var("i")],
            Expr::load("a", vec![Expr::add(Expr::var("i"), Expr::int(1))]),
        );
        let out = RemoveCyclic.mutate_stmt(s).expect("pass");
        assert_eq!(count_stores(&out), 1);
    }
}
