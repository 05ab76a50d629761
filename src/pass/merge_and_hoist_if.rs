//! If-statement consolidation.
//!
//! Merges adjacent `If`s with structurally equal conditions (when the first
//! branch cannot change the condition's value) and hoists a branch-only `If`
//! out of a `For` or `VarDef` whose binding the condition does not mention.
//! Both rewrites enlarge straight-line regions for the passes that follow.

use tracing::debug;

use crate::analyze::access::{expr_uses_name, writes};
use crate::error::Result;
use crate::ir::hash::struct_eq_expr;
use crate::ir::visit::{rebuild_stmt, walk_expr_pre, Mutator};
use crate::ir::{Expr, Func, Stmt, StmtKind};

struct MergeAndHoistIf;

fn cond_reads(cond: &Expr) -> Vec<String> {
    let mut names = Vec::new();
    walk_expr_pre(cond, &mut |e| {
        if let Expr::Load { var, .. } = e {
            names.push(var.clone());
        }
    });
    names
}

fn concat(a: Stmt, b: Stmt) -> Stmt {
    let mut stmts = a.into_stmts();
    stmts.extend(b.into_stmts());
    Stmt::seq(stmts)
}

fn merge_adjacent(stmts: Vec<Stmt>) -> Vec<Stmt> {
    let mut out: Vec<Stmt> = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        let mergeable = match (out.last(), &stmt.kind) {
            (
                Some(Stmt {
                    kind:
                        StmtKind::If {
                            cond: c1,
                            then_case: t1,
                            else_case: e1,
                        },
                    ..
                }),
                StmtKind::If { cond: c2, .. },
            ) => {
                struct_eq_expr(c1, c2) && {
                    // The first branch must not write what the condition reads
                    let mut written = writes(t1);
                    if let Some(e) = e1 {
                        written.extend(writes(e));
                    }
                    cond_reads(c1).iter().all(|v| !written.contains(v))
                }
            }
            _ => false,
        };
        if mergeable {
            let Some(Stmt {
                id,
                kind:
                    StmtKind::If {
                        cond,
                        then_case: t1,
                        else_case: e1,
                    },
            }) = out.pop()
            else {
                unreachable!("mergeable implies a trailing If");
            };
            let StmtKind::If {
                then_case: t2,
                else_case: e2,
                ..
            } = stmt.kind
            else {
                unreachable!("mergeable implies an If");
            };
            let then_case = Box::new(concat(*t1, *t2));
            let else_case = match (e1, e2) {
                (Some(a), Some(b)) => Some(Box::new(concat(*a, *b))),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };
            out.push(Stmt::new(
                id,
                StmtKind::If {
                    cond,
                    then_case,
                    else_case,
                },
            ));
        } else {
            out.push(stmt);
        }
    }
    out
}

impl Mutator for MergeAndHoistIf {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        let kind = match kind {
            StmtKind::StmtSeq { stmts } => StmtKind::StmtSeq {
                stmts: merge_adjacent(stmts),
            },
            StmtKind::For {
                iter,
                begin,
                end,
                step,
                len,
                property,
                body,
            } => {
                let hoistable = matches!(
                    &body.kind,
                    StmtKind::If { cond, else_case: None, .. }
                        if !expr_uses_name(cond, &iter)
                            && cond_reads(cond).iter().all(|v| !writes(&body).contains(v))
                            && property.reductions.is_empty()
                );
                if hoistable {
                    let StmtKind::If {
                        cond, then_case, ..
                    } = body.kind
                    else {
                        unreachable!("checked above");
                    };
                    let if_id = body.id;
                    let inner = Stmt::new(
                        id,
                        StmtKind::For {
                            iter,
                            begin,
                            end,
                            step,
                            len,
                            property,
                            body: then_case,
                        },
                    );
                    return Ok(Stmt::new(
                        if_id,
                        StmtKind::If {
                            cond,
                            then_case: Box::new(inner),
                            else_case: None,
                        },
                    ));
                }
                StmtKind::For {
                    iter,
                    begin,
                    end,
                    step,
                    len,
                    property,
                    body,
                }
            }
            StmtKind::VarDef {
                name,
                buffer,
                pinned,
                body,
            } => {
                let hoistable = matches!(
                    &body.kind,
                    StmtKind::If { cond, else_case: None, .. }
                        if !expr_uses_name(cond, &name)
                );
                if hoistable {
                    let StmtKind::If {
                        cond, then_case, ..
                    } = body.kind
                    else {
                        unreachable!("checked above");
                    };
                    let if_id = body.id;
                    let inner = Stmt::new(
                        id,
                        StmtKind::VarDef {
                            name,
                            buffer,
                            pinned,
                            body: then_case,
                        },
                    );
                    return Ok(Stmt::new(
                        if_id,
                        StmtKind::If {
                            cond,
                            then_case: Box::new(inner),
                            else_case: None,
                        },
                    ));
                }
                StmtKind::VarDef {
                    name,
                    buffer,
                    pinned,
                    body,
                }
            }
            other => other,
        };
        Ok(Stmt::new(id, kind))
    }
}

/// Merge equal-condition `If`s and hoist loop-invariant ones.
pub fn merge_and_hoist_if(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: merge_and_hoist_if");
    func.map_body(|body| MergeAndHoistIf.mutate_stmt(body))
}
