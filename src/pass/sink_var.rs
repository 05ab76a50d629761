//! Scope narrowing for variable definitions.
//!
//! Pushes a function-local `VarDef` down to the smallest statement that
//! still contains every access: past unrelated statements of a sequence,
//! into the used branch of an `If`, and into a `For` body when no iteration
//! reads what another one wrote (checked with the dependency finder).

use tracing::debug;

use crate::analyze::access::{expr_uses_name, uses_name};
use crate::analyze::deps::loop_carried_deps;
use crate::error::Result;
use crate::ir::hash::hash_stmt;
use crate::ir::visit::{rebuild_stmt, Mutator};
use crate::ir::{AccessType, Buffer, Func, Stmt, StmtId, StmtKind};

const MAX_ITERATIONS: usize = 10;

struct SinkVar;

fn rewrap(id: StmtId, name: String, buffer: Buffer, pinned: bool, body: Stmt) -> Stmt {
    Stmt::new(
        id,
        StmtKind::VarDef {
            name,
            buffer,
            pinned,
            body: Box::new(body),
        },
    )
}

/// Whether the first access to `name` on every path through `stmt` is an
/// unconditional whole-variable store.
fn leading_unconditional_store(stmt: &Stmt, name: &str) -> bool {
    match &stmt.kind {
        StmtKind::Store { var, .. } => var == name,
        StmtKind::StmtSeq { stmts } => {
            for s in stmts {
                if uses_name(s, name) {
                    return leading_unconditional_store(s, name);
                }
            }
            false
        }
        StmtKind::VarDef { body, .. } => leading_unconditional_store(body, name),
        StmtKind::Assert { cond, body } | StmtKind::Assume { cond, body } => {
            !expr_uses_name(cond, name) && leading_unconditional_store(body, name)
        }
        _ => false,
    }
}

/// One sinking step for `VarDef(name) { body }`; `None` when nothing moves.
fn sink_once(id: &StmtId, name: &str, buffer: &Buffer, pinned: bool, body: &Stmt) -> Option<Stmt> {
    match &body.kind {
        StmtKind::StmtSeq { stmts } => {
            let used: Vec<bool> = stmts.iter().map(|s| uses_name(s, name)).collect();
            let first = used.iter().position(|u| *u)?;
            let last = used.iter().rposition(|u| *u)?;
            if first == 0 && last == stmts.len() - 1 {
                return None;
            }
            // Wrap only the used range
            let mut out: Vec<Stmt> = stmts[..first].to_vec();
            let range: Vec<Stmt> = stmts[first..=last].to_vec();
            let inner = if range.len() == 1 {
                let mut it = range.into_iter();
                it.next()?
            } else {
                Stmt::seq(range)
            };
            out.push(rewrap(
                id.clone(),
                name.to_string(),
                buffer.clone(),
                pinned,
                inner,
            ));
            out.extend_from_slice(&stmts[last + 1..]);
            Some(Stmt::new(body.id.clone(), StmtKind::StmtSeq { stmts: out }))
        }
        StmtKind::For {
            iter,
            begin,
            end,
            step,
            len,
            property,
            body: loop_body,
        } => {
            if property.reductions.iter().any(|r| r.var == name) {
                return None;
            }
            // Iterations must not communicate through the variable: either
            // every iteration overwrites the scalar before using it, or the
            // dependency finder proves element-wise independence.
            let dominated =
                buffer.tensor.ndim() == 0 && leading_unconditional_store(loop_body, name);
            if !dominated {
                let carried = loop_carried_deps(body, &body.id)
                    .into_iter()
                    .any(|d| d.later.var == name);
                if carried {
                    return None;
                }
            }
            Some(Stmt::new(
                body.id.clone(),
                StmtKind::For {
                    iter: iter.clone(),
                    begin: begin.clone(),
                    end: end.clone(),
                    step: step.clone(),
                    len: len.clone(),
                    property: property.clone(),
                    body: Box::new(rewrap(
                        id.clone(),
                        name.to_string(),
                        buffer.clone(),
                        pinned,
                        (**loop_body).clone(),
                    )),
                },
            ))
        }
        StmtKind::If {
            cond,
            then_case,
            else_case,
        } => {
            if expr_uses_name(cond, name) {
                return None;
            }
            let then_uses = uses_name(then_case, name);
            let else_uses = else_case.as_ref().is_some_and(|e| uses_name(e, name));
            if then_uses && else_uses {
                return None;
            }
            let wrap = |s: &Stmt| {
                rewrap(
                    id.clone(),
                    name.to_string(),
                    buffer.clone(),
                    pinned,
                    s.clone(),
                )
            };
            Some(Stmt::new(
                body.id.clone(),
                StmtKind::If {
                    cond: cond.clone(),
                    then_case: if then_uses {
                        Box::new(wrap(then_case))
                    } else {
                        then_case.clone()
                    },
                    else_case: else_case.as_ref().map(|e| {
                        if else_uses {
                            Box::new(wrap(e))
                        } else {
                            e.clone()
                        }
                    }),
                },
            ))
        }
        _ => None,
    }
}

impl Mutator for SinkVar {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        if let StmtKind::VarDef {
            name,
            buffer,
            pinned,
            body,
        } = &kind
        {
            if buffer.atype == AccessType::Cache && !pinned {
                if let Some(sunk) = sink_once(&id, name, buffer, *pinned, body) {
                    return Ok(sunk);
                }
            }
        }
        Ok(Stmt::new(id, kind))
    }
}

/// Narrow definition scopes, to fixpoint.
pub fn sink_var(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: sink_var");
    func.map_body(|mut body| {
        for _ in 0..MAX_ITERATIONS {
            let before = hash_stmt(&body);
            body = SinkVar.mutate_stmt(body)?;
            if hash_stmt(&body) == before {
                break;
            }
        }
        Ok(body)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DataType, Expr, MemType, Tensor};

    fn cache_buf() -> Buffer {
        Buffer::new(
            Tensor::new(vec![], DataType::Float32),
            AccessType::Cache,
            MemType::Cpu,
        )
    }

    fn func_of(body: Stmt) -> Func {
        Func::new("f", vec![], std::collections::HashMap::new(), body)
    }

    #[test]
    fn test_sinks_past_unrelated_statements() {
        let body = Stmt::var_def(
            "t",
            cache_buf(),
            Stmt::seq(vec![
                Stmt::store("a", vec![], Expr::int(0)),
                Stmt::store("t", vec![], Expr::int(1)),
                Stmt::store("b", vec![], Expr::load("t", vec![])),
            ]),
        );
        let out = sink_var(func_of(body)).expect("pass");
        // The VarDef now sits inside the sequence, after the store to a
        match &out.body.kind {
            StmtKind::StmtSeq { stmts } => {
                assert!(matches!(stmts[0].kind, StmtKind::Store { .. }));
                assert!(stmts[1].is_var_def());
            }
            other => panic!("expected seq at root, got {other:?}"),
        }
    }

    #[test]
    fn test_sinks_into_independent_loop() {
        let body = Stmt::var_def(
            "t",
            cache_buf(),
            Stmt::for_range(
                "i",
                Expr::int(0),
                Expr::int(8),
                Stmt::seq(vec![
                    Stmt::store("t", vec![], Expr::var("i")),
                    Stmt::store("b", vec![Expr::var("i")], Expr::load("t", vec![])),
                ]),
            ),
        );
        let out = sink_var(func_of(body)).expect("pass");
        assert!(out.body.is_for(), "loop hoisted over def");
    }

    #[test]
    fn test_carried_value_stays_outside() {
        // t written in iteration i is read in iteration i+1
        let body = Stmt::var_def(
            "t",
            cache_buf(),
            Stmt::for_range(
                "i",
                Expr::int(0),
                Expr::int(8),
                Stmt::seq(vec![
                    Stmt::store("b", vec![Expr::var("i")], Expr::load("t", vec![])),
                    Stmt::store("t", vec![], Expr::var("i")),
                ]),
            ),
        );
        let out = sink_var(func_of(body)).expect("pass");
        assert!(out.body.is_var_def(), "def must stay outside the loop");
    }

    #[test]
    fn test_sinks_into_used_branch() {
        let body = Stmt::var_def(
            "t",
            cache_buf(),
            Stmt::if_then(
                Expr::load("c", vec![]),
                Stmt::seq(vec![
                    Stmt::store("t", vec![], Expr::int(1)),
                    Stmt::store("b", vec![], Expr::load("t", vec![])),
                ]),
            ),
        );
        let out = sink_var(func_of(body)).expect("pass");
        assert!(
            matches!(&out.body.kind, StmtKind::If { then_case, .. } if then_case.is_var_def()),
            "def sunk into branch"
        );
    }
}
