//! Constant propagation.
//!
//! Forward dataflow over program order: a store of a constant to a location
//! with constant indices makes later loads of that exact location constant,
//! until any write that may touch the variable kills the fact. Loops kill
//! facts for everything they write (entering and leaving), `If` merges by
//! intersection, and a `VarDef` scopes its facts to its body.
//!
//! [`scalar_prop_const`] restricts itself to rank-0 variables and runs early
//! in lowering; [`tensor_prop_const`] also tracks constant-indexed tensor
//! elements and runs after scope-narrowing has exposed them.

use std::collections::HashMap;

use tracing::debug;

use crate::analyze::access::writes;
use crate::analyze::linear::analyze_linear;
use crate::error::Result;
use crate::ir::visit::{rebuild_expr, Mutator};
use crate::ir::{Expr, Func, Stmt, StmtKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Loc {
    var: String,
    indices: Vec<i64>,
}

struct PropConst {
    known: HashMap<Loc, Expr>,
    scalar_only: bool,
}

impl PropConst {
    fn kill_var(&mut self, var: &str) {
        self.known.retain(|loc, _| loc.var != var);
    }

    fn kill_written(&mut self, stmt: &Stmt) {
        for var in writes(stmt) {
            self.kill_var(&var);
        }
    }

    fn const_indices(&self, indices: &[Expr]) -> Option<Vec<i64>> {
        if self.scalar_only && !indices.is_empty() {
            return None;
        }
        indices
            .iter()
            .map(|e| analyze_linear(e).as_constant())
            .collect()
    }

    fn rewrite_expr(&mut self, expr: Expr) -> Result<Expr> {
        struct Rewrite<'a> {
            known: &'a HashMap<Loc, Expr>,
            scalar_only: bool,
        }
        impl Mutator for Rewrite<'_> {
            fn mutate_expr(&mut self, expr: Expr) -> Result<Expr> {
                let rebuilt = rebuild_expr(self, expr)?;
                if let Expr::Load { var, indices } = &rebuilt {
                    if !(self.scalar_only && !indices.is_empty()) {
                        let key: Option<Vec<i64>> = indices
                            .iter()
                            .map(|e| analyze_linear(e).as_constant())
                            .collect();
                        if let Some(indices) = key {
                            if let Some(val) = self.known.get(&Loc {
                                var: var.clone(),
                                indices,
                            }) {
                                return Ok(val.clone());
                            }
                        }
                    }
                }
                Ok(rebuilt)
            }
        }
        Rewrite {
            known: &self.known,
            scalar_only: self.scalar_only,
        }
        .mutate_expr(expr)
    }

    fn run(&mut self, stmt: Stmt) -> Result<Stmt> {
        let Stmt { id, kind } = stmt;
        let kind = match kind {
            StmtKind::StmtSeq { stmts } => StmtKind::StmtSeq {
                stmts: stmts
                    .into_iter()
                    .map(|s| self.run(s))
                    .collect::<Result<_>>()?,
            },
            StmtKind::Store { var, indices, expr } => {
                let indices: Vec<Expr> = indices
                    .into_iter()
                    .map(|e| self.rewrite_expr(e))
                    .collect::<Result<_>>()?;
                let expr = self.rewrite_expr(expr)?;
                match self.const_indices(&indices) {
                    Some(key) if expr.is_const() => {
                        // This write dominates the location: older facts for
                        // the variable stay valid only at other indices.
                        let loc = Loc {
                            var: var.clone(),
                            indices: key,
                        };
                        self.known.insert(loc, expr.clone());
                    }
                    _ => self.kill_var(&var),
                }
                StmtKind::Store { var, indices, expr }
            }
            StmtKind::ReduceTo {
                var,
                indices,
                op,
                expr,
                atomic,
            } => {
                let indices: Vec<Expr> = indices
                    .into_iter()
                    .map(|e| self.rewrite_expr(e))
                    .collect::<Result<_>>()?;
                let expr = self.rewrite_expr(expr)?;
                self.kill_var(&var);
                StmtKind::ReduceTo {
                    var,
                    indices,
                    op,
                    expr,
                    atomic,
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
                let begin = self.rewrite_expr(begin)?;
                let end = self.rewrite_expr(end)?;
                let step = self.rewrite_expr(step)?;
                let len = self.rewrite_expr(len)?;
                // Facts written in any iteration are unknown in the next one
                self.kill_written(&body);
                let body = Box::new(self.run(*body)?);
                self.kill_written(&body);
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
            StmtKind::If {
                cond,
                then_case,
                else_case,
            } => {
                let cond = self.rewrite_expr(cond)?;
                let entry = self.known.clone();
                let then_case = Box::new(self.run(*then_case)?);
                let after_then = std::mem::replace(&mut self.known, entry);
                let else_case = match else_case {
                    Some(e) => Some(Box::new(self.run(*e)?)),
                    None => None,
                };
                // Keep only facts agreed on by both paths
                self.known
                    .retain(|loc, val| after_then.get(loc) == Some(val));
                StmtKind::If {
                    cond,
                    then_case,
                    else_case,
                }
            }
            StmtKind::VarDef {
                name,
                buffer,
                pinned,
                body,
            } => {
                let body = Box::new(self.run(*body)?);
                self.kill_var(&name);
                StmtKind::VarDef {
                    name,
                    buffer,
                    pinned,
                    body,
                }
            }
            StmtKind::Assert { cond, body } => StmtKind::Assert {
                cond: self.rewrite_expr(cond)?,
                body: Box::new(self.run(*body)?),
            },
            StmtKind::Assume { cond, body } => StmtKind::Assume {
                cond: self.rewrite_expr(cond)?,
                body: Box::new(self.run(*body)?),
            },
            StmtKind::Eval { expr } => StmtKind::Eval {
                expr: self.rewrite_expr(expr)?,
            },
            StmtKind::Any => StmtKind::Any,
        };
        Ok(Stmt::new(id, kind))
    }
}

/// Propagate constants stored to scalar (rank-0) variables.
pub fn scalar_prop_const(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: scalar_prop_const");
    func.map_body(|body| {
        PropConst {
            known: HashMap::new(),
            scalar_only: true,
        }
        .run(body)
    })
}

/// Propagate constants through constant-indexed tensor elements as well.
pub fn tensor_prop_const(func: Func) -> Result<Func> {
    debug!(func = %func.name, "pass: tensor_prop_const");
    func.map_body(|body| {
        PropConst {
            known: HashMap::new(),
            scalar_only: false,
        }
        .run(body)
    })
}
