//! Loop fission.
//!
//! Splits a loop's body at a designated statement into two loops of
//! identical bounds. A `VarDef` inside the loop whose variable is live
//! across the split is hoisted above both halves and gains one leading
//! dimension indexed by the loop iterator, so each iteration's value
//! survives into the second half.

use crate::analyze::access::uses_name;
use crate::analyze::find::{find_loop, find_stmt};
use crate::analyze::linear::analyze_linear;
use crate::error::{Error, Result};
use crate::ir::visit::{rebuild_expr, rebuild_stmt, Mutator};
use crate::ir::{Buffer, Expr, Func, Stmt, StmtId, StmtKind};

use super::util::rewrite_at;

/// Which side of the splitter the cut lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FissionSide {
    /// Cut immediately before the splitter
    Before,
    /// Cut immediately after the splitter
    After,
}

/// Peeled `VarDef` headers, innermost last.
struct PeeledDef {
    id: StmtId,
    name: String,
    buffer: Buffer,
    pinned: bool,
}

/// Peel `VarDef` wrappers down to the first non-VarDef statement.
fn peel_defs(mut stmt: Stmt, defs: &mut Vec<PeeledDef>) -> Stmt {
    loop {
        match stmt.kind {
            StmtKind::VarDef {
                name,
                buffer,
                pinned,
                body,
            } => {
                defs.push(PeeledDef {
                    id: stmt.id,
                    name,
                    buffer,
                    pinned,
                });
                stmt = *body;
            }
            other => return Stmt::new(stmt.id, other),
        }
    }
}

/// Add a leading dimension `[len]` to every access of `var`, indexed by
/// `idx`.
struct WidenVar<'a> {
    var: &'a str,
    idx: &'a Expr,
}

impl Mutator for WidenVar<'_> {
    fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
        let stmt = rebuild_stmt(self, stmt)?;
        let Stmt { id, kind } = stmt;
        let kind = match kind {
            StmtKind::Store {
                var,
                mut indices,
                expr,
            } if var == self.var => {
                indices.insert(0, self.idx.clone());
                StmtKind::Store { var, indices, expr }
            }
            StmtKind::ReduceTo {
                var,
                mut indices,
                op,
                expr,
                atomic,
            } if var == self.var => {
                indices.insert(0, self.idx.clone());
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
        let expr = rebuild_expr(self, expr)?;
        Ok(match expr {
            Expr::Load { var, mut indices } if var == self.var => {
                indices.insert(0, self.idx.clone());
                Expr::Load { var, indices }
            }
            other => other,
        })
    }
}

/// Split the loop `loop_id` at `splitter` into two loops with the given ID
/// suffixes. Returns the IDs of the surviving halves.
pub(super) fn fission(
    func: Func,
    loop_id: &StmtId,
    side: FissionSide,
    splitter: &StmtId,
    suffix0: &str,
    suffix1: &str,
) -> Result<(Func, (Option<StmtId>, Option<StmtId>))> {
    let loop_stmt = find_loop(&func.body, loop_id)?;
    find_stmt(loop_stmt, splitter)
        .map_err(|_| Error::schedule(format!("{splitter} is not inside {loop_id}")))?;

    let id0 = loop_id.derived(suffix0);
    let id1 = loop_id.derived(suffix1);
    let mut result: (Option<StmtId>, Option<StmtId>) = (None, None);

    let func = func.map_body(|body| {
        rewrite_at(body, loop_id, |stmt| {
            let StmtKind::For {
                iter,
                begin,
                end,
                step,
                len,
                property,
                body,
            } = stmt.kind
            else {
                return Err(Error::internal("find_loop returned a non-For"));
            };

            // Peel VarDef wrappers, then cut the sequence
            let mut defs = Vec::new();
            let core = peel_defs(*body, &mut defs);
            let stmts = core.into_stmts();
            let cut = stmts
                .iter()
                .position(|s| {
                    s.id == *splitter || find_stmt(s, splitter).is_ok()
                })
                .ok_or_else(|| {
                    Error::schedule(format!("{splitter} is not a direct part of the loop body"))
                })?;
            let cut = match side {
                FissionSide::Before => cut,
                FissionSide::After => cut + 1,
            };
            let (first, second): (Vec<Stmt>, Vec<Stmt>) =
                (stmts[..cut].to_vec(), stmts[cut..].to_vec());

            if first.is_empty() || second.is_empty() {
                // Nothing to split: a single loop survives with its suffix
                let (keep, suffix_id) = if first.is_empty() {
                    (second, id1.clone())
                } else {
                    (first, id0.clone())
                };
                let mut body = Stmt::seq(keep);
                for def in defs.into_iter().rev() {
                    body = Stmt::new(
                        def.id,
                        StmtKind::VarDef {
                            name: def.name,
                            buffer: def.buffer,
                            pinned: def.pinned,
                            body: Box::new(body),
                        },
                    );
                }
                result = if suffix_id == id0 {
                    (Some(suffix_id.clone()), None)
                } else {
                    (None, Some(suffix_id.clone()))
                };
                return Ok(Stmt::new(
                    suffix_id,
                    StmtKind::For {
                        iter,
                        begin,
                        end,
                        step,
                        len,
                        property,
                        body: Box::new(body),
                    },
                ));
            }

            // Decide the fate of each peeled def: used on one side only, it
            // re-wraps that side; live across the split, it hoists with one
            // extra dimension indexed by the iterator.
            let mut first = Stmt::seq(first);
            let mut second = Stmt::seq(second);
            let mut hoisted: Vec<PeeledDef> = Vec::new();
            let idx = analyze_linear(&Expr::sub(Expr::var(iter.clone()), begin.clone())).to_expr();
            for def in defs.into_iter().rev() {
                let in_first = uses_name(&first, &def.name);
                let in_second = uses_name(&second, &def.name);
                match (in_first, in_second) {
                    (true, true) => {
                        first = WidenVar {
                            var: &def.name,
                            idx: &idx,
                        }
                        .mutate_stmt(first)?;
                        second = WidenVar {
                            var: &def.name,
                            idx: &idx,
                        }
                        .mutate_stmt(second)?;
                        let PeeledDef {
                            id,
                            name,
                            mut buffer,
                            pinned,
                        } = def;
                        buffer.tensor.shape.insert(0, len.clone());
                        hoisted.push(PeeledDef {
                            id,
                            name,
                            buffer,
                            pinned,
                        });
                    }
                    (true, false) => {
                        first = Stmt::new(
                            def.id,
                            StmtKind::VarDef {
                                name: def.name,
                                buffer: def.buffer,
                                pinned: def.pinned,
                                body: Box::new(first),
                            },
                        );
                    }
                    (false, _) => {
                        second = Stmt::new(
                            def.id,
                            StmtKind::VarDef {
                                name: def.name,
                                buffer: def.buffer,
                                pinned: def.pinned,
                                body: Box::new(second),
                            },
                        );
                    }
                }
            }

            let make_loop = |id: StmtId, body: Stmt| {
                Stmt::new(
                    id,
                    StmtKind::For {
                        iter: iter.clone(),
                        begin: begin.clone(),
                        end: end.clone(),
                        step: step.clone(),
                        len: len.clone(),
                        property: property.clone(),
                        body: Box::new(body),
                    },
                )
            };
            let loop0 = make_loop(id0.clone(), first);
            let loop1 = make_loop(id1.clone(), second);
            result = (Some(id0.clone()), Some(id1.clone()));

            let mut out = Stmt::seq(vec![loop0, loop1]);
            for def in hoisted {
                out = Stmt::new(
                    def.id,
                    StmtKind::VarDef {
                        name: def.name,
                        buffer: def.buffer,
                        pinned: def.pinned,
                        body: Box::new(out),
                    },
                );
            }
            Ok(out)
        })
    })?;
    Ok((func, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessType, DataType, MemType, Tensor};

    // for i: { VarDef t: t = A[i]; B[i] = t; C[i] = t }
    fn shared_def_loop() -> (Func, StmtId) {
        let t_def = Stmt::var_def(
            "t",
            Buffer::new(
                Tensor::new(vec![], DataType::Float32),
                AccessType::Cache,
                MemType::Cpu,
            ),
            Stmt::seq(vec![
                Stmt::store("t", vec![], Expr::load("A", vec![Expr::var("i")])),
                Stmt::store("B", vec![Expr::var("i")], Expr::load("t", vec![]))
                    .with_id("storeB".into()),
                Stmt::store("C", vec![Expr::var("i")], Expr::load("t", vec![])),
            ]),
        );
        let l = Stmt::for_range("i", Expr::int(0), Expr::int(16), t_def).with_id("L".into());
        let buf = |atype| {
            Buffer::new(
                Tensor::new(vec![Expr::int(16)], DataType::Float32),
                atype,
                MemType::Cpu,
            )
        };
        let func = Func::with_params(
            "f",
            vec![
                ("A".to_string(), buf(AccessType::Input)),
                ("B".to_string(), buf(AccessType::Output)),
                ("C".to_string(), buf(AccessType::Output)),
            ],
            l,
        );
        (func, "L".into())
    }

    #[test]
    fn test_shared_def_hoisted_with_extra_dim() {
        let (func, l) = shared_def_loop();
        let (func, (a, b)) = fission(
            func,
            &l,
            FissionSide::After,
            &"storeB".into(),
            ".a",
            ".b",
        )
        .expect("fission");
        assert_eq!(a.as_deref_str(), Some("L.a"));
        assert_eq!(b.as_deref_str(), Some("L.b"));
        let text = func.body.pretty_print(0);
        assert!(text.contains("t[16]"), "hoisted widened def: {text}");
        assert!(text.contains("t[i] = A[i]"), "write widened: {text}");
        assert!(text.contains("C[i] = t[i]"), "read widened: {text}");
        // Two loops over the same range
        assert_eq!(text.matches("for i in 0..16").count(), 2);
    }

    #[test]
    fn test_one_sided_def_stays_inside() {
        let (func, l) = shared_def_loop();
        // Splitting after C leaves everything in the first half
        let (func, (a, b)) = fission(
            func,
            &l,
            FissionSide::Before,
            &"storeB".into(),
            ".a",
            ".b",
        )
        .expect("fission");
        assert!(a.is_some() && b.is_some());
        let text = func.body.pretty_print(0);
        // t crosses this split too (t is written before storeB and read at
        // storeB), so it still hoists
        assert!(text.contains("t[16]"), "{text}");
    }

    #[test]
    fn test_missing_splitter_rejected() {
        let (func, l) = shared_def_loop();
        assert!(fission(func, &l, FissionSide::After, &"ghost".into(), ".a", ".b").is_err());
    }

    trait AsDeref {
        fn as_deref_str(&self) -> Option<&str>;
    }
    impl AsDeref for Option<StmtId> {
        fn as_deref_str(&self) -> Option<&str> {
            self.as_ref().map(StmtId::as_str)
        }
    }
}
