//! Sibling reordering.

use crate::analyze::deps::cross_conflicts;
use crate::analyze::find::find_stmt;
use crate::error::{Error, Result};
use crate::ir::visit::{rebuild_stmt, Mutator};
use crate::ir::{Func, Stmt, StmtId, StmtKind};

/// Permute statements among the siblings of one `StmtSeq`. The listed IDs
/// must be consecutive siblings; any pair whose relative order changes must
/// be free of dependencies.
pub(super) fn swap(func: Func, order: &[StmtId]) -> Result<(Func, ())> {
    if order.is_empty() {
        return Err(Error::schedule("empty swap order"));
    }
    for id in order {
        find_stmt(&func.body, id)?;
    }

    struct Swap<'a> {
        order: &'a [StmtId],
        fired: bool,
    }

    impl Mutator for Swap<'_> {
        fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
            let stmt = rebuild_stmt(self, stmt)?;
            let Stmt { id, kind } = stmt;
            if let StmtKind::StmtSeq { stmts } = kind {
                let positions: Vec<Option<usize>> = self
                    .order
                    .iter()
                    .map(|oid| stmts.iter().position(|s| s.id == *oid))
                    .collect();
                if positions.iter().all(Option::is_some) {
                    let mut span: Vec<usize> = positions.iter().copied().flatten().collect();
                    span.sort_unstable();
                    let lo = span[0];
                    let hi = span[span.len() - 1];
                    if hi - lo + 1 != self.order.len() {
                        return Err(Error::schedule(
                            "statements to swap are not consecutive siblings",
                        ));
                    }

                    // Dependency check for every inverted pair
                    let old_pos = |oid: &StmtId| {
                        stmts
                            .iter()
                            .position(|s| s.id == *oid)
                            .unwrap_or(usize::MAX)
                    };
                    for (i, a) in self.order.iter().enumerate() {
                        // b now runs after a; if it used to run before,
                        // their order inverts
                        for b in &self.order[i + 1..] {
                            if old_pos(a) > old_pos(b) {
                                let sa = &stmts[old_pos(a)];
                                let sb = &stmts[old_pos(b)];
                                if cross_conflicts(sb, sa) {
                                    return Err(Error::schedule(format!(
                                        "dependency between {} and {} prevents swapping",
                                        sb.id, sa.id
                                    )));
                                }
                            }
                        }
                    }

                    let mut out: Vec<Stmt> = stmts[..lo].to_vec();
                    for oid in self.order {
                        out.push(stmts[old_pos(oid)].clone());
                    }
                    out.extend_from_slice(&stmts[hi + 1..]);
                    self.fired = true;
                    return Ok(Stmt::new(id, StmtKind::StmtSeq { stmts: out }));
                }
                return Ok(Stmt::new(id, StmtKind::StmtSeq { stmts }));
            }
            Ok(Stmt::new(id, kind))
        }
    }

    let mut pass = Swap {
        order,
        fired: false,
    };
    let func = func.map_body(|body| pass.mutate_stmt(body))?;
    if !pass.fired {
        return Err(Error::schedule(
            "statements to swap are not siblings of one sequence",
        ));
    }
    Ok((func, ()))
}
