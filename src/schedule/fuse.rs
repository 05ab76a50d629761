//! Loop fusion.

use crate::analyze::bounds::{prove_eq, BoundCtx};
use crate::analyze::find::find_loop;
use crate::error::{Error, Result};
use crate::ir::hash::struct_eq_expr;
use crate::ir::visit::{rebuild_stmt, subst_var, Mutator};
use crate::ir::{Expr, Func, Stmt, StmtId, StmtKind};

use super::util::collect_accesses;

/// Whether fusing would reorder communication between the bodies: an access
/// pair aliases with the first body's instance at a *later* iteration than
/// the second body's. Solved per dimension as `c·Δ = k_y - k_x` with
/// `Δ = x - y`; a representable alias with `Δ > 0` (or an unsolvable one)
/// rejects the fusion.
fn fuse_conflicts(body0: &Stmt, body1: &Stmt, iter: &str) -> bool {
    let acc0 = collect_accesses(body0);
    let acc1 = collect_accesses(body1);
    'pairs: for x in &acc0 {
        for y in &acc1 {
            if x.var != y.var || !(x.kind.writes() || y.kind.writes()) {
                continue;
            }
            if x.commutes_with(y) {
                continue;
            }
            if x.indices.len() != y.indices.len() {
                return true;
            }
            let mut delta: Option<i64> = None;
            let mut decided_no_alias = false;
            for (ix, iy) in x.indices.iter().zip(&y.indices) {
                if !ix.is_affine_in_vars() || !iy.is_affine_in_vars() {
                    return true;
                }
                let mut vars: std::collections::HashSet<&str> = std::collections::HashSet::new();
                for (_, atom) in ix.terms.values().chain(iy.terms.values()) {
                    match atom.as_var() {
                        Some(v) => {
                            vars.insert(v);
                        }
                        None => return true,
                    }
                }
                let mut c = 0;
                for v in vars {
                    let cx = ix.coeff_of_var(v);
                    let cy = iy.coeff_of_var(v);
                    if cx != cy {
                        return true;
                    }
                    if v == iter {
                        c = cx;
                    }
                }
                let k = iy.constant - ix.constant;
                if c == 0 {
                    if k != 0 {
                        decided_no_alias = true;
                        break;
                    }
                } else {
                    if k % c != 0 {
                        decided_no_alias = true;
                        break;
                    }
                    let d = k / c;
                    match delta {
                        Some(prev) if prev != d => {
                            decided_no_alias = true;
                            break;
                        }
                        _ => delta = Some(d),
                    }
                }
            }
            if decided_no_alias {
                continue 'pairs;
            }
            match delta {
                // Aliasing at every iteration pair, or at x > y
                None => return true,
                Some(d) if d > 0 => return true,
                Some(_) => {}
            }
        }
    }
    false
}

/// Fuse two adjacent loops with equal ranges into one loop running both
/// bodies. `strict` requires textually equal bounds; otherwise the bound
/// prover may establish equality.
pub(super) fn fuse(
    func: Func,
    loop0: &StmtId,
    loop1: &StmtId,
    strict: bool,
) -> Result<(Func, StmtId)> {
    find_loop(&func.body, loop0)?;
    find_loop(&func.body, loop1)?;
    let fused_id = StmtId::named(format!("fused.{loop0}.{loop1}"));
    let ret = fused_id.clone();

    struct Fuse<'a> {
        loop0: &'a StmtId,
        loop1: &'a StmtId,
        fused_id: &'a StmtId,
        strict: bool,
        fired: bool,
    }

    impl Mutator for Fuse<'_> {
        fn mutate_stmt(&mut self, stmt: Stmt) -> Result<Stmt> {
            let stmt = rebuild_stmt(self, stmt)?;
            let Stmt { id, kind } = stmt;
            if let StmtKind::StmtSeq { stmts } = kind {
                let pos0 = stmts.iter().position(|s| s.id == *self.loop0);
                if let Some(pos0) = pos0 {
                    if stmts.get(pos0 + 1).map(|s| &s.id) != Some(self.loop1) {
                        return Err(Error::schedule(format!(
                            "{} does not immediately follow {}",
                            self.loop1, self.loop0
                        )));
                    }
                    let mut stmts = stmts;
                    let second = stmts.remove(pos0 + 1);
                    let first = stmts.remove(pos0);

                    let StmtKind::For {
                        iter: iter0,
                        begin: begin0,
                        end: end0,
                        step: step0,
                        len: len0,
                        property: property0,
                        body: body0,
                    } = first.kind
                    else {
                        return Err(Error::schedule(format!("{} is not a For", self.loop0)));
                    };
                    let StmtKind::For {
                        iter: iter1,
                        begin: begin1,
                        end: end1,
                        step: step1,
                        body: body1,
                        ..
                    } = second.kind
                    else {
                        return Err(Error::schedule(format!("{} is not a For", self.loop1)));
                    };

                    let bounds_match = if self.strict {
                        struct_eq_expr(&begin0, &begin1)
                            && struct_eq_expr(&end0, &end1)
                            && struct_eq_expr(&step0, &step1)
                    } else {
                        let ctx = BoundCtx::new();
                        prove_eq(&begin0, &begin1, &ctx)
                            && prove_eq(&end0, &end1, &ctx)
                            && prove_eq(&step0, &step1, &ctx)
                    };
                    if !bounds_match {
                        return Err(Error::schedule("loop bounds do not match"));
                    }

                    let fused_iter = format!("fused.{iter0}.{iter1}");
                    let body0 = subst_var(*body0, &iter0, &Expr::var(fused_iter.clone()))?;
                    let body1 = subst_var(*body1, &iter1, &Expr::var(fused_iter.clone()))?;

                    if fuse_conflicts(&body0, &body1, &fused_iter) {
                        return Err(Error::schedule(
                            "dependency between the loops prevents fusion",
                        ));
                    }

                    let fused = Stmt::new(
                        self.fused_id.clone(),
                        StmtKind::For {
                            iter: fused_iter,
                            begin: begin0,
                            end: end0,
                            step: step0,
                            len: len0,
                            property: property0,
                            body: Box::new(Stmt::seq(vec![body0, body1])),
                        },
                    );
                    stmts.insert(pos0, fused);
                    self.fired = true;
                    return Ok(Stmt::new(id, StmtKind::StmtSeq { stmts }));
                }
                return Ok(Stmt::new(id, StmtKind::StmtSeq { stmts }));
            }
            Ok(Stmt::new(id, kind))
        }
    }

    let mut pass = Fuse {
        loop0,
        loop1,
        fused_id: &fused_id,
        strict,
        fired: false,
    };
    let func = func.map_body(|body| pass.mutate_stmt(body))?;
    if !pass.fired {
        return Err(Error::schedule(format!(
            "{loop0} and {loop1} are not siblings in one statement sequence"
        )));
    }
    Ok((func, ret))
}
