//! Statement movement.
//!
//! `move_to` walks a statement toward a destination one structural step at
//! a time: swapping with siblings, hoisting out of `VarDef` / branch-only
//! `If` / `Assert` / `Assume` wrappers, and fissioning any loop in the way
//! (after which the surviving half-loop becomes the moving unit). Every step
//! re-checks legality; the first impossible step aborts the whole move and
//! the façade restores the untouched tree.

use crate::analyze::access::uses_name;
use crate::analyze::deps::cross_conflicts;
use crate::analyze::find::{ancestors, find_stmt, is_ancestor};
use crate::error::{Error, Result};
use crate::ir::{Func, Stmt, StmtId, StmtKind};

use super::fission::{fission, FissionSide};
use super::swap::swap;
use super::util::rewrite_at;

/// Where the moved statement lands relative to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveToSide {
    Before,
    After,
}

/// One structural step; the moving unit's ID changes when a loop is
/// fissioned around it.
enum Step {
    Done(Func),
    Continue(Func, StmtId),
}

const MAX_STEPS: usize = 100;

/// Whether `candidate` precedes `reference` in pre-order.
fn precedes(root: &Stmt, candidate: &StmtId, reference: &StmtId) -> Result<bool> {
    let mut seen_candidate = false;
    let mut before = false;
    crate::ir::visit::walk_stmt_pre(root, &mut |s| {
        if s.id == *candidate {
            seen_candidate = true;
        }
        if s.id == *reference && seen_candidate {
            before = true;
        }
    });
    if !seen_candidate {
        return Err(Error::query(format!("statement {candidate} not found")));
    }
    Ok(before)
}

fn fission_around(
    func: Func,
    loop_id: &StmtId,
    cur: &StmtId,
    toward_front: bool,
) -> Result<Step> {
    // Cut so the moving unit's half holds as little else as possible:
    // heading front, cut after it (unit lands in the first half); heading
    // back, cut before it (unit lands in the second half).
    let (func, (a, b)) = fission(
        func,
        loop_id,
        if toward_front {
            FissionSide::After
        } else {
            FissionSide::Before
        },
        cur,
        ".a",
        ".b",
    )?;
    let half = if toward_front { a.or(b) } else { b.or(a) };
    let half = half.ok_or_else(|| Error::internal("fission produced no surviving loop"))?;
    Ok(Step::Continue(func, half))
}

fn step(func: Func, cur: &StmtId, side: MoveToSide, dst: &StmtId) -> Result<Step> {
    // (a) destination encloses the moving unit: nothing left to do
    if is_ancestor(&func.body, dst, cur) {
        return Ok(Step::Done(func));
    }

    let toward_front = precedes(&func.body, dst, cur)?;
    let path = ancestors(&func.body, cur)?;
    let parent_id = path
        .last()
        .ok_or_else(|| Error::schedule("cannot move the root statement"))?
        .clone();
    let parent = find_stmt(&func.body, &parent_id)?.clone();

    match &parent.kind {
        StmtKind::StmtSeq { stmts } => {
            let pos = stmts
                .iter()
                .position(|s| s.id == *cur)
                .ok_or_else(|| Error::internal("parent does not own its child"))?;
            let neighbor = if toward_front {
                pos.checked_sub(1).map(|p| &stmts[p])
            } else {
                stmts.get(pos + 1)
            };
            let Some(neighbor) = neighbor else {
                // (c) boundary of the sequence: hoist through its wrapper
                return hoist_out(func, &parent_id, cur, toward_front);
            };
            let holds_dst = neighbor.id == *dst || find_stmt(neighbor, dst).is_ok();
            if holds_dst {
                // Sitting after the destination's subtree satisfies
                // side=After; before it, side=Before
                let settled = match side {
                    MoveToSide::After => toward_front,
                    MoveToSide::Before => !toward_front,
                };
                if settled {
                    return Ok(Step::Done(func));
                }
            }
            // (b) swap one sibling toward the destination
            let order = if toward_front {
                vec![cur.clone(), neighbor.id.clone()]
            } else {
                vec![neighbor.id.clone(), cur.clone()]
            };
            let neighbor_holds_dst = holds_dst;
            let (func, ()) = swap(func, &order)?;
            if neighbor_holds_dst {
                return Ok(Step::Done(func));
            }
            Ok(Step::Continue(func, cur.clone()))
        }
        // The moving unit is the entire body of a wrapper
        StmtKind::VarDef { .. }
        | StmtKind::If { .. }
        | StmtKind::Assert { .. }
        | StmtKind::Assume { .. } => hoist_out_of(func, &parent_id, cur, toward_front),
        // (d) a loop in the way: fission it around the moving unit
        StmtKind::For { .. } => fission_around(func, &parent_id, cur, toward_front),
        _ => Err(Error::schedule(format!(
            "cannot move out of statement {parent_id}"
        ))),
    }
}

/// Hoist `cur`, at the boundary of sequence `seq_id`, out of the wrapper
/// that owns the sequence.
fn hoist_out(func: Func, seq_id: &StmtId, cur: &StmtId, toward_front: bool) -> Result<Step> {
    let path = ancestors(&func.body, seq_id)?;
    let wrapper_id = path
        .last()
        .ok_or_else(|| Error::schedule("cannot hoist out of the root"))?
        .clone();
    let wrapper = find_stmt(&func.body, &wrapper_id)?;
    match wrapper.kind {
        StmtKind::VarDef { .. }
        | StmtKind::If { .. }
        | StmtKind::Assert { .. }
        | StmtKind::Assume { .. } => hoist_out_of(func, &wrapper_id, cur, toward_front),
        StmtKind::For { .. } => fission_around(func, &wrapper_id, cur, toward_front),
        StmtKind::StmtSeq { .. } => {
            // Nested sequences flatten logically; hoist into the outer one
            hoist_out(func, &wrapper_id, cur, toward_front)
        }
        _ => Err(Error::schedule(format!("cannot hoist out of {wrapper_id}"))),
    }
}

/// Pull `cur` out of wrapper `wrapper_id`, landing before or after it.
fn hoist_out_of(func: Func, wrapper_id: &StmtId, cur: &StmtId, before: bool) -> Result<Step> {
    let cur_stmt = find_stmt(&func.body, cur)?.clone();
    let wrapper = find_stmt(&func.body, wrapper_id)?.clone();

    let extracted = match &wrapper.kind {
        StmtKind::VarDef { name, .. } => {
            if uses_name(&cur_stmt, name) {
                return Err(Error::schedule(format!(
                    "{cur} uses \"{name}\" and cannot leave its definition"
                )));
            }
            cur_stmt.clone()
        }
        // The guard travels with the statement
        StmtKind::If {
            cond,
            else_case: None,
            ..
        } => Stmt::if_then(cond.clone(), cur_stmt.clone()),
        StmtKind::If { .. } => {
            return Err(Error::schedule(format!(
                "cannot hoist {cur} out of a two-armed If"
            )));
        }
        StmtKind::Assert { .. } | StmtKind::Assume { .. } => cur_stmt.clone(),
        _ => return Err(Error::internal("hoist_out_of on a non-wrapper")),
    };

    // The remainder of the wrapper must commute with the extracted unit
    let remainder = remove_stmt(wrapper, cur)?;
    if cross_conflicts(&extracted, &remainder) {
        return Err(Error::schedule(format!(
            "dependency prevents hoisting {cur} out of {wrapper_id}"
        )));
    }

    let new_cur = extracted.id.clone();
    let cur = cur.clone();
    let func = func.map_body(|body| {
        rewrite_at(body, wrapper_id, move |w| {
            let remainder = remove_stmt(w, &cur)?;
            let stmts = if before {
                vec![extracted, remainder]
            } else {
                vec![remainder, extracted]
            };
            Ok(Stmt::seq(stmts))
        })
    })?;
    Ok(Step::Continue(func, new_cur))
}

/// Remove statement `id` from `stmt`, leaving an empty sequence in its
/// place.
fn remove_stmt(stmt: Stmt, id: &StmtId) -> Result<Stmt> {
    rewrite_at(stmt, id, |s| {
        Ok(Stmt::fresh(StmtKind::StmtSeq { stmts: vec![] }).with_id(s.id.derived(".hole")))
    })
}

/// Move `stmt` to immediately before/after `dst`. Returns the moving unit's
/// final ID (it changes when loops were fissioned on the way).
pub(super) fn move_to(
    func: Func,
    stmt: &StmtId,
    side: MoveToSide,
    dst: &StmtId,
) -> Result<(Func, StmtId)> {
    find_stmt(&func.body, stmt)?;
    find_stmt(&func.body, dst)?;

    let mut func = func;
    let mut cur = stmt.clone();
    for _ in 0..MAX_STEPS {
        match step(func, &cur, side, dst)? {
            Step::Done(f) => return Ok((f, cur)),
            Step::Continue(f, id) => {
                func = f;
                cur = id;
            }
        }
    }
    Err(Error::schedule(format!(
        "moving {stmt} toward {dst} did not converge"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Expr;

    fn seq_func(stmts: Vec<Stmt>) -> Func {
        Func::new(
            "f",
            vec![],
            std::collections::HashMap::new(),
            Stmt::seq(stmts),
        )
    }

    fn order_of(func: &Func, ids: &[&str]) -> Vec<usize> {
        let text = func.body.pretty_print(0);
        ids.iter()
            .map(|id| text.find(&format!("# {id}")).unwrap_or(usize::MAX))
            .collect()
    }

    #[test]
    fn test_move_backward_over_independent_statements() {
        let s1 = Stmt::store("a", vec![], Expr::int(1)).with_id("s1".into());
        let s2 = Stmt::store("b", vec![], Expr::int(2)).with_id("s2".into());
        let s3 = Stmt::store("c", vec![], Expr::int(3)).with_id("s3".into());
        let func = seq_func(vec![s1, s2, s3]);
        let (func, final_id) =
            move_to(func, &"s3".into(), MoveToSide::After, &"s1".into()).expect("move");
        assert_eq!(final_id.as_str(), "s3");
        let pos = order_of(&func, &["s1", "s3", "s2"]);
        assert!(pos[0] < pos[1] && pos[1] < pos[2], "s3 right after s1");
    }

    #[test]
    fn test_move_before_destination() {
        let s1 = Stmt::store("a", vec![], Expr::int(1)).with_id("s1".into());
        let s2 = Stmt::store("b", vec![], Expr::int(2)).with_id("s2".into());
        let s3 = Stmt::store("c", vec![], Expr::int(3)).with_id("s3".into());
        let func = seq_func(vec![s1, s2, s3]);
        let (func, _) =
            move_to(func, &"s3".into(), MoveToSide::Before, &"s2".into()).expect("move");
        let pos = order_of(&func, &["s1", "s3", "s2"]);
        assert!(pos[0] < pos[1] && pos[1] < pos[2], "s3 before s2");
    }

    #[test]
    fn test_dependency_blocks_move() {
        let s1 = Stmt::store("a", vec![], Expr::int(1)).with_id("s1".into());
        let s2 = Stmt::store("b", vec![], Expr::load("a", vec![])).with_id("s2".into());
        let s3 = Stmt::store("a", vec![], Expr::int(3)).with_id("s3".into());
        let func = seq_func(vec![s1, s2, s3]);
        // s3 rewrites a; moving it above s2 (which reads a) is illegal
        assert!(move_to(func, &"s3".into(), MoveToSide::After, &"s1".into()).is_err());
    }

    #[test]
    fn test_move_out_of_loop_by_fission() {
        // for i { X[i] = i ; Y[i] = i } ; Z = 0   -- move the Y half after Z
        let x = Stmt::store("X", vec![Expr::var("i")], Expr::var("i")).with_id("sx".into());
        let y = Stmt::store("Y", vec![Expr::var("i")], Expr::var("i")).with_id("sy".into());
        let l = Stmt::for_range("i", Expr::int(0), Expr::int(8), Stmt::seq(vec![x, y]))
            .with_id("L".into());
        let z = Stmt::store("Z", vec![], Expr::int(0)).with_id("sz".into());
        let func = seq_func(vec![l, z]);
        let (func, final_id) =
            move_to(func, &"sy".into(), MoveToSide::After, &"sz".into()).expect("move");
        // The moving unit became the fissioned half-loop
        assert!(final_id.as_str().starts_with("L."), "{final_id}");
        let text = func.body.pretty_print(0);
        let z_pos = text.find("# sz").expect("z");
        let y_pos = text.find("Y[i]").expect("y");
        assert!(y_pos > z_pos, "Y half after Z: {text}");
    }
}
