//! Dependency finder.
//!
//! Given a tree and a vector of per-loop direction predicates, enumerates
//! (later, earlier) access pairs that exhibit read-after-write,
//! write-after-read or write-after-write dependencies consistent with the
//! predicate. Schedules use it negatively: `parallelize` asks for
//! dependencies carried by the loop (`Different`) and rejects if any exist.
//!
//! Independence is only ever *proved* when both indices are affine in plain
//! loop iterators and their difference pins the tested loop's iterations to
//! the same value; anything non-linear is reported as a dependence. The
//! polyhedral solver that could do better is an external collaborator.

use std::collections::{HashMap, HashSet};

use crate::ir::visit::{walk_stmt, Visitor};
use crate::ir::{Expr, ReduceOp, Stmt, StmtId, StmtKind};

use super::linear::{analyze_linear, LinearExpr};

/// Relation between the two iterations of one loop being tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepDirection {
    /// Both accesses in the same iteration
    Same,
    /// Accesses in distinct iterations
    Different,
    /// Accesses in distinct iterations, traversal order inverted
    Inv,
}

/// How a statement touches memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    /// `ReduceTo`: reads and writes its target
    Reduce,
}

impl AccessKind {
    pub fn writes(self) -> bool {
        matches!(self, AccessKind::Write | AccessKind::Reduce)
    }

    pub fn reads(self) -> bool {
        matches!(self, AccessKind::Read | AccessKind::Reduce)
    }
}

/// Classification of a (later, earlier) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    /// later reads what earlier wrote
    Raw,
    /// later writes what earlier read
    War,
    /// both write
    Waw,
}

/// One access site with enough context to reason about aliasing.
#[derive(Debug, Clone)]
pub struct Access {
    pub stmt_id: StmtId,
    pub var: String,
    pub kind: AccessKind,
    pub reduce_op: Option<ReduceOp>,
    /// Linear form of each index
    pub indices: Vec<LinearExpr>,
    /// IDs of enclosing loops, outermost first
    pub loops: Vec<StmtId>,
    /// Pre-order position, for program-order reasoning
    pub pos: usize,
}

/// A dependency that matched one of the queried conditions.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub later: Access,
    pub earlier: Access,
    pub kind: DepKind,
    /// Index into the `conds` slice passed to [`find_deps`]
    pub cond_index: usize,
}

impl Dependency {
    /// The loop named first in the matched condition, which for the helper
    /// constructors is the loop under test.
    pub fn cause(&self) -> String {
        format!(
            "{:?} dependency between {} and {} on `{}`",
            self.kind, self.later.stmt_id, self.earlier.stmt_id, self.later.var
        )
    }
}

#[derive(Default)]
struct CollectAccesses {
    accesses: Vec<Access>,
    loop_stack: Vec<StmtId>,
    loop_iter: HashMap<StmtId, String>,
    /// Constant trip count per loop, when known
    loop_len: HashMap<StmtId, Option<i64>>,
    no_deps: HashMap<StmtId, HashSet<String>>,
    pos: usize,
}

impl CollectAccesses {
    fn push(&mut self, stmt_id: &StmtId, var: &str, kind: AccessKind, indices: &[Expr]) {
        self.push_reduce(stmt_id, var, kind, indices, None);
    }

    fn push_reduce(
        &mut self,
        stmt_id: &StmtId,
        var: &str,
        kind: AccessKind,
        indices: &[Expr],
        reduce_op: Option<ReduceOp>,
    ) {
        self.accesses.push(Access {
            stmt_id: stmt_id.clone(),
            var: var.to_string(),
            kind,
            reduce_op,
            indices: indices.iter().map(analyze_linear).collect(),
            loops: self.loop_stack.clone(),
            pos: self.pos,
        });
    }
}

impl Visitor for CollectAccesses {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        self.pos += 1;
        match &stmt.kind {
            StmtKind::For {
                iter,
                property,
                len,
                ..
            } => {
                self.loop_iter.insert(stmt.id.clone(), iter.clone());
                self.loop_len.insert(
                    stmt.id.clone(),
                    crate::analyze::linear::analyze_linear(len).as_constant(),
                );
                self.no_deps
                    .insert(stmt.id.clone(), property.no_deps.iter().cloned().collect());
                self.loop_stack.push(stmt.id.clone());
                walk_stmt(self, stmt);
                self.loop_stack.pop();
            }
            StmtKind::Store { var, indices, .. } => {
                self.push(&stmt.id, var, AccessKind::Write, indices);
                walk_stmt(self, stmt);
            }
            StmtKind::ReduceTo {
                var, indices, op, ..
            } => {
                self.push_reduce(&stmt.id, var, AccessKind::Reduce, indices, Some(*op));
                walk_stmt(self, stmt);
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Load { var, indices } = expr {
            // Loads carry no statement of their own; attribute them to the
            // position counter so program order is still meaningful.
            self.pos += 1;
            let id = StmtId::named(format!("<load@{}>", self.pos));
            self.push(&id, var, AccessKind::Read, indices);
        }
        crate::ir::visit::walk_expr(self, expr);
    }
}

/// One aliasing query: can instances of `a` and `b`, related as `cond`
/// prescribes per loop, touch the same address?
fn may_alias(
    a: &Access,
    b: &Access,
    cond: &[(StmtId, DepDirection)],
    coll: &CollectAccesses,
) -> bool {
    // Explicitly declared independent over a tested loop
    for (loop_id, dir) in cond {
        if *dir != DepDirection::Same {
            if let Some(vars) = coll.no_deps.get(loop_id) {
                if vars.contains(&a.var) {
                    return false;
                }
            }
        }
    }

    if a.indices.len() != b.indices.len() {
        return true; // rank mismatch is an invariant violation; stay safe
    }

    let diff_iters: HashSet<&str> = cond
        .iter()
        .filter(|(_, d)| *d != DepDirection::Same)
        .filter_map(|(id, _)| coll.loop_iter.get(id).map(String::as_str))
        .collect();
    let same_iters: HashSet<&str> = cond
        .iter()
        .filter(|(_, d)| *d == DepDirection::Same)
        .filter_map(|(id, _)| coll.loop_iter.get(id).map(String::as_str))
        .collect();
    // Iterators of loops enclosing either access but unlisted in the
    // condition range freely and independently.
    let free_iters: HashSet<&str> = a
        .loops
        .iter()
        .chain(b.loops.iter())
        .filter_map(|id| coll.loop_iter.get(id).map(String::as_str))
        .filter(|it| !diff_iters.contains(*it) && !same_iters.contains(*it))
        .collect();

    // Largest constant trip count among loops binding `iter`, for slack
    let len_of = |iter: &str| -> Option<i64> {
        let mut best: Option<i64> = None;
        for (id, name) in &coll.loop_iter {
            if name == iter {
                match coll.loop_len.get(id).copied().flatten() {
                    Some(n) => best = Some(best.map_or(n, |b: i64| b.max(n))),
                    None => return None,
                }
            }
        }
        best
    };

    'dims: for (ia, ib) in a.indices.iter().zip(&b.indices) {
        if !ia.is_affine_in_vars() || !ib.is_affine_in_vars() {
            continue; // opaque atom: cannot prove anything from this dim
        }
        let mut vars: HashSet<&str> = HashSet::new();
        for (_, atom) in ia.terms.values().chain(ib.terms.values()) {
            if let Some(v) = atom.as_var() {
                vars.insert(v);
            }
        }
        let mut carried: Vec<i64> = Vec::new();
        // Worst-case magnitude free iterators can contribute to the address
        // difference, bounded by their trip counts
        let mut slack: i64 = 0;
        for v in &vars {
            let ca = ia.coeff_of_var(v);
            let cb = ib.coeff_of_var(v);
            if diff_iters.contains(v) {
                if ca != cb {
                    continue 'dims; // coupled to absolute iteration counts
                }
                carried.push(ca);
            } else if free_iters.contains(v) {
                if ca == 0 && cb == 0 {
                    continue;
                }
                let Some(len) = len_of(v) else {
                    continue 'dims; // unbounded free iterator
                };
                let span = (len - 1).max(0);
                if ca == cb {
                    slack += ca.abs() * span;
                } else {
                    slack += ca.abs() * span + cb.abs() * span;
                }
            } else {
                // Same-iteration loops and loop-invariant parameters have
                // one value on both sides.
                if ca != cb {
                    continue 'dims;
                }
            }
        }
        let delta = ia.constant - ib.constant;
        let nonzero: Vec<i64> = carried.into_iter().filter(|c| *c != 0).collect();
        match nonzero.as_slice() {
            [] => {
                if delta.abs() > slack {
                    return false; // offset beyond anything free terms reach
                }
            }
            [c] => {
                // c*Δ + free + delta = 0 needs |c*Δ| <= slack + |delta|,
                // and Δ != 0 makes |c*Δ| at least |c|
                if c.abs() > slack + delta.abs() {
                    return false;
                }
                if slack == 0 && (delta == 0 || delta % c != 0) {
                    return false;
                }
            }
            _ => {} // several carried terms; cannot prove from this dim
        }
    }
    true
}

fn classify(later: &Access, earlier: &Access) -> Option<DepKind> {
    match (earlier.kind.writes(), later.kind.writes()) {
        (true, true) => Some(DepKind::Waw),
        (true, false) => Some(DepKind::Raw),
        (false, true) => Some(DepKind::War),
        (false, false) => None,
    }
}

/// Find dependencies matching any of `conds`. Each condition is a vector of
/// `(loop id, direction)` constraints; loops absent from a condition are
/// unconstrained. `filter` prunes pairs before the aliasing test.
pub fn find_deps<F>(root: &Stmt, conds: &[Vec<(StmtId, DepDirection)>], filter: F) -> Vec<Dependency>
where
    F: Fn(&Access, &Access) -> bool,
{
    let mut coll = CollectAccesses::default();
    coll.visit_stmt(root);

    let mut found = Vec::new();
    for (cond_index, cond) in conds.iter().enumerate() {
        let carried = cond.iter().any(|(_, d)| *d != DepDirection::Same);
        for (i, a) in coll.accesses.iter().enumerate() {
            for b in &coll.accesses[..=i] {
                if a.var != b.var {
                    continue;
                }
                // Identical site only matters across iterations
                if a.pos == b.pos && !carried {
                    continue;
                }
                // Every tested loop must actually enclose both accesses
                if cond.iter().any(|(id, d)| {
                    *d != DepDirection::Same && !(a.loops.contains(id) && b.loops.contains(id))
                }) {
                    continue;
                }
                let (later, earlier) = if a.pos >= b.pos { (a, b) } else { (b, a) };
                let Some(kind) = classify(later, earlier) else {
                    continue;
                };
                if !carried && later.pos == earlier.pos {
                    continue;
                }
                if !filter(later, earlier) {
                    continue;
                }
                if may_alias(a, b, cond, &coll) {
                    found.push(Dependency {
                        later: later.clone(),
                        earlier: earlier.clone(),
                        kind,
                        cond_index,
                    });
                }
            }
        }
    }
    found
}

/// Whether reordering `a` and `b` (siblings, `a` currently first) could
/// change an observable value: some access of `a` and some access of `b`
/// touch the same variable, one of them writes, and aliasing cannot be
/// disproved. Loops inside either statement range freely; everything outer
/// is a loop-invariant parameter for both.
///
/// Reduce-reduce pairs with the same operator commute and are ignored.
pub fn cross_conflicts(a: &Stmt, b: &Stmt) -> bool {
    let mut coll_a = CollectAccesses::default();
    coll_a.visit_stmt(a);
    let mut coll_b = CollectAccesses::default();
    coll_b.visit_stmt(b);

    let mut merged = CollectAccesses::default();
    merged.loop_iter.extend(coll_a.loop_iter.clone());
    merged.loop_iter.extend(coll_b.loop_iter.clone());
    merged.loop_len.extend(coll_a.loop_len.clone());
    merged.loop_len.extend(coll_b.loop_len.clone());

    for aa in &coll_a.accesses {
        for bb in &coll_b.accesses {
            if aa.var != bb.var {
                continue;
            }
            if !(aa.kind.writes() || bb.kind.writes()) {
                continue;
            }
            if let (Some(op_a), Some(op_b)) = (aa.reduce_op, bb.reduce_op) {
                if op_a == op_b && aa.kind == AccessKind::Reduce && bb.kind == AccessKind::Reduce {
                    continue;
                }
            }
            if may_alias(aa, bb, &[], &merged) {
                return true;
            }
        }
    }
    false
}

/// Dependencies carried by `loop_id`: `Different` on it, `Same` on every
/// ancestor loop.
pub fn loop_carried_deps(root: &Stmt, loop_id: &StmtId) -> Vec<Dependency> {
    let Some(ancestors) = enclosing_loops(root, loop_id) else {
        return Vec::new();
    };
    let mut cond = vec![(loop_id.clone(), DepDirection::Different)];
    for anc in ancestors {
        cond.push((anc, DepDirection::Same));
    }
    find_deps(root, &[cond], |_, _| true)
}

/// IDs of the loops enclosing (strictly above) `loop_id`, outermost first.
pub fn enclosing_loops(root: &Stmt, loop_id: &StmtId) -> Option<Vec<StmtId>> {
    fn rec(stmt: &Stmt, target: &StmtId, stack: &mut Vec<StmtId>) -> bool {
        if stmt.id == *target {
            return true;
        }
        if let StmtKind::For { .. } = &stmt.kind {
            stack.push(stmt.id.clone());
        }
        let mut hit = false;
        walk_children(stmt, &mut |child| {
            if !hit {
                hit = rec(child, target, stack);
            }
        });
        if !hit {
            if let StmtKind::For { .. } = &stmt.kind {
                stack.pop();
            }
        }
        hit
    }
    fn walk_children(stmt: &Stmt, f: &mut impl FnMut(&Stmt)) {
        struct W<'a, F: FnMut(&Stmt)> {
            f: &'a mut F,
        }
        impl<F: FnMut(&Stmt)> Visitor for W<'_, F> {
            fn visit_stmt(&mut self, stmt: &Stmt) {
                (self.f)(stmt);
            }
        }
        walk_stmt(&mut W { f }, stmt);
    }
    let mut stack = Vec::new();
    rec(root, loop_id, &mut stack).then_some(stack)
}
