//! # Schedule Façade
//!
//! User-facing transformations over a function, applied one at a time:
//!
//! ```text
//! Schedule::new(func)
//!     .split / merge / reorder / fuse / fission / swap
//!     .cache / cache_reduction / set_mem_type
//!     .var_split / var_merge / var_reorder
//!     .move_to / parallelize / unroll / vectorize / as_matmul
//! ```
//!
//! Every operation validates, rewrites, and atomically replaces the held
//! AST, appending an entry to the transformation log. On failure the AST is
//! untouched and the error carries the operation's textual signature, so a
//! search driver can skip the candidate and keep going.

mod as_matmul;
mod cache;
mod fission;
mod fuse;
mod merge;
mod move_to;
mod parallelize;
mod reorder;
mod split;
mod swap;
mod util;
mod var_ops;

pub use as_matmul::MatmulLayout;
pub use fission::FissionSide;
pub use move_to::MoveToSide;
pub use var_ops::VarSplitMode;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analyze::find::{find_all, find_one, find_stmt};
use crate::error::{Error, Result};
use crate::ir::{Func, MemType, ParallelScope, Stmt, StmtId};

/// One applied transformation, as recorded in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLogEntry {
    /// Textual signature, e.g. `split(L1, factor=32, nparts=-1, shift=0)`
    pub op: String,
}

/// Mutable handle over a function plus the log of applied transformations.
#[derive(Debug, Clone)]
pub struct Schedule {
    func: Func,
    verbose: u8,
    logs: Vec<ScheduleLogEntry>,
}

impl Schedule {
    pub fn new(func: Func) -> Self {
        Schedule {
            func,
            verbose: 0,
            logs: Vec::new(),
        }
    }

    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    /// Read-only snapshot of the current AST.
    pub fn ast(&self) -> &Func {
        &self.func
    }

    /// Surrender the current AST.
    pub fn into_func(self) -> Func {
        self.func
    }

    /// Applied transformations, oldest first.
    pub fn logs(&self) -> &[ScheduleLogEntry] {
        &self.logs
    }

    /// The log as JSON, for export and replay.
    pub fn logs_json(&self) -> Result<String> {
        serde_json::to_string(&self.logs).map_err(|e| Error::internal(e.to_string()))
    }

    /// The unique statement matching `pred`.
    pub fn find(&self, pred: &dyn Fn(&Stmt) -> bool) -> Result<Stmt> {
        find_one(&self.func.body, pred).cloned()
    }

    /// All statements matching `pred`, in pre-order.
    pub fn find_all(&self, pred: &dyn Fn(&Stmt) -> bool) -> Vec<Stmt> {
        find_all(&self.func.body, pred).into_iter().cloned().collect()
    }

    /// Statement lookup by ID.
    pub fn find_id(&self, id: &StmtId) -> Result<Stmt> {
        find_stmt(&self.func.body, id).cloned()
    }

    /// Run `rewrite` on the held function; commit and log on success, leave
    /// the AST untouched on failure.
    fn apply<R>(
        &mut self,
        sig: String,
        rewrite: impl FnOnce(Func) -> Result<(Func, R)>,
    ) -> Result<R> {
        match rewrite(self.func.clone()) {
            Ok((func, ret)) => {
                if self.verbose > 0 {
                    info!(op = %sig, "schedule applied");
                }
                self.func = func;
                self.logs.push(ScheduleLogEntry { op: sig });
                Ok(ret)
            }
            Err(e) => Err(e.with_op(&sig)),
        }
    }

    /// Split a loop into two nested loops whose lengths multiply to the
    /// original range. Returns `(outer, inner)` loop IDs.
    pub fn split(
        &mut self,
        id: &StmtId,
        factor: Option<i64>,
        nparts: Option<i64>,
        shift: i64,
    ) -> Result<(StmtId, StmtId)> {
        let sig = format!(
            "split({id}, factor={}, nparts={}, shift={shift})",
            factor.map_or(-1, |v| v),
            nparts.map_or(-1, |v| v)
        );
        self.apply(sig, |f| split::split(f, id, factor, nparts, shift))
    }

    /// Transpose a perfectly nested set of loops into the given order.
    pub fn reorder(&mut self, order: &[StmtId]) -> Result<()> {
        let names: Vec<String> = order.iter().map(ToString::to_string).collect();
        let sig = format!("reorder([{}])", names.join(", "));
        self.apply(sig, |f| reorder::reorder(f, order))
    }

    /// Merge two perfectly nested loops into one over the product range.
    /// Returns the merged loop's ID.
    pub fn merge(&mut self, loop1: &StmtId, loop2: &StmtId) -> Result<StmtId> {
        let sig = format!("merge({loop1}, {loop2})");
        self.apply(sig, |f| merge::merge(f, loop1, loop2))
    }

    /// Split a loop's body at `splitter` into two consecutive loops.
    /// Returns the IDs of the two halves (either may be absent when the
    /// split lands at a body boundary).
    pub fn fission(
        &mut self,
        loop_id: &StmtId,
        side: FissionSide,
        splitter: &StmtId,
        suffix0: &str,
        suffix1: &str,
    ) -> Result<(Option<StmtId>, Option<StmtId>)> {
        let sig = format!("fission({loop_id}, {side:?}, {splitter}, \"{suffix0}\", \"{suffix1}\")");
        self.apply(sig, |f| {
            fission::fission(f, loop_id, side, splitter, suffix0, suffix1)
        })
    }

    /// Fuse two adjacent loops with equal ranges into one. Returns the
    /// fused loop's ID.
    pub fn fuse(&mut self, loop0: &StmtId, loop1: &StmtId, strict: bool) -> Result<StmtId> {
        let sig = format!("fuse({loop0}, {loop1}, strict={strict})");
        self.apply(sig, |f| fuse::fuse(f, loop0, loop1, strict))
    }

    /// Reorder statements among the siblings of one `StmtSeq`.
    pub fn swap(&mut self, order: &[StmtId]) -> Result<()> {
        let names: Vec<String> = order.iter().map(ToString::to_string).collect();
        let sig = format!("swap([{}])", names.join(", "));
        self.apply(sig, |f| swap::swap(f, order))
    }

    /// Stage accesses to `var` within `stmt` through a new buffer of
    /// `mtype`. Returns `(fill, flush, cache_var, cache_def)`.
    pub fn cache(
        &mut self,
        stmt: &StmtId,
        var: &str,
        mtype: MemType,
    ) -> Result<(StmtId, StmtId, String, StmtId)> {
        let sig = format!("cache({stmt}, {var}, {mtype:?})");
        self.apply(sig, |f| cache::cache(f, stmt, var, mtype, false))
    }

    /// Like [`Schedule::cache`], but for reduction targets: the buffer
    /// starts at the operator's neutral element and flushes by reducing.
    pub fn cache_reduction(
        &mut self,
        stmt: &StmtId,
        var: &str,
        mtype: MemType,
    ) -> Result<(StmtId, StmtId, String, StmtId)> {
        let sig = format!("cache_reduction({stmt}, {var}, {mtype:?})");
        self.apply(sig, |f| cache::cache(f, stmt, var, mtype, true))
    }

    /// Change where a cache variable lives.
    pub fn set_mem_type(&mut self, def: &StmtId, mtype: MemType) -> Result<()> {
        let sig = format!("set_mem_type({def}, {mtype:?})");
        self.apply(sig, |f| var_ops::set_mem_type(f, def, mtype))
    }

    /// Split one axis of a variable into two.
    pub fn var_split(
        &mut self,
        def: &StmtId,
        dim: usize,
        mode: VarSplitMode,
        factor: Option<i64>,
        nparts: Option<i64>,
    ) -> Result<()> {
        let sig = format!(
            "var_split({def}, {dim}, {mode:?}, factor={}, nparts={})",
            factor.map_or(-1, |v| v),
            nparts.map_or(-1, |v| v)
        );
        self.apply(sig, |f| var_ops::var_split(f, def, dim, mode, factor, nparts))
    }

    /// Merge axes `dim` and `dim + 1` of a variable.
    pub fn var_merge(&mut self, def: &StmtId, dim: usize) -> Result<()> {
        let sig = format!("var_merge({def}, {dim})");
        self.apply(sig, |f| var_ops::var_merge(f, def, dim))
    }

    /// Permute the axes of a variable.
    pub fn var_reorder(&mut self, def: &StmtId, order: &[usize]) -> Result<()> {
        let sig = format!("var_reorder({def}, {order:?})");
        self.apply(sig, |f| var_ops::var_reorder(f, def, order))
    }

    /// Move a statement to immediately before/after `dst` using swaps and
    /// fissions.
    pub fn move_to(&mut self, stmt: &StmtId, side: MoveToSide, dst: &StmtId) -> Result<StmtId> {
        let sig = format!("move_to({stmt}, {side:?}, {dst})");
        self.apply(sig, |f| move_to::move_to(f, stmt, side, dst))
    }

    /// Bind a loop to a parallel execution scope.
    pub fn parallelize(&mut self, loop_id: &StmtId, scope: ParallelScope) -> Result<()> {
        let sig = format!("parallelize({loop_id}, {scope:?})");
        self.apply(sig, |f| parallelize::parallelize(f, loop_id, scope))
    }

    /// Mark a loop for unrolling; `immediate` expands it in the IR now.
    pub fn unroll(&mut self, loop_id: &StmtId, immediate: bool) -> Result<()> {
        let sig = format!("unroll({loop_id}, immediate={immediate})");
        self.apply(sig, |f| parallelize::unroll(f, loop_id, immediate))
    }

    /// Mark a loop for SIMD/warp lowering; its length must be provably
    /// divisible by a supported vector width.
    pub fn vectorize(&mut self, loop_id: &StmtId) -> Result<()> {
        let sig = format!("vectorize({loop_id})");
        self.apply(sig, |f| parallelize::vectorize(f, loop_id))
    }

    /// Recognize a loop nest as a matrix multiplication and replace it with
    /// a single library-call intrinsic.
    pub fn as_matmul(&mut self, loop_id: &StmtId) -> Result<()> {
        let sig = format!("as_matmul({loop_id})");
        self.apply(sig, |f| as_matmul::as_matmul(f, loop_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AccessType, Buffer, DataType, Expr, Tensor};

    fn simple_func() -> Func {
        let body = Stmt::for_range(
            "i",
            Expr::int(0),
            Expr::int(1024),
            Stmt::store(
                "a",
                vec![Expr::var("i")],
                Expr::add(Expr::load("a", vec![Expr::var("i")]), Expr::int(1)),
            ),
        )
        .with_id("L".into());
        Func::with_params(
            "f",
            vec![(
                "a".to_string(),
                Buffer::new(
                    Tensor::new(vec![Expr::int(1024)], DataType::Float32),
                    AccessType::InOut,
                    MemType::Cpu,
                ),
            )],
            body,
        )
    }

    #[test]
    fn test_failed_op_leaves_ast_and_log_untouched() {
        let mut s = Schedule::new(simple_func());
        let before = s.ast().clone();
        let err = s
            .split(&StmtId::named("missing"), Some(32), None, 0)
            .expect_err("unknown loop");
        assert!(matches!(err, Error::InvalidSchedule { .. }));
        assert_eq!(*s.ast(), before);
        assert!(s.logs().is_empty());
    }

    #[test]
    fn test_successful_op_appends_log() {
        let mut s = Schedule::new(simple_func());
        s.split(&"L".into(), Some(32), None, 0).expect("split");
        assert_eq!(s.logs().len(), 1);
        assert!(s.logs()[0].op.starts_with("split(L"));
        let json = s.logs_json().expect("json");
        assert!(json.contains("split(L"));
    }

    #[test]
    fn test_error_carries_signature() {
        let mut s = Schedule::new(simple_func());
        let err = s
            .split(&"L".into(), None, None, 0)
            .expect_err("no factor and no nparts");
        match err {
            Error::InvalidSchedule { op, .. } => assert!(op.starts_with("split(L")),
            other => panic!("expected InvalidSchedule, got {other:?}"),
        }
    }

    #[test]
    fn test_find_one_vs_many() {
        let s = Schedule::new(simple_func());
        assert!(s.find(&Stmt::is_for).is_ok());
        assert!(s.find(&Stmt::is_var_def).is_ok());
        assert!(s.find(&|_| true).is_err());
        assert_eq!(s.find_all(&Stmt::is_for).len(), 1);
    }
}
