//! # TensorLoom
//!
//! A tensor-program scheduling compiler: a high-level tensor computation
//! comes in as a typed statement tree, a catalog of loop and memory
//! transformations reshapes it (by hand or under automatic search), and a
//! fixed lowering pipeline specializes the result for a CPU or GPU emitter.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Front-end Func (statement tree + buffer table)
//!     ↓
//! [Schedule]           → split / merge / reorder / fuse / fission / swap
//!                        cache / var layout / parallelize / unroll /
//!                        vectorize / as_matmul
//!     ↓                  (each operation validated, logged, atomic)
//! [Auto-Schedule]      → evolutionary search over sketches (optional)
//!     ↓
//! [Lowering Driver]    → fixed pass pipeline + CPU/GPU branch
//!     ↓
//! Target code emitter (external)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tensorloom::{lower, Schedule, Target};
//!
//! let mut schedule = Schedule::new(func);
//! let (outer, inner) = schedule.split(&"L".into(), Some(32), None, 0)?;
//! schedule.parallelize(&outer, ParallelScope::OpenMp)?;
//! schedule.vectorize(&inner)?;
//!
//! let lowered = lower(schedule.into_func(), Some(&Target::Cpu))?;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ir` | Node vocabulary, IDs, hashing, traversal |
//! | `scope` | Name-to-definition environment for traversals |
//! | `analyze` | Linear forms, bounds, dependencies, variance, queries |
//! | `pass` | Semantics-preserving rewrites |
//! | `schedule` | User-facing transformation façade |
//! | `lower` | Fixed pass composition per target |
//! | `auto_schedule` | Sketch search with predictor/updater callbacks |
//! | `config` | Layered configuration and logging setup |

pub mod analyze;
pub mod auto_schedule;
pub mod config;
pub mod error;
pub mod ir;
pub mod lower;
pub mod pass;
pub mod schedule;
pub mod scope;
pub mod target;

// Re-export the working set most users touch
pub use auto_schedule::{AutoSchedule, Measurer, Sketch};
pub use config::Config;
pub use error::{Error, Result};
pub use ir::{
    AccessType, Buffer, DataType, Expr, Func, MemType, ParallelScope, ReduceOp, Stmt, StmtId,
    StmtKind, Tensor,
};
pub use lower::lower;
pub use schedule::Schedule;
pub use target::{Device, GpuArch, Target};
