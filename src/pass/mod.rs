//! # Pass Library
//!
//! Semantics-preserving rewrites, each a pure `Func -> Result<Func>`:
//!
//! - Cleanup: [`simplify`], [`float_simplify`], [`scalar_prop_const`],
//!   [`tensor_prop_const`], [`remove_writes`], [`remove_cyclic_assign`],
//!   [`remove_dead_var`], [`prop_one_time_use`]
//! - Scope and range narrowing: [`sink_var`], [`shrink_var`], [`shrink_for`],
//!   [`merge_and_hoist_if`], [`move_out_first_or_last_iter`]
//! - Reductions: [`make_reduction`], [`undo_make_reduction`],
//!   [`make_parallel_reduction`]
//! - Target preparation: [`use_builtin_div`], [`make_const_shape`],
//!   [`make_1d_var`], plus the [`gpu`] and [`cpu`] families
//!
//! Every pass is idempotent at its fixpoint and preserves the structural
//! invariants checked by [`crate::analyze::check`]. The fixed composition
//! applied before code generation lives in [`crate::lower`].

pub mod cpu;
pub mod gpu;

mod float_simplify;
mod make_1d_var;
mod make_const_shape;
mod make_parallel_reduction;
mod make_reduction;
mod merge_and_hoist_if;
mod move_out_first_or_last_iter;
mod prop_const;
mod prop_one_time_use;
mod remove_dead_var;
mod remove_writes;
mod shrink_for;
mod shrink_var;
mod simplify;
mod sink_var;
mod use_builtin_div;

pub use float_simplify::float_simplify;
pub use make_1d_var::make_1d_var;
pub use make_const_shape::make_const_shape;
pub use make_parallel_reduction::make_parallel_reduction;
pub use make_reduction::{make_reduction, make_reduction_stmt, undo_make_reduction};
pub use merge_and_hoist_if::merge_and_hoist_if;
pub use move_out_first_or_last_iter::move_out_first_or_last_iter;
pub use prop_const::{scalar_prop_const, tensor_prop_const};
pub use prop_one_time_use::prop_one_time_use;
pub use remove_dead_var::remove_dead_var;
pub use remove_writes::{remove_cyclic_assign, remove_writes};
pub use shrink_for::shrink_for;
pub use shrink_var::shrink_var;
pub use simplify::{simplify, simplify_stmt};
pub use sink_var::sink_var;
pub use use_builtin_div::use_builtin_div;
