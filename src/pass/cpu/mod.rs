//! CPU-specific lowering passes.

mod lower_parallel_reduction;

pub use lower_parallel_reduction::lower_parallel_reduction;
