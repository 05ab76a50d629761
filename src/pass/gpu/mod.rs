//! GPU-specific lowering passes.
//!
//! These run only for GPU targets, in the order fixed by
//! [`crate::lower::lower`]: parallel reductions first, then buffer
//! multiplexing/simplexing, constant shapes, thread normalization,
//! synchronization, 1-D flattening and vector lowering.

mod lower_parallel_reduction;
mod lower_vector;
mod make_sync;
mod multiplex_buffers;
mod normalize_threads;
mod simplex_buffers;

pub use lower_parallel_reduction::lower_parallel_reduction;
pub use lower_vector::lower_vector;
pub use make_sync::make_sync;
pub use multiplex_buffers::multiplex_buffers;
pub use normalize_threads::normalize_threads;
pub use simplex_buffers::simplex_buffers;
