//! # Analyses
//!
//! Read-only facts derived from a tree, recomputed on demand after rewrites:
//!
//! - [`linear`] — canonical sum-of-products form `Σ kᵢ·aᵢ + c`
//! - [`bounds`] — symbolic lower/upper bound sets and constant-bound queries
//! - [`deps`] — dependency finder over per-loop direction predicates
//! - [`access`] — read/write sets and access fingerprints
//! - [`variance`] — whether an expression varies across loop iterations
//! - [`find`] — structural queries by ID or predicate
//! - [`check`] — the structural invariants every public API must preserve

pub mod access;
pub mod bounds;
pub mod check;
pub mod deps;
pub mod find;
pub mod linear;
pub mod variance;
