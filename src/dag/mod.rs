// src/dag/mod.rs

//! Dependency structures.
//!
//! - [`DependencyIndex`] keeps the dependency relation between stored jobs.
//! - [`JobGraph`] describes a batch of new jobs wired together by name.

pub mod batch;
pub mod index;

pub use batch::JobGraph;
pub use index::DependencyIndex;
