//! File system helpers: traversal, exclude matching and preservation ops.

pub mod exclude;
pub mod ops;
pub mod walker;
