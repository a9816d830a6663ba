//! Ring construction and the pickers that consume it.

mod builder;
pub mod picker;

pub use builder::{build_ring, RingEntry};
