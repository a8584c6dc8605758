//! Default implementations of [crate::engine::Engine]

pub mod process;
