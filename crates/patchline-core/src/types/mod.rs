//! Type definitions shared across patchline crates

pub mod runtime_config;

pub use runtime_config::*;
