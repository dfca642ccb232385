//! # patchline-core
//!
//! Core library for patchline providing:
//! - Runtime configuration types and the hierarchical loader
//! - Cooperative cancellation flags shared by long-running operations
//! - Retry execution engine with policy-based configuration

pub mod cancel;
pub mod config;
pub mod error;
pub mod retry;
pub mod types;
pub mod utils;

pub use cancel::CancelFlag;
pub use config::HierarchicalConfigLoader;
pub use error::{Error, Result};
pub use types::RuntimeConfig;
pub use utils::get_home_dir;
