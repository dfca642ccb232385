//! Common test utilities for patchline-update
//!
//! This module provides shared test infrastructure including:
//! - Constants for feed paths and versions
//! - Archive builders for zip and tar.gz payloads
//! - Temporary install environments
//! - Mock update feed helpers
//! - A raw TCP responder for bodies that end early or stall
//! - Event assertion helpers

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod archives;
pub mod assertions;
pub mod constants;
pub mod fixtures;
pub mod mock_server;
pub mod raw_server;

pub use archives::*;
pub use assertions::*;
pub use constants::*;
pub use fixtures::*;
pub use mock_server::*;
pub use raw_server::*;
