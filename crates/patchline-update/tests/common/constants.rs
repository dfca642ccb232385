//! Test constants for patchline-update tests

#![allow(dead_code)]

use std::time::Duration;

/// Upper bound for any single session in tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(20);

pub const VERSION_PATH: &str = "/feed/version.txt";
pub const ARCHIVE_PATH: &str = "/feed/update.zip";
pub const CHECKSUM_PATH: &str = "/feed/update.zip.sha256";

pub const INSTALLED_VERSION: &str = "1.2.0";
pub const NEW_VERSION: &str = "1.3.0";

pub const OLD_PAYLOAD_FILE: &str = "readme.txt";
pub const OLD_PAYLOAD_CONTENT: &str = "old payload";

pub const ANCHOR_PLUGIN: &str = "Requiem for the Indifferent.esp";
