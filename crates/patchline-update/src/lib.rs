//! Update pipeline for patchline
//!
//! Provides:
//! - Local and remote version markers with lenient parsing
//! - Archive download with resume, size and checksum verification
//! - Zip and tar.gz extraction with an atomic directory swap
//! - A pluggable load-order stage for mod-manager profiles
//! - A single-session orchestrator with progress events and cancellation

mod fsutil;

pub mod download;
pub mod error;
pub mod events;
pub mod load_order;
pub mod orchestrator;
pub mod progress;
pub mod session;
pub mod source;
pub mod unpack;
pub mod version;

pub use download::{DownloadRequest, DownloadResult, Downloader};
pub use error::{Result, UpdateError};
pub use events::{
    event_channel, DownloadProgress, Event, EventReceiver, EventSender, SessionTransition,
    UnpackProgress, UpdateProgress, UpdateStatus,
};
pub use load_order::{LoadOrderUpdater, NoopLoadOrderUpdater, ProfileLoadOrderUpdater};
pub use orchestrator::{
    OrchestratorBuilder, SessionOutcome, SessionRun, UpdateCheck, UpdateOrchestrator,
};
pub use session::{SessionSlot, SessionSnapshot, SessionState, UpdateSession};
pub use source::{HttpSource, UpdateSource};
pub use unpack::{ArchiveFormat, ArchiveSummary, Unpacker};
pub use version::{is_update_available, VersionMarker, VersionStore, NO_VERSION_TOKEN};

/// Current CLI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
