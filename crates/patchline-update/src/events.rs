//! Events emitted toward the presentation layer
//!
//! Every session owns one bounded FIFO channel. Senders wait when the channel
//! is full, so no event is ever dropped under backpressure. Lifecycle markers
//! (`update:progress`) pass through a monotonic gate: a status is forwarded
//! only if it is strictly greater than the last one sent in the session.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::{SessionState, UpdateSession};

pub const UPDATE_PROGRESS: &str = "update:progress";
pub const DOWNLOAD_PROGRESS: &str = "download:progress";
pub const UNPACK_PROGRESS: &str = "unpack:progress";
pub const SESSION_STATE: &str = "session:state";

/// Coarse lifecycle marker. The wire form is the ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum UpdateStatus {
    DownloadStarted = 0,
    DownloadFinished = 1,
    UnpackStarted = 2,
    UnpackFinished = 3,
    LoadOrderUpdateStarted = 4,
    LoadOrderUpdateFinished = 5,
}

impl UpdateStatus {
    pub const ALL: [UpdateStatus; 6] = [
        UpdateStatus::DownloadStarted,
        UpdateStatus::DownloadFinished,
        UpdateStatus::UnpackStarted,
        UpdateStatus::UnpackFinished,
        UpdateStatus::LoadOrderUpdateStarted,
        UpdateStatus::LoadOrderUpdateFinished,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            UpdateStatus::DownloadStarted => "download started",
            UpdateStatus::DownloadFinished => "download finished",
            UpdateStatus::UnpackStarted => "unpack started",
            UpdateStatus::UnpackFinished => "unpack finished",
            UpdateStatus::LoadOrderUpdateStarted => "load order update started",
            UpdateStatus::LoadOrderUpdateFinished => "load order update finished",
        }
    }
}

impl From<UpdateStatus> for u8 {
    fn from(status: UpdateStatus) -> Self {
        status.ordinal()
    }
}

impl TryFrom<u8> for UpdateStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        UpdateStatus::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| format!("unknown update status {}", value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProgress {
    pub status: UpdateStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub file_name: String,
    pub download_bytes: u64,
    pub percentage: f64,
    pub speed_bytes_per_sec: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpackProgress {
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// A message on the session event channel, tagged by its channel name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum Event {
    #[serde(rename = "update:progress")]
    Update(UpdateProgress),
    #[serde(rename = "download:progress")]
    Download(DownloadProgress),
    #[serde(rename = "unpack:progress")]
    Unpack(UnpackProgress),
    #[serde(rename = "session:state")]
    State(SessionTransition),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Update(_) => UPDATE_PROGRESS,
            Event::Download(_) => DOWNLOAD_PROGRESS,
            Event::Unpack(_) => UNPACK_PROGRESS,
            Event::State(_) => SESSION_STATE,
        }
    }

    pub fn status(&self) -> Option<UpdateStatus> {
        match self {
            Event::Update(progress) => Some(progress.status),
            _ => None,
        }
    }

    /// Single-line JSON form: `{"event":"unpack:progress","payload":{...}}`
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub type EventReceiver = mpsc::Receiver<Event>;

/// Create the channel for one session
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        EventSender {
            tx,
            last_status: Arc::new(Mutex::new(None)),
            session: None,
        },
        rx,
    )
}

/// Sending half of a session event channel
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
    last_status: Arc<Mutex<Option<UpdateStatus>>>,
    session: Option<UpdateSession>,
}

impl EventSender {
    /// Mirror progress counters into `session` as events are sent
    pub fn with_session(mut self, session: UpdateSession) -> Self {
        self.session = Some(session);
        self
    }

    fn record(&self, event: &Event) {
        let Some(session) = &self.session else {
            return;
        };
        match event {
            Event::Download(p) => session.record_progress(p.download_bytes, p.percentage),
            Event::Unpack(p) => session.record_progress(0, p.percentage),
            _ => {}
        }
    }

    /// Send an event, waiting for capacity
    pub async fn emit(&self, event: Event) {
        self.record(&event);
        if self.tx.send(event).await.is_err() {
            debug!("event receiver closed");
        }
    }

    /// Send an event from a blocking context, waiting for capacity
    ///
    /// Must not be called from within an async task.
    pub fn emit_blocking(&self, event: Event) {
        self.record(&event);
        if self.tx.blocking_send(event).is_err() {
            debug!("event receiver closed");
        }
    }

    /// Send a lifecycle marker unless an equal or later one was already sent.
    /// Returns whether the marker was forwarded.
    pub async fn emit_status(&self, status: UpdateStatus) -> bool {
        if !self.advance(status) {
            debug!(status = status.label(), "lifecycle marker already reported");
            return false;
        }
        self.emit(Event::Update(UpdateProgress { status })).await;
        true
    }

    pub async fn emit_transition(&self, from: SessionState, to: SessionState) {
        self.emit(Event::State(SessionTransition { from, to })).await;
    }

    fn advance(&self, status: UpdateStatus) -> bool {
        let mut last = self
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(previous) if previous >= status => false,
            _ => {
                *last = Some(status);
                true
            }
        }
    }
}
