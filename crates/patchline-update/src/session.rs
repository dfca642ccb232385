//! Session state machine and the single-session slot

use chrono::{DateTime, Utc};
use patchline_core::CancelFlag;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::error::{Result, UpdateError};

/// Pipeline stage of an update session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Idle,
    CheckingVersion,
    Downloading,
    Unpacking,
    UpdatingLoadOrder,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        if next == Failed {
            return !self.is_terminal() && self != Idle;
        }

        matches!(
            (self, next),
            (Idle, CheckingVersion)
                | (CheckingVersion, Idle)
                | (CheckingVersion, Downloading)
                | (Downloading, Unpacking)
                | (Unpacking, UpdatingLoadOrder)
                | (Unpacking, Downloading)
                | (UpdatingLoadOrder, Done)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::CheckingVersion => "checking version",
            SessionState::Downloading => "downloading",
            SessionState::Unpacking => "unpacking",
            SessionState::UpdatingLoadOrder => "updating load order",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
    pub remote_version: Option<String>,
    pub stage_bytes: u64,
    pub stage_percentage: f64,
    pub cancel_requested: bool,
}

#[derive(Debug)]
struct SessionData {
    id: Uuid,
    started_at: DateTime<Utc>,
    state: SessionState,
    remote_version: Option<Version>,
    stage_bytes: u64,
    stage_percentage: f64,
}

/// One run of the pipeline
///
/// Cloning yields another handle to the same session.
#[derive(Debug, Clone)]
pub struct UpdateSession {
    data: Arc<Mutex<SessionData>>,
    cancel: CancelFlag,
}

impl UpdateSession {
    fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(SessionData {
                id: Uuid::new_v4(),
                started_at: Utc::now(),
                state: SessionState::Idle,
                remote_version: None,
                stage_bytes: 0,
                stage_percentage: 0.0,
            })),
            cancel: CancelFlag::new(),
        }
    }

    fn data(&self) -> MutexGuard<'_, SessionData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.data().id
    }

    pub fn state(&self) -> SessionState {
        self.data().state
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Move to `next`, returning the previous state. Illegal moves leave the
    /// state untouched and return `None`.
    pub fn transition(&self, next: SessionState) -> Option<SessionState> {
        let mut data = self.data();
        let previous = data.state;
        if !previous.can_transition_to(next) {
            tracing::warn!(from = %previous, to = %next, "rejected illegal state transition");
            return None;
        }
        data.state = next;
        data.stage_bytes = 0;
        data.stage_percentage = 0.0;
        Some(previous)
    }

    pub fn set_remote_version(&self, version: Version) {
        self.data().remote_version = Some(version);
    }

    pub fn remote_version(&self) -> Option<Version> {
        self.data().remote_version.clone()
    }

    /// Record counters for the active sub-stage
    pub fn record_progress(&self, bytes: u64, percentage: f64) {
        let mut data = self.data();
        data.stage_bytes = bytes;
        data.stage_percentage = percentage;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let data = self.data();
        SessionSnapshot {
            id: data.id,
            started_at: data.started_at,
            state: data.state,
            remote_version: data.remote_version.as_ref().map(Version::to_string),
            stage_bytes: data.stage_bytes,
            stage_percentage: data.stage_percentage,
            cancel_requested: self.cancel.is_cancelled(),
        }
    }
}

#[derive(Debug, Default)]
struct SlotInner {
    active: Option<UpdateSession>,
    last: Option<UpdateSession>,
}

/// Holds at most one active session
///
/// `check_out` hands out a guard; the slot frees when the guard drops.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    inner: Arc<Mutex<SlotInner>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for a new session, or fail with `SessionBusy`
    pub fn check_out(&self) -> Result<SessionGuard> {
        self.claim(true)
    }

    /// Claim the slot for work that is not reported as a session. Once the
    /// guard drops, `current()` still returns the previous session.
    pub fn reserve(&self) -> Result<SessionGuard> {
        self.claim(false)
    }

    fn claim(&self, keep_as_last: bool) -> Result<SessionGuard> {
        let mut inner = self.lock();
        if inner.active.is_some() {
            return Err(UpdateError::SessionBusy);
        }
        let session = UpdateSession::new();
        inner.active = Some(session.clone());
        Ok(SessionGuard {
            slot: self.clone(),
            session,
            keep_as_last,
        })
    }

    /// The running session, if any
    pub fn active(&self) -> Option<UpdateSession> {
        self.lock().active.clone()
    }

    /// The running session, or else the most recently finished one
    pub fn current(&self) -> Option<UpdateSession> {
        let inner = self.lock();
        inner.active.clone().or_else(|| inner.last.clone())
    }

    pub fn is_busy(&self) -> bool {
        self.lock().active.is_some()
    }

    fn check_in(&self, session: &UpdateSession, keep_as_last: bool) {
        let mut inner = self.lock();
        if let Some(active) = inner.active.take() {
            if !Arc::ptr_eq(&active.data, &session.data) {
                inner.active = Some(active);
                return;
            }
        }
        if keep_as_last {
            inner.last = Some(session.clone());
        }
    }
}

/// Exclusive claim on the slot for one session
#[derive(Debug)]
pub struct SessionGuard {
    slot: SessionSlot,
    session: UpdateSession,
    keep_as_last: bool,
}

impl SessionGuard {
    pub fn session(&self) -> &UpdateSession {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.slot.check_in(&self.session, self.keep_as_last);
    }
}
