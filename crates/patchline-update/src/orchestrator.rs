//! Update session orchestration
//!
//! Drives one session through the pipeline:
//! 1. Read the local marker and fetch the remote version
//! 2. Download the archive
//! 3. Unpack it over the install directory, re-downloading a corrupt archive
//! 4. Run the load-order stage
//! 5. Commit the new local marker
//!
//! Only one session runs at a time. A second `start` while one is active
//! fails with `SessionBusy` and leaves the running session alone.

use camino::Utf8Path;
use patchline_core::retry::{calculate_delay, ClosurePredicate, RetryExecutor, TracingObserver};
use patchline_core::types::{RuntimeConfig, OP_UNPACK, OP_VERSION_CHECK};
use patchline_core::CancelFlag;
use semver::Version;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::download::{DownloadRequest, Downloader};
use crate::error::{Result, UpdateError};
use crate::events::{event_channel, Event, EventReceiver, EventSender, UpdateStatus};
use crate::fsutil::remove_file_if_exists;
use crate::load_order::{LoadOrderUpdater, NoopLoadOrderUpdater, ProfileLoadOrderUpdater};
use crate::session::{SessionSlot, SessionSnapshot, SessionState, UpdateSession};
use crate::source::{HttpSource, UpdateSource};
use crate::unpack::Unpacker;
use crate::version::{is_update_available, VersionMarker, VersionStore};

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// The installed version is current. The session returned to `Idle`.
    UpToDate { installed: VersionMarker },

    /// The new payload is installed and committed
    Updated { from: VersionMarker, to: Version },

    /// Cancellation was requested. The session ended in `Failed`.
    Cancelled,

    /// A stage failed. The session ended in `Failed`.
    Failed(UpdateError),
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SessionOutcome::UpToDate { .. } | SessionOutcome::Updated { .. }
        )
    }

    /// State the session was left in
    pub fn final_state(&self) -> SessionState {
        match self {
            SessionOutcome::UpToDate { .. } => SessionState::Idle,
            SessionOutcome::Updated { .. } => SessionState::Done,
            SessionOutcome::Cancelled | SessionOutcome::Failed(_) => SessionState::Failed,
        }
    }

    pub fn error(&self) -> Option<&UpdateError> {
        match self {
            SessionOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Result of a version check without installing anything
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheck {
    pub local: String,
    pub remote: String,
    pub update_available: bool,
}

/// A started session: its event stream and its completion handle
#[derive(Debug)]
pub struct SessionRun {
    id: Uuid,
    cancel: CancelFlag,
    events: EventReceiver,
    handle: JoinHandle<SessionOutcome>,
}

impl SessionRun {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation of this session
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Next event, or `None` once the session has finished emitting
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Wait for the session to end. Undelivered events are discarded.
    pub async fn wait(self) -> SessionOutcome {
        let SessionRun { events, handle, .. } = self;
        drop(events);
        join_outcome(handle).await
    }

    /// Drain every event, then wait for the session to end
    pub async fn collect(mut self) -> (Vec<Event>, SessionOutcome) {
        let mut seen = Vec::new();
        while let Some(event) = self.events.recv().await {
            seen.push(event);
        }
        (seen, join_outcome(self.handle).await)
    }
}

async fn join_outcome(handle: JoinHandle<SessionOutcome>) -> SessionOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => SessionOutcome::Failed(UpdateError::internal(format!(
            "session task ended abnormally: {}",
            e
        ))),
    }
}

struct Inner {
    config: RuntimeConfig,
    store: VersionStore,
    source: Arc<dyn UpdateSource>,
    downloader: Downloader,
    unpacker: Unpacker,
    load_order: Arc<dyn LoadOrderUpdater>,
    slot: SessionSlot,
    jitter: bool,
}

/// Builder for [`UpdateOrchestrator`]
pub struct OrchestratorBuilder {
    config: RuntimeConfig,
    source: Option<Arc<dyn UpdateSource>>,
    load_order: Option<Arc<dyn LoadOrderUpdater>>,
    client: Option<reqwest::Client>,
    jitter: bool,
}

impl OrchestratorBuilder {
    pub fn source(mut self, source: impl UpdateSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn load_order(mut self, updater: impl LoadOrderUpdater + 'static) -> Self {
        self.load_order = Some(Arc::new(updater));
        self
    }

    /// HTTP client for archive downloads
    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Randomize retry delays (on by default)
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn build(self) -> Result<UpdateOrchestrator> {
        let config = self.config;

        let source = match self.source {
            Some(source) => source,
            None => Arc::new(HttpSource::from_config(&config)?),
        };

        let load_order = match (self.load_order, &config.load_order.profile_dir) {
            (Some(updater), _) => updater,
            (None, Some(profile_dir)) => Arc::new(ProfileLoadOrderUpdater::new(
                config.paths.resolve(profile_dir),
                &config.load_order,
            )),
            (None, None) => Arc::new(NoopLoadOrderUpdater),
        };

        let downloader = match self.client {
            Some(client) => Downloader::with_client(client, &config),
            None => Downloader::new(&config)?,
        }
        .with_jitter(self.jitter);

        Ok(UpdateOrchestrator {
            inner: Arc::new(Inner {
                store: VersionStore::from_paths(&config.paths),
                unpacker: Unpacker::new(&config),
                source,
                downloader,
                load_order,
                slot: SessionSlot::new(),
                jitter: self.jitter,
                config,
            }),
        })
    }
}

/// Runs update sessions, one at a time
#[derive(Clone)]
pub struct UpdateOrchestrator {
    inner: Arc<Inner>,
}

impl UpdateOrchestrator {
    pub fn builder(config: RuntimeConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            source: None,
            load_order: None,
            client: None,
            jitter: true,
        }
    }

    /// Orchestrator with the HTTP source and the load-order stage the
    /// configuration describes
    pub fn from_config(config: RuntimeConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn version_store(&self) -> &VersionStore {
        &self.inner.store
    }

    /// Begin a session in the background
    ///
    /// Must be called from within a Tokio runtime. Fails with `SessionBusy`
    /// if a session is already running.
    pub fn start(&self) -> Result<SessionRun> {
        let guard = self.inner.slot.check_out()?;
        let session = guard.session().clone();
        let (events, receiver) = event_channel(self.inner.config.progress.channel_capacity);
        let events = events.with_session(session.clone());

        info!(session = %session.id(), "update session started");

        let id = session.id();
        let cancel = session.cancel_flag().clone();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = this.run_session(&session, &events).await;
            drop(guard);
            drop(events);
            outcome
        });

        Ok(SessionRun {
            id,
            cancel,
            events: receiver,
            handle,
        })
    }

    /// Request cancellation of the running session. Returns whether a
    /// session received the request.
    pub fn cancel(&self) -> bool {
        match self.inner.slot.active() {
            Some(session) => {
                info!(session = %session.id(), "cancellation requested");
                session.cancel_flag().cancel()
            }
            None => false,
        }
    }

    /// State of the running session, or of the last one to finish
    pub fn status(&self) -> SessionState {
        self.inner
            .slot
            .current()
            .map(|session| session.state())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.inner.slot.current().map(|session| session.snapshot())
    }

    pub fn is_busy(&self) -> bool {
        self.inner.slot.is_busy()
    }

    /// Compare the installed version with the feed without installing
    ///
    /// Holds the session slot while the remote marker is fetched, so a
    /// `start()` meanwhile fails with `SessionBusy` and `cancel()` aborts the
    /// check.
    pub async fn check(&self) -> Result<UpdateCheck> {
        let guard = self.inner.slot.reserve()?;
        let local = self.inner.store.read_local_version()?;
        let remote = self
            .fetch_remote_version(guard.session().cancel_flag())
            .await?;
        let update_available = is_update_available(&local, &VersionMarker::from(remote.clone()));

        Ok(UpdateCheck {
            local: local.to_string(),
            remote: remote.to_string(),
            update_available,
        })
    }

    async fn run_session(&self, session: &UpdateSession, events: &EventSender) -> SessionOutcome {
        let cancel = session.cancel_flag().clone();
        self.transition(session, events, SessionState::CheckingVersion)
            .await;

        match self.run_pipeline(session, events, &cancel).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.transition(session, events, SessionState::Failed).await;
                if err.is_cancelled() {
                    info!(session = %session.id(), "update session cancelled");
                    SessionOutcome::Cancelled
                } else {
                    error!(session = %session.id(), code = err.code(), error = %err, "update session failed");
                    SessionOutcome::Failed(err)
                }
            }
        }
    }

    async fn run_pipeline(
        &self,
        session: &UpdateSession,
        events: &EventSender,
        cancel: &CancelFlag,
    ) -> Result<SessionOutcome> {
        let inner = &self.inner;

        let local = inner.store.read_local_version()?;
        let remote = self.fetch_remote_version(cancel).await?;
        session.set_remote_version(remote.clone());

        if !is_update_available(&local, &VersionMarker::from(remote.clone())) {
            info!(installed = %local, remote = %remote, "already up to date");
            self.transition(session, events, SessionState::Idle).await;
            return Ok(SessionOutcome::UpToDate { installed: local });
        }
        info!(from = %local, to = %remote, "update available");

        let expected_sha256 = until_cancelled(cancel, inner.source.fetch_checksum()).await?;
        let archive = inner.config.paths.archive_file();
        let install_dir = inner.config.paths.install_dir();

        let remote_tag = remote.to_string();
        self.download_and_unpack(
            session,
            events,
            cancel,
            &archive,
            &install_dir,
            &remote_tag,
            expected_sha256.as_deref(),
        )
        .await?;

        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        self.transition(session, events, SessionState::UpdatingLoadOrder)
            .await;
        events
            .emit_status(UpdateStatus::LoadOrderUpdateStarted)
            .await;
        inner
            .load_order
            .apply(&install_dir)
            .await
            .map_err(as_apply_error)?;
        events
            .emit_status(UpdateStatus::LoadOrderUpdateFinished)
            .await;

        inner.store.commit_local_version(&remote)?;
        self.transition(session, events, SessionState::Done).await;

        if let Err(e) = remove_file_if_exists(&archive) {
            warn!(archive = %archive, error = %e, "could not remove downloaded archive");
        }

        info!(from = %local, to = %remote, "update installed");
        Ok(SessionOutcome::Updated {
            from: local,
            to: remote,
        })
    }

    async fn fetch_remote_version(&self, cancel: &CancelFlag) -> Result<Version> {
        let inner = &self.inner;
        let executor = RetryExecutor::new(inner.config.policy_for(OP_VERSION_CHECK))
            .with_predicate(ClosurePredicate::new(UpdateError::is_transient))
            .with_observer(TracingObserver::new(OP_VERSION_CHECK))
            .with_jitter(inner.jitter)
            .with_cancel(cancel.clone());

        let fetch = executor.execute(|| inner.store.fetch_remote_version(inner.source.as_ref()));
        until_cancelled(cancel, async { fetch.await.map_err(UpdateError::from) }).await
    }

    /// Download, then unpack. A corrupt archive is discarded and fetched
    /// again; an unpack timeout retries extraction of the same archive. Both
    /// share the `unpack` attempt budget.
    async fn download_and_unpack(
        &self,
        session: &UpdateSession,
        events: &EventSender,
        cancel: &CancelFlag,
        archive: &Utf8Path,
        install_dir: &Utf8Path,
        remote_tag: &str,
        expected_sha256: Option<&str>,
    ) -> Result<()> {
        let inner = &self.inner;
        let policy = inner.config.policy_for(OP_UNPACK);
        let max_attempts = policy.max_attempts.max(1);
        let request = DownloadRequest {
            url: inner.source.archive_url(),
            destination: archive,
            expected_sha256,
            version: Some(remote_tag),
        };

        let mut attempt = 0;
        loop {
            self.transition(session, events, SessionState::Downloading)
                .await;
            events.emit_status(UpdateStatus::DownloadStarted).await;
            inner.downloader.download(&request, events, cancel).await?;

            self.transition(session, events, SessionState::Unpacking)
                .await;
            events.emit_status(UpdateStatus::UnpackStarted).await;

            loop {
                attempt += 1;
                let err = match inner
                    .unpacker
                    .unpack(archive, install_dir, events, cancel)
                    .await
                {
                    Ok(summary) => {
                        debug!(entries = summary.entries, attempt, "payload installed");
                        return Ok(());
                    }
                    Err(err) => err,
                };

                let corrupt = matches!(err, UpdateError::CorruptArchive { .. });
                let timed_out = matches!(err, UpdateError::Timeout { .. });
                if !(corrupt || timed_out) || attempt >= max_attempts {
                    return Err(err);
                }

                let delay = calculate_delay(&policy, attempt, inner.jitter);
                warn!(
                    attempt,
                    max_attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "unpack failed, retrying"
                );
                sleep_unless_cancelled(cancel, delay).await?;

                if corrupt {
                    remove_file_if_exists(archive)?;
                    break;
                }
            }
        }
    }

    async fn transition(&self, session: &UpdateSession, events: &EventSender, next: SessionState) {
        if let Some(previous) = session.transition(next) {
            debug!(session = %session.id(), from = %previous, to = %next, "session state changed");
            events.emit_transition(previous, next).await;
        }
    }
}

/// Failures inside the load-order stage surface as `ApplyError`
fn as_apply_error(err: UpdateError) -> UpdateError {
    match err {
        UpdateError::Apply { .. } | UpdateError::Cancelled => err,
        other => UpdateError::apply(other.to_string()),
    }
}

async fn until_cancelled<T>(
    cancel: &CancelFlag,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UpdateError::Cancelled),
        result = operation => result,
    }
}

async fn sleep_unless_cancelled(cancel: &CancelFlag, delay: Duration) -> Result<()> {
    until_cancelled(cancel, async {
        tokio::time::sleep(delay).await;
        Ok(())
    })
    .await
}
