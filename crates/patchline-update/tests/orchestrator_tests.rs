//! End-to-end update session tests
//!
//! Tests cover:
//! - A full update from an older installed version
//! - Up-to-date and first-run sessions
//! - Malformed remote versions
//! - Re-downloading corrupt archives within the unpack budget
//! - The single-session rule
//! - Cancellation mid-extraction
//! - Load-order failures after a successful unpack
//! - Stale part files left by an older release
//! - Checks holding the session slot
//! - Lifecycle marker and percentage ordering

mod common;

use async_trait::async_trait;
use camino::Utf8Path;
use common::*;
use patchline_core::types::OP_UNPACK;
use patchline_update::download::{part_path, part_record_path, PartRecord};
use patchline_update::{
    Event, LoadOrderUpdater, SessionOutcome, SessionState, UpdateError, UpdateOrchestrator,
    UpdateStatus,
};
use std::time::Duration;
use wiremock::MockServer;

/// Load-order stage that always rejects the payload
struct LockedProfile;

#[async_trait]
impl LoadOrderUpdater for LockedProfile {
    async fn apply(&self, _payload_dir: &Utf8Path) -> patchline_update::Result<()> {
        Err(UpdateError::apply("plugins.txt is locked by another process"))
    }
}

async fn collect(orchestrator: &UpdateOrchestrator) -> (Vec<Event>, SessionOutcome) {
    let run = orchestrator.start().unwrap();
    tokio::time::timeout(TEST_TIMEOUT, run.collect())
        .await
        .expect("session did not finish in time")
}

#[tokio::test]
async fn test_full_update_reaches_done() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(INSTALLED_VERSION);
    env.seed_install();
    env.seed_profile();
    mount_version(&server, NEW_VERSION).await;
    mount_archive(&server, new_payload()).await;

    let orchestrator = UpdateOrchestrator::builder(env.config_with_profile(&server))
        .jitter(false)
        .build()
        .unwrap();
    let (events, outcome) = collect(&orchestrator).await;

    match &outcome {
        SessionOutcome::Updated { from, to } => {
            assert_eq!(from.to_string(), INSTALLED_VERSION);
            assert_eq!(to.to_string(), NEW_VERSION);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(orchestrator.status(), SessionState::Done);
    assert_eq!(env.local_version().as_deref(), Some(NEW_VERSION));
    assert_eq!(env.read("payload/readme.txt"), "new payload");
    assert!(!env.archive_path().exists());
    assert!(env.leftovers().is_empty());

    assert_eq!(statuses(&events), UpdateStatus::ALL.to_vec());

    use SessionState::*;
    assert_eq!(
        transitions(&events),
        vec![
            (Idle, CheckingVersion),
            (CheckingVersion, Downloading),
            (Downloading, Unpacking),
            (Unpacking, UpdatingLoadOrder),
            (UpdatingLoadOrder, Done),
        ]
    );

    assert_bounded_monotonic(&download_percentages(&events), "download");
    assert_bounded_monotonic(&unpack_percentages(&events), "unpack");

    assert_eq!(env.read("profile/modlist.txt"), "+PATCH\n+Other Mod\n");
    assert!(env
        .read("profile/plugins.txt")
        .contains(&format!("*New.esp\n*Extra.esp\n*{}", ANCHOR_PLUGIN)));
}

#[tokio::test]
async fn test_events_are_ordered_by_stage() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    mount_version(&server, NEW_VERSION).await;
    mount_archive(&server, many_entries_payload(20)).await;

    let orchestrator = UpdateOrchestrator::builder(env.config(&server))
        .jitter(false)
        .build()
        .unwrap();
    let (events, outcome) = collect(&orchestrator).await;
    assert!(outcome.is_success());

    let position = |status: UpdateStatus| {
        events
            .iter()
            .position(|event| event.status() == Some(status))
            .unwrap()
    };
    let first_download = events
        .iter()
        .position(|e| matches!(e, Event::Download(_)))
        .unwrap();
    let last_download = events
        .iter()
        .rposition(|e| matches!(e, Event::Download(_)))
        .unwrap();
    let first_unpack = events
        .iter()
        .position(|e| matches!(e, Event::Unpack(_)))
        .unwrap();
    let last_unpack = events
        .iter()
        .rposition(|e| matches!(e, Event::Unpack(_)))
        .unwrap();

    assert!(position(UpdateStatus::DownloadStarted) < first_download);
    assert!(last_download < position(UpdateStatus::DownloadFinished));
    assert!(position(UpdateStatus::UnpackStarted) < first_unpack);
    assert!(last_unpack < position(UpdateStatus::UnpackFinished));
}

#[tokio::test]
async fn test_first_run_installs_over_nothing() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    mount_version(&server, NEW_VERSION).await;
    mount_archive(&server, new_payload()).await;

    let orchestrator = UpdateOrchestrator::builder(env.config(&server))
        .jitter(false)
        .build()
        .unwrap();
    let (_, outcome) = collect(&orchestrator).await;

    match outcome {
        SessionOutcome::Updated { from, .. } => assert!(from.is_unknown()),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(env.local_version().as_deref(), Some(NEW_VERSION));
    assert_eq!(env.read("payload/plugins/New.esp"), "plugin bytes");
}

#[tokio::test]
async fn test_up_to_date_returns_to_idle() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(NEW_VERSION);
    env.seed_install();
    mount_version(&server, NEW_VERSION).await;
    mount_archive(&server, new_payload()).await;

    let orchestrator = UpdateOrchestrator::builder(env.config(&server))
        .jitter(false)
        .build()
        .unwrap();
    let (events, outcome) = collect(&orchestrator).await;

    assert!(matches!(outcome, SessionOutcome::UpToDate { .. }));
    assert_eq!(orchestrator.status(), SessionState::Idle);
    assert!(statuses(&events).is_empty());
    assert_eq!(requests_to(&server, ARCHIVE_PATH).await, 0);
    assert_eq!(env.read(format!("payload/{}", OLD_PAYLOAD_FILE)), OLD_PAYLOAD_CONTENT);
}

#[tokio::test]
async fn test_malformed_remote_version_fails() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(INSTALLED_VERSION);
    mount_version(&server, "not-a-version").await;

    let orchestrator = UpdateOrchestrator::builder(env.config(&server))
        .jitter(false)
        .build()
        .unwrap();
    let (events, outcome) = collect(&orchestrator).await;

    let err = outcome.error().expect("session should fail");
    assert_eq!(err.code(), "FormatError");
    assert_eq!(orchestrator.status(), SessionState::Failed);
    assert_eq!(env.local_version().as_deref(), Some(INSTALLED_VERSION));
    assert_eq!(
        transitions(&events),
        vec![
            (SessionState::Idle, SessionState::CheckingVersion),
            (SessionState::CheckingVersion, SessionState::Failed),
        ]
    );
}

#[tokio::test]
async fn test_corrupt_archive_is_downloaded_again() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(INSTALLED_VERSION);
    env.seed_install();
    mount_version(&server, NEW_VERSION).await;
    mount_archive_times(&server, truncated_zip(&[("readme.txt", &[3u8; 4096])]), 2).await;
    mount_archive(&server, new_payload()).await;

    let orchestrator = UpdateOrchestrator::builder(env.config(&server))
        .jitter(false)
        .build()
        .unwrap();
    let (events, outcome) = collect(&orchestrator).await;

    assert!(matches!(outcome, SessionOutcome::Updated { .. }), "{:?}", outcome);
    assert_eq!(requests_to(&server, ARCHIVE_PATH).await, 3);
    assert_eq!(env.read("payload/readme.txt"), "new payload");

    let redownloads = transitions(&events)
        .into_iter()
        .filter(|t| *t == (SessionState::Unpacking, SessionState::Downloading))
        .count();
    assert_eq!(redownloads, 2);
    assert_strictly_increasing(&statuses(&events));
    assert_eq!(statuses(&events), UpdateStatus::ALL.to_vec());
}

#[tokio::test]
async fn test_corrupt_archive_exhausts_unpack_budget() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(INSTALLED_VERSION);
    env.seed_install();
    mount_version(&server, NEW_VERSION).await;
    mount_archive(&server, b"<html>maintenance</html>".to_vec()).await;

    let orchestrator = UpdateOrchestrator::builder(env.config(&server))
        .jitter(false)
        .build()
        .unwrap();
    let (_, outcome) = collect(&orchestrator).await;

    assert!(matches!(
        outcome,
        SessionOutcome::Failed(UpdateError::CorruptArchive { .. })
    ));
    assert_eq!(requests_to(&server, ARCHIVE_PATH).await, 3);
    assert_eq!(env.local_version().as_deref(), Some(INSTALLED_VERSION));
    assert_eq!(env.read(format!("payload/{}", OLD_PAYLOAD_FILE)), OLD_PAYLOAD_CONTENT);
    assert!(env.leftovers().is_empty());
}

#[tokio::test]
async fn test_second_session_is_rejected_while_busy() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    mount_slow_version(&server, NEW_VERSION, Duration::from_secs(2)).await;
    mount_archive(&server, new_payload()).await;

    let orchestrator = UpdateOrchestrator::builder(env.config(&server))
        .jitter(false)
        .build()
        .unwrap();
    let run = orchestrator.start().unwrap();

    let err = orchestrator.start().unwrap_err();
    assert_eq!(err.code(), "SessionBusyError");
    assert!(orchestrator.is_busy());
    assert_eq!(orchestrator.snapshot().unwrap().id, run.id());

    assert!(orchestrator.cancel());
    let outcome = tokio::time::timeout(TEST_TIMEOUT, run.wait()).await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Cancelled));
    assert_eq!(orchestrator.status(), SessionState::Failed);
    assert!(!orchestrator.is_busy());

    // The slot is free again
    let next = orchestrator.start().unwrap();
    next.cancel();
    tokio::time::timeout(TEST_TIMEOUT, next.wait()).await.unwrap();
}

#[tokio::test]
async fn test_cancel_mid_unpack_keeps_old_install() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(INSTALLED_VERSION);
    env.seed_install();
    mount_version(&server, NEW_VERSION).await;
    mount_archive(&server, many_entries_payload(400)).await;

    let mut config = env.config(&server);
    config.progress.channel_capacity = 1;
    let orchestrator = UpdateOrchestrator::builder(config)
        .jitter(false)
        .build()
        .unwrap();

    let mut run = orchestrator.start().unwrap();
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(TEST_TIMEOUT, run.next_event())
            .await
            .unwrap()
            .expect("session ended before unpacking");
        let unpacking = matches!(event, Event::Unpack(_));
        seen.push(event);
        if unpacking {
            break;
        }
    }
    assert_eq!(orchestrator.status(), SessionState::Unpacking);
    assert!(run.cancel());

    let (rest, outcome) = tokio::time::timeout(TEST_TIMEOUT, run.collect()).await.unwrap();
    seen.extend(rest);

    assert!(matches!(outcome, SessionOutcome::Cancelled), "{:?}", outcome);
    assert_eq!(orchestrator.status(), SessionState::Failed);
    assert_eq!(transitions(&seen).last(), Some(&(SessionState::Unpacking, SessionState::Failed)));
    assert!(!statuses(&seen).contains(&UpdateStatus::UnpackFinished));

    assert_eq!(env.local_version().as_deref(), Some(INSTALLED_VERSION));
    assert_eq!(env.read(format!("payload/{}", OLD_PAYLOAD_FILE)), OLD_PAYLOAD_CONTENT);
    assert!(!env.install_dir().join("data").exists());
    assert!(env.leftovers().is_empty(), "leftovers: {:?}", env.leftovers());
}

#[tokio::test]
async fn test_cancel_without_session() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    let orchestrator = UpdateOrchestrator::from_config(env.config(&server)).unwrap();

    assert!(!orchestrator.cancel());
    assert_eq!(orchestrator.status(), SessionState::Idle);
    assert!(orchestrator.snapshot().is_none());
}

#[tokio::test]
async fn test_check_reports_without_installing() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(INSTALLED_VERSION);
    mount_version(&server, NEW_VERSION).await;

    let orchestrator = UpdateOrchestrator::from_config(env.config(&server)).unwrap();
    let check = orchestrator.check().await.unwrap();

    assert!(check.update_available);
    assert_eq!(check.local, INSTALLED_VERSION);
    assert_eq!(check.remote, NEW_VERSION);
    assert_eq!(env.local_version().as_deref(), Some(INSTALLED_VERSION));
    assert_eq!(requests_to(&server, ARCHIVE_PATH).await, 0);
}

#[tokio::test]
async fn test_checksum_from_feed_is_enforced() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(INSTALLED_VERSION);
    env.seed_install();
    mount_version(&server, NEW_VERSION).await;
    mount_archive(&server, new_payload()).await;
    mount_checksum(&server, &format!("{}  update.zip\n", "ab".repeat(32))).await;

    let mut config = env.config(&server);
    config.source.checksum_url = Some(format!("{}{}", server.uri(), CHECKSUM_PATH));
    let orchestrator = UpdateOrchestrator::builder(config)
        .jitter(false)
        .build()
        .unwrap();
    let (_, outcome) = collect(&orchestrator).await;

    assert_eq!(
        outcome.error().map(UpdateError::code),
        Some("ChecksumMismatchError")
    );
    assert_eq!(env.read(format!("payload/{}", OLD_PAYLOAD_FILE)), OLD_PAYLOAD_CONTENT);
}

#[tokio::test]
async fn test_load_order_failure_fails_session_without_commit() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(INSTALLED_VERSION);
    env.seed_install();
    mount_version(&server, NEW_VERSION).await;
    mount_archive(&server, new_payload()).await;

    let orchestrator = UpdateOrchestrator::builder(env.config(&server))
        .load_order(LockedProfile)
        .jitter(false)
        .build()
        .unwrap();
    let (events, outcome) = collect(&orchestrator).await;

    assert!(
        matches!(outcome, SessionOutcome::Failed(UpdateError::Apply { .. })),
        "{:?}",
        outcome
    );
    assert_eq!(orchestrator.status(), SessionState::Failed);
    assert_eq!(
        transitions(&events).last(),
        Some(&(SessionState::UpdatingLoadOrder, SessionState::Failed))
    );

    let seen = statuses(&events);
    assert!(seen.contains(&UpdateStatus::LoadOrderUpdateStarted));
    assert!(!seen.contains(&UpdateStatus::LoadOrderUpdateFinished));
    assert_eq!(env.local_version().as_deref(), Some(INSTALLED_VERSION));
}

#[tokio::test]
async fn test_stale_part_from_older_release_is_not_spliced() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(INSTALLED_VERSION);
    env.seed_install();
    mount_version(&server, NEW_VERSION).await;

    let payload = new_payload();
    let older = zip_archive(&[("readme.txt", &[1u8; 8192])]);
    let offset = older.len() / 2;
    assert!(offset < payload.len());
    mount_archive_range(&server, &payload, offset).await;
    mount_archive(&server, payload.clone()).await;

    // Half of the previous release's archive, left by a cancelled session
    let archive = env.archive_path();
    std::fs::write(part_path(&archive), &older[..offset]).unwrap();
    PartRecord {
        version: Some("1.2.5".to_string()),
        validator: None,
    }
    .store(&part_record_path(&archive))
    .unwrap();

    let mut config = env.config(&server);
    config
        .retry_policies
        .operations
        .insert(OP_UNPACK.to_string(), fast_policy(1));
    let orchestrator = UpdateOrchestrator::builder(config)
        .jitter(false)
        .build()
        .unwrap();
    let (_, outcome) = collect(&orchestrator).await;

    assert!(matches!(outcome, SessionOutcome::Updated { .. }), "{:?}", outcome);
    assert_eq!(ranged_requests_to(&server, ARCHIVE_PATH).await, 0);
    assert_eq!(requests_to(&server, ARCHIVE_PATH).await, 1);
    assert_eq!(env.local_version().as_deref(), Some(NEW_VERSION));
    assert_eq!(env.read("payload/readme.txt"), "new payload");
    assert!(!part_path(&archive).exists());
    assert!(!part_record_path(&archive).exists());
}

#[tokio::test]
async fn test_check_holds_session_slot() {
    let server = MockServer::start().await;
    let env = TestEnv::new();
    env.write_local_version(INSTALLED_VERSION);
    mount_slow_version(&server, NEW_VERSION, Duration::from_millis(500)).await;

    let orchestrator = UpdateOrchestrator::builder(env.config(&server))
        .jitter(false)
        .build()
        .unwrap();

    let checker = orchestrator.clone();
    let check = tokio::spawn(async move { checker.check().await });

    tokio::time::timeout(TEST_TIMEOUT, async {
        while !orchestrator.is_busy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("check never claimed the slot");

    let err = orchestrator.start().unwrap_err();
    assert_eq!(err.code(), "SessionBusyError");
    assert_eq!(orchestrator.check().await.unwrap_err().code(), "SessionBusyError");

    let report = tokio::time::timeout(TEST_TIMEOUT, check)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(report.update_available);
    assert_eq!(env.remote_version().as_deref(), Some(NEW_VERSION));

    assert!(!orchestrator.is_busy());
    assert_eq!(orchestrator.status(), SessionState::Idle);
    assert!(orchestrator.snapshot().is_none());
    assert_eq!(requests_to(&server, VERSION_PATH).await, 1);
}
