//! Update command
//!
//! Runs one session. Session events drive the progress bars, or are printed
//! one JSON object per line with `--json`. Ctrl-C requests cancellation; the
//! session stops at the next chunk or entry boundary.

use anyhow::{anyhow, Context, Result};
use indicatif::ProgressBar;
use patchline_core::RuntimeConfig;
use patchline_update::progress::human_readable_size;
use patchline_update::{Event, SessionOutcome, SessionState, UpdateOrchestrator};
use serde::Serialize;
use tracing::debug;

use crate::cli::UpdateArgs;
use crate::output;

pub async fn run(args: UpdateArgs, config: RuntimeConfig) -> Result<()> {
    let orchestrator =
        UpdateOrchestrator::from_config(config).context("Failed to set up the update pipeline")?;
    let mut run = orchestrator.start()?;

    let cancel = run.cancel_flag().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut view = ProgressView::default();
    while let Some(event) = run.next_event().await {
        if args.json {
            println!("{}", event.to_json()?);
        } else {
            view.handle(&event);
        }
    }
    view.clear();

    let outcome = run.wait().await;
    if args.json {
        println!("{}", serde_json::to_string(&OutcomeReport::from(&outcome))?);
    }
    finish(outcome, args.json)
}

fn finish(outcome: SessionOutcome, quiet: bool) -> Result<()> {
    match outcome {
        SessionOutcome::UpToDate { installed } => {
            if !quiet {
                output::success(&format!("Already up to date ({})", installed));
            }
            Ok(())
        }
        SessionOutcome::Updated { from, to } => {
            if !quiet {
                output::success(&format!("Updated from {} to {}", from, to));
            }
            Ok(())
        }
        SessionOutcome::Cancelled => {
            if !quiet {
                output::warning("Update cancelled, the previous install is unchanged");
            }
            Err(anyhow!("update cancelled"))
        }
        SessionOutcome::Failed(err) => {
            if !quiet {
                output::error(&format!("{}: {}", err.code(), err));
            }
            Err(anyhow::Error::new(err).context("Update failed"))
        }
    }
}

/// Final line of `--json` output
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutcomeReport {
    outcome: &'static str,
    state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<&SessionOutcome> for OutcomeReport {
    fn from(outcome: &SessionOutcome) -> Self {
        let (name, version) = match outcome {
            SessionOutcome::UpToDate { installed } => ("upToDate", Some(installed.to_string())),
            SessionOutcome::Updated { to, .. } => ("updated", Some(to.to_string())),
            SessionOutcome::Cancelled => ("cancelled", None),
            SessionOutcome::Failed(_) => ("failed", None),
        };
        Self {
            outcome: name,
            state: outcome.final_state(),
            version,
            error: outcome.error().map(|e| e.code()),
            message: outcome.error().map(|e| e.to_string()),
        }
    }
}

/// Terminal rendering of session events
#[derive(Default)]
struct ProgressView {
    checking: Option<ProgressBar>,
    bar: Option<ProgressBar>,
}

impl ProgressView {
    fn handle(&mut self, event: &Event) {
        match event {
            Event::State(transition) => self.enter(transition.from, transition.to),
            Event::Download(progress) => {
                if let Some(bar) = &self.bar {
                    bar.set_position(progress.percentage.round() as u64);
                    bar.set_message(format!(
                        "{} ({}/s)",
                        human_readable_size(progress.download_bytes),
                        human_readable_size(progress.speed_bytes_per_sec)
                    ));
                }
            }
            Event::Unpack(progress) => {
                if let Some(bar) = &self.bar {
                    bar.set_position(progress.percentage.round() as u64);
                }
            }
            Event::Update(progress) => debug!(status = progress.status.label(), "lifecycle"),
        }
    }

    fn enter(&mut self, from: SessionState, to: SessionState) {
        if let Some(spinner) = self.checking.take() {
            spinner.finish_and_clear();
        }
        if let Some(bar) = self.bar.take() {
            if to == SessionState::Failed {
                bar.abandon();
            } else {
                bar.finish();
            }
        }

        match to {
            SessionState::CheckingVersion => {
                self.checking = Some(output::spinner("Checking for updates..."));
            }
            SessionState::Downloading => {
                if from == SessionState::Unpacking {
                    output::warning("Archive was damaged, downloading it again");
                }
                self.bar = Some(output::stage_bar("Downloading"));
            }
            SessionState::Unpacking => self.bar = Some(output::stage_bar("Unpacking")),
            SessionState::UpdatingLoadOrder => output::info("Updating load order"),
            _ => {}
        }
    }

    fn clear(&mut self) {
        if let Some(spinner) = self.checking.take() {
            spinner.finish_and_clear();
        }
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }
}
