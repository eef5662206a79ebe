//! `kyc verify` — run the liveness check and submit the selfie.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use kyc_client::ApiClient;
use kyc_core::prompt::{checklist_items, gesture_message, prompt_message};
use kyc_core::DetectionStep;
use kyc_hw::Recording;

use crate::config::Config;
use crate::engine::{spawn_session, SessionError, SessionEvent, SessionReport};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Recorded landmark stream (JSON lines) standing in for the webcam.
    #[arg(long)]
    pub recording: PathBuf,
    /// Write the session report as JSON to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// How many times to re-upload the selfie after a failed submission.
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
    /// How many times to ask for the camera again after access is refused.
    #[arg(long, default_value_t = 0)]
    pub camera_retries: u32,
}

enum Next {
    Event(Option<SessionEvent>),
    Interrupt,
}

pub async fn run(config: &Config, api: Arc<ApiClient>, args: VerifyArgs) -> Result<()> {
    if !api.session().is_authenticated() {
        bail!("not logged in; run `kyc login` first");
    }

    let recording = Recording::load(&args.recording)
        .with_context(|| format!("failed to open recording {}", args.recording.display()))?;
    if recording.is_empty() {
        bail!("recording {} has no frames", args.recording.display());
    }
    tracing::debug!(frames = recording.len(), "replaying recording");
    let (camera, extractor) = recording.open_devices();

    let mut handle = spawn_session(camera, extractor, api, config.session_settings());
    tracing::info!(session_id = %handle.session_id(), "verification started");
    println!("{}", prompt_message(DetectionStep::Initial, false));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut retries_left = args.retries;
    let mut camera_retries_left = args.camera_retries;
    let mut last_failure: Option<String> = None;

    loop {
        let next = tokio::select! {
            event = handle.next_event() => Next::Event(event),
            _ = &mut ctrl_c, if !interrupted => Next::Interrupt,
        };
        let event = match next {
            Next::Interrupt => {
                interrupted = true;
                handle.cancel();
                continue;
            }
            Next::Event(None) => break,
            Next::Event(Some(event)) => event,
        };

        match event {
            SessionEvent::StepChanged(step) => println!("{}", prompt_message(step, false)),
            SessionEvent::GesturePassed(gesture) => println!("  {}", gesture_message(gesture)),
            SessionEvent::Submitting => {
                println!("{}", prompt_message(DetectionStep::LookUp, true))
            }
            SessionEvent::Submitted { .. } => println!("KYC submitted successfully!"),
            SessionEvent::SubmissionFailed { error, retryable } => {
                eprintln!("Failed to submit KYC: {error}");
                if retryable && retries_left > 0 {
                    retries_left -= 1;
                    println!("Retrying submission ({retries_left} retries left)...");
                    // The session may already have ended under the local completion policy
                    if let Err(e) = handle.retry_submission().await {
                        tracing::debug!(error = %e, "retry not accepted");
                    }
                } else {
                    handle.cancel();
                }
                last_failure = Some(error);
            }
            SessionEvent::CameraUnavailable { error } => {
                eprintln!("Camera unavailable: {error}");
                if camera_retries_left > 0 {
                    camera_retries_left -= 1;
                    println!("Retrying camera access ({camera_retries_left} retries left)...");
                    if let Err(e) = handle.retry_camera().await {
                        tracing::debug!(error = %e, "camera retry not accepted");
                    }
                } else {
                    // Let the session end with the camera error
                    break;
                }
            }
            SessionEvent::Completed => {}
        }
    }

    let report = match handle.wait().await {
        Ok(report) => report,
        Err(SessionError::Cancelled) if interrupted => bail!("verification interrupted"),
        Err(SessionError::Cancelled) => match last_failure {
            Some(error) => bail!("KYC submission failed: {error}"),
            None => bail!("verification cancelled"),
        },
        Err(e) => return Err(e).context("liveness check failed"),
    };

    print_summary(&report);
    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }

    if !report.submitted {
        bail!(
            "liveness check completed but the selfie was not accepted: {}",
            last_failure.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    println!();
    println!("KYC Verification In Progress");
    println!(
        "We've received your KYC submission. Please check your email for the verification result."
    );
    Ok(())
}

fn print_summary(report: &SessionReport) {
    println!();
    println!("Liveness Check ({})", report.session_id);
    for item in checklist_items(&report.checklist) {
        let mark = if item.done { "x" } else { " " };
        println!("  [{mark}] {}", item.label);
    }
}

fn write_report(path: &std::path::Path, report: &SessionReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    tracing::info!(path = %path.display(), "session report written");
    Ok(())
}
