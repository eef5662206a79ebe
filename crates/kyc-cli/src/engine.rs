use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kyc_client::{ClientError, SelfieSubmitter};
use kyc_core::{
    Checklist, CompletionPolicy, DetectionStep, Gesture, LandmarkFrame, LivenessTracker,
    Thresholds, Transition,
};
use kyc_hw::{CameraError, ExtractorError, Frame, FrameSource, LandmarkExtractor};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("landmark extractor error: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("camera stream ended at step {0:?} before the liveness check completed")]
    SourceExhausted(DetectionStep),
    #[error("session cancelled")]
    Cancelled,
    #[error("session already finished")]
    Finished,
    #[error("session task failed: {0}")]
    Task(String),
}

/// Knobs for one liveness session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub policy: CompletionPolicy,
    pub thresholds: Thresholds,
    pub jpeg_quality: u8,
    /// Minimum spacing between processed frames; zero disables pacing.
    pub frame_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            policy: CompletionPolicy::default(),
            thresholds: Thresholds::default(),
            jpeg_quality: kyc_hw::DEFAULT_JPEG_QUALITY,
            frame_interval: Duration::ZERO,
        }
    }
}

/// Progress notifications from a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StepChanged(DetectionStep),
    GesturePassed(Gesture),
    Submitting,
    Submitted { selfie_url: Option<String> },
    /// `retryable` is false when a re-upload cannot succeed (no image, session revoked).
    SubmissionFailed { error: String, retryable: bool },
    /// The camera refused access. The session holds until
    /// [`SessionHandle::retry_camera`] or cancellation.
    CameraUnavailable { error: String },
    Completed,
}

/// Requests sent to a running session.
#[derive(Debug)]
enum SessionCommand {
    RetrySubmission,
    RetryCamera,
}

/// Outcome of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub checklist: Checklist,
    pub final_step: DetectionStep,
    pub frames_processed: u64,
    pub submitted: bool,
    pub selfie_url: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Camera and extractor, owned by the session for its whole lifetime.
///
/// Dropping the guard stops the stream and closes the extractor. This runs on
/// every exit path, including task abort and panics inside a frame step.
struct Devices<S: FrameSource, E: LandmarkExtractor> {
    source: S,
    extractor: E,
}

impl<S: FrameSource, E: LandmarkExtractor> Drop for Devices<S, E> {
    fn drop(&mut self) {
        self.source.release();
        self.extractor.close();
        tracing::debug!("capture devices released");
    }
}

/// One captured frame and the first face found in it, if any.
struct FrameStep {
    frame: Frame,
    face: Option<Vec<kyc_core::Landmark>>,
}

impl<S: FrameSource, E: LandmarkExtractor> Devices<S, E> {
    fn step(&mut self) -> Result<FrameStep, SessionError> {
        let frame = self.source.capture_frame()?;
        let face = match self.extractor.extract(&frame) {
            Ok(faces) => faces.into_iter().next(),
            Err(ExtractorError::Frame { sequence, reason }) => {
                tracing::debug!(sequence, %reason, "extraction failed, skipping frame");
                None
            }
            Err(e) => return Err(e.into()),
        };
        Ok(FrameStep { frame, face })
    }
}

/// Handle to a running liveness session.
///
/// Dropping the handle cancels the session.
pub struct SessionHandle {
    session_id: Uuid,
    cancel_tx: watch::Sender<bool>,
    commands: Option<mpsc::Sender<SessionCommand>>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    join: Option<JoinHandle<Result<SessionReport, SessionError>>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Next progress event; `None` once the session has ended.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Ask the session to re-upload the selfie after a failed submission.
    pub async fn retry_submission(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::RetrySubmission).await
    }

    /// Ask the session to try the camera again after it refused access.
    pub async fn retry_camera(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::RetryCamera).await
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        let commands = self.commands.as_ref().ok_or(SessionError::Finished)?;
        commands.send(command).await.map_err(|_| SessionError::Finished)
    }

    /// Stop the session at its next suspension point.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Wait for the session to end.
    ///
    /// No further retries can be requested once this is called. A session
    /// parked after a failed upload ends with an unsubmitted report, one
    /// parked on a refused camera ends with that camera error.
    pub async fn wait(mut self) -> Result<SessionReport, SessionError> {
        self.commands = None;
        let join = self.join.take().ok_or(SessionError::Finished)?;
        join.await.map_err(|e| SessionError::Task(e.to_string()))?
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.join.is_some() {
            let _ = self.cancel_tx.send(true);
        }
    }
}

/// Start a liveness session on the current tokio runtime.
///
/// The session owns `source` and `extractor` until it ends and releases them
/// on every exit path. Frames are processed one at a time: the next frame is
/// captured only after the previous one has been fully applied.
pub fn spawn_session<S, E>(
    source: S,
    extractor: E,
    submitter: Arc<dyn SelfieSubmitter>,
    settings: SessionSettings,
) -> SessionHandle
where
    S: FrameSource + 'static,
    E: LandmarkExtractor + 'static,
{
    let session_id = Uuid::new_v4();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let runner = Runner {
        session_id,
        tracker: LivenessTracker::new(settings.policy, settings.thresholds),
        submitter,
        settings,
        events: event_tx,
        commands: cmd_rx,
        cancel: cancel_rx,
        frames_processed: 0,
        submitted: false,
        selfie_url: None,
        pending_selfie: None,
    };
    let devices = Devices { source, extractor };

    tracing::info!(%session_id, policy = ?settings.policy, "liveness session started");
    let join = tokio::spawn(runner.run(devices));

    SessionHandle {
        session_id,
        cancel_tx,
        commands: Some(cmd_tx),
        events: event_rx,
        join: Some(join),
    }
}

struct Runner {
    session_id: Uuid,
    tracker: LivenessTracker,
    submitter: Arc<dyn SelfieSubmitter>,
    settings: SessionSettings,
    events: mpsc::UnboundedSender<SessionEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    cancel: watch::Receiver<bool>,
    frames_processed: u64,
    submitted: bool,
    selfie_url: Option<String>,
    /// JPEG kept for re-upload after a failed submission.
    pending_selfie: Option<Vec<u8>>,
}

impl Runner {
    async fn run<S, E>(mut self, devices: Devices<S, E>) -> Result<SessionReport, SessionError>
    where
        S: FrameSource + 'static,
        E: LandmarkExtractor + 'static,
    {
        let result = self.drive(devices).await;
        match &result {
            Ok(report) => tracing::info!(
                session_id = %self.session_id,
                step = ?report.final_step,
                submitted = report.submitted,
                frames = report.frames_processed,
                "liveness session finished"
            ),
            Err(e) => tracing::warn!(
                session_id = %self.session_id,
                step = ?self.tracker.step(),
                error = %e,
                "liveness session ended early"
            ),
        }
        result
    }

    async fn drive<S, E>(
        &mut self,
        mut devices: Devices<S, E>,
    ) -> Result<SessionReport, SessionError>
    where
        S: FrameSource + 'static,
        E: LandmarkExtractor + 'static,
    {
        let mut pacing = pacing(self.settings.frame_interval);

        while !self.tracker.is_complete() {
            if self.tracker.awaiting_retry() {
                // Drop the camera while nothing needs frames
                drop(devices);
                return self.wait_for_retry().await;
            }

            if let Some(interval) = pacing.as_mut() {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut self.cancel) => return Err(SessionError::Cancelled),
                    _ = interval.tick() => {}
                }
            }

            let blocking = tokio::task::spawn_blocking(move || {
                let step = devices.step();
                (devices, step)
            });
            let (returned, step) = tokio::select! {
                biased;
                // The device guard is still inside the blocking closure and
                // drops there once the in-flight capture returns.
                _ = cancelled(&mut self.cancel) => return Err(SessionError::Cancelled),
                joined = blocking => joined.map_err(|e| SessionError::Task(e.to_string()))?,
            };
            devices = returned;

            let step = match step {
                Ok(step) => step,
                Err(SessionError::Camera(CameraError::Exhausted(_))) => {
                    return Err(SessionError::SourceExhausted(self.tracker.step()));
                }
                Err(SessionError::Camera(e)) if e.is_recoverable() => {
                    self.wait_for_camera(e).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.frames_processed += 1;
            self.apply(step).await?;
        }

        Ok(self.report())
    }

    /// Feed one frame to the tracker and act on the transition.
    async fn apply(&mut self, step: FrameStep) -> Result<(), SessionError> {
        let Some(points) = step.face else {
            return Ok(());
        };
        let landmarks = match LandmarkFrame::from_points(&points) {
            Ok(l) => l,
            Err(e) => {
                tracing::debug!(
                    sequence = step.frame.sequence,
                    error = %e,
                    "invalid face mesh, skipping frame"
                );
                return Ok(());
            }
        };

        match self.tracker.observe(&landmarks) {
            Transition::None => {}
            Transition::FaceFound => self.emit(SessionEvent::StepChanged(self.tracker.step())),
            Transition::Passed(gesture) => {
                self.emit(SessionEvent::GesturePassed(gesture));
                self.emit(SessionEvent::StepChanged(self.tracker.step()));
            }
            Transition::SubmitSelfie(gesture) => {
                self.emit(SessionEvent::GesturePassed(gesture));
                self.capture_and_submit(&step.frame).await?;
            }
        }
        Ok(())
    }

    async fn capture_and_submit(&mut self, frame: &Frame) -> Result<(), SessionError> {
        match kyc_hw::encode_jpeg(frame, self.settings.jpeg_quality) {
            Ok(jpeg) => {
                self.pending_selfie = Some(jpeg.clone());
                self.upload(jpeg).await
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to capture selfie");
                self.tracker.submission_finished(false);
                self.emit(SessionEvent::SubmissionFailed {
                    error: format!("failed to capture image: {e}"),
                    retryable: false,
                });
                self.finish_if_complete();
                Ok(())
            }
        }
    }

    /// Single best-effort upload; no automatic retry.
    async fn upload(&mut self, jpeg: Vec<u8>) -> Result<(), SessionError> {
        self.emit(SessionEvent::Submitting);
        let submitter = Arc::clone(&self.submitter);

        let result = tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel) => return Err(SessionError::Cancelled),
            result = submitter.submit_selfie(jpeg) => result,
        };

        match result {
            Ok(submission) => {
                self.submitted = true;
                self.selfie_url = submission.selfie_url.clone();
                self.pending_selfie = None;
                self.tracker.submission_finished(true);
                self.emit(SessionEvent::Submitted {
                    selfie_url: submission.selfie_url,
                });
            }
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "KYC submission failed");
                self.tracker.submission_finished(false);
                self.emit(SessionEvent::SubmissionFailed {
                    error: e.to_string(),
                    retryable: !matches!(e, ClientError::Unauthorized { .. }),
                });
            }
        }
        self.finish_if_complete();
        Ok(())
    }

    /// Park until the caller asks for a re-upload or gives up.
    async fn wait_for_retry(&mut self) -> Result<SessionReport, SessionError> {
        while self.tracker.awaiting_retry() {
            let command = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return Err(SessionError::Cancelled),
                command = self.commands.recv() => command,
            };
            match command {
                Some(SessionCommand::RetryCamera) => {}
                Some(SessionCommand::RetrySubmission) => {
                    if !self.tracker.retry_submission() {
                        continue;
                    }
                    tracing::info!(session_id = %self.session_id, "retrying selfie submission");
                    match self.pending_selfie.clone() {
                        Some(jpeg) => self.upload(jpeg).await?,
                        None => {
                            self.tracker.submission_finished(false);
                            self.emit(SessionEvent::SubmissionFailed {
                                error: "no captured image to resubmit".to_string(),
                                retryable: false,
                            });
                        }
                    }
                }
                // Nobody left to ask for a retry
                None => return Ok(self.report()),
            }
        }
        Ok(self.report())
    }

    /// Park after the camera refused access until the caller retries it.
    async fn wait_for_camera(&mut self, error: CameraError) -> Result<(), SessionError> {
        tracing::warn!(session_id = %self.session_id, error = %error, "camera unavailable");
        self.emit(SessionEvent::CameraUnavailable {
            error: error.to_string(),
        });
        loop {
            let command = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return Err(SessionError::Cancelled),
                command = self.commands.recv() => command,
            };
            match command {
                Some(SessionCommand::RetryCamera) => {
                    tracing::info!(session_id = %self.session_id, "retrying camera access");
                    return Ok(());
                }
                Some(SessionCommand::RetrySubmission) => {}
                None => return Err(error.into()),
            }
        }
    }

    fn finish_if_complete(&mut self) {
        if self.tracker.is_complete() {
            self.emit(SessionEvent::StepChanged(DetectionStep::Complete));
            self.emit(SessionEvent::Completed);
        }
    }

    fn emit(&self, event: SessionEvent) {
        tracing::debug!(session_id = %self.session_id, event = ?event, "session event");
        let _ = self.events.send(event);
    }

    fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.session_id,
            checklist: self.tracker.checklist(),
            final_step: self.tracker.step(),
            frames_processed: self.frames_processed,
            submitted: self.submitted,
            selfie_url: self.selfie_url.clone(),
            completed_at: self.tracker.is_complete().then(Utc::now),
        }
    }
}

fn pacing(frame_interval: Duration) -> Option<Interval> {
    if frame_interval.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval(frame_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

/// Resolves once cancellation is requested or the handle is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
