//! Upload lifecycle: one file from selection through the gateway's
//! terminal status.
//!
//! Every mutation happens under the controller mutex and is followed by a
//! snapshot broadcast. Background work (progress ramp, status polling,
//! preview encoding) captures the session generation it was started for
//! and drops its result once a reset or a new selection has bumped it.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use shared::{
    domain::{DocumentKind, OcrStatus, RequestId},
    error::{FailureCategory, UploadFailure},
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{interval_at, sleep, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    gateway::{GatewayError, OcrGateway},
    preview::preview_data_uri,
    types::UploadFile,
    validation::validate_upload,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 200;

const PROGRESS_TICK: Duration = Duration::from_millis(200);
const PROGRESS_STEP: u8 = 5;
const PROGRESS_CAP_BEFORE_RESPONSE: u8 = 95;
const PROGRESS_DONE: u8 = 100;

const UPLOAD_FAILED_FALLBACK: &str = "Upload failed. Please try again.";
const MISSING_REQUEST_ID: &str = "Upload failed: gateway returned no request id";
const PROCESSING_FAILED: &str = "Processing failed. Please try again.";
const STATUS_CHECK_FAILED: &str = "Error checking status. Please try again later.";
const POLL_BUDGET_EXHAUSTED: &str =
    "Processing is taking longer than expected. Please check the request history later.";

/// How often the status endpoint is queried and for how long.
/// `max_attempts: None` polls until the gateway reports a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: Some(DEFAULT_MAX_POLL_ATTEMPTS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    #[default]
    Idle,
    Selected,
    Uploading,
    Processing,
    Completed,
    Error,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Selected => "selected",
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Read-only view of the controller handed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadSnapshot {
    pub generation: u64,
    pub state: UploadState,
    pub kind: DocumentKind,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub media_type: Option<String>,
    #[serde(skip)]
    pub preview: Option<String>,
    pub request_id: Option<RequestId>,
    pub storage_path: Option<String>,
    pub progress: u8,
    pub gateway_status: Option<OcrStatus>,
    pub message: Option<String>,
    pub poll_attempts: u32,
    pub failure: Option<UploadFailure>,
}

impl UploadSnapshot {
    pub fn has_session(&self) -> bool {
        self.file_name.is_some()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.failure.as_ref().map(UploadFailure::message)
    }
}

struct Session {
    file: UploadFile,
    state: UploadState,
    preview: Option<String>,
    request_id: Option<RequestId>,
    storage_path: Option<String>,
    progress: u8,
    gateway_status: Option<OcrStatus>,
    message: Option<String>,
    poll_attempts: u32,
    failure: Option<UploadFailure>,
}

impl Session {
    fn new(file: UploadFile) -> Self {
        Self {
            file,
            state: UploadState::Selected,
            preview: None,
            request_id: None,
            storage_path: None,
            progress: 0,
            gateway_status: None,
            message: None,
            poll_attempts: 0,
            failure: None,
        }
    }

    fn fail(&mut self, category: FailureCategory, message: impl Into<String>) {
        self.state = UploadState::Error;
        self.failure = Some(UploadFailure::new(category, message));
    }
}

#[derive(Default)]
struct ControllerState {
    generation: u64,
    session: Option<Session>,
    /// Rejection of a selection that never became a session.
    rejected: Option<UploadFailure>,
    progress_task: Option<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
    preview_task: Option<JoinHandle<()>>,
}

impl ControllerState {
    fn live_session(&mut self, generation: u64) -> Option<&mut Session> {
        if self.generation != generation {
            return None;
        }
        self.session.as_mut()
    }

    /// Invalidates every task started for the current session.
    fn discard_session(&mut self) {
        for task in [
            self.progress_task.take(),
            self.poll_task.take(),
            self.preview_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        self.generation += 1;
        self.session = None;
        self.rejected = None;
    }
}

pub struct UploadController {
    gateway: Arc<dyn OcrGateway>,
    kind: DocumentKind,
    policy: PollPolicy,
    inner: Mutex<ControllerState>,
    snapshots: watch::Sender<UploadSnapshot>,
}

impl UploadController {
    pub fn new(gateway: Arc<dyn OcrGateway>, kind: DocumentKind) -> Arc<Self> {
        Self::with_poll_policy(gateway, kind, PollPolicy::default())
    }

    pub fn with_poll_policy(
        gateway: Arc<dyn OcrGateway>,
        kind: DocumentKind,
        policy: PollPolicy,
    ) -> Arc<Self> {
        let (snapshots, _) = watch::channel(UploadSnapshot {
            kind,
            ..UploadSnapshot::default()
        });
        Arc::new(Self {
            gateway,
            kind,
            policy,
            inner: Mutex::new(ControllerState::default()),
            snapshots,
        })
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadSnapshot> {
        self.snapshots.subscribe()
    }

    /// Replaces any current session with `file`. A file failing validation
    /// leaves the controller idle with the rejection message set.
    pub async fn select_file(self: &Arc<Self>, file: UploadFile) -> UploadState {
        let mut guard = self.inner.lock().await;
        guard.discard_session();

        if let Err(err) = validate_upload(&file) {
            warn!(
                filename = %file.name,
                media_type = %file.media_type,
                size_bytes = file.size_bytes(),
                "upload: selection rejected: {err}"
            );
            guard.rejected = Some(err.into());
            self.publish(&guard);
            return UploadState::Idle;
        }

        let generation = guard.generation;
        info!(
            generation,
            filename = %file.name,
            media_type = %file.media_type,
            size_bytes = file.size_bytes(),
            "upload: file selected"
        );
        if file.is_image() {
            guard.preview_task = Some(self.spawn_preview(generation, file.clone()));
        }
        guard.session = Some(Session::new(file));
        self.publish(&guard);
        UploadState::Selected
    }

    /// Sends the selected file and, once the gateway accepts it, starts
    /// polling in the background. Does nothing unless a file is selected.
    pub async fn submit(self: &Arc<Self>) -> UploadState {
        let (generation, file) = {
            let mut guard = self.inner.lock().await;
            let generation = guard.generation;
            let Some(session) = guard.session.as_mut() else {
                debug!("upload: submit ignored, no file selected");
                return UploadState::Idle;
            };
            if session.state != UploadState::Selected {
                debug!(state = session.state.as_str(), "upload: submit ignored");
                return session.state;
            }
            session.state = UploadState::Uploading;
            session.progress = 0;
            let file = session.file.clone();
            guard.progress_task = Some(self.spawn_progress_ramp(generation));
            self.publish(&guard);
            (generation, file)
        };

        let result = self.gateway.upload(self.kind, &file).await;

        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            debug!(generation, "upload: dropping response for discarded session");
            return guard
                .session
                .as_ref()
                .map_or(UploadState::Idle, |session| session.state);
        }
        if let Some(task) = guard.progress_task.take() {
            task.abort();
        }
        let Some(session) = guard.session.as_mut() else {
            return UploadState::Idle;
        };

        let accepted = match result {
            Ok(response) if !response.request_id.is_empty() => {
                info!(
                    generation,
                    request_id = %response.request_id,
                    status = %response.status,
                    "upload: accepted by gateway"
                );
                session.state = UploadState::Processing;
                session.progress = PROGRESS_DONE;
                session.request_id = Some(response.request_id.clone());
                session.storage_path =
                    Some(response.s3_file_path).filter(|path| !path.is_empty());
                session.message = Some(response.message).filter(|message| !message.is_empty());
                Some(response.request_id)
            }
            Ok(_) => {
                warn!(generation, "upload: gateway response carried no request id");
                session.fail(FailureCategory::Transport, MISSING_REQUEST_ID);
                None
            }
            Err(err) => {
                warn!(generation, error = %err, "upload: failed");
                session.fail(FailureCategory::Transport, upload_failure_message(&err));
                None
            }
        };

        let state = session.state;
        if let Some(request_id) = accepted {
            guard.poll_task = Some(self.spawn_status_poll(generation, request_id));
        }
        self.publish(&guard);
        state
    }

    /// Discards the session and cancels everything scheduled for it.
    pub async fn reset(&self) {
        let mut guard = self.inner.lock().await;
        guard.discard_session();
        info!(generation = guard.generation, "upload: reset");
        self.publish(&guard);
    }

    fn publish(&self, state: &ControllerState) {
        let snapshot = match &state.session {
            None => UploadSnapshot {
                generation: state.generation,
                kind: self.kind,
                failure: state.rejected.clone(),
                ..UploadSnapshot::default()
            },
            Some(session) => UploadSnapshot {
                generation: state.generation,
                state: session.state,
                kind: self.kind,
                file_name: Some(session.file.name.clone()),
                file_size: Some(session.file.size_bytes()),
                media_type: Some(session.file.media_type.clone()),
                preview: session.preview.clone(),
                request_id: session.request_id.clone(),
                storage_path: session.storage_path.clone(),
                progress: session.progress,
                gateway_status: session.gateway_status,
                message: session.message.clone(),
                poll_attempts: session.poll_attempts,
                failure: session.failure.clone(),
            },
        };
        self.snapshots.send_replace(snapshot);
    }

    fn spawn_preview(self: &Arc<Self>, generation: u64, file: UploadFile) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let encoded = tokio::task::spawn_blocking(move || preview_data_uri(&file)).await;
            let preview = match encoded {
                Ok(Some(preview)) => preview,
                Ok(None) => return,
                Err(err) => {
                    warn!(generation, "upload: preview generation failed: {err}");
                    return;
                }
            };

            let mut guard = controller.inner.lock().await;
            if let Some(session) = guard.live_session(generation) {
                session.preview = Some(preview);
                controller.publish(&guard);
            }
        })
    }

    /// Cosmetic progress: +5 every tick, held at 95 until the upload
    /// response arrives.
    fn spawn_progress_ramp(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + PROGRESS_TICK, PROGRESS_TICK);
            loop {
                ticker.tick().await;
                let mut guard = controller.inner.lock().await;
                let Some(session) = guard.live_session(generation) else {
                    return;
                };
                if session.state != UploadState::Uploading {
                    return;
                }
                let progress = session
                    .progress
                    .saturating_add(PROGRESS_STEP)
                    .min(PROGRESS_CAP_BEFORE_RESPONSE);
                session.progress = progress;
                controller.publish(&guard);
                if progress >= PROGRESS_CAP_BEFORE_RESPONSE {
                    return;
                }
            }
        })
    }

    fn spawn_status_poll(
        self: &Arc<Self>,
        generation: u64,
        request_id: RequestId,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.poll_until_settled(generation, request_id).await;
        })
    }

    /// Polls sequentially: each response is applied before the next delay
    /// starts, so at most one status request is in flight.
    async fn poll_until_settled(&self, generation: u64, request_id: RequestId) {
        loop {
            let attempt = {
                let mut guard = self.inner.lock().await;
                let Some(session) = guard.live_session(generation) else {
                    return;
                };
                if session.state != UploadState::Processing {
                    return;
                }
                if let Some(max_attempts) = self.policy.max_attempts {
                    if session.poll_attempts >= max_attempts {
                        warn!(
                            generation,
                            request_id = %request_id,
                            max_attempts,
                            "upload: poll budget exhausted"
                        );
                        session.fail(FailureCategory::Processing, POLL_BUDGET_EXHAUSTED);
                        self.publish(&guard);
                        return;
                    }
                }
                session.poll_attempts += 1;
                let attempt = session.poll_attempts;
                self.publish(&guard);
                attempt
            };

            debug!(generation, request_id = %request_id, attempt, "upload: polling status");
            let result = self.gateway.request_status(self.kind, &request_id).await;

            let keep_polling = {
                let mut guard = self.inner.lock().await;
                let Some(session) = guard.live_session(generation) else {
                    return;
                };
                let keep_polling = match result {
                    Ok(response)
                        if !response.request_id.is_empty()
                            && response.request_id != request_id =>
                    {
                        warn!(
                            generation,
                            request_id = %request_id,
                            reported_request_id = %response.request_id,
                            attempt,
                            "upload: status response names another request"
                        );
                        session.fail(FailureCategory::Transport, STATUS_CHECK_FAILED);
                        false
                    }
                    Ok(response) => {
                        let status = response.status;
                        session.gateway_status = Some(status);
                        if !response.message.is_empty() {
                            session.message = Some(response.message);
                        }
                        if status.is_in_progress() {
                            debug!(
                                generation,
                                request_id = %request_id,
                                attempt,
                                status = status.as_str(),
                                "upload: still processing"
                            );
                            true
                        } else if status == OcrStatus::Completed {
                            info!(
                                generation,
                                request_id = %request_id,
                                attempt,
                                "upload: processing completed"
                            );
                            session.state = UploadState::Completed;
                            false
                        } else {
                            warn!(
                                generation,
                                request_id = %request_id,
                                attempt,
                                "upload: processing failed"
                            );
                            session.fail(FailureCategory::Processing, PROCESSING_FAILED);
                            false
                        }
                    }
                    Err(err) => {
                        warn!(
                            generation,
                            request_id = %request_id,
                            attempt,
                            error = %err,
                            "upload: status check failed"
                        );
                        session.fail(FailureCategory::Transport, STATUS_CHECK_FAILED);
                        false
                    }
                };
                self.publish(&guard);
                keep_polling
            };

            if !keep_polling {
                return;
            }
            sleep(self.policy.interval).await;
        }
    }
}

fn upload_failure_message(err: &GatewayError) -> String {
    match err {
        GatewayError::Status { reason, .. } => format!("Upload failed: {reason}"),
        other => {
            let message = other.to_string();
            if message.trim().is_empty() {
                UPLOAD_FAILED_FALLBACK.to_string()
            } else {
                message
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
