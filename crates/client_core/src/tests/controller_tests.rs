use super::*;
use std::collections::VecDeque;

use async_trait::async_trait;
use reqwest::StatusCode;
use shared::protocol::{StatusResponse, UploadResponse};
use tokio::sync::oneshot;

use crate::validation::MAX_UPLOAD_BYTES;

enum UploadReply {
    Accept(&'static str),
    Reject(StatusCode),
}

#[derive(Clone, Copy)]
enum StatusReply {
    Report(OcrStatus),
    /// Reports `status` under a different request id than the one polled.
    ReportFor(&'static str, OcrStatus),
    Fail,
}

struct ScriptedGateway {
    upload_reply: UploadReply,
    upload_gate: Mutex<Option<oneshot::Receiver<()>>>,
    uploads: Mutex<Vec<String>>,
    statuses: Mutex<VecDeque<StatusReply>>,
    polls: Mutex<Vec<(RequestId, Instant)>>,
}

impl ScriptedGateway {
    fn new(upload_reply: UploadReply) -> Self {
        Self {
            upload_reply,
            upload_gate: Mutex::new(None),
            uploads: Mutex::new(Vec::new()),
            statuses: Mutex::new(VecDeque::new()),
            polls: Mutex::new(Vec::new()),
        }
    }

    fn accepting(request_id: &'static str) -> Self {
        Self::new(UploadReply::Accept(request_id))
    }

    fn rejecting(status: StatusCode) -> Self {
        Self::new(UploadReply::Reject(status))
    }

    /// Replies handed out in order; once exhausted every poll reports
    /// `processing`.
    fn with_statuses(mut self, replies: impl IntoIterator<Item = StatusReply>) -> Self {
        self.statuses = Mutex::new(replies.into_iter().collect());
        self
    }

    /// Holds the upload response until the returned sender fires.
    fn gated(mut self) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        self.upload_gate = Mutex::new(Some(rx));
        (self, tx)
    }

    async fn upload_count(&self) -> usize {
        self.uploads.lock().await.len()
    }

    async fn poll_count(&self) -> usize {
        self.polls.lock().await.len()
    }
}

#[async_trait]
impl OcrGateway for ScriptedGateway {
    async fn upload(
        &self,
        _kind: DocumentKind,
        file: &UploadFile,
    ) -> Result<UploadResponse, GatewayError> {
        self.uploads.lock().await.push(file.name.clone());
        let gate = self.upload_gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        match &self.upload_reply {
            UploadReply::Accept(request_id) => Ok(UploadResponse {
                request_id: RequestId::new(*request_id),
                status: "processing".to_string(),
                s3_file_path: format!("s3://ocr-uploads/{request_id}"),
                message: "File uploaded successfully".to_string(),
            }),
            UploadReply::Reject(status) => Err(GatewayError::Status {
                status: *status,
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            }),
        }
    }

    async fn request_status(
        &self,
        _kind: DocumentKind,
        request_id: &RequestId,
    ) -> Result<StatusResponse, GatewayError> {
        self.polls
            .lock()
            .await
            .push((request_id.clone(), Instant::now()));
        let reply = self
            .statuses
            .lock()
            .await
            .pop_front()
            .unwrap_or(StatusReply::Report(OcrStatus::Processing));

        match reply {
            StatusReply::Report(status) => Ok(StatusResponse {
                request_id: request_id.clone(),
                status,
                message: format!("request is {status}"),
            }),
            StatusReply::ReportFor(other_id, status) => Ok(StatusResponse {
                request_id: RequestId::new(other_id),
                status,
                message: format!("request is {status}"),
            }),
            StatusReply::Fail => Err(GatewayError::Decode("connection reset by peer".to_string())),
        }
    }
}

fn jpeg(size: usize) -> UploadFile {
    UploadFile::new("receipt.jpg", "image/jpeg", vec![0xFF; size])
}

fn pdf(size: usize) -> UploadFile {
    UploadFile::new("record.pdf", "application/pdf", vec![0x25; size])
}

fn controller_for(gateway: &Arc<ScriptedGateway>) -> Arc<UploadController> {
    UploadController::new(gateway.clone(), DocumentKind::Receipt)
}

async fn wait_until(
    controller: &UploadController,
    mut predicate: impl FnMut(&UploadSnapshot) -> bool,
) -> UploadSnapshot {
    let mut rx = controller.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(|s| predicate(s)))
        .await
        .expect("controller did not reach expected state")
        .expect("controller dropped");
    snapshot.clone()
}

#[tokio::test(start_paused = true)]
async fn unsupported_media_type_never_creates_a_session() {
    let gateway = Arc::new(ScriptedGateway::accepting("r1"));
    let controller = controller_for(&gateway);

    for media_type in ["image/webp", "text/plain", "application/octet-stream"] {
        let state = controller
            .select_file(UploadFile::new("scan", media_type, vec![1u8; 64]))
            .await;
        assert_eq!(state, UploadState::Idle);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, UploadState::Idle);
        assert!(!snapshot.has_session());
        assert_eq!(
            snapshot.error_message(),
            Some("Please select a valid image or PDF file")
        );
        assert_eq!(
            snapshot.failure.as_ref().map(UploadFailure::category),
            Some(FailureCategory::Validation)
        );
    }

    assert_eq!(controller.submit().await, UploadState::Idle);
    assert_eq!(gateway.upload_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn size_limit_boundary_is_accepted_and_six_megabytes_is_not() {
    let gateway = Arc::new(ScriptedGateway::accepting("r1"));
    let controller = controller_for(&gateway);

    let state = controller.select_file(pdf(MAX_UPLOAD_BYTES as usize)).await;
    assert_eq!(state, UploadState::Selected);
    assert_eq!(controller.snapshot().file_size, Some(5_242_880));

    let state = controller.select_file(pdf(6 * 1024 * 1024)).await;
    assert_eq!(state, UploadState::Idle);
    let snapshot = controller.snapshot();
    assert!(!snapshot.has_session());
    assert_eq!(snapshot.error_message(), Some("File size must be less than 5MB"));
}

#[tokio::test(start_paused = true)]
async fn jpeg_upload_polls_until_completed() {
    let gateway = Arc::new(ScriptedGateway::accepting("r1").with_statuses([
        StatusReply::Report(OcrStatus::Processing),
        StatusReply::Report(OcrStatus::Completed),
    ]));
    let controller = controller_for(&gateway);

    assert_eq!(
        controller.select_file(jpeg(2 * 1024 * 1024)).await,
        UploadState::Selected
    );

    assert_eq!(controller.submit().await, UploadState::Processing);
    let accepted = controller.snapshot();
    assert_eq!(accepted.state, UploadState::Processing);
    assert_eq!(accepted.progress, 100);
    assert_eq!(accepted.request_id, Some(RequestId::new("r1")));
    assert_eq!(accepted.storage_path.as_deref(), Some("s3://ocr-uploads/r1"));

    let first_poll = wait_until(&controller, |s| {
        s.poll_attempts == 1 && s.gateway_status == Some(OcrStatus::Processing)
    })
    .await;
    assert_eq!(first_poll.state, UploadState::Processing);

    let done = wait_until(&controller, |s| s.state.is_terminal()).await;
    assert_eq!(done.state, UploadState::Completed);
    assert_eq!(done.gateway_status, Some(OcrStatus::Completed));
    assert_eq!(done.poll_attempts, 2);
    assert!(done.failure.is_none());

    let polls = gateway.polls.lock().await.clone();
    assert_eq!(polls.len(), 2);
    assert!(polls.iter().all(|(id, _)| id.as_str() == "r1"));
    assert!(polls[1].1 - polls[0].1 >= DEFAULT_POLL_INTERVAL);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gateway.poll_count().await, 2);
    assert_eq!(controller.snapshot().state, UploadState::Completed);
}

#[tokio::test(start_paused = true)]
async fn pending_and_processing_polls_are_spaced_by_the_interval() {
    let gateway = Arc::new(ScriptedGateway::accepting("r7").with_statuses([
        StatusReply::Report(OcrStatus::Pending),
        StatusReply::Report(OcrStatus::Pending),
        StatusReply::Report(OcrStatus::Processing),
        StatusReply::Report(OcrStatus::Completed),
    ]));
    let controller = controller_for(&gateway);
    controller.select_file(pdf(1024)).await;
    controller.submit().await;

    let done = wait_until(&controller, |s| s.state.is_terminal()).await;
    assert_eq!(done.state, UploadState::Completed);

    let polls = gateway.polls.lock().await.clone();
    assert_eq!(polls.len(), 4);
    for pair in polls.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(3000));
    }
}

#[tokio::test(start_paused = true)]
async fn server_error_on_upload_ends_in_error_without_polling() {
    let gateway = Arc::new(ScriptedGateway::rejecting(StatusCode::INTERNAL_SERVER_ERROR));
    let controller = controller_for(&gateway);
    controller.select_file(jpeg(4096)).await;

    assert_eq!(controller.submit().await, UploadState::Error);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, UploadState::Error);
    assert!(snapshot.request_id.is_none());
    let message = snapshot.error_message().expect("error message");
    assert!(message.contains("Upload failed"), "unexpected message: {message}");
    assert_eq!(message, "Upload failed: Internal Server Error");
    assert_eq!(
        snapshot.failure.as_ref().map(UploadFailure::category),
        Some(FailureCategory::Transport)
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(gateway.poll_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn gateway_reported_failure_stops_polling() {
    let gateway = Arc::new(ScriptedGateway::accepting("r2").with_statuses([
        StatusReply::Report(OcrStatus::Pending),
        StatusReply::Report(OcrStatus::Failed),
    ]));
    let controller = controller_for(&gateway);
    controller.select_file(pdf(2048)).await;
    controller.submit().await;

    let done = wait_until(&controller, |s| s.state.is_terminal()).await;
    assert_eq!(done.state, UploadState::Error);
    assert_eq!(done.error_message(), Some(PROCESSING_FAILED));
    assert_eq!(
        done.failure.as_ref().map(UploadFailure::category),
        Some(FailureCategory::Processing)
    );
    assert_eq!(done.request_id, Some(RequestId::new("r2")));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gateway.poll_count().await, 2);
}

#[tokio::test(start_paused = true)]
async fn failed_status_check_is_terminal() {
    let gateway = Arc::new(
        ScriptedGateway::accepting("r3").with_statuses([StatusReply::Fail]),
    );
    let controller = controller_for(&gateway);
    controller.select_file(jpeg(512)).await;
    controller.submit().await;

    let done = wait_until(&controller, |s| s.state.is_terminal()).await;
    assert_eq!(done.state, UploadState::Error);
    assert_eq!(done.error_message(), Some(STATUS_CHECK_FAILED));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gateway.poll_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn status_for_another_request_is_a_failed_check() {
    let gateway = Arc::new(
        ScriptedGateway::accepting("r3")
            .with_statuses([StatusReply::ReportFor("someone-else", OcrStatus::Completed)]),
    );
    let controller = controller_for(&gateway);
    controller.select_file(jpeg(512)).await;
    controller.submit().await;

    let done = wait_until(&controller, |s| s.state.is_terminal()).await;
    assert_eq!(done.state, UploadState::Error);
    assert_eq!(done.error_message(), Some(STATUS_CHECK_FAILED));
    assert_eq!(done.gateway_status, None);
    assert_eq!(done.request_id, Some(RequestId::new("r3")));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(gateway.poll_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_the_scheduled_poll() {
    let gateway = Arc::new(ScriptedGateway::accepting("r4"));
    let controller = controller_for(&gateway);
    controller.select_file(jpeg(1024)).await;
    controller.submit().await;

    wait_until(&controller, |s| {
        s.poll_attempts == 1 && s.gateway_status == Some(OcrStatus::Processing)
    })
    .await;
    let generation_before = controller.snapshot().generation;

    controller.reset().await;
    let polls_at_reset = gateway.poll_count().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(gateway.poll_count().await, polls_at_reset);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, UploadState::Idle);
    assert!(snapshot.generation > generation_before);
    assert_eq!(
        snapshot,
        UploadSnapshot {
            generation: snapshot.generation,
            kind: DocumentKind::Receipt,
            ..UploadSnapshot::default()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn reset_during_upload_discards_the_late_response() {
    let (gateway, release) = ScriptedGateway::accepting("r5").gated();
    let gateway = Arc::new(gateway);
    let controller = controller_for(&gateway);
    controller.select_file(jpeg(1024)).await;

    let submit = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.submit().await }
    });
    wait_until(&controller, |s| s.state == UploadState::Uploading).await;

    controller.reset().await;
    release.send(()).expect("release upload");
    assert_eq!(submit.await.expect("submit task"), UploadState::Idle);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(gateway.poll_count().await, 0);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, UploadState::Idle);
    assert!(snapshot.request_id.is_none());
    assert_eq!(snapshot.progress, 0);
}

#[tokio::test(start_paused = true)]
async fn progress_ramps_to_ninety_five_until_the_response_arrives() {
    let (gateway, release) = ScriptedGateway::accepting("r6").gated();
    let gateway = Arc::new(gateway);
    let controller = controller_for(&gateway);
    controller.select_file(pdf(1024)).await;

    let submit = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.submit().await }
    });
    wait_until(&controller, |s| s.state == UploadState::Uploading).await;

    let mut last = 0;
    for _ in 0..30 {
        tokio::time::sleep(PROGRESS_TICK).await;
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, UploadState::Uploading);
        assert!(snapshot.progress >= last, "progress went backwards");
        assert!(snapshot.progress <= 95, "progress passed the cap");
        last = snapshot.progress;
    }
    assert_eq!(last, 95);

    release.send(()).expect("release upload");
    assert_eq!(submit.await.expect("submit task"), UploadState::Processing);
    assert_eq!(controller.snapshot().progress, 100);
}

#[tokio::test(start_paused = true)]
async fn poll_budget_bounds_an_endless_processing_status() {
    let gateway = Arc::new(ScriptedGateway::accepting("r8"));
    let controller = UploadController::with_poll_policy(
        gateway.clone(),
        DocumentKind::StandardDocument,
        PollPolicy {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: Some(3),
        },
    );
    controller.select_file(pdf(1024)).await;
    controller.submit().await;

    let done = wait_until(&controller, |s| s.state.is_terminal()).await;
    assert_eq!(done.state, UploadState::Error);
    assert_eq!(done.poll_attempts, 3);
    assert_eq!(done.error_message(), Some(POLL_BUDGET_EXHAUSTED));
    assert_eq!(gateway.poll_count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn selecting_a_new_file_replaces_the_polling_session() {
    let gateway = Arc::new(ScriptedGateway::accepting("r9"));
    let controller = controller_for(&gateway);
    controller.select_file(jpeg(1024)).await;
    controller.submit().await;
    wait_until(&controller, |s| s.poll_attempts == 1).await;

    assert_eq!(
        controller.select_file(pdf(2048)).await,
        UploadState::Selected
    );
    let polls = gateway.poll_count().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(gateway.poll_count().await, polls);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, UploadState::Selected);
    assert_eq!(snapshot.file_name.as_deref(), Some("record.pdf"));
    assert!(snapshot.request_id.is_none());
    assert_eq!(snapshot.poll_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn accept_without_request_id_is_an_upload_failure() {
    let gateway = Arc::new(ScriptedGateway::accepting(""));
    let controller = controller_for(&gateway);
    controller.select_file(jpeg(1024)).await;

    assert_eq!(controller.submit().await, UploadState::Error);
    assert_eq!(controller.snapshot().error_message(), Some(MISSING_REQUEST_ID));
    assert!(controller.snapshot().request_id.is_none());
    assert_eq!(gateway.poll_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn submit_only_acts_on_a_selected_file() {
    let gateway = Arc::new(ScriptedGateway::accepting("r10").with_statuses([
        StatusReply::Report(OcrStatus::Completed),
    ]));
    let controller = controller_for(&gateway);

    assert_eq!(controller.submit().await, UploadState::Idle);
    controller.select_file(pdf(64)).await;
    controller.submit().await;
    wait_until(&controller, |s| s.state == UploadState::Completed).await;

    assert_eq!(controller.submit().await, UploadState::Completed);
    assert_eq!(gateway.upload_count().await, 1);
}

#[tokio::test]
async fn image_selection_attaches_a_preview_asynchronously() {
    let gateway = Arc::new(ScriptedGateway::accepting("r11"));
    let controller = controller_for(&gateway);

    controller
        .select_file(UploadFile::new("r.png", "image/png", b"\x89PNG".to_vec()))
        .await;
    let with_preview = wait_until(&controller, |s| s.preview.is_some()).await;
    assert_eq!(with_preview.state, UploadState::Selected);
    assert_eq!(
        with_preview.preview.as_deref(),
        Some("data:image/png;base64,iVBORw==")
    );

    controller.select_file(pdf(64)).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, UploadState::Selected);
    assert!(snapshot.preview.is_none());
}
