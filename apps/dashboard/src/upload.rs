//! Terminal driver for one upload: select, submit, then follow the
//! controller's snapshots until a terminal state.

use std::{future::Future, path::Path, sync::Arc};

use anyhow::{Context, Result};
use client_core::{OcrGateway, UploadController, UploadFile, UploadSnapshot, UploadState};
use shared::domain::DocumentKind;
use tokio_stream::{wrappers::WatchStream, StreamExt};
use tracing::{debug, info, warn};

use crate::{config::Settings, render::describe_snapshot};

const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

pub async fn read_upload_file(path: &Path) -> Result<UploadFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let media_type = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(FALLBACK_MEDIA_TYPE);
    Ok(UploadFile::new(name, media_type, bytes))
}

/// Whether two snapshots differ in a way worth printing. Progress is
/// reported in quarter steps.
fn is_notable_change(previous: Option<&UploadSnapshot>, next: &UploadSnapshot) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    previous.state != next.state
        || previous.poll_attempts != next.poll_attempts
        || previous.gateway_status != next.gateway_status
        || (next.state == UploadState::Uploading && previous.progress / 25 != next.progress / 25)
}

pub async fn run_upload(
    gateway: Arc<dyn OcrGateway>,
    settings: &Settings,
    kind: DocumentKind,
    file: UploadFile,
) -> Result<UploadSnapshot> {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("upload: cannot listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };
    run_upload_until(gateway, settings, kind, file, interrupt).await
}

/// Drives one upload until it settles or `interrupt` resolves. An interrupt
/// resets the controller and abandons any request still in flight.
async fn run_upload_until(
    gateway: Arc<dyn OcrGateway>,
    settings: &Settings,
    kind: DocumentKind,
    file: UploadFile,
    interrupt: impl Future<Output = ()>,
) -> Result<UploadSnapshot> {
    let controller = UploadController::with_poll_policy(gateway, kind, settings.poll_policy());

    if controller.select_file(file).await != UploadState::Selected {
        return Ok(controller.snapshot());
    }

    let mut updates = WatchStream::new(controller.subscribe());
    let submit = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.submit().await }
    });

    tokio::pin!(interrupt);
    let mut interrupted = false;
    let mut last: Option<UploadSnapshot> = None;
    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(snapshot) = update else {
                    break;
                };
                if is_notable_change(last.as_ref(), &snapshot) {
                    println!("{}", describe_snapshot(&snapshot));
                }
                let settled = snapshot.state.is_terminal();
                last = Some(snapshot);
                if settled {
                    break;
                }
            }
            () = &mut interrupt => {
                warn!("upload: interrupted, cancelling");
                controller.reset().await;
                submit.abort();
                interrupted = true;
                break;
            }
        }
    }

    match submit.await {
        Ok(_) => {}
        Err(err) if err.is_cancelled() => {
            debug!("upload: in-flight submit abandoned");
        }
        Err(err) => warn!("upload: submit task ended abnormally: {err}"),
    }

    let snapshot = controller.snapshot();
    info!(
        kind = controller.kind().label(),
        state = snapshot.state.as_str(),
        request_id = ?snapshot.request_id,
        poll_attempts = snapshot.poll_attempts,
        interrupted,
        "upload: finished"
    );
    Ok(snapshot)
}
