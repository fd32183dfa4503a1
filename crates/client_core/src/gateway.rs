use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{DocumentKind, RequestId},
    protocol::{
        ListResponse, OcrResult, ReceiptRequest, StatusResponse, Transaction, UploadResponse,
    },
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::types::UploadFile;

const MEDICAL_RECORD_NOT_FOUND: &str = "Medical record not found.";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid gateway url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{reason}")]
    Status { status: StatusCode, reason: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("invalid gateway response: {0}")]
    Decode(String),
    #[error("{0}")]
    NotFound(String),
}

impl GatewayError {
    fn from_status(status: StatusCode) -> Self {
        let reason = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_u16().to_string());
        Self::Status { status, reason }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(err) => err.status(),
            _ => None,
        }
    }
}

/// The two calls the upload lifecycle needs from the OCR backend.
#[async_trait]
pub trait OcrGateway: Send + Sync {
    async fn upload(
        &self,
        kind: DocumentKind,
        file: &UploadFile,
    ) -> Result<UploadResponse, GatewayError>;

    async fn request_status(
        &self,
        kind: DocumentKind,
        request_id: &RequestId,
    ) -> Result<StatusResponse, GatewayError>;
}

/// Parses a base URL and forces a trailing slash so relative joins keep
/// any path prefix (`http://host/api` + `ocr-result` -> `/api/ocr-result`).
pub fn normalize_base_url(raw: &str) -> Result<Url, GatewayError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash).map_err(|e| GatewayError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(GatewayError::InvalidUrl {
            url: raw.to_string(),
            reason: "url cannot be used as a base".to_string(),
        });
    }
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: Url,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(timeout).build()?;
        Self::with_client(base_url, http)
    }

    pub fn with_client(base_url: &str, http: Client) -> Result<Self, GatewayError> {
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::InvalidUrl {
                url: format!("{}{path}", self.base_url),
                reason: e.to_string(),
            })
    }

    /// `<segment>/<id>` with the id percent-encoded as a single segment.
    fn endpoint_with_id(&self, segment: &str, id: &str) -> Result<Url, GatewayError> {
        let mut url = self.endpoint(segment)?;
        // The base is checked in `normalize_base_url`, so segments are always available.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(id);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, GatewayError> {
        debug!(%url, "gateway GET");
        let response = self.http.get(url).send().await?;
        decode_response(response).await
    }

    pub async fn list_ocr_results(&self) -> Result<Vec<OcrResult>, GatewayError> {
        let body: ListResponse<OcrResult> = self.get_json(self.endpoint("ocr-result")?).await?;
        Ok(body.items)
    }

    pub async fn ocr_result(&self, request_id: &str) -> Result<OcrResult, GatewayError> {
        self.get_json(self.endpoint_with_id("ocr-result", request_id)?)
            .await
    }

    /// A single OCR result, required to carry document data.
    pub async fn medical_record(&self, request_id: &str) -> Result<OcrResult, GatewayError> {
        let result = self.ocr_result(request_id).await?;
        if !result.is_medical_record() {
            return Err(GatewayError::NotFound(MEDICAL_RECORD_NOT_FOUND.to_string()));
        }
        Ok(result)
    }

    pub async fn list_requests(&self) -> Result<Vec<ReceiptRequest>, GatewayError> {
        let body: ListResponse<ReceiptRequest> =
            self.get_json(self.endpoint("requests/")?).await?;
        Ok(body.items)
    }

    pub async fn list_transactions(&self) -> Result<Vec<Transaction>, GatewayError> {
        let body: ListResponse<Transaction> =
            self.get_json(self.endpoint("transactions/")?).await?;
        Ok(body.items)
    }
}

#[async_trait]
impl OcrGateway for HttpGateway {
    async fn upload(
        &self,
        kind: DocumentKind,
        file: &UploadFile,
    ) -> Result<UploadResponse, GatewayError> {
        let url = self.endpoint(kind.upload_path())?;
        let part = multipart::Part::bytes(file.bytes.to_vec())
            .file_name(file.name.clone())
            .mime_str(&file.media_type)?;
        let form = multipart::Form::new().part("file", part);

        info!(
            %url,
            kind = kind.label(),
            filename = %file.name,
            size_bytes = file.size_bytes(),
            "gateway upload"
        );
        let response = self.http.post(url).multipart(form).send().await?;
        decode_response(response).await
    }

    async fn request_status(
        &self,
        kind: DocumentKind,
        request_id: &RequestId,
    ) -> Result<StatusResponse, GatewayError> {
        let url = self.endpoint_with_id(kind.status_segment(), request_id.as_str())?;
        self.get_json(url).await
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::from_status(status));
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| GatewayError::Decode(e.to_string()))
}

pub fn medical_records(results: Vec<OcrResult>) -> Vec<OcrResult> {
    results
        .into_iter()
        .filter(OcrResult::is_medical_record)
        .collect()
}

pub fn receipt_results(results: Vec<OcrResult>) -> Vec<OcrResult> {
    results.into_iter().filter(OcrResult::is_receipt).collect()
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
