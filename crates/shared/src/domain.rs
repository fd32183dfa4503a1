use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier the gateway assigns to an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which OCR pipeline an upload goes through. Each kind has its own
/// upload and status endpoints on the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    #[default]
    Receipt,
    StandardDocument,
}

impl DocumentKind {
    pub fn upload_path(self) -> &'static str {
        match self {
            Self::Receipt => "upload-receipt/",
            Self::StandardDocument => "upload-document/",
        }
    }

    /// Path segment the request id is appended to when polling.
    pub fn status_segment(self) -> &'static str {
        match self {
            Self::Receipt => "receipt-status",
            Self::StandardDocument => "request-status",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Receipt => "receipt",
            Self::StandardDocument => "document",
        }
    }
}

/// Processing status reported by the gateway's status endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OcrStatus {
    /// Whether the gateway is still working on the request.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OcrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
