use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a selected file is refused before anything touches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select a valid image or PDF file")]
    UnsupportedMediaType { media_type: String },
    #[error("File size must be less than 5MB")]
    TooLarge { size_bytes: u64, max_bytes: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Validation,
    Transport,
    Processing,
}

/// A user-facing failure: the category lets callers branch without
/// parsing the message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFailure {
    pub category: FailureCategory,
    pub message: String,
}

impl UploadFailure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn category(&self) -> FailureCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ValidationError> for UploadFailure {
    fn from(value: ValidationError) -> Self {
        Self::new(FailureCategory::Validation, value.to_string())
    }
}
