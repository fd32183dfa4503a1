use shared::error::ValidationError;

use crate::types::UploadFile;

pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

pub const ACCEPTED_MEDIA_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "application/pdf"];

/// Media type first, then size; the boundary size itself is accepted.
pub fn validate_upload(file: &UploadFile) -> Result<(), ValidationError> {
    if !ACCEPTED_MEDIA_TYPES.contains(&file.media_type.as_str()) {
        return Err(ValidationError::UnsupportedMediaType {
            media_type: file.media_type.clone(),
        });
    }

    let size_bytes = file.size_bytes();
    if size_bytes > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge {
            size_bytes,
            max_bytes: MAX_UPLOAD_BYTES,
        });
    }

    Ok(())
}
