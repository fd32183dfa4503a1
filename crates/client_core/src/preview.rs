use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::types::UploadFile;

/// Inline `data:` URI for rendering an image before it is uploaded.
/// Non-image files have no preview.
pub fn preview_data_uri(file: &UploadFile) -> Option<String> {
    if !file.is_image() {
        return None;
    }
    Some(format!(
        "data:{};base64,{}",
        file.media_type,
        STANDARD.encode(&file.bytes)
    ))
}
