use crate::detection::model::ImageUpload;
use crate::error::{DetectionError, Result};

pub const MAX_BATCH_SIZE: usize = 15;
pub const MAX_IMAGE_SIZE: usize = 50 * 1024 * 1024;
pub const ALLOWED_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

/// Rejects a batch before any network or storage work happens.
pub fn validate_batch(images: &[ImageUpload]) -> Result<()> {
    if images.is_empty() {
        return Err(DetectionError::Validation(
            "at least one image is required".to_string(),
        ));
    }
    if images.len() > MAX_BATCH_SIZE {
        return Err(DetectionError::Validation(format!(
            "a batch may contain at most {} images, got {}",
            MAX_BATCH_SIZE,
            images.len()
        )));
    }

    for image in images {
        let mime = image.mime_essence();
        if !ALLOWED_CONTENT_TYPES.contains(&mime.as_str()) {
            return Err(DetectionError::Validation(format!(
                "{}: unsupported content type '{}', expected JPEG or PNG",
                image.file_name, image.content_type
            )));
        }
        if image.data.is_empty() {
            return Err(DetectionError::Validation(format!(
                "{}: image is empty",
                image.file_name
            )));
        }
        if image.data.len() > MAX_IMAGE_SIZE {
            return Err(DetectionError::Validation(format!(
                "{}: image exceeds {} bytes",
                image.file_name, MAX_IMAGE_SIZE
            )));
        }
    }
    Ok(())
}
