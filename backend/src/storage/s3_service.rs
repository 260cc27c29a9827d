use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;
use crate::detection::model::{ArchivedImage, ImageUpload};
use crate::error::{DetectionError, Result};

/// Durable storage for source images of successful detections.
#[async_trait]
pub trait ImageArchiver: Send + Sync {
    async fn archive(&self, image: &ImageUpload, folder: &str) -> Result<ArchivedImage>;
}

#[derive(Debug, thiserror::Error)]
pub enum S3ServiceError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("Invalid file format: {0}")]
    InvalidFormat(String),
}

impl From<S3ServiceError> for DetectionError {
    fn from(err: S3ServiceError) -> Self {
        DetectionError::Storage(err.to_string())
    }
}

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
    region: Option<String>,
    public_base_url: Option<String>,
}

impl S3Service {
    pub fn new(client: Client, config: &StorageConfig) -> Self {
        Self {
            client,
            bucket_name: config.bucket.clone(),
            region: config.region.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }

    pub fn calculate_image_hash(image_data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image_data);
        hex::encode(hasher.finalize())
    }

    pub fn extract_file_extension(mime_type: &str) -> std::result::Result<&'static str, S3ServiceError> {
        match mime_type {
            "image/jpeg" => Ok("jpg"),
            "image/png" => Ok("png"),
            other => Err(S3ServiceError::InvalidFormat(other.to_string())),
        }
    }

    pub fn generate_s3_key(folder: &str, image_hash: &str, file_extension: &str) -> String {
        format!("{}/{}.{}", folder.trim_matches('/'), image_hash, file_extension)
    }

    pub fn object_url(&self, s3_key: &str) -> String {
        match (&self.public_base_url, &self.region) {
            (Some(base), _) => format!("{}/{}", base.trim_end_matches('/'), s3_key),
            (None, Some(region)) => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket_name, region, s3_key
            ),
            (None, None) => format!("https://{}.s3.amazonaws.com/{}", self.bucket_name, s3_key),
        }
    }

    pub async fn upload_image(
        &self,
        image_data: &[u8],
        s3_key: &str,
        mime_type: &str,
    ) -> std::result::Result<(), S3ServiceError> {
        let body = ByteStream::from(image_data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(s3_key)
            .body(body)
            .content_type(mime_type)
            .send()
            .await
            .map_err(|e| S3ServiceError::S3(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ImageArchiver for S3Service {
    async fn archive(&self, image: &ImageUpload, folder: &str) -> Result<ArchivedImage> {
        let mime_type = image.mime_essence();
        let file_extension = Self::extract_file_extension(&mime_type)?;
        let image_hash = Self::calculate_image_hash(&image.data);
        let s3_key = Self::generate_s3_key(folder, &image_hash, file_extension);

        self.upload_image(&image.data, &s3_key, &mime_type)
            .await
            .inspect_err(|e| log::error!("Upload of {} to {} failed: {}", image.file_name, s3_key, e))?;

        log::debug!("Archived {} as s3://{}/{}", image.file_name, self.bucket_name, s3_key);
        Ok(ArchivedImage {
            url: self.object_url(&s3_key),
            storage_id: s3_key,
        })
    }
}
