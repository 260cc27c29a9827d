use shared::InferenceResultItem;
use std::sync::Arc;
use uuid::Uuid;

use crate::access::guard::AccessGuard;
use crate::access::models::TaskId;
use crate::config::DetectionConfig;
use crate::db::detection_store::{DetectionStore, DetectionUnit};
use crate::db::models::{DetectionRecord, MonitoringSession, NewDetection, NewSession};
use crate::detection::model::{Detection, ImageUpload, Observations};
use crate::detection::validator::validate_batch;
use crate::error::{DetectionError, Result};
use crate::inference::gateway::InferenceGateway;
use crate::storage::s3_service::ImageArchiver;

#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub images: Vec<ImageUpload>,
    pub task_id: TaskId,
    pub observations: Option<Observations>,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub session: MonitoringSession,
    pub records: Vec<DetectionRecord>,
    /// One item per submitted image, in submission order, failures included.
    pub results: Vec<InferenceResultItem>,
}

#[derive(Clone)]
pub struct DetectionService {
    gateway: Arc<dyn InferenceGateway>,
    guard: AccessGuard,
    archiver: Arc<dyn ImageArchiver>,
    store: Arc<dyn DetectionStore>,
    config: DetectionConfig,
}

impl DetectionService {
    pub fn new(
        gateway: Arc<dyn InferenceGateway>,
        guard: AccessGuard,
        archiver: Arc<dyn ImageArchiver>,
        store: Arc<dyn DetectionStore>,
        config: DetectionConfig,
    ) -> Self {
        Self {
            gateway,
            guard,
            archiver,
            store,
            config,
        }
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub fn store(&self) -> &Arc<dyn DetectionStore> {
        &self.store
    }

    pub fn archive_folder(&self, task_id: TaskId) -> String {
        format!(
            "{}/{}/task_{}",
            self.config.environment.trim_matches('/'),
            self.config.pest_category.trim_matches('/'),
            task_id
        )
    }

    /// Runs one detection batch end to end.
    ///
    /// Validation happens before the inference call, authorization after it and
    /// before anything is written. Images are archived only for items the
    /// service classified successfully, and the session and its records are
    /// committed together or not at all. Uploaded images are not removed when
    /// a later step fails.
    pub async fn detect(&self, request: DetectionRequest) -> Result<DetectionOutcome> {
        validate_batch(&request.images)?;

        let results = self.gateway.predict(&request.images).await?;
        if results.len() != request.images.len() {
            return Err(DetectionError::InferenceFailure {
                status: 502,
                message: format!(
                    "gateway returned {} results for {} images",
                    results.len(),
                    request.images.len()
                ),
            });
        }

        let target = self.guard.authorize(request.task_id, request.user_id).await?;

        let mut unit = self.store.begin();
        let session = unit.create_session(NewSession {
            task_id: target.task.id,
            observations: request.observations.clone(),
        })?;

        if let Err(e) = self
            .stage_detections(&mut unit, &session, &request.images, &results)
            .await
        {
            log::error!("Detection batch for task {} aborted: {}", request.task_id, e);
            self.store.rollback(unit);
            return Err(e);
        }

        let records = unit.detections().to_vec();
        let summary = self.store.commit(unit).await?;
        log::info!(
            "Session {} committed for task {}: {} of {} images recorded",
            session.id,
            request.task_id,
            summary.detections,
            results.len()
        );

        Ok(DetectionOutcome {
            session,
            records,
            results,
        })
    }

    async fn stage_detections(
        &self,
        unit: &mut DetectionUnit,
        session: &MonitoringSession,
        images: &[ImageUpload],
        results: &[InferenceResultItem],
    ) -> Result<()> {
        let folder = self.archive_folder(session.task_id);

        for (index, (image, item)) in images.iter().zip(results).enumerate() {
            if !item.is_success() {
                log::debug!("Skipping image {} ({}): inference failed", index, image.file_name);
                continue;
            }
            let detection = Detection::from_item(item)?;
            let archived = self.archiver.archive(image, &folder).await?;
            unit.create_detection(NewDetection {
                session_id: session.id,
                image: archived,
                detection,
                observations: None,
            })?;
        }
        Ok(())
    }
}
