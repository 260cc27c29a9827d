use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::db::models::{DetectionRecord, MonitoringSession, NewDetection, NewSession, SessionDetails};
use crate::error::{DetectionError, Result};

/// Rows staged by one detection request. Nothing here is visible to readers
/// until the unit is handed to [`DetectionStore::commit`].
#[derive(Debug, Default)]
pub struct DetectionUnit {
    session: Option<MonitoringSession>,
    detections: Vec<DetectionRecord>,
}

impl DetectionUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&mut self, data: NewSession) -> Result<MonitoringSession> {
        if let Some(existing) = &self.session {
            return Err(DetectionError::Persistence(format!(
                "session {} is already staged in this unit",
                existing.id
            )));
        }
        let session = MonitoringSession {
            id: Uuid::new_v4(),
            task_id: data.task_id,
            session_at: Utc::now(),
            observations: data.observations,
        };
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Stages a record. When the unit holds a session, the record must belong
    /// to it; otherwise the session must already be committed, which the store
    /// checks at commit time.
    pub fn create_detection(&mut self, data: NewDetection) -> Result<DetectionRecord> {
        if let Some(session) = &self.session {
            if session.id != data.session_id {
                return Err(DetectionError::Persistence(format!(
                    "detection references session {} but unit stages session {}",
                    data.session_id, session.id
                )));
            }
        }
        let record = DetectionRecord {
            id: Uuid::new_v4(),
            session_id: data.session_id,
            image_url: data.image.url,
            storage_id: data.image.storage_id,
            predicted_class: data.detection.predicted_class,
            confidence: data.detection.confidence,
            probabilities: data.detection.probabilities,
            observations: data.observations,
        };
        self.detections.push(record.clone());
        Ok(record)
    }

    pub fn session(&self) -> Option<&MonitoringSession> {
        self.session.as_ref()
    }

    pub fn detections(&self) -> &[DetectionRecord] {
        &self.detections
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.detections.is_empty()
    }

    /// Session ids referenced by staged records that are not staged themselves.
    pub fn external_session_ids(&self) -> Vec<Uuid> {
        let staged = self.session.as_ref().map(|s| s.id);
        let mut ids: Vec<Uuid> = self
            .detections
            .iter()
            .map(|d| d.session_id)
            .filter(|id| Some(*id) != staged)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn into_parts(self) -> (Option<MonitoringSession>, Vec<DetectionRecord>) {
        (self.session, self.detections)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub session_id: Option<Uuid>,
    pub detections: usize,
}

#[async_trait]
pub trait DetectionStore: Send + Sync {
    fn begin(&self) -> DetectionUnit {
        DetectionUnit::new()
    }

    /// Persists every staged row atomically. On error nothing is persisted.
    async fn commit(&self, unit: DetectionUnit) -> Result<CommitSummary>;

    fn rollback(&self, unit: DetectionUnit) {
        let (session, detections) = unit.into_parts();
        log::warn!(
            "Rolled back unit with session {:?} and {} staged detections",
            session.map(|s| s.id),
            detections.len()
        );
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionDetails>>;
}
