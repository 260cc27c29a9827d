use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::PestClass;
use uuid::Uuid;

use crate::access::models::TaskId;
use crate::detection::model::{ArchivedImage, Confidence, Detection, Observations, Probabilities};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSession {
    pub id: Uuid,
    pub task_id: TaskId,
    pub session_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<Observations>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub task_id: TaskId,
    pub observations: Option<Observations>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub image_url: String,
    pub storage_id: String,
    pub predicted_class: PestClass,
    pub confidence: Confidence,
    pub probabilities: Probabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observations: Option<Observations>,
}

#[derive(Debug, Clone)]
pub struct NewDetection {
    pub session_id: Uuid,
    pub image: ArchivedImage,
    pub detection: Detection,
    pub observations: Option<Observations>,
}

/// A committed session together with its detection records.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetails {
    pub session: MonitoringSession,
    pub detections: Vec<DetectionRecord>,
}
