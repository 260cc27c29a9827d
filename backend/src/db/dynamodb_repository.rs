use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{AttributeValue, ConditionCheck, Put, TransactWriteItem};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use shared::PestClass;

use crate::access::models::TaskId;
use crate::db::detection_store::{CommitSummary, DetectionStore, DetectionUnit};
use crate::db::models::{DetectionRecord, MonitoringSession, SessionDetails};
use crate::detection::model::{Confidence, Observations, Probabilities, Probability};
use crate::error::{DetectionError, Result};

// DynamoDB rejects transactions with more than 100 actions.
const MAX_TRANSACT_ITEMS: usize = 100;

type Item = HashMap<String, AttributeValue>;

#[derive(Clone)]
pub struct DynamoDbRepository {
    client: Client,
    sessions_table: String,
    detections_table: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

impl From<RepositoryError> for DetectionError {
    fn from(err: RepositoryError) -> Self {
        DetectionError::Persistence(err.to_string())
    }
}

impl DynamoDbRepository {
    pub fn new(client: Client, sessions_table: String, detections_table: String) -> Self {
        Self {
            client,
            sessions_table,
            detections_table,
        }
    }

    fn put_new(&self, table: &str, item: Item) -> std::result::Result<TransactWriteItem, RepositoryError> {
        let put = Put::builder()
            .table_name(table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(id)")
            .build()
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(TransactWriteItem::builder().put(put).build())
    }

    fn session_exists_check(
        &self,
        session_id: Uuid,
    ) -> std::result::Result<TransactWriteItem, RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(session_id.to_string()));
        let check = ConditionCheck::builder()
            .table_name(&self.sessions_table)
            .set_key(Some(key))
            .condition_expression("attribute_exists(id)")
            .build()
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;
        Ok(TransactWriteItem::builder().condition_check(check).build())
    }

    fn transact_items(
        &self,
        unit: &DetectionUnit,
    ) -> std::result::Result<Vec<TransactWriteItem>, RepositoryError> {
        let mut items = Vec::with_capacity(unit.detections().len() + 1);
        if let Some(session) = unit.session() {
            items.push(self.put_new(&self.sessions_table, session_to_item(session))?);
        }
        for session_id in unit.external_session_ids() {
            items.push(self.session_exists_check(session_id)?);
        }
        for record in unit.detections() {
            items.push(self.put_new(&self.detections_table, detection_to_item(record))?);
        }
        if items.len() > MAX_TRANSACT_ITEMS {
            return Err(RepositoryError::InvalidData(format!(
                "unit has {} writes, a transaction allows {}",
                items.len(),
                MAX_TRANSACT_ITEMS
            )));
        }
        Ok(items)
    }

    pub async fn get_session(&self, session_id: Uuid) -> std::result::Result<Option<MonitoringSession>, RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(session_id.to_string()));

        let result = self
            .client
            .get_item()
            .table_name(&self.sessions_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        result.item.map(item_to_session).transpose()
    }

    pub async fn get_session_detections(
        &self,
        session_id: Uuid,
    ) -> std::result::Result<Vec<DetectionRecord>, RepositoryError> {
        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let result = self
                .client
                .scan()
                .table_name(&self.detections_table)
                .filter_expression("session_id = :session_id")
                .expression_attribute_values(
                    ":session_id",
                    AttributeValue::S(session_id.to_string()),
                )
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

            for item in result.items.unwrap_or_default() {
                records.push(item_to_detection(item)?);
            }
            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl DetectionStore for DynamoDbRepository {
    async fn commit(&self, unit: DetectionUnit) -> Result<CommitSummary> {
        let summary = CommitSummary {
            session_id: unit.session().map(|s| s.id),
            detections: unit.detections().len(),
        };
        if unit.is_empty() {
            return Ok(summary);
        }

        let items = self.transact_items(&unit)?;
        log::info!(
            "Committing session {:?} with {} detections in one transaction",
            summary.session_id,
            summary.detections
        );

        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|e| {
                let message = match e.as_service_error() {
                    Some(service_err) => format!("Service error: {:?}", service_err),
                    None => format!("SDK error: {}", e),
                };
                log::error!("DynamoDB transact_write_items failed: {}", message);
                DetectionError::Persistence(message)
            })?;

        Ok(summary)
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<SessionDetails>> {
        let Some(session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        let detections = self.get_session_detections(session_id).await?;
        Ok(Some(SessionDetails {
            session,
            detections,
        }))
    }
}

fn session_to_item(session: &MonitoringSession) -> Item {
    let mut item = HashMap::new();
    item.insert("id".to_string(), AttributeValue::S(session.id.to_string()));
    item.insert(
        "task_id".to_string(),
        AttributeValue::N(session.task_id.to_string()),
    );
    item.insert(
        "session_at".to_string(),
        AttributeValue::S(session.session_at.to_rfc3339()),
    );
    if let Some(observations) = &session.observations {
        item.insert(
            "observations".to_string(),
            AttributeValue::S(observations.as_str().to_string()),
        );
    }
    item
}

fn detection_to_item(record: &DetectionRecord) -> Item {
    let mut item = HashMap::new();
    item.insert("id".to_string(), AttributeValue::S(record.id.to_string()));
    item.insert(
        "session_id".to_string(),
        AttributeValue::S(record.session_id.to_string()),
    );
    item.insert(
        "image_url".to_string(),
        AttributeValue::S(record.image_url.clone()),
    );
    item.insert(
        "storage_id".to_string(),
        AttributeValue::S(record.storage_id.clone()),
    );
    item.insert(
        "predicted_class".to_string(),
        AttributeValue::S(record.predicted_class.to_string()),
    );
    item.insert(
        "confidence".to_string(),
        AttributeValue::N(format!("{:.2}", record.confidence.value())),
    );
    item.insert(
        "prob_healthy".to_string(),
        AttributeValue::N(format!("{:.4}", record.probabilities.healthy.value())),
    );
    item.insert(
        "prob_pest".to_string(),
        AttributeValue::N(format!("{:.4}", record.probabilities.pest.value())),
    );
    item.insert(
        "prob_disease".to_string(),
        AttributeValue::N(format!("{:.4}", record.probabilities.disease.value())),
    );
    if let Some(observations) = &record.observations {
        item.insert(
            "observations".to_string(),
            AttributeValue::S(observations.as_str().to_string()),
        );
    }
    item
}

fn get_s<'a>(item: &'a Item, name: &str) -> std::result::Result<&'a str, RepositoryError> {
    item.get(name)
        .and_then(|av| av.as_s().ok())
        .map(String::as_str)
        .ok_or_else(|| RepositoryError::InvalidData(format!("Missing {} attribute", name)))
}

fn get_n(item: &Item, name: &str) -> std::result::Result<f64, RepositoryError> {
    item.get(name)
        .and_then(|av| av.as_n().ok())
        .and_then(|n| n.parse::<f64>().ok())
        .ok_or_else(|| RepositoryError::InvalidData(format!("Missing {} attribute", name)))
}

fn get_uuid(item: &Item, name: &str) -> std::result::Result<Uuid, RepositoryError> {
    Uuid::parse_str(get_s(item, name)?)
        .map_err(|e| RepositoryError::InvalidData(format!("{}: {}", name, e)))
}

fn get_observations(item: &Item) -> std::result::Result<Option<Observations>, RepositoryError> {
    let raw = item.get("observations").and_then(|av| av.as_s().ok());
    Observations::parse_optional(raw.map(String::as_str))
        .map_err(|e| RepositoryError::InvalidData(e.to_string()))
}

fn item_to_session(item: Item) -> std::result::Result<MonitoringSession, RepositoryError> {
    let task_id = item
        .get("task_id")
        .and_then(|av| av.as_n().ok())
        .ok_or_else(|| RepositoryError::InvalidData("Missing task_id attribute".to_string()))?;
    let task_id =
        TaskId::from_str(task_id).map_err(|e| RepositoryError::InvalidData(e.to_string()))?;
    let session_at = DateTime::parse_from_rfc3339(get_s(&item, "session_at")?)
        .map_err(|e| RepositoryError::InvalidData(format!("session_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(MonitoringSession {
        id: get_uuid(&item, "id")?,
        task_id,
        session_at,
        observations: get_observations(&item)?,
    })
}

fn item_to_detection(item: Item) -> std::result::Result<DetectionRecord, RepositoryError> {
    let invalid = |e: DetectionError| RepositoryError::InvalidData(e.to_string());
    let predicted_class = PestClass::from_str(get_s(&item, "predicted_class")?)
        .map_err(|e| RepositoryError::InvalidData(format!("predicted_class: {}", e)))?;

    Ok(DetectionRecord {
        id: get_uuid(&item, "id")?,
        session_id: get_uuid(&item, "session_id")?,
        image_url: get_s(&item, "image_url")?.to_string(),
        storage_id: get_s(&item, "storage_id")?.to_string(),
        predicted_class,
        confidence: Confidence::new(get_n(&item, "confidence")?).map_err(invalid)?,
        probabilities: Probabilities {
            healthy: Probability::new("prob_healthy", get_n(&item, "prob_healthy")?)
                .map_err(invalid)?,
            pest: Probability::new("prob_pest", get_n(&item, "prob_pest")?).map_err(invalid)?,
            disease: Probability::new("prob_disease", get_n(&item, "prob_disease")?)
                .map_err(invalid)?,
        },
        observations: get_observations(&item)?,
    })
}
