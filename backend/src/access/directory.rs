use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use uuid::Uuid;

use crate::access::models::{FarmId, FarmRole, Plot, PlotId, Task, TaskId, TaskType};
use crate::error::{DetectionError, Result};

/// Read-only view of the tasks, plots and farm memberships owned by other
/// subsystems.
#[async_trait]
pub trait FarmDirectory: Send + Sync {
    async fn find_task(&self, task_id: TaskId) -> Result<Option<Task>>;

    async fn find_plot(&self, plot_id: PlotId) -> Result<Option<Plot>>;

    async fn farm_role(&self, farm_id: FarmId, user_id: Uuid) -> Result<Option<FarmRole>>;
}

#[derive(Clone)]
pub struct DynamoFarmDirectory {
    client: Client,
    tasks_table: String,
    plots_table: String,
    farm_members_table: String,
}

impl DynamoFarmDirectory {
    pub fn new(
        client: Client,
        tasks_table: String,
        plots_table: String,
        farm_members_table: String,
    ) -> Self {
        Self {
            client,
            tasks_table,
            plots_table,
            farm_members_table,
        }
    }

    async fn get_item(
        &self,
        table: &str,
        key: HashMap<String, AttributeValue>,
    ) -> Result<Option<HashMap<String, AttributeValue>>> {
        let result = self
            .client
            .get_item()
            .table_name(table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| {
                log::error!("DynamoDB get_item on '{}' failed: {:?}", table, e);
                DetectionError::Persistence(e.to_string())
            })?;
        Ok(result.item)
    }
}

fn number_attr(item: &HashMap<String, AttributeValue>, name: &str) -> Result<i64> {
    item.get(name)
        .and_then(|av| av.as_n().ok())
        .and_then(|n| n.parse::<i64>().ok())
        .ok_or_else(|| DetectionError::Persistence(format!("Missing or invalid {} attribute", name)))
}

/// Reads a stored id; a non-positive value is a data fault, not a bad request.
fn id_attr<T>(
    item: &HashMap<String, AttributeValue>,
    name: &str,
    make: fn(i64) -> Result<T>,
) -> Result<T> {
    let value = number_attr(item, name)?;
    make(value).map_err(|_| {
        DetectionError::Persistence(format!("Stored {} {} is not a valid id", name, value))
    })
}

fn string_attr<'a>(item: &'a HashMap<String, AttributeValue>, name: &str) -> Result<&'a str> {
    item.get(name)
        .and_then(|av| av.as_s().ok())
        .map(String::as_str)
        .ok_or_else(|| DetectionError::Persistence(format!("Missing {} attribute", name)))
}

fn task_from_item(task_id: TaskId, item: &HashMap<String, AttributeValue>) -> Result<Task> {
    Ok(Task {
        id: task_id,
        plot_id: id_attr(item, "plot_id", PlotId::new)?,
        task_type: TaskType::parse(string_attr(item, "task_type")?),
    })
}

fn plot_from_item(plot_id: PlotId, item: &HashMap<String, AttributeValue>) -> Result<Plot> {
    Ok(Plot {
        id: plot_id,
        farm_id: id_attr(item, "farm_id", FarmId::new)?,
    })
}

#[async_trait]
impl FarmDirectory for DynamoFarmDirectory {
    async fn find_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::N(task_id.to_string()));

        let Some(item) = self.get_item(&self.tasks_table, key).await? else {
            return Ok(None);
        };
        task_from_item(task_id, &item).map(Some)
    }

    async fn find_plot(&self, plot_id: PlotId) -> Result<Option<Plot>> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::N(plot_id.to_string()));

        let Some(item) = self.get_item(&self.plots_table, key).await? else {
            return Ok(None);
        };
        plot_from_item(plot_id, &item).map(Some)
    }

    async fn farm_role(&self, farm_id: FarmId, user_id: Uuid) -> Result<Option<FarmRole>> {
        let mut key = HashMap::new();
        key.insert("farm_id".to_string(), AttributeValue::N(farm_id.to_string()));
        key.insert("user_id".to_string(), AttributeValue::S(user_id.to_string()));

        let Some(item) = self.get_item(&self.farm_members_table, key).await? else {
            return Ok(None);
        };
        Ok(Some(FarmRole::parse(string_attr(&item, "role")?)))
    }
}
