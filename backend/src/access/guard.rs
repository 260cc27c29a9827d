use std::sync::Arc;
use uuid::Uuid;

use crate::access::directory::FarmDirectory;
use crate::access::models::{AuthorizedTarget, FarmRole, TaskId, TaskType};
use crate::error::{DetectionError, Result};

#[derive(Clone)]
pub struct AccessGuard {
    directory: Arc<dyn FarmDirectory>,
}

impl AccessGuard {
    pub fn new(directory: Arc<dyn FarmDirectory>) -> Self {
        Self { directory }
    }

    /// Checks that the task exists, is a phytosanitary monitoring task, sits on
    /// an existing plot, and that `user_id` administers the plot's farm.
    pub async fn authorize(&self, task_id: TaskId, user_id: Uuid) -> Result<AuthorizedTarget> {
        let task = self
            .directory
            .find_task(task_id)
            .await?
            .ok_or_else(|| DetectionError::NotFound(format!("task {} does not exist", task_id)))?;

        if task.task_type != TaskType::PhytosanitaryMonitoring {
            return Err(DetectionError::InvalidState(format!(
                "task {} is of type '{}', expected '{}'",
                task_id,
                task.task_type,
                TaskType::PhytosanitaryMonitoring
            )));
        }

        let plot = self
            .directory
            .find_plot(task.plot_id)
            .await?
            .ok_or_else(|| {
                DetectionError::NotFound(format!(
                    "plot {} of task {} does not exist",
                    task.plot_id, task_id
                ))
            })?;

        match self.directory.farm_role(plot.farm_id, user_id).await? {
            Some(FarmRole::Admin) => {
                log::debug!(
                    "User {} authorized for task {} on farm {}",
                    user_id,
                    task_id,
                    plot.farm_id
                );
                Ok(AuthorizedTarget { task, plot })
            }
            _ => Err(DetectionError::Forbidden(format!(
                "user {} is not an administrator of farm {}",
                user_id, plot.farm_id
            ))),
        }
    }
}
