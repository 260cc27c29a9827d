use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DetectionError, Result};

macro_rules! positive_id {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub struct $name(i64);

        impl $name {
            pub fn new(value: i64) -> Result<Self> {
                if value <= 0 {
                    return Err(DetectionError::Validation(format!(
                        "{} must be a positive integer, got {}",
                        $label, value
                    )));
                }
                Ok(Self(value))
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = DetectionError;

            fn try_from(value: i64) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = DetectionError;

            fn from_str(s: &str) -> Result<Self> {
                let value = s.trim().parse::<i64>().map_err(|_| {
                    DetectionError::Validation(format!("{} must be an integer, got '{}'", $label, s))
                })?;
                Self::new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

positive_id!(TaskId, "task_id");
positive_id!(PlotId, "plot_id");
positive_id!(FarmId, "farm_id");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskType {
    PhytosanitaryMonitoring,
    Other(String),
}

impl TaskType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "phytosanitary_monitoring" => TaskType::PhytosanitaryMonitoring,
            other => TaskType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::PhytosanitaryMonitoring => write!(f, "phytosanitary_monitoring"),
            TaskType::Other(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub plot_id: PlotId,
    pub task_type: TaskType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plot {
    pub id: PlotId,
    pub farm_id: FarmId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FarmRole {
    Admin,
    Member(String),
}

impl FarmRole {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => FarmRole::Admin,
            other => FarmRole::Member(other.to_string()),
        }
    }
}

/// Task and plot that passed every access check for the acting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedTarget {
    pub task: Task,
    pub plot: Plot,
}
