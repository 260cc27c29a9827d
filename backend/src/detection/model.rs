use serde::{Deserialize, Serialize};
use shared::{ClassProbabilities, InferenceResultItem, PestClass};

use crate::error::{DetectionError, Result};

pub const MAX_OBSERVATIONS_LEN: usize = 1000;

fn check_unit_interval(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(DetectionError::Validation(format!(
            "{} must be between 0 and 1, got {}",
            field, value
        )));
    }
    Ok(value)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Model confidence for the predicted class, stored with two decimals.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    pub fn new(value: f64) -> Result<Self> {
        check_unit_interval("confidence", value).map(|v| Self(round_to(v, 2)))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Confidence {
    type Error = DetectionError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> f64 {
        c.0
    }
}

/// Probability of a single class, stored with four decimals.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Probability(f64);

impl Probability {
    pub fn new(field: &str, value: f64) -> Result<Self> {
        check_unit_interval(field, value).map(|v| Self(round_to(v, 4)))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Probability {
    type Error = DetectionError;

    fn try_from(value: f64) -> Result<Self> {
        Self::new("probability", value)
    }
}

impl From<Probability> for f64 {
    fn from(p: Probability) -> f64 {
        p.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub healthy: Probability,
    pub pest: Probability,
    pub disease: Probability,
}

impl Probabilities {
    pub fn from_wire(raw: &ClassProbabilities) -> Result<Self> {
        Ok(Self {
            healthy: Probability::new("probabilities.healthy", raw.healthy)?,
            pest: Probability::new("probabilities.pest", raw.pest)?,
            disease: Probability::new("probabilities.disease", raw.disease)?,
        })
    }
}

/// Free-text notes attached to a session or a detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Observations(String);

impl Observations {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(DetectionError::Validation(
                "observations must not be blank".to_string(),
            ));
        }
        if text.chars().count() > MAX_OBSERVATIONS_LEN {
            return Err(DetectionError::Validation(format!(
                "observations must be at most {} characters",
                MAX_OBSERVATIONS_LEN
            )));
        }
        Ok(Self(text))
    }

    /// Blank input means "no observations" rather than an error.
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => Self::new(text).map(Some),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Observations {
    type Error = DetectionError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Observations> for String {
    fn from(o: Observations) -> String {
        o.0
    }
}

/// The validated payload of a successful inference item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub predicted_class: PestClass,
    pub confidence: Confidence,
    pub probabilities: Probabilities,
}

impl Detection {
    pub fn from_item(item: &InferenceResultItem) -> Result<Self> {
        let predicted_class = item.predicted_class.ok_or_else(|| {
            DetectionError::Validation("successful item is missing predicted_class".to_string())
        })?;
        let confidence = item.confidence.ok_or_else(|| {
            DetectionError::Validation("successful item is missing confidence".to_string())
        })?;
        let probabilities = item.probabilities.as_ref().ok_or_else(|| {
            DetectionError::Validation("successful item is missing probabilities".to_string())
        })?;
        Ok(Self {
            predicted_class,
            confidence: Confidence::new(confidence)?,
            probabilities: Probabilities::from_wire(probabilities)?,
        })
    }
}

/// An image received from the caller. The bytes stay owned here for the
/// whole request so inference and archival read the same buffer.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl ImageUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data,
        }
    }

    /// Declared MIME essence, lowercased and without parameters.
    pub fn mime_essence(&self) -> String {
        self.content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedImage {
    pub url: String,
    pub storage_id: String,
}
