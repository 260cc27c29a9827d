use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use shared::InferenceResultItem;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::config::{ConfigError, InferenceConfig};
use crate::detection::model::{Detection, ImageUpload};
use crate::error::{DetectionError, Result};

const USER_AGENT: &str = concat!("leafguard/", env!("CARGO_PKG_VERSION"));
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const MAX_ERROR_BODY: usize = 512;

/// Sends an image batch to the classification service.
///
/// Implementations return exactly one item per input image, in input order.
/// Per-image failures are reported as items with status `error`; an `Err` means
/// the whole call failed.
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    async fn predict(&self, images: &[ImageUpload]) -> Result<Vec<InferenceResultItem>>;
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    results: Vec<InferenceResultItem>,
}

/// Why a single attempt produced no response.
#[derive(Debug)]
pub enum SendFailure {
    /// The service was never reached, including connect timeouts.
    Connect(String),
    /// The service was reached but did not answer in time.
    Timeout(String),
    Other(String),
    /// The request could not be built; retrying cannot help.
    Rejected(DetectionError),
}

impl SendFailure {
    pub fn classify(is_connect: bool, is_timeout: bool, message: String) -> Self {
        if is_connect {
            SendFailure::Connect(message)
        } else if is_timeout {
            SendFailure::Timeout(message)
        } else {
            SendFailure::Other(message)
        }
    }
}

impl From<reqwest::Error> for SendFailure {
    fn from(e: reqwest::Error) -> Self {
        Self::classify(e.is_connect(), e.is_timeout(), e.to_string())
    }
}

/// Runs `attempt` until it yields a response, retrying only connection
/// failures. At most `max_retries + 1` attempts are made; the delay starts at
/// `backoff` and doubles up to [`MAX_BACKOFF`].
pub async fn retry_connect_failures<T, F, Fut>(
    max_retries: u32,
    backoff: Duration,
    timeout_secs: u64,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, SendFailure>>,
{
    let mut delay = backoff;
    let mut last_error = String::from("no attempt made");

    for n in 0..=max_retries {
        if n > 0 {
            log::debug!(
                "Retrying inference request (attempt {}/{}), waiting {:?}",
                n + 1,
                max_retries + 1,
                delay
            );
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, MAX_BACKOFF);
        }

        match attempt().await {
            Ok(response) => return Ok(response),
            Err(SendFailure::Connect(message)) => {
                log::warn!("Could not reach inference service: {}", message);
                last_error = message;
            }
            Err(SendFailure::Timeout(message)) => {
                log::error!("Inference request timed out: {}", message);
                return Err(DetectionError::ServiceTimeout(timeout_secs));
            }
            Err(SendFailure::Other(message)) => {
                log::error!("Inference request failed: {}", message);
                return Err(DetectionError::ServiceUnavailable(message));
            }
            Err(SendFailure::Rejected(e)) => return Err(e),
        }
    }

    Err(DetectionError::ServiceUnavailable(format!(
        "no response after {} attempts: {}",
        max_retries + 1,
        last_error
    )))
}

/// Target of a redirect response, resolved against the URL that produced it.
pub fn redirect_target(current: &Url, status: StatusCode, location: Option<&str>) -> Option<Url> {
    if !matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308) {
        return None;
    }
    current.join(location?).ok()
}

fn error_body_message<E: std::fmt::Display>(body: std::result::Result<String, E>) -> String {
    match body {
        Ok(body) => body.chars().take(MAX_ERROR_BODY).collect(),
        Err(e) => {
            log::warn!("Failed to read inference error body: {}", e);
            format!("unreadable response body: {}", e)
        }
    }
}

#[derive(Clone)]
pub struct HttpInferenceGateway {
    http_client: reqwest::Client,
    predict_url: Url,
    config: InferenceConfig,
}

impl HttpInferenceGateway {
    pub fn new(config: InferenceConfig) -> std::result::Result<Self, ConfigError> {
        let predict_url = config.predict_url()?;

        if !config.verify_tls {
            log::warn!("TLS certificate verification is disabled for the inference service");
        }

        // Redirects are followed in `send` so the multipart body can be rebuilt.
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            http_client,
            predict_url,
            config,
        })
    }

    // Rebuilt for every attempt: a multipart form is consumed by `send`.
    fn build_form(images: &[ImageUpload]) -> Result<Form> {
        images.iter().try_fold(Form::new(), |form, image| {
            let part = Part::bytes(image.data.clone())
                .file_name(image.file_name.clone())
                .mime_str(&image.content_type)
                .map_err(|e| {
                    DetectionError::Validation(format!(
                        "{}: invalid content type: {}",
                        image.file_name, e
                    ))
                })?;
            Ok(form.part("files", part))
        })
    }

    async fn send_with_retry(&self, url: &Url, images: &[ImageUpload]) -> Result<reqwest::Response> {
        retry_connect_failures(
            self.config.max_retries,
            self.config.retry_backoff(),
            self.config.timeout_secs,
            || {
                let form = Self::build_form(images);
                let request = self.http_client.post(url.clone());
                async move {
                    let form = form.map_err(SendFailure::Rejected)?;
                    request.multipart(form).send().await.map_err(SendFailure::from)
                }
            },
        )
        .await
    }

    async fn send(&self, images: &[ImageUpload]) -> Result<reqwest::Response> {
        let mut url = self.predict_url.clone();
        let mut hops = 0;

        loop {
            let response = self.send_with_retry(&url, images).await?;
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok());
            let Some(next) = redirect_target(&url, response.status(), location) else {
                return Ok(response);
            };

            hops += 1;
            if hops > self.config.max_redirects {
                return Err(DetectionError::InferenceFailure {
                    status: response.status().as_u16(),
                    message: format!("more than {} redirects", self.config.max_redirects),
                });
            }
            log::debug!("Inference service redirected {} to {}", url, next);
            url = next;
        }
    }
}

#[async_trait]
impl InferenceGateway for HttpInferenceGateway {
    async fn predict(&self, images: &[ImageUpload]) -> Result<Vec<InferenceResultItem>> {
        log::info!("Submitting {} images to {}", images.len(), self.predict_url);
        let response = self.send(images).await?;
        let status = response.status();

        if !is_accepted_status(status) {
            let message = error_body_message(response.text().await);
            log::error!("Inference service returned {}: {}", status, message);
            return Err(DetectionError::InferenceFailure {
                status: status.as_u16(),
                message,
            });
        }

        let body: PredictResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                DetectionError::ServiceTimeout(self.config.timeout_secs)
            } else {
                DetectionError::InferenceFailure {
                    status: status.as_u16(),
                    message: format!("undecodable response body: {}", e),
                }
            }
        })?;

        interpret_results(status, body.results, images.len())
    }
}

pub fn is_accepted_status(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::MULTI_STATUS
}

/// Checks that the response lines up with the submitted batch and that every
/// successful item carries a well-formed prediction.
pub fn interpret_results(
    status: StatusCode,
    results: Vec<InferenceResultItem>,
    expected: usize,
) -> Result<Vec<InferenceResultItem>> {
    let malformed = |message: String| DetectionError::InferenceFailure {
        status: status.as_u16(),
        message,
    };

    if results.len() != expected {
        return Err(malformed(format!(
            "expected {} results, service returned {}",
            expected,
            results.len()
        )));
    }

    for (index, item) in results.iter().enumerate() {
        if item.is_success() {
            Detection::from_item(item)
                .map_err(|e| malformed(format!("result {}: {}", index, e)))?;
        } else {
            log::debug!(
                "Inference item {} failed upstream: {}",
                index,
                item.error.as_deref().unwrap_or("no reason given")
            );
        }
    }

    let failed = results.iter().filter(|item| !item.is_success()).count();
    if failed > 0 {
        log::warn!("Inference partially succeeded: {}/{} items failed", failed, expected);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ClassProbabilities, ItemStatus, PestClass};

    fn success(confidence: f64) -> InferenceResultItem {
        InferenceResultItem {
            status: ItemStatus::Success,
            filename: None,
            predicted_class: Some(PestClass::Healthy),
            confidence: Some(confidence),
            probabilities: Some(ClassProbabilities {
                healthy: confidence,
                pest: 0.05,
                disease: 0.05,
            }),
            error: None,
        }
    }

    fn failure() -> InferenceResultItem {
        InferenceResultItem {
            status: ItemStatus::Error,
            filename: None,
            predicted_class: None,
            confidence: None,
            probabilities: None,
            error: Some("corrupt image".into()),
        }
    }

    #[test]
    fn accepts_only_ok_and_multi_status() {
        assert!(is_accepted_status(StatusCode::OK));
        assert!(is_accepted_status(StatusCode::MULTI_STATUS));
        assert!(!is_accepted_status(StatusCode::CREATED));
        assert!(!is_accepted_status(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn partial_success_is_passed_through_in_order() {
        let results = interpret_results(
            StatusCode::MULTI_STATUS,
            vec![success(0.9), failure(), success(0.7)],
            3,
        )
        .unwrap();
        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![ItemStatus::Success, ItemStatus::Error, ItemStatus::Success]
        );
    }

    #[test]
    fn count_mismatch_is_an_inference_failure() {
        let err = interpret_results(StatusCode::OK, vec![success(0.9)], 2).unwrap_err();
        assert!(matches!(err, DetectionError::InferenceFailure { status: 200, .. }));
    }

    #[test]
    fn out_of_range_confidence_is_an_inference_failure() {
        let err = interpret_results(StatusCode::OK, vec![success(1.7)], 1).unwrap_err();
        assert!(matches!(err, DetectionError::InferenceFailure { .. }));
    }

    #[test]
    fn form_building_keeps_source_bytes() {
        let images = vec![ImageUpload::new("a.jpg", "image/jpeg", vec![1, 2, 3])];
        HttpInferenceGateway::build_form(&images).unwrap();
        HttpInferenceGateway::build_form(&images).unwrap();
        assert_eq!(images[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn connect_failures_win_over_timeouts() {
        assert!(matches!(
            SendFailure::classify(true, true, "connect timed out".into()),
            SendFailure::Connect(_)
        ));
        assert!(matches!(
            SendFailure::classify(false, true, "read timed out".into()),
            SendFailure::Timeout(_)
        ));
        assert!(matches!(
            SendFailure::classify(false, false, "reset".into()),
            SendFailure::Other(_)
        ));
    }

    #[actix_web::test]
    async fn connect_failures_use_the_whole_retry_budget() {
        let mut attempts = 0;
        let result: Result<()> = retry_connect_failures(3, Duration::from_millis(1), 60, || {
            attempts += 1;
            async { Err(SendFailure::Connect("connection refused".into())) }
        })
        .await;

        assert_eq!(attempts, 4);
        assert!(matches!(result, Err(DetectionError::ServiceUnavailable(msg)) if msg.contains("4 attempts")));
    }

    #[actix_web::test]
    async fn recovers_when_the_service_comes_up_between_attempts() {
        let mut attempts = 0;
        let result = retry_connect_failures(3, Duration::from_millis(1), 60, || {
            attempts += 1;
            let n = attempts;
            async move {
                if n < 3 {
                    Err(SendFailure::Connect("connection refused".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
    }

    #[actix_web::test]
    async fn timeouts_and_rejections_are_not_retried() {
        let mut attempts = 0;
        let result: Result<()> = retry_connect_failures(3, Duration::from_millis(1), 42, || {
            attempts += 1;
            async { Err(SendFailure::Timeout("operation timed out".into())) }
        })
        .await;
        assert_eq!(attempts, 1);
        assert!(matches!(result, Err(DetectionError::ServiceTimeout(42))));

        let mut attempts = 0;
        let result: Result<()> = retry_connect_failures(3, Duration::from_millis(1), 42, || {
            attempts += 1;
            async { Err(SendFailure::Rejected(DetectionError::Validation("bad mime".into()))) }
        })
        .await;
        assert_eq!(attempts, 1);
        assert!(matches!(result, Err(DetectionError::Validation(_))));
    }

    #[test]
    fn redirects_resolve_against_the_current_url() {
        let current = Url::parse("http://models.internal/api/predict").unwrap();
        assert_eq!(
            redirect_target(&current, StatusCode::TEMPORARY_REDIRECT, Some("/v2/predict"))
                .unwrap()
                .as_str(),
            "http://models.internal/v2/predict"
        );
        assert_eq!(
            redirect_target(&current, StatusCode::PERMANENT_REDIRECT, Some("https://other/predict"))
                .unwrap()
                .as_str(),
            "https://other/predict"
        );
        assert!(redirect_target(&current, StatusCode::TEMPORARY_REDIRECT, None).is_none());
        assert!(redirect_target(&current, StatusCode::OK, Some("/v2/predict")).is_none());
    }

    #[test]
    fn unreadable_error_bodies_are_reported() {
        let message = error_body_message::<&str>(Err("connection reset"));
        assert!(message.contains("connection reset"));
        let message = error_body_message::<&str>(Ok("x".repeat(2000)));
        assert_eq!(message.len(), MAX_ERROR_BODY);
    }
}
