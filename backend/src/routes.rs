use actix_multipart::{Field, Multipart};
use actix_web::{HttpResponse, web};
use actix_web_httpauth::middleware::HttpAuthentication;
use futures::TryStreamExt;
use serde_json::json;
use shared::DetectionResponse;
use uuid::Uuid;

use crate::access::models::TaskId;
use crate::auth::middleware::bearer_validator;
use crate::auth::models::AuthenticatedUser;
use crate::detection::model::{ImageUpload, Observations};
use crate::detection::service::{DetectionRequest, DetectionService};
use crate::detection::validator::{MAX_BATCH_SIZE, MAX_IMAGE_SIZE};
use crate::error::DetectionError;

const MAX_TEXT_FIELD: usize = 16 * 1024;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(
            web::scope("/api")
                .wrap(HttpAuthentication::bearer(bearer_validator))
                .service(web::resource("/detections").route(web::post().to(create_detections)))
                .service(
                    web::resource("/monitoring-sessions/{session_id}")
                        .route(web::get().to(get_session)),
                ),
        );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

#[derive(Default)]
struct DetectionForm {
    images: Vec<ImageUpload>,
    task_id: Option<String>,
    observations: Option<String>,
}

fn multipart_error(e: impl std::fmt::Display) -> DetectionError {
    DetectionError::Validation(format!("invalid multipart body: {}", e))
}

async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, DetectionError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
        if data.len() + chunk.len() > limit {
            return Err(DetectionError::Validation(format!(
                "field '{}' exceeds {} bytes",
                field.name().unwrap_or_default(),
                limit
            )));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn read_text_field(field: &mut Field) -> Result<String, DetectionError> {
    let data = read_field(field, MAX_TEXT_FIELD).await?;
    String::from_utf8(data)
        .map_err(|_| DetectionError::Validation("text fields must be UTF-8".to_string()))
}

async fn read_detection_form(mut payload: Multipart) -> Result<DetectionForm, DetectionError> {
    let mut form = DetectionForm::default();

    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "images" => {
                // Refuse the extra part before buffering it.
                if form.images.len() >= MAX_BATCH_SIZE {
                    return Err(DetectionError::Validation(format!(
                        "a batch may contain at most {} images",
                        MAX_BATCH_SIZE
                    )));
                }
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("image_{}", form.images.len()));
                let content_type = field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let data = read_field(&mut field, MAX_IMAGE_SIZE).await?;
                form.images.push(ImageUpload::new(file_name, content_type, data));
            }
            "task_id" => form.task_id = Some(read_text_field(&mut field).await?),
            "observations" => form.observations = Some(read_text_field(&mut field).await?),
            other => {
                log::debug!("Ignoring unexpected form field '{}'", other);
                read_field(&mut field, MAX_IMAGE_SIZE).await?;
            }
        }
    }
    Ok(form)
}

async fn create_detections(
    service: web::Data<DetectionService>,
    user: AuthenticatedUser,
    payload: Multipart,
) -> Result<HttpResponse, DetectionError> {
    let form = read_detection_form(payload).await?;
    let task_id: TaskId = form
        .task_id
        .as_deref()
        .ok_or_else(|| DetectionError::Validation("task_id is required".to_string()))?
        .parse()?;
    let observations = Observations::parse_optional(form.observations.as_deref())?;

    log::info!(
        "Detection request from user {} for task {} with {} images",
        user.0,
        task_id,
        form.images.len()
    );

    let outcome = service
        .detect(DetectionRequest {
            images: form.images,
            task_id,
            observations,
            user_id: user.0,
        })
        .await
        .inspect_err(|e| log::warn!("Detection request for task {} failed: {}", task_id, e))?;

    Ok(HttpResponse::Ok().json(DetectionResponse {
        session_id: outcome.session.id,
        results: outcome.results,
    }))
}

async fn get_session(
    service: web::Data<DetectionService>,
    user: AuthenticatedUser,
    path: web::Path<String>,
) -> Result<HttpResponse, DetectionError> {
    let session_id = Uuid::parse_str(&path.into_inner())
        .map_err(|_| DetectionError::Validation("Invalid UUID format".to_string()))?;

    let details = service
        .store()
        .find_session(session_id)
        .await?
        .ok_or_else(|| DetectionError::NotFound(format!("session {} does not exist", session_id)))?;

    service
        .guard()
        .authorize(details.session.task_id, user.0)
        .await?;

    log::info!("Retrieved session {} for user {}", session_id, user.0);
    Ok(HttpResponse::Ok().json(details))
}
