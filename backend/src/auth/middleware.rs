use actix_web::dev::{Payload, ServiceRequest};
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest, web};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use futures::future::{Ready, ready};

use super::jwt::JwtService;
use super::models::AuthenticatedUser;
use crate::error::DetectionError;

/// Validator for `HttpAuthentication::bearer`: verifies the token and stores
/// the acting user in the request extensions.
pub async fn bearer_validator(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    let Some(jwt_service) = req.app_data::<web::Data<JwtService>>().cloned() else {
        log::error!("JwtService is not registered as app data");
        return Err((
            DetectionError::Unauthorized("authentication is not configured".to_string()).into(),
            req,
        ));
    };

    match jwt_service.authenticate(credentials.token()) {
        Ok(user_id) => {
            req.extensions_mut().insert(AuthenticatedUser(user_id));
            Ok(req)
        }
        Err(e) => {
            log::warn!("Bearer token rejected for path {}: {}", req.path(), e);
            Err((DetectionError::Unauthorized(e.to_string()).into(), req))
        }
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = DetectionError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req.extensions().get::<AuthenticatedUser>().copied();
        ready(user.ok_or_else(|| {
            log::warn!("No authenticated user on request for path {}", req.path());
            DetectionError::Unauthorized("missing or invalid authorization token".to_string())
        }))
    }
}
