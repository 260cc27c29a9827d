use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use std::sync::Arc;

use leafguard::access::directory::DynamoFarmDirectory;
use leafguard::access::guard::AccessGuard;
use leafguard::auth::jwt::JwtService;
use leafguard::config::AppConfig;
use leafguard::db::dynamodb_repository::DynamoDbRepository;
use leafguard::detection::service::DetectionService;
use leafguard::inference::gateway::HttpInferenceGateway;
use leafguard::routes::configure_routes;
use leafguard::storage::s3_service::S3Service;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let gateway = HttpInferenceGateway::new(config.inference.clone()).map_err(|e| {
        log::error!("Failed to create inference gateway: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;
    log::info!(
        "Inference service: {} (timeout {}s, {} retries)",
        config.inference.service_url,
        config.inference.timeout_secs,
        config.inference.max_retries
    );

    let mut aws_loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = config.storage.region.clone() {
        aws_loader = aws_loader.region(aws_config::Region::new(region));
    }
    let aws_config = aws_loader.load().await;

    let dynamodb_client = DynamoDbClient::new(&aws_config);
    let s3_client = S3Client::new(&aws_config);

    let directory = DynamoFarmDirectory::new(
        dynamodb_client.clone(),
        config.tables.tasks.clone(),
        config.tables.plots.clone(),
        config.tables.farm_members.clone(),
    );
    let db_repo = DynamoDbRepository::new(
        dynamodb_client,
        config.tables.sessions.clone(),
        config.tables.detections.clone(),
    );
    let s3_service = S3Service::new(s3_client, &config.storage);

    let detection_service = DetectionService::new(
        Arc::new(gateway),
        AccessGuard::new(Arc::new(directory)),
        Arc::new(s3_service),
        Arc::new(db_repo),
        config.detection.clone(),
    );
    let jwt_service = JwtService::new(&config.auth.jwt_secret);

    let bind_address = format!("0.0.0.0:{}", config.server.port);
    log::info!(
        "Starting server on {} (environment: {})",
        bind_address,
        config.detection.environment
    );

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(detection_service.clone()))
            .app_data(web::Data::new(jwt_service.clone()))
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
