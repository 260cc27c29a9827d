pub mod detection_store;
pub mod dynamodb_repository;
pub mod models;
