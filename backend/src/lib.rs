pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod detection;
pub mod error;
pub mod inference;
pub mod routes;
pub mod storage;
