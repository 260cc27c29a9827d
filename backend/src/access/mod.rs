pub mod directory;
pub mod guard;
pub mod models;
