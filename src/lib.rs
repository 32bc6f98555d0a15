pub mod aggregate;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod jobs;
pub mod models;
pub mod schema;
pub mod search;
pub mod state;
pub mod storage;
pub mod workers;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use state::AppState;
