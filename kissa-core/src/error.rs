use thiserror::Error;

use crate::engine::EngineError;
use crate::sheets::SheetsError;

#[derive(Error, Debug)]
pub enum KissaError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Sheets error: {0}")]
    Sheets(#[from] SheetsError),

    #[error("Other error: {0}")]
    Other(String),
}
