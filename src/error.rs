use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
