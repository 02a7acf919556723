use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Couldn't establish database connection: {0}")]
    ConnectionAcquisition(String),

    #[error("Couldn't execute query: {message}")]
    QueryExecution {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Session is closed")]
    SessionClosed,
}

impl PersistError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: message.into(),
            source: None,
        }
    }

    pub fn execution_caused_by(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::QueryExecution {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

pub type Result<T> = std::result::Result<T, PersistError>;
