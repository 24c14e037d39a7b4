use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Communication error: {0}")]
    CommError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for SchedError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}
impl From<bincode::Error> for SchedError {
    fn from(e: bincode::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}
impl From<String> for SchedError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}
impl From<&str> for SchedError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}
