use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("API key not found. Set GEMINI_API_KEY or add api_key to the config file")]
    MissingApiKey,

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini API error {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Gemini API returned no text in the response candidates")]
    EmptyResponse,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    /// Short machine-readable kind, reported in reply metadata
    pub fn code(&self) -> String {
        match self {
            GatewayError::MissingApiKey => "MISSING_API_KEY".to_string(),
            GatewayError::Http(_) => "NETWORK".to_string(),
            GatewayError::Api { status, code, .. } => {
                code.clone().unwrap_or_else(|| status.to_string())
            }
            GatewayError::EmptyResponse => "EMPTY_RESPONSE".to_string(),
            GatewayError::Timeout(_) => "TIMEOUT".to_string(),
        }
    }
}

#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage initialization failed: {message}")]
    InitializationError { message: String },
}

pub type StorageResult<T> = Result<T, StorageError>;
