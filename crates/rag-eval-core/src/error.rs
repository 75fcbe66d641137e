//! Error types for the embedding layer.

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur while loading or running an embedding model.
#[derive(Error, Debug)]
pub enum RagError {
    /// Missing or contradictory configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Contract operation the adapter does not provide.
    #[error("{operation} is not implemented for {model}")]
    NotImplemented { operation: String, model: String },

    /// A runtime returned a value of the wrong shape.
    #[error("Contract violation: {message}")]
    ContractViolation { message: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Model files could not be loaded.
    #[error("Failed to load model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    /// Tokenizer failure.
    #[error("Tokenization error: {message}")]
    Tokenization { message: String },

    /// Local inference failure.
    #[error("Inference error: {message}")]
    Inference { message: String },

    /// Network failure talking to a remote service.
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Remote service answered with an error status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Remote service asked us to slow down.
    #[error("Rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    /// Model hub retrieval failure.
    #[error("Failed to download {model_id}: {reason}")]
    Download { model_id: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a not-implemented error for a contract operation.
    pub fn not_implemented(operation: impl Into<String>, model: impl Into<String>) -> Self {
        Self::NotImplemented {
            operation: operation.into(),
            model: model.into(),
        }
    }

    /// Create a contract violation error.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a model load error.
    pub fn model_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a tokenization error.
    pub fn tokenization(message: impl Into<String>) -> Self {
        Self::Tokenization {
            message: message.into(),
        }
    }

    /// Create an inference error.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a download error.
    pub fn download(model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Download {
            model_id: model_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a remote call that failed this way is worth repeating.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Get a stable error code for reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "CONFIG_ERROR",
            Self::NotImplemented { .. } => "NOT_IMPLEMENTED",
            Self::ContractViolation { .. } => "CONTRACT_VIOLATION",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::ModelLoad { .. } => "MODEL_LOAD_ERROR",
            Self::Tokenization { .. } => "TOKENIZATION_ERROR",
            Self::Inference { .. } => "INFERENCE_ERROR",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Api { .. } => "API_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Download { .. } => "DOWNLOAD_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
