//! Custom error types for translation operations

use thiserror::Error;

/// Translation-related errors
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Model or tokenizer could not be loaded
    #[error("Model load error: {message}")]
    ModelLoadError {
        message: String,
    },

    /// Inference pass failed
    #[error("Inference error: {message}")]
    InferenceError {
        message: String,
    },

    /// Tokenizer rejected the input or produced unusable ids
    #[error("Tokenization error: {message}")]
    TokenizationError {
        message: String,
    },

    /// Remote API answered with a non-success status
    #[error("API error: {status} - {message}")]
    ApiError {
        status: u16,
        message: String,
    },

    /// Network error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
    },

    /// Invalid response from API
    #[error("Invalid response: {message}")]
    InvalidResponseError {
        message: String,
    },

    /// File operation error
    #[error("File error: {path} - {message}")]
    FileError {
        path: String,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Invalid file format
    #[error("Invalid file format: {format}")]
    InvalidFormat {
        format: String,
    },

    /// Wrapper for anyhow errors
    #[error("Internal error: {0}")]
    InternalError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Zip container error
    #[error("Zip error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    /// ONNX runtime error
    #[error("ORT error: {0}")]
    OrtError(#[from] ort::Error),

    /// Tensor shape error
    #[error("ndarray shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    /// Layered config error
    #[error("Config source error: {0}")]
    ConfigSourceError(#[from] config::ConfigError),
}

impl From<anyhow::Error> for TranslationError {
    fn from(err: anyhow::Error) -> Self {
        TranslationError::InternalError(err.to_string())
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslationError>;
