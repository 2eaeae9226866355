use thiserror::Error;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum LlmsimError {
    #[error("OpenAI API error: {0}")]
    OpenAi(#[from] async_openai::error::OpenAIError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Model hub error: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Missing column '{0}' in table")]
    MissingColumn(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Invalid answer option: {0}")]
    InvalidOption(String),

    #[error("Model '{0}' is served by the hosted API and has no local weights")]
    HostedModel(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, LlmsimError>;
