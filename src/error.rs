use thiserror::Error;

use crate::digest::gemini::UsageMetadata;

#[derive(Debug, Error)]
pub enum QqsumError {
    #[error("configuration invalid: {0}")]
    Configuration(String),
    #[error("gateway request failed: {0}")]
    Transport(String),
    #[error("gateway data invalid: {0}")]
    Data(String),
    #[error("media unavailable: {0}")]
    Media(String),
    #[error("gemini stream interrupted: {message}")]
    Stream {
        message: String,
        usage: Option<UsageMetadata>,
    },
}

impl QqsumError {
    pub fn configuration(text: impl Into<String>) -> Self {
        Self::Configuration(text.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
