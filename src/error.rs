use thiserror::Error;

#[derive(Error, Debug)]
pub enum CnpError {
    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    #[error("Failed to decode message on {topic}: {reason}")]
    Decode { topic: String, reason: String },

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Message bus closed")]
    BusClosed,
}

impl CnpError {
    pub fn decode(topic: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CnpError::Decode {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CnpError>;
