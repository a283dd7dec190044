//! Error types for the voice satellite

use thiserror::Error;

/// Result type alias for satellite operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice satellite
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed frame or unexpected message on the hub connection
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Audio device, decoding or playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// Entity registration or handler error
    #[error("entity error: {0}")]
    Entity(String),

    /// Wake arbitration error
    #[error("arbiter error: {0}")]
    Arbiter(String),

    /// Discovery (mDNS) error
    #[error("discovery error: {0}")]
    Discovery(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Protobuf decode error
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
