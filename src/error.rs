use thiserror::Error;

/// Errors that can occur while parsing, resolving or playing a VAST ad
#[derive(Error, Debug)]
pub enum VastError {
    #[error("Failed to parse XML: {0}")]
    XmlParseError(#[from] quick_xml::Error),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unsupported VAST feature: {0}")]
    UnsupportedFeature(String),

    #[error("Document has no wrapper to attach")]
    NoWrapper,

    #[error("Wrapper link already resolved")]
    WrapperAlreadyResolved,

    #[error("Attaching this document would create a wrapper cycle")]
    WrapperCycle,

    #[error("Maximum wrapper depth of {0} exceeded")]
    WrapperDepthExceeded(usize),

    #[error("Failed to fetch VAST: {0}")]
    FetchError(String),

    #[error("Playback session is no longer running")]
    SessionClosed,

    #[error("Unknown error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VastError>;
