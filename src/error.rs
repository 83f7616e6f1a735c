use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key management failed: {0}")]
    KeyManagement(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Key already exists: {0}")]
    Duplicate(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("No recovery id reproduces the target public key")]
    NoMatch,

    #[error("Authentication denied: {0}")]
    AuthenticationDenied(String),

    #[error("Authentication unavailable: {0}")]
    AuthenticationUnavailable(String),

    #[error("Signing request cancelled")]
    Cancelled,

    #[error("Malformed wire string: {0}")]
    Codec(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse error classification for callers that branch on failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidKey,
    KeyManagement,
    Signing,
    NoMatch,
    AuthenticationDenied,
    AuthenticationUnavailable,
    Cancelled,
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::InvalidKey(_) | VaultError::Codec(_) => ErrorKind::InvalidKey,
            VaultError::KeyManagement(_)
            | VaultError::NotFound(_)
            | VaultError::Duplicate(_)
            | VaultError::Serialization(_) => ErrorKind::KeyManagement,
            VaultError::Signing(_) => ErrorKind::Signing,
            VaultError::NoMatch => ErrorKind::NoMatch,
            VaultError::AuthenticationDenied(_) => ErrorKind::AuthenticationDenied,
            VaultError::AuthenticationUnavailable(_) => ErrorKind::AuthenticationUnavailable,
            VaultError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
