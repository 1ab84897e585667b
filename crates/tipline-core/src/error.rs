use thiserror::Error;

#[derive(Debug, Error)]
pub enum TiplineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Wrong passphrase, reset hardware key and corrupted blob all surface as
    /// this one variant.
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("Session not unlocked")]
    NotUnlocked,

    #[error("Content too large: {size} bytes do not fit into {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

pub type Result<T> = std::result::Result<T, TiplineError>;
