use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Invalid magic number in header")]
    InvalidMagic,

    #[error("Unsupported format version: {version}")]
    UnsupportedVersion { version: u16 },

    #[error("Truncated header: expected {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },

    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("Unknown encryption method id: {0}")]
    UnknownEncryptionMethod(u8),

    #[error("Unknown compression method id: {0}")]
    UnknownCompressionMethod(u8),

    #[error("Content hash mismatch for entry: {path}")]
    Integrity { path: String },

    #[error("Crypto failure: {0}")]
    Crypto(String),

    #[error("Encryption requested but capsule was built without the crypto feature")]
    CryptoUnavailable,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Compression failure: {0}")]
    Compression(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackageError>;
