use thiserror::Error;

/// Failures at the representation boundary.
///
/// The diff engine itself is total; only decoding a serialized diff can fail.
#[derive(Debug, Error)]
pub enum DiffError {
    #[error("Invalid diff representation: {0}")]
    InvalidRepresentation(String),

    #[error("Unknown diff side `{0}` (expected insert|delete)")]
    UnknownSide(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}
