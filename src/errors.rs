//! Error types for the KERI core library.

use thiserror::Error;

/// Errors raised by CESR primitive material handling.
#[derive(Error, Debug)]
pub enum MatterError {
    /// Stream underflow: more bytes are needed before the value can be
    /// extracted. Non-fatal; the caller should await more input.
    #[error("shortage: need {needed} more bytes")]
    Shortage { needed: usize },

    #[error("unknown or unsupported code = {0}")]
    InvalidCode(String),

    #[error("invalid raw size = {size} for code = {code}")]
    RawSize { code: String, size: usize },

    #[error("invalid qualified material = {0}")]
    InvalidMaterial(String),

    #[error("invalid Base64 = {0}")]
    InvalidBase64(String),

    #[error("invalid index = {0}")]
    InvalidIndex(u64),

    #[error("invalid count = {0}")]
    InvalidCount(u64),

    #[error("empty material")]
    EmptyMaterial,

    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Errors raised by event validation and stream processing.
#[derive(Error, Debug)]
pub enum KeriError {
    #[error("value error: {0}")]
    ValueError(String),

    /// Stream underflow while parsing a framed message.
    #[error("short stream: need {needed} more bytes")]
    ShortageError { needed: usize },

    /// Version string missing, malformed, or incompatible major version.
    #[error("invalid version string: {0}")]
    VersionError(String),

    #[error("deserialization error: {0}")]
    DeserializeError(String),

    /// Event violates an invariant of the current key state.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Prefix derivation inconsistent with event contents.
    #[error("derivation error: {0}")]
    DerivationError(String),

    /// Event signatures do not yet satisfy the signing threshold.
    #[error("missing signatures: {0}")]
    MissingSignatureError(String),

    /// Event witness receipts do not yet satisfy the witness threshold.
    #[error("missing witness receipts: {0}")]
    MissingWitnessSignatureError(String),

    /// Delegation anchor not yet present in the delegator's KEL.
    #[error("missing delegation anchor: {0}")]
    MissingDelegationError(String),

    /// Event references a prior event not yet in the KEL.
    #[error("out of order: {0}")]
    OutOfOrderError(String),

    /// Conflicting event at an already first-seen sequence number.
    #[error("likely duplicitous: {0}")]
    LikelyDuplicitousError(String),

    /// Receipt references an event not yet in the KEL.
    #[error("unverified receipt: {0}")]
    UnverifiedReceiptError(String),

    #[error("unverified witness receipt: {0}")]
    UnverifiedWitnessReceiptError(String),

    #[error("unverified transferable receipt: {0}")]
    UnverifiedTransferableReceiptError(String),

    #[error("query not found: {0}")]
    QueryNotFoundError(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("matter error: {0}")]
    MatterError(#[from] MatterError),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, KeriError>;
