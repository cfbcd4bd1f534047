use thiserror::Error;

/// Errors shared by the quay type, crypto and relay layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuayError {
    // ─── Addressing Errors ───────────────────────────────────────────────────
    #[error("invalid logic addr: {reason}")]
    InvalidAddr { reason: String },

    // ─── Crypto Errors ───────────────────────────────────────────────────────
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    // ─── Serialization Errors ────────────────────────────────────────────────
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    #[error("deserialization error: {reason}")]
    DeserializationError { reason: String },
}

impl QuayError {
    pub(crate) fn invalid_addr(reason: impl Into<String>) -> Self {
        QuayError::InvalidAddr {
            reason: reason.into(),
        }
    }
}
