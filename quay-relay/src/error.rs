use quay_types::error::QuayError;
use thiserror::Error;

/// Errors that can occur in the relay layer.
///
/// Handshake failures abort only the connection they occurred on; none of
/// them are retried here.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed or out-of-range logical address.
    #[error("invalid address: {reason}")]
    InvalidAddr { reason: String },

    /// Short read, bad length prefix or malformed frame during the handshake.
    #[error("frame error: {reason}")]
    FrameError { reason: String },

    /// The login payload failed to decrypt or deserialize.
    #[error("decrypt error: {reason}")]
    DecryptError { reason: String },

    /// The claimed node is unknown or its network address does not match.
    #[error("authentication failed: {reason}")]
    AuthError { reason: String },

    /// Requested connection mode is not available right now.
    #[error("mode rejected: {reason}")]
    ModeRejected { reason: String },

    /// No node could be resolved for an outbound destination.
    #[error("target not found: {target}")]
    RoutingError { target: String },

    /// A handshake step ran past the deadline.
    #[error("timed out during {stage}")]
    Timeout { stage: &'static str },

    /// Process shutdown interrupted the operation.
    #[error("cancelled by shutdown")]
    Cancelled,

    /// Failed to establish or maintain a connection.
    #[error("connection error: {reason}")]
    ConnectionError { reason: String },

    /// Failed to encode or decode a message.
    #[error("codec error: {reason}")]
    CodecError { reason: String },

    #[error("config error: {reason}")]
    ConfigError { reason: String },

    #[error("mesh node already started")]
    AlreadyStarted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Short label for the failure kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidAddr { .. } => "invalid_addr",
            RelayError::FrameError { .. } => "frame",
            RelayError::DecryptError { .. } => "decrypt",
            RelayError::AuthError { .. } => "auth",
            RelayError::ModeRejected { .. } => "mode_rejected",
            RelayError::RoutingError { .. } => "routing",
            RelayError::Timeout { .. } => "timeout",
            RelayError::Cancelled => "cancelled",
            RelayError::ConnectionError { .. } => "connection",
            RelayError::CodecError { .. } => "codec",
            RelayError::ConfigError { .. } => "config",
            RelayError::AlreadyStarted => "already_started",
            RelayError::Io(_) => "io",
        }
    }
}

impl From<QuayError> for RelayError {
    fn from(err: QuayError) -> Self {
        match err {
            QuayError::InvalidAddr { reason } => RelayError::InvalidAddr { reason },
            QuayError::DecryptionFailed { reason }
            | QuayError::DeserializationError { reason } => RelayError::DecryptError { reason },
            QuayError::EncryptionFailed { reason } | QuayError::SerializationError { reason } => {
                RelayError::CodecError { reason }
            }
        }
    }
}
