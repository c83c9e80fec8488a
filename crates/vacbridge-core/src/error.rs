// ── Core error types ──
//
// User-facing errors from vacbridge-core. Consumers never see the raw
// vendor taxonomy; the `From<vacbridge_api::Error>` impl translates it
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach vendor: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Vendor request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Device rejected the handshake: {reason}")]
    Rejected { reason: String },

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Vendor protocol error: {message}")]
    Protocol { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Returns `true` for failures a later attempt may not repeat.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::RetriesExhausted { .. }
        )
    }
}

// ── Conversion from vendor-layer errors ──────────────────────────────

impl From<vacbridge_api::Error> for CoreError {
    fn from(err: vacbridge_api::Error) -> Self {
        match err {
            vacbridge_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            vacbridge_api::Error::Transient { reason } => CoreError::ConnectionFailed { reason },
            vacbridge_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            vacbridge_api::Error::Rejected { reason } => CoreError::Rejected { reason },
            vacbridge_api::Error::LinkClosed => CoreError::ConnectionFailed {
                reason: "vacuum link closed".into(),
            },
            vacbridge_api::Error::Protocol { message, payload: _ } => {
                CoreError::Protocol { message }
            }
            vacbridge_api::Error::UnknownCountry(code) => CoreError::Config {
                message: format!("unknown country code '{code}'"),
            },
        }
    }
}
