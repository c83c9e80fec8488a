use thiserror::Error;

/// Top-level error type for the `vacbridge-api` crate.
///
/// Covers every failure mode a vendor session or device link can report.
/// `vacbridge-core` maps these into user-facing variants and decides what
/// is worth retrying via [`Error::is_transient`].
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected (wrong credentials, account locked, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// The vendor endpoint failed in a way that may succeed on retry.
    #[error("Vendor endpoint unavailable: {reason}")]
    Transient { reason: String },

    /// Request or handshake timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The device refused the control-channel handshake.
    #[error("Device rejected handshake: {reason}")]
    Rejected { reason: String },

    /// The device link was torn down while a call was in flight.
    #[error("Vacuum link closed")]
    LinkClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// Malformed or unexpected telemetry, with the raw payload for debugging.
    #[error("Vendor protocol error: {message}")]
    Protocol { message: String, payload: String },

    // ── Routing ─────────────────────────────────────────────────────
    /// Country code missing from the continent routing table.
    #[error("Unknown country code: {0}")]
    UnknownCountry(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if the vendor rejected the credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    pub(crate) fn protocol(message: impl Into<String>, payload: &serde_json::Value) -> Self {
        Self::Protocol {
            message: message.into(),
            payload: payload.to_string(),
        }
    }
}
