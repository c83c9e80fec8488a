// ── Runtime bridge configuration ──
//
// Describes *how* to reach the vendor account: credentials, routing and
// connection tuning. Never touches disk; vacbridge-config builds one and
// hands it in.

use std::time::Duration;

use secrecy::SecretString;

use vacbridge_api::Credentials;

use crate::error::CoreError;
use crate::handle::DEFAULT_READY_TIMEOUT;
use crate::retry::RetryPolicy;

/// Configuration for one vendor account.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Account login (usually an e-mail address).
    pub login: String,
    /// Plain password; only its digest leaves this struct.
    pub password: SecretString,
    /// Two-letter country code used for continent routing.
    pub country_code: String,
    /// Host identifier digested into the device fingerprint.
    pub machine_id: String,
    /// Backoff for session login and device handshakes.
    pub retry: RetryPolicy,
    /// Bound on a single device handshake.
    pub ready_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(
        login: impl Into<String>,
        password: SecretString,
        country_code: impl Into<String>,
        machine_id: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            password,
            country_code: country_code.into(),
            machine_id: machine_id.into(),
            retry: RetryPolicy::default(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    /// Digest the login material into session credentials.
    pub fn credentials(&self) -> Result<Credentials, CoreError> {
        if self.login.trim().is_empty() {
            return Err(CoreError::Config {
                message: "login must not be empty".into(),
            });
        }
        Ok(Credentials::new(
            self.login.trim(),
            &self.password,
            &self.machine_id,
            &self.country_code,
        )?)
    }
}
