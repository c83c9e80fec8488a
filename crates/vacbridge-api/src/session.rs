// Vendor session seam
//
// One authenticated account-level connection to the vendor cloud. The
// concrete protocol (realm/resource tokens, continent routing, request
// signing) lives in the implementation; the bridge only needs these
// three operations.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::auth::Continent;
use crate::error::Error;
use crate::link::VacuumLink;

/// Token returned by a successful [`VendorSession::connect`].
///
/// The access token travels here rather than in each [`DeviceDescriptor`]:
/// it is account-scoped, and descriptors are freely cloned and logged.
#[derive(Clone)]
pub struct SessionToken {
    /// Vendor user id.
    pub uid: String,
    /// Client resource name the session was opened under.
    pub resource: String,
    /// User access token.
    pub access_token: SecretString,
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("uid", &self.uid)
            .field("resource", &self.resource)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// One vacuum as listed by the vendor for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Vendor-assigned device id.
    pub did: String,
    /// User-facing nickname, if set in the vendor app.
    #[serde(default, alias = "nick")]
    pub name: Option<String>,
    /// Device class (model family code).
    pub class: String,
    /// Device resource on the vendor message bus.
    pub resource: String,
    /// Messaging realm.
    #[serde(default = "default_realm")]
    pub realm: String,
}

fn default_realm() -> String {
    "ecouser.net".into()
}

impl DeviceDescriptor {
    /// Name for logs and accessory labels: nickname, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.did)
    }
}

/// An authenticated vendor account session.
#[async_trait]
pub trait VendorSession: Send + Sync {
    /// Log in with the account login and MD5 password digest.
    ///
    /// Fails with [`Error::Authentication`] on invalid credentials and with
    /// a transient error ([`Error::is_transient`]) on endpoint flakiness.
    async fn connect(&self, login: &str, password_digest: &SecretString)
    -> Result<SessionToken, Error>;

    /// List the devices registered to the account. An empty list is a
    /// valid answer, not an error.
    async fn list_devices(&self, token: &SessionToken) -> Result<Vec<DeviceDescriptor>, Error>;

    /// Build the control link for one device. Pure construction: no I/O
    /// happens until [`VacuumLink::connect`] is called.
    fn open_vacuum(
        &self,
        token: &SessionToken,
        device: &DeviceDescriptor,
        continent: Continent,
    ) -> Arc<dyn VacuumLink>;
}
