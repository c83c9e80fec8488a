// vacbridge-api: vendor-facing seam for cloud-connected robot vacuums.
//
// The vendor's session protocol and device wire protocol live behind the
// `VendorSession` and `VacuumLink` traits. This crate owns the error
// taxonomy, credential digests, and decoding of raw vendor events into
// typed telemetry.

pub mod auth;
pub mod error;
pub mod link;
pub mod session;
pub mod telemetry;

pub use auth::{Continent, Credentials, md5_hex};
pub use error::Error;
pub use link::{VacuumCommand, VacuumLink, VendorEvent};
pub use session::{DeviceDescriptor, SessionToken, VendorSession};
pub use telemetry::{ChargeStatus, CleanMode, CleanSpeed, VacuumTelemetry};
