// vacbridge-core: event-driven state sync between robot vacuums and
// smart-home accessories.

pub mod accessory;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod handle;
pub mod reconciler;
pub mod retry;
pub mod speed;

// ── Primary re-exports ──────────────────────────────────────────────
pub use accessory::{
    AccessoryCharacteristicSet, AccessoryStore, Characteristic, CharacteristicValue,
    MemoryAccessoryStore, RotationDirection,
};
pub use config::BridgeConfig;
pub use discovery::{DiscoveryEvent, DiscoveryOrchestrator, StartedDevice};
pub use error::CoreError;
pub use event::{EventKind, VacuumEvent};
pub use handle::{ConnectionState, Subscription, VacuumHandle, WeakVacuumHandle};
pub use reconciler::StateReconciler;
pub use retry::{RetryPolicy, RetryableConnector};
pub use speed::{LinearSpeedMapping, SpeedMapping};

// Vendor-layer types that appear in this crate's public API.
pub use vacbridge_api::{
    ChargeStatus, CleanMode, CleanSpeed, Credentials, DeviceDescriptor, VacuumCommand,
    VacuumTelemetry,
};
