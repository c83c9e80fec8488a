// Per-device control link
//
// The vendor's device channel: a handshake, a fire-and-forget command
// sink, and a broadcast stream of raw events. Implementations push every
// event they receive; decoding happens in `telemetry`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Error;

/// A raw event pushed by the vendor for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorEvent {
    /// Event name, e.g. `"BatteryInfo"`, `"CleanReport"`.
    pub name: String,
    /// Event body exactly as the vendor library produced it.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl VendorEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// A command sent to a vacuum: a vendor command name plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VacuumCommand {
    name: String,
    args: Vec<String>,
}

impl VacuumCommand {
    pub const GET_BATTERY_STATE: &'static str = "GetBatteryState";
    pub const GET_CHARGE_STATE: &'static str = "GetChargeState";
    pub const GET_CLEAN_STATE: &'static str = "GetCleanState";
    pub const GET_CLEAN_SPEED: &'static str = "GetCleanSpeed";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The state queries issued whenever a device becomes ready, in order:
    /// battery, charge, clean, speed.
    pub fn baseline_queries() -> [Self; 4] {
        [
            Self::new(Self::GET_BATTERY_STATE),
            Self::new(Self::GET_CHARGE_STATE),
            Self::new(Self::GET_CLEAN_STATE),
            Self::new(Self::GET_CLEAN_SPEED),
        ]
    }
}

impl fmt::Display for VacuumCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}({})", self.name, self.args.join(", "))
        }
    }
}

/// Control channel to a single vacuum.
#[async_trait]
pub trait VacuumLink: Send + Sync {
    /// Perform the control-channel handshake. Resolves once the device has
    /// acknowledged; fails with [`Error::Rejected`] on a nack and with a
    /// transient error when the endpoint misbehaves.
    async fn connect(&self) -> Result<(), Error>;

    /// Send one command. Only called after a successful `connect`.
    async fn run(&self, command: &VacuumCommand) -> Result<(), Error>;

    /// Subscribe to the device's raw event stream.
    fn subscribe(&self) -> broadcast::Receiver<Arc<VendorEvent>>;

    /// Tear down the connection. Default is a no-op for links without
    /// persistent state.
    fn disconnect(&self) {}
}
