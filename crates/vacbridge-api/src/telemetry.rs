//! Typed vacuum telemetry.
//!
//! Decodes the raw [`VendorEvent`]s a link pushes into [`VacuumTelemetry`].
//! The vendor stream is loosely typed: the same event may carry a number or
//! a numeric string, and status strings come in whatever case the firmware
//! chose. Anything that cannot be decoded is an [`Error::Protocol`]; events
//! the bridge does not consume decode to `None`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{EnumString, FromRepr};

use crate::error::Error;
use crate::link::VendorEvent;

// ── Status enums ─────────────────────────────────────────────────────

/// Charging status reported by the dock.
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ChargeStatus {
    Charging,
    Returning,
    Idle,
    #[strum(default)]
    Other(String),
}

impl ChargeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Charging => "charging",
            Self::Returning => "returning",
            Self::Idle => "idle",
            Self::Other(s) => s,
        }
    }
}

/// Cleaning mode reported by the vacuum.
#[derive(Debug, Clone, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CleanMode {
    Auto,
    Edge,
    Spot,
    SpotArea,
    CustomArea,
    SingleRoom,
    Stop,
    Pause,
    Idle,
    Returning,
    #[strum(default)]
    Other(String),
}

impl CleanMode {
    /// Stop, pause and idle are the resting modes; every other mode,
    /// including ones this crate does not know, counts as cleaning.
    pub fn is_paused_or_stopped(&self) -> bool {
        matches!(self, Self::Stop | Self::Pause | Self::Idle)
    }

    pub fn is_cleaning(&self) -> bool {
        !self.is_paused_or_stopped()
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Auto => "auto",
            Self::Edge => "edge",
            Self::Spot => "spot",
            Self::SpotArea => "spot_area",
            Self::CustomArea => "custom_area",
            Self::SingleRoom => "single_room",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Idle => "idle",
            Self::Returning => "returning",
            Self::Other(s) => s,
        }
    }
}

/// Vendor suction level. The discriminant is the vendor's wire code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, FromRepr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[repr(u8)]
pub enum CleanSpeed {
    Silent = 1,
    #[strum(serialize = "standard", serialize = "normal")]
    Standard = 2,
    #[strum(serialize = "strong", serialize = "high")]
    Strong = 3,
    #[strum(serialize = "max", serialize = "ultrastrong")]
    Max = 4,
}

impl CleanSpeed {
    #[allow(clippy::as_conversions)]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CleanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for CleanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Silent => "silent",
            Self::Standard => "standard",
            Self::Strong => "strong",
            Self::Max => "max",
        };
        f.write_str(name)
    }
}

// ── VacuumTelemetry ──────────────────────────────────────────────────

/// One decoded state notification from a vacuum.
#[derive(Debug, Clone, PartialEq)]
pub enum VacuumTelemetry {
    /// Battery charge in percent, as reported (not yet clamped).
    BatteryInfo(f64),
    ChargeState(ChargeStatus),
    CleanReport(CleanMode),
    CleanSpeed(CleanSpeed),
    /// Error message from the device.
    Error(String),
}

impl VacuumTelemetry {
    pub const BATTERY_INFO: &'static str = "BatteryInfo";
    pub const CHARGE_STATE: &'static str = "ChargeState";
    pub const CLEAN_REPORT: &'static str = "CleanReport";
    pub const CLEAN_SPEED: &'static str = "CleanSpeed";
    pub const ERROR: &'static str = "Error";

    /// Decode a raw vendor event.
    ///
    /// Returns `Ok(None)` for event names the bridge does not consume and
    /// [`Error::Protocol`] when a consumed event carries a malformed body.
    pub fn decode(event: &VendorEvent) -> Result<Option<Self>, Error> {
        let payload = &event.payload;
        let telemetry = match event.name.as_str() {
            Self::BATTERY_INFO => Self::BatteryInfo(decode_percent(payload)?),
            Self::CHARGE_STATE => Self::ChargeState(decode_status(payload)?),
            Self::CLEAN_REPORT => Self::CleanReport(decode_status(payload)?),
            Self::CLEAN_SPEED => Self::CleanSpeed(decode_speed(payload)?),
            Self::ERROR => Self::Error(decode_message(payload)),
            _ => return Ok(None),
        };
        Ok(Some(telemetry))
    }

    /// The vendor event name this telemetry was decoded from.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BatteryInfo(_) => Self::BATTERY_INFO,
            Self::ChargeState(_) => Self::CHARGE_STATE,
            Self::CleanReport(_) => Self::CLEAN_REPORT,
            Self::CleanSpeed(_) => Self::CLEAN_SPEED,
            Self::Error(_) => Self::ERROR,
        }
    }
}

// ── Payload decoding ─────────────────────────────────────────────────

fn decode_percent(payload: &serde_json::Value) -> Result<f64, Error> {
    let value = match payload {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::protocol("battery level is not a finite number", payload))
}

fn decode_status<T>(payload: &serde_json::Value) -> Result<T, Error>
where
    T: FromStr,
{
    let text = payload
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::protocol("status is not a non-empty string", payload))?;
    T::from_str(text).map_err(|_| Error::protocol("unparseable status", payload))
}

fn decode_speed(payload: &serde_json::Value) -> Result<CleanSpeed, Error> {
    let speed = match payload {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|code| u8::try_from(code).ok())
            .and_then(CleanSpeed::from_repr),
        serde_json::Value::String(s) => {
            let s = s.trim();
            match s.parse::<u8>() {
                Ok(code) => CleanSpeed::from_repr(code),
                Err(_) => s.parse().ok(),
            }
        }
        _ => None,
    };
    speed.ok_or_else(|| Error::protocol("unknown clean speed", payload))
}

fn decode_message(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "unknown error".into(),
        other => other.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
