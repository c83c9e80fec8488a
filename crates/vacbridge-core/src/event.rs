// ── Per-device events ──
//
// Everything a `VacuumHandle` emits to its subscribers: lifecycle
// notifications from the handshake plus decoded telemetry.

use strum::Display;

use vacbridge_api::VacuumTelemetry;

/// The kind of a [`VacuumEvent`]. Subscriptions are keyed by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum EventKind {
    #[strum(serialize = "ready")]
    Ready,
    #[strum(serialize = "connection_failed")]
    ConnectionFailed,
    BatteryInfo,
    ChargeState,
    CleanReport,
    CleanSpeed,
    Error,
}

/// An event emitted by a vacuum handle.
#[derive(Debug, Clone, PartialEq)]
pub enum VacuumEvent {
    /// The control channel finished its handshake and accepts commands.
    Ready,
    /// The handshake was refused or timed out.
    ConnectionFailed { reason: String },
    /// Decoded state pushed by the vacuum.
    Telemetry(VacuumTelemetry),
}

impl VacuumEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::ConnectionFailed { .. } => EventKind::ConnectionFailed,
            Self::Telemetry(t) => match t {
                VacuumTelemetry::BatteryInfo(_) => EventKind::BatteryInfo,
                VacuumTelemetry::ChargeState(_) => EventKind::ChargeState,
                VacuumTelemetry::CleanReport(_) => EventKind::CleanReport,
                VacuumTelemetry::CleanSpeed(_) => EventKind::CleanSpeed,
                VacuumTelemetry::Error(_) => EventKind::Error,
            },
        }
    }

    pub fn telemetry(&self) -> Option<&VacuumTelemetry> {
        match self {
            Self::Telemetry(t) => Some(t),
            _ => None,
        }
    }
}

impl From<VacuumTelemetry> for VacuumEvent {
    fn from(t: VacuumTelemetry) -> Self {
        Self::Telemetry(t)
    }
}
