// ── State reconciler ──
//
// Projects a vacuum's telemetry onto the accessory characteristics with
// read-compare-write semantics, and primes a freshly ready device with the
// baseline state queries plus its deferred startup command.

use std::sync::Arc;

use tracing::{debug, warn};

use vacbridge_api::{ChargeStatus, CleanMode, CleanSpeed, VacuumCommand, VacuumTelemetry};

use crate::accessory::{
    AccessoryCharacteristicSet, AccessoryStore, Characteristic, CharacteristicValue,
    RotationDirection,
};
use crate::event::EventKind;
use crate::handle::{Subscription, VacuumHandle, WeakVacuumHandle};
use crate::speed::SpeedMapping;

/// Battery levels strictly below this raise the low-battery flag.
pub const LOW_BATTERY_THRESHOLD: u8 = 20;

const TELEMETRY_KINDS: [EventKind; 5] = [
    EventKind::BatteryInfo,
    EventKind::ChargeState,
    EventKind::CleanReport,
    EventKind::CleanSpeed,
    EventKind::Error,
];

// ── StateReconciler ──────────────────────────────────────────────

/// Keeps one accessory in sync with one vacuum.
///
/// Created by [`attach`](Self::attach); stays subscribed until
/// [`detach`](Self::detach) is called. Dropping the reconciler does not
/// unsubscribe.
pub struct StateReconciler {
    handle: WeakVacuumHandle,
    sync: Arc<CharacteristicSync>,
    subscriptions: Vec<Subscription>,
}

impl StateReconciler {
    /// Subscribe to the handle's readiness and telemetry events.
    pub fn attach(
        handle: &VacuumHandle,
        store: Arc<dyn AccessoryStore>,
        speeds: Arc<dyn SpeedMapping>,
    ) -> Self {
        let sync = Arc::new(CharacteristicSync {
            did: handle.did().to_owned(),
            characteristics: AccessoryCharacteristicSet::new(store),
            speeds,
        });

        let mut subscriptions = Vec::with_capacity(TELEMETRY_KINDS.len() + 1);

        let weak = handle.downgrade();
        subscriptions.push(handle.subscribe(EventKind::Ready, move |_| {
            if let Some(handle) = weak.upgrade() {
                prime(&handle);
            }
        }));

        for kind in TELEMETRY_KINDS {
            let sync = Arc::clone(&sync);
            subscriptions.push(handle.subscribe(kind, move |event| {
                if let Some(telemetry) = event.telemetry() {
                    sync.apply(telemetry);
                }
            }));
        }

        debug!(device = %handle.did(), "reconciler attached");
        Self {
            handle: handle.downgrade(),
            sync,
            subscriptions,
        }
    }

    /// Apply one telemetry update directly. Returns the number of
    /// characteristic writes it caused.
    pub fn apply(&self, telemetry: &VacuumTelemetry) -> usize {
        self.sync.apply(telemetry)
    }

    pub fn characteristics(&self) -> &AccessoryCharacteristicSet {
        &self.sync.characteristics
    }

    /// Remove every subscription this reconciler holds.
    pub fn detach(self) {
        let Some(handle) = self.handle.upgrade() else {
            return;
        };
        for subscription in &self.subscriptions {
            handle.unsubscribe(subscription);
        }
        debug!(device = %self.sync.did, "reconciler detached");
    }
}

impl std::fmt::Debug for StateReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateReconciler")
            .field("did", &self.sync.did)
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

/// Baseline queries, then the deferred startup command exactly once.
fn prime(handle: &VacuumHandle) {
    debug!(device = %handle.did(), "priming vacuum");
    handle.prime(VacuumCommand::baseline_queries());
}

// ── Characteristic projection ────────────────────────────────────

struct CharacteristicSync {
    did: String,
    characteristics: AccessoryCharacteristicSet,
    speeds: Arc<dyn SpeedMapping>,
}

impl CharacteristicSync {
    fn apply(&self, telemetry: &VacuumTelemetry) -> usize {
        let writes = match telemetry {
            VacuumTelemetry::BatteryInfo(percent) => self.battery(*percent),
            VacuumTelemetry::ChargeState(status) => self.charge(status),
            VacuumTelemetry::CleanReport(mode) => self.clean_report(mode),
            VacuumTelemetry::CleanSpeed(speed) => self.clean_speed(*speed),
            VacuumTelemetry::Error(message) => {
                warn!(device = %self.did, error = %message, "vacuum reported an error");
                self.write(Characteristic::MotionDetected, CharacteristicValue::Bool(true))
            }
        };
        debug!(device = %self.did, telemetry = telemetry.name(), writes, "telemetry reconciled");
        writes
    }

    fn battery(&self, percent: f64) -> usize {
        let level = battery_level(percent);
        self.write(Characteristic::BatteryLevel, CharacteristicValue::Level(level))
            + self.write(
                Characteristic::StatusLowBattery,
                CharacteristicValue::Bool(level < LOW_BATTERY_THRESHOLD),
            )
    }

    fn charge(&self, status: &ChargeStatus) -> usize {
        let charging = *status == ChargeStatus::Charging;
        let mut writes = self.write(
            Characteristic::ChargingState,
            CharacteristicValue::Bool(charging),
        );
        if charging {
            writes += self.write(Characteristic::FanOn, CharacteristicValue::Bool(false));
            writes += self.write(Characteristic::SwitchOn, CharacteristicValue::Bool(false));
        }
        writes
    }

    fn clean_report(&self, mode: &CleanMode) -> usize {
        let resting = mode.is_paused_or_stopped();
        let mut writes = self.write(Characteristic::FanOn, CharacteristicValue::Bool(!resting));

        if self.characteristics.read_bool(Characteristic::SwitchOn) == resting {
            writes += self.write(Characteristic::SwitchOn, CharacteristicValue::Bool(!resting));
        }

        let direction = if *mode == CleanMode::Edge {
            RotationDirection::Clockwise
        } else {
            RotationDirection::CounterClockwise
        };
        writes + self.write(
            Characteristic::RotationDirection,
            CharacteristicValue::Direction(direction),
        )
    }

    fn clean_speed(&self, reported: CleanSpeed) -> usize {
        let derived = self
            .characteristics
            .read(Characteristic::RotationSpeed)
            .and_then(|v| v.as_speed())
            .map(|current| self.speeds.clean_speed(current));
        if derived == Some(reported) {
            return 0;
        }
        self.write(
            Characteristic::RotationSpeed,
            CharacteristicValue::Speed(self.speeds.fan_speed(reported)),
        )
    }

    fn write(&self, characteristic: Characteristic, value: CharacteristicValue) -> usize {
        if self.characteristics.write_if_changed(characteristic, value) {
            debug!(device = %self.did, %characteristic, %value, "characteristic updated");
            1
        } else {
            0
        }
    }
}

/// Round and clamp a reported percentage to 0..=100.
#[allow(
    clippy::as_conversions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn battery_level(percent: f64) -> u8 {
    percent.round().clamp(0.0, 100.0) as u8
}
