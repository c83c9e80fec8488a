// ── Accessory characteristic model ──
//
// The smart-home side of the bridge. The host owns the characteristic
// storage; the core sees it through `AccessoryStore` and only writes
// through `AccessoryCharacteristicSet::write_if_changed`.

mod memory;

use std::fmt;
use std::sync::Arc;

use strum::{Display, EnumIter};

pub use memory::MemoryAccessoryStore;

/// The characteristics the bridge projects a vacuum onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Characteristic {
    BatteryLevel,
    StatusLowBattery,
    ChargingState,
    FanOn,
    RotationDirection,
    RotationSpeed,
    SwitchOn,
    MotionDetected,
}

impl Characteristic {
    /// Value a missing boolean characteristic reads as.
    pub fn default_value(self) -> Option<CharacteristicValue> {
        match self {
            Self::StatusLowBattery
            | Self::ChargingState
            | Self::FanOn
            | Self::SwitchOn
            | Self::MotionDetected => Some(CharacteristicValue::Bool(false)),
            Self::BatteryLevel | Self::RotationDirection | Self::RotationSpeed => None,
        }
    }
}

/// Fan rotation direction, in the accessory protocol's encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationDirection {
    Clockwise = 0,
    CounterClockwise = 1,
}

impl RotationDirection {
    #[allow(clippy::as_conversions)]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// A typed characteristic value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CharacteristicValue {
    Bool(bool),
    /// Percentage, 0..=100.
    Level(u8),
    Direction(RotationDirection),
    /// Fan rotation speed in percent.
    Speed(f64),
}

impl CharacteristicValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_level(&self) -> Option<u8> {
        match self {
            Self::Level(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_direction(&self) -> Option<RotationDirection> {
        match self {
            Self::Direction(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_speed(&self) -> Option<f64> {
        match self {
            Self::Speed(s) => Some(*s),
            _ => None,
        }
    }
}

impl fmt::Display for CharacteristicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Level(l) => write!(f, "{l}%"),
            Self::Direction(d) => write!(f, "{}", d.code()),
            Self::Speed(s) => write!(f, "{s}%"),
        }
    }
}

/// Host-provided characteristic storage for one accessory.
///
/// `set` is only called with a value that differs from what `get`
/// returned, so implementations may push every `set` straight to the hub.
pub trait AccessoryStore: Send + Sync {
    fn get(&self, characteristic: Characteristic) -> Option<CharacteristicValue>;
    fn set(&self, characteristic: Characteristic, value: CharacteristicValue);
}

/// Read-compare-write view over an [`AccessoryStore`].
#[derive(Clone)]
pub struct AccessoryCharacteristicSet {
    store: Arc<dyn AccessoryStore>,
}

impl AccessoryCharacteristicSet {
    pub fn new(store: Arc<dyn AccessoryStore>) -> Self {
        Self { store }
    }

    pub fn read(&self, characteristic: Characteristic) -> Option<CharacteristicValue> {
        self.store
            .get(characteristic)
            .or_else(|| characteristic.default_value())
    }

    /// Boolean read; anything missing or non-boolean reads as `false`.
    pub fn read_bool(&self, characteristic: Characteristic) -> bool {
        self.read(characteristic)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Write `value` unless the current value already equals it.
    /// Returns `true` if a write happened.
    pub fn write_if_changed(&self, characteristic: Characteristic, value: CharacteristicValue) -> bool {
        if self.read(characteristic) == Some(value) {
            return false;
        }
        self.store.set(characteristic, value);
        true
    }
}

impl fmt::Debug for AccessoryCharacteristicSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessoryCharacteristicSet").finish_non_exhaustive()
    }
}
