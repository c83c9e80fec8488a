// ── In-memory accessory store ──
//
// DashMap-backed characteristic storage with a `watch` version counter.
// Every `set` bumps the version, so the version doubles as a write count.

use dashmap::DashMap;
use strum::IntoEnumIterator;
use tokio::sync::watch;

use super::{AccessoryStore, Characteristic, CharacteristicValue};

/// Reference [`AccessoryStore`] for hosts without their own persistence.
pub struct MemoryAccessoryStore {
    values: DashMap<Characteristic, CharacteristicValue>,
    version: watch::Sender<u64>,
}

impl MemoryAccessoryStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        Self {
            values: DashMap::new(),
            version,
        }
    }

    /// A store pre-populated with every characteristic's default value.
    /// Seeding does not count as a write.
    pub fn with_defaults() -> Self {
        Self::with_values(
            Characteristic::iter().filter_map(|c| c.default_value().map(|v| (c, v))),
        )
    }

    /// A store pre-populated with `values`. Seeding does not count as a write.
    pub fn with_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (Characteristic, CharacteristicValue)>,
    {
        let store = Self::new();
        for (characteristic, value) in values {
            store.values.insert(characteristic, value);
        }
        store
    }

    pub fn get_value(&self, characteristic: Characteristic) -> Option<CharacteristicValue> {
        self.values.get(&characteristic).map(|v| *v.value())
    }

    /// Number of `set` calls since construction.
    pub fn write_count(&self) -> u64 {
        *self.version.borrow()
    }

    /// Subscribe to the version counter; it changes on every write.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for MemoryAccessoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessoryStore for MemoryAccessoryStore {
    fn get(&self, characteristic: Characteristic) -> Option<CharacteristicValue> {
        self.get_value(characteristic)
    }

    fn set(&self, characteristic: Characteristic, value: CharacteristicValue) {
        self.values.insert(characteristic, value);
        self.version.send_modify(|v| *v += 1);
    }
}
