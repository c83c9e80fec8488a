// ── Subscriber registry ──
//
// Event kind -> ordered list of synchronous callbacks. Dispatch clones the
// callback list out of the map before invoking, so handlers may subscribe
// or unsubscribe without deadlocking on the shard lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::event::{EventKind, VacuumEvent};

/// A subscriber callback.
pub(crate) type Handler = Arc<dyn Fn(&VacuumEvent) + Send + Sync>;

/// Token returned by `subscribe`; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

pub(crate) struct SubscriberRegistry {
    next_id: AtomicU64,
    by_kind: DashMap<EventKind, Vec<(u64, Handler)>>,
}

impl SubscriberRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            by_kind: DashMap::new(),
        }
    }

    /// Append a handler for `kind`. Handlers run in insertion order.
    pub(crate) fn subscribe(&self, kind: EventKind, handler: Handler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_kind.entry(kind).or_default().push((id, handler));
        Subscription { kind, id }
    }

    /// Remove a handler. Returns `false` if it was already gone.
    pub(crate) fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let Some(mut handlers) = self.by_kind.get_mut(&subscription.kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        handlers.len() != before
    }

    /// Invoke every handler registered for the event's kind, in order.
    /// Returns the number of handlers invoked.
    pub(crate) fn dispatch(&self, event: &VacuumEvent) -> usize {
        let handlers: Vec<Handler> = match self.by_kind.get(&event.kind()) {
            Some(entry) => entry.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.by_kind.get(&kind).map_or(0, |h| h.len())
    }
}
