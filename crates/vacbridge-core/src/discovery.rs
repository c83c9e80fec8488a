// ── Account-level discovery ──
//
// Log in once, list the account's vacuums, and build one handle per
// device. Starting a device (reconciler + readiness) is a separate,
// per-device step so one failing vacuum never holds up its siblings.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vacbridge_api::{Credentials, VendorSession};

use crate::accessory::AccessoryStore;
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::handle::{DEFAULT_READY_TIMEOUT, VacuumHandle};
use crate::reconciler::StateReconciler;
use crate::retry::RetryableConnector;
use crate::speed::{LinearSpeedMapping, SpeedMapping};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Outcome of one discovery pass, also broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// Every device on the account, possibly none.
    DeebotsDiscovered(Vec<VacuumHandle>),
    /// Login or device listing failed; no handles were built.
    ErrorDiscoveringDeebots { reason: String },
}

/// A device whose reconciler is attached and whose handshake is running.
#[derive(Debug)]
pub struct StartedDevice {
    pub reconciler: StateReconciler,
    /// Resolves once the handle is ready or retries are spent.
    pub ready: JoinHandle<Result<(), CoreError>>,
}

/// Turns one vendor account into per-device handles.
pub struct DiscoveryOrchestrator {
    session: Arc<dyn VendorSession>,
    credentials: Credentials,
    connector: RetryableConnector,
    ready_timeout: Duration,
    speeds: Arc<dyn SpeedMapping>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
    handles: Mutex<Vec<VacuumHandle>>,
}

impl DiscoveryOrchestrator {
    pub fn new(
        session: Arc<dyn VendorSession>,
        credentials: Credentials,
        connector: RetryableConnector,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session,
            credentials,
            connector,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            speeds: Arc::new(LinearSpeedMapping),
            event_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Build an orchestrator from runtime configuration.
    pub fn from_config(
        session: Arc<dyn VendorSession>,
        config: &BridgeConfig,
    ) -> Result<Self, CoreError> {
        let credentials = config.credentials()?;
        Ok(Self::new(session, credentials, RetryableConnector::new(config.retry))
            .with_ready_timeout(config.ready_timeout))
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_speed_mapping(mut self, speeds: Arc<dyn SpeedMapping>) -> Self {
        self.speeds = speeds;
        self
    }

    /// Subscribe to discovery outcomes.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Handles from the last successful discovery.
    pub fn handles(&self) -> Vec<VacuumHandle> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Discovery ────────────────────────────────────────────────

    /// Run one discovery pass.
    ///
    /// Emits exactly one [`DiscoveryEvent`] on the broadcast channel and
    /// returns the same event. Failures are reported, never returned. On
    /// success the handles from any earlier pass are shut down.
    pub async fn discover(&self) -> DiscoveryEvent {
        let event = match self.discover_handles().await {
            Ok(handles) => {
                info!(count = handles.len(), "vacuums discovered");
                let replaced = {
                    let mut current = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
                    std::mem::replace(&mut *current, handles.clone())
                };
                for handle in replaced {
                    debug!(device = %handle.did(), "shutting down replaced handle");
                    handle.shutdown().await;
                }
                DiscoveryEvent::DeebotsDiscovered(handles)
            }
            Err(e) => {
                error!(error = %e, "vacuum discovery failed");
                DiscoveryEvent::ErrorDiscoveringDeebots {
                    reason: e.to_string(),
                }
            }
        };

        // No receivers is fine; the caller still gets the event.
        let _ = self.event_tx.send(event.clone());
        event
    }

    async fn discover_handles(&self) -> Result<Vec<VacuumHandle>, CoreError> {
        let login = self.credentials.login();
        let digest = self.credentials.password_digest();

        let token = self
            .connector
            .retry("vendor login", || self.session.connect(login, digest))
            .await?;

        let devices = self
            .connector
            .retry("device listing", || self.session.list_devices(&token))
            .await?;

        let continent = self.credentials.continent();
        Ok(devices
            .into_iter()
            .map(|device| {
                info!(device = %device.did, name = %device.display_name(), class = %device.class, "found vacuum");
                let link = self.session.open_vacuum(&token, &device, continent);
                VacuumHandle::new(device, link, self.ready_timeout)
            })
            .collect())
    }

    // ── Device startup ───────────────────────────────────────────

    /// Attach a reconciler to `handle` and bring it to readiness in the
    /// background.
    ///
    /// The reconciler is attached before the handshake starts, so the
    /// `Ready` event that primes the accessory is never missed.
    pub fn start_device(
        &self,
        handle: &VacuumHandle,
        store: Arc<dyn AccessoryStore>,
    ) -> StartedDevice {
        let reconciler = StateReconciler::attach(handle, store, Arc::clone(&self.speeds));

        let connector = self.connector.clone();
        let handle = handle.clone();
        let ready = tokio::spawn(async move {
            let result = connector.ensure_ready(&handle).await;
            if let Err(e) = &result {
                warn!(device = %handle.did(), error = %e, "vacuum never became ready");
            }
            result
        });

        StartedDevice { reconciler, ready }
    }

    /// Start every discovered handle. `store_for` supplies each device's
    /// accessory store.
    pub fn start_all<F>(&self, mut store_for: F) -> Vec<StartedDevice>
    where
        F: FnMut(&VacuumHandle) -> Arc<dyn AccessoryStore>,
    {
        self.handles()
            .iter()
            .map(|handle| self.start_device(handle, store_for(handle)))
            .collect()
    }

    /// Shut down every discovered handle.
    pub async fn shutdown(&self) {
        for handle in self.handles() {
            handle.shutdown().await;
        }
    }
}

impl std::fmt::Debug for DiscoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryOrchestrator")
            .field("credentials", &self.credentials)
            .field("connector", &self.connector)
            .field("ready_timeout", &self.ready_timeout)
            .finish_non_exhaustive()
    }
}
