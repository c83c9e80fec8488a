// Shared in-process fakes for the vendor seam.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::{broadcast, mpsc};

use vacbridge_api::{
    Continent, Credentials, DeviceDescriptor, Error, SessionToken, VacuumCommand, VacuumLink,
    VendorEvent, VendorSession,
};
use vacbridge_core::{RetryPolicy, RetryableConnector};

// ── FakeLink ────────────────────────────────────────────────────────

/// Scripted device link. Handshake outcomes are popped in order (an empty
/// script acks); every command sent is forwarded to `sent`.
pub struct FakeLink {
    pub did: String,
    connect_script: Mutex<VecDeque<Result<(), Error>>>,
    pub connect_calls: AtomicU32,
    events: broadcast::Sender<Arc<VendorEvent>>,
    sent_tx: mpsc::UnboundedSender<VacuumCommand>,
    sent_rx: Mutex<Option<mpsc::UnboundedReceiver<VacuumCommand>>>,
}

impl FakeLink {
    pub fn new(did: &str) -> Arc<Self> {
        Self::scripted(did, Vec::new())
    }

    pub fn scripted(did: &str, script: Vec<Result<(), Error>>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            did: did.to_owned(),
            connect_script: Mutex::new(script.into()),
            connect_calls: AtomicU32::new(0),
            events,
            sent_tx,
            sent_rx: Mutex::new(Some(sent_rx)),
        })
    }

    /// Push a raw vendor event to the handle.
    pub fn emit(&self, name: &str, payload: serde_json::Value) {
        let _ = self.events.send(Arc::new(VendorEvent::new(name, payload)));
    }

    /// Take the receiver of sent commands. Panics if taken twice.
    pub fn sent(&self) -> mpsc::UnboundedReceiver<VacuumCommand> {
        self.sent_rx.lock().unwrap().take().unwrap()
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VacuumLink for FakeLink {
    async fn connect(&self) -> Result<(), Error> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connect_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn run(&self, command: &VacuumCommand) -> Result<(), Error> {
        self.sent_tx.send(command.clone()).map_err(|_| Error::LinkClosed)
    }

    fn subscribe(&self) -> broadcast::Receiver<Arc<VendorEvent>> {
        self.events.subscribe()
    }
}

// ── FakeSession ─────────────────────────────────────────────────────

/// Scripted account session. Login outcomes are popped in order (an empty
/// script succeeds); links are looked up by device id.
pub struct FakeSession {
    login_script: Mutex<VecDeque<Result<(), Error>>>,
    pub login_calls: AtomicU32,
    devices: Vec<DeviceDescriptor>,
    links: Vec<Arc<FakeLink>>,
    pub opened: Mutex<Vec<(String, Continent)>>,
}

impl FakeSession {
    pub fn new(links: Vec<Arc<FakeLink>>) -> Arc<Self> {
        Self::with_login_script(links, Vec::new())
    }

    pub fn with_login_script(links: Vec<Arc<FakeLink>>, script: Vec<Result<(), Error>>) -> Arc<Self> {
        let devices = links.iter().map(|l| descriptor(&l.did)).collect();
        Arc::new(Self {
            login_script: Mutex::new(script.into()),
            login_calls: AtomicU32::new(0),
            devices,
            links,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn login_calls(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorSession for FakeSession {
    async fn connect(&self, login: &str, _password_digest: &SecretString) -> Result<SessionToken, Error> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_script.lock().unwrap().pop_front().unwrap_or(Ok(()))?;
        Ok(SessionToken {
            uid: login.to_owned(),
            resource: "bridge".into(),
            access_token: SecretString::from("token"),
        })
    }

    async fn list_devices(&self, _token: &SessionToken) -> Result<Vec<DeviceDescriptor>, Error> {
        Ok(self.devices.clone())
    }

    fn open_vacuum(
        &self,
        _token: &SessionToken,
        device: &DeviceDescriptor,
        continent: Continent,
    ) -> Arc<dyn VacuumLink> {
        self.opened
            .lock()
            .unwrap()
            .push((device.did.clone(), continent));
        let link = self.links.iter().find(|l| l.did == device.did).unwrap();
        Arc::clone(link) as Arc<dyn VacuumLink>
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

pub fn descriptor(did: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        did: did.to_owned(),
        name: Some(format!("Vacuum {did}")),
        class: "ls1ok3".into(),
        resource: "atom".into(),
        realm: "ecouser.net".into(),
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("me@example.com", &SecretString::from("hunter2"), "machine-1", "de").unwrap()
}

pub fn fast_connector(max_attempts: u32) -> RetryableConnector {
    RetryableConnector::new(RetryPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(80),
        max_attempts,
    })
}

pub fn transient() -> Error {
    Error::Transient {
        reason: "503 Service Unavailable".into(),
    }
}

/// Receive the next command, failing the test after a second of silence.
pub async fn next_command(rx: &mut mpsc::UnboundedReceiver<VacuumCommand>) -> VacuumCommand {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

/// Wait until the accessory store has seen `count` writes.
pub async fn wait_for_writes(rx: &mut tokio::sync::watch::Receiver<u64>, count: u64) {
    tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|v| *v >= count))
        .await
        .unwrap()
        .unwrap();
}
