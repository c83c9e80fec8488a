// ── Vacuum handle ──
//
// One physical vacuum: connection lifecycle, the deferred startup command,
// fire-and-forget command routing, and the subscription surface every
// event for the device flows through.

mod registry;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use vacbridge_api::{DeviceDescriptor, VacuumCommand, VacuumLink, VacuumTelemetry, VendorEvent};

use crate::event::{EventKind, VacuumEvent};

pub use registry::Subscription;
use registry::SubscriberRegistry;

/// Default bound on the control-channel handshake.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

// ── ConnectionState ──────────────────────────────────────────────

/// Readiness of a vacuum's control channel.
///
/// `Ready` and `Failed` are terminal for one connection attempt; a fresh
/// [`connect_and_wait_until_ready`](VacuumHandle::connect_and_wait_until_ready)
/// from `Failed` starts a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

// ── VacuumHandle ─────────────────────────────────────────────────

/// Controller handle for one vacuum.
///
/// Cheaply cloneable via `Arc<HandleInner>`. All events for the device are
/// dispatched from a single pump task, so subscribers never run
/// concurrently with each other for the same device.
#[derive(Clone)]
pub struct VacuumHandle {
    inner: Arc<HandleInner>,
}

/// Non-owning reference to a [`VacuumHandle`], for subscribers that need to
/// reach back into the handle without keeping it alive.
#[derive(Clone)]
pub struct WeakVacuumHandle {
    inner: Weak<HandleInner>,
}

struct HandleInner {
    descriptor: DeviceDescriptor,
    link: Arc<dyn VacuumLink>,
    ready_timeout: Duration,
    state: watch::Sender<ConnectionState>,
    /// Serializes `issue_command` against priming.
    gate: Mutex<CommandGate>,
    /// Error of the most recent failed handshake.
    failure: Mutex<Option<vacbridge_api::Error>>,
    registry: SubscriberRegistry,
    command_tx: mpsc::UnboundedSender<VacuumCommand>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<VacuumCommand>>>,
    control_tx: mpsc::UnboundedSender<VacuumEvent>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<VacuumEvent>>>,
    last_event: watch::Sender<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Commands pass straight to the processor only once the device is primed.
/// Until then the last one issued waits in the single deferred slot.
#[derive(Default)]
struct CommandGate {
    open: bool,
    deferred: Option<VacuumCommand>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            self.link.disconnect();
        }
    }
}

impl VacuumHandle {
    /// Wrap a device link. Does NOT connect -- call
    /// [`connect_and_wait_until_ready()`](Self::connect_and_wait_until_ready).
    pub fn new(
        descriptor: DeviceDescriptor,
        link: Arc<dyn VacuumLink>,
        ready_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (last_event, _) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(HandleInner {
                descriptor,
                link,
                ready_timeout,
                state,
                gate: Mutex::new(CommandGate::default()),
                failure: Mutex::new(None),
                registry: SubscriberRegistry::new(),
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                control_tx,
                control_rx: Mutex::new(Some(control_rx)),
                last_event,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.inner.descriptor
    }

    /// Vendor device id.
    pub fn did(&self) -> &str {
        &self.inner.descriptor.did
    }

    pub fn downgrade(&self) -> WeakVacuumHandle {
        WeakVacuumHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Perform the control-channel handshake and emit `Ready` or
    /// `ConnectionFailed`.
    ///
    /// The handshake runs on its own task, bounded by the handle's ready
    /// timeout; expiry counts as a transient failure. Dropping this future
    /// does not abandon the handshake. A call made while one is already in
    /// flight starts nothing and waits for that handshake's outcome; a call
    /// on a ready handle returns `Ok(())` at once.
    pub async fn connect_and_wait_until_ready(&self) -> Result<(), vacbridge_api::Error> {
        if self.inner.cancel.is_cancelled() {
            return Err(vacbridge_api::Error::LinkClosed);
        }

        let mut starting = false;
        self.inner.state.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Ready => false,
            ConnectionState::Disconnected | ConnectionState::Failed => {
                *state = ConnectionState::Connecting;
                starting = true;
                true
            }
        });

        if starting {
            self.begin_handshake();
        } else {
            debug!(device = %self.did(), "handshake already in flight or complete");
        }
        self.wait_until_settled().await
    }

    /// Stop the background tasks and drop the vendor connection.
    ///
    /// Resets the state to [`Disconnected`](ConnectionState::Disconnected).
    /// A handle is not reusable after shutdown.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        lock(&self.inner.gate).open = false;

        let handles: Vec<JoinHandle<()>> = lock(&self.inner.task_handles).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.inner.link.disconnect();
        self.inner.state.send_replace(ConnectionState::Disconnected);
        debug!(device = %self.did(), "vacuum handle shut down");
    }

    fn begin_handshake(&self) {
        self.start_tasks();
        debug!(device = %self.did(), "connecting to vacuum");

        let handle = self.clone();
        let cancel = self.inner.cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                result = handle.handshake() => handle.finish_handshake(result),
            }
        });
        lock(&self.inner.task_handles).push(task);
    }

    async fn handshake(&self) -> Result<(), vacbridge_api::Error> {
        let timeout = self.inner.ready_timeout;
        match tokio::time::timeout(timeout, self.inner.link.connect()).await {
            Ok(result) => result,
            Err(_) => Err(vacbridge_api::Error::Timeout {
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    fn finish_handshake(&self, result: Result<(), vacbridge_api::Error>) {
        match result {
            Ok(()) => {
                self.inner.state.send_replace(ConnectionState::Ready);
                info!(device = %self.did(), name = %self.inner.descriptor.display_name(), "vacuum ready");
                let _ = self.inner.control_tx.send(VacuumEvent::Ready);
            }
            Err(e) => {
                warn!(device = %self.did(), error = %e, "vacuum handshake failed");
                let reason = e.to_string();
                *lock(&self.inner.failure) = Some(e);
                self.inner.state.send_replace(ConnectionState::Failed);
                let _ = self.inner.control_tx.send(VacuumEvent::ConnectionFailed { reason });
            }
        }
    }

    /// Wait for the in-flight handshake to settle and report its outcome.
    async fn wait_until_settled(&self) -> Result<(), vacbridge_api::Error> {
        let mut changes = self.state_changes();
        let settled = changes
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| *state);

        match settled {
            Ok(ConnectionState::Ready) => Ok(()),
            Ok(ConnectionState::Failed) => Err(lock(&self.inner.failure)
                .clone()
                .unwrap_or(vacbridge_api::Error::LinkClosed)),
            Ok(ConnectionState::Connecting | ConnectionState::Disconnected) | Err(_) => {
                Err(vacbridge_api::Error::LinkClosed)
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Send a command without waiting for it.
    ///
    /// Until the device has been primed the command is parked in the single
    /// deferred slot, replacing whatever was parked there. This holds for
    /// the short window after the state turns `Ready` as well. Once primed,
    /// commands are queued to the command processor in issue order.
    pub fn issue_command(&self, command: VacuumCommand) {
        let mut gate = lock(&self.inner.gate);
        if gate.open {
            self.enqueue(command);
        } else if let Some(replaced) = gate.deferred.replace(command) {
            debug!(device = %self.did(), replaced = %replaced, "deferred command overwritten");
        }
    }

    /// Queue `queries`, then the deferred command, and let later commands
    /// through directly. Does nothing if the device is already primed.
    pub fn prime(&self, queries: impl IntoIterator<Item = VacuumCommand>) {
        let mut gate = lock(&self.inner.gate);
        if gate.open {
            debug!(device = %self.did(), "vacuum already primed");
            return;
        }
        for query in queries {
            self.enqueue(query);
        }
        if let Some(command) = gate.deferred.take() {
            debug!(device = %self.did(), command = %command, "releasing deferred command");
            self.enqueue(command);
        }
        gate.open = true;
    }

    fn enqueue(&self, command: VacuumCommand) {
        trace!(device = %self.did(), command = %command, "queueing command");
        if self.inner.command_tx.send(command).is_err() {
            warn!(device = %self.did(), "command processor stopped, command dropped");
        }
    }

    /// Remove and return the deferred startup command, if any.
    pub fn take_deferred(&self) -> Option<VacuumCommand> {
        lock(&self.inner.gate).deferred.take()
    }

    /// Peek at the deferred startup command.
    pub fn deferred_command(&self) -> Option<VacuumCommand> {
        lock(&self.inner.gate).deferred.clone()
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Register a synchronous handler for one event kind.
    ///
    /// Handlers for the same kind run in registration order on the
    /// device's pump task. They must not block.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&VacuumEvent) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(kind, Arc::new(handler))
    }

    /// Returns `false` if the subscription was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.inner.registry.unsubscribe(subscription)
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.registry.count(kind)
    }

    // ── State observation ────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Subscribe to connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// When the last vendor event for this device arrived.
    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_event.borrow()
    }

    // ── Dispatch ─────────────────────────────────────────────────

    pub(crate) fn dispatch(&self, event: &VacuumEvent) {
        let delivered = self.inner.registry.dispatch(event);
        trace!(device = %self.did(), kind = %event.kind(), delivered, "event dispatched");
    }

    /// Dispatch a lifecycle event. After `Ready` the gate opens even if no
    /// subscriber primed the device.
    fn handle_control_event(&self, event: &VacuumEvent) {
        self.dispatch(event);
        if matches!(event, VacuumEvent::Ready) {
            self.prime(std::iter::empty());
        }
    }

    /// Decode a raw vendor event and dispatch it. Malformed events are
    /// logged and dropped; the handle keeps running.
    fn handle_vendor_event(&self, raw: &VendorEvent) {
        self.inner.last_event.send_replace(Some(Utc::now()));

        match VacuumTelemetry::decode(raw) {
            Ok(Some(telemetry)) => {
                debug!(device = %self.did(), event = %raw.name, payload = %raw.payload, "telemetry");
                self.dispatch(&VacuumEvent::Telemetry(telemetry));
            }
            Ok(None) => {
                trace!(device = %self.did(), event = %raw.name, "ignoring vendor event");
            }
            Err(e) => {
                warn!(device = %self.did(), event = %raw.name, error = %e, "dropping malformed vendor event");
            }
        }
    }

    /// Spawn the event pump and command processor, once per handle.
    ///
    /// Neither task keeps the handle alive: the pump holds a weak
    /// reference and the processor only the link.
    fn start_tasks(&self) {
        let mut handles = lock(&self.inner.task_handles);

        if let Some(rx) = lock(&self.inner.control_rx).take() {
            // Subscribe before the handshake starts so no early event is missed.
            let vendor_rx = self.inner.link.subscribe();
            let cancel = self.inner.cancel.clone();
            handles.push(tokio::spawn(event_pump_task(
                self.downgrade(),
                self.did().to_owned(),
                rx,
                vendor_rx,
                cancel,
            )));
        }

        if let Some(rx) = lock(&self.inner.command_rx).take() {
            let link = Arc::clone(&self.inner.link);
            let cancel = self.inner.cancel.clone();
            handles.push(tokio::spawn(command_processor_task(
                link,
                self.did().to_owned(),
                rx,
                cancel,
            )));
        }
    }
}

impl fmt::Debug for VacuumHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VacuumHandle")
            .field("did", &self.inner.descriptor.did)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl WeakVacuumHandle {
    pub fn upgrade(&self) -> Option<VacuumHandle> {
        self.inner.upgrade().map(|inner| VacuumHandle { inner })
    }
}

impl fmt::Debug for WeakVacuumHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakVacuumHandle")
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Single consumer for everything a device emits: lifecycle notifications
/// from the handshake and raw events from the vendor link. Exits once the
/// handle is gone.
async fn event_pump_task(
    handle: WeakVacuumHandle,
    did: String,
    mut control_rx: mpsc::UnboundedReceiver<VacuumEvent>,
    mut vendor_rx: broadcast::Receiver<Arc<VendorEvent>>,
    cancel: CancellationToken,
) {
    let mut vendor_open = true;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = control_rx.recv() => {
                let Some(event) = event else { break };
                let Some(handle) = handle.upgrade() else { break };
                handle.handle_control_event(&event);
            }
            received = vendor_rx.recv(), if vendor_open => match received {
                Ok(raw) => {
                    let Some(handle) = handle.upgrade() else { break };
                    handle.handle_vendor_event(&raw);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(device = %did, skipped, "event pump fell behind, events skipped");
                }
                Err(RecvError::Closed) => {
                    debug!(device = %did, "vendor event stream closed");
                    vendor_open = false;
                }
            },
        }
    }
    trace!(device = %did, "event pump stopped");
}

/// Drain queued commands to the link, one at a time, in issue order.
/// Exits when the handle's sender is dropped.
async fn command_processor_task(
    link: Arc<dyn VacuumLink>,
    did: String,
    mut rx: mpsc::UnboundedReceiver<VacuumCommand>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = rx.recv() => {
                let Some(command) = command else { break };
                debug!(device = %did, command = %command, "sending command");
                if let Err(e) = link.run(&command).await {
                    warn!(device = %did, command = %command, error = %e, "command failed");
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// How long the scripted handshake takes before popping its outcome.
    #[derive(Clone, Copy)]
    enum Handshake {
        Immediate,
        After(Duration),
        Never,
    }

    /// Link whose handshake outcomes are scripted and whose sent commands
    /// are forwarded to the test.
    struct ScriptedLink {
        outcomes: Mutex<VecDeque<Result<(), vacbridge_api::Error>>>,
        handshake: Handshake,
        connect_calls: AtomicU32,
        events: broadcast::Sender<Arc<VendorEvent>>,
        sent: mpsc::UnboundedSender<VacuumCommand>,
    }

    #[async_trait]
    impl VacuumLink for ScriptedLink {
        async fn connect(&self) -> Result<(), vacbridge_api::Error> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            match self.handshake {
                Handshake::Immediate => {}
                Handshake::After(delay) => tokio::time::sleep(delay).await,
                Handshake::Never => std::future::pending::<()>().await,
            }
            lock(&self.outcomes).pop_front().unwrap_or(Ok(()))
        }

        async fn run(&self, command: &VacuumCommand) -> Result<(), vacbridge_api::Error> {
            let _ = self.sent.send(command.clone());
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<Arc<VendorEvent>> {
            self.events.subscribe()
        }
    }

    struct Fixture {
        handle: VacuumHandle,
        link: Arc<ScriptedLink>,
        events: broadcast::Sender<Arc<VendorEvent>>,
        sent: mpsc::UnboundedReceiver<VacuumCommand>,
    }

    fn fixture(outcomes: Vec<Result<(), vacbridge_api::Error>>, handshake: Handshake) -> Fixture {
        let (events, _) = broadcast::channel(16);
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let link = Arc::new(ScriptedLink {
            outcomes: Mutex::new(outcomes.into()),
            handshake,
            connect_calls: AtomicU32::new(0),
            events: events.clone(),
            sent: sent_tx,
        });
        let descriptor = DeviceDescriptor {
            did: "did-1".into(),
            name: Some("Kitchen".into()),
            class: "ls1ok3".into(),
            resource: "atom".into(),
            realm: "ecouser.net".into(),
        };
        Fixture {
            handle: VacuumHandle::new(descriptor, link.clone(), Duration::from_secs(5)),
            link,
            events,
            sent,
        }
    }

    fn rejected() -> vacbridge_api::Error {
        vacbridge_api::Error::Rejected {
            reason: "nack".into(),
        }
    }

    fn forward(handle: &VacuumHandle, kind: EventKind) -> mpsc::UnboundedReceiver<VacuumEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.subscribe(kind, move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    #[tokio::test]
    async fn successful_handshake_emits_ready() {
        let fx = fixture(vec![Ok(())], Handshake::Immediate);
        let mut ready = forward(&fx.handle, EventKind::Ready);

        assert_eq!(fx.handle.state(), ConnectionState::Disconnected);
        fx.handle.connect_and_wait_until_ready().await.unwrap();

        assert_eq!(fx.handle.state(), ConnectionState::Ready);
        assert_eq!(ready.recv().await, Some(VacuumEvent::Ready));
    }

    #[tokio::test]
    async fn failed_handshake_emits_connection_failed_and_can_retry() {
        let fx = fixture(vec![Err(rejected())], Handshake::Immediate);
        let mut failed = forward(&fx.handle, EventKind::ConnectionFailed);

        let err = fx.handle.connect_and_wait_until_ready().await.unwrap_err();
        assert!(matches!(err, vacbridge_api::Error::Rejected { .. }));
        assert_eq!(fx.handle.state(), ConnectionState::Failed);
        assert!(matches!(
            failed.recv().await,
            Some(VacuumEvent::ConnectionFailed { .. })
        ));

        // Failed is terminal for the attempt; a fresh call starts a new one.
        fx.handle.connect_and_wait_until_ready().await.unwrap();
        assert_eq!(fx.handle.state(), ConnectionState::Ready);
        assert_eq!(fx.link.connect_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connect_is_a_no_op_when_ready() {
        let fx = fixture(vec![Ok(()), Err(rejected())], Handshake::Immediate);
        fx.handle.connect_and_wait_until_ready().await.unwrap();
        fx.handle.connect_and_wait_until_ready().await.unwrap();
        assert_eq!(fx.handle.state(), ConnectionState::Ready);
        assert_eq!(fx.link.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_share_one_handshake() {
        let fx = fixture(
            vec![Ok(()), Err(rejected())],
            Handshake::After(Duration::from_millis(200)),
        );

        let (first, second) = tokio::join!(
            fx.handle.connect_and_wait_until_ready(),
            fx.handle.connect_and_wait_until_ready(),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(fx.handle.state(), ConnectionState::Ready);
        assert_eq!(fx.link.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn joined_connect_reports_the_shared_failure() {
        let fx = fixture(
            vec![Err(rejected())],
            Handshake::After(Duration::from_millis(200)),
        );

        let (first, second) = tokio::join!(
            fx.handle.connect_and_wait_until_ready(),
            fx.handle.connect_and_wait_until_ready(),
        );
        assert!(matches!(first, Err(vacbridge_api::Error::Rejected { .. })));
        assert!(matches!(second, Err(vacbridge_api::Error::Rejected { .. })));
        assert_eq!(fx.link.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_connect_keeps_the_handshake_running() {
        let fx = fixture(vec![Ok(())], Handshake::After(Duration::from_secs(1)));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            fx.handle.connect_and_wait_until_ready(),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(fx.handle.state(), ConnectionState::Connecting);

        // A later caller joins the same handshake instead of reporting
        // success early or starting another one.
        fx.handle.connect_and_wait_until_ready().await.unwrap();
        assert_eq!(fx.handle.state(), ConnectionState::Ready);
        assert_eq!(fx.link.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_marks_failed() {
        let fx = fixture(Vec::new(), Handshake::Never);
        let err = fx.handle.connect_and_wait_until_ready().await.unwrap_err();
        assert!(matches!(err, vacbridge_api::Error::Timeout { timeout_secs: 5 }));
        assert!(err.is_transient());
        assert_eq!(fx.handle.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn deferred_slot_keeps_only_the_last_command() {
        let fx = fixture(vec![Ok(())], Handshake::Immediate);
        fx.handle
            .issue_command(VacuumCommand::with_args("Clean", ["auto"]));
        fx.handle.issue_command(VacuumCommand::new("Charge"));

        assert_eq!(
            fx.handle.deferred_command(),
            Some(VacuumCommand::new("Charge"))
        );
        assert_eq!(fx.handle.take_deferred(), Some(VacuumCommand::new("Charge")));
        assert_eq!(fx.handle.take_deferred(), None);
    }

    #[tokio::test]
    async fn ready_without_subscribers_releases_the_deferred_command() {
        let mut fx = fixture(vec![Ok(())], Handshake::Immediate);
        fx.handle
            .issue_command(VacuumCommand::with_args("Clean", ["auto"]));
        fx.handle.issue_command(VacuumCommand::new("Charge"));
        fx.handle.connect_and_wait_until_ready().await.unwrap();

        assert_eq!(fx.sent.recv().await, Some(VacuumCommand::new("Charge")));
        assert_eq!(fx.handle.deferred_command(), None);
    }

    #[tokio::test]
    async fn prime_sends_queries_before_the_deferred_command() {
        let mut fx = fixture(Vec::new(), Handshake::Immediate);
        fx.handle.start_tasks();

        fx.handle.issue_command(VacuumCommand::new("Charge"));
        fx.handle.prime([VacuumCommand::new("GetBatteryState")]);
        fx.handle.issue_command(VacuumCommand::new("PlaySound"));
        // A second prime is ignored.
        fx.handle.prime([VacuumCommand::new("GetChargeState")]);

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(fx.sent.recv().await.unwrap().to_string());
        }
        assert_eq!(order, ["GetBatteryState", "Charge", "PlaySound"]);
        tokio::task::yield_now().await;
        assert!(fx.sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn commands_after_ready_reach_the_link_in_order() {
        let mut fx = fixture(vec![Ok(())], Handshake::Immediate);
        let mut ready = forward(&fx.handle, EventKind::Ready);
        fx.handle.connect_and_wait_until_ready().await.unwrap();
        assert_eq!(ready.recv().await, Some(VacuumEvent::Ready));

        fx.handle.issue_command(VacuumCommand::new("GetBatteryState"));
        fx.handle
            .issue_command(VacuumCommand::with_args("Clean", ["edge"]));

        assert_eq!(
            fx.sent.recv().await,
            Some(VacuumCommand::new("GetBatteryState"))
        );
        assert_eq!(
            fx.sent.recv().await,
            Some(VacuumCommand::with_args("Clean", ["edge"]))
        );
        assert_eq!(fx.handle.deferred_command(), None);
    }

    #[tokio::test]
    async fn vendor_events_are_decoded_and_dispatched() {
        let fx = fixture(vec![Ok(())], Handshake::Immediate);
        let mut battery = forward(&fx.handle, EventKind::BatteryInfo);
        fx.handle.connect_and_wait_until_ready().await.unwrap();

        fx.events
            .send(Arc::new(VendorEvent::new("BatteryInfo", json!("oops"))))
            .unwrap();
        fx.events
            .send(Arc::new(VendorEvent::new("BatteryInfo", json!(64))))
            .unwrap();

        // The malformed event is dropped; the next one still arrives.
        assert_eq!(
            battery.recv().await,
            Some(VacuumEvent::Telemetry(VacuumTelemetry::BatteryInfo(64.0)))
        );
        assert!(fx.handle.last_event_at().is_some());
    }

    #[tokio::test]
    async fn shutdown_resets_state() {
        let fx = fixture(vec![Ok(())], Handshake::Immediate);
        fx.handle.connect_and_wait_until_ready().await.unwrap();
        fx.handle.shutdown().await;
        assert_eq!(fx.handle.state(), ConnectionState::Disconnected);

        let err = fx.handle.connect_and_wait_until_ready().await.unwrap_err();
        assert!(matches!(err, vacbridge_api::Error::LinkClosed));
        assert_eq!(fx.link.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_handshake_releases_waiters() {
        let fx = fixture(vec![Ok(())], Handshake::Never);
        let handle = fx.handle.clone();
        let waiter = tokio::spawn(async move { handle.connect_and_wait_until_ready().await });
        tokio::task::yield_now().await;

        fx.handle.shutdown().await;
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, vacbridge_api::Error::LinkClosed));
    }

    #[tokio::test]
    async fn weak_handle_does_not_keep_handle_alive() {
        let fx = fixture(Vec::new(), Handshake::Immediate);
        let weak = fx.handle.downgrade();
        assert!(weak.upgrade().is_some());
        drop(fx);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn dropping_a_connected_handle_stops_its_tasks() {
        let fx = fixture(vec![Ok(())], Handshake::Immediate);
        fx.handle.connect_and_wait_until_ready().await.unwrap();
        assert_eq!(fx.events.receiver_count(), 1);

        let weak = fx.handle.downgrade();
        let Fixture { handle, events, .. } = fx;
        drop(handle);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(weak.upgrade().is_none());
        // The pump's vendor subscription is gone with it.
        assert_eq!(events.receiver_count(), 0);
    }
}
