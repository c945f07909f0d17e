//! The locator service: one task that owns all scheduling and request state.
//!
//! Environment changes, transport completions and timeout firings all arrive
//! as messages and are handled one at a time, so the scheduler and the
//! lifecycle are never observed half-updated. Callers interact through a
//! cloneable [`LocatorHandle`] and never block on a lookup.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::events::{EventBus, LocatorEvent};
use crate::lifecycle::{Attempt, OutboundRequest, RequestId, RequestLifecycle, RequestState};
use crate::scheduler::Scheduler;
use crate::snapshot::{FallbackPreferences, RawEnvironment, SnapshotBuilder};
use crate::storage::{KeySource, SettingsStore};
use crate::transport::{Transport, TransportFailure, TransportReply};

enum Command {
    EnvironmentChanged(RawEnvironment),
    SetWlanDataAllowed(bool),
    Status(oneshot::Sender<LocatorStatus>),
}

enum Internal {
    Completed {
        id: RequestId,
        result: Result<TransportReply, TransportFailure>,
    },
    TimedOut(RequestId),
}

/// Point-in-time view of the locator state.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatorStatus {
    pub request_state: RequestState,
    pub backoff_factor: u32,
    pub backoff_interval: Duration,
    pub queries_tracked: usize,
    pub last_query_at: Option<DateTime<Utc>>,
    pub wlan_data_allowed: bool,
}

/// Wall-clock time that advances with the tokio clock.
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl Clock {
    fn start() -> Self {
        Self {
            origin: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}

struct PendingCall {
    id: RequestId,
    cancel: Option<oneshot::Sender<()>>,
    timer: JoinHandle<()>,
}

pub struct Locator {
    scheduler: Scheduler,
    lifecycle: RequestLifecycle,
    builder: SnapshotBuilder,
    transport: Arc<dyn Transport>,
    events: EventBus,
    clock: Clock,
    pending: Option<PendingCall>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
}

impl Locator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SettingsStore>,
        keys: Arc<dyn KeySource>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            scheduler: Scheduler::new(),
            lifecycle: RequestLifecycle::new(store, keys),
            builder: SnapshotBuilder::default(),
            transport,
            events: EventBus::default(),
            clock: Clock::start(),
            pending: None,
            internal_tx,
            internal_rx,
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: FallbackPreferences) -> Self {
        let allowed = self.builder.wlan_data_allowed();
        self.builder = SnapshotBuilder::new(fallbacks);
        self.builder.set_wlan_data_allowed(allowed);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.set_timeout(timeout);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Start the service task. It stops once every handle is dropped; a
    /// lookup still outstanding at that point resolves as timed out.
    pub fn spawn(self) -> (LocatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = LocatorHandle {
            tx,
            events: self.events.clone(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("Locator started");
        loop {
            tokio::select! {
                biased;
                Some(internal) = self.internal_rx.recv() => match internal {
                    Internal::Completed { id, result } => self.on_completed(id, result),
                    Internal::TimedOut(id) => self.on_timeout(id),
                },
                cmd = commands.recv() => match cmd {
                    Some(Command::EnvironmentChanged(raw)) => self.on_environment_changed(&raw),
                    Some(Command::SetWlanDataAllowed(allowed)) => {
                        self.builder.set_wlan_data_allowed(allowed);
                    }
                    Some(Command::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    None => break,
                },
            }
        }
        if let Some(pending) = self.pending.take() {
            pending.timer.abort();
            if let Some(cancel) = pending.cancel {
                let _ = cancel.send(());
            }
            // An abandoned call still gets its one terminal event.
            self.lifecycle.on_timeout(pending.id);
            let now = self.clock.now();
            if let Some(resolution) =
                self.lifecycle
                    .resolve(pending.id, Err(TransportFailure::cancelled()), now)
            {
                self.events.emit(LocatorEvent::from(resolution));
            }
        }
        tracing::debug!("Locator stopped");
    }

    fn status(&self) -> LocatorStatus {
        let backoff = self.scheduler.backoff();
        LocatorStatus {
            request_state: self.lifecycle.state(),
            backoff_factor: backoff.factor(),
            backoff_interval: backoff.interval(),
            queries_tracked: self.scheduler.history().len(),
            last_query_at: self.scheduler.last_query().map(|q| q.timestamp),
            wlan_data_allowed: self.builder.wlan_data_allowed(),
        }
    }

    fn on_environment_changed(&mut self, raw: &RawEnvironment) {
        let now = self.clock.now();
        let snapshot = self.builder.build(raw);
        let decision = self.scheduler.decide(&snapshot, now);
        let Some(query) = decision.query else {
            return;
        };

        match self.lifecycle.attempt(&query.payload, &snapshot.wifi, now) {
            Ok(Attempt::Issued(request)) => {
                self.dispatch(request);
                self.scheduler.accept(query);
            }
            Ok(Attempt::InFlight) => {}
            Err(e) => self.events.emit(LocatorEvent::error(&e)),
        }
    }

    fn dispatch(&mut self, request: OutboundRequest) {
        let OutboundRequest {
            id, body, timeout, ..
        } = request;

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let transport = self.transport.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                res = transport.post(body) => res,
                Ok(()) = &mut cancel_rx => Err(TransportFailure::cancelled()),
            };
            let _ = tx.send(Internal::Completed { id, result });
        });

        let tx = self.internal_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Internal::TimedOut(id));
        });

        self.pending = Some(PendingCall {
            id,
            cancel: Some(cancel_tx),
            timer,
        });
        self.lifecycle.armed(id);
    }

    fn on_timeout(&mut self, id: RequestId) {
        if !self.lifecycle.on_timeout(id) {
            return;
        }
        if let Some(pending) = self.pending.as_mut().filter(|p| p.id == id) {
            if let Some(cancel) = pending.cancel.take() {
                let _ = cancel.send(());
            }
        }
    }

    fn on_completed(&mut self, id: RequestId, result: Result<TransportReply, TransportFailure>) {
        if self.pending.as_ref().is_some_and(|p| p.id == id) {
            if let Some(pending) = self.pending.take() {
                pending.timer.abort();
            }
        }
        let now = self.clock.now();
        if let Some(resolution) = self.lifecycle.resolve(id, result, now) {
            self.events.emit(LocatorEvent::from(resolution));
        }
    }
}

/// Cloneable front end to a running [`Locator`].
#[derive(Clone)]
pub struct LocatorHandle {
    tx: mpsc::UnboundedSender<Command>,
    events: EventBus,
}

impl LocatorHandle {
    /// Report new radio observations. Returns `false` if the locator stopped.
    pub fn environment_changed(&self, raw: RawEnvironment) -> bool {
        self.tx.send(Command::EnvironmentChanged(raw)).is_ok()
    }

    pub fn set_wlan_data_allowed(&self, allowed: bool) -> bool {
        self.tx.send(Command::SetWlanDataAllowed(allowed)).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocatorEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> Option<LocatorStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Status(reply)).ok()?;
        rx.await.ok()
    }
}
