//! Head tracker. Owns the upstream new-heads subscription, keeps the highest
//! block marker seen, and fans new heads out to attached observers.
//!
//! # Tasks
//!
//! ```text
//! transport ──headers──► delivery task ──save──► HeadStore
//!     │                        └──on_new_head──► observers (serialized)
//!     └──terminal error──► watcher task ──► reconnect loop (backoff, forever)
//! ```
//!
//! Lock order: the registry lock may be held while an observer reads the
//! marker (`attach` and `connect` run observer callbacks under it). The
//! marker lock is a leaf: it is never held across an await or while taking
//! another lock.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TrackerError;
use crate::observer::{HeadTrackable, ObserverId};
use crate::sleeper::{BackoffSleeper, Sleeper};
use crate::store::HeadStore;
use crate::transport::{HeadTransport, Subscription};
use crate::types::{BlockHeader, BlockMarker};

/// Connection state of the tracker's upstream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The subscription failed and the reconnect loop is running.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

type Observers = BTreeMap<ObserverId, Arc<dyn HeadTrackable>>;

/// A live upstream subscription and the token that stops its tasks.
struct Session {
    subscription: Subscription,
    tasks: CancellationToken,
}

struct Inner {
    store: Arc<dyn HeadStore>,
    transport: Arc<dyn HeadTransport>,
    sleeper: tokio::sync::Mutex<Box<dyn Sleeper>>,
    marker: RwLock<Option<BlockMarker>>,
    observers: tokio::sync::RwLock<Observers>,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Option<Session>>,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    /// Set by `stop()`, cleared by `start()`. No reconnect loop begins while set.
    stopped: bool,
    /// Cancels the running reconnect loop, if any.
    reconnect: Option<CancellationToken>,
}

/// Tracks the latest block seen by this node and dispatches new heads.
///
/// `HeadTracker` is a cheap handle; clones share the same state. Construct
/// one per node and hand clones to collaborators.
#[derive(Clone)]
pub struct HeadTracker {
    inner: Arc<Inner>,
}

impl HeadTracker {
    /// Create a tracker with the default exponential backoff.
    pub fn new(store: Arc<dyn HeadStore>, transport: Arc<dyn HeadTransport>) -> Self {
        Self::with_sleeper(store, transport, BackoffSleeper::default())
    }

    pub fn with_sleeper(
        store: Arc<dyn HeadStore>,
        transport: Arc<dyn HeadTransport>,
        sleeper: impl Sleeper + 'static,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                sleeper: tokio::sync::Mutex::new(Box::new(sleeper)),
                marker: RwLock::new(None),
                observers: tokio::sync::RwLock::new(BTreeMap::new()),
                state,
                session: Mutex::new(None),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Load the persisted marker, subscribe to new heads, start delivering,
    /// and connect every attached observer.
    ///
    /// On failure the tracker is left disconnected with no live subscription.
    pub async fn start(&self) -> Result<(), TrackerError> {
        lock(&self.inner.lifecycle).stopped = false;
        self.establish().await
    }

    /// Cancel the subscription, stop delivery and disconnect observers.
    ///
    /// Also cancels a running reconnect loop and keeps a failing subscription
    /// from starting a new one. Safe to call repeatedly and from inside an
    /// observer callback; it never waits for the delivery task.
    pub async fn stop(&self) {
        let reconnect = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            lifecycle.stopped = true;
            lifecycle.reconnect.take()
        };
        if let Some(token) = reconnect {
            token.cancel();
        }
        self.teardown(ConnectionState::Disconnected).await;
    }

    async fn establish(&self) -> Result<(), TrackerError> {
        let running = lock(&self.inner.session).is_some();
        if running {
            debug!("head tracker already started");
            return Ok(());
        }
        let prior = self.state();
        if prior != ConnectionState::Reconnecting {
            self.inner.state.send_replace(ConnectionState::Connecting);
        }
        if let Err(err) = self.open_session().await {
            let fallback = if prior == ConnectionState::Reconnecting {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            };
            self.inner.state.send_replace(fallback);
            return Err(err);
        }
        self.connect().await;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    // ─── Marker ───────────────────────────────────────────────────────────────

    /// Record `marker` as seen.
    ///
    /// The held marker only moves to a strictly higher block; the input is
    /// persisted either way.
    pub async fn save(&self, marker: Option<&BlockMarker>) -> Result<(), TrackerError> {
        let marker = marker
            .ok_or_else(|| TrackerError::InvalidInput("cannot save an absent block marker".into()))?;
        self.raise_marker(marker);
        self.inner.store.save_marker(marker).await
    }

    /// A copy of the highest marker seen, if any.
    pub fn get(&self) -> Option<BlockMarker> {
        self.inner
            .marker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn raise_marker(&self, marker: &BlockMarker) {
        let mut held = self
            .inner
            .marker
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if held.as_ref().map_or(true, |current| marker.is_higher_than(current)) {
            *held = Some(marker.clone());
        }
    }

    // ─── Observers ────────────────────────────────────────────────────────────

    /// Register an observer. If the tracker is connected, the observer's
    /// `connect()` runs before this returns.
    pub async fn attach(&self, observer: Arc<dyn HeadTrackable>) -> ObserverId {
        let mut observers = self.inner.observers.write().await;
        let id = ObserverId::generate();
        if self.is_connected() {
            connect_observer(id, observer.as_ref()).await;
        }
        observers.insert(id, observer);
        debug!(observer = %id, total = observers.len(), "observer attached");
        id
    }

    /// Remove an observer, disconnecting it first if the tracker is connected.
    /// Unknown ids are ignored.
    pub async fn detach(&self, id: ObserverId) {
        let mut observers = self.inner.observers.write().await;
        if let Some(observer) = observers.get(&id) {
            if self.is_connected() {
                observer.disconnect().await;
            }
        }
        if observers.remove(&id).is_some() {
            debug!(observer = %id, total = observers.len(), "observer detached");
        }
    }

    pub async fn observer_count(&self) -> usize {
        self.inner.observers.read().await.len()
    }

    /// Mark the tracker connected and call `connect()` on every observer.
    /// Observer failures are logged, never propagated.
    pub async fn connect(&self) {
        let observers = self.inner.observers.read().await;
        self.inner.state.send_replace(ConnectionState::Connected);
        for (id, observer) in observers.iter() {
            connect_observer(*id, observer.as_ref()).await;
        }
    }

    /// Mark the tracker disconnected and call `disconnect()` on every observer.
    pub async fn disconnect(&self) {
        let observers = self.inner.observers.read().await;
        self.inner.state.send_replace(ConnectionState::Disconnected);
        for observer in observers.values() {
            observer.disconnect().await;
        }
    }

    /// Deliver `header` to every attached observer, one at a time.
    ///
    /// Iterates a snapshot of the registry, so observers may attach or detach
    /// from inside `on_new_head`.
    pub async fn on_new_head(&self, header: &BlockHeader) {
        let snapshot: Vec<Arc<dyn HeadTrackable>> =
            self.inner.observers.read().await.values().cloned().collect();
        for observer in snapshot {
            observer.on_new_head(header).await;
        }
    }

    // ─── Internals ────────────────────────────────────────────────────────────

    async fn open_session(&self) -> Result<(), TrackerError> {
        if let Some(marker) = self.inner.store.last_marker().await? {
            self.raise_marker(&marker);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = self.inner.transport.subscribe_new_heads(tx).await?;
        let errors = subscription.take_errors();
        let tasks = CancellationToken::new();

        let stale = lock(&self.inner.session).replace(Session {
            subscription,
            tasks: tasks.clone(),
        });
        if let Some(stale) = stale {
            warn!("replacing a live head subscription");
            stale.close();
        }

        tokio::spawn(self.clone().deliver(rx, tasks.clone()));
        if let Some(errors) = errors {
            tokio::spawn(self.clone().watch_errors(errors, tasks));
        }
        Ok(())
    }

    /// Close the session and move to `next`, disconnecting observers only if
    /// the tracker was connected.
    async fn teardown(&self, next: ConnectionState) {
        let session = lock(&self.inner.session).take();
        if let Some(session) = session {
            session.close();
        }

        let observers = self.inner.observers.read().await;
        let prior = self.inner.state.send_replace(next);
        if prior == ConnectionState::Connected {
            for observer in observers.values() {
                observer.disconnect().await;
            }
        }
    }

    async fn deliver(self, mut headers: mpsc::UnboundedReceiver<BlockHeader>, tasks: CancellationToken) {
        if let Some(marker) = self.get() {
            info!(block = %marker, hash = %marker.hash, "tracking logs from block");
        }

        loop {
            tokio::select! {
                biased;
                _ = tasks.cancelled() => break,
                header = headers.recv() => match header {
                    Some(header) => self.handle_header(header).await,
                    None => {
                        debug!("head subscription sink closed");
                        break;
                    }
                },
            }
        }

        headers.close();
        let mut discarded = 0usize;
        while headers.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(discarded, "dropping headers received after stop");
        }
    }

    async fn handle_header(&self, header: BlockHeader) {
        let marker = header.marker();
        debug!(block = %marker, hash = %header.hash, "received header");
        match self.save(Some(&marker)).await {
            Ok(()) => self.on_new_head(&header).await,
            Err(err) => error!(block = %marker, error = %err, "failed to save head, skipping broadcast"),
        }
    }

    async fn watch_errors(self, errors: oneshot::Receiver<TrackerError>, tasks: CancellationToken) {
        tokio::select! {
            biased;
            _ = tasks.cancelled() => {}
            result = errors => match result {
                Ok(err) => {
                    warn!(error = %err, "error in new head subscription, disconnected");
                    self.reconnect(tasks.clone()).await;
                }
                Err(_) => debug!("head subscription ended without error"),
            },
        }
    }

    /// Tear down and resubscribe with backoff until it succeeds or the
    /// tracker is stopped. There is no attempt limit.
    ///
    /// `tasks` belongs to the failed session; if it is already cancelled the
    /// session was closed by `stop()` and nothing is retried.
    ///
    /// Returns a boxed future: the loop calls `establish()`, which spawns the
    /// watcher that calls back into here.
    fn reconnect(self, tasks: CancellationToken) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let cancel = CancellationToken::new();
            {
                let mut lifecycle = lock(&self.inner.lifecycle);
                if lifecycle.stopped || tasks.is_cancelled() {
                    debug!("head tracker stopped, not reconnecting");
                    return;
                }
                lifecycle.reconnect = Some(cancel.clone());
            }
            self.teardown(ConnectionState::Reconnecting).await;

            let url = self.inner.transport.url().to_string();
            let mut sleeper = self.inner.sleeper.lock().await;
            sleeper.reset();

            loop {
                info!(url = %url, delay = ?sleeper.duration(), "reconnecting to node");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleeper.sleep() => {}
                }
                if cancel.is_cancelled() {
                    break;
                }
                match self.establish().await {
                    Ok(()) => {
                        if !cancel.is_cancelled() {
                            info!(url = %url, "reconnected to node");
                        }
                        break;
                    }
                    Err(err) => {
                        warn!(url = %url, error = %err, "error reconnecting");
                        self.teardown(ConnectionState::Reconnecting).await;
                    }
                }
            }

            // stop() may have raced with the last attempt
            if cancel.is_cancelled() {
                self.teardown(ConnectionState::Disconnected).await;
                info!(url = %url, "reconnect cancelled");
            }
        })
    }
}

impl Session {
    fn close(self) {
        self.tasks.cancel();
        self.subscription.unsubscribe();
    }
}

async fn connect_observer(id: ObserverId, observer: &dyn HeadTrackable) {
    if let Err(err) = observer.connect().await {
        let err = TrackerError::Observer {
            observer: format!("{} ({id})", observer.name()),
            reason: err.to_string(),
        };
        warn!(error = %err, "observer connect failed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
