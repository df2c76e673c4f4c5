//! Shared mocks for the tracker and listener integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;

use chainhead_core::{
    BlockHeader, BlockMarker, HeadStore, HeadTrackable, HeadTracker, HeadTransport, Job,
    JobRun, JobStore, LogSubscriber, MemoryStore, RunExecutor, RunResult, Sleeper,
    Subscription, TrackerError,
};

pub fn header(number: u64) -> BlockHeader {
    BlockHeader {
        number: number.into(),
        hash: format!("0x{number:064x}"),
        parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
        timestamp: number * 12,
    }
}

pub fn marker(number: u64) -> BlockMarker {
    header(number).marker()
}

/// Poll `check` until it holds, failing the test after ~2s.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {what}");
}

pub fn tracker_with(
    store: Arc<dyn HeadStore>,
    transport: Arc<MockTransport>,
) -> (HeadTracker, RecordingSleeper) {
    let sleeper = RecordingSleeper::default();
    let tracker = HeadTracker::with_sleeper(store, transport, sleeper.clone());
    (tracker, sleeper)
}

// ─── Transport ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TransportState {
    failures_remaining: usize,
    attempts: usize,
    sink: Option<mpsc::UnboundedSender<BlockHeader>>,
    errors: Option<oneshot::Sender<TrackerError>>,
    token: Option<CancellationToken>,
}

/// Scripted new-heads transport.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<TransportState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` subscribe attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().failures_remaining = n;
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Push a header into the live subscription.
    pub fn push(&self, number: u64) {
        let state = self.state.lock().unwrap();
        let sink = state.sink.as_ref().expect("no live subscription");
        sink.send(header(number)).expect("tracker dropped the header queue");
    }

    /// Break the live subscription mid-stream.
    pub fn break_stream(&self, reason: &str) {
        let errors = self.state.lock().unwrap().errors.take();
        errors
            .expect("no live subscription")
            .send(TrackerError::Subscription(reason.into()))
            .expect("tracker stopped watching errors");
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .token
            .as_ref()
            .map_or(true, CancellationToken::is_cancelled)
    }
}

#[async_trait]
impl HeadTransport for MockTransport {
    async fn subscribe_new_heads(
        &self,
        sink: mpsc::UnboundedSender<BlockHeader>,
    ) -> Result<Subscription, TrackerError> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(TrackerError::Subscription("connection refused".into()));
        }
        let (sub, errors) = Subscription::channel();
        state.sink = Some(sink);
        state.errors = Some(errors);
        state.token = Some(sub.token());
        Ok(sub)
    }

    fn url(&self) -> &str {
        "mock://node"
    }
}

// ─── Sleeper ──────────────────────────────────────────────────────────────────

/// Doubling sleeper that records each wait and only yields.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    attempt: Arc<AtomicUsize>,
    waits: Arc<Mutex<Vec<Duration>>>,
    resets: Arc<AtomicUsize>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    fn reset(&mut self) {
        self.attempt.store(0, Ordering::SeqCst);
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn duration(&self) -> Duration {
        Duration::from_millis(10 << self.attempt.load(Ordering::SeqCst).min(20))
    }

    async fn sleep(&mut self) {
        let wait = self.duration();
        self.waits.lock().unwrap().push(wait);
        self.attempt.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

// ─── Observers ────────────────────────────────────────────────────────────────

/// Observer that counts every callback.
#[derive(Default)]
pub struct RecordingObserver {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    heads: Mutex<Vec<u64>>,
    fail_connect: bool,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_connect: true,
            ..Self::default()
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> Vec<u64> {
        self.heads.lock().unwrap().clone()
    }
}

#[async_trait]
impl HeadTrackable for RecordingObserver {
    async fn connect(&self) -> Result<(), TrackerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(TrackerError::Subscription("observer refused".into()));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_new_head(&self, header: &BlockHeader) {
        let number = u64::try_from(&header.number).unwrap();
        self.heads.lock().unwrap().push(number);
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ─── Stores ───────────────────────────────────────────────────────────────────

/// Memory store whose marker writes fail for selected heights.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_heights: Mutex<HashSet<u64>>,
    fail_reads: bool,
}

impl FlakyStore {
    pub fn failing_at(heights: &[u64]) -> Arc<Self> {
        Arc::new(Self {
            fail_heights: Mutex::new(heights.iter().copied().collect()),
            ..Self::default()
        })
    }

    pub fn unreadable() -> Arc<Self> {
        Arc::new(Self {
            fail_reads: true,
            ..Self::default()
        })
    }
}

#[async_trait]
impl HeadStore for FlakyStore {
    async fn last_marker(&self) -> Result<Option<BlockMarker>, TrackerError> {
        if self.fail_reads {
            return Err(TrackerError::Persistence("disk unavailable".into()));
        }
        self.inner.last_marker().await
    }

    async fn save_marker(&self, marker: &BlockMarker) -> Result<(), TrackerError> {
        let height = marker.as_u64().unwrap();
        if self.fail_heights.lock().unwrap().contains(&height) {
            return Err(TrackerError::Persistence(format!("write failed at {height}")));
        }
        self.inner.save_marker(marker).await
    }
}

// ─── Log subscriptions ────────────────────────────────────────────────────────

/// Log subscriber that refuses selected job ids.
#[derive(Default)]
pub struct MockLogSubscriber {
    refused: Mutex<HashSet<String>>,
    opened: Mutex<Vec<(String, Option<BlockMarker>, CancellationToken)>>,
    gated: bool,
    entered: Notify,
    release: Notify,
}

impl MockLogSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing(job_ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            refused: Mutex::new(job_ids.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        })
    }

    /// Subscriber whose `subscribe_logs` parks until [`release`](Self::release).
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gated: true,
            ..Self::default()
        })
    }

    /// Wait until a `subscribe_logs` call is parked at the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Total subscriptions ever opened.
    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// Job ids whose subscription has not been released.
    pub fn active(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, token)| !token.is_cancelled())
            .map(|(id, _, _)| id.clone())
            .collect()
    }

    /// The starting marker passed for the most recent subscription.
    pub fn last_from(&self) -> Option<BlockMarker> {
        self.opened
            .lock()
            .unwrap()
            .last()
            .and_then(|(_, from, _)| from.clone())
    }
}

#[async_trait]
impl LogSubscriber for MockLogSubscriber {
    async fn subscribe_logs(
        &self,
        job: &Job,
        from: Option<&BlockMarker>,
    ) -> Result<Subscription, TrackerError> {
        if self.gated {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.refused.lock().unwrap().contains(&job.id) {
            return Err(TrackerError::Subscription(format!("logs for {} refused", job.id)));
        }
        let (sub, _errors) = Subscription::channel();
        self.opened
            .lock()
            .unwrap()
            .push((job.id.clone(), from.cloned(), sub.token()));
        Ok(sub)
    }
}

// ─── Executors ────────────────────────────────────────────────────────────────

/// Executor that records run ids and fails selected ones.
#[derive(Default)]
pub struct RecordingExecutor {
    failing: HashSet<String>,
    executed: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn failing(run_ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: run_ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunExecutor for RecordingExecutor {
    async fn execute_run(
        &self,
        run: &JobRun,
        _store: &dyn JobStore,
        _input: RunResult,
    ) -> Result<JobRun, TrackerError> {
        self.executed.lock().unwrap().push(run.id.clone());
        if self.failing.contains(&run.id) {
            return Err(TrackerError::Execution(format!("run {} blew up", run.id)));
        }
        Ok(run.clone())
    }
}
