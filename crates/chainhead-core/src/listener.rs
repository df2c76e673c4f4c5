//! Event listener: an observer that keeps a log subscription open for every
//! log-initiated job and re-drives pending job runs on each new head.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::TrackerError;
use crate::executor::RunExecutor;
use crate::job::{Job, RunResult};
use crate::observer::{HeadTrackable, ObserverId};
use crate::store::JobStore;
use crate::tracker::HeadTracker;
use crate::transport::{LogSubscriber, Subscription};
use crate::types::{BlockHeader, BlockMarker};

// ─── JobSubscription ──────────────────────────────────────────────────────────

/// A job bound to its live log subscription.
#[derive(Debug)]
pub struct JobSubscription {
    job: Job,
    subscription: Subscription,
}

impl JobSubscription {
    /// Open a log subscription for `job` starting at `head`.
    ///
    /// A terminal error on the subscription is logged; recovery happens when
    /// the head tracker reconnects and the listener re-subscribes every job.
    pub async fn start(
        job: Job,
        head: Option<&BlockMarker>,
        subscriber: &dyn LogSubscriber,
    ) -> Result<Self, TrackerError> {
        let mut subscription = subscriber.subscribe_logs(&job, head).await?;

        if let Some(errors) = subscription.take_errors() {
            let token = subscription.token();
            let job_id = job.id.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    result = errors => {
                        if let Ok(err) = result {
                            warn!(job = %job_id, error = %err, "log subscription failed");
                        }
                    }
                }
            });
        }

        debug!(job = %job.id, from = ?head.map(ToString::to_string), "log subscription started");
        Ok(Self { job, subscription })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn unsubscribe(&self) {
        self.subscription.unsubscribe();
    }
}

// ─── EventListener ────────────────────────────────────────────────────────────

/// Bridges new-head broadcasts to log-triggered job execution.
pub struct EventListener {
    tracker: HeadTracker,
    store: Arc<dyn JobStore>,
    subscriber: Arc<dyn LogSubscriber>,
    executor: Arc<dyn RunExecutor>,
    subscriptions: Mutex<Vec<JobSubscription>>,
    observer_id: Mutex<Option<ObserverId>>,
}

impl EventListener {
    pub fn new(
        tracker: HeadTracker,
        store: Arc<dyn JobStore>,
        subscriber: Arc<dyn LogSubscriber>,
        executor: Arc<dyn RunExecutor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            store,
            subscriber,
            executor,
            subscriptions: Mutex::new(vec![]),
            observer_id: Mutex::new(None),
        })
    }

    /// Attach to the head tracker. If the tracker is already connected this
    /// subscribes every stored job before returning.
    pub async fn start(self: &Arc<Self>) {
        let attached = lock(&self.observer_id).is_some();
        if attached {
            return;
        }
        let observer: Arc<dyn HeadTrackable> = self.clone();
        let id = self.tracker.attach(observer).await;
        *lock(&self.observer_id) = Some(id);
        info!(observer = %id, "event listener attached");
    }

    /// Detach from the head tracker, releasing subscriptions if connected.
    pub async fn stop(&self) {
        let id = lock(&self.observer_id).take();
        if let Some(id) = id {
            self.tracker.detach(id).await;
            info!(observer = %id, "event listener detached");
        }
    }

    /// Subscribe to logs for `job`.
    ///
    /// Does nothing for jobs without log initiators or while the tracker is
    /// disconnected. On error the job is not recorded. A subscription that
    /// opens after the tracker disconnected is released straight away.
    pub async fn add_job(&self, job: Job) -> Result<(), TrackerError> {
        if !job.is_log_initiated() || !self.tracker.is_connected() {
            return Ok(());
        }
        let head = self.tracker.get();
        let sub = JobSubscription::start(job, head.as_ref(), self.subscriber.as_ref()).await?;

        // disconnect() clears the list under this lock after the state flips
        let mut subs = lock(&self.subscriptions);
        if !self.tracker.is_connected() {
            drop(subs);
            sub.unsubscribe();
            debug!(job = %sub.job().id, "tracker disconnected while subscribing, released");
            return Ok(());
        }
        subs.push(sub);
        Ok(())
    }

    /// Jobs with an active log subscription.
    pub fn jobs(&self) -> Vec<Job> {
        lock(&self.subscriptions)
            .iter()
            .map(|s| s.job().clone())
            .collect()
    }
}

#[async_trait]
impl HeadTrackable for EventListener {
    /// Subscribe every stored job, collecting failures instead of stopping
    /// at the first one.
    async fn connect(&self) -> Result<(), TrackerError> {
        let jobs = self.store.jobs().await?;
        let mut errors = vec![];
        for job in jobs {
            let id = job.id.clone();
            if let Err(err) = self.add_job(job).await {
                warn!(job = %id, error = %err, "failed to subscribe job");
                errors.push(err);
            }
        }
        match TrackerError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) {
        let subs = std::mem::take(&mut *lock(&self.subscriptions));
        for sub in &subs {
            sub.unsubscribe();
        }
        debug!(released = subs.len(), "job subscriptions released");
    }

    async fn on_new_head(&self, _header: &BlockHeader) {
        let runs = match self.store.pending_job_runs().await {
            Ok(runs) => runs,
            Err(err) => {
                error!(error = %err, "failed to load pending job runs");
                return;
            }
        };
        for run in runs {
            if let Err(err) = self
                .executor
                .execute_run(&run, self.store.as_ref(), RunResult::default())
                .await
            {
                error!(run = %run.id, job = %run.job_id, error = %err, "failed to advance job run");
            }
        }
    }

    fn name(&self) -> &str {
        "event-listener"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
