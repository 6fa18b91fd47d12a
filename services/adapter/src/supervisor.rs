//! Processing pipeline: worker pool and health monitor
//!
//! Resources announced by the feed are turned into `ProcessingJob`s and
//! queued by priority. A fixed pool of workers drains the queue; each job
//! either refreshes an existing listener or creates and starts a new one.
//! A fixture is never queued or processed twice at the same time.
//!
//! The health monitor periodically checks every listener against the feed's
//! latest sequence, re-queues unhealthy ones at High priority and removes
//! listeners whose fixture has ended. Listeners waiting for their fixture to
//! leave setup are left alone.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use types::ids::FixtureId;

use crate::config::AdapterConfig;
use crate::facade::ResourceFacade;
use crate::listener::StreamingState;
use crate::manager::ListenerManager;
use crate::priority_queue::{PriorityQueue, ProcessingPriority};

/// A unit of work for one fixture.
#[derive(Clone)]
pub struct ProcessingJob {
    pub resource: Arc<dyn ResourceFacade>,
    pub enqueued_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(resource: Arc<dyn ResourceFacade>) -> Self {
        Self {
            resource,
            enqueued_at: Utc::now(),
        }
    }

    pub fn fixture_id(&self) -> &FixtureId {
        self.resource.id()
    }
}

/// Outcome of one health-check round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub checked: usize,
    /// Listeners re-queued for a restart.
    pub requeued: Vec<FixtureId>,
    /// Listeners removed because their fixture ended.
    pub removed: Vec<FixtureId>,
}

pub struct Supervisor {
    manager: Arc<ListenerManager>,
    queue: Arc<PriorityQueue<ProcessingJob>>,
    config: AdapterConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(manager: Arc<ListenerManager>, config: AdapterConfig) -> Self {
        let queue = Arc::new(PriorityQueue::new(&config.queue));
        Self {
            manager,
            queue,
            config,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn manager(&self) -> &Arc<ListenerManager> {
        &self.manager
    }

    pub fn queue(&self) -> &Arc<PriorityQueue<ProcessingJob>> {
        &self.queue
    }

    /// Queue `resource` for processing.
    ///
    /// Returns `false` when the fixture is already queued, in flight, ended,
    /// or would not be affected by processing.
    pub fn process_resource(&self, resource: Arc<dyn ResourceFacade>, priority: ProcessingPriority) -> bool {
        let fixture_id = resource.id().clone();

        if self.queue.contains(|job| job.fixture_id() == &fixture_id) {
            debug!(fixture_id = %fixture_id, "fixture already queued");
            return false;
        }
        if !self.manager.can_be_processed(&fixture_id) {
            debug!(fixture_id = %fixture_id, "fixture cannot be processed now");
            return false;
        }
        if !self.manager.will_process_resource(resource.as_ref()) {
            return false;
        }

        debug!(fixture_id = %fixture_id, priority = ?priority, "queueing fixture");
        self.queue.enqueue(ProcessingJob::new(resource), priority);
        true
    }

    /// Spawn the worker pool and the health monitor.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        for worker_id in 0..self.config.worker.workers {
            tasks.push(tokio::spawn(Self::run_worker(
                worker_id,
                Arc::clone(&self.manager),
                Arc::clone(&self.queue),
                self.cancel.clone(),
            )));
        }
        tasks.push(tokio::spawn(Self::run_health_monitor(
            Arc::clone(&self.manager),
            Arc::clone(&self.queue),
            self.config.clone(),
            self.cancel.clone(),
        )));
        info!(workers = self.config.worker.workers, "supervisor started");
    }

    /// Stop all background tasks and every listener.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "supervisor task ended abnormally");
            }
        }
        self.manager.stop_all().await;
        info!("supervisor stopped");
    }

    async fn run_worker(
        worker_id: usize,
        manager: Arc<ListenerManager>,
        queue: Arc<PriorityQueue<ProcessingJob>>,
        cancel: CancellationToken,
    ) {
        debug!(worker_id, "worker started");
        let jobs = queue.consume(cancel);
        tokio::pin!(jobs);

        while let Some(job) = jobs.next().await {
            let fixture_id = job.fixture_id().clone();
            if let Err(err) = process_job(&manager, job).await {
                let message = format!("{err:#}");
                error!(worker_id, fixture_id = %fixture_id, error = %message, "job failed");
            }
        }
        debug!(worker_id, "worker stopped");
    }

    async fn run_health_monitor(
        manager: Arc<ListenerManager>,
        queue: Arc<PriorityQueue<ProcessingJob>>,
        config: AdapterConfig,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(config.health.interval());
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = check_health(&manager, &queue, &config).await;
                    debug!(
                        checked = report.checked,
                        requeued = report.requeued.len(),
                        removed = report.removed.len(),
                        "health check completed"
                    );
                }
            }
        }
    }

    /// Run one health-check round now.
    pub async fn run_health_check(&self) -> HealthReport {
        check_health(&self.manager, &self.queue, &self.config).await
    }
}

async fn process_job(manager: &ListenerManager, job: ProcessingJob) -> anyhow::Result<()> {
    let fixture_id = job.fixture_id().clone();
    if !manager.begin_processing(&fixture_id) {
        debug!(fixture_id = %fixture_id, "fixture already in flight, skipping job");
        return Ok(());
    }

    let result = refresh_or_create(manager, &job).await;
    manager.finish_processing(&fixture_id);
    result
}

async fn refresh_or_create(manager: &ListenerManager, job: &ProcessingJob) -> anyhow::Result<()> {
    let fixture_id = job.fixture_id();

    if let Some(listener) = manager.get(fixture_id) {
        listener
            .update_resource_state(job.resource.as_ref())
            .await
            .with_context(|| format!("updating listener for fixture {fixture_id}"))?;
        return Ok(());
    }

    let listener = manager
        .create_stream_listener(Arc::clone(&job.resource))
        .await
        .with_context(|| format!("creating listener for fixture {fixture_id}"))?;
    listener
        .start()
        .await
        .with_context(|| format!("starting listener for fixture {fixture_id}"))?;
    Ok(())
}

async fn check_health(
    manager: &ListenerManager,
    queue: &PriorityQueue<ProcessingJob>,
    config: &AdapterConfig,
) -> HealthReport {
    let mut report = HealthReport::default();
    let max_delay = config.health.max_delay();

    for listener in manager.listeners() {
        report.checked += 1;
        let fixture_id = listener.fixture_id().clone();

        if !listener.is_fixture_ended() {
            let latest = listener.resource().content_sequence();
            if listener.check_stream_health(max_delay, latest).await {
                continue;
            }
        }

        // the check itself may have ended the fixture
        if listener.is_fixture_ended() {
            manager.remove_stream_listener(&fixture_id).await;
            report.removed.push(fixture_id);
            continue;
        }

        if queue.contains(|job| job.fixture_id() == &fixture_id) || !manager.can_be_processed(&fixture_id) {
            continue;
        }
        // a restart job would find nothing to start until the feed leaves setup
        if listener.state() == StreamingState::Ready && !listener.resource().match_status().allows_streaming() {
            debug!(fixture_id = %fixture_id, "fixture still in setup, not scheduling restart");
            continue;
        }
        warn!(fixture_id = %fixture_id, state = ?listener.state(), "listener unhealthy, scheduling restart");
        queue.enqueue(
            ProcessingJob::new(Arc::clone(listener.resource())),
            ProcessingPriority::High,
        );
        report.requeued.push(fixture_id);
    }

    report
}
