//! A worker owns a stable id (host+pid) and runs a lease -> dispatch ->
//! heartbeat -> complete/fail loop, mirroring the shape of the teacher's
//! `gateway::worker::Worker` (a channel-driven loop handing work to a
//! `Service`) generalized to a durable, DB-backed queue instead of an
//! in-process channel.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use platform_common::{models::Job, Error, Id};
use platform_queue::Queue;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// A cancellation-aware unit of work. One impl per `JobType`; `platform-api`
/// wires the concrete handlers (pipeline, cleanup, rollback, ...) in.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job, cancel: CancellationToken) -> Result<(), Error>;
}

/// Cooperative cancellation signal threaded through every handler, checked
/// at each suspension point per §5.
#[derive(Clone)]
pub struct CancellationToken(watch::Receiver<bool>);

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// A standalone token for handler tests that don't run through a
    /// `WorkerPool`'s dispatch loop.
    pub fn stub(cancelled: bool) -> Self {
        let (_tx, rx) = watch::channel(cancelled);
        Self(rx)
    }
}

/// Stable worker identity: `host:pid`, as required by §4.3.
pub fn worker_id() -> String {
    let host = hostname_or_unknown();
    format!("{host}:{}", std::process::id())
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

pub struct WorkerPoolConfig {
    pub pool_size: usize,
    pub lease_ttl: Duration,
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            lease_ttl: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct WorkerPool {
    queue: Queue,
    handlers: Arc<HashMap<platform_common::models::JobType, Arc<dyn JobHandler>>>,
    config: WorkerPoolConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new(
        queue: Queue,
        handlers: HashMap<platform_common::models::JobType, Arc<dyn JobHandler>>,
        config: WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            handlers: Arc::new(handlers),
            config,
            shutdown_tx,
        }
    }

    /// Spawns `pool_size` concurrent lease loops. N workers = N concurrent
    /// leases, per §4.3.
    pub fn start(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let id = worker_id();
        (0..self.config.pool_size)
            .map(|i| {
                let queue = self.queue.clone();
                let handlers = self.handlers.clone();
                let lease_ttl = self.config.lease_ttl;
                let poll_interval = self.config.poll_interval;
                let worker_id = format!("{id}#{i}");
                let shutdown_rx = self.shutdown_tx.subscribe();

                tokio::spawn(run_loop(
                    worker_id,
                    queue,
                    handlers,
                    lease_ttl,
                    poll_interval,
                    shutdown_rx,
                ))
            })
            .collect()
    }

    /// Signals all running handlers to cancel and stops leasing new jobs.
    /// Handlers that return promptly complete normally; the rest have
    /// their leases allowed to expire for later re-execution, per §4.3.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[instrument(skip(queue, handlers, shutdown_rx), fields(worker_id = %worker_id))]
async fn run_loop(
    worker_id: String,
    queue: Queue,
    handlers: Arc<HashMap<platform_common::models::JobType, Arc<dyn JobHandler>>>,
    lease_ttl: Duration,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            info!("draining: no new leases will be taken");
            return;
        }

        let leased = tokio::select! {
            leased = queue.lease(&worker_id, lease_ttl) => leased,
            _ = shutdown_rx.changed() => continue,
        };

        match leased {
            Ok(Some(job)) => {
                dispatch(&worker_id, &queue, &handlers, job, lease_ttl, shutdown_rx.clone()).await;
            }
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
            }
            Err(err) => {
                error!(error = %err, "failed to lease a job");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

#[instrument(skip(queue, handlers, shutdown_rx), fields(job_id = %job.id, job_type = %job.job_type))]
async fn dispatch(
    worker_id: &str,
    queue: &Queue,
    handlers: &HashMap<platform_common::models::JobType, Arc<dyn JobHandler>>,
    job: Job,
    lease_ttl: Duration,
    shutdown_rx: watch::Receiver<bool>,
) {
    let Some(handler) = handlers.get(&job.job_type).cloned() else {
        warn!("no handler registered for this job type; failing it");
        let _ = queue
            .fail(job.id, worker_id, "no handler registered")
            .await;
        return;
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancellation = CancellationToken(cancel_rx);

    let heartbeat_queue = queue.clone();
    let heartbeat_worker_id = worker_id.to_string();
    let job_id = job.id;
    let heartbeat_interval = lease_ttl / 3;
    let mut shutdown_watch = shutdown_rx;

    let heartbeat_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(heartbeat_interval) => {
                    if heartbeat_queue
                        .heartbeat(job_id, &heartbeat_worker_id, lease_ttl)
                        .await
                        .is_err()
                    {
                        // The lease is gone or the job left `processing` —
                        // either way a cancel may have raced us here, so
                        // signal it and let the handler notice at its next
                        // suspension point (§5).
                        let _ = cancel_tx.send(true);
                        return;
                    }
                }
                _ = shutdown_watch.changed() => {
                    if *shutdown_watch.borrow() {
                        let _ = cancel_tx.send(true);
                    }
                }
            }
        }
    });

    let result = handler.handle(&job, cancellation).await;
    heartbeat_task.abort();

    match result {
        Ok(()) => {
            if let Err(err) = queue.complete(job.id, worker_id).await {
                debug!(error = %err, "lease lost before completion could be recorded");
            }
        }
        Err(Error::Internal(msg)) => {
            // §7: an internal error gets one re-lease before failing terminally.
            let _ = queue.fail(job.id, worker_id, &msg).await;
        }
        Err(err) => {
            let _ = queue.fail(job.id, worker_id, &err.to_string()).await;
        }
    }
}

/// Fetches a job id out of a worker's error path for logging, without
/// pulling a full job record through every call site.
pub fn describe_job_id(id: Id) -> String {
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_common::models::JobType;
    use platform_store::Store;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: &Job, _cancel: CancellationToken) -> Result<(), Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatches_to_the_registered_handler() {
        let store = Store::in_memory().await;
        let queue = Queue::new(store);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handlers: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
        handlers.insert(JobType::Build, Arc::new(CountingHandler(calls.clone())));

        let pool = WorkerPool::new(
            queue.clone(),
            handlers,
            WorkerPoolConfig {
                pool_size: 1,
                lease_ttl: Duration::from_secs(5),
                poll_interval: Duration::from_millis(10),
            },
        );

        queue
            .enqueue(JobType::Build, serde_json::json!({}), 3)
            .await
            .unwrap();

        let handles = pool.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.shutdown();
        for h in handles {
            h.abort();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct WaitForCancelHandler;

    #[async_trait]
    impl JobHandler for WaitForCancelHandler {
        async fn handle(&self, _job: &Job, cancel: CancellationToken) -> Result<(), Error> {
            while !cancel.is_cancelled() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn a_db_level_cancel_reaches_a_running_handler_via_the_heartbeat() {
        let store = Store::in_memory().await;
        let queue = Queue::new(store.clone());

        let job_id = queue
            .enqueue(JobType::Build, serde_json::json!({}), 3)
            .await
            .unwrap();
        let leased = queue.lease("w1", Duration::from_secs(1)).await.unwrap().unwrap();

        let mut handlers: HashMap<JobType, Arc<dyn JobHandler>> = HashMap::new();
        handlers.insert(JobType::Build, Arc::new(WaitForCancelHandler));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatch_handle = tokio::spawn(async move {
            dispatch("w1", &queue, &handlers, leased, Duration::from_secs(1), shutdown_rx).await;
        });

        // Simulates `POST /deployments/{id}/cancel`: flips the row away
        // from `processing` out from under the running worker.
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.cancel_job(job_id).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), dispatch_handle)
            .await
            .expect("handler should observe the cancel before the timeout")
            .unwrap();
    }
}
