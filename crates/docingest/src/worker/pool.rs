use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use tokio::runtime::{Builder, Runtime};

use crate::config::Config;
use crate::error::WorkerError;
use crate::jobs::{JobStatus, StatusUpdate};
use crate::pipeline::{BatchCoordinator, Pipeline, PipelineError, RunControl};

use super::cancellation::CancellationRegistry;
use super::task::{Task, TaskKind, TaskReport};
use super::Dispatcher;

pub const DEFAULT_SOFT_TIME_LIMIT: Duration = Duration::from_secs(540);
pub const DEFAULT_HARD_TIME_LIMIT: Duration = Duration::from_secs(600);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Checked cooperatively at every checkpoint.
    pub soft_time_limit: Duration,
    /// Enforced by dropping the job future.
    pub hard_time_limit: Duration,
    /// Tasks waiting for a worker; dispatch fails fast beyond this.
    pub queue_capacity: usize,
}

impl PoolConfig {
    pub fn from_config(config: &Config) -> Self {
        let workers = if config.jobs.workers == 0 {
            num_cpus::get()
        } else {
            config.jobs.workers
        };
        Self {
            workers,
            soft_time_limit: Duration::from_secs(config.jobs.soft_time_limit_seconds),
            hard_time_limit: Duration::from_secs(config.jobs.hard_time_limit_seconds),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            soft_time_limit: DEFAULT_SOFT_TIME_LIMIT,
            hard_time_limit: DEFAULT_HARD_TIME_LIMIT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

pub struct WorkerPool {
    task_sender: Sender<Task>,
    result_receiver: Receiver<TaskReport>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    registry: Arc<CancellationRegistry>,
}

impl WorkerPool {
    pub fn new(pipeline: Pipeline, config: PoolConfig) -> Result<Self, WorkerError> {
        if config.workers == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker count must be > 0".to_string(),
            ));
        }
        let (task_sender, task_receiver) = bounded::<Task>(config.queue_capacity.max(1));
        let (result_sender, result_receiver) = bounded::<TaskReport>(config.workers * 16);
        let shutdown = Arc::new(AtomicBool::new(false));
        let registry = Arc::new(CancellationRegistry::new());

        let mut workers = Vec::with_capacity(config.workers);

        for worker_id in 0..config.workers {
            let worker = Worker {
                id: worker_id,
                pipeline: pipeline.clone(),
                batches: BatchCoordinator::new(pipeline.clone()),
                registry: Arc::clone(&registry),
                soft_time_limit: config.soft_time_limit,
                hard_time_limit: config.hard_time_limit,
            };
            let task_rx = task_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);

            let handle = thread::Builder::new()
                .name(format!("docingest-worker-{}", worker_id))
                .spawn(move || worker.run(task_rx, result_tx, shutdown_flag))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", config.workers);

        Ok(Self {
            task_sender,
            result_receiver,
            workers,
            shutdown,
            registry,
        })
    }

    /// Queues a task without waiting. A full queue is reported as
    /// `QueueFull` so the caller can roll back instead of blocking.
    pub fn submit(&self, task: Task) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ShuttingDown);
        }

        self.task_sender.try_send(task).map_err(|e| match e {
            TrySendError::Full(task) => {
                warn!("Task queue full, rejecting job {}", task.job_id);
                WorkerError::QueueFull
            }
            TrySendError::Disconnected(_) => WorkerError::ChannelClosed,
        })
    }

    /// Cancels a running job. Returns false if no worker is running it.
    pub fn cancel(&self, job_id: &str) -> bool {
        self.registry.cancel(job_id)
    }

    /// Cancels every running job.
    pub fn cancel_all(&self) -> usize {
        self.registry.cancel_all()
    }

    pub fn try_recv_result(&self) -> Option<TaskReport> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<TaskReport> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<TaskReport> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Stops accepting tasks. Workers finish their current task and exit.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Joins every worker and returns the reports nobody has received yet.
    pub fn wait(self) -> Vec<TaskReport> {
        // Drop sender to signal workers to exit
        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
        self.result_receiver.try_iter().collect()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl Dispatcher for WorkerPool {
    fn dispatch(&self, task: Task) -> Result<(), WorkerError> {
        self.submit(task)
    }
}

struct Worker {
    id: usize,
    pipeline: Pipeline,
    batches: BatchCoordinator,
    registry: Arc<CancellationRegistry>,
    soft_time_limit: Duration,
    hard_time_limit: Duration,
}

impl Worker {
    fn run(self, tasks: Receiver<Task>, results: Sender<TaskReport>, shutdown: Arc<AtomicBool>) {
        debug!("Worker {} started", self.id);

        let mut runtime = match build_runtime() {
            Ok(rt) => rt,
            Err(e) => {
                error!("Worker {} could not start its runtime: {}", self.id, e);
                return;
            }
        };

        loop {
            if shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            match tasks.recv_timeout(Duration::from_millis(100)) {
                Ok(task) => {
                    debug!("Worker {} processing {:?} job {}", self.id, task.kind, task.job_id);
                    let (report, panicked) = self.run_task(&runtime, task);

                    if panicked {
                        // A runtime unwound through a panic is not reused.
                        match build_runtime() {
                            Ok(rt) => runtime = rt,
                            Err(e) => {
                                error!("Worker {} could not rebuild its runtime: {}", self.id, e);
                                break;
                            }
                        }
                    }

                    match results.try_send(report) {
                        Ok(()) => {}
                        Err(TrySendError::Full(report)) => {
                            debug!(
                                "Worker {} dropped report for job {}: result queue full",
                                self.id, report.task.job_id
                            );
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            error!("Worker {} failed to send result: pool dropped", self.id);
                            break;
                        }
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    continue;
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    debug!("Worker {} task channel disconnected", self.id);
                    break;
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    /// Runs one task under its limits. The flag reports a caught panic.
    fn run_task(&self, runtime: &Runtime, task: Task) -> (TaskReport, bool) {
        let started = Instant::now();
        let token = self.registry.register(&task.job_id);
        let control = RunControl::new(token).with_soft_limit(self.soft_time_limit);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime.block_on(async {
                let job = async {
                    match task.kind {
                        TaskKind::Document => self
                            .pipeline
                            .execute(&task.job_id, &control)
                            .await
                            .map(|o| o.status),
                        TaskKind::Batch => self
                            .batches
                            .run(&task.job_id, &control)
                            .await
                            .map(|o| o.status),
                    }
                };
                match tokio::time::timeout(self.hard_time_limit, job).await {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::HardTimeLimitExceeded),
                }
            })
        }));
        self.registry.unregister(&task.job_id);

        let (result, panicked) = match outcome {
            Ok(result) => (result, false),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Worker {} caught panic in job {}: {}", self.id, task.job_id, message);
                (
                    Err(PipelineError::TaskFailed(format!("worker panicked: {}", message))),
                    true,
                )
            }
        };

        let (status, error) = match result {
            Ok(status) => (Some(status), None),
            Err(e) => {
                warn!("Job {} stopped: {}", task.job_id, e);
                let status = match e {
                    PipelineError::JobNotFound(_) | PipelineError::JobVanished(_) => None,
                    PipelineError::HardTimeLimitExceeded | PipelineError::TaskFailed(_) => {
                        // The job future never reached its own failure path.
                        self.mark_failed(&task.job_id, &e.to_string())
                    }
                    _ => Some(JobStatus::Failed),
                };
                (status, Some(e.to_string()))
            }
        };

        let report = TaskReport {
            task,
            status,
            error,
            elapsed: started.elapsed(),
        };
        (report, panicked)
    }

    fn mark_failed(&self, job_id: &str, message: &str) -> Option<JobStatus> {
        let store = self.pipeline.store();
        let update = StatusUpdate::new(JobStatus::Failed)
            .completed_at(store.now())
            .error(message);
        match store.update_status(job_id, update) {
            Ok(true) => Some(JobStatus::Failed),
            Ok(false) => {
                debug!("Job {} already finished or gone", job_id);
                store.get(job_id).ok().flatten().map(|r| r.status)
            }
            Err(e) => {
                error!("Failed to mark job {} failed: {}", job_id, e);
                None
            }
        }
    }
}

fn build_runtime() -> std::io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
