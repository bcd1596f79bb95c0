//! Polling task dispatcher
//!
//! Each cycle fetches a bounded batch of pending tasks, runs them one at a
//! time through the handler registered for their type and acknowledges each
//! task only after its handler returned `Ok`. A crash between the two steps
//! redelivers the task next cycle, so handlers must be safe to re-run.

use super::store::TaskStore;
use super::types::{Task, TaskType};
use crate::config::DispatcherConfig;
use crate::errors::StorageError;
use crate::metrics::Metrics;
use crate::notify::GatewayError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {task_id} is {found}, handler expects {expected}")]
    PayloadMismatch {
        task_id: u64,
        expected: TaskType,
        found: TaskType,
    },

    #[error("Gateway call failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Referee dispatch failed: {0}")]
    Referee(String),

    #[error("Duel update failed: {0}")]
    Duel(String),

    #[error("Settlement failed: {0}")]
    Settlement(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Side effect for one task type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), TaskError>;
}

/// Static task type -> handler table, built at startup
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        if self.handlers.insert(task_type, handler).is_some() {
            warn!(%task_type, "Replaced existing task handler");
        }
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn registered(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub completed: usize,
    pub failed: usize,
    pub unhandled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Ran(CycleReport),
    /// A previous cycle was still in flight
    Skipped,
}

pub struct TaskDispatcher {
    store: Arc<dyn TaskStore>,
    handlers: HandlerRegistry,
    config: DispatcherConfig,
    metrics: Arc<Metrics>,
    cycle_guard: Mutex<()>,
}

impl TaskDispatcher {
    pub fn new(
        store: Arc<dyn TaskStore>,
        handlers: HandlerRegistry,
        config: DispatcherConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            handlers,
            config,
            metrics,
            cycle_guard: Mutex::new(()),
        }
    }

    /// Run one cycle, or skip it if another one is running.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, StorageError> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            debug!("Dispatcher cycle still running, skipping");
            Metrics::incr(&self.metrics.dispatcher_cycles_skipped);
            return Ok(CycleOutcome::Skipped);
        };
        Metrics::incr(&self.metrics.dispatcher_cycles_total);

        let tasks = self.store.fetch_pending(self.config.batch_size).await?;
        let mut report = CycleReport {
            fetched: tasks.len(),
            ..CycleReport::default()
        };

        for task in &tasks {
            let task_type = task.task_type();
            let Some(handler) = self.handlers.get(task_type) else {
                warn!(task_id = task.id, %task_type, "No handler registered, leaving task pending");
                report.unhandled += 1;
                Metrics::incr(&self.metrics.tasks_unhandled_total);
                continue;
            };

            match handler.handle(task).await {
                Ok(()) => match self.store.mark_completed(task.id).await {
                    Ok(()) => {
                        debug!(task_id = task.id, %task_type, "Task completed");
                        report.completed += 1;
                        Metrics::incr(&self.metrics.tasks_completed_total);
                    }
                    Err(e) => {
                        // Handler already ran; the task will be redelivered.
                        error!(task_id = task.id, %task_type, error = %e, "Failed to acknowledge task");
                        report.failed += 1;
                        Metrics::incr(&self.metrics.tasks_failed_total);
                    }
                },
                Err(e) => {
                    warn!(task_id = task.id, %task_type, error = %e, "Task handler failed, will retry next cycle");
                    report.failed += 1;
                    Metrics::incr(&self.metrics.tasks_failed_total);
                }
            }
        }

        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                completed = report.completed,
                failed = report.failed,
                unhandled = report.unhandled,
                "Dispatcher cycle finished"
            );
        }
        Ok(CycleOutcome::Ran(report))
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_secs = self.config.poll_interval_secs,
            handlers = self.handlers.registered().len(),
            "Task dispatcher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Failed to fetch pending tasks");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Task dispatcher stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
