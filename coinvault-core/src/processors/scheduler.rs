//! Fixed-period task loops.
//!
//! Every (task kind, asset) pair gets its own [`TaskRunner`]. A run is
//! spawned on each tick unless the previous one still holds the runner's
//! [`TaskGuard`]; such ticks are skipped. Errors and panics end the run,
//! release the guard and are logged; the next tick simply tries again.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::broadcaster::{BroadcastError, CollectionFlow, FlowReport, WithdrawalFlow};
use super::confirmation::{ConfirmationEngine, ConfirmationError};
use super::deposit_scanner::{DepositScanner, ScanError, ScanStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    DepositScan,
    Confirmation,
    Collection,
    Withdrawal,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::DepositScan => "deposit_scan",
            TaskKind::Confirmation => "confirmation",
            TaskKind::Collection => "collection",
            TaskKind::Withdrawal => "withdrawal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn kind(&self) -> TaskKind;

    /// Asset symbol, for logs.
    fn asset(&self) -> &str;

    async fn run_once(&self) -> Result<(), TaskError>;
}

/// Single-flight flag shared by every trigger of one task.
#[derive(Debug, Clone, Default)]
pub struct TaskGuard {
    running: Arc<AtomicBool>,
}

impl TaskGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the flag, or `None` if a run is already in flight.
    pub fn try_acquire(&self) -> Option<GuardToken> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GuardToken {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Holds a [`TaskGuard`]; dropping it releases the guard.
#[derive(Debug)]
pub struct GuardToken {
    running: Arc<AtomicBool>,
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

pub struct TaskRunner {
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    guard: TaskGuard,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskRunner {
    pub fn new(task: Arc<dyn PeriodicTask>, period: Duration, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            task,
            period,
            guard: TaskGuard::new(),
            shutdown_rx,
        }
    }

    pub fn guard(&self) -> &TaskGuard {
        &self.guard
    }

    /// Start one run in the background, unless one is in flight.
    ///
    /// The returned handle completes after the run finished and the guard
    /// was released; it never yields the run's panic.
    pub fn trigger(&self) -> Option<JoinHandle<()>> {
        let kind = self.task.kind();
        let Some(token) = self.guard.try_acquire() else {
            warn!(task = %kind, asset = %self.task.asset(), "Previous run still in flight, skipping tick");
            return None;
        };

        let task = self.task.clone();
        Some(tokio::spawn(async move {
            let run = tokio::spawn({
                let task = task.clone();
                async move { task.run_once().await }
            });
            match run.await {
                Ok(Ok(())) => debug!(task = %kind, asset = %task.asset(), "Run finished"),
                Ok(Err(e)) => error!(task = %kind, asset = %task.asset(), error = %e, "Run failed"),
                Err(e) if e.is_panic() => {
                    error!(task = %kind, asset = %task.asset(), "Run panicked")
                }
                Err(e) => warn!(task = %kind, asset = %task.asset(), error = %e, "Run cancelled"),
            }
            drop(token);
        }))
    }

    /// Tick until shutdown, then wait for the run in flight.
    pub async fn run(mut self) {
        let kind = self.task.kind();
        info!(task = %kind, asset = %self.task.asset(), period = ?self.period, "TaskRunner started");

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!(task = %kind, asset = %self.task.asset(), "TaskRunner received shutdown signal");
                        break;
                    }
                }

                _ = interval.tick() => {
                    if let Some(handle) = self.trigger() {
                        in_flight = Some(handle);
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            let _ = handle.await;
        }
        info!(task = %kind, asset = %self.task.asset(), "TaskRunner shutdown complete");
    }
}

#[async_trait]
impl<S: ScanStrategy + 'static> PeriodicTask for DepositScanner<S> {
    fn kind(&self) -> TaskKind {
        TaskKind::DepositScan
    }

    fn asset(&self) -> &str {
        self.symbol()
    }

    async fn run_once(&self) -> Result<(), TaskError> {
        self.scan().await?;
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for ConfirmationEngine {
    fn kind(&self) -> TaskKind {
        TaskKind::Confirmation
    }

    fn asset(&self) -> &str {
        self.symbol()
    }

    async fn run_once(&self) -> Result<(), TaskError> {
        let report = self.run().await?;
        if report.confirmed > 0 || report.failed > 0 {
            info!(
                asset = %self.symbol(),
                confirmed = report.confirmed,
                waiting = report.waiting,
                failed = report.failed,
                "Confirmation pass"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for WithdrawalFlow {
    fn kind(&self) -> TaskKind {
        TaskKind::Withdrawal
    }

    fn asset(&self) -> &str {
        self.symbol()
    }

    async fn run_once(&self) -> Result<(), TaskError> {
        let report = self.run().await?;
        if report != FlowReport::default() {
            info!(
                asset = %self.symbol(),
                sent = report.sent,
                deferred = report.deferred,
                failed = report.failed,
                "Withdrawal pass"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicTask for CollectionFlow {
    fn kind(&self) -> TaskKind {
        TaskKind::Collection
    }

    fn asset(&self) -> &str {
        self.symbol()
    }

    async fn run_once(&self) -> Result<(), TaskError> {
        let report = self.run().await?;
        if report != FlowReport::default() {
            info!(
                asset = %self.symbol(),
                sent = report.sent,
                deferred = report.deferred,
                failed = report.failed,
                "Collection pass"
            );
        }
        Ok(())
    }
}
