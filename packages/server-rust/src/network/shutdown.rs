//! Graceful shutdown keyed to running executions.
//!
//! An execution runs on its own task and can outlive the request that
//! started it, so draining waits on the set of operation ids still running
//! rather than on open connections. Health state sits in an `ArcSwap` so health
//! reads never take a lock.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::service::OperationId;

/// Server health state.
///
/// Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Starting => "starting",
            HealthState::Ready => "ready",
            HealthState::Draining => "draining",
            HealthState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ActiveExecutions = Arc<watch::Sender<BTreeSet<OperationId>>>;

/// Readiness, the shutdown signal and the set of running executions.
#[derive(Debug)]
pub struct ShutdownController {
    health: ArcSwap<HealthState>,
    signal: watch::Sender<bool>,
    executions: ActiveExecutions,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            health: ArcSwap::from_pointee(HealthState::Starting),
            signal: watch::Sender::new(false),
            executions: Arc::new(watch::Sender::new(BTreeSet::new())),
        }
    }

    pub fn set_ready(&self) {
        self.health.store(Arc::new(HealthState::Ready));
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health.load()
    }

    /// New executions and mutations are only accepted while `Ready`.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.health_state() == HealthState::Ready
    }

    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Stops accepting work and wakes every shutdown receiver.
    pub fn trigger_shutdown(&self) {
        self.health.store(Arc::new(HealthState::Draining));
        self.signal.send_replace(true);
        info!(running = self.executing_count(), "shutdown triggered");
    }

    /// Marks `id` as running until the returned guard is dropped.
    #[must_use]
    pub fn track_execution(&self, id: OperationId) -> ExecutionGuard {
        self.executions.send_modify(|active| {
            active.insert(id.clone());
        });
        ExecutionGuard {
            id,
            executions: Arc::clone(&self.executions),
        }
    }

    #[must_use]
    pub fn executing_count(&self) -> usize {
        self.executions.borrow().len()
    }

    /// Ids of running executions in ascending order.
    #[must_use]
    pub fn active_executions(&self) -> Vec<OperationId> {
        self.executions.borrow().iter().cloned().collect()
    }

    /// Waits for every tracked execution to finish.
    ///
    /// Returns `true` and moves to `Stopped` once none remain; returns
    /// `false` and stays `Draining` if `timeout` expires first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let mut active = self.executions.subscribe();
        let drained = matches!(
            tokio::time::timeout(timeout, active.wait_for(BTreeSet::is_empty)).await,
            Ok(Ok(_))
        );
        if drained {
            self.health.store(Arc::new(HealthState::Stopped));
        } else {
            warn!(remaining = ?self.active_executions(), "drain timed out");
        }
        drained
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes its execution from the running set on drop, including when the
/// task running it panics.
#[derive(Debug)]
pub struct ExecutionGuard {
    id: OperationId,
    executions: ActiveExecutions,
}

impl ExecutionGuard {
    #[must_use]
    pub fn id(&self) -> &OperationId {
        &self.id
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.executions.send_modify(|active| {
            active.remove(&self.id);
        });
    }
}
