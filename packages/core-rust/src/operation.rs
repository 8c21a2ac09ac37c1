//! The `Operation` contract shared by leaf and composite nodes.
//!
//! An operation owns an [`OperationHeader`] (name, estimates, lifecycle
//! status and timestamps) and exposes validation, a deterministic dry-run
//! (`project`) and asynchronous execution against a [`ProductionContext`].

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::composite::WorkflowDetails;
use crate::context::{ProductionContext, UnknownName};
use crate::error::{StageError, Validation};
use crate::stages::StageReport;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    CompletedPartial,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub const ALL: [OperationStatus; 6] = [
        OperationStatus::Pending,
        OperationStatus::InProgress,
        OperationStatus::Completed,
        OperationStatus::CompletedPartial,
        OperationStatus::Failed,
        OperationStatus::Cancelled,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::CompletedPartial => "completed_partial",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }

    /// No transition out of a terminal status is accepted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed
                | OperationStatus::CompletedPartial
                | OperationStatus::Failed
                | OperationStatus::Cancelled
        )
    }

    /// Terminal statuses that stamp `finished_at`.
    fn stamps_finish(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::CompletedPartial | OperationStatus::Failed
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownName {
                kind: "operation status",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Simple,
    Composite,
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Fields common to every operation node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationHeader {
    pub name: String,
    pub description: String,
    pub estimated_minutes: i64,
    pub estimated_cost: f64,
    status: OperationStatus,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    notes: String,
}

impl OperationHeader {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        estimated_minutes: i64,
        estimated_cost: f64,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            estimated_minutes,
            estimated_cost,
            status: OperationStatus::Pending,
            started_at: None,
            finished_at: None,
            notes: String::new(),
        }
    }

    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    #[must_use]
    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Moves to `to`, stamping `started_at` on the first entry into
    /// `in_progress` and `finished_at` on the first completion or failure.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::IllegalTransition`] when the current status is terminal.
    pub fn transition(
        &mut self,
        to: OperationStatus,
        note: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StageError> {
        if self.status.is_terminal() {
            return Err(StageError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.notes = note.into();
        if to == OperationStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.stamps_finish() && self.finished_at.is_none() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Whole minutes between start and finish (or `now` while running).
    /// Zero when the operation never started.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        let Some(started) = self.started_at else {
            return 0;
        };
        let end = self.finished_at.unwrap_or(now);
        let millis = (end - started).num_milliseconds();
        (millis as f64 / 60_000.0).round() as i64
    }
}

// ---------------------------------------------------------------------------
// Outcomes and snapshots
// ---------------------------------------------------------------------------

/// A child that failed inside a composite run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildFailure {
    pub operation: String,
    pub error: String,
    /// Zero-based position of the child.
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ExecutionOutcome>,
    pub errors: Vec<ChildFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeDetail {
    Simple { report: StageReport },
    Composite(CompositeSummary),
}

/// Structured result of a finished `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    pub operation: String,
    pub status: OperationStatus,
    pub elapsed_minutes: i64,
    pub real_cost: f64,
    /// Context after this operation, fed to the next sibling.
    pub output: ProductionContext,
    #[serde(flatten)]
    pub detail: OutcomeDetail,
}

impl ExecutionOutcome {
    /// Per-child failures; empty for leaves.
    #[must_use]
    pub fn errors(&self) -> &[ChildFailure] {
        match &self.detail {
            OutcomeDetail::Composite(summary) => &summary.errors,
            OutcomeDetail::Simple { .. } => &[],
        }
    }
}

/// Child counts by status for a composite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub pending: usize,
    pub percent_complete: u32,
}

impl Progress {
    /// Tallies `statuses`. `completed_partial` counts as completed and a
    /// cancelled child as pending, so the buckets always sum to `total`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn tally(statuses: impl IntoIterator<Item = OperationStatus>) -> Self {
        let mut progress = Self::default();
        for status in statuses {
            progress.total += 1;
            match status {
                OperationStatus::Completed | OperationStatus::CompletedPartial => {
                    progress.completed += 1;
                }
                OperationStatus::InProgress => progress.in_progress += 1,
                OperationStatus::Failed => progress.failed += 1,
                OperationStatus::Pending | OperationStatus::Cancelled => progress.pending += 1,
            }
        }
        if progress.total > 0 {
            progress.percent_complete =
                (progress.completed as f64 / progress.total as f64 * 100.0).round() as u32;
        }
        progress
    }
}

/// Full state snapshot of an operation tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationInfo {
    pub name: String,
    pub description: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub estimated_minutes: i64,
    pub estimated_cost: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_minutes: i64,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OperationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowDetails>,
}

// ---------------------------------------------------------------------------
// Operation trait
// ---------------------------------------------------------------------------

/// A unit of production work, atomic or composed of ordered sub-operations.
///
/// Implementations must refuse `execute` unless their status is `pending`.
/// Callers re-run `validate` immediately before `execute`.
#[async_trait]
pub trait Operation: Send + Sync {
    fn header(&self) -> &OperationHeader;

    fn header_mut(&mut self) -> &mut OperationHeader;

    fn kind(&self) -> OperationKind;

    /// Clock used for timestamps and simulated latency.
    fn clock(&self) -> &dyn Clock;

    fn name(&self) -> &str {
        &self.header().name
    }

    fn description(&self) -> &str {
        &self.header().description
    }

    fn status(&self) -> OperationStatus {
        self.header().status()
    }

    fn estimated_minutes(&self) -> i64 {
        self.header().estimated_minutes
    }

    fn estimated_cost(&self) -> f64 {
        self.header().estimated_cost
    }

    /// Cost scaled to the batch in `ctx`, when the operation can compute it.
    fn real_cost(&self, _ctx: &ProductionContext) -> Option<f64> {
        None
    }

    fn validate(&self, ctx: &ProductionContext) -> Validation;

    /// Output context this operation would produce for `ctx`, without
    /// side effects. Invalid inputs project to themselves.
    fn project(&self, ctx: &ProductionContext) -> ProductionContext;

    async fn execute(&mut self, ctx: &ProductionContext) -> Result<ExecutionOutcome, StageError>;

    fn info(&self) -> OperationInfo;

    fn progress(&self) -> Option<Progress> {
        None
    }

    /// Names of direct children; empty for leaves.
    fn child_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Transitions the lifecycle status using this operation's clock.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::IllegalTransition`] out of a terminal status.
    fn set_status(&mut self, status: OperationStatus, note: &str) -> Result<(), StageError> {
        let now = self.clock().now();
        self.header_mut().transition(status, note, now)
    }

    fn elapsed_minutes(&self) -> i64 {
        self.header().elapsed_minutes(self.clock().now())
    }
}
