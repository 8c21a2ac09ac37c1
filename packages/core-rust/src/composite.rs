//! Composite operations: ordered trees of child operations.
//!
//! A [`CompositeOperation`] runs its children sequentially, threading each
//! child's output context into the next child. How it reacts to a failing
//! child, and which batch-level rules and surcharges apply, is decided by a
//! pluggable [`WorkflowPolicy`].

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::{Clock, ExecutionEnv};
use crate::context::ProductionContext;
use crate::error::{StageError, Validation, Violation};
use crate::operation::{
    ChildFailure, CompositeSummary, ExecutionOutcome, Operation, OperationHeader, OperationInfo,
    OperationKind, OperationStatus, OutcomeDetail, Progress,
};

// ---------------------------------------------------------------------------
// Workflow policy
// ---------------------------------------------------------------------------

/// Fixed time/cost added on top of the children's sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Surcharge {
    pub minutes: i64,
    pub cost: f64,
}

/// Reporting block describing a workflow variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDetails {
    pub workflow: String,
    pub summary: String,
    pub stages: Vec<String>,
    pub surcharge: Surcharge,
    pub min_grams: u32,
    pub max_grams: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub characteristics: Vec<String>,
}

/// Batch-level rules for a composite.
pub trait WorkflowPolicy: Send + Sync {
    /// Whether a failing child aborts the remaining children.
    fn should_stop(&self, _child: &dyn Operation, _error: &StageError) -> bool {
        true
    }

    /// Batch-level checks run before any child validation.
    fn check(&self, _ctx: &ProductionContext) -> Vec<Violation> {
        Vec::new()
    }

    /// Applied to the threaded context after each successful child.
    fn after_step(&self, ctx: ProductionContext) -> ProductionContext {
        ctx
    }

    fn surcharge(&self) -> Surcharge {
        Surcharge::default()
    }

    fn details(&self) -> Option<WorkflowDetails> {
        None
    }
}

/// Plain sequential workflow: stop on the first error, no surcharge.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl WorkflowPolicy for Sequential {}

// ---------------------------------------------------------------------------
// CompositeOperation
// ---------------------------------------------------------------------------

pub struct CompositeOperation {
    header: OperationHeader,
    children: Vec<Box<dyn Operation>>,
    workflow: Box<dyn WorkflowPolicy>,
    env: ExecutionEnv,
}

impl CompositeOperation {
    /// Empty composite with the [`Sequential`] workflow.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, env: ExecutionEnv) -> Self {
        Self::with_workflow(name, description, Sequential, env)
    }

    #[must_use]
    pub fn with_workflow(
        name: impl Into<String>,
        description: impl Into<String>,
        workflow: impl WorkflowPolicy + 'static,
        env: ExecutionEnv,
    ) -> Self {
        Self {
            header: OperationHeader::new(name, description, 0, 0.0),
            children: Vec::new(),
            workflow: Box::new(workflow),
            env,
        }
    }

    /// Appends a child and recomputes the aggregate estimates.
    pub fn add_child(&mut self, child: Box<dyn Operation>) {
        self.children.push(child);
        self.recompute_estimates();
    }

    /// Removes the child at `index`, returning it.
    pub fn remove_child(&mut self, index: usize) -> Option<Box<dyn Operation>> {
        if index >= self.children.len() {
            return None;
        }
        let removed = self.children.remove(index);
        self.recompute_estimates();
        Some(removed)
    }

    #[must_use]
    pub fn children(&self) -> &[Box<dyn Operation>] {
        &self.children
    }

    #[must_use]
    pub fn workflow(&self) -> &dyn WorkflowPolicy {
        self.workflow.as_ref()
    }

    fn recompute_estimates(&mut self) {
        self.header.estimated_minutes = self.children.iter().map(|c| c.estimated_minutes()).sum();
        self.header.estimated_cost = self.children.iter().map(|c| c.estimated_cost()).sum();
    }

    fn final_status(succeeded: usize, failed: usize) -> OperationStatus {
        match (succeeded, failed) {
            (_, 0) => OperationStatus::Completed,
            (0, _) => OperationStatus::Failed,
            _ => OperationStatus::CompletedPartial,
        }
    }
}

#[async_trait]
impl Operation for CompositeOperation {
    fn header(&self) -> &OperationHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut OperationHeader {
        &mut self.header
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Composite
    }

    fn clock(&self) -> &dyn Clock {
        self.env.clock.as_ref()
    }

    fn estimated_minutes(&self) -> i64 {
        self.header.estimated_minutes + self.workflow.surcharge().minutes
    }

    fn estimated_cost(&self) -> f64 {
        self.header.estimated_cost + self.workflow.surcharge().cost
    }

    /// Sum of each child's real cost for the input context, falling back to
    /// its estimate.
    fn real_cost(&self, ctx: &ProductionContext) -> Option<f64> {
        Some(
            self.children
                .iter()
                .map(|child| child.real_cost(ctx).unwrap_or_else(|| child.estimated_cost()))
                .sum(),
        )
    }

    fn validate(&self, ctx: &ProductionContext) -> Validation {
        let mut violations = Vec::new();
        if self.children.is_empty() {
            violations.push(Violation::NoChildren);
        }
        match self.header.status() {
            OperationStatus::InProgress => violations.push(Violation::AlreadyInProgress),
            OperationStatus::Completed => violations.push(Violation::AlreadyCompleted),
            _ => {}
        }
        violations.extend(self.workflow.check(ctx));

        let mut current = ctx.clone();
        for (i, child) in self.children.iter().enumerate() {
            let validation = child.validate(&current);
            if validation.ok {
                current = self.workflow.after_step(child.project(&current));
            } else {
                violations.push(Violation::Child {
                    index: i + 1,
                    name: child.name().to_string(),
                    violations: validation.errors,
                });
            }
        }
        Validation::from_violations(violations)
    }

    fn project(&self, ctx: &ProductionContext) -> ProductionContext {
        self.children.iter().fold(ctx.clone(), |current, child| {
            if child.validate(&current).ok {
                self.workflow.after_step(child.project(&current))
            } else {
                current
            }
        })
    }

    async fn execute(&mut self, ctx: &ProductionContext) -> Result<ExecutionOutcome, StageError> {
        let status = self.header.status();
        if status != OperationStatus::Pending {
            return Err(StageError::NotPending { status });
        }
        if self.children.is_empty() {
            return Err(StageError::EmptyComposite);
        }

        let total = self.children.len();
        self.set_status(
            OperationStatus::InProgress,
            &format!("running {total} child operations"),
        )?;

        let mut current = ctx.clone();
        let mut results = Vec::with_capacity(total);
        let mut errors = Vec::new();

        for index in 0..total {
            let child = &mut self.children[index];
            let validation = child.validate(&current);
            let attempt = if validation.ok {
                child.execute(&current).await
            } else {
                Err(StageError::Invalid(validation.errors))
            };

            match attempt {
                Ok(outcome) => {
                    debug!(composite = %self.header.name, child = %outcome.operation, "child completed");
                    current = self.workflow.after_step(outcome.output.clone());
                    results.push(outcome);
                }
                Err(error) => {
                    warn!(
                        composite = %self.header.name,
                        child = %child.name(),
                        index,
                        error = %error,
                        "child operation failed"
                    );
                    let stop = self.workflow.should_stop(child.as_ref(), &error);
                    errors.push(ChildFailure {
                        operation: child.name().to_string(),
                        error: error.to_string(),
                        index,
                    });
                    if stop {
                        break;
                    }
                }
            }
        }

        let succeeded = results.len();
        let failed = errors.len();
        let final_status = Self::final_status(succeeded, failed);
        self.set_status(
            final_status,
            &format!("{succeeded} of {total} child operations succeeded"),
        )?;

        Ok(ExecutionOutcome {
            success: failed == 0,
            operation: self.header.name.clone(),
            status: final_status,
            elapsed_minutes: self.elapsed_minutes(),
            real_cost: self.real_cost(ctx).unwrap_or_else(|| self.estimated_cost()),
            output: current,
            detail: OutcomeDetail::Composite(CompositeSummary {
                total,
                succeeded,
                failed,
                results,
                errors,
            }),
        })
    }

    fn info(&self) -> OperationInfo {
        OperationInfo {
            name: self.header.name.clone(),
            description: self.header.description.clone(),
            kind: OperationKind::Composite,
            status: self.header.status(),
            estimated_minutes: self.estimated_minutes(),
            estimated_cost: self.estimated_cost(),
            started_at: self.header.started_at(),
            finished_at: self.header.finished_at(),
            elapsed_minutes: self.elapsed_minutes(),
            notes: self.header.notes().to_string(),
            progress: self.progress(),
            children: self.children.iter().map(|c| c.info()).collect(),
            workflow: self.workflow.details(),
        }
    }

    fn progress(&self) -> Option<Progress> {
        Some(Progress::tally(self.children.iter().map(|c| c.status())))
    }

    fn child_names(&self) -> Vec<String> {
        self.children.iter().map(|c| c.name().to_string()).collect()
    }
}
