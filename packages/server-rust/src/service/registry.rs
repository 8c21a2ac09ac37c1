//! Operation registry: factory, scheduler and execution history.
//!
//! The registry owns every scheduled operation. Handles are moved in by
//! [`OperationRegistry::schedule`], so a single operation instance can never
//! be registered twice. Executions and cancellations append immutable
//! [`HistoryRecord`]s that back the query and statistics views.
//!
//! The registry is a cheap cloneable handle. Its lock is only held for
//! bookkeeping: a run detaches the operation into an [`Execution`], which
//! paces its stages on its own task and writes the result back when done.
//! Dropping the caller's future therefore never strands an operation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use roastery_core::{
    Clock, ExecutionEnv, ExecutionOutcome, FullBatch, Operation, OperationStatus,
    ProductionContext, SimpleOperation, SpecialProcess, SpecialVariant, StageError,
};
use tracing::field::Empty;
use tracing::{info, info_span, warn, Instrument, Span};

use super::config::RegistryConfig;
use super::history::{History, HistoryFilter, HistoryRecord, Statistics};
use super::operation::{
    EntryState, OperationConfig, OperationHandle, OperationId, OperationType, RegistryError,
    ScheduledOperation, ScheduledSummary, TypeInfo,
};

#[derive(Default)]
struct RegistryState {
    scheduled: HashMap<OperationId, ScheduledOperation>,
    history: History,
}

struct RegistryInner {
    env: ExecutionEnv,
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

/// Builds, schedules and executes production operations.
#[derive(Clone)]
pub struct OperationRegistry {
    inner: Arc<RegistryInner>,
}

impl OperationRegistry {
    /// Creates an empty registry whose operations read time from `clock`.
    #[must_use]
    pub fn new(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                env: ExecutionEnv::new(clock, config.pacing),
                config,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Clock and pacing handed to every operation this registry builds.
    #[must_use]
    pub fn env(&self) -> &ExecutionEnv {
        &self.inner.env
    }

    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.inner.state.lock().scheduled.len()
    }

    /// Entries currently detached for a run.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .scheduled
            .values()
            .filter(|entry| entry.state == EntryState::Running)
            .count()
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.inner.env.clock.now()
    }

    // -----------------------------------------------------------------------
    // Factory
    // -----------------------------------------------------------------------

    /// Builds a new pending operation of `op_type`.
    ///
    /// `config.variant` is only read for special processes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownVariant`] when a special process names
    /// a variant that does not exist.
    pub fn create(
        &self,
        op_type: OperationType,
        config: &OperationConfig,
    ) -> Result<OperationHandle, RegistryError> {
        let variant = match (op_type, config.variant.as_deref()) {
            (OperationType::SpecialProcess, Some(name)) => name
                .parse::<SpecialVariant>()
                .map_err(|err| RegistryError::UnknownVariant { name: err.value })?,
            _ => SpecialVariant::Premium,
        };
        let handle = self.adopt(op_type, self.instantiate(op_type, variant));
        info!(id = %handle.id, op_type = %op_type, name = %handle.operation.name(), "operation created");
        Ok(handle)
    }

    /// Like [`create`](Self::create), parsing the type name first.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownOperationType`] for an unrecognised
    /// name, otherwise whatever `create` returns.
    pub fn create_by_name(
        &self,
        name: &str,
        config: &OperationConfig,
    ) -> Result<OperationHandle, RegistryError> {
        let op_type = name.parse::<OperationType>()?;
        self.create(op_type, config)
    }

    /// Wraps an already-built operation in a handle with a fresh identifier.
    #[must_use]
    pub fn adopt(&self, op_type: OperationType, operation: Box<dyn Operation>) -> OperationHandle {
        OperationHandle {
            id: OperationId::generate(),
            op_type,
            created_at: self.now(),
            operation,
        }
    }

    fn instantiate(&self, op_type: OperationType, variant: SpecialVariant) -> Box<dyn Operation> {
        let env = &self.inner.env;
        match op_type {
            OperationType::FullBatch => Box::new(FullBatch::build(env)),
            OperationType::SpecialProcess => Box::new(SpecialProcess::build(variant, env)),
            OperationType::Roast => Box::new(SimpleOperation::roasting(env.clone())),
            OperationType::Grind => Box::new(SimpleOperation::grinding(env.clone())),
            OperationType::Package => Box::new(SimpleOperation::packaging(env.clone())),
        }
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Validates `handle` against `context` and takes ownership of it.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ValidationFailed`] with every message when the
    /// context is rejected; nothing is registered in that case.
    pub fn schedule(
        &self,
        handle: OperationHandle,
        context: ProductionContext,
    ) -> Result<OperationId, RegistryError> {
        let validation = handle.operation.validate(&context);
        if !validation.ok {
            let errors = validation.messages();
            warn!(id = %handle.id, errors = ?errors, "schedule rejected");
            return Err(RegistryError::ValidationFailed { errors });
        }

        let id = handle.id.clone();
        info!(id = %id, op_type = %handle.op_type, grams = context.grams, "operation scheduled");
        let entry = ScheduledOperation::new(handle, context, self.now());
        self.inner.state.lock().scheduled.insert(id.clone(), entry);
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Executes the scheduled operation `id` against `context` and waits for
    /// the recorded result.
    ///
    /// The run continues on its own task if this future is dropped.
    ///
    /// # Errors
    ///
    /// * [`RegistryError::NotFound`] if `id` is not scheduled.
    /// * [`RegistryError::AlreadyExecuted`] if it already ran.
    /// * [`RegistryError::AlreadyRunning`] if another run holds it.
    /// * [`RegistryError::ValidationFailed`] if `context` is rejected; the
    ///   entry stays scheduled.
    /// * [`RegistryError::Execution`] if the operation fails while running; a
    ///   `failed` history record is written first.
    pub async fn execute(
        &self,
        id: &OperationId,
        context: &ProductionContext,
    ) -> Result<ExecutionOutcome, RegistryError> {
        self.start_execution(id, Some(context.clone()))?
            .spawn(())
            .await
    }

    /// Executes `id` with the context stored when it was scheduled.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_scheduled(
        &self,
        id: &OperationId,
    ) -> Result<ExecutionOutcome, RegistryError> {
        self.start_execution(id, None)?.spawn(()).await
    }

    /// Revalidates `id` and detaches its operation for a run. `None` uses
    /// the context stored at schedule time.
    ///
    /// # Errors
    ///
    /// The pre-run errors of [`execute`](Self::execute).
    pub fn start_execution(
        &self,
        id: &OperationId,
        context: Option<ProductionContext>,
    ) -> Result<Execution, RegistryError> {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let entry = state
            .scheduled
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound { id: id.clone() })?;
        match entry.state {
            EntryState::Executed => return Err(RegistryError::AlreadyExecuted { id: id.clone() }),
            EntryState::Running => return Err(RegistryError::AlreadyRunning { id: id.clone() }),
            EntryState::Scheduled => {}
        }

        let context = context.unwrap_or_else(|| entry.context.clone());
        let validation = match entry.operation() {
            Some(operation) => operation.validate(&context),
            None => return Err(RegistryError::AlreadyRunning { id: id.clone() }),
        };
        if !validation.ok {
            let errors = validation.messages();
            warn!(id = %id, errors = ?errors, "execution rejected");
            return Err(RegistryError::ValidationFailed { errors });
        }

        let operation = entry
            .detach(now)
            .ok_or_else(|| RegistryError::AlreadyRunning { id: id.clone() })?;
        Ok(Execution {
            registry: self.clone(),
            id: id.clone(),
            op_type: entry.op_type,
            context,
            operation: Some(operation),
            recorded: false,
        })
    }

    /// Writes a finished run back into its entry and appends the record.
    fn finish(
        &self,
        id: &OperationId,
        op_type: OperationType,
        mut operation: Box<dyn Operation>,
        context: ProductionContext,
        result: Result<ExecutionOutcome, StageError>,
    ) -> Result<ExecutionOutcome, RegistryError> {
        let mut record = HistoryRecord {
            id: id.clone(),
            name: operation.name().to_string(),
            operation_type: op_type,
            kind: operation.kind(),
            final_status: OperationStatus::Failed,
            timestamp: self.now(),
            context: Some(context),
            result: None,
            error: None,
            elapsed_minutes: 0,
            real_cost: None,
        };

        let result = match result {
            Ok(outcome) => {
                record.final_status = outcome.status;
                record.elapsed_minutes = outcome.elapsed_minutes;
                record.real_cost = Some(outcome.real_cost);
                record.result = Some(outcome.clone());
                Ok(outcome)
            }
            Err(error) => {
                if !operation.status().is_terminal() {
                    if let Err(transition) =
                        operation.set_status(OperationStatus::Failed, &error.to_string())
                    {
                        warn!(id = %id, error = %transition, "could not mark operation failed");
                    }
                }
                warn!(id = %id, error = %error, "operation failed");
                record.error = Some(error.to_string());
                record.elapsed_minutes = operation.elapsed_minutes();
                Err(RegistryError::Execution(error))
            }
        };

        let mut state = self.inner.state.lock();
        if let Some(entry) = state.scheduled.get_mut(id) {
            entry.attach(operation, EntryState::Executed);
        }
        state.history.append(record);
        result
    }

    /// Puts back an operation whose run never started.
    fn restore(&self, id: &OperationId, operation: Box<dyn Operation>) {
        if let Some(entry) = self.inner.state.lock().scheduled.get_mut(id) {
            entry.attach(operation, EntryState::Scheduled);
        }
    }

    /// Records a run that ended without reporting back.
    fn abandon(&self, id: &OperationId, op_type: OperationType, context: ProductionContext, reason: &str) {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let Some(entry) = state.scheduled.get_mut(id) else {
            return;
        };
        entry.abandon(now);
        let info = entry.info();
        warn!(id = %id, reason, "execution abandoned");
        state.history.append(HistoryRecord {
            id: id.clone(),
            name: info.name,
            operation_type: op_type,
            kind: info.kind,
            final_status: OperationStatus::Failed,
            timestamp: now,
            context: Some(context),
            result: None,
            error: Some(reason.to_string()),
            elapsed_minutes: (now - info.started_at.unwrap_or(now)).num_minutes(),
            real_cost: None,
        });
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Removes `id` from the schedule. Returns `false` when it is unknown.
    ///
    /// A pending operation is marked `cancelled`; a terminal one keeps its
    /// status. A `cancelled` history record without context is written
    /// either way.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CannotCancelRunning`] while the operation is
    /// in progress.
    pub fn cancel(&self, id: &OperationId) -> Result<bool, RegistryError> {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let Some(entry) = state.scheduled.get(id) else {
            return Ok(false);
        };
        if entry.state == EntryState::Running || entry.status() == OperationStatus::InProgress {
            warn!(id = %id, "cancel refused: operation running");
            return Err(RegistryError::CannotCancelRunning { id: id.clone() });
        }
        let Some(mut entry) = state.scheduled.remove(id) else {
            return Ok(false);
        };

        if let Some(operation) = entry.operation_mut() {
            if operation.status() == OperationStatus::Pending {
                operation.set_status(OperationStatus::Cancelled, "cancelled by request")?;
            }
        }
        let info = entry.info();
        state.history.append(HistoryRecord {
            id: id.clone(),
            name: info.name,
            operation_type: entry.op_type,
            kind: info.kind,
            final_status: OperationStatus::Cancelled,
            timestamp: now,
            context: None,
            result: None,
            error: None,
            elapsed_minutes: info.elapsed_minutes,
            real_cost: None,
        });
        info!(id = %id, "operation cancelled");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is not scheduled.
    pub fn status(&self, id: &OperationId) -> Result<ScheduledSummary, RegistryError> {
        self.inner
            .state
            .lock()
            .scheduled
            .get(id)
            .map(ScheduledOperation::summary)
            .ok_or_else(|| RegistryError::NotFound { id: id.clone() })
    }

    /// Every scheduled entry, oldest first.
    #[must_use]
    pub fn list_scheduled(&self) -> Vec<ScheduledSummary> {
        let state = self.inner.state.lock();
        let mut entries: Vec<_> = state.scheduled.values().collect();
        entries.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then_with(|| a.id.cmp(&b.id)));
        entries.into_iter().map(ScheduledOperation::summary).collect()
    }

    /// Matching history records, newest first. Without a limit the
    /// configured default page size applies.
    #[must_use]
    pub fn history(&self, filter: &HistoryFilter) -> Vec<HistoryRecord> {
        let limit = filter.limit.unwrap_or(self.inner.config.default_history_limit);
        self.inner.state.lock().history.query(filter, limit)
    }

    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.inner.state.lock().history.statistics()
    }

    #[must_use]
    pub fn available_types(&self) -> Vec<TypeInfo> {
        OperationType::ALL
            .into_iter()
            .map(|op_type| self.type_info(op_type))
            .collect()
    }

    /// Metadata read from a throwaway instance. Special processes describe
    /// the premium variant and list every variant name.
    #[must_use]
    pub fn type_info(&self, op_type: OperationType) -> TypeInfo {
        let operation = self.instantiate(op_type, SpecialVariant::Premium);
        let info = operation.info();
        let variants = if op_type == OperationType::SpecialProcess {
            SpecialVariant::ALL.iter().map(|v| v.as_str()).collect()
        } else {
            Vec::new()
        };
        TypeInfo {
            op_type,
            name: info.name,
            description: info.description,
            kind: info.kind,
            estimated_minutes: info.estimated_minutes,
            estimated_cost: info.estimated_cost,
            children: operation.child_names(),
            workflow: info.workflow,
            variants,
        }
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("OperationRegistry")
            .field("config", &self.inner.config)
            .field("scheduled", &state.scheduled.len())
            .field("history", &state.history.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// An operation detached from the registry for a single run.
///
/// Dropped before running, the operation goes back to `scheduled`. Dropped
/// mid-run, the entry is closed as `failed` with a history record.
pub struct Execution {
    registry: OperationRegistry,
    id: OperationId,
    op_type: OperationType,
    context: ProductionContext,
    operation: Option<Box<dyn Operation>>,
    recorded: bool,
}

impl Execution {
    #[must_use]
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Runs the operation in the caller's task and records the result.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Execution`] when the operation fails at runtime.
    pub async fn run(mut self) -> Result<ExecutionOutcome, RegistryError> {
        let Some(mut operation) = self.operation.take() else {
            return Err(RegistryError::AlreadyRunning { id: self.id.clone() });
        };

        let span = info_span!(
            "operation",
            id = %self.id,
            op_type = %self.op_type,
            duration_ms = Empty,
            outcome = Empty,
        );
        let clock = Arc::clone(&self.registry.inner.env.clock);
        let target = &mut operation;
        let context = &self.context;
        let result = async {
            let started = clock.now();
            let result = target.execute(context).await;
            let duration_ms = u64::try_from((clock.now() - started).num_milliseconds()).unwrap_or(0);
            let outcome = match &result {
                Ok(outcome) => outcome.status.as_str(),
                Err(_) => "error",
            };
            Span::current().record("duration_ms", duration_ms);
            Span::current().record("outcome", outcome);
            info!(duration_ms, outcome, "operation complete");
            result
        }
        .instrument(span)
        .await;

        self.recorded = true;
        let context = self.context.clone();
        self.registry
            .finish(&self.id, self.op_type, operation, context, result)
    }

    /// Runs on a dedicated task and waits for it. `guard` is held until the
    /// result is recorded, even if the caller stops waiting.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus [`RegistryError::Interrupted`] when the
    /// task panics or is aborted.
    pub async fn spawn<G: Send + 'static>(self, guard: G) -> Result<ExecutionOutcome, RegistryError> {
        let id = self.id.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            self.run().await
        });
        match task.await {
            Ok(result) => result,
            Err(join) => Err(RegistryError::Interrupted {
                id,
                reason: join.to_string(),
            }),
        }
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        match self.operation.take() {
            Some(operation) => self.registry.restore(&self.id, operation),
            None => self.registry.abandon(
                &self.id,
                self.op_type,
                self.context.clone(),
                "execution stopped before completion",
            ),
        }
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.id)
            .field("op_type", &self.op_type)
            .field("started", &self.operation.is_none())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use roastery_core::stages::PackageType;
    use roastery_core::{
        CompositeOperation, ManualClock, OperationHeader, OperationInfo, OperationKind, Stage,
        StageError, SystemClock, Validation,
    };

    use super::*;

    fn registry() -> OperationRegistry {
        OperationRegistry::new(RegistryConfig::default(), Arc::new(ManualClock::default()))
    }

    fn schedule(
        registry: &OperationRegistry,
        op_type: OperationType,
        context: ProductionContext,
    ) -> OperationId {
        let handle = registry.create(op_type, &OperationConfig::default()).unwrap();
        registry.schedule(handle, context).unwrap()
    }

    /// Clock whose sleeps never finish, leaving the operation in progress.
    struct StallingClock;

    #[async_trait]
    impl Clock for StallingClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::<Utc>::UNIX_EPOCH
        }

        async fn sleep(&self, _duration: Duration) {
            std::future::pending::<()>().await;
        }
    }

    /// Stub that passes validation and then fails at runtime.
    struct Faulty {
        header: OperationHeader,
        clock: ManualClock,
    }

    impl Faulty {
        fn new() -> Self {
            Self {
                header: OperationHeader::new("Faulty", "always fails", 5, 1.0),
                clock: ManualClock::default(),
            }
        }
    }

    #[async_trait]
    impl Operation for Faulty {
        fn header(&self) -> &OperationHeader {
            &self.header
        }
        fn header_mut(&mut self) -> &mut OperationHeader {
            &mut self.header
        }
        fn kind(&self) -> OperationKind {
            OperationKind::Simple
        }
        fn clock(&self) -> &dyn Clock {
            &self.clock
        }
        fn validate(&self, _ctx: &ProductionContext) -> Validation {
            Validation::valid()
        }
        fn project(&self, ctx: &ProductionContext) -> ProductionContext {
            ctx.clone()
        }
        async fn execute(
            &mut self,
            _ctx: &ProductionContext,
        ) -> Result<ExecutionOutcome, StageError> {
            self.set_status(OperationStatus::InProgress, "starting")?;
            self.clock.advance(Duration::from_secs(120));
            Err(StageError::EmptyComposite)
        }
        fn info(&self) -> OperationInfo {
            OperationInfo {
                name: self.header.name.clone(),
                description: self.header.description.clone(),
                kind: OperationKind::Simple,
                status: self.status(),
                estimated_minutes: 5,
                estimated_cost: 1.0,
                started_at: self.header.started_at(),
                finished_at: self.header.finished_at(),
                elapsed_minutes: self.elapsed_minutes(),
                notes: self.header.notes().to_string(),
                progress: None,
                children: Vec::new(),
                workflow: None,
            }
        }
    }

    #[test]
    fn create_builds_each_type() {
        let registry = registry();
        let names: Vec<String> = OperationType::ALL
            .into_iter()
            .map(|t| {
                registry
                    .create(t, &OperationConfig::default())
                    .unwrap()
                    .operation
                    .name()
                    .to_string()
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "Full Batch",
                "Special Process - premium",
                "Roasting",
                "Grinding",
                "Packaging"
            ]
        );
    }

    #[test]
    fn unknown_type_and_variant_are_rejected() {
        let registry = registry();
        let err = registry
            .create_by_name("blend", &OperationConfig::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownOperationType { .. }));

        let err = registry
            .create(OperationType::SpecialProcess, &OperationConfig::variant("deluxe"))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownVariant {
                name: "deluxe".to_string()
            }
        );

        let express = registry
            .create_by_name("specialProcess", &OperationConfig::variant("express"))
            .unwrap();
        assert_eq!(express.operation.name(), "Special Process - express");
    }

    #[test]
    fn variant_is_ignored_outside_special_processes() {
        let registry = registry();
        let roast = registry
            .create(OperationType::Roast, &OperationConfig::variant("deluxe"))
            .unwrap();
        assert_eq!(roast.operation.name(), "Roasting");
        let batch = registry
            .create_by_name("fullBatch", &OperationConfig::variant("express"))
            .unwrap();
        assert_eq!(batch.operation.name(), "Full Batch");
    }

    #[test]
    fn failed_schedule_leaves_set_unchanged() {
        let registry = registry();
        schedule(&registry, OperationType::Roast, ProductionContext::new(500, "Arabico"));

        let handle = registry
            .create(OperationType::Roast, &OperationConfig::default())
            .unwrap();
        let err = registry
            .schedule(handle, ProductionContext::new(0, ""))
            .unwrap_err();
        let RegistryError::ValidationFailed { errors } = err else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(registry.scheduled_count(), 1);
    }

    #[tokio::test]
    async fn package_600_grams_uses_two_medium_bags() {
        let registry = registry();
        let context = ProductionContext::new(600, "Arabico").with_previous_stage(Stage::Ground);
        let id = schedule(&registry, OperationType::Package, context);

        let outcome = registry.execute_scheduled(&id).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output.package_type, Some(PackageType::MediumBag));
        assert_eq!(outcome.output.package_count, Some(2));
        assert_eq!(registry.status(&id).unwrap().state, EntryState::Executed);
    }

    #[tokio::test]
    async fn full_batch_kilo_completes_and_is_recorded() {
        let registry = registry();
        let id = schedule(
            &registry,
            OperationType::FullBatch,
            ProductionContext::new(1000, "Arabico"),
        );
        assert_eq!(registry.status(&id).unwrap().estimated_minutes, 75);

        let outcome = registry.execute_scheduled(&id).await.unwrap();
        assert_eq!(outcome.status, OperationStatus::Completed);
        assert!(outcome.errors().is_empty());

        let history = registry.history(&HistoryFilter::default());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].final_status, OperationStatus::Completed);
        assert_eq!(history[0].operation_type, OperationType::FullBatch);
        assert!(history[0].result.is_some());

        let again = registry.execute_scheduled(&id).await.unwrap_err();
        assert_eq!(again, RegistryError::AlreadyExecuted { id: id.clone() });
        assert_eq!(registry.history(&HistoryFilter::default()).len(), 1);
    }

    #[tokio::test]
    async fn execute_revalidates_and_keeps_entry() {
        let registry = registry();
        let id = schedule(&registry, OperationType::Roast, ProductionContext::new(500, "Arabico"));

        let err = registry
            .execute(&id, &ProductionContext::new(500, "Robusta"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::ValidationFailed { .. }));
        assert_eq!(registry.status(&id).unwrap().state, EntryState::Scheduled);
        assert!(registry.history(&HistoryFilter::default()).is_empty());

        let missing = registry
            .execute_scheduled(&OperationId::from("op_missing"))
            .await
            .unwrap_err();
        assert!(matches!(missing, RegistryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn runtime_failure_writes_failed_record() {
        let registry = registry();
        let handle = registry.adopt(OperationType::Roast, Box::new(Faulty::new()));
        let id = registry
            .schedule(handle, ProductionContext::new(500, "Arabico"))
            .unwrap();

        let err = registry.execute_scheduled(&id).await.unwrap_err();
        assert_eq!(err, RegistryError::Execution(StageError::EmptyComposite));
        assert_eq!(registry.status(&id).unwrap().status, OperationStatus::Failed);

        let history = registry.history(&HistoryFilter::default());
        assert_eq!(history[0].final_status, OperationStatus::Failed);
        assert_eq!(history[0].elapsed_minutes, 2);
        assert!(history[0].error.is_some());
        assert!(history[0].result.is_none());
    }

    #[tokio::test]
    async fn cancel_semantics() {
        let registry = registry();
        assert!(!registry.cancel(&OperationId::from("op_missing")).unwrap());

        let pending = schedule(&registry, OperationType::Grind, ProductionContext::new(500, "Arabico"));
        assert!(registry.cancel(&pending).unwrap());
        assert!(registry.status(&pending).is_err());

        let done = schedule(&registry, OperationType::Roast, ProductionContext::new(500, "Arabico"));
        registry.execute_scheduled(&done).await.unwrap();
        assert!(registry.cancel(&done).unwrap());

        let cancelled = registry.history(&HistoryFilter {
            status: Some(OperationStatus::Cancelled),
            ..HistoryFilter::default()
        });
        assert_eq!(cancelled.len(), 2);
        assert!(cancelled.iter().all(|record| record.context.is_none()));
        assert_eq!(registry.scheduled_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn running_operation_cannot_be_cancelled() {
        let registry = OperationRegistry::new(RegistryConfig::default(), Arc::new(StallingClock));
        let id = schedule(&registry, OperationType::Roast, ProductionContext::new(500, "Arabico"));

        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), registry.execute_scheduled(&id)).await;
        assert!(timed_out.is_err());
        assert_eq!(registry.status(&id).unwrap().status, OperationStatus::InProgress);

        let err = registry.cancel(&id).unwrap_err();
        assert_eq!(err, RegistryError::CannotCancelRunning { id: id.clone() });
        assert_eq!(registry.scheduled_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_finishes_after_caller_stops_waiting() {
        let registry = OperationRegistry::new(RegistryConfig::default(), Arc::new(SystemClock));
        let id = schedule(&registry, OperationType::Roast, ProductionContext::new(500, "Arabico"));

        let waited =
            tokio::time::timeout(Duration::from_millis(20), registry.execute_scheduled(&id)).await;
        assert!(waited.is_err());

        let running = registry.status(&id).unwrap();
        assert_eq!(running.state, EntryState::Running);
        assert_eq!(running.status, OperationStatus::InProgress);
        assert_eq!(registry.running_count(), 1);
        assert_eq!(
            registry.execute_scheduled(&id).await.unwrap_err(),
            RegistryError::AlreadyRunning { id: id.clone() }
        );
        assert_eq!(
            registry.cancel(&id).unwrap_err(),
            RegistryError::CannotCancelRunning { id: id.clone() }
        );

        while registry.running_count() > 0 {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        let done = registry.status(&id).unwrap();
        assert_eq!(done.state, EntryState::Executed);
        assert_eq!(done.status, OperationStatus::Completed);

        let history = registry.history(&HistoryFilter::default());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].final_status, OperationStatus::Completed);
        assert!(registry.cancel(&id).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_run_is_closed_as_failed() {
        let registry = OperationRegistry::new(RegistryConfig::default(), Arc::new(StallingClock));
        let id = schedule(&registry, OperationType::Roast, ProductionContext::new(500, "Arabico"));

        let execution = registry.start_execution(&id, None).unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(20), execution.run())
            .await
            .is_err());

        let summary = registry.status(&id).unwrap();
        assert_eq!(summary.state, EntryState::Executed);
        assert_eq!(summary.status, OperationStatus::Failed);
        let history = registry.history(&HistoryFilter::default());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].final_status, OperationStatus::Failed);
        assert!(history[0].error.is_some());
        assert!(registry.cancel(&id).unwrap());
    }

    #[tokio::test]
    async fn unstarted_execution_returns_operation_to_schedule() {
        let registry = registry();
        let id = schedule(&registry, OperationType::Grind, ProductionContext::new(500, "Arabico"));

        let execution = registry.start_execution(&id, None).unwrap();
        assert_eq!(execution.id(), &id);
        assert_eq!(registry.status(&id).unwrap().state, EntryState::Running);
        drop(execution);

        let summary = registry.status(&id).unwrap();
        assert_eq!(summary.state, EntryState::Scheduled);
        assert_eq!(summary.status, OperationStatus::Pending);
        assert!(registry.history(&HistoryFilter::default()).is_empty());
        registry.execute_scheduled(&id).await.unwrap();
    }

    #[tokio::test]
    async fn statistics_aggregate_history() {
        let registry = registry();
        for grams in [500, 800] {
            let id = schedule(&registry, OperationType::Roast, ProductionContext::new(grams, "Arabico"));
            registry.execute_scheduled(&id).await.unwrap();
        }
        // Roasting succeeds, then the stub fails and the pipeline stops.
        let env = registry.env().clone();
        let mut pipeline = CompositeOperation::new("Pipeline", "roast then fail", env.clone());
        pipeline.add_child(Box::new(SimpleOperation::roasting(env)));
        pipeline.add_child(Box::new(Faulty::new()));
        let handle = registry.adopt(OperationType::SpecialProcess, Box::new(pipeline));
        let id = registry
            .schedule(handle, ProductionContext::new(500, "Arabico"))
            .unwrap();
        let outcome = registry.execute_scheduled(&id).await.unwrap();
        assert_eq!(outcome.status, OperationStatus::CompletedPartial);

        let grind = schedule(&registry, OperationType::Grind, ProductionContext::new(500, "Arabico"));
        registry.cancel(&grind).unwrap();

        let stats = registry.statistics();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successful, 3);
        assert_eq!(stats.partial, 1);
        assert_eq!(stats.cancelled, 1);
        assert!((stats.success_rate - 75.0).abs() < f64::EPSILON);
        assert_eq!(stats.by_type[&OperationType::Roast].total, 2);
        assert_eq!(stats.by_type[&OperationType::SpecialProcess].partial, 1);
    }

    #[tokio::test]
    async fn history_filters_by_type() {
        let registry = registry();
        let roast = schedule(&registry, OperationType::Roast, ProductionContext::new(500, "Arabico"));
        registry.execute_scheduled(&roast).await.unwrap();
        let grind = schedule(&registry, OperationType::Grind, ProductionContext::new(500, "Arabico"));
        registry.execute_scheduled(&grind).await.unwrap();

        let grinds = registry.history(&HistoryFilter {
            operation_type: Some(OperationType::Grind),
            ..HistoryFilter::default()
        });
        assert_eq!(grinds.len(), 1);
        assert_eq!(grinds[0].id, grind);
        assert_eq!(registry.history(&HistoryFilter::default())[0].id, grind);
    }

    #[test]
    fn type_info_describes_catalogue() {
        let registry = registry();
        let types = registry.available_types();
        assert_eq!(types.len(), 5);

        let special = registry.type_info(OperationType::SpecialProcess);
        assert_eq!(special.kind, OperationKind::Composite);
        assert_eq!(special.variants, vec!["premium", "express", "artesanal", "experimental"]);
        assert_eq!(special.children.len(), 3);

        let roast = registry.type_info(OperationType::Roast);
        assert_eq!(roast.estimated_minutes, 30);
        assert!(roast.children.is_empty());
        assert!(roast.workflow.is_none());
    }

    #[test]
    fn list_scheduled_is_ordered() {
        let registry = registry();
        let first = schedule(&registry, OperationType::Roast, ProductionContext::new(500, "Arabico"));
        let second = schedule(&registry, OperationType::Grind, ProductionContext::new(500, "Arabico"));
        let listed = registry.list_scheduled();
        assert_eq!(listed.len(), 2);
        let ids: Vec<_> = listed.iter().map(|s| s.id.clone()).collect();
        assert!(ids.contains(&first) && ids.contains(&second));
    }
}
