//! Leaf operations: one production stage with status tracking.

use async_trait::async_trait;
use tracing::debug;

use crate::clock::{Clock, ExecutionEnv};
use crate::context::ProductionContext;
use crate::error::{StageError, Validation, Violation};
use crate::operation::{
    ExecutionOutcome, Operation, OperationHeader, OperationInfo, OperationKind, OperationStatus,
    OutcomeDetail,
};
use crate::stages::{Grinding, Packaging, Roasting, StageProcess};

/// An atomic operation backed by a [`StageProcess`].
pub struct SimpleOperation {
    header: OperationHeader,
    process: Box<dyn StageProcess>,
    env: ExecutionEnv,
}

impl SimpleOperation {
    #[must_use]
    pub fn new(process: impl StageProcess + 'static, env: ExecutionEnv) -> Self {
        let header = OperationHeader::new(
            process.name(),
            process.description(),
            process.base_minutes(),
            process.base_cost(),
        );
        Self {
            header,
            process: Box::new(process),
            env,
        }
    }

    #[must_use]
    pub fn roasting(env: ExecutionEnv) -> Self {
        Self::new(Roasting, env)
    }

    #[must_use]
    pub fn grinding(env: ExecutionEnv) -> Self {
        Self::new(Grinding, env)
    }

    #[must_use]
    pub fn packaging(env: ExecutionEnv) -> Self {
        Self::new(Packaging, env)
    }

    #[must_use]
    pub fn process(&self) -> &dyn StageProcess {
        self.process.as_ref()
    }

    /// Shared leaf checks. When any fail, stage checks are skipped.
    fn base_violations(&self, ctx: &ProductionContext) -> Vec<Violation> {
        let mut violations = Vec::new();
        if ctx.grams == 0 {
            violations.push(Violation::MissingQuantity);
        }
        if ctx.grain_type.trim().is_empty() {
            violations.push(Violation::MissingGrainType);
        }
        match self.header.status() {
            OperationStatus::InProgress => violations.push(Violation::AlreadyInProgress),
            OperationStatus::Completed => violations.push(Violation::AlreadyCompleted),
            _ => {}
        }
        violations
    }
}

#[async_trait]
impl Operation for SimpleOperation {
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
        self.env.clock.as_ref()
    }

    /// `estimated_cost × grams / 1000`.
    fn real_cost(&self, ctx: &ProductionContext) -> Option<f64> {
        Some(self.header.estimated_cost * f64::from(ctx.grams) / 1000.0)
    }

    fn validate(&self, ctx: &ProductionContext) -> Validation {
        let base = self.base_violations(ctx);
        if !base.is_empty() {
            return Validation::from_violations(base);
        }
        let mut violations = self.process.bounds().check(self.process.scope(), ctx.grams);
        violations.extend(self.process.check(ctx));
        Validation::from_violations(violations)
    }

    fn project(&self, ctx: &ProductionContext) -> ProductionContext {
        if !self.validate(ctx).ok {
            return ctx.clone();
        }
        let today = self.env.clock.now().date_naive();
        self.process.process(ctx, today).advance(ctx)
    }

    async fn execute(&mut self, ctx: &ProductionContext) -> Result<ExecutionOutcome, StageError> {
        let status = self.header.status();
        if status != OperationStatus::Pending {
            return Err(StageError::NotPending { status });
        }
        self.validate(ctx).into_result()?;

        self.set_status(
            OperationStatus::InProgress,
            &format!("{} started for {}g of {}", self.header.name, ctx.grams, ctx.grain_type),
        )?;

        let minutes = self.process.simulated_minutes(ctx);
        let pause = self.env.pacing.pause_for(minutes, self.process.latency_cap());
        debug!(
            operation = %self.header.name,
            grams = ctx.grams,
            minutes,
            pause_ms = pause.as_millis(),
            "stage running"
        );
        self.env.clock.sleep(pause).await;

        let report = self
            .process
            .process(ctx, self.env.clock.now().date_naive());
        let output = report.advance(ctx);
        self.set_status(
            OperationStatus::Completed,
            &format!(
                "{} completed: {}g in, {}g out",
                self.header.name,
                report.grams_in(),
                report.grams_out()
            ),
        )?;
        debug!(operation = %self.header.name, grams_out = report.grams_out(), "stage completed");

        Ok(ExecutionOutcome {
            success: true,
            operation: self.header.name.clone(),
            status: self.header.status(),
            elapsed_minutes: self.elapsed_minutes(),
            real_cost: self.real_cost(ctx).unwrap_or(self.header.estimated_cost),
            output,
            detail: OutcomeDetail::Simple { report },
        })
    }

    fn info(&self) -> OperationInfo {
        OperationInfo {
            name: self.header.name.clone(),
            description: self.header.description.clone(),
            kind: OperationKind::Simple,
            status: self.header.status(),
            estimated_minutes: self.estimated_minutes(),
            estimated_cost: self.estimated_cost(),
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::clock::{ManualClock, PacingConfig};
    use crate::context::Stage;
    use crate::stages::{PackageType, StageReport};

    fn env() -> (Arc<ManualClock>, ExecutionEnv) {
        let clock = Arc::new(ManualClock::default());
        let env = ExecutionEnv::new(clock.clone(), PacingConfig::default());
        (clock, env)
    }

    #[test]
    fn defaults_come_from_the_stage() {
        let (_, env) = env();
        let roast = SimpleOperation::roasting(env.clone());
        assert_eq!(roast.name(), "Roasting");
        assert_eq!(roast.estimated_minutes(), 30);
        assert!((roast.estimated_cost() - 15.0).abs() < f64::EPSILON);
        assert_eq!(roast.kind(), OperationKind::Simple);

        let grind = SimpleOperation::grinding(env.clone());
        assert_eq!(grind.estimated_minutes(), 15);
        let pack = SimpleOperation::packaging(env);
        assert_eq!(pack.estimated_minutes(), 20);
    }

    #[test]
    fn base_checks_short_circuit_stage_checks() {
        let (_, env) = env();
        let roast = SimpleOperation::roasting(env);
        let validation = roast.validate(&ProductionContext::new(0, ""));
        assert_eq!(
            validation.errors,
            vec![Violation::MissingQuantity, Violation::MissingGrainType]
        );
    }

    #[test]
    fn bounds_and_stage_checks_accumulate() {
        let (_, env) = env();
        let roast = SimpleOperation::roasting(env);
        let validation = roast.validate(&ProductionContext::new(50, "Robusta"));
        assert_eq!(validation.messages().len(), 2);
        assert_eq!(validation.messages()[0], "minimum quantity for roasting: 100g");
    }

    #[test]
    fn real_cost_scales_with_grams() {
        let (_, env) = env();
        let roast = SimpleOperation::roasting(env);
        let cost = roast
            .real_cost(&ProductionContext::new(500, "Arabico"))
            .unwrap();
        assert!((cost - 7.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn execute_runs_and_completes() {
        let (clock, env) = env();
        let start = clock.now();
        let mut roast = SimpleOperation::roasting(env);
        let outcome = roast
            .execute(&ProductionContext::new(1000, "Arabico"))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.status, OperationStatus::Completed);
        assert_eq!(outcome.output.grams, 820);
        assert_eq!(outcome.output.previous_stage, Some(Stage::Roasted));
        assert!((outcome.real_cost - 15.0).abs() < 1e-9);
        // Arabica roasts for 12 simulated minutes, capped at five seconds.
        assert_eq!(clock.now() - start, chrono::TimeDelta::seconds(5));
        assert_eq!(roast.header().started_at(), Some(start));
        assert!(roast.header().finished_at().is_some());
    }

    #[tokio::test]
    async fn execute_refuses_invalid_context_without_status_change() {
        let (_, env) = env();
        let mut pack = SimpleOperation::packaging(env);
        let err = pack
            .execute(&ProductionContext::new(600, "Arabico"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Invalid(_)));
        assert_eq!(pack.status(), OperationStatus::Pending);
        assert!(pack.header().started_at().is_none());
    }

    #[tokio::test]
    async fn second_execute_is_refused() {
        let (_, env) = env();
        let mut grind = SimpleOperation::grinding(env);
        let ctx = ProductionContext::new(500, "Bourbon");
        grind.execute(&ctx).await.unwrap();
        let err = grind.execute(&ctx).await.unwrap_err();
        assert_eq!(
            err,
            StageError::NotPending {
                status: OperationStatus::Completed
            }
        );
        assert_eq!(
            grind.validate(&ctx).errors,
            vec![Violation::AlreadyCompleted]
        );
    }

    #[tokio::test]
    async fn packaging_six_hundred_grams() {
        let (_, env) = env();
        let mut pack = SimpleOperation::packaging(env);
        let ctx = ProductionContext::new(600, "Arabico").with_previous_stage(Stage::Ground);
        let outcome = pack.execute(&ctx).await.unwrap();
        let OutcomeDetail::Simple {
            report: StageReport::Package(report),
        } = outcome.detail
        else {
            panic!("expected a packaging report");
        };
        assert_eq!(report.package_type, PackageType::MediumBag);
        assert_eq!(report.package_count, 2);
        assert_eq!(outcome.output.previous_stage, Some(Stage::Packaged));
    }

    #[tokio::test]
    async fn pacing_controls_pause() {
        let clock = Arc::new(ManualClock::default());
        let env = ExecutionEnv::new(
            clock.clone(),
            PacingConfig {
                millis_per_minute: 100,
            },
        );
        let start = clock.now();
        let mut grind = SimpleOperation::grinding(env);
        grind
            .execute(&ProductionContext::new(500, "Bourbon").with_prep_style("francesa"))
            .await
            .unwrap();
        let paused = (clock.now() - start).to_std().unwrap();
        assert_eq!(paused, Duration::from_millis(600));
    }

    #[test]
    fn project_is_identity_for_invalid_input() {
        let (_, env) = env();
        let roast = SimpleOperation::roasting(env);
        let ctx = ProductionContext::new(20, "Arabico");
        assert_eq!(roast.project(&ctx), ctx);
    }
}
