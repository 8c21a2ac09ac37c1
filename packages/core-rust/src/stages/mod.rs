//! Deterministic process models for the three production stages.
//!
//! Each stage is a [`StageProcess`]: a stateless description of bounds,
//! stage-specific validation and the pure computation that turns an input
//! [`ProductionContext`] into a [`StageReport`]. Leaf operations wrap a
//! process with status tracking and simulated latency.

mod grind;
mod package;
mod roast;

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::context::ProductionContext;
use crate::error::Violation;

pub use grind::{Coarseness, GrindProfile, GrindReport, GrindSpeed, Grinding};
pub use package::{Material, PackageReport, PackageSpec, PackageType, Packaging};
pub use roast::{RoastLevel, RoastProfile, RoastReport, Roasting};

/// Quality grade assigned by a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Excellent,
    Good,
    Regular,
}

/// Inclusive gram range a stage accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GramBounds {
    pub min: u32,
    pub max: u32,
}

impl GramBounds {
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn contains(&self, grams: u32) -> bool {
        (self.min..=self.max).contains(&grams)
    }

    /// Violations for `grams` outside the range, labelled with `scope`.
    #[must_use]
    pub fn check(&self, scope: &str, grams: u32) -> Vec<Violation> {
        let mut violations = Vec::new();
        if grams < self.min {
            violations.push(Violation::BelowMinimum {
                scope: scope.to_string(),
                min: self.min,
            });
        }
        if grams > self.max {
            violations.push(Violation::AboveMaximum {
                scope: scope.to_string(),
                max: self.max,
            });
        }
        violations
    }
}

/// Stage-specific behaviour of a leaf operation.
pub trait StageProcess: Send + Sync {
    /// Display name of the leaf (e.g. `"Roasting"`).
    fn name(&self) -> &'static str;

    /// Lower-case label used in violation messages.
    fn scope(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Default estimated duration in minutes.
    fn base_minutes(&self) -> i64;

    /// Default estimated cost for a 1000 g reference batch.
    fn base_cost(&self) -> f64;

    fn bounds(&self) -> GramBounds;

    /// Upper limit on the simulated pause.
    fn latency_cap(&self) -> Duration;

    /// Checks beyond the shared leaf checks and gram bounds.
    fn check(&self, ctx: &ProductionContext) -> Vec<Violation>;

    /// Simulated minutes of work for `ctx`, used to pace execution.
    fn simulated_minutes(&self, ctx: &ProductionContext) -> u32;

    /// Pure computation of the stage result. `today` is used for any
    /// calendar defaults.
    fn process(&self, ctx: &ProductionContext, today: NaiveDate) -> StageReport;
}

/// Result of one executed stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageReport {
    Roast(RoastReport),
    Grind(GrindReport),
    Package(PackageReport),
}

impl StageReport {
    #[must_use]
    pub fn grams_in(&self) -> u32 {
        match self {
            StageReport::Roast(r) => r.grams_in,
            StageReport::Grind(r) => r.grams_in,
            StageReport::Package(r) => r.grams_in,
        }
    }

    #[must_use]
    pub fn grams_out(&self) -> u32 {
        match self {
            StageReport::Roast(r) => r.grams_out,
            StageReport::Grind(r) => r.grams_out,
            StageReport::Package(r) => r.grams_out,
        }
    }

    /// Context for the next stage: `ctx` with this stage's output applied.
    #[must_use]
    pub fn advance(&self, ctx: &ProductionContext) -> ProductionContext {
        match self {
            StageReport::Roast(r) => r.advance(ctx),
            StageReport::Grind(r) => r.advance(ctx),
            StageReport::Package(r) => r.advance(ctx),
        }
    }
}

/// `round(grams * factor)`, the weight lost by a stage.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn weight_loss(grams: u32, factor: f64) -> u32 {
    (f64::from(grams) * factor).round() as u32
}

/// Loss as a percentage of the input, rounded to two decimals.
pub(crate) fn loss_percent(loss: u32, grams: u32) -> f64 {
    if grams == 0 {
        return 0.0;
    }
    round2(f64::from(loss) / f64::from(grams) * 100.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
