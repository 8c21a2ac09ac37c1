//! Concrete production workflows built on [`CompositeOperation`].
//!
//! * [`FullBatch`]: roast, grind and package with a fixed transition surcharge.
//! * [`SpecialProcess`]: the same pipeline tuned by a [`SpecialVariant`],
//!   which adjusts each child's estimates, the batch bounds, the failure
//!   tolerance and the quality-control markers stamped into the context.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::ExecutionEnv;
use crate::composite::{CompositeOperation, Surcharge, WorkflowDetails, WorkflowPolicy};
use crate::context::{ProductionContext, QualityControl, Stage, UnknownName};
use crate::error::{StageError, Violation};
use crate::leaf::SimpleOperation;
use crate::operation::Operation;
use crate::stages::GramBounds;

const PIPELINE: [&str; 3] = ["roasting", "grinding", "packaging"];

fn pipeline_stages() -> Vec<String> {
    PIPELINE.iter().map(ToString::to_string).collect()
}

/// Violation when a batch does not start from harvested beans.
fn harvest_check(scope: &str, ctx: &ProductionContext) -> Option<Violation> {
    match ctx.previous_stage {
        None | Some(Stage::Harvest) => None,
        Some(_) => Some(Violation::NotFromHarvest {
            scope: scope.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// FullBatch
// ---------------------------------------------------------------------------

/// Roast, grind and package in one batch, 200–3000 g, +10 min / +Q5.00.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullBatch;

impl FullBatch {
    pub const NAME: &'static str = "Full Batch";
    pub const BOUNDS: GramBounds = GramBounds::new(200, 3000);

    /// Builds the three-stage full-batch composite.
    #[must_use]
    pub fn build(env: &ExecutionEnv) -> CompositeOperation {
        let mut batch = CompositeOperation::with_workflow(
            Self::NAME,
            "Complete coffee production: roasting, grinding and packaging",
            FullBatch,
            env.clone(),
        );
        batch.add_child(Box::new(SimpleOperation::roasting(env.clone())));
        batch.add_child(Box::new(SimpleOperation::grinding(env.clone())));
        batch.add_child(Box::new(SimpleOperation::packaging(env.clone())));
        batch
    }
}

impl WorkflowPolicy for FullBatch {
    /// Stops on critical errors: any validation failure (which covers
    /// below-minimum quantities and invalid grain types). Runtime errors
    /// from a child are tolerated.
    fn should_stop(&self, _child: &dyn Operation, error: &StageError) -> bool {
        matches!(error, StageError::Invalid(_))
            || error.has_violation(|v| {
                matches!(
                    v,
                    Violation::BelowMinimum { .. } | Violation::InvalidGrainType { .. }
                )
            })
    }

    fn check(&self, ctx: &ProductionContext) -> Vec<Violation> {
        let mut violations = Self::BOUNDS.check("full batch", ctx.grams);
        violations.extend(harvest_check("full batch", ctx));
        if let Err(err) = ctx.prep() {
            violations.push(Violation::InvalidPrepStyle { given: err.value });
        }
        violations
    }

    fn surcharge(&self) -> Surcharge {
        Surcharge {
            minutes: 10,
            cost: 5.0,
        }
    }

    fn details(&self) -> Option<WorkflowDetails> {
        Some(WorkflowDetails {
            workflow: "full".to_string(),
            summary: "Complete production from green beans to retail-ready packages".to_string(),
            stages: pipeline_stages(),
            surcharge: self.surcharge(),
            min_grams: Self::BOUNDS.min,
            max_grams: Self::BOUNDS.max,
            characteristics: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// SpecialProcess
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialVariant {
    Premium,
    Express,
    Artesanal,
    Experimental,
}

impl SpecialVariant {
    pub const ALL: [SpecialVariant; 4] = [
        SpecialVariant::Premium,
        SpecialVariant::Express,
        SpecialVariant::Artesanal,
        SpecialVariant::Experimental,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SpecialVariant::Premium => "premium",
            SpecialVariant::Express => "express",
            SpecialVariant::Artesanal => "artesanal",
            SpecialVariant::Experimental => "experimental",
        }
    }

    /// Suffix appended to child names.
    fn label(self) -> &'static str {
        match self {
            SpecialVariant::Premium => "Premium",
            SpecialVariant::Express => "Express",
            SpecialVariant::Artesanal => "Artesanal",
            SpecialVariant::Experimental => "Experimental",
        }
    }

    #[must_use]
    pub fn summary(self) -> &'static str {
        match self {
            SpecialVariant::Premium => "Premium process with strict quality control",
            SpecialVariant::Express => "Express process for fast production",
            SpecialVariant::Artesanal => "Artisanal process using traditional techniques",
            SpecialVariant::Experimental => "Experimental process using innovative techniques",
        }
    }

    #[must_use]
    pub fn surcharge(self) -> Surcharge {
        let (minutes, cost) = match self {
            SpecialVariant::Premium => (15, 20.0),
            SpecialVariant::Express => (-10, -5.0),
            SpecialVariant::Artesanal => (30, 25.0),
            SpecialVariant::Experimental => (20, 15.0),
        };
        Surcharge { minutes, cost }
    }

    /// Premium and artesanal use strict bounds.
    #[must_use]
    pub fn bounds(self) -> GramBounds {
        match self {
            SpecialVariant::Premium | SpecialVariant::Artesanal => GramBounds::new(300, 2000),
            SpecialVariant::Express | SpecialVariant::Experimental => GramBounds::new(100, 5000),
        }
    }

    #[must_use]
    pub fn quality_control(self) -> QualityControl {
        match self {
            SpecialVariant::Premium => QualityControl::Strict,
            SpecialVariant::Express => QualityControl::Basic,
            SpecialVariant::Artesanal => QualityControl::Traditional,
            SpecialVariant::Experimental => QualityControl::Experimental,
        }
    }

    #[must_use]
    pub fn quarantine_hours(self) -> u32 {
        match self {
            SpecialVariant::Premium => 24,
            SpecialVariant::Express => 0,
            SpecialVariant::Artesanal => 48,
            SpecialVariant::Experimental => 12,
        }
    }

    /// New `(minutes, cost)` estimate for a child of this variant.
    #[must_use]
    pub fn adjust(self, minutes: i64, cost: f64) -> (i64, f64) {
        match self {
            SpecialVariant::Premium => (minutes + 5, cost + 3.0),
            SpecialVariant::Express => ((minutes - 3).max(5), (cost - 2.0).max(1.0)),
            SpecialVariant::Artesanal => (minutes + 10, cost + 5.0),
            SpecialVariant::Experimental => (minutes + 8, cost + 4.0),
        }
    }
}

impl fmt::Display for SpecialVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecialVariant {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpecialVariant::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownName {
                kind: "special process variant",
                value: s.to_string(),
            })
    }
}

/// Workflow policy for a special process variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialProcess {
    variant: SpecialVariant,
}

impl SpecialProcess {
    #[must_use]
    pub fn new(variant: SpecialVariant) -> Self {
        Self { variant }
    }

    #[must_use]
    pub fn variant(&self) -> SpecialVariant {
        self.variant
    }

    #[must_use]
    pub fn name_for(variant: SpecialVariant) -> String {
        format!("Special Process - {variant}")
    }

    /// Builds the three-stage composite with every child adjusted for `variant`.
    #[must_use]
    pub fn build(variant: SpecialVariant, env: &ExecutionEnv) -> CompositeOperation {
        let mut process = CompositeOperation::with_workflow(
            Self::name_for(variant),
            format!("Specialised coffee production, {variant} variant"),
            Self::new(variant),
            env.clone(),
        );
        for mut child in [
            SimpleOperation::roasting(env.clone()),
            SimpleOperation::grinding(env.clone()),
            SimpleOperation::packaging(env.clone()),
        ] {
            let header = child.header_mut();
            let (minutes, cost) = variant.adjust(header.estimated_minutes, header.estimated_cost);
            header.estimated_minutes = minutes;
            header.estimated_cost = cost;
            header.name = format!("{} {}", header.name, variant.label());
            process.add_child(Box::new(child));
        }
        process
    }

    fn scope(&self) -> String {
        format!("process {}", self.variant)
    }
}

impl WorkflowPolicy for SpecialProcess {
    /// Express tolerates every child error except an invalid grain type.
    fn should_stop(&self, _child: &dyn Operation, error: &StageError) -> bool {
        match self.variant {
            SpecialVariant::Express => {
                error.has_violation(|v| matches!(v, Violation::InvalidGrainType { .. }))
            }
            _ => true,
        }
    }

    fn check(&self, ctx: &ProductionContext) -> Vec<Violation> {
        let scope = self.scope();
        let mut violations = self.variant.bounds().check(&scope, ctx.grams);
        violations.extend(harvest_check("special process", ctx));
        violations
    }

    fn after_step(&self, ctx: ProductionContext) -> ProductionContext {
        let variant = self.variant;
        ProductionContext {
            quality_control: Some(variant.quality_control()),
            quarantine_hours: Some(variant.quarantine_hours()),
            traditional_techniques: (variant == SpecialVariant::Artesanal)
                .then_some(true)
                .or(ctx.traditional_techniques),
            innovative_techniques: (variant == SpecialVariant::Experimental)
                .then_some(true)
                .or(ctx.innovative_techniques),
            ..ctx
        }
    }

    fn surcharge(&self) -> Surcharge {
        self.variant.surcharge()
    }

    fn details(&self) -> Option<WorkflowDetails> {
        let bounds = self.variant.bounds();
        let mut characteristics = vec![
            format!("quality control: {}", self.variant.quality_control().as_str()),
            format!("quarantine: {}h", self.variant.quarantine_hours()),
        ];
        match self.variant {
            SpecialVariant::Artesanal => characteristics.push("traditional techniques".to_string()),
            SpecialVariant::Experimental => {
                characteristics.push("innovative techniques".to_string());
            }
            _ => {}
        }
        Some(WorkflowDetails {
            workflow: self.variant.as_str().to_string(),
            summary: self.variant.summary().to_string(),
            stages: pipeline_stages(),
            surcharge: self.surcharge(),
            min_grams: bounds.min,
            max_grams: bounds.max,
            characteristics,
        })
    }
}
