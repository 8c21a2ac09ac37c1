use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{loss_percent, weight_loss, GramBounds, Quality, StageProcess, StageReport};
use crate::context::{GrainType, ProductionContext, Stage};
use crate::error::Violation;

/// Degree of roast. Determines the fraction of weight lost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoastLevel {
    Light,
    MediumLight,
    #[default]
    Medium,
    MediumDark,
    Dark,
}

impl RoastLevel {
    #[must_use]
    pub fn loss_factor(self) -> f64 {
        match self {
            RoastLevel::Light => 0.12,
            RoastLevel::MediumLight => 0.15,
            RoastLevel::Medium => 0.18,
            RoastLevel::MediumDark => 0.21,
            RoastLevel::Dark => 0.24,
        }
    }
}

/// Roaster settings for one grain variety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoastProfile {
    pub max_temperature_c: u32,
    pub minutes: u32,
    pub level: RoastLevel,
}

impl RoastProfile {
    #[must_use]
    pub fn for_grain(grain: GrainType) -> Self {
        let (max_temperature_c, minutes, level) = match grain {
            GrainType::Arabica => (205, 12, RoastLevel::Medium),
            GrainType::Bourbon => (200, 10, RoastLevel::MediumLight),
            GrainType::Catuai => (210, 14, RoastLevel::MediumDark),
        };
        Self {
            max_temperature_c,
            minutes,
            level,
        }
    }

    /// Profile for a raw grain name; unsupported names use the Arabica profile.
    #[must_use]
    pub fn for_context(ctx: &ProductionContext) -> Self {
        Self::for_grain(ctx.grain().unwrap_or(GrainType::Arabica))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoastReport {
    pub grams_in: u32,
    pub grams_out: u32,
    pub loss_grams: u32,
    pub loss_percent: f64,
    pub max_temperature_c: u32,
    pub roast_minutes: u32,
    pub level: RoastLevel,
    pub quality: Quality,
}

impl RoastReport {
    pub(crate) fn advance(&self, ctx: &ProductionContext) -> ProductionContext {
        ProductionContext {
            grams: self.grams_out,
            previous_stage: Some(Stage::Roasted),
            roast_quality: Some(self.quality),
            roast_level: Some(self.level),
            ..ctx.clone()
        }
    }
}

fn roast_quality(loss_percent: f64) -> Quality {
    if (15.0..=25.0).contains(&loss_percent) {
        Quality::Excellent
    } else if (10.0..=30.0).contains(&loss_percent) {
        Quality::Good
    } else {
        Quality::Regular
    }
}

/// Roasting stage: 30 minutes, Q15.00, 100–5000 g.
#[derive(Debug, Clone, Copy, Default)]
pub struct Roasting;

impl StageProcess for Roasting {
    fn name(&self) -> &'static str {
        "Roasting"
    }

    fn scope(&self) -> &'static str {
        "roasting"
    }

    fn description(&self) -> &'static str {
        "Roast green coffee beans to develop flavour and aroma"
    }

    fn base_minutes(&self) -> i64 {
        30
    }

    fn base_cost(&self) -> f64 {
        15.0
    }

    fn bounds(&self) -> GramBounds {
        GramBounds::new(100, 5000)
    }

    fn latency_cap(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn check(&self, ctx: &ProductionContext) -> Vec<Violation> {
        if ctx.grain().is_some() {
            Vec::new()
        } else {
            vec![Violation::InvalidGrainType {
                given: ctx.grain_type.clone(),
            }]
        }
    }

    fn simulated_minutes(&self, ctx: &ProductionContext) -> u32 {
        RoastProfile::for_context(ctx).minutes
    }

    fn process(&self, ctx: &ProductionContext, _today: NaiveDate) -> StageReport {
        let profile = RoastProfile::for_context(ctx);
        let loss = weight_loss(ctx.grams, profile.level.loss_factor());
        let percent = loss_percent(loss, ctx.grams);
        StageReport::Roast(RoastReport {
            grams_in: ctx.grams,
            grams_out: ctx.grams - loss,
            loss_grams: loss,
            loss_percent: percent,
            max_temperature_c: profile.max_temperature_c,
            roast_minutes: profile.minutes,
            level: profile.level,
            quality: roast_quality(percent),
        })
    }
}
