use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{loss_percent, weight_loss, GramBounds, Quality, StageProcess, StageReport};
use crate::context::{PrepStyle, ProductionContext, Stage};
use crate::error::Violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coarseness {
    Fine,
    MediumFine,
    Medium,
    MediumCoarse,
    Coarse,
}

impl Coarseness {
    #[must_use]
    pub fn loss_factor(self) -> f64 {
        match self {
            Coarseness::Fine => 0.08,
            Coarseness::MediumFine => 0.06,
            Coarseness::Medium => 0.05,
            Coarseness::MediumCoarse => 0.04,
            Coarseness::Coarse => 0.03,
        }
    }
}

/// Burr speed. Slower grinds are more uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrindSpeed {
    Slow,
    Medium,
    Fast,
}

impl GrindSpeed {
    #[must_use]
    pub fn uniformity(self) -> Quality {
        match self {
            GrindSpeed::Slow => Quality::Excellent,
            GrindSpeed::Medium => Quality::Good,
            GrindSpeed::Fast => Quality::Regular,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrindProfile {
    pub coarseness: Coarseness,
    pub minutes: u32,
    pub speed: GrindSpeed,
}

impl GrindProfile {
    #[must_use]
    pub fn for_style(style: PrepStyle) -> Self {
        let (coarseness, minutes, speed) = match style {
            PrepStyle::Espresso => (Coarseness::Fine, 8, GrindSpeed::Slow),
            PrepStyle::Filter => (Coarseness::Medium, 12, GrindSpeed::Medium),
            PrepStyle::FrenchPress => (Coarseness::Coarse, 6, GrindSpeed::Fast),
            PrepStyle::Chemex => (Coarseness::MediumCoarse, 10, GrindSpeed::Medium),
            PrepStyle::V60 => (Coarseness::MediumFine, 9, GrindSpeed::Medium),
        };
        Self {
            coarseness,
            minutes,
            speed,
        }
    }
}

fn style_of(ctx: &ProductionContext) -> PrepStyle {
    ctx.prep().ok().flatten().unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrindReport {
    pub grams_in: u32,
    pub grams_out: u32,
    pub loss_grams: u32,
    pub loss_percent: f64,
    pub coarseness: Coarseness,
    pub grind_minutes: u32,
    pub prep_style: PrepStyle,
    pub quality: Quality,
    pub uniformity: Quality,
}

impl GrindReport {
    pub(crate) fn advance(&self, ctx: &ProductionContext) -> ProductionContext {
        ProductionContext {
            grams: self.grams_out,
            previous_stage: Some(Stage::Ground),
            grind_quality: Some(self.quality),
            grind_coarseness: Some(self.coarseness),
            ..ctx.clone()
        }
    }
}

/// Grinding stage: 15 minutes, Q8.00, 50–2000 g.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grinding;

impl StageProcess for Grinding {
    fn name(&self) -> &'static str {
        "Grinding"
    }

    fn scope(&self) -> &'static str {
        "grinding"
    }

    fn description(&self) -> &'static str {
        "Grind roasted beans to the coarseness required by the brewing method"
    }

    fn base_minutes(&self) -> i64 {
        15
    }

    fn base_cost(&self) -> f64 {
        8.0
    }

    fn bounds(&self) -> GramBounds {
        GramBounds::new(50, 2000)
    }

    fn latency_cap(&self) -> Duration {
        Duration::from_secs(3)
    }

    fn check(&self, ctx: &ProductionContext) -> Vec<Violation> {
        match ctx.prep() {
            Ok(_) => Vec::new(),
            Err(err) => vec![Violation::InvalidPrepStyle { given: err.value }],
        }
    }

    fn simulated_minutes(&self, ctx: &ProductionContext) -> u32 {
        GrindProfile::for_style(style_of(ctx)).minutes
    }

    fn process(&self, ctx: &ProductionContext, _today: NaiveDate) -> StageReport {
        let style = style_of(ctx);
        let profile = GrindProfile::for_style(style);
        let loss = weight_loss(ctx.grams, profile.coarseness.loss_factor());
        let percent = loss_percent(loss, ctx.grams);
        let quality = if percent <= 5.0 {
            Quality::Excellent
        } else if percent <= 8.0 {
            Quality::Good
        } else {
            Quality::Regular
        };
        StageReport::Grind(GrindReport {
            grams_in: ctx.grams,
            grams_out: ctx.grams - loss,
            loss_grams: loss,
            loss_percent: percent,
            coarseness: profile.coarseness,
            grind_minutes: profile.minutes,
            prep_style: style,
            quality,
            uniformity: profile.speed.uniformity(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grind(ctx: &ProductionContext) -> GrindReport {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        match Grinding.process(ctx, today) {
            StageReport::Grind(report) => report,
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[test]
    fn defaults_to_filter_profile() {
        let report = grind(&ProductionContext::new(820, "Arabico"));
        assert_eq!(report.prep_style, PrepStyle::Filter);
        assert_eq!(report.coarseness, Coarseness::Medium);
        assert_eq!(report.loss_grams, 41);
        assert_eq!(report.grams_out, 779);
        assert_eq!(report.grind_minutes, 12);
        assert_eq!(report.quality, Quality::Excellent);
        assert_eq!(report.uniformity, Quality::Good);
    }

    #[test]
    fn espresso_is_fine_and_slow() {
        let report = grind(&ProductionContext::new(500, "Bourbon").with_prep_style("espresso"));
        assert_eq!(report.coarseness, Coarseness::Fine);
        assert_eq!(report.grams_out, 460);
        assert_eq!(report.quality, Quality::Good);
        assert_eq!(report.uniformity, Quality::Excellent);
    }

    #[test]
    fn french_press_is_coarse_and_fast() {
        let report = grind(&ProductionContext::new(1000, "Catuai").with_prep_style("francesa"));
        assert_eq!(report.coarseness, Coarseness::Coarse);
        assert_eq!(report.grams_out, 970);
        assert_eq!(report.grind_minutes, 6);
        assert_eq!(report.uniformity, Quality::Regular);
    }

    #[test]
    fn unknown_style_is_a_violation() {
        let ctx = ProductionContext::new(500, "Bourbon").with_prep_style("moka");
        assert_eq!(
            Grinding.check(&ctx),
            vec![Violation::InvalidPrepStyle {
                given: "moka".to_string()
            }]
        );
        assert!(Grinding
            .check(&ProductionContext::new(500, "Bourbon"))
            .is_empty());
    }

    #[test]
    fn simulated_minutes_follow_style() {
        let ctx = ProductionContext::new(500, "Bourbon").with_prep_style("chemex");
        assert_eq!(Grinding.simulated_minutes(&ctx), 10);
    }

    #[test]
    fn advance_marks_ground() {
        let ctx = ProductionContext::new(1000, "Catuai").with_prep_style("v60");
        let next = grind(&ctx).advance(&ctx);
        assert_eq!(next.grams, 940);
        assert_eq!(next.previous_stage, Some(Stage::Ground));
        assert_eq!(next.grind_coarseness, Some(Coarseness::MediumFine));
        assert_eq!(next.prep_style.as_deref(), Some("v60"));
    }
}
