use std::time::Duration;

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{GramBounds, Quality, StageProcess, StageReport};
use crate::context::{ProductionContext, Stage};
use crate::error::Violation;

/// Shelf life applied when the context carries no expiry date.
const SHELF_LIFE_MONTHS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageType {
    #[serde(rename = "bolsa_pequena")]
    SmallBag,
    #[serde(rename = "bolsa_mediana")]
    MediumBag,
    #[serde(rename = "bolsa_grande")]
    LargeBag,
    #[serde(rename = "caja_multiple")]
    MultiPackBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Material {
    #[serde(rename = "papel_aluminio")]
    Foil,
    #[serde(rename = "carton")]
    Cardboard,
}

/// Container chosen for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    pub package_type: PackageType,
    pub unit_grams: u32,
    pub minutes: u32,
    pub material: Material,
}

impl PackageSpec {
    const SMALL: Self = Self::new(PackageType::SmallBag, 250, 15, Material::Foil);
    const MEDIUM: Self = Self::new(PackageType::MediumBag, 500, 20, Material::Foil);
    const LARGE: Self = Self::new(PackageType::LargeBag, 1000, 25, Material::Foil);
    const BOX: Self = Self::new(PackageType::MultiPackBox, 500, 30, Material::Cardboard);

    const fn new(package_type: PackageType, unit_grams: u32, minutes: u32, material: Material) -> Self {
        Self {
            package_type,
            unit_grams,
            minutes,
            material,
        }
    }

    /// Picks the container for `grams`.
    ///
    /// Between the medium and large bag the unit weight nearest to `grams`
    /// wins, ties going to the large bag.
    #[must_use]
    pub fn for_grams(grams: u32) -> Self {
        match grams {
            0..=250 => Self::SMALL,
            251..=500 => Self::MEDIUM,
            501..=1000 if grams - Self::MEDIUM.unit_grams < Self::LARGE.unit_grams - grams => {
                Self::MEDIUM
            }
            501..=1000 => Self::LARGE,
            _ => Self::BOX,
        }
    }

    #[must_use]
    pub fn count_for(&self, grams: u32) -> u32 {
        grams.div_ceil(self.unit_grams)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageReport {
    pub grams_in: u32,
    pub grams_out: u32,
    pub package_type: PackageType,
    pub package_count: u32,
    pub unit_grams: u32,
    pub packaging_minutes: u32,
    pub material: Material,
    pub quality: Quality,
    pub expiry_date: NaiveDate,
}

impl PackageReport {
    pub(crate) fn advance(&self, ctx: &ProductionContext) -> ProductionContext {
        ProductionContext {
            previous_stage: Some(Stage::Packaged),
            package_count: Some(self.package_count),
            package_type: Some(self.package_type),
            expiry_date: Some(self.expiry_date),
            ..ctx.clone()
        }
    }
}

/// Packaging stage: 20 minutes, Q12.00, 100–10000 g, requires ground coffee.
#[derive(Debug, Clone, Copy, Default)]
pub struct Packaging;

impl StageProcess for Packaging {
    fn name(&self) -> &'static str {
        "Packaging"
    }

    fn scope(&self) -> &'static str {
        "packaging"
    }

    fn description(&self) -> &'static str {
        "Pack ground coffee into retail packages"
    }

    fn base_minutes(&self) -> i64 {
        20
    }

    fn base_cost(&self) -> f64 {
        12.0
    }

    fn bounds(&self) -> GramBounds {
        GramBounds::new(100, 10_000)
    }

    fn latency_cap(&self) -> Duration {
        Duration::from_secs(4)
    }

    fn check(&self, ctx: &ProductionContext) -> Vec<Violation> {
        if ctx.previous_stage == Some(Stage::Ground) {
            Vec::new()
        } else {
            vec![Violation::WrongPreviousStage {
                scope: self.scope().to_string(),
                required: Stage::Ground,
                found: ctx.previous_stage,
            }]
        }
    }

    fn simulated_minutes(&self, ctx: &ProductionContext) -> u32 {
        PackageSpec::for_grams(ctx.grams).minutes
    }

    fn process(&self, ctx: &ProductionContext, today: NaiveDate) -> StageReport {
        let spec = PackageSpec::for_grams(ctx.grams);
        let count = spec.count_for(ctx.grams);
        let quality = match (spec.material, count) {
            (Material::Foil, 0..=10) => Quality::Excellent,
            (Material::Foil, 11..=20) => Quality::Good,
            _ => Quality::Regular,
        };
        let expiry_date = ctx.expiry_date.unwrap_or_else(|| {
            today
                .checked_add_months(Months::new(SHELF_LIFE_MONTHS))
                .unwrap_or(today)
        });
        StageReport::Package(PackageReport {
            grams_in: ctx.grams,
            grams_out: ctx.grams,
            package_type: spec.package_type,
            package_count: count,
            unit_grams: spec.unit_grams,
            packaging_minutes: spec.minutes,
            material: spec.material,
            quality,
            expiry_date,
        })
    }
}
