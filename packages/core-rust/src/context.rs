//! Production context threaded through every operation.
//!
//! A [`ProductionContext`] is an immutable value: each stage that runs
//! returns a new context instead of mutating the one it was given. Wire
//! names follow the controller contract (`cantidadGramos`, `tipoGrano`, ...)
//! so adapter layers can pass request bodies through unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::stages::{Coarseness, PackageType, Quality, RoastLevel};

/// Error returned when a catalogue name does not match any known value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownName {
    /// Which catalogue was searched (e.g. `"grain type"`).
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl UnknownName {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// GrainType
// ---------------------------------------------------------------------------

/// Green-bean varieties the roastery can process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrainType {
    #[serde(rename = "Arabico")]
    Arabica,
    #[serde(rename = "Bourbon")]
    Bourbon,
    #[serde(rename = "Catuai")]
    Catuai,
}

impl GrainType {
    /// All supported varieties, in catalogue order. The first entry is the
    /// fallback profile for unknown varieties.
    pub const ALL: [GrainType; 3] = [GrainType::Arabica, GrainType::Bourbon, GrainType::Catuai];

    /// Wire name of the variety.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GrainType::Arabica => "Arabico",
            GrainType::Bourbon => "Bourbon",
            GrainType::Catuai => "Catuai",
        }
    }
}

impl fmt::Display for GrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrainType {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GrainType::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| UnknownName::new("grain type", s))
    }
}

// ---------------------------------------------------------------------------
// PrepStyle
// ---------------------------------------------------------------------------

/// Brewing method the ground coffee is destined for. Drives grind coarseness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrepStyle {
    #[serde(rename = "espresso")]
    Espresso,
    #[default]
    #[serde(rename = "filtro")]
    Filter,
    #[serde(rename = "francesa")]
    FrenchPress,
    #[serde(rename = "chemex")]
    Chemex,
    #[serde(rename = "v60")]
    V60,
}

impl PrepStyle {
    pub const ALL: [PrepStyle; 5] = [
        PrepStyle::Espresso,
        PrepStyle::Filter,
        PrepStyle::FrenchPress,
        PrepStyle::Chemex,
        PrepStyle::V60,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PrepStyle::Espresso => "espresso",
            PrepStyle::Filter => "filtro",
            PrepStyle::FrenchPress => "francesa",
            PrepStyle::Chemex => "chemex",
            PrepStyle::V60 => "v60",
        }
    }
}

impl fmt::Display for PrepStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrepStyle {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrepStyle::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownName::new("preparation style", s))
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Physical state of the coffee after the last completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "cosecha")]
    Harvest,
    #[serde(rename = "tostado")]
    Roasted,
    #[serde(rename = "molido")]
    Ground,
    #[serde(rename = "envasado")]
    Packaged,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Harvest => "cosecha",
            Stage::Roasted => "tostado",
            Stage::Ground => "molido",
            Stage::Packaged => "envasado",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// QualityControl
// ---------------------------------------------------------------------------

/// Quality-control regime stamped by special processes. Reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityControl {
    Strict,
    Basic,
    Traditional,
    Experimental,
}

impl QualityControl {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QualityControl::Strict => "strict",
            QualityControl::Basic => "basic",
            QualityControl::Traditional => "traditional",
            QualityControl::Experimental => "experimental",
        }
    }
}

// ---------------------------------------------------------------------------
// ProductionContext
// ---------------------------------------------------------------------------

/// Input/output parameter bag threaded through a sequence of operations.
///
/// The first six fields are supplied by callers. The remaining fields are
/// markers written by completed stages; they never feed back into
/// validation except for `previous_stage` and `grams`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductionContext {
    #[serde(rename = "cantidadGramos")]
    pub grams: u32,
    /// Raw grain type as supplied; parsed during validation so that an
    /// unsupported variety surfaces as a violation rather than a decode error.
    #[serde(rename = "tipoGrano")]
    pub grain_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(rename = "tipoPreparacion", skip_serializing_if = "Option::is_none")]
    pub prep_style: Option<String>,
    #[serde(rename = "fechaVencimiento", skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(rename = "estadoAnterior", skip_serializing_if = "Option::is_none")]
    pub previous_stage: Option<Stage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub roast_quality: Option<Quality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roast_level: Option<RoastLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grind_quality: Option<Quality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grind_coarseness: Option<Coarseness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_type: Option<PackageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_control: Option<QualityControl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_hours: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traditional_techniques: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub innovative_techniques: Option<bool>,
}

impl ProductionContext {
    /// Creates a context for `grams` of the given grain type.
    #[must_use]
    pub fn new(grams: u32, grain_type: impl Into<String>) -> Self {
        Self {
            grams,
            grain_type: grain_type.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn with_prep_style(mut self, style: impl Into<String>) -> Self {
        self.prep_style = Some(style.into());
        self
    }

    #[must_use]
    pub fn with_expiry_date(mut self, date: NaiveDate) -> Self {
        self.expiry_date = Some(date);
        self
    }

    #[must_use]
    pub fn with_previous_stage(mut self, stage: Stage) -> Self {
        self.previous_stage = Some(stage);
        self
    }

    #[must_use]
    pub fn with_grams(mut self, grams: u32) -> Self {
        self.grams = grams;
        self
    }

    /// Parsed grain type, or `None` when the raw value is not supported.
    #[must_use]
    pub fn grain(&self) -> Option<GrainType> {
        self.grain_type.parse().ok()
    }

    /// Parsed preparation style.
    ///
    /// Returns `Ok(None)` when no style was supplied and `Err` when the
    /// supplied style is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownName`] for an unsupported style string.
    pub fn prep(&self) -> Result<Option<PrepStyle>, UnknownName> {
        self.prep_style.as_deref().map(str::parse).transpose()
    }
}
