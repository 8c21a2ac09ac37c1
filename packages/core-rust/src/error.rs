//! Validation and execution error taxonomy.

use serde::{Serialize, Serializer};

use crate::context::Stage;
use crate::operation::OperationStatus;

/// One human-readable constraint an operation's context failed to meet.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("grams must be greater than 0")]
    MissingQuantity,

    #[error("grain type is required")]
    MissingGrainType,

    #[error("operation is already in progress")]
    AlreadyInProgress,

    #[error("operation is already completed")]
    AlreadyCompleted,

    #[error("minimum quantity for {scope}: {min}g")]
    BelowMinimum { scope: String, min: u32 },

    #[error("maximum quantity for {scope}: {max}g")]
    AboveMaximum { scope: String, max: u32 },

    #[error("invalid grain type '{given}'; valid types: Arabico, Bourbon, Catuai")]
    InvalidGrainType { given: String },

    #[error("invalid preparation style '{given}'; valid styles: espresso, filtro, francesa, chemex, v60")]
    InvalidPrepStyle { given: String },

    #[error("coffee must be {required} before {scope}{}", found_suffix(.found.as_ref()))]
    WrongPreviousStage {
        scope: String,
        required: Stage,
        found: Option<Stage>,
    },

    #[error("{scope} must start from harvested beans (cosecha)")]
    NotFromHarvest { scope: String },

    #[error("composite operation has no child operations")]
    NoChildren,

    #[error("operation {index} ({name}): {}", join(.violations))]
    Child {
        index: usize,
        name: String,
        violations: Vec<Violation>,
    },
}

impl Violation {
    /// Returns true if this violation, or any nested child violation,
    /// satisfies `pred`.
    pub fn any(&self, pred: &impl Fn(&Violation) -> bool) -> bool {
        match self {
            Violation::Child { violations, .. } => violations.iter().any(|v| v.any(pred)),
            other => pred(other),
        }
    }
}

impl Serialize for Violation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn found_suffix(found: Option<&Stage>) -> String {
    match found {
        Some(stage) => format!(" (found {stage})"),
        None => String::new(),
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Outcome of `Operation::validate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Validation {
    pub ok: bool,
    pub errors: Vec<Violation>,
}

impl Validation {
    #[must_use]
    pub fn from_violations(errors: Vec<Violation>) -> Self {
        Self {
            ok: errors.is_empty(),
            errors,
        }
    }

    #[must_use]
    pub fn valid() -> Self {
        Self::from_violations(Vec::new())
    }

    /// Converts a failed validation into [`StageError::Invalid`].
    ///
    /// # Errors
    ///
    /// Returns `StageError::Invalid` carrying every violation when not ok.
    pub fn into_result(self) -> Result<(), StageError> {
        if self.ok {
            Ok(())
        } else {
            Err(StageError::Invalid(self.errors))
        }
    }

    /// Rendered messages, in the order they were collected.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// Errors raised while driving a single operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("validation failed: {}", join(.0))]
    Invalid(Vec<Violation>),

    #[error("operation is {status}; only pending operations can execute")]
    NotPending { status: OperationStatus },

    #[error("composite operation has no child operations")]
    EmptyComposite,

    #[error("illegal status transition from {from} to {to}")]
    IllegalTransition {
        from: OperationStatus,
        to: OperationStatus,
    },
}

impl StageError {
    /// Returns true if the error carries a violation matching `pred`.
    pub fn has_violation(&self, pred: impl Fn(&Violation) -> bool) -> bool {
        match self {
            StageError::Invalid(violations) => violations.iter().any(|v| v.any(&pred)),
            _ => false,
        }
    }
}
