//! Operation catalogue types, handles and registry errors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use roastery_core::{
    Operation, OperationInfo, OperationKind, OperationStatus, ProductionContext, Progress,
    StageError, WorkflowDetails,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OperationType
// ---------------------------------------------------------------------------

/// Closed set of operations the registry can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    FullBatch,
    SpecialProcess,
    Roast,
    Grind,
    Package,
}

impl OperationType {
    pub const ALL: [OperationType; 5] = [
        OperationType::FullBatch,
        OperationType::SpecialProcess,
        OperationType::Roast,
        OperationType::Grind,
        OperationType::Package,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::FullBatch => "fullBatch",
            OperationType::SpecialProcess => "specialProcess",
            OperationType::Roast => "roast",
            OperationType::Grind => "grind",
            OperationType::Package => "package",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RegistryError::UnknownOperationType {
                name: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Identifiers and configuration
// ---------------------------------------------------------------------------

/// Process-unique operation identifier, `op_<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("op_{}", uuid::Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Per-creation options. Only special processes read `variant`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OperationConfig {
    /// Special process variant name; `premium` when absent.
    #[serde(alias = "tipoProceso", skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl OperationConfig {
    #[must_use]
    pub fn variant(name: impl Into<String>) -> Self {
        Self {
            variant: Some(name.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the operation registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown operation type: {name}")]
    UnknownOperationType { name: String },

    #[error("unknown special process variant: {name}")]
    UnknownVariant { name: String },

    #[error("operation not found: {id}")]
    NotFound { id: OperationId },

    #[error("validation failed: {}", .errors.join(", "))]
    ValidationFailed { errors: Vec<String> },

    #[error("cannot cancel operation {id}: it is in progress")]
    CannotCancelRunning { id: OperationId },

    #[error("operation {id} has already been executed")]
    AlreadyExecuted { id: OperationId },

    #[error("operation {id} is already running")]
    AlreadyRunning { id: OperationId },

    #[error("execution of {id} was interrupted: {reason}")]
    Interrupted { id: OperationId, reason: String },

    #[error("execution failed: {0}")]
    Execution(#[from] StageError),
}

// ---------------------------------------------------------------------------
// Handles and scheduled entries
// ---------------------------------------------------------------------------

/// An operation built by the registry, stamped with identity and creation time.
pub struct OperationHandle {
    pub id: OperationId,
    pub op_type: OperationType,
    pub created_at: DateTime<Utc>,
    pub operation: Box<dyn Operation>,
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .field("op_type", &self.op_type)
            .field("name", &self.operation.name())
            .field("status", &self.operation.status())
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a registry entry: `scheduled -> running -> executed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Scheduled,
    Running,
    Executed,
}

/// Where the operation currently lives. While it runs on its own task the
/// entry keeps a snapshot for status queries.
enum OperationSlot {
    Idle(Box<dyn Operation>),
    Detached(Box<OperationInfo>),
}

/// Registry-owned pairing of an operation with its scheduled context.
pub struct ScheduledOperation {
    pub id: OperationId,
    pub op_type: OperationType,
    pub created_at: DateTime<Utc>,
    pub context: ProductionContext,
    pub scheduled_at: DateTime<Utc>,
    pub state: EntryState,
    slot: OperationSlot,
}

impl ScheduledOperation {
    #[must_use]
    pub fn new(
        handle: OperationHandle,
        context: ProductionContext,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: handle.id,
            op_type: handle.op_type,
            created_at: handle.created_at,
            context,
            scheduled_at,
            state: EntryState::Scheduled,
            slot: OperationSlot::Idle(handle.operation),
        }
    }

    /// The operation, unless it is detached for a run.
    #[must_use]
    pub fn operation(&self) -> Option<&dyn Operation> {
        match &self.slot {
            OperationSlot::Idle(operation) => Some(operation.as_ref()),
            OperationSlot::Detached(_) => None,
        }
    }

    pub fn operation_mut(&mut self) -> Option<&mut Box<dyn Operation>> {
        match &mut self.slot {
            OperationSlot::Idle(operation) => Some(operation),
            OperationSlot::Detached(_) => None,
        }
    }

    /// Moves the operation out for a run, leaving an `in_progress` snapshot.
    pub(crate) fn detach(&mut self, now: DateTime<Utc>) -> Option<Box<dyn Operation>> {
        let OperationSlot::Idle(operation) = &self.slot else {
            return None;
        };
        let mut snapshot = operation.info();
        snapshot.status = OperationStatus::InProgress;
        snapshot.started_at.get_or_insert(now);
        match std::mem::replace(&mut self.slot, OperationSlot::Detached(Box::new(snapshot))) {
            OperationSlot::Idle(operation) => {
                self.state = EntryState::Running;
                Some(operation)
            }
            OperationSlot::Detached(_) => None,
        }
    }

    pub(crate) fn attach(&mut self, operation: Box<dyn Operation>, state: EntryState) {
        self.slot = OperationSlot::Idle(operation);
        self.state = state;
    }

    /// Closes a run whose operation was lost; the snapshot turns `failed`.
    pub(crate) fn abandon(&mut self, now: DateTime<Utc>) {
        if let OperationSlot::Detached(snapshot) = &mut self.slot {
            snapshot.status = OperationStatus::Failed;
            snapshot.finished_at.get_or_insert(now);
        }
        self.state = EntryState::Executed;
    }

    #[must_use]
    pub fn info(&self) -> OperationInfo {
        match &self.slot {
            OperationSlot::Idle(operation) => operation.info(),
            OperationSlot::Detached(snapshot) => snapshot.as_ref().clone(),
        }
    }

    #[must_use]
    pub fn status(&self) -> OperationStatus {
        match &self.slot {
            OperationSlot::Idle(operation) => operation.status(),
            OperationSlot::Detached(snapshot) => snapshot.status,
        }
    }

    #[must_use]
    pub fn summary(&self) -> ScheduledSummary {
        let info = self.info();
        ScheduledSummary {
            id: self.id.clone(),
            operation_type: self.op_type,
            name: info.name.clone(),
            kind: info.kind,
            status: info.status,
            state: self.state,
            created_at: self.created_at,
            scheduled_at: self.scheduled_at,
            estimated_minutes: info.estimated_minutes,
            estimated_cost: info.estimated_cost,
            progress: info.progress,
            context: self.context.clone(),
            info,
        }
    }
}

impl fmt::Debug for ScheduledOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledOperation")
            .field("id", &self.id)
            .field("op_type", &self.op_type)
            .field("state", &self.state)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Read-only view of a scheduled entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSummary {
    pub id: OperationId,
    pub operation_type: OperationType,
    pub name: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub estimated_minutes: i64,
    pub estimated_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    pub context: ProductionContext,
    pub info: OperationInfo,
}

/// Catalogue metadata for one operation type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeInfo {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub name: String,
    pub description: String,
    pub kind: OperationKind,
    pub estimated_minutes: i64,
    pub estimated_cost: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowDetails>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<&'static str>,
}
