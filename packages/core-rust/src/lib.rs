//! Roastery Core: composite production operations for a coffee roastery.
//!
//! Leaf stages (roasting, grinding, packaging) and composite workflows share
//! the [`Operation`] contract. Composites run children sequentially, threading
//! an immutable [`ProductionContext`] from one stage to the next.

pub mod clock;
pub mod composite;
pub mod context;
pub mod error;
pub mod leaf;
pub mod operation;
pub mod stages;
pub mod workflow;

pub use clock::{Clock, ExecutionEnv, ManualClock, PacingConfig, SystemClock};
pub use composite::{CompositeOperation, Sequential, Surcharge, WorkflowDetails, WorkflowPolicy};
pub use context::{GrainType, PrepStyle, ProductionContext, QualityControl, Stage, UnknownName};
pub use error::{StageError, Validation, Violation};
pub use leaf::SimpleOperation;
pub use operation::{
    ChildFailure, CompositeSummary, ExecutionOutcome, Operation, OperationHeader, OperationInfo,
    OperationKind, OperationStatus, OutcomeDetail, Progress,
};
pub use stages::{StageProcess, StageReport};
pub use workflow::{FullBatch, SpecialProcess, SpecialVariant};
