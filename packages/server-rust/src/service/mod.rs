//! Operation registry service.
//!
//! 1. **Catalogue** (`operation`): operation types, handles and registry errors
//! 2. **Registry** (`registry`): factory, scheduler and executor
//! 3. **History** (`history`): append-only execution records and statistics
//! 4. **Configuration** (`config`): pacing and query defaults

pub mod config;
pub mod history;
pub mod operation;
pub mod registry;

pub use config::RegistryConfig;
pub use history::{HistoryFilter, HistoryRecord, Statistics, TypeStatistics};
pub use operation::{
    EntryState, OperationConfig, OperationHandle, OperationId, OperationType, RegistryError,
    ScheduledSummary, TypeInfo,
};
pub use registry::{Execution, OperationRegistry};
