//! HTTP handlers and the state they share.

pub mod health;
pub mod operations;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use operations::{
    cancel_handler, create_handler, execute_handler, history_handler, list_handler,
    statistics_handler, status_handler, type_info_handler, types_handler,
};

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::service::OperationRegistry;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// The registry handle is cheap to clone and only locks for bookkeeping, so
/// queries stay responsive while executions pace their stages.
#[derive(Clone)]
pub struct AppState {
    pub registry: OperationRegistry,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Used for uptime.
    pub start_time: Instant,
}
