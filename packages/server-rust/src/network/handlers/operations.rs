//! Operation endpoints.
//!
//! Every response is a JSON envelope: `{success, message, data}` on success,
//! `{success: false, error, message, errors}` on failure.

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use roastery_core::{ExecutionOutcome, ProductionContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::AppState;
use crate::service::{
    HistoryFilter, HistoryRecord, OperationConfig, OperationId, OperationType, RegistryError,
    ScheduledSummary, Statistics, TypeInfo,
};

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

fn respond<T>(message: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: message.into(),
        data,
    })
}

/// Error envelope with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: &'static str,
    pub message: String,
    pub errors: Vec<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "invalid_request",
            message: message.into(),
            errors: Vec::new(),
        }
    }

    fn unavailable() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: "shutting_down",
            message: "server is not accepting new work".to_string(),
            errors: Vec::new(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let (status, error) = match &err {
            RegistryError::UnknownOperationType { .. } => {
                (StatusCode::BAD_REQUEST, "unknown_operation_type")
            }
            RegistryError::UnknownVariant { .. } => (StatusCode::BAD_REQUEST, "unknown_variant"),
            RegistryError::ValidationFailed { .. } => {
                (StatusCode::BAD_REQUEST, "validation_failed")
            }
            RegistryError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            RegistryError::CannotCancelRunning { .. } => {
                (StatusCode::CONFLICT, "cannot_cancel_running")
            }
            RegistryError::AlreadyExecuted { .. } => (StatusCode::CONFLICT, "already_executed"),
            RegistryError::AlreadyRunning { .. } => (StatusCode::CONFLICT, "already_running"),
            RegistryError::Execution(_) => (StatusCode::INTERNAL_SERVER_ERROR, "execution_failed"),
            RegistryError::Interrupted { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "execution_interrupted")
            }
        };
        let errors = match &err {
            RegistryError::ValidationFailed { errors } => errors.clone(),
            _ => Vec::new(),
        };
        Self {
            status,
            error,
            message: err.to_string(),
            errors,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(error = self.error, message = %self.message, "request failed");
        }
        let body = json!({
            "success": false,
            "error": self.error,
            "message": self.message,
            "errors": self.errors,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Body of `POST /operations`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequest {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub config: OperationConfig,
    pub context: ProductionContext,
}

/// `POST /operations`: create and schedule, 201 on success.
///
/// # Errors
///
/// 400 for an unknown type or variant, a malformed body or a rejected
/// context; 503 while shutting down.
pub async fn create_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<ScheduledSummary>>), ApiError> {
    if !state.shutdown.is_accepting() {
        return Err(ApiError::unavailable());
    }
    let Json(request) = payload?;

    let registry = &state.registry;
    let handle = registry.create_by_name(&request.op_type, &request.config)?;
    let id = registry.schedule(handle, request.context)?;
    let summary = registry.status(&id)?;
    Ok((
        StatusCode::CREATED,
        respond(format!("operation {id} scheduled"), summary),
    ))
}

/// `GET /operations`
pub async fn list_handler(State(state): State<AppState>) -> Json<ApiResponse<Vec<ScheduledSummary>>> {
    let scheduled = state.registry.list_scheduled();
    respond(format!("{} scheduled operations", scheduled.len()), scheduled)
}

/// `GET /operations/types`
pub async fn types_handler(State(state): State<AppState>) -> Json<ApiResponse<Vec<TypeInfo>>> {
    let types = state.registry.available_types();
    respond("available operation types", types)
}

/// `GET /operations/types/{type}`
///
/// # Errors
///
/// 400 for an unknown type name.
pub async fn type_info_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<TypeInfo> {
    let op_type = name.parse::<OperationType>()?;
    let info = state.registry.type_info(op_type);
    Ok(respond(format!("operation type {op_type}"), info))
}

/// `GET /operations/history?type=&status=&from=&to=&limit=`
///
/// # Errors
///
/// 400 for a malformed query string.
pub async fn history_handler(
    State(state): State<AppState>,
    query: Result<Query<HistoryFilter>, QueryRejection>,
) -> ApiResult<Vec<HistoryRecord>> {
    let Query(filter) = query?;
    let records = state.registry.history(&filter);
    Ok(respond(format!("{} history records", records.len()), records))
}

/// `GET /operations/statistics`
pub async fn statistics_handler(State(state): State<AppState>) -> Json<ApiResponse<Statistics>> {
    let statistics = state.registry.statistics();
    respond("execution statistics", statistics)
}

/// `GET /operations/{id}`
///
/// # Errors
///
/// 404 when the id is not scheduled.
pub async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ScheduledSummary> {
    let id = OperationId::from(id);
    let summary = state.registry.status(&id)?;
    Ok(respond(format!("operation {id}"), summary))
}

/// `POST /operations/{id}/execute`: runs with the body's context, or with the
/// context stored at schedule time when the body is empty.
///
/// The run happens on its own task and is tracked for shutdown drain, so a
/// request that times out or disconnects does not abort it.
///
/// # Errors
///
/// 400 for a malformed body or rejected context, 404 for an unknown id,
/// 409 when already executed or running, 500 when the operation fails at
/// runtime, 503 while shutting down.
pub async fn execute_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<ExecutionOutcome> {
    if !state.shutdown.is_accepting() {
        return Err(ApiError::unavailable());
    }
    let id = OperationId::from(id);
    let context = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let context: ProductionContext = serde_json::from_slice(&body)
            .map_err(|err| ApiError::bad_request(format!("invalid context: {err}")))?;
        Some(context)
    };

    let execution = state.registry.start_execution(&id, context)?;
    let guard = state.shutdown.track_execution(id.clone());
    let outcome = execution.spawn(guard).await?;
    Ok(respond(
        format!("operation {id} finished: {}", outcome.status),
        outcome,
    ))
}

/// `DELETE /operations/{id}`
///
/// # Errors
///
/// 404 for an unknown id, 409 while the operation is running.
pub async fn cancel_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let id = OperationId::from(id);
    let cancelled = state.registry.cancel(&id)?;
    if !cancelled {
        return Err(RegistryError::NotFound { id }.into());
    }
    Ok(respond(
        format!("operation {id} cancelled"),
        json!({ "id": id, "cancelled": true }),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use roastery_core::{ManualClock, OperationStatus, PacingConfig, StageError, SystemClock};

    use super::*;
    use crate::network::{NetworkConfig, ShutdownController};
    use crate::service::{EntryState, OperationRegistry, RegistryConfig};

    fn test_state() -> AppState {
        let state = AppState {
            registry: OperationRegistry::new(
                RegistryConfig::default(),
                Arc::new(ManualClock::default()),
            ),
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(NetworkConfig::default()),
            start_time: Instant::now(),
        };
        state.shutdown.set_ready();
        state
    }

    fn request(op_type: &str, context: serde_json::Value) -> CreateRequest {
        serde_json::from_value(json!({ "type": op_type, "context": context })).unwrap()
    }

    async fn create(state: &AppState, op_type: &str, grams: u32) -> String {
        let (status, Json(body)) = create_handler(
            State(state.clone()),
            Ok(Json(request(
                op_type,
                json!({ "cantidadGramos": grams, "tipoGrano": "Arabico" }),
            ))),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        body.data.id.to_string()
    }

    #[tokio::test]
    async fn create_schedules_and_reports_summary() {
        let state = test_state();
        let id = create(&state, "fullBatch", 1000).await;

        let Json(body) = status_handler(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert!(body.success);
        assert_eq!(body.data.operation_type, OperationType::FullBatch);
        assert_eq!(body.data.estimated_minutes, 75);

        let Json(list) = list_handler(State(state)).await;
        assert_eq!(list.data.len(), 1);
    }

    #[tokio::test]
    async fn create_maps_errors_to_status_codes() {
        let state = test_state();
        let err = create_handler(
            State(state.clone()),
            Ok(Json(request("blend", json!({ "cantidadGramos": 500, "tipoGrano": "Arabico" })))),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.error, "unknown_operation_type");

        let err = create_handler(
            State(state.clone()),
            Ok(Json(request("roast", json!({ "cantidadGramos": 0, "tipoGrano": "" })))),
        )
        .await
        .unwrap_err();
        assert_eq!(err.error, "validation_failed");
        assert_eq!(err.errors.len(), 2);
        assert_eq!(state.registry.scheduled_count(), 0);
    }

    #[tokio::test]
    async fn create_accepts_special_variant_config() {
        let state = test_state();
        let payload: CreateRequest = serde_json::from_value(json!({
            "type": "specialProcess",
            "config": { "tipoProceso": "artesanal" },
            "context": { "cantidadGramos": 1000, "tipoGrano": "Catuai" }
        }))
        .unwrap();
        let (_, Json(body)) = create_handler(State(state), Ok(Json(payload)))
            .await
            .unwrap();
        assert_eq!(body.data.name, "Special Process - artesanal");
    }

    #[tokio::test]
    async fn execute_uses_stored_context_when_body_is_empty() {
        let state = test_state();
        let id = create(&state, "roast", 500).await;

        let Json(body) = execute_handler(State(state.clone()), Path(id.clone()), Bytes::new())
            .await
            .unwrap();
        assert_eq!(body.data.status, OperationStatus::Completed);
        assert_eq!(body.data.output.grams, 410);

        let Json(summary) = status_handler(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(summary.data.state, EntryState::Executed);

        let err = execute_handler(State(state), Path(id), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn execute_accepts_override_context() {
        let state = test_state();
        let id = create(&state, "roast", 500).await;
        let body = Bytes::from(r#"{"cantidadGramos": 1000, "tipoGrano": "Bourbon"}"#);

        let Json(response) = execute_handler(State(state), Path(id), body).await.unwrap();
        assert_eq!(response.data.output.grams, 850);
    }

    #[tokio::test]
    async fn execute_rejects_bad_input() {
        let state = test_state();
        let id = create(&state, "roast", 500).await;

        let err = execute_handler(State(state.clone()), Path(id.clone()), Bytes::from("{oops"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = execute_handler(
            State(state.clone()),
            Path(id),
            Bytes::from(r#"{"cantidadGramos": 500, "tipoGrano": "Robusta"}"#),
        )
        .await
        .unwrap_err();
        assert_eq!(err.error, "validation_failed");

        let err = execute_handler(State(state), Path("op_missing".to_string()), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_request_leaves_run_to_finish() {
        let mut state = test_state();
        state.registry = OperationRegistry::new(
            RegistryConfig {
                pacing: PacingConfig {
                    millis_per_minute: 50,
                },
                ..RegistryConfig::default()
            },
            Arc::new(SystemClock),
        );
        let id = create(&state, "roast", 500).await;

        let request = execute_handler(State(state.clone()), Path(id.clone()), Bytes::new());
        assert!(tokio::time::timeout(Duration::from_millis(20), request)
            .await
            .is_err());
        assert_eq!(
            state.shutdown.active_executions(),
            vec![OperationId::from(id.as_str())]
        );

        let err = cancel_handler(State(state.clone()), Path(id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
        let err = execute_handler(State(state.clone()), Path(id.clone()), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.error, "already_running");

        assert!(state.shutdown.wait_for_drain(Duration::from_secs(60)).await);
        let Json(summary) = status_handler(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(summary.data.state, EntryState::Executed);
        assert_eq!(summary.data.status, OperationStatus::Completed);
        assert_eq!(state.registry.statistics().total, 1);

        let Json(body) = cancel_handler(State(state), Path(id)).await.unwrap();
        assert_eq!(body.data["cancelled"], true);
    }

    #[tokio::test]
    async fn draining_server_refuses_new_work() {
        let state = test_state();
        let id = create(&state, "grind", 500).await;
        state.shutdown.trigger_shutdown();

        let err = execute_handler(State(state), Path(id), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn cancel_removes_or_reports_missing() {
        let state = test_state();
        let id = create(&state, "grind", 500).await;

        let Json(body) = cancel_handler(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(body.data["cancelled"], true);

        let err = cancel_handler(State(state.clone()), Path(id)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let Json(history) = history_handler(
            State(state),
            Ok(Query(HistoryFilter {
                status: Some(OperationStatus::Cancelled),
                ..HistoryFilter::default()
            })),
        )
        .await
        .unwrap();
        assert_eq!(history.data.len(), 1);
    }

    #[tokio::test]
    async fn statistics_and_types_are_served() {
        let state = test_state();
        let id = create(&state, "grind", 500).await;
        execute_handler(State(state.clone()), Path(id), Bytes::new())
            .await
            .unwrap();

        let Json(stats) = statistics_handler(State(state.clone())).await;
        assert_eq!(stats.data.total, 1);
        assert!((stats.data.success_rate - 100.0).abs() < f64::EPSILON);

        let Json(types) = types_handler(State(state.clone())).await;
        assert_eq!(types.data.len(), 5);

        let Json(info) = type_info_handler(State(state.clone()), Path("grind".to_string()))
            .await
            .unwrap();
        assert_eq!(info.data.estimated_minutes, 15);

        let err = type_info_handler(State(state), Path("blend".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn execution_errors_map_to_500() {
        let err = ApiError::from(RegistryError::Execution(StageError::EmptyComposite));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error, "execution_failed");

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn running_cancel_maps_to_409() {
        let err = ApiError::from(RegistryError::CannotCancelRunning {
            id: OperationId::from("op_1"),
        });
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err = ApiError::from(RegistryError::AlreadyRunning {
            id: OperationId::from("op_1"),
        });
        assert_eq!((err.status, err.error), (StatusCode::CONFLICT, "already_running"));

        let err = ApiError::from(RegistryError::Interrupted {
            id: OperationId::from("op_1"),
            reason: "task panicked".to_string(),
        });
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
