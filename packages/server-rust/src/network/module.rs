//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the TCP listener and
//! `serve()` accepts requests until the shutdown future resolves.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    cancel_handler, create_handler, execute_handler, health_handler, history_handler,
    list_handler, liveness_handler, readiness_handler, statistics_handler, status_handler,
    type_info_handler, types_handler, AppState,
};
use super::middleware::with_http_layers;
use super::shutdown::ShutdownController;
use crate::service::OperationRegistry;

/// Owns the listener and the state shared with handlers.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    registry: OperationRegistry,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl NetworkModule {
    /// Creates the module around `registry` without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, registry: OperationRegistry) -> Self {
        Self {
            config,
            listener: None,
            registry,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> OperationRegistry {
        self.registry.clone()
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    fn state(&self) -> AppState {
        AppState {
            registry: self.registry.clone(),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: self.start_time,
        }
    }

    /// Assembles the router with every route and the HTTP middleware.
    ///
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `GET|POST /operations`
    /// - `GET /operations/types`, `/operations/types/{type}`
    /// - `GET /operations/history`, `/operations/statistics`
    /// - `GET|DELETE /operations/{id}`
    /// - `POST /operations/{id}/execute`
    pub fn build_router(&self) -> Router {
        let routes = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/operations", get(list_handler).post(create_handler))
            .route("/operations/types", get(types_handler))
            .route("/operations/types/{type}", get(type_info_handler))
            .route("/operations/history", get(history_handler))
            .route("/operations/statistics", get(statistics_handler))
            .route("/operations/{id}", get(status_handler).delete(cancel_handler))
            .route("/operations/{id}/execute", post(execute_handler));
        with_http_layers(routes, &self.config).with_state(self.state())
    }

    /// Binds the listener and returns the bound port (OS-assigned when the
    /// configured port is 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "listener bound");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves requests until `shutdown` resolves, then drains in-flight
    /// executions for up to `drain_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server fails.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .context("start() must be called before serve()")?;
        let router = self.build_router();

        self.shutdown.set_ready();
        info!("serving HTTP");

        let controller = Arc::clone(&self.shutdown);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                controller.trigger_shutdown();
            })
            .await?;

        if self.shutdown.wait_for_drain(self.config.drain_timeout).await {
            info!("all executions drained");
        } else {
            warn!(
                running = self.registry.running_count(),
                "stopping with executions still running"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use roastery_core::{ManualClock, ProductionContext};

    use super::*;
    use crate::network::HealthState;
    use crate::service::{OperationConfig, OperationType, RegistryConfig};

    fn module() -> NetworkModule {
        let config = NetworkConfig {
            host: "127.0.0.1".to_string(),
            ..NetworkConfig::default()
        };
        let registry = OperationRegistry::new(RegistryConfig::default(), Arc::new(ManualClock::default()));
        NetworkModule::new(config, registry)
    }

    #[test]
    fn new_creates_module_without_binding() {
        let module = module();
        assert!(module.listener.is_none());
        assert_eq!(module.shutdown.health_state(), HealthState::Starting);
    }

    #[test]
    fn shared_handles_point_at_the_same_state() {
        let module = module();
        let handle = module.registry();
        let scheduled = handle
            .create(OperationType::Grind, &OperationConfig::default())
            .unwrap();
        handle
            .schedule(scheduled, ProductionContext::new(500, "Arabico"))
            .unwrap();
        assert_eq!(module.registry().scheduled_count(), 1);
        assert!(Arc::ptr_eq(
            &module.shutdown_controller(),
            &module.shutdown_controller()
        ));
    }

    #[test]
    fn build_router_creates_router() {
        let _router = module().build_router();
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = module();
        let port = module.start().await.unwrap();
        assert!(port > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let err = module()
            .serve(std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("start() must be called"));
    }

    #[tokio::test]
    async fn serve_stops_when_shutdown_resolves() {
        let mut module = module();
        module.start().await.unwrap();
        let controller = module.shutdown_controller();

        module.serve(async {}).await.unwrap();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }
}
