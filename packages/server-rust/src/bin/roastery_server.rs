use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use roastery_core::{PacingConfig, SystemClock};
use roastery_server::{NetworkConfig, NetworkModule, OperationRegistry, RegistryConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "roastery-server", about = "Coffee production operation server")]
struct Args {
    #[arg(long, env = "ROASTERY_HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "ROASTERY_PORT", default_value_t = 3000)]
    port: u16,
    /// Comma-separated allowed CORS origins.
    #[arg(long, env = "ROASTERY_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,
    #[arg(long, env = "ROASTERY_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    request_timeout_secs: u64,
    /// Real milliseconds paused per simulated production minute.
    #[arg(long, env = "ROASTERY_MILLIS_PER_MINUTE", default_value_t = 1000)]
    millis_per_minute: u64,
    #[arg(long, env = "ROASTERY_HISTORY_LIMIT", default_value_t = 100)]
    history_limit: usize,
    /// Emit JSON log lines.
    #[arg(long, env = "ROASTERY_LOG_JSON")]
    log_json: bool,
    /// Used when `RUST_LOG` is unset.
    #[arg(long, env = "ROASTERY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            ..NetworkConfig::default()
        }
    }

    fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            pacing: PacingConfig {
                millis_per_minute: self.millis_per_minute,
            },
            default_history_limit: self.history_limit,
        }
    }
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if args.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = installed {
        eprintln!("tracing subscriber already installed: {err}");
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let registry = OperationRegistry::new(args.registry_config(), Arc::new(SystemClock));
    let mut module = NetworkModule::new(args.network_config(), registry);
    let port = module.start().await?;
    info!(port, millis_per_minute = args.millis_per_minute, "roastery server ready");

    module.serve(shutdown_signal()).await
}
