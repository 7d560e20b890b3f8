//! Herald gateway binary.

use herald::config::{AppConfig, PodsConfig};
use herald::mirror::WorkerPool;
use herald::service::{HeraldService, HeraldServiceBuilder};

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "herald", about = "S3-compatible gateway for S3 and Swift backends")]
struct Args {
    /// Path to the main YAML config (falls back to CONFIG_FILE_PATH, then
    /// herald.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Optional orchestration peers file
    #[arg(long, default_value = "pods.yaml")]
    pods: PathBuf,

    /// Overrides the configured listen port
    #[arg(long)]
    port: Option<u16>,

    /// Overrides the configured listen address
    #[arg(long)]
    address: Option<String>,
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    // RUST_LOG wins; LOG_LEVEL is the legacy spelling
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            std::env::var("LOG_LEVEL").map(|level| EnvFilter::new(format!("herald={level}")))
        })
        .unwrap_or_else(|_| EnvFilter::new("herald=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> Result<AppConfig, Box<dyn std::error::Error + Send + Sync>> {
    let path = AppConfig::resolve_path(args.config.as_deref());
    info!(path = %path.display(), "loading configuration");
    let mut config = AppConfig::load(&path)?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref address) = args.address {
        config.address.clone_from(address);
    }

    let pods = PodsConfig::load_optional(&args.pods)?;
    if !pods.pods.is_empty() {
        info!(peers = pods.pods.len(), "orchestration peers declared");
    }

    if std::env::var("SENTRY_DSN").is_ok_and(|v| !v.is_empty()) {
        info!("SENTRY_DSN is set; error events are logged for an external forwarder");
    }

    Ok(config)
}

async fn serve(service: HeraldService, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "herald listening");

    let graceful = GracefulShutdown::new();
    let http_server = ConnBuilder::new(TokioExecutor::new());
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(x) => x,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                };
                let service = service.clone();
                let io = TokioIo::new(stream);
                let conn = http_server.serve_connection_with_upgrades(io, service);
                let fut = graceful.watch(conn.into_owned());
                tokio::spawn(async move {
                    if let Err(err) = fut.await {
                        tracing::debug!(%peer, "connection closed: {err}");
                    }
                });
            }
            _ = ctrl_c.as_mut() => {
                info!("shutdown signal received, draining connections");
                break;
            }
        }
    }

    graceful.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    setup_tracing();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "configuration is invalid");
            std::process::exit(1);
        }
    };

    let addr: SocketAddr = match format!("{}:{}", config.address, config.port).parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(%err, "invalid listen address");
            std::process::exit(1);
        }
    };

    let service = match HeraldServiceBuilder::new(config).build() {
        Ok(service) => service,
        Err(err) => {
            error!(%err, "failed to build the gateway");
            std::process::exit(1);
        }
    };

    let workers = WorkerPool::spawn(service.context());

    if let Err(err) = serve(service, addr).await {
        error!(%err, "server failed");
        std::process::exit(1);
    }

    workers.shutdown().await;
    info!("herald stopped");
}
