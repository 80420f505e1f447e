#![doc = include_str!("../README.md")]

mod server;

use accountd_core::proto::{FILE_DESCRIPTOR_SET, account_service_server::AccountServiceServer};
use clap::Parser;
use futures::Stream;
use server::config::{CliArgs, ServerConfig};
use server::metrics::Metrics;
use server::service::handler::UserService;
use server::store::{MemoryUserStore, SharedStore};
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    let store = build_store(&config).await?;

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(providers, store, incoming, config).await;
            // Best effort; a panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(providers, store, incoming, config).await
    }
}

#[cfg(feature = "postgres")]
async fn build_store(config: &ServerConfig) -> anyhow::Result<SharedStore> {
    use server::store::PgUserStore;

    match &config.database_url {
        Some(url) => {
            // One connection per bulk slot plus headroom for single-user RPCs.
            let max_connections = u32::try_from(config.concurrency_limit)
                .unwrap_or(u32::MAX)
                .saturating_add(4);
            let store = PgUserStore::connect(url, max_connections).await?;
            tracing::info!(max_connections, "Using PostgreSQL user store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory user store");
            Ok(Arc::new(MemoryUserStore::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_store(_config: &ServerConfig) -> anyhow::Result<SharedStore> {
    tracing::info!("Using in-memory user store");
    Ok(Arc::new(MemoryUserStore::new()))
}

async fn run_server_with_incoming<I, IO, IE>(
    providers: TelemetryProviders,
    store: SharedStore,
    incoming: I,
    config: ServerConfig,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<AccountServiceServer<UserService>>()
        .await;

    let metrics: Metrics = providers.metrics.clone();
    let service = UserService::new(config, store, metrics);

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_account_service(service.clone()))
        .serve_with_incoming_shutdown(
            incoming,
            shutdown_signal(service, health_reporter, providers),
        )
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting account service on {addr} with full config: {config:#?}");
    } else {
        tracing::info!(
            concurrency_limit = config.concurrency_limit,
            max_batch_size = config.max_batch_size,
            "Starting account service on {addr}"
        );
    }
}

fn build_account_service(service: UserService) -> AccountServiceServer<UserService> {
    AccountServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn shutdown_signal(
    service: UserService,
    health_reporter: HealthReporter,
    providers: TelemetryProviders,
) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    health_reporter
        .set_not_serving::<AccountServiceServer<UserService>>()
        .await;

    // Drain bulk batches before the transport stops accepting streams.
    service.shutdown().await;

    providers.shutdown();
}
