//! Gateway auth service
//!
//! Serves the gRPC health service behind the auth layer, plus the HTTP
//! surface (`/health`, `/metrics`, `/auth/validate`, `/auth/user`).

use common::config::{LogFormat, ObservabilityConfig};
use gateway_auth::auth::{HttpKeySource, KeySetCache, KeySource, TokenVerifier};
use gateway_auth::config::Config;
use gateway_auth::grpc::{GrpcAuthLayer, RequestInterceptor};
use gateway_auth::observability::metrics::init_metrics_recorder;
use gateway_auth::policy::PolicyEvaluator;
use gateway_auth::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Time given to the servers to finish in-flight calls after cancellation.
const SERVER_STOP_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration is read before tracing so LOG_FORMAT can apply
    let config = Config::from_env().inspect_err(|e| {
        eprintln!("Failed to load configuration: {e}");
    })?;

    init_tracing(&ObservabilityConfig {
        log_format: config.log_format,
        ..ObservabilityConfig::default()
    });

    info!("Starting gateway auth service");
    info!(
        region = %config.region,
        issuer = %config.issuer(),
        jwks_url = %config.jwks_url,
        bind_address = %config.bind_address,
        grpc_bind_address = %config.grpc_bind_address,
        jwks_fetch_timeout_seconds = config.jwks_fetch_timeout_seconds,
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to initialize metrics recorder");
        e
    })?;

    let source = HttpKeySource::new(config.jwks_url.clone(), config.jwks_fetch_timeout()).map_err(|e| {
        error!(error = %e, "Failed to build key set HTTP client");
        e
    })?;
    let key_cache = Arc::new(KeySetCache::new(Arc::new(source) as Arc<dyn KeySource>));

    // A failed warm-up is not fatal: the first token retries the fetch
    match key_cache.refresh().await {
        Ok(()) => info!(keys = key_cache.key_ids().await.len(), "Key set loaded"),
        Err(e) => warn!(error = %e, "Initial key set fetch failed, will retry on first token"),
    }

    let verifier = Arc::new(TokenVerifier::from_config(&config, Arc::clone(&key_cache)));
    let policy = Arc::new(PolicyEvaluator::default_storefront().map_err(|e| {
        error!(error = %e, "Invalid authorization policy");
        e
    })?);
    let interceptor = RequestInterceptor::new(Arc::clone(&verifier), policy);

    let http_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        e
    })?;
    let grpc_addr: SocketAddr = config.grpc_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.grpc_bind_address, "Invalid gRPC bind address");
        e
    })?;

    let drain_period = config.drain_period();
    let state = Arc::new(AppState { config, verifier });
    let app = routes::build_routes(state, metrics_handle);

    let shutdown_token = CancellationToken::new();

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(http_addr).await.map_err(|e| {
        error!(error = %e, addr = %http_addr, "Failed to bind HTTP server");
        e
    })?;

    let http_shutdown_token = shutdown_token.child_token();
    let http_task = tokio::spawn(async move {
        info!(addr = %http_addr, "HTTP server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            http_shutdown_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    let (_health_reporter, health_service) = tonic_health::server::health_reporter();

    let grpc_shutdown_token = shutdown_token.child_token();
    let grpc_server = tonic::transport::Server::builder()
        .layer(GrpcAuthLayer::new(interceptor))
        .add_service(health_service)
        .serve_with_shutdown(grpc_addr, async move {
            grpc_shutdown_token.cancelled().await;
            info!("gRPC server shutting down");
        });

    let grpc_task = tokio::spawn(async move {
        info!(addr = %grpc_addr, "gRPC server starting");
        if let Err(e) = grpc_server.await {
            error!(error = %e, "gRPC server failed");
        }
    });

    shutdown_signal(drain_period).await;

    // Propagates to the HTTP and gRPC servers
    shutdown_token.cancel();

    for (name, task) in [("http", http_task), ("grpc", grpc_task)] {
        if tokio::time::timeout(SERVER_STOP_GRACE, task).await.is_err() {
            warn!(server = name, "Server did not stop within grace period");
        }
    }

    info!("Gateway auth service shutdown complete");

    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_filter));

    let registry = tracing_subscriber::registry().with(filter);
    match observability.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain_period: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if drain_period.is_zero() {
        info!("Skipping drain period (DRAIN_SECONDS=0)");
    } else {
        warn!(seconds = drain_period.as_secs(), "Draining connections...");
        tokio::time::sleep(drain_period).await;
        info!("Drain period complete");
    }
}
