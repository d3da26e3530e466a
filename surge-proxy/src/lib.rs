//! Surge Proxy Library
//!
//! HTTP front end for the surge scheduler. Every inbound request is admitted
//! into the scheduler, dispatched to the least loaded backend with spare
//! capacity, and answered with that backend's response.
//!
//! This library can be used either through the `surge-proxy` binary or by
//! embedding [`build_router`] in another axum application.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use surge_core::Scheduler;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

pub mod admission;
pub mod config;
pub mod error;
pub mod metrics;
pub mod refresher;
pub mod routes;
pub mod state;
pub mod transport;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use state::AppState;

/// Initialize Prometheus metrics registry.
/// Should be called once before starting the server.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register Prometheus metrics: {}", e);
    }
}

/// Build the HTTP router: health and metrics routes under the configured
/// prefix, everything else admitted
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.body_limit_bytes;

    // Health endpoints
    let introspection = Router::new()
        .route("/health", get(routes::health))
        .route("/live", get(routes::live))
        .route("/metrics", get(routes::metrics))
        .route("/metrics/prometheus", get(routes::metrics_prometheus));
    let router = match state.config.routes_prefix.as_str() {
        "" => introspection,
        prefix => Router::new().nest(prefix, introspection),
    };

    router
        // Admission
        .fallback(routes::admit)
        // Middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the priority refresher and bundle sweeper configured for `state`
pub fn spawn_background_tasks(state: &AppState) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut tasks = Vec::new();

    if state.config.priority.enabled {
        if let Some(lookup) = &state.config.priority.lookup {
            let client =
                reqwest::Client::builder().timeout(state.config.request_timeout()).build()?;
            let refresher =
                refresher::PriorityRefresher::new(client, lookup.clone(), state.scheduler.clone());
            tasks.push(refresher.spawn());
        }
    }

    if let Some(ttl) = state.scheduler.config().bundle_ttl {
        tasks.push(spawn_bundle_sweeper(state.scheduler.clone(), ttl));
    }

    Ok(tasks)
}

/// Periodically evict bundles that outlived `ttl`
pub fn spawn_bundle_sweeper(scheduler: Scheduler, ttl: Duration) -> JoinHandle<()> {
    let period = (ttl / 2).max(Duration::from_millis(100));
    tokio::spawn(async move {
        debug!(period_ms = period.as_millis() as u64, "Starting bundle sweeper");
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = scheduler.evict_stale_bundles();
            if !evicted.is_empty() {
                metrics::observe_scheduler(&scheduler.stats());
            }
        }
    })
}

/// Run the surge proxy server.
///
/// This function starts the HTTP server and blocks until it's shut down.
///
/// # Example
/// ```no_run
/// use surge_proxy::{run_server, ProxyConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ProxyConfig {
///         destination_servers: vec!["127.0.0.1:8080".to_string()],
///         ..Default::default()
///     };
///     run_server(config).await
/// }
/// ```
pub async fn run_server(config: ProxyConfig) -> anyhow::Result<()> {
    init_metrics();

    info!(
        port = config.port,
        backends = config.destination_servers.len(),
        "Starting Surge Proxy v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = Arc::new(AppState::new(config.clone())?);
    let _tasks = spawn_background_tasks(&state)?;
    let app = build_router(state.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Surge Proxy listening on http://{}", addr);
    print_banner(&config);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Print the startup banner
fn print_banner(config: &ProxyConfig) {
    println!();
    println!("==================================================");
    println!("  Surge Proxy v{}", env!("CARGO_PKG_VERSION"));
    println!("==================================================");
    println!("  Listening on: http://0.0.0.0:{}", config.port);
    println!("  Backends ({}):", config.scheme());
    for server in &config.destination_servers {
        println!("    - {}", server);
    }
    println!();
    println!("  Scheduling:");
    println!("    Max requests per backend: {}", config.max_requests_per_server);
    println!("    Debounce window: {} ms", config.debounce_ms);
    println!(
        "    Tie breaking: {}",
        if config.randomize_ties { "random" } else { "first listed" }
    );
    println!("    Priority: {:?}", config.priority_mode());
    match config.bundle.ttl_secs {
        Some(ttl) => println!("    Bundle TTL: {}s", ttl),
        None => println!("    Bundle TTL: none"),
    }
    println!();
    println!("  Endpoints:");
    let prefix = &config.routes_prefix;
    println!("    Health: GET  {0}/health, {0}/live, {0}/metrics", prefix);
    println!("    Prometheus: GET {}/metrics/prometheus", prefix);
    println!("    Anything else is admitted and forwarded");
    println!("==================================================");
    println!();
}
