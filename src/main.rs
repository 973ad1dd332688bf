//! CLI entry point for the GTFS-RT vehicle map backend.
//!
//! `serve` runs the refresh loop and the HTTP query surface; `fetch` runs one
//! refresh cycle and reports it; `link-route-stops` exports the route-stop
//! index built from a static data directory.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gtfs_rt_map::{
    api::{self, AppState, PositionsResponse},
    config::{FeedConfig, ServeConfig},
    fetch::{BasicClient, HttpFeed},
    output::{print_summary, write_json, write_route_stops},
    scheduler::{RefreshOutcome, RefreshScheduler},
    snapshot::SnapshotStore,
    static_data::StaticCatalog,
    swap::Published,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_map")]
#[command(about = "Serves live GTFS-RT vehicle positions alongside static stops and routes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed and serve positions, stops and routes over HTTP
    Serve(ServeConfig),
    /// Run one refresh cycle and report what it produced
    Fetch {
        #[command(flatten)]
        feed: FeedConfig,

        /// Print the positions as served by /realtime/positions/
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Only print vehicles on this route
        #[arg(long, requires = "json")]
        route_id: Option<String>,

        /// Seconds used for the `expires` field of the printed positions
        #[arg(long, env = "GTFS_RT_TTL", default_value_t = 15)]
        snapshot_ttl_secs: u64,
    },
    /// Build the route-stop index from static data and export it as CSV
    LinkRouteStops {
        /// Directory holding stops.csv and routes.geojson
        #[arg(long, env = "STATIC_DATA_DIR")]
        static_dir: PathBuf,

        /// CSV file to write (replaced if it exists)
        #[arg(short, long, default_value = "route_stops.csv")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_map.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_map.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(config) => serve(config).await?,
        Commands::Fetch {
            feed,
            json,
            route_id,
            snapshot_ttl_secs,
        } => {
            let scheduler = scheduler_for(&feed)?;
            match scheduler.refresh().await {
                RefreshOutcome::Success(snapshot) => {
                    if let Some(stats) = scheduler.status().last_stats {
                        print_summary(&stats);
                    }
                    if json {
                        let ttl = std::time::Duration::from_secs(snapshot_ttl_secs);
                        let body = PositionsResponse::new(&snapshot, ttl, route_id.as_deref());
                        write_json(std::io::stdout().lock(), &body)?;
                    }
                }
                RefreshOutcome::Failed(failure) => {
                    if let Some(stats) = scheduler.status().last_stats {
                        print_summary(&stats);
                    }
                    bail!(failure);
                }
                RefreshOutcome::Coalesced => bail!("another refresh was already in flight"),
            }
        }
        Commands::LinkRouteStops { static_dir, output } => {
            let catalog = StaticCatalog::load(&static_dir)?;
            info!(
                stops = catalog.stops.len(),
                routes = catalog.routes.len(),
                index_source = ?catalog.index_source,
                "Static data loaded"
            );
            write_route_stops(&output, &catalog.index)?;
        }
    }

    Ok(())
}

fn scheduler_for(feed: &FeedConfig) -> Result<RefreshScheduler> {
    let client = BasicClient::new().context("building HTTP client")?;
    let source = HttpFeed::new(client, feed.feed_url.clone(), feed.fetch_timeout());
    Ok(RefreshScheduler::new(Arc::new(source), SnapshotStore::new()))
}

/// Loads static data, then runs the refresh loop and HTTP server until Ctrl-C.
#[tracing::instrument(skip_all, fields(listen = %config.listen, feed_url = %config.feed.feed_url))]
async fn serve(config: ServeConfig) -> Result<()> {
    let catalog = Arc::new(Published::empty());
    match config.static_dir.clone() {
        Some(dir) => {
            let loaded = tokio::task::spawn_blocking(move || StaticCatalog::load(&dir))
                .await
                .context("static data loader panicked")??;
            info!(
                stops = loaded.stops.len(),
                routes = loaded.routes.len(),
                route_stops = loaded.index.len(),
                index_source = ?loaded.index_source,
                "Static data loaded"
            );
            catalog.publish(loaded);
        }
        None => warn!("No static data directory configured, stop and route endpoints will return 503"),
    }

    let scheduler = Arc::new(scheduler_for(&config.feed)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh_loop = tokio::spawn(Arc::clone(&scheduler).run(
        config.refresh_interval(),
        wait_for_shutdown(shutdown_rx),
    ));

    let state = AppState::new(
        scheduler,
        catalog,
        config.static_dir.clone(),
        config.snapshot_ttl(),
    );
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(addr = %config.listen, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("HTTP server failed")?;

    refresh_loop.await?;
    info!("Shut down cleanly");
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    // a dropped sender also means shutdown
    let _ = rx.wait_for(|stop| *stop).await;
}
