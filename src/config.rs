//! Runtime settings, read from flags or the environment (a `.env` file is
//! loaded first by the binary).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use reqwest::Url;

/// Where the feed lives and how it is polled.
#[derive(Debug, Clone, Args)]
pub struct FeedConfig {
    /// GTFS-RT vehicle positions endpoint
    #[arg(long, env = "GTFS_RT_URL")]
    pub feed_url: Url,

    /// Upper bound on one whole fetch, connect through body
    #[arg(long, env = "GTFS_RT_TIMEOUT", default_value_t = 10)]
    pub fetch_timeout_secs: u64,
}

impl FeedConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Everything `serve` needs.
#[derive(Debug, Clone, Args)]
pub struct ServeConfig {
    #[command(flatten)]
    pub feed: FeedConfig,

    /// Seconds between scheduled refreshes
    #[arg(long, env = "GTFS_RT_REFRESH_INTERVAL", default_value_t = 15)]
    pub refresh_interval_secs: u64,

    /// Seconds a served snapshot is advertised as fresh
    #[arg(long, env = "GTFS_RT_TTL", default_value_t = 15)]
    pub snapshot_ttl_secs: u64,

    /// Address for the HTTP query surface
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Directory holding stops.csv and routes.geojson
    #[arg(long, env = "STATIC_DATA_DIR")]
    pub static_dir: Option<PathBuf>,
}

impl ServeConfig {
    pub fn refresh_interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }
}
