use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use campground_scan::{ScanConfig, ScanError};
use postgres::database::DEFAULT_DATABASE_URL;

/// Server settings read from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// PostgreSQL connection string (`DATABASE_URL`)
    pub database_url: String,
    /// Directory holding baseline and staged snapshots (`SNAPSHOT_DIR`)
    pub snapshot_dir: PathBuf,
    /// Address the HTTP server listens on (`BIND_ADDR`)
    pub bind_addr: String,
    /// Scan cycle tuning (`SCAN_INTERVAL_SECS`, `MAX_CONCURRENT_SCANS`)
    pub scan: ScanConfig,
}

impl ServerConfig {
    /// Read the configuration from process environment variables
    pub fn from_env() -> Result<Self, ScanError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ScanError> {
        let mut scan = ScanConfig::default();
        if let Some(secs) = parse::<u64>(&lookup, "SCAN_INTERVAL_SECS")? {
            scan.scan_interval = Duration::from_secs(secs);
        }
        if let Some(max) = parse::<usize>(&lookup, "MAX_CONCURRENT_SCANS")? {
            if max == 0 {
                return Err(ScanError::ConfigError(
                    "MAX_CONCURRENT_SCANS must be at least 1".to_string(),
                ));
            }
            scan.max_concurrent_requests = max;
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            snapshot_dir: lookup("SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./snapshots")),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            scan,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ScanError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ScanError::ConfigError(format!("Invalid {}: {}", name, value)))
        })
        .transpose()
}
