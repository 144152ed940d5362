use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::scan_types::{DEFAULT_AVAILABILITY_API, ScanError, Snapshot};

/// Settings for talking to recreation.gov
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Campground page base; the referer is this plus the campground id
    pub website: String,

    /// Base URL of the month availability endpoint, used to build request URLs
    pub availability_api: String,

    /// Per-request timeout (default: 30 seconds)
    pub timeout: Duration,

    /// Browser-like headers sent with every availability request
    pub headers: Vec<(String, String)>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            website: "https://www.recreation.gov/camping/campgrounds/".to_string(),
            availability_api: DEFAULT_AVAILABILITY_API.to_string(),
            timeout: Duration::from_secs(30),
            headers: [
                ("authority", "www.recreation.gov"),
                ("accept", "application/json, text/plain, */*"),
                ("accept-language", "en-US,en;q=0.9"),
                ("cache-control", "no-cache, no-store, must-revalidate"),
                ("pragma", "no-cache"),
                ("sec-fetch-dest", "empty"),
                ("sec-fetch-mode", "cors"),
                ("sec-fetch-site", "same-origin"),
                ("sec-gpc", "1"),
                (
                    "user-agent",
                    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
                ),
            ]
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        }
    }
}

impl FetchConfig {
    /// Referer sent when fetching a campground's availability
    pub fn referer(&self, campground_id: &str) -> String {
        format!("{}{}", self.website, campground_id)
    }
}

/// Source of raw availability payloads
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Perform one GET against `target` and return the raw body
    async fn fetch(&self, target: &str, referer: &str) -> Result<Vec<u8>, ScanError>;
}

/// Client for the recreation.gov internal availability API
pub struct RecGovClient {
    client: Client,
}

impl RecGovClient {
    /// Create a new recreation.gov API client
    pub fn new(config: &FetchConfig) -> Result<Self, ScanError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ScanError::ConfigError(format!("Invalid header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ScanError::ConfigError(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ScanError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for RecGovClient {
    async fn fetch(&self, target: &str, referer: &str) -> Result<Vec<u8>, ScanError> {
        debug!("Making request to: {}", target);

        let response = self
            .client
            .get(target)
            .header(REFERER, referer)
            .send()
            .await
            .map_err(|e| ScanError::Fetch(format!("HTTP request failed: {}", e)))?;

        debug!("API response status: {}", response.status());

        if !response.status().is_success() {
            let status = response.status();
            warn!("API request to {} failed with status {}", target, status);

            return match status.as_u16() {
                429 => Err(ScanError::RateLimited),
                _ => Err(ScanError::Fetch(format!("HTTP {}", status))),
            };
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ScanError::Fetch(format!("Failed to read response body: {}", e)))?;

        Ok(body.to_vec())
    }
}

/// Response structure from recreation.gov internal availability API
#[derive(Debug, Deserialize)]
pub struct RecGovInternalAvailabilityResponse {
    /// Per-campsite availability, keyed by campsite id
    pub campsites: HashMap<String, CampsiteAvailabilityData>,
}

/// Campsite availability data from internal API
#[derive(Debug, Deserialize)]
pub struct CampsiteAvailabilityData {
    /// Timestamp (`2024-06-01T00:00:00Z`) to status string
    pub availabilities: HashMap<String, String>,
    /// Campsite id as echoed by the API
    #[serde(rename = "campsite_id")]
    pub campsite_id: Option<String>,
}

/// Normalize a raw availability payload into a snapshot.
///
/// Only the literal status `"Available"` counts as available. The date is the
/// part of the timestamp before the first `T`.
pub fn decode_availability(body: &[u8]) -> Result<Snapshot, ScanError> {
    let response: RecGovInternalAvailabilityResponse = serde_json::from_slice(body)
        .map_err(|e| ScanError::Decode(format!("Failed to parse response: {}", e)))?;

    let mut snapshot = Snapshot::new();

    for (campsite_id, data) in response.campsites {
        for (timestamp, status) in data.availabilities {
            let day = timestamp.split('T').next().unwrap_or_default();
            let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
                .map_err(|_| ScanError::Decode(format!("Invalid date: {}", timestamp)))?;

            snapshot.set(date, campsite_id.clone(), status == "Available");
        }
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_decode_availability() {
        let body = br#"{
            "campsites": {
                "101": {
                    "campsite_id": "101",
                    "availabilities": {
                        "2024-06-01T00:00:00Z": "Available",
                        "2024-06-02T00:00:00Z": "Reserved"
                    }
                },
                "102": {
                    "availabilities": {
                        "2024-06-01T00:00:00Z": "Not Available",
                        "2024-06-02": "Available"
                    }
                }
            }
        }"#;

        let snapshot = decode_availability(body).unwrap();

        assert_eq!(snapshot.len(), 2);
        let first = snapshot.get(&date("2024-06-01")).unwrap();
        assert_eq!(first.get("101"), Some(&true));
        assert_eq!(first.get("102"), Some(&false));
        let second = snapshot.get(&date("2024-06-02")).unwrap();
        assert_eq!(second.get("101"), Some(&false));
        assert_eq!(second.get("102"), Some(&true));
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        assert!(matches!(
            decode_availability(b"<html>blocked</html>"),
            Err(ScanError::Decode(_))
        ));
        assert!(matches!(
            decode_availability(br#"{"campsites": {"1": {"availabilities": {"soon": "Available"}}}}"#),
            Err(ScanError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_empty_campsites() {
        let snapshot = decode_availability(br#"{"campsites": {}}"#).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_referer_and_client_creation() {
        let config = FetchConfig::default();
        assert_eq!(
            config.referer("232447"),
            "https://www.recreation.gov/camping/campgrounds/232447"
        );
        assert!(RecGovClient::new(&config).is_ok());

        let bad = FetchConfig {
            headers: vec![("bad header".to_string(), "x".to_string())],
            ..FetchConfig::default()
        };
        assert!(matches!(
            RecGovClient::new(&bad),
            Err(ScanError::ConfigError(_))
        ));
    }
}
