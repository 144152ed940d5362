use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Availability of every unit (campsite) on one date, keyed by unit id
pub type UnitAvailability = BTreeMap<String, bool>;

/// Dates whose availability changed for one request, with the unit map to re-evaluate
pub type DateChanges = BTreeMap<NaiveDate, UnitAvailability>;

/// Changes detected in one scan cycle, keyed by request id
pub type ChangeSet = BTreeMap<String, DateChanges>;

/// Default base URL of the month availability endpoint
pub const DEFAULT_AVAILABILITY_API: &str =
    "https://www.recreation.gov/api/camps/availability/campground";

/// Full per-date, per-unit availability state of one request at one point in time.
///
/// Each (date, unit) pair appears at most once. Serialized as a plain JSON
/// object `{"yyyy-mm-dd": {"unit": bool}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    dates: BTreeMap<NaiveDate, UnitAvailability>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the availability of a unit on a date, replacing any earlier value
    pub fn set(&mut self, date: NaiveDate, unit_id: impl Into<String>, available: bool) {
        self.dates
            .entry(date)
            .or_default()
            .insert(unit_id.into(), available);
    }

    /// Unit map for a date
    pub fn get(&self, date: &NaiveDate) -> Option<&UnitAvailability> {
        self.dates.get(date)
    }

    /// Iterate dates in calendar order
    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &UnitAvailability)> {
        self.dates.iter()
    }

    /// Number of dates in the snapshot
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Whether the snapshot holds no dates
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Parse a stored snapshot. Empty input is the snapshot of a never-scanned request.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScanError> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_slice(bytes)
            .map_err(|e| ScanError::Decode(format!("Invalid stored snapshot: {}", e)))
    }

    /// Serialize for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, ScanError> {
        serde_json::to_vec(self)
            .map_err(|e| ScanError::Persistence(format!("Failed to serialize snapshot: {}", e)))
    }
}

impl FromIterator<(NaiveDate, UnitAvailability)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (NaiveDate, UnitAvailability)>>(iter: T) -> Self {
        let mut snapshot = Snapshot::new();
        for (date, units) in iter {
            for (unit_id, available) in units {
                snapshot.set(date, unit_id, available);
            }
        }
        snapshot
    }
}

/// Identifier of one monitored campground month, formatted `<campground_id>_<yyyy-mm>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId {
    /// Campground (facility) id
    pub campground_id: String,
    /// First day of the monitored month
    pub month_start: NaiveDate,
}

impl RequestId {
    /// Build the id of the month containing `date`
    pub fn for_date(campground_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            campground_id: campground_id.into(),
            month_start: date.with_day(1).unwrap_or(date),
        }
    }

    /// Parse a `<campground_id>_<yyyy-mm>` request id
    pub fn parse(req_id: &str) -> Result<Self, ScanError> {
        let (campground_id, month) = req_id
            .rsplit_once('_')
            .ok_or_else(|| ScanError::InvalidRequestId(req_id.to_string()))?;

        if campground_id.is_empty() {
            return Err(ScanError::InvalidRequestId(req_id.to_string()));
        }

        let month_start = NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d")
            .map_err(|_| ScanError::InvalidRequestId(req_id.to_string()))?;

        Ok(Self {
            campground_id: campground_id.to_string(),
            month_start,
        })
    }

    /// Whether a date falls inside the monitored month
    pub fn contains(&self, date: &NaiveDate) -> bool {
        date.year() == self.month_start.year() && date.month() == self.month_start.month()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}",
            self.campground_id,
            self.month_start.format("%Y-%m")
        )
    }
}

/// One monitored (campground, year-month) pair, as kept in the active-requests collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRequest {
    /// Request id, `<campground_id>_<yyyy-mm>`
    pub req_id: String,
    /// Campground id, used to derive the referer
    pub campground_id: String,
    /// Fetch target for the month availability endpoint
    pub url: String,
    /// Last scan completed without error and its snapshot may be promoted
    pub update: bool,
    /// Days subscribers are interested in
    pub active_days: BTreeMap<NaiveDate, bool>,
}

impl ActiveRequest {
    /// Create a request for `req_id`, keeping only the active days inside its month
    pub fn new(
        req_id: &str,
        days: impl IntoIterator<Item = NaiveDate>,
        api_base: &str,
    ) -> Result<Self, ScanError> {
        let id = RequestId::parse(req_id)?;

        let active_days = days
            .into_iter()
            .filter(|date| id.contains(date))
            .map(|date| (date, true))
            .collect();

        let url = format!(
            "{}/{}/month?start_date={}T00:00:00.000Z",
            api_base.trim_end_matches('/'),
            id.campground_id,
            id.month_start.format("%Y-%m-%d")
        );

        Ok(Self {
            req_id: id.to_string(),
            campground_id: id.campground_id,
            url,
            update: false,
            active_days,
        })
    }
}

/// Custom error type for scan operations
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Transport-level failure talking to the source
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Rate limited by external API
    #[error("Rate limited by external API")]
    RateLimited,

    /// Malformed availability payload or stored snapshot
    #[error("Decode error: {0}")]
    Decode(String),

    /// Snapshot store read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A downstream consumer could not apply the change set
    #[error("Downstream update failed: {0}")]
    Downstream(String),

    /// The scan cycle was cancelled while the request was in flight
    #[error("Scan cancelled")]
    Cancelled,

    /// Request id not in `<campground_id>_<yyyy-mm>` form
    #[error("Invalid request id: {0}")]
    InvalidRequestId(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        ScanError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_request_id_parse_and_display() {
        let id = RequestId::parse("232447_2024-06").unwrap();
        assert_eq!(id.campground_id, "232447");
        assert_eq!(id.month_start, date("2024-06-01"));
        assert_eq!(id.to_string(), "232447_2024-06");

        // Campground ids may themselves contain underscores
        let id = RequestId::parse("camp_north_2024-07").unwrap();
        assert_eq!(id.campground_id, "camp_north");

        assert!(RequestId::parse("232447").is_err());
        assert!(RequestId::parse("_2024-06").is_err());
        assert!(RequestId::parse("232447_2024-13").is_err());
    }

    #[test]
    fn test_request_id_for_date() {
        let id = RequestId::for_date("232447", date("2024-06-17"));
        assert_eq!(id.to_string(), "232447_2024-06");
        assert!(id.contains(&date("2024-06-30")));
        assert!(!id.contains(&date("2024-07-01")));
    }

    #[test]
    fn test_active_request_new() {
        let request = ActiveRequest::new(
            "232447_2024-06",
            [date("2024-06-14"), date("2024-06-15"), date("2024-07-01")],
            DEFAULT_AVAILABILITY_API,
        )
        .unwrap();

        assert_eq!(request.campground_id, "232447");
        assert_eq!(
            request.url,
            "https://www.recreation.gov/api/camps/availability/campground/232447/month?start_date=2024-06-01T00:00:00.000Z"
        );
        assert!(!request.update);
        assert_eq!(request.active_days.len(), 2);
        assert!(!request.active_days.contains_key(&date("2024-07-01")));
    }

    #[test]
    fn test_snapshot_bytes() {
        assert!(Snapshot::from_bytes(b"").unwrap().is_empty());
        assert!(matches!(
            Snapshot::from_bytes(b"not json"),
            Err(ScanError::Decode(_))
        ));

        let mut snapshot = Snapshot::new();
        snapshot.set(date("2024-06-01"), "A", true);
        snapshot.set(date("2024-06-01"), "B", false);

        let bytes = snapshot.to_bytes().unwrap();
        assert_eq!(
            String::from_utf8(bytes.clone()).unwrap(),
            r#"{"2024-06-01":{"A":true,"B":false}}"#
        );
        assert_eq!(Snapshot::from_bytes(&bytes).unwrap(), snapshot);
    }
}
