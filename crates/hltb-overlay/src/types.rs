//! Core data types for subjects, completion-time records, and cache entries.

use serde::{Deserialize, Deserializer, Serialize};

/// Steam app id of the game the library page is showing.
pub type SubjectId = u32;

/// Completion times for one game as reported by HowLongToBeat.
///
/// Durations are in seconds. A missing or `null` duration decodes as zero,
/// which the display treats as "no data for this category".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HltbRecord {
    /// HLTB game id, used to build the "View Details" link.
    pub game_id: u64,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub game_name: String,
    #[serde(default, deserialize_with = "seconds_or_zero")]
    pub comp_main: u64,
    #[serde(default, deserialize_with = "seconds_or_zero")]
    pub comp_plus: u64,
    #[serde(default, deserialize_with = "seconds_or_zero")]
    pub comp_100: u64,
    #[serde(default, deserialize_with = "seconds_or_zero")]
    pub comp_all: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comp_main_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comp_plus_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comp_100_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comp_all_count: Option<u32>,
}

impl HltbRecord {
    /// Create a record with the four durations and no sample counts.
    pub fn new(
        game_id: u64,
        game_name: impl Into<String>,
        comp_main: u64,
        comp_plus: u64,
        comp_100: u64,
        comp_all: u64,
    ) -> Self {
        Self {
            game_id,
            game_name: game_name.into(),
            comp_main,
            comp_plus,
            comp_100,
            comp_all,
            comp_main_count: None,
            comp_plus_count: None,
            comp_100_count: None,
            comp_all_count: None,
        }
    }

    /// Whether at least one duration is positive, i.e. worth replacing the
    /// placeholder for.
    pub fn has_times(&self) -> bool {
        self.comp_main > 0 || self.comp_plus > 0 || self.comp_100 > 0 || self.comp_all > 0
    }

    /// External HowLongToBeat page for this game.
    pub fn details_url(&self) -> String {
        format!("https://howlongtobeat.com/game/{}", self.game_id)
    }
}

// Durations arrive as integers, floats, or null depending on the backend.
fn seconds_or_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v.round() as u64)
        .unwrap_or(0))
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// One persisted cache slot.
///
/// `data == None && not_found == true` records an authoritative
/// "HLTB has no entry for this game".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Option<HltbRecord>,
    /// Epoch milliseconds of the last write.
    pub timestamp: i64,
    #[serde(rename = "notFound")]
    pub not_found: bool,
}

impl CacheEntry {
    /// Build an entry for a lookup outcome written at `timestamp`.
    pub fn new(data: Option<HltbRecord>, timestamp: i64) -> Self {
        let not_found = data.is_none();
        Self {
            data,
            timestamp,
            not_found,
        }
    }

    /// Displayable record, or `None` for negative entries.
    pub fn record(&self) -> Option<&HltbRecord> {
        if self.not_found {
            None
        } else {
            self.data.as_ref()
        }
    }
}

/// Opaque reference to an element of a host page.
///
/// Handles are only meaningful for the document snapshot they were produced
/// from; a host re-render may invalidate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ElementHandle(pub usize);

/// A detected game page: which app is shown and where the overlay goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GamePage {
    pub subject_id: SubjectId,
    pub container: ElementHandle,
}

/// Errors that can occur in the overlay library.
#[derive(thiserror::Error, Debug)]
pub enum OverlayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid marker: {0}")]
    InvalidMarker(String),
}

/// Convenience result type.
pub type OverlayResult<T> = Result<T, OverlayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_decodes_nulls_and_floats() {
        let json = r#"{
            "game_id": 68151,
            "game_name": "Elden Ring",
            "comp_main": 199800.4,
            "comp_plus": null,
            "comp_100": 476640
        }"#;
        let record: HltbRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.comp_main, 199800);
        assert_eq!(record.comp_plus, 0);
        assert_eq!(record.comp_100, 476640);
        assert_eq!(record.comp_all, 0);
        assert_eq!(record.comp_main_count, None);
        assert!(record.has_times());
    }

    #[test]
    fn test_record_without_times() {
        let record = HltbRecord::new(1, "", 0, 0, 0, 0);
        assert!(!record.has_times());
        assert_eq!(record.details_url(), "https://howlongtobeat.com/game/1");
    }

    #[test]
    fn test_negative_entry_has_no_record() {
        let entry = CacheEntry::new(None, 10);
        assert!(entry.not_found);
        assert!(entry.record().is_none());

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["notFound"], true);
        assert!(json["data"].is_null());
    }
}
