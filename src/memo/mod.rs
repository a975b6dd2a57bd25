//! Memo records and their on-disk metadata store.
//!
//! Audio lives in one WAV file per memo; the metadata for every memo in a
//! directory is kept in a single `metadata.json`, rewritten on each change.

mod store;
mod tone;

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use time::macros::format_description;

pub use store::MemoStore;
pub use tone::{TEST_TONE_FILENAME, TEST_TONE_ID, test_tone_record, write_test_tone};

/// Metadata for one recorded memo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoRecord {
    pub id: String,
    pub filename: String, // relative to the memo directory
    #[serde(rename = "title")]
    pub display_name: String,
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
    #[serde(rename = "created", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(rename = "size")]
    pub size_bytes: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "format")]
    pub format_label: String,
}

impl MemoRecord {
    /// One-line summary: `mm:ss, size [tags]`.
    pub fn description(&self) -> String {
        let mut line = format!("{}, {}", format_duration(self.duration_seconds), format_bytes(self.size_bytes));
        if !self.tags.is_empty() {
            let tags = self.tags.join(", ");
            line.push_str(&format!(" [{}]", truncate(&tags, 20)));
        }
        line
    }

    /// True if `tag` is present (exact match).
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Option::<Vec<String>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Current local time, falling back to UTC when the offset is unknown.
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Memo id for a creation time: Unix milliseconds.
pub fn memo_id(at: OffsetDateTime) -> String {
    (at.unix_timestamp_nanos() / 1_000_000).to_string()
}

/// Timestamp component used in memo and export file names.
pub fn file_timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    at.format(&format).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Base name for a new recording: `memo_YYYY-MM-DD_HH-MM-SS.wav`.
pub fn memo_filename(at: OffsetDateTime) -> String {
    format!("memo_{}.wav", file_timestamp(at))
}

/// Human-readable byte count using 1024-based units.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}

/// Seconds as `mm:ss` (minutes are not wrapped at the hour).
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
    format!("{:02}:{:02}", total / 60, total % 60)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample_record() -> MemoRecord {
        MemoRecord {
            id: "1700000000000".to_string(),
            filename: "memo_2023-11-14_22-13-20.wav".to_string(),
            display_name: "memo_2023-11-14_22-13-20".to_string(),
            duration_seconds: 75.4,
            created_at: datetime!(2023-11-14 22:13:20 UTC),
            size_bytes: 2048,
            tags: vec!["work".to_string()],
            format_label: "WAV".to_string(),
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(441044), "430.7 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "00:00");
        assert_eq!(format_duration(5.0), "00:05");
        assert_eq!(format_duration(75.9), "01:15");
        assert_eq!(format_duration(3725.0), "62:05");
        assert_eq!(format_duration(-1.0), "00:00");
    }

    #[test]
    fn test_description() {
        let mut record = sample_record();
        assert_eq!(record.description(), "01:15, 2.0 KB [work]");

        record.tags = vec!["meeting notes".to_string(), "important".to_string()];
        assert_eq!(record.description(), "01:15, 2.0 KB [meeting notes, im...]");

        record.tags.clear();
        assert_eq!(record.description(), "01:15, 2.0 KB");
    }

    #[test]
    fn test_filename_and_id() {
        let at = datetime!(2024-03-05 07:08:09.250 UTC);
        assert_eq!(memo_filename(at), "memo_2024-03-05_07-08-09.wav");
        assert_eq!(memo_id(at), "1709622489250");
    }

    #[test]
    fn test_json_field_names() {
        let value = serde_json::to_value(sample_record()).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, ["created", "duration", "filename", "format", "id", "size", "tags", "title"]);
        assert_eq!(object["created"], "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_null_tags_load_as_empty() {
        let json = r#"{
            "id": "a", "filename": "a.wav", "title": "A", "duration": 1.5,
            "created": "2024-01-02T03:04:05.123456789+01:00", "size": 44,
            "tags": null, "format": "WAV"
        }"#;
        let record: MemoRecord = serde_json::from_str(json).unwrap();
        assert!(record.tags.is_empty());
        assert_eq!(record.created_at.offset().whole_hours(), 1);

        let json = r#"{"id":"b","filename":"b.wav","title":"B","duration":0,"created":"2024-01-02T03:04:05Z","size":0,"format":"WAV"}"#;
        let record: MemoRecord = serde_json::from_str(json).unwrap();
        assert!(record.tags.is_empty());
    }
}
