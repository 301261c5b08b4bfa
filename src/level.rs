//! # Level Records
//!
//! A level is the metadata for one uploaded rhythm-game stage: the name players
//! see, where the song came from, the two beat-detection tuning parameters the
//! game client feeds into its detector, and which audio blob it plays.
//!
//! Records are persisted as a JSON array by the metadata store. The field
//! names below are the wire format shared with game clients, so they must not
//! be renamed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One uploaded level.
///
/// ## Field notes:
/// - `level_name` is the key used by delete, but nothing enforces uniqueness
/// - `youtube_link` is stored as given and never validated
/// - `audio_filename` is the sanitized name of the blob inside the file store
/// - `upload_date` is stamped by the server when the upload is accepted
///
/// Unknown fields in a stored record are ignored on read and not written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub level_name: String,
    pub youtube_link: String,
    pub beat_interval: f64,
    pub beat_threshold: f64,
    pub audio_filename: String,
    #[serde(with = "upload_date")]
    pub upload_date: DateTime<Utc>,
}

impl Level {
    /// Build a record stamped with the current server time.
    pub fn new(
        level_name: String,
        youtube_link: String,
        beat_interval: f64,
        beat_threshold: f64,
        audio_filename: String,
    ) -> Self {
        Self {
            level_name,
            youtube_link,
            beat_interval,
            beat_threshold,
            audio_filename,
            upload_date: Utc::now(),
        }
    }
}

/// Serde adapter for `upload_date`.
///
/// Always writes RFC 3339 in UTC with microseconds. Reading also accepts the
/// naive local timestamps (`2024-05-01T13:45:10.123456`) found in stores
/// written by earlier deployments.
mod upload_date {
    use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid upload_date: {raw}")))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }

        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Level {
        Level {
            level_name: "Level1".to_string(),
            youtube_link: "http://x".to_string(),
            beat_interval: 0.5,
            beat_threshold: 0.3,
            audio_filename: "song.mp3".to_string(),
            upload_date: Utc.with_ymd_and_hms(2026, 10, 15, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_serializes_with_wire_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        let object = json.as_object().unwrap();

        let keys: Vec<&str> = object.keys().map(String::as_str).collect();
        for expected in [
            "level_name",
            "youtube_link",
            "beat_interval",
            "beat_threshold",
            "audio_filename",
            "upload_date",
        ] {
            assert!(keys.contains(&expected), "missing field {expected}");
        }
        assert_eq!(object.len(), 6);
        assert_eq!(json["upload_date"], "2026-10-15T09:30:00.000000Z");
        assert_eq!(json["beat_interval"], 0.5);
    }

    #[test]
    fn test_reads_back_what_it_writes() {
        let level = sample();
        let text = serde_json::to_string(&level).unwrap();
        let parsed: Level = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, level);
    }

    #[test]
    fn test_accepts_legacy_naive_timestamps() {
        let text = r#"{
            "level_name": "Old",
            "youtube_link": "",
            "beat_interval": 0.25,
            "beat_threshold": 1.0,
            "audio_filename": "old.wav",
            "upload_date": "2024-05-01T13:45:10.123456"
        }"#;
        let parsed: Level = serde_json::from_str(text).unwrap();
        assert_eq!(parsed.level_name, "Old");
        assert!(upload_date::parse("2024-05-01T13:45:10").is_some());
    }

    #[test]
    fn test_rejects_garbage_timestamps() {
        assert!(upload_date::parse("yesterday").is_none());
        let record = serde_json::json!({
            "level_name": "x",
            "youtube_link": "",
            "beat_interval": 1,
            "beat_threshold": 1,
            "audio_filename": "a",
            "upload_date": "nope"
        });
        assert!(serde_json::from_value::<Level>(record).is_err());
    }
}
