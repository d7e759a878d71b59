use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Unix timestamps above this are taken to be milliseconds, not seconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// One playable speech file as listed by the remote API.
///
/// `created` falls back to the Unix epoch when the record carries no usable
/// timestamp, so such items sort first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl Item {
    pub fn new(name: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            created,
            size: None,
        }
    }

    /// An item whose identifier is empty or only whitespace.
    pub fn is_malformed(&self) -> bool {
        self.name.trim().is_empty()
    }
}

/// Raw file record from `GET /api/files`.  Every field is optional on the
/// wire and a field of the wrong type reads as absent, so one odd record
/// never spoils the rest of a listing.  Conversion into [`Item`] never fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value")]
pub struct FileRecord {
    pub filename: Option<String>,
    pub created: Option<serde_json::Value>,
    pub size: Option<u64>,
}

impl From<serde_json::Value> for FileRecord {
    fn from(value: serde_json::Value) -> Self {
        let serde_json::Value::Object(mut fields) = value else {
            return FileRecord::default();
        };
        FileRecord {
            filename: match fields.remove("filename") {
                Some(serde_json::Value::String(name)) => Some(name),
                _ => None,
            },
            created: fields.remove("created").filter(|v| !v.is_null()),
            size: fields.get("size").and_then(lenient_size),
        }
    }
}

/// Byte counts sometimes arrive as floats (`1536.0`) or strings (`"2048"`).
fn lenient_size(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl From<FileRecord> for Item {
    fn from(record: FileRecord) -> Self {
        let created = record
            .created
            .as_ref()
            .and_then(parse_created)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Item {
            name: record.filename.unwrap_or_default(),
            created,
            size: record.size,
        }
    }
}

/// Envelope of the listing endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileListing {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub files: Option<Vec<FileRecord>>,
}

impl FileListing {
    /// Items in the order the API returned them.  A missing or null `files`
    /// field is an empty snapshot.
    pub fn into_items(self) -> Vec<Item> {
        self.files
            .unwrap_or_default()
            .into_iter()
            .map(Item::from)
            .collect()
    }
}

/// Accepts RFC 3339, naive `YYYY-MM-DD[T ]HH:MM:SS[.f]` (read as UTC), a bare
/// `YYYY-MM-DD` (UTC midnight) and numeric Unix timestamps in seconds or milliseconds.
pub fn parse_created(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_created_str(s),
        serde_json::Value::Number(n) => n.as_i64().and_then(from_unix),
        _ => None,
    }
}

fn parse_created_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive));
    }
    s.parse::<i64>().ok().and_then(from_unix)
}

fn from_unix(ts: i64) -> Option<DateTime<Utc>> {
    if ts.abs() >= MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(ts)
    } else {
        DateTime::from_timestamp(ts, 0)
    }
}

/// Control commands accepted by the daemon core (HTTP API → core).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Full reset followed by an immediate poll.
    Refresh,
    /// Grant the playback gate.
    Authorize,
    /// Withdraw the playback gate.  The item in flight is not interrupted.
    Revoke,
    /// Forget played identifiers without touching the queue.
    ClearPlayed,
}

/// Liveness of the mpv process as seen by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerHealth {
    /// Not spawned yet.
    #[default]
    Absent,
    /// Spawning, IPC socket not connected yet.
    Starting,
    Running,
    /// Process exited or the IPC connection dropped.  Respawned on next use.
    Dead,
}

/// Introspection snapshot published by the core after every transition.
/// `rev` increases monotonically so readers can spot changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    #[serde(default)]
    pub rev: u64,
    pub queue_length: usize,
    #[serde(default)]
    pub queued: Vec<String>,
    pub is_playing: bool,
    #[serde(default)]
    pub current: Option<String>,
    pub played_count: usize,
    pub authorized: bool,
    #[serde(default)]
    pub polls_ok: u64,
    #[serde(default)]
    pub polls_failed: u64,
    #[serde(default)]
    pub last_poll_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub player: PlayerHealth,
}
