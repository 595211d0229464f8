use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::payload::{to_records, Payload, Record};

/// Top-level keys that may hold a list of listings, matched case-insensitively.
const LISTING_KEYS: [&str; 4] = ["jobs", "positions", "listings", "results"];

/// Which rule found the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSource {
    /// JSON embedded as a string under `"content"`.
    Content,
    /// The `"data"` member.
    Data,
    /// A top-level `"jobs"` member.
    Jobs,
    /// First listing-like key found by scanning the top level.
    KeyScan(String),
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSource::Content => write!(f, "content"),
            RecordSource::Data => write!(f, "data"),
            RecordSource::Jobs => write!(f, "jobs"),
            RecordSource::KeyScan(key) => write!(f, "key scan ({})", key),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub source: RecordSource,
    pub records: Vec<Record>,
}

impl Extraction {
    fn found(source: RecordSource, records: Vec<Record>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self { source, records })
        }
    }
}

/// Records found in `payload`, or an empty list when no rule matches.
pub fn extract(payload: &Value) -> Vec<Record> {
    locate(payload).map(|e| e.records).unwrap_or_default()
}

/// Run the rules in priority order; the first one yielding records wins.
pub fn locate(payload: &Value) -> Option<Extraction> {
    let map = match Payload::of(payload).as_mapping() {
        Some(map) => map,
        None => {
            debug!(payload = %Payload::of(payload).describe(), "payload is not a mapping");
            return None;
        }
    };

    let found = from_content(map)
        .or_else(|| from_data_or_jobs(map))
        .or_else(|| from_key_scan(map));

    match &found {
        Some(e) => debug!(source = %e.source, records = e.records.len(), "located records"),
        None => debug!("no rule matched the payload"),
    }
    found
}

fn from_content(map: &Map<String, Value>) -> Option<Extraction> {
    let text = map.get("content")?.as_str()?;
    let parsed: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "could not parse content as JSON");
            return None;
        }
    };

    let records = match Payload::of(&parsed) {
        Payload::Sequence(_) => to_records(&parsed),
        Payload::Mapping(inner) => match inner.get("jobs") {
            Some(jobs) => to_records(jobs),
            None => vec![inner.clone()],
        },
        Payload::Text(_) | Payload::Scalar(_) => Vec::new(),
    };
    Extraction::found(RecordSource::Content, records)
}

// A "data" member shadows a top-level "jobs" member even when it yields nothing.
fn from_data_or_jobs(map: &Map<String, Value>) -> Option<Extraction> {
    if let Some(data) = map.get("data") {
        let records = match Payload::of(data) {
            Payload::Sequence(_) => to_records(data),
            Payload::Mapping(inner) => match (inner.get("jobs"), inner.contains_key("title")) {
                (Some(jobs), _) => to_records(jobs),
                (None, true) => vec![inner.clone()],
                (None, false) => Vec::new(),
            },
            Payload::Text(_) | Payload::Scalar(_) => Vec::new(),
        };
        return Extraction::found(RecordSource::Data, records);
    }

    let jobs = map.get("jobs")?;
    Extraction::found(RecordSource::Jobs, to_records(jobs))
}

fn from_key_scan(map: &Map<String, Value>) -> Option<Extraction> {
    let (key, value) = map.iter().find(|(key, value)| {
        value.is_array() && LISTING_KEYS.contains(&key.to_lowercase().as_str())
    })?;
    Extraction::found(RecordSource::KeyScan(key.clone()), to_records(value))
}

// ── Tests ──
