use serde_json::{Map, Value};

/// One job listing: field name → value, in the order the source emitted them.
pub type Record = Map<String, Value>;

/// Borrowed view over an untyped scrape result.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Mapping(&'a Map<String, Value>),
    Sequence(&'a [Value]),
    Text(&'a str),
    /// Numbers, booleans and null.
    Scalar(&'a Value),
}

impl<'a> Payload<'a> {
    pub fn of(value: &'a Value) -> Self {
        match value {
            Value::Object(map) => Payload::Mapping(map),
            Value::Array(items) => Payload::Sequence(items),
            Value::String(s) => Payload::Text(s),
            other => Payload::Scalar(other),
        }
    }

    pub fn as_mapping(self) -> Option<&'a Map<String, Value>> {
        match self {
            Payload::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Short human summary, e.g. `text (12 chars)`.
    pub fn describe(self) -> String {
        match self {
            Payload::Mapping(map) => format!("mapping ({} keys)", map.len()),
            Payload::Sequence(items) => format!("sequence ({} items)", items.len()),
            Payload::Text(s) => format!("text ({} chars)", s.chars().count()),
            Payload::Scalar(v) => format!("scalar ({})", v),
        }
    }
}

/// Turn a value found under a job-ish key into records.
///
/// Sequence elements that are not mappings are wrapped as `{"value": x}` so
/// every record has at least one named field. A single mapping is one record.
/// Anything else carries no records.
pub fn to_records(value: &Value) -> Vec<Record> {
    match Payload::of(value) {
        Payload::Sequence(items) => items.iter().map(item_to_record).collect(),
        Payload::Mapping(map) => vec![map.clone()],
        Payload::Text(_) | Payload::Scalar(_) => Vec::new(),
    }
}

fn item_to_record(item: &Value) -> Record {
    match item {
        Value::Object(map) => map.clone(),
        other => {
            let mut record = Map::new();
            record.insert("value".to_string(), other.clone());
            record
        }
    }
}
