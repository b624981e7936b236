//! Upstream payload → ordered list of [`NormalizedEvent`].
//!
//! The upstream answers in one of several shapes depending on endpoint
//! revision and `format`. The shape is resolved once in
//! [`UpstreamPayload::classify`]; nothing downstream probes raw JSON.
//! Upstream order is preserved; sorting is upstream's job via `orderby`.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

use crate::time;

pub const WRAPPED_LIST_FIELD: &str = "eventList";
pub const FEATURES_FIELD: &str = "features";

const TIME_FIELDS: [&str; 3] = ["origintime", "eventDate", "date"];
const IDENTITY_FIELDS: [&str; 3] = ["eventID", "eventId", "id"];
const LAST_UPDATE_FIELDS: [&str; 3] = ["lastUpdateDate", "lastUpdate", "updated"];
const OUTPUT_FIELDS: [&str; 4] = ["eventId", "occurredAt", "magnitude", "depth"];

pub type RawEventRecord = Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamPayload {
    List(Vec<JsonValue>),
    Wrapped(Vec<JsonValue>),
    FeatureCollection(Vec<JsonValue>),
    Single(RawEventRecord),
    Unrecognized,
}

impl UpstreamPayload {
    pub fn classify(body: JsonValue) -> Self {
        match body {
            JsonValue::Array(items) => Self::List(items),
            JsonValue::Object(mut object) => {
                if matches!(object.get(WRAPPED_LIST_FIELD), Some(JsonValue::Array(_))) {
                    if let Some(JsonValue::Array(items)) = object.remove(WRAPPED_LIST_FIELD) {
                        return Self::Wrapped(items);
                    }
                }
                if matches!(object.get(FEATURES_FIELD), Some(JsonValue::Array(_))) {
                    if let Some(JsonValue::Array(features)) = object.remove(FEATURES_FIELD) {
                        return Self::FeatureCollection(features);
                    }
                }
                Self::Single(object)
            }
            _ => Self::Unrecognized,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::List(_) => "list",
            Self::Wrapped(_) => "wrapped",
            Self::FeatureCollection(_) => "feature_collection",
            Self::Single(_) => "single",
            Self::Unrecognized => "unrecognized",
        }
    }

    pub fn into_records(self) -> Vec<RawEventRecord> {
        match self {
            Self::List(items) | Self::Wrapped(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    JsonValue::Object(record) => Some(record),
                    _ => None,
                })
                .collect(),
            Self::FeatureCollection(features) => {
                features.into_iter().filter_map(feature_record).collect()
            }
            Self::Single(record) => vec![record],
            Self::Unrecognized => Vec::new(),
        }
    }
}

/// A feature's property bag with its geometry attached.
fn feature_record(feature: JsonValue) -> Option<RawEventRecord> {
    let JsonValue::Object(mut feature) = feature else {
        return None;
    };
    let mut record = match feature.remove("properties") {
        Some(JsonValue::Object(properties)) => properties,
        _ => Map::new(),
    };
    let geometry = feature.remove("geometry").unwrap_or(JsonValue::Null);
    record.insert("geometry".to_string(), geometry);
    Some(record)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub event_id: Option<String>,
    #[serde(with = "time::upstream_format")]
    pub occurred_at: NaiveDateTime,
    pub magnitude: Option<f64>,
    pub depth: Option<f64>,
    /// Only used to pick the newest revision of a duplicate.
    #[serde(skip)]
    pub last_update_at: Option<NaiveDateTime>,
    #[serde(flatten)]
    pub fields: RawEventRecord,
}

impl NormalizedEvent {
    /// `None` when the record carries no resolvable time.
    pub fn from_record(mut record: RawEventRecord) -> Option<Self> {
        let occurred_at = first_time(&record, &TIME_FIELDS)?;
        let last_update_at = first_time(&record, &LAST_UPDATE_FIELDS);

        let mut event_id = None;
        for field in IDENTITY_FIELDS {
            if let Some(identity) = record.get(field).and_then(identity_of) {
                record.remove(field);
                event_id = Some(identity);
                break;
            }
        }
        let magnitude = record.get("magnitude").and_then(number_of);
        let depth = record.get("depth").and_then(number_of);
        for field in OUTPUT_FIELDS.iter().chain(&LAST_UPDATE_FIELDS) {
            record.remove(*field);
        }

        Some(Self {
            event_id,
            occurred_at,
            magnitude,
            depth,
            last_update_at,
            fields: record,
        })
    }

    /// Whether `self` should replace `current` for the same identity.
    /// Later update wins; a missing update time loses to a present one;
    /// otherwise the later-encountered record wins.
    fn supersedes(&self, current: &Self) -> bool {
        self.last_update_at >= current.last_update_at
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeOutcome {
    pub events: Vec<NormalizedEvent>,
    pub raw_records: usize,
    pub dropped_without_time: usize,
    pub merged_duplicates: usize,
}

pub fn normalize(payload: UpstreamPayload) -> NormalizeOutcome {
    let records = payload.into_records();
    let raw_records = records.len();

    let mut outcome = NormalizeOutcome {
        raw_records,
        ..NormalizeOutcome::default()
    };
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in records {
        let Some(event) = NormalizedEvent::from_record(record) else {
            outcome.dropped_without_time += 1;
            continue;
        };
        let Some(identity) = event.event_id.clone() else {
            outcome.events.push(event);
            continue;
        };
        match positions.get(&identity) {
            Some(&index) => {
                outcome.merged_duplicates += 1;
                if event.supersedes(&outcome.events[index]) {
                    outcome.events[index] = event;
                }
            }
            None => {
                positions.insert(identity, outcome.events.len());
                outcome.events.push(event);
            }
        }
    }

    outcome
}

fn first_time(record: &RawEventRecord, fields: &[&str]) -> Option<NaiveDateTime> {
    fields
        .iter()
        .filter_map(|field| record.get(*field))
        .filter_map(JsonValue::as_str)
        .find_map(time::parse_record_time)
}

fn identity_of(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(raw) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn number_of(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(raw) => raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}
