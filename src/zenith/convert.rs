//! Conversion of inbound subscription payloads before delivery

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::trace;

use super::messages::{Response, TopicUpdate};

/// Field names whose textual values carry a point in time
const TIME_FIELDS: &[&str] = &[
    "Time",
    "CreatedDate",
    "UpdatedDate",
    "ExpiryDate",
    "LastTradeTime",
];

/// Build the update delivered to listeners from an inbound frame
pub fn to_topic_update(response: &Response) -> Option<TopicUpdate> {
    let controller = response.controller.clone()?;
    let topic = response.topic.clone()?;

    let mut timestamps = BTreeMap::new();
    collect_timestamps(&response.data, String::new(), &mut timestamps);

    Some(TopicUpdate {
        controller,
        topic,
        action: response.action.clone(),
        data: response.data.clone(),
        timestamps,
    })
}

fn collect_timestamps(
    value: &Value,
    pointer: String,
    out: &mut BTreeMap<String, DateTime<FixedOffset>>,
) {
    match value {
        Value::Object(map) => {
            for (name, field) in map {
                let path = format!("{}/{}", pointer, escape_pointer(name));
                match field {
                    Value::String(text) if TIME_FIELDS.contains(&name.as_str()) => {
                        match parse_timestamp(text) {
                            Some(time) => {
                                out.insert(path, time);
                            }
                            None => trace!("Unparseable time field {}: {}", path, text),
                        }
                    }
                    _ => collect_timestamps(field, path, out),
                }
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_timestamps(item, format!("{}/{}", pointer, index), out);
            }
        }
        _ => {}
    }
}

fn escape_pointer(name: &str) -> String {
    name.replace('~', "~0").replace('/', "~1")
}

/// Parse the timestamp formats the server emits
///
/// RFC 3339 with offset is the norm; values without an offset are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Some(time);
    }
    if let Ok(time) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(time);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
}
