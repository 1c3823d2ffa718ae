//! Catalog extraction from decoded payload text.
//!
//! Payload shapes vary by firmware: a bare JSON array of channel records,
//! an object wrapping such an array, a single record, several concatenated
//! documents, or text with no JSON at all. Extraction tries the JSON shapes
//! first and always runs the `player.<digits>` scan as well.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::satellite::SatelliteIndex;
use super::{Catalog, Channel};

/// Object keys that may hold the channel array.
pub const WRAPPER_KEYS: [&str; 5] = ["channels", "list", "items", "programs", "array"];

pub(crate) const NAME_KEYS: [&str; 7] = [
    "ServiceName",
    "name",
    "Name",
    "serviceName",
    "ChannelName",
    "channelName",
    "title",
];

pub(crate) const ID_KEYS: [&str; 8] = [
    "ServiceID",
    "ServiceId",
    "serviceId",
    "id",
    "Id",
    "ID",
    "ChannelID",
    "ProgramID",
];

pub(crate) const INDEX_KEYS: [&str; 4] = ["ServiceIndex", "ChannelIndex", "index", "Index"];

pub(crate) const SAT_INDEX_KEYS: [&str; 3] = ["SatIndex", "SatelliteIndex", "satIndex"];

pub(crate) const SAT_NAME_KEYS: [&str; 3] = ["SatName", "SatelliteName", "satName"];

pub(crate) const TP_INDEX_KEYS: [&str; 3] = ["TpIndex", "TransponderIndex", "tpIndex"];

static PLAYER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"player\.([0-9]+)").expect("player pattern is valid"));

/// Build the catalog for `stb_ip` from every payload collected in a session.
///
/// Ids are deduplicated across the whole set, first occurrence wins, and
/// order follows first appearance.
pub fn extract<P: AsRef<[u8]>>(payloads: &[P], stb_ip: &str) -> Catalog {
    let mut catalog = Catalog::new(stb_ip);
    let mut satellites = SatelliteIndex::default();

    for payload in payloads {
        let text = String::from_utf8_lossy(payload.as_ref());
        let documents = parse_documents(&text);

        for doc in &documents {
            satellites.collect(doc);
            for record in channel_records(doc) {
                match channel_from_record(record) {
                    Some(channel) => {
                        catalog.push(channel);
                    }
                    None => catalog.skipped_records += 1,
                }
            }
        }

        for caps in PLAYER_RE.captures_iter(&text) {
            catalog.push(Channel::new(&caps[1], ""));
        }
    }

    if !satellites.is_empty() {
        let annotated = satellites.annotate(catalog.channels_mut());
        debug!(
            "[extract] satellite enrichment: {} sats, {} transponders, {} channels annotated",
            satellites.satellite_count(),
            satellites.transponder_count(),
            annotated
        );
    }

    catalog
}

/// Parse every JSON array/object in the text.
///
/// Parsing starts at the first bracket. When a document is malformed or cut
/// short, parsing resumes at the next bracket after it, so a truncated
/// array still yields the complete records it contains.
pub(crate) fn parse_documents(text: &str) -> Vec<Value> {
    let mut docs = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(|c: char| c == '[' || c == '{') {
        let body = &rest[start..];
        let mut stream = serde_json::Deserializer::from_str(body).into_iter::<Value>();
        let mut parsed = false;
        while let Some(Ok(value)) = stream.next() {
            parsed = true;
            if value.is_array() || value.is_object() {
                docs.push(value);
            }
        }
        let consumed = stream.byte_offset();
        rest = if parsed && consumed > 0 {
            &body[consumed..]
        } else {
            &body[1..]
        };
    }
    docs
}

/// Candidate channel records in one document.
fn channel_records(doc: &Value) -> Vec<&Value> {
    match doc {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            let mut records = Vec::new();
            let mut wrapped = false;
            for key in WRAPPER_KEYS {
                if let Some(Value::Array(items)) = map.get(key) {
                    wrapped = true;
                    records.extend(items.iter());
                }
            }
            // A lone object is a record only if it carries an id.
            if !wrapped && first_string(map, &ID_KEYS).is_some() {
                records.push(doc);
            }
            records
        }
        _ => Vec::new(),
    }
}

fn channel_from_record(record: &Value) -> Option<Channel> {
    let map = record.as_object()?;
    let id = first_string(map, &ID_KEYS)?;
    let name = first_string(map, &NAME_KEYS).unwrap_or_default();

    let mut channel = Channel::new(id, name);
    channel.index = first_int(map, &INDEX_KEYS);
    channel.satellite_index = first_int(map, &SAT_INDEX_KEYS);
    channel.transponder_index = first_int(map, &TP_INDEX_KEYS);
    Some(channel)
}

/// First alias holding a non-empty string or a number.
pub(crate) fn first_string(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First alias holding an integer, either as a number or a numeric string.
pub(crate) fn first_int(map: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match map.get(*key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(catalog: &Catalog) -> Vec<&str> {
        catalog.channels().iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_single_array_payload() {
        let payloads = [r#"[{"ServiceName":"BBC ONE","ServiceID":"100001"}]"#];
        let catalog = extract(&payloads, "10.0.0.5");

        assert_eq!(catalog.len(), 1);
        let channel = &catalog.channels()[0];
        assert_eq!(channel.name, "BBC ONE");
        assert_eq!(channel.id, "100001");
        assert_eq!(channel.url("10.0.0.5"), "http://10.0.0.5:8085/player.100001");
    }

    #[test]
    fn test_duplicate_records_across_payloads() {
        let payloads = [
            r#"{"ServiceID":"5","ServiceName":"X"}"#,
            r#"{"ServiceID":"5","ServiceName":"X"}"#,
        ];
        let catalog = extract(&payloads, "10.0.0.5");
        assert_eq!(ids(&catalog), vec!["5"]);
    }

    #[test]
    fn test_player_fallback_without_json() {
        let payloads = ["status ok, see http://host/live/player.777/stream for details"];
        let catalog = extract(&payloads, "10.0.0.5");
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.channels()[0].id, "777");
        assert_eq!(catalog.channels()[0].name, "Channel 777");
    }

    #[test]
    fn test_wrapper_keys_and_aliases() {
        let payloads = [
            r#"{"total":3,"channels":[{"name":"One","id":1},{"Name":"Two","ID":"2"}]}"#,
            r#"{"programs":[{"title":"Three","ProgramID":"3","ServiceIndex":"12"}]}"#,
        ];
        let catalog = extract(&payloads, "10.0.0.5");
        assert_eq!(ids(&catalog), vec!["1", "2", "3"]);
        assert_eq!(catalog.get("2").unwrap().name, "Two");
        assert_eq!(catalog.get("3").unwrap().index, Some(12));
    }

    #[test]
    fn test_records_without_id_are_skipped() {
        let payloads = [r#"[{"ServiceName":"NoId"},{"ServiceID":"","ServiceName":"Empty"},42,{"ServiceID":"9"}]"#];
        let catalog = extract(&payloads, "10.0.0.5");
        assert_eq!(ids(&catalog), vec!["9"]);
        assert_eq!(catalog.channels()[0].name, "Channel 9");
        assert_eq!(catalog.skipped_records, 3);
    }

    #[test]
    fn test_concatenated_documents_and_padding() {
        let payloads = ["\u{1}\u{2}[{\"ServiceID\":\"1\"}][{\"ServiceID\":\"2\"}]\0\0"];
        let catalog = extract(&payloads, "10.0.0.5");
        assert_eq!(ids(&catalog), vec!["1", "2"]);
    }

    #[test]
    fn test_malformed_prefix_before_document() {
        let payloads = [r#"[ok] [{"ServiceID":"1","ServiceName":"A"}]"#];
        let catalog = extract(&payloads, "10.0.0.5");
        assert_eq!(ids(&catalog), vec!["1"]);
        assert_eq!(catalog.channels()[0].name, "A");
    }

    #[test]
    fn test_truncated_array_keeps_complete_records() {
        let payloads = [r#"[{"ServiceID":"1"},{"ServiceID":"2"},{"Servi"#];
        let catalog = extract(&payloads, "10.0.0.5");
        assert_eq!(ids(&catalog), vec!["1", "2"]);
    }

    #[test]
    fn test_json_name_wins_over_fallback() {
        let payloads = [
            r#"[{"ServiceID":"100","ServiceName":"News","url":"http://x/player.100"}]"#,
            "player.100 player.200",
        ];
        let catalog = extract(&payloads, "10.0.0.5");
        assert_eq!(ids(&catalog), vec!["100", "200"]);
        assert_eq!(catalog.get("100").unwrap().name, "News");
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let payloads = [
            r#"{"list":[{"ServiceID":"3"},{"ServiceID":"1"}]}"#,
            r#"[{"ServiceID":"2"},{"ServiceID":"3"}] player.4"#,
        ];
        let first = extract(&payloads, "10.0.0.5");
        let second = extract(&payloads, "10.0.0.5");
        assert_eq!(first, second);
        assert_eq!(ids(&first), vec!["3", "1", "2", "4"]);
    }

    #[test]
    fn test_empty_payload_set() {
        let payloads: [&[u8]; 0] = [];
        assert!(extract(&payloads, "10.0.0.5").is_empty());
    }
}
