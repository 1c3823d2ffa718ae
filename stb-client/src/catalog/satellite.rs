//! Optional satellite enrichment.
//!
//! Some firmware sends satellite-name records and transponder records
//! (transponder index -> satellite index) alongside the channel list.
//! When present anywhere in the payload set they are used to annotate
//! channels; when absent nothing changes.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::extractor::{first_int, first_string, ID_KEYS, SAT_INDEX_KEYS, SAT_NAME_KEYS, TP_INDEX_KEYS};
use super::Channel;

/// Nesting depth searched for auxiliary records.
const MAX_DEPTH: usize = 4;

#[derive(Debug, Default)]
pub struct SatelliteIndex {
    names: HashMap<i64, String>,
    transponders: HashMap<i64, i64>,
}

impl SatelliteIndex {
    /// Record every satellite/transponder entry found in `doc`.
    pub fn collect(&mut self, doc: &Value) {
        self.walk(doc, 0);
    }

    fn walk(&mut self, value: &Value, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        match value {
            Value::Array(items) => {
                for item in items {
                    self.walk(item, depth + 1);
                }
            }
            Value::Object(map) => {
                self.classify(map);
                for child in map.values() {
                    if child.is_array() || child.is_object() {
                        self.walk(child, depth + 1);
                    }
                }
            }
            _ => {}
        }
    }

    fn classify(&mut self, map: &Map<String, Value>) {
        let sat = first_int(map, &SAT_INDEX_KEYS);

        if let (Some(sat), Some(name)) = (sat, first_string(map, &SAT_NAME_KEYS)) {
            self.names.entry(sat).or_insert(name);
        }

        if first_string(map, &ID_KEYS).is_none() {
            if let (Some(tp), Some(sat)) = (first_int(map, &TP_INDEX_KEYS), sat) {
                self.transponders.entry(tp).or_insert(sat);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.transponders.is_empty()
    }

    pub fn satellite_count(&self) -> usize {
        self.names.len()
    }

    pub fn transponder_count(&self) -> usize {
        self.transponders.len()
    }

    /// Fill satellite index/name on channels that reference a known
    /// transponder or satellite. Returns how many channels changed.
    pub fn annotate(&self, channels: &mut [Channel]) -> usize {
        let mut annotated = 0;
        for channel in channels.iter_mut() {
            let sat = channel
                .transponder_index
                .and_then(|tp| self.transponders.get(&tp).copied())
                .or(channel.satellite_index);

            let Some(sat) = sat else { continue };
            let name = self.names.get(&sat).cloned();
            if channel.satellite_index != Some(sat) || (name.is_some() && channel.satellite_name != name) {
                channel.satellite_index = Some(sat);
                if name.is_some() {
                    channel.satellite_name = name;
                }
                annotated += 1;
            }
        }
        annotated
    }
}
