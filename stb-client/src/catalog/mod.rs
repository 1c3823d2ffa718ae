//! Channel catalog types.

pub mod extractor;
pub mod satellite;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use stb_protocol::stream_url;

pub use extractor::extract;

/// One live channel.
///
/// The stream URL is not stored: it is always derived from the STB address
/// and `id` (see [`Channel::url`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satellite_name: Option<String>,
    #[serde(skip)]
    pub(crate) transponder_index: Option<i64>,
}

impl Channel {
    /// Create a channel; an empty name becomes "Channel <id>".
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let id = id.into();
        let mut name = name.into();
        if name.trim().is_empty() {
            name = format!("Channel {}", id);
        }
        Self {
            id,
            name,
            index: None,
            satellite_index: None,
            satellite_name: None,
            transponder_index: None,
        }
    }

    pub fn url(&self, stb_ip: &str) -> String {
        stream_url(stb_ip, &self.id)
    }
}

/// Serialised form of a channel, with its derived URL.
#[derive(Debug, Serialize)]
pub struct ChannelView<'a> {
    #[serde(flatten)]
    pub channel: &'a Channel,
    pub url: String,
}

/// Deduplicated, ordered channel list for one STB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    stb_ip: String,
    channels: Vec<Channel>,
    seen: HashSet<String>,
    /// Records that looked like channel entries but could not be used.
    pub skipped_records: usize,
}

impl Catalog {
    pub fn new(stb_ip: impl Into<String>) -> Self {
        Self {
            stb_ip: stb_ip.into(),
            channels: Vec::new(),
            seen: HashSet::new(),
            skipped_records: 0,
        }
    }

    /// Insert a channel unless its id is empty or already present.
    /// Returns true if it was added.
    pub fn push(&mut self, channel: Channel) -> bool {
        if channel.id.is_empty() || !self.seen.insert(channel.id.clone()) {
            return false;
        }
        self.channels.push(channel);
        true
    }

    pub fn stb_ip(&self) -> &str {
        &self.stb_ip
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub(crate) fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn views(&self) -> Vec<ChannelView<'_>> {
        self.channels
            .iter()
            .map(|channel| ChannelView {
                channel,
                url: channel.url(&self.stb_ip),
            })
            .collect()
    }

    /// JSON array of channels including their URLs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.views()).unwrap_or_else(|_| "[]".to_string())
    }

    /// Rebuild a catalog from JSON written by [`Catalog::to_json`].
    /// Any `url` fields are ignored and re-derived.
    pub fn from_json(stb_ip: &str, json: &str) -> serde_json::Result<Self> {
        let channels: Vec<Channel> = serde_json::from_str(json)?;
        let mut catalog = Catalog::new(stb_ip);
        for channel in channels {
            catalog.push(channel);
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_dedups_first_wins() {
        let mut catalog = Catalog::new("10.0.0.5");
        assert!(catalog.push(Channel::new("5", "X")));
        assert!(!catalog.push(Channel::new("5", "Y")));
        assert!(!catalog.push(Channel::new("", "Nameless")));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.channels()[0].name, "X");
    }

    #[test]
    fn test_default_name() {
        assert_eq!(Channel::new("777", "").name, "Channel 777");
    }

    #[test]
    fn test_json_includes_derived_url() {
        let mut catalog = Catalog::new("10.0.0.5");
        catalog.push(Channel::new("100001", "BBC ONE"));
        assert_eq!(
            catalog.to_json(),
            r#"[{"id":"100001","name":"BBC ONE","url":"http://10.0.0.5:8085/player.100001"}]"#
        );
    }

    #[test]
    fn test_json_cache_round_trip_rederives_url() {
        let cached = r#"[{"id":"7","name":"Seven","url":"http://stale:1/x"}]"#;
        let catalog = Catalog::from_json("192.168.1.9", cached).unwrap();
        assert_eq!(catalog.views()[0].url, "http://192.168.1.9:8085/player.7");
    }
}
