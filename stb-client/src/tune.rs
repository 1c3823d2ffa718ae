//! Best-effort channel tuning.
//!
//! The STB never confirms a tune, so the outcome only says what was
//! attempted and which URL playback was pointed at.

use std::fmt;
use std::time::Duration;

use log::{info, warn};
use serde_json::{Map, Value};
use tokio::time::Instant;

use stb_protocol::{stream_url, Command, TuneVerb};

use crate::catalog::extractor::parse_documents;
use crate::config::Config;
use crate::host::PlaybackLauncher;
use crate::remote::RemoteKeypad;
use crate::session::{CandidateConfig, DeviceIdentity, Session, SessionSettings};
use crate::trace::Trace;

pub const SUCCESS_KEYS: [&str; 4] = ["success", "Success", "result", "ret"];

pub const URL_KEYS: [&str; 6] = ["url", "URL", "Url", "PlayUrl", "playUrl", "play_url"];

const MAX_DEPTH: usize = 4;

/// Where the final URL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlSource {
    /// The STB answered with a play URL.
    Reported,
    /// Built from the STB address and channel id.
    Derived,
}

impl fmt::Display for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlSource::Reported => write!(f, "reported"),
            UrlSource::Derived => write!(f, "derived"),
        }
    }
}

#[derive(Debug)]
pub struct TuneOutcome {
    pub url: String,
    pub source: UrlSource,
    /// Control port that reported the URL.
    pub reported_by: Option<u16>,
    pub remote_keys_sent: bool,
    pub launched: bool,
    pub trace: Trace,
}

/// Requests sent to each port: by index (when known), by id in every
/// known shape, then the current play URL.
pub fn tune_commands(channel_id: &str, index: Option<u32>) -> Vec<Command> {
    let mut commands = Vec::with_capacity(5);
    if let Some(index) = index {
        commands.push(Command::TuneByIndex { index });
    }
    commands.extend(TuneVerb::ALL.iter().map(|verb| Command::TuneById {
        verb: *verb,
        id: channel_id.to_string(),
    }));
    commands.push(Command::CurrentPlayUrl);
    commands
}

/// First `http` URL in a record whose success flag is truthy.
pub fn reported_play_url(payload: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(payload);
    parse_documents(&text)
        .iter()
        .find_map(|doc| find_play_url(doc, 0))
}

fn find_play_url(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Array(items) => items.iter().find_map(|v| find_play_url(v, depth + 1)),
        Value::Object(map) => play_url_in(map).or_else(|| {
            map.values()
                .filter(|v| v.is_array() || v.is_object())
                .find_map(|v| find_play_url(v, depth + 1))
        }),
        _ => None,
    }
}

fn play_url_in(map: &Map<String, Value>) -> Option<String> {
    let success = SUCCESS_KEYS
        .iter()
        .filter_map(|k| map.get(*k))
        .any(is_truthy);
    if !success {
        return None;
    }
    URL_KEYS.iter().find_map(|k| match map.get(*k) {
        Some(Value::String(url)) if url.trim().starts_with("http") => Some(url.trim().to_string()),
        _ => None,
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "ok"),
        _ => false,
    }
}

/// Issues tune requests across the candidate ports.
#[derive(Debug, Clone)]
pub struct TuningController {
    settings: SessionSettings,
    identity: DeviceIdentity,
    candidates: Vec<CandidateConfig>,
    budget: Duration,
    response_timeout: Duration,
    keypad: RemoteKeypad,
    trace_capacity: usize,
}

impl TuningController {
    pub fn new(
        settings: SessionSettings,
        identity: DeviceIdentity,
        candidates: Vec<CandidateConfig>,
        budget: Duration,
        response_timeout: Duration,
        keypad: RemoteKeypad,
        trace_capacity: usize,
    ) -> Self {
        Self {
            settings,
            identity,
            candidates,
            budget,
            response_timeout,
            keypad,
            trace_capacity,
        }
    }

    pub fn from_config(config: &Config, device_id: impl Into<String>) -> Self {
        Self::new(
            SessionSettings::from(&config.session),
            DeviceIdentity {
                label: config.device.label.clone(),
                id: device_id.into(),
            },
            config.candidates(),
            Duration::from_millis(config.tune.budget_ms),
            Duration::from_millis(config.tune.response_timeout_ms),
            RemoteKeypad::new(config.remote.clone()),
            config.trace.capacity,
        )
    }

    /// Tune `channel_id` on `ip` and hand the resulting URL to `launcher`.
    ///
    /// Never fails and never runs past the tune budget. Whatever happens,
    /// the outcome carries a URL: reported by the STB if it answered,
    /// otherwise derived from the address and id.
    pub async fn tune(
        &self,
        ip: &str,
        channel_id: &str,
        index: Option<u32>,
        launcher: &dyn PlaybackLauncher,
    ) -> TuneOutcome {
        let mut trace = Trace::new(self.trace_capacity);
        trace.push(format!("tune {} id={} index={:?}", ip, channel_id, index));
        let deadline = Instant::now() + self.budget;
        let number = index
            .map(|i| i.to_string())
            .unwrap_or_else(|| channel_id.to_string());
        // The key fallback keeps its share of the budget even when every
        // port stays silent until the deadline.
        let key_reserve = self.keypad.worst_case(&number).min(self.budget / 2);
        let request_deadline = deadline - key_reserve;

        let mut outcome_url = stream_url(ip, channel_id);
        let mut source = UrlSource::Derived;
        let mut reported_by = None;
        let mut remote_keys_sent = false;

        let reported = tokio::time::timeout_at(
            request_deadline,
            self.request_play_url(ip, channel_id, index, &mut trace),
        )
        .await
        .unwrap_or_else(|_| {
            trace.push(format!(
                "tune requests exhausted their {:?} share of the budget",
                self.budget - key_reserve
            ));
            None
        });

        match reported {
            Some((url, port)) => {
                outcome_url = url;
                source = UrlSource::Reported;
                reported_by = Some(port);
            }
            None => {
                let sent = tokio::time::timeout_at(
                    deadline,
                    self.keypad.send_number(ip, &number, &mut trace),
                )
                .await;
                match sent {
                    Ok(sent) => remote_keys_sent = sent,
                    Err(_) => trace.push("tune budget exhausted during remote keys"),
                }
            }
        }

        trace.push(format!("tune url {} ({})", outcome_url, source));
        let launched = match launcher.launch(&outcome_url) {
            Ok(()) => true,
            Err(e) => {
                warn!("[Tune {}] Launch failed: {}", ip, e);
                trace.push(format!("launch failed: {}", e));
                false
            }
        };
        info!(
            "[Tune {}] channel {} -> {} ({})",
            ip, channel_id, outcome_url, source
        );

        TuneOutcome {
            url: outcome_url,
            source,
            reported_by,
            remote_keys_sent,
            launched,
            trace,
        }
    }

    /// Try each distinct candidate port in rank order until one reports a
    /// play URL.
    async fn request_play_url(
        &self,
        ip: &str,
        channel_id: &str,
        index: Option<u32>,
        trace: &mut Trace,
    ) -> Option<(String, u16)> {
        let mut settings = self.settings.clone();
        settings.drain_timeout = self.response_timeout;
        let commands = tune_commands(channel_id, index);
        let mut tried = Vec::new();

        for candidate in &self.candidates {
            if tried.contains(&candidate.port) {
                continue;
            }
            tried.push(candidate.port);

            let mut config = candidate.clone();
            config.command_sequence = commands.clone();
            let mut session = Session::new(ip, config, &settings);

            let stream = match session.connect(&settings, trace).await {
                Ok(stream) => stream,
                Err(e) => {
                    trace.attempt(format_args!("tune {}: {}", candidate, e));
                    continue;
                }
            };

            let mut found = None;
            let end = session
                .run(stream, &self.identity, &settings, trace, |payload| {
                    found = reported_play_url(payload);
                    found.is_some()
                })
                .await;
            session.finish(found.is_some());
            trace.attempt(format_args!(
                "tune {}: sent={} payloads={} end={}",
                candidate,
                session.sent_frames,
                session.received_payloads.len(),
                end
            ));

            if let Some(url) = found {
                return Some((url, candidate.port));
            }
        }
        None
    }
}
