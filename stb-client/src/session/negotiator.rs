//! Candidate-by-candidate catalog negotiation.

use std::fmt;

use log::{info, warn};

use crate::catalog::{extract, Catalog};
use crate::config::Config;
use crate::session::attempt::{DeviceIdentity, DrainEnd, Session, SessionSettings};
use crate::session::candidate::CandidateConfig;
use crate::trace::Trace;

/// How one attempt went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub candidate: CandidateConfig,
    /// `None` when the connection never opened.
    pub drain_end: Option<DrainEnd>,
    pub connect_error: Option<String>,
    pub sent_frames: usize,
    pub frames: usize,
    pub payloads: usize,
    pub channels: usize,
}

impl fmt::Display for AttemptReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.connect_error, &self.drain_end) {
            (Some(err), _) => write!(f, "{}: connect failed: {}", self.candidate, err),
            (None, end) => write!(
                f,
                "{}: sent={} frames={} payloads={} channels={} end={}",
                self.candidate,
                self.sent_frames,
                self.frames,
                self.payloads,
                self.channels,
                end.as_ref().map(ToString::to_string).unwrap_or_default()
            ),
        }
    }
}

/// Result of [`Negotiator::fetch_catalog`]. Never an error: total failure
/// is an empty catalog with `committed == None`.
#[derive(Debug)]
pub struct FetchOutcome {
    pub catalog: Catalog,
    pub committed: Option<CandidateConfig>,
    pub attempts: Vec<AttemptReport>,
    pub trace: Trace,
}

/// Walks the ranked candidates until one produces channels.
#[derive(Debug, Clone)]
pub struct Negotiator {
    settings: SessionSettings,
    identity: DeviceIdentity,
    candidates: Vec<CandidateConfig>,
    trace_capacity: usize,
}

impl Negotiator {
    pub fn new(
        settings: SessionSettings,
        identity: DeviceIdentity,
        candidates: Vec<CandidateConfig>,
        trace_capacity: usize,
    ) -> Self {
        Self {
            settings,
            identity,
            candidates,
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
            config.trace.capacity,
        )
    }

    /// Fetch the channel catalog from `ip`.
    ///
    /// Candidates run strictly in order. Each writes one attempt summary
    /// to the trace; the first non-empty catalog is returned and its
    /// candidate committed.
    pub async fn fetch_catalog(&self, ip: &str) -> FetchOutcome {
        let mut trace = Trace::new(self.trace_capacity);
        let mut attempts = Vec::with_capacity(self.candidates.len());
        trace.push(format!("fetch_catalog {} ({} candidates)", ip, self.candidates.len()));

        for (n, candidate) in self.candidates.iter().enumerate() {
            let (catalog, report) = self.attempt(ip, candidate, &mut trace).await;
            trace.attempt(format_args!("#{} {}", n + 1, report));
            attempts.push(report);

            if !catalog.is_empty() {
                info!(
                    "[Negotiator {}] Committed {} with {} channels",
                    ip,
                    candidate,
                    catalog.len()
                );
                return FetchOutcome {
                    catalog,
                    committed: Some(candidate.clone()),
                    attempts,
                    trace,
                };
            }
        }

        warn!(
            "[Negotiator {}] No channels after {} attempts",
            ip,
            attempts.len()
        );
        FetchOutcome {
            catalog: Catalog::new(ip),
            committed: None,
            attempts,
            trace,
        }
    }

    async fn attempt(
        &self,
        ip: &str,
        candidate: &CandidateConfig,
        trace: &mut Trace,
    ) -> (Catalog, AttemptReport) {
        let mut session = Session::new(ip, candidate.clone(), &self.settings);
        let mut report = AttemptReport {
            candidate: candidate.clone(),
            drain_end: None,
            connect_error: None,
            sent_frames: 0,
            frames: 0,
            payloads: 0,
            channels: 0,
        };

        let stream = match session.connect(&self.settings, trace).await {
            Ok(stream) => stream,
            Err(e) => {
                trace.push(e.to_string());
                report.connect_error = Some(e.to_string());
                return (Catalog::new(ip), report);
            }
        };

        let end = session
            .run(stream, &self.identity, &self.settings, trace, |_| false)
            .await;
        let catalog = extract(&session.received_payloads, ip);
        session.finish(!catalog.is_empty());

        report.drain_end = Some(end);
        report.sent_frames = session.sent_frames;
        report.frames = session.frames;
        report.payloads = session.received_payloads.len();
        report.channels = catalog.len();
        if catalog.skipped_records > 0 {
            trace.push(format!("skipped {} unusable records", catalog.skipped_records));
        }
        (catalog, report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stb_protocol::{encode_binary_header, ByteOrder, ProtocolError};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::session::attempt::AttemptState;
    use crate::session::candidate::{SequenceKind, WindowPlan};
    use crate::session::mock::{closed_port, zlib, zlib_frame, MockStb};

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_millis(500),
            drain_timeout: Duration::from_millis(1_500),
            poll_interval: Duration::from_millis(5),
            send_delay: Duration::ZERO,
            login_delay: Duration::ZERO,
            stall_timeout: Duration::from_millis(500),
        }
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            label: "test".to_string(),
            id: "00000000-0000-4000-8000-000000000000-02:00:00:00:00:00".to_string(),
        }
    }

    fn candidate(port: u16, order: ByteOrder, login: bool) -> CandidateConfig {
        CandidateConfig {
            port,
            header_byte_order: order,
            requires_login: login,
            command_sequence: SequenceKind::Minimal.build(WindowPlan { size: 100, count: 2 }),
        }
    }

    #[tokio::test]
    async fn test_out_of_bounds_length_keeps_earlier_payloads() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let settings = fast_settings();
        let cand = candidate(20000, ByteOrder::Little, false);
        let mut session = Session::new("10.0.0.5", cand, &settings);
        let mut trace = Trace::new(12_000);

        let stb = tokio::spawn(async move {
            let good = zlib_frame(
                r#"[{"ServiceName":"BBC ONE","ServiceID":"100001"}]"#,
                ByteOrder::Little,
            );
            server.write_all(&good).await.unwrap();
            server
                .write_all(&encode_binary_header(-1, 0, 0, ByteOrder::Little))
                .await
                .unwrap();
            server.write_all(&[0xAA; 64]).await.unwrap();
            // Drain whatever the client sent so its writes never block.
            let mut sink = Vec::new();
            let _ = server.read_to_end(&mut sink).await;
        });

        let end = session
            .run(client, &identity(), &settings, &mut trace, |_| false)
            .await;
        assert_eq!(end, DrainEnd::Desync(ProtocolError::PayloadOutOfBounds(-1)));
        assert_eq!(session.received_payloads.len(), 1);
        assert_eq!(session.sent_frames, 5);

        let catalog = extract(&session.received_payloads, "10.0.0.5");
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.channels()[0].id, "100001");
        assert!(trace.snapshot().contains("desync"));

        session.finish(true);
        assert_eq!(session.state(), AttemptState::Closed);
        drop(session);
        stb.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_magic_salvages_zlib_from_raw_bytes() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut settings = fast_settings();
        settings.drain_timeout = Duration::from_millis(300);
        let cand = candidate(20000, ByteOrder::Little, false);
        let mut session = Session::new("10.0.0.5", cand, &settings);
        let mut trace = Trace::new(12_000);

        tokio::spawn(async move {
            let mut raw = b"JUNKHEADER......".to_vec();
            raw.extend(zlib(r#"{"channels":[{"name":"Rescued","id":"42"}]}"#));
            server.write_all(&raw).await.unwrap();
            let mut sink = Vec::new();
            let _ = server.read_to_end(&mut sink).await;
        });

        let end = session
            .run(client, &identity(), &settings, &mut trace, |_| false)
            .await;
        assert!(matches!(end, DrainEnd::Desync(ProtocolError::InvalidMagic(_))));

        let catalog = extract(&session.received_payloads, "10.0.0.5");
        assert_eq!(catalog.get("42").map(|c| c.name.as_str()), Some("Rescued"));
    }

    #[tokio::test]
    async fn test_all_candidates_fail() {
        let a = closed_port().await;
        let b = closed_port().await;
        let negotiator = Negotiator::new(
            fast_settings(),
            identity(),
            vec![
                candidate(a, ByteOrder::Little, true),
                candidate(b, ByteOrder::Big, false),
            ],
            12_000,
        );

        let outcome = negotiator.fetch_catalog("127.0.0.1").await;
        assert!(outcome.catalog.is_empty());
        assert!(outcome.committed.is_none());
        assert_eq!(outcome.trace.attempt_count(), 2);
        assert!(outcome.attempts.iter().all(|r| r.connect_error.is_some()));
    }

    #[tokio::test]
    async fn test_commits_first_candidate_with_channels() {
        let dead = closed_port().await;
        let catalog_json = r#"{"list":[{"ServiceID":"1","ServiceName":"One"},{"ServiceID":"2","ServiceName":"Two"}]}"#;
        let stb = MockStb::start(
            vec![zlib_frame(catalog_json, ByteOrder::Little)],
            26,
            Duration::from_secs(5),
        )
        .await;
        let spare = MockStb::start(Vec::new(), 26, Duration::from_secs(5)).await;

        let negotiator = Negotiator::new(
            fast_settings(),
            identity(),
            vec![
                candidate(dead, ByteOrder::Little, true),
                candidate(stb.port, ByteOrder::Little, true),
                candidate(spare.port, ByteOrder::Little, true),
            ],
            12_000,
        );

        let outcome = negotiator.fetch_catalog("127.0.0.1").await;
        assert_eq!(outcome.catalog.len(), 2);
        assert_eq!(outcome.committed.as_ref().map(|c| c.port), Some(stb.port));
        assert_eq!(outcome.trace.attempt_count(), 2);
        assert_eq!(*spare.connections.lock(), 0);

        let requests = stb.requests.lock().clone();
        assert!(requests[0].contains(r#"<Command request="998">"#));
        assert!(requests[0].contains("<data>test</data>"));
        assert!(requests.iter().any(|r| r.contains(r#""FromIndex":"100""#)));
        assert!(requests.last().unwrap().contains(r#""request":"26""#));
    }
}
