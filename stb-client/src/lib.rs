//! Client for GCDH set-top boxes.
//!
//! Recovers the live-channel catalog from the STB control port and issues
//! best-effort tune requests. Framing lives in the `stb-protocol` crate;
//! this crate owns negotiation, extraction, tuning and the ambient pieces
//! (configuration, logging, persisted settings).

pub mod catalog;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod logging;
pub mod pool;
pub mod remote;
pub mod session;
pub mod trace;
pub mod tune;

pub use catalog::{extract, Catalog, Channel};
pub use client::StbClient;
pub use config::Config;
pub use error::{ClientError, Result};
pub use host::{JsonFileStore, MemoryStore, PlaybackLauncher, SettingsStore, StdoutLauncher};
pub use session::{CandidateConfig, FetchOutcome, Negotiator};
pub use trace::Trace;
pub use tune::{TuneOutcome, TuningController, UrlSource};
