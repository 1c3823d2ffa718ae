//! Configuration loading for stb-client.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. TOML file (`--config`, or `stb-client.toml` in the working directory)
//! 3. Environment variables (`STB_CLIENT_*`)
//! 4. Command line flags (applied by the binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;

use crate::error::{ClientError, Result};
use crate::session::candidate::{default_candidate_specs, CandidateConfig, CandidateSpec, WindowPlan};
use crate::trace::DEFAULT_TRACE_CAPACITY;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "stb-client.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stb: StbSection,
    pub session: SessionSection,
    pub device: DeviceSection,
    pub trace: TraceSection,
    pub pool: PoolSection,
    pub tune: TuneSection,
    pub remote: RemoteSection,
    pub logging: LoggingSection,
    pub candidates: Vec<CandidateSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StbSection {
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub connect_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub send_delay_ms: u64,
    pub login_delay_ms: u64,
    pub stall_timeout_ms: u64,
    pub window_size: u32,
    pub window_count: u32,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_500,
            drain_timeout_ms: 12_000,
            poll_interval_ms: 15,
            send_delay_ms: 20,
            login_delay_ms: 50,
            stall_timeout_ms: 3_000,
            window_size: 100,
            window_count: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub label: String,
    /// Fixed device identifier. When unset, one is generated once and kept
    /// in the settings store.
    pub id: Option<String>,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            label: "stb-client".to_string(),
            id: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraceSection {
    pub capacity: usize,
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub max_workers: usize,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self { max_workers: 16 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TuneSection {
    pub budget_ms: u64,
    pub response_timeout_ms: u64,
}

impl Default for TuneSection {
    fn default() -> Self {
        Self {
            budget_ms: 8_000,
            response_timeout_ms: 2_500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub enabled: bool,
    /// `{ip}`, `{port}` and `{code}` are substituted.
    pub url_template: String,
    pub port: u16,
    /// Key codes for digits 0-9.
    pub digit_codes: Vec<u32>,
    pub ok_code: u32,
    pub key_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            enabled: true,
            url_template: "http://{ip}:{port}/api/remotecontrol?command={code}".to_string(),
            port: 80,
            // Linux input event codes: KEY_0 = 11, KEY_1..KEY_9 = 2..10, KEY_OK = 352.
            digit_codes: vec![11, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            ok_code: 352,
            key_delay_ms: 150,
            request_timeout_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub level: Option<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            retention_days: 7,
            level: None,
        }
    }
}

impl Config {
    /// Load configuration from an explicit path, the default file, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(|| {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            default_path.exists().then_some(default_path)
        });

        let mut config = match path {
            Some(path) => {
                info!("Loading configuration from {:?}", path);
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
                Self::from_toml(&contents)?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Apply `STB_CLIENT_*` overrides through the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("STB_CLIENT_ADDRESS") {
            self.stb.address = Some(addr);
        }
        if let Some(ms) = lookup("STB_CLIENT_CONNECT_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.session.connect_timeout_ms = ms;
        }
        if let Some(ms) = lookup("STB_CLIENT_DRAIN_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.session.drain_timeout_ms = ms;
        }
        if let Some(label) = lookup("STB_CLIENT_DEVICE_LABEL") {
            self.device.label = label;
        }
        debug!(
            "Configuration: address={:?}, candidates={}",
            self.stb.address,
            self.candidates.len()
        );
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.max_workers == 0 {
            return Err(ClientError::Config("pool.max_workers must be > 0".into()));
        }
        if self.session.window_size == 0 {
            return Err(ClientError::Config("session.window_size must be > 0".into()));
        }
        if self
            .session
            .window_size
            .checked_mul(self.session.window_count)
            .is_none()
        {
            return Err(ClientError::Config(
                "session.window_size * session.window_count must fit in u32".into(),
            ));
        }
        if self.remote.digit_codes.len() != 10 {
            return Err(ClientError::Config(
                "remote.digit_codes needs exactly 10 entries".into(),
            ));
        }
        Ok(())
    }

    /// Ranked candidates: configured rows, or the built-in table.
    pub fn candidates(&self) -> Vec<CandidateConfig> {
        let windows = self.session.windows();
        let specs = if self.candidates.is_empty() {
            default_candidate_specs()
        } else {
            self.candidates.clone()
        };
        specs.iter().map(|s| s.resolve(windows)).collect()
    }
}

impl SessionSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn login_delay(&self) -> Duration {
        Duration::from_millis(self.login_delay_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms.max(1))
    }

    pub fn windows(&self) -> WindowPlan {
        WindowPlan {
            size: self.window_size,
            count: self.window_count,
        }
    }
}
