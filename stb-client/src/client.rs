//! High-level facade used by the binary and embedders.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::discovery::{sweep_subnet, SweepHit};
use crate::error::{ClientError, Result};
use crate::host::{resolve_device_id, PlaybackLauncher, SettingsStore};
use crate::pool::WorkerPool;
use crate::session::{FetchOutcome, Negotiator};
use crate::tune::{TuneOutcome, TuningController};

pub struct StbClient {
    config: Arc<Config>,
    store: Arc<dyn SettingsStore>,
    launcher: Arc<dyn PlaybackLauncher>,
    pool: WorkerPool,
    device_id: String,
}

impl StbClient {
    pub fn new(
        config: Config,
        store: Arc<dyn SettingsStore>,
        launcher: Arc<dyn PlaybackLauncher>,
    ) -> Self {
        let device_id = resolve_device_id(config.device.id.as_deref(), store.as_ref());
        let pool = WorkerPool::new(config.pool.max_workers);
        Self {
            config: Arc::new(config),
            store,
            launcher,
            pool,
            device_id,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// STB address: explicit argument, then configuration, then the last
    /// address remembered by the store.
    pub fn resolve_address(&self, ip: Option<&str>) -> Result<String> {
        let address = ip
            .map(str::to_string)
            .or_else(|| self.config.stb.address.clone())
            .or_else(|| self.store.stb_address())
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ClientError::Config("no STB address configured".into()))?;
        Ok(address)
    }

    /// Run a store write on the blocking pool; stores may touch the disk.
    async fn persist<F>(&self, write: F)
    where
        F: FnOnce(&dyn SettingsStore) + Send + 'static,
    {
        let store = self.store.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || write(store.as_ref())).await {
            warn!("[Client] Settings write failed: {}", e);
        }
    }

    /// Fetch the catalog and persist the trace snapshot. A non-empty
    /// catalog also replaces the cached channel list.
    pub async fn fetch_channels(&self, ip: Option<&str>) -> Result<FetchOutcome> {
        let ip = self.resolve_address(ip)?;
        let address = ip.clone();
        self.persist(move |store| store.set_stb_address(&address)).await;
        let negotiator = Negotiator::from_config(&self.config, self.device_id.clone());

        let task_ip = ip.clone();
        let outcome = self
            .pool
            .spawn(async move { negotiator.fetch_catalog(&task_ip).await })
            .await?;

        let snapshot = outcome.trace.snapshot();
        let cache = if outcome.catalog.is_empty() {
            warn!("[Client] No channels from {}", ip);
            None
        } else {
            info!("[Client] {} channels from {}", outcome.catalog.len(), ip);
            Some(outcome.catalog.to_json())
        };
        self.persist(move |store| {
            store.set_last_trace(&snapshot);
            if let Some(json) = cache {
                store.set_cached_channels(&json);
            }
        })
        .await;
        Ok(outcome)
    }

    /// Channel list saved by the last successful fetch.
    pub fn cached_channels(&self, ip: Option<&str>) -> Option<Catalog> {
        let ip = self.resolve_address(ip).ok()?;
        let json = self.store.cached_channels()?;
        Catalog::from_json(&ip, &json)
            .map_err(|e| warn!("[Client] Ignoring unreadable channel cache: {}", e))
            .ok()
    }

    /// Tune a channel and launch playback of the resulting URL.
    pub async fn tune(
        &self,
        channel_id: &str,
        index: Option<u32>,
        ip: Option<&str>,
    ) -> Result<TuneOutcome> {
        let ip = self.resolve_address(ip)?;
        let address = ip.clone();
        self.persist(move |store| store.set_stb_address(&address)).await;
        let tuner = TuningController::from_config(&self.config, self.device_id.clone());
        let launcher = self.launcher.clone();
        let channel_id = channel_id.to_string();

        let outcome = self
            .pool
            .spawn(async move {
                tuner
                    .tune(&ip, &channel_id, index, launcher.as_ref())
                    .await
            })
            .await?;

        let snapshot = outcome.trace.snapshot();
        self.persist(move |store| store.set_last_trace(&snapshot)).await;
        Ok(outcome)
    }

    /// Sweep a /24 for hosts answering on `ports`.
    pub async fn discover(&self, subnet: Ipv4Addr, ports: &[u16]) -> Vec<SweepHit> {
        let timeout = Duration::from_millis(self.config.session.connect_timeout_ms);
        sweep_subnet(subnet, ports, timeout, &self.pool).await
    }

    pub fn last_trace(&self) -> Option<String> {
        self.store.last_trace()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stb_protocol::ByteOrder;

    use super::*;
    use crate::host::{JsonFileStore, MemoryStore, StdoutLauncher};
    use crate::session::mock::{closed_port, zlib_frame, MockStb};
    use crate::session::{CandidateSpec, SequenceKind};

    fn config_for(port: u16) -> Config {
        let mut config = Config::default();
        config.session.connect_timeout_ms = 500;
        config.session.drain_timeout_ms = 1_500;
        config.session.poll_interval_ms = 5;
        config.session.send_delay_ms = 0;
        config.session.login_delay_ms = 0;
        config.session.window_count = 2;
        config.device.id = Some("fixed-id".into());
        config.candidates = vec![CandidateSpec {
            port,
            byte_order: ByteOrder::Little,
            login: true,
            sequence: SequenceKind::Full,
        }];
        config
    }

    #[tokio::test]
    async fn test_fetch_persists_trace_and_cache() {
        let stb = MockStb::start(
            vec![zlib_frame(
                r#"[{"ServiceName":"BBC ONE","ServiceID":"100001"}]"#,
                ByteOrder::Little,
            )],
            26,
            Duration::from_secs(5),
        )
        .await;
        let store = Arc::new(MemoryStore::new());
        let client = StbClient::new(config_for(stb.port), store.clone(), Arc::new(StdoutLauncher));

        let outcome = client.fetch_channels(Some("127.0.0.1")).await.unwrap();
        assert_eq!(outcome.catalog.len(), 1);
        assert!(outcome.committed.is_some());

        let saved = store.snapshot();
        assert_eq!(saved.stb_address.as_deref(), Some("127.0.0.1"));
        assert!(saved.last_trace.unwrap().contains("attempt "));
        assert!(saved
            .cached_channels
            .unwrap()
            .contains("http://127.0.0.1:8085/player.100001"));

        let cached = client.cached_channels(None).unwrap();
        assert_eq!(cached.channels()[0].name, "BBC ONE");
        assert!(stb.requests.lock()[0].contains("<uuid>fixed-id</uuid>"));
    }

    #[tokio::test]
    async fn test_missing_address_is_config_error() {
        let client = StbClient::new(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(StdoutLauncher),
        );
        assert!(matches!(
            client.fetch_channels(None).await,
            Err(ClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_fetch_writes_trace_to_file_store() {
        let path = std::env::temp_dir().join(format!("stb-client-state-{}.json", uuid::Uuid::new_v4()));
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        let client = StbClient::new(
            config_for(closed_port().await),
            store,
            Arc::new(StdoutLauncher),
        );

        let outcome = client.fetch_channels(Some("127.0.0.1")).await.unwrap();
        assert!(outcome.catalog.is_empty());

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("\"last_trace\""));
        assert!(saved.contains("127.0.0.1"));
        assert_eq!(client.last_trace(), Some(outcome.trace.snapshot()));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_generated_device_id_is_stored() {
        let store = Arc::new(MemoryStore::new());
        let client = StbClient::new(Config::default(), store.clone(), Arc::new(StdoutLauncher));
        assert_eq!(store.device_id().as_deref(), Some(client.device_id()));
    }
}
