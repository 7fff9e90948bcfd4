//! Shared application state, handed to every handler behind an `Arc`: one
//! upstream and one Redis-backed store, not a ranked connection pool.

use std::sync::Arc;
use std::time::Duration;

use ethers::providers::{Http, Provider};

use crate::config::Config;
use crate::policy::PolicyClient;
use firewall_metrics::MetricsRegistry;
use reservation_store::ReservationStore;

static APP_USER_AGENT: &str = concat!("aegis-firewall/", env!("CARGO_PKG_VERSION"));

pub struct AegisApp {
    pub config: Config,
    pub http_client: reqwest::Client,
    pub policy_client: PolicyClient,
    pub reservation_store: ReservationStore,
    pub metrics: Arc<MetricsRegistry>,
    pub metrics_recorder: firewall_metrics::MetricsRecorder,
}

impl AegisApp {
    pub async fn spawn(config: Config) -> anyhow::Result<(Arc<Self>, firewall_metrics::MetricsRecorder)> {
        let http_client = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.request_timeout)
            .user_agent(APP_USER_AGENT)
            .build()?;

        let (metrics, recorder) = MetricsRegistry::spawn();

        let provider = Arc::new(Provider::<Http>::try_from(config.upstream_url.clone())?);
        let policy_client = PolicyClient::new(provider, config.contract_address, recorder.clone());

        let reservation_store = ReservationStore::connect(&config.kv_url, 16)
            .await?
            .with_max_retries(config.reserve_max_retries);

        let app = Arc::new(Self {
            config,
            http_client,
            policy_client,
            reservation_store,
            metrics,
            metrics_recorder: recorder.clone(),
        });

        Ok((app, recorder))
    }
}
