// src/probe.rs - Internet reachability probe and backend settings fetch
use crate::config::{BackendConfig, ProbeConfig};
use crate::coordinator::{Event, SettingsSource};
use crate::error::{GatewayError, Result};
use crate::settings::{Settings, SettingsEnvelope};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodically fetches a known-good URL and reports whether it succeeded.
pub struct ConnectivityProbe {
    client: Client,
    url: String,
    period: Duration,
}

impl ConnectivityProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            period: config.interval(),
        })
    }

    /// One probe. Online means HTTP 200; anything else, including a timeout, is offline.
    pub async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                let online = response.status() == StatusCode::OK;
                if !online {
                    debug!(status = %response.status(), "Probe endpoint answered without 200");
                }
                online
            }
            Err(e) => {
                debug!("Probe request failed: {}", e);
                false
            }
        }
    }

    /// Probe immediately, then once per period, until the coordinator goes away.
    pub async fn run(self, events: mpsc::Sender<Event>) {
        info!(url = %self.url, period_secs = self.period.as_secs(), "Connectivity probe started");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let online = self.check().await;
            if events.send(Event::Connectivity(online)).await.is_err() {
                debug!("Coordinator gone, probe stopping");
                return;
            }
        }
    }
}

/// Client for the settings backend.
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    /// `None` when no backend is configured.
    pub fn from_config(config: &BackendConfig) -> Result<Option<Self>> {
        let Some(url) = config.url.as_deref() else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Config(format!("HTTP client: {}", e)))?;

        Ok(Some(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
        }))
    }

    pub fn settings_url(&self, unit_id: &str) -> String {
        format!("{}/public-node/setting/{}", self.base_url, unit_id)
    }

    /// GET the unit's current settings.
    pub async fn fetch_settings(&self, unit_id: &str) -> Result<Settings> {
        let url = self.settings_url(unit_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Transport(format!("GET {}: HTTP {}", url, status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(format!("GET {}: {}", url, e)))?;
        let envelope: SettingsEnvelope = serde_json::from_slice(&body).map_err(|e| GatewayError::Payload {
            topic: url.clone(),
            reason: e.to_string(),
        })?;
        Ok(envelope.settings)
    }
}

/// Fetch settings once at startup and hand them to the coordinator.
///
/// Failure only costs the cold start; settings still arrive over the bus.
pub async fn bootstrap_settings(backend: BackendClient, unit_id: String, events: mpsc::Sender<Event>) {
    match backend.fetch_settings(&unit_id).await {
        Ok(settings) => {
            info!(node = %settings.target_node_id, "Settings fetched from backend");
            let event = Event::Settings {
                settings,
                source: SettingsSource::Backend,
            };
            if events.send(event).await.is_err() {
                debug!("Coordinator gone before backend settings arrived");
            }
        }
        Err(e) => warn!("Backend settings unavailable, waiting for bus: {}", e),
    }
}
