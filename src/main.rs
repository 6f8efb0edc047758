use anyhow::{Context, Result};
use ews_gateway::bus::MqttBridge;
use ews_gateway::panel::{self, SerialWriter};
use ews_gateway::probe::{bootstrap_settings, BackendClient, ConnectivityProbe};
use ews_gateway::{channel, Coordinator, CoordinatorOptions, GatewayConfig};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal in production
    let _ = dotenvy::dotenv();
    ews_gateway::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("EWS_CONFIG").ok())
        .map(PathBuf::from);

    let config = GatewayConfig::load(config_path.as_deref())
        .with_context(|| match &config_path {
            Some(path) => format!("loading configuration from {}", path.display()),
            None => "loading configuration from environment".to_string(),
        })?;

    info!(
        unit = %config.unit_id,
        mode = %config.mode,
        broker = %format!("{}:{}", config.mqtt.broker_host, config.mqtt.broker_port),
        serial = %config.serial.path,
        "EWS gateway v{} starting",
        ews_gateway::VERSION
    );

    let (events_tx, events_rx) = channel();

    // Panel output: the coordinator is the only sender
    let (panel_queue, panel_rx) = panel::queue(panel::PANEL_QUEUE_DEPTH);
    tokio::spawn(SerialWriter::new(config.serial.clone(), panel_rx).run());

    // Bus
    let (bridge, publisher) = MqttBridge::new(&config.mqtt, &config.unit_id, events_tx.clone());
    let mut bridge_task = tokio::spawn(bridge.run());

    // Connectivity probe
    let probe = ConnectivityProbe::new(&config.probe).context("building connectivity probe")?;
    tokio::spawn(probe.run(events_tx.clone()));

    // Startup settings, if a backend is configured
    if let Some(backend) = BackendClient::from_config(&config.backend).context("building backend client")? {
        tokio::spawn(bootstrap_settings(backend, config.unit_id.clone(), events_tx.clone()));
    }

    let coordinator = Coordinator::new(
        CoordinatorOptions::from(&config),
        panel_queue,
        publisher,
        &events_tx,
    );
    drop(events_tx);
    let mut coordinator_task = tokio::spawn(coordinator.run(events_rx));

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            coordinator_task.abort();
        }
        res = &mut coordinator_task => {
            if let Err(e) = res {
                error!("Coordinator task failed: {}", e);
                std::process::exit(1);
            }
        }
        res = &mut bridge_task => {
            // Without the bus the gateway is deaf; let the supervisor restart it.
            match res {
                Ok(Ok(())) => error!("MQTT bridge exited"),
                Ok(Err(e)) => error!("MQTT bridge stopped: {}", e),
                Err(e) => error!("MQTT bridge task failed: {}", e),
            }
            coordinator_task.abort();
            std::process::exit(1);
        }
    }

    info!("EWS gateway stopped");
    Ok(())
}
