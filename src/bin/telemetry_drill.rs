// Replays a trigger scenario onto the telemetry bus for field tests.
//
//   telemetry_drill <node_id> [trigger_level] [loops] [period_secs]
//
// Publishes `trigger_level` for `loops` periods, then the clear level once.
use ews_gateway::bus::TELEMETRY_TOPIC;
use ews_gateway::mode::CLEAR_LEVEL;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    ews_gateway::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!("Usage: {} <node_id> [trigger_level] [loops] [period_secs]", args[0]);
        println!("Example: {} EWS-NODE-01 3 15 1", args[0]);
        std::process::exit(1);
    }

    let node_id = args[1].clone();
    let trigger_level: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(3);
    let loops: u32 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(15);
    let period = Duration::from_secs(args.get(4).and_then(|s| s.parse().ok()).unwrap_or(1));

    let host = std::env::var("MQTT_BROKER").unwrap_or_else(|_| "localhost".to_string());
    let port: u16 = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1883);

    let client_id = format!("telemetry-drill-{}", uuid::Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, &host, port);
    options.set_keep_alive(Duration::from_secs(5));

    let (client, mut eventloop) = AsyncClient::new(options, 10);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!("MQTT error: {}", e);
                sleep(Duration::from_secs(1)).await;
            }
        }
    });

    info!(broker = %format!("{}:{}", host, port), node = %node_id, trigger_level, loops, "Starting drill");

    for i in 0..=loops {
        let level = if i < loops { trigger_level } else { CLEAR_LEVEL };
        let body = json!({ "serial_number": node_id, "tma_level": level });
        client
            .publish(TELEMETRY_TOPIC, QoS::AtLeastOnce, false, serde_json::to_vec(&body)?)
            .await?;
        info!(loop_index = i, level, "Published reading");
        sleep(period).await;
    }

    info!("Drill finished");
    Ok(())
}
