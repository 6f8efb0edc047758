// src/bus.rs - Telemetry bus topics, inbound routing and publishing
use crate::command::DirectCommand;
use crate::coordinator::{Event, SettingsSource};
use crate::error::{GatewayError, Result};
use crate::settings::{SettingsEnvelope, TelemetryReading};
use serde::Serialize;
use tracing::{debug, trace};

#[cfg(feature = "mqtt")]
pub use self::mqtt::{MqttBridge, MqttPublisher};

/// Shared telemetry channel all gateways listen on.
pub const TELEMETRY_TOPIC: &str = "EWS.telemetry";

/// Where a gateway asks the backend to push its settings.
pub const SETTINGS_REQUEST_TOPIC: &str = "request-setting";

/// Topic names scoped to one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub telemetry: String,
    pub settings: String,
    pub refresh: String,
    pub direct_serial: String,
    /// Outbound acks and heartbeats
    pub connection: String,
}

impl Topics {
    pub fn for_unit(unit_id: &str) -> Self {
        Self {
            telemetry: TELEMETRY_TOPIC.to_string(),
            settings: format!("EWS.Settings.{}", unit_id),
            refresh: format!("EWS.Connection.{}", unit_id),
            direct_serial: format!("EWS.DirectSerial.{}", unit_id),
            connection: format!("connection.{}", unit_id),
        }
    }

    /// Topics the gateway subscribes to.
    pub fn inbound(&self) -> [&str; 4] {
        [
            &self.telemetry,
            &self.settings,
            &self.refresh,
            &self.direct_serial,
        ]
    }
}

/// Outbound side of the bus. Must not block: implementations queue.
#[cfg_attr(test, mockall::automock)]
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// Serialize `body` as JSON and publish it.
pub fn publish_json<T: Serialize + ?Sized>(
    publisher: &dyn Publisher,
    topic: &str,
    body: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    publisher.publish(topic, payload)
}

/// Decode an inbound message into a coordinator event.
///
/// Returns `Ok(None)` for topics the gateway does not handle.
pub fn route(topics: &Topics, topic: &str, payload: &[u8]) -> Result<Option<Event>> {
    trace!(topic, bytes = payload.len(), "inbound message");

    let malformed = |e: serde_json::Error| GatewayError::Payload {
        topic: topic.to_string(),
        reason: e.to_string(),
    };

    let event = if topic == topics.telemetry {
        let reading: TelemetryReading = serde_json::from_slice(payload).map_err(malformed)?;
        Event::Telemetry(reading)
    } else if topic == topics.settings {
        let envelope: SettingsEnvelope = serde_json::from_slice(payload).map_err(malformed)?;
        Event::Settings {
            settings: envelope.settings,
            source: SettingsSource::Bus,
        }
    } else if topic == topics.refresh {
        Event::Refresh
    } else if topic == topics.direct_serial {
        let direct: DirectCommand = serde_json::from_slice(payload).map_err(malformed)?;
        Event::Direct(direct)
    } else {
        debug!(topic, "message on unhandled topic ignored");
        return Ok(None);
    };

    Ok(Some(event))
}

#[cfg(feature = "mqtt")]
mod mqtt {
    use super::{publish_json, route, Publisher, Topics, SETTINGS_REQUEST_TOPIC};
    use crate::config::MqttConfig;
    use crate::coordinator::Event;
    use crate::error::{GatewayError, Result};
    use crate::settings::SettingsRequest;
    use rumqttc::{AsyncClient, Event as MqttEvent, EventLoop, MqttOptions, Packet, QoS};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tracing::{error, info, warn};

    fn qos_from(level: u8) -> QoS {
        match level {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        }
    }

    /// Non-blocking publisher backed by the MQTT client request queue.
    #[derive(Clone)]
    pub struct MqttPublisher {
        client: AsyncClient,
        qos: QoS,
    }

    impl Publisher for MqttPublisher {
        fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            self.client
                .try_publish(topic, self.qos, false, payload)
                .map_err(|e| GatewayError::Transport(format!("MQTT publish to '{}': {}", topic, e)))
        }
    }

    /// Drives the MQTT connection and feeds inbound messages to the coordinator.
    pub struct MqttBridge {
        client: AsyncClient,
        eventloop: EventLoop,
        topics: Topics,
        unit_id: String,
        qos: QoS,
        reconnect_delay: Duration,
        events: mpsc::Sender<Event>,
    }

    impl MqttBridge {
        pub fn new(
            config: &MqttConfig,
            unit_id: &str,
            events: mpsc::Sender<Event>,
        ) -> (Self, Arc<MqttPublisher>) {
            let mut options = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
            options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

            let (client, eventloop) = AsyncClient::new(options, 100);
            let qos = qos_from(config.qos);
            let publisher = Arc::new(MqttPublisher {
                client: client.clone(),
                qos,
            });

            let bridge = Self {
                client,
                eventloop,
                topics: Topics::for_unit(unit_id),
                unit_id: unit_id.to_string(),
                qos,
                reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
                events,
            };
            (bridge, publisher)
        }

        /// Poll the connection until the coordinator goes away.
        ///
        /// Connection and subscription failures are logged and retried;
        /// rumqttc reconnects on the next poll and every ConnAck subscribes
        /// again. The only exit is `ChannelClosed`.
        pub async fn run(mut self) -> Result<()> {
            info!(unit = %self.unit_id, "MQTT bridge started");
            loop {
                match self.eventloop.poll().await {
                    Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                        self.on_connected();
                        self.forward(Event::BusConnected).await?;
                    }
                    Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                        match route(&self.topics, &publish.topic, &publish.payload) {
                            Ok(Some(event)) => self.forward(event).await?,
                            Ok(None) => {}
                            Err(e) => warn!("Dropping message: {}", e),
                        }
                    }
                    Ok(MqttEvent::Incoming(Packet::Disconnect)) => {
                        warn!("Broker closed the MQTT session");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        tokio::time::sleep(self.reconnect_delay).await;
                    }
                }
            }
        }

        /// Subscribe and request settings. Returns how many subscriptions
        /// were queued.
        fn on_connected(&self) -> usize {
            let mut subscribed = 0;
            for topic in self.topics.inbound() {
                match self.client.try_subscribe(topic, QoS::AtLeastOnce) {
                    Ok(()) => subscribed += 1,
                    Err(e) => warn!(topic = %topic, "MQTT subscribe failed, retrying on next connect: {}", e),
                }
            }

            let publisher = MqttPublisher {
                client: self.client.clone(),
                qos: self.qos,
            };
            let request = SettingsRequest {
                serial_number: self.unit_id.clone(),
            };
            if let Err(e) = publish_json(&publisher, SETTINGS_REQUEST_TOPIC, &request) {
                warn!("Settings request not sent: {}", e);
            }
            subscribed
        }

        async fn forward(&mut self, event: Event) -> Result<()> {
            self.events
                .send(event)
                .await
                .map_err(|_| GatewayError::ChannelClosed)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn bridge() -> (MqttBridge, Arc<MqttPublisher>, mpsc::Receiver<Event>) {
            let (tx, rx) = mpsc::channel(4);
            let config = MqttConfig {
                broker_host: "127.0.0.1".to_string(),
                client_id: "bridge-test".to_string(),
                ..MqttConfig::default()
            };
            let (bridge, publisher) = MqttBridge::new(&config, "U1", tx);
            (bridge, publisher, rx)
        }

        #[tokio::test]
        async fn connect_subscribes_every_inbound_topic() {
            let (bridge, _publisher, _rx) = bridge();
            assert_eq!(bridge.on_connected(), 4);
        }

        #[tokio::test]
        async fn full_request_queue_does_not_end_the_bridge() {
            let (mut bridge, publisher, _rx) = bridge();
            // Nothing polls the event loop, so the request queue fills up.
            while publisher.publish("filler", Vec::new()).is_ok() {}

            assert_eq!(bridge.on_connected(), 0);
            assert!(bridge.forward(Event::BusConnected).await.is_ok());
        }
    }
}
