// src/settings.rs - Live alarm settings and inbound bus payloads
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Alarm settings pushed by the backend for this unit.
///
/// Replaced wholesale on every update; never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Seconds the buzzer stays asserted once triggered
    #[serde(
        alias = "timerAlarmSeconds",
        alias = "timer_alarm",
        deserialize_with = "lenient_u64"
    )]
    pub timer_alarm_seconds: u64,

    /// Minutes before a new trigger is accepted after an episode
    #[serde(
        alias = "delayAlarmMinutes",
        alias = "delay_alarm",
        deserialize_with = "lenient_u64"
    )]
    pub delay_alarm_minutes: u64,

    /// Telemetry source this unit follows
    #[serde(alias = "targetNodeId", alias = "iot_node")]
    pub target_node_id: String,
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timer_alarm_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.delay_alarm_minutes.saturating_mul(60))
    }
}

/// Envelope used on the settings topic and by the backend settings endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsEnvelope {
    pub settings: Settings,
}

/// One water-level reading from the telemetry topic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelemetryReading {
    #[serde(alias = "sourceId", alias = "serial_number")]
    pub source_id: String,

    #[serde(alias = "tma_level", deserialize_with = "lenient_i64")]
    pub level: i64,
}

/// Outbound acknowledgement and heartbeat body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub response: String,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            response: "ok".to_string(),
        }
    }
}

/// Body of the settings request published on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsRequest {
    pub serial_number: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(serde_json::Number),
    Text(String),
}

// Backends have been seen sending numeric fields as strings.
fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => n
            .as_i64()
            .ok_or_else(|| D::Error::custom(format!("expected an integer, got {}", n))),
        NumberOrString::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| D::Error::custom(format!("expected an integer, got '{}'", s))),
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = lenient_i64(deserializer)?;
    u64::try_from(value)
        .map_err(|_| D::Error::custom(format!("expected a non-negative integer, got {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_deployed_field_names() {
        let envelope: SettingsEnvelope = serde_json::from_str(
            r#"{"settings":{"timer_alarm":"30","delay_alarm":5,"iot_node":"N1"}}"#,
        )
        .unwrap();
        assert_eq!(
            envelope.settings,
            Settings {
                timer_alarm_seconds: 30,
                delay_alarm_minutes: 5,
                target_node_id: "N1".to_string(),
            }
        );
        assert_eq!(envelope.settings.timeout(), Duration::from_secs(30));
        assert_eq!(envelope.settings.cooldown(), Duration::from_secs(300));
    }

    #[test]
    fn decodes_camel_case_field_names() {
        let envelope: SettingsEnvelope = serde_json::from_str(
            r#"{"settings":{"timerAlarmSeconds":5,"delayAlarmMinutes":1,"targetNodeId":"N1"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.settings.timer_alarm_seconds, 5);
        assert_eq!(envelope.settings.target_node_id, "N1");
    }

    #[test]
    fn rejects_negative_durations() {
        let result: std::result::Result<SettingsEnvelope, _> = serde_json::from_str(
            r#"{"settings":{"timer_alarm":-1,"delay_alarm":1,"iot_node":"N1"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn decodes_telemetry() {
        let reading: TelemetryReading =
            serde_json::from_str(r#"{"serial_number":"N1","tma_level":3,"extra":true}"#).unwrap();
        assert_eq!(
            reading,
            TelemetryReading {
                source_id: "N1".to_string(),
                level: 3
            }
        );

        let reading: TelemetryReading =
            serde_json::from_str(r#"{"sourceId":"N2","level":"4"}"#).unwrap();
        assert_eq!(reading.level, 4);
    }

    #[test]
    fn ack_body() {
        assert_eq!(serde_json::to_string(&Ack::ok()).unwrap(), r#"{"response":"ok"}"#);
    }
}
