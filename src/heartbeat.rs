// src/heartbeat.rs - Periodic liveness announcements
use crate::bus::{publish_json, Publisher};
use crate::settings::Ack;
use crate::timer::{deadline_after, MAX_DELAY};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, warn};

/// Publishes `{"response":"ok"}` on the unit's connection topic every period.
///
/// `start` and `stop` are idempotent, mirroring the alarm timers.
pub struct HeartbeatPublisher {
    publisher: Arc<dyn Publisher>,
    topic: String,
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatPublisher {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>, period: Duration) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            period,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Begin periodic announcements; the first one goes out after one period.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }

        let publisher = Arc::clone(&self.publisher);
        let topic = self.topic.clone();
        let period = self.period.min(MAX_DELAY);
        let first = deadline_after(period);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                announce(publisher.as_ref(), &topic);
            }
        }));

        debug!(topic = %self.topic, period_secs = self.period.as_secs(), "heartbeat started");
        true
    }

    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                debug!(topic = %self.topic, "heartbeat paused");
                true
            }
            None => false,
        }
    }

    /// Announce once, right now, independent of the periodic schedule.
    pub fn beat(&self) {
        announce(self.publisher.as_ref(), &self.topic);
    }
}

impl Drop for HeartbeatPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn announce(publisher: &dyn Publisher, topic: &str) {
    if let Err(e) = publish_json(publisher, topic, &Ack::ok()) {
        warn!(topic, "heartbeat not published: {}", e);
    }
}
