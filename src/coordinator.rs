// src/coordinator.rs - Alarm state coordinator
//
// One task owns all alarm state and drains a single ordered channel. Bus
// messages, probe results and timer expiries are produced elsewhere and only
// ever reach the state through `Event`s, so no handler runs concurrently with
// another and no lock guards the state.
//
// Phases, derived from the flags below:
//
//   Idle ──trigger──► AlarmActive ──timeout──► Cooling ──cooldown──► Idle
//     ▲                    │                      │
//     └──── settings ──────┴──────────────────────┘

use crate::bus::{publish_json, Publisher, Topics};
use crate::command::{DirectCommand, PanelCommand};
use crate::config::GatewayConfig;
use crate::heartbeat::HeartbeatPublisher;
use crate::mode::{is_known_level, map_level, Indication, Mode};
use crate::panel::PanelLink;
use crate::settings::{Ack, Settings, TelemetryReading};
use crate::timer::{Expiry, TimerKind, TimerPair};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of the coordinator's inbound channel.
pub const EVENT_QUEUE_DEPTH: usize = 100;

/// Create the coordinator's inbound channel.
pub fn channel() -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    mpsc::channel(EVENT_QUEUE_DEPTH)
}

/// Where a settings update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsSource {
    /// Pushed on the unit's settings topic; acknowledged on the bus
    Bus,
    /// Fetched from the backend at startup; not acknowledged
    Backend,
}

/// Everything that can change the alarm state.
#[derive(Debug, Clone)]
pub enum Event {
    /// A water-level reading from the telemetry topic
    Telemetry(TelemetryReading),
    /// Replacement settings for this unit
    Settings {
        settings: Settings,
        source: SettingsSource,
    },
    /// Result of a connectivity probe
    Connectivity(bool),
    /// Request to re-send the current decision to the panel
    Refresh,
    /// Operator passthrough written to the panel verbatim
    Direct(DirectCommand),
    /// The bus (re)connected
    BusConnected,
    /// An alarm timer elapsed
    TimerFired(Expiry),
}

/// Coarse view of where the alarm sequence is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Buzzer quiet, no timers pending
    Idle,
    /// Timeout pending, buzzer asserted
    AlarmActive,
    /// Timeout done or cancelled, cooldown still blocking new triggers
    Cooling,
}

/// Snapshot of the coordinator's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlarmState {
    pub indicator_level: u8,
    pub buzzer_armed: bool,
    pub buzzer_silenced: bool,
    pub timeout_active: bool,
    pub cooldown_active: bool,
    pub online: bool,
}

impl AlarmState {
    pub fn phase(&self) -> Phase {
        if self.timeout_active {
            Phase::AlarmActive
        } else if self.cooldown_active || self.buzzer_silenced {
            Phase::Cooling
        } else {
            Phase::Idle
        }
    }
}

/// Fixed identity the coordinator runs with.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub unit_id: String,
    pub mode: Mode,
    pub ack_telemetry: bool,
    pub heartbeat_period: Duration,
}

impl From<&GatewayConfig> for CoordinatorOptions {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            unit_id: config.unit_id.clone(),
            mode: config.mode,
            ack_telemetry: config.ack_telemetry,
            heartbeat_period: config.heartbeat.interval(),
        }
    }
}

/// Owner of the alarm state and the only writer to the panel.
pub struct Coordinator<L: PanelLink> {
    options: CoordinatorOptions,
    topics: Topics,
    settings: Option<Settings>,
    indicator_level: u8,
    buzzer_armed: bool,
    buzzer_silenced: bool,
    online: bool,
    timers: TimerPair,
    heartbeat: HeartbeatPublisher,
    publisher: Arc<dyn Publisher>,
    panel: L,
    // Weak so the loop ends once every external producer is gone.
    events: mpsc::WeakSender<Event>,
}

impl<L: PanelLink> Coordinator<L> {
    pub fn new(
        options: CoordinatorOptions,
        panel: L,
        publisher: Arc<dyn Publisher>,
        events: &mpsc::Sender<Event>,
    ) -> Self {
        let topics = Topics::for_unit(&options.unit_id);
        let heartbeat = HeartbeatPublisher::new(
            Arc::clone(&publisher),
            topics.connection.clone(),
            options.heartbeat_period,
        );

        Self {
            options,
            topics,
            settings: None,
            indicator_level: 0,
            buzzer_armed: false,
            buzzer_silenced: false,
            online: false,
            timers: TimerPair::new(),
            heartbeat,
            publisher,
            panel,
            events: events.downgrade(),
        }
    }

    pub fn state(&self) -> AlarmState {
        AlarmState {
            indicator_level: self.indicator_level,
            buzzer_armed: self.buzzer_armed,
            buzzer_silenced: self.buzzer_silenced,
            timeout_active: self.timers.timeout.is_armed(),
            cooldown_active: self.timers.cooldown.is_armed(),
            online: self.online,
        }
    }

    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_ref()
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    /// Put the panel in a known state: everything off, offline.
    pub fn announce(&mut self) {
        self.emit(PanelCommand::all_off());
    }

    /// Drain events until every producer has hung up.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        info!(unit = %self.options.unit_id, mode = %self.options.mode, "Alarm coordinator started");
        self.announce();

        while let Some(event) = events.recv().await {
            self.handle(event);
        }

        self.timers.cancel_all();
        self.heartbeat.stop();
        info!("Alarm coordinator stopped");
    }

    /// Apply one event. Never blocks and never fails; problems are logged.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Telemetry(reading) => self.on_telemetry(reading),
            Event::Settings { settings, source } => self.on_settings(settings, source),
            Event::Connectivity(online) => self.on_connectivity(online),
            Event::Refresh => {
                self.emit(PanelCommand::new(self.indicator_level, self.buzzer_armed, self.online))
            }
            Event::Direct(direct) => {
                debug!(?direct, "Direct panel command");
                self.emit(direct.into());
            }
            Event::BusConnected => self.on_bus_connected(),
            Event::TimerFired(expiry) => self.on_timer(expiry),
        }
    }

    fn on_telemetry(&mut self, reading: TelemetryReading) {
        let (timeout, cooldown) = match &self.settings {
            None => {
                debug!(source = %reading.source_id, "No settings yet, telemetry ignored");
                return;
            }
            Some(settings) if settings.target_node_id != reading.source_id => {
                debug!(source = %reading.source_id, "Telemetry from another node ignored");
                return;
            }
            Some(settings) => (settings.timeout(), settings.cooldown()),
        };

        if !is_known_level(reading.level) {
            warn!(level = reading.level, "Unknown water level, showing clear");
        }

        let Indication { indicator, trigger } = map_level(reading.level, self.options.mode);
        let buzzer_on = trigger && !self.buzzer_silenced;

        self.indicator_level = indicator;
        self.buzzer_armed = buzzer_on;
        self.emit(PanelCommand::new(indicator, buzzer_on, self.online));

        if buzzer_on {
            self.buzzer_silenced = true;
            let armed_timeout = self.arm(TimerKind::Timeout, timeout);
            let armed_cooldown = self.arm(TimerKind::Cooldown, cooldown);
            if armed_timeout || armed_cooldown {
                self.heartbeat.stop();
            }
            info!(
                indicator,
                timeout_secs = timeout.as_secs(),
                cooldown_secs = cooldown.as_secs(),
                "Alarm triggered"
            );
        }

        if self.options.ack_telemetry {
            self.ack();
        }
    }

    fn on_settings(&mut self, settings: Settings, source: SettingsSource) {
        info!(
            ?source,
            node = %settings.target_node_id,
            timer_alarm_secs = settings.timer_alarm_seconds,
            delay_alarm_mins = settings.delay_alarm_minutes,
            "Settings updated"
        );
        self.settings = Some(settings);

        self.timers.cancel_all();
        self.buzzer_silenced = false;
        if self.buzzer_armed {
            self.buzzer_armed = false;
            self.emit(PanelCommand::new(self.indicator_level, false, self.online));
        }
        self.heartbeat.start();

        if source == SettingsSource::Bus {
            self.ack();
        }
    }

    fn on_connectivity(&mut self, online: bool) {
        if online != self.online {
            info!(online, "Internet connectivity changed");
        }
        self.online = online;
        // Probe frames always show a cleared indicator with the buzzer off.
        self.emit(PanelCommand::new(0, false, online));
    }

    fn on_bus_connected(&mut self) {
        self.indicator_level = 0;
        self.buzzer_armed = false;
        self.heartbeat.beat();
        if !self.timers.timeout.is_armed() {
            self.heartbeat.start();
        }
    }

    fn on_timer(&mut self, expiry: Expiry) {
        if !self.timers.get_mut(expiry.kind).expire(expiry) {
            return;
        }

        match expiry.kind {
            TimerKind::Timeout => {
                info!("Alarm timeout elapsed, buzzer off");
                self.buzzer_armed = false;
                self.emit(PanelCommand::new(self.indicator_level, false, self.online));
                self.heartbeat.start();
            }
            TimerKind::Cooldown => {
                info!("Alarm cooldown elapsed, buzzer may trigger again");
                self.buzzer_silenced = false;
            }
        }
    }

    fn arm(&mut self, kind: TimerKind, after: Duration) -> bool {
        let Some(events) = self.events.upgrade() else {
            warn!(timer = ?kind, "Event channel closed, timer not armed");
            return false;
        };
        self.timers
            .get_mut(kind)
            .arm(after, &events, Event::TimerFired)
    }

    fn emit(&mut self, command: PanelCommand) {
        info!(command = %command, "Panel command");
        if let Err(e) = self.panel.send(&command) {
            warn!("Panel command not delivered: {}", e);
        }
    }

    fn ack(&self) {
        if let Err(e) = publish_json(self.publisher.as_ref(), &self.topics.connection, &Ack::ok()) {
            warn!("Ack not published: {}", e);
        }
    }
}
