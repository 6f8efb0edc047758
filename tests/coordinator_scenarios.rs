// End-to-end alarm scenarios: wire payloads in, panel frames and bus acks out.
use ews_gateway::bus::{route, Publisher, Topics};
use ews_gateway::panel::{self, PanelQueue};
use ews_gateway::{channel, Coordinator, CoordinatorOptions, Event, Mode, PanelCommand, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    fn count_on(&self, topic: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|(t, _)| t == topic).count()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let body = String::from_utf8_lossy(&payload).into_owned();
        self.sent.lock().unwrap().push((topic.to_string(), body));
        Ok(())
    }
}

struct Gateway {
    topics: Topics,
    events: mpsc::Sender<Event>,
    panel: mpsc::Receiver<PanelCommand>,
    publisher: Arc<RecordingPublisher>,
    task: JoinHandle<()>,
}

impl Gateway {
    fn start(mode: Mode) -> Self {
        let publisher = Arc::new(RecordingPublisher::default());
        let (events, events_rx) = channel();
        let (panel_queue, panel_rx): (PanelQueue, _) = panel::queue(64);

        let options = CoordinatorOptions {
            unit_id: "EWS-1".to_string(),
            mode,
            ack_telemetry: true,
            heartbeat_period: Duration::from_secs(1200),
        };
        let coordinator = Coordinator::new(options, panel_queue, publisher.clone(), &events);
        let task = tokio::spawn(coordinator.run(events_rx));

        Self {
            topics: Topics::for_unit("EWS-1"),
            events,
            panel: panel_rx,
            publisher,
            task,
        }
    }

    async fn deliver(&self, topic: &str, payload: &str) {
        // Malformed payloads are dropped by the bridge before the coordinator.
        if let Ok(Some(event)) = route(&self.topics, topic, payload.as_bytes()) {
            self.events.send(event).await.unwrap();
        }
        settle().await;
    }

    async fn send(&self, event: Event) {
        self.events.send(event).await.unwrap();
        settle().await;
    }

    async fn configure(&self, timer_alarm: u64, delay_alarm: u64) {
        let payload = format!(
            r#"{{"settings":{{"timer_alarm":{},"delay_alarm":{},"iot_node":"NODE-1"}}}}"#,
            timer_alarm, delay_alarm
        );
        self.deliver("EWS.Settings.EWS-1", &payload).await;
    }

    async fn reading(&self, node: &str, level: i64) {
        let payload = format!(r#"{{"serial_number":"{}","tma_level":{}}}"#, node, level);
        self.deliver("EWS.telemetry", &payload).await;
    }

    fn frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(command) = self.panel.try_recv() {
            frames.push(command.encode());
        }
        frames
    }

    fn acks(&self) -> usize {
        self.publisher.count_on("connection.EWS-1")
    }
}

// With the clock paused the runtime only advances once every task is idle,
// so this lets the coordinator finish whatever was just sent.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn full_alarm_cycle() {
    let mut gw = Gateway::start(Mode::Normal);
    settle().await;
    assert_eq!(gw.frames(), vec!["0,0,0,*"]);

    gw.send(Event::Connectivity(true)).await;
    gw.configure(5, 1).await;
    assert_eq!(gw.acks(), 1);
    assert_eq!(gw.frames(), vec!["0,0,1,*"]);

    gw.reading("NODE-1", 1).await;
    gw.reading("NODE-1", 2).await;
    gw.reading("NODE-1", 3).await;
    assert_eq!(gw.frames(), vec!["1,0,1,*", "2,0,1,*", "3,1,1,*"]);
    assert_eq!(gw.acks(), 4);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(gw.frames(), vec!["3,0,1,*"]);

    // Cooldown still running: the trigger band is shown without the buzzer.
    gw.reading("NODE-1", 3).await;
    assert_eq!(gw.frames(), vec!["3,0,1,*"]);

    sleep(Duration::from_secs(60)).await;
    gw.reading("NODE-1", 3).await;
    assert_eq!(gw.frames(), vec!["3,1,1,*"]);

    gw.reading("NODE-1", 4).await;
    assert_eq!(gw.frames(), vec!["0,0,1,*"]);
}

#[tokio::test(start_paused = true)]
async fn reverse_wiring_sounds_on_level_one() {
    let mut gw = Gateway::start(Mode::Reverse);
    gw.configure(5, 1).await;
    gw.frames();

    gw.reading("NODE-1", 3).await;
    gw.reading("NODE-1", 1).await;
    assert_eq!(gw.frames(), vec!["1,0,0,*", "3,1,0,*"]);
}

#[tokio::test(start_paused = true)]
async fn new_settings_cancel_pending_timeout() {
    let mut gw = Gateway::start(Mode::Normal);
    gw.configure(30, 5).await;
    gw.reading("NODE-1", 3).await;
    assert_eq!(gw.frames(), vec!["0,0,0,*", "3,1,0,*"]);

    gw.configure(30, 5).await;
    assert_eq!(gw.frames(), vec!["3,0,0,*"]);

    // The cancelled timeout never produces its buzzer-off frame.
    sleep(Duration::from_secs(31)).await;
    assert!(gw.frames().is_empty());

    // Nor does the cancelled cooldown block a fresh trigger.
    gw.reading("NODE-1", 3).await;
    assert_eq!(gw.frames(), vec!["3,1,0,*"]);
}

#[tokio::test(start_paused = true)]
async fn new_settings_during_cooldown_rearm_immediately() {
    let mut gw = Gateway::start(Mode::Normal);
    gw.configure(2, 1).await;
    gw.reading("NODE-1", 3).await;
    sleep(Duration::from_secs(3)).await;
    assert_eq!(gw.frames(), vec!["0,0,0,*", "3,1,0,*", "3,0,0,*"]);

    // Cooldown still pending here; new settings lift it.
    gw.configure(2, 1).await;
    assert!(gw.frames().is_empty());
    gw.reading("NODE-1", 3).await;
    assert_eq!(gw.frames(), vec!["3,1,0,*"]);

    // The old cooldown's deadline passes without releasing the new latch.
    sleep(Duration::from_secs(57)).await;
    gw.reading("NODE-1", 3).await;
    assert_eq!(gw.frames(), vec!["3,0,0,*", "3,0,0,*"]);
}

#[tokio::test(start_paused = true)]
async fn oversized_settings_from_bus_are_survivable() {
    let mut gw = Gateway::start(Mode::Normal);
    gw.deliver(
        "EWS.Settings.EWS-1",
        r#"{"settings":{"timer_alarm":"9223372036854775807","delay_alarm":1,"iot_node":"NODE-1"}}"#,
    )
    .await;
    gw.reading("NODE-1", 3).await;
    assert_eq!(gw.frames(), vec!["0,0,0,*", "3,1,0,*"]);

    gw.deliver(
        "EWS.Settings.EWS-1",
        r#"{"settings":{"timer_alarm":5,"delay_alarm":"9223372036854775807","iot_node":"NODE-1"}}"#,
    )
    .await;
    gw.reading("NODE-1", 3).await;
    assert_eq!(gw.frames(), vec!["3,0,0,*", "3,1,0,*"]);

    sleep(Duration::from_secs(6)).await;
    assert_eq!(gw.frames(), vec!["3,0,0,*"]);
    assert!(!gw.task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn readings_for_other_nodes_change_nothing() {
    let mut gw = Gateway::start(Mode::Normal);
    gw.reading("NODE-1", 3).await;
    gw.configure(5, 1).await;
    gw.reading("NODE-2", 3).await;
    gw.deliver("EWS.telemetry", "garbage").await;

    assert_eq!(gw.frames(), vec!["0,0,0,*"]);
    assert_eq!(gw.acks(), 1);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_pauses_during_alarm() {
    let mut gw = Gateway::start(Mode::Normal);
    gw.configure(1500, 30).await;
    let after_settings = gw.acks();

    sleep(Duration::from_secs(1201)).await;
    assert_eq!(gw.acks(), after_settings + 1);

    gw.reading("NODE-1", 3).await;
    let after_trigger = gw.acks();
    sleep(Duration::from_secs(1201)).await;
    assert_eq!(gw.acks(), after_trigger);

    // Timeout at 1500 s restarts the heartbeat.
    sleep(Duration::from_secs(300)).await;
    assert!(gw.frames().contains(&"3,0,0,*".to_string()));
    sleep(Duration::from_secs(1200)).await;
    assert_eq!(gw.acks(), after_trigger + 1);
}

#[tokio::test(start_paused = true)]
async fn refresh_and_direct_serial() {
    let mut gw = Gateway::start(Mode::Normal);
    gw.send(Event::Connectivity(true)).await;
    gw.configure(5, 1).await;
    gw.reading("NODE-1", 2).await;
    gw.frames();

    gw.deliver("EWS.Connection.EWS-1", "").await;
    gw.deliver(
        "EWS.DirectSerial.EWS-1",
        r#"{"status":1,"alarm":1,"internet":0}"#,
    )
    .await;
    gw.deliver("EWS.Connection.EWS-1", "{}").await;

    assert_eq!(gw.frames(), vec!["2,0,1,*", "1,1,0,*", "2,0,1,*"]);
}

#[tokio::test(start_paused = true)]
async fn stops_when_producers_hang_up() {
    let gw = Gateway::start(Mode::Normal);
    let Gateway { events, task, .. } = gw;
    drop(events);
    task.await.unwrap();
}
