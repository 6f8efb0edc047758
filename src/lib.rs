//! EWS gateway - alarm state coordinator for early-warning water-level panels
//!
//! Readings from remote level sensors arrive over MQTT; the gateway decides
//! what the local alarm panel shows and whether its buzzer sounds, and writes
//! that decision to the panel over a serial line.
//!
//! # Feature Flags
//!
//! - `mqtt`: MQTT bus adapter ([`bus::MqttBridge`])
//! - `serial`: serial panel writer ([`panel::SerialWriter`])
//! - `http`: connectivity probe and backend settings fetch ([`probe`])
//!
//! The decision core ([`coordinator`], [`timer`], [`mode`], [`command`]) builds
//! without any of them.
//!
//! # Examples
//!
//! ```rust,no_run
//! use ews_gateway::{channel, panel, Coordinator, CoordinatorOptions, GatewayConfig};
//! # use ews_gateway::bus::Publisher;
//! # struct Null;
//! # impl Publisher for Null {
//! #     fn publish(&self, _: &str, _: Vec<u8>) -> ews_gateway::Result<()> { Ok(()) }
//! # }
//! # async fn demo() -> ews_gateway::Result<()> {
//! let config = GatewayConfig::load(None)?;
//! let (events_tx, events_rx) = channel();
//! let (panel_queue, _panel_rx) = panel::queue(panel::PANEL_QUEUE_DEPTH);
//!
//! let coordinator = Coordinator::new(
//!     CoordinatorOptions::from(&config),
//!     panel_queue,
//!     std::sync::Arc::new(Null),
//!     &events_tx,
//! );
//! tokio::spawn(coordinator.run(events_rx));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// CORE MODULES (always available)
// ============================================================================

/// Crate-wide error type
pub mod error;

/// Startup configuration: YAML file plus environment overrides
pub mod config;

/// Normal/reverse panel wiring and level mapping
pub mod mode;

/// Panel command frames
pub mod command;

/// Cancelable one-shot alarm timers
pub mod timer;

/// Live settings and bus payloads
pub mod settings;

/// Periodic liveness announcements
pub mod heartbeat;

/// Topic names, inbound routing and the publish seam
pub mod bus;

/// Panel output queue and serial writer
pub mod panel;

/// The alarm state owner
pub mod coordinator;

// ============================================================================
// ADAPTER MODULES (feature-gated)
// ============================================================================

/// Connectivity probe and backend settings fetch
#[cfg(feature = "http")]
pub mod probe;

// ============================================================================
// PUBLIC API EXPORTS
// ============================================================================

pub use command::{DirectCommand, PanelCommand};
pub use config::GatewayConfig;
pub use coordinator::{channel, AlarmState, Coordinator, CoordinatorOptions, Event, Phase, SettingsSource};
pub use error::{GatewayError, Result};
pub use mode::Mode;
pub use settings::{Settings, TelemetryReading};

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// Gateway version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information
pub mod build_info {
    /// Git commit hash (if available)
    pub const GIT_HASH: Option<&str> = option_env!("EWS_GIT_HASH");

    /// Build timestamp
    pub const BUILD_TIMESTAMP: &str = env!("EWS_BUILD_TIMESTAMP");

    /// Rust version used for compilation
    pub const RUSTC_VERSION: &str = env!("EWS_RUSTC_VERSION");

    /// Target triple
    pub const TARGET: &str = env!("EWS_TARGET");

    /// Build profile (debug/release)
    pub const PROFILE: &str = env!("EWS_PROFILE");
}

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the gateway logs at `info`. Safe to
/// call more than once.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ews_gateway=info,telemetry_drill=info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();

    tracing::info!(
        version = VERSION,
        git = build_info::GIT_HASH.unwrap_or("unknown"),
        profile = build_info::PROFILE,
        "EWS gateway runtime initialized"
    );
}
