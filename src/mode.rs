// src/mode.rs - Water-level to indicator mapping
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

/// Raw level reported for a clear (normal) water level.
pub const CLEAR_LEVEL: i64 = 4;

/// Panel wiring variant.
///
/// `Normal` panels count bands upwards (1 = highest severity is shown as 1),
/// `Reverse` panels are wired with the lamp order flipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Normal,
    Reverse,
}

impl Mode {
    /// Raw level that asserts the buzzer in this mode.
    pub fn trigger_band(self) -> i64 {
        match self {
            Mode::Normal => 3,
            Mode::Reverse => 1,
        }
    }
}

impl FromStr for Mode {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Mode::Normal),
            "reverse" => Ok(Mode::Reverse),
            other => Err(GatewayError::Config(format!(
                "Unknown operating mode '{}', expected 'normal' or 'reverse'",
                other
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Normal => write!(f, "normal"),
            Mode::Reverse => write!(f, "reverse"),
        }
    }
}

/// Outcome of mapping one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indication {
    pub indicator: u8,
    pub trigger: bool,
}

/// Map a raw level (1 = highest severity .. 4 = clear) to the panel indicator.
///
/// The trigger band is matched against the raw level, so in both wirings the
/// buzzer accompanies indicator 3. Levels outside `1..=4` are treated as
/// clear: indicator 0, never triggering.
pub fn map_level(level: i64, mode: Mode) -> Indication {
    let indicator = match (mode, level) {
        (_, CLEAR_LEVEL) => 0,
        (Mode::Normal, 1..=3) => level as u8,
        (Mode::Reverse, 1) => 3,
        (Mode::Reverse, 3) => 1,
        (Mode::Reverse, 2) => 2,
        _ => 0,
    };

    Indication {
        indicator,
        trigger: indicator != 0 && level == mode.trigger_band(),
    }
}

/// Whether `level` is one the panel knows how to show.
pub fn is_known_level(level: i64) -> bool {
    (1..=CLEAR_LEVEL).contains(&level)
}
