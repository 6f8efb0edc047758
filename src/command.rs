// src/command.rs - Alarm panel wire commands
use serde::{Deserialize, Serialize};
use std::fmt;

/// One actuation frame for the panel: `"<indicator>,<buzzer>,<online>,*"`.
///
/// Encoding never fails; delivery problems belong to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelCommand {
    pub indicator: u8,
    pub buzzer: bool,
    pub online: bool,
}

impl PanelCommand {
    pub fn new(indicator: u8, buzzer: bool, online: bool) -> Self {
        Self {
            indicator,
            buzzer,
            online,
        }
    }

    /// Everything off, link reported offline.
    pub fn all_off() -> Self {
        Self::new(0, false, false)
    }

    /// Encoded frame without the line terminator.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PanelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},*",
            self.indicator,
            u8::from(self.buzzer),
            u8::from(self.online)
        )
    }
}

/// Operator passthrough received on the direct-serial topic.
///
/// Written to the panel as-is; the alarm state is not consulted or changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectCommand {
    pub status: u8,
    pub alarm: u8,
    pub internet: u8,
}

impl From<DirectCommand> for PanelCommand {
    fn from(direct: DirectCommand) -> Self {
        PanelCommand::new(direct.status, direct.alarm != 0, direct.internet != 0)
    }
}
