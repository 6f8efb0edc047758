// src/panel.rs - Single-writer output path to the alarm panel
//
// The coordinator owns the only `PanelQueue`; one task owns the physical
// port and drains the queue. Delivery is best effort: nothing is
// acknowledged by the panel and nothing is retried.

use crate::command::PanelCommand;
use crate::error::{GatewayError, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[cfg(feature = "serial")]
pub use self::serial::SerialWriter;

/// Appended to every encoded frame on the wire.
pub const LINE_TERMINATOR: &str = "\n";

/// Commands allowed to wait while the port is busy or reopening.
pub const PANEL_QUEUE_DEPTH: usize = 32;

/// Outbound seam for panel commands. Must not block the caller.
pub trait PanelLink: Send {
    fn send(&mut self, command: &PanelCommand) -> Result<()>;
}

/// Sending half handed to the coordinator.
#[derive(Debug)]
pub struct PanelQueue {
    tx: mpsc::Sender<PanelCommand>,
}

/// Create the panel queue and the receiver drained by the port owner.
pub fn queue(depth: usize) -> (PanelQueue, mpsc::Receiver<PanelCommand>) {
    let (tx, rx) = mpsc::channel(depth);
    (PanelQueue { tx }, rx)
}

impl PanelLink for PanelQueue {
    fn send(&mut self, command: &PanelCommand) -> Result<()> {
        self.tx.try_send(*command).map_err(|e| match e {
            TrySendError::Full(dropped) => {
                GatewayError::Transport(format!("panel queue full, dropped '{}'", dropped))
            }
            TrySendError::Closed(_) => GatewayError::ChannelClosed,
        })
    }
}

/// Frame as written to the port.
pub fn frame(command: &PanelCommand) -> String {
    format!("{}{}", command.encode(), LINE_TERMINATOR)
}

#[cfg(feature = "serial")]
mod serial {
    use super::frame;
    use crate::command::PanelCommand;
    use crate::config::SerialConfig;
    use crate::error::{GatewayError, Result};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
    use tokio::sync::mpsc;
    use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};
    use tracing::{debug, error, info, warn};

    /// Owns the serial port and writes queued commands to it.
    pub struct SerialWriter {
        config: SerialConfig,
        commands: mpsc::Receiver<PanelCommand>,
        pending: Option<PanelCommand>,
    }

    impl SerialWriter {
        pub fn new(config: SerialConfig, commands: mpsc::Receiver<PanelCommand>) -> Self {
            Self {
                config,
                commands,
                pending: None,
            }
        }

        fn open(&self) -> Result<SerialStream> {
            tokio_serial::new(&self.config.path, self.config.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .open_native_async()
                .map_err(|e| {
                    GatewayError::Transport(format!("open '{}': {}", self.config.path, e))
                })
        }

        /// Run until the coordinator drops its queue.
        pub async fn run(mut self) {
            let reopen_delay = Duration::from_millis(self.config.reopen_delay_ms);

            loop {
                let port = match self.open() {
                    Ok(port) => port,
                    Err(e) => {
                        error!("Serial port unavailable: {}", e);
                        tokio::time::sleep(reopen_delay).await;
                        self.coalesce_backlog();
                        continue;
                    }
                };
                info!(path = %self.config.path, baud = self.config.baud_rate, "Serial port connected");

                let (reader, writer) = tokio::io::split(port);
                let listener = tokio::spawn(log_panel_output(reader));
                let outcome = self.drain(writer).await;
                listener.abort();

                match outcome {
                    Ok(()) => {
                        info!("Panel queue closed, serial writer stopping");
                        return;
                    }
                    Err(e) => {
                        warn!("Serial port disconnected: {}", e);
                        tokio::time::sleep(reopen_delay).await;
                        self.coalesce_backlog();
                    }
                }
            }
        }

        async fn drain(&mut self, mut writer: WriteHalf<SerialStream>) -> Result<()> {
            loop {
                let command = match self.pending.take() {
                    Some(command) => command,
                    None => match self.commands.recv().await {
                        Some(command) => command,
                        None => return Ok(()),
                    },
                };

                let line = frame(&command);
                let written = match writer.write_all(line.as_bytes()).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    self.pending = Some(command);
                    return Err(e.into());
                }
                debug!(command = %command, "Command written to panel");
            }
        }

        // After an outage only the latest decision is worth showing.
        fn coalesce_backlog(&mut self) {
            let mut dropped = 0usize;
            while let Ok(command) = self.commands.try_recv() {
                if self.pending.replace(command).is_some() {
                    dropped += 1;
                }
            }
            if dropped > 0 {
                warn!(dropped, "Stale panel commands discarded");
            }
        }
    }

    async fn log_panel_output(reader: ReadHalf<SerialStream>) {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(line = %line, "Panel output"),
                Ok(None) => return,
                Err(e) => {
                    debug!("Panel read stopped: {}", e);
                    return;
                }
            }
        }
    }
}
