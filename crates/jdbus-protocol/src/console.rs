//! Log lines over the bus.
//!
//! A [`LogBroadcaster`] is a virtual driver of the logger class: it finds a
//! logger host and sends each line as `priority:u8 | text` chunks of at most
//! 31 text bytes. A [`ConsoleListener`] is that host. It re-emits every chunk
//! at or above its minimum priority through `tracing` and a channel.

use std::fmt;
use std::sync::Arc;

use jdbus_frame::{Packet, MAX_PAYLOAD};
use jdbus_transport::PacketSink;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::driver::{send_data, Driver, DriverContext};
use crate::error::{ProtocolError, Result};

/// Text bytes per packet, after the priority byte.
pub const CHUNK_LEN: usize = MAX_PAYLOAD - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConsolePriority {
    Debug = 0,
    Log = 1,
    Warning = 2,
    Error = 3,
}

impl ConsolePriority {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Debug),
            1 => Some(Self::Log),
            2 => Some(Self::Warning),
            3 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ConsolePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Log => "log",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// Split `text` into chunks of at most [`CHUNK_LEN`] bytes on char boundaries.
pub fn chunk_text(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = rest.len().min(CHUNK_LEN);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

#[derive(Clone)]
struct LogLink {
    address: u8,
    sink: PacketSink,
}

/// Virtual logger client. Pair it with a [`LogSender`] to write lines.
pub struct LogBroadcaster {
    link: Arc<watch::Sender<Option<LogLink>>>,
}

impl LogBroadcaster {
    pub fn new() -> (Self, LogSender) {
        let link = Arc::new(watch::Sender::new(None));
        let sender = LogSender {
            link: Arc::clone(&link),
        };
        (Self { link }, sender)
    }
}

impl Driver for LogBroadcaster {
    fn device_connected(&mut self, ctx: &mut DriverContext<'_>) {
        debug!(handle = %ctx.handle(), address = ctx.status().address, "logger host found");
        self.link.send_replace(Some(LogLink {
            address: ctx.status().address,
            sink: ctx.sink().clone(),
        }));
    }

    fn device_removed(&mut self, ctx: &mut DriverContext<'_>) {
        debug!(handle = %ctx.handle(), "logger host gone");
        self.link.send_replace(None);
    }

    fn handle_control_packet(
        &mut self,
        ctx: &mut DriverContext<'_>,
        cp: &jdbus_frame::ControlPacket,
    ) -> bool {
        // Follow the host across address changes.
        let address = ctx.status().address;
        self.link.send_if_modified(|link| match link.as_mut() {
            Some(link) if link.address != address => {
                link.address = address;
                true
            }
            _ => false,
        });
        trace!(address = cp.address, "logger host announce");
        true
    }

    fn name(&self) -> &str {
        "log-broadcaster"
    }
}

/// Cloneable handle for writing log lines through a [`LogBroadcaster`].
#[derive(Clone)]
pub struct LogSender {
    link: Arc<watch::Sender<Option<LogLink>>>,
}

impl LogSender {
    pub fn is_connected(&self) -> bool {
        self.link.borrow().is_some()
    }

    /// Send one line. Returns the number of packets written.
    pub fn log(&self, priority: ConsolePriority, text: &str) -> Result<usize> {
        let link = self.link.borrow().clone().ok_or(ProtocolError::NotConnected)?;
        let mut buf = Vec::with_capacity(MAX_PAYLOAD);
        let chunks = chunk_text(text);
        for chunk in &chunks {
            buf.clear();
            buf.push(priority.as_u8());
            buf.extend_from_slice(chunk.as_bytes());
            send_data(&link.sink, link.address, &buf)?;
        }
        Ok(chunks.len())
    }
}

/// A received log chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub address: u8,
    pub priority: ConsolePriority,
    pub text: String,
}

/// Logger host: receives chunks addressed to it.
pub struct ConsoleListener {
    min_priority: ConsolePriority,
    lines: mpsc::UnboundedSender<ConsoleLine>,
}

impl ConsoleListener {
    pub fn new(min_priority: ConsolePriority) -> (Self, mpsc::UnboundedReceiver<ConsoleLine>) {
        let (lines, rx) = mpsc::unbounded_channel();
        (
            Self {
                min_priority,
                lines,
            },
            rx,
        )
    }

    pub fn min_priority(&self) -> ConsolePriority {
        self.min_priority
    }
}

impl Driver for ConsoleListener {
    fn handle_packet(&mut self, ctx: &mut DriverContext<'_>, packet: &Packet) -> bool {
        let Some((&raw, text)) = packet.data.split_first() else {
            trace!(handle = %ctx.handle(), address = packet.address, "empty log packet");
            return true;
        };
        let Some(priority) = ConsolePriority::from_u8(raw) else {
            debug!(handle = %ctx.handle(), priority = raw, "unknown log priority");
            return false;
        };
        if priority < self.min_priority {
            return true;
        }

        let text = String::from_utf8_lossy(text).into_owned();
        let address = packet.address;
        match priority {
            ConsolePriority::Debug => debug!(target: "jdbus::console", address, "{text}"),
            ConsolePriority::Log => info!(target: "jdbus::console", address, "{text}"),
            ConsolePriority::Warning => warn!(target: "jdbus::console", address, "{text}"),
            ConsolePriority::Error => error!(target: "jdbus::console", address, "{text}"),
        }
        // Nobody listening is fine; tracing already has the line.
        let _ = self.lines.send(ConsoleLine {
            address,
            priority,
            text,
        });
        true
    }

    fn name(&self) -> &str {
        "console"
    }
}
