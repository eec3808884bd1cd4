use std::time::Duration;

use crate::registry::DriverHandle;

/// Errors surfaced by the protocol layer.
///
/// Arbitration and packet routing never produce these; they come from
/// registration, transport I/O and explicit application calls.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] jdbus_frame::FrameError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] jdbus_transport::TransportError),

    /// Every registry slot is taken.
    #[error("driver registry full ({capacity} slots)")]
    RegistryFull { capacity: usize },

    /// The handle does not name a live driver.
    #[error("unknown driver {0}")]
    UnknownDriver(DriverHandle),

    /// The driver has no bus address yet.
    #[error("driver is not connected")]
    NotConnected,

    /// A bounded wait expired.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Streaming cannot start.
    #[error("streaming unavailable: {0}")]
    StreamingUnavailable(String),

    /// The bus node task has exited.
    #[error("bus node stopped")]
    NodeStopped,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
