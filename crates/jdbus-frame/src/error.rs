/// Errors that can occur during packet encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer is shorter than the 4-byte frame header.
    #[error("frame truncated ({len} bytes, header needs 4)")]
    Truncated { len: usize },

    /// The encoded size field claims more bytes than the buffer holds.
    #[error("frame size field {size} exceeds available {available} bytes")]
    SizeMismatch { size: usize, available: usize },

    /// The payload exceeds the bus maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A control packet shorter than its fixed header.
    #[error("control packet too short ({len} bytes, header needs 12)")]
    ControlTooShort { len: usize },

    /// A streaming command missing its fixed fields.
    #[error("streaming command {command} too short ({len} bytes)")]
    CommandTooShort { command: u8, len: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The bridge was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
