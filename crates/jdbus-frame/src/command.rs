use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::MAX_PAYLOAD;
use crate::error::{FrameError, Result};

const CMD_NONE: u8 = 0;
const CMD_START_STREAM: u8 = 1;
const CMD_STOP_STREAM: u8 = 2;
const CMD_STATE: u8 = 3;

/// Command byte plus timestamp in front of a `State` payload.
pub const STATE_HEADER_SIZE: usize = 5;

/// Largest state that fits in one `State` frame.
pub const MAX_STATE_LEN: usize = MAX_PAYLOAD - STATE_HEADER_SIZE;

/// Payload of a data frame exchanged by streaming drivers.
///
/// ```text
/// None        : 0
/// StartStream : 1 | interval:u32 LE (ms)
/// StopStream  : 2
/// State       : 3 | timestamp:u32 LE (ms) | state bytes
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand {
    None,
    StartStream { interval: u32 },
    StopStream,
    State { timestamp: u32, state: Bytes },
    /// A driver-specific command, passed through undecoded.
    Other { command: u8, payload: Bytes },
}

impl StreamCommand {
    /// The command byte.
    pub fn command(&self) -> u8 {
        match self {
            Self::None => CMD_NONE,
            Self::StartStream { .. } => CMD_START_STREAM,
            Self::StopStream => CMD_STOP_STREAM,
            Self::State { .. } => CMD_STATE,
            Self::Other { command, .. } => *command,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some((&command, mut rest)) = data.split_first() else {
            return Err(FrameError::CommandTooShort {
                command: CMD_NONE,
                len: 0,
            });
        };

        match command {
            CMD_NONE => Ok(Self::None),
            CMD_START_STREAM => {
                if rest.len() < 4 {
                    return Err(FrameError::CommandTooShort {
                        command,
                        len: data.len(),
                    });
                }
                Ok(Self::StartStream {
                    interval: rest.get_u32_le(),
                })
            }
            CMD_STOP_STREAM => Ok(Self::StopStream),
            CMD_STATE => {
                if rest.len() < 4 {
                    return Err(FrameError::CommandTooShort {
                        command,
                        len: data.len(),
                    });
                }
                let timestamp = rest.get_u32_le();
                Ok(Self::State {
                    timestamp,
                    state: Bytes::copy_from_slice(rest),
                })
            }
            _ => Ok(Self::Other {
                command,
                payload: Bytes::copy_from_slice(rest),
            }),
        }
    }

    /// Encode into a frame payload. Size limits are enforced by the packet codec.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.command());
        match self {
            Self::None | Self::StopStream => {}
            Self::StartStream { interval } => dst.put_u32_le(*interval),
            Self::State { timestamp, state } => {
                dst.put_u32_le(*timestamp);
                dst.put_slice(state);
            }
            Self::Other { payload, .. } => dst.put_slice(payload),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }
}
