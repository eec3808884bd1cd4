use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: crc (2) + address (1) + size (1) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Maximum payload carried by one bus frame.
pub const MAX_PAYLOAD: usize = 32;

/// Largest possible wire frame.
pub const PACKET_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD;

/// Well-known address of the logic driver; frames sent here are control packets.
pub const LOGIC_ADDRESS: u8 = 0;

/// A decoded bus frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// CRC16 as carried on the wire. Computed and verified by the transport.
    pub crc: u16,
    /// Address of the device that owns this frame.
    pub address: u8,
    /// Payload, at most [`MAX_PAYLOAD`] bytes.
    pub data: Bytes,
}

impl Packet {
    /// Create a packet for transmission. The CRC is left for the transport.
    pub fn new(address: u8, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: data.len(),
                max: MAX_PAYLOAD,
            });
        }
        Ok(Self {
            crc: 0,
            address,
            data,
        })
    }

    /// Payload size as encoded in the header.
    pub fn size(&self) -> u8 {
        self.data.len() as u8
    }

    /// True if this frame is addressed to the logic driver.
    pub fn is_control(&self) -> bool {
        self.address == LOGIC_ADDRESS
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    /// Encode this frame, keeping its CRC field as-is.
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        put_frame(self.crc, self.address, &self.data, &mut dst);
        dst.freeze()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────┬──────────┬──────────────────┐
/// │ CRC16 (2B) │ Address  │ Size     │ Data             │
/// │ LE, 0 here │ (1B)     │ (1B)     │ (Size ≤ 32 bytes)│
/// └────────────┴──────────┴──────────┴──────────────────┘
/// ```
///
/// Data longer than [`MAX_PAYLOAD`] is truncated. Returns the encoded size.
pub fn encode_packet(address: u8, data: &[u8], dst: &mut BytesMut) -> usize {
    let data = if data.len() > MAX_PAYLOAD {
        tracing::warn!(
            address,
            size = data.len(),
            max = MAX_PAYLOAD,
            "truncating oversized payload"
        );
        &data[..MAX_PAYLOAD]
    } else {
        data
    };
    put_frame(0, address, data, dst);
    data.len()
}

fn put_frame(crc: u16, address: u8, data: &[u8], dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE + data.len());
    dst.put_u16_le(crc);
    dst.put_u8(address);
    dst.put_u8(data.len() as u8);
    dst.put_slice(data);
}

/// Decode one complete frame from a received buffer.
///
/// Bytes after `4 + size` are ignored (transports may hand over padded DMA buffers).
pub fn decode_packet(buf: &[u8]) -> Result<Packet> {
    if buf.len() < HEADER_SIZE {
        return Err(FrameError::Truncated { len: buf.len() });
    }

    let size = buf[3] as usize;
    let available = buf.len() - HEADER_SIZE;
    if size > available {
        return Err(FrameError::SizeMismatch { size, available });
    }
    if size > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD,
        });
    }

    Ok(Packet {
        crc: u16::from_le_bytes([buf[0], buf[1]]),
        address: buf[2],
        data: Bytes::copy_from_slice(&buf[HEADER_SIZE..HEADER_SIZE + size]),
    })
}

/// Decode a frame from a byte stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Packet>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let size = src[3] as usize;
    if size > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD,
        });
    }

    let total = HEADER_SIZE + size;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    let crc = src.get_u16_le();
    let address = src.get_u8();
    src.advance(1);
    let data = src.split_to(size).freeze();

    Ok(Some(Packet { crc, address, data }))
}

/// Timeouts applied when frames travel over a bridge stream.
#[derive(Debug, Clone, Default)]
pub struct LinkConfig {
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let size = encode_packet(7, b"hello, bus", &mut buf);

        assert_eq!(size, 10);
        assert_eq!(buf.len(), HEADER_SIZE + 10);
        assert_eq!(&buf[..4], &[0, 0, 7, 10]);

        let packet = decode_packet(&buf).unwrap();
        assert_eq!(packet.address, 7);
        assert_eq!(packet.crc, 0);
        assert_eq!(packet.data.as_ref(), b"hello, bus");
    }

    #[test]
    fn test_encode_truncates_oversized_payload() {
        let mut buf = BytesMut::new();
        let size = encode_packet(3, &[0xAB; 40], &mut buf);

        assert_eq!(size, MAX_PAYLOAD);
        assert_eq!(buf.len(), PACKET_SIZE);
        assert_eq!(decode_packet(&buf).unwrap().data.len(), MAX_PAYLOAD);
    }

    #[test]
    fn test_decode_keeps_crc() {
        let packet = decode_packet(&[0x34, 0x12, 9, 1, 0xFF]).unwrap();
        assert_eq!(packet.crc, 0x1234);
        assert_eq!(packet.to_bytes().as_ref(), &[0x34, 0x12, 9, 1, 0xFF]);
    }

    #[test]
    fn test_decode_truncated_header() {
        let result = decode_packet(&[0, 0, 1]);
        assert!(matches!(result, Err(FrameError::Truncated { len: 3 })));
    }

    #[test]
    fn test_decode_size_exceeds_buffer() {
        let result = decode_packet(&[0, 0, 1, 5, 1, 2]);
        assert!(matches!(
            result,
            Err(FrameError::SizeMismatch {
                size: 5,
                available: 2
            })
        ));
    }

    #[test]
    fn test_decode_ignores_trailing_padding() {
        let packet = decode_packet(&[0, 0, 4, 1, 0xAA, 0, 0, 0]).unwrap();
        assert_eq!(packet.data.as_ref(), &[0xAA]);
    }

    #[test]
    fn test_decode_rejects_size_above_bus_maximum() {
        let mut buf = vec![0, 0, 1, 40];
        buf.extend_from_slice(&[0; 40]);
        let result = decode_packet(&buf);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_packet_new_rejects_oversized() {
        assert!(Packet::new(1, vec![0u8; 33]).is_err());
        let packet = Packet::new(0, vec![0u8; 12]).unwrap();
        assert!(packet.is_control());
        assert_eq!(packet.size(), 12);
        assert_eq!(packet.wire_size(), 16);
    }

    #[test]
    fn test_stream_decode_incomplete() {
        let mut buf = BytesMut::from(&[0, 0, 5, 3, 1][..]);
        assert!(decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_stream_decode_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_packet(1, b"first", &mut buf);
        encode_packet(2, b"second", &mut buf);

        let first = decode_frame(&mut buf).unwrap().unwrap();
        let second = decode_frame(&mut buf).unwrap().unwrap();

        assert_eq!((first.address, first.data.as_ref()), (1, b"first".as_ref()));
        assert_eq!(
            (second.address, second.data.as_ref()),
            (2, b"second".as_ref())
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_stream_decode_rejects_oversized() {
        let mut buf = BytesMut::from(&[0, 0, 1, 200][..]);
        let result = decode_frame(&mut buf);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    proptest! {
        #[test]
        fn roundtrip_any_address_and_payload(
            address in any::<u8>(),
            data in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD),
        ) {
            let mut buf = BytesMut::new();
            encode_packet(address, &data, &mut buf);
            let packet = decode_packet(&buf).unwrap();
            prop_assert_eq!(packet.address, address);
            prop_assert_eq!(packet.data.as_ref(), data.as_slice());
        }

        #[test]
        fn decode_fails_when_size_exceeds_buffer(
            address in any::<u8>(),
            data in proptest::collection::vec(any::<u8>(), 0..MAX_PAYLOAD),
            extra in 1u8..=16,
        ) {
            let mut buf = vec![0, 0, address, data.len() as u8 + extra];
            buf.extend_from_slice(&data);
            let is_size_mismatch = matches!(
                decode_packet(&buf),
                Err(FrameError::SizeMismatch { .. })
            );
            prop_assert!(is_size_mismatch);
        }
    }
}
