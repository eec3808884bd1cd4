use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use jdbus_transport::BusStream;

use crate::codec::{decode_frame, LinkConfig, Packet, PACKET_SIZE};
use crate::error::{FrameError, Result};
use crate::writer::transport_to_frame_error;

const READ_CHUNK_SIZE: usize = 4 * PACKET_SIZE;

/// Reads complete bus frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Read> PacketReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = decode_frame(&mut self.buf)? {
                return Ok(packet);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl PacketReader<BusStream> {
    /// Create a packet reader for a bridge stream and apply the read timeout.
    pub fn with_config_bus(inner: BusStream, config: &LinkConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::new(inner))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::encode_packet;
    use crate::writer::PacketWriter;

    #[test]
    fn read_multiple_packets() {
        let mut wire = BytesMut::new();
        encode_packet(1, b"one", &mut wire);
        encode_packet(2, b"two", &mut wire);
        encode_packet(0, &[1; 12], &mut wire);

        let mut reader = PacketReader::new(Cursor::new(wire.to_vec()));

        assert_eq!(reader.read_packet().unwrap().address, 1);
        assert_eq!(reader.read_packet().unwrap().data.as_ref(), b"two");
        assert!(reader.read_packet().unwrap().is_control());
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = BytesMut::new();
        encode_packet(4, b"slow", &mut wire);

        let mut reader = PacketReader::new(ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        });

        let packet = reader.read_packet().unwrap();
        assert_eq!(packet.address, 4);
        assert_eq!(packet.data.as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut reader = PacketReader::new(Cursor::new(vec![0, 0, 3, 8, 1, 2]));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut reader = PacketReader::new(Cursor::new(vec![0, 0, 3, 99]));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 99, .. }));
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_packet(8, b"ok", &mut wire);

        let mut reader = PacketReader::new(InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire.to_vec()),
        });
        assert_eq!(reader.read_packet().unwrap().address, 8);
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = PacketWriter::new(left);
        let mut reader = PacketReader::new(right);

        writer.send(17, b"ping").unwrap();
        let packet = reader.read_packet().unwrap();

        assert_eq!(packet.address, 17);
        assert_eq!(packet.data.as_ref(), b"ping");
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
