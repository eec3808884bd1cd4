use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use jdbus_transport::BusStream;

use crate::codec::{encode_packet, LinkConfig, Packet, MAX_PAYLOAD, PACKET_SIZE};
use crate::error::{FrameError, Result};

/// Writes complete bus frames to any `Write` stream (serial bridge, socket, file).
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> PacketWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(PACKET_SIZE),
        }
    }

    /// Write a decoded frame as-is, CRC included.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.to_bytes();
        self.write_all(&bytes)
    }

    /// Encode and send a payload for `address`. The CRC field is left zero.
    pub fn send(&mut self, address: u8, data: &[u8]) -> Result<()> {
        if data.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: data.len(),
                max: MAX_PAYLOAD,
            });
        }

        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        encode_packet(address, data, &mut buf);
        let result = self.write_all(&buf);
        self.buf = buf;
        result
    }

    /// Send raw, already-framed bytes (e.g. from a `PacketSink`).
    pub fn send_raw(&mut self, frame: &[u8]) -> Result<()> {
        self.write_all(frame)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl PacketWriter<BusStream> {
    /// Create a packet writer for a bridge stream and apply the write timeout.
    pub fn with_config_bus(inner: BusStream, config: &LinkConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::new(inner))
    }
}

pub(crate) fn transport_to_frame_error(err: jdbus_transport::TransportError) -> FrameError {
    match err {
        jdbus_transport::TransportError::Io(io)
        | jdbus_transport::TransportError::Accept(io) => FrameError::Io(io),
        jdbus_transport::TransportError::Bind { source, .. }
        | jdbus_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::decode_packet;
    use crate::reader::PacketReader;

    #[test]
    fn write_single_packet() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(4, b"hello").unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(wire, vec![0, 0, 4, 5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn write_packet_keeps_crc() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        let packet = decode_packet(&[0xEF, 0xBE, 1, 1, 9]).unwrap();
        writer.write_packet(&packet).unwrap();

        assert_eq!(writer.into_inner().into_inner(), vec![0xEF, 0xBE, 1, 1, 9]);
    }

    #[test]
    fn payload_too_large_rejected() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        let err = writer.send(1, &[0u8; 33]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 33, .. }));
    }

    #[test]
    fn retries_interrupted_and_would_block() {
        let mut writer = PacketWriter::new(FlakyWriter {
            failures: vec![ErrorKind::Interrupted, ErrorKind::WouldBlock],
            data: Vec::new(),
        });
        writer.send(2, b"retry").unwrap();
        assert_eq!(writer.get_ref().data.len(), 9);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = PacketWriter::new(ZeroWriter);
        let err = writer.send(1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn written_packets_read_back() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(3, b"z").unwrap();
        writer.send(0, &[1, 2, 3]).unwrap();

        let wire = writer.into_inner().into_inner();
        let mut reader = PacketReader::new(Cursor::new(wire));
        assert_eq!(reader.read_packet().unwrap().data.as_ref(), b"z");
        assert!(reader.read_packet().unwrap().is_control());
    }

    struct FlakyWriter {
        failures: Vec<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.failures.pop() {
                return Err(std::io::Error::from(kind));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
