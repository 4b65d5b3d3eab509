use std::io::{self, Write};
use std::mem;

use byteorder::{ByteOrder, LittleEndian};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

pub(crate) const U24_MAX: usize = 16_777_215;

// Staged frames are pushed to the transport once the buffer grows past this,
// so large result sets don't accumulate in memory between flushes.
const FLUSH_THRESHOLD: usize = 1 << 15;

/// Reads logical packets off the wire, reassembling frames that were split at
/// the 2^24 - 1 payload boundary.
///
/// The reader owns the inbound half of the sequence-id discipline: every
/// frame must carry the next expected sequence id, and any gap is a protocol
/// error. The expected id is reset by the connection at phase boundaries.
pub(crate) struct PacketReader<R> {
    r: R,
    seq: u8,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub(crate) fn new(r: R) -> Self {
        PacketReader { r, seq: 0 }
    }

    /// The sequence id the next inbound frame must carry.
    pub(crate) fn seq(&self) -> u8 {
        self.seq
    }

    /// Seed the expected sequence id, continuing the chain after a
    /// server-initiated packet (greeting, auth-switch, auth-more-data).
    pub(crate) fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    pub(crate) fn reset_seq(&mut self) {
        self.seq = 0;
    }

    /// Read one logical packet.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly at a packet boundary.
    /// A stream that ends mid-frame is a protocol error.
    pub(crate) async fn next(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let mut payload = Vec::new();
        loop {
            let mut header = [0u8; 4];
            let n = self.r.read(&mut header).await?;
            if n == 0 {
                if payload.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Protocol(
                    "stream ended between frames of a logical packet".into(),
                ));
            }
            if n < 4 {
                self.r
                    .read_exact(&mut header[n..])
                    .await
                    .map_err(|_| Error::Protocol("stream ended mid-frame header".into()))?;
            }

            let len = LittleEndian::read_u24(&header[..3]) as usize;
            let seq = header[3];
            if seq != self.seq {
                return Err(Error::Protocol(format!(
                    "got out-of-order packet; expected seq({}) but got seq({})",
                    self.seq, seq
                )));
            }
            self.seq = self.seq.wrapping_add(1);

            let start = payload.len();
            payload.resize(start + len, 0);
            self.r
                .read_exact(&mut payload[start..])
                .await
                .map_err(|_| Error::Protocol("stream ended mid-frame payload".into()))?;

            if len < U24_MAX {
                return Ok(Some(payload));
            }
        }
    }
}

/// Accumulates one logical packet at a time and frames it onto the wire.
///
/// Packet contents are staged through the [`Write`] impl; [`end_packet`]
/// seals the current payload into one or more frames (splitting at
/// 2^24 - 1 bytes, with a trailing short-or-empty frame after every full
/// one), and [`flush`] pushes the staged frames to the transport.
///
/// [`end_packet`]: PacketWriter::end_packet
/// [`flush`]: PacketWriter::flush
pub(crate) struct PacketWriter<W> {
    w: W,
    buf: Vec<u8>,
    payload: Vec<u8>,
    seq: u8,
}

impl<W> Write for PacketWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.payload.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub(crate) fn new(w: W) -> Self {
        PacketWriter {
            w,
            buf: Vec::new(),
            payload: Vec::new(),
            seq: 0,
        }
    }

    /// The sequence id the next outbound frame will carry.
    pub(crate) fn seq(&self) -> u8 {
        self.seq
    }

    pub(crate) fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    /// Seal the staged payload into framed wire bytes.
    ///
    /// A no-op if nothing was staged since the last call.
    pub(crate) fn end_packet(&mut self) {
        if self.payload.is_empty() {
            return;
        }
        let payload = mem::take(&mut self.payload);
        let mut rest = &payload[..];
        loop {
            let chunk = rest.len().min(U24_MAX);
            let mut header = [0u8; 4];
            LittleEndian::write_u24(&mut header[..3], chunk as u32);
            header[3] = self.seq;
            self.seq = self.seq.wrapping_add(1);
            self.buf.extend_from_slice(&header);
            self.buf.extend_from_slice(&rest[..chunk]);
            rest = &rest[chunk..];
            // a frame of exactly 2^24 - 1 bytes promises a continuation,
            // even if that continuation is empty
            if chunk < U24_MAX {
                break;
            }
        }
    }

    /// Whether enough frames are staged that the caller should flush before
    /// encoding more rows.
    pub(crate) fn should_flush(&self) -> bool {
        self.buf.len() >= FLUSH_THRESHOLD
    }

    /// Push all staged frames to the transport and flush it.
    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.end_packet();
        if !self.buf.is_empty() {
            self.w.write_all(&self.buf).await?;
            self.buf.clear();
        }
        self.w.flush().await
    }
}

#[cfg(test)]
impl<W> PacketWriter<W> {
    /// Concatenated payloads of everything staged so far, with frame headers
    /// stripped. Test helper.
    pub(crate) fn take_payloads(&mut self) -> Vec<u8> {
        self.end_packet_for_tests();
        let mut out = Vec::new();
        let mut rest = &self.buf[..];
        while rest.len() >= 4 {
            let len = LittleEndian::read_u24(&rest[..3]) as usize;
            out.extend_from_slice(&rest[4..4 + len]);
            rest = &rest[4 + len..];
        }
        self.buf.clear();
        out
    }

    // end_packet without the AsyncWrite bound, for writer-shape tests
    fn end_packet_for_tests(&mut self) {
        if self.payload.is_empty() {
            return;
        }
        let payload = mem::take(&mut self.payload);
        let mut header = [0u8; 4];
        LittleEndian::write_u24(&mut header[..3], payload.len() as u32);
        header[3] = self.seq;
        self.seq = self.seq.wrapping_add(1);
        self.buf.extend_from_slice(&header);
        self.buf.extend_from_slice(&payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(data: &[u8]) -> (u8, Vec<u8>) {
        let mut r = PacketReader::new(data);
        let pkt = r.next().await.unwrap().unwrap();
        (r.seq(), pkt)
    }

    #[tokio::test]
    async fn test_one_ping() {
        let (seq, pkt) = read_all(&[0x01, 0, 0, 0, 0x10]).await;
        assert_eq!(seq, 1);
        assert_eq!(&pkt[..], &[0x10][..]);
    }

    #[tokio::test]
    async fn test_long_exact() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0; U24_MAX][..]);
        data.extend(&[0x00, 0x00, 0x00, 1]);

        let (seq, pkt) = read_all(&data[..]).await;
        assert_eq!(seq, 2);
        assert_eq!(pkt.len(), U24_MAX);
        assert_eq!(&pkt[..], &[0; U24_MAX][..]);
    }

    #[tokio::test]
    async fn test_long_more() {
        let mut data = vec![0xff, 0xff, 0xff, 0];
        data.extend(&[0; U24_MAX][..]);
        data.extend(&[0x01, 0x00, 0x00, 1, 0x10]);

        let (_, pkt) = read_all(&data[..]).await;
        assert_eq!(pkt.len(), U24_MAX + 1);
        assert_eq!(&pkt[..U24_MAX], &[0; U24_MAX][..]);
        assert_eq!(&pkt[U24_MAX..], &[0x10]);
    }

    #[tokio::test]
    async fn test_seq_gap_is_fatal() {
        let mut r = PacketReader::new(&[0x01, 0, 0, 3, 0x10][..]);
        assert!(matches!(r.next().await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_fatal() {
        let mut r = PacketReader::new(&[0x10, 0, 0, 0, 0x01][..]);
        assert!(matches!(r.next().await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_writer_roundtrip_short() {
        let mut out = Vec::new();
        {
            let mut w = PacketWriter::new(&mut out);
            w.write_all(&[0x10]).unwrap();
            w.end_packet();
            w.flush().await.unwrap();
        }
        assert_eq!(out, vec![0x01, 0, 0, 0, 0x10]);
    }

    #[tokio::test]
    async fn test_writer_splits_oversized_payload() {
        // |P| = 2^24 + 5 must produce a full frame plus a 6-byte remainder
        let payload = vec![0x42u8; U24_MAX + 6];
        let mut out = Vec::new();
        {
            let mut w = PacketWriter::new(&mut out);
            w.write_all(&payload).unwrap();
            w.end_packet();
            w.flush().await.unwrap();
        }
        assert_eq!(LittleEndian::read_u24(&out[..3]) as usize, U24_MAX);
        assert_eq!(out[3], 0);
        let second = 4 + U24_MAX;
        assert_eq!(LittleEndian::read_u24(&out[second..second + 3]), 6);
        assert_eq!(out[second + 3], 1);
        assert_eq!(out.len(), 4 + U24_MAX + 4 + 6);

        let mut r = PacketReader::new(&out[..]);
        let pkt = r.next().await.unwrap().unwrap();
        assert_eq!(pkt, payload);
    }

    #[tokio::test]
    async fn test_writer_exact_boundary_gets_empty_continuation() {
        let payload = vec![0u8; U24_MAX];
        let mut out = Vec::new();
        {
            let mut w = PacketWriter::new(&mut out);
            w.write_all(&payload).unwrap();
            w.end_packet();
            w.flush().await.unwrap();
        }
        // full frame, then an empty frame with the next sequence id
        assert_eq!(out.len(), 4 + U24_MAX + 4);
        let tail = &out[4 + U24_MAX..];
        assert_eq!(tail, &[0, 0, 0, 1]);

        let mut r = PacketReader::new(&out[..]);
        let pkt = r.next().await.unwrap().unwrap();
        assert_eq!(pkt.len(), U24_MAX);
    }

    #[tokio::test]
    async fn test_roundtrip_lengths_around_boundary() {
        for extra in [0usize, 1, 10] {
            let payload = vec![0x5au8; U24_MAX - 1 + extra];
            let mut out = Vec::new();
            {
                let mut w = PacketWriter::new(&mut out);
                w.write_all(&payload).unwrap();
                w.end_packet();
                w.flush().await.unwrap();
            }
            let mut r = PacketReader::new(&out[..]);
            assert_eq!(r.next().await.unwrap().unwrap(), payload);
        }
    }
}
