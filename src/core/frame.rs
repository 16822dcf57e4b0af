use bytes::{Bytes, BytesMut};

use super::types::{StreamError, StreamResult};

/// Every message on the wire, in both directions, ends with this sequence.
pub const FRAME_DELIMITER: &[u8; 2] = b"\r\n";

/// One step of framer output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    /// Bytes strictly between the frame start and its `\r\n`.
    Frame(Bytes),
    /// A line ended by a bare `\n`; its `len` content bytes were dropped.
    Malformed { len: usize },
    /// Nothing between two delimiters.
    Empty,
}

/// Fixed-capacity scratch buffer that turns arbitrary transport chunks into frames.
///
/// Bytes of an unfinished frame stay buffered between pushes, so a frame split across any
/// number of reads comes out whole. The buffer never holds more than `capacity` bytes: a
/// push that would overflow it fails with [`StreamError::FrameTooLarge`].
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    capacity: usize,
    // Prefix of `buf` already known to contain no `\n`.
    scanned: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            scanned: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of the current partial frame.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn spare_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    /// Append a chunk read from the transport.
    pub fn push(&mut self, chunk: &[u8]) -> StreamResult<()> {
        if chunk.len() > self.spare_capacity() {
            return Err(StreamError::FrameTooLarge {
                limit: self.capacity,
            });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Extract the next complete line, if one is buffered.
    pub fn next_event(&mut self) -> Option<FrameEvent> {
        let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.buf.len();
            return None;
        };
        let newline = self.scanned + offset;
        self.scanned = 0;

        let line = self.buf.split_to(newline + 1).freeze();
        if newline == 0 {
            return Some(FrameEvent::Empty);
        }
        if line[newline - 1] != b'\r' {
            return Some(FrameEvent::Malformed { len: newline });
        }
        if newline == 1 {
            return Some(FrameEvent::Empty);
        }
        Some(FrameEvent::Frame(line.slice(..newline - 1)))
    }

    /// Iterate over every complete line currently buffered.
    ///
    /// Stopping early is fine: unvisited lines stay buffered for the next call.
    pub fn drain(&mut self) -> FrameDrain<'_> {
        FrameDrain { inner: self }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }
}

pub struct FrameDrain<'a> {
    inner: &'a mut FrameBuffer,
}

impl Iterator for FrameDrain<'_> {
    type Item = FrameEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next_event()
    }
}

/// Append `payload` plus the delimiter to `out`.
#[inline]
pub fn encode_frame(payload: &[u8], out: &mut Vec<u8>) {
    out.reserve(payload.len() + FRAME_DELIMITER.len());
    out.extend_from_slice(payload);
    out.extend_from_slice(FRAME_DELIMITER);
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] = b"{\"op\":\"connection\",\"connectionId\":\"123-321\"}\r\n\
{\"op\":\"status\",\"id\":1,\"statusCode\":\"SUCCESS\"}\r\n\
{\"op\":\"mcm\",\"id\":2,\"clk\":\"AA\"}\r\n";

    fn frames_of(events: impl IntoIterator<Item = FrameEvent>) -> Vec<Bytes> {
        events
            .into_iter()
            .filter_map(|event| match event {
                FrameEvent::Frame(bytes) => Some(bytes),
                _ => None,
            })
            .collect()
    }

    fn feed_in_chunks(chunks: &[&[u8]]) -> Vec<Bytes> {
        let mut framer = FrameBuffer::new(1024);
        let mut out = Vec::new();
        for chunk in chunks {
            framer.push(chunk).expect("fits");
            out.extend(frames_of(framer.drain()));
        }
        assert!(framer.is_empty(), "no partial frame should remain");
        out
    }

    #[test]
    fn whole_stream_yields_three_frames() {
        let frames = feed_in_chunks(&[STREAM]);
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames[0].as_ref(),
            b"{\"op\":\"connection\",\"connectionId\":\"123-321\"}"
        );
    }

    #[test]
    fn every_two_way_split_matches_whole_stream() {
        let whole = feed_in_chunks(&[STREAM]);
        for split in 0..=STREAM.len() {
            let (a, b) = STREAM.split_at(split);
            assert_eq!(feed_in_chunks(&[a, b]), whole, "split at {split}");
        }
    }

    #[test]
    fn every_three_way_split_matches_whole_stream() {
        let whole = feed_in_chunks(&[STREAM]);
        for first in 0..=STREAM.len() {
            for second in first..=STREAM.len() {
                let chunks = [
                    &STREAM[..first],
                    &STREAM[first..second],
                    &STREAM[second..],
                ];
                assert_eq!(feed_in_chunks(&chunks), whole, "splits {first}/{second}");
            }
        }
    }

    #[test]
    fn byte_at_a_time_matches_whole_stream() {
        let whole = feed_in_chunks(&[STREAM]);
        let chunks: Vec<&[u8]> = STREAM.chunks(1).collect();
        assert_eq!(feed_in_chunks(&chunks), whole);
    }

    #[test]
    fn connection_message_split_mid_token() {
        let msg = b"{\"op\":\"connection\",\"connectionId\":\"123-321\"}\r\n";
        let frames = feed_in_chunks(&[&msg[..17], &msg[17..]]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), &msg[..msg.len() - 2]);
    }

    #[test]
    fn bare_newline_line_is_dropped_and_next_frame_survives() {
        let mut framer = FrameBuffer::new(256);
        framer
            .push(b"{\"op\":\"bad\"}\n{\"op\":\"status\",\"id\":7}\r\n")
            .expect("fits");
        let events: Vec<_> = framer.drain().collect();
        assert_eq!(
            events,
            vec![
                FrameEvent::Malformed { len: 12 },
                FrameEvent::Frame(Bytes::from_static(b"{\"op\":\"status\",\"id\":7}")),
            ]
        );
    }

    #[test]
    fn empty_lines_are_reported_as_empty() {
        let mut framer = FrameBuffer::new(256);
        framer.push(b"\r\n\n{\"a\":1}\r\n\r\n").expect("fits");
        let events: Vec<_> = framer.drain().collect();
        assert_eq!(
            events,
            vec![
                FrameEvent::Empty,
                FrameEvent::Empty,
                FrameEvent::Frame(Bytes::from_static(b"{\"a\":1}")),
                FrameEvent::Empty,
            ]
        );
    }

    #[test]
    fn partial_frame_is_kept_between_drains() {
        let mut framer = FrameBuffer::new(64);
        framer.push(b"{\"op\":\"hea").expect("fits");
        assert!(framer.next_event().is_none());
        assert_eq!(framer.len(), 10);
        framer.push(b"rtbeat\"}\r").expect("fits");
        assert!(framer.next_event().is_none());
        framer.push(b"\n").expect("fits");
        assert_eq!(
            framer.next_event(),
            Some(FrameEvent::Frame(Bytes::from_static(b"{\"op\":\"heartbeat\"}")))
        );
        assert!(framer.is_empty());
    }

    #[test]
    fn overflowing_push_fails_with_frame_too_large() {
        let mut framer = FrameBuffer::new(16);
        framer.push(b"0123456789").expect("fits");
        let err = framer.push(b"abcdefghij").expect_err("overflow");
        assert!(matches!(err, StreamError::FrameTooLarge { limit: 16 }));
        // Buffered bytes are untouched by the rejected push.
        assert_eq!(framer.len(), 10);
    }

    #[test]
    fn capacity_is_reusable_after_frames_are_consumed() {
        let mut framer = FrameBuffer::new(8);
        for _ in 0..100 {
            framer.push(b"{\"a\"}\r\n").expect("fits");
            assert_eq!(frames_of(framer.drain()).len(), 1);
            assert_eq!(framer.spare_capacity(), 8);
        }
    }

    #[test]
    fn encode_appends_delimiter() {
        let mut out = Vec::new();
        encode_frame(b"{\"op\":\"heartbeat\"}", &mut out);
        assert_eq!(out, b"{\"op\":\"heartbeat\"}\r\n");
    }
}
