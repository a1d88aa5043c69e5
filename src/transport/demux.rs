//! Tag demultiplexing and stream framing shared by the channel media.
//!
//! Stream media (TCP) prefix each message with an 8-byte little-endian
//! header: `tag: u32`, `len: u32`. Messages for other tags that arrive while
//! a receiver waits for a specific tag are parked in a [`TagDemux`].

use crate::transport::{ChannelError, ChannelResult, Tag};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::collections::{HashMap, VecDeque};

/// Size of the frame header on stream media.
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest payload a single frame may announce.
pub const MAX_FRAME_LEN: usize = u32::MAX as usize;

/// Messages received for tags nobody has asked for yet.
#[derive(Debug, Default)]
pub struct TagDemux {
    parked: HashMap<Tag, VecDeque<Vec<u8>>>,
}

impl TagDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park(&mut self, tag: Tag, payload: Vec<u8>) {
        self.parked.entry(tag).or_default().push_back(payload);
    }

    pub fn take(&mut self, tag: Tag) -> Option<Vec<u8>> {
        let queue = self.parked.get_mut(&tag)?;
        let payload = queue.pop_front();
        if queue.is_empty() {
            self.parked.remove(&tag);
        }
        payload
    }

    pub fn peek_len(&self, tag: Tag) -> Option<usize> {
        self.parked
            .get(&tag)
            .and_then(|queue| queue.front())
            .map(Vec::len)
    }

    pub fn clear(&mut self) {
        self.parked.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}

/// Encode one frame (header + payload).
pub fn encode_frame(tag: Tag, payload: &[u8]) -> ChannelResult<Vec<u8>> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ChannelError::MessageTooLarge {
            size: payload.len(),
            capacity: MAX_FRAME_LEN,
        });
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    // Writes into a Vec cannot fail.
    let _ = frame.write_u32::<LittleEndian>(tag);
    let _ = frame.write_u32::<LittleEndian>(payload.len() as u32);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental decoder for a byte stream of frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Header of the first buffered frame, available before its payload.
    pub fn peek_header(&self) -> Option<(Tag, usize)> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        let tag = LittleEndian::read_u32(&self.buf[0..4]);
        let len = LittleEndian::read_u32(&self.buf[4..8]) as usize;
        Some((tag, len))
    }

    /// Pop the first frame if it has fully arrived.
    pub fn next_frame(&mut self) -> Option<(Tag, Vec<u8>)> {
        let (tag, len) = self.peek_header()?;
        let total = FRAME_HEADER_LEN + len;
        if self.buf.len() < total {
            return None;
        }
        let payload = self.buf[FRAME_HEADER_LEN..total].to_vec();
        self.buf.drain(..total);
        Some((tag, payload))
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
