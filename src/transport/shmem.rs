//! Single-segment channel.
//!
//! Models a shared memory segment of fixed size holding at most one message
//! with an announced-length header. A sender can only write once the
//! receiver has drained the segment; a message larger than the segment is
//! rejected outright. Segments are attached per endpoint, so these channels
//! cannot be cloned.

use crate::context::ExecutionContext;
use crate::transport::demux::TagDemux;
use crate::transport::{
    Channel, ChannelError, ChannelKind, ChannelRegistry, ChannelResult, ChannelRole, Side, Tag,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::Poll;

#[derive(Debug)]
struct SegmentState {
    occupied: bool,
    tag: Tag,
    len: usize,
    bytes: Vec<u8>,
}

/// Fixed-size buffer shared by both ends.
#[derive(Debug)]
pub(crate) struct Segment {
    capacity: usize,
    state: Mutex<SegmentState>,
}

impl Segment {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(SegmentState {
                occupied: false,
                tag: 0,
                len: 0,
                bytes: vec![0; capacity],
            }),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, SegmentState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy `payload` in if the segment is free.
    fn try_write(&self, tag: Tag, payload: &[u8]) -> bool {
        let mut state = self.lock();
        if state.occupied {
            return false;
        }
        state.bytes[..payload.len()].copy_from_slice(payload);
        state.tag = tag;
        state.len = payload.len();
        state.occupied = true;
        true
    }

    /// Copy the current message out and free the segment.
    fn try_take(&self) -> Option<(Tag, Vec<u8>)> {
        let mut state = self.lock();
        if !state.occupied {
            return None;
        }
        let payload = state.bytes[..state.len].to_vec();
        state.occupied = false;
        Some((state.tag, payload))
    }

    fn peek_header(&self) -> Option<(Tag, usize)> {
        let state = self.lock();
        state.occupied.then_some((state.tag, state.len))
    }
}

pub struct SharedMemoryChannel {
    key: String,
    capacity: usize,
    registry: Arc<ChannelRegistry>,
    segment: Option<Arc<Segment>>,
    pending: Option<(Tag, Vec<u8>)>,
    demux: TagDemux,
}

impl SharedMemoryChannel {
    /// Channel attached to segment `key`, sized by `transport.shm_segment_bytes`.
    pub fn new(ctx: &ExecutionContext, key: impl Into<String>) -> Self {
        Self::with_segment_size(ctx, key, ctx.config().transport.shm_segment_bytes)
    }

    pub fn with_segment_size(ctx: &ExecutionContext, key: impl Into<String>, bytes: usize) -> Self {
        Self {
            key: key.into(),
            capacity: bytes,
            registry: ctx.registry().clone(),
            segment: None,
            pending: None,
            demux: TagDemux::new(),
        }
    }

    /// Size of the attached segment, which may differ from the requested one
    /// if another endpoint created it first.
    pub fn segment_size(&self) -> usize {
        self.segment
            .as_ref()
            .map(|s| s.capacity())
            .unwrap_or(self.capacity)
    }

    fn segment(&self) -> ChannelResult<&Arc<Segment>> {
        self.segment.as_ref().ok_or_else(|| ChannelError::NotConnected {
            endpoint: self.endpoint(),
        })
    }

    fn pull(&mut self, tag: Tag) -> ChannelResult<Option<Vec<u8>>> {
        if let Some(payload) = self.demux.take(tag) {
            return Ok(Some(payload));
        }
        match self.segment()?.try_take() {
            Some((t, payload)) if t == tag => Ok(Some(payload)),
            Some((t, payload)) => {
                self.demux.park(t, payload);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

impl Channel for SharedMemoryChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::SharedMemory
    }

    fn endpoint(&self) -> String {
        format!("shm://{}", self.key)
    }

    fn role(&self) -> ChannelRole {
        ChannelRole::Peer
    }

    fn connect(&mut self, _side: Side) -> ChannelResult<()> {
        if self.capacity == 0 {
            return Err(ChannelError::Misconfigured(format!(
                "{} has a zero-sized segment",
                self.endpoint()
            )));
        }
        if self.segment.is_none() {
            let segment = self.registry.segment(&self.key, self.capacity);
            tracing::debug!(
                endpoint = %self.endpoint(),
                bytes = segment.capacity(),
                "shared memory segment attached"
            );
            self.segment = Some(segment);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.segment.is_some()
    }

    fn disconnect(&mut self) {
        self.segment = None;
        self.pending = None;
        self.demux.clear();
    }

    fn submit(&mut self, tag: Tag, payload: &[u8]) -> ChannelResult<()> {
        let capacity = self.segment()?.capacity();
        if self.pending.is_some() {
            return Err(ChannelError::SendInProgress {
                endpoint: self.endpoint(),
            });
        }
        if payload.len() > capacity {
            return Err(ChannelError::MessageTooLarge {
                size: payload.len(),
                capacity,
            });
        }
        self.pending = Some((tag, payload.to_vec()));
        Ok(())
    }

    fn poll_flush(&mut self) -> ChannelResult<Poll<()>> {
        let Some((tag, payload)) = self.pending.as_ref() else {
            return Ok(Poll::Ready(()));
        };
        if self.segment()?.try_write(*tag, payload) {
            self.pending = None;
            Ok(Poll::Ready(()))
        } else {
            Ok(Poll::Pending)
        }
    }

    fn has_pending_send(&self) -> bool {
        self.pending.is_some()
    }

    fn poll_recv(&mut self, tag: Tag) -> ChannelResult<Poll<Vec<u8>>> {
        Ok(match self.pull(tag)? {
            Some(payload) => Poll::Ready(payload),
            None => Poll::Pending,
        })
    }

    fn poll_msg_len(&mut self, tag: Tag) -> ChannelResult<Poll<usize>> {
        if let Some(len) = self.demux.peek_len(tag) {
            return Ok(Poll::Ready(len));
        }
        Ok(match self.segment()?.peek_header() {
            Some((t, len)) if t == tag => Poll::Ready(len),
            _ => Poll::Pending,
        })
    }

    fn is_clonable(&self) -> bool {
        false
    }

    fn try_clone(&self) -> ChannelResult<Box<dyn Channel>> {
        Err(ChannelError::NotClonable(ChannelKind::SharedMemory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancelToken;
    use crate::transport::ChannelExt;

    #[test]
    fn test_segment_holds_one_message() {
        let ctx = ExecutionContext::local();
        let mut writer = SharedMemoryChannel::with_segment_size(&ctx, "seg", 16);
        let mut reader = SharedMemoryChannel::with_segment_size(&ctx, "seg", 16);
        writer.connect(Side::Sender).unwrap();
        reader.connect(Side::Receiver).unwrap();

        assert!(writer.send_nonblocking(1, b"abcd").unwrap());
        assert!(!writer.send_nonblocking(1, b"efgh").unwrap());

        assert_eq!(reader.try_read_total_msg_length(1).unwrap(), Some(4));
        assert_eq!(reader.recv_nonblocking(1).unwrap(), Some(b"abcd".to_vec()));

        writer.wait_for_sent(&CancelToken::new()).unwrap();
        assert_eq!(reader.recv_nonblocking(1).unwrap(), Some(b"efgh".to_vec()));
        assert_eq!(reader.recv_nonblocking(1).unwrap(), None);
    }

    #[test]
    fn test_oversized_message_rejected() {
        let ctx = ExecutionContext::local();
        let mut channel = SharedMemoryChannel::with_segment_size(&ctx, "small", 4);
        channel.connect(Side::Both).unwrap();
        assert!(matches!(
            channel.submit(0, b"too long"),
            Err(ChannelError::MessageTooLarge { size: 8, capacity: 4 })
        ));
    }

    #[test]
    fn test_not_clonable() {
        let ctx = ExecutionContext::local();
        let channel = SharedMemoryChannel::new(&ctx, "seg");
        assert!(!channel.is_clonable());
        assert!(matches!(
            channel.try_clone(),
            Err(ChannelError::NotClonable(ChannelKind::SharedMemory))
        ));
    }

    #[test]
    fn test_blocking_across_threads() {
        let ctx = ExecutionContext::local();
        let mut writer = SharedMemoryChannel::with_segment_size(&ctx, "threads", 64);
        let mut reader = SharedMemoryChannel::with_segment_size(&ctx, "threads", 64);
        writer.connect(Side::Sender).unwrap();
        reader.connect(Side::Receiver).unwrap();

        let handle = std::thread::spawn(move || {
            let cancel = CancelToken::new();
            for i in 0..20u8 {
                writer.send_blocking(0, &[i; 8], &cancel).unwrap();
            }
        });

        let cancel = CancelToken::new();
        for i in 0..20u8 {
            assert_eq!(reader.recv_blocking(0, &cancel).unwrap(), vec![i; 8]);
        }
        handle.join().unwrap();
    }
}
