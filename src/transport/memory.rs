//! In-process channel over a bounded crossbeam queue.
//!
//! Each message is copied into the queue in one piece and only then becomes
//! visible to the receiver, so a consumer never observes a half-written
//! buffer. With the default capacity of one frame a blocking sender is
//! throttled to the receiver's pace.

use crate::context::ExecutionContext;
use crate::transport::demux::TagDemux;
use crate::transport::{
    Channel, ChannelError, ChannelKind, ChannelRegistry, ChannelResult, ChannelRole, Side, Tag,
};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::Poll;

type Frame = (Tag, Vec<u8>);

/// Both ends of one in-memory link, shared through the registry.
#[derive(Debug, Clone)]
pub(crate) struct MemoryLink {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

impl MemoryLink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }
}

/// Channel whose two ends share a [`MemoryLink`] looked up by key.
pub struct MemoryChannel {
    key: String,
    capacity: usize,
    registry: Arc<ChannelRegistry>,
    link: Option<MemoryLink>,
    pending: Option<Frame>,
    demux: TagDemux,
    clones: AtomicU32,
}

impl MemoryChannel {
    /// Channel bound to the link named `key` in the context's registry.
    pub fn new(ctx: &ExecutionContext, key: impl Into<String>) -> Self {
        Self::with_capacity(ctx, key, ctx.config().transport.memory_capacity)
    }

    /// Same as [`MemoryChannel::new`] with an explicit frame capacity. The
    /// capacity only applies if this channel is the first to use `key`.
    pub fn with_capacity(ctx: &ExecutionContext, key: impl Into<String>, capacity: usize) -> Self {
        Self {
            key: key.into(),
            capacity: capacity.max(1),
            registry: ctx.registry().clone(),
            link: None,
            pending: None,
            demux: TagDemux::new(),
            clones: AtomicU32::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn link(&self) -> ChannelResult<&MemoryLink> {
        self.link.as_ref().ok_or_else(|| ChannelError::NotConnected {
            endpoint: self.endpoint(),
        })
    }

    fn pull(&mut self, tag: Tag) -> ChannelResult<Option<Vec<u8>>> {
        if let Some(payload) = self.demux.take(tag) {
            return Ok(Some(payload));
        }
        let rx = self.link()?.rx.clone();
        loop {
            match rx.try_recv() {
                Ok((t, payload)) if t == tag => return Ok(Some(payload)),
                Ok((t, payload)) => self.demux.park(t, payload),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    return Err(ChannelError::Disconnected {
                        endpoint: self.endpoint(),
                    })
                }
            }
        }
    }
}

impl Channel for MemoryChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Memory
    }

    fn endpoint(&self) -> String {
        format!("memory://{}", self.key)
    }

    fn role(&self) -> ChannelRole {
        ChannelRole::Peer
    }

    fn connect(&mut self, _side: Side) -> ChannelResult<()> {
        if self.link.is_none() {
            self.link = Some(self.registry.memory_link(&self.key, self.capacity));
            tracing::debug!(endpoint = %self.endpoint(), "memory channel attached");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn disconnect(&mut self) {
        self.link = None;
        self.pending = None;
        self.demux.clear();
    }

    fn submit(&mut self, tag: Tag, payload: &[u8]) -> ChannelResult<()> {
        self.link()?;
        if self.pending.is_some() {
            return Err(ChannelError::SendInProgress {
                endpoint: self.endpoint(),
            });
        }
        self.pending = Some((tag, payload.to_vec()));
        Ok(())
    }

    fn poll_flush(&mut self) -> ChannelResult<Poll<()>> {
        let Some(frame) = self.pending.take() else {
            return Ok(Poll::Ready(()));
        };
        let tx = self.link()?.tx.clone();
        match tx.try_send(frame) {
            Ok(()) => Ok(Poll::Ready(())),
            Err(TrySendError::Full(frame)) => {
                self.pending = Some(frame);
                Ok(Poll::Pending)
            }
            Err(TrySendError::Disconnected(_)) => Err(ChannelError::Disconnected {
                endpoint: self.endpoint(),
            }),
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
        match self.pull(tag)? {
            Some(payload) => {
                let len = payload.len();
                // Put it back at the front of the tag queue.
                let mut rest = Vec::new();
                while let Some(p) = self.demux.take(tag) {
                    rest.push(p);
                }
                self.demux.park(tag, payload);
                for p in rest {
                    self.demux.park(tag, p);
                }
                Ok(Poll::Ready(len))
            }
            None => Ok(Poll::Pending),
        }
    }

    fn is_clonable(&self) -> bool {
        true
    }

    fn try_clone(&self) -> ChannelResult<Box<dyn Channel>> {
        let n = self.clones.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Box::new(MemoryChannel {
            key: format!("{}~{}", self.key, n),
            capacity: self.capacity,
            registry: self.registry.clone(),
            link: None,
            pending: None,
            demux: TagDemux::new(),
            clones: AtomicU32::new(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancelToken;
    use crate::transport::ChannelExt;

    fn connected(ctx: &ExecutionContext, key: &str) -> MemoryChannel {
        let mut channel = MemoryChannel::new(ctx, key);
        channel.connect(Side::Both).unwrap();
        channel
    }

    #[test]
    fn test_send_then_receive() {
        let ctx = ExecutionContext::local();
        let mut channel = connected(&ctx, "a");
        let cancel = CancelToken::new();

        channel.send_blocking(0, &[1, 2, 3], &cancel).unwrap();
        assert_eq!(channel.recv_nonblocking(0).unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(channel.recv_nonblocking(0).unwrap(), None);
    }

    #[test]
    fn test_two_channels_same_key_share_link() {
        let ctx = ExecutionContext::local();
        let mut writer = connected(&ctx, "shared");
        let mut reader = connected(&ctx, "shared");

        assert!(writer.send_nonblocking(3, b"xyz").unwrap());
        assert_eq!(reader.try_read_total_msg_length(3).unwrap(), Some(3));
        assert_eq!(reader.recv_nonblocking(3).unwrap(), Some(b"xyz".to_vec()));
    }

    #[test]
    fn test_full_link_reports_pending() {
        let ctx = ExecutionContext::local();
        let mut channel = connected(&ctx, "full");

        assert!(channel.send_nonblocking(0, b"first").unwrap());
        assert!(!channel.send_nonblocking(0, b"second").unwrap());
        assert!(channel.has_pending_send());
        assert!(matches!(
            channel.submit(0, b"third"),
            Err(ChannelError::SendInProgress { .. })
        ));

        assert_eq!(channel.recv_nonblocking(0).unwrap(), Some(b"first".to_vec()));
        channel.wait_for_sent(&CancelToken::new()).unwrap();
        assert_eq!(channel.recv_nonblocking(0).unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn test_other_tags_are_parked() {
        let ctx = ExecutionContext::local();
        let mut channel = MemoryChannel::with_capacity(&ctx, "tags", 4);
        channel.connect(Side::Both).unwrap();
        let cancel = CancelToken::new();

        channel.send_blocking(1, b"one", &cancel).unwrap();
        channel.send_blocking(2, b"two", &cancel).unwrap();

        assert_eq!(channel.recv_blocking(2, &cancel).unwrap(), b"two".to_vec());
        assert_eq!(channel.read_total_msg_length(1, &cancel).unwrap(), 3);
        assert_eq!(channel.recv_blocking(1, &cancel).unwrap(), b"one".to_vec());
    }

    #[test]
    fn test_not_connected() {
        let ctx = ExecutionContext::local();
        let mut channel = MemoryChannel::new(&ctx, "idle");
        assert!(matches!(
            channel.submit(0, b""),
            Err(ChannelError::NotConnected { .. })
        ));
    }

    #[test]
    fn test_clone_gets_distinct_link() {
        let ctx = ExecutionContext::local();
        let mut original = connected(&ctx, "orig");
        let mut copy = original.try_clone().unwrap();
        copy.connect(Side::Both).unwrap();

        assert_eq!(copy.endpoint(), "memory://orig~1");
        let cancel = CancelToken::new();
        copy.send_blocking(0, b"c", &cancel).unwrap();
        assert_eq!(original.recv_nonblocking(0).unwrap(), None);
        assert_eq!(copy.recv_nonblocking(0).unwrap(), Some(b"c".to_vec()));
    }
}
