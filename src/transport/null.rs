//! Channel that accepts and discards every send; nothing ever arrives.
//!
//! Used for pure sources and sinks whose other end is absent.

use crate::transport::{Channel, ChannelKind, ChannelResult, ChannelRole, Side, Tag};
use std::task::Poll;

#[derive(Debug, Default, Clone)]
pub struct NullChannel {
    connected: bool,
    discarded: u64,
}

impl NullChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages swallowed so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Channel for NullChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Null
    }

    fn endpoint(&self) -> String {
        "null://".to_string()
    }

    fn role(&self) -> ChannelRole {
        ChannelRole::Peer
    }

    fn connect(&mut self, _side: Side) -> ChannelResult<()> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn submit(&mut self, _tag: Tag, _payload: &[u8]) -> ChannelResult<()> {
        self.discarded += 1;
        Ok(())
    }

    fn poll_flush(&mut self) -> ChannelResult<Poll<()>> {
        Ok(Poll::Ready(()))
    }

    fn has_pending_send(&self) -> bool {
        false
    }

    fn poll_recv(&mut self, _tag: Tag) -> ChannelResult<Poll<Vec<u8>>> {
        Ok(Poll::Pending)
    }

    fn poll_msg_len(&mut self, _tag: Tag) -> ChannelResult<Poll<usize>> {
        Ok(Poll::Pending)
    }

    fn is_clonable(&self) -> bool {
        true
    }

    fn try_clone(&self) -> ChannelResult<Box<dyn Channel>> {
        Ok(Box::new(NullChannel::new()))
    }
}
