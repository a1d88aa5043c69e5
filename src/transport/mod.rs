//! Byte transport between endpoints.
//!
//! A [`Channel`] moves opaque, tagged byte messages from one endpoint to
//! another over some medium. The trait is a small poll-based primitive:
//! `submit` queues one outgoing message, `poll_flush` drives it, `poll_recv`
//! and `poll_msg_len` check for incoming data without blocking. Every
//! blocking and non-blocking convenience (`send_blocking`, `wait_for_sent`,
//! `recv_nonblocking`, `read_total_msg_length`, ...) is derived from it in
//! [`ChannelExt`].
//!
//! # Media
//!
//! | Channel               | Medium                                  | Clonable |
//! |-----------------------|-----------------------------------------|----------|
//! | [`MemoryChannel`]      | queued in-process link                  | yes      |
//! | [`SharedMemoryChannel`]| single fixed-size segment               | no       |
//! | [`FabricChannel`]      | rank-addressed message fabric           | yes      |
//! | [`TcpChannel`]         | length-prefixed frames over TCP         | no       |
//! | [`NullChannel`]        | discards everything                     | yes      |
//!
//! In-process media find their shared state through the
//! [`ChannelRegistry`] owned by the `ExecutionContext`, keyed by name.

pub mod demux;
pub mod error;
pub mod ext;
pub mod fabric;
pub mod memory;
pub mod null;
pub mod registry;
pub mod shmem;
pub mod tcp;

pub use error::{ChannelError, ChannelResult};
pub use ext::{Backoff, ChannelExt};
pub use fabric::FabricChannel;
pub use memory::MemoryChannel;
pub use null::NullChannel;
pub use registry::ChannelRegistry;
pub use shmem::SharedMemoryChannel;
pub use tcp::TcpChannel;

use std::fmt;
use std::task::Poll;

/// Logical stream identifier multiplexed over one channel.
pub type Tag = u32;

/// The transport medium behind a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Memory,
    SharedMemory,
    Fabric,
    Tcp,
    Null,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Memory => write!(f, "memory"),
            ChannelKind::SharedMemory => write!(f, "shared memory"),
            ChannelKind::Fabric => write!(f, "fabric"),
            ChannelKind::Tcp => write!(f, "tcp"),
            ChannelKind::Null => write!(f, "null"),
        }
    }
}

/// Which end of a connection lives in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Only the producer is local; the channel is written.
    Sender,
    /// Only the consumer is local; the channel is read.
    Receiver,
    /// Both ends are local.
    Both,
}

impl Side {
    pub fn sends(self) -> bool {
        matches!(self, Side::Sender | Side::Both)
    }

    pub fn receives(self) -> bool {
        matches!(self, Side::Receiver | Side::Both)
    }
}

/// How a connected channel treats loss of its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Initiated the connection; may transparently reconnect.
    Client,
    /// Accepted the connection; a disconnect means the peer has left.
    Server,
    /// Symmetric in-process medium; there is nothing to reconnect to.
    Peer,
}

/// A transport endpoint.
///
/// Implementations never block: `poll_*` methods return `Poll::Pending` when
/// the medium cannot make progress yet. Transient conditions (`EINTR`, a full
/// socket buffer) are absorbed internally and surface as `Pending`.
#[cfg_attr(test, mockall::automock)]
pub trait Channel: Send {
    /// Medium of this channel.
    fn kind(&self) -> ChannelKind;

    /// Human-readable endpoint for diagnostics (`tcp://host:port`, `memory://key`).
    fn endpoint(&self) -> String;

    /// Reconnection role. Meaningful once connected.
    fn role(&self) -> ChannelRole;

    /// Establish the medium for the given local side.
    fn connect(&mut self, side: Side) -> ChannelResult<()>;

    fn is_connected(&self) -> bool;

    /// Drop the medium. Pending sends and partially received data are discarded.
    fn disconnect(&mut self);

    /// Queue one message. Fails with `SendInProgress` while a previous
    /// message has not been flushed.
    fn submit(&mut self, tag: Tag, payload: &[u8]) -> ChannelResult<()>;

    /// Drive the queued message. `Ready` once it has been fully accepted by
    /// the medium, or when nothing is queued.
    fn poll_flush(&mut self) -> ChannelResult<Poll<()>>;

    fn has_pending_send(&self) -> bool;

    /// Take the next complete message for `tag`, if one has arrived.
    fn poll_recv(&mut self, tag: Tag) -> ChannelResult<Poll<Vec<u8>>>;

    /// Length of the next message for `tag` as announced by the sender.
    fn poll_msg_len(&mut self, tag: Tag) -> ChannelResult<Poll<usize>>;

    fn is_clonable(&self) -> bool;

    /// Fresh, unconnected channel with the same endpoint configuration.
    /// Fails with `NotClonable` when `is_clonable()` is false.
    fn try_clone(&self) -> ChannelResult<Box<dyn Channel>>;
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("kind", &self.kind())
            .field("endpoint", &self.endpoint())
            .finish()
    }
}
