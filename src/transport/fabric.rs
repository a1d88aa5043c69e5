//! Rank-addressed message fabric.
//!
//! A fabric stream connects a source rank to a destination rank. Sends are
//! eager (buffered by the fabric, complete immediately) and receives are
//! matched by tag, in arrival order per tag. `connect` is a handshake: it
//! returns once both ranks of the stream have joined, or fails after
//! `transport.fabric_join_timeout_ms`.

use crate::context::{CancelToken, ExecutionContext};
use crate::transport::{
    Channel, ChannelError, ChannelKind, ChannelRegistry, ChannelResult, ChannelRole, Side, Tag,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::Poll;
use std::time::{Duration, Instant};

const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
pub(crate) struct FabricStream {
    joined: Mutex<BTreeSet<u32>>,
    joined_cv: Condvar,
    mailbox: Mutex<HashMap<Tag, VecDeque<Vec<u8>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FabricStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn join(&self, rank: u32) {
        lock(&self.joined).insert(rank);
        self.joined_cv.notify_all();
    }

    fn leave(&self, rank: u32) {
        lock(&self.joined).remove(&rank);
    }

    /// Wait until every rank in `ranks` has joined.
    fn wait_for(&self, ranks: &[u32], deadline: Instant, cancel: &CancelToken) -> ChannelResult<bool> {
        let mut joined = lock(&self.joined);
        loop {
            if ranks.iter().all(|r| joined.contains(r)) {
                return Ok(true);
            }
            if cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let wait = (deadline - now).min(JOIN_POLL);
            joined = self
                .joined_cv
                .wait_timeout(joined, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn push(&self, tag: Tag, payload: Vec<u8>) {
        lock(&self.mailbox).entry(tag).or_default().push_back(payload);
    }

    fn pop(&self, tag: Tag) -> Option<Vec<u8>> {
        lock(&self.mailbox).get_mut(&tag).and_then(VecDeque::pop_front)
    }

    fn peek_len(&self, tag: Tag) -> Option<usize> {
        lock(&self.mailbox)
            .get(&tag)
            .and_then(|queue| queue.front())
            .map(Vec::len)
    }
}

pub struct FabricChannel {
    key: String,
    source: u32,
    dest: u32,
    rank: u32,
    join_timeout: Duration,
    registry: Arc<ChannelRegistry>,
    cancel: CancelToken,
    stream: Option<Arc<FabricStream>>,
    clones: AtomicU32,
}

impl FabricChannel {
    /// Stream `key` from rank `source` to rank `dest`.
    pub fn new(
        ctx: &ExecutionContext,
        key: impl Into<String>,
        source: u32,
        dest: u32,
    ) -> ChannelResult<Self> {
        let key = key.into();
        for rank in [source, dest] {
            if rank >= ctx.size() {
                return Err(ChannelError::Misconfigured(format!(
                    "fabric stream {} names rank {} but the world has {} ranks",
                    key,
                    rank,
                    ctx.size()
                )));
            }
        }
        Ok(Self {
            key,
            source,
            dest,
            rank: ctx.rank(),
            join_timeout: ctx.config().transport.fabric_join_timeout(),
            registry: ctx.registry().clone(),
            cancel: ctx.cancel_token().clone(),
            stream: None,
            clones: AtomicU32::new(0),
        })
    }

    pub fn source(&self) -> u32 {
        self.source
    }

    pub fn dest(&self) -> u32 {
        self.dest
    }

    fn stream(&self) -> ChannelResult<&Arc<FabricStream>> {
        self.stream.as_ref().ok_or_else(|| ChannelError::NotConnected {
            endpoint: self.endpoint(),
        })
    }

    fn expected_rank(&self, side: Side) -> ChannelResult<()> {
        let ok = match side {
            Side::Sender => self.rank == self.source,
            Side::Receiver => self.rank == self.dest,
            Side::Both => self.rank == self.source && self.rank == self.dest,
        };
        if ok {
            Ok(())
        } else {
            Err(ChannelError::Misconfigured(format!(
                "rank {} cannot act as {:?} on {}",
                self.rank,
                side,
                self.endpoint()
            )))
        }
    }
}

impl Channel for FabricChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Fabric
    }

    fn endpoint(&self) -> String {
        format!("fabric://{}/{}->{}", self.key, self.source, self.dest)
    }

    fn role(&self) -> ChannelRole {
        ChannelRole::Peer
    }

    fn connect(&mut self, side: Side) -> ChannelResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.expected_rank(side)?;

        let stream = self.registry.fabric_stream(&self.key);
        stream.join(self.rank);
        let deadline = Instant::now() + self.join_timeout;
        if !stream.wait_for(&[self.source, self.dest], deadline, &self.cancel)? {
            stream.leave(self.rank);
            return Err(ChannelError::ConnectFailed {
                endpoint: self.endpoint(),
                reason: format!("peer did not join within {:?}", self.join_timeout),
            });
        }
        tracing::debug!(endpoint = %self.endpoint(), rank = self.rank, "fabric stream joined");
        self.stream = Some(stream);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.leave(self.rank);
        }
    }

    fn submit(&mut self, tag: Tag, payload: &[u8]) -> ChannelResult<()> {
        self.stream()?.push(tag, payload.to_vec());
        Ok(())
    }

    fn poll_flush(&mut self) -> ChannelResult<Poll<()>> {
        Ok(Poll::Ready(()))
    }

    fn has_pending_send(&self) -> bool {
        false
    }

    fn poll_recv(&mut self, tag: Tag) -> ChannelResult<Poll<Vec<u8>>> {
        Ok(match self.stream()?.pop(tag) {
            Some(payload) => Poll::Ready(payload),
            None => Poll::Pending,
        })
    }

    fn poll_msg_len(&mut self, tag: Tag) -> ChannelResult<Poll<usize>> {
        Ok(match self.stream()?.peek_len(tag) {
            Some(len) => Poll::Ready(len),
            None => Poll::Pending,
        })
    }

    fn is_clonable(&self) -> bool {
        true
    }

    fn try_clone(&self) -> ChannelResult<Box<dyn Channel>> {
        let n = self.clones.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Box::new(FabricChannel {
            key: format!("{}~{}", self.key, n),
            source: self.source,
            dest: self.dest,
            rank: self.rank,
            join_timeout: self.join_timeout,
            registry: self.registry.clone(),
            cancel: self.cancel.clone(),
            stream: None,
            clones: AtomicU32::new(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameworkConfig;
    use crate::transport::ChannelExt;

    fn world(size: u32, join_timeout_ms: u64) -> ExecutionContext {
        let mut config = FrameworkConfig::default();
        config.execution.size = size;
        config.transport.fabric_join_timeout_ms = join_timeout_ms;
        ExecutionContext::new(config).unwrap()
    }

    #[test]
    fn test_rank_validation() {
        let ctx = world(2, 100);
        assert!(matches!(
            FabricChannel::new(&ctx, "s", 0, 2),
            Err(ChannelError::Misconfigured(_))
        ));

        let mut channel = FabricChannel::new(&ctx, "s", 1, 0).unwrap();
        assert!(matches!(
            channel.connect(Side::Sender),
            Err(ChannelError::Misconfigured(_))
        ));
    }

    #[test]
    fn test_join_timeout() {
        let ctx = world(2, 20);
        let mut channel = FabricChannel::new(&ctx, "lonely", 0, 1).unwrap();
        let err = channel.connect(Side::Sender).unwrap_err();
        assert!(matches!(err, ChannelError::ConnectFailed { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_two_ranks_exchange_by_tag() {
        let ctx0 = world(2, 2_000);
        let ctx1 = ctx0.with_rank(1).unwrap();

        let receiver = std::thread::spawn(move || {
            let mut channel = FabricChannel::new(&ctx1, "pair", 0, 1).unwrap();
            channel.connect(Side::Receiver).unwrap();
            let cancel = CancelToken::new();
            let second = channel.recv_blocking(2, &cancel).unwrap();
            let first = channel.recv_blocking(1, &cancel).unwrap();
            (first, second)
        });

        let mut channel = FabricChannel::new(&ctx0, "pair", 0, 1).unwrap();
        channel.connect(Side::Sender).unwrap();
        let cancel = CancelToken::new();
        channel.send_blocking(1, b"first", &cancel).unwrap();
        channel.send_blocking(2, b"second", &cancel).unwrap();

        let (first, second) = receiver.join().unwrap();
        assert_eq!(first, b"first".to_vec());
        assert_eq!(second, b"second".to_vec());
    }

    #[test]
    fn test_loopback_on_one_rank() {
        let ctx = world(1, 100);
        let mut channel = FabricChannel::new(&ctx, "self", 0, 0).unwrap();
        channel.connect(Side::Both).unwrap();
        channel.send_blocking(0, b"me", &CancelToken::new()).unwrap();
        assert_eq!(channel.try_read_total_msg_length(0).unwrap(), Some(2));
        assert_eq!(channel.recv_nonblocking(0).unwrap(), Some(b"me".to_vec()));
    }
}
