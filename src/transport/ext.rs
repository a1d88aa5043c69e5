//! Blocking and non-blocking operations derived from the poll primitive.

use crate::context::CancelToken;
use crate::transport::{Channel, ChannelError, ChannelResult, Tag};
use std::task::Poll;
use std::time::Duration;

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;
const MAX_SLEEP: Duration = Duration::from_millis(1);

/// Escalating wait used between polls: spin, then yield, then short sleeps.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Wait once. Returns `Cancelled` if the token fired.
    pub fn wait(&mut self, cancel: &CancelToken) -> ChannelResult<()> {
        if cancel.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }
        if self.step <= SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
        } else if self.step <= YIELD_LIMIT {
            std::thread::yield_now();
        } else {
            let exp = (self.step - YIELD_LIMIT).min(5);
            let sleep = Duration::from_micros(30 << exp).min(MAX_SLEEP);
            std::thread::sleep(sleep);
        }
        self.step = self.step.saturating_add(1);
        Ok(())
    }
}

/// Convenience operations available on every [`Channel`].
pub trait ChannelExt: Channel {
    /// Send `payload` and wait until the medium has accepted all of it.
    /// A previously started non-blocking send is completed first.
    fn send_blocking(&mut self, tag: Tag, payload: &[u8], cancel: &CancelToken) -> ChannelResult<()> {
        if self.has_pending_send() {
            self.wait_for_sent(cancel)?;
        }
        self.submit(tag, payload)?;
        self.wait_for_sent(cancel)
    }

    /// Start sending `payload`. Returns `true` if it completed immediately;
    /// otherwise `wait_for_sent` must be called before the next send.
    fn send_nonblocking(&mut self, tag: Tag, payload: &[u8]) -> ChannelResult<bool> {
        self.submit(tag, payload)?;
        Ok(self.poll_flush()?.is_ready())
    }

    /// Block until the queued message has been accepted by the medium.
    fn wait_for_sent(&mut self, cancel: &CancelToken) -> ChannelResult<()> {
        let mut backoff = Backoff::new();
        loop {
            if self.poll_flush()?.is_ready() {
                return Ok(());
            }
            backoff.wait(cancel)?;
        }
    }

    /// Block until a complete message for `tag` has arrived.
    fn recv_blocking(&mut self, tag: Tag, cancel: &CancelToken) -> ChannelResult<Vec<u8>> {
        let mut backoff = Backoff::new();
        loop {
            if let Poll::Ready(bytes) = self.poll_recv(tag)? {
                return Ok(bytes);
            }
            backoff.wait(cancel)?;
        }
    }

    /// Take a message for `tag` if one is available; `None` means "nothing yet".
    fn recv_nonblocking(&mut self, tag: Tag) -> ChannelResult<Option<Vec<u8>>> {
        Ok(match self.poll_recv(tag)? {
            Poll::Ready(bytes) => Some(bytes),
            Poll::Pending => None,
        })
    }

    /// Complete a receive that `recv_nonblocking` reported as not ready.
    fn wait_for_received(&mut self, tag: Tag, cancel: &CancelToken) -> ChannelResult<Vec<u8>> {
        self.recv_blocking(tag, cancel)
    }

    /// Receive into `buf[offset..]`, returning the number of bytes written.
    fn recv_into(
        &mut self,
        buf: &mut [u8],
        offset: usize,
        tag: Tag,
        cancel: &CancelToken,
    ) -> ChannelResult<usize> {
        let capacity = buf.len().saturating_sub(offset);
        let len = self.read_total_msg_length(tag, cancel)?;
        if len > capacity {
            return Err(ChannelError::MessageTooLarge { size: len, capacity });
        }
        let bytes = self.recv_blocking(tag, cancel)?;
        buf[offset..offset + bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Block until the sender has announced the length of the next message.
    fn read_total_msg_length(&mut self, tag: Tag, cancel: &CancelToken) -> ChannelResult<usize> {
        let mut backoff = Backoff::new();
        loop {
            if let Poll::Ready(len) = self.poll_msg_len(tag)? {
                return Ok(len);
            }
            backoff.wait(cancel)?;
        }
    }

    fn try_read_total_msg_length(&mut self, tag: Tag) -> ChannelResult<Option<usize>> {
        Ok(match self.poll_msg_len(tag)? {
            Poll::Ready(len) => Some(len),
            Poll::Pending => None,
        })
    }
}

impl<T: Channel + ?Sized> ChannelExt for T {}
