//! Transactions between a producer and a consumer over one channel.
//!
//! A [`Connection`] owns a [`Channel`] and moves encoded [`DataHolder`]
//! messages across it. The holders themselves stay with the steps that own
//! them and are lent to [`Connection::write`] / [`Connection::read`] for the
//! duration of one transfer.
//!
//! # Disconnects
//!
//! When the channel reports that its peer is gone, the effective role
//! decides what happens:
//!
//! - `Client`: disconnect, back off, reconnect and retry the transfer, at
//!   most `reconnect.max_attempts` times, then fail with `ReconnectFailed`.
//! - `Server`: the peer has departed for good (`PeerDeparted`).
//! - `Peer`: surfaced as a transport error.
//!
//! Protocol errors (a message that arrives intact but fails validation)
//! are reported separately from transport errors and never trigger a
//! reconnect.

pub mod error;

pub use error::{ConnectionError, ConnectionResult};

use crate::config::ReconnectConfig;
use crate::context::CancelToken;
use crate::data::{decode_into, encode, DataHolder, Schema};
use crate::transport::{Channel, ChannelError, ChannelExt, ChannelResult, ChannelRole, Side, Tag};
use serde::Serialize;
use std::time::{Duration, Instant};

const PAUSE_SLICE: Duration = Duration::from_millis(10);

/// Whether transfers wait for the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    #[default]
    Blocking,
    NonBlocking,
}

/// Outcome of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// The message has been handed over completely.
    Complete,
    /// Non-blocking only: the transfer has not finished. For a write,
    /// `wait_for_sent` must be called before the next write; for a read the
    /// destination holder still holds its previous contents.
    Pending,
}

/// Counters kept per connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reconnects: u64,
}

pub struct Connection {
    name: String,
    channel: Box<dyn Channel>,
    tag: Tag,
    mode: TransferMode,
    role: Option<ChannelRole>,
    reconnect: Option<ReconnectConfig>,
    cancel: CancelToken,
    side: Option<Side>,
    in_flight: Option<Vec<u8>>,
    stats: ConnectionStats,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("endpoint", &self.channel.endpoint())
            .field("tag", &self.tag)
            .field("mode", &self.mode)
            .field("side", &self.side)
            .finish()
    }
}

impl Connection {
    /// Blocking connection over `channel` using tag 0.
    pub fn new(name: impl Into<String>, channel: Box<dyn Channel>) -> Self {
        Self {
            name: name.into(),
            channel,
            tag: 0,
            mode: TransferMode::Blocking,
            role: None,
            reconnect: None,
            cancel: CancelToken::new(),
            side: None,
            in_flight: None,
            stats: ConnectionStats::default(),
        }
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    pub fn with_mode(mut self, mode: TransferMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn non_blocking(self) -> Self {
        self.with_mode(TransferMode::NonBlocking)
    }

    /// Override the role reported by the channel.
    pub fn with_role(mut self, role: ChannelRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Pin the reconnection policy; otherwise the context's policy applies.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Adopt the context's cancel token and, unless pinned, its reconnect policy.
    pub(crate) fn bind(&mut self, cancel: &CancelToken, reconnect: &ReconnectConfig) {
        self.cancel = cancel.clone();
        if self.reconnect.is_none() {
            self.reconnect = Some(reconnect.clone());
        }
    }

    /// Unopened copy over a clone of the channel, keeping tag, mode, role
    /// and reconnect policy.
    pub fn replicate(&self, name: impl Into<String>) -> ChannelResult<Self> {
        Ok(Self {
            name: name.into(),
            channel: self.channel.try_clone()?,
            tag: self.tag,
            mode: self.mode,
            role: self.role,
            reconnect: self.reconnect.clone(),
            cancel: self.cancel.clone(),
            side: None,
            in_flight: None,
            stats: ConnectionStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn channel(&self) -> &dyn Channel {
        self.channel.as_ref()
    }

    pub fn side(&self) -> Option<Side> {
        self.side
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn is_open(&self) -> bool {
        self.side.is_some() && self.channel.is_connected()
    }

    fn role(&self) -> ChannelRole {
        self.role.unwrap_or_else(|| self.channel.role())
    }

    fn policy(&self) -> ReconnectConfig {
        self.reconnect.clone().unwrap_or_default()
    }

    /// Require that messages of `source` can be decoded as `dest`.
    pub fn check_schemas(&self, source: &Schema, dest: &Schema) -> ConnectionResult<()> {
        if source.is_wire_compatible(dest) {
            Ok(())
        } else {
            Err(ConnectionError::SchemaMismatch {
                connection: self.name.clone(),
                source_schema: source.label(),
                dest_schema: dest.label(),
            })
        }
    }

    /// Establish the channel for the local `side`. Retryable connect
    /// failures are retried under the reconnect policy.
    pub fn open(&mut self, side: Side) -> ConnectionResult<()> {
        if self.side.is_some() && self.channel.is_connected() {
            return Ok(());
        }
        let policy = self.policy();
        let mut attempt = 0;
        loop {
            match self.channel.connect(side) {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    attempt += 1;
                    tracing::debug!(
                        connection = %self.name,
                        endpoint = %self.channel.endpoint(),
                        attempt,
                        "connect failed, retrying: {}",
                        e
                    );
                    self.pause(policy.backoff(attempt))?;
                }
                Err(e) => return Err(self.channel_error(e)),
            }
        }
        tracing::debug!(
            connection = %self.name,
            endpoint = %self.channel.endpoint(),
            ?side,
            "connection open"
        );
        self.side = Some(side);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.side.take().is_some() {
            self.channel.disconnect();
            self.in_flight = None;
            tracing::debug!(connection = %self.name, "connection closed");
        }
    }

    /// Encode `source` and send it.
    pub fn write(&mut self, source: &DataHolder) -> ConnectionResult<Transfer> {
        let bytes = encode(source).map_err(|e| ConnectionError::Encode {
            connection: self.name.clone(),
            source: e,
        })?;
        let tag = self.tag;
        let len = bytes.len() as u64;

        let transfer = match self.mode {
            TransferMode::Blocking => {
                self.transact(|ch, cancel| ch.send_blocking(tag, &bytes, cancel))?;
                Transfer::Complete
            }
            TransferMode::NonBlocking => {
                if self.transact(|ch, _| ch.send_nonblocking(tag, &bytes))? {
                    Transfer::Complete
                } else {
                    self.in_flight = Some(bytes);
                    Transfer::Pending
                }
            }
        };
        self.stats.messages_sent += 1;
        self.stats.bytes_sent += len;
        Ok(transfer)
    }

    /// Complete a pending non-blocking write. A message interrupted by a
    /// reconnect is sent again on the new channel.
    pub fn wait_for_sent(&mut self) -> ConnectionResult<()> {
        let replay = self.in_flight.take();
        let tag = self.tag;
        let mut first = true;
        self.transact(|ch, cancel| {
            if !first {
                if let Some(bytes) = &replay {
                    ch.submit(tag, bytes)?;
                }
            }
            first = false;
            ch.wait_for_sent(cancel)
        })
    }

    /// Receive one message into `dest`.
    ///
    /// On `Pending` (non-blocking only) and on any error `dest` is left as
    /// it was.
    pub fn read(&mut self, dest: &mut DataHolder) -> ConnectionResult<Transfer> {
        let tag = self.tag;
        let bytes = match self.mode {
            TransferMode::Blocking => self.transact(|ch, cancel| ch.recv_blocking(tag, cancel))?,
            TransferMode::NonBlocking => match self.transact(|ch, _| ch.recv_nonblocking(tag))? {
                Some(bytes) => bytes,
                None => return Ok(Transfer::Pending),
            },
        };
        self.accept(&bytes, dest)?;
        Ok(Transfer::Complete)
    }

    /// Complete a read that returned `Pending`.
    pub fn wait_for_received(&mut self, dest: &mut DataHolder) -> ConnectionResult<()> {
        let tag = self.tag;
        let bytes = self.transact(|ch, cancel| ch.wait_for_received(tag, cancel))?;
        self.accept(&bytes, dest)
    }

    fn accept(&mut self, bytes: &[u8], dest: &mut DataHolder) -> ConnectionResult<()> {
        decode_into(bytes, dest).map_err(|e| {
            tracing::warn!(connection = %self.name, "rejected message: {}", e);
            ConnectionError::Protocol {
                connection: self.name.clone(),
                source: e,
            }
        })?;
        self.stats.messages_received += 1;
        self.stats.bytes_received += bytes.len() as u64;
        Ok(())
    }

    /// Run `op` against the channel, applying the disconnect policy.
    fn transact<T>(
        &mut self,
        mut op: impl FnMut(&mut dyn Channel, &CancelToken) -> ChannelResult<T>,
    ) -> ConnectionResult<T> {
        let Some(side) = self.side else {
            return Err(ConnectionError::NotOpen {
                connection: self.name.clone(),
            });
        };
        let err = match op(self.channel.as_mut(), &self.cancel) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_disconnect() => e,
            Err(e) => return Err(self.channel_error(e)),
        };

        match self.role() {
            ChannelRole::Client => self.reconnect(side, err, op),
            ChannelRole::Server => {
                tracing::warn!(
                    connection = %self.name,
                    endpoint = %self.channel.endpoint(),
                    "peer departed"
                );
                self.side = None;
                self.channel.disconnect();
                Err(ConnectionError::PeerDeparted {
                    connection: self.name.clone(),
                })
            }
            ChannelRole::Peer => Err(self.channel_error(err)),
        }
    }

    fn reconnect<T>(
        &mut self,
        side: Side,
        mut last: ChannelError,
        mut op: impl FnMut(&mut dyn Channel, &CancelToken) -> ChannelResult<T>,
    ) -> ConnectionResult<T> {
        let policy = self.policy();
        for attempt in 1..=policy.max_attempts {
            self.pause(policy.backoff(attempt))?;
            tracing::warn!(
                connection = %self.name,
                endpoint = %self.channel.endpoint(),
                attempt,
                max_attempts = policy.max_attempts,
                "reconnecting after: {}",
                last
            );
            self.channel.disconnect();
            match self.channel.connect(side) {
                Ok(()) => self.stats.reconnects += 1,
                Err(e) if e.is_retryable() => {
                    last = e;
                    continue;
                }
                Err(e) => return Err(self.channel_error(e)),
            }
            match op(self.channel.as_mut(), &self.cancel) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_disconnect() => last = e,
                Err(e) => return Err(self.channel_error(e)),
            }
        }
        tracing::error!(
            connection = %self.name,
            attempts = policy.max_attempts,
            "reconnection failed"
        );
        Err(ConnectionError::ReconnectFailed {
            connection: self.name.clone(),
            attempts: policy.max_attempts,
            source: last,
        })
    }

    fn pause(&self, delay: Duration) -> ConnectionResult<()> {
        let deadline = Instant::now() + delay;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ConnectionError::Cancelled {
                    connection: self.name.clone(),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }

    fn channel_error(&self, source: ChannelError) -> ConnectionError {
        match source {
            ChannelError::Cancelled => ConnectionError::Cancelled {
                connection: self.name.clone(),
            },
            source => ConnectionError::Transport {
                connection: self.name.clone(),
                source,
            },
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
