//! Length-prefixed frames over a TCP socket.
//!
//! One end listens and accepts (the server), the other dials (the client).
//! By default the receiving side listens; [`TcpChannel::listen_on`] flips
//! that. Once connected the socket is non-blocking and every poll makes as
//! much progress as the kernel allows: partial writes resume where they
//! stopped, partial reads accumulate in a [`FrameDecoder`].

use crate::context::{CancelToken, ExecutionContext};
use crate::transport::demux::{encode_frame, FrameDecoder, TagDemux};
use crate::transport::error::is_disconnect_kind;
use crate::transport::{Channel, ChannelError, ChannelKind, ChannelResult, ChannelRole, Side, Tag};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::task::Poll;
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 64 * 1024;
const ACCEPT_POLL: Duration = Duration::from_millis(5);

pub struct TcpChannel {
    address: String,
    endpoint: String,
    listen_side: Side,
    connect_timeout: Duration,
    accept_timeout: Duration,
    nodelay: bool,
    cancel: CancelToken,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    role: ChannelRole,
    outgoing: Vec<u8>,
    written: usize,
    decoder: FrameDecoder,
    demux: TagDemux,
    peer_closed: bool,
}

impl TcpChannel {
    /// Channel for `address` (`host:port`), tuned from `transport.*` settings.
    pub fn new(ctx: &ExecutionContext, address: impl Into<String>) -> Self {
        let address = address.into();
        let transport = &ctx.config().transport;
        Self {
            endpoint: format!("tcp://{}", address),
            address,
            listen_side: Side::Receiver,
            connect_timeout: transport.tcp_connect_timeout(),
            accept_timeout: transport.tcp_accept_timeout(),
            nodelay: transport.tcp_nodelay,
            cancel: ctx.cancel_token().clone(),
            listener: None,
            stream: None,
            role: ChannelRole::Client,
            outgoing: Vec::new(),
            written: 0,
            decoder: FrameDecoder::new(),
            demux: TagDemux::new(),
            peer_closed: false,
        }
    }

    /// Choose which side listens. `Side::Both` is rejected at connect time.
    pub fn listen_on(mut self, side: Side) -> Self {
        self.listen_side = side;
        self
    }

    /// Bind the listening socket now and return its local address. Useful
    /// with port 0, where the peer needs the assigned port.
    pub fn bind(&mut self) -> ChannelResult<SocketAddr> {
        if self.listener.is_none() {
            let listener = TcpListener::bind(&self.address).map_err(|e| self.io_error(e))?;
            self.listener = Some(listener);
        }
        let local = self
            .listener
            .as_ref()
            .map(TcpListener::local_addr)
            .transpose()
            .map_err(|e| self.io_error(e))?
            .ok_or_else(|| ChannelError::Misconfigured(format!("{} is not bound", self.endpoint)))?;
        self.endpoint = format!("tcp://{}", local);
        Ok(local)
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    fn io_error(&self, source: io::Error) -> ChannelError {
        if is_disconnect_kind(source.kind()) {
            ChannelError::Disconnected {
                endpoint: self.endpoint.clone(),
            }
        } else {
            ChannelError::Io {
                endpoint: self.endpoint.clone(),
                source,
            }
        }
    }

    fn configure(&self, stream: &TcpStream) -> ChannelResult<()> {
        stream.set_nonblocking(true).map_err(|e| self.io_error(e))?;
        stream.set_nodelay(self.nodelay).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn accept(&mut self) -> ChannelResult<TcpStream> {
        self.bind()?;
        let Some(listener) = self.listener.as_ref() else {
            return Err(ChannelError::Misconfigured(format!("{} is not bound", self.endpoint)));
        };
        listener.set_nonblocking(true).map_err(|e| self.io_error(e))?;

        let deadline = Instant::now() + self.accept_timeout;
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(endpoint = %self.endpoint, %peer, "accepted connection");
                    return Ok(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if self.cancel.is_cancelled() {
                        return Err(ChannelError::Cancelled);
                    }
                    if Instant::now() >= deadline {
                        return Err(ChannelError::ConnectFailed {
                            endpoint: self.endpoint.clone(),
                            reason: format!("no peer within {:?}", self.accept_timeout),
                        });
                    }
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    fn dial(&self) -> ChannelResult<TcpStream> {
        let addrs = self
            .address
            .to_socket_addrs()
            .map_err(|e| ChannelError::ConnectFailed {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    tracing::debug!(endpoint = %self.endpoint, %addr, "connected");
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(ChannelError::ConnectFailed {
            endpoint: self.endpoint.clone(),
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "address resolved to nothing".to_string()),
        })
    }

    /// Read whatever the socket has and move complete frames to the demux.
    fn fill(&mut self) -> ChannelResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ChannelError::NotConnected {
                endpoint: self.endpoint.clone(),
            });
        };
        let mut chunk = [0u8; READ_CHUNK];
        while !self.peer_closed {
            match stream.read(&mut chunk) {
                Ok(0) => self.peer_closed = true,
                Ok(n) => self.decoder.feed(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_disconnect_kind(e.kind()) => self.peer_closed = true,
                Err(e) => {
                    return Err(ChannelError::Io {
                        endpoint: self.endpoint.clone(),
                        source: e,
                    })
                }
            }
        }
        while let Some((tag, payload)) = self.decoder.next_frame() {
            self.demux.park(tag, payload);
        }
        Ok(())
    }

    fn closed(&self) -> ChannelError {
        ChannelError::Disconnected {
            endpoint: self.endpoint.clone(),
        }
    }
}

impl Channel for TcpChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Tcp
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn role(&self) -> ChannelRole {
        self.role
    }

    fn connect(&mut self, side: Side) -> ChannelResult<()> {
        if side == Side::Both || self.listen_side == Side::Both {
            return Err(ChannelError::Misconfigured(format!(
                "{} needs distinct listening and dialling sides",
                self.endpoint
            )));
        }
        if self.stream.is_some() {
            return Ok(());
        }

        let (stream, role) = if side == self.listen_side {
            (self.accept()?, ChannelRole::Server)
        } else {
            (self.dial()?, ChannelRole::Client)
        };
        self.configure(&stream)?;
        self.stream = Some(stream);
        self.role = role;
        self.peer_closed = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        self.outgoing.clear();
        self.written = 0;
        self.decoder.clear();
        self.demux.clear();
        self.peer_closed = false;
    }

    fn submit(&mut self, tag: Tag, payload: &[u8]) -> ChannelResult<()> {
        if self.stream.is_none() {
            return Err(ChannelError::NotConnected {
                endpoint: self.endpoint.clone(),
            });
        }
        if self.has_pending_send() {
            return Err(ChannelError::SendInProgress {
                endpoint: self.endpoint.clone(),
            });
        }
        self.outgoing = encode_frame(tag, payload)?;
        self.written = 0;
        Ok(())
    }

    fn poll_flush(&mut self) -> ChannelResult<Poll<()>> {
        if !self.has_pending_send() {
            return Ok(Poll::Ready(()));
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(ChannelError::NotConnected {
                endpoint: self.endpoint.clone(),
            });
        };
        while self.written < self.outgoing.len() {
            match stream.write(&self.outgoing[self.written..]) {
                Ok(0) => return Err(self.closed()),
                Ok(n) => self.written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Poll::Pending),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io_error(e)),
            }
        }
        self.outgoing.clear();
        self.written = 0;
        Ok(Poll::Ready(()))
    }

    fn has_pending_send(&self) -> bool {
        !self.outgoing.is_empty()
    }

    fn poll_recv(&mut self, tag: Tag) -> ChannelResult<Poll<Vec<u8>>> {
        if let Some(payload) = self.demux.take(tag) {
            return Ok(Poll::Ready(payload));
        }
        self.fill()?;
        match self.demux.take(tag) {
            Some(payload) => Ok(Poll::Ready(payload)),
            None if self.peer_closed => Err(self.closed()),
            None => Ok(Poll::Pending),
        }
    }

    fn poll_msg_len(&mut self, tag: Tag) -> ChannelResult<Poll<usize>> {
        if let Some(len) = self.demux.peek_len(tag) {
            return Ok(Poll::Ready(len));
        }
        self.fill()?;
        if let Some(len) = self.demux.peek_len(tag) {
            return Ok(Poll::Ready(len));
        }
        match self.decoder.peek_header() {
            Some((t, len)) if t == tag => Ok(Poll::Ready(len)),
            _ if self.peer_closed => Err(self.closed()),
            _ => Ok(Poll::Pending),
        }
    }

    fn is_clonable(&self) -> bool {
        false
    }

    fn try_clone(&self) -> ChannelResult<Box<dyn Channel>> {
        Err(ChannelError::NotClonable(ChannelKind::Tcp))
    }
}
