//! Transport-specific error types.

use crate::error::ErrorClass;
use crate::transport::ChannelKind;
use thiserror::Error;

/// Errors raised by channel implementations.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel {endpoint} is not connected")]
    NotConnected { endpoint: String },

    #[error("Failed to connect {endpoint}: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    #[error("Channel misconfigured: {0}")]
    Misconfigured(String),

    #[error("Peer of {endpoint} disconnected")]
    Disconnected { endpoint: String },

    #[error("A send is already in flight on {endpoint}")]
    SendInProgress { endpoint: String },

    #[error("Message of {size} bytes exceeds capacity of {capacity} bytes")]
    MessageTooLarge { size: usize, capacity: usize },

    #[error("{0} channels cannot be cloned")]
    NotClonable(ChannelKind),

    #[error("Channel operation cancelled")]
    Cancelled,

    #[error("IO error on {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

impl ChannelError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChannelError::Misconfigured(_)
            | ChannelError::NotClonable(_)
            | ChannelError::MessageTooLarge { .. } => ErrorClass::Configuration,
            ChannelError::Cancelled => ErrorClass::Cancelled,
            _ => ErrorClass::Transport,
        }
    }

    /// Whether the underlying medium is gone and must be rebuilt.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ChannelError::Disconnected { .. } => true,
            ChannelError::Io { source, .. } => is_disconnect_kind(source.kind()),
            _ => false,
        }
    }

    /// Whether a later attempt at the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::ConnectFailed { .. }) || self.is_disconnect()
    }
}

pub(crate) fn is_disconnect_kind(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected
    )
}

pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_disconnect_detection() {
        let reset = ChannelError::Io {
            endpoint: "tcp://x".into(),
            source: io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        };
        assert!(reset.is_disconnect());
        assert!(reset.is_retryable());

        let other = ChannelError::Io {
            endpoint: "tcp://x".into(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        };
        assert!(!other.is_disconnect());
        assert_eq!(other.class(), ErrorClass::Transport);
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            ChannelError::NotClonable(ChannelKind::Tcp).class(),
            ErrorClass::Configuration
        );
        assert_eq!(ChannelError::Cancelled.class(), ErrorClass::Cancelled);
        assert!(ChannelError::ConnectFailed {
            endpoint: "a".into(),
            reason: "refused".into()
        }
        .is_retryable());
    }
}
