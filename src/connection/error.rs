//! Connection error types.

use crate::data::DataError;
use crate::error::ErrorClass;
use crate::transport::ChannelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection '{connection}' is not open")]
    NotOpen { connection: String },

    #[error("Connection '{connection}' joins {source_schema} to {dest_schema}")]
    SchemaMismatch {
        connection: String,
        source_schema: String,
        dest_schema: String,
    },

    #[error("Connection '{connection}' could not encode its message: {source}")]
    Encode {
        connection: String,
        #[source]
        source: DataError,
    },

    /// The message arrived but could not be trusted.
    #[error("Connection '{connection}' received a bad message: {source}")]
    Protocol {
        connection: String,
        #[source]
        source: DataError,
    },

    #[error("Connection '{connection}' transport failed: {source}")]
    Transport {
        connection: String,
        #[source]
        source: ChannelError,
    },

    #[error("Connection '{connection}' gave up after {attempts} reconnection attempts: {source}")]
    ReconnectFailed {
        connection: String,
        attempts: u32,
        #[source]
        source: ChannelError,
    },

    #[error("Peer of connection '{connection}' has departed")]
    PeerDeparted { connection: String },

    #[error("Connection '{connection}' cancelled")]
    Cancelled { connection: String },
}

impl ConnectionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ConnectionError::NotOpen { .. }
            | ConnectionError::SchemaMismatch { .. }
            | ConnectionError::Encode { .. } => ErrorClass::Configuration,
            ConnectionError::Protocol { .. } => ErrorClass::Protocol,
            ConnectionError::Transport { source, .. } => source.class(),
            ConnectionError::ReconnectFailed { .. } | ConnectionError::PeerDeparted { .. } => {
                ErrorClass::Transport
            }
            ConnectionError::Cancelled { .. } => ErrorClass::Cancelled,
        }
    }
}

pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;
