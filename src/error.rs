//! Adapter error types.

use thiserror::Error;

/// Errors surfaced by the adapter.
///
/// The type is `Clone` so a single bus failure can be reported both through
/// the failing operation's `Result` and on the process-wide error stream
/// returned by [`crate::adapter::RedisAdapter::errors`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// Failed to reach or talk to the Redis server.
    #[error("redis connection error: {message}")]
    Connection { message: String },

    /// A bus SUBSCRIBE failed.
    #[error("subscribe to {channel} failed: {message}")]
    Subscribe { channel: String, message: String },

    /// A bus UNSUBSCRIBE failed.
    #[error("unsubscribe from {channel} failed: {message}")]
    Unsubscribe { channel: String, message: String },

    /// A bus PUBLISH failed.
    #[error("publish to {channel} failed: {message}")]
    Publish { channel: String, message: String },

    /// A wire payload could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Invalid adapter configuration.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A local (non-bus) operation was rejected.
    #[error("local operation failed: {message}")]
    Local { message: String },

    /// The adapter is shutting down and the bus listener is gone.
    #[error("adapter is shutting down")]
    Closed,
}

impl AdapterError {
    pub(crate) fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection {
            message: err.to_string(),
        }
    }

    pub(crate) fn subscribe(channel: &str, err: impl std::fmt::Display) -> Self {
        Self::Subscribe {
            channel: channel.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn unsubscribe(channel: &str, err: impl std::fmt::Display) -> Self {
        Self::Unsubscribe {
            channel: channel.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn publish(channel: &str, err: impl std::fmt::Display) -> Self {
        Self::Publish {
            channel: channel.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec {
            message: err.to_string(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn local(message: impl Into<String>) -> Self {
        Self::Local {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type AdapterResult<T> = Result<T, AdapterError>;
