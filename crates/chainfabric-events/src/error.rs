//! Event hub error types.

use thiserror::Error;

use chainfabric_core::error::{SignError, TransportError};
use chainfabric_core::wire::TxValidationCode;

/// Errors surfaced by the event hub and its stream client.
#[derive(Debug, Error)]
pub enum EventHubError {
    /// No peer address configured.
    #[error("peerAddr is required")]
    PeerAddrRequired,

    /// `connect` called with an empty interest set.
    #[error("at least one event must be registered")]
    NoInterests,

    /// The adapter supplied no interests when the stream client started.
    #[error("interested events is required")]
    NoInterestedEvents,

    /// No signing identity (user context) is available for outbound messages.
    #[error("user context is nil: no signing identity configured")]
    MissingIdentity,

    /// A send was attempted with no open event stream.
    #[error("event stream is not open")]
    NotStarted,

    /// The peer did not acknowledge a `Register` in time.
    #[error("timeout waiting for registration ({timeout_ms}ms)")]
    RegistrationTimeout { timeout_ms: u64 },

    /// The peer did not acknowledge an `Unregister` in time.
    #[error("timeout waiting for unregistration ({timeout_ms}ms)")]
    UnregistrationTimeout { timeout_ms: u64 },

    /// The peer answered a handshake with an unexpected message.
    #[error("invalid {expected} response: got {got} event")]
    InvalidRegistrationResponse {
        expected: &'static str,
        got: &'static str,
    },

    /// The requested registration timeout was outside the accepted range.
    #[error("regTimeout {requested_ms}ms out of range, using {applied_ms}ms")]
    RegTimeoutClamped { requested_ms: u64, applied_ms: u64 },

    /// Delivered to transaction callbacks for transactions the committer rejected.
    #[error("received invalid transaction from channel {channel_id}: {code}")]
    InvalidTransaction {
        channel_id: String,
        code: TxValidationCode,
        /// Flag byte as stored in the block, which may be newer than `code` knows.
        raw_code: u8,
    },

    /// `wait_for_tx` gave up.
    #[error("transaction {tx_id} not observed within {timeout_ms}ms")]
    TxWaitTimeout { tx_id: String, timeout_ms: u64 },

    /// `wait_for_tx` lost its registration to a newer one for the same ID.
    #[error("transaction {tx_id} callback was replaced")]
    TxRegistrationReplaced { tx_id: String },

    /// Opening the event stream failed; the stream was torn down.
    #[error("start failed: {0}")]
    StartFailed(#[source] Box<EventHubError>),

    /// Configuration could not be loaded.
    #[error("invalid configuration {path}: {reason}")]
    Config { path: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Sign(#[from] SignError),
}

impl EventHubError {
    /// Returns `true` for errors the caller must fix before trying again.
    pub fn is_config_error(&self) -> bool {
        match self {
            Self::PeerAddrRequired
            | Self::NoInterests
            | Self::NoInterestedEvents
            | Self::MissingIdentity
            | Self::Config { .. } => true,
            Self::StartFailed(inner) => inner.is_config_error(),
            _ => false,
        }
    }

    /// Returns `true` if the peer never acknowledged a handshake.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::RegistrationTimeout { .. } | Self::UnregistrationTimeout { .. } => true,
            Self::StartFailed(inner) => inner.is_timeout(),
            _ => false,
        }
    }
}
