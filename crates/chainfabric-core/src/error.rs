//! Transport, decoding and signing error types.

use thiserror::Error;

/// Errors that can occur while talking to a peer's event service.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The configured peer URL could not be parsed or used.
    #[error("invalid peer URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Dialing the peer failed (connection refused, DNS, TLS handshake...).
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// TLS material could not be loaded or applied.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// `chat` was called before a successful `dial`.
    #[error("not connected to {url}")]
    NotConnected { url: String },

    /// The peer answered with a non-OK gRPC status.
    #[error("gRPC status {code}: {message}")]
    Status { code: String, message: String },

    /// The event stream ended.
    #[error("event stream closed")]
    StreamClosed,

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if reconnecting later may succeed.
    ///
    /// Reconnection policy belongs to the caller; this is only a hint.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Status { .. } | Self::StreamClosed
        )
    }
}

/// Errors raised while unpacking protobuf structures out of a block.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A nested protobuf message failed to decode.
    #[error("failed to decode {what}: {source}")]
    Protobuf {
        what: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    /// A required nested structure was absent.
    #[error("{what} is missing")]
    Missing { what: &'static str },
}

impl DecodeError {
    pub(crate) fn protobuf(what: &'static str) -> impl FnOnce(prost::DecodeError) -> Self {
        move |source| Self::Protobuf { what, source }
    }
}

/// Errors produced by a [`SigningIdentity`](crate::identity::SigningIdentity).
#[derive(Debug, Error)]
pub enum SignError {
    /// The private key material is malformed.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// The signer refused or failed to produce a signature.
    #[error("signing failed: {0}")]
    Signing(String),
}
