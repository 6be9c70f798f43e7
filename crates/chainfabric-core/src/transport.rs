//! The `EventTransport` trait: the connection provider behind an event stream.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::wire::{Event, SignedEvent};

/// Send half of the duplex stream: every message pushed into the matching
/// sender is written to the peer. Dropping the sender closes the send side.
pub type OutboundEvents = mpsc::UnboundedReceiver<SignedEvent>;

/// Receive half of the duplex stream. `None` means clean EOF.
pub type InboundEvents = Pin<Box<dyn Stream<Item = Result<Event, TransportError>> + Send>>;

/// Connection provider for a peer's event service.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn EventTransport>`.
#[async_trait]
pub trait EventTransport: Send + Sync + 'static {
    /// Establish (or reuse) the underlying connection.
    async fn dial(&self) -> Result<(), TransportError>;

    /// Open the bidirectional event stream over the dialed connection.
    async fn chat(&self, outbound: OutboundEvents) -> Result<InboundEvents, TransportError>;

    /// Release the connection. Safe to call when nothing is open.
    async fn release(&self);

    /// Return the transport's target URL.
    fn url(&self) -> &str;
}
