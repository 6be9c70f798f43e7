//! `EventsClient`: one duplex event stream to a peer.
//!
//! The client owns the stream lifecycle: dial, register handshake, a
//! background reader task that forwards inbound events to an
//! [`EventAdapter`], and an orderly stop. It holds no registrant state of its
//! own; the adapter (normally the hub) supplies interests and consumes events.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use prost::Message;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chainfabric_core::error::TransportError;
use chainfabric_core::identity::SigningIdentity;
use chainfabric_core::transport::{EventTransport, InboundEvents};
use chainfabric_core::wire::{event, Event, Interest, SignedEvent};

use crate::error::EventHubError;

/// Shortest accepted registration timeout.
pub const MIN_REG_TIMEOUT: Duration = Duration::from_millis(100);
/// Longest accepted registration timeout.
pub const MAX_REG_TIMEOUT: Duration = Duration::from_secs(60);

/// Consumer side of an [`EventsClient`].
pub trait EventAdapter: Send + Sync {
    /// Interests to declare when the stream opens.
    fn interested_events(&self) -> Result<Vec<Interest>, EventHubError>;

    /// Handle one inbound event. `Ok(false)` stops the reader.
    fn recv(&self, event: Event) -> Result<bool, EventHubError>;

    /// The stream ended. `None` means the peer closed it cleanly.
    fn disconnected(&self, err: Option<&TransportError>);
}

/// Clamp `requested` into `[MIN_REG_TIMEOUT, MAX_REG_TIMEOUT]`.
///
/// Returns the value to use and, when it differs from the request, a
/// `RegTimeoutClamped` warning for the caller to surface.
pub fn clamp_reg_timeout(requested: Duration) -> (Duration, Option<EventHubError>) {
    let applied = requested.clamp(MIN_REG_TIMEOUT, MAX_REG_TIMEOUT);
    if applied == requested {
        return (applied, None);
    }
    let warning = EventHubError::RegTimeoutClamped {
        requested_ms: requested.as_millis() as u64,
        applied_ms: applied.as_millis() as u64,
    };
    (applied, Some(warning))
}

type AckSlot = Arc<Mutex<Option<oneshot::Sender<Event>>>>;

struct Session {
    outbound: mpsc::UnboundedSender<SignedEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
}

/// A single event stream to a peer.
pub struct EventsClient {
    transport: Arc<dyn EventTransport>,
    identity: Option<Arc<dyn SigningIdentity>>,
    adapter: Arc<dyn EventAdapter>,
    reg_timeout: Duration,
    session: Mutex<Option<Session>>,
    /// Inbound half until the reader task takes it over.
    inbound: tokio::sync::Mutex<Option<InboundEvents>>,
    ack: AckSlot,
    streaming: Arc<AtomicBool>,
}

impl EventsClient {
    /// Build a client. The second value is set when `reg_timeout` was clamped.
    pub fn new(
        transport: Arc<dyn EventTransport>,
        identity: Option<Arc<dyn SigningIdentity>>,
        adapter: Arc<dyn EventAdapter>,
        reg_timeout: Duration,
    ) -> (Self, Option<EventHubError>) {
        let (reg_timeout, warning) = clamp_reg_timeout(reg_timeout);
        let client = Self {
            transport,
            identity,
            adapter,
            reg_timeout,
            session: Mutex::new(None),
            inbound: tokio::sync::Mutex::new(None),
            ack: Arc::new(Mutex::new(None)),
            streaming: Arc::new(AtomicBool::new(false)),
        };
        (client, warning)
    }

    pub fn reg_timeout(&self) -> Duration {
        self.reg_timeout
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    /// `true` while the background reader is consuming the stream.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Open the stream, register the adapter's interests and start reading.
    ///
    /// Returns the interests that were registered. Any stale stream is
    /// stopped first.
    pub async fn start(&self) -> Result<Vec<Interest>, EventHubError> {
        if let Err(e) = self.stop().await {
            warn!(url = %self.url(), error = %e, "failed to stop stale event stream");
        }

        self.transport.dial().await?;

        let interests = self.adapter.interested_events()?;
        if interests.is_empty() {
            return Err(EventHubError::NoInterestedEvents);
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let stream = self.transport.chat(outbound_rx).await?;
        *self.inbound.lock().await = Some(stream);
        *self.session.lock() = Some(Session {
            outbound,
            shutdown: None,
            reader: None,
        });

        self.register(interests.clone()).await?;

        let Some(stream) = self.inbound.lock().await.take() else {
            return Err(EventHubError::NotStarted);
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.streaming.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(read_loop(
            stream,
            self.adapter.clone(),
            self.ack.clone(),
            self.streaming.clone(),
            shutdown_rx,
        ));

        match self.session.lock().as_mut() {
            Some(session) => {
                session.shutdown = Some(shutdown_tx);
                session.reader = Some(reader);
            }
            None => {
                // stopped concurrently
                let _ = shutdown_tx.send(());
                reader.abort();
                self.streaming.store(false, Ordering::SeqCst);
                return Err(EventHubError::NotStarted);
            }
        }

        info!(url = %self.url(), interests = interests.len(), "event stream started");
        Ok(interests)
    }

    /// Close the send half, stop the reader and release the connection.
    ///
    /// A no-op when no stream is open.
    pub async fn stop(&self) -> Result<(), EventHubError> {
        let Some(mut session) = self.session.lock().take() else {
            return Ok(());
        };

        if let Some(shutdown) = session.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.inbound.lock().await.take();

        let mut result = Ok(());
        if let Some(reader) = session.reader.take() {
            match tokio::time::timeout(self.reg_timeout, reader).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    result = Err(TransportError::Other(format!("event reader failed: {e}")).into());
                }
                Err(_) => warn!(url = %self.url(), "event reader did not stop in time"),
            }
        }
        drop(session);

        self.streaming.store(false, Ordering::SeqCst);
        self.ack.lock().take();
        self.transport.release().await;
        debug!(url = %self.url(), "event stream stopped");
        result
    }

    /// Send a `Register` without waiting for the acknowledgement.
    pub fn register_async(&self, interests: Vec<Interest>) -> Result<(), EventHubError> {
        let creator = self.creator()?;
        self.send(Event::register(interests, creator))
    }

    /// Send an `Unregister` without waiting for the acknowledgement.
    pub fn unregister_async(&self, interests: Vec<Interest>) -> Result<(), EventHubError> {
        let creator = self.creator()?;
        self.send(Event::unregister(interests, creator))
    }

    /// Send an `Unregister` and wait up to the registration timeout for the
    /// peer to acknowledge it.
    pub async fn unregister(&self, interests: Vec<Interest>) -> Result<(), EventHubError> {
        let timeout_ms = self.reg_timeout.as_millis() as u64;

        if !self.is_streaming() {
            self.unregister_async(interests)?;
            let reply = tokio::time::timeout(self.reg_timeout, self.recv())
                .await
                .map_err(|_| EventHubError::UnregistrationTimeout { timeout_ms })??;
            return expect_ack(reply, "unregister");
        }

        let (tx, rx) = oneshot::channel();
        *self.ack.lock() = Some(tx);
        if let Err(e) = self.unregister_async(interests) {
            self.ack.lock().take();
            return Err(e);
        }
        match tokio::time::timeout(self.reg_timeout, rx).await {
            Ok(Ok(reply)) => expect_ack(reply, "unregister"),
            Ok(Err(_)) => Err(TransportError::StreamClosed.into()),
            Err(_) => {
                self.ack.lock().take();
                Err(EventHubError::UnregistrationTimeout { timeout_ms })
            }
        }
    }

    /// Pull one event off the stream before the reader has taken it over.
    ///
    /// End of stream and transport errors are reported to the adapter.
    pub async fn recv(&self) -> Result<Event, EventHubError> {
        let mut inbound = self.inbound.lock().await;
        let stream = inbound.as_mut().ok_or(EventHubError::NotStarted)?;
        match stream.next().await {
            Some(Ok(event)) => Ok(event),
            Some(Err(e)) => {
                self.adapter.disconnected(Some(&e));
                Err(e.into())
            }
            None => {
                self.adapter.disconnected(None);
                Err(TransportError::StreamClosed.into())
            }
        }
    }

    async fn register(&self, interests: Vec<Interest>) -> Result<(), EventHubError> {
        self.register_async(interests)?;
        let timeout_ms = self.reg_timeout.as_millis() as u64;
        let reply = tokio::time::timeout(self.reg_timeout, self.recv())
            .await
            .map_err(|_| EventHubError::RegistrationTimeout { timeout_ms })??;
        expect_ack(reply, "register")
    }

    fn creator(&self) -> Result<Vec<u8>, EventHubError> {
        let identity = self.identity.as_ref().ok_or(EventHubError::MissingIdentity)?;
        Ok(identity.serialize()?)
    }

    fn send(&self, event: Event) -> Result<(), EventHubError> {
        let identity = self.identity.as_ref().ok_or(EventHubError::MissingIdentity)?;
        let event_bytes = event.encode_to_vec();
        let signature = identity.sign(&event_bytes)?;

        let session = self.session.lock();
        let session = session.as_ref().ok_or(EventHubError::NotStarted)?;
        session
            .outbound
            .send(SignedEvent { signature, event_bytes })
            .map_err(|_| TransportError::StreamClosed)?;
        debug!(url = %self.url(), kind = event.kind(), "event sent");
        Ok(())
    }
}

impl fmt::Debug for EventsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventsClient")
            .field("url", &self.url())
            .field("reg_timeout", &self.reg_timeout)
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

fn expect_ack(reply: Event, expected: &'static str) -> Result<(), EventHubError> {
    let ok = matches!(
        (&reply.event, expected),
        (Some(event::Event::Register(_)), "register") | (Some(event::Event::Unregister(_)), "unregister")
    );
    if ok {
        Ok(())
    } else {
        Err(EventHubError::InvalidRegistrationResponse {
            expected,
            got: reply.kind(),
        })
    }
}

fn is_ack(event: &Event) -> bool {
    matches!(
        event.event,
        Some(event::Event::Register(_)) | Some(event::Event::Unregister(_))
    )
}

// ─── Reader task ─────────────────────────────────────────────────────────────

async fn read_loop(
    mut stream: InboundEvents,
    adapter: Arc<dyn EventAdapter>,
    ack: AckSlot,
    streaming: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("event reader shutting down");
                break;
            }
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    if is_ack(&event) {
                        let waiter = ack.lock().take();
                        if let Some(waiter) = waiter {
                            let _ = waiter.send(event);
                            continue;
                        }
                    }
                    match adapter.recv(event) {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!("adapter ended the event stream");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "adapter failed; stopping event reader");
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    streaming.store(false, Ordering::SeqCst);
                    adapter.disconnected(Some(&e));
                    break;
                }
                None => {
                    streaming.store(false, Ordering::SeqCst);
                    adapter.disconnected(None);
                    break;
                }
            },
        }
    }
    streaming.store(false, Ordering::SeqCst);
    ack.lock().take();
}
