//! `EventHub`: connection owner and fan-out point for peer events.
//!
//! The hub keeps the interest set and all registrants, owns one
//! [`EventsClient`], and dispatches every inbound block or chaincode event on
//! its own Tokio task:
//!
//! 1. block registrants run in registration order (the first one, installed at
//!    construction, resolves transaction registrants)
//! 2. each valid transaction's chaincode event is matched against chaincode
//!    registrants
//!
//! Registration calls are synchronous. While connected they also send the
//! incremental register/unregister to the peer; while disconnected the
//! interest set accumulates and is sent whole on [`EventHub::connect`].

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use chainfabric_core::block::{
    channel_header_from_payload, chaincode_event_from_tx_bytes, envelope_from_block_bytes,
    payload_from_envelope, TxValidationFlags,
};
use chainfabric_core::error::TransportError;
use chainfabric_core::identity::SigningIdentity;
use chainfabric_core::transport::EventTransport;
use chainfabric_core::wire::{event, Block, ChaincodeEvent, Event, Interest, TxValidationCode};

use crate::client::{EventAdapter, EventsClient};
use crate::config::EventHubConfig;
use crate::error::EventHubError;
use crate::interest::InterestSet;
use crate::registry::{
    BlockCallback, BlockRegistration, BlockRegistry, ChaincodeCallback, ChaincodeEventRecord,
    ChaincodeRegistration, ChaincodeRegistry, TxCallback, TxRegistry,
};

struct HubState {
    interests: InterestSet,
    blocks: BlockRegistry,
    connected: bool,
    client: Option<Arc<EventsClient>>,
}

struct HubInner {
    config: EventHubConfig,
    transport: Arc<dyn EventTransport>,
    identity: Option<Arc<dyn SigningIdentity>>,
    state: RwLock<HubState>,
    chaincodes: ChaincodeRegistry,
    txs: TxRegistry,
    /// Serializes connect and disconnect.
    conn_lock: tokio::sync::Mutex<()>,
    tx_dispatch: BlockRegistration,
}

/// Event hub for one peer. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    /// Create a disconnected hub.
    ///
    /// The transaction dispatcher is registered as the first block
    /// registrant, so the interest set starts with the block interest.
    pub fn new(
        config: EventHubConfig,
        transport: Arc<dyn EventTransport>,
        identity: Option<Arc<dyn SigningIdentity>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<HubInner>| {
            let weak = weak.clone();
            let mut blocks = BlockRegistry::new();
            let tx_dispatch = blocks.add(Arc::new(move |block: &Block| {
                if let Some(inner) = weak.upgrade() {
                    inner.dispatch_transactions(block);
                }
            }));
            let mut interests = InterestSet::new();
            interests.acquire(&Interest::block());

            HubInner {
                config,
                transport,
                identity,
                state: RwLock::new(HubState {
                    interests,
                    blocks,
                    connected: false,
                    client: None,
                }),
                chaincodes: ChaincodeRegistry::new(),
                txs: TxRegistry::new(),
                conn_lock: tokio::sync::Mutex::new(()),
                tx_dispatch,
            }
        });
        Self { inner }
    }

    // ─── Connection ──────────────────────────────────────────────────────────

    /// Open the event stream and register the current interest set.
    ///
    /// A no-op when already connected.
    pub async fn connect(&self) -> Result<(), EventHubError> {
        let _guard = self.inner.conn_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        if self.inner.config.peer.url.trim().is_empty() {
            return Err(EventHubError::PeerAddrRequired);
        }
        if self.inner.state.read().interests.is_empty() {
            return Err(EventHubError::NoInterests);
        }

        let client = self.inner.client();
        let registered = match client.start().await {
            Ok(registered) => registered,
            Err(e) => {
                if let Err(stop_err) = client.stop().await {
                    warn!(url = %self.peer_url(), error = %stop_err, "cleanup after failed start");
                }
                return Err(EventHubError::StartFailed(Box::new(e)));
            }
        };

        {
            let mut state = self.inner.state.write();
            if client.is_streaming() {
                state.connected = true;

                // Interests may have changed while the handshake was in flight.
                let current = state.interests.to_vec();
                let added: Vec<Interest> = current
                    .iter()
                    .filter(|i| !registered.contains(i))
                    .cloned()
                    .collect();
                let removed: Vec<Interest> = registered
                    .iter()
                    .filter(|i| !current.contains(i))
                    .cloned()
                    .collect();
                if !added.is_empty() {
                    if let Err(e) = client.register_async(added) {
                        warn!(url = %self.peer_url(), error = %e, "failed to register late interests");
                    }
                }
                if !removed.is_empty() {
                    if let Err(e) = client.unregister_async(removed) {
                        warn!(url = %self.peer_url(), error = %e, "failed to unregister stale interests");
                    }
                }

                info!(url = %self.peer_url(), interests = current.len(), "event hub connected");
                return Ok(());
            }
        }

        // the stream died right after the handshake
        if let Err(e) = client.stop().await {
            warn!(url = %self.peer_url(), error = %e, "cleanup after lost stream");
        }
        Err(EventHubError::StartFailed(Box::new(
            TransportError::StreamClosed.into(),
        )))
    }

    /// Unregister every interest and close the stream.
    ///
    /// When the stream already died the hub is disconnected but the session
    /// may still hold the connection; it is stopped without unregistering.
    /// If closing the stream fails the hub stays connected and that error is
    /// returned; otherwise any unregister failure is returned after the hub
    /// is marked disconnected.
    pub async fn disconnect(&self) -> Result<(), EventHubError> {
        let _guard = self.inner.conn_lock.lock().await;
        let (client, interests, connected) = {
            let state = self.inner.state.read();
            (state.client.clone(), state.interests.to_vec(), state.connected)
        };
        let Some(client) = client else {
            self.inner.state.write().connected = false;
            return Ok(());
        };
        if !connected {
            return client.stop().await;
        }

        let unregistered = if interests.is_empty() {
            Ok(())
        } else {
            client.unregister_async(interests)
        };
        client.stop().await?;

        self.inner.state.write().connected = false;
        info!(url = %self.peer_url(), "event hub disconnected");
        unregistered
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.read().connected
    }

    // ─── Block registrants ───────────────────────────────────────────────────

    /// Register a callback for every committed block.
    pub fn register_block_event(
        &self,
        callback: impl Fn(&Block) + Send + Sync + 'static,
    ) -> Result<BlockRegistration, EventHubError> {
        self.register_block_callback(Arc::new(callback))
    }

    pub fn register_block_callback(
        &self,
        callback: BlockCallback,
    ) -> Result<BlockRegistration, EventHubError> {
        let interest = Interest::block();
        let mut state = self.inner.state.write();
        let handle = state.blocks.add(callback);
        if state.interests.acquire(&interest) {
            if let Err(e) = state.send_register(vec![interest.clone()]) {
                state.blocks.remove(&handle);
                state.interests.release(&interest);
                return Err(e);
            }
        }
        Ok(handle)
    }

    /// Remove a block registrant. Returns `Ok(false)` for an unknown handle.
    pub fn unregister_block_event(
        &self,
        handle: &BlockRegistration,
    ) -> Result<bool, EventHubError> {
        let interest = Interest::block();
        let mut state = self.inner.state.write();
        if !state.blocks.remove(handle) {
            return Ok(false);
        }
        if state.interests.release(&interest) {
            state.send_unregister(vec![interest])?;
        }
        Ok(true)
    }

    /// Handle of the built-in block registrant that resolves transaction
    /// registrants. Unregistering it stops transaction callbacks.
    pub fn tx_dispatch_registration(&self) -> BlockRegistration {
        self.inner.tx_dispatch
    }

    // ─── Chaincode registrants ───────────────────────────────────────────────

    /// Register a callback for events from `chaincode_id`.
    ///
    /// `event_filter` matches event names exactly, and as a regex for events
    /// extracted from blocks.
    pub fn register_chaincode_event(
        &self,
        chaincode_id: &str,
        event_filter: &str,
        callback: impl Fn(&ChaincodeEventRecord) + Send + Sync + 'static,
    ) -> Result<ChaincodeRegistration, EventHubError> {
        self.register_chaincode_callback(chaincode_id, event_filter, Arc::new(callback))
    }

    pub fn register_chaincode_callback(
        &self,
        chaincode_id: &str,
        event_filter: &str,
        callback: ChaincodeCallback,
    ) -> Result<ChaincodeRegistration, EventHubError> {
        let interest = Interest::chaincode(chaincode_id, event_filter);
        let mut state = self.inner.state.write();
        let registration = self.inner.chaincodes.add(chaincode_id, event_filter, callback);
        if state.interests.acquire(&interest) {
            if let Err(e) = state.send_register(vec![interest.clone()]) {
                self.inner.chaincodes.remove(&registration);
                state.interests.release(&interest);
                return Err(e);
            }
        }
        Ok(registration)
    }

    /// Remove exactly `registration`. Returns `Ok(false)` if it was not registered.
    pub fn unregister_chaincode_event(
        &self,
        registration: &ChaincodeRegistration,
    ) -> Result<bool, EventHubError> {
        let interest = Interest::chaincode(registration.chaincode_id(), registration.event_filter());
        let mut state = self.inner.state.write();
        if !self.inner.chaincodes.remove(registration) {
            return Ok(false);
        }
        if state.interests.release(&interest) {
            state.send_unregister(vec![interest])?;
        }
        Ok(true)
    }

    // ─── Transaction registrants ─────────────────────────────────────────────

    /// Register the callback for `tx_id`, replacing any previous one.
    ///
    /// The callback stays registered until [`unregister_tx_event`](Self::unregister_tx_event).
    pub fn register_tx_event(
        &self,
        tx_id: impl Into<String>,
        callback: impl Fn(&str, TxValidationCode, Result<(), EventHubError>) + Send + Sync + 'static,
    ) {
        self.register_tx_callback(tx_id, Arc::new(callback));
    }

    pub fn register_tx_callback(&self, tx_id: impl Into<String>, callback: TxCallback) {
        self.inner.txs.put(tx_id, callback);
    }

    pub fn unregister_tx_event(&self, tx_id: &str) -> bool {
        self.inner.txs.remove(tx_id)
    }

    /// Wait for the outcome of `tx_id`.
    ///
    /// Resolves to the validation code of a valid transaction, or the
    /// `InvalidTransaction` error. The registration is removed on return
    /// unless another caller replaced it meanwhile.
    pub async fn wait_for_tx(
        &self,
        tx_id: &str,
        timeout: Duration,
    ) -> Result<TxValidationCode, EventHubError> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let callback: TxCallback = Arc::new(
            move |_: &str, code: TxValidationCode, result: Result<(), EventHubError>| {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send((code, result));
                }
            },
        );
        // Weak so that a replacement drops the closure and closes `rx`.
        let ours = Arc::downgrade(&callback);
        self.register_tx_callback(tx_id, callback);

        let outcome = tokio::time::timeout(timeout, rx).await;
        if let Some(callback) = ours.upgrade() {
            self.inner.txs.remove_if_current(tx_id, &callback);
        }
        match outcome {
            Ok(Ok((code, result))) => result.map(|()| code),
            Ok(Err(_)) => Err(EventHubError::TxRegistrationReplaced {
                tx_id: tx_id.to_string(),
            }),
            Err(_) => Err(EventHubError::TxWaitTimeout {
                tx_id: tx_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    // ─── Dispatch ────────────────────────────────────────────────────────────

    /// Feed one inbound event into the hub.
    ///
    /// Blocks and chaincode events are handled on a spawned task; everything
    /// else is ignored. Always returns `Ok(true)`.
    pub fn recv(&self, event: Event) -> Result<bool, EventHubError> {
        self.inner.clone().dispatch(event)
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    /// Interests currently declared (or to be declared) to the peer.
    pub fn interests(&self) -> Vec<Interest> {
        self.inner.state.read().interests.to_vec()
    }

    pub fn peer_url(&self) -> &str {
        &self.inner.config.peer.url
    }

    pub fn config(&self) -> &EventHubConfig {
        &self.inner.config
    }

    pub fn block_registrant_count(&self) -> usize {
        self.inner.state.read().blocks.len()
    }

    pub fn chaincode_registrant_count(&self) -> usize {
        self.inner.chaincodes.len()
    }

    /// Registered transaction callbacks. These are never expired by the hub.
    pub fn tx_registrant_count(&self) -> usize {
        self.inner.txs.len()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("EventHub")
            .field("url", &self.inner.config.peer.url)
            .field("connected", &state.connected)
            .field("interests", &state.interests.len())
            .field("block_registrants", &state.blocks.len())
            .field("chaincode_registrants", &self.inner.chaincodes.len())
            .field("tx_registrants", &self.inner.txs.len())
            .finish()
    }
}

impl HubState {
    /// Send a register for new interests if a stream is open.
    fn send_register(&self, interests: Vec<Interest>) -> Result<(), EventHubError> {
        match (&self.client, self.connected) {
            (Some(client), true) => client.register_async(interests),
            _ => Ok(()),
        }
    }

    fn send_unregister(&self, interests: Vec<Interest>) -> Result<(), EventHubError> {
        match (&self.client, self.connected) {
            (Some(client), true) => client.unregister_async(interests),
            _ => Ok(()),
        }
    }
}

impl HubInner {
    fn client(self: &Arc<Self>) -> Arc<EventsClient> {
        let mut state = self.state.write();
        if let Some(client) = &state.client {
            return client.clone();
        }
        let adapter = Arc::new(HubAdapter(Arc::downgrade(self)));
        let (client, warning) = EventsClient::new(
            self.transport.clone(),
            self.identity.clone(),
            adapter,
            self.config.reg_timeout(),
        );
        if let Some(w) = warning {
            warn!(url = %self.config.peer.url, "{w}");
        }
        let client = Arc::new(client);
        state.client = Some(client.clone());
        client
    }

    fn dispatch(self: Arc<Self>, event: Event) -> Result<bool, EventHubError> {
        let kind = event.kind();
        match event.event {
            Some(event::Event::Block(block)) => {
                spawn_or_run(move || self.handle_block(&block));
            }
            Some(event::Event::ChaincodeEvent(cc_event)) => {
                spawn_or_run(move || self.notify_chaincode_registrants("", cc_event, false));
            }
            _ => debug!(kind, "ignoring event"),
        }
        Ok(true)
    }

    fn handle_block(&self, block: &Block) {
        let callbacks = self.state.read().blocks.snapshot();
        for callback in callbacks {
            callback(block);
        }

        let flags = TxValidationFlags::from_block(block);
        for (index, data) in block.transactions().iter().enumerate() {
            if flags.is_invalid(index) {
                continue;
            }
            match chaincode_event_from_tx_bytes(data) {
                Ok((Some(cc_event), channel_id)) => {
                    self.notify_chaincode_registrants(&channel_id, cc_event, true);
                }
                Ok((None, _)) => {}
                Err(e) => warn!(
                    block = block.number(),
                    tx_index = index,
                    error = %e,
                    "failed to extract chaincode event"
                ),
            }
        }
    }

    /// Built-in block registrant: resolve each transaction's registrant.
    fn dispatch_transactions(&self, block: &Block) {
        let flags = TxValidationFlags::from_block(block);
        for (index, data) in block.transactions().iter().enumerate() {
            let header = envelope_from_block_bytes(data)
                .and_then(|env| payload_from_envelope(&env))
                .and_then(|payload| channel_header_from_payload(&payload));
            let header = match header {
                Ok(header) => header,
                Err(e) => {
                    warn!(block = block.number(), tx_index = index, error = %e, "failed to decode channel header");
                    continue;
                }
            };

            let Some(callback) = self.txs.get(&header.tx_id) else {
                debug!(tx_id = %header.tx_id, "no transaction registrant");
                continue;
            };
            let code = flags.flag(index);
            let result = if code == TxValidationCode::Valid {
                Ok(())
            } else {
                Err(EventHubError::InvalidTransaction {
                    channel_id: header.channel_id.clone(),
                    code,
                    raw_code: flags.raw_flag(index).unwrap_or(code as u8),
                })
            };
            callback(&header.tx_id, code, result);
        }
    }

    fn notify_chaincode_registrants(
        &self,
        channel_id: &str,
        cc_event: ChaincodeEvent,
        pattern_match: bool,
    ) {
        let registrations = self.chaincodes.snapshot(&cc_event.chaincode_id);
        if registrations.is_empty() {
            return;
        }
        let record = ChaincodeEventRecord {
            chaincode_id: cc_event.chaincode_id,
            tx_id: cc_event.tx_id,
            event_name: cc_event.event_name,
            payload: cc_event.payload,
            channel_id: channel_id.to_string(),
        };
        for registration in registrations {
            if registration.matches(&record.event_name, pattern_match) {
                (registration.callback())(&record);
            }
        }
    }

    fn on_disconnected(&self, err: Option<&TransportError>) {
        match err {
            Some(e) => warn!(url = %self.config.peer.url, error = %e, "event stream failed"),
            None => info!(url = %self.config.peer.url, "event stream closed by peer"),
        }
        self.state.write().connected = false;
    }
}

/// Bridges the stream client back into the hub without keeping it alive.
struct HubAdapter(Weak<HubInner>);

impl EventAdapter for HubAdapter {
    fn interested_events(&self) -> Result<Vec<Interest>, EventHubError> {
        match self.0.upgrade() {
            Some(inner) => {
                let state = inner.state.read();
                Ok(state.interests.to_vec())
            }
            None => Ok(Vec::new()),
        }
    }

    fn recv(&self, event: Event) -> Result<bool, EventHubError> {
        match self.0.upgrade() {
            Some(inner) => inner.dispatch(event),
            None => Ok(false),
        }
    }

    fn disconnected(&self, err: Option<&TransportError>) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_disconnected(err);
        }
    }
}

/// Run `f` on a new Tokio task, or inline when no runtime is active.
fn spawn_or_run(f: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { f() });
        }
        Err(_) => f(),
    }
}
