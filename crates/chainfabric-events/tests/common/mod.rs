//! Shared fixtures: an in-memory peer and block builders.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use prost::Message;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use chainfabric_core::error::TransportError;
use chainfabric_core::identity::EcdsaIdentity;
use chainfabric_core::transport::{EventTransport, InboundEvents, OutboundEvents};
use chainfabric_core::wire::{
    event, Block, BlockData, BlockHeader, BlockMetadata, ChaincodeAction, ChaincodeActionPayload,
    ChaincodeEndorsedAction, ChaincodeEvent, ChannelHeader, Envelope, Event, Header, HeaderType,
    Interest, Payload, ProposalResponsePayload, SignedEvent, Timestamp, Transaction,
    TransactionAction, TxValidationCode,
};
use chainfabric_events::{EventHub, EventHubConfig};

pub const PEER_URL: &str = "grpc://peer0.org1.example.com:7053";
pub const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

type InboundSender = mpsc::UnboundedSender<Result<Event, TransportError>>;

/// In-memory peer event service.
///
/// Records every outbound message and, unless told otherwise, acknowledges
/// `Register` / `Unregister` by echoing the same kind back.
#[derive(Default)]
pub struct MockTransport {
    pub auto_ack: AtomicBool,
    pub fail_dial: AtomicBool,
    /// End the stream right after acknowledging a `Register`.
    pub close_after_ack: AtomicBool,
    pub dials: AtomicUsize,
    pub chats: AtomicUsize,
    pub releases: AtomicUsize,
    sent: Arc<Mutex<Vec<SignedEvent>>>,
    inbound: Arc<Mutex<Option<InboundSender>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let mock = Self::default();
        mock.auto_ack.store(true, Ordering::SeqCst);
        Arc::new(mock)
    }

    /// A peer that never answers the handshake.
    pub fn silent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Outbound messages seen so far, decoded.
    pub fn sent_events(&self) -> Vec<Event> {
        self.sent
            .lock()
            .iter()
            .map(|signed| Event::decode(signed.event_bytes.as_slice()).expect("decodable event"))
            .collect()
    }

    pub fn sent_signed(&self) -> Vec<SignedEvent> {
        self.sent.lock().clone()
    }

    /// Interests of every `Register` sent, one vec per message.
    pub fn registers(&self) -> Vec<Vec<Interest>> {
        self.sent_events()
            .into_iter()
            .filter_map(|ev| match ev.event {
                Some(event::Event::Register(r)) => Some(r.events),
                _ => None,
            })
            .collect()
    }

    pub fn unregisters(&self) -> Vec<Vec<Interest>> {
        self.sent_events()
            .into_iter()
            .filter_map(|ev| match ev.event {
                Some(event::Event::Unregister(u)) => Some(u.events),
                _ => None,
            })
            .collect()
    }

    /// Deliver an event to the client.
    pub fn push(&self, event: Event) {
        if let Some(tx) = self.inbound.lock().as_ref() {
            let _ = tx.send(Ok(event));
        }
    }

    /// End the stream cleanly.
    pub fn close_stream(&self) {
        self.inbound.lock().take();
    }

    /// End the stream with a transport error.
    pub fn fail_stream(&self, message: &str) {
        if let Some(tx) = self.inbound.lock().take() {
            let _ = tx.send(Err(TransportError::Status {
                code: "Unavailable".into(),
                message: message.into(),
            }));
        }
    }

    /// Wait until at least `n` outbound messages were recorded.
    pub async fn wait_for_sent(&self, n: usize) {
        wait_until(Duration::from_secs(2), || self.sent.lock().len() >= n).await;
    }
}

#[async_trait]
impl EventTransport for MockTransport {
    async fn dial(&self) -> Result<(), TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.fail_dial.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                url: PEER_URL.into(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn chat(&self, mut outbound: OutboundEvents) -> Result<InboundEvents, TransportError> {
        self.chats.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbound.lock() = Some(tx);

        let sent = self.sent.clone();
        let inbound = self.inbound.clone();
        let auto_ack = self.auto_ack.load(Ordering::SeqCst);
        let close_after_ack = self.close_after_ack.load(Ordering::SeqCst);
        tokio::spawn(async move {
            while let Some(signed) = outbound.recv().await {
                let Ok(ev) = Event::decode(signed.event_bytes.as_slice()) else {
                    continue;
                };
                sent.lock().push(signed);
                if !auto_ack {
                    continue;
                }
                let ack = match ev.event {
                    Some(event::Event::Register(r)) => Some(Event::register(r.events, vec![])),
                    Some(event::Event::Unregister(u)) => Some(Event::unregister(u.events, vec![])),
                    _ => None,
                };
                let tx = inbound.lock().clone();
                if let (Some(ack), Some(tx)) = (ack, tx) {
                    let _ = tx.send(Ok(ack));
                    if close_after_ack {
                        inbound.lock().take();
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inbound.lock().take();
    }

    fn url(&self) -> &str {
        PEER_URL
    }
}

pub fn identity() -> Arc<EcdsaIdentity> {
    Arc::new(
        EcdsaIdentity::from_hex_key("Org1MSP", b"-----BEGIN CERTIFICATE-----".to_vec(), TEST_KEY)
            .expect("valid test key"),
    )
}

pub fn hub(mock: &Arc<MockTransport>) -> EventHub {
    hub_with_config(mock, EventHubConfig::new(PEER_URL).with_reg_timeout(Duration::from_millis(500)))
}

pub fn hub_with_config(mock: &Arc<MockTransport>, config: EventHubConfig) -> EventHub {
    EventHub::new(config, mock.clone(), Some(identity()))
}

/// Poll `cond` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// ─── Block builders ──────────────────────────────────────────────────────────

/// Raw bytes of one endorser transaction.
pub fn endorser_tx(channel: &str, tx_id: &str, event: Option<ChaincodeEvent>) -> Vec<u8> {
    let action = ChaincodeAction {
        events: event.map(|e| e.encode_to_vec()).unwrap_or_default(),
        ..Default::default()
    };
    let prp = ProposalResponsePayload {
        proposal_hash: vec![0xab; 32],
        extension: action.encode_to_vec(),
    };
    let cap = ChaincodeActionPayload {
        chaincode_proposal_payload: vec![],
        action: Some(ChaincodeEndorsedAction {
            proposal_response_payload: prp.encode_to_vec(),
            endorsements: vec![],
        }),
    };
    let tx = Transaction {
        actions: vec![TransactionAction {
            header: vec![],
            payload: cap.encode_to_vec(),
        }],
    };
    let channel_header = ChannelHeader {
        r#type: HeaderType::EndorserTransaction as i32,
        channel_id: channel.into(),
        tx_id: tx_id.into(),
        timestamp: Some(Timestamp::now()),
        ..Default::default()
    };
    let payload = Payload {
        header: Some(Header {
            channel_header: channel_header.encode_to_vec(),
            signature_header: vec![],
        }),
        data: tx.encode_to_vec(),
    };
    Envelope {
        payload: payload.encode_to_vec(),
        signature: vec![],
    }
    .encode_to_vec()
}

pub fn cc_event(chaincode_id: &str, tx_id: &str, event_name: &str) -> ChaincodeEvent {
    ChaincodeEvent {
        chaincode_id: chaincode_id.into(),
        tx_id: tx_id.into(),
        event_name: event_name.into(),
        payload: format!("{event_name}-payload").into_bytes(),
    }
}

/// Block carrying `txs` with the given validation codes.
pub fn block(number: u64, txs: Vec<Vec<u8>>, codes: &[TxValidationCode]) -> Block {
    let flags: Vec<u8> = codes.iter().map(|c| *c as u8).collect();
    Block {
        header: Some(BlockHeader {
            number,
            previous_hash: vec![],
            data_hash: vec![],
        }),
        data: Some(BlockData { data: txs }),
        metadata: Some(BlockMetadata {
            metadata: vec![vec![], vec![], flags, vec![]],
        }),
    }
}

/// Block with one endorser transaction per `(tx_id, code)`.
pub fn tx_block(number: u64, channel: &str, txs: &[(&str, TxValidationCode)]) -> Block {
    let data = txs.iter().map(|(id, _)| endorser_tx(channel, id, None)).collect();
    let codes: Vec<TxValidationCode> = txs.iter().map(|(_, code)| *code).collect();
    block(number, data, &codes)
}
