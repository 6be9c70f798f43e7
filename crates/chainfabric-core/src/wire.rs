//! Protobuf wire types for the peer event service and the block structures
//! it carries.
//!
//! Field numbers follow the peer's `events.proto`, `common.proto`,
//! `transaction.proto`, `proposal_response.proto`, `chaincode_event.proto`
//! and `identities.proto`. Only the messages the event layer touches are
//! modelled here.

use std::time::{SystemTime, UNIX_EPOCH};

// ─── Event service ───────────────────────────────────────────────────────────

/// Kind of event a client declares interest in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    Block = 0,
    Chaincode = 1,
    Rejection = 2,
    Register = 3,
}

/// Chaincode-specific registration details carried by an [`Interest`].
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ChaincodeReg {
    #[prost(string, tag = "1")]
    pub chaincode_id: String,
    #[prost(string, tag = "2")]
    pub event_name: String,
}

/// One entry of the interest set sent to the peer.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Interest {
    #[prost(enumeration = "EventType", tag = "1")]
    pub event_type: i32,
    #[prost(string, tag = "3")]
    pub chain_id: String,
    #[prost(oneof = "interest::RegInfo", tags = "2")]
    pub reg_info: Option<interest::RegInfo>,
}

pub mod interest {
    #[derive(Clone, PartialEq, Eq, ::prost::Oneof)]
    pub enum RegInfo {
        #[prost(message, tag = "2")]
        ChaincodeRegInfo(super::ChaincodeReg),
    }
}

impl Interest {
    /// Interest in every committed block.
    pub fn block() -> Self {
        Self {
            event_type: EventType::Block as i32,
            chain_id: String::new(),
            reg_info: None,
        }
    }

    /// Interest in events emitted by `chaincode_id` whose name matches `event_name`.
    pub fn chaincode(chaincode_id: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Chaincode as i32,
            chain_id: String::new(),
            reg_info: Some(interest::RegInfo::ChaincodeRegInfo(ChaincodeReg {
                chaincode_id: chaincode_id.into(),
                event_name: event_name.into(),
            })),
        }
    }

    /// Chaincode registration details, if this is a chaincode interest.
    pub fn chaincode_reg(&self) -> Option<&ChaincodeReg> {
        match &self.reg_info {
            Some(interest::RegInfo::ChaincodeRegInfo(reg)) => Some(reg),
            None => None,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Register {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<Interest>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Unregister {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<Interest>,
}

/// Sent by the peer when a transaction was rejected before commit.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Rejection {
    #[prost(message, optional, tag = "1")]
    pub tx: Option<Transaction>,
    #[prost(string, tag = "2")]
    pub error_msg: String,
}

/// Event emitted by a chaincode during execution.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct ChaincodeEvent {
    #[prost(string, tag = "1")]
    pub chaincode_id: String,
    #[prost(string, tag = "2")]
    pub tx_id: String,
    #[prost(string, tag = "3")]
    pub event_name: String,
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
}

/// Wire-compatible `google.protobuf.Timestamp`.
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: since_epoch.as_secs() as i64,
            nanos: since_epoch.subsec_nanos() as i32,
        }
    }
}

/// Message exchanged on the `Chat` stream in both directions.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(bytes = "vec", tag = "6")]
    pub creator: Vec<u8>,
    #[prost(message, optional, tag = "8")]
    pub timestamp: Option<Timestamp>,
    #[prost(oneof = "event::Event", tags = "1, 2, 3, 4, 5")]
    pub event: Option<event::Event>,
}

pub mod event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Event {
        #[prost(message, tag = "1")]
        Register(super::Register),
        #[prost(message, tag = "2")]
        Block(super::Block),
        #[prost(message, tag = "3")]
        ChaincodeEvent(super::ChaincodeEvent),
        #[prost(message, tag = "4")]
        Rejection(super::Rejection),
        #[prost(message, tag = "5")]
        Unregister(super::Unregister),
    }
}

impl Event {
    /// Registration request (client → peer) or acknowledgement (peer → client).
    pub fn register(events: Vec<Interest>, creator: Vec<u8>) -> Self {
        Self {
            creator,
            timestamp: Some(Timestamp::now()),
            event: Some(event::Event::Register(Register { events })),
        }
    }

    pub fn unregister(events: Vec<Interest>, creator: Vec<u8>) -> Self {
        Self {
            creator,
            timestamp: Some(Timestamp::now()),
            event: Some(event::Event::Unregister(Unregister { events })),
        }
    }

    pub fn block(block: Block) -> Self {
        Self {
            creator: Vec::new(),
            timestamp: None,
            event: Some(event::Event::Block(block)),
        }
    }

    pub fn chaincode(ev: ChaincodeEvent) -> Self {
        Self {
            creator: Vec::new(),
            timestamp: None,
            event: Some(event::Event::ChaincodeEvent(ev)),
        }
    }

    /// Short name of the carried variant, for logging.
    pub fn kind(&self) -> &'static str {
        match &self.event {
            Some(event::Event::Register(_)) => "register",
            Some(event::Event::Block(_)) => "block",
            Some(event::Event::ChaincodeEvent(_)) => "chaincode",
            Some(event::Event::Rejection(_)) => "rejection",
            Some(event::Event::Unregister(_)) => "unregister",
            None => "empty",
        }
    }
}

/// Outbound envelope: serialized [`Event`] plus the creator's signature over it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedEvent {
    #[prost(bytes = "vec", tag = "1")]
    pub signature: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub event_bytes: Vec<u8>,
}

// ─── Blocks ──────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Block {
    #[prost(message, optional, tag = "1")]
    pub header: Option<BlockHeader>,
    #[prost(message, optional, tag = "2")]
    pub data: Option<BlockData>,
    #[prost(message, optional, tag = "3")]
    pub metadata: Option<BlockMetadata>,
}

impl Block {
    /// Block number, or 0 when the header is absent.
    pub fn number(&self) -> u64 {
        self.header.as_ref().map(|h| h.number).unwrap_or(0)
    }

    /// Raw envelope bytes of each transaction, in block order.
    pub fn transactions(&self) -> &[Vec<u8>] {
        self.data.as_ref().map(|d| d.data.as_slice()).unwrap_or(&[])
    }

    /// Metadata entry at `index`, if present.
    pub fn metadata_at(&self, index: BlockMetadataIndex) -> Option<&[u8]> {
        self.metadata
            .as_ref()
            .and_then(|m| m.metadata.get(index as usize))
            .map(Vec::as_slice)
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockHeader {
    #[prost(uint64, tag = "1")]
    pub number: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub previous_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub data_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockData {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub data: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockMetadata {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub metadata: Vec<Vec<u8>>,
}

/// Positions inside [`BlockMetadata::metadata`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum BlockMetadataIndex {
    Signatures = 0,
    LastConfig = 1,
    TransactionsFilter = 2,
    Orderer = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Payload {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Header {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_header: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature_header: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelHeader {
    #[prost(int32, tag = "1")]
    pub r#type: i32,
    #[prost(int32, tag = "2")]
    pub version: i32,
    #[prost(message, optional, tag = "3")]
    pub timestamp: Option<Timestamp>,
    #[prost(string, tag = "4")]
    pub channel_id: String,
    #[prost(string, tag = "5")]
    pub tx_id: String,
    #[prost(uint64, tag = "6")]
    pub epoch: u64,
    #[prost(bytes = "vec", tag = "7")]
    pub extension: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum HeaderType {
    Message = 0,
    Config = 1,
    ConfigUpdate = 2,
    EndorserTransaction = 3,
    OrdererTransaction = 4,
    DeliverSeekInfo = 5,
    ChaincodePackage = 6,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Transaction {
    #[prost(message, repeated, tag = "1")]
    pub actions: Vec<TransactionAction>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionAction {
    #[prost(bytes = "vec", tag = "1")]
    pub header: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChaincodeActionPayload {
    #[prost(bytes = "vec", tag = "1")]
    pub chaincode_proposal_payload: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub action: Option<ChaincodeEndorsedAction>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChaincodeEndorsedAction {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_response_payload: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub endorsements: Vec<Endorsement>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Endorsement {
    #[prost(bytes = "vec", tag = "1")]
    pub endorser: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProposalResponsePayload {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub extension: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChaincodeAction {
    #[prost(bytes = "vec", tag = "1")]
    pub results: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub events: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub response: Option<Response>,
    #[prost(message, optional, tag = "4")]
    pub chaincode_id: Option<ChaincodeId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChaincodeId {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub version: String,
}

/// Validation outcome the committer records for each transaction position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TxValidationCode {
    Valid = 0,
    NilEnvelope = 1,
    BadPayload = 2,
    BadCommonHeader = 3,
    BadCreatorSignature = 4,
    InvalidEndorserTransaction = 5,
    InvalidConfigTransaction = 6,
    UnsupportedTxPayload = 7,
    BadProposalTxid = 8,
    DuplicateTxid = 9,
    EndorsementPolicyFailure = 10,
    MvccReadConflict = 11,
    PhantomReadConflict = 12,
    UnknownTxType = 13,
    TargetChainNotFound = 14,
    MarshalTxError = 15,
    NilTxaction = 16,
    ExpiredChaincode = 17,
    ChaincodeVersionConflict = 18,
    BadHeaderExtension = 19,
    BadChannelHeader = 20,
    BadResponsePayload = 21,
    BadRwset = 22,
    IllegalWriteset = 23,
    InvalidWriteset = 24,
    InvalidChaincode = 25,
    NotValidated = 254,
    InvalidOtherReason = 255,
}

impl std::fmt::Display for TxValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}({})", *self as i32)
    }
}

// ─── Identities ──────────────────────────────────────────────────────────────

/// MSP identity as carried in the `creator` field.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct SerializedIdentity {
    #[prost(string, tag = "1")]
    pub mspid: String,
    #[prost(bytes = "vec", tag = "2")]
    pub id_bytes: Vec<u8>,
}
