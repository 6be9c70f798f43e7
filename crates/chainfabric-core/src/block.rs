//! Block decoding helpers.
//!
//! Pure, fallible functions that peel the nested protobuf layers of a
//! committed block: envelope → payload → channel header / transaction →
//! chaincode action → chaincode event. Every failure carries the name of the
//! layer that could not be decoded.

use prost::Message;

use crate::error::DecodeError;
use crate::wire::{
    Block, BlockMetadataIndex, ChaincodeAction, ChaincodeActionPayload, ChaincodeEvent,
    ChannelHeader, Envelope, HeaderType, Payload, ProposalResponsePayload, Transaction,
    TransactionAction, TxValidationCode,
};

/// Decode one entry of `Block.data.data` into an [`Envelope`].
pub fn envelope_from_block_bytes(data: &[u8]) -> Result<Envelope, DecodeError> {
    Envelope::decode(data).map_err(DecodeError::protobuf("envelope"))
}

pub fn payload_from_envelope(env: &Envelope) -> Result<Payload, DecodeError> {
    Payload::decode(env.payload.as_slice()).map_err(DecodeError::protobuf("payload"))
}

pub fn channel_header_from_payload(payload: &Payload) -> Result<ChannelHeader, DecodeError> {
    let header = payload
        .header
        .as_ref()
        .ok_or(DecodeError::Missing { what: "payload header" })?;
    ChannelHeader::decode(header.channel_header.as_slice())
        .map_err(DecodeError::protobuf("channel header"))
}

pub fn transaction_from_payload(payload: &Payload) -> Result<Transaction, DecodeError> {
    Transaction::decode(payload.data.as_slice()).map_err(DecodeError::protobuf("transaction"))
}

pub fn chaincode_action_payload_from_action(
    action: &TransactionAction,
) -> Result<ChaincodeActionPayload, DecodeError> {
    ChaincodeActionPayload::decode(action.payload.as_slice())
        .map_err(DecodeError::protobuf("chaincode action payload"))
}

/// Decode the chaincode event out of a proposal response extension.
///
/// The extension is a serialized `ChaincodeAction`; an empty `events` field
/// means the chaincode emitted nothing and yields `Ok(None)`.
pub fn chaincode_event_from_extension(
    extension: &[u8],
) -> Result<Option<ChaincodeEvent>, DecodeError> {
    let action =
        ChaincodeAction::decode(extension).map_err(DecodeError::protobuf("chaincode action"))?;
    if action.events.is_empty() {
        return Ok(None);
    }
    let event = ChaincodeEvent::decode(action.events.as_slice())
        .map_err(DecodeError::protobuf("chaincode event"))?;
    Ok(Some(event))
}

/// Extract the chaincode event (if any) and the channel ID from the raw bytes
/// of one block transaction.
///
/// Only endorser transactions can carry chaincode events; any other header
/// type yields `Ok((None, channel_id))`.
pub fn chaincode_event_from_tx_bytes(
    data: &[u8],
) -> Result<(Option<ChaincodeEvent>, String), DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Missing { what: "transaction bytes" });
    }
    let env = envelope_from_block_bytes(data)?;
    let payload = payload_from_envelope(&env)?;
    let channel_header = channel_header_from_payload(&payload)?;
    let channel_id = channel_header.channel_id;

    if channel_header.r#type != HeaderType::EndorserTransaction as i32 {
        return Ok((None, channel_id));
    }

    let tx = transaction_from_payload(&payload)?;
    let action = tx
        .actions
        .first()
        .ok_or(DecodeError::Missing { what: "transaction action" })?;
    let cap = chaincode_action_payload_from_action(action)?;
    let endorsed = cap
        .action
        .as_ref()
        .ok_or(DecodeError::Missing { what: "endorsed action" })?;
    let prp = ProposalResponsePayload::decode(endorsed.proposal_response_payload.as_slice())
        .map_err(DecodeError::protobuf("proposal response payload"))?;

    let event = chaincode_event_from_extension(&prp.extension)?;
    Ok((event, channel_id))
}

/// Per-transaction validation codes stored in block metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxValidationFlags(Vec<u8>);

impl TxValidationFlags {
    /// `len` flags, all `NotValidated`.
    pub fn new(len: usize) -> Self {
        Self(vec![TxValidationCode::NotValidated as u8; len])
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Flags from the `TRANSACTIONS_FILTER` metadata slot; empty if absent.
    pub fn from_block(block: &Block) -> Self {
        block
            .metadata_at(BlockMetadataIndex::TransactionsFilter)
            .map(|bytes| Self::from_bytes(bytes))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set_flag(&mut self, index: usize, code: TxValidationCode) {
        if index >= self.0.len() {
            self.0.resize(index + 1, TxValidationCode::NotValidated as u8);
        }
        self.0[index] = code as u8;
    }

    /// Code at `index`.
    ///
    /// Positions beyond the array are reported as `NotValidated`; bytes that
    /// are not a known code map to `InvalidOtherReason`, see [`raw_flag`](Self::raw_flag).
    pub fn flag(&self, index: usize) -> TxValidationCode {
        match self.0.get(index) {
            None => TxValidationCode::NotValidated,
            Some(&b) => TxValidationCode::try_from(b as i32)
                .unwrap_or(TxValidationCode::InvalidOtherReason),
        }
    }

    /// Byte the committer stored at `index`, including codes newer than
    /// [`TxValidationCode`].
    pub fn raw_flag(&self, index: usize) -> Option<u8> {
        self.0.get(index).copied()
    }

    pub fn is_valid(&self, index: usize) -> bool {
        self.flag(index) == TxValidationCode::Valid
    }

    pub fn is_invalid(&self, index: usize) -> bool {
        !self.is_valid(index)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
