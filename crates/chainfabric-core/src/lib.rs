//! chainfabric-core: foundation types and traits for ChainFabric.
//!
//! # Overview
//!
//! ChainFabric is a client-side event layer for permissioned (Fabric style)
//! networks. The core crate defines:
//!
//! - [`EventTransport`]: the async trait every peer event transport implements
//! - [`wire`] module: protobuf messages exchanged with the peer event service
//! - [`block`] module: pure decoding helpers over raw block bytes
//! - [`PeerConfig`]: where and how to reach a peer's event service
//! - [`SigningIdentity`]: creator bytes and signatures for outbound messages
//! - [`TransportError`] / [`DecodeError`] / [`SignError`]: structured errors

pub mod block;
pub mod config;
pub mod error;
pub mod identity;
pub mod transport;
pub mod wire;

pub use block::TxValidationFlags;
pub use config::PeerConfig;
pub use error::{DecodeError, SignError, TransportError};
pub use identity::{EcdsaIdentity, SigningIdentity};
pub use transport::{EventTransport, InboundEvents, OutboundEvents};
pub use wire::{Block, ChaincodeEvent, Event, Interest, SignedEvent, TxValidationCode};
