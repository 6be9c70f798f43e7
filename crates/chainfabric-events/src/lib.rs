//! chainfabric-events: event hub for permissioned-ledger peers.
//!
//! # Architecture
//!
//! ```text
//! EventHub ─── registrants (block / chaincode / tx)
//!    │
//!    └── EventsClient ── EventTransport (gRPC, mock, ...)
//!           │
//!           └── reader task ──► EventAdapter::recv ──► spawned dispatch task
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainfabric_events::{EventHub, EventHubConfig};
//! # async fn run(
//! #     transport: Arc<dyn chainfabric_core::EventTransport>,
//! #     identity: Arc<dyn chainfabric_core::SigningIdentity>,
//! # ) -> Result<(), chainfabric_events::EventHubError> {
//! let hub = EventHub::new(
//!     EventHubConfig::new("grpcs://peer0.org1.example.com:7053"),
//!     transport,
//!     Some(identity),
//! );
//! hub.register_chaincode_event("marbles", "transfer.*", |ev| {
//!     println!("{} in {}", ev.event_name, ev.tx_id);
//! })?;
//! hub.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod interest;
pub mod registry;

pub use client::{EventAdapter, EventsClient, MAX_REG_TIMEOUT, MIN_REG_TIMEOUT};
pub use config::EventHubConfig;
pub use error::EventHubError;
pub use hub::EventHub;
pub use interest::InterestSet;
pub use registry::{
    BlockCallback, BlockRegistration, ChaincodeCallback, ChaincodeEventRecord,
    ChaincodeRegistration, TxCallback,
};
