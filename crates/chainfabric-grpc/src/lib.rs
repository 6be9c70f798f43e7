//! chainfabric-grpc: gRPC transport for the ChainFabric event hub.
//!
//! Implements [`EventTransport`](chainfabric_core::EventTransport) over a
//! tonic channel speaking the peer's `protos.Events/Chat` bidirectional
//! stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainfabric_core::PeerConfig;
//! use chainfabric_grpc::GrpcEventTransport;
//!
//! let peer = PeerConfig::new("grpcs://peer0.org1.example.com:7053")
//!     .with_tls_ca_cert("/etc/hyperledger/tls/ca.crt");
//! let transport = Arc::new(GrpcEventTransport::new(peer));
//! ```

pub mod transport;

pub use transport::{GrpcEventTransport, CHAT_PATH};
