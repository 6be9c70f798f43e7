//! Registrant registries.
//!
//! Three independent stores back the hub's fan-out:
//!
//! - [`BlockRegistry`]: ordered block callbacks, kept under the hub lock
//! - [`ChaincodeRegistry`]: chaincode callbacks bucketed by chaincode ID
//! - [`TxRegistry`]: one callback per transaction ID
//!
//! Lookups hand out cloned `Arc` callbacks so no lock or map guard is held
//! while user code runs; callbacks may freely register and unregister.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;

use chainfabric_core::wire::{Block, TxValidationCode};

use crate::error::EventHubError;

/// Callback for committed blocks.
pub type BlockCallback = Arc<dyn Fn(&Block) + Send + Sync>;

/// Callback for chaincode events.
pub type ChaincodeCallback = Arc<dyn Fn(&ChaincodeEventRecord) + Send + Sync>;

/// Callback for a transaction outcome: `(tx_id, code, Ok | Err(InvalidTransaction))`.
pub type TxCallback = Arc<dyn Fn(&str, TxValidationCode, Result<(), EventHubError>) + Send + Sync>;

/// Chaincode event as delivered to callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodeEventRecord {
    pub chaincode_id: String,
    pub tx_id: String,
    pub event_name: String,
    pub payload: Vec<u8>,
    /// Channel the carrying block belongs to; empty for events pushed directly by the peer.
    pub channel_id: String,
}

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

// ─── Blocks ──────────────────────────────────────────────────────────────────

/// Opaque handle to one block registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRegistration(u64);

impl BlockRegistration {
    fn next() -> Self {
        Self(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Block callbacks in registration order.
#[derive(Default)]
pub struct BlockRegistry {
    entries: Vec<(BlockRegistration, BlockCallback)>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, callback: BlockCallback) -> BlockRegistration {
        let handle = BlockRegistration::next();
        self.entries.push((handle, callback));
        handle
    }

    /// Remove the registration. Returns `false` if the handle is unknown.
    pub fn remove(&mut self, handle: &BlockRegistration) -> bool {
        match self.entries.iter().position(|(h, _)| h == handle) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Callbacks to invoke for one block, in registration order.
    pub fn snapshot(&self) -> Vec<BlockCallback> {
        self.entries.iter().map(|(_, cb)| cb.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for BlockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}

// ─── Chaincode events ────────────────────────────────────────────────────────

struct ChaincodeEntry {
    chaincode_id: String,
    event_filter: String,
    pattern: Option<Regex>,
    callback: ChaincodeCallback,
}

/// Opaque handle to one chaincode event registration.
///
/// Two registrations are equal only if they are the same registration,
/// regardless of their chaincode ID and filter.
#[derive(Clone)]
pub struct ChaincodeRegistration(Arc<ChaincodeEntry>);

impl ChaincodeRegistration {
    fn new(chaincode_id: String, event_filter: String, callback: ChaincodeCallback) -> Self {
        let pattern = match Regex::new(&event_filter) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(
                    chaincode_id = %chaincode_id,
                    filter = %event_filter,
                    error = %e,
                    "event filter is not a valid regex; only exact names will match"
                );
                None
            }
        };
        Self(Arc::new(ChaincodeEntry {
            chaincode_id,
            event_filter,
            pattern,
            callback,
        }))
    }

    pub fn chaincode_id(&self) -> &str {
        &self.0.chaincode_id
    }

    pub fn event_filter(&self) -> &str {
        &self.0.event_filter
    }

    pub fn callback(&self) -> ChaincodeCallback {
        self.0.callback.clone()
    }

    /// Whether an event named `event_name` should reach this registration.
    ///
    /// Exact name equality always matches. With `pattern_match`, the filter
    /// is also tried as a regex anywhere in the name.
    pub fn matches(&self, event_name: &str, pattern_match: bool) -> bool {
        if self.0.event_filter == event_name {
            return true;
        }
        pattern_match
            && self
                .0
                .pattern
                .as_ref()
                .is_some_and(|re| re.is_match(event_name))
    }
}

impl PartialEq for ChaincodeRegistration {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ChaincodeRegistration {}

impl fmt::Debug for ChaincodeRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaincodeRegistration")
            .field("chaincode_id", &self.0.chaincode_id)
            .field("event_filter", &self.0.event_filter)
            .finish_non_exhaustive()
    }
}

/// Chaincode registrations bucketed by chaincode ID.
#[derive(Default)]
pub struct ChaincodeRegistry {
    entries: DashMap<String, Vec<ChaincodeRegistration>>,
}

impl ChaincodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        chaincode_id: impl Into<String>,
        event_filter: impl Into<String>,
        callback: ChaincodeCallback,
    ) -> ChaincodeRegistration {
        let reg = ChaincodeRegistration::new(chaincode_id.into(), event_filter.into(), callback);
        self.entries
            .entry(reg.chaincode_id().to_string())
            .or_default()
            .push(reg.clone());
        reg
    }

    /// Remove exactly `handle`. Empty buckets are dropped.
    pub fn remove(&self, handle: &ChaincodeRegistration) -> bool {
        let key = handle.chaincode_id();
        let removed = match self.entries.get_mut(key) {
            Some(mut bucket) => match bucket.iter().position(|r| r == handle) {
                Some(pos) => {
                    bucket.remove(pos);
                    true
                }
                None => false,
            },
            None => false,
        };
        if removed {
            self.entries.remove_if(key, |_, bucket| bucket.is_empty());
        }
        removed
    }

    /// Current registrations for `chaincode_id`.
    pub fn snapshot(&self, chaincode_id: &str) -> Vec<ChaincodeRegistration> {
        self.entries
            .get(chaincode_id)
            .map(|bucket| bucket.value().clone())
            .unwrap_or_default()
    }

    /// Total registrations across all chaincodes.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of chaincode IDs with at least one registration.
    pub fn chaincode_count(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for ChaincodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaincodeRegistry")
            .field("chaincodes", &self.entries.len())
            .finish()
    }
}

// ─── Transactions ────────────────────────────────────────────────────────────

/// One callback per transaction ID. Re-registering overwrites.
#[derive(Default)]
pub struct TxRegistry {
    entries: DashMap<String, TxCallback>,
}

impl TxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, tx_id: impl Into<String>, callback: TxCallback) {
        self.entries.insert(tx_id.into(), callback);
    }

    pub fn remove(&self, tx_id: &str) -> bool {
        self.entries.remove(tx_id).is_some()
    }

    /// Remove `tx_id` only while `callback` is still the one registered.
    pub fn remove_if_current(&self, tx_id: &str, callback: &TxCallback) -> bool {
        self.entries
            .remove_if(tx_id, |_, current| {
                Arc::as_ptr(current) as *const () == Arc::as_ptr(callback) as *const ()
            })
            .is_some()
    }

    pub fn get(&self, tx_id: &str) -> Option<TxCallback> {
        self.entries.get(tx_id).map(|cb| cb.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for TxRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}
