//! Store-and-forward buffering of outbound messages that could not be delivered.

mod memory;
mod redb_store;

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use spbridge_types::payload::{Message, Payload};

use crate::error::StoreError;

pub use redb_store::RedbStore;
pub use memory::MemoryStore;

/// A message waiting to be delivered to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub topic: String,
    /// Encoded Sparkplug payload.
    pub payload: Vec<u8>,
    pub enqueued_at_ms: u64,
}

/// An [OutboundMessage] with the identity it was assigned when appended.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: u64,
    pub message: OutboundMessage,
}

/// An append only log of [OutboundMessage]s.
///
/// Identities must increase monotonically in append order. Deleting an identity that is not
/// present is not an error.
#[async_trait]
pub trait MessageStore {
    async fn append(&self, message: OutboundMessage) -> Result<u64, StoreError>;
    async fn read_all_ordered(&self) -> Result<Vec<StoredMessage>, StoreError>;
    async fn delete_by_ids(&self, ids: &[u64]) -> Result<(), StoreError>;
    async fn len(&self) -> Result<usize, StoreError>;
}

pub type DynMessageStore = dyn MessageStore + Send + Sync;

/// Best effort durable FIFO of outbound payloads.
///
/// Store failures are logged and never returned; a failed append drops the message.
#[derive(Clone)]
pub struct OfflineLog {
    store: Arc<DynMessageStore>,
}

impl OfflineLog {
    pub fn new(store: Arc<DynMessageStore>) -> Self {
        Self { store }
    }

    /// Persist a payload for later delivery on `topic`. Returns whether it was stored.
    pub async fn append(&self, topic: &str, payload: &Payload, enqueued_at_ms: u64) -> bool {
        let message = OutboundMessage {
            topic: topic.to_string(),
            payload: payload.encode_to_vec(),
            enqueued_at_ms,
        };
        match self.store.append(message).await {
            Ok(id) => {
                debug!("Buffered message id={id} topic={topic}");
                true
            }
            Err(e) => {
                error!("Unable to buffer message, dropping it. topic={topic} error={e}");
                false
            }
        }
    }

    /// Every stored message, oldest first.
    pub async fn drain_in_order(&self) -> Vec<StoredMessage> {
        match self.store.read_all_ordered().await {
            Ok(messages) => messages,
            Err(e) => {
                error!("Unable to read buffered messages: {e}");
                Vec::new()
            }
        }
    }

    pub async fn delete(&self, ids: &[u64]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.store.delete_by_ids(ids).await {
            warn!(
                "Unable to delete {} replayed messages, they may be delivered again: {e}",
                ids.len()
            );
        }
    }

    pub async fn len(&self) -> usize {
        match self.store.len().await {
            Ok(len) => len,
            Err(e) => {
                warn!("Unable to read buffered message count: {e}");
                0
            }
        }
    }
}
