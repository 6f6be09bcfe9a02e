use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use super::{MessageStore, OutboundMessage, StoredMessage};
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    next_id: u64,
    messages: BTreeMap<u64, OutboundMessage>,
}

/// A [MessageStore] held in process memory.
///
/// Clones share the same underlying log.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: OutboundMessage) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.messages.insert(id, message);
        Ok(id)
    }

    async fn read_all_ordered(&self) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .iter()
            .map(|(id, message)| StoredMessage {
                id: *id,
                message: message.clone(),
            })
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[u64]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for id in ids {
            inner.messages.remove(id);
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().unwrap().messages.len())
    }
}
