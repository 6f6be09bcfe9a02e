use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use log::{info, warn};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};

use super::{MessageStore, OutboundMessage, StoredMessage};
use crate::error::StoreError;

const MESSAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("outbound_messages");

/// A [MessageStore] persisted to a single [redb] database file.
///
/// Records are stored as JSON keyed by a monotonically increasing identity.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open the database at `path`, creating it if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref())?;
        let txn = db.begin_write()?;
        {
            txn.open_table(MESSAGES)?;
        }
        txn.commit()?;
        info!("Opened offline message store at {}", path.as_ref().display());
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl MessageStore for RedbStore {
    async fn append(&self, message: OutboundMessage) -> Result<u64, StoreError> {
        let value = serde_json::to_vec(&message)?;
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            let id = {
                let mut table = txn.open_table(MESSAGES)?;
                let id = match table.last()? {
                    Some((key, _)) => key.value() + 1,
                    None => 1,
                };
                table.insert(id, value.as_slice())?;
                id
            };
            txn.commit()?;
            Ok(id)
        })
        .await
    }

    async fn read_all_ordered(&self) -> Result<Vec<StoredMessage>, StoreError> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(MESSAGES)?;
            let mut messages = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                match serde_json::from_slice::<OutboundMessage>(value.value()) {
                    Ok(message) => messages.push(StoredMessage {
                        id: key.value(),
                        message,
                    }),
                    Err(e) => warn!("Skipping unreadable stored message id={}: {e}", key.value()),
                }
            }
            Ok(messages)
        })
        .await
    }

    async fn delete_by_ids(&self, ids: &[u64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(MESSAGES)?;
                for id in ids {
                    table.remove(id)?;
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.blocking(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(MESSAGES)?;
            Ok(table.len()? as usize)
        })
        .await
    }
}
