use thiserror::Error;

/// Errors produced by a [MessageStore](crate::MessageStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::Error),
    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

macro_rules! impl_from_redb {
    ($($err:ident),*) => {
        $(
            impl From<redb::$err> for StoreError {
                fn from(e: redb::$err) -> Self {
                    StoreError::Database(e.into())
                }
            }
        )*
    };
}

impl_from_redb!(
    DatabaseError,
    TransactionError,
    TableError,
    StorageError,
    CommitError
);

#[derive(Error, Debug, PartialEq)]
pub enum HandleError {
    #[error("The bridge has stopped")]
    Stopped,
    #[error("Invalid device name: {0}")]
    InvalidName(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum BuildError {
    #[error("group id must be provided")]
    MissingGroupId,
    #[error("node id must be provided")]
    MissingNodeId,
    #[error("{0}")]
    InvalidName(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}
