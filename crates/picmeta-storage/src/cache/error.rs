/// Error type for cache store operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid cache configuration: {0}")]
    Configuration(String),
    #[error("flush worker: {0}")]
    Worker(String),
}

impl From<redb::TransactionError> for CacheError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<CacheError> for picmeta_common::Error {
    fn from(e: CacheError) -> Self {
        Self::Cache(e.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
