use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("migration target \"{0}\" is the shard's current location")]
    AlreadyThere(String),

    #[error("another shard in realm \"{0}\" is already migrating")]
    ConcurrentMigration(String),

    #[error("migration worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("invalid recovery state: {0}")]
    InvalidRecoveryState(&'static str),

    #[error(transparent)]
    Metadata(#[from] crate::metadata::Error),

    #[error(transparent)]
    Registry(#[from] crate::registry::Error),

    #[error(transparent)]
    Pool(#[from] crate::pool::Error),

    #[error(transparent)]
    Db(#[from] crate::db::DbError),
}
