use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown realm \"{0}\"")]
    UnknownRealm(String),

    #[error("no realm registered for collection \"{0}\"")]
    UnknownCollection(String),

    #[error("realm \"{realm}\" already exists with a different {field}")]
    RealmImmutable { realm: String, field: &'static str },

    #[error("shard \"{key}\" in realm \"{realm}\" has already been placed; pass force=true to override")]
    ShardAlreadyPlaced { realm: String, key: String },

    #[error("more than one shard in realm \"{0}\" is in a short-cache phase at once")]
    ConcurrentMigration(String),

    #[error("corrupt controller record: missing or malformed field \"{0}\"")]
    CorruptRecord(&'static str),

    #[error(transparent)]
    Db(#[from] crate::db::DbError),
}
