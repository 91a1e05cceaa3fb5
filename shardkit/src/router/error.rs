use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("document is missing required shard field \"{0}\"")]
    MissingShardField(String),

    #[error(transparent)]
    Resolver(#[from] crate::resolver::Error),

    #[error(transparent)]
    Metadata(#[from] crate::metadata::Error),

    #[error(transparent)]
    Pool(#[from] crate::pool::Error),

    #[error(transparent)]
    Db(#[from] crate::db::DbError),
}
