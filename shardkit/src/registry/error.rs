use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown cluster \"{0}\"")]
    UnknownCluster(String),

    #[error("invalid location \"{0}\": expected exactly one '/'")]
    InvalidLocation(String),

    #[error("cluster \"{0}\" already exists")]
    ClusterAlreadyExists(String),

    #[error(transparent)]
    Db(#[from] crate::db::DbError),
}
