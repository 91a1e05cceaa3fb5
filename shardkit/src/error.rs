use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] crate::registry::Error),

    #[error(transparent)]
    Metadata(#[from] crate::metadata::Error),

    #[error(transparent)]
    Pool(#[from] crate::pool::Error),

    #[error(transparent)]
    Resolver(#[from] crate::resolver::Error),

    #[error(transparent)]
    Router(#[from] crate::router::Error),

    #[error(transparent)]
    Migration(#[from] crate::migration::Error),

    #[error(transparent)]
    Pause(#[from] crate::pause::Error),

    #[error(transparent)]
    Db(#[from] crate::db::DbError),
}
