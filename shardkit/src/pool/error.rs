use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] crate::registry::Error),

    #[error(transparent)]
    Db(#[from] crate::db::DbError),
}
