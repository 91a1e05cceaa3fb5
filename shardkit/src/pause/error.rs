use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Metadata(#[from] crate::metadata::Error),
}
