use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Defense-in-depth assertion (§4.4): should never trigger while I3
    /// holds, since at most one shard per realm is ever in transit.
    #[error("more than one shard excludes a single physical location at once")]
    MultipleShardsInTransit,

    #[error(transparent)]
    Metadata(#[from] crate::metadata::Error),
}
