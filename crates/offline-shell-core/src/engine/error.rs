use thiserror::Error;

use crate::cache::StorageError;
use crate::network::FetchError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Asset manifest is empty")]
    EmptyManifest,

    #[error("Install failed fetching {url}: {reason}")]
    Install { url: String, reason: String },

    #[error("Activate failed deleting cache {name}: {source}")]
    Activate {
        name: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Network(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl EngineError {
    /// True when a fetch failed and no cached response could stand in.
    pub fn is_network(&self) -> bool {
        matches!(self, EngineError::Network(_))
    }
}
