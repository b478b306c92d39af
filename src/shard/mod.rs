pub mod decode;
pub mod library;
pub mod merge;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use decode::{decode_shard_bytes, decode_shard_file};
pub use library::{LibraryError, ShardLoad, load_shard_tracks};
pub use merge::merge;

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid shard file at offset {offset}: {reason}")]
    Invalid { offset: usize, reason: String },
}

impl ShardError {
    pub(crate) fn invalid(offset: usize, reason: impl Into<String>) -> Self {
        Self::Invalid {
            offset,
            reason: reason.into(),
        }
    }
}

/// A track from a shard file, with the metadata the matcher tables lack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardTrack {
    /// Primary key within the shard set.
    pub db_id: String,
    pub id: String,
    pub track_name: String,
    pub artist: String,
    pub google_id: String,
    pub player_urls: Vec<String>,
    pub album: Option<String>,
    pub year: Option<i32>,
    pub is_linear: bool,
    /// Name of the database the row came from, when the shard records it.
    pub database: Option<String>,
}

impl ShardTrack {
    /// Identity used across shards, independent of `db_id`.
    pub fn shared_name(&self) -> String {
        format!("{}:{}:{}", self.track_name, self.artist, self.is_linear)
    }
}
