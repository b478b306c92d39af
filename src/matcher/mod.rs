pub mod decode;
pub mod offset;
pub mod offsets;

use serde::Serialize;
use thiserror::Error;

pub use decode::{decode_file, decode_records};
pub use offset::{find_end_offset, locate_end_offset};
pub use offsets::{OffsetResolver, ResolvedOffset};

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("End offset {end_offset} is past end of file ({file_len} bytes)")]
    OffsetOutOfRange { end_offset: u64, file_len: u64 },
    #[error("No end-of-entries marker found in {0}")]
    StructuralNotFound(String),
}

/// A (track, artist) pair decoded from a matcher table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MatcherTrack {
    pub track: String,
    pub artist: String,
}

impl MatcherTrack {
    pub fn new(track: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            track: track.into(),
            artist: artist.into(),
        }
    }

    /// Dedup identity: trimmed, lowercased track followed by artist.
    pub fn normalized_key(&self) -> String {
        let mut key = self.track.trim().to_lowercase();
        key.push_str(&self.artist.trim().to_lowercase());
        key
    }
}
