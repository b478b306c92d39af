/// A remembered end offset for a matcher file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownOffset {
    pub file_path: String,
    /// Size, mtime and checksum of the file when the offset was located; any
    /// mismatch invalidates it.
    pub file_size: u64,
    pub file_mtime: i64,
    pub checksum: u32,
    pub end_offset: u64,
}

/// Summary of what the cache currently holds.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub shard_tracks: i64,
    pub linear_tracks: i64,
    pub artists: i64,
    pub known_offsets: i64,
    pub populated_at: Option<String>,
}
