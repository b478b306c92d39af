use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use super::{ShardTrack, decode_shard_file, merge};
use crate::db::{Database, DbError};
use crate::superpacks::{self, SuperpackError, SuperpackFile};

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Superpack error: {0}")]
    Superpack(#[from] SuperpackError),
}

/// Where the shard tracks of a load came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardLoad {
    /// The cache matched the files on disk.
    Cached(Vec<ShardTrack>),
    /// Files were decoded, merged and written to the cache.
    Decoded(Vec<ShardTrack>),
    /// At least one file failed; the cache was left as it was.
    Incomplete { failed: Vec<String> },
}

impl ShardLoad {
    pub fn tracks(&self) -> &[ShardTrack] {
        match self {
            Self::Cached(tracks) | Self::Decoded(tracks) => tracks,
            Self::Incomplete { .. } => &[],
        }
    }
}

/// Serve shard tracks from the cache, or rebuild it from `shard_dir` when the
/// files changed since the last populate (or `force` is set).
pub fn load_shard_tracks(
    db: &Database,
    shard_dir: &Path,
    jobs: usize,
    force: bool,
) -> Result<ShardLoad, LibraryError> {
    let files = superpacks::enumerate(None, shard_dir)?;
    let current = fingerprint(&files);

    if !force && db.shard_cache_exists()? {
        if db.shard_cache_fingerprint()?.as_deref() == Some(current.as_str()) {
            let tracks = db.get_all_shard_tracks()?;
            log::info!("Using {} cached shard tracks", tracks.len());
            return Ok(ShardLoad::Cached(tracks));
        }
        log::info!("Shard files changed since last load, rebuilding cache");
    }

    let pool = superpacks::worker_pool(jobs)?;
    let pb = ProgressBar::new(files.len() as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message("Decoding shards...");

    let run = superpacks::for_each_superpack(&pool, &files, |file, _, _| {
        let decoded = match decode_shard_file(&file.path) {
            Ok(tracks) => {
                log::debug!("{}: {} shard tracks", file.name(), tracks.len());
                Some(tracks)
            }
            Err(e) => {
                log::warn!("{}: {}", file.name(), e);
                None
            }
        };
        pb.inc(1);
        decoded
    });
    pb.finish_and_clear();

    if !run.all_succeeded() {
        let failed: Vec<String> = run.failed_files().iter().map(|f| f.name()).collect();
        log::warn!("{} shard files failed, cache not updated", failed.len());
        return Ok(ShardLoad::Incomplete { failed });
    }

    let tracks = merge(run.into_successes());
    db.replace_shard_tracks(&tracks, Some(&current))?;
    log::info!("Decoded {} shard tracks from {} files", tracks.len(), files.len());
    Ok(ShardLoad::Decoded(tracks))
}

/// Names, sizes and modification times of the shard set, in enumeration order.
pub fn fingerprint(files: &[SuperpackFile]) -> String {
    files
        .iter()
        .map(|f| {
            let (size, mtime) = std::fs::metadata(&f.path)
                .map(|m| (m.len(), superpacks::modified_nanos(&m)))
                .unwrap_or((0, 0));
            format!("{}:{}:{}", f.name(), size, mtime)
        })
        .collect::<Vec<_>>()
        .join(";")
}
