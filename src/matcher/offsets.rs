use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{MatcherError, locate_end_offset};
use crate::db::Database;
use crate::db::models::KnownOffset;
use crate::superpacks::modified_nanos;

/// Bytes checksummed on each side of a remembered offset.
const CHECK_WINDOW: u64 = 4096;

/// End offset for a file and whether it came from a fresh scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOffset {
    pub end_offset: u64,
    pub file_size: u64,
    pub file_mtime: i64,
    pub checksum: u32,
    pub newly_located: bool,
}

impl ResolvedOffset {
    /// The entry to remember for `path`, if this offset came from a scan.
    pub fn to_known(&self, path: &Path) -> Option<KnownOffset> {
        self.newly_located.then(|| KnownOffset {
            file_path: path.to_string_lossy().to_string(),
            file_size: self.file_size,
            file_mtime: self.file_mtime,
            checksum: self.checksum,
            end_offset: self.end_offset,
        })
    }
}

/// Resolves matcher end offsets without rescanning files it has seen before.
///
/// Locating the marker in the core matcher is the slow part of a load, so
/// offsets are remembered per path. An entry is reused only while the file
/// keeps its size and mtime and the bytes around the offset and at the end of
/// the file still checksum the same.
#[derive(Debug, Default)]
pub struct OffsetResolver {
    known: HashMap<String, KnownOffset>,
    core_override: Option<(PathBuf, u64)>,
}

impl OffsetResolver {
    pub fn new(known: Vec<KnownOffset>) -> Self {
        Self {
            known: known
                .into_iter()
                .map(|k| (k.file_path.clone(), k))
                .collect(),
            core_override: None,
        }
    }

    /// Load every remembered offset from the cache database.
    pub fn from_db(db: &Database) -> crate::db::Result<Self> {
        Ok(Self::new(db.get_known_offsets()?))
    }

    /// Use a fixed offset for the core file at `path` instead of scanning it.
    pub fn with_core_override(mut self, path: &Path, end_offset: u64) -> Self {
        self.core_override = Some((path.to_path_buf(), end_offset));
        self
    }

    pub fn resolve(&self, path: &Path) -> Result<ResolvedOffset, MatcherError> {
        let meta = std::fs::metadata(path)?;
        let file_len = meta.len();
        let file_mtime = modified_nanos(&meta);

        if let Some((core, end_offset)) = &self.core_override {
            if core == path {
                if *end_offset > file_len {
                    return Err(MatcherError::OffsetOutOfRange {
                        end_offset: *end_offset,
                        file_len,
                    });
                }
                return Ok(ResolvedOffset {
                    end_offset: *end_offset,
                    file_size: file_len,
                    file_mtime,
                    checksum: 0,
                    newly_located: false,
                });
            }
        }

        let key = path.to_string_lossy();
        if let Some(known) = self.known.get(&*key) {
            if known.file_size == file_len
                && known.file_mtime == file_mtime
                && known.end_offset <= file_len
                && checksum_file(path, known.end_offset, file_len)? == known.checksum
            {
                log::trace!("Using remembered offset {} for {}", known.end_offset, key);
                return Ok(ResolvedOffset {
                    end_offset: known.end_offset,
                    file_size: file_len,
                    file_mtime,
                    checksum: known.checksum,
                    newly_located: false,
                });
            }
            log::debug!("{} changed since its offset was recorded", key);
        }

        let bytes = std::fs::read(path)?;
        match locate_end_offset(&bytes) {
            Some(end_offset) => {
                log::debug!("End of entries in {} at {} of {} bytes", key, end_offset, bytes.len());
                Ok(ResolvedOffset {
                    end_offset,
                    file_size: bytes.len() as u64,
                    file_mtime,
                    checksum: checksum_bytes(&bytes, end_offset),
                    newly_located: true,
                })
            }
            None => Err(MatcherError::StructuralNotFound(
                path.file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_default(),
            )),
        }
    }
}

/// CRC32 of the window ending at `end_offset` followed by the file's tail.
fn checksum_bytes(bytes: &[u8], end_offset: u64) -> u32 {
    let end = end_offset as usize;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[end.saturating_sub(CHECK_WINDOW as usize)..end]);
    hasher.update(&bytes[bytes.len().saturating_sub(CHECK_WINDOW as usize)..]);
    hasher.finalize()
}

/// Same as `checksum_bytes`, reading only the two windows from disk.
fn checksum_file(path: &Path, end_offset: u64, file_len: u64) -> std::io::Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    for (start, stop) in [
        (end_offset.saturating_sub(CHECK_WINDOW), end_offset),
        (file_len.saturating_sub(CHECK_WINDOW), file_len),
    ] {
        let mut buf = vec![0u8; (stop - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;
        hasher.update(&buf);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{matcher_file, write_file};

    /// What a scan of `path` would have remembered.
    fn remembered(path: &Path) -> KnownOffset {
        OffsetResolver::default()
            .resolve(path)
            .unwrap()
            .to_known(path)
            .unwrap()
    }

    #[test]
    fn test_scans_unknown_file() {
        let dir = tempfile::tempdir().unwrap();
        let (bytes, end) = matcher_file(&[("Song", "Artist")]);
        let path = write_file(dir.path(), "matcher_a.leveldb", &bytes);

        let resolved = OffsetResolver::default().resolve(&path).unwrap();
        assert_eq!(resolved.end_offset, end);
        assert_eq!(resolved.file_size, bytes.len() as u64);
        assert!(resolved.newly_located);
        assert_eq!(resolved.checksum, checksum_bytes(&bytes, end));

        let known = resolved.to_known(&path).unwrap();
        assert_eq!(known.file_path, path.to_string_lossy());
        assert_eq!(known.end_offset, end);
    }

    #[test]
    fn test_file_and_memory_checksums_agree() {
        let dir = tempfile::tempdir().unwrap();
        let (small, small_end) = matcher_file(&[("Song", "Artist")]);
        let records: Vec<(String, String)> = (0..400)
            .map(|i| (format!("Track {i}"), format!("Artist {i}")))
            .collect();
        let refs: Vec<(&str, &str)> = records.iter().map(|(t, a)| (t.as_str(), a.as_str())).collect();
        let (large, large_end) = matcher_file(&refs);
        assert!(large.len() as u64 > 2 * CHECK_WINDOW);

        for (name, bytes, end) in [("small", &small, small_end), ("large", &large, large_end)] {
            let path = write_file(dir.path(), name, bytes);
            assert_eq!(
                checksum_file(&path, end, bytes.len() as u64).unwrap(),
                checksum_bytes(bytes, end)
            );
        }
    }

    #[test]
    fn test_uses_remembered_offset_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (bytes, end) = matcher_file(&[("Song", "Artist")]);
        let path = write_file(dir.path(), "matcher_b.leveldb", &bytes);

        let resolver = OffsetResolver::new(vec![remembered(&path)]);
        let resolved = resolver.resolve(&path).unwrap();
        assert_eq!(resolved.end_offset, end);
        assert!(!resolved.newly_located);
        assert_eq!(resolved.to_known(&path), None);
    }

    #[test]
    fn test_rescans_when_size_or_mtime_changed() {
        let dir = tempfile::tempdir().unwrap();
        let (bytes, _) = matcher_file(&[("Song", "Artist")]);
        let path = write_file(dir.path(), "matcher_c.leveldb", &bytes);
        let known = remembered(&path);

        let resized = OffsetResolver::new(vec![KnownOffset { file_size: 1, ..known.clone() }]);
        assert!(resized.resolve(&path).unwrap().newly_located);

        let touched = OffsetResolver::new(vec![KnownOffset {
            file_mtime: known.file_mtime + 1,
            ..known
        }]);
        assert!(touched.resolve(&path).unwrap().newly_located);
    }

    #[test]
    fn test_rescans_when_content_differs() {
        let dir = tempfile::tempdir().unwrap();
        let (bytes, end) = matcher_file(&[("Song", "Artist")]);
        let path = write_file(dir.path(), "matcher_d.leveldb", &bytes);

        // size and mtime match, but the offset was recorded for other bytes
        let stale = KnownOffset {
            end_offset: end - 1,
            ..remembered(&path)
        };
        let resolved = OffsetResolver::new(vec![stale]).resolve(&path).unwrap();
        assert_eq!(resolved.end_offset, end);
        assert!(resolved.newly_located);
    }

    #[test]
    fn test_core_override_matches_full_path() {
        let core_dir = tempfile::tempdir().unwrap();
        let shard_dir = tempfile::tempdir().unwrap();
        let (bytes, end) = matcher_file(&[("Song", "Artist")]);
        let core = write_file(core_dir.path(), "matcher_tah.leveldb", &bytes);
        let same_name = write_file(shard_dir.path(), "matcher_tah.leveldb", &bytes);

        let resolver = OffsetResolver::default().with_core_override(&core, 12);
        assert_eq!(resolver.resolve(&core).unwrap().end_offset, 12);
        assert_eq!(resolver.resolve(&same_name).unwrap().end_offset, end);

        let too_far = OffsetResolver::default().with_core_override(&core, bytes.len() as u64 + 1);
        assert!(matches!(
            too_far.resolve(&core),
            Err(MatcherError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn test_corrupt_file_is_structural_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "junk.leveldb", &[0u8; 100]);
        assert!(matches!(
            OffsetResolver::default().resolve(&path),
            Err(MatcherError::StructuralNotFound(name)) if name == "junk.leveldb"
        ));
    }
}
