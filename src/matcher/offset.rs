use std::path::Path;

use memchr::memmem;

use super::MatcherError;
use crate::wire::{END_OF_ENTRIES, FOOTER_LEN, has_table_footer};

/// Find the offset just past the end-of-entries marker in a matcher file.
///
/// `Ok(None)` means the file was readable but is not a matcher table the
/// decoder can trust (no footer, or no marker before the footer). I/O
/// failures are reported separately so callers can retry them.
pub fn find_end_offset(path: &Path) -> Result<Option<u64>, MatcherError> {
    let bytes = std::fs::read(path)?;
    let offset = locate_end_offset(&bytes);
    match offset {
        Some(o) => log::debug!(
            "End of entries in {} at {} of {} bytes",
            path.display(),
            o,
            bytes.len()
        ),
        None => log::warn!("No end-of-entries marker in {}", path.display()),
    }
    Ok(offset)
}

/// Locate the end of the entry region in an in-memory matcher table.
///
/// The marker is searched from byte 1 up to the start of the footer, so the
/// returned offset always satisfies `0 < offset <= bytes.len()`.
pub fn locate_end_offset(bytes: &[u8]) -> Option<u64> {
    if bytes.len() < FOOTER_LEN + END_OF_ENTRIES.len() + 1 || !has_table_footer(bytes) {
        return None;
    }
    let haystack = &bytes[1..bytes.len() - FOOTER_LEN];
    memmem::find(haystack, &END_OF_ENTRIES).map(|pos| (1 + pos + END_OF_ENTRIES.len()) as u64)
}
