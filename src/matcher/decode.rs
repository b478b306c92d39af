use std::path::Path;

use super::{MatcherError, MatcherTrack};
use crate::wire::Reader;

const TAG_TRACK: u8 = 0x1a;
const TAG_ARTIST: u8 = 0x22;
/// Fixed64 field that always follows the artist in a real entry.
const TAG_ENTRY_DATA: u8 = 0x31;

// Hard caps: anything longer is a coincidental tag byte inside fingerprint data.
const MAX_TRACK_LENGTH: u64 = 100;
const MAX_ARTIST_LENGTH: u64 = 150;

/// Decode all (track, artist) pairs from a matcher file up to `end_offset`.
pub fn decode_file(path: &Path, end_offset: u64) -> Result<Vec<MatcherTrack>, MatcherError> {
    let bytes = std::fs::read(path)?;
    let start = std::time::Instant::now();
    let tracks = decode_records(&bytes, end_offset)?;
    log::debug!(
        "Found {} tracks in {} in {}ms",
        tracks.len(),
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?"),
        start.elapsed().as_millis()
    );
    Ok(tracks)
}

/// Scan `bytes[..end_offset]` for track/artist entries.
///
/// Entries are found by shape rather than by walking block structure: a
/// track field, an artist field, then the entry data tag, all inside the
/// region. Candidates that don't fit are skipped one byte at a time.
pub fn decode_records(bytes: &[u8], end_offset: u64) -> Result<Vec<MatcherTrack>, MatcherError> {
    let file_len = bytes.len() as u64;
    if end_offset > file_len {
        return Err(MatcherError::OffsetOutOfRange {
            end_offset,
            file_len,
        });
    }
    // end_offset <= len, so this can't truncate
    let limit = end_offset as usize;

    let mut tracks = Vec::new();
    let mut pos = 0;
    while pos < limit {
        if bytes[pos] != TAG_TRACK {
            pos += 1;
            continue;
        }
        match read_entry(bytes, pos, limit) {
            Some((track, next)) => {
                tracks.push(track);
                pos = next;
            }
            None => pos += 1,
        }
    }
    Ok(tracks)
}

/// Try to read one entry starting at the track tag at `pos`.
/// Returns the track and the position after the entry data tag.
fn read_entry(bytes: &[u8], pos: usize, limit: usize) -> Option<(MatcherTrack, usize)> {
    let mut r = Reader::new(bytes, pos + 1, limit);

    let track_len = r.read_varint()?;
    if !(1..MAX_TRACK_LENGTH).contains(&track_len) {
        return None;
    }
    let track = r.read_bytes(track_len as usize)?;

    if r.read_u8()? != TAG_ARTIST {
        return None;
    }
    let artist_len = r.read_varint()?;
    if !(1..MAX_ARTIST_LENGTH).contains(&artist_len) {
        return None;
    }
    let artist = r.read_bytes(artist_len as usize)?;

    if r.read_u8()? != TAG_ENTRY_DATA {
        return None;
    }

    match (text_field(track), text_field(artist)) {
        (Some(track), Some(artist)) => Some((MatcherTrack::new(track, artist), r.position())),
        _ => {
            log::trace!("Skipping unparsable entry at offset {}", pos);
            None
        }
    }
}

fn text_field(raw: &[u8]) -> Option<&str> {
    let s = std::str::from_utf8(raw).ok()?;
    if s.trim().is_empty() { None } else { Some(s) }
}
