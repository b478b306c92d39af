use std::path::Path;

use super::{ShardError, ShardTrack};
use crate::wire::{END_OF_ENTRIES, FOOTER_LEN, Reader, WireType, has_table_footer};

// Entry framing
const FIELD_KEY: u32 = 1;
const FIELD_VALUE: u32 = 2;

// Value message fields
const FIELD_ID: u32 = 1;
const FIELD_TRACK_NAME: u32 = 2;
const FIELD_ARTIST: u32 = 3;
const FIELD_GOOGLE_ID: u32 = 4;
const FIELD_PLAYER_URL: u32 = 5;
const FIELD_ALBUM: u32 = 6;
const FIELD_YEAR: u32 = 7;
const FIELD_IS_LINEAR: u32 = 8;
const FIELD_DATABASE: u32 = 9;

/// Decode every track in a shard file.
///
/// A shard is released as one unit, so any framing problem fails the whole
/// file and no rows are returned.
pub fn decode_shard_file(path: &Path) -> Result<Vec<ShardTrack>, ShardError> {
    let bytes = std::fs::read(path)?;
    let tracks = decode_shard_bytes(&bytes)?;
    log::debug!(
        "Decoded {} shard tracks from {}",
        tracks.len(),
        path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
    );
    Ok(tracks)
}

pub fn decode_shard_bytes(bytes: &[u8]) -> Result<Vec<ShardTrack>, ShardError> {
    if !has_table_footer(bytes) {
        return Err(ShardError::invalid(bytes.len(), "missing table footer"));
    }
    let entries_limit = bytes.len() - FOOTER_LEN;

    let mut tracks = Vec::new();
    let mut r = Reader::new(bytes, 0, entries_limit);
    loop {
        if r.peek(END_OF_ENTRIES.len()) == Some(&END_OF_ENTRIES[..]) {
            return Ok(tracks);
        }
        if r.is_at_end() {
            return Err(ShardError::invalid(r.position(), "no end-of-entries marker"));
        }
        tracks.push(read_entry(&mut r)?);
    }
}

fn read_entry(r: &mut Reader<'_>) -> Result<ShardTrack, ShardError> {
    let start = r.position();
    let key = expect_len_delimited(r, FIELD_KEY, start, "entry key")?;
    let db_id = utf8(key, start, "db_id")?;
    let value_start = r.position();
    let value = expect_len_delimited(r, FIELD_VALUE, value_start, "entry value")?;
    read_value(db_id, value, value_start)
}

fn expect_len_delimited<'a>(
    r: &mut Reader<'a>,
    field: u32,
    offset: usize,
    what: &str,
) -> Result<&'a [u8], ShardError> {
    match r.read_tag() {
        Some((f, WireType::LengthDelimited)) if f == field => r
            .read_len_delimited()
            .ok_or_else(|| ShardError::invalid(offset, format!("truncated {what}"))),
        _ => Err(ShardError::invalid(offset, format!("expected {what}"))),
    }
}

fn utf8(raw: &[u8], offset: usize, field: &str) -> Result<String, ShardError> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| ShardError::invalid(offset, format!("{field} is not UTF-8")))
}

fn read_value(db_id: String, value: &[u8], offset: usize) -> Result<ShardTrack, ShardError> {
    let mut id = None;
    let mut track_name = None;
    let mut artist = None;
    let mut google_id = None;
    let mut player_urls = Vec::new();
    let mut album = None;
    let mut year = None;
    let mut is_linear = false;
    let mut database = None;

    let mut r = Reader::new(value, 0, value.len());
    while !r.is_at_end() {
        let (field, wire_type) = r
            .read_tag()
            .ok_or_else(|| ShardError::invalid(offset + r.position(), "bad field tag"))?;
        let at = offset + r.position();
        match (field, wire_type) {
            (FIELD_YEAR, WireType::Varint) => {
                let raw = r.read_varint().ok_or_else(|| ShardError::invalid(at, "truncated year"))?;
                year = Some(
                    i32::try_from(raw).map_err(|_| ShardError::invalid(at, "year out of range"))?,
                );
            }
            (FIELD_IS_LINEAR, WireType::Varint) => {
                is_linear = r
                    .read_varint()
                    .ok_or_else(|| ShardError::invalid(at, "truncated is_linear"))?
                    != 0;
            }
            (
                FIELD_ID | FIELD_TRACK_NAME | FIELD_ARTIST | FIELD_GOOGLE_ID | FIELD_PLAYER_URL
                | FIELD_ALBUM | FIELD_DATABASE,
                WireType::LengthDelimited,
            ) => {
                let raw = r
                    .read_len_delimited()
                    .ok_or_else(|| ShardError::invalid(at, "truncated string field"))?;
                let s = utf8(raw, at, "string field")?;
                match field {
                    FIELD_ID => id = Some(s),
                    FIELD_TRACK_NAME => track_name = Some(s),
                    FIELD_ARTIST => artist = Some(s),
                    FIELD_GOOGLE_ID => google_id = Some(s),
                    FIELD_PLAYER_URL => player_urls.push(s),
                    FIELD_ALBUM => album = Some(s),
                    _ => database = Some(s),
                }
            }
            (FIELD_ID..=FIELD_DATABASE, _) => {
                return Err(ShardError::invalid(at, format!("wrong wire type for field {field}")));
            }
            (_, wire_type) => {
                r.skip_field(wire_type)
                    .ok_or_else(|| ShardError::invalid(at, format!("truncated field {field}")))?;
            }
        }
    }

    let missing = |name: &str| ShardError::invalid(offset, format!("{db_id}: missing {name}"));
    Ok(ShardTrack {
        id: id.ok_or_else(|| missing("id"))?,
        track_name: track_name.ok_or_else(|| missing("track_name"))?,
        artist: artist.ok_or_else(|| missing("artist"))?,
        google_id: google_id.unwrap_or_default(),
        player_urls,
        album,
        year,
        is_linear,
        database,
        db_id,
    })
}
