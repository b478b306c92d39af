//! Synthetic vendor files for unit tests.

use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use crate::shard::ShardTrack;
use crate::wire::{END_OF_ENTRIES, FOOTER_LEN, LEVELDB_TABLE_MAGIC, tag_byte, write_varint};

/// Filler that never forms the end-of-entries marker.
const FILLER: u8 = 0x11;

/// Index/meta block bytes written between the marker and the footer.
const TRAILER_BLOCKS: usize = 24;

fn append_trailer(out: &mut Vec<u8>) {
    out.extend_from_slice(&END_OF_ENTRIES);
    out.extend(std::iter::repeat_n(0x7e, TRAILER_BLOCKS));
    let footer_start = out.len();
    out.resize(footer_start + FOOTER_LEN, 0);
    let n = out.len();
    LittleEndian::write_u64(&mut out[n - 8..], LEVELDB_TABLE_MAGIC);
}

/// Builds a matcher table: a leading block header, records, the marker and
/// a footer.
pub struct MatcherFileBuilder {
    entries: Vec<u8>,
}

impl MatcherFileBuilder {
    pub fn new() -> Self {
        Self {
            entries: vec![FILLER; 3],
        }
    }

    pub fn record(mut self, track: &str, artist: &str) -> Self {
        self.entries.push(0x1a);
        write_varint(&mut self.entries, track.len() as u64);
        self.entries.extend_from_slice(track.as_bytes());
        self.entries.push(0x22);
        write_varint(&mut self.entries, artist.len() as u64);
        self.entries.extend_from_slice(artist.as_bytes());
        self.entries.push(0x31);
        // fingerprint payload
        self.entries.extend_from_slice(&[FILLER; 8]);
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.entries.extend_from_slice(bytes);
        self
    }

    /// File bytes and the end offset the locator must report.
    pub fn build(self) -> (Vec<u8>, u64) {
        let mut out = self.entries;
        let end = (out.len() + END_OF_ENTRIES.len()) as u64;
        append_trailer(&mut out);
        (out, end)
    }
}

pub fn matcher_file(records: &[(&str, &str)]) -> (Vec<u8>, u64) {
    records
        .iter()
        .fold(MatcherFileBuilder::new(), |b, (t, a)| b.record(t, a))
        .build()
}

pub fn shard_track(db_id: &str, track_name: &str, artist: &str) -> ShardTrack {
    ShardTrack {
        db_id: db_id.to_string(),
        id: format!("id-{db_id}"),
        track_name: track_name.to_string(),
        artist: artist.to_string(),
        google_id: format!("/g/{db_id}"),
        player_urls: Vec::new(),
        album: None,
        year: None,
        is_linear: false,
        database: None,
    }
}

fn put_string(out: &mut Vec<u8>, field: u8, value: &str) {
    out.push(tag_byte(field, 2));
    write_varint(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

fn put_varint(out: &mut Vec<u8>, field: u8, value: u64) {
    out.push(tag_byte(field, 0));
    write_varint(out, value);
}

pub fn shard_entry(track: &ShardTrack) -> Vec<u8> {
    let mut value = Vec::new();
    put_string(&mut value, 1, &track.id);
    put_string(&mut value, 2, &track.track_name);
    put_string(&mut value, 3, &track.artist);
    put_string(&mut value, 4, &track.google_id);
    for url in &track.player_urls {
        put_string(&mut value, 5, url);
    }
    if let Some(album) = &track.album {
        put_string(&mut value, 6, album);
    }
    if let Some(year) = track.year {
        put_varint(&mut value, 7, year as u64);
    }
    put_varint(&mut value, 8, track.is_linear as u64);
    if let Some(database) = &track.database {
        put_string(&mut value, 9, database);
    }

    let mut entry = Vec::new();
    put_string(&mut entry, 1, &track.db_id);
    entry.push(tag_byte(2, 2));
    write_varint(&mut entry, value.len() as u64);
    entry.extend_from_slice(&value);
    entry
}

pub fn shard_file_from_entries(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut out: Vec<u8> = entries.concat();
    append_trailer(&mut out);
    out
}

pub fn shard_file(tracks: &[ShardTrack]) -> Vec<u8> {
    let entries: Vec<Vec<u8>> = tracks.iter().map(shard_entry).collect();
    shard_file_from_entries(&entries)
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
