//! Byte-level helpers shared by the matcher and shard decoders.
//!
//! Both vendor formats are LevelDB table files whose data blocks hold
//! protobuf-framed entries. Nothing here allocates; every read is bounded by
//! an explicit limit and returns `None` instead of running past it.

use byteorder::{ByteOrder, LittleEndian};

/// LevelDB table magic, stored little-endian in the last 8 bytes of a table.
pub const LEVELDB_TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;

/// Size of the LevelDB table footer (two block handles, padding, magic).
pub const FOOTER_LEN: usize = 48;

/// Marker written by the vendor's packer after the last data entry.
pub const END_OF_ENTRIES: [u8; 4] = [0x52, 0x00, 0x00, 0x00];

/// Protobuf wire types that can appear in vendor records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(Self::Varint),
            1 => Some(Self::Fixed64),
            2 => Some(Self::LengthDelimited),
            5 => Some(Self::Fixed32),
            // 3/4 are deprecated groups, never emitted by the packer
            _ => None,
        }
    }
}

/// Build the single-byte tag for a field number below 16.
pub const fn tag_byte(field: u8, wire_type: u8) -> u8 {
    (field << 3) | wire_type
}

/// True if the buffer ends with a LevelDB table footer.
pub fn has_table_footer(bytes: &[u8]) -> bool {
    if bytes.len() < FOOTER_LEN {
        return false;
    }
    LittleEndian::read_u64(&bytes[bytes.len() - 8..]) == LEVELDB_TABLE_MAGIC
}

/// Forward-only cursor over `bytes[..limit]`.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    limit: usize,
}

impl<'a> Reader<'a> {
    /// Cursor starting at `pos`; `limit` is clamped to the buffer length.
    pub fn new(bytes: &'a [u8], pos: usize, limit: usize) -> Self {
        Self {
            bytes,
            pos,
            limit: limit.min(bytes.len()),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.pos)
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.limit
    }

    /// Look at the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        Some(&self.bytes[self.pos..self.pos + n])
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let b = *self.peek(1)?.first()?;
        self.pos += 1;
        Some(b)
    }

    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.peek(n)?;
        self.pos += n;
        Some(slice)
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// LEB128 varint, at most 10 bytes. Overlong or overflowing encodings fail.
    pub fn read_varint(&mut self) -> Option<u64> {
        let mut value: u64 = 0;
        for i in 0..10 {
            let byte = self.read_u8()?;
            let low = (byte & 0x7f) as u64;
            if i == 9 && low > 1 {
                return None;
            }
            value |= low << (7 * i);
            if byte & 0x80 == 0 {
                return Some(value);
            }
        }
        None
    }

    /// Varint length followed by that many bytes.
    pub fn read_len_delimited(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.read_varint()?).ok()?;
        self.read_bytes(len)
    }

    /// Read a field tag, returning `(field_number, wire_type)`.
    pub fn read_tag(&mut self) -> Option<(u32, WireType)> {
        let raw = self.read_varint()?;
        let field = u32::try_from(raw >> 3).ok()?;
        if field == 0 {
            return None;
        }
        Some((field, WireType::from_bits(raw & 0x7)?))
    }

    /// Skip the payload of a field whose tag has already been read.
    pub fn skip_field(&mut self, wire_type: WireType) -> Option<()> {
        match wire_type {
            WireType::Varint => self.read_varint().map(|_| ()),
            WireType::Fixed64 => self.skip(8),
            WireType::LengthDelimited => self.read_len_delimited().map(|_| ()),
            WireType::Fixed32 => self.skip(4),
        }
    }
}

/// Append a LEB128 varint. Used by test fixtures and by nothing on the read path.
#[cfg(test)]
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_single_and_multi_byte() {
        let bytes = [0x05, 0xac, 0x02, 0xff, 0xff, 0xff, 0xff, 0x0f];
        let mut r = Reader::new(&bytes, 0, bytes.len());
        assert_eq!(r.read_varint(), Some(5));
        assert_eq!(r.read_varint(), Some(300));
        assert_eq!(r.read_varint(), Some(u32::MAX as u64));
        assert!(r.is_at_end());
    }

    #[test]
    fn test_varint_truncated_at_limit() {
        let bytes = [0xac, 0x02];
        let mut r = Reader::new(&bytes, 0, 1);
        assert_eq!(r.read_varint(), None);
    }

    #[test]
    fn test_varint_overflow_rejected() {
        let bytes = [0xff; 11];
        let mut r = Reader::new(&bytes, 0, bytes.len());
        assert_eq!(r.read_varint(), None);
    }

    #[test]
    fn test_write_varint_matches_reader() {
        for v in [0u64, 1, 127, 128, 300, 1 << 35, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, v);
            assert_eq!(Reader::new(&buf, 0, buf.len()).read_varint(), Some(v));
        }
    }

    #[test]
    fn test_len_delimited_respects_limit() {
        let bytes = [0x03, b'a', b'b', b'c'];
        assert_eq!(
            Reader::new(&bytes, 0, 4).read_len_delimited(),
            Some(&b"abc"[..])
        );
        assert_eq!(Reader::new(&bytes, 0, 3).read_len_delimited(), None);
    }

    #[test]
    fn test_read_tag() {
        let bytes = [tag_byte(3, 2), tag_byte(7, 0), 0x0b];
        let mut r = Reader::new(&bytes, 0, bytes.len());
        assert_eq!(r.read_tag(), Some((3, WireType::LengthDelimited)));
        assert_eq!(r.read_tag(), Some((7, WireType::Varint)));
        // field 1, wire type 3 (group)
        assert_eq!(r.read_tag(), None);
    }

    #[test]
    fn test_table_footer_detection() {
        let mut bytes = vec![0u8; FOOTER_LEN];
        assert!(!has_table_footer(&bytes));
        let n = bytes.len();
        LittleEndian::write_u64(&mut bytes[n - 8..], LEVELDB_TABLE_MAGIC);
        assert!(has_table_footer(&bytes));
        assert!(!has_table_footer(&bytes[1..]));
    }
}
