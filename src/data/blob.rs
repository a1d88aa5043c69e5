//! Self-describing nested blocks.
//!
//! Every block starts with a header and can contain typed primitives and
//! further blocks:
//!
//! ```text
//! magic    u32   0x5347424C ("SGBL")
//! name_len u16
//! name     [u8; name_len]   UTF-8
//! version  u32
//! body_len u64
//! body     [u8; body_len]
//! ```
//!
//! All integers are little-endian. A reader validates the header of a block
//! before it touches the body and refuses to run past the announced length.

use crate::data::ProtocolError;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

pub const BLOB_MAGIC: u32 = 0x5347_424C;

const HEADER_FIXED_LEN: usize = 4 + 2 + 4 + 8;

type BlobResult<T> = std::result::Result<T, ProtocolError>;

/// Decoded block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    pub name: String,
    pub version: u32,
    pub body_len: usize,
}

/// Writes nested blocks into a growable buffer.
#[derive(Debug, Default)]
pub struct BlobWriter {
    buf: Vec<u8>,
    // Positions of the body_len fields of open blocks.
    open: Vec<usize>,
}

impl BlobWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            open: Vec::new(),
        }
    }

    /// Open a block; its length is patched in by [`BlobWriter::end`].
    pub fn begin(&mut self, name: &str, version: u32) -> BlobResult<()> {
        let name_len = u16::try_from(name.len())
            .map_err(|_| ProtocolError::Malformed(format!("block name of {} bytes", name.len())))?;
        self.put_u32(BLOB_MAGIC);
        let _ = self.buf.write_u16::<LittleEndian>(name_len);
        self.buf.extend_from_slice(name.as_bytes());
        self.put_u32(version);
        self.open.push(self.buf.len());
        self.put_u64(0);
        Ok(())
    }

    /// Close the innermost open block.
    pub fn end(&mut self) -> BlobResult<()> {
        let at = self
            .open
            .pop()
            .ok_or_else(|| ProtocolError::Malformed("end() without begin()".to_string()))?;
        let body_len = (self.buf.len() - at - 8) as u64;
        LittleEndian::write_u64(&mut self.buf[at..at + 8], body_len);
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        let _ = self.buf.write_u32::<LittleEndian>(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        let _ = self.buf.write_u64::<LittleEndian>(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        let _ = self.buf.write_i64::<LittleEndian>(value);
    }

    pub fn put_f64(&mut self, value: f64) {
        let _ = self.buf.write_f64::<LittleEndian>(value);
    }

    /// Raw bytes without a length prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes preceded by a u64 length.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u64(bytes.len() as u64);
        self.put_raw(bytes);
    }

    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the buffer. Fails if a block is still open.
    pub fn finish(self) -> BlobResult<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(ProtocolError::Malformed(format!(
                "{} block(s) left open",
                self.open.len()
            )));
        }
        Ok(self.buf)
    }
}

/// Reads nested blocks from a byte slice.
#[derive(Debug)]
pub struct BlobReader<'a> {
    buf: &'a [u8],
    pos: usize,
    // End offsets of the blocks we are inside.
    ends: Vec<usize>,
}

impl<'a> BlobReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            ends: Vec::new(),
        }
    }

    fn limit(&self) -> usize {
        self.ends.last().copied().unwrap_or(self.buf.len())
    }

    /// Bytes left in the current block (or the whole buffer at top level).
    pub fn remaining(&self) -> usize {
        self.limit() - self.pos
    }

    fn take(&mut self, n: usize) -> BlobResult<&'a [u8]> {
        let available = self.remaining();
        if n > available {
            return Err(ProtocolError::Truncated {
                needed: n,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_header(&mut self) -> BlobResult<BlobHeader> {
        let available = self.remaining();
        if available < HEADER_FIXED_LEN {
            return Err(ProtocolError::Truncated {
                needed: HEADER_FIXED_LEN,
                available,
            });
        }
        let magic = self.get_u32()?;
        if magic != BLOB_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        let name_len = LittleEndian::read_u16(self.take(2)?) as usize;
        let name = std::str::from_utf8(self.take(name_len)?)
            .map_err(|_| ProtocolError::Malformed("block name is not UTF-8".to_string()))?
            .to_string();
        let version = self.get_u32()?;
        let body_len = usize::try_from(self.get_u64()?)
            .map_err(|_| ProtocolError::Malformed("block length overflows".to_string()))?;
        if body_len > self.remaining() {
            return Err(ProtocolError::Truncated {
                needed: body_len,
                available: self.remaining(),
            });
        }
        Ok(BlobHeader {
            name,
            version,
            body_len,
        })
    }

    /// Header of the next block without consuming it.
    pub fn peek_header(&self) -> BlobResult<BlobHeader> {
        let mut peek = BlobReader {
            buf: self.buf,
            pos: self.pos,
            ends: self.ends.clone(),
        };
        peek.read_header()
    }

    /// Enter the next block.
    pub fn begin(&mut self) -> BlobResult<BlobHeader> {
        let header = self.read_header()?;
        self.ends.push(self.pos + header.body_len);
        Ok(header)
    }

    /// Leave the current block, which must have been read completely.
    pub fn end(&mut self) -> BlobResult<()> {
        let end = self
            .ends
            .pop()
            .ok_or_else(|| ProtocolError::Malformed("end() without begin()".to_string()))?;
        if self.pos != end {
            return Err(ProtocolError::Malformed(format!(
                "{} unread bytes at end of block",
                end.saturating_sub(self.pos)
            )));
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> BlobResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> BlobResult<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn get_u64(&mut self) -> BlobResult<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn get_i64(&mut self) -> BlobResult<i64> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    pub fn get_f64(&mut self) -> BlobResult<f64> {
        Ok(LittleEndian::read_f64(self.take(8)?))
    }

    pub fn get_raw(&mut self, n: usize) -> BlobResult<&'a [u8]> {
        self.take(n)
    }

    /// Bytes written by [`BlobWriter::put_bytes`].
    pub fn get_bytes(&mut self) -> BlobResult<&'a [u8]> {
        let len = usize::try_from(self.get_u64()?)
            .map_err(|_| ProtocolError::Malformed("byte string length overflows".to_string()))?;
        self.take(len)
    }

    pub fn get_str(&mut self) -> BlobResult<&'a str> {
        std::str::from_utf8(self.get_bytes()?)
            .map_err(|_| ProtocolError::Malformed("string is not UTF-8".to_string()))
    }

    /// Require that the whole buffer has been consumed.
    pub fn finish(self) -> BlobResult<()> {
        if !self.ends.is_empty() {
            return Err(ProtocolError::Malformed("block left open".to_string()));
        }
        if self.pos != self.buf.len() {
            return Err(ProtocolError::Malformed(format!(
                "{} trailing bytes",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}
