// Copyright 2024 The Warren Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Component A: a growable byte buffer with a read cursor, plus the zlib
//! compression codec used by the artifact store.
//!
//! [`Buffer`] is built over [`bstr::BString`] rather than [`String`] because
//! artifacts (file content in particular) are not guaranteed to be valid
//! UTF-8; manifests are, but the buffer type has to serve both.

use bstr::BString;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::Read as _;
use std::io::Write as _;
use thiserror::Error;

use crate::hex_util;

/// Where a [`Buffer::seek`] offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    /// Seeking to the end reduces the target position by one byte before
    /// clamping, an off-by-one inherited from the system this crate reworks
    /// and preserved here as an explicit contract (spec. §9 open question:
    /// flagged as a possible latent bug, not "fixed" silently).
    End,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compressed buffer is shorter than its 4-byte size header")]
    TruncatedHeader,
    #[error("zlib inflate failed: {0}")]
    Inflate(#[from] std::io::Error),
    #[error("inflated size {actual} does not match header {expected}")]
    SizeMismatch { expected: u32, actual: usize },
}

/// A growable byte buffer with a read cursor, modeling the artifact layer's
/// primitive container (spec. §4.A).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: BString,
    cursor: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: BString::from(bytes.into()),
            cursor: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Appends bytes to the end of the buffer. Does not move the cursor.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Moves the cursor back to the start.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Repositions the cursor; out-of-range targets clamp to `[0, len]`.
    pub fn seek(&mut self, whence: Whence, offset: i64) {
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => self.cursor as i64,
            // The off-by-one: seeking relative to the end targets `len - 1`,
            // not `len`, before applying `offset`.
            Whence::End => self.data.len() as i64 - 1,
        };
        let target = base + offset;
        self.cursor = target.clamp(0, self.data.len() as i64) as usize;
    }

    /// Reads up to `n` bytes from the cursor, advancing it. Returns fewer
    /// than `n` bytes at end of buffer.
    pub fn read_bytes(&mut self, n: usize) -> &[u8] {
        let end = (self.cursor + n).min(self.data.len());
        let slice = &self.data[self.cursor..end];
        self.cursor = end;
        slice
    }

    /// Extracts one line, up to and including the terminating `\n`. Returns
    /// `None` once the cursor has reached the end of the buffer. The final
    /// line of a buffer lacking a trailing newline is still returned (sans
    /// newline).
    pub fn get_line(&mut self) -> Option<&[u8]> {
        if self.cursor >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.cursor..];
        let end = match rest.iter().position(|&b| b == b'\n') {
            Some(nl) => self.cursor + nl + 1,
            None => self.data.len(),
        };
        let slice = &self.data[self.cursor..end];
        self.cursor = end;
        Some(slice)
    }

    /// Extracts one whitespace-delimited token starting at the cursor,
    /// skipping any leading whitespace first. Advances the cursor past the
    /// token (but not past the whitespace/terminator that follows it).
    pub fn get_token(&mut self) -> Option<&[u8]> {
        while matches!(self.data.get(self.cursor), Some(b) if b.is_ascii_whitespace()) {
            self.cursor += 1;
        }
        if self.cursor >= self.data.len() {
            return None;
        }
        let start = self.cursor;
        while matches!(self.data.get(self.cursor), Some(b) if !b.is_ascii_whitespace()) {
            self.cursor += 1;
        }
        Some(&self.data[start..self.cursor])
    }

    /// Extracts a single-quoted SQL-style token (`'...'`), where a doubled
    /// quote `''` inside the literal is an escaped single quote. The cursor
    /// must be positioned at the opening `'`. Returns the unescaped content
    /// without the surrounding quotes.
    pub fn get_sql_token(&mut self) -> Option<Vec<u8>> {
        if self.data.get(self.cursor) != Some(&b'\'') {
            return None;
        }
        let mut out = Vec::new();
        let mut i = self.cursor + 1;
        loop {
            match self.data.get(i) {
                None => return None, // unterminated literal
                Some(b'\'') => {
                    if self.data.get(i + 1) == Some(&b'\'') {
                        out.push(b'\'');
                        i += 2;
                    } else {
                        self.cursor = i + 1;
                        return Some(out);
                    }
                }
                Some(&b) => {
                    out.push(b);
                    i += 1;
                }
            }
        }
    }

    /// Lexicographic byte comparison.
    pub fn compare(&self, other: &Buffer) -> std::cmp::Ordering {
        self.data.cmp(&other.data)
    }

    /// Constant-time comparison for two buffers of equal length (used only
    /// to compare UUID bytes, not as a general crypto primitive: see
    /// SPEC_FULL.md component A). Buffers of unequal length are never equal.
    pub fn compare_ct(&self, other: &Buffer) -> bool {
        if self.data.len() != other.data.len() {
            return false;
        }
        let mut diff = 0u8;
        for (a, b) in self.data.iter().zip(other.data.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }

    /// Whether the entire buffer is ASCII hex digits (no surrounding
    /// whitespace permitted).
    pub fn is_hex(&self) -> bool {
        hex_util::is_hex_bytes(self.data.as_slice())
    }

    /// Parses the whole buffer as a base-10 signed integer.
    pub fn parse_int(&self) -> Option<i64> {
        std::str::from_utf8(self.data.as_slice())
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

/// Compresses `input` with zlib at the maximum compression level, prepending
/// a 4-byte big-endian header holding the uncompressed size (spec. §4.A).
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 2 + 4);
    out.extend_from_slice(&(input.len() as u32).to_be_bytes());
    let mut encoder = ZlibEncoder::new(&mut out, Compression::best());
    encoder.write_all(input).expect("writing to a Vec cannot fail");
    encoder.finish().expect("writing to a Vec cannot fail");
    out
}

/// Inverse of [`compress`]: validates the size header and inflates into a
/// freshly sized buffer.
pub fn uncompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    if input.len() < 4 {
        return Err(CodecError::TruncatedHeader);
    }
    let expected = u32::from_be_bytes(input[0..4].try_into().unwrap());
    let mut out = Vec::with_capacity(expected as usize);
    let mut decoder = ZlibDecoder::new(&input[4..]);
    decoder.read_to_end(&mut out)?;
    if out.len() as u32 != expected {
        return Err(CodecError::SizeMismatch {
            expected,
            actual: out.len(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read() {
        let mut b = Buffer::new();
        b.append(b"hello");
        b.append(b" world");
        assert_eq!(b.as_bytes(), b"hello world");
        assert_eq!(b.read_bytes(5), b"hello");
        assert_eq!(b.read_bytes(100), b" world");
        assert_eq!(b.read_bytes(1), b"");
    }

    #[test]
    fn line_extraction() {
        let mut b = Buffer::from_bytes(&b"first\nsecond\nthird"[..]);
        assert_eq!(b.get_line(), Some(&b"first\n"[..]));
        assert_eq!(b.get_line(), Some(&b"second\n"[..]));
        assert_eq!(b.get_line(), Some(&b"third"[..]));
        assert_eq!(b.get_line(), None);
    }

    #[test]
    fn token_extraction_skips_whitespace() {
        let mut b = Buffer::from_bytes(&b"  foo   bar\tbaz"[..]);
        assert_eq!(b.get_token(), Some(&b"foo"[..]));
        assert_eq!(b.get_token(), Some(&b"bar"[..]));
        assert_eq!(b.get_token(), Some(&b"baz"[..]));
        assert_eq!(b.get_token(), None);
    }

    #[test]
    fn sql_token_unescapes_doubled_quote() {
        let mut b = Buffer::from_bytes(&b"'it''s here' rest"[..]);
        assert_eq!(b.get_sql_token(), Some(b"it's here".to_vec()));
        assert_eq!(b.get_token(), Some(&b"rest"[..]));
    }

    #[test]
    fn sql_token_unterminated_is_none() {
        let mut b = Buffer::from_bytes(&b"'oops"[..]);
        assert_eq!(b.get_sql_token(), None);
    }

    #[test]
    fn seek_end_is_off_by_one() {
        let mut b = Buffer::from_bytes(&b"12345"[..]);
        b.seek(Whence::End, 0);
        // len() == 5, so End targets index 4, the last byte, not one past it.
        assert_eq!(b.position(), 4);
    }

    #[test]
    fn seek_clamps_to_bounds() {
        let mut b = Buffer::from_bytes(&b"abc"[..]);
        b.seek(Whence::Set, -5);
        assert_eq!(b.position(), 0);
        b.seek(Whence::Set, 100);
        assert_eq!(b.position(), 3);
    }

    #[test]
    fn compare_ct_requires_equal_length() {
        let a = Buffer::from_bytes(&b"abc"[..]);
        let b = Buffer::from_bytes(&b"abc"[..]);
        let c = Buffer::from_bytes(&b"abcd"[..]);
        assert!(a.compare_ct(&b));
        assert!(!a.compare_ct(&c));
    }

    #[test]
    fn compress_roundtrip() {
        let inputs: Vec<Vec<u8>> = vec![
            Vec::new(),
            b"A".repeat(1 << 20),
            b"hello world".to_vec(),
        ];
        for input in inputs {
            let compressed = compress(&input);
            let restored = uncompress(&compressed).unwrap();
            assert_eq!(restored, input);
        }
    }

    #[test]
    fn uncompress_rejects_truncated_header() {
        assert!(matches!(uncompress(b"ab"), Err(CodecError::TruncatedHeader)));
    }

    #[test]
    fn uncompress_rejects_size_mismatch() {
        let mut compressed = compress(b"hello");
        compressed[3] ^= 0xff; // corrupt the size header
        assert!(matches!(
            uncompress(&compressed),
            Err(CodecError::SizeMismatch { .. })
        ));
    }
}
