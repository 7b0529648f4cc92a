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

//! Component B: the delta format used to store one artifact as edits
//! against another.
//!
//! A delta is a command stream over three primitives (spec. §4.B): `copy` a
//! run of bytes from the source, `insert` a run of literal bytes, and a
//! trailing `end` checksum over the reconstructed target. Encoding uses a
//! fixed-size rolling-hash block match (the same family of technique as
//! `rsync`), not a byte-for-byte port of any specific historical wire
//! format — see DESIGN.md for why no such format was available to match
//! against.

use std::collections::HashMap;

use thiserror::Error;

const BLOCK_SIZE: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    #[error("delta command stream is truncated")]
    Truncated,
    #[error("delta references source offset {offset} + {len} past source length {source_len}")]
    OutOfRange {
        offset: u32,
        len: u32,
        source_len: usize,
    },
    #[error("checksum mismatch: delta expected {expected:#010x}, reconstructed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Copy { offset: u32, len: u32 },
    Insert { bytes: Vec<u8> },
    End { checksum: u32 },
}

/// A cheap (non-cryptographic) rolling checksum, used only to catch
/// transcription/bit-rot errors when applying a delta, not as a security
/// boundary.
fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 1;
    let mut sum2: u32 = 0;
    for &b in data {
        sum1 = (sum1 + u32::from(b)) % 65521;
        sum2 = (sum2 + sum1) % 65521;
    }
    (sum2 << 16) | sum1
}

/// Encodes `target` as a delta against `source`. The result round-trips via
/// [`apply`]: `apply(delta(source, target), source) == target` for any pair
/// of byte strings (spec. §8, invariant 3).
pub fn encode(source: &[u8], target: &[u8]) -> Vec<u8> {
    let commands = diff_commands(source, target);
    serialize(&commands, target)
}

/// Returns the encoded size `encode(source, target)` would produce, without
/// allocating the serialized form twice. Used by the store to decide whether
/// delta storage beats raw storage (spec. §4.B `size_ratio`).
pub fn encoded_len(source: &[u8], target: &[u8]) -> usize {
    let commands = diff_commands(source, target);
    estimate_len(&commands)
}

fn diff_commands(source: &[u8], target: &[u8]) -> Vec<Command> {
    if source.is_empty() || target.len() < BLOCK_SIZE {
        return vec![Command::Insert {
            bytes: target.to_vec(),
        }];
    }

    let mut blocks: HashMap<&[u8], u32> = HashMap::new();
    // Earlier (lower-offset) blocks win ties so matches prefer the start of
    // the source, keeping copies contiguous when the source is a prefix of
    // the target (the common "append a line" case).
    for (i, chunk) in source.chunks(BLOCK_SIZE).enumerate() {
        if chunk.len() == BLOCK_SIZE {
            blocks.entry(chunk).or_insert((i * BLOCK_SIZE) as u32);
        }
    }

    let mut commands = Vec::new();
    let mut literal = Vec::new();
    let mut i = 0;
    while i < target.len() {
        let matched = if i + BLOCK_SIZE <= target.len() {
            blocks.get(&target[i..i + BLOCK_SIZE]).copied()
        } else {
            None
        };
        match matched {
            Some(src_off) => {
                if !literal.is_empty() {
                    commands.push(Command::Insert {
                        bytes: std::mem::take(&mut literal),
                    });
                }
                // Extend the match forwards as far as both sides agree.
                let mut len = BLOCK_SIZE;
                while i + len < target.len()
                    && (src_off as usize) + len < source.len()
                    && source[src_off as usize + len] == target[i + len]
                {
                    len += 1;
                }
                commands.push(Command::Copy {
                    offset: src_off,
                    len: len as u32,
                });
                i += len;
            }
            None => {
                literal.push(target[i]);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        commands.push(Command::Insert { bytes: literal });
    }
    commands
}

fn estimate_len(commands: &[Command]) -> usize {
    let mut len = 0;
    for c in commands {
        len += match c {
            Command::Copy { .. } => 1 + 4 + 4,
            Command::Insert { bytes } => 1 + 4 + bytes.len(),
            Command::End { .. } => 1 + 4,
        };
    }
    len + 1 + 4 // trailing End command
}

const TAG_COPY: u8 = 0;
const TAG_INSERT: u8 = 1;
const TAG_END: u8 = 2;

fn serialize(commands: &[Command], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(estimate_len(commands));
    for c in commands {
        match c {
            Command::Copy { offset, len } => {
                out.push(TAG_COPY);
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(&len.to_be_bytes());
            }
            Command::Insert { bytes } => {
                out.push(TAG_INSERT);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            Command::End { .. } => unreachable!("End is appended once below"),
        }
    }
    out.push(TAG_END);
    out.extend_from_slice(&fletcher32(target).to_be_bytes());
    out
}

/// Applies a delta produced by [`encode`] to `source`, reconstructing the
/// target bytes. Iterative by construction: this function does not
/// recurse, so a deep chain of deltas (walked one [`apply`] call per link by
/// the store) cannot stack-overflow regardless of chain depth.
pub fn apply(delta: &[u8], source: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        let tag = *delta.get(i).ok_or(DeltaError::Truncated)?;
        i += 1;
        match tag {
            TAG_COPY => {
                let offset = read_u32(delta, &mut i)?;
                let len = read_u32(delta, &mut i)?;
                let start = offset as usize;
                let end = start + len as usize;
                if end > source.len() {
                    return Err(DeltaError::OutOfRange {
                        offset,
                        len,
                        source_len: source.len(),
                    });
                }
                out.extend_from_slice(&source[start..end]);
            }
            TAG_INSERT => {
                let len = read_u32(delta, &mut i)?;
                let end = i + len as usize;
                let bytes = delta.get(i..end).ok_or(DeltaError::Truncated)?;
                out.extend_from_slice(bytes);
                i = end;
            }
            TAG_END => {
                let expected = read_u32(delta, &mut i)?;
                let actual = fletcher32(&out);
                if expected != actual {
                    return Err(DeltaError::ChecksumMismatch { expected, actual });
                }
                return Ok(out);
            }
            _ => return Err(DeltaError::Truncated),
        }
    }
}

fn read_u32(delta: &[u8], i: &mut usize) -> Result<u32, DeltaError> {
    let bytes = delta.get(*i..*i + 4).ok_or(DeltaError::Truncated)?;
    *i += 4;
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(source: &[u8], target: &[u8]) {
        let d = encode(source, target);
        assert_eq!(apply(&d, source).unwrap(), target);
    }

    #[test]
    fn empty_source_is_pure_insert() {
        roundtrip(b"", b"hello world");
    }

    #[test]
    fn identical_content() {
        let data = b"the quick brown fox jumps over the lazy dog, repeatedly, for padding";
        roundtrip(data, data);
    }

    #[test]
    fn append_only_is_small() {
        let source = b"hello\n".repeat(10);
        let mut target = source.clone();
        target.extend_from_slice(b"world\n");
        let d = encode(&source, &target);
        assert!(d.len() < target.len());
        assert_eq!(apply(&d, &source).unwrap(), target);
    }

    #[test]
    fn unrelated_content_still_roundtrips() {
        roundtrip(b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
    }

    #[test]
    fn apply_detects_truncation() {
        assert_eq!(apply(&[TAG_COPY, 0, 0], b"abc"), Err(DeltaError::Truncated));
    }

    #[test]
    fn apply_detects_out_of_range_copy() {
        let mut bad = vec![TAG_COPY];
        bad.extend_from_slice(&100u32.to_be_bytes());
        bad.extend_from_slice(&4u32.to_be_bytes());
        bad.push(TAG_END);
        bad.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(apply(&bad, b"short"), Err(DeltaError::OutOfRange { .. })));
    }

    #[test]
    fn apply_detects_checksum_mismatch() {
        let mut d = encode(b"source text here", b"target text here!!");
        let last4 = d.len() - 4;
        d[last4] ^= 0xff;
        assert!(matches!(
            apply(&d, b"source text here"),
            Err(DeltaError::ChecksumMismatch { .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn apply_delta_encode_is_identity(source in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..500),
                                            target in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..500)) {
            let d = encode(&source, &target);
            proptest::prop_assert_eq!(apply(&d, &source).unwrap(), target);
        }
    }
}
