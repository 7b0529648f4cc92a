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

//! Hex string helpers used to render and parse 40-digit artifact UUIDs.

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decodes a full, even-length hex string into bytes.
pub fn decode_hex(hex: impl AsRef<[u8]>) -> Option<Vec<u8>> {
    let hex = hex.as_ref();
    if hex.len() % 2 != 0 {
        return None;
    }
    let (decoded, _) = decode_hex_prefix(hex)?;
    Some(decoded)
}

/// Decodes a hex string that may have an odd trailing nibble. Returns
/// `(bytes, has_odd_byte)`; for an odd-length input the final byte has its
/// low nibble zero-filled (e.g. the prefix `"abc"` decodes to `[0xab, 0xc0]`
/// with `has_odd_byte = true`).
pub fn decode_hex_prefix(hex: &[u8]) -> Option<(Vec<u8>, bool)> {
    let mut decoded = Vec::with_capacity(usize::div_ceil(hex.len(), 2));
    let mut chunks = hex.chunks_exact(2);
    for chunk in &mut chunks {
        let [hi, lo] = chunk.try_into().unwrap();
        decoded.push(hex_value(hi)? << 4 | hex_value(lo)?);
    }
    if let &[hi] = chunks.remainder() {
        decoded.push(hex_value(hi)? << 4);
        Some((decoded, true))
    } else {
        Some((decoded, false))
    }
}

/// Encodes `data` as a lowercase hex string.
pub fn encode_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// Returns whether every byte of `s` is an ASCII hex digit (`0-9a-fA-F`),
/// without requiring UTF-8 validity of the surrounding buffer. Used by the
/// blob layer's hex-validation primitive (spec. component A).
pub fn is_hex_bytes(s: &[u8]) -> bool {
    !s.is_empty() && s.iter().all(|&b| hex_value(b).is_some())
}

/// Calculates the common prefix length of two byte sequences, expressed as a
/// count of hexadecimal digits (so a difference in the low nibble of a
/// shared byte still counts as one matching digit).
pub fn common_hex_len(bytes_a: &[u8], bytes_b: &[u8]) -> usize {
    std::iter::zip(bytes_a, bytes_b)
        .enumerate()
        .find_map(|(i, (a, b))| match a ^ b {
            0 => None,
            d if d & 0xf0 == 0 => Some(i * 2 + 1),
            _ => Some(i * 2),
        })
        .unwrap_or_else(|| bytes_a.len().min(bytes_b.len()) * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_encode_roundtrip() {
        let bytes = b"\x01\x23\x45\x67\x89\xab\xcd\xef";
        assert_eq!(encode_hex(bytes), "0123456789abcdef");
        assert_eq!(decode_hex("0123456789abcdef"), Some(bytes.to_vec()));
    }

    #[test]
    fn odd_length_prefix() {
        assert_eq!(decode_hex_prefix(b"abc"), Some((vec![0xab, 0xc0], true)));
        assert_eq!(decode_hex_prefix(b"abcd"), Some((vec![0xab, 0xcd], false)));
        assert_eq!(decode_hex_prefix(b""), Some((vec![], false)));
    }

    #[test]
    fn rejects_non_hex() {
        assert_eq!(decode_hex("zz"), None);
        assert!(!is_hex_bytes(b"zz"));
        assert!(is_hex_bytes(b"deadBEEF"));
    }

    #[test]
    fn common_len() {
        assert_eq!(common_hex_len(b"\xab\xcd", b"\xab\xce"), 3);
        assert_eq!(common_hex_len(b"\xab\xcd", b"\xab\xcd"), 4);
        assert_eq!(common_hex_len(b"\x00", b"\xf0"), 0);
    }
}
