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

//! The 160-bit content hash that identifies an artifact (spec. §3
//! "Identifiers"), plus hex-prefix matching used by the name resolver
//! (component D) to turn a shorthand hex string into a single artifact.

use std::fmt;

use blake2::Blake2bVar;
use digest::Update as _;
use digest::VariableOutput as _;
use serde::Deserialize;
use serde::Serialize;

use crate::hex_util;

/// Number of bytes in a [`Uuid`]: 160 bits, rendered as 40 lowercase hex
/// digits.
pub const UUID_LEN: usize = 20;

/// Content hash identifying an artifact. Two artifacts with the same bytes
/// have the same `Uuid`; every artifact is stored exactly once (spec. §3,
/// invariant 1).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uuid([u8; UUID_LEN]);

impl Uuid {
    /// Hashes `content` with BLAKE2b truncated to 160 bits. The hash
    /// algorithm only needs to be collision-resistant and deterministic; the
    /// truncated-BLAKE2b construction keeps this crate on the single hash
    /// family the rest of the dependency graph already pulls in.
    pub fn hash(content: &[u8]) -> Self {
        let mut hasher = Blake2bVar::new(UUID_LEN).expect("20 is a valid Blake2b output size");
        hasher.update(content);
        let mut out = [0u8; UUID_LEN];
        hasher
            .finalize_variable(&mut out)
            .expect("output buffer is exactly UUID_LEN bytes");
        Self(out)
    }

    pub fn from_bytes(bytes: [u8; UUID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; UUID_LEN] {
        &self.0
    }

    /// Parses a full 40-digit hex string. Returns `None` for any other
    /// length or for non-hex characters.
    pub fn try_from_hex(hex: impl AsRef<[u8]>) -> Option<Self> {
        let hex = hex.as_ref();
        if hex.len() != UUID_LEN * 2 {
            return None;
        }
        let bytes = hex_util::decode_hex(hex)?;
        Some(Self(bytes.try_into().ok()?))
    }

    pub fn hex(&self) -> String {
        hex_util::encode_hex(&self.0)
    }

    /// First 10 hex digits, the abbreviated form used in prose contexts
    /// (spec. §6 "UUID rendering").
    pub fn short(&self) -> String {
        self.hex()[..10].to_string()
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Uuid").field(&self.hex()).finish()
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.hex())
    }
}

/// A user-supplied hex prefix of 4 to 40 digits, used to shorthand a
/// [`Uuid`] (spec. §3 "a prefix of ≥4 hex digits uniquely identifying a
/// single artifact").
#[derive(Clone, PartialEq, Eq)]
pub struct UuidPrefix {
    min_prefix_bytes: Vec<u8>,
    has_odd_byte: bool,
    digit_len: usize,
}

impl UuidPrefix {
    pub fn try_from_hex(prefix: impl AsRef<[u8]>) -> Option<Self> {
        let prefix = prefix.as_ref();
        if prefix.is_empty() || prefix.len() > UUID_LEN * 2 {
            return None;
        }
        let (min_prefix_bytes, has_odd_byte) = hex_util::decode_hex_prefix(prefix)?;
        Some(Self {
            min_prefix_bytes,
            has_odd_byte,
            digit_len: prefix.len(),
        })
    }

    pub fn digit_len(&self) -> usize {
        self.digit_len
    }

    /// Returns whether this prefix matches `id`.
    pub fn matches(&self, id: &Uuid) -> bool {
        let id_bytes = id.as_bytes();
        let (maybe_odd, prefix) = self.split_odd_byte();
        if id_bytes.starts_with(prefix) {
            match maybe_odd {
                Some(odd) => matches!(id_bytes.get(prefix.len()), Some(v) if v & 0xf0 == odd),
                None => true,
            }
        } else {
            false
        }
    }

    fn split_odd_byte(&self) -> (Option<u8>, &[u8]) {
        if self.has_odd_byte {
            let (&odd, prefix) = self.min_prefix_bytes.split_last().unwrap();
            (Some(odd), prefix)
        } else {
            (None, &self.min_prefix_bytes)
        }
    }
}

impl fmt::Debug for UuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UuidPrefix({} digits)", self.digit_len)
    }
}

/// Outcome of matching a prefix (or any other ambiguous key) against a
/// collection of artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixResolution<T> {
    NoMatch,
    SingleMatch(T),
    AmbiguousMatch(usize),
}

impl<T> PrefixResolution<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PrefixResolution<U> {
        match self {
            Self::NoMatch => PrefixResolution::NoMatch,
            Self::SingleMatch(x) => PrefixResolution::SingleMatch(f(x)),
            Self::AmbiguousMatch(n) => PrefixResolution::AmbiguousMatch(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_40_hex_digits() {
        let a = Uuid::hash(b"hello\n");
        let b = Uuid::hash(b"hello\n");
        assert_eq!(a, b);
        assert_eq!(a.hex().len(), 40);
        assert!(a.hex().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn different_content_different_hash() {
        assert_ne!(Uuid::hash(b"a"), Uuid::hash(b"b"));
    }

    #[test]
    fn hex_roundtrip() {
        let id = Uuid::hash(b"round trip me");
        let hex = id.hex();
        assert_eq!(Uuid::try_from_hex(&hex), Some(id));
    }

    #[test]
    fn short_is_first_ten_digits() {
        let id = Uuid::hash(b"abbreviate me");
        assert_eq!(id.short(), &id.hex()[..10]);
    }

    #[test]
    fn prefix_matching() {
        let id = Uuid::try_from_hex("abc1230000000000000000000000000000000000").unwrap();
        assert!(UuidPrefix::try_from_hex("abc1").unwrap().matches(&id));
        assert!(UuidPrefix::try_from_hex("abc123").unwrap().matches(&id));
        assert!(!UuidPrefix::try_from_hex("abd").unwrap().matches(&id));
        assert!(!UuidPrefix::try_from_hex("abc1231").unwrap().matches(&id));
    }

    #[test]
    fn rejects_bad_prefixes() {
        assert_eq!(UuidPrefix::try_from_hex(""), None);
        assert_eq!(UuidPrefix::try_from_hex("zz"), None);
        assert_eq!(UuidPrefix::try_from_hex("a".repeat(41)), None);
    }
}
