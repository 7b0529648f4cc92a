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

//! Component C: the manifest card grammar.
//!
//! A manifest is a line-oriented, sorted, canonical text; [`Manifest::parse`]
//! is a strict hand-written recursive-descent scanner over [`Buffer`]
//! (rather than a grammar-engine crate like `pest`: the grammar is eight
//! line-initial tags with no recursive structure, which a scanner expresses
//! more directly than a PEG would). [`Manifest::serialize`] is the inverse
//! and must reproduce the exact bytes a well-formed manifest parsed from
//! (spec. §6 "Re-emitting a parsed manifest must be byte-identical").

use md5::Digest as _;
use md5::Md5;
use thiserror::Error;

use crate::blob::Buffer;
use crate::index::TagKind;
use crate::time::Timestamp;
use crate::uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("line {line}: unknown card type {card:?}")]
    UnknownCard { line: usize, card: char },
    #[error("line {line}: cards are out of order (card {card:?} follows a later card type)")]
    OutOfOrder { line: usize, card: char },
    #[error("line {line}: duplicate {card:?} card")]
    DuplicateCard { line: usize, card: char },
    #[error("line {line}: F cards are not in sorted order")]
    UnsortedFiles { line: usize },
    #[error("line {line}: malformed {card:?} card: {reason}")]
    Malformed { line: usize, card: char, reason: String },
    #[error("path {0:?} is not a valid repository path")]
    InvalidPath(String),
    #[error("manifest has no trailing Z card")]
    MissingChecksum,
    #[error("Z card checksum does not match manifest content")]
    ChecksumMismatch,
}

/// Executable/symlink bit carried by an `F` card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePerm {
    Regular,
    Executable,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCard {
    pub path: String,
    /// Absent for a delta manifest entry recording a deletion.
    pub uuid: Option<Uuid>,
    pub perm: FilePerm,
    /// Present if this entry renames a file from `old_path`.
    pub old_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCard {
    pub kind: TagKind,
    pub name: String,
    pub target: Uuid,
    pub value: Option<String>,
}

/// A fully parsed manifest: one of spec. §2's manifest-kind artifacts
/// (check-in, cluster, control, ticket-change, wiki-change), all sharing this
/// one card grammar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub comment: Option<String>,
    pub date: Option<Timestamp>,
    pub files: Vec<FileCard>,
    /// First element is the primary parent.
    pub parents: Vec<Uuid>,
    /// `R` card: MD5 hex digest of the resulting file tree.
    pub tree_checksum: Option<String>,
    pub tags: Vec<TagCard>,
    pub user: Option<String>,
}

/// Rank used to enforce card ordering; repeatable cards share a rank.
fn card_rank(card: char) -> Option<u8> {
    match card {
        'C' => Some(0),
        'D' => Some(1),
        'F' => Some(2),
        'P' => Some(3),
        'R' => Some(4),
        'T' => Some(5),
        'U' => Some(6),
        'Z' => Some(7),
        _ => None,
    }
}

fn is_singleton(card: char) -> bool {
    matches!(card, 'C' | 'D' | 'R' | 'U' | 'Z')
}

/// Validates a repository-relative path: no `..` components, no leading
/// `/`, no NUL, `/`-separated (spec. §4.C).
fn validate_path(path: &str) -> Result<(), ManifestError> {
    if path.is_empty()
        || path.starts_with('/')
        || path.contains('\0')
        || path.split('/').any(|part| part == "." || part == "..")
    {
        return Err(ManifestError::InvalidPath(path.to_string()));
    }
    Ok(())
}

impl Manifest {
    /// Parses `bytes` as a manifest, enforcing strict card ordering, path
    /// validation, and the trailing `Z` self-checksum.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        if !bytes.ends_with(b"\n") {
            return Err(ManifestError::MissingChecksum);
        }
        let checksum_start = find_z_card_start(bytes).ok_or(ManifestError::MissingChecksum)?;
        let body = &bytes[..checksum_start];
        let z_line = &bytes[checksum_start..];

        let expected = parse_z_value(z_line)?;
        let mut hasher = Md5::new();
        hasher.update(body);
        let actual = hex_lower(&hasher.finalize());
        if actual != expected {
            return Err(ManifestError::ChecksumMismatch);
        }

        let mut manifest = Self::default();
        let mut last_rank = 0u8;
        let mut seen_singleton = [false; 8];
        let mut buf = Buffer::from_bytes(body.to_vec());
        let mut line_no = 0usize;
        let mut last_file_path: Option<String> = None;

        while let Some(line) = buf.get_line() {
            line_no += 1;
            let line = strip_newline(line);
            if line.is_empty() {
                continue;
            }
            let card = line[0] as char;
            let rank = card_rank(card).ok_or(ManifestError::UnknownCard { line: line_no, card })?;
            if rank < last_rank {
                return Err(ManifestError::OutOfOrder { line: line_no, card });
            }
            if is_singleton(card) {
                if seen_singleton[rank as usize] {
                    return Err(ManifestError::DuplicateCard { line: line_no, card });
                }
                seen_singleton[rank as usize] = true;
            }
            last_rank = rank;

            let rest = std::str::from_utf8(&line[1..])
                .map_err(|_| malformed(line_no, card, "non-UTF-8 card body"))?
                .trim_start();
            match card {
                'C' => manifest.comment = Some(unescape_card_text(rest)),
                'D' => {
                    manifest.date = Some(
                        Timestamp::parse_iso8601(rest)
                            .ok_or_else(|| malformed(line_no, card, "invalid ISO-8601 date"))?,
                    );
                }
                'F' => {
                    let file = parse_file_card(rest, line_no)?;
                    if last_file_path.as_deref().is_some_and(|p| p >= file.path.as_str()) {
                        return Err(ManifestError::UnsortedFiles { line: line_no });
                    }
                    last_file_path = Some(file.path.clone());
                    manifest.files.push(file);
                }
                'P' => {
                    for tok in rest.split_whitespace() {
                        let uuid = Uuid::try_from_hex(tok)
                            .ok_or_else(|| malformed(line_no, card, "invalid parent UUID"))?;
                        manifest.parents.push(uuid);
                    }
                }
                'R' => manifest.tree_checksum = Some(rest.to_string()),
                'T' => manifest.tags.push(parse_tag_card(rest, line_no)?),
                'U' => manifest.user = Some(unescape_card_text(rest)),
                'Z' => unreachable!("Z card is consumed before the scan loop"),
                _ => unreachable!("unknown cards rejected above"),
            }
        }
        Ok(manifest)
    }

    /// Re-emits this manifest as canonical bytes, computing a fresh `Z`
    /// checksum. Round-trips byte-identically for any manifest produced by
    /// [`Manifest::parse`].
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(comment) = &self.comment {
            out.extend_from_slice(b"C ");
            out.extend_from_slice(escape_card_text(comment).as_bytes());
            out.push(b'\n');
        }
        if let Some(date) = self.date {
            out.extend_from_slice(b"D ");
            out.extend_from_slice(date.to_iso8601().as_bytes());
            out.push(b'\n');
        }
        let mut files = self.files.clone();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        for file in &files {
            out.extend_from_slice(b"F ");
            out.extend_from_slice(file.path.as_bytes());
            if let Some(uuid) = file.uuid {
                out.push(b' ');
                out.extend_from_slice(uuid.hex().as_bytes());
                match file.perm {
                    FilePerm::Regular => {}
                    FilePerm::Executable => out.extend_from_slice(b" x"),
                    FilePerm::Symlink => out.extend_from_slice(b" l"),
                }
                if let Some(old) = &file.old_path {
                    out.push(b' ');
                    out.extend_from_slice(old.as_bytes());
                }
            }
            out.push(b'\n');
        }
        if !self.parents.is_empty() {
            out.extend_from_slice(b"P ");
            let rendered = self.parents.iter().map(Uuid::hex).collect::<Vec<_>>().join(" ");
            out.extend_from_slice(rendered.as_bytes());
            out.push(b'\n');
        }
        if let Some(checksum) = &self.tree_checksum {
            out.extend_from_slice(b"R ");
            out.extend_from_slice(checksum.as_bytes());
            out.push(b'\n');
        }
        for tag in &self.tags {
            out.extend_from_slice(&serialize_tag_card(tag));
            out.push(b'\n');
        }
        if let Some(user) = &self.user {
            out.extend_from_slice(b"U ");
            out.extend_from_slice(escape_card_text(user).as_bytes());
            out.push(b'\n');
        }
        let mut hasher = Md5::new();
        hasher.update(&out);
        out.extend_from_slice(b"Z ");
        out.extend_from_slice(hex_lower(&hasher.finalize()).as_bytes());
        out.push(b'\n');
        out
    }
}

fn malformed(line: usize, card: char, reason: &str) -> ManifestError {
    ManifestError::Malformed {
        line,
        card,
        reason: reason.to_string(),
    }
}

fn strip_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

fn find_z_card_start(bytes: &[u8]) -> Option<usize> {
    let mut start = 0;
    let mut last_z_line_start = None;
    for (i, window) in bytes.windows(1).enumerate() {
        if window[0] == b'\n' {
            let line = &bytes[start..=i];
            if line.first() == Some(&b'Z') {
                last_z_line_start = Some(start);
            }
            start = i + 1;
        }
    }
    last_z_line_start
}

fn parse_z_value(z_line: &[u8]) -> Result<String, ManifestError> {
    let line = strip_newline(z_line);
    let rest = std::str::from_utf8(&line[1..])
        .map_err(|_| ManifestError::Malformed {
            line: 0,
            card: 'Z',
            reason: "non-UTF-8 checksum".to_string(),
        })?
        .trim();
    Ok(rest.to_lowercase())
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn parse_file_card(rest: &str, line_no: usize) -> Result<FileCard, ManifestError> {
    let mut parts = rest.split_whitespace();
    let path = parts
        .next()
        .ok_or_else(|| malformed(line_no, 'F', "missing path"))?
        .to_string();
    validate_path(&path).map_err(|_| malformed(line_no, 'F', "invalid path"))?;

    let uuid_tok = parts.next();
    let uuid = uuid_tok
        .map(|tok| Uuid::try_from_hex(tok).ok_or_else(|| malformed(line_no, 'F', "invalid content UUID")))
        .transpose()?;

    let mut perm = FilePerm::Regular;
    let mut old_path = None;
    for tok in parts {
        match tok {
            "x" => perm = FilePerm::Executable,
            "l" => perm = FilePerm::Symlink,
            other => {
                validate_path(other).map_err(|_| malformed(line_no, 'F', "invalid old path"))?;
                old_path = Some(other.to_string());
            }
        }
    }
    Ok(FileCard {
        path,
        uuid,
        perm,
        old_path,
    })
}

fn parse_tag_card(rest: &str, line_no: usize) -> Result<TagCard, ManifestError> {
    let (kind_char, rest) = rest
        .split_at_checked(1)
        .ok_or_else(|| malformed(line_no, 'T', "empty tag card"))?;
    let kind = match kind_char {
        "+" => TagKind::Singleton,
        "-" => TagKind::Cancel,
        "*" => TagKind::Propagating,
        other => {
            return Err(malformed(line_no, 'T', &format!("unknown tag operator {other:?}")));
        }
    };
    let mut parts = rest.trim_start().split_whitespace();
    let name = parts
        .next()
        .ok_or_else(|| malformed(line_no, 'T', "missing tag name"))?
        .to_string();
    let target_tok = parts
        .next()
        .ok_or_else(|| malformed(line_no, 'T', "missing tag target"))?;
    let target =
        Uuid::try_from_hex(target_tok).ok_or_else(|| malformed(line_no, 'T', "invalid tag target UUID"))?;
    let value = parts.next().map(str::to_string);
    Ok(TagCard {
        kind,
        name,
        target,
        value,
    })
}

fn serialize_tag_card(tag: &TagCard) -> Vec<u8> {
    let op = match tag.kind {
        TagKind::Singleton => '+',
        TagKind::Cancel => '-',
        TagKind::Propagating => '*',
    };
    let mut s = format!("T {op}{} {}", tag.name, tag.target.hex());
    if let Some(value) = &tag.value {
        s.push(' ');
        s.push_str(value);
    }
    s.into_bytes()
}

/// `C`/`U` card text uses `\s`/`\n` escapes so a multi-line comment still
/// fits on one card line.
fn escape_card_text(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\n', "\\n").replace(' ', "\\s")
}

fn unescape_card_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('s') => out.push(' '),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_uuid(seed: &str) -> Uuid {
        Uuid::hash(seed.as_bytes())
    }

    #[test]
    fn roundtrip_minimal_manifest() {
        let mut m = Manifest {
            comment: Some("initial commit".to_string()),
            date: Timestamp::parse_iso8601("2024-01-01T00:00:00Z"),
            ..Default::default()
        };
        m.files.push(FileCard {
            path: "a.txt".to_string(),
            uuid: Some(sample_uuid("a")),
            perm: FilePerm::Regular,
            old_path: None,
        });
        m.user = Some("alice".to_string());

        let bytes = m.serialize();
        let parsed = Manifest::parse(&bytes).unwrap();
        assert_eq!(parsed, m);
        // Re-serializing the parsed form must reproduce the exact bytes.
        assert_eq!(parsed.serialize(), bytes);
    }

    #[test]
    fn rejects_out_of_order_cards() {
        // U (rank 6) followed by C (rank 0) violates card ordering,
        // independent of what the checksum says.
        let body = "U alice\nC late-comment\n";
        let mut hasher = Md5::new();
        hasher.update(body.as_bytes());
        let z = hex_lower(&hasher.finalize());
        let manifest_bytes = format!("{body}Z {z}\n");
        assert!(matches!(
            Manifest::parse(manifest_bytes.as_bytes()),
            Err(ManifestError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn rejects_unsorted_file_cards() {
        let a = sample_uuid("a");
        let b = sample_uuid("b");
        let body = format!("F z.txt {}\nF a.txt {}\n", a.hex(), b.hex());
        let mut hasher = Md5::new();
        hasher.update(body.as_bytes());
        let z = hex_lower(&hasher.finalize());
        let manifest_bytes = format!("{body}Z {z}\n");
        assert!(matches!(
            Manifest::parse(manifest_bytes.as_bytes()),
            Err(ManifestError::UnsortedFiles { .. })
        ));
    }

    #[test]
    fn rejects_bad_checksum() {
        let body = "C hello\n";
        let manifest_bytes = format!("{body}Z 0000000000000000000000000000000\n");
        assert!(matches!(
            Manifest::parse(manifest_bytes.as_bytes()),
            Err(ManifestError::ChecksumMismatch)
        ));
    }

    #[test]
    fn rejects_invalid_paths() {
        assert!(validate_path("../escape").is_err());
        assert!(validate_path("/absolute").is_err());
        assert!(validate_path("has\0nul").is_err());
        assert!(validate_path("fine/path.txt").is_ok());
    }

    #[test]
    fn parses_tag_cards() {
        let target = sample_uuid("target");
        let body = format!("T +release {} 1.0\n", target.hex());
        let mut hasher = Md5::new();
        hasher.update(body.as_bytes());
        let z = hex_lower(&hasher.finalize());
        let manifest_bytes = format!("{body}Z {z}\n");
        let m = Manifest::parse(manifest_bytes.as_bytes()).unwrap();
        assert_eq!(m.tags.len(), 1);
        assert_eq!(m.tags[0].kind, TagKind::Singleton);
        assert_eq!(m.tags[0].name, "release");
        assert_eq!(m.tags[0].value.as_deref(), Some("1.0"));
    }
}
