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

//! Component F: the three-way merge engine.
//!
//! [`merge_three_way`] merges file content; [`select_file_action`] decides,
//! per path, whether a file needs merging at all (spec. §4.F's action
//! table) before the line-level merge ever runs.

use bstr::BStr;
use globset::GlobSet;

use crate::diff::DiffOp;
use crate::diff::diff_lines;
use crate::error::ConflictCount;
use crate::uuid::Uuid;

const CONFLICT_MARKER_LEN: usize = 7;

/// Outcome of a single three-way file merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub content: Vec<u8>,
    pub conflicts: ConflictCount,
}

pub type MergeResult = MergeOutcome;

/// Labels embedded in conflict marker blocks, identifying each side in
/// diagnostics (spec. §4.F "emit a conflict marker block").
#[derive(Debug, Clone, Copy)]
pub struct MergeLabels<'a> {
    pub v: &'a str,
    pub pivot: &'a str,
    pub m: &'a str,
}

impl Default for MergeLabels<'static> {
    fn default() -> Self {
        Self {
            v: "working",
            pivot: "ancestor",
            m: "merge",
        }
    }
}

/// Heuristically classifies `content` as binary: a NUL byte within the first
/// 8000 bytes, or a match against a user-declared glob (spec. §4.F
/// "Binary files (detected by matching a user-provided glob pattern or
/// content heuristic)").
pub fn is_binary(path: &str, content: &[u8], binary_globs: Option<&GlobSet>) -> bool {
    if binary_globs.is_some_and(|set| set.is_match(path)) {
        return true;
    }
    content.iter().take(8000).any(|&b| b == 0)
}

/// Three-way text merge: diffs `pivot→v` and `pivot→m` at line granularity,
/// taking a changed line from whichever side changed it, and conflicting
/// where both sides touch the same region differently (spec. §4.F "Three-way
/// text merge algorithm").
pub fn merge_three_way(pivot: &[u8], v: &[u8], m: &[u8], labels: MergeLabels) -> MergeOutcome {
    if v == m {
        return MergeOutcome {
            content: v.to_vec(),
            conflicts: ConflictCount(0),
        };
    }
    if pivot == v {
        return MergeOutcome {
            content: m.to_vec(),
            conflicts: ConflictCount(0),
        };
    }
    if pivot == m {
        return MergeOutcome {
            content: v.to_vec(),
            conflicts: ConflictCount(0),
        };
    }

    let v_ops = diff_lines(pivot, v);
    let m_ops = diff_lines(pivot, m);
    let v_hunks = group_by_pivot_line(&v_ops);
    let m_hunks = group_by_pivot_line(&m_ops);
    let pivot_lines = crate::diff::split_lines(pivot);

    let mut out = Vec::new();
    let mut conflicts = 0usize;
    let mut vi = 0;
    let mut mi = 0;
    // Pivot-line cursor: every line up to (not including) this index has
    // already been emitted, either as an unchanged pivot line or as part of
    // a hunk's replacement.
    let mut pos = 0usize;
    while vi < v_hunks.len() || mi < m_hunks.len() {
        let v_hunk = v_hunks.get(vi);
        let m_hunk = m_hunks.get(mi);
        let next_start = match (v_hunk, m_hunk) {
            (Some(vh), Some(mh)) => vh.pivot.min(mh.pivot),
            (Some(vh), None) => vh.pivot,
            (None, Some(mh)) => mh.pivot,
            (None, None) => unreachable!(),
        };
        if pos < next_start {
            emit(&mut out, &pivot_lines[pos..next_start]);
            pos = next_start;
        }
        match (v_hunk, m_hunk) {
            (Some(vh), Some(mh)) if vh.pivot == mh.pivot => {
                if vh.replacement == mh.replacement {
                    emit(&mut out, &vh.replacement);
                } else {
                    emit_conflict(&mut out, labels, &vh.replacement, &vh.pivot_text, &mh.replacement);
                    conflicts += 1;
                }
                pos = vh.pivot + vh.pivot_text.len().max(mh.pivot_text.len());
                vi += 1;
                mi += 1;
            }
            (Some(vh), Some(mh)) if vh.pivot < mh.pivot => {
                emit(&mut out, &vh.replacement);
                pos = vh.pivot + vh.pivot_text.len();
                vi += 1;
            }
            (Some(_), Some(mh)) => {
                emit(&mut out, &mh.replacement);
                pos = mh.pivot + mh.pivot_text.len();
                mi += 1;
            }
            (Some(vh), None) => {
                emit(&mut out, &vh.replacement);
                pos = vh.pivot + vh.pivot_text.len();
                vi += 1;
            }
            (None, Some(mh)) => {
                emit(&mut out, &mh.replacement);
                pos = mh.pivot + mh.pivot_text.len();
                mi += 1;
            }
            (None, None) => unreachable!(),
        }
    }
    if pos < pivot_lines.len() {
        emit(&mut out, &pivot_lines[pos..]);
    }

    MergeOutcome {
        content: out,
        conflicts: ConflictCount(conflicts),
    }
}

/// A contiguous pivot-line run that one side edited (possibly to nothing,
/// possibly to several lines), derived from a `pivot→side` line diff.
struct Hunk<'a> {
    /// Index, in pivot-line units, of this hunk — used to interleave the two
    /// sides' hunk streams in pivot order.
    pivot: usize,
    pivot_text: Vec<&'a BStr>,
    replacement: Vec<&'a BStr>,
}

/// Groups a `pivot→side` diff into runs of consecutive non-equal lines,
/// each tagged with the pivot-line offset it replaces.
fn group_by_pivot_line<'a>(ops: &[DiffOp<'a>]) -> Vec<Hunk<'a>> {
    let mut hunks = Vec::new();
    let mut pivot_index = 0usize;
    let mut i = 0;
    while i < ops.len() {
        match ops[i] {
            DiffOp::Equal(_) => {
                pivot_index += 1;
                i += 1;
            }
            DiffOp::Delete(_) | DiffOp::Insert(_) => {
                let start_pivot = pivot_index;
                let mut pivot_text = Vec::new();
                let mut replacement = Vec::new();
                while let Some(op) = ops.get(i) {
                    match op {
                        DiffOp::Delete(line) => {
                            pivot_text.push(*line);
                            pivot_index += 1;
                            i += 1;
                        }
                        DiffOp::Insert(line) => {
                            replacement.push(*line);
                            i += 1;
                        }
                        DiffOp::Equal(_) => break,
                    }
                }
                hunks.push(Hunk {
                    pivot: start_pivot,
                    pivot_text,
                    replacement,
                });
            }
        }
    }
    hunks
}

fn emit(out: &mut Vec<u8>, lines: &[&BStr]) {
    for line in lines {
        out.extend_from_slice(line);
    }
}

fn emit_conflict(out: &mut Vec<u8>, labels: MergeLabels, v: &[&BStr], pivot: &[&BStr], m: &[&BStr]) {
    out.extend_from_slice(format!("<{m} {label}\n", m = "<".repeat(CONFLICT_MARKER_LEN), label = labels.v).as_bytes());
    emit(out, v);
    out.extend_from_slice(format!("|{m} {label}\n", m = "|".repeat(CONFLICT_MARKER_LEN), label = labels.pivot).as_bytes());
    emit(out, pivot);
    out.extend_from_slice(format!("={m}\n", m = "=".repeat(CONFLICT_MARKER_LEN)).as_bytes());
    emit(out, m);
    out.extend_from_slice(format!(">{m} {label}\n", m = ">".repeat(CONFLICT_MARKER_LEN), label = labels.m).as_bytes());
}

/// What to do with one path during a three-way file merge, per spec. §4.F's
/// action table. `pivot`/`v`/`m` are each `Some(uuid)` if the path exists
/// with that content on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// No side changed the file relative to pivot (or only `m` did and
    /// fast-forwards cleanly): keep `v`'s bytes (or copy `m`'s — both collapse
    /// to "the result is whichever side differs from pivot").
    KeepOrFastForward,
    /// Both sides changed content: perform [`merge_three_way`].
    NeedsMerge,
    /// Present in pivot and `v`, absent in `m`: delete. `local_edits_lost` is
    /// set if `v` differs from `pivot` (spec.: "warn local edits lost").
    Delete { local_edits_lost: bool },
    /// Absent in pivot and `v`, present in `m`: add `m`'s content.
    Add,
    /// Present in pivot and `m` (absent in `v`), or absent in pivot and
    /// present on both `v` and `m` with different content: no common
    /// ancestor for this specific three-way shape (the path was
    /// independently deleted-and-readded, or independently added on both
    /// sides with disagreeing content) — a policy conflict, not a content
    /// conflict.
    NoCommonAncestorForPath,
    /// Absent on every side: nothing to do.
    Absent,
}

/// Selects a [`FileAction`] from the presence/identity of a path's content
/// hash on each side (spec. §4.F table). Equality is by content hash: two
/// sides "agree" on a path's content iff their `Uuid`s match.
pub fn select_file_action(pivot: Option<Uuid>, v: Option<Uuid>, m: Option<Uuid>) -> FileAction {
    match (pivot, v, m) {
        (None, None, None) => FileAction::Absent,
        (None, None, Some(_)) => FileAction::Add,
        (Some(_), Some(_), None) => FileAction::Delete {
            local_edits_lost: pivot != v,
        },
        (Some(_), None, None) => FileAction::Delete {
            local_edits_lost: false,
        },
        (Some(p), Some(vv), Some(mm)) => {
            if mm == p {
                FileAction::KeepOrFastForward
            } else if vv == p {
                FileAction::KeepOrFastForward
            } else if vv == mm {
                FileAction::KeepOrFastForward
            } else {
                FileAction::NeedsMerge
            }
        }
        (Some(_), None, Some(_)) => FileAction::NoCommonAncestorForPath,
        (None, Some(vv), Some(mm)) => {
            if vv == mm {
                FileAction::KeepOrFastForward
            } else {
                FileAction::NoCommonAncestorForPath
            }
        }
        // Absent in pivot, present (or not) in v, absent in m: nothing came
        // from m's side; v's own add/delete already reflects the final state.
        (None, _, None) => FileAction::Absent,
    }
}

#[cfg(test)]
mod tests {
    use bstr::ByteSlice as _;

    use super::*;

    #[test]
    fn identical_sides_are_clean() {
        let out = merge_three_way(b"a\nb\nc\n", b"a\nx\nc\n", b"a\nx\nc\n", MergeLabels::default());
        assert_eq!(out.content, b"a\nx\nc\n");
        assert!(out.conflicts.is_clean());
    }

    #[test]
    fn one_side_changed_takes_that_change() {
        let out = merge_three_way(b"a\nb\nc\n", b"a\nx\nc\n", b"a\nb\nc\n", MergeLabels::default());
        assert_eq!(out.content, b"a\nx\nc\n");
        assert!(out.conflicts.is_clean());
    }

    #[test]
    fn other_side_changed_takes_that_change() {
        let out = merge_three_way(b"a\nb\nc\n", b"a\nb\nc\n", b"a\ny\nc\n", MergeLabels::default());
        assert_eq!(out.content, b"a\ny\nc\n");
        assert!(out.conflicts.is_clean());
    }

    #[test]
    fn disjoint_changes_both_apply() {
        let out = merge_three_way(b"a\nb\nc\nd\n", b"x\nb\nc\nd\n", b"a\nb\nc\ny\n", MergeLabels::default());
        assert_eq!(out.content, b"x\nb\nc\ny\n");
        assert!(out.conflicts.is_clean());
    }

    #[test]
    fn disjoint_changes_preserve_surrounding_unchanged_lines() {
        // spec. §8 scenario (e): pivot `1..5`, V changes line 2, M changes
        // line 4 — every other line must survive untouched in the result.
        let out = merge_three_way(
            b"1\n2\n3\n4\n5\n",
            b"1\n2v\n3\n4\n5\n",
            b"1\n2\n3\n4m\n5\n",
            MergeLabels::default(),
        );
        assert_eq!(out.content, b"1\n2v\n3\n4m\n5\n");
        assert!(out.conflicts.is_clean());
    }

    #[test]
    fn overlapping_change_conflicts_but_keeps_surrounding_lines() {
        // spec. §8 scenario (e), extended: M additionally changes line 2,
        // producing a conflict on that line while lines 1, 3, 4m and 5 still
        // need to come through untouched.
        let out = merge_three_way(
            b"1\n2\n3\n4\n5\n",
            b"1\n2v\n3\n4\n5\n",
            b"1\n2m\n3\n4m\n5\n",
            MergeLabels::default(),
        );
        assert_eq!(out.conflicts, ConflictCount(1));
        let text = out.content.to_str().unwrap();
        assert!(text.starts_with("1\n"));
        assert!(text.contains("<<<<<<< working\n2v\n"));
        assert!(text.contains("|||||||"));
        assert!(text.contains("=======\n2m\n"));
        assert!(text.contains(">>>>>>> merge\n"));
        assert!(text.ends_with("3\n4m\n5\n"));
    }

    #[test]
    fn overlapping_changes_conflict() {
        let out = merge_three_way(b"a\n", b"b\n", b"c\n", MergeLabels::default());
        assert_eq!(out.conflicts, ConflictCount(1));
        let text = out.content.to_str().unwrap();
        assert!(text.contains("<<<<<<< working"));
        assert!(text.contains("=======\n"));
        assert!(text.contains(">>>>>>> merge"));
        assert!(text.contains("b\n"));
        assert!(text.contains("c\n"));
    }

    #[test]
    fn binary_detected_by_nul_byte() {
        assert!(is_binary("a.bin", b"\x00\x01\x02", None));
        assert!(!is_binary("a.txt", b"hello", None));
    }

    #[test]
    fn file_action_table() {
        let a = Uuid::hash(b"a");
        let b = Uuid::hash(b"b");
        let c = Uuid::hash(b"c");
        assert_eq!(select_file_action(Some(a), Some(a), Some(a)), FileAction::KeepOrFastForward);
        assert_eq!(select_file_action(Some(a), Some(a), Some(b)), FileAction::KeepOrFastForward);
        assert_eq!(select_file_action(Some(a), Some(b), Some(c)), FileAction::NeedsMerge);
        assert_eq!(
            select_file_action(Some(a), Some(a), None),
            FileAction::Delete { local_edits_lost: false }
        );
        assert_eq!(
            select_file_action(Some(a), Some(b), None),
            FileAction::Delete { local_edits_lost: true }
        );
        assert_eq!(select_file_action(None, None, Some(c)), FileAction::Add);
        assert_eq!(select_file_action(Some(a), None, Some(c)), FileAction::NoCommonAncestorForPath);
        assert_eq!(select_file_action(None, None, None), FileAction::Absent);
        assert_eq!(
            select_file_action(Some(a), None, None),
            FileAction::Delete { local_edits_lost: false }
        );
        assert_eq!(select_file_action(None, Some(b), Some(b)), FileAction::KeepOrFastForward);
        assert_eq!(select_file_action(None, Some(b), Some(c)), FileAction::NoCommonAncestorForPath);
    }
}
