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

//! Line-oriented diff, the building block [`crate::merge`] uses to find the
//! hunks two versions of a file disagree about.

use bstr::BStr;
use bstr::ByteSlice as _;

/// One line-level edit between a `before` and `after` sequence of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp<'a> {
    /// The same line appears in both sequences.
    Equal(&'a BStr),
    /// The line is only in `before`.
    Delete(&'a BStr),
    /// The line is only in `after`.
    Insert(&'a BStr),
}

/// Splits `content` into lines, each line keeping its trailing `\n` (the last
/// line keeps none if the content doesn't end in one).
pub(crate) fn split_lines(content: &[u8]) -> Vec<&BStr> {
    if content.is_empty() {
        return Vec::new();
    }
    content.split_inclusive(|&b| b == b'\n').map(BStr::new).collect()
}

/// Computes a line-level diff between `before` and `after` via the classic
/// longest-common-subsequence dynamic program. Quadratic in the number of
/// lines; fine for the file sizes this crate's merge engine is expected to
/// handle, per spec. §4.F (binary files never reach this function).
pub fn diff_lines<'a>(before: &'a [u8], after: &'a [u8]) -> Vec<DiffOp<'a>> {
    let a = split_lines(before);
    let b = split_lines(after);
    let lcs_table = lcs_lengths(&a, &b);
    backtrack(&lcs_table, &a, &b, 0, 0)
}

fn lcs_lengths(a: &[&BStr], b: &[&BStr]) -> Vec<Vec<u32>> {
    let mut table = vec![vec![0u32; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }
    table
}

fn backtrack<'a>(
    table: &[Vec<u32>],
    a: &[&'a BStr],
    b: &[&'a BStr],
    mut i: usize,
    mut j: usize,
) -> Vec<DiffOp<'a>> {
    let mut ops = Vec::new();
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            ops.push(DiffOp::Equal(a[i]));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push(DiffOp::Delete(a[i]));
            i += 1;
        } else {
            ops.push(DiffOp::Insert(b[j]));
            j += 1;
        }
    }
    while i < a.len() {
        ops.push(DiffOp::Delete(a[i]));
        i += 1;
    }
    while j < b.len() {
        ops.push(DiffOp::Insert(b[j]));
        j += 1;
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(ops: &[DiffOp<'_>]) -> Vec<(char, &str)> {
        ops.iter()
            .map(|op| match op {
                DiffOp::Equal(l) => (' ', l.to_str().unwrap()),
                DiffOp::Delete(l) => ('-', l.to_str().unwrap()),
                DiffOp::Insert(l) => ('+', l.to_str().unwrap()),
            })
            .collect()
    }

    #[test]
    fn identical_content_is_all_equal() {
        let ops = diff_lines(b"a\nb\nc\n", b"a\nb\nc\n");
        assert!(ops.iter().all(|op| matches!(op, DiffOp::Equal(_))));
    }

    #[test]
    fn single_line_change() {
        let ops = diff_lines(b"a\nb\nc\n", b"a\nx\nc\n");
        assert_eq!(
            render(&ops),
            vec![(' ', "a\n"), ('-', "b\n"), ('+', "x\n"), (' ', "c\n")]
        );
    }

    #[test]
    fn pure_insertion() {
        let ops = diff_lines(b"a\nc\n", b"a\nb\nc\n");
        assert_eq!(render(&ops), vec![(' ', "a\n"), ('+', "b\n"), (' ', "c\n")]);
    }

    #[test]
    fn empty_before() {
        let ops = diff_lines(b"", b"a\nb\n");
        assert_eq!(render(&ops), vec![('+', "a\n"), ('+', "b\n")]);
    }

    #[test]
    fn trailing_line_without_newline() {
        let ops = diff_lines(b"a\nb", b"a\nb\n");
        assert_eq!(render(&ops), vec![(' ', "a\n"), ('-', "b"), ('+', "b\n")]);
    }
}
