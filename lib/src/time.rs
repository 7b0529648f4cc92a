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

//! Timestamps. Manifest `D` cards are ISO-8601; every other subsystem
//! (indexer, resolver, graph) works with the parsed form so ordering and
//! arithmetic don't need to re-parse strings.

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Author-supplied event time. Author-supplied means it may lie (spec. §3,
/// invariant 7); callers that need a trustworthy ordering use
/// [`Timestamp::clamp_after`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Parses a manifest `D` card's ISO-8601 value.
    pub fn parse_iso8601(s: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Renders in the canonical form a manifest `D` card re-emits.
    pub fn to_iso8601(self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Returns `self` if it is not earlier than `parent`, else `parent`.
    /// Consumers use this to monotonize a child's declared mtime against its
    /// primary parent on read, per spec. §3 invariant 7, without rewriting
    /// the stored (author-supplied) value.
    pub fn clamp_after(self, parent: Self) -> Self {
        self.max(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_roundtrip() {
        let t = Timestamp::parse_iso8601("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(t.to_iso8601(), "2024-01-02T03:04:05Z");
    }

    #[test]
    fn clamp_after_monotonizes() {
        let parent = Timestamp::parse_iso8601("2024-01-02T00:00:00Z").unwrap();
        let liar = Timestamp::parse_iso8601("2023-01-01T00:00:00Z").unwrap();
        assert_eq!(liar.clamp_after(parent), parent);

        let honest = Timestamp::parse_iso8601("2024-06-01T00:00:00Z").unwrap();
        assert_eq!(honest.clamp_after(parent), honest);
    }

    #[test]
    fn rejects_non_iso8601() {
        assert_eq!(Timestamp::parse_iso8601("not a date"), None);
    }
}
