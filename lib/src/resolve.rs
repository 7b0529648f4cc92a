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

//! Component D: the name resolver. Turns a user-typed string into a single
//! artifact, trying each resolution rule in order and stopping at the first
//! one that applies (spec. §4.D); a rule that applies but matches more than
//! one artifact reports ambiguity rather than falling through to the next
//! rule.

use crate::index::EventKind;
use crate::index::Index;
use crate::store::Store;
use crate::time::Timestamp;
use crate::uuid::Uuid;
use crate::uuid::UuidPrefix;

/// The kind of artifact a caller expects `resolve_name` to return; narrows
/// keyword and tag lookups, but never changes what a literal UUID or rid
/// resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveKind {
    Checkin,
    Ticket,
    Wiki,
    Tag,
    Event,
    /// No kind restriction; matches any event kind.
    Any,
}

impl ResolveKind {
    fn matches(self, kind: EventKind) -> bool {
        match self {
            Self::Any => true,
            Self::Checkin => matches!(kind, EventKind::Checkin),
            Self::Ticket => matches!(kind, EventKind::Ticket),
            Self::Wiki => matches!(kind, EventKind::Wiki),
            Self::Tag | Self::Event => matches!(kind, EventKind::Tag),
        }
    }
}

/// State from an open working copy, needed for the `current`/`prev`/`next`
/// keywords. `None` when no working copy is checked out.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutContext {
    pub current: Uuid,
    pub previous: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Found(Uuid),
    NotFound,
    /// Carries the number of candidates that matched.
    Ambiguous(usize),
}

/// Resolves `name` against `store`/`index`, trying spec. §4.D's seven rules
/// in order. `checkout` supplies the state `current`/`prev`/`next` need;
/// pass `None` when there is no open working copy (those keywords then
/// resolve to [`Resolution::NotFound`]).
pub fn resolve_name(
    name: &str,
    kind: ResolveKind,
    store: &Store,
    index: &Index,
    checkout: Option<&CheckoutContext>,
) -> Resolution {
    if let Some(resolution) = resolve_keyword(name, kind, index, checkout) {
        return resolution;
    }
    if let Some(tag_name) = name.strip_prefix("tag:") {
        return resolve_tag(tag_name, kind, index, None);
    }
    // `local:`/`utc:` are accepted but intentionally undocumented: the source
    // this crate reworks marks them deprecated, and spec. §9's open question
    // says new implementations should accept them without advertising them.
    if let Some(expr) = name.strip_prefix("date:").or_else(|| name.strip_prefix("local:")).or_else(|| name.strip_prefix("utc:")) {
        return resolve_by_date(expr, kind, index);
    }
    if Timestamp::parse_iso8601(name).is_some() {
        return resolve_by_date(name, kind, index);
    }
    if let Some((tag_name, date)) = name.split_once(':') {
        if Timestamp::parse_iso8601(date).is_some() {
            return resolve_tag(tag_name, kind, index, Timestamp::parse_iso8601(date));
        }
    }
    if (4..=40).contains(&name.len()) && name.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Some(prefix) = UuidPrefix::try_from_hex(name) {
            return resolve_hex_prefix(&prefix, store);
        }
    }
    if let Some(tag_name) = name.strip_prefix("sym-") {
        return resolve_tag(tag_name, kind, index, None);
    }
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(rid) = name.parse::<u32>() {
            return match store.uuid_of(rid) {
                Some(uuid) => Resolution::Found(uuid),
                None => Resolution::NotFound,
            };
        }
    }
    Resolution::NotFound
}

fn resolve_keyword(
    name: &str,
    kind: ResolveKind,
    index: &Index,
    checkout: Option<&CheckoutContext>,
) -> Option<Resolution> {
    match name {
        "tip" => Some(latest_event(kind, index)),
        "current" => Some(match checkout {
            Some(ctx) => Resolution::Found(ctx.current),
            None => Resolution::NotFound,
        }),
        "prev" | "previous" => Some(match checkout.and_then(|ctx| ctx.previous) {
            Some(uuid) => Resolution::Found(uuid),
            None => Resolution::NotFound,
        }),
        "next" => Some(match checkout {
            Some(ctx) => match index.children_of(ctx.current) {
                [] => Resolution::NotFound,
                [only] => Resolution::Found(*only),
                many => Resolution::Ambiguous(many.len()),
            },
            None => Resolution::NotFound,
        }),
        _ => None,
    }
}

fn latest_event(kind: ResolveKind, index: &Index) -> Resolution {
    let mut matches: Vec<_> = index
        .events()
        .iter()
        .filter(|event| kind.matches(event.kind))
        .collect();
    matches.sort_by_key(|event| event.mtime);
    match matches.last() {
        Some(event) => Resolution::Found(event.artifact),
        None => Resolution::NotFound,
    }
}

fn resolve_tag(tag_name: &str, kind: ResolveKind, index: &Index, at_or_before: Option<Timestamp>) -> Resolution {
    let mut holders: Vec<(Uuid, Timestamp)> = index
        .tag_holders(tag_name)
        .into_iter()
        .filter(|(artifact, _)| index.event_of(*artifact).is_some_and(|e| kind.matches(e.kind)))
        .filter(|(_, mtime)| at_or_before.is_none_or(|cutoff| *mtime <= cutoff))
        .collect();
    holders.sort_by_key(|(_, mtime)| *mtime);
    match holders.last() {
        Some((artifact, _)) => Resolution::Found(*artifact),
        None => Resolution::NotFound,
    }
}

fn resolve_by_date(expr: &str, kind: ResolveKind, index: &Index) -> Resolution {
    let Some(cutoff) = Timestamp::parse_iso8601(expr) else {
        return Resolution::NotFound;
    };
    let mut matches: Vec<_> = index
        .events()
        .iter()
        .filter(|event| kind.matches(event.kind) && event.mtime <= cutoff)
        .collect();
    matches.sort_by_key(|event| event.mtime);
    match matches.last() {
        Some(event) => Resolution::Found(event.artifact),
        None => Resolution::NotFound,
    }
}

fn resolve_hex_prefix(prefix: &UuidPrefix, store: &Store) -> Resolution {
    let matches: Vec<Uuid> = store
        .all_rids()
        .into_iter()
        .filter_map(|rid| store.uuid_of(rid))
        .filter(|uuid| prefix.matches(uuid))
        .collect();
    match matches.len() {
        0 => Resolution::NotFound,
        1 => Resolution::Found(matches[0]),
        n => Resolution::Ambiguous(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ArtifactKind;
    use crate::manifest::Manifest;
    use std::collections::HashMap;

    fn uuid(seed: &str) -> Uuid {
        Uuid::hash(seed.as_bytes())
    }

    fn store_with(contents: &[&[u8]]) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::init(dir.path().join("repo")).unwrap();
        for content in contents {
            store.insert(content).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn resolves_tip_as_latest_checkin() {
        let mut index = Index::new();
        let early = uuid("early");
        let late = uuid("late");
        let mut m1 = Manifest::default();
        m1.date = Timestamp::parse_iso8601("2024-01-01T00:00:00Z");
        index.crosslink(early, ArtifactKind::Checkin, &m1, &HashMap::new()).unwrap();
        let mut m2 = Manifest {
            parents: vec![early],
            ..Default::default()
        };
        m2.date = Timestamp::parse_iso8601("2024-06-01T00:00:00Z");
        index.crosslink(late, ArtifactKind::Checkin, &m2, &HashMap::new()).unwrap();

        let (_dir, store) = store_with(&[]);
        let resolution = resolve_name("tip", ResolveKind::Checkin, &store, &index, None);
        assert_eq!(resolution, Resolution::Found(late));
    }

    #[test]
    fn resolves_unambiguous_hex_prefix() {
        let (_dir, store) = store_with(&[b"alpha"]);
        let rid = store.rid_of(&Uuid::hash(b"alpha")).unwrap();
        let full_hex = store.uuid_of(rid).unwrap().hex();
        let resolution = resolve_name(&full_hex[..8], ResolveKind::Any, &store, &Index::new(), None);
        assert_eq!(resolution, Resolution::Found(Uuid::hash(b"alpha")));
    }

    #[test]
    fn distinct_artifacts_resolve_to_distinct_uuids_by_prefix() {
        let (_dir, store) = store_with(&[b"one", b"two"]);
        let one_hex = Uuid::hash(b"one").hex();
        let two_hex = Uuid::hash(b"two").hex();
        let index = Index::new();
        assert_eq!(
            resolve_name(&one_hex[..10], ResolveKind::Any, &store, &index, None),
            Resolution::Found(Uuid::hash(b"one"))
        );
        assert_eq!(
            resolve_name(&two_hex[..10], ResolveKind::Any, &store, &index, None),
            Resolution::Found(Uuid::hash(b"two"))
        );
    }

    #[test]
    fn current_requires_open_checkout() {
        let (_dir, store) = store_with(&[]);
        let index = Index::new();
        assert_eq!(
            resolve_name("current", ResolveKind::Checkin, &store, &index, None),
            Resolution::NotFound
        );
        let ctx = CheckoutContext {
            current: uuid("here"),
            previous: None,
        };
        assert_eq!(
            resolve_name("current", ResolveKind::Checkin, &store, &index, Some(&ctx)),
            Resolution::Found(uuid("here"))
        );
    }

    #[test]
    fn literal_rid_fallback() {
        let (_dir, store) = store_with(&[b"only"]);
        let resolution = resolve_name("0", ResolveKind::Any, &store, &Index::new(), None);
        assert_eq!(resolution, Resolution::Found(Uuid::hash(b"only")));
    }
}
