//! Newsgroup pattern matching
//!
//! Subscription, distribution and no-send fields are comma-separated
//! pattern lists evaluated against comma-separated name lists.
//!
//! # Pattern syntax
//!
//! - `comp.lang` matches `comp.lang` and everything below it (`comp.lang.rust`)
//! - `all` or `*` as a whole segment matches any run of segments
//! - `any` as a whole segment matches exactly one segment
//! - `!pattern` excludes; a later positive pattern can re-include
//! - `{a,b}` at the end of a pattern matches either alternative
//! - whitespace and backslashes are ignored
//!
//! # Example
//!
//! ```
//! use news_relay::ngmatch;
//!
//! assert!(ngmatch("comp.lang.rust", "comp.all,!comp.lang.c"));
//! assert!(!ngmatch("comp.lang.c", "comp.all,!comp.lang.c"));
//! assert!(ngmatch("rec.arts.sf", "rec.any.sf"));
//! assert!(ngmatch("misc.test,comp.sources.unix", "comp.sources.{unix,mac}"));
//! ```

use std::collections::HashMap;

use crate::active::ActiveGroups;
use crate::config::SubscriptionStrategy;
use crate::feeds::Feed;

const NEGATE: u8 = b'!';
const LIST_SEP: u8 = b',';
const SEGMENT_SEP: u8 = b'.';
const OPEN: u8 = b'{';
const CLOSE: u8 = b'}';

#[inline]
fn at(s: &[u8], i: usize) -> u8 {
    s.get(i).copied().unwrap_or(0)
}

#[inline]
fn end_of_name(c: u8) -> bool {
    c == 0 || c == LIST_SEP
}

#[inline]
fn end_of_segment(c: u8) -> bool {
    end_of_name(c) || c == SEGMENT_SEP
}

#[inline]
fn ignorable(c: u8) -> bool {
    c.is_ascii_whitespace() || c == b'\\'
}

/// Test whether any name in `groups` is selected by the pattern list
///
/// Both arguments are comma-separated. Patterns are applied left to right,
/// so `all,!talk` selects everything except `talk.*` while `!talk,all`
/// selects everything.
#[must_use]
pub fn ngmatch(groups: &str, patterns: &str) -> bool {
    match_lists(groups.as_bytes(), patterns.as_bytes())
}

fn match_lists(groups: &[u8], patterns: &[u8]) -> bool {
    let mut selected = false;
    let mut g = 0;

    while g < groups.len() && !selected {
        if ignorable(groups[g]) {
            g += 1;
            continue;
        }

        let mut p = 0;
        while p < patterns.len() && patterns[p] != CLOSE {
            if ignorable(patterns[p]) {
                p += 1;
                continue;
            }
            if patterns[p] == NEGATE {
                selected = selected && !match_name(&groups[g..], &patterns[p + 1..]);
            } else {
                selected = selected || match_name(&groups[g..], &patterns[p..]);
            }

            // advance past this pattern, stepping over brace groups
            let mut depth = 0i32;
            loop {
                let ch = patterns[p];
                p += 1;
                if (ch == LIST_SEP && depth <= 0) || p >= patterns.len() {
                    break;
                }
                match ch {
                    OPEN => depth += 1,
                    CLOSE => depth -= 1,
                    _ => {}
                }
            }
        }

        loop {
            let ch = groups[g];
            g += 1;
            if ch == LIST_SEP || g >= groups.len() {
                break;
            }
        }
    }

    selected
}

/// Width of an `all`/`*` wildcard segment starting at `p`, if there is one
fn wildcard_width(pattern: &[u8], p: usize) -> Option<usize> {
    let segment_start = p == 0 || pattern[p - 1] == SEGMENT_SEP;
    if !segment_start {
        return None;
    }
    if pattern[p..].starts_with(b"all") && end_of_segment(at(pattern, p + 3)) {
        Some(3)
    } else if at(pattern, p) == b'*' && end_of_segment(at(pattern, p + 1)) {
        Some(1)
    } else {
        None
    }
}

fn is_any_segment(pattern: &[u8], p: usize) -> bool {
    (p == 0 || pattern[p - 1] == SEGMENT_SEP)
        && pattern[p..].starts_with(b"any")
        && end_of_segment(at(pattern, p + 3))
}

/// Match the single name at the head of `group` against the single pattern
/// at the head of `pattern`
fn match_name(group: &[u8], pattern: &[u8]) -> bool {
    let mut g = 0;
    let mut p = 0;

    loop {
        let c = at(pattern, p);
        if end_of_name(c) || c == CLOSE {
            break;
        }

        if let Some(width) = wildcard_width(pattern, p) {
            let rest = &pattern[p + width..];
            while !end_of_name(at(group, g)) {
                if match_name(&group[g..], rest) {
                    return true;
                }
                g += 1;
            }
            return match_name(&group[g..], rest);
        }

        if is_any_segment(pattern, p) {
            p += 3;
            while !end_of_segment(at(group, g)) {
                g += 1;
            }
            continue;
        }

        if ignorable(c) {
            p += 1;
        } else if c == OPEN {
            return match_lists(&group[g..], &pattern[p + 1..]);
        } else {
            if c != at(group, g) {
                return false;
            }
            p += 1;
            g += 1;
        }
    }

    end_of_segment(at(group, g))
}

/// Answers "does this feed take this group" for the acceptance scan
pub trait SubscriptionIndex {
    /// Whether `feed` subscribes to the active group `group`
    fn subscribes(&self, feed: &Feed, group: &str) -> bool;
}

/// Evaluates the feed's subscription pattern on every call
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanIndex;

impl SubscriptionIndex for ScanIndex {
    fn subscribes(&self, feed: &Feed, group: &str) -> bool {
        ngmatch(group, &feed.subscriptions)
    }
}

/// Precomputed subscription bits, one bitset over all feeds per active group
///
/// Groups or feeds the index was not built with fall back to the matcher,
/// so the index never answers differently from [`ScanIndex`] for the
/// state it was built from. Rebuild it after editing subscriptions.
#[derive(Debug, Clone, Default)]
pub struct BitmapIndex {
    positions: HashMap<String, usize>,
    bits: HashMap<String, Vec<u64>>,
}

impl BitmapIndex {
    /// Build the index over the given feeds and group names
    pub fn build<'f, 'g, F, G>(feeds: F, groups: G) -> Self
    where
        F: IntoIterator<Item = &'f Feed>,
        G: IntoIterator<Item = &'g str>,
    {
        let feeds: Vec<&Feed> = feeds.into_iter().collect();
        let words = feeds.len().div_ceil(64);
        let positions = feeds
            .iter()
            .enumerate()
            .map(|(i, feed)| (feed.name.clone(), i))
            .collect();

        let mut bits = HashMap::new();
        for group in groups {
            let mut set = vec![0u64; words];
            for (i, feed) in feeds.iter().enumerate() {
                if ngmatch(group, &feed.subscriptions) {
                    set[i / 64] |= 1 << (i % 64);
                }
            }
            bits.insert(group.to_string(), set);
        }

        Self { positions, bits }
    }

    /// Number of groups with precomputed bits
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Whether no group has precomputed bits
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

impl SubscriptionIndex for BitmapIndex {
    fn subscribes(&self, feed: &Feed, group: &str) -> bool {
        match (self.positions.get(&feed.name), self.bits.get(group)) {
            (Some(&i), Some(set)) => set[i / 64] & (1 << (i % 64)) != 0,
            _ => ngmatch(group, &feed.subscriptions),
        }
    }
}

/// Build the index selected by `strategy`
pub fn build_index<'a>(
    strategy: SubscriptionStrategy,
    feeds: impl IntoIterator<Item = &'a Feed>,
    active: &ActiveGroups,
) -> Box<dyn SubscriptionIndex> {
    match strategy {
        SubscriptionStrategy::Scan => Box::new(ScanIndex),
        SubscriptionStrategy::Bitmap => Box::new(BitmapIndex::build(
            feeds,
            active.iter().map(|g| g.name.as_str()),
        )),
    }
}
