//! Article history
//!
//! The relay consults history through the [`History`] trait only: whether
//! an id was seen, and where the article was filed. The on-disk database
//! behind a real site is up to the implementor; [`MemoryHistory`] keeps
//! everything in a HashMap.
//!
//! # Example
//!
//! ```
//! use news_relay::history::{History, HistoryStatus, MemoryHistory};
//!
//! let mut history = MemoryHistory::new();
//! assert_eq!(history.lookup("<1@bob>"), HistoryStatus::Unseen);
//!
//! history.record("<1@bob>", chrono::Utc::now(), vec!["comp.lang.rust/12".into()]);
//! assert_eq!(history.lookup("<1@bob>"), HistoryStatus::Seen);
//! assert_eq!(
//!     history.article_path("<1@bob>").unwrap(),
//!     std::path::PathBuf::from("comp/lang/rust/12")
//! );
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// What history knows about a message id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    /// Never seen
    Unseen,
    /// Seen and still on file
    Seen,
    /// Withdrawn by a cancel
    Cancelled,
    /// Seen, but no longer on file
    Expired,
}

impl HistoryStatus {
    /// Whether an incoming copy should be dropped as a duplicate
    #[must_use]
    pub fn is_known(self) -> bool {
        self != HistoryStatus::Unseen
    }
}

/// One history entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the article arrived
    pub received: DateTime<Utc>,
    /// `group/number` locations, empty once expired
    pub locations: Vec<String>,
    /// Whether a cancel was processed
    pub cancelled: bool,
}

/// Lookup and insert interface to the history database
pub trait History {
    /// Status of a message id
    fn lookup(&self, message_id: &str) -> HistoryStatus;

    /// Record an article and the groups it was filed in
    fn record(&mut self, message_id: &str, received: DateTime<Utc>, locations: Vec<String>);

    /// `group/number` locations of an article
    fn locations(&self, message_id: &str) -> Option<&[String]>;

    /// Mark an article cancelled
    ///
    /// An id not seen yet is recorded as cancelled so a later copy is
    /// refused. Returns the locations the article was filed under.
    fn cancel(&mut self, message_id: &str) -> Vec<String>;

    /// Spool-relative path of the article's first location
    fn article_path(&self, message_id: &str) -> Option<PathBuf> {
        let location = self.locations(message_id)?.first()?;
        Some(location_path(location))
    }
}

/// Turn a `group/number` location into a spool-relative path
///
/// ```
/// use news_relay::history::location_path;
///
/// assert_eq!(location_path("comp.lang.rust/7"), std::path::PathBuf::from("comp/lang/rust/7"));
/// ```
#[must_use]
pub fn location_path(location: &str) -> PathBuf {
    match location.rsplit_once('/') {
        Some((group, number)) => group.split('.').collect::<PathBuf>().join(number),
        None => PathBuf::from(location),
    }
}

/// In-memory history
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    entries: HashMap<String, HistoryEntry>,
}

impl MemoryHistory {
    /// Create an empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop an article's locations, keeping the id as expired
    pub fn expire(&mut self, message_id: &str) {
        if let Some(entry) = self.entries.get_mut(message_id) {
            entry.locations.clear();
        }
    }

    /// Full entry for a message id
    #[must_use]
    pub fn entry(&self, message_id: &str) -> Option<&HistoryEntry> {
        self.entries.get(message_id)
    }

    /// Number of ids recorded
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl History for MemoryHistory {
    fn lookup(&self, message_id: &str) -> HistoryStatus {
        match self.entries.get(message_id) {
            None => HistoryStatus::Unseen,
            Some(entry) if entry.cancelled => HistoryStatus::Cancelled,
            Some(entry) if entry.locations.is_empty() => HistoryStatus::Expired,
            Some(_) => HistoryStatus::Seen,
        }
    }

    fn record(&mut self, message_id: &str, received: DateTime<Utc>, locations: Vec<String>) {
        self.entries.insert(
            message_id.to_string(),
            HistoryEntry {
                received,
                locations,
                cancelled: false,
            },
        );
    }

    fn locations(&self, message_id: &str) -> Option<&[String]> {
        self.entries
            .get(message_id)
            .filter(|e| !e.cancelled)
            .map(|e| e.locations.as_slice())
    }

    fn cancel(&mut self, message_id: &str) -> Vec<String> {
        let entry = self
            .entries
            .entry(message_id.to_string())
            .or_insert_with(|| HistoryEntry {
                received: Utc::now(),
                locations: Vec::new(),
                cancelled: false,
            });
        entry.cancelled = true;
        std::mem::take(&mut entry.locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let mut history = MemoryHistory::new();
        history.record("<a@x>", Utc::now(), vec!["misc.test/1".into()]);
        assert_eq!(history.lookup("<a@x>"), HistoryStatus::Seen);

        history.expire("<a@x>");
        assert_eq!(history.lookup("<a@x>"), HistoryStatus::Expired);
        assert!(history.article_path("<a@x>").is_none());

        history.record("<b@x>", Utc::now(), vec!["misc.test/2".into(), "junk/1".into()]);
        let removed = history.cancel("<b@x>");
        assert_eq!(removed, vec!["misc.test/2", "junk/1"]);
        assert_eq!(history.lookup("<b@x>"), HistoryStatus::Cancelled);
        assert!(history.locations("<b@x>").is_none());
    }

    #[test]
    fn test_cancel_before_arrival() {
        let mut history = MemoryHistory::new();
        assert!(history.cancel("<early@x>").is_empty());
        assert_eq!(history.lookup("<early@x>"), HistoryStatus::Cancelled);
        assert!(history.lookup("<early@x>").is_known());
        assert!(!HistoryStatus::Unseen.is_known());
    }

    #[test]
    fn test_location_path() {
        assert_eq!(location_path("junk/3"), PathBuf::from("junk/3"));
        assert_eq!(location_path("odd"), PathBuf::from("odd"));
    }
}
