//! Peer feed configuration
//!
//! The feed file holds one logical record per peer:
//!
//! ```text
//! name[/nosend]:subscriptions[/flexsubs]:distributions[/flexdists]:options:transmit
//! ```
//!
//! `#` lines are kept with the record that follows them and a trailing
//! backslash continues a record on the next line.
//!
//! This module is organized into:
//! - `record`: the Feed type and the logical-record reader
//! - `options`: the option mini-language
//! - `writer`: serialization and line folding

mod options;
mod record;
mod writer;

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{DEFAULT_FOLD_WIDTH, RelayConfig};
use crate::error::{RelayError, Result};
use crate::sets::{set_add, set_sub};

pub use self::options::{numeric_value, option, quoted_argument, suffix};
pub use self::record::{FLEX_ALL, Feed, MANY_HOPS, MAX_LINE, SELF_ALIAS};
pub use self::writer::{fold, format_record};

use self::record::{parse_record, read_records};

const SUBSCRIPTION_SEP: &str = ", ";

/// The loaded set of peer feeds
///
/// Iteration order is file order. The store is read-mostly: only
/// [`change_subscription`](FeedStore::change_subscription) mutates it, and
/// callers serialize that together with [`write`](FeedStore::write) under
/// their own lock.
///
/// # Examples
///
/// ```
/// use news_relay::FeedStore;
///
/// let text = "\
/// # our upstream
/// alpha:all:world::uux - %S!rnews
/// bob::comp.lang.*::F:
/// ";
/// let store = FeedStore::parse(text, "gryphon", false).unwrap();
/// assert_eq!(store.len(), 2);
/// assert_eq!(store.find_by_name("bob").unwrap().options, "F");
/// assert_eq!(store.max_hop_limit(), news_relay::feeds::MANY_HOPS);
/// ```
#[derive(Debug, Clone)]
pub struct FeedStore {
    path: Option<PathBuf>,
    feeds: Vec<Feed>,
    trailer: String,
    local_site: String,
    max_hop_limit: u64,
    fold_width: usize,
}

impl FeedStore {
    /// Load the feed file named by the configuration
    pub fn load(config: &RelayConfig) -> Result<Self> {
        let mut store = Self::load_from(
            config.feeds_file(),
            &config.pathname,
            config.legacy_feed_format,
        )?;
        store.fold_width = config.fold_width;
        Ok(store)
    }

    /// Load a feed file from an explicit path
    ///
    /// # Arguments
    ///
    /// * `path` - Feed file location; a missing file is an error
    /// * `local_site` - Name substituted for `ME` records
    /// * `legacy` - Accept the 4-field record layout
    pub fn load_from(path: impl AsRef<Path>, local_site: &str, legacy: bool) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut store = Self::parse(&text, local_site, legacy)?;
        store.path = Some(path.to_path_buf());
        info!("loaded {} feeds from {}", store.len(), path.display());
        Ok(store)
    }

    /// Parse feed file text
    pub fn parse(text: &str, local_site: &str, legacy: bool) -> Result<Self> {
        let (records, trailer) = read_records(text)?;
        let mut feeds: Vec<Feed> = Vec::with_capacity(records.len());
        for record in &records {
            let feed = parse_record(record, local_site, legacy)?;
            if feeds.iter().any(|f| f.name == feed.name) {
                return Err(RelayError::Parse {
                    line: record.line,
                    message: format!("duplicate feed {}", feed.name),
                });
            }
            feeds.push(feed);
        }
        Ok(Self::from_parts(feeds, trailer, local_site))
    }

    /// Build a store from feeds already in memory
    pub fn from_feeds(feeds: Vec<Feed>, local_site: &str) -> Self {
        Self::from_parts(feeds, String::new(), local_site)
    }

    fn from_parts(feeds: Vec<Feed>, trailer: String, local_site: &str) -> Self {
        let mut store = Self {
            path: None,
            feeds,
            trailer,
            local_site: local_site.to_string(),
            max_hop_limit: 0,
            fold_width: DEFAULT_FOLD_WIDTH,
        };
        store.max_hop_limit = store.compute_max_hops();
        store
    }

    fn compute_max_hops(&self) -> u64 {
        self.feeds
            .iter()
            .filter(|f| f.name != self.local_site)
            .map(|f| f.hop_limit().unwrap_or(MANY_HOPS))
            .max()
            .unwrap_or(0)
    }

    /// Largest hop limit over all peers
    ///
    /// Peers without an L option count as [`MANY_HOPS`]; a store holding only
    /// the local site yields 0.
    #[must_use]
    pub fn max_hop_limit(&self) -> u64 {
        self.max_hop_limit
    }

    /// Name of the local site this store was loaded for
    #[must_use]
    pub fn local_site(&self) -> &str {
        &self.local_site
    }

    /// File this store was loaded from, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Set the file that [`write`](Self::write) replaces
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    /// Exact-match lookup by record name
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Feed> {
        self.feeds.iter().find(|f| f.name == name)
    }

    /// The record describing the local site itself
    #[must_use]
    pub fn local_feed(&self) -> Option<&Feed> {
        self.find_by_name(&self.local_site)
    }

    /// Feeds in file order
    pub fn iter(&self) -> std::slice::Iter<'_, Feed> {
        self.feeds.iter()
    }

    /// Number of feeds
    #[must_use]
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    /// Whether no feeds are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Value of one option letter of a feed
    #[must_use]
    pub fn option(&self, feed: &Feed, letter: char) -> Option<String> {
        feed.option(letter)
    }

    /// Add or remove subscription patterns for one site
    ///
    /// A site listed inside a multicast record is first split out into a
    /// record of its own. A removal that would leave the field empty, or
    /// that finds nothing to remove, instead subscribes the site to
    /// everything except `groups`.
    ///
    /// ```
    /// use news_relay::{FeedStore, ngmatch};
    ///
    /// let mut store = FeedStore::parse("bob:comp.all:::\n", "gryphon", false).unwrap();
    /// store.change_subscription("bob", "misc.test", true).unwrap();
    /// assert!(ngmatch("misc.test", &store.find_by_name("bob").unwrap().subscriptions));
    ///
    /// store.change_subscription("bob", "misc.test", false).unwrap();
    /// assert_eq!(store.find_by_name("bob").unwrap().subscriptions, "comp.all");
    /// ```
    pub fn change_subscription(&mut self, site: &str, groups: &str, add: bool) -> Result<()> {
        let mut idx = self
            .feeds
            .iter()
            .position(|f| f.name == site)
            .or_else(|| self.feeds.iter().position(|f| f.sites().any(|s| s == site)))
            .ok_or_else(|| RelayError::NoSuchFeed(site.to_string()))?;

        if self.feeds[idx].name != site {
            let shared = &mut self.feeds[idx];
            let others: Vec<String> = shared
                .sites()
                .filter(|s| *s != site)
                .map(str::to_string)
                .collect();
            let mut single = shared.clone();
            shared.name = others.join(",");
            single.name = site.to_string();
            single.comments.clear();
            debug!("split {} out of multicast feed {}", site, shared.name);
            self.feeds.insert(idx + 1, single);
            idx += 1;
        }

        let feed = &mut self.feeds[idx];
        if add {
            let (subscriptions, added) = set_add(&feed.subscriptions, groups, SUBSCRIPTION_SEP);
            debug!("{}: {} subscription patterns added", site, added);
            feed.subscriptions = subscriptions;
            return Ok(());
        }

        let (subscriptions, removed) = set_sub(&feed.subscriptions, groups, SUBSCRIPTION_SEP);
        if removed > 0 && !subscriptions.is_empty() {
            feed.subscriptions = subscriptions;
            return Ok(());
        }

        // the field may never end up empty: fall back to "all but these"
        feed.subscriptions = if subscriptions.is_empty() {
            FLEX_ALL.to_string()
        } else {
            subscriptions
        };
        let negated: Vec<String> = groups
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(|t| match t.strip_prefix('!') {
                Some(plain) => plain.to_string(),
                None => format!("!{t}"),
            })
            .collect();
        self.change_subscription(site, &negated.join(","), true)
    }

    /// Rewrite the feed file this store was loaded from
    ///
    /// The new contents go to a sibling temporary file that is then renamed
    /// over the original.
    pub fn write(&self) -> Result<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| RelayError::Other("feed store has no backing file".to_string()))?;
        let tmp = path.with_extension("new");
        {
            let file = fs::File::create(&tmp)?;
            let mut out = BufWriter::new(file);
            self.write_to(&mut out)?;
        }
        fs::rename(&tmp, path)?;
        info!("rewrote {} ({} feeds)", path.display(), self.len());
        Ok(())
    }

    /// Serialize all feeds to a writer
    pub fn write_to<W: std::io::Write>(&self, out: &mut W) -> Result<()> {
        writer::write_feeds(out, &self.feeds, &self.trailer, self.fold_width)?;
        Ok(())
    }

    /// Serialize all feeds to a string
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut buf = Vec::new();
        // writing into a Vec cannot fail
        let _ = writer::write_feeds(&mut buf, &self.feeds, &self.trailer, self.fold_width);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl<'a> IntoIterator for &'a FeedStore {
    type Item = &'a Feed;
    type IntoIter = std::slice::Iter<'a, Feed>;

    fn into_iter(self) -> Self::IntoIter {
        self.feeds.iter()
    }
}
