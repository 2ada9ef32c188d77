//! Peer fan-out
//!
//! After an article is accepted, every feed is considered in file order.
//! A feed is skipped when it is the local site, when the caller excluded
//! it, when a site already on the article's Path matches its name or its
//! no-send list, or when acceptance rejects the article.
//!
//! The Path of an approved article may begin with a reply route ahead of
//! the moderator's site; only the part from that site onwards is checked
//! for loops.

use std::path::Path;

use tracing::{debug, info};

use crate::acceptance::accept;
use crate::article::{Headers, PATH_SEP};
use crate::dispatch::Dispatcher;
use crate::feeds::{Feed, FeedStore};
use crate::matching::{SubscriptionIndex, ngmatch};
use crate::resolver::CompiledArticle;

const MODERATOR_SITE_END: &[char] = &['!', ':', '@', '^', '%', ' ', '>'];

/// Site of the moderator named in an Approved header
///
/// ```
/// use news_relay::broadcast::moderator_site;
///
/// assert_eq!(moderator_site("John <mod@rust.example.org>"), Some("rust.example.org"));
/// assert_eq!(moderator_site("modhost!mod"), Some("modhost"));
/// assert_eq!(moderator_site("mod"), None);
/// ```
#[must_use]
pub fn moderator_site(approved: &str) -> Option<&str> {
    let approved = approved.trim();
    let site = match approved.split_once('@') {
        Some((_, host)) => host.split(MODERATOR_SITE_END).next().unwrap_or_default(),
        None => approved.split_once(PATH_SEP).map(|(site, _)| site)?,
    };
    Some(site.trim()).filter(|s| !s.is_empty())
}

/// Path sites that count for loop detection
///
/// Without an Approved header, or when the moderator's site is not on the
/// Path, this is the whole Path. Otherwise it starts at the moderator's
/// site. A fully qualified moderator host also matches its short name.
#[must_use]
pub fn back_path(headers: &Headers) -> Vec<&str> {
    let sites = headers.path_sites();
    let Some(site) = headers.approved.as_deref().and_then(moderator_site) else {
        return sites;
    };
    let short = site.split('.').next().unwrap_or(site);
    match sites
        .iter()
        .position(|s| *s == site)
        .or_else(|| sites.iter().position(|s| *s == short))
    {
        Some(start) => {
            debug!("moderated by {}, checking path from hop {}", site, start);
            sites[start..].to_vec()
        }
        None => sites,
    }
}

/// Selects and feeds the peers an article goes to
///
/// # Examples
///
/// ```
/// use news_relay::{Feed, FeedStore};
/// use news_relay::article::Headers;
/// use news_relay::broadcast::BroadcastPlanner;
/// use news_relay::matching::ScanIndex;
/// use news_relay::resolver::{CompiledArticle, Destination};
///
/// let feeds = FeedStore::from_feeds(
///     vec![Feed::new("gryphon", "all"), Feed::new("alice", "all"), Feed::new("bob", "all")],
///     "gryphon",
/// );
/// let mut headers = Headers::new("a@alice", vec!["misc.test".into()], "hi");
/// headers.path = "gryphon!alice".into();
/// let compiled = CompiledArticle {
///     newsgroups: vec!["misc.test".into()],
///     distribution: "world".into(),
///     control: false,
///     destinations: vec![Destination::resolved("misc.test")],
/// };
///
/// let planner = BroadcastPlanner::new(&feeds, "gryphon", &ScanIndex);
/// let names: Vec<_> = planner.plan(&headers, &compiled, "").iter().map(|f| f.name.as_str()).collect();
/// assert_eq!(names, ["bob"]);
/// ```
pub struct BroadcastPlanner<'a> {
    feeds: &'a FeedStore,
    pathname: &'a str,
    index: &'a dyn SubscriptionIndex,
}

impl<'a> BroadcastPlanner<'a> {
    /// Create a planner over the loaded feeds
    ///
    /// # Arguments
    ///
    /// * `feeds` - All configured feeds
    /// * `pathname` - Local site name as it appears on Path lines
    /// * `index` - Subscription lookup used for acceptance
    pub fn new(feeds: &'a FeedStore, pathname: &'a str, index: &'a dyn SubscriptionIndex) -> Self {
        Self {
            feeds,
            pathname,
            index,
        }
    }

    /// Feeds the article should go to, in file order
    ///
    /// `exclusions` is a pattern list of sites not to send to, in addition
    /// to each feed's own no-send list.
    pub fn plan(
        &self,
        headers: &Headers,
        compiled: &CompiledArticle,
        exclusions: &str,
    ) -> Vec<&'a Feed> {
        let back = back_path(headers);
        let exclusions = exclusions.trim();

        self.feeds
            .iter()
            .filter(|feed| {
                if feed.name == self.pathname {
                    return false;
                }
                if !exclusions.is_empty() && ngmatch(&feed.name, exclusions) {
                    debug!("{}: {} excluded", headers.message_id, feed.name);
                    return false;
                }
                let no_send = feed.no_send.trim();
                if let Some(site) = back.iter().find(|site| {
                    ngmatch(site, &feed.name) || (!no_send.is_empty() && ngmatch(site, no_send))
                }) {
                    debug!("{}: {} already has it via {}", headers.message_id, feed.name, site);
                    return false;
                }
                let verdict = accept(
                    &compiled.distribution,
                    &compiled.destinations,
                    feed,
                    self.index,
                );
                if !verdict.is_forwardable() {
                    debug!("{}: {} {}", headers.message_id, feed.name, verdict);
                    return false;
                }
                true
            })
            .collect()
    }

    /// Dispatch the article to every planned feed
    ///
    /// Returns the names of the feeds that took it. Failures are logged by
    /// the dispatcher and do not stop the fan-out.
    pub fn broadcast(
        &self,
        dispatcher: &Dispatcher<'_>,
        headers: &Headers,
        compiled: &CompiledArticle,
        content: &Path,
        exclusions: &str,
    ) -> Vec<String> {
        let sent: Vec<String> = self
            .plan(headers, compiled, exclusions)
            .into_iter()
            .filter(|feed| {
                dispatcher
                    .dispatch(&feed.name, feed, headers, content, true)
                    .accepted()
            })
            .map(|feed| feed.name.clone())
            .collect();

        if !sent.is_empty() {
            info!("{} sent to {}", headers.message_id, sent.join(", "));
        }
        sent
    }
}
