//! Per-peer acceptance decision
//!
//! Decides whether one feed takes a compiled article. The distribution
//! gate runs first and is global to the article; then destinations are
//! scanned in order and the first one the feed subscribes to accepts.

use std::fmt;

use crate::feeds::Feed;
use crate::matching::{ScanIndex, SubscriptionIndex, ngmatch};
use crate::resolver::{CompiledArticle, Destination, DestinationStatus};

/// Outcome of the acceptance check
///
/// Compare with [`Verdict::is_accept`] and [`Verdict::is_forwardable`],
/// never by ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Some destination is subscribed
    Accept,
    /// Only a distribution-prefixed destination matched; file it as junk
    AcceptToJunk,
    /// The article's distribution is not carried by the feed
    RejectDistribution,
    /// No destination is subscribed
    RejectNoGroups,
}

impl Verdict {
    /// Plain acceptance
    #[must_use]
    pub fn is_accept(self) -> bool {
        self == Verdict::Accept
    }

    /// Acceptance, to a real group or to junk
    #[must_use]
    pub fn is_forwardable(self) -> bool {
        matches!(self, Verdict::Accept | Verdict::AcceptToJunk)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Verdict::Accept => "accepted",
            Verdict::AcceptToJunk => "accepted to junk",
            Verdict::RejectDistribution => "distribution not carried",
            Verdict::RejectNoGroups => "no subscribed groups",
        };
        f.write_str(text)
    }
}

/// Subscription patterns that name a hierarchy outright
///
/// Old feeds listed their distributions among their groups. Only those
/// names count when a distribution is checked against subscriptions; a
/// leading `all`, `*` or `any` would let every distribution through.
fn named_patterns(subscriptions: &str) -> String {
    subscriptions
        .split(',')
        .map(str::trim)
        .filter(|p| {
            let head = p.trim_start_matches('!').split('.').next().unwrap_or_default();
            !matches!(head, "all" | "*" | "any")
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Decide whether `feed` takes an article with this distribution and these
/// destinations
///
/// # Examples
///
/// ```
/// use news_relay::acceptance::{accept, Verdict};
/// use news_relay::resolver::Destination;
/// use news_relay::matching::ScanIndex;
/// use news_relay::Feed;
///
/// let feed = Feed::new("carol", "to.*");
/// let dests = [Destination::resolved("misc.test"), Destination::unknown("to.site.ctl")];
/// assert_eq!(accept("world", &dests, &feed, &ScanIndex), Verdict::Accept);
/// ```
pub fn accept(
    distribution: &str,
    destinations: &[Destination],
    feed: &Feed,
    index: &dyn SubscriptionIndex,
) -> Verdict {
    let distributions = feed.distribution_pattern();

    if !distribution.trim().is_empty()
        && !ngmatch(distribution, distributions)
        && !ngmatch(distribution, &named_patterns(&feed.subscriptions))
    {
        return Verdict::RejectDistribution;
    }

    let mut junk_candidate = false;
    for dest in destinations {
        let prefix_ok = match dest.distribution_prefix.as_deref() {
            Some(prefix) if !ngmatch(prefix, distributions) => continue,
            Some(_) => true,
            None => false,
        };

        let subscribed = match (dest.status, dest.group.as_deref()) {
            (DestinationStatus::Unknown, _) | (_, None) => {
                ngmatch(dest.name(), &feed.subscriptions)
            }
            (_, Some(group)) => index.subscribes(feed, group),
        };
        if subscribed {
            return Verdict::Accept;
        }

        // passes things like nj.forsale on to peers that carry nj
        if prefix_ok {
            junk_candidate = true;
        }
    }

    if junk_candidate {
        Verdict::AcceptToJunk
    } else {
        Verdict::RejectNoGroups
    }
}

/// [`accept`] over a compiled article, matching by scan
pub fn accept_compiled(compiled: &CompiledArticle, feed: &Feed) -> Verdict {
    accept(
        &compiled.distribution,
        &compiled.destinations,
        feed,
        &ScanIndex,
    )
}
