//! Per-feed acceptance verdicts

use news_relay::matching::{BitmapIndex, ScanIndex, SubscriptionIndex};
use news_relay::resolver::Destination;
use news_relay::{Feed, Verdict, accept};

#[test]
fn test_unknown_destination_matches_pattern() {
    let feed = Feed::new("carol", "to.*");
    let dests = [Destination::resolved("misc.test"), Destination::unknown("to.site.ctl")];
    assert_eq!(accept("world", &dests, &feed, &ScanIndex), Verdict::Accept);
}

#[test]
fn test_distribution_rejected() {
    let feed = Feed::new("bob", "all").with_distributions("world,!local");
    let dests = [Destination::resolved("misc.test")];
    assert_eq!(accept("local", &dests, &feed, &ScanIndex), Verdict::RejectDistribution);
    assert_eq!(accept("world", &dests, &feed, &ScanIndex), Verdict::Accept);
}

#[test]
fn test_no_groups() {
    let feed = Feed::new("bob", "comp");
    let dests = [Destination::resolved("misc.test"), Destination::unknown("alt.nowhere")];
    let verdict = accept("world", &dests, &feed, &ScanIndex);
    assert_eq!(verdict, Verdict::RejectNoGroups);
    assert!(!verdict.is_forwardable());
}

#[test]
fn test_prefixed_group_goes_to_junk() {
    let feed = Feed::new("bob", "comp").with_distributions("nj,world");
    let dests = [Destination::resolved("misc.forsale").with_prefix("nj")];
    let verdict = accept("nj", &dests, &feed, &ScanIndex);
    assert_eq!(verdict, Verdict::AcceptToJunk);
    assert!(verdict.is_forwardable());
    assert!(!verdict.is_accept());

    // a prefix the feed does not carry is skipped entirely
    let other = Feed::new("carol", "misc").with_distributions("world");
    assert_eq!(accept("world", &dests, &other, &ScanIndex), Verdict::RejectNoGroups);
}

#[test]
fn test_indexes_agree() {
    let feeds = vec![
        Feed::new("a", "all,!comp.lang.c"),
        Feed::new("b", "comp.lang"),
        Feed::new("c", "misc.any.test"),
        Feed::new("d", "!all"),
    ];
    let groups = ["comp.lang.c", "comp.lang.rust", "misc.kids.test", "misc.test", "rec.pets"];
    let bitmap = BitmapIndex::build(feeds.iter(), groups);
    assert_eq!(bitmap.len(), groups.len());

    for feed in &feeds {
        for group in groups.iter().chain(["sci.math"].iter()) {
            assert_eq!(
                bitmap.subscribes(feed, group),
                ScanIndex.subscribes(feed, group),
                "{} / {}",
                feed.name,
                group
            );
        }
    }
}
