//! Feed file loading, editing and writing

use std::fs;

use news_relay::feeds::MANY_HOPS;
use news_relay::{FeedStore, ngmatch};

const FEEDS: &str = "\
# the local site
ME:all,!junk:world,local::
# upstream, limited to two hops
alpha/beta:comp,misc/comp.sources:world:L2:uux - alpha!rnews
carol,dave:rec:world:F:
";

#[test]
fn test_load_round_trip() {
    let store = FeedStore::parse(FEEDS, "gryphon", false).unwrap();
    let reparsed = FeedStore::parse(&store.to_text(), "gryphon", false).unwrap();

    assert_eq!(reparsed.len(), store.len());
    for (a, b) in store.iter().zip(reparsed.iter()) {
        assert_eq!(a, b);
    }
}

#[test]
fn test_self_record_and_comments() {
    let store = FeedStore::parse(FEEDS, "gryphon", false).unwrap();
    let local = store.local_feed().unwrap();
    assert_eq!(local.name, "gryphon");
    assert_eq!(local.comments, "# the local site\n");

    let alpha = store.find_by_name("alpha").unwrap();
    assert_eq!(alpha.no_send, "beta");
    assert_eq!(alpha.flex_subscriptions, "comp.sources");
    assert_eq!(alpha.transmit, "uux - alpha!rnews");
}

#[test]
fn test_max_hop_limit() {
    let store = FeedStore::parse(FEEDS, "gryphon", false).unwrap();
    // carol,dave has no L option
    assert_eq!(store.max_hop_limit(), MANY_HOPS);

    let limited = FeedStore::parse("ME:all:::\nalpha:all::L2:\nbob:all::L:\n", "gryphon", false).unwrap();
    assert_eq!(limited.max_hop_limit(), 2);

    let alone = FeedStore::parse("ME:all:::\n", "gryphon", false).unwrap();
    assert_eq!(alone.max_hop_limit(), 0);
}

#[test]
fn test_missing_field_is_error() {
    assert!(FeedStore::parse("bob:all:world\n", "gryphon", false).is_err());
}

#[test]
fn test_subscription_add_remove_idempotent() {
    let mut store = FeedStore::parse(FEEDS, "gryphon", false).unwrap();
    let before = store.find_by_name("alpha").unwrap().subscriptions.clone();

    store.change_subscription("alpha", "sci.physics", true).unwrap();
    store.change_subscription("alpha", "sci.physics", true).unwrap();
    let added = store.find_by_name("alpha").unwrap().subscriptions.clone();
    assert_eq!(added.matches("sci.physics").count(), 1);

    store.change_subscription("alpha", "sci.physics", false).unwrap();
    let after = &store.find_by_name("alpha").unwrap().subscriptions;
    assert_eq!(after.replace(' ', ""), before.replace(' ', ""));
}

#[test]
fn test_remove_last_subscription_negates() {
    let mut store = FeedStore::parse("bob:comp:::\n", "gryphon", false).unwrap();
    store.change_subscription("bob", "comp", false).unwrap();
    let subs = &store.find_by_name("bob").unwrap().subscriptions;
    assert!(!subs.trim().is_empty());
    assert!(!ngmatch("comp.lang.rust", subs));
    assert!(ngmatch("misc.test", subs));
}

#[test]
fn test_multicast_member_split_out() {
    let mut store = FeedStore::parse(FEEDS, "gryphon", false).unwrap();
    store.change_subscription("dave", "sci", true).unwrap();
    assert_eq!(store.find_by_name("carol").unwrap().subscriptions, "rec");
    let dave = store.find_by_name("dave").unwrap();
    assert!(ngmatch("sci.math", &dave.subscriptions));
    assert!(dave.has_option('F'));
}

#[test]
fn test_write_folds_long_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sys");
    let groups: Vec<String> = (0..30).map(|i| format!("comp.group{i}")).collect();
    fs::write(&path, format!("bob:{}:world::\n", groups.join(","))).unwrap();

    let store = FeedStore::load_from(&path, "gryphon", false).unwrap();
    store.write().unwrap();

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.lines().count() > 1);
    assert!(written.lines().all(|l| l.len() <= 80));
    let reloaded = FeedStore::load_from(&path, "gryphon", false).unwrap();
    let bob = reloaded.find_by_name("bob").unwrap();
    assert_eq!(bob.subscriptions.replace(' ', ""), groups.join(","));
    assert_eq!(bob.distributions, "world");
}
