//! Fan-out to peers

use std::fs;

use news_relay::article::Headers;
use news_relay::broadcast::{BroadcastPlanner, back_path};
use news_relay::matching::ScanIndex;
use news_relay::resolver::{CompiledArticle, Destination};
use news_relay::transport::DryRunTransport;
use news_relay::{Dispatcher, FeedStore, RelayConfig};

fn compiled(groups: &[&str]) -> CompiledArticle {
    CompiledArticle {
        newsgroups: groups.iter().map(|g| g.to_string()).collect(),
        distribution: "world".into(),
        control: false,
        destinations: groups.iter().map(|g| Destination::resolved(*g)).collect(),
    }
}

fn headers(path: &str) -> Headers {
    let mut h = Headers::new("a@alice", vec!["misc.test".into()], "s");
    h.message_id = "<1@alice>".into();
    h.path = path.into();
    h
}

#[test]
fn test_sites_on_path_skipped() {
    let feeds = FeedStore::parse("ME:all:::\nalice:all:::\nbob:all:::\n", "gryphon", false).unwrap();
    let planner = BroadcastPlanner::new(&feeds, "gryphon", &ScanIndex);
    let plan = planner.plan(&headers("gryphon!alice"), &compiled(&["misc.test"]), "");
    let names: Vec<&str> = plan.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["bob"]);
}

#[test]
fn test_no_send_list() {
    let feeds = FeedStore::parse("bob/eve:all:::\ncarol:all:::\n", "gryphon", false).unwrap();
    let planner = BroadcastPlanner::new(&feeds, "gryphon", &ScanIndex);
    let plan = planner.plan(&headers("gryphon!eve!alice"), &compiled(&["misc.test"]), "");
    let names: Vec<&str> = plan.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["carol"]);
}

#[test]
fn test_back_path_without_approval() {
    assert_eq!(back_path(&headers("gryphon!modhost!alice")), ["gryphon", "modhost", "alice"]);
}

#[test]
fn test_broadcast_dispatches_each_feed() {
    let dir = tempfile::tempdir().unwrap();
    let config = RelayConfig::for_site_root("gryphon", dir.path());
    let transport = DryRunTransport::new();
    let dispatcher = Dispatcher::new(&config, &transport);
    let file = dir.path().join("article");
    fs::write(&file, "Path: gryphon!alice\n\nbody\n").unwrap();

    let feeds = FeedStore::parse("ME:all:::\nbob:misc::F:\ncarol:misc:::\ndave:comp:::\n", "gryphon", false).unwrap();
    let planner = BroadcastPlanner::new(&feeds, "gryphon", &ScanIndex);
    let sent = planner.broadcast(&dispatcher, &headers("gryphon!alice"), &compiled(&["misc.test"]), &file, "");

    assert_eq!(sent, ["bob", "carol"]);
    assert_eq!(fs::read_to_string(config.batch_file("bob")).unwrap(), "<1@alice>\n");
    let copies = transport.sent();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].systems, "carol");
}
