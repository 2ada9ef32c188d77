//! Control messages through the posting pipeline

use std::fs;
use std::rc::Rc;

use news_relay::article::parse_article;
use news_relay::history::HistoryStatus;
use news_relay::transport::{DryRunTransport, LogNotifier, TransmitRequest, Transport};
use news_relay::{FeedStore, PostOutcome, Relay, RelayConfig, RelayError, ngmatch};

struct Unreachable;

impl Transport for Unreachable {
    fn transmit(&self, request: &TransmitRequest<'_>) -> news_relay::Result<()> {
        Err(RelayError::Transport {
            site: request.systems.to_string(),
            message: "no route".into(),
        })
    }
}

struct Site {
    _dir: tempfile::TempDir,
    relay: Relay,
    transport: Rc<DryRunTransport>,
}

fn site(feeds: &str) -> Site {
    let dir = tempfile::tempdir().unwrap();
    let config = RelayConfig::for_site_root("gryphon", dir.path());
    fs::create_dir_all(&config.admin_dir).unwrap();
    fs::write(config.feeds_file(), feeds).unwrap();
    fs::write(config.active_file(), "misc.test 0 1 y\njunk 0 1 y\ncontrol 0 1 y\n").unwrap();

    let transport = Rc::new(DryRunTransport::new());
    let relay = Relay::open(config)
        .unwrap()
        .with_transport(Rc::clone(&transport))
        .with_notifier(LogNotifier);
    Site {
        _dir: dir,
        relay,
        transport,
    }
}

fn control(id: &str, from: &str, command: &str, extra: &str) -> news_relay::Article {
    parse_article(&format!(
        "Path: alice\nFrom: {from}\nNewsgroups: misc.test\nSubject: cmsg {command}\nControl: {command}\n{extra}Message-ID: {id}\n\n\n"
    ))
    .unwrap()
}

#[test]
fn test_newgroup_needs_approval() {
    let mut s = site("ME:all:::\n");
    s.relay
        .post(control("<c1@alice>", "admin@alice", "newgroup comp.lang.rust", ""), "")
        .unwrap();
    assert!(!s.relay.active().contains("comp.lang.rust"));

    s.relay
        .post(
            control("<c2@alice>", "admin@alice", "newgroup comp.lang.rust", "Approved: admin@alice\n"),
            "",
        )
        .unwrap();
    assert!(s.relay.active().contains("comp.lang.rust"));

    let reloaded = fs::read_to_string(s.relay.config().active_file()).unwrap();
    assert!(reloaded.contains("comp.lang.rust"));
}

#[test]
fn test_cancel_by_author() {
    let mut s = site("ME:all:::\n");
    let original = parse_article(
        "Path: alice\nFrom: joe@alice.example\nNewsgroups: misc.test\nSubject: s\nMessage-ID: <a1@alice>\n\nbody\n",
    )
    .unwrap();
    s.relay.post(original, "").unwrap();

    s.relay
        .post(control("<c3@alice>", "mallory@evil", "cancel <a1@alice>", ""), "")
        .unwrap();
    assert_eq!(s.relay.history().lookup("<a1@alice>"), HistoryStatus::Seen);

    s.relay
        .post(control("<c4@alice>", "joe@alice.example", "cancel <a1@alice>", ""), "")
        .unwrap();
    assert_eq!(s.relay.history().lookup("<a1@alice>"), HistoryStatus::Cancelled);
}

#[test]
fn test_addsub_rewrites_feed_file() {
    let mut s = site("ME:all:::\nbob:comp:::\n");
    s.relay
        .post(control("<c5@bob>", "news@bob", "addsub bob misc.test", ""), "")
        .unwrap();

    let reloaded = FeedStore::load(s.relay.config()).unwrap();
    assert!(ngmatch("misc.test", &reloaded.find_by_name("bob").unwrap().subscriptions));
}

#[test]
fn test_sendme_queues_ids() {
    let mut s = site("ME:all:::\nbob:all::F:\n");
    let original = parse_article(
        "Path: alice\nFrom: a@alice\nNewsgroups: misc.test\nSubject: s\nMessage-ID: <a2@alice>\n\nbody\n",
    )
    .unwrap();
    s.relay.post(original, "bob").unwrap();

    let outcome = s
        .relay
        .post(control("<c6@bob>", "news@bob", "sendme <a2@alice> bob", ""), "bob")
        .unwrap();
    assert!(matches!(outcome, PostOutcome::Posted { .. }));
    let queued = fs::read_to_string(s.relay.config().batch_file("bob")).unwrap();
    assert!(queued.lines().any(|l| l == "<a2@alice>"));
    assert!(s.transport.is_empty());
}

#[test]
fn test_sendme_reaches_unbatched_peer() {
    let mut s = site("ME:all:::\nbob:all:::\n");
    let original = parse_article(
        "Path: alice\nFrom: a@alice\nNewsgroups: misc.test\nSubject: s\nMessage-ID: <a3@alice>\n\nbody\n",
    )
    .unwrap();
    s.relay.post(original, "bob").unwrap();
    assert!(s.transport.is_empty());

    s.relay
        .post(control("<c7@bob>", "news@bob", "sendme <a3@alice> bob", ""), "bob")
        .unwrap();
    let sent = s.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].systems, "bob");
    assert!(sent[0].payload.contains("Message-ID: <a3@alice>\n"));
    assert!(!s.relay.config().batch_file("bob").exists());
}

#[test]
fn test_failed_reply_does_not_lose_the_message() {
    let dir = tempfile::tempdir().unwrap();
    let config = RelayConfig::for_site_root("gryphon", dir.path());
    fs::create_dir_all(&config.admin_dir).unwrap();
    fs::write(config.feeds_file(), "ME:all:::\nbob:all:::\n").unwrap();
    fs::write(config.active_file(), "misc.test 0 1 y\njunk 0 1 y\ncontrol 0 1 y\n").unwrap();
    let mut relay = Relay::open(config)
        .unwrap()
        .with_transport(Unreachable)
        .with_notifier(LogNotifier);

    let outcome = relay
        .post(control("<x1@bob>", "news@bob", "ihave <x9@bob> bob", ""), "")
        .unwrap();
    assert!(matches!(outcome, PostOutcome::Posted { ref stored, .. } if stored == &["control/1"]));
    assert_eq!(relay.history().lookup("<x1@bob>"), HistoryStatus::Seen);
}
