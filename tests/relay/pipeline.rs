//! Articles through the whole posting pipeline

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use news_relay::article::parse_article;
use news_relay::transport::{DryRunTransport, LogNotifier, Mailer};
use news_relay::{Article, PostOutcome, Relay, RelayConfig};

const ACTIVE: &str = "\
comp.lang.rust 0 1 y
comp.std.c 0 1 m
misc.test 0 1 y
junk 0 1 y
control 0 1 y
";

#[derive(Default, Clone)]
struct Outbox {
    sent: Rc<RefCell<Vec<(String, String)>>>,
}

impl Mailer for Outbox {
    fn send(&self, to: &str, subject: &str, _body: &str) -> news_relay::Result<()> {
        self.sent.borrow_mut().push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

struct Site {
    _dir: tempfile::TempDir,
    relay: Relay,
    transport: Rc<DryRunTransport>,
    outbox: Outbox,
}

fn site(name: &str, feeds: &str) -> Site {
    let dir = tempfile::tempdir().unwrap();
    let config = RelayConfig::for_site_root(name, dir.path());
    fs::create_dir_all(&config.admin_dir).unwrap();
    fs::write(config.feeds_file(), feeds).unwrap();
    fs::write(config.active_file(), ACTIVE).unwrap();
    fs::write(config.mailpaths_file(), "comp.std.c std-c@moderators.example\n").unwrap();

    let transport = Rc::new(DryRunTransport::new());
    let outbox = Outbox::default();
    let relay = Relay::open(config)
        .unwrap()
        .with_transport(Rc::clone(&transport))
        .with_mailer(outbox.clone())
        .with_notifier(LogNotifier);
    Site {
        _dir: dir,
        relay,
        transport,
        outbox,
    }
}

fn relayed(id: &str, groups: &str, path: &str) -> Article {
    parse_article(&format!(
        "Path: {path}\nFrom: a@alice\nNewsgroups: {groups}\nSubject: s\nMessage-ID: {id}\n\nbody of {id}\n"
    ))
    .unwrap()
}

fn sent_to(outcome: &PostOutcome) -> Vec<String> {
    match outcome {
        PostOutcome::Posted { sent_to, .. } => sent_to.clone(),
        other => panic!("not posted: {other:?}"),
    }
}

#[test]
fn test_batched_feed_without_transport() {
    let mut s = site("gryphon", "ME:all:::\nbob::comp.lang.*::F:\n");
    let outcome = s
        .relay
        .post(relayed("<1@alice>", "comp.lang.rust", "alice"), "")
        .unwrap();

    assert_eq!(sent_to(&outcome), ["bob"]);
    let queued = fs::read_to_string(s.relay.config().batch_file("bob")).unwrap();
    assert_eq!(queued, "<1@alice>\n");
    assert!(s.transport.is_empty());
}

#[test]
fn test_duplicates_dropped() {
    let mut s = site("gryphon", "ME:all:::\nbob:all:::\n");
    s.relay.post(relayed("<2@alice>", "misc.test", "alice"), "").unwrap();
    let again = s.relay.post(relayed("<2@alice>", "misc.test", "carol!alice"), "").unwrap();
    assert_eq!(again, PostOutcome::Duplicate);
    assert_eq!(s.transport.len(), 1);
}

#[test]
fn test_path_loop_not_sent_back() {
    let mut s = site("gryphon", "ME:all:::\nalice:all:::\nbob:all:::\n");
    let outcome = s.relay.post(relayed("<3@alice>", "misc.test", "alice"), "").unwrap();
    assert_eq!(sent_to(&outcome), ["bob"]);

    let copy = &s.transport.sent()[0];
    assert_eq!(copy.systems, "bob");
    assert!(copy.payload.starts_with("Path: gryphon!alice\n"));
}

#[test]
fn test_local_distribution_stays_home() {
    let mut s = site("gryphon", "ME:all:world,local::\nbob:misc:world,!local::\n");
    let article = parse_article(
        "Path: alice\nFrom: a@alice\nNewsgroups: misc.test\nDistribution: local\nSubject: s\nMessage-ID: <4@alice>\n\nx\n",
    )
    .unwrap();
    let outcome = s.relay.post(article, "").unwrap();
    assert!(sent_to(&outcome).is_empty());
    assert!(matches!(outcome, PostOutcome::Posted { ref stored, .. } if stored == &["misc.test/1"]));
}

#[test]
fn test_moderated_posting_goes_to_moderator() {
    let mut s = site("gryphon", "ME:all:::\nbob:all:::\n");
    let article = parse_article("From: me@gryphon\nNewsgroups: comp.std.c\nSubject: question\n\nhi\n").unwrap();
    let outcome = s.relay.post(article, "").unwrap();

    assert!(matches!(outcome, PostOutcome::Posted { ref stored, .. } if stored.is_empty()));
    assert_eq!(
        s.outbox.sent.borrow().as_slice(),
        [("std-c@moderators.example".to_string(), "question".to_string())]
    );
}

#[test]
fn test_compressed_batch_between_sites() {
    let mut upstream = site("gryphon", "ME:all:::\nbob:all::FBCE:\n");
    upstream.relay.post(relayed("<5@alice>", "misc.test", "alice"), "").unwrap();
    upstream.relay.post(relayed("<6@alice>", "comp.lang.rust", "alice"), "").unwrap();

    let report = upstream.relay.send_batch("bob").unwrap();
    assert_eq!(report.articles, 2);
    let payload = upstream.transport.sent()[0].payload.clone();
    assert!(payload.starts_with("#! c7unbatch\n"));

    let mut downstream = site("bob", "ME:all:::\ngryphon:all:::\ncarol:all:::\n");
    let outcomes = downstream.relay.receive_payload(payload.as_bytes(), "").unwrap();
    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        assert_eq!(sent_to(outcome), ["carol"]);
    }
    assert!(downstream.relay.history().lookup("<6@alice>").is_known());
}
