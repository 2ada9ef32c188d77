//! The posting pipeline
//!
//! [`Relay`] owns a site's state and runs every incoming or locally
//! posted article through the same sequence: duplicate check, header
//! sanity, destination compilation, moderation, local filing and peer
//! fan-out.
//!
//! # Example
//!
//! ```
//! use std::fs;
//! use news_relay::{Relay, RelayConfig, PostOutcome};
//! use news_relay::article::parse_article;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = RelayConfig::for_site_root("gryphon", dir.path());
//! fs::create_dir_all(&config.admin_dir).unwrap();
//! fs::write(config.feeds_file(), "ME:all:::\nbob::comp.lang.*::F:\n").unwrap();
//! fs::write(config.active_file(), "comp.lang.rust 0 1 y\njunk 0 1 y\ncontrol 0 1 y\n").unwrap();
//!
//! let mut relay = Relay::open(config).unwrap();
//! let article = parse_article(
//!     "Path: alice\nFrom: a@alice\nNewsgroups: comp.lang.rust\nSubject: hi\nMessage-ID: <1@alice>\n\nhello\n",
//! )
//! .unwrap();
//!
//! match relay.post(article, "").unwrap() {
//!     PostOutcome::Posted { sent_to, .. } => assert_eq!(sent_to, ["bob"]),
//!     other => panic!("{other:?}"),
//! }
//! ```

use std::fs;
use std::io::Write;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::active::ActiveGroups;
use crate::article::{Article, current_date, generate_message_id, parse_article};
use crate::batch::{BatchReport, BatchSender, split_batch};
use crate::broadcast::BroadcastPlanner;
use crate::config::RelayConfig;
use crate::control::ControlOutcome;
use crate::dispatch::Dispatcher;
use crate::error::{RelayError, Result};
use crate::feeds::{FeedStore, MANY_HOPS};
use crate::filter::unpack_payload;
use crate::history::{History, HistoryStatus, MemoryHistory};
use crate::insert::{ArticleStore, InsertOutcome, SiteContext, SpoolStore, insert};
use crate::matching::{SubscriptionIndex, build_index};
use crate::moderation::moderate;
use crate::resolver::{DestinationStatus, GroupResolver};
use crate::tables::GroupTables;
use crate::transport::{CommandMailer, CommandTransport, MailNotifier, Mailer, Notifier, Transport};

const DEFAULT_DISTRIBUTION: &str = "world";

/// What happened to a posted article
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// Already seen, cancelled or expired here
    Duplicate,
    /// Refused before filing
    Rejected(String),
    /// Processed
    Posted {
        /// Message-ID, generated for local postings
        id: String,
        /// `group/number` locations filed under
        stored: Vec<String>,
        /// Feeds that took the article
        sent_to: Vec<String>,
    },
}

/// A news site: its configuration, state and collaborators
pub struct Relay {
    config: RelayConfig,
    feeds: FeedStore,
    active: ActiveGroups,
    tables: GroupTables,
    index: Box<dyn SubscriptionIndex>,
    history: Box<dyn History>,
    store: Box<dyn ArticleStore>,
    transport: Box<dyn Transport>,
    mailer: Box<dyn Mailer>,
    notifier: Box<dyn Notifier>,
}

impl Relay {
    /// Load a site from its configuration
    ///
    /// The feed file must exist; the active file and the auxiliary tables
    /// may be missing. History starts empty, articles go to the spool
    /// directory, and transmission and mail use the configured commands.
    pub fn open(config: RelayConfig) -> Result<Self> {
        let feeds = FeedStore::load(&config)?;
        let active = ActiveGroups::load_or_default(config.active_file())?;
        let tables = GroupTables::load(&config)?;
        info!(
            "site {}: {} feeds, {} groups",
            config.pathname,
            feeds.len(),
            active.len()
        );
        Ok(Self::new(config, feeds, active, tables))
    }

    /// Assemble a site from state already in memory
    pub fn new(config: RelayConfig, feeds: FeedStore, active: ActiveGroups, tables: GroupTables) -> Self {
        let index = build_index(config.subscription_index, feeds.iter(), &active);
        let notifier = MailNotifier::new(CommandMailer::from_config(&config), config.admin_address.clone());
        Self {
            index,
            history: Box::new(MemoryHistory::new()),
            store: Box::new(SpoolStore::from_config(&config)),
            transport: Box::new(CommandTransport::new(&config)),
            mailer: Box::new(CommandMailer::from_config(&config)),
            notifier: Box::new(notifier),
            config,
            feeds,
            active,
            tables,
        }
    }

    /// Replace the history database
    #[must_use]
    pub fn with_history(mut self, history: impl History + 'static) -> Self {
        self.history = Box::new(history);
        self
    }

    /// Replace the article store
    #[must_use]
    pub fn with_store(mut self, store: impl ArticleStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Replace the outbound transport
    #[must_use]
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    /// Replace the mailer used for moderated groups and control replies
    #[must_use]
    pub fn with_mailer(mut self, mailer: impl Mailer + 'static) -> Self {
        self.mailer = Box::new(mailer);
        self
    }

    /// Replace the administrator notifier
    #[must_use]
    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    /// Site configuration
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Configured feeds
    #[must_use]
    pub fn feeds(&self) -> &FeedStore {
        &self.feeds
    }

    /// Active groups
    #[must_use]
    pub fn active(&self) -> &ActiveGroups {
        &self.active
    }

    /// History database
    #[must_use]
    pub fn history(&self) -> &dyn History {
        self.history.as_ref()
    }

    fn rebuild_index(&mut self) {
        self.index = build_index(self.config.subscription_index, self.feeds.iter(), &self.active);
    }

    /// Process one article
    ///
    /// A blank Message-ID marks a local posting: it gets a fresh id, a
    /// Date if it has none, and is offered to moderators. Relayed
    /// articles are checked against the local feed entry before filing.
    ///
    /// # Arguments
    ///
    /// * `article` - The article as received or posted
    /// * `exclusions` - Pattern list of sites not to send to
    pub fn post(&mut self, article: Article, exclusions: &str) -> Result<PostOutcome> {
        let mut article = article;
        let headers = &mut article.headers;
        headers.message_id = headers.message_id.trim().to_string();

        if !headers.message_id.is_empty() {
            let status = self.history.lookup(&headers.message_id);
            if status.is_known() {
                let what = match status {
                    HistoryStatus::Cancelled => "can_art",
                    HistoryStatus::Expired => "exp_art",
                    _ => "dup_art",
                };
                info!(
                    "{} {} dist {} ng {} path {}",
                    what,
                    headers.message_id,
                    headers.distribution.as_deref().unwrap_or_default(),
                    headers.newsgroups_line(),
                    headers.path
                );
                return Ok(PostOutcome::Duplicate);
            }
        }

        if headers.newsgroups.is_empty() {
            warn!("{}: no Newsgroups header", headers.message_id);
            return Ok(PostOutcome::Rejected("no Newsgroups header".to_string()));
        }
        if headers.date.trim().is_empty() {
            headers.date = current_date();
        }

        let originator = headers.message_id.is_empty();
        if originator {
            headers.message_id = generate_message_id(&self.config.pathname);
            info!("posting {} to {}", headers.message_id, headers.newsgroups_line());
        } else {
            info!(
                "art {} dist {} ng {} path {}",
                headers.message_id,
                headers.distribution.as_deref().unwrap_or_default(),
                headers.newsgroups_line(),
                headers.path
            );
        }

        let mut compiled = GroupResolver::new(&self.active, &self.tables).compile(headers);
        let blank_distribution = headers
            .distribution
            .as_deref()
            .is_none_or(|d| d.trim().is_empty());
        if blank_distribution && compiled.distribution != DEFAULT_DISTRIBUTION {
            headers.distribution = Some(compiled.distribution.clone());
        }

        if headers.path_sites().first() != Some(&self.config.pathname.as_str()) {
            headers.prepend_path(&self.config.pathname);
        }

        if originator {
            let mailed = moderate(
                &mut compiled,
                &article,
                &self.active,
                self.config.backbone.as_deref(),
                self.mailer.as_ref(),
            );
            debug!("{} mailed to {} moderators", article.headers.message_id, mailed);
        }

        fs::create_dir_all(&self.config.temp_dir)?;
        let mut file = NamedTempFile::new_in(&self.config.temp_dir)?;
        file.write_all(article.to_spool_text().as_bytes())?;
        file.flush()?;

        let outcome = {
            let mut site = SiteContext {
                config: &self.config,
                feeds: &mut self.feeds,
                active: &mut self.active,
                tables: &mut self.tables,
                history: self.history.as_mut(),
                store: self.store.as_ref(),
                transport: self.transport.as_ref(),
                notifier: self.notifier.as_ref(),
                mailer: self.mailer.as_ref(),
            };
            insert(&mut site, &mut compiled, &article, file.path(), originator)?
        };
        if self.active.path().is_some() {
            self.active.write()?;
        }
        if let InsertOutcome::Control { outcome, .. } = &outcome {
            if !matches!(outcome, ControlOutcome::Refused(_)) {
                self.rebuild_index();
            }
        }

        let id = article.headers.message_id.clone();
        let stored: Vec<String> = outcome.locations().into_iter().map(str::to_string).collect();
        if !outcome.may_broadcast() {
            return Ok(PostOutcome::Posted {
                id,
                stored,
                sent_to: Vec::new(),
            });
        }

        let mailed = compiled
            .destinations
            .iter()
            .filter(|d| d.status == DestinationStatus::Mailed)
            .count();
        let mut hops = if compiled.destinations.len() <= mailed {
            MANY_HOPS
        } else {
            0
        };
        let max_hops = self.feeds.max_hop_limit();
        if max_hops < MANY_HOPS {
            hops += article.headers.hop_count() as u64;
        }

        let sent_to = if max_hops >= hops {
            let dispatcher = Dispatcher::new(&self.config, self.transport.as_ref());
            BroadcastPlanner::new(&self.feeds, &self.config.pathname, self.index.as_ref()).broadcast(
                &dispatcher,
                &article.headers,
                &compiled,
                file.path(),
                exclusions,
            )
        } else {
            debug!("{}: {} hops, not relayed", id, hops);
            Vec::new()
        };

        Ok(PostOutcome::Posted {
            id,
            stored,
            sent_to,
        })
    }

    /// Process every article in an rnews batch
    ///
    /// Each article is decoded on its own, so a stray 8-bit byte only
    /// affects the article it is in. Articles that fail to parse or to
    /// post are logged and skipped.
    pub fn receive_batch(&mut self, data: &[u8], exclusions: &str) -> Vec<PostOutcome> {
        let mut outcomes = Vec::new();
        for raw in split_batch(data) {
            let article = match parse_article(&String::from_utf8_lossy(raw)) {
                Ok(article) => article,
                Err(e) => {
                    warn!("unparsable article in batch: {}", e);
                    continue;
                }
            };
            match self.post(article, exclusions) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("posting failed: {}", e),
            }
        }
        outcomes
    }

    /// Unpack a received payload (plain, compressed or encoded) and post it
    pub fn receive_payload(&mut self, data: &[u8], exclusions: &str) -> Result<Vec<PostOutcome>> {
        let unpacked = unpack_payload(data)?;
        Ok(self.receive_batch(&unpacked, exclusions))
    }

    /// Edit a peer's subscriptions and rewrite the feed file
    pub fn change_subscription(&mut self, site: &str, groups: &str, add: bool) -> Result<()> {
        self.feeds.change_subscription(site, groups, add)?;
        if self.feeds.path().is_some() {
            self.feeds.write()?;
        }
        self.rebuild_index();
        Ok(())
    }

    /// Send what is queued for one feed
    pub fn send_batch(&self, site: &str) -> Result<BatchReport> {
        let feed = self
            .feeds
            .find_by_name(site)
            .ok_or_else(|| RelayError::NoSuchFeed(site.to_string()))?;
        BatchSender::new(&self.config, self.transport.as_ref()).send(feed, self.history.as_ref())
    }

    /// Send what is queued for every batched feed
    ///
    /// A feed that fails is logged and its queue left for the next run.
    pub fn send_batches(&self) -> Vec<(String, BatchReport)> {
        let sender = BatchSender::new(&self.config, self.transport.as_ref());
        self.feeds
            .iter()
            .filter(|feed| feed.name != self.config.pathname)
            .filter(|feed| feed.has_option('B') || feed.has_option('F'))
            .filter_map(|feed| match sender.send(feed, self.history.as_ref()) {
                Ok(report) => Some((feed.name.clone(), report)),
                Err(e) => {
                    warn!("batch for {} not sent: {}", feed.name, e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::transport::DryRunTransport;

    #[derive(Default, Clone)]
    struct Outbox {
        sent: Rc<RefCell<Vec<String>>>,
    }

    impl Mailer for Outbox {
        fn send(&self, to: &str, _subject: &str, _body: &str) -> Result<()> {
            self.sent.borrow_mut().push(to.to_string());
            Ok(())
        }
    }

    const ACTIVE: &str = "\
comp.lang.rust 0 1 y
comp.std.c 0 1 m
misc.test 0 1 y
junk 0 1 y
control 0 1 y
";

    struct Site {
        _dir: tempfile::TempDir,
        relay: Relay,
        transport: Rc<DryRunTransport>,
        outbox: Outbox,
    }

    fn site(feeds: &str) -> Site {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::for_site_root("gryphon", dir.path());
        fs::create_dir_all(&config.admin_dir).unwrap();
        fs::write(config.feeds_file(), feeds).unwrap();
        fs::write(config.active_file(), ACTIVE).unwrap();
        fs::write(config.mailpaths_file(), "comp.std.c std-c@moderators\n").unwrap();

        let transport = Rc::new(DryRunTransport::new());
        let outbox = Outbox::default();
        let relay = Relay::open(config)
            .unwrap()
            .with_transport(Rc::clone(&transport))
            .with_mailer(outbox.clone())
            .with_notifier(crate::transport::LogNotifier);
        Site {
            _dir: dir,
            relay,
            transport,
            outbox,
        }
    }

    fn relayed(id: &str, groups: &str, path: &str) -> Article {
        parse_article(&format!(
            "Path: {path}\nFrom: a@alice\nNewsgroups: {groups}\nSubject: s\nMessage-ID: {id}\n\nbody\n"
        ))
        .unwrap()
    }

    #[test]
    fn test_batched_peer_end_to_end() {
        let mut s = site("ME:all:::\nbob::comp.lang.*::F:\n");
        let outcome = s.relay.post(relayed("<1@alice>", "comp.lang.rust", "alice"), "").unwrap();
        assert_eq!(
            outcome,
            PostOutcome::Posted {
                id: "<1@alice>".into(),
                stored: vec!["comp.lang.rust/1".into()],
                sent_to: vec!["bob".into()],
            }
        );
        let queued = fs::read_to_string(s.relay.config().batch_file("bob")).unwrap();
        assert_eq!(queued, "<1@alice>\n");
        assert!(s.transport.is_empty());

        let again = s.relay.post(relayed("<1@alice>", "comp.lang.rust", "carol"), "").unwrap();
        assert_eq!(again, PostOutcome::Duplicate);
    }

    #[test]
    fn test_local_posting_stamped() {
        let mut s = site("ME:all:::\nbob:all:::\n");
        let article = parse_article("From: me@gryphon\nNewsgroups: misc.test\nSubject: s\n\nhi\n").unwrap();
        let PostOutcome::Posted { id, stored, sent_to } = s.relay.post(article, "").unwrap() else {
            panic!("not posted");
        };
        assert!(id.ends_with("@gryphon>"));
        assert_eq!(stored, ["misc.test/1"]);
        assert_eq!(sent_to, ["bob"]);
        let payload = &s.transport.sent()[0].payload;
        assert!(payload.starts_with("Path: gryphon\n"));
        assert!(payload.contains("Date: "));
        assert!(s.relay.history().lookup(&id).is_known());
    }

    #[test]
    fn test_moderated_posting_mailed() {
        let mut s = site("ME:all:::\nbob:all::L:\n");
        let article = parse_article("From: me@gryphon\nNewsgroups: comp.std.c\nSubject: s\n\nhi\n").unwrap();
        let PostOutcome::Posted { stored, sent_to, .. } = s.relay.post(article, "").unwrap() else {
            panic!("not posted");
        };
        assert!(stored.is_empty());
        assert!(sent_to.is_empty());
        assert_eq!(s.outbox.sent.borrow().as_slice(), ["std-c@moderators"]);
    }

    #[test]
    fn test_hop_limits_stop_broadcast() {
        let mut s = site("ME:all:::\nbob:all::L1:\n");
        let far = s
            .relay
            .post(relayed("<2@alice>", "misc.test", "carol!alice"), "")
            .unwrap();
        assert!(matches!(far, PostOutcome::Posted { ref sent_to, .. } if sent_to.is_empty()));

        let near = s.relay.post(relayed("<3@alice>", "misc.test", "alice"), "").unwrap();
        assert!(matches!(near, PostOutcome::Posted { ref sent_to, .. } if sent_to == &["bob"]));
    }

    #[test]
    fn test_missing_newsgroups_rejected() {
        let mut s = site("ME:all:::\n");
        let article = parse_article("From: me@gryphon\nSubject: s\nMessage-ID: <4@x>\n\nhi\n").unwrap();
        assert!(matches!(s.relay.post(article, "").unwrap(), PostOutcome::Rejected(_)));
    }

    #[test]
    fn test_receive_batch_and_exclusions() {
        let mut s = site("ME:all:::\nbob:all:::\ncarol:all:::\n");
        let a = "Path: alice\nFrom: a@alice\nNewsgroups: misc.test\nSubject: s\nMessage-ID: <5@alice>\n\nx\n";
        let b = "Path: alice\nFrom: a@alice\nNewsgroups: comp.lang.rust\nSubject: s\nMessage-ID: <6@alice>\n\ny\n";
        let batch = format!("#! rnews {}\n{a}#! rnews {}\n{b}", a.len(), b.len());
        let outcomes = s.relay.receive_payload(format!("#! unbatch\n{batch}").as_bytes(), "carol").unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(s.transport.sent().iter().all(|c| c.systems == "bob"));
        assert_eq!(s.transport.len(), 2);
    }

    #[test]
    fn test_receive_batch_with_8bit_article() {
        let mut s = site("ME:all:::\nbob:all:::\n");
        let first = b"Path: alice\nFrom: a@alice\nNewsgroups: misc.test\nSubject: caf\xe9\nMessage-ID: <e1@alice>\n\nx\n";
        let second = b"Path: alice\nFrom: a@alice\nNewsgroups: misc.test\nSubject: tea\nMessage-ID: <e2@alice>\n\ny\n";
        let mut batch = format!("#! rnews {}\n", first.len()).into_bytes();
        batch.extend_from_slice(first);
        batch.extend_from_slice(format!("#! rnews {}\n", second.len()).as_bytes());
        batch.extend_from_slice(second);

        let outcomes = s.relay.receive_payload(&batch, "").unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(s.relay.history().lookup("<e1@alice>").is_known());
        assert!(s.relay.history().lookup("<e2@alice>").is_known());
    }

    #[test]
    fn test_subscription_change_persisted() {
        let mut s = site("ME:all:::\nbob:comp:::\n");
        s.relay.change_subscription("bob", "misc.test", true).unwrap();
        let reloaded = FeedStore::load(s.relay.config()).unwrap();
        assert!(crate::ngmatch("misc.test", &reloaded.find_by_name("bob").unwrap().subscriptions));

        let outcome = s.relay.post(relayed("<7@alice>", "misc.test", "alice"), "").unwrap();
        assert!(matches!(outcome, PostOutcome::Posted { ref sent_to, .. } if sent_to == &["bob"]));
    }

    #[test]
    fn test_send_batches() {
        let mut s = site("ME:all:::\nbob:all::F:\n");
        s.relay.post(relayed("<8@alice>", "misc.test", "alice"), "").unwrap();
        let reports = s.relay.send_batches();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.articles, 1);
        assert!(s.transport.sent()[0].batched);
        assert!(matches!(s.relay.send_batch("nobody"), Err(RelayError::NoSuchFeed(_))));
    }
}
