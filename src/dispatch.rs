//! Per-peer transmission decision
//!
//! [`Dispatcher::dispatch`] decides how one article reaches one feed:
//!
//! 1. an L feed refuses articles that already travelled more hops than
//!    its limit
//! 2. a B or F feed gets the Message-ID appended to its batch file
//! 3. an N feed, when notices are allowed, gets an `ihave` notice
//! 4. anything else is filtered (C, E) and handed to the transport
//!
//! Only step 4 can fail. Nothing here retries.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::article::Headers;
use crate::batch::{append_entry, batch_path};
use crate::config::RelayConfig;
use crate::control::{control_notice, transmit_notice};
use crate::error::Result;
use crate::feeds::Feed;
use crate::filter::filter_file;
use crate::transport::{TransmitRequest, Transport};

/// How an article was handled for one feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The article is past the feed's hop limit
    NotRelayed,
    /// Queued in this batch file
    Batched(PathBuf),
    /// Offered with an `ihave` notice
    Notified,
    /// Handed to the transport
    Transmitted,
    /// Transmission failed
    Failed(String),
}

impl DispatchOutcome {
    /// Whether the feed now has, or will get, the article
    #[must_use]
    pub fn accepted(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Batched(_) | DispatchOutcome::Notified | DispatchOutcome::Transmitted
        )
    }
}

/// Sends single articles to peers
///
/// # Examples
///
/// ```
/// use news_relay::{Feed, RelayConfig};
/// use news_relay::article::Headers;
/// use news_relay::dispatch::{DispatchOutcome, Dispatcher};
/// use news_relay::transport::DryRunTransport;
///
/// let dir = tempfile::tempdir().unwrap();
/// let config = RelayConfig::for_site_root("gryphon", dir.path());
/// let transport = DryRunTransport::new();
/// let dispatcher = Dispatcher::new(&config, &transport);
///
/// let feed = Feed::new("bob", "comp.lang.*").with_options("F");
/// let mut headers = Headers::new("me@gryphon", vec!["comp.lang.rust".into()], "hi");
/// headers.message_id = "<1@gryphon>".into();
///
/// let outcome = dispatcher.dispatch("bob", &feed, &headers, dir.path().join("art").as_path(), true);
/// assert_eq!(outcome, DispatchOutcome::Batched(config.batch_file("bob")));
/// assert!(transport.is_empty());
/// ```
pub struct Dispatcher<'a> {
    config: &'a RelayConfig,
    transport: &'a dyn Transport,
}

impl<'a> Dispatcher<'a> {
    /// Create a dispatcher for one site
    pub fn new(config: &'a RelayConfig, transport: &'a dyn Transport) -> Self {
        Self { config, transport }
    }

    /// Decide and carry out delivery of one article to one feed
    ///
    /// # Arguments
    ///
    /// * `targets` - Systems to send to, usually the feed name
    /// * `feed` - Feed whose options apply
    /// * `headers` - Article headers (Message-ID and Path are used)
    /// * `content` - Spool copy of the article
    /// * `may_notify` - Whether an N feed may be sent an `ihave` notice
    pub fn dispatch(
        &self,
        targets: &str,
        feed: &Feed,
        headers: &Headers,
        content: &Path,
        may_notify: bool,
    ) -> DispatchOutcome {
        if let Some(limit) = feed.hop_limit() {
            let hops = headers.hop_count() as u64;
            if hops > limit {
                debug!(
                    "{}: {} hops, {} takes at most {}",
                    headers.message_id, hops, feed.name, limit
                );
                return DispatchOutcome::NotRelayed;
            }
        }

        let result = if feed.has_option('B') || feed.has_option('F') {
            self.queue(feed, headers)
        } else if feed.has_option('N') && may_notify {
            self.notify(targets, feed, headers)
                .map(|()| DispatchOutcome::Notified)
        } else {
            self.transmit(targets, feed, headers, content)
                .map(|()| DispatchOutcome::Transmitted)
        };

        result.unwrap_or_else(|e| {
            warn!("{}: can't send to {}: {}", headers.message_id, feed.name, e);
            DispatchOutcome::Failed(e.to_string())
        })
    }

    fn queue(&self, feed: &Feed, headers: &Headers) -> Result<DispatchOutcome> {
        let batch = batch_path(self.config, feed);
        append_entry(&batch, &headers.message_id, None)?;
        debug!("{} queued in {}", headers.message_id, batch.display());
        Ok(DispatchOutcome::Batched(batch))
    }

    fn notify(&self, targets: &str, feed: &Feed, headers: &Headers) -> Result<()> {
        let command = format!("ihave {} {}", headers.message_id, self.config.nodename);
        let notice = control_notice(self.config, &feed.name, &command, "")?;
        transmit_notice(self.transport, self.config, targets, feed, &notice)
    }

    fn transmit(&self, targets: &str, feed: &Feed, headers: &Headers, content: &Path) -> Result<()> {
        let filtered = filter_file(feed, content, &self.config.temp_dir, false)?;
        let (file, use_existing) = match &filtered {
            Some(copy) => (copy.path(), false),
            None => (content, true),
        };
        let request = TransmitRequest::new(targets, feed, &headers.message_id, file)
            .using_existing(use_existing);
        self.transport.transmit(&request)
    }
}
