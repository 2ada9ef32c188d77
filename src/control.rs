//! Control message handling
//!
//! Control messages are acted on when they are filed locally and then
//! relayed like any other article. The handlers:
//!
//! | Command | Effect |
//! |---|---|
//! | `cancel <id>` | removes the stored copies, if the canceller wrote the article |
//! | `newgroup group [moderated]` | creates groups or flips their moderation (Approved required) |
//! | `rmgroup group...` | marks groups removed (Approved required) |
//! | `ihave <id>... site` | asks `site` for the articles not seen here |
//! | `sendme <id>... site` | sends the requested articles to `site` (`sendbad` is the same) |
//! | `addsub site groups` | adds subscriptions within the site's flex patterns |
//! | `delsub site groups` | removes subscriptions |
//! | `sendsys [site]` | mails the feed records back to the sender |
//! | `senduuname` | mails the output of the uuname command back to the sender |
//! | `version` | mails the running version back to the sender |
//! | `checkgroups`, anything else | reported to the administrator |
//!
//! Requests between peers travel in the pseudo-group `to.<site>.ctl`;
//! [`control_notice`] builds them and [`transmit_notice`] sends them.
//!
//! A handler never fails the article it came in: a reply that can't be
//! sent or a file that can't be rewritten is logged and reported as
//! [`ControlOutcome::Failed`], and the message is still filed.

use std::fs;
use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::acceptance::accept_compiled;
use crate::article::{Article, ArticleBuilder, ControlMessage, generate_message_id, parse_article};
use crate::config::RelayConfig;
use crate::dispatch::Dispatcher;
use crate::error::{RelayError, Result};
use crate::feeds::{Feed, format_record};
use crate::history::HistoryStatus;
use crate::insert::SiteContext;
use crate::matching::ngmatch;
use crate::resolver::{GroupResolver, compile_group_arguments, validate_group_name};
use crate::transport::{Transport, TransmitRequest};

/// Version reported to `version` requests and in unrecognized-message notices
pub const NEWS_VERSION: &str = concat!("news-relay ", env!("CARGO_PKG_VERSION"));

/// What a control handler did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// An article was withdrawn
    Cancelled {
        /// Cancelled article
        message_id: String,
        /// Stored copies deleted
        removed: usize,
    },
    /// Groups created or reopened
    GroupsCreated(Vec<String>),
    /// Groups marked removed
    GroupsRemoved(Vec<String>),
    /// A sendme request went back to the offering site
    Requested {
        /// Site that made the offer
        relayer: String,
        /// Articles asked for
        count: usize,
    },
    /// Requested articles were handed to a peer
    Queued {
        /// Requesting site
        relayer: String,
        /// Articles queued, batched or transmitted
        count: usize,
    },
    /// A peer's subscriptions were changed
    SubscriptionChanged {
        /// Peer whose feed record changed
        site: String,
    },
    /// Information was mailed back to the sender
    Answered {
        /// Address the reply went to
        to: String,
    },
    /// Passed on to the administrator
    Reported(String),
    /// Ignored, with the reason
    Refused(String),
    /// Could not be carried out, with the reason
    Failed(String),
}

/// Build a control article addressed to a peer's `to.<feed>.ctl` group
///
/// # Examples
///
/// ```
/// use news_relay::RelayConfig;
/// use news_relay::control::control_notice;
///
/// let config = RelayConfig::new("gryphon", "/etc/news", "/var/spool/news");
/// let notice = control_notice(&config, "bob", "sendme <1@bob> gryphon", "").unwrap();
/// assert_eq!(notice.headers.newsgroups, vec!["to.bob.ctl"]);
/// assert_eq!(notice.headers.control.as_deref(), Some("sendme <1@bob> gryphon"));
/// ```
pub fn control_notice(
    config: &RelayConfig,
    feed_name: &str,
    command: &str,
    body: &str,
) -> Result<Article> {
    ArticleBuilder::new()
        .from(format!("news@{}", config.pathname))
        .subject(command)
        .newsgroups(vec![format!("to.{feed_name}.ctl")])
        .control(command)
        .path(config.pathname.clone())
        .message_id(generate_message_id(&config.pathname))
        .body(body)
        .build()
}

/// Write article text to a scratch file
fn scratch_copy(config: &RelayConfig, text: &str) -> Result<NamedTempFile> {
    fs::create_dir_all(&config.temp_dir)?;
    let mut file = NamedTempFile::new_in(&config.temp_dir)?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Write a notice to a scratch file and hand it to the transport
pub fn transmit_notice(
    transport: &dyn Transport,
    config: &RelayConfig,
    targets: &str,
    feed: &Feed,
    notice: &Article,
) -> Result<()> {
    let file = scratch_copy(config, &notice.to_spool_text())?;
    let request = TransmitRequest::new(targets, feed, &notice.headers.message_id, file.path());
    transport.transmit(&request)
}

/// Act on one control message
///
/// Failures to notify the administrator are logged and otherwise ignored.
pub fn handle_control(
    site: &mut SiteContext<'_>,
    article: &Article,
    message: &ControlMessage,
) -> ControlOutcome {
    debug!("{}: control {}", article.headers.message_id, message.name());
    match message {
        ControlMessage::Cancel { message_id } => cancel(site, article, message_id),
        ControlMessage::Newgroup { arguments } => newgroup(site, article, arguments),
        ControlMessage::Rmgroup { groups } => rmgroup(site, article, groups),
        ControlMessage::Checkgroups => {
            notify(site, "checkgroups control message", &article.to_spool_text());
            ControlOutcome::Reported("checkgroups".to_string())
        }
        ControlMessage::Ihave {
            message_ids,
            relayer,
        } => ihave(site, article, message_ids, relayer.as_deref()),
        ControlMessage::Sendme {
            message_ids,
            relayer,
        } => sendme(site, article, message_ids, relayer.as_deref()),
        ControlMessage::Addsub { site: peer, groups } => addsub(site, article, peer, groups),
        ControlMessage::Delsub { site: peer, groups } => delsub(site, article, peer, groups),
        ControlMessage::Sendsys { site: pattern } => sendsys(site, article, pattern.as_deref()),
        ControlMessage::Senduuname => senduuname(site, article),
        ControlMessage::Version => version(site, article),
        ControlMessage::Unknown { value } => {
            let body = format!(
                "Currently running news version {}.\n\n{}",
                NEWS_VERSION,
                article.to_spool_text()
            );
            notify(site, "Unrecognized Control Message", &body);
            ControlOutcome::Reported(value.clone())
        }
    }
}

fn notify(site: &SiteContext<'_>, subject: &str, body: &str) {
    if let Err(e) = site.notifier.notify(subject, body) {
        warn!("can't notify administrator of {}: {}", subject, e);
    }
}

/// Log a failed step and turn it into an outcome
fn failed(what: &str, e: &RelayError) -> ControlOutcome {
    warn!("{}: {}", what, e);
    ControlOutcome::Failed(format!("{what}: {e}"))
}

fn approved(article: &Article) -> bool {
    article
        .headers
        .approved
        .as_deref()
        .is_some_and(|a| !a.trim().is_empty())
}

/// Where replies to an article go: Reply-To, else From
fn reply_address(article: &Article) -> &str {
    article
        .headers
        .extra_header("Reply-To")
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| article.headers.from.trim())
}

/// Mail `body` back to the sender of `article`
fn reply(site: &SiteContext<'_>, article: &Article, subject: &str, body: &str) -> ControlOutcome {
    let to = reply_address(article);
    match site.mailer.send(to, subject, body) {
        Ok(()) => {
            info!("sent \"{}\" to {}", subject, to);
            ControlOutcome::Answered { to: to.to_string() }
        }
        Err(e) => failed(&format!("can't mail {to}"), &e),
    }
}

/// Header block of an article, without the body
fn header_text(article: &Article) -> String {
    let text = article.to_spool_text();
    match text.split_once("\n\n") {
        Some((headers, _)) => format!("{headers}\n"),
        None => text,
    }
}

/// Leading part of an address used to compare authors
fn author_key(from: &str) -> &str {
    let from = from.trim();
    match from.find(['.', ' ']) {
        Some(pos) => &from[..pos],
        None => from,
    }
}

fn cancel(site: &mut SiteContext<'_>, article: &Article, message_id: &str) -> ControlOutcome {
    match site.history.lookup(message_id) {
        HistoryStatus::Cancelled | HistoryStatus::Expired => {
            info!("cancel {}: already gone", message_id);
            return ControlOutcome::Cancelled {
                message_id: message_id.to_string(),
                removed: 0,
            };
        }
        HistoryStatus::Unseen | HistoryStatus::Seen => {}
    }

    let locations: Vec<String> = site
        .history
        .locations(message_id)
        .map(<[String]>::to_vec)
        .unwrap_or_default();

    if let Some(original) = locations
        .first()
        .and_then(|location| site.store.read(location).ok())
        .and_then(|text| parse_article(&text).ok())
    {
        let canceller = article
            .headers
            .extra_header("Sender")
            .unwrap_or(&article.headers.from)
            .trim();
        if !canceller.starts_with(author_key(&original.headers.from)) {
            warn!(
                "cancel {} by {} refused: article is from {}",
                message_id, canceller, original.headers.from
            );
            return ControlOutcome::Refused(format!("{canceller} is not the author of {message_id}"));
        }
    }

    let mut removed = 0;
    for location in &locations {
        match site.store.remove(location) {
            Ok(()) => removed += 1,
            Err(e) => warn!("cancel {}: can't remove {}: {}", message_id, location, e),
        }
    }
    site.history.cancel(message_id);
    info!("cancelled {} ({} copies)", message_id, removed);
    ControlOutcome::Cancelled {
        message_id: message_id.to_string(),
        removed,
    }
}

fn write_active(site: &SiteContext<'_>) -> Result<()> {
    if site.active.path().is_some() {
        site.active.write()?;
    }
    Ok(())
}

fn newgroup(site: &mut SiteContext<'_>, article: &Article, arguments: &str) -> ControlOutcome {
    if !approved(article) {
        info!("newgroup {} without Approved ignored", arguments);
        return ControlOutcome::Refused("newgroup requires approval".to_string());
    }

    let mut created = Vec::new();
    for group in compile_group_arguments(arguments) {
        if let Err(e) = validate_group_name(&group.name) {
            warn!("{}", e);
            continue;
        }
        if site.active.create(&group.name, group.moderated) {
            info!("newgroup {} created", group.name);
            created.push(group.name);
        } else {
            debug!("newgroup {}: moderation now {}", group.name, group.moderated);
        }
    }

    if let Err(e) = write_active(site) {
        return failed("can't rewrite the active file", &e);
    }
    let subject = format!("newgroup {arguments}");
    let body = format!(
        "{} requested newgroup {}, approved by {}\n",
        article.headers.from,
        arguments,
        article.headers.approved.as_deref().unwrap_or_default()
    );
    notify(site, &subject, &body);
    ControlOutcome::GroupsCreated(created)
}

fn rmgroup(site: &mut SiteContext<'_>, article: &Article, groups: &[String]) -> ControlOutcome {
    if !approved(article) {
        info!("rmgroup {} without Approved ignored", groups.join(" "));
        return ControlOutcome::Refused("rmgroup requires approval".to_string());
    }

    let mut removed = Vec::new();
    let mut refusals = Vec::new();
    for group in groups {
        match site.active.remove(group) {
            Ok(()) => removed.push(group.clone()),
            Err(e) => {
                info!("rmgroup: {}", e);
                refusals.push(e.to_string());
            }
        }
    }
    if removed.is_empty() {
        return ControlOutcome::Refused(refusals.join("; "));
    }

    if let Err(e) = write_active(site) {
        return failed("can't rewrite the active file", &e);
    }
    notify(
        site,
        &format!("Rmgroup request from {}", article.headers.path),
        &format!(
            "Removal approved by {}.\n\n{} removed {}\n",
            article.headers.approved.as_deref().unwrap_or_default(),
            article.headers.from,
            removed.join(", ")
        ),
    );
    ControlOutcome::GroupsRemoved(removed)
}

/// Ids from the command line, or from the body when the line has none
fn requested_ids(message_ids: &[String], article: &Article) -> (Vec<String>, bool) {
    if !message_ids.is_empty() {
        return (message_ids.to_vec(), false);
    }
    let ids = article
        .body
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|id| id.starts_with('<'))
        .map(str::to_string)
        .collect();
    (ids, true)
}

fn ihave(
    site: &mut SiteContext<'_>,
    article: &Article,
    message_ids: &[String],
    relayer: Option<&str>,
) -> ControlOutcome {
    let Some(relayer) = relayer else {
        return ControlOutcome::Refused("ihave without a site name".to_string());
    };
    if relayer == site.config.nodename {
        return ControlOutcome::Refused("ihave from ourselves".to_string());
    }
    let Some(feed) = site.feeds.find_by_name(relayer) else {
        warn!("ihave from unknown site {}", relayer);
        return ControlOutcome::Refused(format!("no feed for {relayer}"));
    };

    let (offered, in_body) = requested_ids(message_ids, article);
    let wanted: Vec<String> = offered
        .into_iter()
        .filter(|id| !site.history.lookup(id).is_known())
        .collect();
    if wanted.is_empty() {
        debug!("nothing wanted from {}", relayer);
        return ControlOutcome::Requested {
            relayer: relayer.to_string(),
            count: 0,
        };
    }

    let (command, body) = if in_body {
        let mut body = wanted.join("\n");
        body.push('\n');
        (format!("sendme {}", site.config.nodename), body)
    } else {
        (
            format!("sendme {} {}", wanted.join(" "), site.config.nodename),
            String::new(),
        )
    };
    let sent = control_notice(site.config, relayer, &command, &body)
        .and_then(|notice| transmit_notice(site.transport, site.config, relayer, feed, &notice));
    if let Err(e) = sent {
        return failed(&format!("can't send sendme to {relayer}"), &e);
    }
    info!("asked {} for {} articles", relayer, wanted.len());
    ControlOutcome::Requested {
        relayer: relayer.to_string(),
        count: wanted.len(),
    }
}

fn sendme(
    site: &mut SiteContext<'_>,
    article: &Article,
    message_ids: &[String],
    relayer: Option<&str>,
) -> ControlOutcome {
    let Some(relayer) = relayer else {
        return ControlOutcome::Refused("sendme without a site name".to_string());
    };
    if relayer == site.config.nodename {
        return ControlOutcome::Refused("sendme from ourselves".to_string());
    }
    let Some(feed) = site.feeds.find_by_name(relayer) else {
        warn!("sendme from unknown site {}", relayer);
        return ControlOutcome::Refused(format!("no feed for {relayer}"));
    };

    let (ids, _) = requested_ids(message_ids, article);
    let resolver = GroupResolver::new(site.active, site.tables);
    let dispatcher = Dispatcher::new(site.config, site.transport);
    let mut count = 0;
    for id in &ids {
        let Some(location) = site.history.locations(id).and_then(|l| l.first()) else {
            debug!("sendme {}: not here", id);
            continue;
        };
        let text = match site.store.read(location) {
            Ok(text) => text,
            Err(e) => {
                warn!("sendme {}: can't read {}: {}", id, location, e);
                continue;
            }
        };
        let wanted = match parse_article(&text) {
            Ok(wanted) => wanted,
            Err(e) => {
                warn!("sendme {}: {} is unreadable: {}", id, location, e);
                continue;
            }
        };
        let compiled = resolver.compile(&wanted.headers);
        if !accept_compiled(&compiled, feed).is_forwardable() {
            debug!("sendme {}: {} doesn't take it", id, relayer);
            continue;
        }
        let copy = match scratch_copy(site.config, &text) {
            Ok(copy) => copy,
            Err(e) => {
                warn!("sendme {}: {}", id, e);
                continue;
            }
        };
        if dispatcher
            .dispatch(relayer, feed, &wanted.headers, copy.path(), false)
            .accepted()
        {
            count += 1;
        }
    }

    info!("sent {} of {} requested articles to {}", count, ids.len(), relayer);
    ControlOutcome::Queued {
        relayer: relayer.to_string(),
        count,
    }
}

fn addsub(site: &mut SiteContext<'_>, article: &Article, peer: &str, groups: &str) -> ControlOutcome {
    let Some(feed) = site.feeds.find_by_name(peer) else {
        return ControlOutcome::Refused(format!("no feed for {peer}"));
    };
    let outside: Vec<&str> = groups
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty() && !ngmatch(g, &feed.flex_subscriptions))
        .collect();
    if !outside.is_empty() {
        warn!("addsub for {} outside its flex patterns: {}", peer, outside.join(","));
        return ControlOutcome::Refused(format!("{} not allowed for {}", outside.join(","), peer));
    }
    change_subscription(site, article, peer, groups, true)
}

fn delsub(site: &mut SiteContext<'_>, article: &Article, peer: &str, groups: &str) -> ControlOutcome {
    if site.feeds.find_by_name(peer).is_none() {
        return ControlOutcome::Refused(format!("no feed for {peer}"));
    }
    change_subscription(site, article, peer, groups, false)
}

fn change_subscription(
    site: &mut SiteContext<'_>,
    article: &Article,
    peer: &str,
    groups: &str,
    add: bool,
) -> ControlOutcome {
    let verb = if add { "addsub" } else { "delsub" };
    if let Err(e) = site.feeds.change_subscription(peer, groups, add) {
        return failed(&format!("{verb} {peer}"), &e);
    }
    if site.feeds.path().is_some() {
        if let Err(e) = site.feeds.write() {
            return failed("can't rewrite the feed file", &e);
        }
    }
    notify(
        site,
        &format!("{verb} {peer}"),
        &format!("{} changed {}'s subscription: {}\n", article.headers.from, peer, groups),
    );
    ControlOutcome::SubscriptionChanged {
        site: peer.to_string(),
    }
}

fn sendsys(site: &SiteContext<'_>, article: &Article, pattern: Option<&str>) -> ControlOutcome {
    let mut body = format!("Responding-System: {}\n\n", site.config.nodename);
    for feed in site.feeds.iter() {
        if pattern.is_none_or(|p| ngmatch(p, &feed.name)) {
            body.push_str(&format_record(feed));
            body.push('\n');
        }
    }
    let outcome = reply(site, article, "response to your sendsys request", &body);
    notify(
        site,
        "sendsys control message",
        &format!("{} requested your feeds file. It has been sent\n", article.headers.path),
    );
    outcome
}

/// Run a command line and collect its standard output
fn command_output(command: &str) -> Result<String> {
    let mut words = command.split_whitespace();
    let program = words
        .next()
        .ok_or_else(|| RelayError::Other("empty command".to_string()))?;
    let output = Command::new(program).args(words).output()?;
    if !output.status.success() {
        return Err(RelayError::Other(format!("{command} exited with {}", output.status)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn senduuname(site: &SiteContext<'_>, article: &Article) -> ControlOutcome {
    let mut body = format!("Responding-System: {}\n\n", site.config.nodename);
    match command_output(&site.config.uuname_command) {
        Ok(listing) => body.push_str(&listing),
        Err(e) => {
            warn!("senduuname: {}", e);
            body.push_str(&format!("{} failed: {}\n", site.config.uuname_command, e));
        }
    }
    let outcome = reply(site, article, "response to your senduuname request", &body);
    notify(
        site,
        "uuname control message",
        &format!("{} requested your uuname output. It has been sent.\n", article.headers.path),
    );
    outcome
}

fn version(site: &SiteContext<'_>, article: &Article) -> ControlOutcome {
    let body = format!(
        "\nResponding-System: {}\n\nCurrently running news version {}.\n\nThe header of your message follows:\n\n{}",
        site.config.nodename,
        NEWS_VERSION,
        header_text(article)
    );
    reply(site, article, "Our news version", &body)
}
