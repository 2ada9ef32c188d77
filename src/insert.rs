//! Filing articles in the local spool
//!
//! [`insert`] decides which local groups an article is filed under and
//! hands the copies to an [`ArticleStore`]. Relayed articles go through
//! the local site's own feed entry first, exactly as if the site were one
//! more peer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::acceptance::{Verdict, accept_compiled};
use crate::active::ActiveGroups;
use crate::article::{Article, ControlMessage, Headers};
use crate::config::RelayConfig;
use crate::control::{ControlOutcome, handle_control};
use crate::error::{RelayError, Result};
use crate::feeds::FeedStore;
use crate::history::{History, location_path};
use crate::matching::ngmatch;
use crate::resolver::{
    CONTROL_GROUP, CompiledArticle, Destination, DestinationStatus, validate_group_name,
};
use crate::tables::GroupTables;
use crate::transport::{Mailer, Notifier, Transport};

/// Catch-all group for articles with nowhere else to go
pub const JUNK_GROUP: &str = "junk";

/// Where article copies are kept
pub trait ArticleStore {
    /// File a copy of `source` as article `number` of `group`
    ///
    /// Returns the `group/number` location.
    fn store(&self, group: &str, number: u64, source: &Path) -> Result<String>;

    /// Text of a stored article
    fn read(&self, location: &str) -> Result<String>;

    /// Delete a stored article; a copy that is already gone is not an error
    fn remove(&self, location: &str) -> Result<()>;
}

/// Article tree with one directory per group component
///
/// `comp.lang.rust` article 7 lives at `<root>/comp/lang/rust/7`. Copies
/// are hard links to the incoming file when the spool and the scratch
/// directory share a file system, plain copies otherwise.
#[derive(Debug, Clone)]
pub struct SpoolStore {
    root: PathBuf,
}

impl SpoolStore {
    /// Store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the site's spool directory
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.spool_dir.clone())
    }

    /// Absolute path of a location
    #[must_use]
    pub fn path_of(&self, location: &str) -> PathBuf {
        self.root.join(location_path(location))
    }
}

impl ArticleStore for SpoolStore {
    fn store(&self, group: &str, number: u64, source: &Path) -> Result<String> {
        let location = format!("{group}/{number}");
        let target = self.path_of(&location);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        if let Err(e) = fs::hard_link(source, &target) {
            if e.kind() == io::ErrorKind::AlreadyExists {
                return Err(RelayError::Other(format!(
                    "{} already exists; active file out of sync for {}",
                    target.display(),
                    group
                )));
            }
            debug!("link to {} failed ({}), copying", target.display(), e);
            fs::copy(source, &target)?;
        }
        Ok(location)
    }

    fn read(&self, location: &str) -> Result<String> {
        Ok(fs::read_to_string(self.path_of(location))?)
    }

    fn remove(&self, location: &str) -> Result<()> {
        match fs::remove_file(self.path_of(location)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Mutable site state the insertion and control code work on
pub struct SiteContext<'a> {
    /// Site configuration
    pub config: &'a RelayConfig,
    /// Peer feeds, including the local site's own entry
    pub feeds: &'a mut FeedStore,
    /// Active groups
    pub active: &'a mut ActiveGroups,
    /// Aliases, buggroups, distributions and moderators
    pub tables: &'a mut GroupTables,
    /// History database
    pub history: &'a mut dyn History,
    /// Article storage
    pub store: &'a dyn ArticleStore,
    /// Outbound transport for control replies
    pub transport: &'a dyn Transport,
    /// Administrator notices
    pub notifier: &'a dyn Notifier,
    /// Mail replies to information requests
    pub mailer: &'a dyn Mailer,
}

/// What happened to an article on insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Filed under these `group/number` locations (possibly none, when
    /// every group was mailed to a moderator)
    Stored(Vec<String>),
    /// Filed in junk
    Junked(Option<String>),
    /// Not filed locally; the local feed entry does not take it
    Refused(Verdict),
    /// A relayed article past the age limit, filed in junk and not relayed
    TooOld(Option<String>),
    /// A control message, acted on and filed under `control`
    Control {
        /// What the handler did
        outcome: ControlOutcome,
        /// Where the message itself was filed
        location: Option<String>,
    },
}

impl InsertOutcome {
    /// Whether the article may still be passed on to peers
    #[must_use]
    pub fn may_broadcast(&self) -> bool {
        !matches!(self, InsertOutcome::TooOld(_))
    }

    /// Locations the article was filed under
    #[must_use]
    pub fn locations(&self) -> Vec<&str> {
        match self {
            InsertOutcome::Stored(locations) => locations.iter().map(String::as_str).collect(),
            InsertOutcome::Junked(location)
            | InsertOutcome::TooOld(location)
            | InsertOutcome::Control { location, .. } => location.iter().map(String::as_str).collect(),
            InsertOutcome::Refused(_) => Vec::new(),
        }
    }
}

/// File one article in the local spool
///
/// `compiled` may be updated: unknown names under the local site's flex
/// patterns become newly created groups.
///
/// # Arguments
///
/// * `site` - Site state
/// * `compiled` - Destinations of the article
/// * `article` - The article, for headers and control bodies
/// * `file` - Prepared article text on disk
/// * `originator` - Whether the article was posted here
pub fn insert(
    site: &mut SiteContext<'_>,
    compiled: &mut CompiledArticle,
    article: &Article,
    file: &Path,
    originator: bool,
) -> Result<InsertOutcome> {
    let headers = &article.headers;

    if !originator && is_too_old(headers, site.config.max_article_age_days) {
        info!("{} too old, routed to junk", headers.message_id);
        let location = file_single(site, headers, file, JUNK_GROUP)?;
        return Ok(InsertOutcome::TooOld(location));
    }

    if let Some(superseded) = headers.extra_header("Supersedes") {
        let cancel = ControlMessage::Cancel {
            message_id: superseded.trim().to_string(),
        };
        let outcome = handle_control(site, article, &cancel);
        debug!("supersedes {}: {:?}", superseded, outcome);
    }

    if compiled.control {
        let outcome = match article.control_message() {
            Some(message) => handle_control(site, article, &message),
            None => ControlOutcome::Refused("empty control command".to_string()),
        };
        let location = file_single(site, headers, file, CONTROL_GROUP)?;
        return Ok(InsertOutcome::Control { outcome, location });
    }

    if compiled.destinations.is_empty() {
        info!("{} has no valid groups, relayed and junked", headers.message_id);
        let location = file_single(site, headers, file, JUNK_GROUP)?;
        return Ok(InsertOutcome::Junked(location));
    }

    if !originator {
        let verdict = site
            .feeds
            .local_feed()
            .map_or(Verdict::Accept, |own| accept_compiled(compiled, own));
        match verdict {
            Verdict::Accept => {}
            Verdict::AcceptToJunk => {
                let location = file_single(site, headers, file, JUNK_GROUP)?;
                return Ok(InsertOutcome::Junked(location));
            }
            Verdict::RejectDistribution => {
                info!(
                    "{}: distribution {} unsubscribed",
                    headers.message_id, compiled.distribution
                );
                return Ok(InsertOutcome::Refused(verdict));
            }
            Verdict::RejectNoGroups => {
                info!(
                    "{}: newsgroup(s) {} unsubscribed",
                    headers.message_id,
                    headers.newsgroups_line()
                );
                return Ok(InsertOutcome::Refused(verdict));
            }
        }
    }

    let mut locations: Vec<String> = Vec::new();
    let mut filed_groups: Vec<String> = Vec::new();
    let mut posted = 0usize;

    for dest in compiled.destinations.iter_mut() {
        match dest.status {
            DestinationStatus::CantMail => continue,
            DestinationStatus::Mailed => {
                posted += 1;
                continue;
            }
            DestinationStatus::Unknown => {
                let name = dest.name().to_string();
                if !create_flex_group(site, &name, headers.approved.as_deref()) {
                    info!("unknown group '{}' ignored", name);
                    continue;
                }
                let moderator = site.tables.moderator(&name).map(str::to_string);
                let prefix = dest.distribution_prefix.take();
                *dest = Destination::resolved(name);
                dest.moderator = moderator;
                dest.distribution_prefix = prefix;
            }
            DestinationStatus::Ok => {}
        }

        let Some(group) = dest.group.clone() else {
            continue;
        };
        if !originator && site.active.find(&group).is_some_and(|g| g.is_local()) {
            continue;
        }
        if filed_groups.contains(&group) {
            continue;
        }
        filed_groups.push(group.clone());

        match file_copy(site, &group, file) {
            Ok(location) => {
                locations.push(location);
                posted += 1;
            }
            Err(e) => warn!("{}: can't file under {}: {}", headers.message_id, group, e),
        }
    }

    if posted == 0 {
        info!("{}: no valid newsgroups, filed in junk", headers.message_id);
        let location = file_single(site, headers, file, JUNK_GROUP)?;
        return Ok(InsertOutcome::Junked(location));
    }

    site.history
        .record(&headers.message_id, Utc::now(), locations.clone());
    Ok(InsertOutcome::Stored(locations))
}

fn is_too_old(headers: &Headers, max_age_days: i64) -> bool {
    headers
        .posted_at()
        .is_some_and(|posted| Utc::now() - posted.with_timezone(&Utc) > Duration::days(max_age_days))
}

/// Allocate a number in `group` and store a copy there
fn file_copy(site: &mut SiteContext<'_>, group: &str, file: &Path) -> Result<String> {
    let number = site
        .active
        .next_article_number(group)
        .ok_or_else(|| RelayError::NoSuchGroup(group.to_string()))?;
    let location = site.store.store(group, number, file)?;
    debug!("filed as {}", location);
    Ok(location)
}

/// File in one fixed group and record history
fn file_single(
    site: &mut SiteContext<'_>,
    headers: &Headers,
    file: &Path,
    group: &str,
) -> Result<Option<String>> {
    let location = match file_copy(site, group, file) {
        Ok(location) => Some(location),
        Err(e) => {
            warn!("{}: couldn't file under {}: {}", headers.message_id, group, e);
            None
        }
    };
    site.history.record(
        &headers.message_id,
        Utc::now(),
        location.iter().cloned().collect(),
    );
    Ok(location)
}

/// Create a group the local feed's flex patterns allow
///
/// An approved article makes the group moderated, with the approver
/// recorded as its moderator.
fn create_flex_group(site: &mut SiteContext<'_>, name: &str, approved: Option<&str>) -> bool {
    let allowed = site
        .feeds
        .local_feed()
        .is_some_and(|own| ngmatch(name, &own.subscriptions) && ngmatch(name, &own.flex_subscriptions));
    if !allowed || validate_group_name(name).is_err() {
        return false;
    }

    let approver = approved.map(str::trim).filter(|a| !a.is_empty());
    site.active.create(name, approver.is_some());
    info!("flex group {} created", name);

    if let Some(approver) = approver {
        site.tables.mailpaths.insert(name, approver);
        if site.tables.mailpaths.path().is_some() {
            if let Err(e) = site.tables.mailpaths.write() {
                let subject = format!("New flexgroup '{name}' created");
                let body = format!("but updating the mailpaths file failed: {e}\n");
                if let Err(e) = site.notifier.notify(&subject, &body) {
                    warn!("{}", e);
                }
            }
        }
    }
    true
}
