//! Destination compilation
//!
//! Turns an article's Newsgroups and Distribution lines into an ordered
//! list of [`Destination`]s. Each newsgroup token is resolved in turn:
//!
//! 1. an active group of that name (following an active-file alias)
//! 2. the aliases table, by exact name
//! 3. the buggroups table, by pattern
//! 4. a known distribution prefix (`nj.forsale`), stripped and the rest
//!    looked up as a plain group
//! 5. the nearest `*.junk` group up the hierarchy
//!
//! A token nothing resolves stays in the list as [`DestinationStatus::Unknown`]
//! so it can still be forwarded to peers that take it.

use tracing::{debug, trace};

use crate::active::ActiveGroups;
use crate::article::Headers;
use crate::error::{RelayError, Result};
use crate::sets::set_add;
use crate::tables::GroupTables;

/// Group every control message is filed under
pub const CONTROL_GROUP: &str = "control";

/// Suffix of the per-hierarchy junk groups
pub const JUNK_SUFFIX: &str = ".junk";

const DEFAULT_DISTRIBUTION: &str = "world";
const OBSOLETE_DISTRIBUTION: &str = "net";
const MODERATED_MARKER: &str = "moderated";

/// Resolution state of one destination slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationStatus {
    /// Resolved to an active group
    Ok,
    /// Not known here; carries the raw name
    Unknown,
    /// Mailed to the group's moderator instead of posted
    Mailed,
    /// Moderated group whose moderator could not be reached
    CantMail,
}

/// One compiled target of an article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Resolution state
    pub status: DestinationStatus,
    /// Resolved active group
    pub group: Option<String>,
    /// Unresolved name, for [`DestinationStatus::Unknown`]
    pub raw_name: Option<String>,
    /// Distribution prefix stripped from the token, if any
    pub distribution_prefix: Option<String>,
    /// Moderator submission address of the resolved group
    pub moderator: Option<String>,
}

impl Destination {
    /// A slot resolved to an active group
    pub fn resolved(group: impl Into<String>) -> Self {
        Self {
            status: DestinationStatus::Ok,
            group: Some(group.into()),
            raw_name: None,
            distribution_prefix: None,
            moderator: None,
        }
    }

    /// A slot carrying a name nothing resolved
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            status: DestinationStatus::Unknown,
            group: None,
            raw_name: Some(name.into()),
            distribution_prefix: None,
            moderator: None,
        }
    }

    /// Attach a distribution prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.distribution_prefix = Some(prefix.into());
        self
    }

    /// Group name for resolved slots, raw name otherwise
    #[must_use]
    pub fn name(&self) -> &str {
        self.group
            .as_deref()
            .or(self.raw_name.as_deref())
            .unwrap_or_default()
    }

    /// Whether the slot names an active group
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.group.is_some()
    }
}

/// Result of compiling one article
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArticle {
    /// Newsgroups as compiled (`control` for control messages)
    pub newsgroups: Vec<String>,
    /// Effective distribution, never blank
    pub distribution: String,
    /// Whether the article is a control message
    pub control: bool,
    /// One slot per newsgroup token, in header order
    pub destinations: Vec<Destination>,
}

impl CompiledArticle {
    /// Whether every slot was diverted to a moderator
    #[must_use]
    pub fn all_mailed(&self) -> bool {
        !self.destinations.is_empty()
            && self
                .destinations
                .iter()
                .all(|d| d.status == DestinationStatus::Mailed)
    }
}

/// Compiles newsgroup lines against the active file and auxiliary tables
///
/// # Examples
///
/// ```
/// use news_relay::article::Headers;
/// use news_relay::resolver::{DestinationStatus, GroupResolver};
/// use news_relay::tables::GroupTables;
/// use news_relay::ActiveGroups;
///
/// let active = ActiveGroups::parse("comp.lang.rust 0 1 y\ncomp.junk 0 1 y\n");
/// let tables = GroupTables::default();
/// let resolver = GroupResolver::new(&active, &tables);
///
/// let headers = Headers::new(
///     "user@example.com",
///     vec!["comp.lang.rust".into(), "comp.lang.cobol".into()],
///     "hi",
/// );
/// let compiled = resolver.compile(&headers);
/// assert_eq!(compiled.distribution, "world");
/// assert_eq!(compiled.destinations[0].name(), "comp.lang.rust");
/// assert_eq!(compiled.destinations[1].name(), "comp.junk");
/// assert_eq!(compiled.destinations[1].status, DestinationStatus::Ok);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct GroupResolver<'a> {
    active: &'a ActiveGroups,
    tables: &'a GroupTables,
}

impl<'a> GroupResolver<'a> {
    /// Create a resolver over the given state
    pub fn new(active: &'a ActiveGroups, tables: &'a GroupTables) -> Self {
        Self { active, tables }
    }

    /// Compile an article's headers into destinations
    ///
    /// The headers are not modified. When the article names no
    /// distribution, the default distributions of its groups are used if
    /// any are configured, otherwise `world`.
    pub fn compile(&self, headers: &Headers) -> CompiledArticle {
        let given = headers
            .distribution
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());
        let no_distribution = given.is_none();
        let mut distribution = match given {
            None | Some(OBSOLETE_DISTRIBUTION) => DEFAULT_DISTRIBUTION.to_string(),
            Some(d) => d.to_string(),
        };

        let control = headers.is_control();
        let newsgroups = if control {
            vec![CONTROL_GROUP.to_string()]
        } else {
            headers.newsgroups.clone()
        };

        let mut defaults = String::new();
        let destinations: Vec<Destination> = newsgroups
            .iter()
            .flat_map(|line| line.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter_map(|token| {
                let dest = self.resolve(token)?;
                if no_distribution {
                    if let Some(default) = dest
                        .group
                        .as_deref()
                        .and_then(|g| self.active.find(g))
                        .and_then(|g| g.default_distribution.as_deref())
                    {
                        defaults = set_add(&defaults, default, ",").0;
                    }
                }
                Some(dest)
            })
            .collect();

        if no_distribution && !defaults.is_empty() {
            distribution = defaults;
        }

        debug!(
            "compiled {} into {} destinations, distribution {}",
            headers.message_id,
            destinations.len(),
            distribution
        );
        CompiledArticle {
            newsgroups,
            distribution,
            control,
            destinations,
        }
    }

    /// Resolve a single newsgroup token
    ///
    /// Returns `None` when the token is redirected (by an alias, an
    /// active-file alias or a bug group) to a group that is not active;
    /// such a token takes no slot.
    pub fn resolve(&self, token: &str) -> Option<Destination> {
        let mut dest = self.lookup(token)?;
        if let Some(group) = dest.group.as_deref() {
            dest.moderator = self.tables.moderator(group).map(str::to_string);
        }
        trace!("{} -> {:?} {}", token, dest.status, dest.name());
        Some(dest)
    }

    fn lookup(&self, token: &str) -> Option<Destination> {
        if let Some(group) = self.active.find(token) {
            return match group.alias_target() {
                Some(target) => self.redirect(token, target),
                None => Some(Destination::resolved(token)),
            };
        }

        if let Some(target) = self.tables.aliases.find(token) {
            debug!("aliased newsgroup {} to {}", token, target);
            return self.redirect(token, target);
        }

        if let Some(target) = self.tables.buggroups.find_matching(token) {
            debug!("rerouted bug group {} to {}", token, target);
            return self.redirect(token, target);
        }

        if self.tables.has_distribution_prefix(token) {
            if let Some((prefix, rest)) = token.split_once('.') {
                return Some(self.active_or_unknown(rest).with_prefix(prefix));
            }
        }

        Some(
            self.junk_fallback(token)
                .unwrap_or_else(|| Destination::unknown(token)),
        )
    }

    fn redirect(&self, token: &str, target: &str) -> Option<Destination> {
        if self.active.contains(target) {
            Some(Destination::resolved(target))
        } else {
            debug!("{} redirected to inactive group {}, dropped", token, target);
            None
        }
    }

    fn active_or_unknown(&self, name: &str) -> Destination {
        if self.active.contains(name) {
            Destination::resolved(name)
        } else {
            Destination::unknown(name)
        }
    }

    /// Nearest `<ancestor>.junk` group that is active
    fn junk_fallback(&self, token: &str) -> Option<Destination> {
        let mut stem = token;
        while let Some(pos) = stem.rfind('.') {
            stem = &stem[..pos];
            let candidate = format!("{stem}{JUNK_SUFFIX}");
            if self.active.contains(&candidate) {
                return Some(Destination::resolved(candidate));
            }
        }
        None
    }
}

/// One group named in a newgroup control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    /// Group name
    pub name: String,
    /// Whether the `moderated` marker followed it
    pub moderated: bool,
}

/// Compile the argument list of a newgroup command
///
/// Names are separated by commas or whitespace; a `moderated` marker
/// applies to the name before it.
///
/// ```
/// use news_relay::resolver::compile_group_arguments;
///
/// let groups = compile_group_arguments("comp.std.c moderated, comp.lang.rust");
/// assert_eq!(groups.len(), 2);
/// assert!(groups[0].moderated);
/// assert!(!groups[1].moderated);
/// ```
#[must_use]
pub fn compile_group_arguments(arguments: &str) -> Vec<NewGroup> {
    let mut groups: Vec<NewGroup> = Vec::new();
    for token in arguments
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        if token.eq_ignore_ascii_case(MODERATED_MARKER) {
            if let Some(last) = groups.last_mut() {
                last.moderated = true;
            }
            continue;
        }
        groups.push(NewGroup {
            name: token.to_string(),
            moderated: false,
        });
    }
    groups
}

/// Check a newsgroup name for a newgroup request
///
/// Components must be non-empty and use only lowercase letters, digits,
/// `+`, `-` and `_`.
pub fn validate_group_name(name: &str) -> Result<()> {
    let invalid = |why: &str| RelayError::InvalidGroupName(format!("{name}: {why}"));
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    for component in name.split('.') {
        if component.is_empty() {
            return Err(invalid("empty component"));
        }
        if let Some(ch) = component
            .chars()
            .find(|&ch| !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || "+-_".contains(ch)))
        {
            return Err(invalid(&format!("invalid character '{ch}'")));
        }
    }
    Ok(())
}
