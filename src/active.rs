//! Locally active newsgroups
//!
//! The active file has one line per group:
//!
//! ```text
//! comp.lang.rust 12345 1000 y
//! comp.std.c 20 1 m
//! local.general 7 1 l local
//! comp.lang.c++ 0 1 =comp.lang.cplusplus
//! ```
//!
//! Fields are name, highest article number, lowest article number and
//! status, optionally followed by the group's default distribution.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{RelayError, Result};

/// Posting status of an active group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupStatus {
    /// `y`: posting allowed
    Open,
    /// `n`: no local posting
    NoPosting,
    /// `m`: moderated
    Moderated,
    /// `l`: local only, never filed from or relayed to peers
    Local,
    /// `j`: articles are filed in junk
    Junk,
    /// `x`: removed by rmgroup, kept until expiry
    Removed,
    /// `=name`: alias of another group
    Alias(String),
}

impl GroupStatus {
    /// Decode a status field
    #[must_use]
    pub fn parse(field: &str) -> Self {
        if let Some(target) = field.strip_prefix('=') {
            return GroupStatus::Alias(target.to_string());
        }
        match field {
            "n" => GroupStatus::NoPosting,
            "m" => GroupStatus::Moderated,
            "l" => GroupStatus::Local,
            "j" => GroupStatus::Junk,
            "x" => GroupStatus::Removed,
            _ => GroupStatus::Open,
        }
    }

    fn as_field(&self) -> String {
        match self {
            GroupStatus::Open => "y".to_string(),
            GroupStatus::NoPosting => "n".to_string(),
            GroupStatus::Moderated => "m".to_string(),
            GroupStatus::Local => "l".to_string(),
            GroupStatus::Junk => "j".to_string(),
            GroupStatus::Removed => "x".to_string(),
            GroupStatus::Alias(target) => format!("={target}"),
        }
    }
}

/// One active group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Newsgroup name
    pub name: String,
    /// Highest article number
    pub high: u64,
    /// Lowest article number
    pub low: u64,
    /// Posting status
    pub status: GroupStatus,
    /// Distribution given to local postings that name none
    pub default_distribution: Option<String>,
}

impl Group {
    /// Create an empty open group
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            high: 0,
            low: 1,
            status: GroupStatus::Open,
            default_distribution: None,
        }
    }

    /// Set the status
    #[must_use]
    pub fn with_status(mut self, status: GroupStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the default distribution
    #[must_use]
    pub fn with_default_distribution(mut self, distribution: impl Into<String>) -> Self {
        self.default_distribution = Some(distribution.into());
        self
    }

    /// Whether postings need moderator approval
    #[must_use]
    pub fn is_moderated(&self) -> bool {
        self.status == GroupStatus::Moderated
    }

    /// Whether the group stays on this site
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.status == GroupStatus::Local
    }

    /// Whether the group was removed
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.status == GroupStatus::Removed
    }

    /// Alias target, if this entry is an alias
    #[must_use]
    pub fn alias_target(&self) -> Option<&str> {
        match &self.status {
            GroupStatus::Alias(target) => Some(target),
            _ => None,
        }
    }
}

/// The active group table
///
/// # Examples
///
/// ```
/// use news_relay::ActiveGroups;
///
/// let mut active = ActiveGroups::parse("comp.lang.rust 10 1 y\njunk 0 1 y\n");
/// assert!(active.find("comp.lang.rust").is_some());
/// assert_eq!(active.next_article_number("comp.lang.rust"), Some(11));
/// assert_eq!(active.find("comp.lang.rust").unwrap().high, 11);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ActiveGroups {
    path: Option<PathBuf>,
    groups: Vec<Group>,
}

impl ActiveGroups {
    /// Parse active file text; malformed lines are skipped
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut groups = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                warn!("active line {}: expected at least 4 fields", n + 1);
                continue;
            }
            groups.push(Group {
                name: parts[0].to_string(),
                high: parts[1].parse().unwrap_or(0),
                low: parts[2].parse().unwrap_or(0),
                status: GroupStatus::parse(parts[3]),
                default_distribution: parts.get(4).map(|s| s.to_string()),
            });
        }
        Self { path: None, groups }
    }

    /// Load the active file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut active = Self::parse(&fs::read_to_string(path)?);
        active.path = Some(path.to_path_buf());
        debug!("loaded {} active groups", active.groups.len());
        Ok(active)
    }

    /// Load the active file, treating a missing file as empty
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self {
                path: Some(path.to_path_buf()),
                groups: Vec::new(),
            })
        }
    }

    /// Build a table from groups already in memory
    #[must_use]
    pub fn from_groups(groups: Vec<Group>) -> Self {
        Self { path: None, groups }
    }

    /// File this table was loaded from
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Exact-match lookup, skipping removed groups
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Group> {
        self.groups
            .iter()
            .find(|g| g.name == name && !g.is_removed())
    }

    /// Whether a usable group with this name exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Iterate over all entries, removed ones included
    pub fn iter(&self) -> std::slice::Iter<'_, Group> {
        self.groups.iter()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Create a group, or reopen a removed one
    ///
    /// Returns false when the group already exists and is live.
    pub fn create(&mut self, name: &str, moderated: bool) -> bool {
        let status = if moderated {
            GroupStatus::Moderated
        } else {
            GroupStatus::Open
        };
        match self.groups.iter_mut().find(|g| g.name == name) {
            Some(group) if group.is_removed() => {
                group.status = status;
                true
            }
            Some(group) => {
                if group.is_moderated() != moderated {
                    group.status = status;
                }
                false
            }
            None => {
                self.groups.push(Group::new(name).with_status(status));
                true
            }
        }
    }

    /// Mark a group removed
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.name == name && !g.is_removed())
            .ok_or_else(|| RelayError::NoSuchGroup(name.to_string()))?;
        group.status = GroupStatus::Removed;
        Ok(())
    }

    /// Allocate the next article number in a group
    pub fn next_article_number(&mut self, name: &str) -> Option<u64> {
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.name == name && !g.is_removed())?;
        group.high += 1;
        Some(group.high)
    }

    /// Rewrite the file this table was loaded from
    pub fn write(&self) -> Result<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| RelayError::Other("active table has no backing file".to_string()))?;
        let tmp = path.with_extension("new");
        {
            let mut out = BufWriter::new(fs::File::create(&tmp)?);
            for group in &self.groups {
                write!(
                    out,
                    "{} {:010} {:05} {}",
                    group.name,
                    group.high,
                    group.low,
                    group.status.as_field()
                )?;
                if let Some(dist) = &group.default_distribution {
                    write!(out, " {dist}")?;
                }
                writeln!(out)?;
            }
            out.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
