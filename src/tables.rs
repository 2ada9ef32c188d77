//! Association tables consulted while compiling destinations
//!
//! Each table is a file of `key value` lines. Keys run up to the first
//! whitespace and the rest of the line is the value. Lines starting with
//! `#` and blank lines are skipped.
//!
//! | File | Key | Value |
//! |---|---|---|
//! | `aliases` | obsolete group name | replacement group |
//! | `buggroups` | group pattern | group to reroute to |
//! | `distributions` | distribution pattern | description |
//! | `mailpaths` | moderated group | submission address |

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::matching::ngmatch;

/// One `key value` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    /// Lookup key (a name or a pattern, depending on the table)
    pub key: String,
    /// Associated value
    pub value: String,
}

/// An ordered association list
///
/// # Examples
///
/// ```
/// use news_relay::tables::AssocList;
///
/// let aliases = AssocList::parse("net.sources comp.sources.misc\n# old\n");
/// assert_eq!(aliases.find("net.sources"), Some("comp.sources.misc"));
/// assert_eq!(aliases.find("net"), None);
///
/// let bugs = AssocList::parse("comp.bugs.all comp.bugs.misc\n");
/// assert_eq!(bugs.find_matching("comp.bugs.4bsd"), Some("comp.bugs.misc"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct AssocList {
    path: Option<PathBuf>,
    entries: Vec<Association>,
}

impl AssocList {
    /// Parse table text
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                // Split on first whitespace only; values may contain spaces
                let (key, value) = match line.find(char::is_whitespace) {
                    Some(pos) => (&line[..pos], line[pos..].trim()),
                    None => (line, ""),
                };
                Some(Association {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            })
            .collect();
        Self {
            path: None,
            entries,
        }
    }

    /// Load a table; a missing file yields an empty table
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut table = if path.exists() {
            Self::parse(&fs::read_to_string(path)?)
        } else {
            debug!("{} not present, using an empty table", path.display());
            Self::default()
        };
        table.path = Some(path.to_path_buf());
        Ok(table)
    }

    /// File this table was loaded from
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Value for a key, compared exactly
    #[must_use]
    pub fn find(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    /// Value of the first entry whose key pattern selects `name`
    #[must_use]
    pub fn find_matching(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|a| ngmatch(name, &a.key))
            .map(|a| a.value.as_str())
    }

    /// Add an entry, or replace the value of an existing key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|a| a.key == key) {
            Some(entry) => entry.value = value,
            None => self.entries.push(Association { key, value }),
        }
    }

    /// Entries in file order
    pub fn iter(&self) -> std::slice::Iter<'_, Association> {
        self.entries.iter()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the table file, tab-separated
    pub fn write(&self) -> Result<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| RelayError::Other("table has no backing file".to_string()))?;
        let mut out = BufWriter::new(fs::File::create(path)?);
        for entry in &self.entries {
            writeln!(out, "{}\t{}", entry.key, entry.value)?;
        }
        out.flush()?;
        Ok(())
    }
}

/// The auxiliary tables used by the group resolver
#[derive(Debug, Clone, Default)]
pub struct GroupTables {
    /// Obsolete group names and their replacements
    pub aliases: AssocList,
    /// Group patterns rerouted to a catch-all group
    pub buggroups: AssocList,
    /// Known distribution prefixes
    pub distributions: AssocList,
    /// Moderator submission addresses
    pub mailpaths: AssocList,
}

impl GroupTables {
    /// Load all four tables from the admin directory
    pub fn load(config: &RelayConfig) -> Result<Self> {
        Ok(Self {
            aliases: AssocList::load(config.aliases_file())?,
            buggroups: AssocList::load(config.buggroups_file())?,
            distributions: AssocList::load(config.distributions_file())?,
            mailpaths: AssocList::load(config.mailpaths_file())?,
        })
    }

    /// Whether `name` begins with a known distribution prefix
    #[must_use]
    pub fn has_distribution_prefix(&self, name: &str) -> bool {
        name.contains('.') && self.distributions.find_matching(name).is_some()
    }

    /// Moderator address recorded for a group
    #[must_use]
    pub fn moderator(&self, group: &str) -> Option<&str> {
        self.mailpaths.find(group)
    }
}
