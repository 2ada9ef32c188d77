//! Relay site configuration

use std::path::{Path, PathBuf};

/// Template used when a feed leaves its transmit field empty
pub const DEFAULT_TRANSMIT: &str = "uux - -r -z %U %S!%R";

/// Width at which rewritten feed records are folded
pub const DEFAULT_FOLD_WIDTH: usize = 76;

/// How subscription patterns are evaluated against active groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubscriptionStrategy {
    /// Run the pattern matcher on every query
    #[default]
    Scan,
    /// Precompute a per-group bitmap over all feeds at startup
    Bitmap,
}

/// Configuration for one relay site
///
/// Names the local site and the directories holding its administrative
/// files, batch queues and article spool.
///
/// # Example
///
/// ```
/// use news_relay::RelayConfig;
///
/// // Everything under one root: admin/, batch/, spool/, tmp/
/// let config = RelayConfig::for_site_root("gryphon", "/var/news");
/// assert_eq!(config.feeds_file().to_str(), Some("/var/news/admin/feeds"));
///
/// // Or name the directories individually
/// let config = RelayConfig::new("gryphon", "/etc/news", "/var/spool/news");
/// assert_eq!(config.pathname, "gryphon");
/// ```
#[must_use]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayConfig {
    /// Name this site stamps on Path headers; also what "ME" resolves to
    pub pathname: String,

    /// Node name quoted in ihave notices (usually the same as `pathname`)
    pub nodename: String,

    /// Directory holding feeds, active, aliases, buggroups, distributions,
    /// mailpaths and the transmission log
    pub admin_dir: PathBuf,

    /// Directory of per-peer batch files
    pub batch_dir: PathBuf,

    /// Root of the local article store
    pub spool_dir: PathBuf,

    /// Scratch directory for filtered and in-flight article copies
    pub temp_dir: PathBuf,

    /// Accept the 4-field feed layout (`name:groups:flags:xmit`)
    #[cfg_attr(feature = "serde", serde(default))]
    pub legacy_feed_format: bool,

    /// Subscription evaluation strategy
    #[cfg_attr(feature = "serde", serde(default))]
    pub subscription_index: SubscriptionStrategy,

    /// Transmit template for feeds with an empty transmit field
    #[cfg_attr(feature = "serde", serde(default = "default_transmit"))]
    pub default_transmit: String,

    /// Command that accepts a complete mail message on stdin
    #[cfg_attr(feature = "serde", serde(default = "default_mail_command"))]
    pub mail_command: String,

    /// Shell used for transmit commands
    #[cfg_attr(feature = "serde", serde(default = "default_shell"))]
    pub shell: String,

    /// Relayed articles older than this many days go to junk
    #[cfg_attr(feature = "serde", serde(default = "default_max_age"))]
    pub max_article_age_days: i64,

    /// Mail template for moderated groups without a known moderator;
    /// `%s` is replaced by the group name with dots turned into dashes
    #[cfg_attr(feature = "serde", serde(default))]
    pub backbone: Option<String>,

    /// Column at which rewritten feed records are folded
    #[cfg_attr(feature = "serde", serde(default = "default_fold_width"))]
    pub fold_width: usize,

    /// Recipient of administrative notices
    #[cfg_attr(feature = "serde", serde(default = "default_admin_address"))]
    pub admin_address: String,

    /// Command whose output answers a `senduuname` request
    #[cfg_attr(feature = "serde", serde(default = "default_uuname_command"))]
    pub uuname_command: String,
}

#[cfg(feature = "serde")]
fn default_transmit() -> String {
    DEFAULT_TRANSMIT.to_string()
}

#[cfg(feature = "serde")]
fn default_mail_command() -> String {
    "/usr/lib/sendmail -t".to_string()
}

#[cfg(feature = "serde")]
fn default_shell() -> String {
    "/bin/sh".to_string()
}

#[cfg(feature = "serde")]
fn default_max_age() -> i64 {
    14
}

#[cfg(feature = "serde")]
fn default_fold_width() -> usize {
    DEFAULT_FOLD_WIDTH
}

#[cfg(feature = "serde")]
fn default_admin_address() -> String {
    "usenet".to_string()
}

#[cfg(feature = "serde")]
fn default_uuname_command() -> String {
    "uuname".to_string()
}

impl RelayConfig {
    /// Create a configuration with explicit admin and spool directories
    ///
    /// Batch files go to `<admin_dir>/batch` and scratch copies to
    /// `<spool_dir>/.tmp`.
    ///
    /// # Arguments
    ///
    /// * `site` - Local site name
    /// * `admin_dir` - Directory of administrative files
    /// * `spool_dir` - Root of the article store
    pub fn new(
        site: impl Into<String>,
        admin_dir: impl Into<PathBuf>,
        spool_dir: impl Into<PathBuf>,
    ) -> Self {
        let site = site.into();
        let admin_dir = admin_dir.into();
        let spool_dir = spool_dir.into();
        Self {
            nodename: site.clone(),
            pathname: site,
            batch_dir: admin_dir.join("batch"),
            temp_dir: spool_dir.join(".tmp"),
            admin_dir,
            spool_dir,
            legacy_feed_format: false,
            subscription_index: SubscriptionStrategy::Scan,
            default_transmit: DEFAULT_TRANSMIT.to_string(),
            mail_command: "/usr/lib/sendmail -t".to_string(),
            shell: "/bin/sh".to_string(),
            max_article_age_days: 14,
            backbone: None,
            fold_width: DEFAULT_FOLD_WIDTH,
            admin_address: "usenet".to_string(),
            uuname_command: "uuname".to_string(),
        }
    }

    /// Create a configuration rooted at one directory
    ///
    /// Uses `admin/`, `batch/`, `spool/` and `tmp/` below `root`.
    pub fn for_site_root(site: impl Into<String>, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let mut config = Self::new(site, root.join("admin"), root.join("spool"));
        config.batch_dir = root.join("batch");
        config.temp_dir = root.join("tmp");
        config
    }

    /// Select the subscription evaluation strategy
    pub fn with_subscription_index(mut self, strategy: SubscriptionStrategy) -> Self {
        self.subscription_index = strategy;
        self
    }

    /// Enable the 4-field legacy feed layout
    pub fn with_legacy_feed_format(mut self, enabled: bool) -> Self {
        self.legacy_feed_format = enabled;
        self
    }

    /// Path of the peer feed file
    #[must_use]
    pub fn feeds_file(&self) -> PathBuf {
        self.admin_dir.join("feeds")
    }

    /// Path of the active groups file
    #[must_use]
    pub fn active_file(&self) -> PathBuf {
        self.admin_dir.join("active")
    }

    /// Path of the group alias table
    #[must_use]
    pub fn aliases_file(&self) -> PathBuf {
        self.admin_dir.join("aliases")
    }

    /// Path of the bug-group rerouting table
    #[must_use]
    pub fn buggroups_file(&self) -> PathBuf {
        self.admin_dir.join("buggroups")
    }

    /// Path of the known distributions list
    #[must_use]
    pub fn distributions_file(&self) -> PathBuf {
        self.admin_dir.join("distributions")
    }

    /// Path of the moderator address table
    #[must_use]
    pub fn mailpaths_file(&self) -> PathBuf {
        self.admin_dir.join("mailpaths")
    }

    /// Path of the transmission debug log (D option)
    #[must_use]
    pub fn xmitlog_file(&self) -> PathBuf {
        self.admin_dir.join("xmitlog")
    }

    /// Default batch file for a peer
    #[must_use]
    pub fn batch_file(&self, site: &str) -> PathBuf {
        self.batch_dir.join(site)
    }
}
