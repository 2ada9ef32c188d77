//! Article type definitions
//!
//! Only the header fields the relay consults get their own slots; the rest
//! travel in `extra` in their original order.

use chrono::{DateTime, FixedOffset, NaiveDateTime};

use crate::matching::ngmatch;

/// Path separator between site names
pub const PATH_SEP: char = '!';

/// A netnews article
///
/// # Examples
///
/// ```
/// use news_relay::article::{Article, ArticleBuilder};
///
/// let article = ArticleBuilder::new()
///     .from("user@example.com")
///     .subject("Test Article")
///     .newsgroups(vec!["comp.lang.rust"])
///     .message_id("<1@example.com>")
///     .body("This is the article body.\n")
///     .build()
///     .unwrap();
///
/// assert!(article.to_spool_text().ends_with("\n\nThis is the article body.\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Article {
    /// Article headers
    pub headers: Headers,
    /// Article body (after blank line separator)
    pub body: String,
}

/// Article headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    /// Posting date as written by the poster
    pub date: String,
    /// Author
    pub from: String,
    /// Unique identifier; empty on a local posting that has not been stamped
    pub message_id: String,
    /// Target newsgroups
    pub newsgroups: Vec<String>,
    /// Sites the article passed through, newest first, `!`-separated
    pub path: String,
    /// Subject line
    pub subject: String,
    /// Control command, for control messages
    pub control: Option<String>,
    /// Distribution list
    pub distribution: Option<String>,
    /// Moderator approval
    pub approved: Option<String>,
    /// Expiry date
    pub expires: Option<String>,
    /// Followup groups
    pub followup_to: Option<String>,
    /// Thread references
    pub references: Option<String>,
    /// Poster's organization
    pub organization: Option<String>,
    /// Any other header, in original order
    pub extra: Vec<(String, String)>,
}

impl Article {
    /// Create an article from headers and body
    pub fn new(headers: Headers, body: impl Into<String>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Parsed Control header, if this is a control message
    #[must_use]
    pub fn control_message(&self) -> Option<ControlMessage> {
        self.headers.control_command().and_then(ControlMessage::parse)
    }

    /// Serialize the article as stored in the spool
    ///
    /// Lines end in LF and no dot-stuffing is applied. Headers come out in a
    /// fixed order followed by the extra headers in their original order.
    #[must_use]
    pub fn to_spool_text(&self) -> String {
        let h = &self.headers;
        let mut out = String::with_capacity(512 + self.body.len());

        push_field(&mut out, "Path", &h.path);
        push_field(&mut out, "From", &h.from);
        push_field(&mut out, "Newsgroups", &h.newsgroups_line());
        push_field(&mut out, "Subject", &h.subject);
        push_field(&mut out, "Message-ID", &h.message_id);
        push_field(&mut out, "Date", &h.date);
        let optional = [
            ("Control", &h.control),
            ("Distribution", &h.distribution),
            ("Approved", &h.approved),
            ("Expires", &h.expires),
            ("Followup-To", &h.followup_to),
            ("References", &h.references),
            ("Organization", &h.organization),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                push_field(&mut out, name, value);
            }
        }
        for (name, value) in &h.extra {
            push_field(&mut out, name, value);
        }

        out.push('\n');
        out.push_str(&self.body);
        if !self.body.is_empty() && !self.body.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

fn push_field(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

impl Headers {
    /// Headers for an article addressed to the given groups
    pub fn new(
        from: impl Into<String>,
        newsgroups: Vec<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            newsgroups,
            subject: subject.into(),
            ..Self::default()
        }
    }

    /// Newsgroups joined back into a header line
    #[must_use]
    pub fn newsgroups_line(&self) -> String {
        self.newsgroups.join(",")
    }

    /// Site names in the Path, newest first
    ///
    /// ```
    /// use news_relay::article::Headers;
    ///
    /// let mut headers = Headers::default();
    /// headers.path = "gryphon!alice!bob!user".to_string();
    /// assert_eq!(headers.path_sites(), vec!["gryphon", "alice", "bob", "user"]);
    /// assert_eq!(headers.hop_count(), 3);
    /// ```
    #[must_use]
    pub fn path_sites(&self) -> Vec<&str> {
        self.path
            .split(PATH_SEP)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Number of relay hops recorded in the Path
    #[must_use]
    pub fn hop_count(&self) -> usize {
        self.path.matches(PATH_SEP).count()
    }

    /// Put a site at the front of the Path
    pub fn prepend_path(&mut self, site: &str) {
        self.path = if self.path.trim().is_empty() {
            site.to_string()
        } else {
            format!("{site}{PATH_SEP}{}", self.path)
        };
    }

    /// Posting time, if the Date header can be read
    ///
    /// Accepts RFC 2822 dates and the older `dd Mon yy hh:mm:ss` forms
    /// without a zone, taken as UTC.
    #[must_use]
    pub fn posted_at(&self) -> Option<DateTime<FixedOffset>> {
        let date = self.date.trim();
        if date.is_empty() {
            return None;
        }
        if let Ok(parsed) = DateTime::parse_from_rfc2822(date) {
            return Some(parsed);
        }
        let utc = FixedOffset::east_opt(0)?;
        let trimmed = date
            .trim_end_matches(" GMT")
            .trim_end_matches(" UTC")
            .trim();
        // drop a leading weekday
        let trimmed = trimmed.split_once(", ").map_or(trimmed, |(_, rest)| rest);
        ["%d %b %Y %H:%M:%S", "%d %b %y %H:%M:%S", "%d %b %Y %H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
            .map(|naive| naive.and_utc().with_timezone(&utc))
    }

    /// Whether this is a control message
    ///
    /// True for a non-blank Control header and for the old form that
    /// addresses a `*.ctl` group with the command in the Subject.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.control.as_deref().is_some_and(|c| !c.trim().is_empty())
            || ngmatch(&self.newsgroups_line(), "all.ctl")
    }

    /// Control command text, from Control or from the Subject of the old form
    #[must_use]
    pub fn control_command(&self) -> Option<&str> {
        match self.control.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => Some(c),
            _ if ngmatch(&self.newsgroups_line(), "all.ctl") => {
                let subject = self.subject.trim();
                Some(subject.strip_prefix("cmsg ").unwrap_or(subject))
            }
            _ => None,
        }
    }

    /// Value of an extra header, matched case-insensitively
    #[must_use]
    pub fn extra_header(&self, name: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// `cancel <id>`
    Cancel {
        /// Article to withdraw
        message_id: String,
    },
    /// `newgroup group [moderated]`
    Newgroup {
        /// Arguments as given, compiled by the resolver
        arguments: String,
    },
    /// `rmgroup group...`
    Rmgroup {
        /// Groups to remove
        groups: Vec<String>,
    },
    /// `checkgroups [scope] [#serial]`
    Checkgroups,
    /// `ihave <id>... site`
    Ihave {
        /// Offered articles
        message_ids: Vec<String>,
        /// Site making the offer
        relayer: Option<String>,
    },
    /// `sendme <id>... site`, also spelled `sendbad`
    Sendme {
        /// Requested articles
        message_ids: Vec<String>,
        /// Site asking for them
        relayer: Option<String>,
    },
    /// `addsub site groups`
    Addsub {
        /// Peer whose subscriptions change
        site: String,
        /// Patterns to add
        groups: String,
    },
    /// `delsub site groups`
    Delsub {
        /// Peer whose subscriptions change
        site: String,
        /// Patterns to remove
        groups: String,
    },
    /// `sendsys [site]`
    Sendsys {
        /// Pattern selecting the feed records to send
        site: Option<String>,
    },
    /// `senduuname`
    Senduuname,
    /// `version`
    Version,
    /// Any other command
    Unknown {
        /// Full command text
        value: String,
    },
}

/// Split an ihave/sendme argument list into ids and a trailing site name
fn ids_and_relayer(args: &[&str]) -> (Vec<String>, Option<String>) {
    match args.split_last() {
        Some((last, ids)) if !last.starts_with('<') => (
            ids.iter().map(|s| s.to_string()).collect(),
            Some(last.to_string()),
        ),
        _ => (args.iter().map(|s| s.to_string()).collect(), None),
    }
}

impl ControlMessage {
    /// Parse a control command
    ///
    /// Returns `None` for blank input. Commands missing their required
    /// argument come back as [`ControlMessage::Unknown`].
    ///
    /// ```
    /// use news_relay::article::ControlMessage;
    ///
    /// let msg = ControlMessage::parse("ihave <a@x> <b@x> gryphon").unwrap();
    /// assert_eq!(
    ///     msg,
    ///     ControlMessage::Ihave {
    ///         message_ids: vec!["<a@x>".into(), "<b@x>".into()],
    ///         relayer: Some("gryphon".into()),
    ///     }
    /// );
    /// ```
    #[must_use]
    pub fn parse(control: &str) -> Option<ControlMessage> {
        let control = control.trim();
        let mut parts = control.split_whitespace();
        let command = parts.next()?.to_ascii_lowercase();
        let args: Vec<&str> = parts.collect();
        let unknown = || ControlMessage::Unknown {
            value: control.to_string(),
        };

        let message = match (command.as_str(), args.first()) {
            ("cancel", Some(id)) => ControlMessage::Cancel {
                message_id: id.to_string(),
            },
            ("newgroup", Some(_)) => ControlMessage::Newgroup {
                arguments: args.join(" "),
            },
            ("rmgroup", Some(_)) => ControlMessage::Rmgroup {
                groups: args.iter().map(|g| g.to_string()).collect(),
            },
            ("checkgroups", _) => ControlMessage::Checkgroups,
            ("ihave", Some(_)) => {
                let (message_ids, relayer) = ids_and_relayer(&args);
                ControlMessage::Ihave {
                    message_ids,
                    relayer,
                }
            }
            ("sendme" | "sendbad", Some(_)) => {
                let (message_ids, relayer) = ids_and_relayer(&args);
                ControlMessage::Sendme {
                    message_ids,
                    relayer,
                }
            }
            ("addsub", Some(site)) if args.len() > 1 => ControlMessage::Addsub {
                site: site.to_string(),
                groups: args[1..].join(","),
            },
            ("delsub", Some(site)) if args.len() > 1 => ControlMessage::Delsub {
                site: site.to_string(),
                groups: args[1..].join(","),
            },
            ("sendsys", site) => ControlMessage::Sendsys {
                site: site.map(|s| s.to_string()),
            },
            ("senduuname", _) => ControlMessage::Senduuname,
            ("version", _) => ControlMessage::Version,
            _ => unknown(),
        };
        Some(message)
    }

    /// Command name, lowercase
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::Cancel { .. } => "cancel",
            ControlMessage::Newgroup { .. } => "newgroup",
            ControlMessage::Rmgroup { .. } => "rmgroup",
            ControlMessage::Checkgroups => "checkgroups",
            ControlMessage::Ihave { .. } => "ihave",
            ControlMessage::Sendme { .. } => "sendme",
            ControlMessage::Addsub { .. } => "addsub",
            ControlMessage::Delsub { .. } => "delsub",
            ControlMessage::Sendsys { .. } => "sendsys",
            ControlMessage::Senduuname => "senduuname",
            ControlMessage::Version => "version",
            ControlMessage::Unknown { .. } => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(groups: &str, path: &str) -> Headers {
        let mut h = Headers::new(
            "user@example.com",
            groups.split(',').map(str::to_string).collect(),
            "subject",
        );
        h.path = path.to_string();
        h
    }

    #[test]
    fn test_path_helpers() {
        let mut h = headers("misc.test", "alice!bob");
        assert_eq!(h.hop_count(), 1);
        h.prepend_path("gryphon");
        assert_eq!(h.path, "gryphon!alice!bob");
        assert_eq!(h.path_sites(), vec!["gryphon", "alice", "bob"]);

        let mut empty = headers("misc.test", "");
        empty.prepend_path("gryphon");
        assert_eq!(empty.path, "gryphon");
        assert_eq!(empty.hop_count(), 0);
    }

    #[test]
    fn test_posted_at_formats() {
        let mut h = headers("misc.test", "x");
        h.date = "Mon, 20 Jan 2025 12:00:00 +0000".to_string();
        assert!(h.posted_at().is_some());
        h.date = "20 Jan 89 12:00:00 GMT".to_string();
        assert!(h.posted_at().is_some());
        h.date = "yesterday".to_string();
        assert!(h.posted_at().is_none());
        h.date.clear();
        assert!(h.posted_at().is_none());
    }

    #[test]
    fn test_control_forms() {
        let mut h = headers("comp.lang.rust", "x");
        assert!(!h.is_control());
        h.control = Some("cancel <a@b>".to_string());
        assert!(h.is_control());
        assert_eq!(h.control_command(), Some("cancel <a@b>"));

        let mut old = headers("net.news.ctl", "x");
        old.subject = "cmsg rmgroup net.test".to_string();
        assert!(old.is_control());
        assert_eq!(old.control_command(), Some("rmgroup net.test"));
    }

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(
            ControlMessage::parse("cancel <x@y>"),
            Some(ControlMessage::Cancel {
                message_id: "<x@y>".into()
            })
        );
        assert_eq!(
            ControlMessage::parse("newgroup comp.lang.rust moderated"),
            Some(ControlMessage::Newgroup {
                arguments: "comp.lang.rust moderated".into()
            })
        );
        assert_eq!(
            ControlMessage::parse("sendme <a@x>"),
            Some(ControlMessage::Sendme {
                message_ids: vec!["<a@x>".into()],
                relayer: None
            })
        );
        assert!(matches!(
            ControlMessage::parse("cancel"),
            Some(ControlMessage::Unknown { .. })
        ));
        assert_eq!(
            ControlMessage::parse("addsub bob comp.lang.rust misc.test"),
            Some(ControlMessage::Addsub {
                site: "bob".into(),
                groups: "comp.lang.rust,misc.test".into()
            })
        );
        assert!(matches!(
            ControlMessage::parse("delsub bob"),
            Some(ControlMessage::Unknown { .. })
        ));
        assert_eq!(ControlMessage::parse("   "), None);
        assert_eq!(
            ControlMessage::parse("mvgroup a b").map(|m| m.name()),
            Some("unknown")
        );
    }

    #[test]
    fn test_parse_information_requests() {
        assert_eq!(
            ControlMessage::parse("sendbad <a@x> bob"),
            Some(ControlMessage::Sendme {
                message_ids: vec!["<a@x>".into()],
                relayer: Some("bob".into())
            })
        );
        assert_eq!(
            ControlMessage::parse("rmgroup misc.old misc.older"),
            Some(ControlMessage::Rmgroup {
                groups: vec!["misc.old".into(), "misc.older".into()]
            })
        );
        assert_eq!(
            ControlMessage::parse("sendsys"),
            Some(ControlMessage::Sendsys { site: None })
        );
        assert_eq!(
            ControlMessage::parse("sendsys bob"),
            Some(ControlMessage::Sendsys {
                site: Some("bob".into())
            })
        );
        assert_eq!(ControlMessage::parse("senduuname"), Some(ControlMessage::Senduuname));
        assert_eq!(ControlMessage::parse("VERSION"), Some(ControlMessage::Version));
    }

    #[test]
    fn test_spool_text_order() {
        let mut h = headers("misc.test,comp.lang.rust", "gryphon!alice");
        h.message_id = "<1@gryphon>".to_string();
        h.date = "Mon, 20 Jan 2025 12:00:00 +0000".to_string();
        h.distribution = Some("world".to_string());
        h.extra.push(("X-Trace".to_string(), "abc".to_string()));
        let text = Article::new(h, "body").to_spool_text();
        assert!(text.starts_with("Path: gryphon!alice\nFrom: user@example.com\n"));
        assert!(text.contains("Newsgroups: misc.test,comp.lang.rust\n"));
        assert!(text.contains("Distribution: world\nX-Trace: abc\n\nbody\n"));
    }
}
