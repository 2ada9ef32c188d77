//! Feed records and the logical-line reader

use crate::error::{RelayError, Result};

use super::options::{self, numeric_value};

/// Longest physical line the reader accepts
pub const MAX_LINE: usize = 1024;

/// Hop limit of a feed without an L option
pub const MANY_HOPS: u64 = 9999;

/// Reserved feed name standing for the local site
pub const SELF_ALIAS: &str = "ME";

const FIELD_SEP: char = ':';
const FLEX_SEP: char = '/';

/// Flex sub-part value meaning "no restriction"; never written out
pub const FLEX_ALL: &str = "all";

/// One configured peer link
///
/// The four pattern fields hold comma-separated pattern lists in the
/// syntax of [`ngmatch`](crate::ngmatch). Options stay as the raw option
/// string and are decoded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    /// Site name; a comma-separated list for a multicast record
    pub name: String,
    /// Sites this peer does not want relayed through it
    pub no_send: String,
    /// Groups this peer takes
    pub subscriptions: String,
    /// Unknown groups that may be auto-created for this peer
    pub flex_subscriptions: String,
    /// Distributions this peer takes; empty takes every distribution
    pub distributions: String,
    /// Flex counterpart of `distributions`
    pub flex_distributions: String,
    /// Raw option string, see [`options`](super::options)
    pub options: String,
    /// Transmission template with `%` escapes
    pub transmit: String,
    /// Comment lines preceding the record, each with its newline
    pub comments: String,
}

impl Feed {
    /// Create a feed with the given subscriptions and every other field
    /// at its default
    ///
    /// ```
    /// use news_relay::Feed;
    ///
    /// let feed = Feed::new("bob", "comp.lang.*");
    /// assert_eq!(feed.distribution_pattern(), "all");
    /// assert!(!feed.has_option('F'));
    /// ```
    pub fn new(name: impl Into<String>, subscriptions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            no_send: String::new(),
            subscriptions: subscriptions.into(),
            flex_subscriptions: FLEX_ALL.to_string(),
            distributions: String::new(),
            flex_distributions: FLEX_ALL.to_string(),
            options: String::new(),
            transmit: String::new(),
            comments: String::new(),
        }
    }

    /// Set the distributions field
    #[must_use]
    pub fn with_distributions(mut self, distributions: impl Into<String>) -> Self {
        self.distributions = distributions.into();
        self
    }

    /// Set the option string
    #[must_use]
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// Set the no-send list
    #[must_use]
    pub fn with_no_send(mut self, no_send: impl Into<String>) -> Self {
        self.no_send = no_send.into();
        self
    }

    /// Set the transmit template
    #[must_use]
    pub fn with_transmit(mut self, transmit: impl Into<String>) -> Self {
        self.transmit = transmit.into();
        self
    }

    /// Value of one option letter, see [`options::option`]
    #[must_use]
    pub fn option(&self, letter: char) -> Option<String> {
        options::option(&self.options, letter)
    }

    /// Whether the option letter is present
    #[must_use]
    pub fn has_option(&self, letter: char) -> bool {
        self.option(letter).is_some()
    }

    /// Quoted argument of one option letter
    #[must_use]
    pub fn quoted_option(&self, letter: char) -> Option<String> {
        options::quoted_argument(&self.options, letter)
    }

    /// Locality limit from the L option; `L` and `L0` both mean one hop
    #[must_use]
    pub fn hop_limit(&self) -> Option<u64> {
        self.option('L').map(|v| numeric_value(&v).max(1))
    }

    /// Distribution pattern used for matching
    ///
    /// An empty distributions field accepts everything.
    #[must_use]
    pub fn distribution_pattern(&self) -> &str {
        if self.distributions.trim().is_empty() {
            FLEX_ALL
        } else {
            &self.distributions
        }
    }

    /// Individual site names of this record
    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.name
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// One logical record as read from the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogicalRecord {
    /// Physical line on which the record starts
    pub line: usize,
    /// Comment lines seen since the previous record
    pub comments: String,
    /// Record text with continuations joined
    pub text: String,
}

/// Split feed file text into logical records
///
/// Returns the records and any comment lines after the last record.
pub(crate) fn read_records(input: &str) -> Result<(Vec<LogicalRecord>, String)> {
    let mut records = Vec::new();
    let mut comments = String::new();
    let mut pending: Option<LogicalRecord> = None;
    let mut continued_from = 0;

    for (n, raw) in input.lines().enumerate() {
        let line_no = n + 1;
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.len() > MAX_LINE {
            return Err(RelayError::LineTooLong {
                line: line_no,
                limit: MAX_LINE,
            });
        }

        let stripped = line.trim_start();
        let (body, continues) = match stripped.strip_suffix('\\') {
            Some(body) => (body, true),
            None => (stripped, false),
        };

        match pending.as_mut() {
            Some(record) => record.text.push_str(body),
            None => {
                if stripped.starts_with('#') {
                    comments.push_str(line);
                    comments.push('\n');
                    continue;
                }
                if stripped.is_empty() {
                    continue;
                }
                pending = Some(LogicalRecord {
                    line: line_no,
                    comments: std::mem::take(&mut comments),
                    text: body.to_string(),
                });
            }
        }

        if continues {
            continued_from = line_no;
        } else if let Some(record) = pending.take() {
            records.push(record);
        }
    }

    if pending.is_some() {
        return Err(RelayError::UnterminatedContinuation {
            line: continued_from,
        });
    }

    Ok((records, comments))
}

fn split_flex(field: &str) -> (String, String) {
    match field.split_once(FLEX_SEP) {
        Some((main, flex)) => (main.to_string(), flex.to_string()),
        None => (field.to_string(), FLEX_ALL.to_string()),
    }
}

/// Decode one logical record into a Feed
///
/// `local_site` replaces a record named `ME`. With `legacy` set, a record
/// of exactly four fields is read as `name:groups:options:transmit`. A
/// record of six fields whose second field is empty is read as
/// `name::subscriptions:distributions:options:transmit`, the layout with
/// an empty no-send list spelled out as a field.
pub(crate) fn parse_record(record: &LogicalRecord, local_site: &str, legacy: bool) -> Result<Feed> {
    let mut fields: Vec<&str> = record.text.splitn(6, FIELD_SEP).collect();
    // six fields with an empty second one: no-send written as its own field
    if fields.len() == 6 && fields[1].is_empty() && !fields[0].contains(FLEX_SEP) {
        fields.remove(1);
    }
    let missing = |field| RelayError::MissingField {
        line: record.line,
        field,
    };

    let (distributions, options, transmit) = match fields.len() {
        1 => return Err(missing("subscriptions")),
        2 => return Err(missing("distributions")),
        3 => return Err(missing("options")),
        4 if legacy => ("", fields[2], fields[3]),
        4 => return Err(missing("transmit")),
        _ => (fields[2], fields[3], fields[4]),
    };

    let (name, no_send) = match fields[0].split_once(FLEX_SEP) {
        Some((name, no_send)) => (name, no_send),
        None => (fields[0], ""),
    };
    let name = if name == SELF_ALIAS { local_site } else { name };
    if name.trim().is_empty() {
        return Err(RelayError::Parse {
            line: record.line,
            message: "empty site name".to_string(),
        });
    }

    let (subscriptions, flex_subscriptions) = split_flex(fields[1]);
    let (distributions, flex_distributions) = if distributions.is_empty() {
        (String::new(), FLEX_ALL.to_string())
    } else {
        split_flex(distributions)
    };

    Ok(Feed {
        name: name.to_string(),
        no_send: no_send.to_string(),
        subscriptions,
        flex_subscriptions,
        distributions,
        flex_distributions,
        options: options.to_string(),
        transmit: transmit.to_string(),
        comments: record.comments.clone(),
    })
}
