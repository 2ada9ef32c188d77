//! Builder for articles the relay generates itself
//!
//! Notices, ihave/sendme replies and mail-to-moderator copies are built
//! here rather than parsed.

use super::types::{Article, Headers};
use crate::error::{RelayError, Result};

/// Date format written into generated articles
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// Builds an [`Article`], filling in Date and Message-ID when not given
#[must_use]
#[derive(Debug, Clone, Default)]
pub struct ArticleBuilder {
    from: Option<String>,
    subject: Option<String>,
    newsgroups: Vec<String>,
    body: String,
    date: Option<String>,
    message_id: Option<String>,
    path: Option<String>,
    control: Option<String>,
    distribution: Option<String>,
    approved: Option<String>,
    extra: Vec<(String, String)>,
}

impl ArticleBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the From header (required)
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Set the Subject header (required)
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the Newsgroups header (at least one group is required)
    pub fn newsgroups(mut self, newsgroups: Vec<impl Into<String>>) -> Self {
        self.newsgroups = newsgroups.into_iter().map(Into::into).collect();
        self
    }

    /// Set the body
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the Date header
    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Set the Message-ID header
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Set the Path header (default: "not-for-mail")
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the Control header
    pub fn control(mut self, control: impl Into<String>) -> Self {
        self.control = Some(control.into());
        self
    }

    /// Set the Distribution header
    pub fn distribution(mut self, distribution: impl Into<String>) -> Self {
        self.distribution = Some(distribution.into());
        self
    }

    /// Set the Approved header
    pub fn approved(mut self, approved: impl Into<String>) -> Self {
        self.approved = Some(approved.into());
        self
    }

    /// Add another header
    pub fn extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((name.into(), value.into()));
        self
    }

    /// Build the article
    ///
    /// Fails when From, Subject or Newsgroups is missing.
    pub fn build(self) -> Result<Article> {
        let from = self
            .from
            .ok_or_else(|| RelayError::InvalidHeader("From header is required".to_string()))?;
        let subject = self
            .subject
            .ok_or_else(|| RelayError::InvalidHeader("Subject header is required".to_string()))?;
        if self.newsgroups.is_empty() {
            return Err(RelayError::InvalidHeader(
                "At least one newsgroup is required".to_string(),
            ));
        }

        let date = self.date.unwrap_or_else(current_date);
        let message_id = self
            .message_id
            .unwrap_or_else(|| generate_message_id(domain_of(&from)));

        let headers = Headers {
            date,
            message_id,
            path: self.path.unwrap_or_else(|| "not-for-mail".to_string()),
            control: self.control,
            distribution: self.distribution,
            approved: self.approved,
            extra: self.extra,
            ..Headers::new(from, self.newsgroups, subject)
        };
        Ok(Article::new(headers, self.body))
    }
}

/// Current time in the generated-article date format
#[must_use]
pub fn current_date() -> String {
    chrono::Utc::now().format(DATE_FORMAT).to_string()
}

/// A fresh Message-ID under `domain`
///
/// ```
/// use news_relay::article::generate_message_id;
///
/// let id = generate_message_id("gryphon");
/// assert!(id.starts_with('<') && id.ends_with("@gryphon>"));
/// ```
#[must_use]
pub fn generate_message_id(domain: &str) -> String {
    format!("<{}@{}>", uuid::Uuid::new_v4(), domain)
}

fn domain_of(address: &str) -> &str {
    address
        .split('@')
        .nth(1)
        .and_then(|d| d.split('>').next())
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost")
}
