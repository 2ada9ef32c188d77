//! Article parsing functions
//!
//! Parsing is lenient about which headers are present: the relay decides
//! later what it can live without. Only a header line without a colon is
//! rejected.

use crate::error::{RelayError, Result};

use super::types::{Article, Headers};

/// Split raw article text at the first blank line
///
/// Returns `(headers_text, body_text)`. Text without a blank line is all
/// headers.
pub fn split_article(raw: &str) -> (&str, &str) {
    if let Some(pos) = raw.find("\r\n\r\n") {
        return (&raw[..pos], &raw[pos + 4..]);
    }
    if let Some(pos) = raw.find("\n\n") {
        return (&raw[..pos], &raw[pos + 2..]);
    }
    (raw, "")
}

/// Parse a comma-separated list such as a Newsgroups line
///
/// ```
/// use news_relay::article::parse_comma_list;
///
/// assert_eq!(parse_comma_list("comp.lang.rust, misc.test,,"), vec!["comp.lang.rust", "misc.test"]);
/// ```
pub fn parse_comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join folded continuation lines of one header value
fn unfold(value: &str) -> String {
    value
        .split('\n')
        .map(|l| l.trim_end_matches('\r').trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split header text into (name, unfolded value) pairs, in order
fn header_fields(headers_text: &str) -> Result<Vec<(String, String)>> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for line in headers_text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = fields.last_mut() {
                value.push('\n');
                value.push_str(line);
                continue;
            }
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RelayError::InvalidHeader(format!("malformed header line: {line}")))?;
        fields.push((name.trim().to_string(), value.trim_start().to_string()));
    }
    Ok(fields
        .into_iter()
        .map(|(name, value)| (name, unfold(&value)))
        .collect())
}

/// Parse a header section into [`Headers`]
///
/// Missing headers are left empty. The first occurrence of a repeated
/// known header wins; unknown headers keep their order in `extra`.
///
/// # Arguments
///
/// * `headers_text` - Raw header section text
pub fn parse_headers(headers_text: &str) -> Result<Headers> {
    let mut headers = Headers::default();
    let mut seen: Vec<String> = Vec::new();

    for (name, value) in header_fields(headers_text)? {
        let key = name.to_ascii_lowercase();
        if seen.contains(&key) {
            headers.extra.push((name, value));
            continue;
        }
        let slot: &mut String = match key.as_str() {
            "date" => &mut headers.date,
            "from" => &mut headers.from,
            "message-id" => &mut headers.message_id,
            "path" => &mut headers.path,
            "subject" => &mut headers.subject,
            "newsgroups" => {
                headers.newsgroups = parse_comma_list(&value);
                seen.push("newsgroups".to_string());
                continue;
            }
            "control" => headers.control.insert(String::new()),
            "distribution" => headers.distribution.insert(String::new()),
            "approved" => headers.approved.insert(String::new()),
            "expires" => headers.expires.insert(String::new()),
            "followup-to" => headers.followup_to.insert(String::new()),
            "references" => headers.references.insert(String::new()),
            "organization" => headers.organization.insert(String::new()),
            _ => {
                headers.extra.push((name, value));
                continue;
            }
        };
        *slot = value;
        seen.push(key);
    }

    Ok(headers)
}

/// Parse a complete article from raw text
///
/// ```
/// use news_relay::article::parse_article;
///
/// let article = parse_article("Newsgroups: misc.test\nPath: alice!bob\n\nhello\n").unwrap();
/// assert_eq!(article.headers.newsgroups, vec!["misc.test"]);
/// assert_eq!(article.headers.hop_count(), 1);
/// assert_eq!(article.body, "hello\n");
/// ```
pub fn parse_article(raw: &str) -> Result<Article> {
    let (headers_text, body_text) = split_article(raw);
    let headers = parse_headers(headers_text)?;
    Ok(Article::new(headers, body_text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_variants() {
        assert_eq!(split_article("A: b\r\n\r\nbody"), ("A: b", "body"));
        assert_eq!(split_article("A: b\n\nbody"), ("A: b", "body"));
        assert_eq!(split_article("A: b\n"), ("A: b\n", ""));
    }

    #[test]
    fn test_parse_known_and_extra() {
        let text = "\
Path: alice!bob
From: user@example.com
Newsgroups: comp.lang.rust,misc.test
Subject: folded
  subject
Message-ID: <1@bob>
X-Trace: one
Approved: mod@example.org
X-Trace: two
";
        let h = parse_headers(text).unwrap();
        assert_eq!(h.path, "alice!bob");
        assert_eq!(h.newsgroups, vec!["comp.lang.rust", "misc.test"]);
        assert_eq!(h.subject, "folded subject");
        assert_eq!(h.approved.as_deref(), Some("mod@example.org"));
        assert_eq!(
            h.extra,
            vec![
                ("X-Trace".to_string(), "one".to_string()),
                ("X-Trace".to_string(), "two".to_string())
            ]
        );
        assert!(h.date.is_empty());
        assert!(h.distribution.is_none());
    }

    #[test]
    fn test_case_insensitive_names() {
        let h = parse_headers("NEWSGROUPS: misc.test\ncontrol: cancel <x@y>\n").unwrap();
        assert_eq!(h.newsgroups, vec!["misc.test"]);
        assert_eq!(h.control.as_deref(), Some("cancel <x@y>"));
    }

    #[test]
    fn test_malformed_line_rejected() {
        let err = parse_headers("Newsgroups: misc.test\nthis is not a header\n").unwrap_err();
        assert!(matches!(err, RelayError::InvalidHeader(_)));
    }

    #[test]
    fn test_spool_text_reparses() {
        let raw = "Path: a!b\nFrom: x@y\nNewsgroups: misc.test\nSubject: s\nMessage-ID: <1@b>\nDate: d\nDistribution: na\n\nbody\n";
        let article = parse_article(raw).unwrap();
        let again = parse_article(&article.to_spool_text()).unwrap();
        assert_eq!(article.headers, again.headers);
        assert_eq!(article.body, again.body);
    }
}
