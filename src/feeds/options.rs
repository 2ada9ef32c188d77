//! Feed option strings
//!
//! The options field of a feed record is a run of option tokens with no
//! separators between them. Each token is an uppercase letter, optionally
//! followed by lowercase suffix letters, then either digits or a
//! double-quoted string:
//!
//! ```text
//! BoF          B with suffix "o", then F
//! C9E          C with argument 9, then E
//! U"-r -z"L2   U with quoted argument "-r -z", then L with argument 2
//! ```
//!
//! Inside a quoted argument a backslash escapes a double quote or another
//! backslash. Letters inside quotes are never taken as options.

const QUOTE: char = '"';
const ESCAPE: char = '\\';

/// Byte offset just past the option letter, if the letter appears outside
/// any quoted argument
fn locate(options: &str, letter: char) -> Option<usize> {
    let mut quoted = false;
    let mut escaped = false;
    for (i, ch) in options.char_indices() {
        if escaped {
            escaped = false;
        } else if quoted && ch == ESCAPE {
            escaped = true;
        } else if ch == QUOTE {
            quoted = !quoted;
        } else if !quoted && ch == letter {
            return Some(i + ch.len_utf8());
        }
    }
    None
}

/// Split the text after an option letter into (suffix+digits, rest)
///
/// Dots are kept inside the digit run so version arguments like `2.10`
/// survive intact.
fn split_value(tail: &str) -> (&str, &str) {
    let suffix = tail
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(tail.len());
    let digits = tail[suffix..]
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|n| suffix + n)
        .unwrap_or(tail.len());
    (&tail[..digits], &tail[digits..])
}

/// Look up one option letter
///
/// Returns `None` when the letter does not occur outside a quoted argument,
/// otherwise the letter's lowercase suffixes followed by its digits (empty
/// when it has neither). A quoted argument does not contribute to the
/// value; use [`quoted_argument`] for that.
///
/// # Examples
///
/// ```
/// use news_relay::feeds::option;
///
/// let opts = r#"C9E"hello \"world\""X"#;
/// assert_eq!(option(opts, 'C').as_deref(), Some("9"));
/// assert_eq!(option(opts, 'E').as_deref(), Some(""));
/// assert_eq!(option(opts, 'X').as_deref(), Some(""));
/// assert_eq!(option(opts, 'Z'), None);
/// ```
#[must_use]
pub fn option(options: &str, letter: char) -> Option<String> {
    let start = locate(options, letter)?;
    let (value, _) = split_value(&options[start..]);
    Some(value.to_string())
}

/// Quoted argument attached to an option letter, with escapes removed
///
/// ```
/// use news_relay::feeds::quoted_argument;
///
/// let opts = r#"FU"-r -z"L2"#;
/// assert_eq!(quoted_argument(opts, 'U').as_deref(), Some("-r -z"));
/// assert_eq!(quoted_argument(opts, 'L'), None);
/// ```
#[must_use]
pub fn quoted_argument(options: &str, letter: char) -> Option<String> {
    let start = locate(options, letter)?;
    let (_, rest) = split_value(&options[start..]);
    let mut chars = rest.strip_prefix(QUOTE)?.chars();

    let mut text = String::new();
    while let Some(ch) = chars.next() {
        match ch {
            ESCAPE => match chars.next() {
                Some(escaped @ (QUOTE | ESCAPE)) => text.push(escaped),
                Some(other) => {
                    text.push(ESCAPE);
                    text.push(other);
                }
                None => text.push(ESCAPE),
            },
            QUOTE => break,
            _ => text.push(ch),
        }
    }
    Some(text)
}

/// Numeric part of an option value, `atoi` style
///
/// Lowercase suffixes are skipped; no digits yields 0.
#[must_use]
pub fn numeric_value(value: &str) -> u64 {
    value
        .trim_start_matches(|c: char| c.is_ascii_lowercase())
        .chars()
        .take_while(char::is_ascii_digit)
        .fold(0u64, |n, d| {
            n.saturating_mul(10)
                .saturating_add(u64::from(d.to_digit(10).unwrap_or(0)))
        })
}

/// Lowercase suffix letters of an option value
#[must_use]
pub fn suffix(value: &str) -> &str {
    let end = value
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(value.len());
    &value[..end]
}
