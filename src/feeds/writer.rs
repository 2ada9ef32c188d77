//! Feed file serialization with line folding

use std::io::Write;

use super::record::{FLEX_ALL, Feed};

/// Join a main field with its flex part when the flex part restricts anything
fn with_flex(out: &mut String, main: &str, flex: &str) {
    out.push_str(main);
    if !flex.is_empty() && flex != FLEX_ALL {
        out.push('/');
        out.push_str(flex);
    }
}

/// Render one feed as a single unfolded logical line, without newline
///
/// ```
/// use news_relay::Feed;
/// use news_relay::feeds::format_record;
///
/// let feed = Feed::new("bob", "comp.lang.*").with_options("F");
/// assert_eq!(format_record(&feed), "bob:comp.lang.*::F:");
/// ```
#[must_use]
pub fn format_record(feed: &Feed) -> String {
    let mut out = String::with_capacity(64 + feed.subscriptions.len());
    out.push_str(&feed.name);
    if !feed.no_send.is_empty() {
        out.push('/');
        out.push_str(&feed.no_send);
    }
    out.push(':');
    with_flex(&mut out, &feed.subscriptions, &feed.flex_subscriptions);
    out.push(':');
    with_flex(&mut out, &feed.distributions, &feed.flex_distributions);
    out.push(':');
    out.push_str(&feed.options);
    out.push(':');
    out.push_str(&feed.transmit);
    out
}

fn char_floor(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Fold a logical line into physical lines of at most `width` columns
///
/// Breaks fall only after a `,` or `:` (plus any spaces following it);
/// every broken line ends with a backslash and every continuation starts
/// with a single space. A token longer than the width is never split; the
/// line runs long instead. The result ends with a newline.
#[must_use]
pub fn fold(line: &str, width: usize) -> String {
    let mut out = String::with_capacity(line.len() + line.len() / width.max(1) * 3 + 1);
    let mut rest = line;
    let mut first = true;

    loop {
        let lead = usize::from(!first);
        if lead + rest.len() <= width {
            if !first {
                out.push(' ');
            }
            out.push_str(rest);
            out.push('\n');
            return out;
        }

        // room for the chunk once the leading space and trailing backslash are placed
        let room = char_floor(rest, width.saturating_sub(lead + 1).min(rest.len()));
        let cut = rest[..room]
            .rfind([',', ':'])
            .or_else(|| rest[room..].find([',', ':']).map(|i| room + i))
            .map(|i| {
                let after = i + 1;
                after + (rest[after..].len() - rest[after..].trim_start_matches(' ').len())
            });

        match cut {
            Some(cut) if cut < rest.len() && cut > 0 => {
                if !first {
                    out.push(' ');
                }
                out.push_str(&rest[..cut]);
                out.push_str("\\\n");
                rest = &rest[cut..];
                first = false;
            }
            _ => {
                if !first {
                    out.push(' ');
                }
                out.push_str(rest);
                out.push('\n');
                return out;
            }
        }
    }
}

/// Write feeds, their comment blocks and the trailing comments
pub(crate) fn write_feeds<'a, W: Write>(
    out: &mut W,
    feeds: impl IntoIterator<Item = &'a Feed>,
    trailer: &str,
    width: usize,
) -> std::io::Result<()> {
    for feed in feeds {
        out.write_all(feed.comments.as_bytes())?;
        out.write_all(fold(&format_record(feed), width).as_bytes())?;
    }
    out.write_all(trailer.as_bytes())?;
    out.flush()
}
