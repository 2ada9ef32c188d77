//! Per-peer batch files
//!
//! A batch file lists articles waiting for one peer, one Message-ID per
//! line, optionally followed by text that is passed through to the
//! remote `#! rnews` section header. The dispatcher appends to it;
//! [`BatchSender`] drains it later.
//!
//! A transmitted batch looks like this:
//!
//! ```text
//! #! cunbatch            (unless B has the `o` suffix)
//! #! rnews 1234
//! <1234 bytes of article>
//! #! rnews 567 extra
//! <567 bytes of article>
//! ```

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::control::{control_notice, transmit_notice};
use crate::error::{RelayError, Result};
use crate::feeds::{Feed, numeric_value};
use crate::filter::filter_file;
use crate::history::History;
use crate::transport::{TransmitRequest, Transport};

/// Section size used when the B option gives no byte count
pub const DEFAULT_BATCH_BYTES: u64 = 100_000;

/// Header that starts each article inside a batch
pub const RNEWS_HEADER: &str = "#! rnews";

/// One line of a batch file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Article to send
    pub message_id: String,
    /// Text passed through to the section header
    pub extra: String,
}

impl BatchEntry {
    fn to_line(&self) -> String {
        if self.extra.is_empty() {
            format!("{}\n", self.message_id)
        } else {
            format!("{} {}\n", self.message_id, self.extra)
        }
    }
}

/// Batch file a feed's articles are queued in
///
/// An F feed with a transmit field names its own file; everything else
/// uses `<batch_dir>/<feed name>`.
#[must_use]
pub fn batch_path(config: &RelayConfig, feed: &Feed) -> PathBuf {
    let transmit = feed.transmit.trim();
    if feed.has_option('F') && !transmit.is_empty() {
        PathBuf::from(transmit)
    } else {
        config.batch_file(&feed.name)
    }
}

/// Append one article to a batch file
///
/// The line goes out in a single append-mode write so concurrent
/// appenders never interleave partial lines.
pub fn append_entry(path: &Path, message_id: &str, extra: Option<&str>) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let entry = BatchEntry {
        message_id: message_id.to_string(),
        extra: extra.unwrap_or_default().trim().to_string(),
    };
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(entry.to_line().as_bytes())?;
    Ok(())
}

/// Parse the lines of a batch file
///
/// ```
/// use news_relay::batch::parse_entries;
///
/// let entries = parse_entries("<1@x>\n\n<2@x> priority\n");
/// assert_eq!(entries.len(), 2);
/// assert_eq!(entries[1].extra, "priority");
/// ```
#[must_use]
pub fn parse_entries(text: &str) -> Vec<BatchEntry> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            let (id, extra) = line
                .split_once(char::is_whitespace)
                .unwrap_or((line, ""));
            BatchEntry {
                message_id: id.to_string(),
                extra: extra.trim().to_string(),
            }
        })
        .collect()
}

/// Split an incoming rnews batch into articles
///
/// Section lengths count bytes, so the batch is split before any text
/// decoding. Data that does not start with `#! rnews` is a single article.
///
/// ```
/// use news_relay::batch::split_batch;
///
/// let batch = b"#! rnews 6\nfirst\n#! rnews 7 extra\nsecond\n";
/// assert_eq!(split_batch(batch), vec![b"first\n".as_slice(), b"second\n".as_slice()]);
/// assert_eq!(split_batch(b"Path: a\n\nbody\n"), vec![b"Path: a\n\nbody\n".as_slice()]);
/// ```
#[must_use]
pub fn split_batch(data: &[u8]) -> Vec<&[u8]> {
    let blank = |bytes: &[u8]| bytes.iter().all(u8::is_ascii_whitespace);
    let marker = RNEWS_HEADER.as_bytes();
    if !data.starts_with(marker) {
        return if blank(data) { Vec::new() } else { vec![data] };
    }

    let mut articles = Vec::new();
    let mut rest = data;
    while let Some(tail) = rest.strip_prefix(marker) {
        let Some(eol) = tail.iter().position(|&b| b == b'\n') else {
            break;
        };
        let header = String::from_utf8_lossy(&tail[..eol]);
        let body = &tail[eol + 1..];
        let count = header
            .split_whitespace()
            .next()
            .and_then(|n| n.parse::<usize>().ok());
        let Some(count) = count else {
            warn!("unreadable batch header: {}{}", RNEWS_HEADER, header);
            break;
        };

        let end = count.min(body.len());
        if end < count {
            warn!("batch truncated: expected {} bytes, got {}", count, end);
        }
        articles.push(&body[..end]);
        rest = &body[end..];
    }
    if !blank(rest) {
        warn!("{} bytes of trailing garbage after batch", rest.len());
    }
    articles
}

/// What one [`BatchSender::send`] pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Payloads handed to the transport
    pub sections: usize,
    /// Articles included in them
    pub articles: usize,
    /// Entries whose article was no longer on file
    pub missing: usize,
}

/// Drains batch files into transport payloads
pub struct BatchSender<'a> {
    config: &'a RelayConfig,
    transport: &'a dyn Transport,
}

impl<'a> BatchSender<'a> {
    /// Create a sender for one site
    pub fn new(config: &'a RelayConfig, transport: &'a dyn Transport) -> Self {
        Self { config, transport }
    }

    /// Send everything queued for `feed`
    ///
    /// The batch file is first renamed to a `.work` file; a work file left
    /// by an interrupted run is picked up again instead. Sections of at
    /// most the B option's byte count are packed and transmitted in turn.
    /// If a transmission fails, the entries not yet sent are written back
    /// to the work file for the next run.
    ///
    /// With the N option the queued ids are offered in a single `ihave`
    /// notice instead of being sent.
    pub fn send(&self, feed: &Feed, history: &dyn History) -> Result<BatchReport> {
        let batch = batch_path(self.config, feed);
        let work = work_path(&batch);

        if !work.exists() {
            if !batch.exists() {
                debug!("no news for {}", feed.name);
                return Ok(BatchReport::default());
            }
            fs::rename(&batch, &work)?;
        }

        let entries = parse_entries(&fs::read_to_string(&work)?);
        let report = if feed.has_option('N') {
            self.offer(feed, &entries)?
        } else {
            self.pack_and_send(feed, &entries, history, &work)?
        };

        fs::remove_file(&work)?;
        info!(
            "{}: {} articles in {} sections, {} missing",
            feed.name, report.articles, report.sections, report.missing
        );
        Ok(report)
    }

    fn offer(&self, feed: &Feed, entries: &[BatchEntry]) -> Result<BatchReport> {
        if entries.is_empty() {
            return Ok(BatchReport::default());
        }
        let mut body = String::new();
        for entry in entries {
            body.push_str(&entry.message_id);
            body.push('\n');
        }
        let command = format!("ihave {}", self.config.nodename);
        let notice = control_notice(self.config, &feed.name, &command, &body)?;
        transmit_notice(self.transport, self.config, &feed.name, feed, &notice)?;
        Ok(BatchReport {
            sections: 1,
            articles: entries.len(),
            missing: 0,
        })
    }

    fn pack_and_send(
        &self,
        feed: &Feed,
        entries: &[BatchEntry],
        history: &dyn History,
        work: &Path,
    ) -> Result<BatchReport> {
        let limit = match feed.option('B').map(|b| numeric_value(&b)) {
            Some(n) if n > 0 => n,
            _ => DEFAULT_BATCH_BYTES,
        };

        let mut report = BatchReport::default();
        let mut next = 0;
        while next < entries.len() {
            let section_start = next;
            let mut payload = Vec::new();
            let mut packed = 0;
            let mut bytes_left = i128::from(limit);

            while next < entries.len() && bytes_left > 0 {
                let entry = &entries[next];
                next += 1;
                let Some(relative) = history.article_path(&entry.message_id) else {
                    warn!("no copy of {} available", entry.message_id);
                    report.missing += 1;
                    continue;
                };
                let content = match fs::read(self.config.spool_dir.join(relative)) {
                    Ok(content) => content,
                    Err(e) => {
                        warn!("can't read {}: {}", entry.message_id, e);
                        report.missing += 1;
                        continue;
                    }
                };
                if entry.extra.is_empty() {
                    writeln!(payload, "{} {}", RNEWS_HEADER, content.len())?;
                } else {
                    writeln!(payload, "{} {} {}", RNEWS_HEADER, content.len(), entry.extra)?;
                }
                payload.extend_from_slice(&content);
                bytes_left -= i128::try_from(content.len()).unwrap_or(i128::MAX);
                packed += 1;
            }

            if packed == 0 {
                continue;
            }
            if let Err(e) = self.transmit_section(feed, &payload) {
                rewrite_work(work, &entries[section_start..])?;
                return Err(e);
            }
            report.sections += 1;
            report.articles += packed;
        }
        Ok(report)
    }

    fn transmit_section(&self, feed: &Feed, payload: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.config.temp_dir)?;
        let mut raw = NamedTempFile::new_in(&self.config.temp_dir)?;
        raw.write_all(payload)?;
        raw.flush()?;

        let filtered = filter_file(feed, raw.path(), &self.config.temp_dir, true)?;
        let file = filtered.as_ref().map_or(raw.path(), NamedTempFile::path);
        let request = TransmitRequest::new(&feed.name, feed, "", file).batched(true);
        self.transport.transmit(&request)
    }
}

fn work_path(batch: &Path) -> PathBuf {
    let mut name = OsString::from(batch.as_os_str());
    name.push(".work");
    PathBuf::from(name)
}

fn rewrite_work(work: &Path, unsent: &[BatchEntry]) -> Result<()> {
    let tmp = work.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        for entry in unsent {
            file.write_all(entry.to_line().as_bytes())?;
        }
    }
    fs::rename(&tmp, work).map_err(|e| {
        RelayError::Other(format!("can't restore {}: {}", work.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use crate::transport::DryRunTransport;
    use chrono::Utc;

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn transmit(&self, request: &TransmitRequest<'_>) -> Result<()> {
            Err(RelayError::Transport {
                site: request.systems.to_string(),
                message: "link down".to_string(),
            })
        }
    }

    fn spool_article(config: &RelayConfig, history: &mut MemoryHistory, id: &str, n: u32) {
        let dir = config.spool_dir.join("misc").join("test");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(n.to_string()), format!("Message-ID: {id}\n\nbody {n}\n")).unwrap();
        history.record(id, Utc::now(), vec![format!("misc.test/{n}")]);
    }

    #[test]
    fn test_append_single_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch").join("bob");
        append_entry(&path, "<1@x>", None).unwrap();
        append_entry(&path, "<2@x>", Some(" note ")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<1@x>\n<2@x> note\n");
    }

    #[test]
    fn test_batch_path_choice() {
        let config = RelayConfig::for_site_root("gryphon", "/srv/news");
        let feed = Feed::new("bob", "all").with_options("F");
        assert_eq!(batch_path(&config, &feed), PathBuf::from("/srv/news/batch/bob"));
        let feed = feed.with_transmit("/var/spool/out/bob");
        assert_eq!(batch_path(&config, &feed), PathBuf::from("/var/spool/out/bob"));
        let feed = Feed::new("bob", "all").with_options("B").with_transmit("uux - %S!rnews");
        assert_eq!(batch_path(&config, &feed), PathBuf::from("/srv/news/batch/bob"));
    }

    #[test]
    fn test_split_handles_short_batch() {
        let articles = split_batch(b"#! rnews 100\nshort");
        assert_eq!(articles, vec![b"short".as_slice()]);
        assert!(split_batch(b"").is_empty());
    }

    #[test]
    fn test_split_counts_bytes_not_characters() {
        let first: &[u8] = b"Subject: caf\xe9\n\nbody\n";
        let second: &[u8] = b"Subject: tea\n\nbody\n";
        let mut batch = format!("#! rnews {}\n", first.len()).into_bytes();
        batch.extend_from_slice(first);
        batch.extend_from_slice(format!("#! rnews {}\n", second.len()).as_bytes());
        batch.extend_from_slice(second);

        assert_eq!(split_batch(&batch), vec![first, second]);
    }

    #[test]
    fn test_send_packs_sections() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::for_site_root("gryphon", dir.path());
        let mut history = MemoryHistory::new();
        spool_article(&config, &mut history, "<1@x>", 1);
        spool_article(&config, &mut history, "<2@x>", 2);

        let feed = Feed::new("bob", "all").with_options("Bo20");
        let path = batch_path(&config, &feed);
        append_entry(&path, "<1@x>", None).unwrap();
        append_entry(&path, "<gone@x>", None).unwrap();
        append_entry(&path, "<2@x>", Some("urgent")).unwrap();

        let transport = DryRunTransport::new();
        let report = BatchSender::new(&config, &transport).send(&feed, &history).unwrap();
        assert_eq!(report.missing, 1);
        assert_eq!(report.articles, 2);
        assert_eq!(report.sections, 2);

        let sent = transport.sent();
        assert!(sent.iter().all(|s| s.batched && s.systems == "bob"));
        assert_eq!(sent[0].payload, "#! rnews 26\nMessage-ID: <1@x>\n\nbody 1\n");
        assert!(sent[1].payload.starts_with("#! rnews 26 urgent\n"));
        assert!(!path.exists());
        assert!(!work_path(&path).exists());
    }

    #[test]
    fn test_send_with_header_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::for_site_root("gryphon", dir.path());
        let mut history = MemoryHistory::new();
        spool_article(&config, &mut history, "<1@x>", 1);
        let feed = Feed::new("bob", "all").with_options("B");
        append_entry(&batch_path(&config, &feed), "<1@x>", None).unwrap();

        let transport = DryRunTransport::new();
        BatchSender::new(&config, &transport).send(&feed, &history).unwrap();
        let payload = &transport.sent()[0].payload;
        assert!(payload.starts_with("#! unbatch\n#! rnews "));
        let inner = payload.strip_prefix("#! unbatch\n").unwrap();
        assert_eq!(
            split_batch(inner.as_bytes()),
            vec![b"Message-ID: <1@x>\n\nbody 1\n".as_slice()]
        );
    }

    #[test]
    fn test_failure_keeps_unsent() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::for_site_root("gryphon", dir.path());
        let mut history = MemoryHistory::new();
        spool_article(&config, &mut history, "<1@x>", 1);
        let feed = Feed::new("bob", "all").with_options("B");
        let path = batch_path(&config, &feed);
        append_entry(&path, "<1@x>", Some("x")).unwrap();

        let err = BatchSender::new(&config, &FailingTransport)
            .send(&feed, &history)
            .unwrap_err();
        assert!(matches!(err, RelayError::Transport { .. }));
        let work = work_path(&path);
        assert_eq!(fs::read_to_string(&work).unwrap(), "<1@x> x\n");

        // new entries queue up behind the work file and the retry drains it first
        append_entry(&path, "<1@x>", None).unwrap();
        let transport = DryRunTransport::new();
        let report = BatchSender::new(&config, &transport).send(&feed, &history).unwrap();
        assert_eq!(report.articles, 1);
        assert!(!work.exists());
        assert!(path.exists());
    }

    #[test]
    fn test_notify_only_offers_ids() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::for_site_root("gryphon", dir.path());
        let history = MemoryHistory::new();
        let feed = Feed::new("bob", "all").with_options("BN");
        let path = batch_path(&config, &feed);
        append_entry(&path, "<1@x>", None).unwrap();
        append_entry(&path, "<2@x>", None).unwrap();

        let transport = DryRunTransport::new();
        let report = BatchSender::new(&config, &transport).send(&feed, &history).unwrap();
        assert_eq!(report.articles, 2);
        let notice = &transport.sent()[0].payload;
        assert!(notice.contains("Control: ihave gryphon\n"));
        assert!(notice.contains("Newsgroups: to.bob.ctl\n"));
        assert!(notice.ends_with("\n<1@x>\n<2@x>\n"));
    }

    #[test]
    fn test_nothing_queued() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::for_site_root("gryphon", dir.path());
        let transport = DryRunTransport::new();
        let report = BatchSender::new(&config, &transport)
            .send(&Feed::new("bob", "all").with_options("B"), &MemoryHistory::new())
            .unwrap();
        assert_eq!(report, BatchReport::default());
        assert!(transport.is_empty());
    }
}
