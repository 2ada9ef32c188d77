//! Compression and 7-bit encoding of outgoing payloads
//!
//! The C option compresses what is sent with zlib; its digits choose the
//! level (values above 9 are treated as 9). E, together with C, wraps the
//! compressed bytes in base64 so the payload survives 7-bit links.
//!
//! Batches carry a first line naming the unpacker (`#! unbatch`,
//! `#! cunbatch`, `#! c7unbatch`) unless the B option has the `o` suffix.
//! A single compressed article gets `#! uncompress` or `#! un7compress`
//! only for receivers flagged `V2.10`.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::error::{RelayError, Result};
use crate::feeds::{Feed, numeric_value};

/// Line width of base64 output
pub const ENCODED_LINE_WIDTH: usize = 76;

/// First line of a payload, naming the remote unpacker
///
/// ```
/// use news_relay::Feed;
/// use news_relay::filter::content_header;
///
/// let feed = Feed::new("bob", "all").with_options("FBC");
/// assert_eq!(content_header(&feed, true), Some("#! cunbatch"));
/// assert_eq!(content_header(&feed, false), None);
///
/// let bare = Feed::new("bob", "all").with_options("FBo");
/// assert_eq!(content_header(&bare, true), None);
/// ```
#[must_use]
pub fn content_header(feed: &Feed, batched: bool) -> Option<&'static str> {
    let compress = feed.has_option('C');
    let encode = compress && feed.has_option('E');

    if batched {
        if feed.option('B').is_some_and(|b| b.contains('o')) {
            return None;
        }
        return Some(match (compress, encode) {
            (false, _) => "#! unbatch",
            (true, false) => "#! cunbatch",
            (true, true) => "#! c7unbatch",
        });
    }

    let old_receiver = feed.option('V').is_some_and(|v| v.starts_with("2.10"));
    match (old_receiver, compress, encode) {
        (true, true, false) => Some("#! uncompress"),
        (true, true, true) => Some("#! un7compress"),
        _ => None,
    }
}

/// Compression level asked for by the C option
fn compression_level(feed: &Feed) -> Compression {
    match feed.option('C') {
        Some(value) if value.chars().any(|c| c.is_ascii_digit()) => {
            let level = numeric_value(&value).min(9);
            Compression::new(u32::try_from(level).unwrap_or(9))
        }
        _ => Compression::default(),
    }
}

/// zlib-compress a buffer
pub fn compress(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), level);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Base64-encode a buffer, folded at [`ENCODED_LINE_WIDTH`]
#[must_use]
pub fn encode_7bit(data: &[u8]) -> String {
    let encoded = BASE64.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / ENCODED_LINE_WIDTH + 1);
    for chunk in encoded.as_bytes().chunks(ENCODED_LINE_WIDTH) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out
}

/// Undo [`encode_7bit`]
pub fn decode_7bit(text: &[u8]) -> Result<Vec<u8>> {
    let compact: Vec<u8> = text
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    BASE64
        .decode(compact)
        .map_err(|e| RelayError::Other(format!("invalid 7-bit payload: {e}")))
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 3);
    decoder.read_to_end(&mut out)?;
    trace!("Decompressed {} bytes to {} bytes", data.len(), out.len());
    Ok(out)
}

/// Build the transformed copy of `file` the feed's options ask for
///
/// Returns `None` when the file can be sent as it is. The copy lives in
/// `temp_dir` and is removed when the returned handle is dropped.
///
/// # Arguments
///
/// * `feed` - Link whose C, E, B and V options apply
/// * `file` - Article or batch to transform
/// * `temp_dir` - Where to put the copy
/// * `batched` - Whether `file` is a batch
pub fn filter_file(
    feed: &Feed,
    file: &Path,
    temp_dir: &Path,
    batched: bool,
) -> Result<Option<NamedTempFile>> {
    let compress_it = feed.has_option('C');
    let header = content_header(feed, batched);
    if !compress_it && header.is_none() {
        return Ok(None);
    }

    let content = fs::read(file)?;
    fs::create_dir_all(temp_dir)?;
    let mut copy = NamedTempFile::new_in(temp_dir)?;

    if let Some(header) = header {
        writeln!(copy, "{header}")?;
    }

    if compress_it {
        let squashed = compress(&content, compression_level(feed))?;
        debug!(
            "Compressed {} to {} bytes for {}",
            content.len(),
            squashed.len(),
            feed.name
        );
        if feed.has_option('E') {
            copy.write_all(encode_7bit(&squashed).as_bytes())?;
        } else {
            copy.write_all(&squashed)?;
        }
    } else {
        copy.write_all(&content)?;
    }

    copy.flush()?;
    Ok(Some(copy))
}

/// Undo whatever an unpacker header line announces
///
/// Payloads without a recognized header are returned unchanged, so a
/// plain `#! rnews` batch or a bare article passes straight through.
///
/// ```
/// use news_relay::filter::unpack_payload;
///
/// let plain = b"#! unbatch\n#! rnews 3\nabc".to_vec();
/// assert_eq!(unpack_payload(&plain).unwrap(), b"#! rnews 3\nabc");
/// ```
pub fn unpack_payload(data: &[u8]) -> Result<Vec<u8>> {
    let Some(end) = data.iter().position(|&b| b == b'\n') else {
        return Ok(data.to_vec());
    };
    let first = String::from_utf8_lossy(&data[..end]);
    let rest = &data[end + 1..];

    match first.trim_end() {
        "#! unbatch" => Ok(rest.to_vec()),
        "#! cunbatch" | "#! uncompress" => decompress(rest),
        "#! c7unbatch" | "#! un7compress" => decompress(&decode_7bit(rest)?),
        _ => Ok(data.to_vec()),
    }
}
