//! MIME message decoding: searchable body text and header fields.

use std::collections::BTreeSet;
use std::path::Path;

use mail_parser::{Addr, Address, MessageParser};
use tracing::debug;

use crate::error::{FtsError, Result};
use crate::model::address::EmailAddress;

/// Header fields of a persisted message that feed the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: Option<String>,
    /// `Keywords:` plus Gmail `X-Gmail-Labels:` values.
    pub keywords: BTreeSet<String>,
    /// `Date:` header in milliseconds since the Unix epoch.
    pub date_millis: Option<i64>,
}

/// Read a persisted message and return all of its searchable text.
///
/// A missing file yields an empty string: the message is indexed with its
/// header fields only. Any other I/O failure is returned to the caller.
pub fn read_full_text(path: &Path) -> Result<String> {
    match std::fs::read(path) {
        Ok(raw) => Ok(extract_full_text(&raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Message content missing, indexing without body");
            Ok(String::new())
        }
        Err(e) => Err(FtsError::io(path, e)),
    }
}

/// Extract the body text of a raw message. Header fields are not included.
///
/// Every text body part is included, separated by blank lines; `mail-parser`
/// already renders HTML-only parts as text. Unparseable input falls back to
/// the raw body.
pub fn extract_full_text(raw_message: &[u8]) -> String {
    let message_bytes = skip_from_line(raw_message);

    let parser = MessageParser::default();
    match parser.parse(message_bytes) {
        Some(msg) => {
            let parts: Vec<String> = (0..)
                .map_while(|i| msg.body_text(i))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            parts.join("\n\n")
        }
        None => extract_body_fallback(message_bytes),
    }
}

/// Decode the header fields of a raw message.
pub fn parse_headers(raw_message: &[u8]) -> Result<MessageHeaders> {
    let message_bytes = skip_from_line(raw_message);
    let parser = MessageParser::default();
    let msg = parser
        .parse(message_bytes)
        .ok_or_else(|| FtsError::MimeError("Failed to parse message headers".into()))?;

    let raw_headers = extract_raw_headers(message_bytes);
    let mut keywords = BTreeSet::new();
    for value in raw_header_values(&raw_headers, "keywords") {
        keywords.extend(split_list(&value, ','));
    }
    for value in raw_header_values(&raw_headers, "x-gmail-labels") {
        keywords.extend(split_list(&value, ','));
    }

    Ok(MessageHeaders {
        from: convert_addresses(msg.from()),
        to: convert_addresses(msg.to()),
        cc: convert_addresses(msg.cc()),
        bcc: convert_addresses(msg.bcc()),
        subject: msg.subject().map(str::to_string),
        keywords,
        date_millis: msg.date().map(|d| d.to_timestamp() * 1000),
    })
}

/// Flatten a `mail_parser` address header (plain list or groups).
fn convert_addresses(address: Option<&Address<'_>>) -> Vec<EmailAddress> {
    let convert = |a: &Addr<'_>| {
        EmailAddress::new(
            a.name.as_deref().unwrap_or(""),
            a.address.as_deref().unwrap_or(""),
        )
    };
    match address {
        Some(Address::List(list)) => list.iter().map(convert).collect(),
        Some(Address::Group(groups)) => groups
            .iter()
            .flat_map(|g| g.addresses.iter())
            .map(convert)
            .collect(),
        None => Vec::new(),
    }
}

/// Collect the (unfolded) values of every header named `name`, case-insensitively.
fn raw_header_values(raw_headers: &str, name: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current: Option<String> = None;

    for line in raw_headers.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            // Folded continuation
            if let Some(ref mut value) = current {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some(value) = current.take() {
            values.push(value);
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(name) {
                current = Some(value.trim().to_string());
            }
        }
    }
    if let Some(value) = current {
        values.push(value);
    }
    values
}

fn split_list(value: &str, separator: char) -> impl Iterator<Item = String> + '_ {
    value
        .split(separator)
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
}

/// Skip the `From ` separator line at the start of MBOX-framed messages.
fn skip_from_line(data: &[u8]) -> &[u8] {
    // Handle BOM
    let data = if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    };

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}

/// Extract the raw headers as a string (everything before the first blank line).
fn extract_raw_headers(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    if let Some(pos) = text.find("\r\n\r\n") {
        text[..pos].to_string()
    } else if let Some(pos) = text.find("\n\n") {
        text[..pos].to_string()
    } else {
        text.to_string()
    }
}

/// Fallback body extraction when `mail-parser` cannot parse the message.
///
/// Without a blank line there is no header block, so the whole input is body.
fn extract_body_fallback(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    if let Some(pos) = text.find("\r\n\r\n") {
        text[pos + 4..].trim().to_string()
    } else if let Some(pos) = text.find("\n\n") {
        text[pos + 2..].trim().to_string()
    } else {
        text.trim().to_string()
    }
}
