//! Typed accessors for common mail header fields.

use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

use crate::model::header::Header;
use crate::parser::decode::MIME_BASE64;
use crate::parser::media_type::{parse_content_disposition, parse_content_type, MediaType};

/// Read-only mail view over a [`Header`].
#[derive(Debug, Clone, Copy)]
pub struct MailHeader<'h> {
    header: &'h Header,
}

impl<'h> MailHeader<'h> {
    pub fn new(header: &'h Header) -> Self {
        Self { header }
    }

    /// The underlying field list.
    pub fn fields(&self) -> &'h Header {
        self.header
    }

    /// `Subject` with RFC 2047 encoded words decoded.
    pub fn subject(&self) -> Option<String> {
        self.header.get("Subject").map(decode_encoded_words)
    }

    /// `Date`, normalized to UTC. `None` when absent or unparseable.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.header.get("Date").and_then(parse_date)
    }

    /// `Message-Id` including its angle brackets.
    pub fn message_id(&self) -> Option<String> {
        let value = self.header.get("Message-Id")?.trim();
        let id = match value.find('<') {
            Some(start) => match value[start..].find('>') {
                Some(len) => &value[start..=start + len],
                None => value,
            },
            None => value,
        };
        (!id.is_empty()).then(|| id.to_string())
    }

    pub fn content_type(&self) -> Option<MediaType> {
        self.header.get("Content-Type").and_then(parse_content_type)
    }

    pub fn content_disposition(&self) -> Option<MediaType> {
        self.header
            .get("Content-Disposition")
            .and_then(parse_content_disposition)
    }

    /// Disposition `filename`, falling back to the Content-Type `name`.
    pub fn filename(&self) -> Option<String> {
        self.content_disposition()
            .and_then(|d| d.filename)
            .or_else(|| self.content_type().and_then(|ct| ct.name))
            .map(|name| decode_encoded_words(&name))
            .filter(|name| !name.trim().is_empty())
    }
}

impl<'h> From<&'h Header> for MailHeader<'h> {
    fn from(header: &'h Header) -> Self {
        Self::new(header)
    }
}

/// Decode RFC 2047 encoded words (`=?charset?B|Q?text?=`).
///
/// Whitespace between two adjacent encoded words is dropped. Words that do
/// not decode are kept as written.
pub fn decode_encoded_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let gap = &rest[..start];
        if !(after_word && gap.trim().is_empty()) {
            out.push_str(gap);
        }
        match decode_word(&rest[start + 2..]) {
            Some((text, used)) => {
                out.push_str(&text);
                rest = &rest[start + 2 + used..];
                after_word = true;
            }
            None => {
                out.push_str("=?");
                rest = &rest[start + 2..];
                after_word = false;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode `charset?enc?text?=` (the part after `=?`). Returns the text and
/// how many bytes were used.
fn decode_word(s: &str) -> Option<(String, usize)> {
    let mut fields = s.splitn(3, '?');
    let charset = fields.next()?;
    let encoding = fields.next()?;
    let tail = fields.next()?;
    let end = tail.find("?=")?;
    let payload = &tail[..end];
    if payload.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => MIME_BASE64.decode(payload).ok()?,
        "Q" | "q" => decode_q(payload)?,
        _ => return None,
    };

    // RFC 2231 language suffix: `utf-8*en`.
    let label = charset.split('*').next().unwrap_or(charset);
    let text = match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(enc) => enc.decode(&bytes).0.into_owned(),
        None => {
            warn!(charset = label, "Unknown charset in encoded word, using UTF-8");
            String::from_utf8_lossy(&bytes).into_owned()
        }
    };
    Some((text, charset.len() + encoding.len() + end + 4))
}

/// Q encoding: `_` is a space, `=XX` a byte.
///
/// `_` becomes `=20` rather than a bare space so a trailing one survives the
/// decoder's end-of-line trimming.
fn decode_q(payload: &str) -> Option<Vec<u8>> {
    quoted_printable::decode(payload.replace('_', "=20"), quoted_printable::ParseMode::Robust).ok()
}

const DATE_FORMATS: &[&str] = &[
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%d %b %Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S",
];

const ZONE_OFFSETS: &[(&str, &str)] = &[
    ("UT", "+0000"),
    ("GMT", "+0000"),
    ("UTC", "+0000"),
    ("EST", "-0500"),
    ("EDT", "-0400"),
    ("CST", "-0600"),
    ("CDT", "-0500"),
    ("MST", "-0700"),
    ("MDT", "-0600"),
    ("PST", "-0800"),
    ("PDT", "-0700"),
    ("CET", "+0100"),
    ("CEST", "+0200"),
];

/// Parse a `Date` value, tolerating the usual real-world deviations.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let cleaned = normalize_date(value);
    for fmt in DATE_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&cleaned, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    let parsed = via_mail_parser(value);
    if parsed.is_none() {
        warn!(date = value, "Could not parse date");
    }
    parsed
}

/// Drop the weekday and any trailing comment, and turn a zone name into
/// an offset.
fn normalize_date(value: &str) -> String {
    let mut s = value;
    if let Some((head, tail)) = s.split_once(',') {
        if head.trim().chars().all(|c| c.is_ascii_alphabetic()) {
            s = tail;
        }
    }
    if let Some(open) = s.find('(') {
        s = &s[..open];
    }
    let mut s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some((name, offset)) = ZONE_OFFSETS
        .iter()
        .find(|(name, _)| s.rsplit(' ').next() == Some(*name))
    {
        s.truncate(s.len() - name.len());
        s.push_str(offset);
    }
    s
}

fn via_mail_parser(value: &str) -> Option<DateTime<Utc>> {
    let msg = format!("Date: {value}\r\n\r\n");
    let parsed = mail_parser::MessageParser::default().parse(msg.as_bytes())?;
    let rfc3339 = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
