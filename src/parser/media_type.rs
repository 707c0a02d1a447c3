//! Content-Type / Content-Disposition parameter parsing.
//!
//! The parameter grammar (quoting, RFC 2231 continuations, comments) is
//! delegated to `mail-parser`: the value is wrapped in a minimal message and
//! read back through its MIME header accessors.

use mail_parser::{MessageParser, MimeHeaders};

/// A parsed `type/subtype; param=value` header.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct MediaType {
    /// Lower-cased `type/subtype` (or the disposition type).
    pub essence: String,
    pub boundary: Option<String>,
    pub charset: Option<String>,
    /// The legacy `name` parameter of Content-Type.
    pub name: Option<String>,
    /// The `filename` parameter of Content-Disposition.
    pub filename: Option<String>,
}

impl MediaType {
    /// Primary type, e.g. `text` for `text/html`.
    pub fn primary(&self) -> &str {
        self.essence.split('/').next().unwrap_or("")
    }

    pub fn is_multipart(&self) -> bool {
        self.primary() == "multipart"
    }

    pub fn is_text(&self) -> bool {
        self.primary() == "text"
    }
}

/// Parse a `Content-Type` value. `None` if it cannot be understood at all.
pub fn parse_content_type(value: &str) -> Option<MediaType> {
    parse_as("Content-Type", value)
}

/// Parse a `Content-Disposition` value.
pub fn parse_content_disposition(value: &str) -> Option<MediaType> {
    parse_as("Content-Disposition", value)
}

fn parse_as(header_name: &str, value: &str) -> Option<MediaType> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let fake_msg = format!("{header_name}: {value}\r\n\r\n");
    let parser = MessageParser::default();
    let parsed = parser.parse(fake_msg.as_bytes())?;
    let root = parsed.root_part();
    let ct = if header_name == "Content-Type" {
        root.content_type()?
    } else {
        root.content_disposition()?
    };

    let essence = match ct.subtype() {
        Some(sub) => format!("{}/{}", ct.ctype(), sub),
        None => ct.ctype().to_string(),
    }
    .to_ascii_lowercase();

    let attr = |name: &str| ct.attribute(name).map(str::to_string);
    Some(MediaType {
        essence,
        boundary: attr("boundary"),
        charset: attr("charset"),
        name: attr("name"),
        filename: attr("filename"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_boundary() {
        let mt = parse_content_type("multipart/alternative; boundary=IMTHEBOUNDARY").unwrap();
        assert_eq!(mt.essence, "multipart/alternative");
        assert!(mt.is_multipart());
        assert_eq!(mt.boundary.as_deref(), Some("IMTHEBOUNDARY"));
    }

    #[test]
    fn test_quoted_charset() {
        let mt = parse_content_type("Text/HTML; charset=\"utf-8\"").unwrap();
        assert_eq!(mt.essence, "text/html");
        assert!(mt.is_text());
        assert_eq!(mt.charset.as_deref(), Some("utf-8"));
    }

    #[test]
    fn test_disposition_filename() {
        let d = parse_content_disposition("attachment; filename=\"note.txt\"").unwrap();
        assert_eq!(d.essence, "attachment");
        assert_eq!(d.filename.as_deref(), Some("note.txt"));
    }

    #[test]
    fn test_empty_value() {
        assert!(parse_content_type("   ").is_none());
    }
}
