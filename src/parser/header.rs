//! RFC 5322 header block scanning with strict and tolerant variants.
//!
//! The scanner reads *logical lines* (a physical line plus any following
//! lines that start with a space or tab) and splits each at the first `:`.
//! In tolerant mode a line without a separator triggers a one-line lookahead
//! that decides whether the line was a broken continuation or the start of
//! a body that arrived without its blank separator line.

use std::io::BufRead;

use serde::Serialize;
use tracing::warn;

use crate::error::{MimeError, Result};
use crate::model::header::{canonical_key, is_token_byte, Header, HeaderField};

use super::ParseMode;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// What the tolerant scanner did with a line that had no `:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryAction {
    /// Joined onto the previous field; scanning continued with the next line.
    JoinedInterior,
    /// Joined onto the previous field, which was the last before the blank line.
    JoinedAtBodyBoundary,
    /// The line and the one after it were handed back as body bytes.
    BodyStartedEarly,
}

/// A malformed line the tolerant scanner worked around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recovery {
    pub action: RecoveryAction,
    /// The offending line, without its line ending.
    pub line: String,
}

impl Recovery {
    /// The error a strict scan would have returned for this line.
    pub fn error(&self) -> MimeError {
        MimeError::MalformedHeaderLine(self.line.clone())
    }
}

/// Result of a successful scan.
#[derive(Debug, Clone, Default)]
pub struct ScannedHeader {
    pub header: Header,
    /// Bytes read while looking ahead that belong to the body. Must be
    /// replayed ahead of the rest of the stream.
    pub residual: Vec<u8>,
    /// Every recovery applied, in order. Always empty in strict mode.
    pub recoveries: Vec<Recovery>,
}

impl ScannedHeader {
    /// True when no recovery heuristic was needed.
    pub fn is_clean(&self) -> bool {
        self.recoveries.is_empty()
    }
}

/// Read a header block from `r`, up to and including the blank separator line.
///
/// To bound memory on hostile input, `r` should sit on top of a
/// [`LimitedReader`](super::limit::LimitedReader).
///
/// Fatal problems (continuation first line, bad key bytes, I/O) are `Err` in
/// both modes. A line without `:` is `Err` in strict mode; in tolerant mode it
/// is recovered and reported in [`ScannedHeader::recoveries`].
pub fn read_header<R: BufRead + ?Sized>(r: &mut R, mode: ParseMode) -> Result<ScannedHeader> {
    skip_bom(r)?;

    // The first line cannot start with a leading space.
    if r.fill_buf()?.first().copied().is_some_and(is_space) {
        let mut line = Vec::new();
        r.read_until(b'\n', &mut line)?;
        return Err(MimeError::MalformedInitialLine(lossy(line_content(&line))));
    }

    let mut scanned = ScannedHeader::default();
    let mut carried: Option<Vec<u8>> = None;

    loop {
        let line = match carried.take() {
            Some(line) => line,
            None => match read_logical_line(r)? {
                Some(line) => line,
                None => break,
            },
        };
        if is_blank(&line) {
            break;
        }

        let Some(colon) = line.iter().position(|&b| b == b':') else {
            let malformed = || MimeError::MalformedHeaderLine(lossy(line_content(&line)));
            if !mode.is_tolerant() {
                return Err(malformed());
            }
            let Some(lookahead) = read_logical_line(r)? else {
                return Err(malformed());
            };

            if !is_blank(&lookahead) && !lookahead.contains(&b':') {
                record(&mut scanned, &line, RecoveryAction::BodyStartedEarly);
                scanned.residual = line;
                scanned.residual.extend_from_slice(&lookahead);
                break;
            }
            // The remaining recoveries glue the line onto the previous field.
            if scanned.header.is_empty() {
                return Err(malformed());
            }
            if is_blank(&lookahead) {
                join_previous(&mut scanned, &line, RecoveryAction::JoinedAtBodyBoundary);
                break;
            }
            join_previous(&mut scanned, &line, RecoveryAction::JoinedInterior);
            carried = Some(lookahead);
            continue;
        };

        // Trailing spaces before the colon appear in the wild; drop them.
        let key_bytes = trim_wsp(&line[..colon]);
        if key_bytes.iter().any(|&b| !is_token_byte(b)) {
            return Err(MimeError::MalformedHeaderKey(lossy(key_bytes)));
        }
        if key_bytes.is_empty() {
            continue;
        }

        // Token bytes are ASCII, so this never replaces anything.
        let key = canonical_key(&String::from_utf8_lossy(key_bytes));
        let value = unfold_value(&line[colon + 1..]);
        scanned.header.push(HeaderField::scanned(key, value, line));
    }

    Ok(scanned)
}

/// Append a keyless line to the last field and log the recovery.
fn join_previous(scanned: &mut ScannedHeader, line: &[u8], action: RecoveryAction) {
    let text = unfold_value(line);
    if let Some(field) = scanned.header.last_mut() {
        field.append(&text, line);
    }
    record(scanned, line, action);
}

fn record(scanned: &mut ScannedHeader, line: &[u8], action: RecoveryAction) {
    let line = lossy(line_content(line));
    warn!(?action, line = %line, "Recovered malformed header line");
    scanned.recoveries.push(Recovery { action, line });
}

/// Read one logical line, line endings included. `None` at end of stream.
///
/// A blank line is never followed by continuations: it ends the block.
fn read_logical_line<R: BufRead + ?Sized>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    if r.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if is_blank(&line) {
        return Ok(Some(line));
    }
    while line.ends_with(b"\n") && r.fill_buf()?.first().copied().is_some_and(is_space) {
        r.read_until(b'\n', &mut line)?;
    }
    Ok(Some(line))
}

fn skip_bom<R: BufRead + ?Sized>(r: &mut R) -> Result<()> {
    if r.fill_buf()?.starts_with(UTF8_BOM) {
        r.consume(UTF8_BOM.len());
    }
    Ok(())
}

/// Unfold a (possibly multi-line) value: line endings are removed, the
/// continuation's own leading whitespace is kept, and the result is trimmed.
fn unfold_value(raw: &[u8]) -> String {
    let mut joined = Vec::with_capacity(raw.len());
    for piece in raw.split_inclusive(|&b| b == b'\n') {
        joined.extend_from_slice(line_content(piece));
    }
    decode_header_bytes(trim_wsp(&joined))
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub(crate) fn decode_header_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Strip a trailing `\n` or `\r\n`.
pub(crate) fn line_content(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// A line with nothing but its terminator.
fn is_blank(line: &[u8]) -> bool {
    line_content(line).is_empty()
}

fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn trim_wsp(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| !is_space(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| !is_space(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::{BufReader, Read};

    const WELL_FORMED: &str = "Received: from example.com by example.org\r\n\
        Received: from localhost by example.com\r\n\
        To: Taki Tachibana <taki.tachibana@example.org>\r\n\
        From: Mitsuha Miyamizu <mitsuha.miyamizu@example.com>\r\n\
        \r\n\
        Hello\r\n";

    const MID_NON_FOLD: &str = "Content-Disposition: inline; filename=\"6D19D_xxxxx_7D4049.zip\"\r\n\
        Content-Type: application/zip; x-unix-mode=0600;\r\n\
        name=\"6D19D_xxxxx_7D4049.zip\"\r\n\
        Content-Transfer-Encoding: base64\r\n\r\n";

    const LAST_NON_FOLD: &str = "Content-Disposition: inline; filename=\"6D19D_xxxxx_7D4049.zip\"\r\n\
        Content-Transfer-Encoding: base64\r\n\
        Content-Type: application/zip; x-unix-mode=0600;\r\n\
        name=\"6D19D_xxxxx_7D4049.zip\"\r\n\r\n\
        UEsDBBQAAAAAAFebfUgAAAAAAAAAAAAAAAAFAAAAc2Nhbi9QSwMEFAAAAAAAV5t9SAAAAAAA\r\n";

    const NO_SEP_BODY: &str = "<html>\r\n<head>\r\n";

    fn scan(input: &str, mode: ParseMode) -> Result<ScannedHeader> {
        let mut r = BufReader::new(input.as_bytes());
        read_header(&mut r, mode)
    }

    fn pairs(h: &Header) -> Vec<String> {
        h.iter().map(|f| format!("{}: {}", f.key(), f.value())).collect()
    }

    #[test]
    fn test_well_formed_same_in_both_modes() {
        let strict = scan(WELL_FORMED, ParseMode::Strict).unwrap();
        let tolerant = scan(WELL_FORMED, ParseMode::Tolerant).unwrap();
        assert_eq!(strict.header, tolerant.header);
        assert_eq!(
            pairs(&strict.header),
            vec![
                "Received: from example.com by example.org",
                "Received: from localhost by example.com",
                "To: Taki Tachibana <taki.tachibana@example.org>",
                "From: Mitsuha Miyamizu <mitsuha.miyamizu@example.com>",
            ]
        );
        assert!(tolerant.is_clean());
        assert!(tolerant.residual.is_empty());
    }

    #[test]
    fn test_scan_stops_after_blank_line() {
        let mut r = BufReader::new(WELL_FORMED.as_bytes());
        read_header(&mut r, ParseMode::Strict).unwrap();
        let mut rest = String::new();
        r.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "Hello\r\n");
    }

    #[test]
    fn test_lf_only_line_endings() {
        let input = "From: contact@example.org\nTo: contact@example.org\n\
            Subject: A little message, just for you\nContent-Type: text/plain\n\nbody";
        for mode in [ParseMode::Strict, ParseMode::Tolerant] {
            let scanned = scan(input, mode).unwrap();
            assert_eq!(scanned.header.len(), 4);
            assert_eq!(scanned.header.get("content-type"), Some("text/plain"));
        }
    }

    #[test]
    fn test_header_without_body() {
        let scanned = scan("Subject: Only a header\r\n", ParseMode::Strict).unwrap();
        assert_eq!(scanned.header.get("Subject"), Some("Only a header"));
    }

    #[test]
    fn test_folding_keeps_existing_whitespace_only() {
        let input = "Subject: first part\r\n  more text\r\nTo: a@b.c\r\n\r\n";
        let scanned = scan(input, ParseMode::Strict).unwrap();
        assert_eq!(scanned.header.get("Subject"), Some("first part  more text"));
        assert_eq!(scanned.header.get("To"), Some("a@b.c"));
    }

    #[test]
    fn test_raw_round_trip() {
        let input = "Subject: folded\r\n\tvalue\r\nX-Dup: 1\r\nx-dup: 2\r\n\r\n";
        let first = scan(input, ParseMode::Strict).unwrap();
        let bytes = first.header.to_bytes();
        assert_eq!(bytes, input.as_bytes());
        let again = read_header(&mut BufReader::new(&bytes[..]), ParseMode::Strict).unwrap();
        assert_eq!(pairs(&first.header), pairs(&again.header));
    }

    #[test]
    fn test_mid_non_fold_recovers_interior() {
        let scanned = scan(MID_NON_FOLD, ParseMode::Tolerant).unwrap();
        assert_eq!(
            pairs(&scanned.header),
            vec![
                "Content-Disposition: inline; filename=\"6D19D_xxxxx_7D4049.zip\"",
                "Content-Type: application/zip; x-unix-mode=0600;name=\"6D19D_xxxxx_7D4049.zip\"",
                "Content-Transfer-Encoding: base64",
            ]
        );
        assert!(scanned.residual.is_empty());
        assert_eq!(scanned.recoveries.len(), 1);
        assert_eq!(scanned.recoveries[0].action, RecoveryAction::JoinedInterior);
        assert_eq!(
            scanned.recoveries[0].error().kind(),
            ErrorKind::MalformedHeaderLine
        );
    }

    #[test]
    fn test_short_interior_recovery_case() {
        let input = "Content-Type: application/zip; x-unix-mode=0600;\r\n\
            name=\"f.zip\"\r\n\
            Content-Transfer-Encoding: base64\r\n\r\n";
        let scanned = scan(input, ParseMode::Tolerant).unwrap();
        assert_eq!(
            pairs(&scanned.header),
            vec![
                "Content-Type: application/zip; x-unix-mode=0600;name=\"f.zip\"",
                "Content-Transfer-Encoding: base64",
            ]
        );
        assert!(scanned.residual.is_empty());
    }

    #[test]
    fn test_last_non_fold_recovers_at_body_boundary() {
        let mut r = BufReader::new(LAST_NON_FOLD.as_bytes());
        let scanned = read_header(&mut r, ParseMode::Tolerant).unwrap();
        assert_eq!(
            scanned.header.get("Content-Type"),
            Some("application/zip; x-unix-mode=0600;name=\"6D19D_xxxxx_7D4049.zip\"")
        );
        assert_eq!(scanned.header.len(), 3);
        assert!(scanned.residual.is_empty());
        assert_eq!(
            scanned.recoveries[0].action,
            RecoveryAction::JoinedAtBodyBoundary
        );
        let mut body = String::new();
        r.read_to_string(&mut body).unwrap();
        assert!(body.starts_with("UEsDBBQ"));
    }

    #[test]
    fn test_no_separator_hands_back_residual() {
        let input = format!(
            "Content-Transfer-Encoding: 8bit\r\nContent-Type: text/html; charset=\"utf-8\"\r\n{NO_SEP_BODY}"
        );
        let scanned = scan(&input, ParseMode::Tolerant).unwrap();
        assert_eq!(
            pairs(&scanned.header),
            vec![
                "Content-Transfer-Encoding: 8bit",
                "Content-Type: text/html; charset=\"utf-8\"",
            ]
        );
        assert_eq!(scanned.residual, NO_SEP_BODY.as_bytes());
        assert_eq!(scanned.recoveries[0].action, RecoveryAction::BodyStartedEarly);
    }

    #[test]
    fn test_missing_separator_is_fatal_in_strict_mode() {
        let err = scan(MID_NON_FOLD, ParseMode::Strict).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeaderLine);
    }

    #[test]
    fn test_continuation_first_line_fails_in_both_modes() {
        let input = " Subject: leading space\r\n\r\n";
        for mode in [ParseMode::Strict, ParseMode::Tolerant] {
            let err = scan(input, mode).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedInitialLine);
        }
    }

    #[test]
    fn test_bad_key_fails_in_both_modes() {
        let input = "Subject: ok\r\nBad\x01Key: value\r\n\r\n";
        for mode in [ParseMode::Strict, ParseMode::Tolerant] {
            let err = scan(input, mode).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedHeaderKey);
        }
    }

    #[test]
    fn test_lookahead_with_bad_key_is_still_fatal() {
        let input = "Subject: ok\r\nbroken line\r\nnot a key: value\r\n\r\n";
        let err = scan(input, ParseMode::Tolerant).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeaderKey);
    }

    #[test]
    fn test_empty_key_is_skipped() {
        let scanned = scan(": nothing\r\nSubject: kept\r\n\r\n", ParseMode::Strict).unwrap();
        assert_eq!(pairs(&scanned.header), vec!["Subject: kept"]);
    }

    #[test]
    fn test_trailing_space_before_colon() {
        let scanned = scan("Subject : spaced\r\n\r\n", ParseMode::Strict).unwrap();
        assert_eq!(scanned.header.get("Subject"), Some("spaced"));
    }

    #[test]
    fn test_keyless_line_without_previous_field_fails() {
        let err = scan("garbage\r\nSubject: x\r\n\r\n", ParseMode::Tolerant).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeaderLine);
    }

    #[test]
    fn test_headerless_body_becomes_residual() {
        let scanned = scan("hello\r\nworld\r\nmore\r\n", ParseMode::Tolerant).unwrap();
        assert!(scanned.header.is_empty());
        assert_eq!(scanned.residual, b"hello\r\nworld\r\n");
    }

    #[test]
    fn test_keyless_line_at_eof_fails() {
        let err = scan("Subject: x\r\ndangling", ParseMode::Tolerant).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeaderLine);
    }

    #[test]
    fn test_latin1_value_falls_back() {
        let mut r = BufReader::new(&b"Subject: caf\xe9\r\n\r\n"[..]);
        let scanned = read_header(&mut r, ParseMode::Strict).unwrap();
        assert_eq!(scanned.header.get("Subject"), Some("café"));
    }

    #[test]
    fn test_bom_is_skipped() {
        let mut r = BufReader::new(&b"\xEF\xBB\xBFSubject: bom\r\n\r\n"[..]);
        let scanned = read_header(&mut r, ParseMode::Strict).unwrap();
        assert_eq!(scanned.header.get("Subject"), Some("bom"));
    }
}
