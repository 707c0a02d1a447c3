//! Body decoding stages: Content-Transfer-Encoding and charset conversion.
//!
//! Every stage is a streaming `Read` adapter so bodies never need to be held
//! in memory as a whole.

use std::io::{self, BufRead, Read};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use encoding_rs::{CoderResult, Decoder, Encoding};

use crate::error::{MimeError, Result};

/// Standard alphabet, padding optional: real mail often drops or mangles it.
pub(crate) static MIME_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const CHUNK_SIZE: usize = 8 * 1024;

/// Supported `Content-Transfer-Encoding` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// `7bit`, `8bit`, `binary` or absent.
    Identity,
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Map a header value (case-insensitive, surrounding whitespace ignored).
    pub fn from_header(value: Option<&str>) -> Result<Self> {
        let value = value.map(str::trim).unwrap_or("");
        match value.to_ascii_lowercase().as_str() {
            "" | "7bit" | "8bit" | "binary" => Ok(Self::Identity),
            "base64" => Ok(Self::Base64),
            "quoted-printable" => Ok(Self::QuotedPrintable),
            _ => Err(MimeError::UnknownTransferEncoding(value.to_string())),
        }
    }

    /// Wrap `body` in the matching decoder.
    pub fn wrap<'a, R: BufRead + 'a>(self, body: R) -> Box<dyn Read + 'a> {
        match self {
            Self::Identity => Box::new(body),
            Self::Base64 => Box::new(base64::read::DecoderReader::new(
                StripWhitespace::new(body),
                &MIME_BASE64,
            )),
            Self::QuotedPrintable => Box::new(QuotedPrintableReader::new(body)),
        }
    }
}

/// Resolve a `charset` parameter to an encoding.
///
/// `Ok(None)` means no conversion is needed (UTF-8 or US-ASCII).
pub fn lookup_charset(label: &str) -> Result<Option<&'static Encoding>> {
    let label = label.trim().trim_matches('"');
    if label.eq_ignore_ascii_case("us-ascii") || label.eq_ignore_ascii_case("ascii") {
        return Ok(None);
    }
    match Encoding::for_label(label.as_bytes()) {
        Some(enc) if enc == encoding_rs::UTF_8 => Ok(None),
        Some(enc) => Ok(Some(enc)),
        None => Err(MimeError::UnknownCharset(label.to_string())),
    }
}

/// Drops ASCII whitespace so line-wrapped base64 can feed a strict decoder.
pub struct StripWhitespace<R> {
    inner: R,
}

impl<R: Read> StripWhitespace<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for StripWhitespace<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for i in 0..n {
                let b = buf[i];
                if !b.is_ascii_whitespace() {
                    buf[kept] = b;
                    kept += 1;
                }
            }
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

/// Line-oriented quoted-printable decoder (RFC 2045 §6.7).
///
/// Each line is decoded with `quoted_printable` in robust mode, so malformed
/// escapes pass through literally. Trailing whitespace is dropped and a
/// trailing `=` joins the line with the next one.
pub struct QuotedPrintableReader<R> {
    inner: R,
    line: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
}

impl<R: BufRead> QuotedPrintableReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: Vec::new(),
            out: Vec::new(),
            pos: 0,
        }
    }
}

impl<R: BufRead> Read for QuotedPrintableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.out.len() {
            self.line.clear();
            if self.inner.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(0);
            }
            self.out.clear();
            self.pos = 0;
            decode_qp_line(&self.line, &mut self.out)?;
        }
        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn decode_qp_line(line: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
    let content_len = line
        .iter()
        .rposition(|&b| b != b'\n' && b != b'\r')
        .map_or(0, |i| i + 1);
    let (content, ending) = line.split_at(content_len);
    let text_len = content
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |i| i + 1);
    let text = &content[..text_len];

    // The decoder drops raw 8-bit and control bytes, so escape them first.
    let mut escaped = Vec::with_capacity(text.len());
    for &b in text {
        if is_qp_text(b) {
            escaped.push(b);
        } else {
            escaped.extend_from_slice(&[b'=', HEX[usize::from(b >> 4)], HEX[usize::from(b & 0x0f)]]);
        }
    }
    let decoded = quoted_printable::decode(&escaped, quoted_printable::ParseMode::Robust)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.extend_from_slice(&decoded);

    if text.last() != Some(&b'=') {
        out.extend_from_slice(ending);
    }
    Ok(())
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn is_qp_text(b: u8) -> bool {
    b == b'\t' || (b' '..=b'~').contains(&b)
}

/// Streaming conversion from a legacy charset to UTF-8.
pub struct CharsetReader<R> {
    inner: R,
    decoder: Decoder,
    input: Vec<u8>,
    start: usize,
    end: usize,
    eof: bool,
    finished: bool,
    out: Vec<u8>,
    pos: usize,
}

impl<R: Read> CharsetReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            decoder: encoding.new_decoder(),
            input: vec![0; CHUNK_SIZE],
            start: 0,
            end: 0,
            eof: false,
            finished: false,
            out: Vec::new(),
            pos: 0,
        }
    }
}

impl<R: Read> Read for CharsetReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.out.len() {
                let n = buf.len().min(self.out.len() - self.pos);
                buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            if self.start == self.end && !self.eof {
                let n = self.inner.read(&mut self.input)?;
                self.start = 0;
                self.end = n;
                self.eof = n == 0;
            }

            let src = &self.input[self.start..self.end];
            let capacity = self
                .decoder
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len() * 3 + 16);
            self.out.clear();
            self.out.resize(capacity, 0);
            self.pos = 0;
            let (result, read, written, _) =
                self.decoder.decode_to_utf8(src, &mut self.out, self.eof);
            self.start += read;
            self.out.truncate(written);
            if self.eof && result == CoderResult::InputEmpty {
                self.finished = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(mut r: impl Read) -> Vec<u8> {
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_transfer_encoding_lookup() {
        assert_eq!(
            TransferEncoding::from_header(Some(" Base64 ")).unwrap(),
            TransferEncoding::Base64
        );
        assert_eq!(
            TransferEncoding::from_header(None).unwrap(),
            TransferEncoding::Identity
        );
        let err = TransferEncoding::from_header(Some("x-uuencode")).unwrap_err();
        assert!(matches!(err, MimeError::UnknownTransferEncoding(ref e) if e == "x-uuencode"));
    }

    #[test]
    fn test_base64_with_line_breaks() {
        let body = &b"SG9sYSBt\r\ndW5kbw==\r\n"[..];
        let decoded = read_all(TransferEncoding::Base64.wrap(body));
        assert_eq!(decoded, b"Hola mundo");
    }

    #[test]
    fn test_base64_missing_padding() {
        let decoded = read_all(TransferEncoding::Base64.wrap(&b"SG9sYQ"[..]));
        assert_eq!(decoded, b"Hola");
    }

    #[test]
    fn test_quoted_printable() {
        let body = &b"caf=E9 con le=\r\nche   \r\nline two=3D2\r\n"[..];
        let decoded = read_all(TransferEncoding::QuotedPrintable.wrap(body));
        assert_eq!(decoded, b"caf\xe9 con leche\r\nline two=2\r\n");
    }

    #[test]
    fn test_quoted_printable_bad_escape_passes_through() {
        let decoded = read_all(TransferEncoding::QuotedPrintable.wrap(&b"100=ZZ =4"[..]));
        assert_eq!(decoded, b"100=ZZ =4");
    }

    #[test]
    fn test_quoted_printable_keeps_raw_8bit_bytes() {
        let body = &b"caf\xc3\xa9 =3D ok \xe9\r\n"[..];
        let decoded = read_all(TransferEncoding::QuotedPrintable.wrap(body));
        assert_eq!(decoded, b"caf\xc3\xa9 = ok \xe9\r\n");
    }

    #[test]
    fn test_quoted_printable_soft_break_at_end() {
        let decoded = read_all(TransferEncoding::QuotedPrintable.wrap(&b"no newline=\r\n"[..]));
        assert_eq!(decoded, b"no newline");
    }

    #[test]
    fn test_charset_lookup() {
        assert!(lookup_charset("utf-8").unwrap().is_none());
        assert!(lookup_charset("US-ASCII").unwrap().is_none());
        assert_eq!(
            lookup_charset("\"iso-8859-1\"").unwrap(),
            Some(encoding_rs::WINDOWS_1252)
        );
        assert!(matches!(
            lookup_charset("x-klingon"),
            Err(MimeError::UnknownCharset(_))
        ));
    }

    #[test]
    fn test_charset_reader_latin1() {
        let r = CharsetReader::new(&b"R\xe9sum\xe9 du projet"[..], encoding_rs::WINDOWS_1252);
        assert_eq!(String::from_utf8(read_all(r)).unwrap(), "Résumé du projet");
    }

    #[test]
    fn test_charset_reader_split_multibyte() {
        // Shift_JIS for 山田, fed one byte at a time.
        struct OneByte<'a>(&'a [u8]);
        impl Read for OneByte<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.0.split_first() {
                    Some((&b, rest)) if !buf.is_empty() => {
                        buf[0] = b;
                        self.0 = rest;
                        Ok(1)
                    }
                    _ => Ok(0),
                }
            }
        }
        let r = CharsetReader::new(OneByte(b"\x8eR\x93c"), encoding_rs::SHIFT_JIS);
        assert_eq!(String::from_utf8(read_all(r)).unwrap(), "山田");
    }
}
