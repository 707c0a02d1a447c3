//! Streaming multipart splitter (RFC 2046 §5.1).
//!
//! Parts are produced one at a time. The body of the current part is read
//! straight off the underlying stream; asking for the next part first drains
//! whatever is left of the current one.

use std::io::{self, BufRead, Read};
use std::mem;

use tracing::{debug, warn};

use crate::error::{MimeError, Result};
use crate::model::header::Header;

use super::entity::Entity;
use super::header::{line_content, read_header, Recovery, ScannedHeader};
use super::limit::{LimitedReader, MAX_HEADER_BYTES};
use super::replay::ReplayReader;
use super::ParseMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Skipping the preamble until the first delimiter.
    SeekingStart,
    /// Just past a delimiter; a part header comes next.
    InHeader,
    /// Inside a part body.
    InBody,
    /// Past the closing delimiter, or the stream ended.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    Next,
    Last,
}

/// Body bytes decoded from the current line, plus the line ending held back
/// until we know the next line is not a delimiter.
#[derive(Debug, Default)]
struct BodyBuffer {
    held: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
}

impl BodyBuffer {
    fn reset(&mut self) {
        self.held.clear();
        self.out.clear();
        self.pos = 0;
    }
}

/// Splits a multipart body into parts.
pub struct MultipartReader<R> {
    stream: ReplayReader<R>,
    boundary: String,
    delimiter: Vec<u8>,
    mode: ParseMode,
    header_limit: u64,
    stage: Stage,
    body: BodyBuffer,
    line: Vec<u8>,
    parts_seen: usize,
    truncated: bool,
}

impl<R: BufRead> MultipartReader<R> {
    /// Split `body` on `boundary` (the bare parameter value, without `--`).
    pub fn new(body: R, boundary: &str, mode: ParseMode) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            stream: ReplayReader::new(body),
            boundary: boundary.to_string(),
            delimiter,
            mode,
            header_limit: MAX_HEADER_BYTES,
            stage: Stage::SeekingStart,
            body: BodyBuffer::default(),
            line: Vec::new(),
            parts_seen: 0,
            truncated: false,
        }
    }

    /// Cap each part header at `limit` bytes (default [`MAX_HEADER_BYTES`]).
    pub fn with_header_limit(mut self, limit: u64) -> Self {
        self.header_limit = limit;
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    /// True once a tolerant split hit end of stream without `--boundary--`.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Zero-based index of the part whose body is currently readable.
    pub fn current_part(&self) -> Option<usize> {
        self.parts_seen.checked_sub(1)
    }

    /// Advance to the next part.
    ///
    /// `Ok(None)` is the clean end of parts. A stream that ends before the
    /// closing delimiter is an error in strict mode; in tolerant mode the end
    /// of stream acts as the closing delimiter.
    pub fn next_part(&mut self) -> Result<Option<Part<'_, R>>> {
        Ok(self.advance()?.map(|scanned| Part {
            header: scanned.header,
            recoveries: scanned.recoveries,
            body: BorrowedBody { reader: self },
        }))
    }

    /// Move past the current part and scan the next part's header.
    pub(crate) fn advance(&mut self) -> Result<Option<ScannedHeader>> {
        self.body.out.clear();
        self.body.pos = 0;
        loop {
            match self.stage {
                Stage::Terminated => {
                    if self.truncated && !self.mode.is_tolerant() {
                        return Err(self.truncation());
                    }
                    return Ok(None);
                }
                Stage::SeekingStart => self.seek_start()?,
                Stage::InBody => self.discard_body()?,
                Stage::InHeader => {
                    let mut limited = LimitedReader::new(&mut self.stream, self.header_limit);
                    let mut scanned = read_header(&mut limited, self.mode)?;
                    self.stream.replay(mem::take(&mut scanned.residual));
                    self.stage = Stage::InBody;
                    self.body.reset();
                    self.parts_seen += 1;
                    debug!(
                        boundary = %self.boundary,
                        part = self.parts_seen - 1,
                        fields = scanned.header.len(),
                        "Entered multipart part"
                    );
                    return Ok(Some(scanned));
                }
            }
        }
    }

    /// Read from the current part's body. Returns 0 at the part's end.
    pub(crate) fn read_body(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.body.pos < self.body.out.len() {
                let n = buf.len().min(self.body.out.len() - self.body.pos);
                buf[..n].copy_from_slice(&self.body.out[self.body.pos..self.body.pos + n]);
                self.body.pos += n;
                return Ok(n);
            }
            if self.stage != Stage::InBody {
                return Ok(0);
            }
            self.fill_body()?;
        }
    }

    fn seek_start(&mut self) -> Result<()> {
        let mut preamble_lines = 0usize;
        loop {
            if !self.read_line()? {
                return self.hit_eof();
            }
            match classify(&self.delimiter, &self.line) {
                Some(Delimiter::Next) => {
                    self.stage = Stage::InHeader;
                    break;
                }
                Some(Delimiter::Last) => {
                    self.stage = Stage::Terminated;
                    break;
                }
                None => preamble_lines += 1,
            }
        }
        if preamble_lines > 0 {
            debug!(boundary = %self.boundary, lines = preamble_lines, "Skipped multipart preamble");
        }
        Ok(())
    }

    /// Pull the next line of the current part into the output buffer.
    ///
    /// The line ending before a delimiter belongs to the delimiter, so each
    /// line's terminator is held back until the following line is seen.
    fn fill_body(&mut self) -> Result<()> {
        self.body.out.clear();
        self.body.pos = 0;

        if !self.read_line()? {
            // No delimiter follows: the held terminator is body content.
            let held = mem::take(&mut self.body.held);
            self.hit_eof()?;
            self.body.out = held;
            return Ok(());
        }

        match classify(&self.delimiter, &self.line) {
            Some(Delimiter::Next) => {
                self.body.held.clear();
                self.stage = Stage::InHeader;
            }
            Some(Delimiter::Last) => {
                self.body.held.clear();
                self.stage = Stage::Terminated;
                debug!(boundary = %self.boundary, parts = self.parts_seen, "Reached closing delimiter");
            }
            None => {
                let content_len = line_content(&self.line).len();
                let (content, ending) = self.line.split_at(content_len);
                self.body.out.append(&mut self.body.held);
                self.body.out.extend_from_slice(content);
                self.body.held.extend_from_slice(ending);
            }
        }
        Ok(())
    }

    fn discard_body(&mut self) -> Result<()> {
        while self.stage == Stage::InBody {
            self.fill_body()?;
        }
        self.body.reset();
        Ok(())
    }

    fn read_line(&mut self) -> Result<bool> {
        self.line.clear();
        Ok(self.stream.read_until(b'\n', &mut self.line)? > 0)
    }

    fn hit_eof(&mut self) -> Result<()> {
        self.stage = Stage::Terminated;
        self.truncated = true;
        if !self.mode.is_tolerant() {
            return Err(self.truncation());
        }
        warn!(
            boundary = %self.boundary,
            parts = self.parts_seen,
            "Multipart body ended without closing delimiter"
        );
        Ok(())
    }

    fn truncation(&self) -> MimeError {
        MimeError::TruncatedMultipart {
            boundary: self.boundary.clone(),
        }
    }
}

/// Match a line against `--boundary` / `--boundary--`, allowing trailing
/// linear whitespace (RFC 2046 transport padding).
fn classify(delimiter: &[u8], line: &[u8]) -> Option<Delimiter> {
    let rest = line_content(line).strip_prefix(delimiter)?;
    let (kind, rest) = match rest.strip_prefix(b"--") {
        Some(rest) => (Delimiter::Last, rest),
        None => (Delimiter::Next, rest),
    };
    rest.iter()
        .all(|&b| b == b' ' || b == b'\t')
        .then_some(kind)
}

/// One part of a multipart body.
///
/// Reading yields the raw (not transfer-decoded) body bytes. Use
/// [`Part::into_entity`] to get a decoding view.
pub struct Part<'r, R> {
    pub header: Header,
    pub recoveries: Vec<Recovery>,
    body: BorrowedBody<'r, R>,
}

impl<'r, R: BufRead + 'r> Part<'r, R> {
    /// Zero-based position of this part within its multipart body.
    pub fn index(&self) -> usize {
        self.body.reader.parts_seen.saturating_sub(1)
    }

    /// Wrap the part as an entity whose body decodes on read.
    pub fn into_entity(self) -> Result<Entity<'r>> {
        let mode = self.body.reader.mode;
        let entity = Entity::new(self.header, io::BufReader::new(self.body), mode)?;
        Ok(entity.with_recoveries(self.recoveries))
    }
}

impl<R: BufRead> Read for Part<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

struct BorrowedBody<'r, R> {
    reader: &'r mut MultipartReader<R>,
}

impl<R: BufRead> Read for BorrowedBody<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_body(buf).map_err(MimeError::into_io)
    }
}
