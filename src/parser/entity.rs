//! Entities: a header paired with a lazily decoded body.

use std::io::{self, BufRead, BufReader, Read};

use encoding_rs::Encoding;
use tracing::{debug, warn};

use crate::error::{MimeError, Result};
use crate::model::header::Header;

use super::decode::{lookup_charset, CharsetReader, TransferEncoding};
use super::header::{read_header, Recovery};
use super::limit::LimitedReader;
use super::media_type::{parse_content_type, MediaType};
use super::multipart::MultipartReader;
use super::replay::ReplayReader;
use super::{ParseMode, ParseOptions};

/// Boxed body stream shared by entities, parts and nested splitters.
pub type BodyReader<'a> = Box<dyn BufRead + 'a>;

enum Body<'a> {
    /// Not read yet; decoding has not been set up.
    Raw(BodyReader<'a>),
    Decoded(BodyReader<'a>),
}

/// A header plus a body that decodes transparently on read.
///
/// Reads yield `charset_decode(transfer_decode(raw))`; the charset stage only
/// applies to `text/*` media types.
pub struct Entity<'a> {
    pub header: Header,
    media_type: MediaType,
    transfer: TransferEncoding,
    charset: Option<&'static Encoding>,
    issues: Vec<MimeError>,
    recoveries: Vec<Recovery>,
    mode: ParseMode,
    body: Option<Body<'a>>,
}

impl<'a> Entity<'a> {
    /// Pair `header` with `body`, choosing the decoders from the header.
    ///
    /// In strict mode an unknown transfer encoding or charset is an error.
    /// In tolerant mode the entity is still built, with a pass-through stage
    /// in place of the unknown decoder, and the problem is reported by
    /// [`Entity::decode_issues`].
    pub fn new(header: Header, body: impl BufRead + 'a, mode: ParseMode) -> Result<Self> {
        let media_type = header
            .get("Content-Type")
            .and_then(parse_content_type)
            .unwrap_or_else(default_media_type);

        let mut issues = Vec::new();
        let mut tolerate = |err: MimeError| -> Result<()> {
            if !mode.is_tolerant() {
                return Err(err);
            }
            warn!(error = %err, "Falling back to undecoded body");
            issues.push(err);
            Ok(())
        };

        let transfer = match TransferEncoding::from_header(header.get("Content-Transfer-Encoding")) {
            Ok(enc) => enc,
            Err(err) => {
                tolerate(err)?;
                TransferEncoding::Identity
            }
        };

        let charset = match media_type.charset.as_deref() {
            Some(label) if media_type.is_text() => match lookup_charset(label) {
                Ok(enc) => enc,
                Err(err) => {
                    tolerate(err)?;
                    None
                }
            },
            _ => None,
        };

        Ok(Self {
            header,
            media_type,
            transfer,
            charset,
            issues,
            recoveries: Vec::new(),
            mode,
            body: Some(Body::Raw(Box::new(body))),
        })
    }

    /// Read a complete entity (header and body) from a raw stream.
    ///
    /// The header is scanned through a byte limiter of
    /// `options.max_header_bytes`; once it is read the limit is lifted and any
    /// bytes the scanner read ahead are replayed in front of the body.
    pub fn read(r: impl Read + 'a, options: ParseOptions) -> Result<Self> {
        let mut br = BufReader::new(LimitedReader::new(r, options.max_header_bytes));
        let scanned = read_header(&mut br, options.mode)?;
        br.get_mut().set_limit(u64::MAX);

        let mut body = ReplayReader::new(br);
        if !scanned.residual.is_empty() {
            debug!(bytes = scanned.residual.len(), "Replaying header lookahead as body");
            body.replay(scanned.residual);
        }

        let mut entity = Self::new(scanned.header, body, options.mode)?;
        entity.recoveries = scanned.recoveries;
        Ok(entity)
    }

    pub(crate) fn with_recoveries(mut self, recoveries: Vec<Recovery>) -> Self {
        self.recoveries = recoveries;
        self
    }

    /// Parsed Content-Type (`text/plain` when absent or unparseable).
    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    /// The mode this entity was built with.
    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    /// True for `multipart/*` with a usable boundary.
    pub fn is_multipart(&self) -> bool {
        self.media_type.is_multipart() && self.boundary().is_some()
    }

    fn boundary(&self) -> Option<&str> {
        self.media_type.boundary.as_deref().filter(|b| !b.is_empty())
    }

    /// Decoding problems tolerated while building the entity.
    pub fn decode_issues(&self) -> &[MimeError] {
        &self.issues
    }

    /// The first decoding problem, if any.
    pub fn decode_issue(&self) -> Option<&MimeError> {
        self.issues.first()
    }

    /// Header lines the tolerant scanner had to repair.
    pub fn recoveries(&self) -> &[Recovery] {
        &self.recoveries
    }

    /// The undecoded body, if reading has not started yet.
    pub fn into_raw_body(self) -> Option<BodyReader<'a>> {
        match self.body {
            Some(Body::Raw(raw)) => Some(raw),
            _ => None,
        }
    }

    /// The decoded body stream.
    pub fn into_body(mut self) -> BodyReader<'a> {
        self.decoded();
        match self.body.take() {
            Some(Body::Decoded(body)) | Some(Body::Raw(body)) => body,
            None => Box::new(io::empty()),
        }
    }

    /// A splitter over this entity's body, or the entity back if it is not
    /// multipart.
    pub fn into_multipart(self) -> std::result::Result<MultipartReader<BodyReader<'a>>, Self> {
        if !self.is_multipart() {
            return Err(self);
        }
        let boundary = self.boundary().unwrap_or_default().to_string();
        let mode = self.mode;
        Ok(MultipartReader::new(self.into_body(), &boundary, mode))
    }

    /// Swap the raw body for the decoding pipeline on first use.
    fn decoded(&mut self) -> &mut BodyReader<'a> {
        if let Some(Body::Raw(_)) = self.body {
            if let Some(Body::Raw(raw)) = self.body.take() {
                self.body = Some(Body::Decoded(self.pipeline(raw)));
            }
        }
        match self.body.get_or_insert_with(|| Body::Decoded(Box::new(io::empty()))) {
            Body::Decoded(body) | Body::Raw(body) => body,
        }
    }

    fn pipeline(&self, raw: BodyReader<'a>) -> BodyReader<'a> {
        match (self.transfer, self.charset) {
            (TransferEncoding::Identity, None) => raw,
            (transfer, None) => Box::new(BufReader::new(transfer.wrap(raw))),
            (transfer, Some(enc)) => Box::new(BufReader::new(CharsetReader::new(
                transfer.wrap(raw),
                enc,
            ))),
        }
    }
}

impl Read for Entity<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoded().read(buf)
    }
}

impl BufRead for Entity<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.decoded().fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.decoded().consume(amt)
    }
}

impl std::fmt::Debug for Entity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("header", &self.header)
            .field("media_type", &self.media_type)
            .field("transfer", &self.transfer)
            .field("charset", &self.charset.map(Encoding::name))
            .field("issues", &self.issues)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// RFC 2045 §5.2 default.
fn default_media_type() -> MediaType {
    MediaType {
        essence: "text/plain".to_string(),
        charset: Some("us-ascii".to_string()),
        ..MediaType::default()
    }
}
