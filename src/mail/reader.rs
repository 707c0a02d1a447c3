//! Uniform part iteration over a message, multipart or not.

use std::io::{self, Cursor, Read};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::error::{MimeError, Result};
use crate::model::header::Header;
use crate::parser::entity::Entity;
use crate::parser::media_type::MediaType;
use crate::parser::walk::{PartPath, WalkNode, Walker};
use crate::parser::ParseOptions;

use super::header::MailHeader;

const BOUNDARY_LEN: usize = 30;

/// How a leaf part is meant to be presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PartKind {
    /// Shown as part of the message text.
    Inline,
    Attachment { filename: Option<String> },
}

/// A leaf part of a message.
pub struct MailPart<'a> {
    path: PartPath,
    kind: PartKind,
    entity: Entity<'a>,
}

impl<'a> MailPart<'a> {
    /// Child indices from the message root. Empty for a single-part message.
    pub fn path(&self) -> &[usize] {
        &self.path
    }

    pub fn kind(&self) -> &PartKind {
        &self.kind
    }

    pub fn is_attachment(&self) -> bool {
        matches!(self.kind, PartKind::Attachment { .. })
    }

    pub fn header(&self) -> MailHeader<'_> {
        MailHeader::new(&self.entity.header)
    }

    pub fn media_type(&self) -> &MediaType {
        self.entity.media_type()
    }

    /// Decoding problems tolerated for this part.
    pub fn decode_issue(&self) -> Option<&MimeError> {
        self.entity.decode_issue()
    }

    pub fn into_entity(self) -> Entity<'a> {
        self.entity
    }
}

impl Read for MailPart<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.entity.read(buf)
    }
}

impl std::fmt::Debug for MailPart<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailPart")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("media_type", self.media_type())
            .finish_non_exhaustive()
    }
}

/// Iterates the leaf parts of a message.
///
/// A message that is not multipart is presented as a `multipart/mixed`
/// with that message as its only part.
pub struct MailReader<'a> {
    header: Header,
    walker: Walker<'a>,
    synthesized: bool,
}

impl<'a> MailReader<'a> {
    /// Parse a message from a raw stream.
    pub fn create(r: impl Read + 'a, options: ParseOptions) -> Result<Self> {
        Self::new(Entity::read(r, options)?, options)
    }

    /// Wrap an entity whose body has not been read yet.
    pub fn new(entity: Entity<'a>, options: ParseOptions) -> Result<Self> {
        let header = entity.header.clone();
        if entity.is_multipart() {
            return Ok(Self {
                header,
                walker: Walker::new(entity, options),
                synthesized: false,
            });
        }

        let Some(raw) = entity.into_raw_body() else {
            return Err(MimeError::Io(io::Error::other(
                "message body was read before wrapping",
            )));
        };

        let header_bytes = header.to_bytes();
        let boundary = boundary_avoiding(&header_bytes, random_boundary);
        debug!(%boundary, "Wrapping single-part message");
        let mut opening = format!("--{boundary}\r\n").into_bytes();
        opening.extend_from_slice(&header_bytes);
        let closing = format!("\r\n--{boundary}--\r\n").into_bytes();
        let stream = Cursor::new(opening).chain(raw).chain(Cursor::new(closing));

        let mut wrapper = Header::new();
        wrapper.add("Mime-Version", "1.0");
        wrapper.add("Content-Type", format!("multipart/mixed; boundary=\"{boundary}\""));
        let root = Entity::new(wrapper, stream, options.mode)?;

        Ok(Self {
            header,
            walker: Walker::new(root, options),
            synthesized: true,
        })
    }

    /// Header of the message itself (never the synthesized wrapper).
    pub fn header(&self) -> MailHeader<'_> {
        MailHeader::new(&self.header)
    }

    /// The next leaf part, or `Ok(None)` after the last one.
    ///
    /// Fetching a part makes the previous one unreadable.
    pub fn next_part(&mut self) -> Result<Option<MailPart<'a>>> {
        while let Some(node) = self.walker.next()? {
            let WalkNode::Leaf { mut path, entity } = node else {
                continue;
            };
            if self.synthesized && !path.is_empty() {
                path.remove(0);
            }
            let kind = classify(MailHeader::new(&entity.header), entity.media_type());
            return Ok(Some(MailPart { path, kind, entity }));
        }
        Ok(None)
    }
}

/// Inline when the disposition says so, or when it does not say
/// `attachment` and the part is text.
fn classify(header: MailHeader<'_>, media_type: &MediaType) -> PartKind {
    let disposition = header.content_disposition();
    let disposition = disposition.as_ref().map(|d| d.essence.as_str());
    let inline = disposition == Some("inline")
        || (disposition != Some("attachment") && media_type.is_text());
    if inline {
        PartKind::Inline
    } else {
        PartKind::Attachment {
            filename: header.filename(),
        }
    }
}

/// A boundary that does not occur in `known`.
///
/// The body has not been read yet, so a clash with body text is not checked;
/// with 30 random alphanumerics it is only ruled out by the odds.
fn boundary_avoiding(known: &[u8], mut generate: impl FnMut() -> String) -> String {
    loop {
        let candidate = generate();
        let clashes = !candidate.is_empty()
            && known
                .windows(candidate.len())
                .any(|w| w == candidate.as_bytes());
        if !clashes {
            return candidate;
        }
        debug!(boundary = %candidate, "Synthesized boundary found in header, retrying");
    }
}

fn random_boundary() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect()
}
