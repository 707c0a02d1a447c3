//! Centralized error types for mimeshell.

use thiserror::Error;

/// All errors produced by the mimeshell library.
#[derive(Error, Debug)]
pub enum MimeError {
    /// The header block starts with a continuation (whitespace-prefixed) line.
    #[error("malformed MIME header initial line: {0}")]
    MalformedInitialLine(String),

    /// A header line has no `:` separator and could not be recovered.
    #[error("malformed MIME header line: {0}")]
    MalformedHeaderLine(String),

    /// A header key contains characters outside the token set.
    #[error("malformed MIME header key: {0}")]
    MalformedHeaderKey(String),

    /// The header block exceeded the configured byte ceiling.
    #[error("header exceeds the {limit} byte limit")]
    HeaderTooLarge { limit: u64 },

    /// The `Content-Transfer-Encoding` is not one we can decode.
    #[error("unknown transfer encoding: {0}")]
    UnknownTransferEncoding(String),

    /// The `charset` parameter names an encoding we do not know.
    #[error("unknown charset: {0}")]
    UnknownCharset(String),

    /// End of stream was reached before the closing `--boundary--` line.
    #[error("multipart body ended before closing boundary \"{boundary}\"")]
    TruncatedMultipart { boundary: String },

    /// Multipart nesting exceeded the configured maximum depth.
    #[error("multipart nesting deeper than {max_depth} levels")]
    TooDeep { max_depth: usize },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

/// Discriminable error kinds, independent of the payload carried by [`MimeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    MalformedInitialLine,
    MalformedHeaderLine,
    MalformedHeaderKey,
    HeaderTooLarge,
    UnknownTransferEncoding,
    UnknownCharset,
    TruncatedMultipart,
    TooDeep,
    Io,
}

/// Convenience alias for `Result<T, MimeError>`.
pub type Result<T> = std::result::Result<T, MimeError>;

impl MimeError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedInitialLine(_) => ErrorKind::MalformedInitialLine,
            Self::MalformedHeaderLine(_) => ErrorKind::MalformedHeaderLine,
            Self::MalformedHeaderKey(_) => ErrorKind::MalformedHeaderKey,
            Self::HeaderTooLarge { .. } => ErrorKind::HeaderTooLarge,
            Self::UnknownTransferEncoding(_) => ErrorKind::UnknownTransferEncoding,
            Self::UnknownCharset(_) => ErrorKind::UnknownCharset,
            Self::TruncatedMultipart { .. } => ErrorKind::TruncatedMultipart,
            Self::TooDeep { .. } => ErrorKind::TooDeep,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether a tolerant parse can carry on after this error.
    ///
    /// Unknown encodings and charsets still yield a readable (undecoded) body,
    /// and a truncated multipart still yields every part found.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UnknownTransferEncoding
                | ErrorKind::UnknownCharset
                | ErrorKind::TruncatedMultipart
        )
    }

    /// Wrap this error so it can travel through `std::io::Read`.
    pub fn into_io(self) -> std::io::Error {
        match self {
            Self::Io(e) => e,
            other => std::io::Error::other(other),
        }
    }

    /// Recover a `MimeError` previously wrapped with [`MimeError::into_io`].
    pub fn from_io(err: std::io::Error) -> Self {
        if let Some(limit) = crate::parser::limit::limit_of(&err) {
            return Self::HeaderTooLarge { limit };
        }
        match err.downcast::<MimeError>() {
            Ok(mime) => mime,
            Err(err) => Self::Io(err),
        }
    }
}

/// Allow `?` on `std::io::Error`; wrapped `MimeError`s and limiter overflows
/// are unpacked back into their own variants.
impl From<std::io::Error> for MimeError {
    fn from(source: std::io::Error) -> Self {
        Self::from_io(source)
    }
}
