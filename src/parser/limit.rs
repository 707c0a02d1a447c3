//! Byte-count limiter guarding header scans against unbounded input.

use std::fmt;
use std::io::{self, BufRead, Read};

/// Default ceiling for a top-level header block (1 MiB).
pub const MAX_HEADER_BYTES: u64 = 1 << 20;

/// Marker carried inside the `io::Error` returned once the limit is hit.
#[derive(Debug)]
struct LimitExceeded {
    limit: u64,
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read limit of {} bytes exceeded", self.limit)
    }
}

impl std::error::Error for LimitExceeded {}

/// If `err` was produced by a [`LimitedReader`], the limit that was exceeded.
pub fn limit_of(err: &io::Error) -> Option<u64> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<LimitExceeded>())
        .map(|marker| marker.limit)
}

/// Reader that fails hard (instead of reporting EOF) after `limit` bytes.
///
/// Unlike [`std::io::Take`], exhausting the budget is an error, not EOF.
pub struct LimitedReader<R> {
    inner: R,
    limit: u64,
    remaining: u64,
}

impl<R: Read> LimitedReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            remaining: limit,
        }
    }

    /// Reset the budget, e.g. to lift it once the header has been read.
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
        self.remaining = limit;
    }

    /// Bytes still readable before the limit trips.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            return Err(io::Error::other(LimitExceeded { limit: self.limit }));
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for LimitedReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.remaining == 0 {
            return Err(io::Error::other(LimitExceeded { limit: self.limit }));
        }
        let max = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        let buf = self.inner.fill_buf()?;
        Ok(&buf[..buf.len().min(max)])
    }

    fn consume(&mut self, amt: usize) {
        let amt = amt.min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        self.remaining -= amt as u64;
        self.inner.consume(amt);
    }
}
