//! Composed reader that replays bytes already pulled off a stream.
//!
//! When the header scanner reads ahead into what turns out to be body, those
//! bytes are handed back here and served before the live stream resumes.

use std::io::{self, BufRead, Read};

/// A `BufRead` that drains a pending buffer before reading from `inner`.
pub struct ReplayReader<R> {
    pending: Vec<u8>,
    pos: usize,
    inner: R,
}

impl<R: BufRead> ReplayReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            pending: Vec::new(),
            pos: 0,
            inner,
        }
    }

    /// Queue `bytes` to be read before anything still pending or live.
    pub fn replay(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        if self.pos >= self.pending.len() {
            self.pending = bytes;
        } else {
            let mut joined = bytes;
            joined.extend_from_slice(&self.pending[self.pos..]);
            self.pending = joined;
        }
        self.pos = 0;
    }

    /// Number of replayed bytes not yet consumed.
    pub fn pending_len(&self) -> usize {
        self.pending.len() - self.pos
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: BufRead> Read for ReplayReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for ReplayReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos < self.pending.len() {
            return Ok(&self.pending[self.pos..]);
        }
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        let buffered = self.pending.len() - self.pos;
        if buffered == 0 {
            self.inner.consume(amt);
            return;
        }
        self.pos += amt.min(buffered);
        if self.pos == self.pending.len() {
            self.pending.clear();
            self.pos = 0;
        }
    }
}
