//! Marker-delimited chunking over an async byte stream.
//!
//! Commands and responses are CRLF-terminated lines, but READ/WRITE/CLAIM
//! move raw binary payloads over the same socket. [`ChunkingReader`] hands out
//! at most one marker per read, always as the trailing bytes of the chunk:
//!
//! - no marker: data only, more follows
//! - data ending exactly at a complete marker
//! - only the marker (split across refills, or preceding data already consumed)
//!
//! Bytes that partially match the marker at the end of the buffer are held
//! back until the match completes or fails, so the position of marker-ending
//! chunks never depends on how the underlying reads were sized.
//!
//! Binary payloads are read through [`ChunkingReader::disable_chunking`],
//! which returns a guard that reads exact byte counts without scanning.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const DEFAULT_CAPACITY: usize = 8 * 1024;

pub struct ChunkingReader<R> {
    inner: R,
    marker: Vec<u8>,
    // KMP failure table for `marker`
    failure: Vec<usize>,
    buf: Vec<u8>,
    // first unconsumed byte
    pos: usize,
    // end of valid data
    end: usize,
    // next byte to scan
    scan: usize,
    // marker bytes matched ending at `scan`
    matched: usize,
    // end (exclusive) of a complete marker found in the buffer
    found: Option<usize>,
    // partial line kept across cancelled `read_line` calls
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ChunkingReader<R> {
    pub fn new(inner: R, marker: &[u8]) -> io::Result<Self> {
        Self::with_capacity(inner, marker, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: R, marker: &[u8], capacity: usize) -> io::Result<Self> {
        if marker.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "chunk marker must not be empty",
            ));
        }
        let capacity = capacity.max(marker.len() * 2);
        Ok(Self {
            inner,
            failure: failure_table(marker),
            marker: marker.to_vec(),
            buf: vec![0u8; capacity],
            pos: 0,
            end: 0,
            scan: 0,
            matched: 0,
            found: None,
            line: Vec::new(),
        })
    }

    pub fn marker(&self) -> &[u8] {
        &self.marker
    }

    /// Bytes read from the underlying stream but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.end - self.pos
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Give back the underlying stream together with any buffered bytes.
    pub fn into_inner(self) -> (R, Vec<u8>) {
        let rest = self.buf[self.pos..self.end].to_vec();
        (self.inner, rest)
    }

    /// Read one chunk. Returns 0 only at end of stream.
    pub async fn read_chunk(&mut self, out: &mut [u8]) -> io::Result<usize> {
        Ok(self.next_chunk(out).await?.0)
    }

    /// Read one marker-terminated line without the marker.
    ///
    /// `Ok(None)` on a clean end of stream before any byte of a new line.
    /// Cancel safe: a partially received line is kept for the next call.
    pub async fn read_line(&mut self, max_len: usize) -> io::Result<Option<String>> {
        let mut chunk = vec![0u8; 1024.max(self.marker.len())];
        loop {
            let (n, terminated) = self.next_chunk(&mut chunk).await?;
            if n == 0 {
                if self.line.is_empty() {
                    return Ok(None);
                }
                self.line.clear();
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a line",
                ));
            }
            self.line.extend_from_slice(&chunk[..n]);
            if terminated {
                let mut line = std::mem::take(&mut self.line);
                line.truncate(line.len() - self.marker.len());
                return String::from_utf8(line)
                    .map(Some)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
            }
            if self.line.len() > max_len {
                self.line.clear();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line exceeds {} bytes", max_len),
                ));
            }
        }
    }

    /// Suspend marker scanning until the returned guard is dropped.
    pub fn disable_chunking(&mut self) -> RawReader<'_, R> {
        RawReader { framer: self }
    }

    async fn next_chunk(&mut self, out: &mut [u8]) -> io::Result<(usize, bool)> {
        if out.is_empty() {
            return Ok((0, false));
        }
        loop {
            if let Some(found_end) = self.found {
                let marker_start = found_end - self.marker.len();
                let available = found_end - self.pos;
                let take = if available <= out.len() {
                    available
                } else if marker_start > self.pos {
                    // Data in front of the marker does not fit; never split the marker itself
                    out.len().min(marker_start - self.pos)
                } else {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "read buffer smaller than chunk marker",
                    ));
                };
                out[..take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
                self.pos += take;
                let terminated = self.pos == found_end;
                if terminated {
                    self.found = None;
                }
                return Ok((take, terminated));
            }

            self.scan_buffered();
            if self.found.is_some() {
                continue;
            }

            // Everything before a trailing partial match is plain data
            let safe_end = self.scan - self.matched;
            if safe_end > self.pos {
                let take = out.len().min(safe_end - self.pos);
                out[..take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
                self.pos += take;
                return Ok((take, false));
            }

            if self.fill().await? == 0 {
                // End of stream: a held partial match was data after all
                if self.end > self.pos {
                    let take = out.len().min(self.end - self.pos);
                    out[..take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
                    self.pos += take;
                    return Ok((take, false));
                }
                self.matched = 0;
                return Ok((0, false));
            }
        }
    }

    fn scan_buffered(&mut self) {
        while self.scan < self.end {
            let b = self.buf[self.scan];
            while self.matched > 0 && self.marker[self.matched] != b {
                self.matched = self.failure[self.matched - 1];
            }
            if self.marker[self.matched] == b {
                self.matched += 1;
            }
            self.scan += 1;
            if self.matched == self.marker.len() {
                self.found = Some(self.scan);
                self.matched = 0;
                return;
            }
        }
    }

    async fn fill(&mut self) -> io::Result<usize> {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.end, 0);
            self.end -= self.pos;
            self.scan -= self.pos.min(self.scan);
            self.matched = self.matched.min(self.scan);
            self.found = self.found.map(|f| f - self.pos);
            self.pos = 0;
        }
        if self.end == self.buf.len() {
            let grown = self.buf.len() * 2;
            self.buf.resize(grown, 0);
        }
        let n = self.inner.read(&mut self.buf[self.end..]).await?;
        self.end += n;
        Ok(n)
    }

    fn reset_scan(&mut self) {
        self.scan = self.pos;
        self.matched = 0;
        self.found = None;
    }
}

/// Pass-through reader used while chunking is disabled.
///
/// Buffered bytes are served first, then the underlying stream is read
/// directly. Scanning restarts at the current position when this is dropped.
pub struct RawReader<'a, R: AsyncRead + Unpin> {
    framer: &'a mut ChunkingReader<R>,
}

impl<R: AsyncRead + Unpin> RawReader<'_, R> {
    pub async fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let f = &mut *self.framer;
        if f.pos < f.end {
            let take = out.len().min(f.end - f.pos);
            out[..take].copy_from_slice(&f.buf[f.pos..f.pos + take]);
            f.pos += take;
            return Ok(take);
        }
        f.inner.read(out).await
    }

    pub async fn read_exact(&mut self, out: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            let n = self.read(&mut out[filled..]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {} of {} payload bytes", filled, out.len()),
                ));
            }
            filled += n;
        }
        Ok(())
    }
}

impl<R: AsyncRead + Unpin> Drop for RawReader<'_, R> {
    fn drop(&mut self) {
        self.framer.reset_scan();
    }
}

fn failure_table(marker: &[u8]) -> Vec<usize> {
    let mut table = vec![0usize; marker.len()];
    let mut k = 0;
    for i in 1..marker.len() {
        while k > 0 && marker[i] != marker[k] {
            k = table[k - 1];
        }
        if marker[i] == marker[k] {
            k += 1;
        }
        table[i] = k;
    }
    table
}
