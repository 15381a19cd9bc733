//! Incremental reader over a child's output pipe.
//!
//! [`LineReader::fill`] completes as soon as any bytes are ready and never
//! waits for a full line, so callers can race it against a deadline.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK_SIZE: usize = 4096;

/// Accumulates bytes from an async stream and hands them out as lines.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buffer: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wraps `inner` with an empty buffer.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            eof: false,
        }
    }

    /// Waits until the stream is readable and appends the available bytes.
    ///
    /// Returns the number of bytes appended; `0` means the stream has ended.
    /// Dropping the future before it completes loses no data.
    ///
    /// # Errors
    ///
    /// Propagates read errors from the underlying stream.
    pub async fn fill(&mut self) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        let mut chunk = [0_u8; CHUNK_SIZE];
        let read = self.inner.read(&mut chunk).await?;
        if read == 0 {
            self.eof = true;
        }
        self.buffer.extend(chunk.iter().take(read));
        Ok(read)
    }

    /// Returns `true` once the stream has reported end of file.
    pub const fn is_eof(&self) -> bool {
        self.eof
    }

    /// Removes and returns the next complete line without its newline.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=newline).take(newline).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Returns the bytes accumulated so far, lossily decoded.
    pub fn buffer(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Removes and returns everything accumulated so far.
    pub fn take_all(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
