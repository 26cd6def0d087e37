//! Line protocol codec for the analysis tool.
//!
//! A request is a single line. A response is any number of lines followed by
//! a line reading exactly `OK`; the tool may end lines with `\n` or `\r\n`.
//! This module provides [`ResponseReader`] and [`CommandWriter`] for async
//! reading and writing over the tool's pipes.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum response size (16 MiB) to prevent unbounded memory allocation.
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK_BYTES: usize = 2048;

/// Reads `OK`-terminated responses from an async reader.
pub struct ResponseReader<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ResponseReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Read the next response.
    ///
    /// Returns the payload without the `OK` line and with `\r\n` normalized
    /// to `\n`. Returns `Ok(None)` on EOF before any byte of a response.
    /// Returns `Err` on EOF mid-response or an oversized response.
    pub async fn read_response(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            if let Some(len) = payload_len(&self.buf) {
                let mut payload = std::mem::take(&mut self.buf);
                payload.truncate(len);
                return Ok(Some(normalize_line_endings(payload)));
            }

            let n = self
                .reader
                .read(&mut chunk)
                .await
                .context("reading response")?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                bail!(
                    "unexpected EOF before OK terminator ({} bytes buffered)",
                    self.buf.len()
                );
            }
            self.buf.extend_from_slice(&chunk[..n]);

            if self.buf.len() > MAX_RESPONSE_BYTES {
                bail!("response exceeds maximum {MAX_RESPONSE_BYTES} bytes");
            }
        }
    }
}

/// Length of the payload preceding a trailing `OK` line, if `buf` ends with one.
fn payload_len(buf: &[u8]) -> Option<usize> {
    let body = buf.strip_suffix(b"\n")?;
    let body = body.strip_suffix(b"\r").unwrap_or(body);
    let payload = body.strip_suffix(b"OK")?;
    // `OK` must be a whole line, not the tail of e.g. `NOT OK`.
    if payload.is_empty() || payload.ends_with(b"\n") {
        Some(payload.len())
    } else {
        None
    }
}

fn normalize_line_endings(bytes: Vec<u8>) -> Vec<u8> {
    if !bytes.windows(2).any(|w| w == b"\r\n") {
        return bytes;
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied().peekable();
    while let Some(b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

/// Writes single-line commands to an async writer.
pub struct CommandWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> CommandWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write `command` followed by a newline and flush.
    pub async fn write_command(&mut self, command: &str) -> Result<()> {
        if command.contains(['\n', '\r']) {
            bail!("command must be a single line: {command:?}");
        }
        self.writer
            .write_all(command.as_bytes())
            .await
            .context("writing command")?;
        self.writer
            .write_all(b"\n")
            .await
            .context("writing command terminator")?;
        self.writer.flush().await.context("flushing command")?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
