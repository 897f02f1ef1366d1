//! Response serialization.
//!
//! The response head is formatted straight into the connection's
//! [`WriteQueue`]; the body is pulled from the [`Response`] into queue
//! buffers and written after every chunk, framed by `Content-Length` or by
//! chunked transfer encoding.

use std::io::Write;
use std::time::SystemTime;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::buffer::WriteQueue;
use crate::error::HttpError;
use crate::http::response::{Response, StatusCode};
use crate::lifecycle::ConnectionControl;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Largest body piece requested from a response at once.
pub const BODY_CHUNK_LEN: usize = 8 * 1024;

/// `XXXXXXXX\r\n`: eight hex digits and a line break.
pub const CHUNK_HEADER_LEN: usize = 10;
pub const CHUNK_FOOTER_LEN: usize = 2;
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Everything that goes into the response head.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHead<'a> {
    pub status: StatusCode,
    pub content_type: &'a str,
    pub charset: Option<&'a str>,
    pub length: Option<u64>,
    pub extra_headers: &'a [(String, String)],
    pub keep_alive: bool,
    pub server_name: &'a str,
}

/// Formats the status line and headers into `buf`. Returns the number of
/// bytes written.
pub fn format_head(buf: &mut [u8], head: &ResponseHead<'_>) -> std::io::Result<usize> {
    let capacity = buf.len();
    let mut cursor: &mut [u8] = buf;

    write!(
        cursor,
        "{HTTP_VERSION} {} {}\r\nServer: {}\r\n",
        head.status.as_u16(),
        head.status.reason_phrase(),
        head.server_name
    )?;

    write!(cursor, "Date: {}\r\n", httpdate::fmt_http_date(SystemTime::now()))?;

    if head.status.allows_body() {
        match head.charset {
            Some(charset) => write!(cursor, "Content-Type: {}; charset=\"{}\"\r\n", head.content_type, charset)?,
            None => write!(cursor, "Content-Type: {}\r\n", head.content_type)?,
        }
        match head.length {
            Some(length) => write!(cursor, "Content-Length: {length}\r\n")?,
            None => cursor.write_all(b"Transfer-Encoding: chunked\r\n")?,
        }
    }
    if !head.keep_alive {
        cursor.write_all(b"Connection: close\r\n")?;
    }

    for (name, value) in head.extra_headers {
        // Room for the header plus the final empty line.
        let needed = name.len() + value.len() + 4;
        if cursor.len() < needed + 2 {
            debug!(header = %name, "Extra header does not fit, skipped");
            continue;
        }
        write!(cursor, "{name}: {value}\r\n")?;
    }

    cursor.write_all(b"\r\n")?;
    Ok(capacity - cursor.len())
}

/// Adds chunk framing around `payload_len` bytes that were written at offset
/// [`CHUNK_HEADER_LEN`] of `buf`. Returns the framed length.
pub fn frame_chunk(buf: &mut [u8], payload_len: usize) -> usize {
    let mut header: &mut [u8] = &mut buf[..CHUNK_HEADER_LEN];
    let _ = write!(header, "{payload_len:08x}\r\n");

    let end = CHUNK_HEADER_LEN + payload_len;
    buf[end..end + CHUNK_FOOTER_LEN].copy_from_slice(b"\r\n");
    end + CHUNK_FOOTER_LEN
}

/// Writes one response to a connection's socket.
pub struct ResponseWriter<'c, S, const N: usize> {
    stream: &'c mut S,
    queue: &'c mut WriteQueue<N>,
    control: &'c ConnectionControl,
    bytes_sent: u64,
}

impl<'c, S, const N: usize> ResponseWriter<'c, S, N>
where
    S: AsyncWrite + Unpin + Send,
{
    pub fn new(stream: &'c mut S, queue: &'c mut WriteQueue<N>, control: &'c ConnectionControl) -> Self {
        Self {
            stream,
            queue,
            control,
            bytes_sent: 0,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Queues the response head. It is sent together with the first body
    /// chunk.
    pub fn write_head(&mut self, head: &ResponseHead<'_>, max_len: usize) -> Result<(), HttpError> {
        let buf = self.queue.allocate(max_len);
        match format_head(buf, head) {
            Ok(len) => {
                self.queue.commit(len);
                Ok(())
            }
            Err(e) => {
                self.queue.commit(0);
                Err(HttpError::Io(e))
            }
        }
    }

    /// Sends the body. Returns `false` if a known-length body ended early,
    /// ran over its length, or failed; the connection must be closed then.
    pub async fn send_body(&mut self, response: &mut dyn Response) -> Result<bool, HttpError> {
        match response.length() {
            Some(length) => self.send_sized(response, length).await,
            None => self.send_chunked(response).await,
        }
    }

    async fn send_sized(&mut self, response: &mut dyn Response, length: u64) -> Result<bool, HttpError> {
        let mut remaining = length;
        let mut finished = remaining == 0;

        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(BODY_CHUNK_LEN, |rem| rem.min(BODY_CHUNK_LEN));
            let buf = self.queue.allocate(want);
            let (written, done) = match response.read(buf).await {
                Ok(result) => result,
                Err(e) => {
                    self.queue.commit(0);
                    debug!(error = %e, "Response body failed");
                    self.flush().await?;
                    return Ok(false);
                }
            };

            let written = written.min(want);
            self.queue.commit(written);
            remaining -= written as u64;
            self.flush().await?;

            finished = done;
            if done || written == 0 {
                break;
            }
        }

        if remaining > 0 {
            debug!(missing = remaining, "Response body shorter than its length");
            return Ok(false);
        }
        if !finished {
            // The response may still hold data beyond its declared length.
            let mut probe = [0u8; 1];
            if matches!(response.read(&mut probe).await, Ok((n, _)) if n > 0) {
                debug!("Response body longer than its length");
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn send_chunked(&mut self, response: &mut dyn Response) -> Result<bool, HttpError> {
        loop {
            let buf = self
                .queue
                .allocate(CHUNK_HEADER_LEN + BODY_CHUNK_LEN + CHUNK_FOOTER_LEN);
            let payload = &mut buf[CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + BODY_CHUNK_LEN];
            let (written, done) = match response.read(payload).await {
                Ok(result) => result,
                Err(e) => {
                    self.queue.commit(0);
                    debug!(error = %e, "Response body failed");
                    self.flush().await?;
                    return Ok(false);
                }
            };

            let written = written.min(BODY_CHUNK_LEN);
            if written > 0 {
                let framed = frame_chunk(buf, written);
                self.queue.commit(framed);
            } else {
                self.queue.commit(0);
            }

            if done || written == 0 {
                self.queue.push(LAST_CHUNK);
                self.flush().await?;
                return Ok(true);
            }
            self.flush().await?;
        }
    }

    /// Writes every queued buffer to the socket.
    pub async fn flush(&mut self) -> Result<(), HttpError> {
        while let Some(bytes) = self.queue.pop() {
            let len = bytes.len();
            tokio::select! {
                res = self.stream.write_all(bytes) => res?,
                _ = self.control.stopped() => return Err(HttpError::Stopped),
            }
            self.queue.release();
            self.bytes_sent += len as u64;
            self.control.touch();
        }
        self.stream.flush().await?;
        Ok(())
    }
}
