//! Content-Length message framing for the hub connection.
//!
//! Messages use HTTP-style framing (the same as LSP), which gives reliable
//! message boundaries over a byte stream.
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! The header parsing is case-insensitive and handles both CRLF and LF line endings.

use anyhow::{bail, ensure, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum message size (100MB) to prevent OOM from a misbehaving hub.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

/// Read one Content-Length framed message.
///
/// # Errors
///
/// Fails on EOF, a missing or malformed Content-Length, a body larger than
/// [`MAX_MESSAGE_SIZE`], a short read, or a non-UTF-8 body.
pub async fn read_message<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let size = read_header_block(reader).await?;
    ensure!(
        size <= MAX_MESSAGE_SIZE,
        "Message size {} exceeds maximum {} bytes",
        size,
        MAX_MESSAGE_SIZE
    );

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .context("Failed to read message body")?;

    String::from_utf8(body).context("Message body is not valid UTF-8")
}

/// Consume headers up to the blank separator line and return the body length.
async fn read_header_block<R>(reader: &mut R) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = None;
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let read = reader
            .read_until(b'\n', &mut raw)
            .await
            .context("Failed to read header line")?;
        if read == 0 {
            bail!("Connection closed by hub");
        }

        let header = std::str::from_utf8(&raw)
            .context("Header line is not valid UTF-8")?
            .trim();
        if header.is_empty() {
            break;
        }
        if let Some(length) = content_length_of(header)? {
            content_length = Some(length);
        }
    }

    content_length.context("Missing Content-Length header")
}

/// `Some(n)` for a Content-Length header (any case), `None` for other headers.
fn content_length_of(header: &str) -> Result<Option<usize>> {
    let Some((name, value)) = header.split_once(':') else {
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
        return Ok(None);
    }
    let value = value.trim();
    value
        .parse()
        .map(Some)
        .with_context(|| format!("Invalid Content-Length value: {}", value))
}

/// Write one framed message as a single buffer and flush.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = format!("{}: {}\r\n\r\n", CONTENT_LENGTH, body.len()).into_bytes();
    frame.extend_from_slice(body.as_bytes());

    writer
        .write_all(&frame)
        .await
        .context("Failed to write message")?;
    writer.flush().await.context("Failed to flush message")
}
