//! Bounded-chunk writes for large outbound buffers.
//!
//! A JPEG frame can be tens of kilobytes; the endpoint hands it to the socket
//! in pieces of at most `chunk_size` bytes, one write call per piece, so a
//! single frame never monopolises a small embedded send buffer.

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Default piece size, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Iterator over `buf` in pieces of at most `chunk_size` bytes.
///
/// Yields nothing for an empty buffer, so no zero-length write is ever issued.
///
/// # Panics
///
/// Panics if `chunk_size` is zero. [`LinkConfig::validate`] rejects that value
/// before it reaches here.
///
/// [`LinkConfig::validate`]: marklink_core::LinkConfig::validate
pub fn split(buf: &[u8], chunk_size: usize) -> std::slice::Chunks<'_, u8> {
    buf.chunks(chunk_size)
}

/// Write `buf` as consecutive `chunk_size` pieces and return the byte count
/// the writer accepted.
///
/// Each piece is written with a single `write` call. A short write is not
/// retried; the remainder of that piece is dropped and the next piece is sent,
/// matching a best-effort link where a later frame supersedes this one.
/// Callers treat a zero total for a non-empty buffer as a failed transmission.
pub async fn send<W>(writer: &mut W, buf: &[u8], chunk_size: usize) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if chunk_size == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "chunk size must be non-zero",
        ));
    }

    let mut total = 0;
    for piece in split(buf, chunk_size) {
        let written = writer.write(piece).await?;
        if written == 0 {
            break;
        }
        total += written;
    }
    writer.flush().await?;
    Ok(total)
}
