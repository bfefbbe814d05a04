//! Separator-delimited framing
//!
//! ```text
//! +-----------------+---+-----------------+---+
//! | frame bytes ... | S | frame bytes ... | S | ...
//! +-----------------+---+-----------------+---+
//! ```
//!
//! A frame is every byte up to the next separator `S`. Frames never contain
//! the separator itself and may be empty. End of stream with nothing
//! buffered is a clean disconnect; end of stream with buffered bytes yields
//! those bytes as a last, unterminated frame.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Default frame separator
pub const DEFAULT_SEPARATOR: u8 = b'\n';

/// Reads frames from a byte stream
pub struct FrameReader<R> {
    inner: BufReader<R>,
    separator: u8,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader splitting on `separator`
    pub fn new(reader: R, separator: u8) -> Self {
        Self {
            inner: BufReader::new(reader),
            separator,
            buf: Vec::new(),
        }
    }

    /// The separator this reader splits on
    pub fn separator(&self) -> u8 {
        self.separator
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` when the peer closed the stream between frames.
    ///
    /// Cancel safe: if the future is dropped mid-frame the partial frame is
    /// kept in the internal buffer and completed by the next call.
    pub async fn read_frame(&mut self) -> std::io::Result<Option<Bytes>> {
        let n = self.inner.read_until(self.separator, &mut self.buf).await?;
        if n == 0 && self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf.last() == Some(&self.separator) {
            self.buf.pop();
        }

        let frame = Bytes::from(std::mem::take(&mut self.buf));
        Ok(Some(frame))
    }
}

/// Build the on-wire form of a frame
pub fn encode_frame(payload: &[u8], separator: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.put_slice(payload);
    buf.put_u8(separator);
    buf.freeze()
}

/// Write one frame followed by the separator and flush
///
/// Callers sharing a writer must hold its lock across this call so two
/// frames never interleave.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], separator: u8) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let encoded = encode_frame(payload, separator);
    writer.write_all(&encoded).await?;
    writer.flush().await
}
