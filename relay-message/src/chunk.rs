use std::{
    cmp,
    io::{self, IoSliceMut},
    ops::Range,
    pin::Pin,
    task::{Context, Poll},
};

use futures::AsyncRead;
use pin_project::pin_project;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ChunkReaderState {
    Reading,
    End,
    Completed,
}

/// `AsyncRead` instance that returns exactly `size` raw bytes of a single
/// `BDAT` chunk (RFC 3030): unlike [`EscapedDataReader`](crate::EscapedDataReader),
/// there is no dot-unstuffing to perform, since a chunk's length is given on
/// the wire up front.
#[pin_project]
pub struct ChunkReader<'a, R> {
    buf: &'a mut [u8],
    unhandled: Range<usize>,
    remaining: u64,
    state: ChunkReaderState,
    #[pin]
    read: R,
}

impl<'a, R> ChunkReader<'a, R>
where
    R: AsyncRead,
{
    #[inline]
    pub fn new(buf: &'a mut [u8], unhandled: Range<usize>, size: u64, read: R) -> Self {
        ChunkReader {
            buf,
            unhandled,
            remaining: size,
            state: if size == 0 {
                ChunkReaderState::End
            } else {
                ChunkReaderState::Reading
            },
            read,
        }
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state == ChunkReaderState::End || self.state == ChunkReaderState::Completed
    }

    /// Asserts that the full chunk has been read, then marks this reader as
    /// complete. Should only be called once the chunk's bytes have been
    /// durably handled (eg. written to the queue's content file).
    #[inline]
    pub fn complete(&mut self) {
        assert!(self.is_finished());
        self.state = ChunkReaderState::Completed;
    }

    /// The leftover bytes in `buf` that followed this chunk on the wire,
    /// available once `complete()` has been called.
    #[inline]
    pub fn get_unhandled(&self) -> Option<Range<usize>> {
        if self.state == ChunkReaderState::Completed {
            Some(self.unhandled.clone())
        } else {
            None
        }
    }
}

impl<'a, R> AsyncRead for ChunkReader<'a, R>
where
    R: AsyncRead,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        if self.is_finished() {
            return Poll::Ready(Ok(0));
        }

        let this = self.project();
        let want = cmp::min(buf.len() as u64, *this.remaining) as usize;
        if want == 0 {
            *this.state = ChunkReaderState::End;
            return Poll::Ready(Ok(0));
        }

        let unhandled_len = this.unhandled.end - this.unhandled.start;
        let n = if unhandled_len > 0 {
            let n = cmp::min(want, unhandled_len);
            buf[..n].copy_from_slice(&this.buf[this.unhandled.start..this.unhandled.start + n]);
            this.unhandled.start += n;
            n
        } else {
            match this.read.poll_read(cx, &mut buf[..want]) {
                Poll::Ready(Ok(n)) => n,
                other => return other,
            }
        };

        if n == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection aborted mid-chunk",
            )));
        }

        *this.remaining -= n as u64;
        if *this.remaining == 0 {
            *this.state = ChunkReaderState::End;
        }
        Poll::Ready(Ok(n))
    }

    fn poll_read_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context,
        bufs: &mut [IoSliceMut],
    ) -> Poll<io::Result<usize>> {
        match bufs.iter_mut().find(|b| !b.is_empty()) {
            Some(buf) => self.poll_read(cx, buf),
            None => Poll::Ready(Ok(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{executor::block_on, io::Cursor, AsyncReadExt};

    #[test]
    fn reads_exact_chunk_then_stops() {
        let mut buf = [0u8; 16];
        let mut rdr = ChunkReader::new(&mut buf, 0..0, 5, Cursor::new(b"helloworld".to_vec()));
        let mut out = Vec::new();
        block_on(async {
            rdr.read_to_end(&mut out).await.unwrap();
        });
        assert_eq!(out, b"hello");
        assert!(rdr.is_finished());
        rdr.complete();
        assert_eq!(rdr.get_unhandled(), Some(0..0));
    }

    #[test]
    fn drains_preloaded_unhandled_bytes_first() {
        let mut buf = *b"abcdef";
        let mut rdr = ChunkReader::new(&mut buf, 0..3, 3, Cursor::new(Vec::new()));
        let mut out = Vec::new();
        block_on(async {
            rdr.read_to_end(&mut out).await.unwrap();
        });
        assert_eq!(out, b"abc");
    }

    #[test]
    fn zero_size_chunk_is_immediately_finished() {
        let mut buf = [0u8; 4];
        let rdr = ChunkReader::new(&mut buf, 0..0, 0, Cursor::new(Vec::new()));
        assert!(rdr.is_finished());
    }
}
