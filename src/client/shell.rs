use bytes::Bytes;
use futures::FutureExt;
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{
    split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf,
};

use crate::{error::ClientResult, transport::ByteStream};

/// Read length used when the caller has no preference
pub const DEFAULT_READ_LEN: usize = 1024;

/// Live interactive shell channel.
///
/// Reads wait for output. Use [`Shell::split`] for a reader that polls
/// instead of waiting.
pub struct Shell<S> {
    stream: S,
}

impl<S: ByteStream> Shell<S> {
    pub(crate) const fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Waits for output; `Ok(0)` means the shell has exited
    pub async fn read(&mut self, buf: &mut [u8]) -> ClientResult<usize> {
        Ok(self.stream.read(buf).await?)
    }

    /// Sends `data` and returns the number of bytes written, which may be
    /// fewer than `data.len()`. To send only a prefix, pass
    /// `&data[..len]`.
    pub async fn write(&mut self, data: &[u8]) -> ClientResult<usize> {
        let written = self.stream.write(data).await?;
        self.stream.flush().await?;
        Ok(written)
    }

    /// Closes the input side of the shell
    pub async fn close(&mut self) -> ClientResult<()> {
        Ok(self.stream.shutdown().await?)
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Splits into a polling reader and a writer
    pub fn split(self) -> (ShellReader<S>, ShellWriter<S>) {
        let (reader, writer) = split(self.stream);
        (
            ShellReader {
                inner: reader,
                eof: false,
            },
            ShellWriter { inner: writer },
        )
    }
}

impl<S: ByteStream> AsyncRead for Shell<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: ByteStream> AsyncWrite for Shell<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Result of one shell read.
///
/// An empty `data` with `eof == false` only means nothing was available
/// yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRead {
    pub data: Bytes,
    pub eof: bool,
}

/// Reading half of a split shell
pub struct ShellReader<S> {
    inner: ReadHalf<S>,
    eof: bool,
}

impl<S: ByteStream> ShellReader<S> {
    /// Returns whatever output is available right now, up to `len` bytes,
    /// without waiting.
    pub fn try_read(&mut self, len: usize) -> ClientResult<ShellRead> {
        if self.eof {
            return Ok(self.finished());
        }

        let mut buf = vec![0; len.max(1)];
        match self.inner.read(&mut buf).now_or_never() {
            None => Ok(ShellRead {
                data: Bytes::new(),
                eof: false,
            }),
            Some(result) => self.complete(buf, result?),
        }
    }

    /// Waits until output is available or the shell exits
    pub async fn read(&mut self, len: usize) -> ClientResult<ShellRead> {
        if self.eof {
            return Ok(self.finished());
        }

        let mut buf = vec![0; len.max(1)];
        let n = self.inner.read(&mut buf).await?;
        self.complete(buf, n)
    }

    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.eof
    }

    fn complete(&mut self, mut buf: Vec<u8>, n: usize) -> ClientResult<ShellRead> {
        if n == 0 {
            self.eof = true;
            return Ok(self.finished());
        }

        buf.truncate(n);
        Ok(ShellRead {
            data: Bytes::from(buf),
            eof: false,
        })
    }

    const fn finished(&self) -> ShellRead {
        ShellRead {
            data: Bytes::new(),
            eof: true,
        }
    }
}

/// Writing half of a split shell
pub struct ShellWriter<S> {
    inner: WriteHalf<S>,
}

impl<S: ByteStream> ShellWriter<S> {
    /// Sends `data` and returns the number of bytes written, which may be
    /// fewer than `data.len()`. To send only a prefix, pass
    /// `&data[..len]`.
    pub async fn write(&mut self, data: &[u8]) -> ClientResult<usize> {
        let written = self.inner.write(data).await?;
        self.inner.flush().await?;
        Ok(written)
    }

    /// Closes the input side of the shell
    pub async fn close(&mut self) -> ClientResult<()> {
        Ok(self.inner.shutdown().await?)
    }
}
