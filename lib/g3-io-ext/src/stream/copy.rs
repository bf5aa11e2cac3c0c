/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const DEFAULT_COPY_BUFFER_SIZE: usize = 16 * 1024; // 16KB
const MINIMAL_COPY_BUFFER_SIZE: usize = 4 * 1024; // 4KB
const DEFAULT_COPY_YIELD_SIZE: usize = 1024 * 1024; // 1MB
const MINIMAL_COPY_YIELD_SIZE: usize = 64 * 1024; // 64KB

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamCopyConfig {
    buffer_size: usize,
    yield_size: usize,
}

impl Default for StreamCopyConfig {
    fn default() -> Self {
        StreamCopyConfig {
            buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            yield_size: DEFAULT_COPY_YIELD_SIZE,
        }
    }
}

impl StreamCopyConfig {
    pub fn set_buffer_size(&mut self, buffer_size: usize) {
        self.buffer_size = buffer_size.max(MINIMAL_COPY_BUFFER_SIZE);
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn set_yield_size(&mut self, yield_size: usize) {
        self.yield_size = yield_size.max(MINIMAL_COPY_YIELD_SIZE);
    }

    #[inline]
    pub fn yield_size(&self) -> usize {
        self.yield_size
    }
}

#[derive(Error, Debug)]
pub enum StreamCopyError {
    #[error("read failed: {0:?}")]
    ReadFailed(io::Error),
    #[error("write failed: {0:?}")]
    WriteFailed(io::Error),
}

/// Copy all data from the reader to the writer until EOF or error.
///
/// The future resolves to the total number of bytes written. The writer is
/// flushed before returning `Ok`, but it is never shutdown here, that is left
/// to the caller so it can decide how to propagate the half close.
#[derive(Debug)]
pub struct StreamCopy<'a, R: ?Sized, W: ?Sized> {
    reader: &'a mut R,
    writer: &'a mut W,
    buf: Box<[u8]>,
    yield_size: usize,
    w_off: usize,
    r_off: usize,
    read_done: bool,
    need_flush: bool,
    total_read: u64,
    total_write: u64,
}

impl<'a, R, W> StreamCopy<'a, R, W>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    pub fn new(reader: &'a mut R, writer: &'a mut W, config: &StreamCopyConfig) -> Self {
        StreamCopy {
            reader,
            writer,
            buf: vec![0; config.buffer_size].into_boxed_slice(),
            yield_size: config.yield_size,
            w_off: 0,
            r_off: 0,
            read_done: false,
            need_flush: false,
            total_read: 0,
            total_write: 0,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        self.writer
    }

    #[inline]
    pub fn no_cached_data(&self) -> bool {
        self.r_off == self.w_off
    }

    #[inline]
    pub fn finished(&self) -> bool {
        self.read_done && self.no_cached_data()
    }

    #[inline]
    pub fn read_size(&self) -> u64 {
        self.total_read
    }

    #[inline]
    pub fn copied_size(&self) -> u64 {
        self.total_write
    }

    fn poll_flush_writer(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), StreamCopyError>> {
        if self.need_flush {
            ready!(Pin::new(&mut *self.writer).poll_flush(cx))
                .map_err(StreamCopyError::WriteFailed)?;
            self.need_flush = false;
        }
        Poll::Ready(Ok(()))
    }

    fn poll_copy(&mut self, cx: &mut Context<'_>) -> Poll<Result<u64, StreamCopyError>> {
        let mut copy_this_round = 0usize;
        loop {
            if !self.read_done && self.r_off < self.buf.len() {
                let mut read_buf = ReadBuf::new(&mut self.buf[self.r_off..]);
                match Pin::new(&mut *self.reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let nr = read_buf.filled().len();
                        if nr == 0 {
                            self.read_done = true;
                        } else {
                            self.r_off += nr;
                            self.total_read += nr as u64;
                        }
                    }
                    Poll::Ready(Err(e)) => {
                        return Poll::Ready(Err(StreamCopyError::ReadFailed(e)));
                    }
                    Poll::Pending => {
                        if self.no_cached_data() {
                            // nothing more to write for now, push out what we have sent
                            ready!(self.poll_flush_writer(cx))?;
                            return Poll::Pending;
                        }
                    }
                }
            }

            while self.w_off < self.r_off {
                let nw = ready!(
                    Pin::new(&mut *self.writer).poll_write(cx, &self.buf[self.w_off..self.r_off])
                )
                .map_err(StreamCopyError::WriteFailed)?;
                if nw == 0 {
                    return Poll::Ready(Err(StreamCopyError::WriteFailed(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write zero byte into writer",
                    ))));
                }
                self.w_off += nw;
                self.total_write += nw as u64;
                self.need_flush = true;
                copy_this_round += nw;
            }
            self.w_off = 0;
            self.r_off = 0;

            if self.read_done {
                ready!(self.poll_flush_writer(cx))?;
                return Poll::Ready(Ok(self.total_write));
            }

            if copy_this_round >= self.yield_size {
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
        }
    }
}

impl<R, W> Future for StreamCopy<'_, R, W>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    type Output = Result<u64, StreamCopyError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().poll_copy(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn copy_until_eof() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"hello ")
            .read(b"world")
            .build();
        let mut writer = tokio_test::io::Builder::new().write(b"hello world").build();

        let mut copy = StreamCopy::new(&mut reader, &mut writer, &StreamCopyConfig::default());
        let nw = (&mut copy).await.unwrap();
        assert_eq!(nw, 11);
        assert_eq!(copy.read_size(), 11);
        assert_eq!(copy.copied_size(), 11);
        assert!(copy.finished());
    }

    #[tokio::test]
    async fn copy_empty() {
        let mut reader = tokio_test::io::Builder::new().build();
        let mut writer = tokio_test::io::Builder::new().build();

        let copy = StreamCopy::new(&mut reader, &mut writer, &StreamCopyConfig::default());
        assert_eq!(copy.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_failed() {
        let mut reader = tokio_test::io::Builder::new()
            .read(b"abc")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut writer = tokio_test::io::Builder::new().write(b"abc").build();

        let mut copy = StreamCopy::new(&mut reader, &mut writer, &StreamCopyConfig::default());
        let e = (&mut copy).await.unwrap_err();
        match e {
            StreamCopyError::ReadFailed(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            StreamCopyError::WriteFailed(_) => panic!("unexpected write error"),
        }
        assert!(!copy.finished());
    }

    #[tokio::test]
    async fn write_failed() {
        let mut reader = tokio_test::io::Builder::new().read(b"abc").build();
        let mut writer = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            .build();

        let copy = StreamCopy::new(&mut reader, &mut writer, &StreamCopyConfig::default());
        match copy.await.unwrap_err() {
            StreamCopyError::WriteFailed(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            StreamCopyError::ReadFailed(_) => panic!("unexpected read error"),
        }
    }

    #[tokio::test]
    async fn copy_larger_than_buffer() {
        let data: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
        let (mut src_w, mut src_r) = tokio::io::duplex(8 * 1024);
        let (mut dst_w, mut dst_r) = tokio::io::duplex(8 * 1024);

        let expected = data.clone();
        let feeder = tokio::spawn(async move {
            src_w.write_all(&data).await.unwrap();
            src_w.shutdown().await.unwrap();
        });
        let collector = tokio::spawn(async move {
            let mut received = Vec::new();
            dst_r.read_to_end(&mut received).await.unwrap();
            received
        });

        let mut config = StreamCopyConfig::default();
        config.set_buffer_size(1024);
        assert_eq!(config.buffer_size(), MINIMAL_COPY_BUFFER_SIZE);
        config.set_yield_size(1024);
        assert_eq!(config.yield_size(), MINIMAL_COPY_YIELD_SIZE);

        let nw = StreamCopy::new(&mut src_r, &mut dst_w, &config)
            .await
            .unwrap();
        assert_eq!(nw, expected.len() as u64);
        drop(dst_w);

        feeder.await.unwrap();
        assert_eq!(collector.await.unwrap(), expected);
    }
}
