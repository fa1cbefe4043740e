// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Stream endpoints
//!
//! Forks, outputs and injected inputs are plain tokio readers and writers,
//! boxed so a chain can mix files, buffers and process handles.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};

/// A destination receiving a copy of a stream
pub type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// An extra input merged into a stage's stdin
pub type Source = Box<dyn AsyncRead + Send + Unpin>;

pub(crate) fn sinks<I, W>(targets: I) -> Vec<Sink>
where
    I: IntoIterator<Item = W>,
    W: AsyncWrite + Send + Unpin + 'static,
{
    targets.into_iter().map(|t| Box::new(t) as Sink).collect()
}

pub(crate) fn sources<I, R>(readers: I) -> Vec<Source>
where
    I: IntoIterator<Item = R>,
    R: AsyncRead + Send + Unpin + 'static,
{
    readers.into_iter().map(|r| Box::new(r) as Source).collect()
}

/// In-memory sink whose clones share one buffer.
///
/// Hand one clone to the chain and keep another to read what was written.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    /// Everything written so far, decoded lossily as UTF-8
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.inner.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_clones_share_contents() {
        let buffer = SharedBuffer::new();
        let mut writer = buffer.clone();

        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();

        assert_eq!(buffer.to_string_lossy(), "hello world");
        assert_eq!(buffer.len(), 11);
    }
}
