// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Terminal stdin as a chain input
//!
//! Reads happen on a plain thread that is never joined. A read still blocked
//! on an open terminal or producer therefore cannot hold up runtime shutdown
//! once the chain is done with its input.

use std::io::{self, Read};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::thread;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

const CHUNK_SIZE: usize = 8 * 1024;
const CHANNEL_DEPTH: usize = 8;

/// Async reader over chunks read from the process stdin
pub struct StdinReader {
    chunks: mpsc::Receiver<io::Result<Vec<u8>>>,
    current: Vec<u8>,
    offset: usize,
}

impl StdinReader {
    /// Start the reader thread
    pub fn spawn() -> io::Result<Self> {
        Self::spawn_from(io::stdin())
    }

    fn spawn_from<R: Read + Send + 'static>(mut source: R) -> io::Result<Self> {
        let (tx, chunks) = mpsc::channel(CHANNEL_DEPTH);

        thread::Builder::new()
            .name("pipechain-stdin".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    let chunk = match source.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => Ok(buf[..n].to_vec()),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => Err(e),
                    };
                    let failed = chunk.is_err();
                    if tx.blocking_send(chunk).is_err() || failed {
                        break;
                    }
                }
                debug!("stdin reader finished");
            })?;

        Ok(Self {
            chunks,
            current: Vec::new(),
            offset: 0,
        })
    }
}

impl AsyncRead for StdinReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let pending = self.current.len() - self.offset;
            if pending > 0 {
                let n = pending.min(buf.remaining());
                let start = self.offset;
                buf.put_slice(&self.current[start..start + n]);
                self.offset += n;
                return Poll::Ready(Ok(()));
            }

            match ready!(self.chunks.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}
