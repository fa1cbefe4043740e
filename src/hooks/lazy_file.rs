// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Lazily opened file sinks
//!
//! A [`LazyFile`] opens its target on the first write after the most recent
//! close, and is closed by its post-run hook. Running the same chain twice
//! therefore reopens the file, which is what makes append mode accumulate
//! output across runs.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use parking_lot::Mutex;
use tokio::fs::File;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tracing::debug;

use super::Hook;

/// How a lazy file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileMode {
    /// Create or truncate on every open
    #[default]
    Truncate,
    /// Create or append on every open
    Append,
}

/// File sink that opens on first write. Clones share the same handle.
#[derive(Clone)]
pub struct LazyFile {
    inner: Arc<LazyInner>,
}

struct LazyInner {
    path: PathBuf,
    mode: FileMode,
    state: Mutex<FileState>,
}

enum FileState {
    Closed,
    /// Opened from a write on the blocking pool
    Opening(JoinHandle<io::Result<std::fs::File>>),
    Open(File),
}

impl LazyFile {
    pub fn new(path: impl Into<PathBuf>, mode: FileMode) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                path: path.into(),
                mode,
                state: Mutex::new(FileState::Closed),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn mode(&self) -> FileMode {
        self.inner.mode
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.inner.state.lock(), FileState::Open(_))
    }

    fn options(&self) -> std::fs::OpenOptions {
        let mut options = std::fs::OpenOptions::new();
        options.create(true);
        match self.inner.mode {
            FileMode::Truncate => options.write(true).truncate(true),
            FileMode::Append => options.append(true),
        };
        options
    }

    /// Open the file unless it is already open or opening.
    ///
    /// Blocks the calling thread; writes open through the blocking pool.
    pub fn open(&self) -> io::Result<()> {
        let mut state = self.inner.state.lock();
        if let FileState::Closed = *state {
            let file = self.options().open(&self.inner.path)?;
            debug!(path = %self.inner.path.display(), "opened lazy file");
            *state = FileState::Open(File::from_std(file));
        }
        Ok(())
    }

    /// Close the file if open; the next write reopens it
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), FileState::Closed);
        if !matches!(previous, FileState::Closed) {
            debug!(path = %self.inner.path.display(), "closed lazy file");
        }
    }

    fn poll_open_file<T>(
        &self,
        cx: &mut Context<'_>,
        op: impl FnOnce(Pin<&mut File>, &mut Context<'_>) -> Poll<io::Result<T>>,
    ) -> Poll<io::Result<T>> {
        let mut state = self.inner.state.lock();
        loop {
            match &mut *state {
                FileState::Open(file) => return op(Pin::new(file), cx),
                FileState::Opening(pending) => {
                    let opened = ready!(Pin::new(pending).poll(cx));
                    let file = match opened {
                        Ok(Ok(file)) => file,
                        Ok(Err(e)) => {
                            *state = FileState::Closed;
                            return Poll::Ready(Err(e));
                        }
                        Err(e) => {
                            *state = FileState::Closed;
                            return Poll::Ready(Err(io::Error::other(e)));
                        }
                    };
                    debug!(path = %self.inner.path.display(), "opened lazy file");
                    *state = FileState::Open(File::from_std(file));
                }
                FileState::Closed => {
                    let options = self.options();
                    let path = self.inner.path.clone();
                    *state = FileState::Opening(tokio::task::spawn_blocking(move || {
                        options.open(path)
                    }));
                }
            }
        }
    }
}

impl AsyncWrite for LazyFile {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_open_file(cx, |file, cx| file.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self.inner.state.lock() {
            FileState::Open(file) => Pin::new(file).poll_flush(cx),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self.inner.state.lock() {
            FileState::Open(file) => Pin::new(file).poll_shutdown(cx),
            _ => Poll::Ready(Ok(())),
        }
    }
}

impl Hook for LazyFile {
    fn name(&self) -> String {
        self.to_string()
    }

    /// Opening eagerly creates the target even when nothing gets written and
    /// surfaces open failures before any stage starts.
    fn before_run(&self) -> io::Result<()> {
        self.open()
    }

    fn after_run(&self) {
        self.close();
    }
}

impl fmt::Display for LazyFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.mode {
            FileMode::Append => write!(f, "{} (appending)", self.inner.path.display()),
            FileMode::Truncate => write!(f, "{}", self.inner.path.display()),
        }
    }
}

impl fmt::Debug for LazyFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyFile")
            .field("path", &self.inner.path)
            .field("mode", &self.inner.mode)
            .field("open", &self.is_open())
            .finish()
    }
}
