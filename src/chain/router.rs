// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Stream routing between stages
//!
//! The router turns a stage's routing flags, forks and injected sources into
//! concrete plumbing:
//!
//! ```text
//!   direct:   stage ──(os pipe)──▶ next
//!
//!   fork:     stage ──▶ [copy task] ──▶ pipe ──▶ next
//!                            └──▶ fork sinks
//!
//!   combine:  source 1 ──▶ [copy] ─┐
//!             source n ──▶ [copy] ─┴──▶ pipe ──▶ next
//! ```
//!
//! Every copy runs as a task in one `JoinSet`, which doubles as the
//! completion barrier the engine drains before finishing a run. Copy
//! failures never abort the chain; they are recorded per stage and reported
//! once the run completes.

use std::io;
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::streams::{Sink, Source};
use crate::errors::{ChainError, MultiError, COMBINE_ERRORS, STREAM_ERRORS};

/// Capacity of the pipes allocated for forks and merges
pub const PIPE_CAPACITY: usize = 64 * 1024;

const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// A stage's stdout or stderr, still owned by the parent
pub(crate) enum ProcessStream {
    Stdout(ChildStdout),
    Stderr(ChildStderr),
}

impl ProcessStream {
    /// Hand the OS pipe over to another process
    pub(crate) fn into_stdio(self) -> io::Result<Stdio> {
        match self {
            Self::Stdout(stream) => stream.try_into(),
            Self::Stderr(stream) => stream.try_into(),
        }
    }

    pub(crate) fn into_source(self) -> Source {
        match self {
            Self::Stdout(stream) => Box::new(stream),
            Self::Stderr(stream) => Box::new(stream),
        }
    }
}

/// What a stage reads as stdin
pub(crate) enum StageInput {
    /// The predecessor's pipe, passed on without copying
    Process(ProcessStream),
    /// A router-produced or user-provided reader, fed through a copy task
    Reader(Source),
}

impl StageInput {
    fn into_source(self) -> Source {
        match self {
            Self::Process(stream) => stream.into_source(),
            Self::Reader(source) => source,
        }
    }
}

/// Output side of a started stage that is followed by another stage
pub(crate) struct StageOutputs {
    pub stdout: Option<ProcessStream>,
    pub stderr: Option<ProcessStream>,
    pub forward_stdout: bool,
    pub forward_stderr: bool,
    pub stdout_forks: Vec<Sink>,
    pub stderr_forks: Vec<Sink>,
}

/// Owns every background copy of one run
pub(crate) struct StreamRouter {
    tasks: JoinSet<()>,
    errors: Arc<Mutex<MultiError>>,
}

impl StreamRouter {
    pub(crate) fn new(stage_count: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            errors: Arc::new(Mutex::new(MultiError::with_slots(STREAM_ERRORS, stage_count))),
        }
    }

    /// Merge a stage's upstream input with its injected sources
    pub(crate) fn resolve_input(
        &mut self,
        index: usize,
        upstream: Option<StageInput>,
        injected: Vec<Source>,
    ) -> Option<StageInput> {
        if injected.is_empty() {
            return upstream;
        }

        let mut sources = Vec::with_capacity(injected.len() + 1);
        if let Some(upstream) = upstream {
            sources.push(upstream.into_source());
        }
        sources.extend(injected);

        if sources.len() == 1 {
            return sources.pop().map(StageInput::Reader);
        }
        Some(StageInput::Reader(self.combine(index, sources)))
    }

    /// Wire a started stage's outputs into the next stage's input
    pub(crate) fn route_outputs(&mut self, index: usize, outputs: StageOutputs) -> Option<StageInput> {
        let stdout = self.route_stream(
            index,
            outputs.stdout,
            outputs.forward_stdout,
            outputs.stdout_forks,
        );
        let stderr = self.route_stream(
            index,
            outputs.stderr,
            outputs.forward_stderr,
            outputs.stderr_forks,
        );

        match (stdout, stderr) {
            (Some(out), Some(err)) => {
                let merged = self.combine(index + 1, vec![out.into_source(), err.into_source()]);
                Some(StageInput::Reader(merged))
            }
            (single, None) | (None, single) => single,
        }
    }

    fn route_stream(
        &mut self,
        index: usize,
        stream: Option<ProcessStream>,
        forward: bool,
        forks: Vec<Sink>,
    ) -> Option<StageInput> {
        let stream = stream?;
        match (forward, forks.is_empty()) {
            (true, true) => Some(StageInput::Process(stream)),
            (true, false) => Some(StageInput::Reader(self.fork(index, stream, forks))),
            (false, _) => {
                self.drain(index, stream, forks);
                None
            }
        }
    }

    /// Tee `stream` into `forks` and a fresh pipe; returns the pipe's read end.
    ///
    /// The fan-out write stops as soon as any destination fails, including
    /// the pipe itself.
    pub(crate) fn fork(&mut self, owner: usize, stream: ProcessStream, forks: Vec<Sink>) -> Source {
        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let errors = Arc::clone(&self.errors);

        self.tasks.spawn(async move {
            let mut targets: Vec<Sink> = Vec::with_capacity(forks.len() + 1);
            targets.push(Box::new(writer));
            targets.extend(forks);

            // dropping `targets` closes the pipe, which ends the next stage's input
            if let Err(source) = fan_out(stream.into_source(), &mut targets).await {
                record(&errors, owner, ChainError::StreamCopy { source });
            }
        });

        Box::new(reader)
    }

    /// Copy `stream` into `targets` only
    pub(crate) fn drain(&mut self, owner: usize, stream: ProcessStream, mut targets: Vec<Sink>) {
        let errors = Arc::clone(&self.errors);

        self.tasks.spawn(async move {
            if let Err(source) = fan_out(stream.into_source(), &mut targets).await {
                record(&errors, owner, ChainError::StreamCopy { source });
            }
        });
    }

    /// Merge `sources` into one stream, reading them in parallel.
    ///
    /// The merged stream ends once every source is exhausted. Per-source
    /// failures are folded into one aggregate recorded against `owner`.
    pub(crate) fn combine(&mut self, owner: usize, sources: Vec<Source>) -> Source {
        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let writer = Arc::new(tokio::sync::Mutex::new(writer));
        let count = sources.len();

        let mut copies = JoinSet::new();
        for (slot, source) in sources.into_iter().enumerate() {
            let writer = Arc::clone(&writer);
            copies.spawn(async move { (slot, copy_shared(source, &writer).await) });
        }

        let errors = Arc::clone(&self.errors);
        self.tasks.spawn(async move {
            let mut source_errors = MultiError::with_slots(COMBINE_ERRORS, count);

            while let Some(joined) = copies.join_next().await {
                match joined {
                    Ok((slot, Err(source))) => {
                        source_errors.set(slot, Some(ChainError::StreamCopy { source }));
                    }
                    Ok((slot, Ok(bytes))) => {
                        debug!(stage = owner, source = slot, bytes, "combined source exhausted");
                    }
                    Err(e) => warn!(stage = owner, error = %e, "combine copy task did not complete"),
                }
            }

            // last handle: the consumer sees end-of-stream only now
            drop(writer);

            if source_errors.has_error() {
                record(&errors, owner, ChainError::Multiple(source_errors));
            }
        });

        Box::new(reader)
    }

    /// Copy `source` into a stage's stdin until done or told to close
    pub(crate) fn feed(&mut self, index: usize, mut source: Source, mut stdin: ChildStdin) -> Arc<Notify> {
        let close = Arc::new(Notify::new());
        let signal = Arc::clone(&close);
        let errors = Arc::clone(&self.errors);

        self.tasks.spawn(async move {
            let result = tokio::select! {
                copied = tokio::io::copy(&mut source, &mut stdin) => copied.map(|_| ()),
                () = signal.notified() => {
                    debug!(stage = index, "stdin closed after stage exit");
                    Ok(())
                }
            };
            drop(stdin);

            if let Err(source) = result {
                record(&errors, index, ChainError::StreamCopy { source });
            }
        });

        close
    }

    /// Wait for every copy task and hand back the stream errors
    pub(crate) async fn finish(mut self) -> MultiError {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "stream task did not complete");
            }
        }

        let mut errors = self.errors.lock();
        std::mem::replace(&mut *errors, MultiError::new(STREAM_ERRORS))
    }

    /// Let the copy tasks run on without waiting for them; `then` runs once
    /// they have all finished
    pub(crate) fn detach_then(self, then: impl FnOnce() + Send + 'static) {
        tokio::spawn(async move {
            let errors = self.finish().await;
            if errors.has_error() {
                debug!(errors = %errors, "detached stream copies failed");
            }
            then();
        });
    }
}

fn record(errors: &Mutex<MultiError>, index: usize, error: ChainError) {
    warn!(stage = index, error = %error, "stream copy failed");
    if let Some(rejected) = errors.lock().set_if_empty(index, error) {
        debug!(stage = index, error = %rejected, "stage already has a stream error");
    }
}

/// Write everything read from `source` to every target in turn
async fn fan_out(mut source: Source, targets: &mut [Sink]) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        for target in targets.iter_mut() {
            target.write_all(&buf[..n]).await?;
        }
        total += n as u64;
    }

    for target in targets.iter_mut() {
        target.flush().await?;
    }

    Ok(total)
}

async fn copy_shared(mut source: Source, writer: &tokio::sync::Mutex<DuplexStream>) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.lock().await.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::streams::SharedBuffer;

    async fn read_all(mut source: Source) -> String {
        let mut out = String::new();
        source.read_to_string(&mut out).await.unwrap();
        out
    }

    fn source(text: &'static str) -> Source {
        Box::new(text.as_bytes())
    }

    #[tokio::test]
    async fn test_combine_keeps_every_source() {
        let mut router = StreamRouter::new(1);
        let merged = router.combine(0, vec![source("a\nb\n"), source("c\n")]);

        let text = read_all(merged).await;
        let errors = router.finish().await;

        let mut lines: Vec<_> = text.lines().collect();
        lines.sort_unstable();
        assert_eq!(lines, vec!["a", "b", "c"]);
        assert!(!errors.has_error());
    }

    #[tokio::test]
    async fn test_combine_ends_only_after_all_sources() {
        let mut router = StreamRouter::new(1);
        let (mut slow_writer, slow_reader) = tokio::io::duplex(64);
        let merged = router.combine(0, vec![source("fast\n"), Box::new(slow_reader)]);

        let reader = tokio::spawn(read_all(merged));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!reader.is_finished(), "merged stream ended before the slow source");

        slow_writer.write_all(b"slow\n").await.unwrap();
        drop(slow_writer);

        let text = reader.await.unwrap();
        assert!(text.contains("fast\n"));
        assert!(text.contains("slow\n"));
        router.finish().await;
    }

    #[tokio::test]
    async fn test_resolve_input_single_injection_skips_combine() {
        let mut router = StreamRouter::new(1);
        let input = router.resolve_input(0, None, vec![source("hello")]);

        let Some(StageInput::Reader(reader)) = input else {
            panic!("expected a reader");
        };
        assert_eq!(read_all(reader).await, "hello");
        router.finish().await;
    }

    #[tokio::test]
    async fn test_fan_out_fails_when_one_target_is_closed() {
        let good = SharedBuffer::new();
        let (closed, other_end) = tokio::io::duplex(16);
        drop(other_end);

        let mut targets: Vec<Sink> = vec![Box::new(good.clone()), Box::new(closed)];
        let result = fan_out(source("payload"), &mut targets).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fan_out_copies_to_all() {
        let a = SharedBuffer::new();
        let b = SharedBuffer::new();

        let mut targets: Vec<Sink> = vec![Box::new(a.clone()), Box::new(b.clone())];
        let copied = fan_out(source("same bytes"), &mut targets).await.unwrap();

        assert_eq!(copied, 10);
        assert_eq!(a.contents(), b.contents());
        assert_eq!(a.to_string_lossy(), "same bytes");
    }
}
