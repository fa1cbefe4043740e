// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Fluent chain construction
//!
//! The builder moves through three phases, each a distinct type, so only
//! meaningful calls are available at each point:
//!
//! ```text
//!   builder() ── with_input ──▶ ChainBuilder<Linked>
//!       │                              │
//!       └──────────── join ────────────┴──▶ StageBuilder ── join ──▶ StageBuilder
//!                                                 │
//!                                             finalize
//!                                                 ▼
//!                                          FinalizedChain ── run
//! ```
//!
//! Configuration mistakes never panic. They are recorded against the stage
//! being configured and returned, all at once, by `run`.

use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;

use super::cancel::CancelScope;
use super::command::{Environment, StageCommand};
use super::engine;
use super::policy::ErrorPolicy;
use super::stage::{ChainContext, StageDescriptor};
use super::streams::{sinks, sources, SharedBuffer};
use crate::errors::{ChainError, ChainResult, MultiError};
use crate::hooks::{FileMode, Hook, LazyFile};

/// Phase before any input or stage was added
#[derive(Debug)]
pub struct Fresh;

/// Phase after the chain received its inputs
#[derive(Debug)]
pub struct Linked;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Fresh {}
    impl Sealed for super::Linked {}
}

/// Marker for the phases a [`ChainBuilder`] can be in
pub trait Phase: sealed::Sealed {}
impl Phase for Fresh {}
impl Phase for Linked {}

/// Start building a chain
pub fn builder() -> ChainBuilder<Fresh> {
    ChainBuilder {
        ctx: ChainContext::new(),
        _phase: PhantomData,
    }
}

/// A chain with no stages yet
pub struct ChainBuilder<P: Phase> {
    ctx: ChainContext,
    _phase: PhantomData<P>,
}

impl ChainBuilder<Fresh> {
    /// Feed `readers` into the first stage's stdin.
    ///
    /// Several readers are merged into one stream, read in parallel.
    pub fn with_input<I, R>(mut self, readers: I) -> ChainBuilder<Linked>
    where
        I: IntoIterator<Item = R>,
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.ctx.inputs.extend(sources(readers));
        ChainBuilder {
            ctx: self.ctx,
            _phase: PhantomData,
        }
    }
}

impl<P: Phase> ChainBuilder<P> {
    /// Add the first stage
    pub fn join<I, S>(self, program: impl Into<String>, args: I) -> StageBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.join_command(StageCommand::new(program).args(args))
    }

    /// Add a preconfigured command as the first stage
    pub fn join_command(self, command: StageCommand) -> StageBuilder {
        StageBuilder::begin(self.ctx, command)
    }

    /// Finish a chain with no stages; running it does nothing
    pub fn finalize(self) -> FinalizedChain {
        FinalizedChain { ctx: self.ctx }
    }
}

/// Configures the most recently joined stage
pub struct StageBuilder {
    ctx: ChainContext,
    current: StageDescriptor,
    index: usize,
}

impl StageBuilder {
    fn begin(mut ctx: ChainContext, command: StageCommand) -> Self {
        let index = ctx.begin_stage();
        Self {
            ctx,
            current: StageDescriptor::new(command),
            index,
        }
    }

    fn commit(mut self) -> ChainContext {
        self.ctx.stages.push(self.current);
        self.ctx
    }

    fn record(&mut self, error: ChainError) {
        self.ctx.record_build_error(self.index, error);
    }

    /// Append a stage reading this stage's forwarded output
    pub fn join<I, S>(self, program: impl Into<String>, args: I) -> StageBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.join_command(StageCommand::new(program).args(args))
    }

    /// Append a preconfigured command as the next stage
    pub fn join_command(self, command: StageCommand) -> StageBuilder {
        StageBuilder::begin(self.commit(), command)
    }

    /// End the chain. The last stage's forks become the chain's outputs.
    pub fn finalize(mut self) -> FinalizedChain {
        self.ctx.stdout_targets = std::mem::take(&mut self.current.stdout_forks);
        self.ctx.stderr_targets = std::mem::take(&mut self.current.stderr_forks);
        FinalizedChain { ctx: self.commit() }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stream routing
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether stdout feeds the next stage (default: yes)
    pub fn forward_stdout(mut self, forward: bool) -> Self {
        self.current.forward_stdout = forward;
        self
    }

    /// Whether stderr feeds the next stage (default: no)
    pub fn forward_stderr(mut self, forward: bool) -> Self {
        self.current.forward_stderr = forward;
        self
    }

    /// Send stderr to the next stage as well as stdout
    pub fn forward_error(self) -> Self {
        self.forward_stderr(true)
    }

    /// Keep stdout away from the next stage
    pub fn discard_stdout(self) -> Self {
        self.forward_stdout(false)
    }

    /// Replace the stdout forks
    pub fn with_output_forks<I, W>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.current.stdout_forks = sinks(targets);
        self
    }

    /// Add stdout forks
    pub fn with_additional_output_forks<I, W>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.current.stdout_forks.extend(sinks(targets));
        self
    }

    /// Replace the stderr forks
    pub fn with_error_forks<I, W>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.current.stderr_forks = sinks(targets);
        self
    }

    /// Add stderr forks
    pub fn with_additional_error_forks<I, W>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.current.stderr_forks.extend(sinks(targets));
        self
    }

    /// Copy stdout into a file, opened when the chain runs
    pub fn with_output_file(mut self, path: impl Into<PathBuf>, mode: FileMode) -> Self {
        let file = self.lazy_file(path, mode);
        self.current.stdout_forks.push(Box::new(file));
        self
    }

    /// Copy stderr into a file, opened when the chain runs
    pub fn with_error_file(mut self, path: impl Into<PathBuf>, mode: FileMode) -> Self {
        let file = self.lazy_file(path, mode);
        self.current.stderr_forks.push(Box::new(file));
        self
    }

    fn lazy_file(&mut self, path: impl Into<PathBuf>, mode: FileMode) -> LazyFile {
        let file = LazyFile::new(path, mode);
        self.ctx.hooks.register(Arc::new(file.clone()) as Arc<dyn Hook>);
        file
    }

    /// Merge extra readers into this stage's stdin
    pub fn with_injections<I, R>(mut self, readers: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.current.injected.extend(sources(readers));
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Environment
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace the environment with a flat `key, value, ...` list
    pub fn with_environment<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match Environment::from_flat(values) {
            Ok(env) => self.current.command.replace_env(env),
            Err(e) => self.record(e),
        }
        self
    }

    /// Replace the environment with a mapping
    pub fn with_environment_map<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.current.command.replace_env(vars.into_iter().collect());
        self
    }

    /// Replace the environment with `KEY=VALUE` assignments
    pub fn with_environment_pairs<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match Environment::from_assignments(pairs) {
            Ok(env) => self.current.command.replace_env(env),
            Err(e) => self.record(e),
        }
        self
    }

    /// Add a flat `key, value, ...` list to the environment
    pub fn with_additional_environment<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match Environment::from_flat(values) {
            Ok(env) => self.current.command.extend_env(env),
            Err(e) => self.record(e),
        }
        self
    }

    /// Add a mapping to the environment
    pub fn with_additional_environment_map<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.current.command.extend_env(vars.into_iter().collect());
        self
    }

    /// Add `KEY=VALUE` assignments to the environment
    pub fn with_additional_environment_pairs<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match Environment::from_assignments(pairs) {
            Ok(env) => self.current.command.extend_env(env),
            Err(e) => self.record(e),
        }
        self
    }

    /// Run with no environment at all
    pub fn with_empty_environment(mut self) -> Self {
        self.current.command.replace_env(Environment::new());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Process
    // ─────────────────────────────────────────────────────────────────────────

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current.command.set_working_dir(dir.into());
        self
    }

    /// Decide which of this stage's run errors count; overrides the global policy
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.current.error_policy = Some(policy);
        self
    }

    /// Kill this stage when `scope` fires
    pub fn with_cancel_scope(mut self, scope: CancelScope) -> Self {
        self.current.command.set_cancel_scope(scope);
        self
    }

    /// Adjust the raw process right before it starts.
    ///
    /// Stdio set here is overwritten by the chain's own wiring unless
    /// applied deliberately to replace it.
    pub fn apply<F>(mut self, f: F) -> Self
    where
        F: FnOnce(usize, &mut Command) + Send + 'static,
    {
        self.current.appliers.push(Box::new(f));
        self
    }
}

/// A complete chain, ready to run once
pub struct FinalizedChain {
    ctx: ChainContext,
}

impl FinalizedChain {
    /// Replace where the last stage's stdout goes
    pub fn with_output<I, W>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.ctx.stdout_targets = sinks(targets);
        self
    }

    /// Add destinations for the last stage's stdout
    pub fn with_additional_output<I, W>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.ctx.stdout_targets.extend(sinks(targets));
        self
    }

    /// Replace where the last stage's stderr goes
    pub fn with_error<I, W>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.ctx.stderr_targets = sinks(targets);
        self
    }

    /// Add destinations for the last stage's stderr
    pub fn with_additional_error<I, W>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.ctx.stderr_targets.extend(sinks(targets));
        self
    }

    /// Policy for stages that have none of their own
    pub fn with_global_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.ctx.global_policy = Some(policy);
        self
    }

    pub fn stage_count(&self) -> usize {
        self.ctx.stages.len()
    }

    /// Errors recorded while building; `run` returns them if any is set
    pub fn build_errors(&self) -> &MultiError {
        &self.ctx.build_errors
    }

    /// Run every stage to completion
    pub async fn run(self) -> ChainResult<()> {
        engine::execute(self.ctx).await
    }

    /// Run and collect the last stage's stdout and stderr as text
    pub async fn run_and_capture(self) -> (String, String, ChainResult<()>) {
        let stdout = SharedBuffer::new();
        let stderr = SharedBuffer::new();

        let result = self
            .with_additional_output([stdout.clone()])
            .with_additional_error([stderr.clone()])
            .run()
            .await;

        (stdout.to_string_lossy(), stderr.to_string_lossy(), result)
    }
}

impl fmt::Display for FinalizedChain {
    /// `a | b |& c`, where `|&` marks a stage that also forwards stderr
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stages = self.ctx.stages.iter().peekable();
        while let Some(stage) = stages.next() {
            write!(f, "{}", stage.command)?;
            if stages.peek().is_some() {
                let pipe = match (stage.forward_stdout, stage.forward_stderr) {
                    (true, true) => "|&",
                    (false, true) => "2>|",
                    _ => "|",
                };
                write!(f, " {} ", pipe)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FinalizedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizedChain")
            .field("chain", &self.to_string())
            .field("hooks", &self.ctx.hooks)
            .field("build_errors", &self.ctx.build_errors)
            .finish()
    }
}
