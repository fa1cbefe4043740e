// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Stage descriptors and the build context they accumulate in

use tokio::process::Command;
use tracing::debug;

use super::command::StageCommand;
use super::policy::ErrorPolicy;
use super::streams::{Sink, Source};
use crate::errors::{ChainError, MultiError, BUILD_ERRORS};
use crate::hooks::HookRegistry;

/// Low-level adjustment applied to a stage's process right before it starts
pub(crate) type CommandApplier = Box<dyn FnOnce(usize, &mut Command) + Send>;

/// One stage as configured by the builder
pub(crate) struct StageDescriptor {
    pub command: StageCommand,
    pub forward_stdout: bool,
    pub forward_stderr: bool,
    pub stdout_forks: Vec<Sink>,
    pub stderr_forks: Vec<Sink>,
    pub injected: Vec<Source>,
    pub error_policy: Option<ErrorPolicy>,
    pub appliers: Vec<CommandApplier>,
}

impl StageDescriptor {
    pub fn new(command: StageCommand) -> Self {
        Self {
            command,
            forward_stdout: true,
            forward_stderr: false,
            stdout_forks: Vec::new(),
            stderr_forks: Vec::new(),
            injected: Vec::new(),
            error_policy: None,
            appliers: Vec::new(),
        }
    }

    /// Whether anything of this stage reaches the stage after it
    pub fn routes_to_next(&self) -> bool {
        self.forward_stdout || self.forward_stderr
    }
}

/// Everything a chain collects between `builder()` and `run()`
pub(crate) struct ChainContext {
    pub stages: Vec<StageDescriptor>,
    pub inputs: Vec<Source>,
    pub stdout_targets: Vec<Sink>,
    pub stderr_targets: Vec<Sink>,
    pub build_errors: MultiError,
    pub global_policy: Option<ErrorPolicy>,
    pub hooks: HookRegistry,
}

impl ChainContext {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            inputs: Vec::new(),
            stdout_targets: Vec::new(),
            stderr_targets: Vec::new(),
            build_errors: MultiError::new(BUILD_ERRORS),
            global_policy: None,
            hooks: HookRegistry::new(),
        }
    }

    /// Reserve a build-error slot for the stage about to be configured.
    ///
    /// Joining a stage after one that forwards nothing is a build error of
    /// the earlier stage.
    pub fn begin_stage(&mut self) -> usize {
        let index = self.stages.len();
        self.build_errors.set(index, None);

        let dangling = self.stages.last().is_some_and(|prev| !prev.routes_to_next());
        if dangling {
            self.record_build_error(index - 1, ChainError::InvalidStreamConfiguration);
        }

        index
    }

    /// Record a build error; the first one per stage wins
    pub fn record_build_error(&mut self, index: usize, error: ChainError) {
        if let Some(rejected) = self.build_errors.set_if_empty(index, error) {
            debug!(stage = index, error = %rejected, "stage already has a build error");
        }
    }
}
