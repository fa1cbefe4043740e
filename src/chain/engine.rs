// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Chain execution
//!
//! A run proceeds in fixed phases:
//!
//! 1. build errors short-circuit everything
//! 2. pre-run hooks
//! 3. every stage is started, first to last, wiring its input from what the
//!    previous stage produced
//! 4. stages are waited on last to first; after each wait the stage's stdin
//!    is closed from our side so a stuck predecessor cannot block the chain
//! 5. error policies filter run errors
//! 6. every background copy is awaited
//! 7. post-run hooks
//!
//! When a stage fails to start, the error comes back at once and copies that
//! are already running are left to finish. Post-run hooks then wait for
//! those copies, so a file sink is not closed while data still flows into it.
//!
//! Waiting in reverse order matters: when a consumer exits early its input
//! pipe closes, the producer gets a write error and exits in turn.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cancel::CancelScope;
use super::command::StageCommand;
use super::policy::{is_real_error, ErrorPolicy};
use super::router::{ProcessStream, StageInput, StageOutputs, StreamRouter};
use super::stage::{ChainContext, StageDescriptor};
use super::streams::{Sink, Source};
use crate::errors::{ChainError, ChainResult, MultiError, RUN_ERRORS};
use crate::hooks::HookRegistry;

/// How a stage's stdin gets closed once the stage has been waited on
enum StdinHandle {
    /// Stdin was null; nothing to close
    Detached,
    /// Stdin is the predecessor's pipe, kept open by the spawning command
    Inherited(Command),
    /// Stdin is fed by a copy task
    Fed(Arc<Notify>),
}

impl StdinHandle {
    fn close(self) {
        match self {
            Self::Detached => {}
            Self::Inherited(command) => drop(command),
            Self::Fed(signal) => signal.notify_one(),
        }
    }
}

struct RunningStage {
    index: usize,
    command: StageCommand,
    policy: Option<ErrorPolicy>,
    waiter: JoinHandle<ChainResult<()>>,
    stdin: StdinHandle,
}

/// Run a finalized chain to completion
pub(crate) async fn execute(ctx: ChainContext) -> ChainResult<()> {
    let ChainContext {
        stages,
        inputs,
        stdout_targets,
        stderr_targets,
        build_errors,
        global_policy,
        hooks,
    } = ctx;

    if build_errors.has_error() {
        return Err(build_errors.into());
    }
    if stages.is_empty() {
        return Ok(());
    }

    if let Err(errors) = hooks.before_run() {
        hooks.after_run();
        return Err(errors.into());
    }

    let mut plan = Plan {
        inputs,
        stdout_targets,
        stderr_targets,
    };
    run_stages(stages, &mut plan, global_policy.as_ref(), hooks).await
}

/// Chain-level endpoints, consumed while stages start
struct Plan {
    inputs: Vec<Source>,
    stdout_targets: Vec<Sink>,
    stderr_targets: Vec<Sink>,
}

async fn run_stages(
    stages: Vec<StageDescriptor>,
    plan: &mut Plan,
    global_policy: Option<&ErrorPolicy>,
    hooks: HookRegistry,
) -> ChainResult<()> {
    let count = stages.len();
    let mut router = StreamRouter::new(count);

    let running = match start_all(stages, plan, &mut router) {
        Ok(running) => running,
        Err(err) => {
            warn!(error = %err, "chain aborted during start");
            router.detach_then(move || hooks.after_run());
            return Err(err);
        }
    };

    let mut run_errors = MultiError::with_slots(RUN_ERRORS, count);
    for stage in running.into_iter().rev() {
        let RunningStage {
            index,
            command,
            policy,
            waiter,
            stdin,
        } = stage;

        let outcome = match waiter.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ChainError::WaitFailed {
                source: io::Error::other(e),
            }),
        };
        stdin.close();

        match outcome {
            Ok(()) => debug!(stage = index, command = %command, "stage finished"),
            Err(err) => {
                if is_real_error(policy.as_ref(), global_policy, index, &command, &err) {
                    debug!(stage = index, command = %command, error = %err, "stage failed");
                    run_errors.set(index, Some(err));
                } else {
                    debug!(stage = index, command = %command, error = %err, "stage error ignored by policy");
                }
            }
        }
    }

    let stream_errors = router.finish().await;
    hooks.after_run();

    match (run_errors.has_error(), stream_errors.has_error()) {
        (true, true) => Err(MultiError::composite(run_errors, stream_errors).into()),
        (true, false) => Err(run_errors.into()),
        (false, true) => Err(stream_errors.into()),
        (false, false) => {
            info!(stages = count, "chain completed");
            Ok(())
        }
    }
}

fn start_all(
    stages: Vec<StageDescriptor>,
    plan: &mut Plan,
    router: &mut StreamRouter,
) -> ChainResult<Vec<RunningStage>> {
    let count = stages.len();
    let mut running = Vec::with_capacity(count);
    let mut upstream: Option<StageInput> = None;

    for (index, stage) in stages.into_iter().enumerate() {
        let last = index + 1 == count;
        let StageDescriptor {
            command,
            forward_stdout,
            forward_stderr,
            stdout_forks,
            stderr_forks,
            mut injected,
            error_policy,
            appliers,
        } = stage;

        if index == 0 {
            let mut first = std::mem::take(&mut plan.inputs);
            first.append(&mut injected);
            injected = first;
        }
        let input = router.resolve_input(index, upstream.take(), injected);

        let (stdout_sinks, stderr_sinks) = if last {
            (
                std::mem::take(&mut plan.stdout_targets),
                std::mem::take(&mut plan.stderr_targets),
            )
        } else {
            (stdout_forks, stderr_forks)
        };
        let pipe_stdout = !stdout_sinks.is_empty() || (!last && forward_stdout);
        let pipe_stderr = !stderr_sinks.is_empty() || (!last && forward_stderr);

        let mut process = command.to_command();
        let mut feed = None;
        let inherits_pipe = matches!(input, Some(StageInput::Process(_)));
        match input {
            None => {
                process.stdin(Stdio::null());
            }
            Some(StageInput::Process(stream)) => {
                let stdio = stream
                    .into_stdio()
                    .map_err(|e| ChainError::start_failed(index, command.to_string(), e))?;
                process.stdin(stdio);
            }
            Some(StageInput::Reader(source)) => {
                process.stdin(Stdio::piped());
                feed = Some(source);
            }
        }
        process.stdout(piped_or_null(pipe_stdout));
        process.stderr(piped_or_null(pipe_stderr));
        for apply in appliers {
            apply(index, &mut process);
        }

        let mut child = process
            .spawn()
            .map_err(|e| ChainError::start_failed(index, command.to_string(), e))?;
        debug!(stage = index, command = %command, pid = ?child.id(), "stage started");

        let stdin = match (feed, child.stdin.take()) {
            (Some(source), Some(pipe)) => StdinHandle::Fed(router.feed(index, source, pipe)),
            _ if inherits_pipe => StdinHandle::Inherited(process),
            _ => StdinHandle::Detached,
        };

        let stdout = child.stdout.take().map(ProcessStream::Stdout);
        let stderr = child.stderr.take().map(ProcessStream::Stderr);
        if last {
            if let Some(stream) = stdout {
                router.drain(index, stream, stdout_sinks);
            }
            if let Some(stream) = stderr {
                router.drain(index, stream, stderr_sinks);
            }
        } else {
            upstream = router.route_outputs(
                index,
                StageOutputs {
                    stdout,
                    stderr,
                    forward_stdout,
                    forward_stderr,
                    stdout_forks: stdout_sinks,
                    stderr_forks: stderr_sinks,
                },
            );
        }

        let scope = command.get_cancel_scope().cloned();
        running.push(RunningStage {
            index,
            command,
            policy: error_policy,
            waiter: tokio::spawn(wait_stage(index, child, scope)),
            stdin,
        });
    }

    Ok(running)
}

fn piped_or_null(piped: bool) -> Stdio {
    if piped {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

/// Wait for a stage, killing it if its scope fires first
async fn wait_stage(index: usize, mut child: Child, scope: Option<CancelScope>) -> ChainResult<()> {
    let Some(scope) = scope else {
        return exit_result(child.wait().await);
    };

    let finished = tokio::select! {
        status = child.wait() => Some(status),
        () = scope.cancelled() => None,
    };
    if let Some(status) = finished {
        return exit_result(status);
    }

    debug!(stage = index, pid = ?child.id(), "cancellation scope fired, killing stage");
    if let Err(e) = child.start_kill() {
        debug!(stage = index, error = %e, "kill failed, stage probably exited");
    }

    match child.wait().await {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(ChainError::Cancelled {
            status: Some(status),
        }),
        Err(_) => Err(ChainError::Cancelled { status: None }),
    }
}

fn exit_result(status: io::Result<ExitStatus>) -> ChainResult<()> {
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(ChainError::ExitStatus { status }),
        Err(source) => Err(ChainError::WaitFailed { source }),
    }
}
