// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Error policies
//!
//! A policy decides whether a stage's run error is real. It receives the
//! stage index, the stage command and the error; `true` keeps the error,
//! `false` records the stage as successful.

use std::sync::Arc;

use super::command::StageCommand;
use crate::errors::ChainError;

/// Predicate deciding whether a run error counts
pub type ErrorPolicy = Arc<dyn Fn(usize, &StageCommand, &ChainError) -> bool + Send + Sync>;

/// Wrap a closure as a policy
pub fn from_fn<F>(f: F) -> ErrorPolicy
where
    F: Fn(usize, &StageCommand, &ChainError) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ignore processes that exited with any of `codes`
pub fn ignore_exit_codes<I>(codes: I) -> ErrorPolicy
where
    I: IntoIterator<Item = i32>,
{
    let codes: Vec<i32> = codes.into_iter().collect();
    from_fn(move |_, _, err| match err.exit_code() {
        Some(code) => !codes.contains(&code),
        None => true,
    })
}

/// Ignore every failed exit status, including kills by a cancellation scope
pub fn ignore_exit_errors() -> ErrorPolicy {
    from_fn(|_, _, err| {
        !matches!(
            err,
            ChainError::ExitStatus { .. } | ChainError::Cancelled { .. }
        )
    })
}

/// Ignore every error
pub fn ignore_all() -> ErrorPolicy {
    from_fn(|_, _, _| false)
}

/// Keep every error
pub fn ignore_nothing() -> ErrorPolicy {
    from_fn(|_, _, _| true)
}

/// Apply `stage` if present, else `global`, else keep the error
pub(crate) fn is_real_error(
    stage: Option<&ErrorPolicy>,
    global: Option<&ErrorPolicy>,
    index: usize,
    command: &StageCommand,
    err: &ChainError,
) -> bool {
    match stage.or(global) {
        Some(policy) => policy(index, command, err),
        None => true,
    }
}
