// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Error types
//!
//! Every failure a chain can produce is a [`ChainError`]. Failures that are
//! collected per stage rather than short-circuited are grouped in a
//! [`MultiError`], which can itself be nested inside a `ChainError`.

mod aggregate;

pub use aggregate::{
    MultiError, BUILD_ERRORS, COMBINE_ERRORS, COMPOSITE_ERRORS, RUN_ERRORS, STREAM_ERRORS,
};

use miette::Diagnostic;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Result type for pipechain operations
pub type ChainResult<T> = Result<T, ChainError>;

/// Main error type for pipechain
#[derive(Error, Debug, Diagnostic)]
pub enum ChainError {
    // ─────────────────────────────────────────────────────────────────────────
    // Build Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("invalid stream configuration")]
    #[diagnostic(
        code(pipechain::invalid_stream_configuration),
        help("A stage followed by another stage must forward its stdout, its stderr, or both")
    )]
    InvalidStreamConfiguration,

    #[error("invalid count of environment arguments")]
    #[diagnostic(
        code(pipechain::invalid_environment_arguments),
        help("Environment arguments are key/value pairs, got {count} values")
    )]
    InvalidEnvironmentArguments { count: usize },

    #[error("invalid environment pair '{pair}'")]
    #[diagnostic(
        code(pipechain::invalid_environment_pair),
        help("Environment pairs must look like KEY=VALUE")
    )]
    InvalidEnvironmentPair { pair: String },

    #[error("hook '{name}' failed: {source}")]
    #[diagnostic(code(pipechain::hook_failed))]
    HookFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("failed to start command '{command}': {source}")]
    #[diagnostic(code(pipechain::start_failed))]
    StartFailed {
        index: usize,
        command: String,
        #[source]
        source: std::io::Error,
        #[help]
        help: Option<String>,
    },

    #[error("{status}")]
    #[diagnostic(code(pipechain::exit_status))]
    ExitStatus { status: ExitStatus },

    #[error("command was cancelled")]
    #[diagnostic(code(pipechain::cancelled))]
    Cancelled { status: Option<ExitStatus> },

    #[error("failed to wait for command: {source}")]
    #[diagnostic(code(pipechain::wait_failed))]
    WaitFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("stream copy failed: {source}")]
    #[diagnostic(code(pipechain::stream_copy_failed))]
    StreamCopy {
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    #[diagnostic(code(pipechain::multiple))]
    Multiple(MultiError),

    // ─────────────────────────────────────────────────────────────────────────
    // Definition File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(pipechain::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Invalid chain definition: {reason}")]
    #[diagnostic(code(pipechain::invalid_definition))]
    InvalidDefinition {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(pipechain::yaml_error))]
    Yaml { message: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(pipechain::io_error))]
    Io { message: String },
}

impl From<std::io::Error> for ChainError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for ChainError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<MultiError> for ChainError {
    fn from(e: MultiError) -> Self {
        Self::Multiple(e)
    }
}

impl ChainError {
    /// Create a start error, adding a hint when the program could not be found
    pub fn start_failed(index: usize, command: String, source: std::io::Error) -> Self {
        let help = match source.kind() {
            std::io::ErrorKind::NotFound => {
                Some("Check that the program exists and is on your PATH".to_string())
            }
            std::io::ErrorKind::PermissionDenied => {
                Some("Check that the program is executable".to_string())
            }
            _ => None,
        };

        Self::StartFailed {
            index,
            command,
            source,
            help,
        }
    }

    /// Whether this error counts as a failure.
    ///
    /// Only a nested aggregate can be "empty": it reports its own flag.
    pub fn is_failure(&self) -> bool {
        match self {
            Self::Multiple(inner) => inner.has_error(),
            _ => true,
        }
    }

    /// The nested aggregate, if this error is one
    pub fn as_multiple(&self) -> Option<&MultiError> {
        match self {
            Self::Multiple(inner) => Some(inner),
            _ => None,
        }
    }

    /// The exit status carried by a run error, if any
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            Self::ExitStatus { status } => Some(*status),
            Self::Cancelled { status } => *status,
            _ => None,
        }
    }

    /// The exit code of a process that exited normally with a failure code
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExitStatus { status } => status.code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_empty_aggregate_is_not_a_failure() {
        let empty = MultiError::with_slots("inner", 2);
        assert!(!ChainError::Multiple(empty).is_failure());
        assert!(ChainError::InvalidStreamConfiguration.is_failure());
    }

    #[test]
    fn test_start_failed_help_for_missing_program() {
        let err = ChainError::start_failed(
            1,
            "nope".into(),
            std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        );

        assert!(err.to_string().starts_with("failed to start command"));
        let ChainError::StartFailed { help, index, .. } = err else {
            panic!("expected a start error");
        };
        assert_eq!(index, 1);
        assert!(help.is_some());
    }
}
