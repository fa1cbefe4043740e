// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Per-stage error aggregation
//!
//! A [`MultiError`] keeps one optional error per stage, in stage order, so a
//! failure can always be correlated with the stage that produced it.

use std::fmt;

use super::ChainError;

/// Label of the aggregate returned for build errors
pub const BUILD_ERRORS: &str = "one or more chain build errors occurred";
/// Label of the aggregate collecting stage exit failures
pub const RUN_ERRORS: &str = "one or more commands returned an error";
/// Label of the aggregate collecting failed background copies
pub const STREAM_ERRORS: &str = "one or more command stream copies failed";
/// Label of the aggregate collecting the sources of one merged stream
pub const COMBINE_ERRORS: &str = "one or more combined input streams failed";
/// Label of the top-level aggregate wrapping run and stream errors
pub const COMPOSITE_ERRORS: &str = "run and stream errors occurred";

/// An ordered collection of optional errors plus a label
#[derive(Debug)]
pub struct MultiError {
    label: String,
    errors: Vec<Option<ChainError>>,
    has_error: bool,
}

impl MultiError {
    /// Create an empty aggregate
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            errors: Vec::new(),
            has_error: false,
        }
    }

    /// Create an aggregate with `len` empty slots
    pub fn with_slots(label: impl Into<String>, len: usize) -> Self {
        let mut aggregate = Self::new(label);
        aggregate.errors.resize_with(len, || None);
        aggregate
    }

    /// Wrap a run aggregate and a stream aggregate into one
    pub(crate) fn composite(run: MultiError, stream: MultiError) -> Self {
        let mut aggregate = Self::new(COMPOSITE_ERRORS);
        aggregate.add(Some(ChainError::Multiple(run)));
        aggregate.add(Some(ChainError::Multiple(stream)));
        aggregate
    }

    /// Append a slot
    pub fn add(&mut self, error: Option<ChainError>) {
        self.errors.push(error);
        self.recompute();
    }

    /// Replace the slot at `index`, growing the aggregate if needed
    pub fn set(&mut self, index: usize, error: Option<ChainError>) {
        if index >= self.errors.len() {
            self.errors.resize_with(index + 1, || None);
        }
        self.errors[index] = error;
        self.recompute();
    }

    /// Fill the slot at `index` unless it already holds an error.
    ///
    /// Returns the rejected error when the slot was taken.
    pub fn set_if_empty(&mut self, index: usize, error: ChainError) -> Option<ChainError> {
        match self.errors.get(index) {
            Some(Some(_)) => Some(error),
            _ => {
                self.set(index, Some(error));
                None
            }
        }
    }

    /// Whether any slot holds a real failure
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    /// The label rendered in front of the slots
    pub fn label(&self) -> &str {
        &self.label
    }

    /// All slots in order
    pub fn errors(&self) -> &[Option<ChainError>] {
        &self.errors
    }

    /// The error at `index`, if the slot exists and is filled
    pub fn get(&self, index: usize) -> Option<&ChainError> {
        self.errors.get(index).and_then(Option::as_ref)
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether the aggregate has no slots at all
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    fn recompute(&mut self) {
        self.has_error = self.errors.iter().flatten().any(ChainError::is_failure);
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [", self.label)?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{} - ", i)?;
            if let Some(error) = error {
                write!(f, "{}", error)?;
            }
        }
        write!(f, "]")
    }
}

impl std::error::Error for MultiError {}
