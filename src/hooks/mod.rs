// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Run hooks
//!
//! Hooks bracket a chain run: every pre-run hook fires, in registration
//! order, before any stage starts; every post-run hook fires, in
//! registration order, once all stages have been waited on, whatever the
//! outcome.

mod lazy_file;

pub use lazy_file::{FileMode, LazyFile};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{ChainError, MultiError, BUILD_ERRORS};

/// Something that must be prepared before a run and released after it
pub trait Hook: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> String;

    /// Called before any stage starts
    fn before_run(&self) -> std::io::Result<()> {
        Ok(())
    }

    /// Called after every stage has been waited on
    fn after_run(&self) {}
}

/// Ordered set of hooks owned by one chain
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook; it runs after those registered before it
    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every pre-run hook.
    ///
    /// All hooks run even when one fails; failures come back as a build
    /// aggregate with one slot per hook.
    pub fn before_run(&self) -> Result<(), MultiError> {
        let mut errors = MultiError::with_slots(BUILD_ERRORS, self.hooks.len());

        for (index, hook) in self.hooks.iter().enumerate() {
            debug!(hook = %hook.name(), "running pre-run hook");
            if let Err(source) = hook.before_run() {
                warn!(hook = %hook.name(), error = %source, "pre-run hook failed");
                errors.set(
                    index,
                    Some(ChainError::HookFailed {
                        name: hook.name(),
                        source,
                    }),
                );
            }
        }

        if errors.has_error() {
            Err(errors)
        } else {
            Ok(())
        }
    }

    /// Run every post-run hook
    pub fn after_run(&self) {
        for hook in &self.hooks {
            debug!(hook = %hook.name(), "running post-run hook");
            hook.after_run();
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name()))
            .finish()
    }
}
