// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Stage commands
//!
//! A [`StageCommand`] describes the process one stage launches: program,
//! arguments, working directory, environment and an optional cancellation
//! scope. Streams are never configured here; the chain owns them.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use super::cancel::CancelScope;
use crate::errors::{ChainError, ChainResult};

/// Ordered string-to-string environment mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    /// An empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a flat `key, value, key, value, ...` list
    pub fn from_flat<I, S>(values: I) -> ChainResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.len() % 2 != 0 {
            return Err(ChainError::InvalidEnvironmentArguments {
                count: values.len(),
            });
        }

        let mut env = Self::new();
        let mut iter = values.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            env.set(key, value);
        }
        Ok(env)
    }

    /// Build from `KEY=VALUE` assignments
    pub fn from_assignments<I, S>(pairs: I) -> ChainResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut env = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ChainError::InvalidEnvironmentPair {
                    pair: pair.to_string(),
                });
            };
            if key.is_empty() {
                return Err(ChainError::InvalidEnvironmentPair {
                    pair: pair.to_string(),
                });
            }
            env.set(key, value);
        }
        Ok(env)
    }

    /// Insert or replace a variable, keeping its first position
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((key, value)),
        }
    }

    /// Look a variable up
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Add every variable of `other`, overriding existing keys
    pub fn extend(&mut self, other: Environment) {
        for (key, value) in other.vars {
            self.set(key, value);
        }
    }

    /// Variables in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut env = Self::new();
        for (key, value) in iter {
            env.set(key, value);
        }
        env
    }
}

/// The process a stage runs
#[derive(Debug, Clone)]
pub struct StageCommand {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Environment,
    clear_env: bool,
    cancel_scope: Option<CancelScope>,
}

impl StageCommand {
    /// A command running `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Environment::new(),
            clear_env: false,
            cancel_scope: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in `dir` instead of the current directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set one environment variable on top of whatever is inherited
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(key, value);
        self
    }

    /// Do not inherit the environment of the current process
    pub fn env_clear(mut self) -> Self {
        self.clear_env = true;
        self
    }

    /// Kill the process when `scope` fires
    pub fn cancel_scope(mut self, scope: CancelScope) -> Self {
        self.cancel_scope = Some(scope);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Whether the process environment is inherited
    pub fn inherits_env(&self) -> bool {
        !self.clear_env
    }

    pub fn get_cancel_scope(&self) -> Option<&CancelScope> {
        self.cancel_scope.as_ref()
    }

    pub(crate) fn set_working_dir(&mut self, dir: PathBuf) {
        self.working_dir = Some(dir);
    }

    pub(crate) fn set_cancel_scope(&mut self, scope: CancelScope) {
        self.cancel_scope = Some(scope);
    }

    /// Replace the environment; the process environment is no longer inherited
    pub(crate) fn replace_env(&mut self, env: Environment) {
        self.env = env;
        self.clear_env = true;
    }

    /// Add to the environment without touching inheritance
    pub(crate) fn extend_env(&mut self, env: Environment) {
        self.env.extend(env);
    }

    /// Materialize a tokio command without any stdio configured
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if self.clear_env {
            cmd.env_clear();
        }
        cmd.envs(self.env.iter());

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd
    }
}

impl fmt::Display for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
