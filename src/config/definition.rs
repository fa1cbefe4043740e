// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Chain definition structures
//!
//! Defines the schema for .pipechain.yaml files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncRead;

use super::validation::ChainValidator;
use crate::chain::{
    builder, ignore_exit_codes, CancelScope, ChainBuilder, FinalizedChain, Phase, StageBuilder,
    StageCommand,
};
use crate::errors::{ChainError, ChainResult};
use crate::hooks::FileMode;

/// Default definition file name
pub const DEFAULT_DEFINITION_FILE: &str = ".pipechain.yaml";

/// Chain definition from .pipechain.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDefinition {
    /// Definition version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Chain name
    pub name: String,

    /// Chain description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Environment variables added to every stage
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Exit codes ignored for stages without their own list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_exit_codes: Vec<i32>,

    /// Stages in chain order
    pub stages: Vec<StageDefinition>,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ChainDefinition {
    /// Load a definition from a YAML file
    pub fn from_file(path: &Path) -> ChainResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ChainError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml(yaml: &str) -> ChainResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize the definition to YAML
    pub fn to_yaml(&self) -> ChainResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Build a runnable chain. Fails if validation reports errors.
    ///
    /// Stage timeouts start counting here, so build right before running.
    pub fn build(&self) -> ChainResult<FinalizedChain> {
        self.assemble(builder())
    }

    /// Build a runnable chain whose first stage reads `readers`
    pub fn build_with_input<I, R>(&self, readers: I) -> ChainResult<FinalizedChain>
    where
        I: IntoIterator<Item = R>,
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.assemble(builder().with_input(readers))
    }

    fn assemble<P: Phase>(&self, start: ChainBuilder<P>) -> ChainResult<FinalizedChain> {
        let validation = ChainValidator::validate(self);
        if !validation.is_valid() {
            return Err(ChainError::InvalidDefinition {
                reason: validation.errors.join("; "),
                help: Some("Run 'pipechain validate' for details".to_string()),
            });
        }

        let mut stages = self.stages.iter();
        let Some(first) = stages.next() else {
            return Ok(start.finalize());
        };

        let mut chain = self.configure(start.join_command(first.to_command()), first);
        for stage in stages {
            chain = self.configure(chain.join_command(stage.to_command()), stage);
        }

        let mut finalized = chain.finalize();
        if !self.ignore_exit_codes.is_empty() {
            finalized = finalized
                .with_global_error_policy(ignore_exit_codes(self.ignore_exit_codes.clone()));
        }
        Ok(finalized)
    }

    fn configure(&self, mut chain: StageBuilder, stage: &StageDefinition) -> StageBuilder {
        chain = chain
            .forward_stdout(stage.forward_stdout)
            .forward_stderr(stage.forward_stderr);

        // stage variables win over global ones
        let env = self.env.iter().chain(stage.env.iter());
        chain = if stage.clear_env {
            chain.with_environment_map(env)
        } else {
            chain.with_additional_environment_map(env)
        };

        if let Some(ref dir) = stage.working_dir {
            chain = chain.with_working_directory(dir);
        }
        for target in &stage.stdout_files {
            chain = chain.with_output_file(&target.path, target.mode());
        }
        for target in &stage.stderr_files {
            chain = chain.with_error_file(&target.path, target.mode());
        }
        if !stage.ignore_exit_codes.is_empty() {
            chain = chain.with_error_policy(ignore_exit_codes(stage.ignore_exit_codes.clone()));
        }
        if let Some(ms) = stage.timeout_ms {
            chain = chain.with_cancel_scope(CancelScope::with_timeout(Duration::from_millis(ms)));
        }

        chain
    }

    /// Get all stage labels in order
    pub fn stage_labels(&self) -> Vec<String> {
        self.stages.iter().map(StageDefinition::label).collect()
    }
}

/// A single chain stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Optional label used in reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Program to run, looked up on PATH
    pub command: String,

    /// Program arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Environment variables for this stage
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Do not inherit the environment of pipechain itself
    #[serde(default, skip_serializing_if = "is_false")]
    pub clear_env: bool,

    /// Feed stdout to the next stage
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub forward_stdout: bool,

    /// Feed stderr to the next stage
    #[serde(default, skip_serializing_if = "is_false")]
    pub forward_stderr: bool,

    /// Files receiving a copy of stdout
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdout_files: Vec<FileTarget>,

    /// Files receiving a copy of stderr
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stderr_files: Vec<FileTarget>,

    /// Exit codes that do not count as failures
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_exit_codes: Vec<i32>,

    /// Kill the stage after this many milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StageDefinition {
    /// A stage running `command` with default routing
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            name: None,
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            clear_env: false,
            forward_stdout: true,
            forward_stderr: false,
            stdout_files: Vec::new(),
            stderr_files: Vec::new(),
            ignore_exit_codes: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Parse an inline `program arg arg` stage, split on whitespace
    pub fn parse_inline(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let mut stage = Self::new(words.next()?);
        stage.args = words.map(String::from).collect();
        Some(stage)
    }

    /// Name if set, else the command line
    pub fn label(&self) -> String {
        match self.name {
            Some(ref name) => name.clone(),
            None => self.to_command().to_string(),
        }
    }

    pub fn to_command(&self) -> StageCommand {
        StageCommand::new(&self.command).args(&self.args)
    }
}

/// A redirection target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileTarget {
    pub path: PathBuf,

    /// Append instead of truncating
    #[serde(default, skip_serializing_if = "is_false")]
    pub append: bool,
}

impl FileTarget {
    pub fn mode(&self) -> FileMode {
        if self.append {
            FileMode::Append
        } else {
            FileMode::Truncate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name: count-readmes
env:
  LC_ALL: C
stages:
  - command: ls
    args: ["-l"]
  - name: filter
    command: grep
    args: ["README"]
    forward_stderr: true
    stdout_files:
      - path: matches.txt
        append: true
  - command: wc
    args: ["-l"]
    ignore_exit_codes: [1]
"#;

    #[test]
    fn test_parse_defaults() {
        let def = ChainDefinition::from_yaml(SAMPLE).unwrap();

        assert_eq!(def.version, "1");
        assert_eq!(def.stages.len(), 3);
        assert!(def.stages[0].forward_stdout);
        assert!(!def.stages[0].forward_stderr);
        assert!(def.stages[1].forward_stderr);
        assert_eq!(def.stages[1].stdout_files[0].mode(), FileMode::Append);
        assert_eq!(def.env.get("LC_ALL").map(String::as_str), Some("C"));
    }

    #[test]
    fn test_labels() {
        let def = ChainDefinition::from_yaml(SAMPLE).unwrap();
        assert_eq!(def.stage_labels(), vec!["ls -l", "filter", "wc -l"]);
    }

    #[test]
    fn test_yaml_round_trip_keeps_routing() {
        let def = ChainDefinition::from_yaml(SAMPLE).unwrap();
        let yaml = def.to_yaml().unwrap();

        assert!(!yaml.contains("forward_stdout"));
        let reparsed = ChainDefinition::from_yaml(&yaml).unwrap();
        assert!(reparsed.stages[1].forward_stderr);
        assert_eq!(reparsed.stages[1].stdout_files, def.stages[1].stdout_files);
    }

    #[test]
    fn test_parse_inline() {
        let stage = StageDefinition::parse_inline("  grep -v  README ").unwrap();
        assert_eq!(stage.command, "grep");
        assert_eq!(stage.args, vec!["-v", "README"]);
        assert!(StageDefinition::parse_inline("   ").is_none());
    }

    #[test]
    fn test_missing_file() {
        let err = ChainDefinition::from_file(Path::new("/nonexistent/.pipechain.yaml")).unwrap_err();
        assert!(matches!(err, ChainError::FileReadError { .. }));
    }

    #[test]
    fn test_build_rejects_invalid_definition() {
        let def = ChainDefinition {
            version: "1".into(),
            name: "empty".into(),
            description: None,
            env: BTreeMap::new(),
            ignore_exit_codes: vec![],
            stages: vec![],
        };

        assert!(matches!(
            def.build(),
            Err(ChainError::InvalidDefinition { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_and_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        let matches = dir.path().join("matches.txt");

        let mut def = ChainDefinition::from_yaml(SAMPLE).unwrap();
        def.stages[0].working_dir = Some(dir.path().to_path_buf());
        def.stages[1].stdout_files[0].path = matches.clone();

        let (stdout, _, result) = def.build().unwrap().run_and_capture().await;

        result.unwrap();
        assert_eq!(stdout, "1\n");
        assert!(std::fs::read_to_string(&matches).unwrap().contains("README.md"));
    }

    #[tokio::test]
    async fn test_global_ignore_exit_codes() {
        let yaml = r#"
name: tolerant
ignore_exit_codes: [1]
stages:
  - command: sh
    args: ["-c", "exit 1"]
"#;
        let def = ChainDefinition::from_yaml(yaml).unwrap();
        def.build().unwrap().run().await.unwrap();
    }

    #[tokio::test]
    async fn test_build_with_input() {
        let def = ChainDefinition {
            version: "1".into(),
            name: "upper".into(),
            description: None,
            env: BTreeMap::new(),
            ignore_exit_codes: vec![],
            stages: vec![StageDefinition::parse_inline("tr a-z A-Z").unwrap()],
        };

        let (stdout, _, result) = def
            .build_with_input([b"abc\n".as_slice()])
            .unwrap()
            .run_and_capture()
            .await;

        result.unwrap();
        assert_eq!(stdout, "ABC\n");
    }
}
