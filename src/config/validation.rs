// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Chain definition validation
//!
//! Validates a definition before any process is started.

use std::collections::HashSet;
use std::path::Path;

use super::definition::{ChainDefinition, StageDefinition};

/// Chain definition validator
pub struct ChainValidator;

impl ChainValidator {
    /// Validate a chain definition
    pub fn validate(definition: &ChainDefinition) -> ValidationResult {
        let mut result = ValidationResult::new();

        if definition.stages.is_empty() {
            result.add_error("Chain has no stages defined");
        }

        let last = definition.stages.len().saturating_sub(1);
        for (index, stage) in definition.stages.iter().enumerate() {
            Self::validate_stage(index, stage, index == last, &mut result);
        }

        // Two lazy files on one path would clobber each other
        let mut seen = HashSet::new();
        for stage in &definition.stages {
            for target in stage.stdout_files.iter().chain(&stage.stderr_files) {
                if !seen.insert(&target.path) {
                    result.add_warning(&format!(
                        "File '{}' is the target of more than one redirection",
                        target.path.display()
                    ));
                }
            }
        }

        result
    }

    fn validate_stage(
        index: usize,
        stage: &StageDefinition,
        last: bool,
        result: &mut ValidationResult,
    ) {
        let label = stage.label();

        if stage.command.trim().is_empty() {
            result.add_error(&format!("Stage {}: command is empty", index));
        }

        if !last && !stage.forward_stdout && !stage.forward_stderr {
            result.add_error(&format!(
                "Stage {} ('{}'): forwards neither stdout nor stderr to the next stage",
                index, label
            ));
        }

        if last && stage.forward_stderr {
            result.add_warning(&format!(
                "Stage {} ('{}'): forward_stderr has no effect on the last stage, use stderr_files",
                index, label
            ));
        }

        if stage.timeout_ms == Some(0) {
            result.add_error(&format!(
                "Stage {} ('{}'): timeout_ms must be greater than zero",
                index, label
            ));
        }

        if stage.ignore_exit_codes.contains(&0) {
            result.add_warning(&format!(
                "Stage {} ('{}'): exit code 0 is never an error",
                index, label
            ));
        }
    }

    /// Programs that cannot be found (runtime validation)
    pub fn missing_programs(definition: &ChainDefinition) -> Vec<String> {
        let mut missing = Vec::new();

        for (index, stage) in definition.stages.iter().enumerate() {
            if stage.command.trim().is_empty() {
                continue;
            }

            let found = if stage.command.contains('/') {
                let path = Path::new(&stage.command);
                match stage.working_dir {
                    Some(ref dir) if path.is_relative() => dir.join(path).exists(),
                    _ => path.exists(),
                }
            } else {
                which::which(&stage.command).is_ok()
            };

            if !found {
                missing.push(format!(
                    "Stage {}: program '{}' not found",
                    index, stage.command
                ));
            }
        }

        missing
    }
}

/// Result of definition validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileTarget;
    use std::collections::BTreeMap;

    fn definition(stages: Vec<StageDefinition>) -> ChainDefinition {
        ChainDefinition {
            version: "1".into(),
            name: "test".into(),
            description: None,
            env: BTreeMap::new(),
            ignore_exit_codes: vec![],
            stages,
        }
    }

    #[test]
    fn test_validate_empty_chain() {
        let result = ChainValidator::validate(&definition(vec![]));
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("no stages"));
    }

    #[test]
    fn test_validate_silent_inner_stage() {
        let mut silent = StageDefinition::new("echo");
        silent.forward_stdout = false;

        let result = ChainValidator::validate(&definition(vec![silent, StageDefinition::new("cat")]));

        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("forwards neither")));
    }

    #[test]
    fn test_silent_last_stage_is_fine() {
        let mut last = StageDefinition::new("cat");
        last.forward_stdout = false;

        let result = ChainValidator::validate(&definition(vec![StageDefinition::new("echo"), last]));
        assert!(result.is_valid());
    }

    #[test]
    fn test_validate_empty_command_and_zero_timeout() {
        let mut stage = StageDefinition::new("  ");
        stage.timeout_ms = Some(0);

        let result = ChainValidator::validate(&definition(vec![stage]));

        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_warnings() {
        let target = FileTarget {
            path: "out.txt".into(),
            append: false,
        };
        let mut first = StageDefinition::new("echo");
        first.stdout_files.push(target.clone());
        let mut last = StageDefinition::new("cat");
        last.forward_stderr = true;
        last.stderr_files.push(target);

        let result = ChainValidator::validate(&definition(vec![first, last]));

        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_missing_programs() {
        let def = definition(vec![
            StageDefinition::new("sh"),
            StageDefinition::new("pipechain-test-no-such-program"),
            StageDefinition::new("/nonexistent/bin/tool"),
        ]);

        let missing = ChainValidator::missing_programs(&def);

        assert_eq!(missing.len(), 2);
        assert!(missing[0].contains("pipechain-test-no-such-program"));
    }
}
