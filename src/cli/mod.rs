// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for pipechain.

pub mod run;
pub mod stdin;
pub mod validate;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use crate::config::DEFAULT_DEFINITION_FILE;
use crate::errors::{ChainError, COMBINE_ERRORS};

/// Process chain runner
///
/// Run external programs as a chain, with control over where each stage's
/// stdout and stderr go.
#[derive(Parser, Debug)]
#[clap(
    name = "pipechain",
    version,
    about = "Run chains of processes with explicit stream routing",
    long_about = None,
    after_help = "Examples:\n\
        pipechain run                             Run .pipechain.yaml\n\
        pipechain run -f count.yaml               Run a definition file\n\
        pipechain run -s 'ls -l' -s 'wc -l'       Run inline stages\n\
        pipechain validate                        Check .pipechain.yaml\n\n\
        See 'pipechain <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a chain
    Run {
        /// Definition file (defaults to .pipechain.yaml)
        #[clap(short, long, value_name = "FILE", conflicts_with = "stages")]
        file: Option<PathBuf>,

        /// Inline stage, split on whitespace; repeat to chain
        #[clap(short = 's', long = "stage", value_name = "COMMAND")]
        stages: Vec<String>,

        /// Feed our stdin into the first stage
        #[clap(long)]
        stdin: bool,

        /// Exit code that does not count as a failure; repeatable
        #[clap(long = "ignore-exit", value_name = "CODE")]
        ignore_exit: Vec<i32>,

        /// Kill stages that run longer than this
        #[clap(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// Validate a chain definition
    Validate {
        /// Definition file to validate
        #[clap(default_value = DEFAULT_DEFINITION_FILE)]
        file: PathBuf,
    },
}

/// Print a chain error, one line per failed stage
pub(crate) fn report_error(err: &ChainError, labels: &[String]) {
    report(err, labels, 0);
}

fn report(err: &ChainError, labels: &[String], depth: usize) {
    let indent = "  ".repeat(depth);

    let Some(errors) = err.as_multiple() else {
        eprintln!("{}{} {}", indent, "✗".red(), err);
        return;
    };

    eprintln!("{}{}:", indent, errors.label().red().bold());
    let per_source = errors.label() == COMBINE_ERRORS;

    for (index, slot) in errors.errors().iter().enumerate() {
        let Some(error) = slot.as_ref().filter(|e| e.is_failure()) else {
            continue;
        };

        if error.as_multiple().is_some() {
            report(error, labels, depth + 1);
            continue;
        }

        let owner = match error {
            ChainError::HookFailed { .. } => String::new(),
            _ if per_source => format!("source {}: ", index),
            _ => match labels.get(index) {
                Some(label) => format!("{}: ", label),
                None => format!("stage {}: ", index),
            },
        };
        eprintln!("{}  {} {}{}", indent, "✗".red(), owner.bold(), error);
    }
}
