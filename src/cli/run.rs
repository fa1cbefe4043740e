// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Run command - execute a chain

use colored::Colorize;
use miette::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::report_error;
use super::stdin::StdinReader;
use crate::config::{ChainDefinition, ChainValidator, StageDefinition, DEFAULT_DEFINITION_FILE};

/// Run a chain from a definition file or inline stages
pub async fn run(
    file: Option<PathBuf>,
    stages: Vec<String>,
    stdin: bool,
    ignore_exit: Vec<i32>,
    timeout_ms: Option<u64>,
    verbose: bool,
) -> Result<()> {
    let mut definition = if stages.is_empty() {
        load(file.unwrap_or_else(|| PathBuf::from(DEFAULT_DEFINITION_FILE)))?
    } else {
        inline(&stages)?
    };

    definition.ignore_exit_codes.extend(ignore_exit);
    if let Some(ms) = timeout_ms {
        for stage in definition.stages.iter_mut().filter(|s| s.timeout_ms.is_none()) {
            stage.timeout_ms = Some(ms);
        }
    }

    let validation = ChainValidator::validate(&definition);
    if !validation.is_valid() {
        eprintln!("{}", "Chain validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Chain configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Chain warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    let chain = if stdin {
        let input = StdinReader::spawn()
            .map_err(|e| miette::miette!("Failed to start stdin reader: {}", e))?;
        definition.build_with_input([input])?
    } else {
        definition.build()?
    };

    if verbose {
        eprintln!("{} {}", "Running:".bold(), chain.to_string().cyan());
    }

    let result = chain
        .with_additional_output([tokio::io::stdout()])
        .with_additional_error([tokio::io::stderr()])
        .run()
        .await;

    match result {
        Ok(()) => {
            if verbose {
                eprintln!("{} {}", "✓".green(), "Chain completed".green());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!();
            report_error(&e, &definition.stage_labels());
            Err(miette::miette!("Chain '{}' failed", definition.name))
        }
    }
}

fn load(path: PathBuf) -> Result<ChainDefinition> {
    if !path.exists() {
        return Err(miette::miette!(
            "Definition file not found: {}\n\n\
             Pass stages inline with -s, or point to a file with -f.",
            path.display()
        ));
    }

    ChainDefinition::from_file(&path)
        .map_err(|e| miette::miette!("Failed to load chain definition: {}", e))
}

fn inline(stages: &[String]) -> Result<ChainDefinition> {
    let stages = stages
        .iter()
        .map(|line| {
            StageDefinition::parse_inline(line)
                .ok_or_else(|| miette::miette!("Inline stage is empty: '{}'", line))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ChainDefinition {
        version: "1".to_string(),
        name: "inline".to_string(),
        description: None,
        env: BTreeMap::new(),
        ignore_exit_codes: Vec::new(),
        stages,
    })
}
