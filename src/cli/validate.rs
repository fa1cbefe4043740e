// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Validate command - check a chain definition

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::config::{ChainDefinition, ChainValidator};

/// Run the validate command
pub async fn run(path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating chain...".bold());
    println!();

    if !path.exists() {
        return Err(miette::miette!(
            "Definition file not found: {}",
            path.display()
        ));
    }

    let definition = match ChainDefinition::from_file(&path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("  {} Failed to parse definition", "✗".red());
            eprintln!();
            return Err(miette::miette!("Parse error: {}", e));
        }
    };

    println!("  {} Definition file is valid YAML", "✓".green());

    let validation = ChainValidator::validate(&definition);
    let missing_programs = ChainValidator::missing_programs(&definition);

    let mut has_issues = false;

    if !validation.errors.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !missing_programs.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Missing programs".yellow().bold());
        for missing in &missing_programs {
            println!("  {} {}", "⚠".yellow(), missing);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Chain summary".bold());
        println!("  Name: {}", definition.name);
        if let Some(ref description) = definition.description {
            println!("  Description: {}", description);
        }
        println!("  Stages: {}", definition.stages.len());
        for stage in &definition.stages {
            let routing = match (stage.forward_stdout, stage.forward_stderr) {
                (true, true) => "stdout+stderr",
                (true, false) => "stdout",
                (false, true) => "stderr",
                (false, false) => "nothing",
            };
            println!(
                "    - {} {}",
                stage.label(),
                format!("[forwards {}]", routing).dimmed()
            );
        }
    }

    println!();

    if has_issues {
        Err(miette::miette!("Chain validation failed"))
    } else if validation.has_warnings() {
        println!("{}", "Chain is valid but has warnings.".yellow().bold());
        Ok(())
    } else {
        println!("{}", "Chain is valid!".green().bold());
        Ok(())
    }
}
