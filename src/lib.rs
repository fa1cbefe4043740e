// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! # pipechain - Process chains with explicit stream routing
//!
//! `pipechain` runs external programs as an ordered chain, the way a shell
//! pipeline does, but with every stream under program control.
//!
//! ## Features
//!
//! - **Routing** - forward stdout, stderr or both to the next stage
//! - **Forks** - copy any stream into extra sinks while it flows on
//! - **Injections** - merge extra readers into a stage's stdin
//! - **Error policies** - decide per stage which failures count
//! - **Aggregated errors** - every stage's outcome, indexed by stage
//!
//! ## Quick Start
//!
//! ```bash
//! # Run inline stages
//! pipechain run -s 'ls -l' -s 'grep README' -s 'wc -l'
//!
//! # Run a definition file
//! pipechain run -f .pipechain.yaml
//! ```

pub mod chain;
pub mod cli;
pub mod config;
pub mod errors;
pub mod hooks;

// Re-export commonly used types
pub use chain::{builder, CancelScope, FinalizedChain, SharedBuffer, StageCommand};
pub use config::{ChainDefinition, StageDefinition};
pub use errors::{ChainError, ChainResult, MultiError};
pub use hooks::{FileMode, LazyFile};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
