// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! Chain definition files

mod definition;
mod validation;

pub use definition::{ChainDefinition, FileTarget, StageDefinition, DEFAULT_DEFINITION_FILE};
pub use validation::{ChainValidator, ValidationResult};
