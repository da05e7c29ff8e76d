// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The compiled-script container handed to the interpreter.
//!
//! A `Package` is produced by a compiler (or `ssmd_engine::PackageBuilder`)
//! and is immutable from the interpreter's point of view: it only borrows
//! the code and metadata segments for the duration of one call.

use serde::{Deserialize, Serialize};

use crate::common::{Error, ErrorCode, ErrorKind, Result};
use crate::setup_err;

/// The only bytecode language revision this workspace understands.
pub const LANGUAGE_VERSION: u8 = 1;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageMode {
    /// Batched single-script, multiple-data execution.
    #[default]
    Ssmd,
    /// Compiler validation pre-mode: executed like `Ssmd` but only against
    /// freshly seeded lanes.
    Validation,
    /// Record-at-a-time packaging used by scalar interpreters; not runnable here.
    Scalar,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageFlags {
    /// Each lane row carries its own stack right after its data segment.
    pub packaged_stack: bool,
    pub language_version: u8,
    pub mode: PackageMode,
}

impl Default for PackageFlags {
    fn default() -> Self {
        PackageFlags {
            packaged_stack: false,
            language_version: LANGUAGE_VERSION,
            mode: PackageMode::Ssmd,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub code: Vec<u8>,
    /// One packed descriptor byte per data slot.
    pub metadata: Vec<u8>,
    /// Initial slot values used to seed lanes that are not already indexed.
    /// Shorter than `data_size` means the remaining slots start at zero.
    #[serde(default)]
    pub data: Vec<f32>,
    /// Data segment size in 4-byte elements.
    pub data_size: usize,
    /// Stack segment size in 4-byte elements.
    pub stack_size: usize,
    #[serde(default)]
    pub flags: PackageFlags,
}

impl Package {
    pub fn from_json(json: &str) -> Result<Package> {
        serde_json::from_str(json).map_err(|err| {
            Error::new(ErrorKind::Setup, ErrorCode::Generic, Some(err.to_string()))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| {
            Error::new(ErrorKind::Setup, ErrorCode::Generic, Some(err.to_string()))
        })
    }

    /// Number of f32 elements a single lane row must provide.
    pub fn row_len(&self) -> usize {
        if self.flags.packaged_stack {
            self.data_size + self.stack_size
        } else {
            self.data_size
        }
    }

    /// Structural checks that do not depend on decoding the code segment.
    pub fn check(&self) -> Result<()> {
        if self.flags.language_version != LANGUAGE_VERSION {
            return setup_err!(
                UnsupportedLanguageVersion,
                format!(
                    "version {} (expected {})",
                    self.flags.language_version, LANGUAGE_VERSION
                )
            );
        }
        if self.code.is_empty() {
            return setup_err!(NullRequiredPointer, "empty code segment".to_owned());
        }
        if self.metadata.len() < self.data_size {
            return setup_err!(
                NullRequiredPointer,
                format!(
                    "metadata covers {} of {} data slots",
                    self.metadata.len(),
                    self.data_size
                )
            );
        }
        if self.data.len() > self.data_size {
            return setup_err!(
                InvalidSlot,
                format!(
                    "{} initial values for a {}-slot data segment",
                    self.data.len(),
                    self.data_size
                )
            );
        }
        Ok(())
    }
}
