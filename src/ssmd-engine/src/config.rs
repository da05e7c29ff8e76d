// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10_000;

/// How shape violations are handled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Check every shape constraint and log diagnostics on failure.
    Verbose,
    /// Skip per-token shape checks; violating code yields undefined
    /// (usually NaN) output instead of an error.
    Silent,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            FailurePolicy::Verbose
        } else {
            FailurePolicy::Silent
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteOptions {
    /// Cap on top-level dispatches per call; exceeding it is always an error.
    pub max_iterations: u32,
    pub failure_policy: FailurePolicy,
    /// Store the final operand of an assignment directly into its target.
    /// Disabling forces every result through the scratch register.
    pub write_through: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            failure_policy: FailurePolicy::default(),
            write_through: true,
        }
    }
}

impl ExecuteOptions {
    #[inline]
    pub fn verbose(&self) -> bool {
        self.failure_policy == FailurePolicy::Verbose
    }
}

#[test]
fn test_options_from_partial_json() {
    let opts: ExecuteOptions = serde_json::from_str(r#"{"max_iterations": 12}"#).unwrap();
    assert_eq!(12, opts.max_iterations);
    assert!(opts.write_through);
    assert_eq!(FailurePolicy::default(), opts.failure_policy);

    let opts: ExecuteOptions =
        serde_json::from_str(r#"{"failure_policy": "silent", "write_through": false}"#).unwrap();
    assert!(!opts.verbose());
    assert!(!opts.write_through);
    assert_eq!(DEFAULT_MAX_ITERATIONS, opts.max_iterations);
}
