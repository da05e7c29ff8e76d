// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

#![forbid(unsafe_code)]

pub mod builder;
pub mod bytecode;
pub mod cdata;
pub mod config;
pub mod context;
pub mod disasm;
pub mod memory;
pub mod metadata;

mod assign;
mod diagnostics;
mod functions;
mod layout;
mod primitives;
mod record;
mod sequence;
mod stack;
mod vm;

pub use ssmd_core::{Error, ErrorCode, ErrorKind, Package, PackageFlags, PackageMode, Result};

pub use self::builder::{Label, PackageBuilder};
pub use self::cdata::Encoding;
pub use self::config::{ExecuteOptions, FailurePolicy};
pub use self::context::{EngineContext, ExternalArgs, ExternalFunction, WarningCode};
pub use self::disasm::disassemble;
pub use self::memory::Lanes;
pub use self::metadata::{DataType, SlotMeta};
pub use self::vm::{ExecutionSummary, Interpreter, execute};
