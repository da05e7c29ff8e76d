// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Engine-wide state shared by every call: the named constant table, the
//! host function table, and the warn-once bits.

use std::any::Any;
use std::collections::HashMap;
use std::f32::consts;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use ssmd_core::common::Result;

use crate::bytecode::{NAMED_CONSTANT_COUNT, NamedConstant};

/// One-time advisories; each variant is a bit in `EngineContext::warned`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum WarningCode {
    UnalignedDataSegment = 1 << 0,
    UnalignedStackSegment = 1 << 1,
    LaneCountNotMultipleOfFour = 1 << 2,
}

/// Arguments handed to a host function. Each parameter is one scalar per
/// lane, in lane order.
pub struct ExternalArgs<'a> {
    pub env: Option<&'a dyn Any>,
    pub params: &'a [&'a [f32]],
    pub lanes: usize,
}

pub type HostFn = dyn Fn(&ExternalArgs, &mut [f32]) -> Result<()> + Send + Sync;

#[derive(Clone)]
pub struct ExternalFunction {
    pub name: String,
    pub parameter_sizes: Vec<u8>,
    pub return_size: u8,
    f: Arc<HostFn>,
}

impl ExternalFunction {
    pub fn new<F>(name: &str, parameter_sizes: Vec<u8>, return_size: u8, f: F) -> Self
    where
        F: Fn(&ExternalArgs, &mut [f32]) -> Result<()> + Send + Sync + 'static,
    {
        ExternalFunction {
            name: name.to_owned(),
            parameter_sizes,
            return_size,
            f: Arc::new(f),
        }
    }

    /// Host calls currently exchange scalars only.
    pub fn is_scalar(&self) -> bool {
        self.return_size == 1 && self.parameter_sizes.iter().all(|s| *s == 1)
    }

    pub(crate) fn invoke(&self, args: &ExternalArgs, out: &mut [f32]) -> Result<()> {
        (self.f)(args, out)
    }
}

impl fmt::Debug for ExternalFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExternalFunction")
            .field("name", &self.name)
            .field("parameter_sizes", &self.parameter_sizes)
            .field("return_size", &self.return_size)
            .finish()
    }
}

#[derive(Debug)]
pub struct EngineContext {
    constants: [f32; NAMED_CONSTANT_COUNT],
    warned: AtomicU32,
    functions: HashMap<u16, ExternalFunction>,
}

impl Default for EngineContext {
    fn default() -> Self {
        EngineContext::new()
    }
}

impl EngineContext {
    pub fn new() -> Self {
        EngineContext {
            constants: default_constants(),
            warned: AtomicU32::new(0),
            functions: HashMap::new(),
        }
    }

    #[inline]
    pub fn constant(&self, c: NamedConstant) -> f32 {
        self.constants[c.index()]
    }

    pub fn register_function(&mut self, id: u16, f: ExternalFunction) -> Option<ExternalFunction> {
        self.functions.insert(id, f)
    }

    pub fn function(&self, id: u16) -> Option<&ExternalFunction> {
        self.functions.get(&id)
    }

    /// Returns true the first time `code` is raised on this context.
    /// Racing callers may both observe true; the bit itself is idempotent.
    pub fn warn_once(&self, code: WarningCode) -> bool {
        let bit = code as u32;
        self.warned.fetch_or(bit, Ordering::Relaxed) & bit == 0
    }

    pub fn has_warned(&self, code: WarningCode) -> bool {
        self.warned.load(Ordering::Relaxed) & code as u32 != 0
    }
}

fn default_constants() -> [f32; NAMED_CONSTANT_COUNT] {
    [
        0.0,
        1.0,
        2.0,
        3.0,
        4.0,
        5.0,
        6.0,
        7.0,
        8.0,
        9.0,
        10.0,
        100.0,
        1000.0,
        0.5,
        0.1,
        consts::PI,
        consts::FRAC_1_PI,
        consts::TAU,
        consts::E,
        f32::EPSILON,
        f32::INFINITY,
        f32::NEG_INFINITY,
        f32::NAN,
        f32::MIN,
        f32::MAX,
        consts::PI / 180.0,
        180.0 / consts::PI,
    ]
}
