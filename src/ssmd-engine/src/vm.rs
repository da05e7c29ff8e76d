// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The top-level dispatch loop and the public call surface.

use std::any::Any;
use std::borrow::Cow;

use bumpalo::Bump;
use ssmd_core::common::{Error, ErrorCode, Result};
use ssmd_core::package::{Package, PackageMode};
use ssmd_core::{setup_err, vm_err};

use crate::bytecode::{self, ExtOp, Opcode, Token, decode};
use crate::cdata;
use crate::config::ExecuteOptions;
use crate::context::{EngineContext, WarningCode};
use crate::layout::{self, Probe};
use crate::memory::{Lanes, Memory, SegmentLayout};
use crate::metadata::{MetadataTable, SlotMeta};
use crate::primitives::{V4, ZERO, truthy};
use crate::record::{Operand, TempPool};

/// What a successful call reports back.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Top-level instructions dispatched, including the final `ret`.
    pub iterations: u32,
    /// Stack offset at `ret`; zero for code whose pushes and pops balance.
    pub final_stack_offset: usize,
}

/// Binds a package and runs it over batches of lanes.
#[derive(Clone, Debug, Default)]
pub struct Interpreter<'p> {
    package: Option<&'p Package>,
    options: ExecuteOptions,
}

impl<'p> Interpreter<'p> {
    pub fn new(options: ExecuteOptions) -> Self {
        Interpreter {
            package: None,
            options,
        }
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    pub fn set_package(&mut self, package: &'p Package) -> Result<()> {
        match package.flags.mode {
            PackageMode::Ssmd | PackageMode::Validation => {}
            mode => {
                return setup_err!(
                    PackageModeMismatch,
                    format!("{mode:?} packages cannot run on the batched interpreter")
                );
            }
        }
        package.check()?;
        for (slot, byte) in package.metadata.iter().take(package.data_size).enumerate() {
            SlotMeta::unpack(*byte).map_err(|err| {
                Error::new(
                    ssmd_core::ErrorKind::Setup,
                    err.code,
                    Some(format!("metadata for slot {slot}: {}", err.details.unwrap_or_default())),
                )
            })?;
        }
        self.package = Some(package);
        Ok(())
    }

    /// Run the bound package to `ret` over every lane.
    ///
    /// When `is_already_indexed` is false each lane's data segment is first
    /// seeded from the package's initial values.
    pub fn execute(
        &self,
        ctx: &EngineContext,
        env: Option<&dyn Any>,
        lanes: &mut Lanes,
        is_already_indexed: bool,
    ) -> Result<ExecutionSummary> {
        let Some(package) = self.package else {
            return setup_err!(PackageNotSet);
        };
        if package.flags.mode == PackageMode::Validation && is_already_indexed {
            return setup_err!(
                ValidationModeIncompatible,
                "validation packages run against freshly seeded lanes only".to_owned()
            );
        }
        let n = lanes.len();
        if n == 0 {
            return setup_err!(InvalidLaneCount, "no lanes".to_owned());
        }
        let row_len = package.row_len();
        if let Some(lane) = lanes.first_out_of_bounds(row_len) {
            return setup_err!(
                NullRequiredPointer,
                format!("lane {lane} needs {row_len} elements past the end of the arena")
            );
        }

        if !is_already_indexed {
            seed(package, lanes);
        }

        let verbose = self.options.verbose();
        let data_size = package.data_size;
        let stack_size = package.stack_size;
        let packaged = package.flags.packaged_stack;

        let bump = Bump::new();
        let (arena, bases) = lanes.split();

        let probe = layout::probe(bases, row_len);
        if verbose && n % 4 != 0 && ctx.warn_once(WarningCode::LaneCountNotMultipleOfFour) {
            tracing::warn!(lanes = n, "lane count is not a multiple of four");
        }
        if verbose && !probe.aligned && ctx.warn_once(WarningCode::UnalignedDataSegment) {
            tracing::warn!(lanes = n, "lane rows are unevenly strided; using per-lane bases");
        }

        let data = SegmentLayout::new(probe, bases, 0);
        let stack = if packaged {
            // rows carry their stack, so it shares the data rows' deltas
            if verbose && !probe.aligned && ctx.warn_once(WarningCode::UnalignedStackSegment) {
                tracing::warn!(lanes = n, "packaged stack rows are unevenly strided");
            }
            SegmentLayout::new(probe, bases, data_size)
        } else {
            let local_probe = Probe {
                aligned: true,
                stride: stack_size.max(1),
            };
            SegmentLayout::new(local_probe, &[], 0)
        };
        let local_len = if packaged { 0 } else { n * stack_size };
        let local = bump.alloc_slice_fill_copy(local_len, 0.0f32);

        let meta = bump.alloc_slice_fill_copy(data_size + stack_size, 0u8);
        meta[..data_size].copy_from_slice(&package.metadata[..data_size]);

        let mut exec = Exec {
            code: Cow::Borrowed(package.code.as_slice()),
            pc: 0,
            meta: MetadataTable::new(meta, data_size),
            mem: Memory::new(arena, local, data, stack, n, packaged),
            pool: TempPool::new(&bump, n),
            register: bump.alloc_slice_fill_copy(n, ZERO),
            pushed_constants: bump.alloc_slice_fill_copy(stack_size, None),
            stack_offset: 0,
            data_size,
            stack_size,
            lanes: n,
            ctx,
            env,
            options: &self.options,
        };
        exec.run()
    }
}

/// Bind `package` with default options and run it once.
pub fn execute(
    package: &Package,
    ctx: &EngineContext,
    env: Option<&dyn Any>,
    lanes: &mut Lanes,
    is_already_indexed: bool,
) -> Result<ExecutionSummary> {
    let mut interpreter = Interpreter::new(ExecuteOptions::default());
    interpreter.set_package(package)?;
    interpreter.execute(ctx, env, lanes, is_already_indexed)
}

fn seed(package: &Package, lanes: &mut Lanes) {
    for lane in 0..lanes.len() {
        if let Some(row) = lanes.slot_mut(lane, 0, package.data_size) {
            let (init, rest) = row.split_at_mut(package.data.len());
            init.copy_from_slice(&package.data);
            rest.fill(0.0);
        }
    }
}

/// Per-call interpreter state.
pub(crate) struct Exec<'a> {
    /// Copy-on-write so CDATA element assignments stay scoped to this call.
    pub(crate) code: Cow<'a, [u8]>,
    pub(crate) pc: usize,
    pub(crate) meta: MetadataTable<'a>,
    pub(crate) mem: Memory<'a>,
    pub(crate) pool: TempPool<'a>,
    pub(crate) register: &'a mut [V4],
    /// Lane-invariant value of the push that starts at each stack slot.
    pub(crate) pushed_constants: &'a mut [Option<V4>],
    pub(crate) stack_offset: usize,
    pub(crate) data_size: usize,
    pub(crate) stack_size: usize,
    pub(crate) lanes: usize,
    pub(crate) ctx: &'a EngineContext,
    pub(crate) env: Option<&'a dyn Any>,
    pub(crate) options: &'a ExecuteOptions,
}

impl<'a> Exec<'a> {
    #[inline(always)]
    pub(crate) fn peek(&self) -> Result<u8> {
        bytecode::read_u8(&self.code, self.pc)
    }

    #[inline(never)]
    fn run(&mut self) -> Result<ExecutionSummary> {
        let mut iterations: u32 = 0;
        loop {
            let at = self.pc;
            if iterations >= self.options.max_iterations {
                let err = Error::from_code(
                    ErrorCode::MaxIterationsExceeded,
                    Some(format!("{} iterations", self.options.max_iterations)),
                );
                return self.fail(err.at(at));
            }
            iterations += 1;

            match self.step() {
                Ok(true) => {
                    return Ok(ExecutionSummary {
                        iterations,
                        final_stack_offset: self.stack_offset,
                    });
                }
                Ok(false) => {}
                Err(err) => return self.fail(err.at(at)),
            }
        }
    }

    fn fail<T>(&self, err: Error) -> Result<T> {
        if self.options.verbose() {
            tracing::error!(
                code = %err.code,
                offset = err.offset,
                details = err.details.as_deref().unwrap_or(""),
                "bytecode execution failed"
            );
        }
        Err(err)
    }

    /// Dispatch one top-level instruction; true once `ret` is reached.
    fn step(&mut self) -> Result<bool> {
        let at = self.pc;
        let byte = self.peek()?;
        match decode(byte) {
            Token::Op(op) => match op {
                Opcode::Ret => return Ok(true),
                Opcode::Nop | Opcode::End => self.pc += 1,
                Opcode::CData => {
                    let blob = cdata::header_at(&self.code, at)?;
                    self.pc = blob.end();
                }
                Opcode::Assign => self.assign()?,
                Opcode::Assigns => self.assigns()?,
                Opcode::Assignf => self.assignf(false)?,
                Opcode::Assignfn => self.assignf(true)?,
                Opcode::Assignv => self.assignv()?,
                Opcode::Push => {
                    self.pc += 1;
                    let v = self.term()?;
                    self.push(v)?;
                }
                Opcode::Pushv => self.pushv()?,
                Opcode::Pushf => {
                    self.pc += 1;
                    let v = self.function_call()?;
                    self.push(v)?;
                }
                Opcode::Pushc => {
                    self.pc += 1;
                    let v = self.sequence_value()?;
                    self.push(v)?;
                }
                Opcode::Jump => {
                    let off = bytecode::read_u8(&self.code, at + 1)? as i64;
                    self.pc = bytecode::relative(at, off, self.code.len())?;
                }
                Opcode::JumpBack => {
                    let off = bytecode::read_u8(&self.code, at + 1)? as i64;
                    self.pc = bytecode::relative(at, -off, self.code.len())?;
                }
                Opcode::LongJump => {
                    let off = bytecode::read_i16(&self.code, at + 1)? as i64;
                    self.pc = bytecode::relative(at, off, self.code.len())?;
                }
                Opcode::Cjz => {
                    let off = bytecode::read_u8(&self.code, at + 1)? as i64;
                    self.pc = at + 2;
                    self.branch(at, off)?;
                }
                Opcode::CjzLong => {
                    let off = bytecode::read_i16(&self.code, at + 1)? as i64;
                    self.pc = at + 3;
                    self.branch(at, off)?;
                }
                Opcode::ExOp => {
                    let ext = bytecode::read_u8(&self.code, at + 1)?;
                    match ExtOp::from_u8(ext) {
                        Some(op) if op.is_statement() => {
                            self.pc = at + 2;
                            self.statement(op)?;
                        }
                        Some(_) => self.discard_sequence()?,
                        None => {
                            return vm_err!(UnsupportedOpcode, format!("ex_op {ext}"));
                        }
                    }
                }
                Opcode::Begin
                | Opcode::Substract
                | Opcode::Not
                | Opcode::IndexX
                | Opcode::IndexY
                | Opcode::IndexZ
                | Opcode::IndexW
                | Opcode::IndexN
                | Opcode::Pop
                | Opcode::ConstantF1
                | Opcode::ConstantF1H
                | Opcode::ConstantShortRef
                | Opcode::ConstantLongRef
                | Opcode::CDataRef => self.discard_sequence()?,
                _ => {
                    return vm_err!(UnsupportedOpcodeAtRoot, op.name().to_owned());
                }
            },
            Token::Function(_) | Token::Constant(_) | Token::Data(_) => self.discard_sequence()?,
            Token::Reserved | Token::Unassigned(_) => {
                return vm_err!(UnsupportedOpcodeAtRoot, format!("byte {byte}"));
            }
        }
        Ok(false)
    }

    /// Evaluate the condition that follows a conditional jump; lane 0 decides
    /// for every lane.
    fn branch(&mut self, at: usize, off: i64) -> Result<()> {
        let cond = self.sequence_value()?;
        let (value, datatype) = match cond {
            Operand::Slot(rec) => (
                self.mem.read_scalar(rec.seg, 0, rec.slot),
                rec.datatype,
            ),
            op => {
                let v = self.readable(op)?;
                let r = (v.scalar_at(0), v.datatype());
                self.release(v);
                r
            }
        };
        if !truthy(value, datatype) {
            self.pc = bytecode::relative(at, off, self.code.len())?;
        }
        Ok(())
    }

    /// A bare expression at the root: evaluated for its stack effects only.
    fn discard_sequence(&mut self) -> Result<()> {
        let v = self.sequence_value()?;
        self.release_operand(v);
        Ok(())
    }
}
