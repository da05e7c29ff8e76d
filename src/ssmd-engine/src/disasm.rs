// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Renders a code segment one token per line.

use std::fmt::Write;

use ssmd_core::common::Result;
use ssmd_core::vm_err;

use crate::bytecode::{self, ExtOp, Function, Opcode, Token, decode};
use crate::cdata;

fn is_nary(f: Function) -> bool {
    use Function::*;
    matches!(
        f,
        Adda | Mula | Suba | Diva | Min | Max | All | Any | Mina | Maxa | Csum
    )
}

/// Render the token at `at` and return it along with its encoded length.
pub fn token(code: &[u8], at: usize) -> Result<(String, usize)> {
    let byte = bytecode::read_u8(code, at)?;
    let rendered = match decode(byte) {
        Token::Data(slot) => (format!("data[{slot}]"), 1),
        Token::Constant(c) => (c.name().to_owned(), 1),
        Token::Function(f) if is_nary(f) => {
            let (count, size) = bytecode::unpack62(bytecode::read_u8(code, at + 1)?);
            (format!("{} {count}x{size}", f.name()), 2)
        }
        Token::Function(f) => (f.name().to_owned(), 1),
        Token::Reserved | Token::Unassigned(_) => (format!("?? {byte}"), 1),
        Token::Op(op) => match op {
            Opcode::Jump | Opcode::Cjz => {
                let off = bytecode::read_u8(code, at + 1)? as usize;
                (format!("{} +{off} (-> {})", op.name(), at + off), 2)
            }
            Opcode::JumpBack => {
                let off = bytecode::read_u8(code, at + 1)? as usize;
                (format!("{} -{off} (-> {})", op.name(), at.wrapping_sub(off) as isize), 2)
            }
            Opcode::LongJump | Opcode::CjzLong => {
                let off = bytecode::read_i16(code, at + 1)? as i64;
                (format!("{} {off:+} (-> {})", op.name(), at as i64 + off), 3)
            }
            Opcode::Pushv => {
                let (count, size) = bytecode::unpack44(bytecode::read_u8(code, at + 1)?);
                (format!("pushv {count}x{size}"), 2)
            }
            Opcode::ConstantF1 => (format!("constant_f1 {:?}", bytecode::read_f32(code, at + 1)?), 5),
            Opcode::ConstantF1H => (format!("constant_f1_h {:?}", bytecode::read_f16(code, at + 1)?), 3),
            Opcode::ConstantShortRef => {
                let back = bytecode::read_u8(code, at + 1)? as usize;
                (format!("constant_short_ref -{back} (@ {})", at.wrapping_sub(back) as isize), 2)
            }
            Opcode::ConstantLongRef => {
                let back = bytecode::read_u16(code, at + 1)? as usize;
                (format!("constant_long_ref -{back} (@ {})", at.wrapping_sub(back) as isize), 3)
            }
            Opcode::CDataRef => {
                let back = bytecode::read_u16(code, at + 1)? as usize;
                (format!("cdataref -{back} (@ {})", at.wrapping_sub(back) as isize), 3)
            }
            Opcode::CData => {
                let blob = cdata::header_at(code, at)?;
                let values: Vec<f32> = (0..blob.count).filter_map(|i| blob.get(code, i)).collect();
                (
                    format!("cdata {} x{} {values:?}", blob.encoding.name(), blob.count),
                    blob.end() - at,
                )
            }
            Opcode::ExOp => {
                let ext = bytecode::read_u8(code, at + 1)?;
                match ExtOp::from_u8(ext) {
                    Some(ExtOp::Call) => {
                        let id = bytecode::read_u16(code, at + 2)?;
                        (format!("ex_op call #{id}"), 4)
                    }
                    Some(op) => (format!("ex_op {}", op.name()), 2),
                    None => (format!("ex_op ?? {ext}"), 2),
                }
            }
            op => (op.name().to_owned(), 1),
        },
    };
    Ok(rendered)
}

/// Disassemble a whole code segment.
pub fn disassemble(code: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut at = 0;
    while at < code.len() {
        let (text, len) = token(code, at)?;
        if len == 0 {
            return vm_err!(MalformedSequence, format!("zero-length token at {at}"));
        }
        // writing to a String cannot fail
        let _ = writeln!(out, "{at:04}: {text}");
        at += len;
    }
    Ok(out)
}
