// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! Opcode tables and inline operand readers for the SSMD code segment.
//!
//! Integer operands (jump offsets, back references, CDATA counts, host
//! function ids) are big-endian; float payloads are little-endian.

use half::f16;
use ssmd_core::common::Result;
use ssmd_core::vm_err;

/// Opcodes at or above this byte address data slot `byte - DATA_ID_BASE`.
pub const DATA_ID_BASE: u8 = 128;
/// Never a valid opcode.
pub const RESERVED: u8 = 255;
/// Highest addressable data slot via a single-byte id.
pub const MAX_DATA_ID_SLOT: usize = (RESERVED - DATA_ID_BASE) as usize - 1;

macro_rules! byte_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident = $value:literal => $text:literal,)* }) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        $vis enum $name {
            $($variant = $value,)*
        }

        impl $name {
            #[inline]
            pub fn from_u8(byte: u8) -> Option<$name> {
                match byte {
                    $($value => Some($name::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)*
                }
            }
        }
    };
}

// ============================================================================
// Opcodes
// ============================================================================

byte_enum! {
    /// Structural, stack, assignment, operator and literal opcodes.
    pub enum Opcode {
        Nop = 0 => "nop",
        Ret = 1 => "ret",
        Begin = 2 => "begin",
        End = 3 => "end",
        IndexX = 4 => "index_x",
        IndexY = 5 => "index_y",
        IndexZ = 6 => "index_z",
        IndexW = 7 => "index_w",
        IndexN = 8 => "index_n",
        Assign = 9 => "assign",
        Assigns = 10 => "assigns",
        Assignf = 11 => "assignf",
        Assignfn = 12 => "assignfn",
        Assignv = 13 => "assignv",
        Push = 14 => "push",
        Pushv = 15 => "pushv",
        Pushf = 16 => "pushf",
        Pushc = 17 => "pushc",
        Pop = 18 => "pop",
        Jump = 19 => "jump",
        JumpBack = 20 => "jump_back",
        LongJump = 21 => "long_jump",
        Cjz = 22 => "cjz",
        CjzLong = 23 => "cjz_long",
        Add = 24 => "add",
        Substract = 25 => "substract",
        Multiply = 26 => "multiply",
        Divide = 27 => "divide",
        And = 28 => "and",
        Or = 29 => "or",
        Xor = 30 => "xor",
        Not = 31 => "not",
        Smaller = 32 => "smaller",
        Greater = 33 => "greater",
        SmallerEquals = 34 => "smaller_equals",
        GreaterEquals = 35 => "greater_equals",
        Equals = 36 => "equals",
        NotEquals = 37 => "not_equals",
        ConstantF1 = 38 => "constant_f1",
        ConstantF1H = 39 => "constant_f1_h",
        ConstantShortRef = 40 => "constant_short_ref",
        ConstantLongRef = 41 => "constant_long_ref",
        CDataRef = 42 => "cdataref",
        CData = 43 => "cdata",
        ExOp = 44 => "ex_op",
    }
}

byte_enum! {
    /// Single-byte math functions.
    pub enum Function {
        Abs = 45 => "abs",
        Trunc = 46 => "trunc",
        Floor = 47 => "floor",
        Ceil = 48 => "ceil",
        Frac = 49 => "frac",
        Sqrt = 50 => "sqrt",
        Rsqrt = 51 => "rsqrt",
        Sin = 52 => "sin",
        Cos = 53 => "cos",
        Tan = 54 => "tan",
        Atan = 55 => "atan",
        Exp = 56 => "exp",
        Log2 = 57 => "log2",
        Log = 58 => "log",
        Normalize = 59 => "normalize",
        Saturate = 60 => "saturate",
        Sign = 61 => "sign",
        Pow = 62 => "pow",
        Fmod = 63 => "fmod",
        Atan2 = 64 => "atan2",
        Dot = 65 => "dot",
        Cross = 66 => "cross",
        Clamp = 67 => "clamp",
        Lerp = 68 => "lerp",
        Unlerp = 69 => "unlerp",
        Slerp = 70 => "slerp",
        Nlerp = 71 => "nlerp",
        Fma = 72 => "fma",
        Select = 73 => "select",
        Adda = 74 => "adda",
        Mula = 75 => "mula",
        Suba = 76 => "suba",
        Diva = 77 => "diva",
        Min = 78 => "min",
        Max = 79 => "max",
        All = 80 => "all",
        Any = 81 => "any",
        Mina = 82 => "mina",
        Maxa = 83 => "maxa",
        Csum = 84 => "csum",
        Size = 85 => "size",
        ExpandV2 = 86 => "expand_v2",
        ExpandV3 = 87 => "expand_v3",
        ExpandV4 = 88 => "expand_v4",
    }
}

byte_enum! {
    /// Engine constant table entries, in table order.
    pub enum NamedConstant {
        Value0 = 89 => "value_0",
        Value1 = 90 => "value_1",
        Value2 = 91 => "value_2",
        Value3 = 92 => "value_3",
        Value4 = 93 => "value_4",
        Value5 = 94 => "value_5",
        Value6 = 95 => "value_6",
        Value7 = 96 => "value_7",
        Value8 = 97 => "value_8",
        Value9 = 98 => "value_9",
        Value10 = 99 => "value_10",
        Value100 = 100 => "value_100",
        Value1000 = 101 => "value_1000",
        InvValue2 = 102 => "inv_value_2",
        InvValue10 = 103 => "inv_value_10",
        Pi = 104 => "pi",
        InvPi = 105 => "inv_pi",
        Tau = 106 => "tau",
        Euler = 107 => "euler",
        Epsilon = 108 => "epsilon",
        Infinity = 109 => "infinity",
        NegativeInfinity = 110 => "negative_infinity",
        Nan = 111 => "nan",
        MinValue = 112 => "min_value",
        MaxValue = 113 => "max_value",
        Deg2Rad = 114 => "deg2rad",
        Rad2Deg = 115 => "rad2deg",
    }
}

pub const NAMED_CONSTANT_BASE: u8 = NamedConstant::Value0 as u8;
pub const NAMED_CONSTANT_COUNT: usize =
    (NamedConstant::Rad2Deg as u8 - NamedConstant::Value0 as u8) as usize + 1;

impl NamedConstant {
    pub fn index(self) -> usize {
        (self as u8 - NAMED_CONSTANT_BASE) as usize
    }
}

byte_enum! {
    /// Operations selected by the byte following `ex_op`.
    pub enum ExtOp {
        Exp10 = 0 => "exp10",
        Log10 = 1 => "log10",
        Sinh = 2 => "sinh",
        Cosh = 3 => "cosh",
        Tanh = 4 => "tanh",
        Asin = 5 => "asin",
        Acos = 6 => "acos",
        Degrees = 7 => "degrees",
        Radians = 8 => "radians",
        Cbrt = 9 => "cbrt",
        GetBit = 10 => "get_bit",
        GetBits = 11 => "get_bits",
        SetBit = 12 => "set_bit",
        SetBits = 13 => "set_bits",
        CountBits = 14 => "count_bits",
        ReverseBits = 15 => "reverse_bits",
        Tzcnt = 16 => "tzcnt",
        Lzcnt = 17 => "lzcnt",
        Rol = 18 => "rol",
        Ror = 19 => "ror",
        Shl = 20 => "shl",
        Shr = 21 => "shr",
        ReinterpretBool32 = 22 => "reinterpret_bool32",
        ReinterpretFloat = 23 => "reinterpret_float",
        Call = 24 => "call",
        Debug = 25 => "debug",
        DebugStack = 26 => "debugstack",
        Validate = 27 => "validate",
    }
}

impl ExtOp {
    /// Statement-only operations that never produce a value.
    pub fn is_statement(self) -> bool {
        matches!(
            self,
            ExtOp::ReinterpretBool32
                | ExtOp::ReinterpretFloat
                | ExtOp::Debug
                | ExtOp::DebugStack
                | ExtOp::Validate
        )
    }
}

impl Opcode {
    /// Infix operators that may join two terms of a sequence.
    pub fn is_binary_operator(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Substract
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Smaller
                | Opcode::Greater
                | Opcode::SmallerEquals
                | Opcode::GreaterEquals
                | Opcode::Equals
                | Opcode::NotEquals
        )
    }

    pub fn component(self) -> Option<u8> {
        match self {
            Opcode::IndexX => Some(0),
            Opcode::IndexY => Some(1),
            Opcode::IndexZ => Some(2),
            Opcode::IndexW => Some(3),
            _ => None,
        }
    }
}

/// A fully classified code byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Op(Opcode),
    Function(Function),
    Constant(NamedConstant),
    Data(usize),
    Reserved,
    Unassigned(u8),
}

#[inline]
pub fn decode(byte: u8) -> Token {
    if byte == RESERVED {
        Token::Reserved
    } else if byte >= DATA_ID_BASE {
        Token::Data((byte - DATA_ID_BASE) as usize)
    } else if let Some(op) = Opcode::from_u8(byte) {
        Token::Op(op)
    } else if let Some(f) = Function::from_u8(byte) {
        Token::Function(f)
    } else if let Some(c) = NamedConstant::from_u8(byte) {
        Token::Constant(c)
    } else {
        Token::Unassigned(byte)
    }
}

/// True for a byte that is a binary operator, used when peeking past a
/// sequence terminator.
#[inline]
pub fn is_binary_operator_byte(byte: u8) -> bool {
    Opcode::from_u8(byte).is_some_and(Opcode::is_binary_operator)
}

pub fn data_id(slot: usize) -> Option<u8> {
    if slot <= MAX_DATA_ID_SLOT {
        Some(DATA_ID_BASE + slot as u8)
    } else {
        None
    }
}

// ============================================================================
// Packed arity bytes
// ============================================================================

/// Vector size field where 0 stands for 4.
#[inline]
pub fn unpack_size(bits: u8) -> u8 {
    if bits == 0 { 4 } else { bits }
}

/// `count << 2 | size & 3`: operand count for n-ary folds.
#[inline]
pub fn unpack62(byte: u8) -> (usize, u8) {
    ((byte >> 2) as usize, unpack_size(byte & 0x3))
}

pub fn pack62(count: usize, size: u8) -> Option<u8> {
    if count > 0x3f || !(1..=4).contains(&size) {
        return None;
    }
    Some(((count as u8) << 2) | (size & 0x3))
}

/// `count << 4 | size & 15`: term count and result size for `pushv`.
#[inline]
pub fn unpack44(byte: u8) -> (usize, u8) {
    ((byte >> 4) as usize, unpack_size(byte & 0xf))
}

pub fn pack44(count: usize, size: u8) -> Option<u8> {
    if count > 0xf || !(1..=4).contains(&size) {
        return None;
    }
    Some(((count as u8) << 4) | (size & 0xf))
}

// ============================================================================
// Operand readers
// ============================================================================

#[inline]
pub fn read_u8(code: &[u8], at: usize) -> Result<u8> {
    match code.get(at) {
        Some(b) => Ok(*b),
        None => vm_err!(UnexpectedEndOfCode, format!("byte at {at}")),
    }
}

#[inline]
pub fn read_u16(code: &[u8], at: usize) -> Result<u16> {
    match code.get(at..at + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => vm_err!(UnexpectedEndOfCode, format!("u16 at {at}")),
    }
}

#[inline]
pub fn read_i16(code: &[u8], at: usize) -> Result<i16> {
    read_u16(code, at).map(|v| v as i16)
}

#[inline]
pub fn read_f32(code: &[u8], at: usize) -> Result<f32> {
    match code.get(at..at + 4) {
        Some(b) => Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => vm_err!(UnexpectedEndOfCode, format!("f32 at {at}")),
    }
}

#[inline]
pub fn read_f16(code: &[u8], at: usize) -> Result<f32> {
    match code.get(at..at + 2) {
        Some(b) => Ok(f16::from_le_bytes([b[0], b[1]]).to_f32()),
        None => vm_err!(UnexpectedEndOfCode, format!("f16 at {at}")),
    }
}

/// Resolve `base + offset` for a signed relative jump.
pub fn relative(base: usize, offset: i64, code_len: usize) -> Result<usize> {
    let target = base as i64 + offset;
    if target < 0 || target as usize >= code_len {
        return vm_err!(
            InvalidJumpTarget,
            format!("{base} {offset:+} lands outside code of {code_len} bytes")
        );
    }
    Ok(target as usize)
}

// ============================================================================
// Half precision
// ============================================================================

/// True when `v` survives a trip through half precision bit-exactly.
pub fn is_exact_f16(v: f32) -> bool {
    !v.is_nan() && f16::from_f32(v).to_f32().to_bits() == v.to_bits()
}
