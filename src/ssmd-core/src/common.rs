// Copyright 2026 The Simlin Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

use std::fmt;
use std::{error, result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError, // will never be produced
    PackageNotSet,
    PackageModeMismatch,
    UnsupportedLanguageVersion,
    NullRequiredPointer,
    InvalidLaneCount,
    ValidationModeIncompatible,
    MaxIterationsExceeded,
    UnsupportedOpcodeAtRoot,
    UnsupportedOpcode,
    UnexpectedEndOfCode,
    InvalidJumpTarget,
    MalformedSequence,
    ConstantReferenceMalformed,
    CDataReferenceMalformed,
    InvalidSlot,
    UnsupportedVectorSize,
    VectorSizeMismatch,
    DataTypeMismatch,
    ComponentIndexOutOfBounds,
    CDataIndexOutOfBounds,
    StackOverflow,
    StackUnderflow,
    StackCorrupted,
    ExternalFunctionIdInvalid,
    ExternalFunctionFailed,
    ValidationFailed,
    Generic,
}

impl ErrorCode {
    /// The taxonomy bucket an error code belongs to.
    pub fn kind(&self) -> ErrorKind {
        use ErrorCode::*;
        match self {
            NoError | Generic => ErrorKind::Bytecode,
            PackageNotSet
            | PackageModeMismatch
            | UnsupportedLanguageVersion
            | NullRequiredPointer
            | InvalidLaneCount
            | ValidationModeIncompatible => ErrorKind::Setup,
            UnsupportedOpcodeAtRoot
            | UnsupportedOpcode
            | UnexpectedEndOfCode
            | InvalidJumpTarget
            | MalformedSequence
            | ConstantReferenceMalformed
            | CDataReferenceMalformed
            | InvalidSlot
            | StackOverflow
            | StackUnderflow
            | StackCorrupted => ErrorKind::Bytecode,
            UnsupportedVectorSize
            | VectorSizeMismatch
            | DataTypeMismatch
            | ComponentIndexOutOfBounds
            | CDataIndexOutOfBounds
            | ValidationFailed => ErrorKind::Shape,
            MaxIterationsExceeded => ErrorKind::Runaway,
            ExternalFunctionIdInvalid | ExternalFunctionFailed => ErrorKind::Host,
        }
    }

    /// Negative status code reported to callers that only see an integer.
    pub fn status(&self) -> i32 {
        use ErrorCode::*;
        match self {
            NoError => 0,
            PackageNotSet => -1,
            PackageModeMismatch => -2,
            UnsupportedLanguageVersion => -3,
            NullRequiredPointer => -4,
            InvalidLaneCount => -5,
            ValidationModeIncompatible => -6,
            MaxIterationsExceeded => -7,
            UnsupportedOpcodeAtRoot => -8,
            UnsupportedOpcode => -9,
            UnexpectedEndOfCode => -10,
            InvalidJumpTarget => -11,
            MalformedSequence => -12,
            ConstantReferenceMalformed => -13,
            CDataReferenceMalformed => -14,
            InvalidSlot => -15,
            UnsupportedVectorSize => -16,
            VectorSizeMismatch => -17,
            DataTypeMismatch => -18,
            ComponentIndexOutOfBounds => -19,
            CDataIndexOutOfBounds => -20,
            StackOverflow => -21,
            StackUnderflow => -22,
            StackCorrupted => -23,
            ExternalFunctionIdInvalid => -24,
            ExternalFunctionFailed => -25,
            ValidationFailed => -26,
            Generic => -100,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ErrorCode::*;
        let name = match self {
            NoError => "no_error",
            PackageNotSet => "package_not_set",
            PackageModeMismatch => "package_mode_mismatch",
            UnsupportedLanguageVersion => "unsupported_language_version",
            NullRequiredPointer => "null_required_pointer",
            InvalidLaneCount => "invalid_lane_count",
            ValidationModeIncompatible => "validation_mode_incompatible",
            MaxIterationsExceeded => "max_iterations_exceeded",
            UnsupportedOpcodeAtRoot => "unsupported_opcode_at_root",
            UnsupportedOpcode => "unsupported_opcode",
            UnexpectedEndOfCode => "unexpected_end_of_code",
            InvalidJumpTarget => "invalid_jump_target",
            MalformedSequence => "malformed_sequence",
            ConstantReferenceMalformed => "constant_reference_malformed",
            CDataReferenceMalformed => "cdata_reference_malformed",
            InvalidSlot => "invalid_slot",
            UnsupportedVectorSize => "unsupported_vector_size",
            VectorSizeMismatch => "vector_size_mismatch",
            DataTypeMismatch => "datatype_mismatch",
            ComponentIndexOutOfBounds => "component_index_out_of_bounds",
            CDataIndexOutOfBounds => "cdata_index_out_of_bounds",
            StackOverflow => "stack_overflow",
            StackUnderflow => "stack_underflow",
            StackCorrupted => "stack_corrupted",
            ExternalFunctionIdInvalid => "external_function_id_invalid",
            ExternalFunctionFailed => "external_function_failed",
            ValidationFailed => "validation_failed",
            Generic => "generic",
        };

        write!(f, "{name}")
    }
}

/// Where in the lifecycle of a call an error originated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caught before the main loop starts: package binding, buffers, modes.
    Setup,
    /// Structural problems with the code segment itself.
    Bytecode,
    /// Vector size, datatype, and index bound violations.
    Shape,
    /// The per-call iteration cap was exceeded.
    Runaway,
    /// Host (external) function resolution or invocation failed.
    Host,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub details: Option<String>,
    /// Byte offset into the code segment of the failing instruction, if known.
    pub offset: Option<usize>,
}

impl From<Box<dyn std::error::Error>> for Error {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        Error {
            kind: ErrorKind::Host,
            code: ErrorCode::Generic,
            details: Some(err.to_string()),
            offset: None,
        }
    }
}

impl Error {
    pub fn new(kind: ErrorKind, code: ErrorCode, details: Option<String>) -> Self {
        Error {
            kind,
            code,
            details,
            offset: None,
        }
    }

    /// Build an error whose kind follows from its code.
    pub fn from_code(code: ErrorCode, details: Option<String>) -> Self {
        Error::new(code.kind(), code, details)
    }

    /// Attach the code offset, keeping an offset that was already recorded
    /// closer to the failure.
    pub fn at(mut self, offset: usize) -> Self {
        if self.offset.is_none() {
            self.offset = Some(offset);
        }
        self
    }

    pub fn get_details(&self) -> Option<String> {
        self.details.clone()
    }

    pub fn status(&self) -> i32 {
        self.code.status()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Setup => "SetupError",
            ErrorKind::Bytecode => "BytecodeError",
            ErrorKind::Shape => "ShapeError",
            ErrorKind::Runaway => "RunawayError",
            ErrorKind::Host => "HostError",
        };
        match (&self.details, self.offset) {
            (Some(details), Some(off)) => write!(f, "{}{{{}@{}: {}}}", kind, self.code, off, details),
            (Some(details), None) => write!(f, "{}{{{}: {}}}", kind, self.code, details),
            (None, Some(off)) => write!(f, "{}{{{}@{}}}", kind, self.code, off),
            (None, None) => write!(f, "{}{{{}}}", kind, self.code),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

#[macro_export]
macro_rules! vm_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode};
        Err(Error::from_code(ErrorCode::$code, Some($str)))
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode};
        Err(Error::from_code(ErrorCode::$code, None))
    }};
}

#[macro_export]
macro_rules! setup_err {
    ($code:tt, $str:expr) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Setup, ErrorCode::$code, Some($str)))
    }};
    ($code:tt) => {{
        use $crate::common::{Error, ErrorCode, ErrorKind};
        Err(Error::new(ErrorKind::Setup, ErrorCode::$code, None))
    }};
}

#[test]
fn test_error_display() {
    let err = Error::from_code(ErrorCode::CDataIndexOutOfBounds, Some("index 7 of 4".to_owned()));
    assert_eq!("ShapeError{cdata_index_out_of_bounds: index 7 of 4}", err.to_string());

    let err = err.at(12);
    assert_eq!(
        "ShapeError{cdata_index_out_of_bounds@12: index 7 of 4}",
        err.to_string()
    );

    let err = Error::from_code(ErrorCode::MaxIterationsExceeded, None).at(3);
    assert_eq!("RunawayError{max_iterations_exceeded@3}", err.to_string());
}

#[test]
fn test_error_offset_is_sticky() {
    let err = Error::from_code(ErrorCode::InvalidSlot, None).at(5).at(40);
    assert_eq!(Some(5), err.offset);
}

#[test]
fn test_error_kinds() {
    assert_eq!(ErrorKind::Setup, ErrorCode::PackageNotSet.kind());
    assert_eq!(ErrorKind::Setup, ErrorCode::ValidationModeIncompatible.kind());
    assert_eq!(ErrorKind::Bytecode, ErrorCode::UnsupportedOpcodeAtRoot.kind());
    assert_eq!(ErrorKind::Shape, ErrorCode::VectorSizeMismatch.kind());
    assert_eq!(ErrorKind::Runaway, ErrorCode::MaxIterationsExceeded.kind());
    assert_eq!(ErrorKind::Host, ErrorCode::ExternalFunctionIdInvalid.kind());
}

#[test]
fn test_status_codes_are_negative_and_unique() {
    use std::collections::HashSet;
    use ErrorCode::*;

    let codes = [
        PackageNotSet,
        PackageModeMismatch,
        UnsupportedLanguageVersion,
        NullRequiredPointer,
        InvalidLaneCount,
        ValidationModeIncompatible,
        MaxIterationsExceeded,
        UnsupportedOpcodeAtRoot,
        UnsupportedOpcode,
        UnexpectedEndOfCode,
        InvalidJumpTarget,
        MalformedSequence,
        ConstantReferenceMalformed,
        CDataReferenceMalformed,
        InvalidSlot,
        UnsupportedVectorSize,
        VectorSizeMismatch,
        DataTypeMismatch,
        ComponentIndexOutOfBounds,
        CDataIndexOutOfBounds,
        StackOverflow,
        StackUnderflow,
        StackCorrupted,
        ExternalFunctionIdInvalid,
        ExternalFunctionFailed,
        ValidationFailed,
        Generic,
    ];
    let mut seen = HashSet::new();
    for code in codes {
        assert!(code.status() < 0, "{code} should map to a negative status");
        assert!(seen.insert(code.status()), "{code} reuses a status");
    }
    assert_eq!(0, NoError.status());
}

#[test]
fn test_macros() {
    let r: Result<()> = vm_err!(StackUnderflow);
    let err = r.unwrap_err();
    assert_eq!(ErrorKind::Bytecode, err.kind);
    assert_eq!(None, err.details);

    let r: Result<()> = setup_err!(InvalidLaneCount, "0 lanes".to_owned());
    let err = r.unwrap_err();
    assert_eq!(ErrorKind::Setup, err.kind);
    assert_eq!(Some("0 lanes".to_owned()), err.get_details());
}
