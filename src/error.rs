//! Error and exception-code types used across the core.
//!
//! The teacher crate represents CPU faults as a bare `u8` vector number
//! (`exception.rs`'s `Vector` enum, cast with `as u8`) because the M68k
//! exception model is purely a jump-table index. G10's `EC` register is both
//! that index *and* a user-visible diagnostic value (§7), so this crate
//! names the taxonomy as a proper enum with a `Display` impl instead, in the
//! same spirit as the teacher's own `Display` impls on its decoded types
//! (e.g. `instruction.rs`'s `impl Display for Instruction`).

use std::fmt;

/// Exception codes written to the `EC` register (§7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    Ok = 0,
    InvalidInstruction = 1,
    InvalidArgument = 2,
    InvalidReadAccess = 3,
    InvalidWriteAccess = 4,
    InvalidExecuteAccess = 5,
    DivideByZero = 6,
    StackOverflow = 7,
    StackUnderflow = 8,
    HardwareError = 9,
    DoubleFault = 10,
}

impl ExceptionCode {
    pub fn from_ec(ec: u8) -> Option<Self> {
        Some(match ec {
            0 => Self::Ok,
            1 => Self::InvalidInstruction,
            2 => Self::InvalidArgument,
            3 => Self::InvalidReadAccess,
            4 => Self::InvalidWriteAccess,
            5 => Self::InvalidExecuteAccess,
            6 => Self::DivideByZero,
            7 => Self::StackOverflow,
            8 => Self::StackUnderflow,
            9 => Self::HardwareError,
            10 => Self::DoubleFault,
            _ => return None,
        })
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::InvalidInstruction => "INVALID_INSTRUCTION",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidReadAccess => "INVALID_READ_ACCESS",
            Self::InvalidWriteAccess => "INVALID_WRITE_ACCESS",
            Self::InvalidExecuteAccess => "INVALID_EXECUTE_ACCESS",
            Self::DivideByZero => "DIVIDE_BY_ZERO",
            Self::StackOverflow => "STACK_OVERFLOW",
            Self::StackUnderflow => "STACK_UNDERFLOW",
            Self::HardwareError => "HARDWARE_ERROR",
            Self::DoubleFault => "DOUBLE_FAULT",
        };
        f.write_str(name)
    }
}

/// Errors produced while reading or writing a §6.1 object file.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    #[error("not a G10 object file (bad magic)")]
    BadMagic,
    #[error("unsupported object file version {0:#06x}")]
    UnsupportedVersion(u16),
    #[error("truncated object file: wanted {wanted} bytes, got {got}")]
    Truncated { wanted: usize, got: usize },
    #[error("string table is not null-terminated")]
    StringTableNotTerminated,
    #[error("string table offset {0:#x} out of range")]
    InvalidStringOffset(u32),
    #[error("invalid {field} value {value:#x}")]
    InvalidFieldValue { field: &'static str, value: u8 },
}

/// Errors produced by the linker (§4.4) or the §6.2 executable writer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("duplicate global symbol '{0}'")]
    DuplicateGlobalSymbol(String),
    #[error("undefined symbol '{0}'")]
    UndefinedSymbol(String),
    #[error("segments at {a:#010x} and {b:#010x} overlap")]
    OverlappingSegments { a: u32, b: u32 },
    #[error("no entry point found (no main/_start/start symbol or label)")]
    EntryPointNotFound,
    #[error("entry point {0:#010x} is not in ROM")]
    EntryPointNotInRom(u32),
    #[error("initial stack pointer {0:#010x} is not in RAM")]
    StackPointerNotInRam(u32),
    #[error(transparent)]
    Object(#[from] ObjectError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_code_round_trips() {
        for ec in 0..=10u8 {
            let code = ExceptionCode::from_ec(ec).unwrap();
            assert_eq!(code as u8, ec);
        }
        assert!(ExceptionCode::from_ec(11).is_none());
    }

    #[test]
    fn display_names_are_screaming_snake_case() {
        assert_eq!(ExceptionCode::InvalidInstruction.to_string(), "INVALID_INSTRUCTION");
        assert_eq!(ExceptionCode::DoubleFault.to_string(), "DOUBLE_FAULT");
    }
}
