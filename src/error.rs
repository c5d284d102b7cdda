//! The two error taxonomies of the machine: faults raised while loading a
//! file image and faults raised while executing bytecode.
//!
//! Both are plain status codes. Nothing is retried internally and nothing
//! is swallowed; the first error unwinds to the host, which is the sole
//! arbiter of recovery.

use thiserror::Error;

/// A fault detected while parsing or installing an AMX file image.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    #[error("malformed AMX file")]
    InvalidFile,
    #[error("unsupported file format version")]
    UnsupportedFileVersion,
    #[error("file targets a newer abstract machine revision")]
    UnsupportedAmxVersion,
    #[error("file uses a feature outside this machine's scope")]
    FeatureNotSupported,
    #[error("file was compiled for a different cell width")]
    WrongCellSize,
    #[error("native function referenced by the file is not provided by the host")]
    NativeNotResolved,
    #[error("loader failed for an unspecified reason")]
    Unknown,
}

/// A fault raised by the interpreter while executing bytecode.
///
/// [`RunError::Halt`] is not a machine fault: it reports that the program
/// executed a `halt` instruction, with the halt code left in `PRI`. All
/// other variants are fatal to the current call, but the machine stays
/// usable; a host may [`reset_stack`](crate::vm::Amx::reset_stack) and
/// issue a fresh call.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RunError {
    #[error("data access outside the mapped guest address space")]
    AccessViolation,
    #[error("code access outside the code segment")]
    AccessViolationCode,
    #[error("undecodable instruction")]
    InvalidInstruction,
    #[error("operand outside the range its instruction accepts")]
    InvalidOperand,
    #[error("division with zero")]
    DivisionWithZero,
    #[error("program executed a halt instruction")]
    Halt,
    #[error("value above its declared array bound")]
    Bounds,
    #[error("host callback aborted execution")]
    CallbackAbort,
}
