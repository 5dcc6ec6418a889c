use thiserror::Error;

use crate::method::body::OpCode;

/// Errors surfaced by the binding layer.
///
/// Resolution failures (`UnresolvedType`, `UnresolvedMethod`,
/// `UnresolvedField`) indicate malformed input or a missing module dependency
/// and are surfaced to the caller without retry. Decode-time structural
/// violations (`DanglingBranchTarget`, `InvalidExceptionRange`,
/// `MalformedOperand`) are fatal for the method being decoded but do not
/// affect sibling methods.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BindError {
    #[error("type not found: {0}")]
    UnresolvedType(String),

    #[error("method not found: {0}")]
    UnresolvedMethod(String),

    #[error("field not found: {0}")]
    UnresolvedField(String),

    #[error("branch target {target:#x} does not exist while decoding {method}")]
    DanglingBranchTarget { method: String, target: u32 },

    #[error("exception handler range refers to unknown label {label:#x} in {method}")]
    InvalidExceptionRange { method: String, label: u32 },

    #[error("operand does not fit opcode {opcode:?} in {method}")]
    MalformedOperand { method: String, opcode: OpCode },

    #[error("no conversion path between native and interpreted representation: {0}")]
    UnsupportedConversion(String),

    #[error("generic index {index} out of bounds (length {length})")]
    GenericIndexOutOfBounds { index: usize, length: usize },
}
