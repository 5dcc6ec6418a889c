//! Decoded method body representation.
//!
//! After decode every instruction carries its operand as a pair of integer
//! tokens. Branch targets are absolute indices into the decoded instruction
//! array, never source labels, so the dispatch loop can jump without any
//! further translation.

use std::collections::HashMap;

use crate::registry::TypeId;

/// Instruction set consumed by the binding layer.
///
/// Only the operand class matters for decoding, so near-identical opcodes
/// (e.g. the short branch forms) are normalized by the reader before they
/// reach this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Nop,
    Dup,
    Pop,
    Ret,
    Throw,
    Rethrow,
    Endfinally,

    // branches
    Br,
    Brtrue,
    Brfalse,
    Beq,
    Bne,
    Bge,
    Bgt,
    Ble,
    Blt,
    Leave,
    Switch,

    // literals
    LdcI4,
    LdcI4S,
    LdcI8,
    LdcR4,
    LdcR8,
    Ldnull,
    Ldstr,

    // locals and arguments
    Ldloc,
    Ldloca,
    Stloc,
    Ldarg,
    Ldarga,
    Starg,

    // call family
    Call,
    Callvirt,
    Newobj,
    Ldftn,
    Ldvirtftn,
    Jmp,

    // fields
    Ldfld,
    Ldflda,
    Stfld,
    Ldsfld,
    Ldsflda,
    Stsfld,

    // type operations
    Newarr,
    Box,
    Unbox,
    UnboxAny,
    Castclass,
    Isinst,
    Initobj,
    Ldobj,
    Stobj,
    Sizeof,
    Constrained,
    Ldtoken,

    // untyped arithmetic, kept opaque here
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Not,
    Ceq,
    Cgt,
    Clt,
}

impl OpCode {
    /// Single-target branch instructions (not `Switch`).
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            OpCode::Br
                | OpCode::Brtrue
                | OpCode::Brfalse
                | OpCode::Beq
                | OpCode::Bne
                | OpCode::Bge
                | OpCode::Bgt
                | OpCode::Ble
                | OpCode::Blt
                | OpCode::Leave
        )
    }

    pub fn is_call(self) -> bool {
        matches!(
            self,
            OpCode::Call
                | OpCode::Callvirt
                | OpCode::Newobj
                | OpCode::Ldftn
                | OpCode::Ldvirtftn
                | OpCode::Jmp
        )
    }

    pub fn is_field_access(self) -> bool {
        matches!(
            self,
            OpCode::Ldfld
                | OpCode::Ldflda
                | OpCode::Stfld
                | OpCode::Ldsfld
                | OpCode::Ldsflda
                | OpCode::Stsfld
        )
    }
}

/// One resolved instruction.
///
/// `token` and `token_long` carry the decoded operand; which one is
/// meaningful depends on the opcode. Literals store raw bit patterns
/// (`f32::to_bits` for `ldc.r4`), so re-decoding a method always yields
/// byte-identical instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub token: i32,
    pub token_long: i64,
}

impl Instruction {
    pub fn new(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            token: 0,
            token_long: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Catch(TypeId),
    Finally,
    Fault,
}

/// Protected region over decoded instruction indices, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub kind: HandlerKind,
    pub try_start: u32,
    pub try_end: u32,
    pub handler_start: u32,
    pub handler_end: u32,
}

/// Fully decoded body, immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct DecodedBody {
    pub instructions: Box<[Instruction]>,
    pub handlers: Box<[ExceptionHandler]>,
    /// Switch jump tables, keyed by the owning instruction's `token`.
    pub jump_tables: HashMap<i32, Box<[u32]>>,
    pub local_count: usize,
    pub local_types: Box<[TypeId]>,
}

impl DecodedBody {
    /// Body of an abstract or extern method.
    pub fn empty() -> Self {
        DecodedBody::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_classes_do_not_overlap() {
        assert!(OpCode::Leave.is_branch());
        assert!(!OpCode::Switch.is_branch());
        assert!(OpCode::Newobj.is_call());
        assert!(OpCode::Ldsflda.is_field_access());
        assert!(!OpCode::Ldloca.is_field_access());
        assert!(!OpCode::Constrained.is_call());
    }
}
