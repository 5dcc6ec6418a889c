//! Instruction stream decoding.
//!
//! Turns a raw symbolic body into a [`DecodedBody`] in two passes: first an
//! identity map from source labels to linear indices, then per-instruction
//! operand resolution. Decoding is deterministic, so re-running it over the
//! same input always produces byte-identical instructions.

use std::collections::HashMap;

use tracing::trace;

use crate::error::BindError;
use crate::metadata::{MethodBody, Operand, RawHandlerKind, RawInstruction};
use crate::method::body::{DecodedBody, ExceptionHandler, HandlerKind, Instruction, OpCode};
use crate::method::{InterpretedMethod, MethodRuntime};
use crate::registry::Registry;
use crate::types::generics::GenericContext;
use crate::types::TypeRuntime;

pub fn decode_body(
    registry: &Registry,
    method: &InterpretedMethod,
    raw: &MethodBody,
) -> Result<DecodedBody, BindError> {
    let type_args = registry.ty(method.declaring_type()).generic_arguments();
    let ctx = GenericContext::new(
        type_args.as_deref().unwrap_or(&[]),
        method.generic_args_slice(),
    );
    let display_name = method.display_name(registry);
    trace!(method = %display_name, instructions = raw.instructions.len(), "decoding body");

    // Pass 1: label identity to linear index. Only real instructions are
    // mapped; the end label closes handler ranges one past the last
    // instruction and is never a valid branch target.
    let mut addr = HashMap::with_capacity(raw.instructions.len());
    for (index, ins) in raw.instructions.iter().enumerate() {
        addr.insert(ins.label, index as u32);
    }

    let mut local_types = Vec::with_capacity(raw.locals.len());
    for local in &raw.locals {
        local_types.push(ctx.make_concrete(registry, local)?);
    }

    let mut jump_tables = HashMap::new();
    let mut table_keys = HashMap::new();
    let mut instructions = Vec::with_capacity(raw.instructions.len());
    for ins in &raw.instructions {
        instructions.push(resolve_instruction(
            registry,
            ctx,
            method,
            &display_name,
            &addr,
            &mut jump_tables,
            &mut table_keys,
            ins,
        )?);
    }

    // A `constrained.` prefix receives its callvirt's method token so the
    // dispatch loop can resolve both in one step. Raw opcodes are checked
    // because devirtualization may already have rewritten the callvirt.
    for i in 1..raw.instructions.len() {
        if raw.instructions[i].opcode == OpCode::Callvirt
            && raw.instructions[i - 1].opcode == OpCode::Constrained
        {
            instructions[i - 1].token_long = instructions[i].token as i64;
        }
    }

    let mut handlers = Vec::with_capacity(raw.handlers.len());
    for handler in &raw.handlers {
        let map = |label: u32| -> Result<u32, BindError> {
            if label == raw.end_label {
                return Ok(raw.instructions.len() as u32);
            }
            addr.get(&label)
                .copied()
                .ok_or_else(|| BindError::InvalidExceptionRange {
                    method: display_name.to_string(),
                    label,
                })
        };
        let kind = match &handler.kind {
            RawHandlerKind::Catch(r) => HandlerKind::Catch(ctx.make_concrete(registry, r)?),
            RawHandlerKind::Finally => HandlerKind::Finally,
            RawHandlerKind::Fault => HandlerKind::Fault,
        };
        handlers.push(ExceptionHandler {
            kind,
            try_start: map(handler.try_start)?,
            try_end: map(handler.try_end)?,
            handler_start: map(handler.handler_start)?,
            handler_end: map(handler.handler_end)?,
        });
    }

    Ok(DecodedBody {
        instructions: instructions.into(),
        handlers: handlers.into(),
        jump_tables,
        local_count: raw.locals.len(),
        local_types: local_types.into(),
    })
}

fn resolve_instruction(
    registry: &Registry,
    ctx: GenericContext<'_>,
    method: &InterpretedMethod,
    display_name: &str,
    addr: &HashMap<u32, u32>,
    jump_tables: &mut HashMap<i32, Box<[u32]>>,
    table_keys: &mut HashMap<Box<[u32]>, i32>,
    raw: &RawInstruction,
) -> Result<Instruction, BindError> {
    let mut ins = Instruction::new(raw.opcode);
    let malformed = || BindError::MalformedOperand {
        method: display_name.to_string(),
        opcode: raw.opcode,
    };
    let dangling = |target: u32| BindError::DanglingBranchTarget {
        method: display_name.to_string(),
        target,
    };

    if raw.opcode.is_branch() {
        let target = match raw.operand {
            Operand::Target(t) => t,
            _ => return Err(malformed()),
        };
        ins.token = *addr.get(&target).ok_or_else(|| dangling(target))? as i32;
        return Ok(ins);
    }

    match raw.opcode {
        OpCode::LdcI4 => match raw.operand {
            Operand::Int32(v) => ins.token = v,
            _ => return Err(malformed()),
        },
        OpCode::LdcI4S => match raw.operand {
            Operand::Int8(v) => ins.token = v as i32,
            _ => return Err(malformed()),
        },
        OpCode::LdcI8 => match raw.operand {
            Operand::Int64(v) => ins.token_long = v,
            _ => return Err(malformed()),
        },
        // Float literals keep their exact bit pattern; the executor
        // reinterprets, never converts.
        OpCode::LdcR4 => match raw.operand {
            Operand::Float32(v) => ins.token = v.to_bits() as i32,
            _ => return Err(malformed()),
        },
        OpCode::LdcR8 => match raw.operand {
            Operand::Float64(v) => ins.token_long = v.to_bits() as i64,
            _ => return Err(malformed()),
        },

        OpCode::Ldloc | OpCode::Ldloca | OpCode::Stloc => match raw.operand {
            Operand::Local(slot) => ins.token = slot as i32,
            _ => return Err(malformed()),
        },

        // Slot 0 is the receiver when present, so declared parameters
        // shift up by one.
        OpCode::Ldarg | OpCode::Ldarga | OpCode::Starg => match raw.operand {
            Operand::Argument(index) => {
                ins.token = index as i32 + i32::from(method.has_this());
            }
            _ => return Err(malformed()),
        },

        OpCode::Call
        | OpCode::Callvirt
        | OpCode::Newobj
        | OpCode::Ldftn
        | OpCode::Ldvirtftn
        | OpCode::Jmp => {
            let mref = match &raw.operand {
                Operand::Method(m) => m,
                _ => return Err(malformed()),
            };
            match registry.resolve_method_ref(mref, ctx) {
                Ok(mid) => {
                    ins.token = mid.0 as i32;
                    if raw.opcode == OpCode::Callvirt {
                        let callee = registry.method(mid);
                        let on_interface = registry.ty(callee.declaring_type()).is_interface();
                        if !callee.is_native()
                            && !callee.is_virtual()
                            && !callee.is_abstract()
                            && !on_interface
                        {
                            ins.opcode = OpCode::Call;
                        }
                    }
                }
                // The callee's module may not be loaded. Degrade to an
                // argument-count-only encoding, receiver included, and let
                // the executor resolve late or raise. -1 cannot collide
                // with a minted method id.
                Err(BindError::UnresolvedType(_)) | Err(BindError::UnresolvedMethod(_)) => {
                    ins.token = -1;
                    ins.token_long = (mref.params.len() + usize::from(mref.has_this)) as i64;
                }
                Err(e) => return Err(e),
            }
        }

        OpCode::Ldfld
        | OpCode::Ldflda
        | OpCode::Stfld
        | OpCode::Ldsfld
        | OpCode::Ldsflda
        | OpCode::Stsfld => {
            let fref = match &raw.operand {
                Operand::Field(f) => f,
                _ => return Err(malformed()),
            };
            ins.token_long = registry.field_token(fref, ctx)?;
        }

        OpCode::Newarr
        | OpCode::Box
        | OpCode::Unbox
        | OpCode::UnboxAny
        | OpCode::Castclass
        | OpCode::Isinst
        | OpCode::Initobj
        | OpCode::Ldobj
        | OpCode::Stobj
        | OpCode::Sizeof
        | OpCode::Constrained => {
            let r = match &raw.operand {
                Operand::Type(r) => r,
                _ => return Err(malformed()),
            };
            ins.token = ctx.make_concrete(registry, r)?.0 as i32;
        }

        OpCode::Ldstr => {
            let s = match &raw.operand {
                Operand::String(s) => s,
                _ => return Err(malformed()),
            };
            ins.token_long = registry.intern_string(s);
        }

        OpCode::Ldtoken => match &raw.operand {
            Operand::TokenField(fref) => {
                ins.token = 0;
                ins.token_long = registry.field_token(fref, ctx)?;
            }
            Operand::TokenType(r) => {
                ins.token = 1;
                ins.token_long = ctx.make_concrete(registry, r)?.0 as i64;
            }
            _ => return Err(malformed()),
        },

        OpCode::Switch => {
            let targets = match &raw.operand {
                Operand::Targets(t) => t,
                _ => return Err(malformed()),
            };
            let mut table = Vec::with_capacity(targets.len());
            for &target in targets {
                table.push(*addr.get(&target).ok_or_else(|| dangling(target))?);
            }
            // Identical raw tables share one decoded table; keys are issued
            // sequentially in first-occurrence order, so decode stays
            // deterministic and distinct tables can never collide.
            let key = match table_keys.get(targets.as_slice()) {
                Some(&key) => key,
                None => {
                    let key = jump_tables.len() as i32;
                    table_keys.insert(targets.as_slice().into(), key);
                    jump_tables.insert(key, table.into());
                    key
                }
            };
            ins.token = key;
        }

        _ => match raw.operand {
            Operand::None => {}
            _ => return Err(malformed()),
        },
    }

    Ok(ins)
}
