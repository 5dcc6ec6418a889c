//! Object model handed over by the metadata reader.
//!
//! The reader itself (file parsing, heaps, signature blobs) lives outside
//! this crate; the binding layer only consumes the already-materialized
//! shapes below. Instruction operands arrive symbolic ([`Operand`]) and are
//! turned into compact resolved tokens during decode.

use std::sync::Arc;

use crate::method::body::OpCode;

/// One loaded module: a named bag of type definitions.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub types: Vec<Arc<TypeDef>>,
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Full name, e.g. `Game.Player`.
    pub name: String,
    pub base: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub is_value_type: bool,
    pub is_interface: bool,
    pub is_delegate: bool,
    pub generic_params: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<Arc<MethodDef>>,
}

impl Default for TypeDef {
    fn default() -> Self {
        TypeDef {
            name: String::new(),
            base: Some(TypeRef::named("System.Object")),
            interfaces: vec![],
            is_value_type: false,
            is_interface: false,
            is_delegate: false,
            generic_params: vec![],
            fields: vec![],
            methods: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
    pub is_static: bool,
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    pub has_this: bool,
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_constructor: bool,
    pub generic_params: Vec<String>,
    pub params: Vec<TypeRef>,
    pub return_type: TypeRef,
    pub body: Option<Arc<MethodBody>>,
}

impl Default for MethodDef {
    fn default() -> Self {
        MethodDef {
            name: String::new(),
            has_this: false,
            is_virtual: false,
            is_abstract: false,
            is_constructor: false,
            generic_params: vec![],
            params: vec![],
            return_type: TypeRef::named("System.Void"),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    pub locals: Vec<TypeRef>,
    pub instructions: Vec<RawInstruction>,
    /// Label one past the final instruction; handler ranges may end here.
    pub end_label: u32,
    pub handlers: Vec<RawHandler>,
}

/// An instruction as read from the module, before token resolution.
///
/// `label` is the instruction's original identity (its offset in the source
/// stream); branch operands refer to these labels.
#[derive(Debug, Clone)]
pub struct RawInstruction {
    pub label: u32,
    pub opcode: OpCode,
    pub operand: Operand,
}

impl RawInstruction {
    pub fn new(label: u32, opcode: OpCode, operand: Operand) -> Self {
        RawInstruction {
            label,
            opcode,
            operand,
        }
    }

    pub fn simple(label: u32, opcode: OpCode) -> Self {
        Self::new(label, opcode, Operand::None)
    }
}

#[derive(Debug, Clone)]
pub enum Operand {
    None,
    /// Branch target label.
    Target(u32),
    /// Switch jump table, as target labels.
    Targets(Vec<u32>),
    Int8(i8),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Local(u16),
    Argument(u16),
    Method(MethodRef),
    Field(FieldRef),
    Type(TypeRef),
    String(String),
    /// `ldtoken` on a field handle.
    TokenField(FieldRef),
    /// `ldtoken` on a type handle.
    TokenType(TypeRef),
}

/// Which argument list a generic parameter draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamOwner {
    Type,
    Method,
    /// Malformed input: the reader could not attribute the parameter.
    None,
}

/// Symbolic type reference, resolved against the registry plus the current
/// generic context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(String),
    Param {
        name: String,
        position: u32,
        owner: ParamOwner,
    },
    GenericInstance {
        base: Box<TypeRef>,
        args: Vec<TypeRef>,
    },
    Array {
        element: Box<TypeRef>,
        rank: u8,
    },
    ByRef(Box<TypeRef>),
    Pointer(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: &str) -> Self {
        TypeRef::Named(name.to_string())
    }

    pub fn type_param(name: &str, position: u32) -> Self {
        TypeRef::Param {
            name: name.to_string(),
            position,
            owner: ParamOwner::Type,
        }
    }

    pub fn method_param(name: &str, position: u32) -> Self {
        TypeRef::Param {
            name: name.to_string(),
            position,
            owner: ParamOwner::Method,
        }
    }

    pub fn array(element: TypeRef) -> Self {
        TypeRef::Array {
            element: Box::new(element),
            rank: 1,
        }
    }

    pub fn generic(base: TypeRef, args: Vec<TypeRef>) -> Self {
        TypeRef::GenericInstance {
            base: Box::new(base),
            args,
        }
    }

    /// Whether any generic parameter occurs anywhere in this reference.
    pub fn has_generic_param(&self) -> bool {
        match self {
            TypeRef::Named(_) => false,
            TypeRef::Param { .. } => true,
            TypeRef::GenericInstance { args, .. } => args.iter().any(TypeRef::has_generic_param),
            TypeRef::Array { element, .. } => element.has_generic_param(),
            TypeRef::ByRef(e) | TypeRef::Pointer(e) => e.has_generic_param(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MethodRef {
    pub parent: TypeRef,
    pub name: String,
    pub has_this: bool,
    pub params: Vec<TypeRef>,
    pub return_type: Option<TypeRef>,
    pub generic_args: Vec<TypeRef>,
}

impl MethodRef {
    pub fn new(parent: TypeRef, name: &str, has_this: bool, params: Vec<TypeRef>) -> Self {
        MethodRef {
            parent,
            name: name.to_string(),
            has_this,
            params,
            return_type: None,
            generic_args: vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldRef {
    pub parent: TypeRef,
    pub name: String,
}

impl FieldRef {
    pub fn new(parent: TypeRef, name: &str) -> Self {
        FieldRef {
            parent,
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawHandler {
    pub kind: RawHandlerKind,
    pub try_start: u32,
    pub try_end: u32,
    pub handler_start: u32,
    pub handler_end: u32,
}

#[derive(Debug, Clone)]
pub enum RawHandlerKind {
    Catch(TypeRef),
    Finally,
    Fault,
}
