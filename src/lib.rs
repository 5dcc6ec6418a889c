//! Type-and-method binding layer for a CIL bytecode interpreter.
//!
//! This crate turns a serialized program (instruction streams plus metadata
//! describing types, fields, methods, and generics) into a resolved
//! in-memory representation the execution engine can dispatch over, and
//! unifies interpreted types with adapters over host-registered native
//! types. Instruction *semantics* are out of scope; only what a reference
//! resolves to and how operands are pre-decoded.
//!
//! Entry points:
//! - [`Registry`] owns every type and method and exposes the resolution
//!   surface (`load_module`, `register_native`, `resolve_method_ref`, ...).
//! - [`method::InterpretedMethod::body`] decodes an instruction stream on
//!   first use.
//! - [`prewarm::prewarm`] forces resolution eagerly.

pub mod error;
pub mod host;
pub mod metadata;
pub mod method;
pub mod metrics;
pub mod prewarm;
pub mod registry;
pub mod sync;
pub mod types;

pub use error::BindError;
pub use registry::{pack_field_token, unpack_field_token, MethodId, Registry, TypeId};
pub use types::{GenericContext, RuntimeType, TypeRuntime};

pub use method::{MethodRuntime, RuntimeMethod};
