//! Runtime type representation.
//!
//! Every type the interpreter can see is a [`RuntimeType`]: either an adapter
//! over a host-registered native descriptor or a type defined by loaded
//! metadata. Both variants expose the same lookup surface through
//! [`TypeRuntime`], so call sites never branch on the origin of a type.

pub mod generics;
pub mod interpreted;
pub mod native;

use enum_dispatch::enum_dispatch;

use crate::error::BindError;
use crate::metadata::TypeRef;
use crate::method::{MethodRuntime, RuntimeMethod};
use crate::registry::{MethodId, Registry, TypeId};
use crate::sync::Arc;

pub use generics::{GenericArgs, GenericContext};
pub use interpreted::InterpretedType;
pub use native::{NativeField, NativeType};

/// Derived-type shapes layered over an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeShape {
    Array(u8),
    ByRef,
    Pointer,
}

/// Field resolved through a type's member cache.
#[derive(Debug, Clone)]
pub enum ResolvedField {
    Interpreted(FieldDescription),
    Native(Arc<NativeField>),
}

impl ResolvedField {
    pub fn name(&self) -> &str {
        match self {
            ResolvedField::Interpreted(f) => &f.name,
            ResolvedField::Native(f) => &f.name,
        }
    }

    pub fn field_type(&self) -> TypeId {
        match self {
            ResolvedField::Interpreted(f) => f.ty,
            ResolvedField::Native(f) => f.ty,
        }
    }

    pub fn is_static(&self) -> bool {
        match self {
            ResolvedField::Interpreted(f) => f.is_static,
            ResolvedField::Native(f) => f.is_static,
        }
    }
}

/// Field declared by an interpreted type, with its slot index.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub declaring: TypeId,
    pub index: u32,
    pub name: String,
    pub ty: TypeId,
    pub is_static: bool,
}

/// Uniform capability surface over native and interpreted types.
#[enum_dispatch]
pub trait TypeRuntime {
    fn id(&self) -> TypeId;
    fn name(&self) -> &str;
    fn is_native(&self) -> bool;
    fn is_value_type(&self) -> bool;
    fn is_interface(&self) -> bool;
    fn is_delegate(&self) -> bool;

    /// `Some` for array/by-ref/pointer types derived from an element type.
    fn shape(&self) -> Option<TypeShape>;
    fn element_type(&self) -> Option<TypeId>;

    /// Bound generic arguments, `None` for non-generic types and open
    /// definitions.
    fn generic_arguments(&self) -> Option<GenericArgs>;
    fn generic_param_names(&self) -> &[String];
    fn generic_definition(&self) -> Option<TypeId>;
    fn find_generic_argument(&self, name: &str) -> Option<TypeId>;

    fn base_type(&self, registry: &Registry) -> Result<Option<TypeId>, BindError>;
    fn interfaces(&self, registry: &Registry) -> Result<Arc<[TypeId]>, BindError>;

    /// Overload-resolving method lookup, recursing to the base type on miss.
    fn get_method(
        &self,
        registry: &Registry,
        name: &str,
        params: &[TypeId],
        generic_args: Option<&[TypeId]>,
        return_type: Option<TypeId>,
    ) -> Result<Option<MethodId>, BindError>;

    /// Arity-only lookup used when parameter types are unknown.
    fn get_method_by_arity(
        &self,
        registry: &Registry,
        name: &str,
        param_count: usize,
    ) -> Result<Option<MethodId>, BindError>;

    fn get_constructor(
        &self,
        registry: &Registry,
        params: &[TypeId],
    ) -> Result<Option<MethodId>, BindError>;

    /// Field key for a field declared directly on this type, not inherited.
    fn own_field_token(&self, registry: &Registry, name: &str) -> Result<Option<i64>, BindError>;

    /// Field declared on this type at the given slot index.
    fn get_field(&self, registry: &Registry, index: u32) -> Result<Option<ResolvedField>, BindError>;

    /// All declared methods, forcing member population.
    fn methods(&self, registry: &Registry) -> Result<Vec<MethodId>, BindError>;

    /// Instance-field types in declaration order, for value-type layout.
    fn instance_field_types(&self, registry: &Registry) -> Result<Arc<[TypeId]>, BindError>;

    fn make_generic_instance(
        &self,
        registry: &Registry,
        args: &[TypeId],
    ) -> Result<TypeId, BindError>;

    /// Force member caches, for prewarming.
    fn prewarm_members(&self, registry: &Registry) -> Result<(), BindError>;
}

#[enum_dispatch(TypeRuntime)]
#[derive(Debug)]
pub enum RuntimeType {
    Native(NativeType),
    Interpreted(InterpretedType),
}

pub(crate) fn strip_by_ref(r: &TypeRef) -> &TypeRef {
    match r {
        TypeRef::ByRef(inner) => inner,
        other => other,
    }
}

fn strip_actual(registry: &Registry, id: TypeId) -> TypeId {
    let ty = registry.ty(id);
    match ty.shape() {
        Some(TypeShape::ByRef) => ty.element_type().unwrap_or(id),
        _ => id,
    }
}

/// Whether a candidate overload accepts the given concrete signature.
///
/// Exact `TypeId` equality decides each parameter unless the declared
/// reference mentions a generic parameter, in which case the declared shape
/// is matched structurally against the actual type and the candidate's bound
/// (or requested) generic arguments.
pub(crate) fn method_matches(
    registry: &Registry,
    candidate: &RuntimeMethod,
    params: &[TypeId],
    generic_args: Option<&[TypeId]>,
    return_type: Option<TypeId>,
) -> Result<bool, BindError> {
    if candidate.param_count() != params.len() {
        return Ok(false);
    }
    match generic_args {
        Some(args) => {
            if candidate.generic_param_count() != args.len() {
                return Ok(false);
            }
        }
        None => {
            if candidate.generic_param_count() != 0 && !candidate.is_generic_instance() {
                return Ok(false);
            }
        }
    }

    let declared = candidate.declared_param_refs();
    let gp_names = candidate.generic_param_names();
    let declaring = registry.ty(candidate.declaring_type());
    let type_args = declaring.generic_arguments();
    let method_args = candidate.generic_arguments();
    let ctx = GenericContext::new(
        type_args.as_deref().unwrap_or(&[]),
        method_args.as_deref().unwrap_or(&[]),
    );

    for (i, &actual) in params.iter().enumerate() {
        let decl = strip_by_ref(&declared[i]);
        // Parameters the candidate's context binds compare exactly; only a
        // genuinely unbound generic parameter falls back to structural
        // matching against the requested argument tuple.
        match ctx.make_concrete(registry, decl) {
            Ok(resolved) => {
                if strip_actual(registry, actual) != strip_actual(registry, resolved) {
                    return Ok(false);
                }
            }
            Err(_) if decl.has_generic_param() => {
                let actual = strip_actual(registry, actual);
                if !match_generic(registry, gp_names, decl, actual, generic_args)? {
                    return Ok(false);
                }
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(want) = return_type {
        let ret = candidate.return_type(registry)?;
        if ret != want {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Structural match of a generic-parameter-bearing declared shape against a
/// concrete type.
///
/// A bare parameter position matches anything the bound argument list allows:
/// if `generic_args` pins the parameter it must equal the actual type,
/// otherwise any actual type is accepted (the instantiation will bind it).
pub(crate) fn match_generic(
    registry: &Registry,
    gp_names: &[String],
    declared: &TypeRef,
    actual: TypeId,
    generic_args: Option<&[TypeId]>,
) -> Result<bool, BindError> {
    match declared {
        TypeRef::Param { name, position, .. } => {
            let index = gp_names
                .iter()
                .position(|n| n == name)
                .unwrap_or(*position as usize);
            match generic_args.and_then(|args| args.get(index)) {
                Some(&pinned) => Ok(pinned == actual),
                None => Ok(true),
            }
        }
        TypeRef::Named(name) => {
            let actual_ty = registry.ty(actual);
            Ok(actual_ty.shape().is_none() && actual_ty.name() == name)
        }
        TypeRef::Array { element, rank } => {
            let actual_ty = registry.ty(actual);
            match (actual_ty.shape(), actual_ty.element_type()) {
                (Some(TypeShape::Array(r)), Some(e)) if r == *rank => {
                    match_generic(registry, gp_names, element, e, generic_args)
                }
                _ => Ok(false),
            }
        }
        TypeRef::ByRef(element) | TypeRef::Pointer(element) => {
            let actual_ty = registry.ty(actual);
            match actual_ty.element_type() {
                Some(e) if actual_ty.shape().is_some() => {
                    match_generic(registry, gp_names, element, e, generic_args)
                }
                _ => match_generic(registry, gp_names, element, actual, generic_args),
            }
        }
        TypeRef::GenericInstance { base, args } => {
            let actual_ty = registry.ty(actual);
            let bound = match actual_ty.generic_arguments() {
                Some(bound) => bound,
                None => return Ok(false),
            };
            if bound.len() != args.len() {
                return Ok(false);
            }
            let base_name = match base.as_ref() {
                TypeRef::Named(n) => n.as_str(),
                _ => return Ok(false),
            };
            let definition = actual_ty
                .generic_definition()
                .map(|d| registry.ty(d))
                .ok_or_else(|| BindError::UnresolvedType(base_name.to_string()))?;
            if definition.name() != base_name {
                return Ok(false);
            }
            for (declared_arg, (_, actual_arg)) in args.iter().zip(bound.iter()) {
                if !match_generic(registry, gp_names, declared_arg, *actual_arg, generic_args)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

/// Display name for a derived (array/by-ref/pointer) type.
pub(crate) fn shaped_name(element: &str, shape: TypeShape) -> String {
    match shape {
        TypeShape::Array(1) => format!("{element}[]"),
        TypeShape::Array(rank) => {
            let commas = ",".repeat(rank.saturating_sub(1) as usize);
            format!("{element}[{commas}]")
        }
        TypeShape::ByRef => format!("{element}&"),
        TypeShape::Pointer => format!("{element}*"),
    }
}
