//! Generic parameter substitution.
//!
//! A [`GenericContext`] pairs the declaring type's bound arguments with the
//! method's own, and [`GenericContext::make_concrete`] rewrites a symbolic
//! [`TypeRef`] into a registry [`TypeId`], recursing through arrays, by-refs,
//! pointers, and nested generic instances.

use crate::error::BindError;
use crate::metadata::{ParamOwner, TypeRef};
use crate::registry::{Registry, TypeId};
use crate::sync::Arc;

/// Bound generic arguments, name to concrete type, in declaration order.
pub type GenericArgs = Arc<[(String, TypeId)]>;

#[derive(Debug, Clone, Copy, Default)]
pub struct GenericContext<'a> {
    pub type_args: &'a [(String, TypeId)],
    pub method_args: &'a [(String, TypeId)],
}

impl<'a> GenericContext<'a> {
    pub const EMPTY: GenericContext<'static> = GenericContext {
        type_args: &[],
        method_args: &[],
    };

    pub fn new(type_args: &'a [(String, TypeId)], method_args: &'a [(String, TypeId)]) -> Self {
        GenericContext {
            type_args,
            method_args,
        }
    }

    /// Look up a bound argument by name, type-level first.
    pub fn find(&self, name: &str) -> Option<TypeId> {
        self.type_args
            .iter()
            .chain(self.method_args.iter())
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    /// Resolve a symbolic reference to a concrete registered type.
    ///
    /// Substitution is total: if a parameter cannot be bound from either
    /// argument list the reference is unresolvable and the caller decides
    /// whether that is fatal (a `ldtoken` operand) or degradable (a call
    /// operand).
    pub fn make_concrete(&self, registry: &Registry, r: &TypeRef) -> Result<TypeId, BindError> {
        match r {
            TypeRef::Named(name) => registry
                .get_type_by_name(name)
                .ok_or_else(|| BindError::UnresolvedType(name.clone())),
            TypeRef::Param {
                name,
                position,
                owner,
            } => self.resolve_param(registry, name, *position, *owner),
            TypeRef::GenericInstance { base, args } => {
                let mut resolved = Vec::with_capacity(args.len());
                for arg in args {
                    resolved.push(self.make_concrete(registry, arg)?);
                }
                let base = self.make_concrete(registry, base)?;
                registry.make_generic_instance(base, &resolved)
            }
            TypeRef::Array { element, rank } => {
                let element = self.make_concrete(registry, element)?;
                Ok(registry.make_array_type(element, *rank))
            }
            TypeRef::ByRef(element) => {
                let element = self.make_concrete(registry, element)?;
                Ok(registry.make_by_ref_type(element))
            }
            TypeRef::Pointer(element) => {
                let element = self.make_concrete(registry, element)?;
                Ok(registry.make_pointer_type(element))
            }
        }
    }

    fn resolve_param(
        &self,
        registry: &Registry,
        name: &str,
        position: u32,
        owner: ParamOwner,
    ) -> Result<TypeId, BindError> {
        match owner {
            ParamOwner::Type => self
                .type_args
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id)
                .ok_or_else(|| BindError::UnresolvedType(name.to_string())),
            ParamOwner::Method => {
                if let Some((_, id)) = self.method_args.iter().find(|(n, _)| n == name) {
                    return Ok(*id);
                }
                // Renamed parameters in specialized references fall back to
                // their declared position.
                self.method_args
                    .get(position as usize)
                    .map(|(_, id)| *id)
                    .ok_or_else(|| BindError::UnresolvedType(name.to_string()))
            }
            // Unattributed parameters come from damaged metadata. Try the
            // method list positionally, then degrade to object.
            ParamOwner::None => Ok(self
                .method_args
                .get(position as usize)
                .map(|(_, id)| *id)
                .unwrap_or_else(|| registry.object_type())),
        }
    }
}
