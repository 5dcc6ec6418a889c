//! Adapter over one host-registered native type.
//!
//! Members are populated whole-type on first access: fields, methods, and
//! constructors all at once, so a single lock acquisition settles every
//! later lookup. Generic instantiation is serialized per definition and
//! memoized by structural equality of the argument tuple.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::error::BindError;
use crate::host::{FieldAccessors, HostValue, NativeTypeDesc};
use crate::method::{MethodRuntime, NativeMethod};
use crate::registry::{pack_field_token, MethodId, Registry, TypeId};
use crate::sync::{Arc, Mutex, RwLock};
use crate::types::generics::{GenericArgs, GenericContext};
use crate::types::{
    method_matches, shaped_name, ResolvedField, RuntimeType, TypeRuntime, TypeShape,
};

/// Field of a native type, with its resolved type and host binding.
#[derive(Clone)]
pub struct NativeField {
    pub declaring: TypeId,
    pub index: u32,
    pub name: String,
    pub ty: TypeId,
    pub is_static: bool,
    pub handle: u64,
    pub accessors: Option<FieldAccessors>,
}

impl fmt::Debug for NativeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeField")
            .field("declaring", &self.declaring)
            .field("index", &self.index)
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("is_static", &self.is_static)
            .finish()
    }
}

struct NativeMembers {
    methods: Vec<MethodId>,
    methods_by_name: HashMap<String, Vec<usize>>,
    constructors: Vec<MethodId>,
    fields: Vec<Arc<NativeField>>,
    fields_by_name: HashMap<String, u32>,
    instance_field_types: Arc<[TypeId]>,
}

pub struct NativeType {
    id: TypeId,
    name: String,
    desc: Arc<NativeTypeDesc>,
    shape: Option<TypeShape>,
    element: Option<TypeId>,
    generic_args: Option<GenericArgs>,
    generic_definition: Option<TypeId>,

    base: RwLock<Option<Option<TypeId>>>,
    interfaces: RwLock<Option<Arc<[TypeId]>>>,
    members: RwLock<Option<Arc<NativeMembers>>>,
    /// Instantiations of this definition, keyed by argument tuple. The lock
    /// also serializes creation so each tuple maps to exactly one id.
    generic_instances: Mutex<Vec<(Box<[TypeId]>, TypeId)>>,
    /// Specializations of generic method overloads declared here.
    specializations: Mutex<HashMap<(MethodId, Box<[TypeId]>), MethodId>>,
}

impl fmt::Debug for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeType")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl NativeType {
    /// A plain native type or an open generic definition.
    pub fn definition(id: TypeId, desc: Arc<NativeTypeDesc>) -> Self {
        NativeType {
            id,
            name: desc.name.clone(),
            desc,
            shape: None,
            element: None,
            generic_args: None,
            generic_definition: None,
            base: RwLock::new(None),
            interfaces: RwLock::new(None),
            members: RwLock::new(None),
            generic_instances: Mutex::new(Vec::new()),
            specializations: Mutex::new(HashMap::new()),
        }
    }

    fn instance_of(id: TypeId, definition: &NativeType, name: String, args: GenericArgs) -> Self {
        NativeType {
            id,
            name,
            desc: definition.desc.clone(),
            shape: None,
            element: None,
            generic_args: Some(args),
            generic_definition: Some(definition.id),
            base: RwLock::new(None),
            interfaces: RwLock::new(None),
            members: RwLock::new(None),
            generic_instances: Mutex::new(Vec::new()),
            specializations: Mutex::new(HashMap::new()),
        }
    }

    /// Array/by-ref/pointer type over an element. Shaped types have no
    /// members of their own; lookups resolve against the base type.
    pub fn shaped(id: TypeId, element: TypeId, element_name: &str, shape: TypeShape) -> Self {
        let base = match shape {
            TypeShape::Array(_) => Some(crate::metadata::TypeRef::named("System.Array")),
            _ => Some(crate::metadata::TypeRef::named("System.Object")),
        };
        let desc = NativeTypeDesc {
            base,
            ..NativeTypeDesc::new(&shaped_name(element_name, shape))
        };
        let name = desc.name.clone();
        NativeType {
            id,
            name,
            desc: Arc::new(desc),
            shape: Some(shape),
            element: Some(element),
            generic_args: None,
            generic_definition: None,
            base: RwLock::new(None),
            interfaces: RwLock::new(None),
            members: RwLock::new(None),
            generic_instances: Mutex::new(Vec::new()),
            specializations: Mutex::new(HashMap::new()),
        }
    }

    fn context(&self) -> GenericContext<'_> {
        GenericContext::new(self.generic_args.as_deref().unwrap_or(&[]), &[])
    }

    fn members(&self, registry: &Registry) -> Result<Arc<NativeMembers>, BindError> {
        if let Some(members) = self.members.read().as_ref() {
            return Ok(members.clone());
        }
        let mut slot = self.members.write();
        if let Some(members) = slot.as_ref() {
            return Ok(members.clone());
        }
        let members = Arc::new(self.build_members(registry)?);
        *slot = Some(members.clone());
        Ok(members)
    }

    fn build_members(&self, registry: &Registry) -> Result<NativeMembers, BindError> {
        let ctx = self.context();
        debug!(ty = %self.name, "populating native members");

        let mut fields = Vec::with_capacity(self.desc.fields.len());
        let mut fields_by_name = HashMap::with_capacity(self.desc.fields.len());
        let mut instance_field_types = Vec::new();
        for (index, fd) in self.desc.fields.iter().enumerate() {
            let ty = ctx.make_concrete(registry, &fd.ty)?;
            if !fd.is_static {
                instance_field_types.push(ty);
            }
            fields_by_name.insert(fd.name.clone(), index as u32);
            fields.push(Arc::new(NativeField {
                declaring: self.id,
                index: index as u32,
                name: fd.name.clone(),
                ty,
                is_static: fd.is_static,
                handle: fd.handle,
                accessors: fd.accessors.clone(),
            }));
        }

        let mut methods = Vec::with_capacity(self.desc.methods.len());
        let mut methods_by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for md in &self.desc.methods {
            let mid = registry.register_method_with(|id| {
                crate::method::RuntimeMethod::Native(NativeMethod::new(
                    id,
                    self.id,
                    Arc::new(md.clone()),
                    None,
                ))
            });
            methods_by_name
                .entry(md.name.clone())
                .or_default()
                .push(methods.len());
            methods.push(mid);
        }

        let mut constructors = Vec::with_capacity(self.desc.constructors.len());
        for md in &self.desc.constructors {
            let mid = registry.register_method_with(|id| {
                crate::method::RuntimeMethod::Native(NativeMethod::new(
                    id,
                    self.id,
                    Arc::new(md.clone()),
                    None,
                ))
            });
            constructors.push(mid);
        }

        Ok(NativeMembers {
            methods,
            methods_by_name,
            constructors,
            fields,
            fields_by_name,
            instance_field_types: instance_field_types.into(),
        })
    }

    fn lookup_in_base<F>(&self, registry: &Registry, f: F) -> Result<Option<MethodId>, BindError>
    where
        F: FnOnce(&RuntimeType) -> Result<Option<MethodId>, BindError>,
    {
        match self.base_type(registry)? {
            Some(base) => f(&registry.ty(base)),
            None => Ok(None),
        }
    }

    /// Host `construct` capability, if registered.
    pub fn construct(&self, args: &[HostValue]) -> Result<HostValue, BindError> {
        match &self.desc.capabilities.construct {
            Some(f) => f(args),
            None => Err(BindError::UnsupportedConversion(format!(
                "{} has no constructor binding",
                self.name
            ))),
        }
    }

    pub fn construct_array(&self, length: usize) -> Result<HostValue, BindError> {
        match &self.desc.capabilities.construct_array {
            Some(f) => f(length),
            None => Err(BindError::UnsupportedConversion(format!(
                "{} has no array constructor binding",
                self.name
            ))),
        }
    }

    pub fn memberwise_clone(&self, value: &HostValue) -> Result<HostValue, BindError> {
        match &self.desc.capabilities.memberwise_clone {
            Some(f) => f(value),
            None => Err(BindError::UnsupportedConversion(format!(
                "{} has no clone binding",
                self.name
            ))),
        }
    }
}

impl TypeRuntime for NativeType {
    fn id(&self) -> TypeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_native(&self) -> bool {
        true
    }

    fn is_value_type(&self) -> bool {
        self.desc.is_value_type
    }

    fn is_interface(&self) -> bool {
        self.desc.is_interface
    }

    fn is_delegate(&self) -> bool {
        self.desc.is_delegate
    }

    fn shape(&self) -> Option<TypeShape> {
        self.shape
    }

    fn element_type(&self) -> Option<TypeId> {
        self.element
    }

    fn generic_arguments(&self) -> Option<GenericArgs> {
        self.generic_args.clone()
    }

    fn generic_param_names(&self) -> &[String] {
        &self.desc.generic_params
    }

    fn generic_definition(&self) -> Option<TypeId> {
        self.generic_definition
    }

    fn find_generic_argument(&self, name: &str) -> Option<TypeId> {
        self.generic_args
            .as_deref()
            .and_then(|args| args.iter().find(|(n, _)| n == name).map(|(_, id)| *id))
    }

    fn base_type(&self, registry: &Registry) -> Result<Option<TypeId>, BindError> {
        if let Some(base) = *self.base.read() {
            return Ok(base);
        }
        let mut slot = self.base.write();
        if let Some(base) = *slot {
            return Ok(base);
        }
        let base = match &self.desc.base {
            Some(r) => Some(self.context().make_concrete(registry, r)?),
            None => None,
        };
        *slot = Some(base);
        Ok(base)
    }

    fn interfaces(&self, registry: &Registry) -> Result<Arc<[TypeId]>, BindError> {
        if let Some(ifaces) = self.interfaces.read().as_ref() {
            return Ok(ifaces.clone());
        }
        let mut slot = self.interfaces.write();
        if let Some(ifaces) = slot.as_ref() {
            return Ok(ifaces.clone());
        }
        let ctx = self.context();
        let mut resolved = Vec::with_capacity(self.desc.interfaces.len());
        for r in &self.desc.interfaces {
            resolved.push(ctx.make_concrete(registry, r)?);
        }
        let ifaces: Arc<[TypeId]> = resolved.into();
        *slot = Some(ifaces.clone());
        Ok(ifaces)
    }

    fn get_method(
        &self,
        registry: &Registry,
        name: &str,
        params: &[TypeId],
        generic_args: Option<&[TypeId]>,
        return_type: Option<TypeId>,
    ) -> Result<Option<MethodId>, BindError> {
        let members = self.members(registry)?;
        if let Some(indices) = members.methods_by_name.get(name) {
            for &i in indices {
                let mid = members.methods[i];
                let candidate = registry.method(mid);
                if method_matches(registry, &candidate, params, generic_args, return_type)? {
                    if let Some(args) = generic_args {
                        if candidate.generic_param_count() > 0 && !candidate.is_generic_instance() {
                            return self.specialize(registry, mid, args).map(Some);
                        }
                    }
                    return Ok(Some(mid));
                }
            }
        }
        self.lookup_in_base(registry, |base| {
            base.get_method(registry, name, params, generic_args, return_type)
        })
    }

    fn get_method_by_arity(
        &self,
        registry: &Registry,
        name: &str,
        param_count: usize,
    ) -> Result<Option<MethodId>, BindError> {
        let members = self.members(registry)?;
        if let Some(indices) = members.methods_by_name.get(name) {
            for &i in indices {
                let mid = members.methods[i];
                if registry.method(mid).param_count() == param_count {
                    return Ok(Some(mid));
                }
            }
        }
        self.lookup_in_base(registry, |base| {
            base.get_method_by_arity(registry, name, param_count)
        })
    }

    fn get_constructor(
        &self,
        registry: &Registry,
        params: &[TypeId],
    ) -> Result<Option<MethodId>, BindError> {
        let members = self.members(registry)?;
        for &mid in &members.constructors {
            let candidate = registry.method(mid);
            if method_matches(registry, &candidate, params, None, None)? {
                return Ok(Some(mid));
            }
        }
        self.lookup_in_base(registry, |base| base.get_constructor(registry, params))
    }

    fn own_field_token(&self, registry: &Registry, name: &str) -> Result<Option<i64>, BindError> {
        let members = self.members(registry)?;
        Ok(members
            .fields_by_name
            .get(name)
            .map(|&index| pack_field_token(self.id, index)))
    }

    fn get_field(
        &self,
        registry: &Registry,
        index: u32,
    ) -> Result<Option<ResolvedField>, BindError> {
        let members = self.members(registry)?;
        Ok(members
            .fields
            .get(index as usize)
            .map(|f| ResolvedField::Native(f.clone())))
    }

    fn methods(&self, registry: &Registry) -> Result<Vec<MethodId>, BindError> {
        Ok(self.members(registry)?.methods.clone())
    }

    fn instance_field_types(&self, registry: &Registry) -> Result<Arc<[TypeId]>, BindError> {
        Ok(self.members(registry)?.instance_field_types.clone())
    }

    fn make_generic_instance(
        &self,
        registry: &Registry,
        args: &[TypeId],
    ) -> Result<TypeId, BindError> {
        if self.desc.generic_params.is_empty() || self.generic_args.is_some() {
            return Err(BindError::UnresolvedType(format!(
                "{} is not a generic definition",
                self.name
            )));
        }
        if self.desc.generic_params.len() != args.len() {
            return Err(BindError::GenericIndexOutOfBounds {
                index: args.len(),
                length: self.desc.generic_params.len(),
            });
        }
        let mut instances = self.generic_instances.lock();
        if let Some((_, id)) = instances.iter().find(|(k, _)| k.as_ref() == args) {
            registry.metrics().record_generic_instance(true);
            return Ok(*id);
        }
        registry.metrics().record_generic_instance(false);
        let bound: GenericArgs = self
            .desc
            .generic_params
            .iter()
            .cloned()
            .zip(args.iter().copied())
            .collect::<Vec<_>>()
            .into();
        let arg_names: Vec<String> = args
            .iter()
            .map(|&t| registry.ty(t).name().to_string())
            .collect();
        let name = format!("{}<{}>", self.name, arg_names.join(", "));
        let id = registry.register_type_with(|id| {
            RuntimeType::Native(NativeType::instance_of(id, self, name, bound))
        });
        debug!(definition = %self.name, instance = ?id, "instantiated native generic");
        instances.push((args.into(), id));
        Ok(id)
    }

    fn prewarm_members(&self, registry: &Registry) -> Result<(), BindError> {
        self.members(registry).map(|_| ())
    }
}

impl NativeType {
    fn specialize(
        &self,
        registry: &Registry,
        definition: MethodId,
        args: &[TypeId],
    ) -> Result<MethodId, BindError> {
        let mut cache = self.specializations.lock();
        if let Some(&mid) = cache.get(&(definition, args.into())) {
            return Ok(mid);
        }
        let mid = registry.specialize_method(definition, args)?;
        cache.insert((definition, args.into()), mid);
        Ok(mid)
    }
}
