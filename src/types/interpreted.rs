//! Types defined by loaded metadata.
//!
//! Mirrors the native adapter's lookup surface over an `Arc<TypeDef>`.
//! Member population registers every declared method with the registry in
//! one pass; the instruction streams stay undecoded until first execution
//! or prewarm.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::error::BindError;
use crate::metadata::TypeDef;
use crate::method::{InterpretedMethod, MethodRuntime, RuntimeMethod};
use crate::registry::{pack_field_token, MethodId, Registry, TypeId};
use crate::sync::{Arc, Mutex, RwLock};
use crate::types::generics::{GenericArgs, GenericContext};
use crate::types::{
    method_matches, FieldDescription, ResolvedField, RuntimeType, TypeRuntime, TypeShape,
};

struct InterpretedMembers {
    methods: Vec<MethodId>,
    methods_by_name: HashMap<String, Vec<usize>>,
    constructors: Vec<MethodId>,
    fields: Vec<FieldDescription>,
    fields_by_name: HashMap<String, u32>,
    instance_field_types: Arc<[TypeId]>,
}

pub struct InterpretedType {
    id: TypeId,
    name: String,
    def: Arc<TypeDef>,
    generic_args: Option<GenericArgs>,
    generic_definition: Option<TypeId>,

    base: RwLock<Option<Option<TypeId>>>,
    interfaces: RwLock<Option<Arc<[TypeId]>>>,
    members: RwLock<Option<Arc<InterpretedMembers>>>,
    generic_instances: Mutex<Vec<(Box<[TypeId]>, TypeId)>>,
    specializations: Mutex<HashMap<(MethodId, Box<[TypeId]>), MethodId>>,
}

impl fmt::Debug for InterpretedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpretedType")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl InterpretedType {
    pub fn definition(id: TypeId, def: Arc<TypeDef>) -> Self {
        InterpretedType {
            id,
            name: def.name.clone(),
            def,
            generic_args: None,
            generic_definition: None,
            base: RwLock::new(None),
            interfaces: RwLock::new(None),
            members: RwLock::new(None),
            generic_instances: Mutex::new(Vec::new()),
            specializations: Mutex::new(HashMap::new()),
        }
    }

    fn instance_of(id: TypeId, definition: &InterpretedType, name: String, args: GenericArgs) -> Self {
        InterpretedType {
            id,
            name,
            def: definition.def.clone(),
            generic_args: Some(args),
            generic_definition: Some(definition.id),
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

    fn members(&self, registry: &Registry) -> Result<Arc<InterpretedMembers>, BindError> {
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

    fn build_members(&self, registry: &Registry) -> Result<InterpretedMembers, BindError> {
        let ctx = self.context();
        debug!(ty = %self.name, "populating interpreted members");

        let mut fields = Vec::with_capacity(self.def.fields.len());
        let mut fields_by_name = HashMap::with_capacity(self.def.fields.len());
        let mut instance_field_types = Vec::new();
        for (index, fd) in self.def.fields.iter().enumerate() {
            let ty = ctx.make_concrete(registry, &fd.ty)?;
            if !fd.is_static {
                instance_field_types.push(ty);
            }
            fields_by_name.insert(fd.name.clone(), index as u32);
            fields.push(FieldDescription {
                declaring: self.id,
                index: index as u32,
                name: fd.name.clone(),
                ty,
                is_static: fd.is_static,
            });
        }

        let mut methods = Vec::new();
        let mut methods_by_name: HashMap<String, Vec<usize>> = HashMap::new();
        let mut constructors = Vec::new();
        for md in &self.def.methods {
            let is_delegate_invoke = self.def.is_delegate && md.name == "Invoke";
            let def = md.clone();
            let declaring = self.id;
            let mid = registry.register_method_with(|id| {
                RuntimeMethod::Interpreted(InterpretedMethod::new(
                    id,
                    declaring,
                    def,
                    None,
                    is_delegate_invoke,
                ))
            });
            if md.is_constructor {
                constructors.push(mid);
            } else {
                methods_by_name
                    .entry(md.name.clone())
                    .or_default()
                    .push(methods.len());
                methods.push(mid);
            }
        }

        Ok(InterpretedMembers {
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

impl TypeRuntime for InterpretedType {
    fn id(&self) -> TypeId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_native(&self) -> bool {
        false
    }

    fn is_value_type(&self) -> bool {
        self.def.is_value_type
    }

    fn is_interface(&self) -> bool {
        self.def.is_interface
    }

    fn is_delegate(&self) -> bool {
        self.def.is_delegate
    }

    fn shape(&self) -> Option<TypeShape> {
        None
    }

    fn element_type(&self) -> Option<TypeId> {
        None
    }

    fn generic_arguments(&self) -> Option<GenericArgs> {
        self.generic_args.clone()
    }

    fn generic_param_names(&self) -> &[String] {
        &self.def.generic_params
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
        let base = match &self.def.base {
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
        let mut resolved = Vec::with_capacity(self.def.interfaces.len());
        for r in &self.def.interfaces {
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
            .map(|f| ResolvedField::Interpreted(f.clone())))
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
        if self.def.generic_params.is_empty() || self.generic_args.is_some() {
            return Err(BindError::UnresolvedType(format!(
                "{} is not a generic definition",
                self.name
            )));
        }
        if self.def.generic_params.len() != args.len() {
            return Err(BindError::GenericIndexOutOfBounds {
                index: args.len(),
                length: self.def.generic_params.len(),
            });
        }
        let mut instances = self.generic_instances.lock();
        if let Some((_, id)) = instances.iter().find(|(k, _)| k.as_ref() == args) {
            registry.metrics().record_generic_instance(true);
            return Ok(*id);
        }
        registry.metrics().record_generic_instance(false);
        let bound: GenericArgs = self
            .def
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
            RuntimeType::Interpreted(InterpretedType::instance_of(id, self, name, bound))
        });
        debug!(definition = %self.name, instance = ?id, "instantiated interpreted generic");
        instances.push((args.into(), id));
        Ok(id)
    }

    fn prewarm_members(&self, registry: &Registry) -> Result<(), BindError> {
        self.members(registry).map(|_| ())
    }
}
