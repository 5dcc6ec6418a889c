//! Central ownership of all runtime types and methods.
//!
//! The registry is an arena: every [`RuntimeType`] and [`RuntimeMethod`] is
//! registered exactly once and addressed by a stable integer id thereafter,
//! so components refer to each other through `TypeId`/`MethodId` instead of
//! shared pointers. All registry-wide caches live here as well.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::error::BindError;
use crate::host::{builtin_descs, NativeTypeDesc};
use crate::metadata::{FieldRef, MethodRef, Module, TypeDef};
use crate::method::{MethodRuntime, RuntimeMethod};
use crate::metrics::{BindMetrics, CacheStat, CacheStats};
use crate::sync::{Arc, Ordering, RwLock};
use crate::types::generics::GenericContext;
use crate::types::{
    InterpretedType, NativeType, ResolvedField, RuntimeType, TypeRuntime, TypeShape,
};

/// Stable identity of a registered type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl std::fmt::Debug for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t#{}", self.0)
    }
}

/// Stable identity of a registered method.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

impl std::fmt::Debug for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m#{}", self.0)
    }
}

/// Stable field key: declaring type in the high half, declared slot index in
/// the low half.
pub fn pack_field_token(declaring: TypeId, index: u32) -> i64 {
    ((declaring.0 as i64) << 32) | index as i64
}

pub fn unpack_field_token(token: i64) -> (TypeId, u32) {
    (TypeId((token >> 32) as u32), token as u32)
}

pub struct Registry {
    types: RwLock<Vec<Arc<RuntimeType>>>,
    methods: RwLock<Vec<Arc<RuntimeMethod>>>,
    /// Full name to id; duplicate registrations are last-wins.
    types_by_name: DashMap<String, TypeId>,
    /// Array/by-ref/pointer types, one per (element, shape).
    derived_cache: DashMap<(TypeId, TypeShape), TypeId>,
    field_token_cache: DashMap<(TypeId, String), i64>,
    hierarchy_cache: DashMap<(TypeId, TypeId), bool>,
    vmt_cache: DashMap<(MethodId, TypeId), MethodId>,
    strings: RwLock<Vec<Arc<str>>>,
    string_map: DashMap<Arc<str>, i64>,
    object_type: TypeId,
    metrics: BindMetrics,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry with the built-in corlib natives installed.
    pub fn new() -> Self {
        let registry = Registry {
            types: RwLock::new(Vec::new()),
            methods: RwLock::new(Vec::new()),
            types_by_name: DashMap::new(),
            derived_cache: DashMap::new(),
            field_token_cache: DashMap::new(),
            hierarchy_cache: DashMap::new(),
            vmt_cache: DashMap::new(),
            strings: RwLock::new(Vec::new()),
            string_map: DashMap::new(),
            object_type: TypeId(0),
            metrics: BindMetrics::default(),
        };
        // System.Object is registered first and anchors TypeId(0).
        for desc in builtin_descs() {
            registry.register_native(desc);
        }
        registry
    }

    pub fn object_type(&self) -> TypeId {
        self.object_type
    }

    pub fn metrics(&self) -> &BindMetrics {
        &self.metrics
    }

    /// Register a host-described native type.
    pub fn register_native(&self, desc: NativeTypeDesc) -> TypeId {
        let name = desc.name.clone();
        let desc = Arc::new(desc);
        let id =
            self.register_type_with(|id| RuntimeType::Native(NativeType::definition(id, desc)));
        debug!(ty = %name, id = ?id, "registered native type");
        self.types_by_name.insert(name, id);
        id
    }

    /// Register every type a loaded module declares. Bodies stay undecoded.
    pub fn load_module(&self, module: &Module) -> Result<Vec<TypeId>, BindError> {
        debug!(module = %module.name, types = module.types.len(), "loading module");
        let mut ids = Vec::with_capacity(module.types.len());
        for def in &module.types {
            ids.push(self.register_interpreted(def.clone()));
        }
        Ok(ids)
    }

    pub fn register_interpreted(&self, def: Arc<TypeDef>) -> TypeId {
        let name = def.name.clone();
        let id = self
            .register_type_with(|id| RuntimeType::Interpreted(InterpretedType::definition(id, def)));
        debug!(ty = %name, id = ?id, "registered interpreted type");
        self.types_by_name.insert(name, id);
        id
    }

    /// Mint an id and install the type it names. The closure must not call
    /// back into the registry.
    pub(crate) fn register_type_with<F>(&self, f: F) -> TypeId
    where
        F: FnOnce(TypeId) -> RuntimeType,
    {
        let mut types = self.types.write();
        let id = TypeId(types.len() as u32);
        types.push(Arc::new(f(id)));
        id
    }

    pub(crate) fn register_method_with<F>(&self, f: F) -> MethodId
    where
        F: FnOnce(MethodId) -> RuntimeMethod,
    {
        let mut methods = self.methods.write();
        let id = MethodId(methods.len() as u32);
        methods.push(Arc::new(f(id)));
        id
    }

    /// The type an id names. Ids are only minted by this registry, so an
    /// out-of-range id is a caller bug.
    pub fn ty(&self, id: TypeId) -> Arc<RuntimeType> {
        self.types.read()[id.0 as usize].clone()
    }

    pub fn try_ty(&self, id: TypeId) -> Option<Arc<RuntimeType>> {
        self.types.read().get(id.0 as usize).cloned()
    }

    pub fn method(&self, id: MethodId) -> Arc<RuntimeMethod> {
        self.methods.read()[id.0 as usize].clone()
    }

    pub fn try_method(&self, id: MethodId) -> Option<Arc<RuntimeMethod>> {
        self.methods.read().get(id.0 as usize).cloned()
    }

    pub fn type_count(&self) -> usize {
        self.types.read().len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.read().len()
    }

    pub fn get_type_by_name(&self, name: &str) -> Option<TypeId> {
        self.types_by_name.get(name).map(|e| *e.value())
    }

    /// Resolve a symbolic type reference in a generic context.
    pub fn resolve_type_ref(
        &self,
        r: &crate::metadata::TypeRef,
        ctx: GenericContext<'_>,
    ) -> Result<TypeId, BindError> {
        ctx.make_concrete(self, r)
    }

    /// Resolve a call-site method reference to a registered method.
    ///
    /// Parameter references are resolved against the resolved parent's bound
    /// generic arguments, falling back to the caller's context for anything
    /// the parent leaves open.
    pub fn resolve_method_ref(
        &self,
        mref: &MethodRef,
        ctx: GenericContext<'_>,
    ) -> Result<MethodId, BindError> {
        let parent = ctx.make_concrete(self, &mref.parent)?;
        let parent_ty = self.ty(parent);
        let parent_args = parent_ty.generic_arguments();

        let mut generic_args = Vec::with_capacity(mref.generic_args.len());
        for r in &mref.generic_args {
            generic_args.push(ctx.make_concrete(self, r)?);
        }
        // Parameter shapes in the reference are written in terms of the
        // callee's generic parameters, so bind the requested arguments
        // positionally for the lookup.
        let bound_method_args: Vec<(String, TypeId)> = generic_args
            .iter()
            .enumerate()
            .map(|(i, &id)| (format!("!!{i}"), id))
            .collect();
        let lookup_ctx = GenericContext::new(
            parent_args.as_deref().unwrap_or(ctx.type_args),
            if bound_method_args.is_empty() {
                ctx.method_args
            } else {
                &bound_method_args
            },
        );

        let mut params = Vec::with_capacity(mref.params.len());
        for r in &mref.params {
            params.push(lookup_ctx.make_concrete(self, r)?);
        }

        let return_type = match &mref.return_type {
            Some(r) => Some(lookup_ctx.make_concrete(self, r)?),
            None => None,
        };

        let found = if mref.name == ".ctor" {
            parent_ty.get_constructor(self, &params)?
        } else {
            let generic_args = if generic_args.is_empty() {
                None
            } else {
                Some(generic_args.as_slice())
            };
            parent_ty.get_method(self, &mref.name, &params, generic_args, return_type)?
        };
        found.ok_or_else(|| {
            BindError::UnresolvedMethod(format!("{}::{}", parent_ty.name(), mref.name))
        })
    }

    /// Stable field key for a field reference, inherited fields included.
    pub fn field_token(
        &self,
        fref: &FieldRef,
        ctx: GenericContext<'_>,
    ) -> Result<i64, BindError> {
        let parent = ctx.make_concrete(self, &fref.parent)?;
        let key = (parent, fref.name.clone());
        if let Some(token) = self.field_token_cache.get(&key) {
            self.metrics.record_field_token(true);
            return Ok(*token);
        }
        self.metrics.record_field_token(false);

        let mut current = Some(parent);
        while let Some(id) = current {
            let ty = self.ty(id);
            if let Some(token) = ty.own_field_token(self, &fref.name)? {
                self.field_token_cache.insert(key, token);
                return Ok(token);
            }
            current = ty.base_type(self)?;
        }
        Err(BindError::UnresolvedField(format!(
            "{}::{}",
            self.ty(parent).name(),
            fref.name
        )))
    }

    /// The field a decoded field token refers to.
    pub fn get_field(&self, token: i64) -> Result<Option<ResolvedField>, BindError> {
        let (declaring, index) = unpack_field_token(token);
        match self.try_ty(declaring) {
            Some(ty) => ty.get_field(self, index),
            None => Ok(None),
        }
    }

    pub fn make_generic_instance(
        &self,
        definition: TypeId,
        args: &[TypeId],
    ) -> Result<TypeId, BindError> {
        self.ty(definition).make_generic_instance(self, args)
    }

    pub fn make_array_type(&self, element: TypeId, rank: u8) -> TypeId {
        self.derived(element, TypeShape::Array(rank))
    }

    pub fn make_by_ref_type(&self, element: TypeId) -> TypeId {
        self.derived(element, TypeShape::ByRef)
    }

    pub fn make_pointer_type(&self, element: TypeId) -> TypeId {
        self.derived(element, TypeShape::Pointer)
    }

    fn derived(&self, element: TypeId, shape: TypeShape) -> TypeId {
        let element_name = self.ty(element).name().to_string();
        *self
            .derived_cache
            .entry((element, shape))
            .or_insert_with(|| {
                self.register_type_with(|id| {
                    RuntimeType::Native(NativeType::shaped(id, element, &element_name, shape))
                })
            })
    }

    /// Specialize a generic method definition with bound arguments.
    pub fn specialize_method(
        &self,
        definition: MethodId,
        args: &[TypeId],
    ) -> Result<MethodId, BindError> {
        let method = self.method(definition);
        let names = method.generic_param_names();
        if names.len() != args.len() {
            return Err(BindError::GenericIndexOutOfBounds {
                index: args.len(),
                length: names.len(),
            });
        }
        let bound: crate::types::GenericArgs = names
            .iter()
            .cloned()
            .zip(args.iter().copied())
            .collect::<Vec<_>>()
            .into();
        let id = match method.as_ref() {
            RuntimeMethod::Interpreted(m) => self
                .register_method_with(|id| RuntimeMethod::Interpreted(m.specialized(id, bound))),
            RuntimeMethod::Native(m) => {
                self.register_method_with(|id| RuntimeMethod::Native(m.specialized(id, bound)))
            }
        };
        debug!(definition = ?definition, specialized = ?id, "specialized generic method");
        Ok(id)
    }

    pub fn intern_string(&self, s: &str) -> i64 {
        match self.string_map.entry(Arc::from(s)) {
            Entry::Occupied(e) => {
                self.metrics.record_string(true);
                *e.get()
            }
            Entry::Vacant(e) => {
                self.metrics.record_string(false);
                let mut strings = self.strings.write();
                let id = strings.len() as i64;
                strings.push(e.key().clone());
                e.insert(id);
                id
            }
        }
    }

    pub fn lookup_string(&self, token: i64) -> Option<Arc<str>> {
        self.strings.read().get(token as usize).cloned()
    }

    /// Whether `value` is `ancestor` or derives from it, interfaces
    /// included.
    pub fn is_assignable(&self, value: TypeId, ancestor: TypeId) -> Result<bool, BindError> {
        if value == ancestor {
            return Ok(true);
        }
        if let Some(known) = self.hierarchy_cache.get(&(value, ancestor)) {
            self.metrics.record_hierarchy(true);
            return Ok(*known);
        }
        self.metrics.record_hierarchy(false);

        let mut queue = vec![value];
        let mut seen = std::collections::HashSet::new();
        let mut found = false;
        while let Some(id) = queue.pop() {
            if !seen.insert(id) {
                continue;
            }
            if id == ancestor {
                found = true;
                break;
            }
            let ty = self.ty(id);
            if let Some(base) = ty.base_type(self)? {
                queue.push(base);
            }
            queue.extend(ty.interfaces(self)?.iter().copied());
        }
        self.hierarchy_cache.insert((value, ancestor), found);
        Ok(found)
    }

    /// Most-derived implementation of a virtual method for a receiver type.
    /// Falls back to the declared method when no override exists.
    pub fn resolve_virtual(
        &self,
        base_method: MethodId,
        this_type: TypeId,
    ) -> Result<MethodId, BindError> {
        if let Some(found) = self.vmt_cache.get(&(base_method, this_type)) {
            self.metrics.record_vmt(true);
            return Ok(*found);
        }
        self.metrics.record_vmt(false);

        let method = self.method(base_method);
        let params = method.param_types(self)?;
        let ret = method.return_type(self)?;
        let found = self
            .ty(this_type)
            .get_method(self, method.name(), &params, None, Some(ret))?
            .unwrap_or(base_method);
        self.vmt_cache.insert((base_method, this_type), found);
        Ok(found)
    }

    pub fn cache_stats(&self) -> CacheStats {
        let m = &self.metrics;
        CacheStats {
            field_token: CacheStat::new(
                &m.field_token_hits,
                &m.field_token_misses,
                self.field_token_cache.len(),
            ),
            generic_instance: CacheStat::new(
                &m.generic_instance_hits,
                &m.generic_instance_misses,
                m.generic_instance_misses.load(Ordering::Relaxed) as usize,
            ),
            hierarchy: CacheStat::new(
                &m.hierarchy_hits,
                &m.hierarchy_misses,
                self.hierarchy_cache.len(),
            ),
            virtual_dispatch: CacheStat::new(&m.vmt_hits, &m.vmt_misses, self.vmt_cache.len()),
            string: CacheStat::new(
                &m.string_hits,
                &m.string_misses,
                self.strings.read().len(),
            ),
        }
    }
}
