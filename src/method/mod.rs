//! Runtime method representation.
//!
//! An [`InterpretedMethod`] owns its raw instruction stream until first use,
//! then decodes it exactly once into a [`DecodedBody`] and drops the raw
//! handle. A [`NativeMethod`] is a thin wrapper over the host descriptor.
//! Generic specializations are fresh methods sharing the definition.

pub mod body;
pub mod decode;

use std::fmt;

use enum_dispatch::enum_dispatch;

use crate::error::BindError;
use crate::host::{InvokeFn, NativeMethodDesc};
use crate::metadata::{MethodBody, MethodDef, TypeRef};
use crate::registry::{MethodId, Registry, TypeId};
use crate::sync::{Arc, Mutex, RwLock};
use crate::types::generics::{GenericArgs, GenericContext};
use crate::types::TypeRuntime;

pub use body::{DecodedBody, ExceptionHandler, HandlerKind, Instruction};

/// Uniform surface over native and interpreted methods.
#[enum_dispatch]
pub trait MethodRuntime {
    fn id(&self) -> MethodId;
    fn name(&self) -> &str;
    fn declaring_type(&self) -> TypeId;
    fn has_this(&self) -> bool;
    fn is_constructor(&self) -> bool;
    fn is_virtual(&self) -> bool;
    fn is_abstract(&self) -> bool;
    fn is_native(&self) -> bool;

    fn param_count(&self) -> usize;
    fn param_types(&self, registry: &Registry) -> Result<Arc<[TypeId]>, BindError>;
    fn return_type(&self, registry: &Registry) -> Result<TypeId, BindError>;
    fn declared_param_refs(&self) -> &[TypeRef];

    fn generic_param_names(&self) -> &[String];
    /// Unbound parameter count; zero once specialized.
    fn generic_param_count(&self) -> usize;
    fn is_generic_instance(&self) -> bool;
    fn generic_arguments(&self) -> Option<GenericArgs>;
    fn find_generic_argument(&self, registry: &Registry, name: &str) -> Option<TypeId>;

    /// `Type.Name(Param, ...)`, built lazily from declared shapes.
    fn display_name(&self, registry: &Registry) -> Arc<str>;
}

#[enum_dispatch(MethodRuntime)]
#[derive(Debug)]
pub enum RuntimeMethod {
    Native(NativeMethod),
    Interpreted(InterpretedMethod),
}

fn ref_name(r: &TypeRef) -> String {
    match r {
        TypeRef::Named(n) => n.clone(),
        TypeRef::Param { name, .. } => name.clone(),
        TypeRef::GenericInstance { base, args } => {
            let args: Vec<String> = args.iter().map(ref_name).collect();
            format!("{}<{}>", ref_name(base), args.join(", "))
        }
        TypeRef::Array { element, .. } => format!("{}[]", ref_name(element)),
        TypeRef::ByRef(e) => format!("{}&", ref_name(e)),
        TypeRef::Pointer(e) => format!("{}*", ref_name(e)),
    }
}

fn build_display(registry: &Registry, declaring: TypeId, name: &str, params: &[TypeRef]) -> Arc<str> {
    let owner = registry.ty(declaring);
    let params: Vec<String> = params.iter().map(ref_name).collect();
    format!("{}.{}({})", owner.name(), name, params.join(", ")).into()
}

pub struct NativeMethod {
    id: MethodId,
    declaring_type: TypeId,
    desc: Arc<NativeMethodDesc>,
    generic_args: Option<GenericArgs>,
    params: RwLock<Option<Arc<[TypeId]>>>,
    ret: RwLock<Option<TypeId>>,
    display: Mutex<Option<Arc<str>>>,
}

impl fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMethod")
            .field("id", &self.id)
            .field("declaring_type", &self.declaring_type)
            .field("name", &self.desc.name)
            .finish()
    }
}

impl NativeMethod {
    pub(crate) fn new(
        id: MethodId,
        declaring_type: TypeId,
        desc: Arc<NativeMethodDesc>,
        generic_args: Option<GenericArgs>,
    ) -> Self {
        NativeMethod {
            id,
            declaring_type,
            desc,
            generic_args,
            params: RwLock::new(None),
            ret: RwLock::new(None),
            display: Mutex::new(None),
        }
    }

    pub(crate) fn specialized(&self, id: MethodId, args: GenericArgs) -> Self {
        NativeMethod::new(id, self.declaring_type, self.desc.clone(), Some(args))
    }

    /// Host invoke binding, if supplied.
    pub fn invoke_fn(&self) -> Option<InvokeFn> {
        self.desc.invoke.clone()
    }

    fn context<'a>(
        &'a self,
        type_args: &'a [(String, TypeId)],
    ) -> GenericContext<'a> {
        GenericContext::new(type_args, self.generic_args.as_deref().unwrap_or(&[]))
    }
}

impl MethodRuntime for NativeMethod {
    fn id(&self) -> MethodId {
        self.id
    }

    fn name(&self) -> &str {
        &self.desc.name
    }

    fn declaring_type(&self) -> TypeId {
        self.declaring_type
    }

    fn has_this(&self) -> bool {
        self.desc.has_this
    }

    fn is_constructor(&self) -> bool {
        self.desc.name == ".ctor"
    }

    fn is_virtual(&self) -> bool {
        self.desc.is_virtual
    }

    fn is_abstract(&self) -> bool {
        false
    }

    fn is_native(&self) -> bool {
        true
    }

    fn param_count(&self) -> usize {
        self.desc.params.len()
    }

    fn param_types(&self, registry: &Registry) -> Result<Arc<[TypeId]>, BindError> {
        if let Some(params) = self.params.read().as_ref() {
            return Ok(params.clone());
        }
        let mut slot = self.params.write();
        if let Some(params) = slot.as_ref() {
            return Ok(params.clone());
        }
        let type_args = registry.ty(self.declaring_type).generic_arguments();
        let ctx = self.context(type_args.as_deref().unwrap_or(&[]));
        let mut resolved = Vec::with_capacity(self.desc.params.len());
        for r in &self.desc.params {
            resolved.push(ctx.make_concrete(registry, r)?);
        }
        let params: Arc<[TypeId]> = resolved.into();
        *slot = Some(params.clone());
        Ok(params)
    }

    fn return_type(&self, registry: &Registry) -> Result<TypeId, BindError> {
        if let Some(ret) = *self.ret.read() {
            return Ok(ret);
        }
        let mut slot = self.ret.write();
        if let Some(ret) = *slot {
            return Ok(ret);
        }
        let type_args = registry.ty(self.declaring_type).generic_arguments();
        let ctx = self.context(type_args.as_deref().unwrap_or(&[]));
        let ret = ctx.make_concrete(registry, &self.desc.return_type)?;
        *slot = Some(ret);
        Ok(ret)
    }

    fn declared_param_refs(&self) -> &[TypeRef] {
        &self.desc.params
    }

    fn generic_param_names(&self) -> &[String] {
        &self.desc.generic_params
    }

    fn generic_param_count(&self) -> usize {
        if self.generic_args.is_some() {
            0
        } else {
            self.desc.generic_params.len()
        }
    }

    fn is_generic_instance(&self) -> bool {
        self.generic_args.is_some()
    }

    fn generic_arguments(&self) -> Option<GenericArgs> {
        self.generic_args.clone()
    }

    fn find_generic_argument(&self, registry: &Registry, name: &str) -> Option<TypeId> {
        registry
            .ty(self.declaring_type)
            .find_generic_argument(name)
            .or_else(|| {
                self.generic_args
                    .as_deref()
                    .and_then(|args| args.iter().find(|(n, _)| n == name).map(|(_, id)| *id))
            })
    }

    fn display_name(&self, registry: &Registry) -> Arc<str> {
        let mut slot = self.display.lock();
        if let Some(name) = slot.as_ref() {
            return name.clone();
        }
        let name = build_display(registry, self.declaring_type, &self.desc.name, &self.desc.params);
        *slot = Some(name.clone());
        name
    }
}

pub struct InterpretedMethod {
    id: MethodId,
    declaring_type: TypeId,
    def: Arc<MethodDef>,
    generic_args: Option<GenericArgs>,
    is_delegate_invoke: bool,
    /// Released after a successful decode.
    raw_body: Mutex<Option<Arc<MethodBody>>>,
    body: RwLock<Option<Arc<DecodedBody>>>,
    params: RwLock<Option<Arc<[TypeId]>>>,
    ret: RwLock<Option<TypeId>>,
    display: Mutex<Option<Arc<str>>>,
}

impl fmt::Debug for InterpretedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpretedMethod")
            .field("id", &self.id)
            .field("declaring_type", &self.declaring_type)
            .field("name", &self.def.name)
            .field("decoded", &self.body.read().is_some())
            .finish()
    }
}

impl InterpretedMethod {
    pub(crate) fn new(
        id: MethodId,
        declaring_type: TypeId,
        def: Arc<MethodDef>,
        generic_args: Option<GenericArgs>,
        is_delegate_invoke: bool,
    ) -> Self {
        InterpretedMethod {
            id,
            declaring_type,
            raw_body: Mutex::new(def.body.clone()),
            def,
            generic_args,
            is_delegate_invoke,
            body: RwLock::new(None),
            params: RwLock::new(None),
            ret: RwLock::new(None),
            display: Mutex::new(None),
        }
    }

    /// Specialization of a generic definition with bound arguments. The
    /// clone shares the definition but decodes its own body.
    pub(crate) fn specialized(&self, id: MethodId, args: GenericArgs) -> Self {
        InterpretedMethod::new(
            id,
            self.declaring_type,
            self.def.clone(),
            Some(args),
            self.is_delegate_invoke,
        )
    }

    pub fn is_delegate_invoke(&self) -> bool {
        self.is_delegate_invoke
    }

    pub(crate) fn generic_args_slice(&self) -> &[(String, TypeId)] {
        self.generic_args.as_deref().unwrap_or(&[])
    }

    /// The decoded body, produced on first call.
    ///
    /// Decoding happens at most once per method; concurrent callers block on
    /// the write lock and observe the same `Arc`. On success the raw stream
    /// is released. On failure the raw stream is kept so a later call can
    /// retry after the missing module loads.
    pub fn body(&self, registry: &Registry) -> Result<Arc<DecodedBody>, BindError> {
        if let Some(body) = self.body.read().as_ref() {
            return Ok(body.clone());
        }
        let mut slot = self.body.write();
        if let Some(body) = slot.as_ref() {
            return Ok(body.clone());
        }
        let raw = self.raw_body.lock().clone();
        let decoded = match raw {
            Some(raw) => Arc::new(decode::decode_body(registry, self, &raw)?),
            None => Arc::new(DecodedBody::empty()),
        };
        *self.raw_body.lock() = None;
        *slot = Some(decoded.clone());
        Ok(decoded)
    }

    pub fn is_decoded(&self) -> bool {
        self.body.read().is_some()
    }
}

impl MethodRuntime for InterpretedMethod {
    fn id(&self) -> MethodId {
        self.id
    }

    fn name(&self) -> &str {
        &self.def.name
    }

    fn declaring_type(&self) -> TypeId {
        self.declaring_type
    }

    fn has_this(&self) -> bool {
        self.def.has_this
    }

    fn is_constructor(&self) -> bool {
        self.def.is_constructor
    }

    fn is_virtual(&self) -> bool {
        self.def.is_virtual
    }

    fn is_abstract(&self) -> bool {
        self.def.is_abstract
    }

    fn is_native(&self) -> bool {
        false
    }

    fn param_count(&self) -> usize {
        self.def.params.len()
    }

    fn param_types(&self, registry: &Registry) -> Result<Arc<[TypeId]>, BindError> {
        if let Some(params) = self.params.read().as_ref() {
            return Ok(params.clone());
        }
        let mut slot = self.params.write();
        if let Some(params) = slot.as_ref() {
            return Ok(params.clone());
        }
        let type_args = registry.ty(self.declaring_type).generic_arguments();
        let ctx = GenericContext::new(
            type_args.as_deref().unwrap_or(&[]),
            self.generic_args_slice(),
        );
        let mut resolved = Vec::with_capacity(self.def.params.len());
        for r in &self.def.params {
            resolved.push(ctx.make_concrete(registry, r)?);
        }
        let params: Arc<[TypeId]> = resolved.into();
        *slot = Some(params.clone());
        Ok(params)
    }

    fn return_type(&self, registry: &Registry) -> Result<TypeId, BindError> {
        if let Some(ret) = *self.ret.read() {
            return Ok(ret);
        }
        let mut slot = self.ret.write();
        if let Some(ret) = *slot {
            return Ok(ret);
        }
        let type_args = registry.ty(self.declaring_type).generic_arguments();
        let ctx = GenericContext::new(
            type_args.as_deref().unwrap_or(&[]),
            self.generic_args_slice(),
        );
        let ret = ctx.make_concrete(registry, &self.def.return_type)?;
        *slot = Some(ret);
        Ok(ret)
    }

    fn declared_param_refs(&self) -> &[TypeRef] {
        &self.def.params
    }

    fn generic_param_names(&self) -> &[String] {
        &self.def.generic_params
    }

    fn generic_param_count(&self) -> usize {
        if self.generic_args.is_some() {
            0
        } else {
            self.def.generic_params.len()
        }
    }

    fn is_generic_instance(&self) -> bool {
        self.generic_args.is_some()
    }

    fn generic_arguments(&self) -> Option<GenericArgs> {
        self.generic_args.clone()
    }

    fn find_generic_argument(&self, registry: &Registry, name: &str) -> Option<TypeId> {
        registry
            .ty(self.declaring_type)
            .find_generic_argument(name)
            .or_else(|| {
                self.generic_args
                    .as_deref()
                    .and_then(|args| args.iter().find(|(n, _)| n == name).map(|(_, id)| *id))
            })
    }

    fn display_name(&self, registry: &Registry) -> Arc<str> {
        let mut slot = self.display.lock();
        if let Some(name) = slot.as_ref() {
            return name.clone();
        }
        let name = build_display(registry, self.declaring_type, &self.def.name, &self.def.params);
        *slot = Some(name.clone());
        name
    }
}
