//! Host-side native type descriptors.
//!
//! The embedding host registers each native type it wants interpreted code
//! to see as a [`NativeTypeDesc`]: declared members plus a capability table
//! of function objects the binding layer invokes instead of reflecting over
//! the host runtime. A capability the host did not supply surfaces as
//! [`BindError::UnsupportedConversion`] at the call site.

use std::any::Any;
use std::fmt;

use crate::error::BindError;
use crate::metadata::TypeRef;
use crate::sync::Arc;

/// Opaque value passed across the host boundary.
pub struct HostValue(pub Box<dyn Any + Send + Sync>);

impl HostValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        HostValue(Box::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostValue")
    }
}

pub type ConstructFn = Arc<dyn Fn(&[HostValue]) -> Result<HostValue, BindError> + Send + Sync>;
pub type ConstructArrayFn = Arc<dyn Fn(usize) -> Result<HostValue, BindError> + Send + Sync>;
pub type MemberwiseCloneFn = Arc<dyn Fn(&HostValue) -> Result<HostValue, BindError> + Send + Sync>;
pub type InvokeFn =
    Arc<dyn Fn(Option<&HostValue>, &[HostValue]) -> Result<HostValue, BindError> + Send + Sync>;
pub type FieldGetterFn = Arc<dyn Fn(&HostValue) -> Result<HostValue, BindError> + Send + Sync>;
pub type FieldSetterFn =
    Arc<dyn Fn(&mut HostValue, HostValue) -> Result<(), BindError> + Send + Sync>;

/// Getter/setter pair standing in for a direct field handle.
#[derive(Clone)]
pub struct FieldAccessors {
    pub getter: FieldGetterFn,
    pub setter: FieldSetterFn,
}

impl fmt::Debug for FieldAccessors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldAccessors")
    }
}

/// Per-type construct/clone capabilities supplied by the host.
#[derive(Clone, Default)]
pub struct NativeCapabilities {
    pub construct: Option<ConstructFn>,
    pub construct_array: Option<ConstructArrayFn>,
    pub memberwise_clone: Option<MemberwiseCloneFn>,
}

impl fmt::Debug for NativeCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCapabilities")
            .field("construct", &self.construct.is_some())
            .field("construct_array", &self.construct_array.is_some())
            .field("memberwise_clone", &self.memberwise_clone.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NativeTypeDesc {
    /// Full name, e.g. `System.Collections.Generic.List`.
    pub name: String,
    pub base: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub is_value_type: bool,
    pub is_interface: bool,
    pub is_delegate: bool,
    pub generic_params: Vec<String>,
    pub fields: Vec<NativeFieldDesc>,
    pub methods: Vec<NativeMethodDesc>,
    pub constructors: Vec<NativeMethodDesc>,
    pub capabilities: NativeCapabilities,
}

impl NativeTypeDesc {
    pub fn new(name: &str) -> Self {
        NativeTypeDesc {
            name: name.to_string(),
            base: Some(TypeRef::named("System.Object")),
            interfaces: vec![],
            is_value_type: false,
            is_interface: false,
            is_delegate: false,
            generic_params: vec![],
            fields: vec![],
            methods: vec![],
            constructors: vec![],
            capabilities: NativeCapabilities::default(),
        }
    }

    pub fn value_type(name: &str) -> Self {
        let mut desc = Self::new(name);
        desc.base = Some(TypeRef::named("System.ValueType"));
        desc.is_value_type = true;
        desc
    }
}

#[derive(Clone)]
pub struct NativeFieldDesc {
    pub name: String,
    pub ty: TypeRef,
    pub is_static: bool,
    /// Direct host handle, meaningful only to the host's own accessors.
    pub handle: u64,
    pub accessors: Option<FieldAccessors>,
}

impl fmt::Debug for NativeFieldDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFieldDesc")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("is_static", &self.is_static)
            .field("handle", &self.handle)
            .field("accessors", &self.accessors.is_some())
            .finish()
    }
}

impl NativeFieldDesc {
    pub fn new(name: &str, ty: TypeRef) -> Self {
        NativeFieldDesc {
            name: name.to_string(),
            ty,
            is_static: false,
            handle: 0,
            accessors: None,
        }
    }
}

#[derive(Clone)]
pub struct NativeMethodDesc {
    pub name: String,
    pub has_this: bool,
    pub is_virtual: bool,
    pub generic_params: Vec<String>,
    pub params: Vec<TypeRef>,
    pub return_type: TypeRef,
    pub invoke: Option<InvokeFn>,
}

impl fmt::Debug for NativeMethodDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMethodDesc")
            .field("name", &self.name)
            .field("has_this", &self.has_this)
            .field("is_virtual", &self.is_virtual)
            .field("generic_params", &self.generic_params)
            .field("params", &self.params)
            .field("return_type", &self.return_type)
            .finish()
    }
}

impl NativeMethodDesc {
    pub fn new(name: &str, params: Vec<TypeRef>, return_type: TypeRef) -> Self {
        NativeMethodDesc {
            name: name.to_string(),
            has_this: true,
            is_virtual: false,
            generic_params: vec![],
            params,
            return_type,
            invoke: None,
        }
    }

    pub fn ctor(params: Vec<TypeRef>) -> Self {
        let mut desc = Self::new(".ctor", params, TypeRef::named("System.Void"));
        desc.has_this = true;
        desc
    }
}

/// Descriptors for the built-in corlib the registry installs at startup, so
/// interpreted metadata can always resolve the primitive names.
pub fn builtin_descs() -> Vec<NativeTypeDesc> {
    let mut descs = Vec::new();

    let mut object = NativeTypeDesc::new("System.Object");
    object.base = None;
    descs.push(object);

    let mut value_type = NativeTypeDesc::new("System.ValueType");
    value_type.base = Some(TypeRef::named("System.Object"));
    descs.push(value_type);

    let mut enum_type = NativeTypeDesc::new("System.Enum");
    enum_type.base = Some(TypeRef::named("System.ValueType"));
    descs.push(enum_type);

    descs.push(NativeTypeDesc::value_type("System.Void"));
    for name in [
        "System.Boolean",
        "System.Char",
        "System.SByte",
        "System.Byte",
        "System.Int16",
        "System.UInt16",
        "System.Int32",
        "System.UInt32",
        "System.Int64",
        "System.UInt64",
        "System.Single",
        "System.Double",
        "System.IntPtr",
        "System.UIntPtr",
    ] {
        descs.push(NativeTypeDesc::value_type(name));
    }

    descs.push(NativeTypeDesc::new("System.String"));
    descs.push(NativeTypeDesc::new("System.Array"));

    descs
}
