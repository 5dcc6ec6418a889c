#![allow(dead_code)]

use std::sync::Arc;

use ilbind::metadata::{MethodBody, MethodDef, RawInstruction, TypeDef, TypeRef};
use ilbind::method::{DecodedBody, RuntimeMethod};
use ilbind::{MethodId, Registry, TypeId, TypeRuntime};

pub fn int32() -> TypeRef {
    TypeRef::named("System.Int32")
}

pub fn double() -> TypeRef {
    TypeRef::named("System.Double")
}

pub fn string_ty() -> TypeRef {
    TypeRef::named("System.String")
}

pub fn class(name: &str) -> TypeDef {
    TypeDef {
        name: name.to_string(),
        ..TypeDef::default()
    }
}

pub fn instance_method(name: &str, params: Vec<TypeRef>, body: MethodBody) -> Arc<MethodDef> {
    Arc::new(MethodDef {
        name: name.to_string(),
        has_this: true,
        params,
        body: Some(Arc::new(body)),
        ..MethodDef::default()
    })
}

pub fn static_method(name: &str, params: Vec<TypeRef>, body: MethodBody) -> Arc<MethodDef> {
    Arc::new(MethodDef {
        name: name.to_string(),
        params,
        body: Some(Arc::new(body)),
        ..MethodDef::default()
    })
}

/// Body whose end label sits one past the last instruction's label.
pub fn body_of(instructions: Vec<RawInstruction>) -> MethodBody {
    let end_label = instructions.last().map(|i| i.label + 1).unwrap_or(0);
    MethodBody {
        locals: vec![],
        instructions,
        end_label,
        handlers: vec![],
    }
}

pub fn load_class(registry: &Registry, def: TypeDef) -> TypeId {
    registry.register_interpreted(Arc::new(def))
}

pub fn find_method(registry: &Registry, tid: TypeId, name: &str, arity: usize) -> MethodId {
    registry
        .ty(tid)
        .get_method_by_arity(registry, name, arity)
        .unwrap()
        .unwrap_or_else(|| panic!("method {name}/{arity} not found"))
}

pub fn decode(registry: &Registry, mid: MethodId) -> Arc<DecodedBody> {
    let method = registry.method(mid);
    match method.as_ref() {
        RuntimeMethod::Interpreted(m) => m.body(registry).unwrap(),
        RuntimeMethod::Native(_) => panic!("expected an interpreted method"),
    }
}
