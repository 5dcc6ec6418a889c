mod common;

use common::*;
use ilbind::host::{HostValue, NativeFieldDesc, NativeMethodDesc, NativeTypeDesc};
use ilbind::metadata::{FieldRef, TypeRef};
use ilbind::types::ResolvedField;
use ilbind::{pack_field_token, BindError, Registry, TypeRuntime};
use std::sync::Arc;

fn vector_desc() -> NativeTypeDesc {
    let mut desc = NativeTypeDesc::value_type("Game.Vector");
    desc.fields = vec![
        NativeFieldDesc::new("x", TypeRef::named("System.Single")),
        NativeFieldDesc::new("y", TypeRef::named("System.Single")),
    ];
    desc.methods = vec![
        NativeMethodDesc::new("Length", vec![], TypeRef::named("System.Single")),
        NativeMethodDesc::new(
            "Scale",
            vec![TypeRef::named("System.Single")],
            TypeRef::named("Game.Vector"),
        ),
        NativeMethodDesc::new(
            "Scale",
            vec![TypeRef::named("System.Double")],
            TypeRef::named("Game.Vector"),
        ),
    ];
    desc.constructors = vec![NativeMethodDesc::ctor(vec![
        TypeRef::named("System.Single"),
        TypeRef::named("System.Single"),
    ])];
    desc
}

#[test]
fn members_populate_whole_type_on_first_access() {
    let registry = Registry::new();
    let vid = registry.register_native(vector_desc());
    let ty = registry.ty(vid);

    let methods = ty.methods(&registry).unwrap();
    assert_eq!(methods.len(), 3);

    // Instance field layout is ordered by declaration.
    let layout = ty.instance_field_types(&registry).unwrap();
    let single = registry.get_type_by_name("System.Single").unwrap();
    assert_eq!(layout.as_ref(), &[single, single]);
}

#[test]
fn field_tokens_resolve_through_the_descriptor() {
    let registry = Registry::new();
    let vid = registry.register_native(vector_desc());
    let token = registry
        .field_token(
            &FieldRef::new(TypeRef::named("Game.Vector"), "y"),
            ilbind::GenericContext::EMPTY,
        )
        .unwrap();
    assert_eq!(token, pack_field_token(vid, 1));

    let field = registry.get_field(token).unwrap().unwrap();
    assert_eq!(field.name(), "y");
    assert!(matches!(field, ResolvedField::Native(_)));
}

#[test]
fn field_lookup_recurses_to_the_base_descriptor() {
    let registry = Registry::new();
    let mut base = NativeTypeDesc::new("Game.Entity");
    base.fields = vec![NativeFieldDesc::new("tag", TypeRef::named("System.Int32"))];
    let base_id = registry.register_native(base);

    let mut derived = NativeTypeDesc::new("Game.Player");
    derived.base = Some(TypeRef::named("Game.Entity"));
    registry.register_native(derived);

    let token = registry
        .field_token(
            &FieldRef::new(TypeRef::named("Game.Player"), "tag"),
            ilbind::GenericContext::EMPTY,
        )
        .unwrap();
    assert_eq!(token, pack_field_token(base_id, 0));

    let missing = registry.field_token(
        &FieldRef::new(TypeRef::named("Game.Player"), "nope"),
        ilbind::GenericContext::EMPTY,
    );
    assert!(matches!(missing, Err(BindError::UnresolvedField(_))));
}

#[test]
fn overloads_resolve_by_exact_parameter_types() {
    let registry = Registry::new();
    let vid = registry.register_native(vector_desc());
    let ty = registry.ty(vid);
    let single = registry.get_type_by_name("System.Single").unwrap();
    let dbl = registry.get_type_by_name("System.Double").unwrap();

    let a = ty
        .get_method(&registry, "Scale", &[single], None, None)
        .unwrap()
        .unwrap();
    let b = ty
        .get_method(&registry, "Scale", &[dbl], None, None)
        .unwrap()
        .unwrap();
    assert_ne!(a, b);

    let miss = ty
        .get_method(&registry, "Scale", &[registry.object_type()], None, None)
        .unwrap();
    assert!(miss.is_none());
}

#[test]
fn method_lookup_recurses_to_the_base_descriptor() {
    let registry = Registry::new();
    let mut base = NativeTypeDesc::new("Game.Entity");
    base.methods = vec![NativeMethodDesc::new(
        "Describe",
        vec![],
        TypeRef::named("System.String"),
    )];
    registry.register_native(base);

    let mut derived = NativeTypeDesc::new("Game.Player");
    derived.base = Some(TypeRef::named("Game.Entity"));
    let pid = registry.register_native(derived);

    let found = registry
        .ty(pid)
        .get_method(&registry, "Describe", &[], None, None)
        .unwrap();
    assert!(found.is_some());
}

#[test]
fn constructors_match_on_parameter_types() {
    let registry = Registry::new();
    let vid = registry.register_native(vector_desc());
    let ty = registry.ty(vid);
    let single = registry.get_type_by_name("System.Single").unwrap();

    let ctor = ty.get_constructor(&registry, &[single, single]).unwrap();
    assert!(ctor.is_some());
    let miss = ty.get_constructor(&registry, &[single]).unwrap();
    assert!(miss.is_none());
}

#[test]
fn generic_native_definitions_instantiate_and_match_structurally() {
    let registry = Registry::new();
    let mut desc = NativeTypeDesc::new("Demo.Box");
    desc.generic_params = vec!["T".to_string()];
    desc.methods = vec![NativeMethodDesc::new(
        "Set",
        vec![TypeRef::type_param("T", 0)],
        TypeRef::named("System.Void"),
    )];
    let box_id = registry.register_native(desc);
    let int = registry.get_type_by_name("System.Int32").unwrap();
    let string = registry.get_type_by_name("System.String").unwrap();

    let boxed = registry.make_generic_instance(box_id, &[int]).unwrap();
    let boxed_ty = registry.ty(boxed);

    // On the bound instance T is concrete, so only Set(int) matches.
    let hit = boxed_ty
        .get_method(&registry, "Set", &[int], None, None)
        .unwrap();
    assert!(hit.is_some());
    let miss = boxed_ty
        .get_method(&registry, "Set", &[string], None, None)
        .unwrap();
    assert!(miss.is_none());

    let again = registry.make_generic_instance(box_id, &[int]).unwrap();
    assert_eq!(boxed, again);
}

#[test]
fn missing_capability_surfaces_unsupported_conversion() {
    let registry = Registry::new();
    let vid = registry.register_native(vector_desc());
    let ty = registry.ty(vid);
    let ilbind::RuntimeType::Native(native) = ty.as_ref() else {
        panic!()
    };
    match native.construct(&[]) {
        Err(BindError::UnsupportedConversion(msg)) => assert!(msg.contains("Game.Vector")),
        other => panic!("expected unsupported conversion, got {other:?}"),
    }
}

#[test]
fn registered_capabilities_are_invoked() {
    let registry = Registry::new();
    let mut desc = NativeTypeDesc::new("Demo.Counter");
    desc.capabilities.construct = Some(Arc::new(|_args| Ok(HostValue::new(41i32))));
    desc.capabilities.memberwise_clone =
        Some(Arc::new(|value| {
            let inner = *value.downcast_ref::<i32>().unwrap();
            Ok(HostValue::new(inner + 1))
        }));
    let id = registry.register_native(desc);
    let ty = registry.ty(id);
    let ilbind::RuntimeType::Native(native) = ty.as_ref() else {
        panic!()
    };

    let value = native.construct(&[]).unwrap();
    assert_eq!(value.downcast_ref::<i32>(), Some(&41));
    let clone = native.memberwise_clone(&value).unwrap();
    assert_eq!(clone.downcast_ref::<i32>(), Some(&42));
}

#[test]
fn derived_shapes_are_cached_per_element() {
    let registry = Registry::new();
    let int = registry.get_type_by_name("System.Int32").unwrap();
    let a = registry.make_array_type(int, 1);
    let b = registry.make_array_type(int, 1);
    assert_eq!(a, b);

    let two_dim = registry.make_array_type(int, 2);
    assert_ne!(a, two_dim);
    assert_eq!(registry.ty(two_dim).name(), "System.Int32[,]");

    let ptr = registry.make_pointer_type(int);
    assert_eq!(registry.ty(ptr).name(), "System.Int32*");
    assert_eq!(registry.ty(ptr).element_type(), Some(int));
}
