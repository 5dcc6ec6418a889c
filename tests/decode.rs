mod common;

use std::sync::Arc;

use common::*;
use ilbind::metadata::{
    FieldDef, FieldRef, MethodBody, MethodRef, Operand, RawHandler, RawHandlerKind, RawInstruction,
    TypeRef,
};
use ilbind::method::body::{HandlerKind, OpCode};
use ilbind::method::RuntimeMethod;
use ilbind::{pack_field_token, BindError, Registry};

#[test]
fn branch_targets_become_linear_indices() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::simple(0, OpCode::Nop),
        RawInstruction::new(5, OpCode::Br, Operand::Target(12)),
        RawInstruction::simple(7, OpCode::Nop),
        RawInstruction::simple(12, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    assert_eq!(decoded.instructions[1].opcode, OpCode::Br);
    assert_eq!(decoded.instructions[1].token, 3);
}

#[test]
fn dangling_branch_target_is_fatal() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Br, Operand::Target(99)),
        RawInstruction::simple(1, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let mid = find_method(&registry, tid, "Run", 0);
    let method = registry.method(mid);
    let RuntimeMethod::Interpreted(m) = method.as_ref() else {
        panic!()
    };
    match m.body(&registry) {
        Err(BindError::DanglingBranchTarget { target, .. }) => assert_eq!(target, 99),
        other => panic!("expected dangling branch error, got {other:?}"),
    }
}

#[test]
fn branch_to_the_end_label_is_dangling() {
    let registry = Registry::new();
    // The end label closes handler ranges one past the last instruction;
    // a branch there would escape the decoded array.
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Br, Operand::Target(2)),
        RawInstruction::simple(1, OpCode::Ret),
    ]);
    assert_eq!(body.end_label, 2);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let mid = find_method(&registry, tid, "Run", 0);
    let method = registry.method(mid);
    let RuntimeMethod::Interpreted(m) = method.as_ref() else {
        panic!()
    };
    match m.body(&registry) {
        Err(BindError::DanglingBranchTarget { target, .. }) => assert_eq!(target, 2),
        other => panic!("expected dangling branch error, got {other:?}"),
    }
}

#[test]
fn switch_target_at_the_end_label_is_dangling() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Switch, Operand::Targets(vec![1, 2])),
        RawInstruction::simple(1, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let mid = find_method(&registry, tid, "Run", 0);
    let method = registry.method(mid);
    let RuntimeMethod::Interpreted(m) = method.as_ref() else {
        panic!()
    };
    match m.body(&registry) {
        Err(BindError::DanglingBranchTarget { target, .. }) => assert_eq!(target, 2),
        other => panic!("expected dangling branch error, got {other:?}"),
    }
}

#[test]
fn float_literals_keep_exact_bit_patterns() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::LdcR4, Operand::Float32(1.5)),
        RawInstruction::new(1, OpCode::LdcR8, Operand::Float64(std::f64::consts::PI)),
        RawInstruction::new(2, OpCode::LdcI4S, Operand::Int8(-5)),
        RawInstruction::simple(3, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    assert_eq!(decoded.instructions[0].token, 1.5f32.to_bits() as i32);
    assert_eq!(
        decoded.instructions[1].token_long,
        std::f64::consts::PI.to_bits() as i64
    );
    assert_eq!(decoded.instructions[2].token, -5);
}

#[test]
fn argument_slots_shift_past_the_receiver() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Ldarg, Operand::Argument(1)),
        RawInstruction::simple(1, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![int32(), int32()], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 2));
    // Slot 0 holds the receiver, so declared parameter 1 lands in slot 2.
    assert_eq!(decoded.instructions[0].token, 2);
}

#[test]
fn static_method_arguments_keep_their_slots() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Ldarg, Operand::Argument(1)),
        RawInstruction::simple(1, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![static_method("Run", vec![int32(), int32()], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 2));
    assert_eq!(decoded.instructions[0].token, 1);
}

fn call_target() -> MethodRef {
    MethodRef::new(TypeRef::named("App.Main"), "Helper", true, vec![])
}

#[test]
fn callvirt_on_non_virtual_method_devirtualizes() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Callvirt, Operand::Method(call_target())),
        RawInstruction::simple(1, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![
            instance_method("Helper", vec![], body_of(vec![RawInstruction::simple(0, OpCode::Ret)])),
            instance_method("Run", vec![], body),
        ];
        c
    });
    let helper = find_method(&registry, tid, "Helper", 0);
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    assert_eq!(decoded.instructions[0].opcode, OpCode::Call);
    assert_eq!(decoded.instructions[0].token, helper.0 as i32);
}

#[test]
fn callvirt_on_virtual_method_stays_virtual() {
    let registry = Registry::new();
    let helper = {
        let mut m = MethodBody::default();
        m.instructions = vec![RawInstruction::simple(0, OpCode::Ret)];
        m.end_label = 1;
        m
    };
    let mut helper_def = (*instance_method("Helper", vec![], helper)).clone();
    helper_def.is_virtual = true;
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Callvirt, Operand::Method(call_target())),
        RawInstruction::simple(1, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![Arc::new(helper_def), instance_method("Run", vec![], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    assert_eq!(decoded.instructions[0].opcode, OpCode::Callvirt);
}

#[test]
fn unresolvable_callee_degrades_to_argument_count() {
    let registry = Registry::new();
    let target = MethodRef::new(
        TypeRef::named("Missing.Type"),
        "M",
        true,
        vec![int32(), int32()],
    );
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Callvirt, Operand::Method(target)),
        RawInstruction::simple(1, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    assert_eq!(decoded.instructions[0].token, -1);
    // Two declared parameters plus the receiver.
    assert_eq!(decoded.instructions[0].token_long, 3);
}

#[test]
fn constrained_prefix_receives_the_callee_token() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Constrained, Operand::Type(int32())),
        RawInstruction::new(1, OpCode::Callvirt, Operand::Method(call_target())),
        RawInstruction::simple(2, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![
            instance_method("Helper", vec![], body_of(vec![RawInstruction::simple(0, OpCode::Ret)])),
            instance_method("Run", vec![], body),
        ];
        c
    });
    let int_tid = registry.get_type_by_name("System.Int32").unwrap();
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    assert_eq!(decoded.instructions[0].token, int_tid.0 as i32);
    assert_eq!(
        decoded.instructions[0].token_long,
        decoded.instructions[1].token as i64
    );
}

#[test]
fn field_tokens_pack_declaring_type_and_index() {
    let registry = Registry::new();
    let base_tid = load_class(&registry, {
        let mut c = class("App.Base");
        c.fields = vec![
            FieldDef {
                name: "x".into(),
                ty: int32(),
                is_static: false,
            },
            FieldDef {
                name: "y".into(),
                ty: int32(),
                is_static: false,
            },
        ];
        c
    });
    let body = body_of(vec![
        RawInstruction::new(
            0,
            OpCode::Ldfld,
            Operand::Field(FieldRef::new(TypeRef::named("App.Derived"), "y")),
        ),
        RawInstruction::simple(1, OpCode::Ret),
    ]);
    let derived_tid = load_class(&registry, {
        let mut c = class("App.Derived");
        c.base = Some(TypeRef::named("App.Base"));
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, derived_tid, "Run", 0));
    // "y" is inherited, so the token names the declaring base type.
    assert_eq!(
        decoded.instructions[0].token_long,
        pack_field_token(base_tid, 1)
    );
}

#[test]
fn ldtoken_discriminates_fields_from_types() {
    let registry = Registry::new();
    let owner_tid = load_class(&registry, {
        let mut c = class("App.Owner");
        c.fields = vec![FieldDef {
            name: "x".into(),
            ty: int32(),
            is_static: true,
        }];
        c
    });
    let body = body_of(vec![
        RawInstruction::new(
            0,
            OpCode::Ldtoken,
            Operand::TokenField(FieldRef::new(TypeRef::named("App.Owner"), "x")),
        ),
        RawInstruction::new(1, OpCode::Ldtoken, Operand::TokenType(int32())),
        RawInstruction::simple(2, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let int_tid = registry.get_type_by_name("System.Int32").unwrap();
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    assert_eq!(decoded.instructions[0].token, 0);
    assert_eq!(
        decoded.instructions[0].token_long,
        pack_field_token(owner_tid, 0)
    );
    assert_eq!(decoded.instructions[1].token, 1);
    assert_eq!(decoded.instructions[1].token_long, int_tid.0 as i64);
}

#[test]
fn identical_strings_intern_to_one_token() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Ldstr, Operand::String("hello".into())),
        RawInstruction::new(1, OpCode::Ldstr, Operand::String("world".into())),
        RawInstruction::new(2, OpCode::Ldstr, Operand::String("hello".into())),
        RawInstruction::simple(3, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    assert_eq!(
        decoded.instructions[0].token_long,
        decoded.instructions[2].token_long
    );
    assert_ne!(
        decoded.instructions[0].token_long,
        decoded.instructions[1].token_long
    );
    let text = registry
        .lookup_string(decoded.instructions[0].token_long)
        .unwrap();
    assert_eq!(&*text, "hello");
}

#[test]
fn identical_switch_operands_share_one_jump_table() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Switch, Operand::Targets(vec![3, 4])),
        RawInstruction::new(1, OpCode::Switch, Operand::Targets(vec![3, 4])),
        RawInstruction::simple(2, OpCode::Nop),
        RawInstruction::simple(3, OpCode::Nop),
        RawInstruction::simple(4, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    let key = decoded.instructions[0].token;
    assert_eq!(decoded.instructions[1].token, key);
    assert_eq!(decoded.jump_tables.len(), 1);
    assert_eq!(decoded.jump_tables[&key].as_ref(), &[3, 4]);
}

#[test]
fn distinct_switch_operands_get_distinct_jump_tables() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::Switch, Operand::Targets(vec![3, 4])),
        RawInstruction::new(1, OpCode::Switch, Operand::Targets(vec![4, 3])),
        RawInstruction::simple(2, OpCode::Nop),
        RawInstruction::simple(3, OpCode::Nop),
        RawInstruction::simple(4, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    let first = decoded.instructions[0].token;
    let second = decoded.instructions[1].token;
    assert_ne!(first, second);
    assert_eq!(decoded.jump_tables.len(), 2);
    assert_eq!(decoded.jump_tables[&first].as_ref(), &[3, 4]);
    assert_eq!(decoded.jump_tables[&second].as_ref(), &[4, 3]);
}

#[test]
fn handler_ranges_map_to_decoded_indices() {
    let registry = Registry::new();
    let mut body = MethodBody {
        instructions: vec![
            RawInstruction::simple(10, OpCode::Nop),
            RawInstruction::new(20, OpCode::Leave, Operand::Target(50)),
            RawInstruction::simple(30, OpCode::Nop),
            RawInstruction::simple(40, OpCode::Endfinally),
            RawInstruction::simple(50, OpCode::Ret),
        ],
        end_label: 60,
        ..MethodBody::default()
    };
    body.handlers = vec![RawHandler {
        kind: RawHandlerKind::Finally,
        try_start: 10,
        try_end: 30,
        handler_start: 30,
        handler_end: 50,
    }];
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    let handler = decoded.handlers[0];
    assert_eq!(handler.kind, HandlerKind::Finally);
    assert_eq!(handler.try_start, 0);
    assert_eq!(handler.try_end, 2);
    assert_eq!(handler.handler_start, 2);
    assert_eq!(handler.handler_end, 4);
}

#[test]
fn handler_range_outside_the_body_is_fatal() {
    let registry = Registry::new();
    let mut body = body_of(vec![RawInstruction::simple(0, OpCode::Ret)]);
    body.handlers = vec![RawHandler {
        kind: RawHandlerKind::Fault,
        try_start: 0,
        try_end: 99,
        handler_start: 0,
        handler_end: 1,
    }];
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let mid = find_method(&registry, tid, "Run", 0);
    let method = registry.method(mid);
    let RuntimeMethod::Interpreted(m) = method.as_ref() else {
        panic!()
    };
    match m.body(&registry) {
        Err(BindError::InvalidExceptionRange { label, .. }) => assert_eq!(label, 99),
        other => panic!("expected invalid handler range, got {other:?}"),
    }
}

#[test]
fn locals_resolve_against_the_registry() {
    let registry = Registry::new();
    load_class(&registry, class("App.Base"));
    let mut body = body_of(vec![RawInstruction::simple(0, OpCode::Ret)]);
    body.locals = vec![int32(), TypeRef::named("App.Base")];
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let decoded = decode(&registry, find_method(&registry, tid, "Run", 0));
    assert_eq!(decoded.local_count, 2);
    assert_eq!(
        decoded.local_types[0],
        registry.get_type_by_name("System.Int32").unwrap()
    );
    assert_eq!(
        decoded.local_types[1],
        registry.get_type_by_name("App.Base").unwrap()
    );
}

fn build_sample(registry: &Registry) -> Arc<ilbind::method::DecodedBody> {
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::LdcR8, Operand::Float64(0.1)),
        RawInstruction::new(1, OpCode::Ldstr, Operand::String("sample".into())),
        RawInstruction::new(2, OpCode::Switch, Operand::Targets(vec![4, 5])),
        RawInstruction::new(3, OpCode::Br, Operand::Target(5)),
        RawInstruction::simple(4, OpCode::Nop),
        RawInstruction::simple(5, OpCode::Ret),
    ]);
    let tid = load_class(registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    decode(registry, find_method(registry, tid, "Run", 0))
}

#[test]
fn decoding_is_deterministic_across_registries() {
    let first = build_sample(&Registry::new());
    let second = build_sample(&Registry::new());
    assert_eq!(first.instructions, second.instructions);
    assert_eq!(first.jump_tables, second.jump_tables);
}

#[test]
fn decode_runs_once_and_releases_the_raw_body() {
    let registry = Registry::new();
    let body = body_of(vec![RawInstruction::simple(0, OpCode::Ret)]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let mid = find_method(&registry, tid, "Run", 0);
    let method = registry.method(mid);
    let RuntimeMethod::Interpreted(m) = method.as_ref() else {
        panic!()
    };
    assert!(!m.is_decoded());
    let first = m.body(&registry).unwrap();
    assert!(m.is_decoded());
    let second = m.body(&registry).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn mismatched_operand_is_rejected() {
    let registry = Registry::new();
    let body = body_of(vec![
        RawInstruction::new(0, OpCode::LdcI4, Operand::String("oops".into())),
        RawInstruction::simple(1, OpCode::Ret),
    ]);
    let tid = load_class(&registry, {
        let mut c = class("App.Main");
        c.methods = vec![instance_method("Run", vec![], body)];
        c
    });
    let mid = find_method(&registry, tid, "Run", 0);
    let method = registry.method(mid);
    let RuntimeMethod::Interpreted(m) = method.as_ref() else {
        panic!()
    };
    match m.body(&registry) {
        Err(BindError::MalformedOperand { opcode, .. }) => assert_eq!(opcode, OpCode::LdcI4),
        other => panic!("expected malformed operand, got {other:?}"),
    }
}
