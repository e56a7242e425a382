mod common;

use sald_bridge::native::error::{set_error, RawError};
use sald_bridge::native::strdup;
use sald_bridge::{
    ArgInfo, BridgeError, CallableDecl, CallableInfo, Direction, EnumType, ErrorKind, ParamDecl,
    ParamShape, Transfer, TypeInfo, TypeTag, Value,
};
use std::ffi::{c_char, c_int, c_void, CStr};

extern "C" fn demo_add(a: i32, b: i32) -> i32 {
    a + b
}

extern "C" fn demo_negate8(x: i8) -> i8 {
    -x
}

extern "C" fn demo_scale(x: f64, by: f32) -> f64 {
    x * by as f64
}

extern "C" fn demo_strlen(s: *const c_char) -> u32 {
    if s.is_null() {
        return 0;
    }
    unsafe { CStr::from_ptr(s) }.to_bytes().len() as u32
}

extern "C" fn demo_greeting(name: *const c_char) -> *mut c_char {
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy();
    strdup(format!("hello, {}", name).as_bytes())
}

extern "C" fn demo_divmod(a: i32, b: i32, rem: *mut i32) -> i32 {
    unsafe { *rem = a % b };
    a / b
}

extern "C" fn demo_checked(value: i32, error: *mut *mut RawError) -> c_int {
    if value < 0 {
        unsafe { set_error(error, "demo-error-quark", 7, "negative value") };
        return 0;
    }
    1
}

extern "C" fn demo_validate(value: i32, error: *mut *mut RawError) {
    if value < 0 {
        unsafe { set_error(error, "demo-error-quark", 8, "invalid") };
    }
}

extern "C" fn demo_lookup(key: i32, out: *mut i32) -> c_int {
    if key <= 0 {
        return 0;
    }
    unsafe { *out = key * 10 };
    1
}

extern "C" fn demo_mode_weight(mode: c_int) -> i32 {
    mode * 100
}

fn int32() -> std::rc::Rc<TypeInfo> {
    TypeInfo::scalar(TypeTag::Int32)
}

#[test]
fn test_scalar_calls() {
    let bridge = common::bridge(&[
        ("demo_add", demo_add as *const c_void),
        ("demo_negate8", demo_negate8 as *const c_void),
        ("demo_scale", demo_scale as *const c_void),
    ]);
    let (_host, ctx) = common::context();

    let add = CallableInfo::function("Demo", "add", "demo_add")
        .arg(ArgInfo::new("a", int32()))
        .arg(ArgInfo::new("b", int32()))
        .returns(int32(), Transfer::Nothing)
        .build();
    let add = bridge.build_callable(&add, None).unwrap();
    let results = bridge
        .invoke(&ctx, &add, vec![Value::Integer(40), Value::Integer(2)])
        .unwrap();
    assert_eq!(results, vec![Value::Integer(42)]);

    let negate = CallableInfo::function("Demo", "negate8", "demo_negate8")
        .arg(ArgInfo::new("x", TypeInfo::scalar(TypeTag::Int8)))
        .returns(TypeInfo::scalar(TypeTag::Int8), Transfer::Nothing)
        .build();
    let negate = bridge.build_callable(&negate, None).unwrap();
    let results = bridge.invoke(&ctx, &negate, vec![Value::Integer(100)]).unwrap();
    assert_eq!(results, vec![Value::Integer(-100)]);

    let scale = CallableInfo::function("Demo", "scale", "demo_scale")
        .arg(ArgInfo::new("x", TypeInfo::scalar(TypeTag::Double)))
        .arg(ArgInfo::new("by", TypeInfo::scalar(TypeTag::Float)))
        .returns(TypeInfo::scalar(TypeTag::Double), Transfer::Nothing)
        .build();
    let scale = bridge.build_callable(&scale, None).unwrap();
    let results = bridge
        .invoke(&ctx, &scale, vec![Value::Number(1.5), Value::Integer(4)])
        .unwrap();
    assert_eq!(results, vec![Value::Number(6.0)]);
}

#[test]
fn test_out_of_range_names_the_argument() {
    let bridge = common::bridge(&[("demo_negate8", demo_negate8 as *const c_void)]);
    let (_host, ctx) = common::context();
    let negate = CallableInfo::function("Demo", "negate8", "demo_negate8")
        .arg(ArgInfo::new("x", TypeInfo::scalar(TypeTag::Int8)))
        .returns(TypeInfo::scalar(TypeTag::Int8), Transfer::Nothing)
        .build();
    let negate = bridge.build_callable(&negate, None).unwrap();
    let err = bridge.invoke(&ctx, &negate, vec![Value::Integer(300)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Marshal);
    assert_eq!(
        err.to_string(),
        "bad argument #1 to `Demo.negate8' (300 is out of <-128, 127>)"
    );
}

#[test]
fn test_strings_in_and_out() {
    let bridge = common::bridge(&[
        ("demo_strlen", demo_strlen as *const c_void),
        ("demo_greeting", demo_greeting as *const c_void),
    ]);
    let (_host, ctx) = common::context();
    let utf8 = TypeInfo::scalar(TypeTag::Utf8);

    let strlen = CallableInfo::function("Demo", "strlen", "demo_strlen")
        .arg(ArgInfo::new("s", utf8.clone()).optional())
        .returns(TypeInfo::scalar(TypeTag::UInt32), Transfer::Nothing)
        .build();
    let strlen = bridge.build_callable(&strlen, None).unwrap();
    let source = Value::from("sald");
    let results = bridge.invoke(&ctx, &strlen, vec![source.clone()]).unwrap();
    assert_eq!(results, vec![Value::Integer(4)]);
    assert_eq!(source, Value::from("sald"));
    let results = bridge.invoke(&ctx, &strlen, vec![Value::Nil]).unwrap();
    assert_eq!(results, vec![Value::Integer(0)]);

    let greeting = CallableInfo::function("Demo", "greeting", "demo_greeting")
        .arg(ArgInfo::new("name", utf8.clone()))
        .returns(utf8, Transfer::Everything)
        .build();
    let greeting = bridge.build_callable(&greeting, None).unwrap();
    let results = bridge.invoke(&ctx, &greeting, vec![Value::from("world")]).unwrap();
    assert_eq!(results, vec![Value::from("hello, world")]);

    let err = bridge.invoke(&ctx, &greeting, vec![Value::Nil]).unwrap_err();
    assert!(matches!(err, BridgeError::Argument { index: 1, .. }));
}

#[test]
fn test_out_parameters_follow_return_value() {
    let bridge = common::bridge(&[("demo_divmod", demo_divmod as *const c_void)]);
    let (_host, ctx) = common::context();
    let divmod = CallableInfo::function("Demo", "divmod", "demo_divmod")
        .arg(ArgInfo::new("a", int32()))
        .arg(ArgInfo::new("b", int32()))
        .arg(ArgInfo::new("rem", int32()).direction(Direction::Out))
        .returns(int32(), Transfer::Nothing)
        .build();
    let divmod = bridge.build_callable(&divmod, None).unwrap();
    let results = bridge
        .invoke(&ctx, &divmod, vec![Value::Integer(17), Value::Integer(5)])
        .unwrap();
    assert_eq!(results, vec![Value::Integer(3), Value::Integer(2)]);
}

#[test]
fn test_native_errors_are_uniform() {
    let bridge = common::bridge(&[
        ("demo_checked", demo_checked as *const c_void),
        ("demo_validate", demo_validate as *const c_void),
    ]);
    let (_host, ctx) = common::context();

    let validate = CallableInfo::function("Demo", "validate", "demo_validate")
        .arg(ArgInfo::new("value", int32()))
        .throws()
        .build();
    let validate = bridge.build_callable(&validate, None).unwrap();
    let results = bridge.invoke(&ctx, &validate, vec![Value::Integer(1)]).unwrap();
    assert_eq!(results, vec![Value::Boolean(true)]);
    let results = bridge.invoke(&ctx, &validate, vec![Value::Integer(-1)]).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], Value::Boolean(false));
    match &results[1] {
        Value::Error(e) => {
            assert_eq!(e.code, 8);
            assert_eq!(e.message, "invalid");
            assert_eq!(e.domain_name().as_deref(), Some("demo-error-quark"));
        }
        other => panic!("expected an error value, got {}", other),
    }

    let checked = CallableInfo::function("Demo", "checked", "demo_checked")
        .arg(ArgInfo::new("value", int32()))
        .returns(TypeInfo::scalar(TypeTag::Boolean), Transfer::Nothing)
        .throws()
        .build();
    let checked = bridge.build_callable(&checked, None).unwrap();
    let results = bridge.invoke(&ctx, &checked, vec![Value::Integer(3)]).unwrap();
    assert_eq!(results, vec![Value::Boolean(true)]);
    let results = bridge.invoke(&ctx, &checked, vec![Value::Integer(-3)]).unwrap();
    assert_eq!(results[0], Value::Boolean(false));
    assert!(matches!(&results[1], Value::Error(e) if e.message == "negative value"));
}

#[test]
fn test_boolean_return_reports_out_validity() {
    let bridge = common::bridge(&[("demo_lookup", demo_lookup as *const c_void)]);
    let (_host, ctx) = common::context();
    let lookup = CallableInfo::function("Demo", "lookup", "demo_lookup")
        .arg(ArgInfo::new("key", int32()))
        .arg(ArgInfo::new("out", int32()).direction(Direction::Out))
        .returns(TypeInfo::scalar(TypeTag::Boolean), Transfer::Nothing)
        .build();
    let lookup = bridge.build_callable(&lookup, None).unwrap();
    assert!(lookup.suppresses_return());
    let results = bridge.invoke(&ctx, &lookup, vec![Value::Integer(4)]).unwrap();
    assert_eq!(results, vec![Value::Integer(40)]);
    let results = bridge.invoke(&ctx, &lookup, vec![Value::Integer(0)]).unwrap();
    assert_eq!(results, vec![Value::Nil]);
}

#[test]
fn test_declared_enum_argument() {
    let bridge = common::bridge(&[]);
    let (_host, ctx) = common::context();
    let mode = EnumType::new("Demo.Mode", TypeTag::Int32, &[("fast", 1), ("slow", 2)]);
    let mut decl = CallableDecl::new("demo_mode_weight")
        .arg(ParamDecl::new(ParamShape::Enum { ty: mode, storage: None }))
        .returns(ParamDecl::typed(int32()));
    decl.address = Some(demo_mode_weight as usize);
    let weight = bridge.declare_callable(&decl).unwrap();
    assert_eq!(
        bridge.invoke(&ctx, &weight, vec![Value::from("slow")]).unwrap(),
        vec![Value::Integer(200)]
    );
    assert_eq!(
        bridge.invoke(&ctx, &weight, vec![Value::Integer(1)]).unwrap(),
        vec![Value::Integer(100)]
    );
    assert!(bridge.invoke(&ctx, &weight, vec![Value::from("medium")]).is_err());
}

#[test]
fn test_json_declared_callable() {
    let bridge = common::bridge(&[]);
    let (_host, ctx) = common::context();
    let json = format!(
        r#"{{
            "name": "demo_lookup",
            "addr": {},
            "ret": {{ "type": "boolean", "phantom": true }},
            "args": [ {{ "type": "int32" }}, {{ "type": "int32", "dir": "out" }} ]
        }}"#,
        demo_lookup as usize
    );
    let lookup = bridge.parse_callable(&json).unwrap();
    assert_eq!(lookup.exposed_inputs(), 1);
    assert!(lookup.to_string().starts_with("sald_bridge.efn"));
    assert_eq!(
        bridge.invoke(&ctx, &lookup, vec![Value::Integer(2)]).unwrap(),
        vec![Value::Integer(20)]
    );
    assert_eq!(
        bridge.invoke(&ctx, &lookup, vec![Value::Integer(-2)]).unwrap(),
        vec![Value::Nil]
    );

    let again = bridge.parse_callable(&json).unwrap();
    assert!(std::rc::Rc::ptr_eq(&lookup, &again));
}

#[test]
fn test_missing_symbol_is_a_build_error() {
    let bridge = common::bridge(&[]);
    let info = CallableInfo::function("Demo", "absent", "demo_absent").build();
    let err = bridge.build_callable(&info, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Build);
    assert_eq!(bridge.cached_callables(), 0);
}
