mod common;

use sald_bridge::native::hash::{HashTable, KeyMode};
use sald_bridge::native::list::List;
use sald_bridge::{
    ArgInfo, ArrayKind, Bridge, BridgeResult, ByteBuffer, CallableInfo, ObjectMarshaller,
    ObjectType, SymbolTable, Transfer, TypeInfo, TypeTag, Value,
};
use std::cell::Cell;
use std::ffi::{c_char, c_void, CStr};
use std::rc::Rc;

static DIGITS: [i32; 3] = [5, 6, 0];

extern "C" fn demo_sum(values: *const i32, n: u32) -> i32 {
    (0..n as usize).map(|i| unsafe { *values.add(i) }).sum()
}

extern "C" fn demo_sum3(values: *const i32) -> i32 {
    (0..3).map(|i| unsafe { *values.add(i) }).sum()
}

extern "C" fn demo_digits() -> *const i32 {
    DIGITS.as_ptr()
}

extern "C" fn demo_address(data: *const u8, _len: u64) -> u64 {
    data as usize as u64
}

extern "C" fn demo_consume(data: *mut u8, len: u64) -> u32 {
    let sum = (0..len as usize).map(|i| unsafe { *data.add(i) } as u32).sum();
    // Full transfer: the buffer belongs to us now.
    unsafe { sald_bridge::native::free(data as *mut c_void) };
    sum
}

extern "C" fn demo_take_string(s: *mut c_char) -> u32 {
    let len = unsafe { CStr::from_ptr(s) }.to_bytes().len() as u32;
    unsafe { sald_bridge::native::free(s as *mut c_void) };
    len
}

extern "C" fn demo_list_count(list: *mut List) -> u32 {
    unsafe { List::items(list) }.len() as u32
}

extern "C" fn demo_list_nth(list: *mut List, n: u32) -> *const c_char {
    unsafe { List::items(list) }
        .get(n as usize)
        .map_or(std::ptr::null(), |p| *p as *const c_char)
}

extern "C" fn demo_hash_get(table: *mut HashTable, key: *const c_char) -> i32 {
    match unsafe { (*table).lookup(key as *mut c_void) } {
        Some(value) => value as isize as i32,
        None => -1,
    }
}

extern "C" fn demo_count_a(data: *const u8, len: u64, text: *const c_char) -> u64 {
    let data = unsafe { std::slice::from_raw_parts(data, len as usize) };
    let text = unsafe { CStr::from_ptr(text) }.to_bytes();
    data.iter().chain(text).filter(|b| **b == b'a').count() as u64
}

extern "C" fn demo_first_byte(data: *const u8) -> u32 {
    unsafe { *data as u32 }
}

extern "C" fn demo_make_widgets() -> *mut HashTable {
    let table = HashTable::new(KeyMode::Content);
    for (name, address) in [("left", 0x10usize), ("right", 0x20)] {
        let key = sald_bridge::native::strdup(name.as_bytes());
        unsafe { (*table).insert(key as *mut c_void, address as *mut c_void) };
    }
    table
}

/// Object wrappers that count the references they take over.
struct CountingObjects(Rc<Cell<usize>>);

impl ObjectMarshaller for CountingObjects {
    fn to_native(
        &self,
        value: &Value,
        _ty: Option<&ObjectType>,
        _optional: bool,
        _transfer: bool,
    ) -> BridgeResult<*mut c_void> {
        match value {
            Value::Pointer(p) => Ok(*p),
            _ => Ok(std::ptr::null_mut()),
        }
    }

    fn to_dynamic(&self, ptr: *mut c_void, owned: bool) -> BridgeResult<Value> {
        if owned {
            self.0.set(self.0.get() + 1);
        }
        Ok(Value::Pointer(ptr))
    }
}

fn int32() -> Rc<TypeInfo> {
    TypeInfo::scalar(TypeTag::Int32)
}

fn utf8() -> Rc<TypeInfo> {
    TypeInfo::scalar(TypeTag::Utf8)
}

#[test]
fn test_counted_and_fixed_arrays() {
    let bridge = common::bridge(&[
        ("demo_sum", demo_sum as *const c_void),
        ("demo_sum3", demo_sum3 as *const c_void),
    ]);
    let (_host, ctx) = common::context();

    let counted = TypeInfo::array(ArrayKind::C, int32()).length_arg(1).build();
    let sum = CallableInfo::function("Demo", "sum", "demo_sum")
        .arg(ArgInfo::new("values", counted))
        .arg(ArgInfo::new("n", TypeInfo::scalar(TypeTag::UInt32)))
        .returns(int32(), Transfer::Nothing)
        .build();
    let sum = bridge.build_callable(&sum, None).unwrap();
    assert_eq!(sum.exposed_inputs(), 1);
    let values = Value::array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    assert_eq!(bridge.invoke(&ctx, &sum, vec![values]).unwrap(), vec![Value::Integer(6)]);
    assert_eq!(
        bridge.invoke(&ctx, &sum, vec![Value::array(Vec::new())]).unwrap(),
        vec![Value::Integer(0)]
    );

    let fixed = TypeInfo::array(ArrayKind::C, int32()).fixed_size(3).build();
    let sum3 = CallableInfo::function("Demo", "sum3", "demo_sum3")
        .arg(ArgInfo::new("values", fixed))
        .returns(int32(), Transfer::Nothing)
        .build();
    let sum3 = bridge.build_callable(&sum3, None).unwrap();
    let short = Value::array(vec![Value::Integer(4), Value::Integer(5)]);
    assert_eq!(bridge.invoke(&ctx, &sum3, vec![short]).unwrap(), vec![Value::Integer(9)]);
    let long = Value::array((1..=5).map(Value::Integer).collect());
    assert_eq!(bridge.invoke(&ctx, &sum3, vec![long]).unwrap(), vec![Value::Integer(6)]);
}

#[test]
fn test_zero_terminated_return() {
    let bridge = common::bridge(&[("demo_digits", demo_digits as *const c_void)]);
    let (_host, ctx) = common::context();
    let digits = TypeInfo::array(ArrayKind::C, int32()).zero_terminated().build();
    let info = CallableInfo::function("Demo", "digits", "demo_digits")
        .returns(digits, Transfer::Nothing)
        .build();
    let callable = bridge.build_callable(&info, None).unwrap();
    let results = bridge.invoke(&ctx, &callable, Vec::new()).unwrap();
    assert_eq!(
        results,
        vec![Value::array(vec![Value::Integer(5), Value::Integer(6)])]
    );
}

#[test]
fn test_byte_arrays_borrow_or_copy() {
    let bridge = common::bridge(&[
        ("demo_address", demo_address as *const c_void),
        ("demo_consume", demo_consume as *const c_void),
    ]);
    let (_host, ctx) = common::context();
    let bytes = TypeInfo::array(ArrayKind::C, TypeInfo::scalar(TypeTag::UInt8))
        .length_arg(1)
        .build();
    let length = TypeInfo::scalar(TypeTag::UInt64);

    let address = CallableInfo::function("Demo", "address", "demo_address")
        .arg(ArgInfo::new("data", bytes.clone()))
        .arg(ArgInfo::new("len", length.clone()))
        .returns(TypeInfo::scalar(TypeTag::UInt64), Transfer::Nothing)
        .build();
    let address = bridge.build_callable(&address, None).unwrap();

    let text: Rc<str> = Rc::from("borrowed");
    let results = bridge
        .invoke(&ctx, &address, vec![Value::String(text.clone())])
        .unwrap();
    assert_eq!(results, vec![Value::Integer(text.as_ptr() as usize as i64)]);

    let buffer = ByteBuffer::from_bytes(&[1, 2, 3]);
    let results = bridge
        .invoke(&ctx, &address, vec![Value::Buffer(buffer.clone())])
        .unwrap();
    assert_eq!(results, vec![Value::Integer(buffer.as_mut_ptr() as usize as i64)]);

    let consume = CallableInfo::function("Demo", "consume", "demo_consume")
        .arg(ArgInfo::new("data", bytes).transfer(Transfer::Everything))
        .arg(ArgInfo::new("len", length))
        .returns(TypeInfo::scalar(TypeTag::UInt32), Transfer::Nothing)
        .build();
    let consume = bridge.build_callable(&consume, None).unwrap();
    let results = bridge
        .invoke(&ctx, &consume, vec![Value::Buffer(buffer.clone())])
        .unwrap();
    assert_eq!(results, vec![Value::Integer(6)]);
    buffer.set(0, 10).unwrap();
    assert_eq!(buffer.to_vec(), vec![10, 2, 3]);
}

#[test]
fn test_full_transfer_string_is_a_copy() {
    let bridge = common::bridge(&[("demo_take_string", demo_take_string as *const c_void)]);
    let (_host, ctx) = common::context();
    let info = CallableInfo::function("Demo", "take_string", "demo_take_string")
        .arg(ArgInfo::new("s", utf8()).transfer(Transfer::Everything))
        .returns(TypeInfo::scalar(TypeTag::UInt32), Transfer::Nothing)
        .build();
    let take = bridge.build_callable(&info, None).unwrap();
    let original = Value::from("owned by callee");
    let results = bridge.invoke(&ctx, &take, vec![original.clone()]).unwrap();
    assert_eq!(results, vec![Value::Integer(15)]);
    assert_eq!(original.as_str(), Some("owned by callee"));
}

#[test]
fn test_list_argument_keeps_order() {
    let bridge = common::bridge(&[
        ("demo_list_count", demo_list_count as *const c_void),
        ("demo_list_nth", demo_list_nth as *const c_void),
    ]);
    let (_host, ctx) = common::context();
    let list = TypeInfo::list(utf8());
    let count = CallableInfo::function("Demo", "list_count", "demo_list_count")
        .arg(ArgInfo::new("list", list.clone()))
        .returns(TypeInfo::scalar(TypeTag::UInt32), Transfer::Nothing)
        .build();
    let count = bridge.build_callable(&count, None).unwrap();
    let nth = CallableInfo::function("Demo", "list_nth", "demo_list_nth")
        .arg(ArgInfo::new("list", list))
        .arg(ArgInfo::new("n", TypeInfo::scalar(TypeTag::UInt32)))
        .returns(utf8(), Transfer::Nothing)
        .build();
    let nth = bridge.build_callable(&nth, None).unwrap();

    let letters = Value::array(vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    assert_eq!(
        bridge.invoke(&ctx, &count, vec![letters.clone()]).unwrap(),
        vec![Value::Integer(3)]
    );
    for (i, expected) in ["a", "b", "c"].iter().enumerate() {
        let results = bridge
            .invoke(&ctx, &nth, vec![letters.clone(), Value::Integer(i as i64)])
            .unwrap();
        assert_eq!(results, vec![Value::from(*expected)]);
    }
}

#[test]
fn test_hash_argument_lookup() {
    let bridge = common::bridge(&[("demo_hash_get", demo_hash_get as *const c_void)]);
    let (_host, ctx) = common::context();
    let info = CallableInfo::function("Demo", "hash_get", "demo_hash_get")
        .arg(ArgInfo::new("table", TypeInfo::hash(utf8(), int32())))
        .arg(ArgInfo::new("key", utf8()))
        .returns(int32(), Transfer::Nothing)
        .build();
    let get = bridge.build_callable(&info, None).unwrap();
    let table = Value::dictionary(vec![
        (Value::from("one"), Value::Integer(1)),
        (Value::from("two"), Value::Integer(2)),
    ]);
    assert_eq!(
        bridge.invoke(&ctx, &get, vec![table.clone(), Value::from("two")]).unwrap(),
        vec![Value::Integer(2)]
    );
    assert_eq!(
        bridge.invoke(&ctx, &get, vec![table, Value::from("three")]).unwrap(),
        vec![Value::Integer(-1)]
    );
}

#[test]
fn test_float_keys_are_unsupported() {
    let bridge = common::bridge(&[]);
    let ty = TypeInfo::hash(TypeInfo::scalar(TypeTag::Double), int32());
    let table = Value::dictionary(vec![(Value::Number(0.5), Value::Integer(1))]);
    let err = bridge.container_to_native(&ty, &table, Transfer::Nothing).unwrap_err();
    assert_eq!(err.to_string(), "hashtable with float or double keys is not supported");
}

#[test]
fn test_container_conversion_preserves_list_order() {
    let bridge = common::bridge(&[]);
    let ty = TypeInfo::slist(int32());
    let value = Value::array(vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)]);
    let native = bridge.container_to_native(&ty, &value, Transfer::Nothing).unwrap();
    assert_eq!(native.len(), None);
    let back = unsafe {
        bridge.container_to_dynamic(&ty, native.as_ptr(), Transfer::Nothing, None)
    }
    .unwrap();
    assert_eq!(back, value);
}

#[test]
fn test_borrowed_bytes_outlive_their_argument_values() {
    let bridge = common::bridge(&[
        ("demo_count_a", demo_count_a as *const c_void),
        ("demo_first_byte", demo_first_byte as *const c_void),
    ]);
    let (_host, ctx) = common::context();
    let bytes = TypeInfo::array(ArrayKind::C, TypeInfo::scalar(TypeTag::UInt8))
        .length_arg(1)
        .build();
    let count = CallableInfo::function("Demo", "count_a", "demo_count_a")
        .arg(ArgInfo::new("data", bytes))
        .arg(ArgInfo::new("len", TypeInfo::scalar(TypeTag::UInt64)))
        .arg(ArgInfo::new("text", utf8()))
        .returns(TypeInfo::scalar(TypeTag::UInt64), Transfer::Nothing)
        .build();
    let count = bridge.build_callable(&count, None).unwrap();

    // No clones are held here, so only the call itself keeps the storage alive.
    let results = bridge
        .invoke(
            &ctx,
            &count,
            vec![
                Value::from("a".repeat(64).as_str()),
                Value::from("b".repeat(79).as_str()),
            ],
        )
        .unwrap();
    assert_eq!(results, vec![Value::Integer(64)]);

    let first = CallableInfo::function("Demo", "first_byte", "demo_first_byte")
        .arg(ArgInfo::new("data", TypeInfo::pointer()))
        .returns(TypeInfo::scalar(TypeTag::UInt32), Transfer::Nothing)
        .build();
    let first = bridge.build_callable(&first, None).unwrap();
    let results = bridge
        .invoke(&ctx, &first, vec![Value::Buffer(ByteBuffer::from_bytes(&[42; 128]))])
        .unwrap();
    assert_eq!(results, vec![Value::Integer(42)]);
}

#[test]
fn test_full_transfer_hash_releases_its_elements() {
    let mut symbols = SymbolTable::new();
    symbols.insert("demo_make_widgets", demo_make_widgets as *const c_void);
    let released = Rc::new(Cell::new(0));
    let bridge = Bridge::builder()
        .symbols(symbols)
        .objects(CountingObjects(released.clone()))
        .build();
    let (_host, ctx) = common::context();

    let widget = TypeInfo::object(Rc::new(ObjectType {
        name: "Demo.Widget".to_string(),
        type_id: 1,
    }));
    let info = CallableInfo::function("Demo", "make_widgets", "demo_make_widgets")
        .returns(TypeInfo::hash(utf8(), widget), Transfer::Everything)
        .build();
    let make = bridge.build_callable(&info, None).unwrap();

    let results = bridge.invoke(&ctx, &make, Vec::new()).unwrap();
    let table = &results[0];
    assert_eq!(table.get(&Value::from("left")), Some(Value::Pointer(0x10 as *mut c_void)));
    assert_eq!(table.get(&Value::from("right")), Some(Value::Pointer(0x20 as *mut c_void)));
    assert_eq!(released.get(), 2);
}

#[test]
fn test_int64_keyed_hash_argument() {
    extern "C" fn demo_hash_get64(table: *mut HashTable, key: i64) -> i32 {
        match unsafe { (*table).lookup(&key as *const i64 as *mut c_void) } {
            Some(value) => value as isize as i32,
            None => -1,
        }
    }

    let bridge = common::bridge(&[("demo_hash_get64", demo_hash_get64 as *const c_void)]);
    let (_host, ctx) = common::context();
    let int64 = TypeInfo::scalar(TypeTag::Int64);
    let info = CallableInfo::function("Demo", "hash_get64", "demo_hash_get64")
        .arg(ArgInfo::new("table", TypeInfo::hash(int64.clone(), int32())))
        .arg(ArgInfo::new("key", int64))
        .returns(int32(), Transfer::Nothing)
        .build();
    let get = bridge.build_callable(&info, None).unwrap();
    let table = Value::dictionary(vec![
        (Value::Integer(1 << 40), Value::Integer(7)),
        (Value::Integer(-3), Value::Integer(8)),
    ]);
    for (key, expected) in [(1i64 << 40, 7), (-3, 8), (5, -1)] {
        let results = bridge
            .invoke(&ctx, &get, vec![table.clone(), Value::Integer(key)])
            .unwrap();
        assert_eq!(results, vec![Value::Integer(expected)]);
    }
}
