// Scalar Marshaling
// Integers, floats, booleans, enums and flags

use super::Parent;
use crate::error::{BridgeError, BridgeResult};
use crate::native::{self, Argument};
use crate::types::{EnumType, TypeTag};
use crate::value::Value;
use libffi::raw::ffi_sarg;
use std::ffi::{c_int, c_void};
use std::mem;

pub(crate) fn integer_range(tag: TypeTag) -> (i128, i128) {
    match tag {
        TypeTag::Int8 => (i8::MIN as i128, i8::MAX as i128),
        TypeTag::UInt8 => (0, u8::MAX as i128),
        TypeTag::Int16 => (i16::MIN as i128, i16::MAX as i128),
        TypeTag::UInt16 => (0, u16::MAX as i128),
        TypeTag::Int32 => (i32::MIN as i128, i32::MAX as i128),
        TypeTag::UInt32 | TypeTag::Unichar => (0, u32::MAX as i128),
        TypeTag::Int64 => (i64::MIN as i128, i64::MAX as i128),
        _ => (0, u64::MAX as i128),
    }
}

fn check_integer(value: &Value, tag: TypeTag) -> BridgeResult<i128> {
    let n = value
        .as_integer()
        .ok_or_else(|| BridgeError::mismatch("integer", value.type_name()))?;
    let (min, max) = integer_range(tag);
    if n < min || n > max {
        return Err(BridgeError::OutOfRange {
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(n)
}

/// Stores `n` at `slot` with the width of `tag`, no range check.
pub(crate) unsafe fn write_integer(slot: *mut Argument, tag: TypeTag, n: i64) {
    match tag {
        TypeTag::Int8 => (*slot).v_int8 = n as i8,
        TypeTag::UInt8 => (*slot).v_uint8 = n as u8,
        TypeTag::Int16 => (*slot).v_int16 = n as i16,
        TypeTag::UInt16 => (*slot).v_uint16 = n as u16,
        TypeTag::Int32 => (*slot).v_int32 = n as i32,
        TypeTag::UInt32 | TypeTag::Unichar => (*slot).v_uint32 = n as u32,
        TypeTag::Int64 => (*slot).v_int64 = n,
        TypeTag::UInt64 => (*slot).v_uint64 = n as u64,
        TypeTag::Boolean => (*slot).v_boolean = (n != 0) as c_int,
        _ => {}
    }
}

/// Reads an integer of width `tag` from `slot`; `None` for non-integer tags.
pub(crate) unsafe fn read_integer(
    slot: *mut Argument,
    tag: TypeTag,
    parent: Parent,
) -> Option<i64> {
    if parent == Parent::ForcePointer {
        return Some((*slot).v_pointer as isize as i64);
    }
    if parent == Parent::ReturnValue && native::needs_register_fixup(tag) {
        native::narrow_return(slot, tag);
    }
    let n = match tag {
        TypeTag::Int8 => (*slot).v_int8 as i64,
        TypeTag::UInt8 => (*slot).v_uint8 as i64,
        TypeTag::Int16 => (*slot).v_int16 as i64,
        TypeTag::UInt16 => (*slot).v_uint16 as i64,
        TypeTag::Int32 => (*slot).v_int32 as i64,
        TypeTag::UInt32 | TypeTag::Unichar => (*slot).v_uint32 as i64,
        TypeTag::Int64 => (*slot).v_int64,
        TypeTag::UInt64 => (*slot).v_uint64 as i64,
        TypeTag::Boolean => (*slot).v_boolean as i64,
        _ => return None,
    };
    Some(n)
}

pub(crate) unsafe fn int_to_native(
    value: &Value,
    tag: TypeTag,
    target: *mut Argument,
    parent: Parent,
) -> BridgeResult<()> {
    let n = check_integer(value, tag)?;
    if parent == Parent::ForcePointer {
        if native::scalar_size(tag) > mem::size_of::<*mut c_void>() {
            return Err(BridgeError::BadTypeInfo(format!(
                "{:?} cannot be stored in a pointer",
                tag
            )));
        }
        (*target).v_pointer = n as isize as *mut c_void;
        return Ok(());
    }
    write_integer(target, tag, n as i64);
    if parent == Parent::ReturnValue && native::needs_register_fixup(tag) {
        native::widen_return(target, tag);
    }
    Ok(())
}

pub(crate) unsafe fn int_to_dynamic(
    source: *mut Argument,
    tag: TypeTag,
    parent: Parent,
) -> BridgeResult<Value> {
    if tag == TypeTag::UInt64 && parent != Parent::ForcePointer {
        let n = (*source).v_uint64;
        return Ok(if n > i64::MAX as u64 {
            Value::Number(n as f64)
        } else {
            Value::Integer(n as i64)
        });
    }
    read_integer(source, tag, parent)
        .map(Value::Integer)
        .ok_or_else(|| BridgeError::BadTypeInfo(format!("{:?} is not an integer type", tag)))
}

pub(crate) unsafe fn boolean_to_native(value: &Value, target: *mut Argument, parent: Parent) {
    let b = value.is_truthy() as c_int;
    match parent {
        Parent::ForcePointer => (*target).v_pointer = b as usize as *mut c_void,
        Parent::ReturnValue => (*target).ffi_sarg = b as ffi_sarg,
        _ => (*target).v_boolean = b,
    }
}

pub(crate) unsafe fn boolean_to_dynamic(source: *mut Argument, parent: Parent) -> Value {
    Value::Boolean(match parent {
        Parent::ForcePointer => !(*source).v_pointer.is_null(),
        Parent::ReturnValue => (*source).ffi_sarg != 0,
        _ => (*source).v_boolean != 0,
    })
}

pub(crate) unsafe fn float_to_native(
    value: &Value,
    tag: TypeTag,
    optional: bool,
    target: *mut Argument,
    parent: Parent,
) -> BridgeResult<()> {
    if parent == Parent::ForcePointer {
        return Err(BridgeError::BadTypeInfo(format!(
            "{:?} cannot be stored in a pointer",
            tag
        )));
    }
    let n = match value {
        Value::Nil if optional => 0.0,
        other => other
            .as_number()
            .ok_or_else(|| BridgeError::mismatch("number", other.type_name()))?,
    };
    if tag == TypeTag::Float {
        (*target).v_float = n as f32;
    } else {
        (*target).v_double = n;
    }
    Ok(())
}

pub(crate) unsafe fn float_to_dynamic(
    source: *mut Argument,
    tag: TypeTag,
    parent: Parent,
) -> BridgeResult<Value> {
    if parent == Parent::ForcePointer {
        return Err(BridgeError::BadTypeInfo(format!(
            "{:?} cannot be read from a pointer",
            tag
        )));
    }
    Ok(Value::Number(if tag == TypeTag::Float {
        (*source).v_float as f64
    } else {
        (*source).v_double
    }))
}

fn symbol_value(name: &str, ty: &EnumType) -> BridgeResult<i64> {
    ty.value_of(name.trim()).ok_or_else(|| {
        BridgeError::mismatch(format!("member of {}", ty.name), format!("`{}'", name))
    })
}

/// Resolves symbolic enum/flags values to their number.
pub(crate) fn enum_numeric(value: &Value, ty: &EnumType) -> BridgeResult<Value> {
    match value {
        Value::Integer(_) | Value::Number(_) => Ok(value.clone()),
        Value::String(s) if ty.is_flags => {
            let mut bits = 0;
            for part in s.split('|').filter(|p| !p.trim().is_empty()) {
                bits |= symbol_value(part, ty)?;
            }
            Ok(Value::Integer(bits))
        }
        Value::String(s) => symbol_value(s, ty).map(Value::Integer),
        Value::Array(items) if ty.is_flags => {
            let mut bits = 0;
            for item in items.borrow().iter() {
                let member = enum_numeric(item, ty)?;
                let n = member
                    .as_integer()
                    .ok_or_else(|| BridgeError::mismatch("integer", member.type_name()))?;
                bits |= i64::try_from(n).map_err(|_| BridgeError::OutOfRange {
                    value: n.to_string(),
                    min: i64::MIN.to_string(),
                    max: i64::MAX.to_string(),
                })?;
            }
            Ok(Value::Integer(bits))
        }
        other => Err(BridgeError::mismatch(&ty.name, other.type_name())),
    }
}

/// Renders a number as its member name, or a flags value as its member names.
pub(crate) fn enum_from_numeric(value: Value, ty: &EnumType) -> Value {
    let n = match value.as_integer() {
        Some(n) => n as i64,
        None => return value,
    };
    if !ty.is_flags {
        return match ty.name_of(n) {
            Some(name) => Value::string(name),
            None => Value::Integer(n),
        };
    }
    if n == 0 {
        return Value::Integer(0);
    }
    let mut covered = 0;
    let mut names = Vec::new();
    for (name, bits) in &ty.members {
        if *bits != 0 && n & bits == *bits {
            covered |= bits;
            names.push(Value::string(name));
        }
    }
    if covered == n {
        Value::array(names)
    } else {
        Value::Integer(n)
    }
}
