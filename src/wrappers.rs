// Wrapper Collaborators
// Collaborators owning the dynamic wrappers of native records and objects.

use crate::error::{BridgeError, BridgeResult};
use crate::native;
use crate::types::{ObjectType, RecordType};
use crate::value::Value;
use std::ffi::c_void;
use std::ptr;
use std::rc::Rc;

pub trait RecordMarshaller {
    /// Stores `value` at `target`: copies `ty.size` bytes when `by_value`,
    /// otherwise writes a pointer to the record.
    fn to_native(
        &self,
        value: &Value,
        ty: &RecordType,
        target: *mut c_void,
        by_value: bool,
        transfer: bool,
        optional: bool,
    ) -> BridgeResult<()>;

    /// Wraps the record at `ptr`; `parent` keeps inline memory alive.
    fn to_dynamic(
        &self,
        ty: &RecordType,
        ptr: *mut c_void,
        owned: bool,
        parent: Option<&Value>,
    ) -> BridgeResult<Value>;

    /// Allocates a zeroed record for a caller-allocates parameter.
    fn allocate(&self, ty: &RecordType) -> BridgeResult<(Value, *mut c_void)>;

    /// Resolves a record type by name for declarative signatures.
    fn lookup(&self, _name: &str) -> Option<Rc<RecordType>> {
        None
    }
}

pub trait ObjectMarshaller {
    fn to_native(
        &self,
        value: &Value,
        ty: Option<&ObjectType>,
        optional: bool,
        transfer: bool,
    ) -> BridgeResult<*mut c_void>;

    fn to_dynamic(&self, ptr: *mut c_void, owned: bool) -> BridgeResult<Value>;
}

/// Wrappers that expose records and objects as bare pointers.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueWrappers;

impl RecordMarshaller for OpaqueWrappers {
    fn to_native(
        &self,
        value: &Value,
        ty: &RecordType,
        target: *mut c_void,
        by_value: bool,
        _transfer: bool,
        optional: bool,
    ) -> BridgeResult<()> {
        let source = match value {
            Value::Pointer(p) => *p,
            Value::Nil if optional => ptr::null_mut(),
            other => return Err(BridgeError::mismatch(&ty.name, other.type_name())),
        };
        // SAFETY: `target` holds a record (by value) or a pointer slot.
        unsafe {
            if by_value {
                if !source.is_null() {
                    ptr::copy_nonoverlapping(source as *const u8, target as *mut u8, ty.size);
                }
            } else {
                *(target as *mut *mut c_void) = source;
            }
        }
        Ok(())
    }

    fn to_dynamic(
        &self,
        _ty: &RecordType,
        ptr: *mut c_void,
        _owned: bool,
        _parent: Option<&Value>,
    ) -> BridgeResult<Value> {
        Ok(if ptr.is_null() {
            Value::Nil
        } else {
            Value::Pointer(ptr)
        })
    }

    fn allocate(&self, ty: &RecordType) -> BridgeResult<(Value, *mut c_void)> {
        let ptr = native::alloc_zeroed(ty.size);
        Ok((Value::Pointer(ptr), ptr))
    }
}

impl ObjectMarshaller for OpaqueWrappers {
    fn to_native(
        &self,
        value: &Value,
        ty: Option<&ObjectType>,
        optional: bool,
        _transfer: bool,
    ) -> BridgeResult<*mut c_void> {
        match value {
            Value::Pointer(p) => Ok(*p),
            Value::Nil if optional => Ok(ptr::null_mut()),
            other => Err(BridgeError::mismatch(
                ty.map(|t| t.name.as_str()).unwrap_or("object"),
                other.type_name(),
            )),
        }
    }

    fn to_dynamic(&self, ptr: *mut c_void, _owned: bool) -> BridgeResult<Value> {
        Ok(if ptr.is_null() {
            Value::Nil
        } else {
            Value::Pointer(ptr)
        })
    }
}
