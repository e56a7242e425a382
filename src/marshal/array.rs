// Array Marshaling
// C arrays, growable arrays and byte arrays

use super::{Marshaller, Parent, Site, Temporary};
use crate::error::{BridgeError, BridgeResult};
use crate::native::array::{ByteArray, NativeArray, PtrArray};
use crate::native::{self, Argument};
use crate::types::{ArrayKind, ArrayType, Transfer, TypeInfo, TypeKind, TypeTag};
use crate::value::Value;
use std::ffi::{c_void, CStr};
use std::mem;
use std::ptr;
use std::rc::Rc;
use std::slice;

/// Storage taken by one element inside an array of `element`.
pub(crate) fn element_size(element: &TypeInfo, force_pointer: bool) -> usize {
    if element.pointer || force_pointer {
        return mem::size_of::<*mut c_void>();
    }
    match &element.kind {
        TypeKind::Scalar(tag) => native::scalar_size(*tag).max(1),
        TypeKind::Enum(e) => native::scalar_size(e.storage),
        TypeKind::Record(record) => record.size,
        _ => mem::size_of::<*mut c_void>(),
    }
}

unsafe fn is_zero(element: *const u8, size: usize) -> bool {
    slice::from_raw_parts(element, size).iter().all(|b| *b == 0)
}

impl Marshaller<'_> {
    unsafe fn set_array_length(&self, array: &ArrayType, site: &Site<'_>, length: usize) {
        if let (Some(index), Some(frame)) = (array.length_arg, site.frame) {
            frame.set_length(index, length);
        }
    }

    /// Strings, byte sequences and buffers stand in for byte-sized C arrays.
    unsafe fn byte_array_fast_path(
        &mut self,
        value: &Value,
        array: &ArrayType,
        site: &Site<'_>,
        target: *mut Argument,
    ) -> Option<usize> {
        let (data, len) = match value {
            Value::String(s) => (s.as_ptr() as *mut u8, s.len()),
            Value::Bytes(b) => (b.as_ptr() as *mut u8, b.len()),
            Value::Buffer(buffer) => (buffer.as_mut_ptr(), buffer.len()),
            _ => return None,
        };
        // Dynamic strings carry no terminator, so sentinel arrays always copy.
        let zero_copy = site.transfer == Transfer::Nothing && !array.zero_terminated;
        (*target).v_pointer = if zero_copy {
            self.pin(value);
            data as *mut c_void
        } else {
            let copy = native::strdup(slice::from_raw_parts(data, len)) as *mut c_void;
            if site.transfer == Transfer::Nothing {
                self.temps.push(Temporary::Heap(copy));
            }
            copy
        };
        Some(len)
    }

    pub(crate) unsafe fn array_to_native(
        &mut self,
        value: &Value,
        array: &ArrayType,
        site: Site<'_>,
        target: *mut Argument,
    ) -> BridgeResult<()> {
        if value.is_nil() && site.optional() {
            (*target).v_pointer = ptr::null_mut();
            self.set_array_length(array, &site, 0);
            return Ok(());
        }

        let esize = element_size(&array.element, array.kind == ArrayKind::PtrArray);
        if array.kind == ArrayKind::C && esize == 1 {
            if let Some(len) = self.byte_array_fast_path(value, array, &site, target) {
                self.set_array_length(array, &site, len);
                return Ok(());
            }
        }

        let elements = value
            .elements()
            .ok_or_else(|| BridgeError::mismatch("array", value.type_name()))?;
        let mut count = elements.len();
        let size = match (array.kind, array.fixed_size) {
            (ArrayKind::C, Some(fixed)) => {
                count = count.min(fixed);
                fixed
            }
            _ => count,
        };

        if size == 0 && !array.zero_terminated {
            (*target).v_pointer = ptr::null_mut();
            self.set_array_length(array, &site, 0);
            return Ok(());
        }

        let element_site = Site::new(site.element_transfer());
        let guard = match array.kind {
            ArrayKind::C | ArrayKind::Array => {
                let native = NativeArray::new(array.zero_terminated, esize, size);
                NativeArray::set_size(native, size);
                let guard = Temporary::Array(native);
                for (i, element) in elements.iter().take(count).enumerate() {
                    let slot = NativeArray::element(native, i) as *mut Argument;
                    self.to_native(element, &array.element, element_site, slot)?;
                }
                guard
            }
            ArrayKind::PtrArray => {
                let native = PtrArray::new(size);
                PtrArray::set_size(native, size);
                let guard = Temporary::PtrArray(native);
                let site = element_site.parent(Parent::ForcePointer);
                for (i, element) in elements.iter().take(count).enumerate() {
                    let slot = (*native).pdata.add(i) as *mut Argument;
                    self.to_native(element, &array.element, site, slot)?;
                }
                guard
            }
            ArrayKind::ByteArray => {
                let mut bytes = Vec::with_capacity(count);
                for element in elements.iter().take(count) {
                    let mut slot = Argument::zeroed();
                    self.to_native(element, &array.element, element_site, &mut slot)?;
                    bytes.push(slot.v_uint8);
                }
                Temporary::ByteArray(ByteArray::from_bytes(&bytes))
            }
        };

        let handle = match &guard {
            Temporary::Array(a) => *a as *mut c_void,
            Temporary::PtrArray(a) => *a as *mut c_void,
            Temporary::ByteArray(a) => *a as *mut c_void,
            _ => ptr::null_mut(),
        };
        (*target).v_pointer = match array.kind {
            ArrayKind::C if site.transfer != Transfer::Nothing => {
                mem::forget(guard);
                NativeArray::into_data(handle as *mut NativeArray) as *mut c_void
            }
            ArrayKind::C => {
                self.temps.push(guard);
                (*(handle as *mut NativeArray)).data as *mut c_void
            }
            _ if site.transfer != Transfer::Nothing => {
                mem::forget(guard);
                handle
            }
            _ => {
                self.temps.push(guard);
                handle
            }
        };
        self.set_array_length(array, &site, size);
        Ok(())
    }

    pub(crate) unsafe fn array_to_dynamic(
        &mut self,
        array: &ArrayType,
        site: Site<'_>,
        source: *mut Argument,
    ) -> BridgeResult<Value> {
        let handle = (*source).v_pointer;
        let mut parent = Parent::None;
        // Negative length: zero-terminated, scan for the sentinel.
        let (data, mut len): (*mut u8, isize) = match array.kind {
            ArrayKind::Array if !handle.is_null() => {
                let native = handle as *mut NativeArray;
                ((*native).data, (*native).len as isize)
            }
            ArrayKind::ByteArray if !handle.is_null() => {
                let native = handle as *mut ByteArray;
                ((*native).data, (*native).len as isize)
            }
            ArrayKind::PtrArray if !handle.is_null() => {
                parent = Parent::ForcePointer;
                let native = handle as *mut PtrArray;
                ((*native).pdata as *mut u8, (*native).len as isize)
            }
            ArrayKind::C => {
                let len = if array.zero_terminated {
                    -1
                } else if let Some(fixed) = array.fixed_size {
                    fixed as isize
                } else {
                    let known = array
                        .length_arg
                        .and_then(|index| site.frame.and_then(|f| f.length(index)))
                        .unwrap_or(-1);
                    if known < 0 {
                        1
                    } else {
                        known as isize
                    }
                };
                (handle as *mut u8, len)
            }
            _ => (ptr::null_mut(), 0),
        };

        let esize = element_size(&array.element, array.kind == ArrayKind::PtrArray);
        let value = if array.element.tag() == Some(TypeTag::UInt8) {
            if len < 0 {
                len = if data.is_null() {
                    0
                } else {
                    CStr::from_ptr(data as *const _).to_bytes().len() as isize
                };
            }
            if data.is_null() {
                Value::Nil
            } else {
                Value::Bytes(Rc::from(slice::from_raw_parts(data, len as usize)))
            }
        } else if handle.is_null() {
            return Ok(if array.kind == ArrayKind::C {
                Value::array(Vec::new())
            } else {
                Value::Nil
            });
        } else {
            let element_site = Site::new(site.element_transfer()).parent(parent);
            let mut items = Vec::with_capacity(len.max(0) as usize);
            let mut index = 0usize;
            while len < 0 || (index as isize) < len {
                let element = data.add(index * esize);
                if len < 0 && is_zero(element, esize) {
                    break;
                }
                let slot = element as *mut Argument;
                items.push(self.to_dynamic(&array.element, element_site, slot)?);
                index += 1;
            }
            Value::array(items)
        };

        if site.transfer != Transfer::Nothing && !handle.is_null() {
            match array.kind {
                ArrayKind::Array => NativeArray::unref(handle as *mut NativeArray),
                ArrayKind::ByteArray => ByteArray::unref(handle as *mut ByteArray),
                ArrayKind::PtrArray => PtrArray::unref(handle as *mut PtrArray),
                ArrayKind::C => native::free(handle),
            }
        }
        Ok(value)
    }
}
