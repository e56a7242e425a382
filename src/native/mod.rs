// Native Memory
// Native-side memory: the argument slot union, allocation helpers and the
// container layouts handed to native code.

pub mod array;
pub mod error;
pub mod hash;
pub mod list;

use crate::types::TypeTag;
use libffi::raw::{ffi_arg, ffi_sarg};
use std::ffi::{c_char, c_int, c_void};
use std::mem;
use std::ptr;

/// One native argument slot. Narrow writes only touch the bytes of their field.
#[repr(C)]
#[derive(Clone, Copy)]
pub union Argument {
    pub v_boolean: c_int,
    pub v_int8: i8,
    pub v_uint8: u8,
    pub v_int16: i16,
    pub v_uint16: u16,
    pub v_int32: i32,
    pub v_uint32: u32,
    pub v_int64: i64,
    pub v_uint64: u64,
    pub v_float: f32,
    pub v_double: f64,
    pub v_size: usize,
    pub v_pointer: *mut c_void,
    pub v_string: *mut c_char,
    pub ffi_arg: ffi_arg,
    pub ffi_sarg: ffi_sarg,
}

impl Argument {
    pub fn zeroed() -> Self {
        Argument { v_uint64: 0 }
    }

    pub fn pointer(ptr: *mut c_void) -> Self {
        let mut arg = Self::zeroed();
        arg.v_pointer = ptr;
        arg
    }
}

impl Default for Argument {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Whether `tag` is returned in a full register and needs widening.
pub(crate) fn needs_register_fixup(tag: TypeTag) -> bool {
    tag == TypeTag::Boolean || (tag.is_integer() && scalar_size(tag) <= mem::size_of::<ffi_arg>())
}

/// Widens a narrow value stored at `arg` to register width, for callback returns.
///
/// # Safety
/// `arg` must point to at least `size_of::<ffi_arg>()` writable bytes.
pub(crate) unsafe fn widen_return(arg: *mut Argument, tag: TypeTag) {
    match tag {
        TypeTag::Boolean => (*arg).ffi_sarg = (*arg).v_boolean as ffi_sarg,
        TypeTag::Int8 => (*arg).ffi_sarg = (*arg).v_int8 as ffi_sarg,
        TypeTag::UInt8 => (*arg).ffi_arg = (*arg).v_uint8 as ffi_arg,
        TypeTag::Int16 => (*arg).ffi_sarg = (*arg).v_int16 as ffi_sarg,
        TypeTag::UInt16 => (*arg).ffi_arg = (*arg).v_uint16 as ffi_arg,
        TypeTag::Int32 => (*arg).ffi_sarg = (*arg).v_int32 as ffi_sarg,
        TypeTag::UInt32 | TypeTag::Unichar => (*arg).ffi_arg = (*arg).v_uint32 as ffi_arg,
        _ => {}
    }
}

/// Narrows a register-width return value in place, for native call results.
///
/// # Safety
/// `arg` must point to an initialized slot.
pub(crate) unsafe fn narrow_return(arg: *mut Argument, tag: TypeTag) {
    match tag {
        TypeTag::Boolean => (*arg).v_boolean = (*arg).ffi_sarg as c_int,
        TypeTag::Int8 => (*arg).v_int8 = (*arg).ffi_sarg as i8,
        TypeTag::UInt8 => (*arg).v_uint8 = (*arg).ffi_arg as u8,
        TypeTag::Int16 => (*arg).v_int16 = (*arg).ffi_sarg as i16,
        TypeTag::UInt16 => (*arg).v_uint16 = (*arg).ffi_arg as u16,
        TypeTag::Int32 => (*arg).v_int32 = (*arg).ffi_sarg as i32,
        TypeTag::UInt32 | TypeTag::Unichar => (*arg).v_uint32 = (*arg).ffi_arg as u32,
        _ => {}
    }
}

pub fn scalar_size(tag: TypeTag) -> usize {
    match tag {
        TypeTag::Void => 0,
        TypeTag::Boolean => mem::size_of::<c_int>(),
        TypeTag::Int8 | TypeTag::UInt8 => 1,
        TypeTag::Int16 | TypeTag::UInt16 => 2,
        TypeTag::Int32 | TypeTag::UInt32 | TypeTag::Unichar | TypeTag::Float => 4,
        TypeTag::Int64 | TypeTag::UInt64 | TypeTag::Double => 8,
        TypeTag::Utf8 | TypeTag::Filename => mem::size_of::<*mut c_void>(),
    }
}

pub fn scalar_align(tag: TypeTag) -> usize {
    match tag {
        TypeTag::Void => 1,
        TypeTag::Int64 | TypeTag::UInt64 => mem::align_of::<i64>(),
        TypeTag::Double => mem::align_of::<f64>(),
        other => scalar_size(other),
    }
}

/// Zero-filled allocation from the C heap, releasable by native code with `free`.
pub fn alloc_zeroed(size: usize) -> *mut c_void {
    // SAFETY: calloc accepts any size; a zero size yields a unique pointer or null.
    unsafe { libc::calloc(1, size.max(1)) }
}

/// # Safety
/// `ptr` must come from the C heap (or be null) and not be used afterwards.
pub unsafe fn free(ptr: *mut c_void) {
    libc::free(ptr);
}

/// Copies `bytes` into a fresh NUL-terminated C heap string.
pub fn strdup(bytes: &[u8]) -> *mut c_char {
    let copy = alloc_zeroed(bytes.len() + 1) as *mut u8;
    if !copy.is_null() {
        // SAFETY: `copy` holds len + 1 bytes.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), copy, bytes.len()) };
    }
    copy as *mut c_char
}

/// Copies `len` bytes at `src` into the C heap.
///
/// # Safety
/// `src` must be valid for `len` reads.
pub unsafe fn memdup(src: *const c_void, len: usize) -> *mut c_void {
    let copy = alloc_zeroed(len);
    if !copy.is_null() && len > 0 {
        ptr::copy_nonoverlapping(src as *const u8, copy as *mut u8, len);
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_is_one_register_pair() {
        assert_eq!(mem::size_of::<Argument>(), 8);
    }

    #[test]
    fn test_narrow_write_keeps_neighbouring_bytes() {
        let mut arg = Argument { v_uint64: u64::MAX };
        unsafe {
            (*(&mut arg as *mut Argument)).v_uint8 = 0;
            assert_eq!(arg.v_uint64, u64::MAX << 8);
        }
    }

    #[test]
    fn test_register_fixups() {
        let mut arg = Argument::zeroed();
        unsafe {
            arg.v_int8 = -3;
            widen_return(&mut arg, TypeTag::Int8);
            assert_eq!(arg.ffi_sarg, -3);
            arg.ffi_sarg = -5;
            narrow_return(&mut arg, TypeTag::Int16);
            assert_eq!(arg.v_int16, -5);
        }
        assert!(needs_register_fixup(TypeTag::Boolean));
        assert!(!needs_register_fixup(TypeTag::Double));
    }

    #[test]
    fn test_strdup_terminates() {
        let s = strdup(b"abc");
        unsafe {
            assert_eq!(std::ffi::CStr::from_ptr(s).to_bytes(), b"abc");
            free(s as *mut c_void);
        }
    }
}
