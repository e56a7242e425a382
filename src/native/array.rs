// Native Arrays
// Growable element arrays in the layout native code expects

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Grows a C-heap segment so that it holds at least `bytes` bytes, zeroing the new tail.
unsafe fn reserve(data: &mut *mut u8, capacity: &mut usize, bytes: usize) {
    if bytes <= *capacity && !data.is_null() {
        return;
    }
    let new_capacity = bytes.max(*capacity * 2).max(16);
    let grown = libc::realloc(*data as *mut c_void, new_capacity) as *mut u8;
    if grown.is_null() {
        return;
    }
    ptr::write_bytes(grown.add(*capacity), 0, new_capacity - *capacity);
    *data = grown;
    *capacity = new_capacity;
}

/// Reference-counted growable array of fixed-size elements.
#[repr(C)]
pub struct NativeArray {
    pub data: *mut u8,
    pub len: u32,
    elt_size: u32,
    capacity: usize,
    zero_terminated: bool,
    ref_count: AtomicU32,
}

impl NativeArray {
    pub fn new(zero_terminated: bool, elt_size: usize, reserved: usize) -> *mut Self {
        let mut array = Box::new(Self {
            data: ptr::null_mut(),
            len: 0,
            elt_size: elt_size as u32,
            capacity: 0,
            zero_terminated,
            ref_count: AtomicU32::new(1),
        });
        let terminator = if zero_terminated { 1 } else { 0 };
        // SAFETY: fresh segment owned by `array`.
        unsafe {
            reserve(
                &mut array.data,
                &mut array.capacity,
                (reserved + terminator) * elt_size.max(1),
            )
        };
        Box::into_raw(array)
    }

    pub fn elt_size(&self) -> usize {
        self.elt_size as usize
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    /// `this` must be a live array.
    pub unsafe fn set_size(this: *mut Self, len: usize) {
        let array = &mut *this;
        let terminator = if array.zero_terminated { 1 } else { 0 };
        let esize = array.elt_size();
        reserve(&mut array.data, &mut array.capacity, (len + terminator) * esize.max(1));
        if len < array.len() {
            ptr::write_bytes(array.data.add(len * esize), 0, (array.len() - len) * esize);
        }
        array.len = len as u32;
    }

    /// # Safety
    /// `this` must be live and `index` within capacity.
    pub unsafe fn element(this: *mut Self, index: usize) -> *mut u8 {
        (*this).data.add(index * (*this).elt_size())
    }

    /// # Safety
    /// `this` must be a live array.
    pub unsafe fn add_ref(this: *mut Self) -> *mut Self {
        (*this).ref_count.fetch_add(1, Ordering::AcqRel);
        this
    }

    /// # Safety
    /// `this` must be a live array; it is freed with its segment at zero.
    pub unsafe fn unref(this: *mut Self) {
        if (*this).ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            libc::free((*this).data as *mut c_void);
            drop(Box::from_raw(this));
        }
    }

    /// Frees the array header and hands its segment to the caller.
    ///
    /// # Safety
    /// `this` must be live and not used afterwards.
    pub unsafe fn into_data(this: *mut Self) -> *mut u8 {
        let data = (*this).data;
        drop(Box::from_raw(this));
        data
    }
}

/// Reference-counted vector of pointers.
#[repr(C)]
pub struct PtrArray {
    pub pdata: *mut *mut c_void,
    pub len: u32,
    capacity: usize,
    ref_count: AtomicU32,
}

impl PtrArray {
    pub fn new(reserved: usize) -> *mut Self {
        let mut array = Box::new(Self {
            pdata: ptr::null_mut(),
            len: 0,
            capacity: 0,
            ref_count: AtomicU32::new(1),
        });
        let mut data = array.pdata as *mut u8;
        // SAFETY: fresh segment owned by `array`.
        unsafe {
            reserve(
                &mut data,
                &mut array.capacity,
                (reserved + 1) * std::mem::size_of::<*mut c_void>(),
            )
        };
        array.pdata = data as *mut *mut c_void;
        Box::into_raw(array)
    }

    /// # Safety
    /// `this` must be a live array.
    pub unsafe fn set_size(this: *mut Self, len: usize) {
        let array = &mut *this;
        let mut data = array.pdata as *mut u8;
        reserve(
            &mut data,
            &mut array.capacity,
            (len + 1) * std::mem::size_of::<*mut c_void>(),
        );
        array.pdata = data as *mut *mut c_void;
        array.len = len as u32;
    }

    /// # Safety
    /// `this` must be a live array.
    pub unsafe fn unref(this: *mut Self) {
        if (*this).ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            libc::free((*this).pdata as *mut c_void);
            drop(Box::from_raw(this));
        }
    }
}

/// Reference-counted byte vector.
#[repr(C)]
pub struct ByteArray {
    pub data: *mut u8,
    pub len: u32,
    capacity: usize,
    ref_count: AtomicU32,
}

impl ByteArray {
    pub fn from_bytes(bytes: &[u8]) -> *mut Self {
        let mut array = Box::new(Self {
            data: ptr::null_mut(),
            len: 0,
            capacity: 0,
            ref_count: AtomicU32::new(1),
        });
        // SAFETY: fresh segment sized for `bytes`.
        unsafe {
            reserve(&mut array.data, &mut array.capacity, bytes.len());
            if !array.data.is_null() {
                ptr::copy_nonoverlapping(bytes.as_ptr(), array.data, bytes.len());
                array.len = bytes.len() as u32;
            }
        }
        Box::into_raw(array)
    }

    /// # Safety
    /// `this` must be a live array.
    pub unsafe fn unref(this: *mut Self) {
        if (*this).ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            libc::free((*this).data as *mut c_void);
            drop(Box::from_raw(this));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_terminated_growth() {
        unsafe {
            let array = NativeArray::new(true, 4, 0);
            NativeArray::set_size(array, 40);
            for i in 0..40 {
                *(NativeArray::element(array, i) as *mut i32) = i as i32 + 1;
            }
            assert_eq!((*array).len(), 40);
            assert_eq!(*(NativeArray::element(array, 40) as *mut i32), 0);
            let data = NativeArray::into_data(array);
            assert_eq!(*(data as *mut i32).add(39), 40);
            libc::free(data as *mut c_void);
        }
    }

    #[test]
    fn test_ptr_array_keeps_terminator_slot() {
        unsafe {
            let array = PtrArray::new(2);
            PtrArray::set_size(array, 2);
            assert!((*(*array).pdata.add(2)).is_null());
            PtrArray::unref(array);
        }
    }

    #[test]
    fn test_byte_array_copies() {
        unsafe {
            let array = ByteArray::from_bytes(b"xyz");
            assert_eq!((*array).len, 3);
            assert_eq!(*(*array).data.add(1), b'y');
            ByteArray::unref(array);
        }
    }
}
