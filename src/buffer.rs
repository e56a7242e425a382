// Byte Buffers
// Mutable byte storage shared with native code

use crate::error::{BridgeError, BridgeResult};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Fixed-size, mutable byte buffer shared between the dynamic side and native code.
///
/// The storage never moves after creation, so a pointer obtained from
/// [`ByteBuffer::as_mut_ptr`] stays valid while any clone of the buffer is alive.
#[derive(Clone)]
pub struct ByteBuffer {
    bytes: Rc<RefCell<Box<[u8]>>>,
}

impl ByteBuffer {
    /// Creates a zero-filled buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    pub fn from_str(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }

    fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Rc::new(RefCell::new(bytes.into_boxed_slice())),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the byte at `index`, `None` when out of range.
    pub fn get(&self, index: usize) -> Option<u8> {
        self.bytes.borrow().get(index).copied()
    }

    /// Stores the low 8 bits of `value` at `index`.
    pub fn set(&self, index: usize, value: i64) -> BridgeResult<()> {
        let mut bytes = self.bytes.borrow_mut();
        let len = bytes.len();
        match bytes.get_mut(index) {
            Some(slot) => {
                *slot = (value & 0xff) as u8;
                Ok(())
            }
            None => Err(BridgeError::OutOfRange {
                value: index.to_string(),
                min: "0".to_string(),
                max: len.saturating_sub(1).to_string(),
            }),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.borrow().to_vec()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }

    /// Raw pointer to the first byte, for zero-copy marshaling.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        // SAFETY: the boxed slice is never reallocated, only its contents mutate.
        unsafe { (*self.bytes.as_ptr()).as_mut_ptr() }
    }

    pub fn ptr_eq(&self, other: &ByteBuffer) -> bool {
        Rc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<bytes {:p}: {}>", self.as_mut_ptr(), self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let buf = ByteBuffer::new(4);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.to_vec(), vec![0, 0, 0, 0]);
        assert_eq!(buf.get(4), None);
    }

    #[test]
    fn test_set_masks_and_checks_range() {
        let buf = ByteBuffer::from_str("abc");
        buf.set(0, 0x141).unwrap();
        assert_eq!(buf.get(0), Some(0x41));
        assert_eq!(buf.to_string_lossy(), "Abc");
        assert!(buf.set(3, 1).is_err());
    }

    #[test]
    fn test_pointer_sees_writes() {
        let buf = ByteBuffer::new(2);
        unsafe { *buf.as_mut_ptr().add(1) = 7 };
        assert_eq!(buf.get(1), Some(7));
        assert!(buf.ptr_eq(&buf.clone()));
    }
}
