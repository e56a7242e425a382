// Native Errors
// Error records and domain quarks shared with native code

use parking_lot::Mutex;
use std::ffi::{c_char, c_int, c_void, CStr};

/// Domain used for errors synthesized from failed callbacks.
pub const CALLBACK_ERROR_DOMAIN: &str = "callback-error-quark";

static QUARKS: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// Interns `name`, returning its nonzero quark.
pub fn quark_from_str(name: &str) -> u32 {
    let mut quarks = QUARKS.lock();
    if let Some(pos) = quarks.iter().position(|q| q == name) {
        return pos as u32 + 1;
    }
    quarks.push(name.to_string());
    quarks.len() as u32
}

pub fn quark_to_string(quark: u32) -> Option<String> {
    if quark == 0 {
        return None;
    }
    QUARKS.lock().get(quark as usize - 1).cloned()
}

/// Native error report: domain quark, code and a C heap message.
#[repr(C)]
pub struct RawError {
    pub domain: u32,
    pub code: c_int,
    pub message: *mut c_char,
}

impl RawError {
    pub fn new(domain: u32, code: i32, message: &str) -> *mut RawError {
        Box::into_raw(Box::new(RawError {
            domain,
            code,
            message: super::strdup(message.as_bytes()),
        }))
    }

    /// # Safety
    /// `this` must be a live error.
    pub unsafe fn message(this: *const RawError) -> String {
        let message = (*this).message;
        if message.is_null() {
            String::new()
        } else {
            CStr::from_ptr(message).to_string_lossy().into_owned()
        }
    }

    /// # Safety
    /// `this` must come from [`RawError::new`] and not be used afterwards.
    pub unsafe fn free(this: *mut RawError) {
        if this.is_null() {
            return;
        }
        let error = Box::from_raw(this);
        super::free(error.message as *mut c_void);
    }
}

/// Fills a native error slot, the way a failing native function would.
///
/// # Safety
/// `slot` must be null or point to a writable error pointer.
pub unsafe fn set_error(slot: *mut *mut RawError, domain: &str, code: i32, message: &str) {
    if !slot.is_null() {
        *slot = RawError::new(quark_from_str(domain), code, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarks_are_stable() {
        let a = quark_from_str("demo-error-quark");
        assert_eq!(quark_from_str("demo-error-quark"), a);
        assert_eq!(quark_to_string(a).as_deref(), Some("demo-error-quark"));
        assert_eq!(quark_to_string(0), None);
    }

    #[test]
    fn test_set_error() {
        let mut slot: *mut RawError = std::ptr::null_mut();
        unsafe {
            set_error(&mut slot, "demo-error-quark", 4, "bad thing");
            assert_eq!((*slot).code, 4);
            assert_eq!(RawError::message(slot), "bad thing");
            RawError::free(slot);
            set_error(std::ptr::null_mut(), "demo-error-quark", 4, "ignored");
        }
    }
}
