// String Marshaling
// UTF-8 strings, filenames and raw pointers

use super::{Marshaller, Site, Temporary};
use crate::error::{BridgeError, BridgeResult};
use crate::native::{self, Argument};
use crate::types::{Transfer, TypeTag};
use crate::value::Value;
use std::ffi::{c_char, c_void, CStr, CString, OsStr};
use std::ptr;

#[cfg(unix)]
fn filename_bytes(text: &str) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    OsStr::new(text).as_bytes().to_vec()
}

#[cfg(not(unix))]
fn filename_bytes(text: &str) -> Vec<u8> {
    OsStr::new(text).to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn filename_text(bytes: &[u8]) -> String {
    use std::os::unix::ffi::OsStrExt;
    OsStr::from_bytes(bytes).to_string_lossy().into_owned()
}

#[cfg(not(unix))]
fn filename_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Reads a C string, freeing it when ownership was transferred.
pub(crate) unsafe fn string_to_dynamic(
    ptr: *mut c_char,
    tag: TypeTag,
    transfer: Transfer,
) -> Value {
    if ptr.is_null() {
        return Value::Nil;
    }
    let bytes = CStr::from_ptr(ptr).to_bytes();
    let value = if tag == TypeTag::Filename {
        Value::string(filename_text(bytes))
    } else {
        Value::string(String::from_utf8_lossy(bytes))
    };
    if transfer == Transfer::Everything {
        native::free(ptr as *mut c_void);
    }
    value
}

impl Marshaller<'_> {
    fn c_string(&mut self, bytes: Vec<u8>, owned: bool) -> BridgeResult<*mut c_char> {
        if owned {
            if bytes.contains(&0) {
                return Err(BridgeError::mismatch("string without NUL bytes", "string"));
            }
            return Ok(native::strdup(&bytes));
        }
        let text = CString::new(bytes)
            .map_err(|_| BridgeError::mismatch("string without NUL bytes", "string"))?;
        let ptr = text.as_ptr() as *mut c_char;
        self.temps.push(Temporary::CString(text));
        Ok(ptr)
    }

    pub(crate) unsafe fn string_to_native(
        &mut self,
        value: &Value,
        tag: TypeTag,
        site: Site<'_>,
        target: *mut Argument,
    ) -> BridgeResult<()> {
        let owned = site.transfer == Transfer::Everything;
        let text = match value {
            Value::Nil if site.optional() => {
                (*target).v_string = ptr::null_mut();
                return Ok(());
            }
            Value::Pointer(p) => {
                (*target).v_string = *p as *mut c_char;
                return Ok(());
            }
            Value::Buffer(buffer) => {
                (*target).v_string = if owned {
                    native::strdup(&buffer.to_vec())
                } else {
                    self.pin(value);
                    buffer.as_mut_ptr() as *mut c_char
                };
                return Ok(());
            }
            Value::String(s) => s.to_string(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Integer(_) | Value::Number(_) => value.to_string(),
            other => return Err(BridgeError::mismatch("string", other.type_name())),
        };
        let bytes = if tag == TypeTag::Filename {
            filename_bytes(&text)
        } else {
            text.into_bytes()
        };
        (*target).v_string = self.c_string(bytes, owned)?;
        Ok(())
    }

    /// Untyped pointers accept anything with a native address.
    pub(crate) unsafe fn pointer_to_native(
        &mut self,
        value: &Value,
        site: Site<'_>,
        target: *mut Argument,
    ) -> BridgeResult<()> {
        let ptr = match value {
            Value::Nil => ptr::null_mut(),
            Value::Pointer(p) => *p,
            Value::Buffer(buffer) => {
                self.pin(value);
                buffer.as_mut_ptr() as *mut c_void
            }
            Value::String(s) => self.c_string(s.as_bytes().to_vec(), false)? as *mut c_void,
            Value::Callable(callable) => callable.address(),
            Value::Userdata(_) => self
                .bridge
                .objects()
                .to_native(value, None, site.optional(), false)?,
            other => return Err(BridgeError::mismatch("pointer", other.type_name())),
        };
        (*target).v_pointer = ptr;
        Ok(())
    }
}
