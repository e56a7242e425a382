// Dynamic Values
// The host-side value model exchanged with native code

use crate::buffer::ByteBuffer;
use crate::callable::Callable;
use crate::native::error::quark_to_string;
use crate::runtime::Coroutine;
use std::any::Any;
use std::cell::RefCell;
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

/// Host function signature: receives arguments, returns results or a raised error value.
pub type HostFn = dyn Fn(Vec<Value>) -> Result<Vec<Value>, Value>;

/// Wrapper object owned by the embedding runtime (records, objects, ...).
pub trait Userdata: Any {
    fn type_name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

/// Dynamic error value built from a native error report.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub domain: u32,
    pub code: i32,
    pub message: String,
}

impl ErrorValue {
    pub fn new(domain: u32, code: i32, message: impl Into<String>) -> Self {
        Self {
            domain,
            code,
            message: message.into(),
        }
    }

    pub fn domain_name(&self) -> Option<String> {
        quark_to_string(self.domain)
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.domain_name() {
            Some(domain) => write!(f, "{}:{}: {}", domain, self.code, self.message),
            None => write!(f, "{}:{}: {}", self.domain, self.code, self.message),
        }
    }
}

#[derive(Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Rc<str>),
    /// Immutable byte sequence, produced for byte-element arrays.
    Bytes(Rc<[u8]>),
    Buffer(ByteBuffer),
    Array(Rc<RefCell<Vec<Value>>>),
    /// Insertion-ordered key/value pairs.
    Dictionary(Rc<RefCell<Vec<(Value, Value)>>>),
    Pointer(*mut c_void),
    Function(Rc<HostFn>),
    Coroutine(Rc<dyn Coroutine>),
    Callable(Rc<Callable>),
    Userdata(Rc<dyn Userdata>),
    Error(Rc<ErrorValue>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    pub fn dictionary(pairs: Vec<(Value, Value)>) -> Self {
        Value::Dictionary(Rc::new(RefCell::new(pairs)))
    }

    pub fn function(f: impl Fn(Vec<Value>) -> Result<Vec<Value>, Value> + 'static) -> Self {
        Value::Function(Rc::new(f))
    }

    pub fn error(error: ErrorValue) -> Self {
        Value::Error(Rc::new(error))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Buffer(_) => "buffer",
            Value::Array(_) => "array",
            Value::Dictionary(_) => "dictionary",
            Value::Pointer(_) => "pointer",
            Value::Function(_) => "function",
            Value::Coroutine(_) => "coroutine",
            Value::Callable(_) => "callable",
            Value::Userdata(_) => "userdata",
            Value::Error(_) => "error",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except `nil` and `false` is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integral value, accepting floats with no fractional part.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer(n) => Some(*n as i128),
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as i128),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Snapshot of the elements of an array value.
    pub fn elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }

    /// Looks up `key` in a dictionary value.
    pub fn get(&self, key: &Value) -> Option<Value> {
        match self {
            Value::Dictionary(pairs) => pairs
                .borrow()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(a), Value::Number(b)) | (Value::Number(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Dictionary(a), Value::Dictionary(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Coroutine(a), Value::Coroutine(b)) => {
                Rc::as_ptr(a) as *const u8 == Rc::as_ptr(b) as *const u8
            }
            (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(a, b),
            (Value::Userdata(a), Value::Userdata(b)) => {
                Rc::as_ptr(a) as *const u8 == Rc::as_ptr(b) as *const u8
            }
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Buffer(b) => write!(f, "{:?}", b),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Dictionary(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Pointer(p) => write!(f, "<pointer {:p}>", *p),
            Value::Function(func) => write!(f, "<function {:p}>", Rc::as_ptr(func) as *const u8),
            Value::Coroutine(co) => write!(f, "<coroutine {:p}>", Rc::as_ptr(co) as *const u8),
            Value::Callable(callable) => write!(f, "{}", callable),
            Value::Userdata(data) => write!(f, "<{}>", data.type_name()),
            Value::Error(err) => write!(f, "{}", err),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
            _ => write!(f, "{}", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn test_integer_views() {
        assert_eq!(Value::Number(3.0).as_integer(), Some(3));
        assert_eq!(Value::Number(3.5).as_integer(), None);
        assert_eq!(Value::Number(f64::NAN).as_integer(), None);
        assert_eq!(Value::Integer(-4).as_integer(), Some(-4));
    }

    #[test]
    fn test_dictionary_lookup() {
        let dict = Value::dictionary(vec![(Value::from("a"), Value::from(1i64))]);
        assert_eq!(dict.get(&Value::from("a")), Some(Value::Integer(1)));
        assert_eq!(dict.get(&Value::from("b")), None);
    }
}
