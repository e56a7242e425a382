// Sald Bridge Error Handling Module
// Build, marshaling and dispatch failures surfaced by the call bridge

use std::fmt;
use thiserror::Error;

/// Broad classes of bridge failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The callable could not be constructed; never cached.
    Build,
    /// A value could not be converted; aborts the current call.
    Marshal,
    /// A trampoline could not be allocated, bound or released.
    Dispatch,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Build => "BuildError",
            ErrorKind::Marshal => "MarshalError",
            ErrorKind::Dispatch => "DispatchError",
            ErrorKind::Config => "ConfigError",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("could not locate {name}({symbol}): {reason}")]
    SymbolNotFound {
        name: String,
        symbol: String,
        reason: String,
    },

    #[error("ffi_prep_cif for `{name}' failed: {reason}")]
    PrepCif { name: String, reason: String },

    #[error("bad signature for `{name}': {reason}")]
    Signature { name: String, reason: String },

    #[error("{value} is out of <{min}, {max}>")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },

    #[error("{expected} expected, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("hashtable with {0} keys is not supported")]
    UnsupportedKey(String),

    #[error("field has bad kind {0}")]
    BadFieldKind(i64),

    #[error("field `{0}' is not writable")]
    ReadOnlyField(String),

    #[error("bad typeinfo: {0}")]
    BadTypeInfo(String),

    #[error("too many arguments to `{callable}' (expected at most {expected}, got {got})")]
    TooManyArguments {
        callable: String,
        expected: usize,
        got: usize,
    },

    #[error("bad argument #{index} to `{callable}' ({source})")]
    Argument {
        index: usize,
        callable: String,
        #[source]
        source: Box<BridgeError>,
    },

    #[error("`{0}' has no native address")]
    NoAddress(String),

    #[error("closure block exhausted ({0} slots in use)")]
    BlockExhausted(usize),

    #[error("closure block is not live")]
    DeadBlock,

    #[error("failed to prepare closure for `{name}': {reason}")]
    PrepClosure { name: String, reason: String },

    #[error("bad config: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::SymbolNotFound { .. }
            | BridgeError::PrepCif { .. }
            | BridgeError::Signature { .. } => ErrorKind::Build,
            BridgeError::OutOfRange { .. }
            | BridgeError::TypeMismatch { .. }
            | BridgeError::UnsupportedKey(_)
            | BridgeError::BadFieldKind(_)
            | BridgeError::ReadOnlyField(_)
            | BridgeError::BadTypeInfo(_)
            | BridgeError::TooManyArguments { .. }
            | BridgeError::NoAddress(_) => ErrorKind::Marshal,
            BridgeError::Argument { source, .. } => source.kind(),
            BridgeError::BlockExhausted(_)
            | BridgeError::DeadBlock
            | BridgeError::PrepClosure { .. } => ErrorKind::Dispatch,
            BridgeError::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        BridgeError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub(crate) fn at_argument(self, index: usize, callable: &str) -> Self {
        BridgeError::Argument {
            index,
            callable: callable.to_string(),
            source: Box::new(self),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
