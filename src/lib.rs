// Sald Bridge
// Dynamic calls into native code: signatures, marshaling and trampolines

pub mod bridge;
pub mod buffer;
pub mod callable;
pub mod closure;
pub mod config;
pub mod error;
pub mod logging;
pub mod marshal;
pub mod native;
pub mod runtime;
pub mod symbols;
pub mod types;
pub mod value;
pub mod wrappers;

pub use bridge::{Bridge, BridgeBuilder, NativeContainer};
pub use buffer::ByteBuffer;
pub use callable::{Callable, CallableDecl, ParamDecl, ParamKind, ParamShape};
pub use closure::{destroy_notify, BlockHandle, ClosureGuard};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use logging::init_logging;
pub use marshal::cell::{type_layout, ArgumentCell};
pub use marshal::field::{FieldSpec, FieldType};
pub use runtime::{
    ContextRef, ContextStatus, Coroutine, DispatchTarget, ExecutionContext, HostContext, Resume,
    StateLock,
};
pub use symbols::{Libraries, SymbolResolver, SymbolTable};
pub use types::{
    ArgInfo, ArrayKind, ArrayType, CallableDescriptor, CallableInfo, CallableKind, Direction,
    EnumType, ObjectType, Receiver, RecordType, Scope, Transfer, TypeInfo, TypeKind, TypeTag,
};
pub use value::{ErrorValue, Userdata, Value};
pub use wrappers::{ObjectMarshaller, OpaqueWrappers, RecordMarshaller};
