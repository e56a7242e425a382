// Callables
// Built, cacheable descriptions of invocable native signatures.

mod build;
pub(crate) mod cache;
pub(crate) mod invoke;
mod parse;

pub use parse::{CallableDecl, ParamDecl, ParamShape};

use crate::error::{BridgeError, BridgeResult};
use crate::types::{
    ArgInfo, CallableDescriptor, Direction, EnumType, Receiver, RecordType, Transfer, TypeInfo,
    TypeKind, TypeTag,
};
use libffi::middle::{Cif, Type};
use std::cell::Cell;
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

/// How a parameter is marshaled, resolved once when the callable is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Typed,
    /// Record whose type lives in the callable's side table.
    Record(usize),
    /// Enumeration whose type lives in the callable's side table.
    Enum(usize),
}

#[derive(Debug, Clone)]
pub(crate) enum Extra {
    Record(Rc<RecordType>),
    Enum(Rc<EnumType>),
}

#[derive(Debug, Clone)]
pub struct Param {
    pub(crate) name: Option<String>,
    pub(crate) arg: Option<ArgInfo>,
    pub(crate) ty: Option<Rc<TypeInfo>>,
    pub(crate) dir: Direction,
    pub(crate) transfer: Transfer,
    pub(crate) caller_allocates: bool,
    pub(crate) internal: bool,
    pub(crate) internal_user_data: bool,
    pub(crate) call_scoped_user_data: bool,
    pub(crate) n_closures: u8,
    pub(crate) kind: ParamKind,
}

impl Param {
    pub(crate) fn from_arg(arg: ArgInfo) -> Self {
        Self {
            name: Some(arg.name.clone()),
            ty: Some(arg.ty.clone()),
            dir: arg.direction,
            transfer: arg.transfer,
            caller_allocates: arg.caller_allocates,
            arg: Some(arg),
            internal: false,
            internal_user_data: false,
            call_scoped_user_data: false,
            n_closures: 0,
            kind: ParamKind::Typed,
        }
    }

    pub(crate) fn typed(ty: Rc<TypeInfo>, dir: Direction, transfer: Transfer) -> Self {
        Self {
            name: None,
            arg: None,
            ty: Some(ty),
            dir,
            transfer,
            caller_allocates: false,
            internal: false,
            internal_user_data: false,
            call_scoped_user_data: false,
            n_closures: 0,
            kind: ParamKind::Typed,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ty(&self) -> Option<&Rc<TypeInfo>> {
        self.ty.as_ref()
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    pub fn transfer(&self) -> Transfer {
        self.transfer
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// Hidden from dynamic callers: lengths, user data, destroy notifiers.
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub(crate) fn is_void(&self) -> bool {
        self.kind == ParamKind::Typed && self.ty.as_ref().map_or(true, |ty| ty.is_void())
    }

    pub(crate) fn tag(&self) -> Option<TypeTag> {
        self.ty.as_ref().and_then(|ty| ty.tag())
    }

    fn ffi_type(&self) -> Type {
        if self.dir != Direction::In {
            return Type::pointer();
        }
        match (self.kind, &self.ty) {
            (ParamKind::Record(_), _) => Type::pointer(),
            (ParamKind::Enum(_), None) => Type::c_int(),
            (_, Some(ty)) => ffi_type_of(ty),
            (ParamKind::Typed, None) => Type::void(),
        }
    }
}

pub(crate) fn ffi_type_of(ty: &TypeInfo) -> Type {
    if ty.pointer {
        return Type::pointer();
    }
    match &ty.kind {
        TypeKind::Scalar(tag) => scalar_ffi_type(*tag),
        TypeKind::Enum(e) => scalar_ffi_type(e.storage),
        _ => Type::pointer(),
    }
}

fn scalar_ffi_type(tag: TypeTag) -> Type {
    match tag {
        TypeTag::Void => Type::void(),
        TypeTag::Boolean => Type::c_uint(),
        TypeTag::Int8 => Type::i8(),
        TypeTag::UInt8 => Type::u8(),
        TypeTag::Int16 => Type::i16(),
        TypeTag::UInt16 => Type::u16(),
        TypeTag::Int32 => Type::i32(),
        TypeTag::UInt32 | TypeTag::Unichar => Type::u32(),
        TypeTag::Int64 => Type::i64(),
        TypeTag::UInt64 => Type::u64(),
        TypeTag::Float => Type::f32(),
        TypeTag::Double => Type::f64(),
        TypeTag::Utf8 | TypeTag::Filename => Type::pointer(),
    }
}

/// Exposed parameter summary.
#[derive(Debug, Clone)]
pub struct ParamDescription {
    pub name: Option<String>,
    pub ty: Option<Rc<TypeInfo>>,
    pub input: bool,
    pub output: bool,
}

pub struct Callable {
    pub(crate) name: String,
    label: &'static str,
    pub(crate) descriptor: Option<Rc<dyn CallableDescriptor>>,
    address: *mut c_void,
    user_data: Cell<*mut c_void>,
    pub(crate) has_self: bool,
    pub(crate) throws: bool,
    pub(crate) ignore_retval: bool,
    pub(crate) closure_marshal: bool,
    pub(crate) receiver: Option<Receiver>,
    pub(crate) cif: Cif,
    pub(crate) retval: Param,
    pub(crate) params: Vec<Param>,
    pub(crate) extras: Vec<Extra>,
}

impl Callable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> *mut c_void {
        self.address
    }

    pub fn descriptor(&self) -> Option<&Rc<dyn CallableDescriptor>> {
        self.descriptor.as_ref()
    }

    pub fn user_data(&self) -> *mut c_void {
        self.user_data.get()
    }

    pub fn set_user_data(&self, user_data: *mut c_void) {
        self.user_data.set(user_data);
    }

    pub fn has_receiver(&self) -> bool {
        self.has_self
    }

    pub fn can_throw(&self) -> bool {
        self.throws
    }

    pub fn suppresses_return(&self) -> bool {
        self.ignore_retval
    }

    pub fn param(&self, index: usize) -> Option<&Param> {
        self.params.get(index)
    }

    pub fn return_param(&self) -> &Param {
        &self.retval
    }

    /// Parameters visible to dynamic callers, receiver first.
    pub fn params(&self) -> Vec<ParamDescription> {
        let mut described = Vec::new();
        if self.has_self {
            described.push(ParamDescription {
                name: Some("self".to_string()),
                ty: None,
                input: true,
                output: false,
            });
        }
        for param in self.params.iter().filter(|p| !p.internal) {
            described.push(ParamDescription {
                name: param.name.clone(),
                ty: param.ty.clone(),
                input: param.dir != Direction::Out,
                output: param.dir != Direction::In,
            });
        }
        described
    }

    /// Number of dynamic arguments a call accepts.
    pub fn exposed_inputs(&self) -> usize {
        self.has_self as usize
            + self
                .params
                .iter()
                .filter(|p| !p.internal && p.dir != Direction::Out)
                .count()
    }

    pub(crate) fn record_extra(&self, index: usize) -> BridgeResult<&Rc<RecordType>> {
        match self.extras.get(index) {
            Some(Extra::Record(ty)) => Ok(ty),
            _ => Err(BridgeError::BadTypeInfo(format!(
                "`{}' has no record type #{}",
                self.name, index
            ))),
        }
    }

    pub(crate) fn enum_extra(&self, index: usize) -> BridgeResult<&Rc<EnumType>> {
        match self.extras.get(index) {
            Some(Extra::Enum(ty)) => Ok(ty),
            _ => Err(BridgeError::BadTypeInfo(format!(
                "`{}' has no enum type #{}",
                self.name, index
            ))),
        }
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sald_bridge.{} ({:p}): {}",
            self.label, self.address, self.name
        )
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_params_are_pointers() {
        let param = Param::typed(
            TypeInfo::scalar(TypeTag::Int32),
            Direction::Out,
            Transfer::Nothing,
        );
        let ptr = Type::pointer();
        assert_eq!(
            unsafe { (*param.ffi_type().as_raw_ptr()).size },
            unsafe { (*ptr.as_raw_ptr()).size }
        );
    }

    #[test]
    fn test_void_detection() {
        let void = Param::typed(TypeInfo::scalar(TypeTag::Void), Direction::Out, Transfer::Nothing);
        assert!(void.is_void());
        let ptr = Param::typed(TypeInfo::pointer(), Direction::Out, Transfer::Nothing);
        assert!(!ptr.is_void());
    }
}
