// Marshaling
// Conversion of single values between the dynamic model and native slots.
//
// Every conversion runs against a [`Site`] describing where the value lives
// (its argument info, transfer and enclosing context) and writes any memory
// that only has to outlive the native call into [`Temporaries`].

mod array;
pub mod cell;
mod collection;
pub mod field;
mod interface;
mod param;
pub(crate) mod scalar;
mod string;

pub(crate) use array::element_size;
pub(crate) use param::CallerAlloc;

use crate::bridge::Bridge;
use crate::closure::BlockHandle;
use crate::callable::Param;
use crate::error::{BridgeError, BridgeResult};
use crate::native::array::{ByteArray, NativeArray, PtrArray};
use crate::native::error::RawError;
use crate::native::hash::HashTable;
use crate::native::list::{List, SList};
use crate::native::{self, Argument};
use crate::runtime::ContextRef;
use crate::types::{ArgInfo, Transfer, TypeInfo, TypeKind, TypeTag};
use crate::value::Value;
use smallvec::SmallVec;
use std::ffi::{c_void, CString};

/// Context a value is marshaled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parent {
    None,
    /// Stored in a pointer-sized container slot.
    ForcePointer,
    /// Return position: register-width fixups apply.
    ReturnValue,
    /// Storage pre-allocated by the caller.
    CallerAlloc,
}

/// Arguments of one native call frame, indexed like the callable's params.
pub(crate) struct Frame<'c> {
    params: &'c [Param],
    slots: SmallVec<[*mut Argument; 8]>,
}

impl<'c> Frame<'c> {
    pub(crate) fn new(params: &'c [Param], slots: SmallVec<[*mut Argument; 8]>) -> Self {
        Self { params, slots }
    }

    pub(crate) fn slot(&self, index: usize) -> Option<*mut Argument> {
        self.slots.get(index).copied().filter(|p| !p.is_null())
    }

    /// Reads the integer stored in param `index`.
    pub(crate) unsafe fn length(&self, index: usize) -> Option<i64> {
        let slot = self.slot(index)?;
        let tag = self.params.get(index)?.tag()?;
        scalar::read_integer(slot, tag, Parent::None)
    }

    pub(crate) unsafe fn set_length(&self, index: usize, length: usize) {
        let tag = self.params.get(index).and_then(Param::tag);
        if let (Some(slot), Some(tag)) = (self.slot(index), tag) {
            scalar::write_integer(slot, tag, length as i64);
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Site<'a> {
    pub arg: Option<&'a ArgInfo>,
    pub transfer: Transfer,
    pub parent: Parent,
    pub frame: Option<&'a Frame<'a>>,
}

impl<'a> Site<'a> {
    pub(crate) fn new(transfer: Transfer) -> Self {
        Self {
            arg: None,
            transfer,
            parent: Parent::None,
            frame: None,
        }
    }

    pub(crate) fn parent(mut self, parent: Parent) -> Self {
        self.parent = parent;
        self
    }

    pub(crate) fn arg(mut self, arg: Option<&'a ArgInfo>) -> Self {
        self.arg = arg;
        self
    }

    pub(crate) fn frame(mut self, frame: Option<&'a Frame<'a>>) -> Self {
        self.frame = frame;
        self
    }

    /// Values without argument info are always nullable.
    pub(crate) fn optional(&self) -> bool {
        self.arg.map_or(true, |a| a.optional)
    }

    /// Transfer applied to elements of a container at this site.
    pub(crate) fn element_transfer(&self) -> Transfer {
        if self.transfer == Transfer::Everything {
            Transfer::Everything
        } else {
            Transfer::Nothing
        }
    }
}

pub(crate) enum Temporary {
    CString(CString),
    Heap(*mut c_void),
    Array(*mut NativeArray),
    PtrArray(*mut PtrArray),
    ByteArray(*mut ByteArray),
    SList(*mut SList),
    List(*mut List),
    Hash(*mut HashTable),
    Error(*mut RawError),
    Closure(Bridge, BlockHandle),
    /// Dynamic value whose storage native code borrows.
    Pinned(Value),
}

impl Drop for Temporary {
    fn drop(&mut self) {
        // SAFETY: every temporary owns its allocation exclusively.
        unsafe {
            match self {
                Temporary::CString(_) | Temporary::Pinned(_) => {}
                Temporary::Heap(p) => native::free(*p),
                Temporary::Array(a) => NativeArray::unref(*a),
                Temporary::PtrArray(a) => PtrArray::unref(*a),
                Temporary::ByteArray(a) => ByteArray::unref(*a),
                Temporary::SList(l) => SList::free(*l),
                Temporary::List(l) => List::free(*l),
                Temporary::Hash(h) => HashTable::destroy(*h),
                Temporary::Error(e) => RawError::free(*e),
                Temporary::Closure(bridge, block) => bridge.destroy_closure_block(*block),
            }
        }
    }
}

/// Native memory released when the owning scope ends, newest first.
#[derive(Default)]
pub struct Temporaries {
    items: Vec<Temporary>,
}

impl Temporaries {
    pub(crate) fn push(&mut self, item: Temporary) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Moves every temporary of `other` into this set, keeping their order.
    pub(crate) fn append(&mut self, other: &mut Temporaries) {
        self.items.append(&mut other.items);
    }
}

impl Drop for Temporaries {
    fn drop(&mut self) {
        while let Some(item) = self.items.pop() {
            drop(item);
        }
    }
}

pub(crate) struct Marshaller<'m> {
    pub(crate) bridge: &'m Bridge,
    pub(crate) ctx: Option<&'m ContextRef>,
    pub(crate) temps: &'m mut Temporaries,
}

impl<'m> Marshaller<'m> {
    pub(crate) fn new(
        bridge: &'m Bridge,
        ctx: Option<&'m ContextRef>,
        temps: &'m mut Temporaries,
    ) -> Self {
        Self { bridge, ctx, temps }
    }

    /// Writes `value` into the native slot at `target`.
    ///
    /// # Safety
    /// `target` must be writable for the native size of `ty` at this site.
    pub(crate) unsafe fn to_native(
        &mut self,
        value: &Value,
        ty: &TypeInfo,
        site: Site<'_>,
        target: *mut Argument,
    ) -> BridgeResult<()> {
        match &ty.kind {
            TypeKind::Scalar(TypeTag::Void) => {
                if ty.pointer {
                    self.pointer_to_native(value, site, target)
                } else {
                    Ok(())
                }
            }
            TypeKind::Scalar(TypeTag::Boolean) => {
                scalar::boolean_to_native(value, target, site.parent);
                Ok(())
            }
            TypeKind::Scalar(tag @ (TypeTag::Float | TypeTag::Double)) => {
                scalar::float_to_native(value, *tag, site.optional(), target, site.parent)
            }
            TypeKind::Scalar(tag @ (TypeTag::Utf8 | TypeTag::Filename)) => {
                self.string_to_native(value, *tag, site, target)
            }
            TypeKind::Scalar(tag) => scalar::int_to_native(value, *tag, target, site.parent),
            TypeKind::Array(array) => self.array_to_native(value, array, site, target),
            TypeKind::SList(element) => self.list_to_native(value, element, false, site, target),
            TypeKind::List(element) => self.list_to_native(value, element, true, site, target),
            TypeKind::Hash { key, value: val } => {
                self.hash_to_native(value, key, val, site, target)
            }
            TypeKind::Record(record) => {
                self.record_to_native(value, record, ty.pointer, site, target)
            }
            TypeKind::Enum(ty) => {
                let numeric = scalar::enum_numeric(value, ty)?;
                scalar::int_to_native(&numeric, ty.storage, target, site.parent)
            }
            TypeKind::Object(object) => {
                let ptr = self.bridge.objects().to_native(
                    value,
                    Some(object),
                    site.optional(),
                    site.transfer != Transfer::Nothing,
                )?;
                (*target).v_pointer = ptr;
                Ok(())
            }
            TypeKind::Callback(descriptor) => {
                self.callback_to_native(value, descriptor, site, target)
            }
            TypeKind::Error => self.error_to_native(value, site, target),
        }
    }

    /// Reads the native slot at `source` as a dynamic value.
    ///
    /// # Safety
    /// `source` must hold an initialized value of `ty` at this site.
    pub(crate) unsafe fn to_dynamic(
        &mut self,
        ty: &TypeInfo,
        site: Site<'_>,
        source: *mut Argument,
    ) -> BridgeResult<Value> {
        match &ty.kind {
            TypeKind::Scalar(TypeTag::Void) => Ok(if ty.pointer {
                pointer_value((*source).v_pointer)
            } else {
                Value::Nil
            }),
            TypeKind::Scalar(TypeTag::Boolean) => {
                Ok(scalar::boolean_to_dynamic(source, site.parent))
            }
            TypeKind::Scalar(tag @ (TypeTag::Float | TypeTag::Double)) => {
                scalar::float_to_dynamic(source, *tag, site.parent)
            }
            TypeKind::Scalar(tag @ (TypeTag::Utf8 | TypeTag::Filename)) => {
                Ok(string::string_to_dynamic((*source).v_string, *tag, site.transfer))
            }
            TypeKind::Scalar(tag) => scalar::int_to_dynamic(source, *tag, site.parent),
            TypeKind::Array(array) => self.array_to_dynamic(array, site, source),
            TypeKind::SList(element) => self.list_to_dynamic(element, false, site, source),
            TypeKind::List(element) => self.list_to_dynamic(element, true, site, source),
            TypeKind::Hash { key, value } => self.hash_to_dynamic(key, value, site, source),
            TypeKind::Record(record) => {
                self.record_to_dynamic(record, ty.pointer, site, source, None)
            }
            TypeKind::Enum(ty) => {
                let value = scalar::int_to_dynamic(source, ty.storage, site.parent)?;
                Ok(scalar::enum_from_numeric(value, ty))
            }
            TypeKind::Object(_) => {
                let ptr = (*source).v_pointer;
                self.bridge
                    .objects()
                    .to_dynamic(ptr, site.transfer != Transfer::Nothing)
            }
            TypeKind::Callback(descriptor) => self.callback_to_dynamic(descriptor, site, source),
            TypeKind::Error => {
                let error = (*source).v_pointer as *mut RawError;
                Ok(error_to_dynamic(error, site.transfer))
            }
        }
    }

    /// Keeps `value` alive as long as the temporaries of this scope.
    pub(crate) fn pin(&mut self, value: &Value) {
        self.temps.push(Temporary::Pinned(value.clone()));
    }

    pub(crate) fn context(&self) -> BridgeResult<&'m ContextRef> {
        self.ctx.ok_or_else(|| {
            BridgeError::mismatch("execution context for callback", "no context")
        })
    }
}

pub(crate) fn pointer_value(ptr: *mut c_void) -> Value {
    if ptr.is_null() {
        Value::Nil
    } else {
        Value::Pointer(ptr)
    }
}

/// Wraps a native error report, releasing it when ownership was transferred.
pub(crate) unsafe fn error_to_dynamic(error: *mut RawError, transfer: Transfer) -> Value {
    if error.is_null() {
        return Value::Nil;
    }
    let value = Value::error(crate::value::ErrorValue::new(
        (*error).domain,
        (*error).code,
        RawError::message(error),
    ));
    if transfer != Transfer::Nothing {
        RawError::free(error);
    }
    value
}
