// Parameter Marshaling
// Per-parameter conversion honoring direction and allocation

use super::{pointer_value, Frame, Marshaller, Parent, Site};
use crate::callable::{Callable, Param, ParamKind};
use crate::error::{BridgeError, BridgeResult};
use crate::native::array::NativeArray;
use crate::native::Argument;
use crate::types::{ArrayKind, ArrayType, Receiver, Transfer, TypeInfo, TypeKind, TypeTag};
use crate::value::Value;
use std::ffi::c_void;
use std::ptr;

/// Storage pre-allocated for an out argument the callee fills in place.
pub(crate) enum CallerAlloc {
    /// Record wrapper owning the storage.
    Record(Value),
    /// Fixed-size C array, converted after the call.
    Array(*mut NativeArray, ArrayType),
}

impl Drop for CallerAlloc {
    fn drop(&mut self) {
        if let CallerAlloc::Array(array, _) = self {
            if !array.is_null() {
                // SAFETY: the array is still owned by this allocation.
                unsafe { NativeArray::unref(*array) };
            }
        }
    }
}

impl Marshaller<'_> {
    fn param_site<'s>(param: &'s Param, parent: Parent, frame: Option<&'s Frame<'s>>) -> Site<'s> {
        Site::new(param.transfer)
            .arg(param.arg.as_ref())
            .parent(parent)
            .frame(frame)
    }

    /// Converts the dynamic value of one parameter into its native slot.
    pub(crate) unsafe fn param_to_native(
        &mut self,
        callable: &Callable,
        param: &Param,
        value: &Value,
        target: *mut Argument,
        parent: Parent,
        frame: Option<&Frame<'_>>,
    ) -> BridgeResult<()> {
        let site = Self::param_site(param, parent, frame);
        match param.kind {
            ParamKind::Record(index) => {
                let record = callable.record_extra(index)?.clone();
                self.record_to_native(value, &record, true, site, target)
            }
            ParamKind::Enum(index) => {
                let numeric = super::scalar::enum_numeric(value, callable.enum_extra(index)?)?;
                let storage = param.tag().unwrap_or(TypeTag::Int32);
                super::scalar::int_to_native(&numeric, storage, target, parent)
            }
            ParamKind::Typed => match &param.ty {
                Some(ty) => self.to_native(value, ty, site, target),
                None => Ok(()),
            },
        }
    }

    pub(crate) unsafe fn param_to_dynamic(
        &mut self,
        callable: &Callable,
        param: &Param,
        source: *mut Argument,
        parent: Parent,
        frame: Option<&Frame<'_>>,
    ) -> BridgeResult<Value> {
        let site = Self::param_site(param, parent, frame);
        match param.kind {
            ParamKind::Record(index) => {
                let record = callable.record_extra(index)?.clone();
                self.record_to_dynamic(&record, true, site, source, None)
            }
            ParamKind::Enum(index) => {
                let storage = param.tag().unwrap_or(TypeTag::Int32);
                let numeric = super::scalar::int_to_dynamic(source, storage, parent)?;
                Ok(super::scalar::enum_from_numeric(numeric, callable.enum_extra(index)?))
            }
            ParamKind::Typed => match &param.ty {
                Some(ty) => self.to_dynamic(ty, site, source),
                None => Ok(Value::Nil),
            },
        }
    }

    /// Writes the implicit receiver of a method or signal.
    pub(crate) unsafe fn receiver_to_native(
        &mut self,
        callable: &Callable,
        value: &Value,
        target: *mut Argument,
    ) -> BridgeResult<()> {
        match &callable.receiver {
            Some(Receiver::Object(object)) => {
                (*target).v_pointer =
                    self.bridge
                        .objects()
                        .to_native(value, Some(object), false, false)?;
                Ok(())
            }
            Some(Receiver::Record(record)) => self.bridge.records().to_native(
                value,
                record,
                target as *mut c_void,
                false,
                false,
                false,
            ),
            None => self.pointer_to_native(value, Site::new(Transfer::Nothing), target),
        }
    }

    pub(crate) unsafe fn receiver_to_dynamic(
        &mut self,
        callable: &Callable,
        source: *mut Argument,
    ) -> BridgeResult<Value> {
        let ptr = (*source).v_pointer;
        match &callable.receiver {
            Some(Receiver::Object(_)) => self.bridge.objects().to_dynamic(ptr, false),
            Some(Receiver::Record(record)) => {
                self.bridge.records().to_dynamic(record, ptr, false, None)
            }
            None => Ok(pointer_value(ptr)),
        }
    }

    /// Allocates storage for a caller-allocates out argument.
    ///
    /// Returns `None` for types the callee allocates itself.
    pub(crate) fn caller_alloc(
        &mut self,
        ty: &TypeInfo,
    ) -> BridgeResult<Option<(CallerAlloc, *mut c_void)>> {
        match &ty.kind {
            TypeKind::Record(record) => {
                let (value, ptr) = self.bridge.records().allocate(record)?;
                Ok(Some((CallerAlloc::Record(value), ptr)))
            }
            TypeKind::Array(array) if array.kind == ArrayKind::C => {
                let size = array.fixed_size.filter(|&n| n > 0).ok_or_else(|| {
                    BridgeError::BadTypeInfo(
                        "caller-allocated arrays need a fixed size".to_string(),
                    )
                })?;
                let esize = super::array::element_size(&array.element, false);
                let native = NativeArray::new(false, esize, size);
                // SAFETY: freshly created array.
                let data = unsafe {
                    NativeArray::set_size(native, size);
                    (*native).data as *mut c_void
                };
                let boxed = ArrayType {
                    kind: ArrayKind::Array,
                    ..array.clone()
                };
                Ok(Some((CallerAlloc::Array(native, boxed), data)))
            }
            _ => Ok(None),
        }
    }

    /// Produces the dynamic value of a filled caller-allocated argument.
    pub(crate) unsafe fn caller_alloc_to_dynamic(
        &mut self,
        alloc: &mut CallerAlloc,
    ) -> BridgeResult<Value> {
        match alloc {
            CallerAlloc::Record(value) => Ok(value.clone()),
            CallerAlloc::Array(array, ty) => {
                let mut slot = Argument::pointer(*array as *mut c_void);
                *array = ptr::null_mut();
                self.array_to_dynamic(ty, Site::new(Transfer::Everything), &mut slot)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::callable::{CallableDecl, ParamDecl, ParamShape};
    use crate::marshal::Temporaries;
    use crate::types::EnumType;

    #[test]
    fn test_declared_enum_param() {
        let bridge = Bridge::new();
        let mode = EnumType::new("Mode", TypeTag::Int32, &[("fast", 1), ("slow", 2)]);
        let decl = CallableDecl::new("demo").arg(ParamDecl::new(ParamShape::Enum {
            ty: mode,
            storage: None,
        }));
        let callable = bridge.declare_callable(&decl).unwrap();
        let param = callable.param(0).unwrap();
        let mut temps = Temporaries::default();
        let mut m = Marshaller::new(&bridge, None, &mut temps);
        let mut arg = Argument::zeroed();
        unsafe {
            m.param_to_native(&callable, param, &Value::from("slow"), &mut arg, Parent::None, None)
                .unwrap();
            assert_eq!(arg.v_int32, 2);
            let back = m
                .param_to_dynamic(&callable, param, &mut arg, Parent::None, None)
                .unwrap();
            assert_eq!(back, Value::from("slow"));
        }
    }

    #[test]
    fn test_caller_allocated_fixed_array() {
        let bridge = Bridge::new();
        let mut temps = Temporaries::default();
        let mut m = Marshaller::new(&bridge, None, &mut temps);
        let ty = TypeInfo::array(ArrayKind::C, TypeInfo::scalar(TypeTag::Int16))
            .fixed_size(2)
            .build();
        let (mut alloc, data) = m.caller_alloc(&ty).unwrap().unwrap();
        unsafe {
            *(data as *mut i16).add(1) = 9;
            let value = m.caller_alloc_to_dynamic(&mut alloc).unwrap();
            assert_eq!(value, Value::array(vec![Value::Integer(0), Value::Integer(9)]));
        }
        assert!(m.caller_alloc(&TypeInfo::scalar(TypeTag::Int32)).unwrap().is_none());
    }
}
