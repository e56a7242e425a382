// Argument Cells
// Standalone native slots for a single typed value

use super::{Marshaller, Site, Temporaries};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::native::{self, Argument};
use crate::types::{Transfer, TypeInfo, TypeKind, TypeTag};
use crate::value::Value;
use std::ffi::c_void;
use std::mem;

/// Size and alignment of a value of `ty` stored inline.
pub fn type_layout(ty: &TypeInfo) -> BridgeResult<(usize, usize)> {
    if ty.pointer {
        return Ok((mem::size_of::<*mut c_void>(), mem::align_of::<*mut c_void>()));
    }
    match &ty.kind {
        TypeKind::Scalar(TypeTag::Void) => {
            Err(BridgeError::BadTypeInfo("void has no layout".to_string()))
        }
        TypeKind::Scalar(tag) => Ok((native::scalar_size(*tag), native::scalar_align(*tag))),
        TypeKind::Enum(e) => Ok((native::scalar_size(e.storage), native::scalar_align(e.storage))),
        _ => Err(BridgeError::BadTypeInfo(format!(
            "no inline layout for {}",
            ty.name()
        ))),
    }
}

/// Standalone native slot, written and read under explicit types.
///
/// Memory produced by the last write stays alive until the next write or
/// until the cell is dropped.
pub struct ArgumentCell {
    slot: Box<Argument>,
    temps: Temporaries,
}

impl ArgumentCell {
    pub fn new() -> Self {
        Self {
            slot: Box::new(Argument::zeroed()),
            temps: Temporaries::default(),
        }
    }

    pub fn set(
        &mut self,
        bridge: &Bridge,
        value: &Value,
        ty: &TypeInfo,
        transfer: Transfer,
    ) -> BridgeResult<()> {
        self.temps = Temporaries::default();
        *self.slot = Argument::zeroed();
        let target: *mut Argument = &mut *self.slot;
        let mut m = Marshaller::new(bridge, None, &mut self.temps);
        // SAFETY: the slot is a full argument-sized allocation.
        unsafe { m.to_native(value, ty, Site::new(transfer), target) }
    }

    pub fn get(
        &mut self,
        bridge: &Bridge,
        ty: &TypeInfo,
        transfer: Transfer,
    ) -> BridgeResult<Value> {
        let source: *mut Argument = &mut *self.slot;
        let mut temps = Temporaries::default();
        let mut m = Marshaller::new(bridge, None, &mut temps);
        // SAFETY: see `set`; reading an unset slot yields zero.
        unsafe { m.to_dynamic(ty, Site::new(transfer), source) }
    }

    pub fn as_ptr(&mut self) -> *mut Argument {
        &mut *self.slot
    }
}

impl Default for ArgumentCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EnumType;

    #[test]
    fn test_layouts() {
        assert_eq!(type_layout(&TypeInfo::scalar(TypeTag::Int16)).unwrap(), (2, 2));
        assert_eq!(type_layout(&TypeInfo::scalar(TypeTag::Utf8)).unwrap(), (8, 8));
        let e = EnumType::new("Demo.E", TypeTag::UInt8, &[]);
        assert_eq!(type_layout(&TypeInfo::enumeration(e)).unwrap(), (1, 1));
        assert!(type_layout(&TypeInfo::scalar(TypeTag::Void)).is_err());
    }

    #[test]
    fn test_cell_write_then_read() {
        let bridge = Bridge::new();
        let mut cell = ArgumentCell::new();
        let ty = TypeInfo::scalar(TypeTag::UInt8);
        cell.set(&bridge, &Value::Integer(200), &ty, Transfer::Nothing).unwrap();
        assert_eq!(cell.get(&bridge, &ty, Transfer::Nothing).unwrap(), Value::Integer(200));
        assert!(cell.set(&bridge, &Value::Integer(256), &ty, Transfer::Nothing).is_err());
    }

    #[test]
    fn test_cell_keeps_string_alive() {
        let bridge = Bridge::new();
        let mut cell = ArgumentCell::new();
        let ty = TypeInfo::scalar(TypeTag::Utf8);
        cell.set(&bridge, &Value::from("cell"), &ty, Transfer::Nothing).unwrap();
        assert_eq!(cell.get(&bridge, &ty, Transfer::Nothing).unwrap(), Value::from("cell"));
        assert!(!unsafe { (*cell.as_ptr()).v_pointer }.is_null());
    }
}
