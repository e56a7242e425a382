// Record Fields
// Field access on native records described by offset tables.

use super::{scalar, Marshaller, Site, Temporaries};
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::native::Argument;
use crate::types::{EnumType, RecordType, Transfer, TypeInfo, TypeKind, TypeTag};
use crate::value::Value;
use std::ffi::c_void;
use std::rc::Rc;

/// Type payload of a declarative field entry.
#[derive(Debug, Clone)]
pub enum FieldType {
    Type(Rc<TypeInfo>),
    Record(Rc<RecordType>),
    Enum { ty: Rc<EnumType>, storage: TypeTag },
}

#[derive(Debug, Clone)]
pub enum FieldSpec {
    Typed {
        name: String,
        offset: usize,
        ty: Rc<TypeInfo>,
        writable: bool,
    },
    /// Nested record, stored by pointer or embedded inline.
    Record {
        name: String,
        offset: usize,
        ty: Rc<RecordType>,
        inline: bool,
    },
    /// Enumeration kept in an integer of width `storage`.
    Enum {
        name: String,
        offset: usize,
        storage: TypeTag,
        ty: Rc<EnumType>,
    },
}

impl FieldSpec {
    /// Builds a field from its numeric kind: 0 typed, 1 record pointer,
    /// 2 inline record, 3 enum.
    pub fn from_kind(
        name: impl Into<String>,
        offset: usize,
        kind: i64,
        ty: FieldType,
    ) -> BridgeResult<Self> {
        let name = name.into();
        let spec = match (kind, ty) {
            (0, FieldType::Type(ty)) => FieldSpec::Typed {
                name,
                offset,
                ty,
                writable: true,
            },
            (1 | 2, FieldType::Record(ty)) => FieldSpec::Record {
                name,
                offset,
                ty,
                inline: kind == 2,
            },
            (3, FieldType::Enum { ty, storage }) => FieldSpec::Enum {
                name,
                offset,
                storage,
                ty,
            },
            (kind, _) => return Err(BridgeError::BadFieldKind(kind)),
        };
        Ok(spec)
    }

    pub fn read_only(self) -> Self {
        match self {
            FieldSpec::Typed {
                name, offset, ty, ..
            } => FieldSpec::Typed {
                name,
                offset,
                ty,
                writable: false,
            },
            other => other,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FieldSpec::Typed { name, .. }
            | FieldSpec::Record { name, .. }
            | FieldSpec::Enum { name, .. } => name,
        }
    }

    fn offset(&self) -> usize {
        match self {
            FieldSpec::Typed { offset, .. }
            | FieldSpec::Record { offset, .. }
            | FieldSpec::Enum { offset, .. } => *offset,
        }
    }

    /// Reads the field of the record at `base`; `parent` keeps inline records alive.
    ///
    /// # Safety
    /// `base` must point to a live record that contains this field.
    pub unsafe fn get(
        &self,
        bridge: &Bridge,
        base: *mut c_void,
        parent: Option<&Value>,
    ) -> BridgeResult<Value> {
        let addr = (base as *mut u8).add(self.offset()) as *mut Argument;
        match self {
            FieldSpec::Typed { ty, .. } => {
                let mut temps = Temporaries::default();
                let mut m = Marshaller::new(bridge, None, &mut temps);
                match &ty.kind {
                    TypeKind::Record(record) if !ty.pointer => {
                        let site = Site::new(Transfer::Nothing);
                        m.record_to_dynamic(record, false, site, addr, parent)
                    }
                    _ => m.to_dynamic(ty, Site::new(Transfer::Nothing), addr),
                }
            }
            FieldSpec::Record { ty, inline, .. } => {
                if *inline {
                    bridge.records().to_dynamic(ty, addr as *mut c_void, false, parent)
                } else {
                    bridge.records().to_dynamic(ty, (*addr).v_pointer, false, None)
                }
            }
            FieldSpec::Enum { storage, ty, .. } => {
                let numeric = scalar::int_to_dynamic(addr, *storage, super::Parent::None)?;
                Ok(scalar::enum_from_numeric(numeric, ty))
            }
        }
    }

    /// Stores `value` into the field of the record at `base`.
    ///
    /// # Safety
    /// `base` must point to a live, writable record that contains this field.
    pub unsafe fn set(
        &self,
        bridge: &Bridge,
        base: *mut c_void,
        value: &Value,
    ) -> BridgeResult<()> {
        let addr = (base as *mut u8).add(self.offset()) as *mut Argument;
        match self {
            FieldSpec::Typed {
                name, ty, writable, ..
            } => {
                if !writable {
                    return Err(BridgeError::ReadOnlyField(name.clone()));
                }
                let mut temps = Temporaries::default();
                let mut m = Marshaller::new(bridge, None, &mut temps);
                m.to_native(value, ty, Site::new(Transfer::Everything), addr)
            }
            FieldSpec::Record { ty, inline, .. } => bridge.records().to_native(
                value,
                ty,
                addr as *mut c_void,
                *inline,
                !*inline,
                false,
            ),
            FieldSpec::Enum { storage, ty, .. } => {
                let numeric = scalar::enum_numeric(value, ty)?;
                scalar::int_to_native(&numeric, *storage, addr, super::Parent::None)
            }
        }
    }
}
