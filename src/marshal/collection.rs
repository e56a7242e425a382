// Collection Marshaling
// Linked lists and hash tables

use super::{Marshaller, Parent, Site, Temporary};
use crate::error::{BridgeError, BridgeResult};
use crate::native::hash::{HashTable, KeyMode};
use crate::native::list::{List, SList};
use crate::native::{self, Argument};
use crate::types::{Transfer, TypeInfo, TypeTag};
use crate::value::Value;
use std::ffi::c_void;
use std::mem;
use std::ptr;

fn key_mode(key: &TypeInfo) -> BridgeResult<KeyMode> {
    match key.tag() {
        Some(TypeTag::Utf8 | TypeTag::Filename) => Ok(KeyMode::Content),
        Some(TypeTag::Int64 | TypeTag::UInt64) => Ok(KeyMode::Int64),
        Some(TypeTag::Float | TypeTag::Double) => {
            Err(BridgeError::UnsupportedKey("float or double".to_string()))
        }
        _ => Ok(KeyMode::Direct),
    }
}

impl Marshaller<'_> {
    /// Builds a native list; `nil` is the empty list.
    pub(crate) unsafe fn list_to_native(
        &mut self,
        value: &Value,
        element: &TypeInfo,
        doubly: bool,
        site: Site<'_>,
        target: *mut Argument,
    ) -> BridgeResult<()> {
        let elements = match value {
            Value::Nil => Vec::new(),
            other => other
                .elements()
                .ok_or_else(|| BridgeError::mismatch("array", other.type_name()))?,
        };

        let element_site = Site::new(site.element_transfer()).parent(Parent::ForcePointer);
        let mut head: *mut c_void = ptr::null_mut();
        let release = |head: *mut c_void| {
            if doubly {
                List::free(head as *mut List);
            } else {
                SList::free(head as *mut SList);
            }
        };

        // Prepend from the back so the list keeps the array order.
        for item in elements.iter().rev() {
            let mut slot = Argument::zeroed();
            if let Err(e) = self.to_native(item, element, element_site, &mut slot) {
                release(head);
                return Err(e);
            }
            head = if doubly {
                List::prepend(head as *mut List, slot.v_pointer) as *mut c_void
            } else {
                SList::prepend(head as *mut SList, slot.v_pointer) as *mut c_void
            };
        }

        if site.transfer == Transfer::Nothing && !head.is_null() {
            self.temps.push(if doubly {
                Temporary::List(head as *mut List)
            } else {
                Temporary::SList(head as *mut SList)
            });
        }
        (*target).v_pointer = head;
        Ok(())
    }

    pub(crate) unsafe fn list_to_dynamic(
        &mut self,
        element: &TypeInfo,
        doubly: bool,
        site: Site<'_>,
        source: *mut Argument,
    ) -> BridgeResult<Value> {
        let head = (*source).v_pointer;
        let items = if doubly {
            List::items(head as *mut List)
        } else {
            SList::items(head as *mut SList)
        };
        let element_site = Site::new(site.element_transfer()).parent(Parent::ForcePointer);
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            let mut slot = Argument::pointer(item);
            values.push(self.to_dynamic(element, element_site, &mut slot)?);
        }
        if site.transfer != Transfer::Nothing {
            if doubly {
                List::free(head as *mut List);
            } else {
                SList::free(head as *mut SList);
            }
        }
        Ok(Value::array(values))
    }

    unsafe fn hash_key_to_native(
        &mut self,
        key: &Value,
        ty: &TypeInfo,
        mode: KeyMode,
        site: Site<'_>,
    ) -> BridgeResult<*mut c_void> {
        let mut slot = Argument::zeroed();
        if mode != KeyMode::Int64 {
            self.to_native(key, ty, site.parent(Parent::ForcePointer), &mut slot)?;
            return Ok(slot.v_pointer);
        }
        // 64-bit keys are hashed through a pointer to their value; the table
        // owns the box.
        self.to_native(key, ty, site, &mut slot)?;
        Ok(native::memdup(
            &slot as *const Argument as *const c_void,
            mem::size_of::<i64>(),
        ))
    }

    pub(crate) unsafe fn hash_to_native(
        &mut self,
        value: &Value,
        key: &TypeInfo,
        val: &TypeInfo,
        site: Site<'_>,
        target: *mut Argument,
    ) -> BridgeResult<()> {
        let pairs = match value {
            Value::Nil if site.optional() => {
                (*target).v_pointer = ptr::null_mut();
                return Ok(());
            }
            Value::Dictionary(pairs) => pairs.borrow().clone(),
            other => return Err(BridgeError::mismatch("dictionary", other.type_name())),
        };

        let mode = key_mode(key)?;
        let table = HashTable::new(mode);
        (*table).set_owns_keys(mode == KeyMode::Int64);
        let guard = Temporary::Hash(table);
        let element_site = Site::new(site.element_transfer());
        for (k, v) in &pairs {
            let native_key = self.hash_key_to_native(k, key, mode, element_site)?;
            let mut slot = Argument::zeroed();
            let value_site = element_site.parent(Parent::ForcePointer);
            if let Err(e) = self.to_native(v, val, value_site, &mut slot) {
                if mode == KeyMode::Int64 {
                    native::free(native_key);
                }
                return Err(e);
            }
            (*table).insert(native_key, slot.v_pointer);
        }

        if site.transfer == Transfer::Nothing {
            self.temps.push(guard);
        } else {
            mem::forget(guard);
        }
        (*target).v_pointer = table as *mut c_void;
        Ok(())
    }

    pub(crate) unsafe fn hash_to_dynamic(
        &mut self,
        key: &TypeInfo,
        val: &TypeInfo,
        site: Site<'_>,
        source: *mut Argument,
    ) -> BridgeResult<Value> {
        let table = (*source).v_pointer as *mut HashTable;
        if table.is_null() {
            return Ok(Value::Nil);
        }
        let element_site = Site::new(site.element_transfer());
        let pointer_site = element_site.parent(Parent::ForcePointer);
        let mut pairs = Vec::with_capacity((*table).len());
        for &(k, v) in (*table).entries() {
            let dynamic_key = if (*table).mode() == KeyMode::Int64 && !k.is_null() {
                self.to_dynamic(key, element_site, k as *mut Argument)?
            } else {
                let mut slot = Argument::pointer(k);
                self.to_dynamic(key, pointer_site, &mut slot)?
            };
            let mut slot = Argument::pointer(v);
            pairs.push((dynamic_key, self.to_dynamic(val, pointer_site, &mut slot)?));
        }
        if site.transfer != Transfer::Nothing {
            HashTable::destroy(table);
        }
        Ok(Value::dictionary(pairs))
    }
}
