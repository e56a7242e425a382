// Interface Marshaling
// Records, objects, callbacks and errors

use super::{Marshaller, Parent, Site, Temporary};
use crate::closure::{self, BlockHandle};
use crate::error::{BridgeError, BridgeResult};
use crate::native::error::RawError;
use crate::native::Argument;
use crate::types::{CallableDescriptor, RecordType, Scope, Transfer};
use crate::value::Value;
use std::ffi::c_void;
use std::ptr;
use std::rc::Rc;

impl Marshaller<'_> {
    pub(crate) unsafe fn record_to_native(
        &mut self,
        value: &Value,
        ty: &RecordType,
        pointer: bool,
        site: Site<'_>,
        target: *mut Argument,
    ) -> BridgeResult<()> {
        let by_value = site.parent != Parent::ForcePointer
            && ((!pointer && site.arg.is_none()) || site.parent == Parent::CallerAlloc);
        self.bridge.records().to_native(
            value,
            ty,
            target as *mut c_void,
            by_value,
            site.transfer != Transfer::Nothing,
            site.optional(),
        )
    }

    pub(crate) unsafe fn record_to_dynamic(
        &mut self,
        ty: &RecordType,
        pointer: bool,
        site: Site<'_>,
        source: *mut Argument,
        parent: Option<&Value>,
    ) -> BridgeResult<Value> {
        let by_ref = site.parent == Parent::ForcePointer || pointer;
        let (ptr, parent) = if by_ref {
            ((*source).v_pointer, None)
        } else {
            (source as *mut c_void, parent)
        };
        self.bridge
            .records()
            .to_dynamic(ty, ptr, site.transfer == Transfer::Everything, parent)
    }

    /// Hands a dynamic callable to native code as a trampoline entry point.
    pub(crate) unsafe fn callback_to_native(
        &mut self,
        value: &Value,
        descriptor: &Rc<dyn CallableDescriptor>,
        site: Site<'_>,
        target: *mut Argument,
    ) -> BridgeResult<()> {
        let destroy_slot = site
            .arg
            .and_then(|a| a.destroy)
            .and_then(|i| site.frame.and_then(|f| f.slot(i)));

        match value {
            Value::Nil if site.optional() => {
                (*target).v_pointer = ptr::null_mut();
                if let Some(slot) = destroy_slot {
                    (*slot).v_pointer = ptr::null_mut();
                }
                return Ok(());
            }
            Value::Pointer(p) => {
                (*target).v_pointer = *p;
                return Ok(());
            }
            Value::Function(_) | Value::Coroutine(_) | Value::Callable(_) => {}
            other => return Err(BridgeError::mismatch("function", other.type_name())),
        }

        let scope = site.arg.and_then(|a| a.scope).unwrap_or(Scope::Call);
        let user_data_slot = site
            .arg
            .and_then(|a| a.closure)
            .and_then(|i| site.frame.and_then(|f| f.slot(i)));
        let preallocated = user_data_slot
            .and_then(|slot| BlockHandle::from_user_data((*slot).v_pointer))
            .filter(|block| self.bridge.is_live(*block));

        let block = match preallocated {
            Some(block) => {
                if let Some(slot) = destroy_slot {
                    (*slot).v_pointer = closure::destroy_notify as *mut c_void;
                }
                block
            }
            None => {
                let block = closure::allocate(self.bridge, self.context()?, 1)?;
                if scope == Scope::Call {
                    self.temps.push(Temporary::Closure(self.bridge.clone(), block));
                }
                block
            }
        };

        let callable = self.bridge.build_callable(descriptor, None)?;
        let autodestroy = scope == Scope::Async;
        let entry = closure::bind(self.bridge, block, &callable, value.clone(), autodestroy)?;
        (*target).v_pointer = entry;
        Ok(())
    }

    pub(crate) unsafe fn callback_to_dynamic(
        &mut self,
        descriptor: &Rc<dyn CallableDescriptor>,
        site: Site<'_>,
        source: *mut Argument,
    ) -> BridgeResult<Value> {
        let address = (*source).v_pointer;
        if address.is_null() {
            return Ok(Value::Nil);
        }
        let callable = self.bridge.build_callable(descriptor, Some(address))?;
        let user_data = site
            .arg
            .and_then(|a| a.closure)
            .and_then(|i| site.frame.and_then(|f| f.slot(i)));
        if let Some(slot) = user_data {
            callable.set_user_data((*slot).v_pointer);
        }
        Ok(Value::Callable(callable))
    }

    pub(crate) unsafe fn error_to_native(
        &mut self,
        value: &Value,
        site: Site<'_>,
        target: *mut Argument,
    ) -> BridgeResult<()> {
        let error = match value {
            Value::Nil if site.optional() => ptr::null_mut(),
            Value::Error(e) => RawError::new(e.domain, e.code, &e.message),
            other => return Err(BridgeError::mismatch("error", other.type_name())),
        };
        if !error.is_null() && site.transfer == Transfer::Nothing {
            self.temps.push(Temporary::Error(error));
        }
        (*target).v_pointer = error as *mut c_void;
        Ok(())
    }
}
