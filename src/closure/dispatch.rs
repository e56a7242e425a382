// Closure Dispatch
// Runs a bound target when native code enters a trampoline slot

use super::{ClosureBlock, Slot};
use crate::callable::{Callable, Param, ParamKind};
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::{element_size, Frame, Marshaller, Parent, Temporaries};
use crate::native::error::{quark_from_str, RawError, CALLBACK_ERROR_DOMAIN};
use crate::native::Argument;
use crate::runtime::{ContextRef, ContextStatus, DispatchTarget, Resume};
use crate::types::{Direction, TypeKind};
use crate::value::Value;
use libffi::low::ffi_cif;
use libffi::raw::ffi_sarg;
use smallvec::SmallVec;
use std::ffi::{c_int, c_void};
use std::{mem, ptr};
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, warn};

/// Entry point libffi jumps to from every bound slot.
pub(crate) unsafe extern "C" fn trampoline(
    _cif: &ffi_cif,
    result: &mut Argument,
    args: *const *const c_void,
    slot: &Slot,
) {
    let result: *mut Argument = result;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatch(slot, result, args)));
    if outcome.is_err() {
        error!("panic while dispatching a closure, returning zero");
        *result = Argument::zeroed();
    }
}

struct Active<'a>(&'a ClosureBlock);

impl<'a> Active<'a> {
    fn enter(block: &'a ClosureBlock) -> Self {
        block.active.set(block.active.get() + 1);
        Active(block)
    }
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        let block = self.0;
        block.active.set(block.active.get() - 1);
        if block.active.get() == 0 && block.doomed.get() {
            block.bridge.defer_release(block.handle());
        }
    }
}

enum Outcome {
    Success(Vec<Value>),
    Failure(Value),
    /// Raised into the hosting context instead of being reported here.
    Escalated,
}

/// Raw argument `index` as laid out by the native caller.
unsafe fn raw_arg(args: *const *const c_void, index: usize) -> *mut Argument {
    *args.add(index) as *mut Argument
}

unsafe fn dispatch(slot: &Slot, result: *mut Argument, args: *const *const c_void) {
    let block = &*slot.block;
    let _lock = block.lock.scoped();

    let Some(binding) = slot.binding.borrow().clone() else {
        warn!("closure slot entered before it was bound");
        *result = Argument::zeroed();
        return;
    };
    let _active = Active::enter(block);
    let callable = &binding.callable;

    let ctx = {
        let current = block.context.borrow().clone();
        match binding.target {
            DispatchTarget::Direct(_) if current.status() == ContextStatus::Suspended => {
                // Resuming the suspended context here could re-enter it.
                let fresh = current.spawn();
                *block.context.borrow_mut() = fresh.clone();
                fresh
            }
            _ => current,
        }
    };

    let base = callable.has_self as usize;
    let slots: SmallVec<[*mut Argument; 8]> = callable
        .params
        .iter()
        .enumerate()
        .map(|(i, param)| {
            let arg = raw_arg(args, i + base);
            if param.dir == Direction::In {
                arg
            } else {
                (*arg).v_pointer as *mut Argument
            }
        })
        .collect();
    let frame = Frame::new(&callable.params, slots);

    let mut temps = Temporaries::default();
    let inputs = {
        let mut m = Marshaller::new(&block.bridge, Some(&ctx), &mut temps);
        marshal_inputs(&mut m, callable, args, &frame)
    };
    let outcome = match inputs {
        Ok(inputs) => call_target(block, callable, &binding.target, &ctx, inputs),
        Err(e) => Outcome::Failure(Value::string(e.to_string())),
    };

    match outcome {
        Outcome::Success(values) => {
            let mut out = Temporaries::default();
            let marshaled = {
                let mut m = Marshaller::new(&block.bridge, Some(&ctx), &mut out);
                marshal_results(&mut m, callable, result, &frame, values)
            };
            if let Err(e) = marshaled {
                clear_results(callable, result, &frame);
                if callable.throws {
                    report_error(callable, args, &Value::string(e.to_string()));
                } else {
                    warn!(
                        callable = %callable,
                        error = %e,
                        "failed to marshal closure results"
                    );
                }
            }
            if !out.is_empty() {
                warn!(
                    callable = %callable,
                    count = out.len(),
                    "closure returned values with transfer none, keeping them alive"
                );
                block.keepalive.borrow_mut().append(&mut out);
            }
        }
        Outcome::Failure(err) => {
            clear_results(callable, result, &frame);
            if callable.throws {
                report_error(callable, args, &err);
            } else {
                warn!(
                    callable = %callable,
                    error = %err,
                    "error raised while calling closure target"
                );
            }
        }
        Outcome::Escalated => clear_results(callable, result, &frame),
    }
    drop(temps);

    if binding.autodestroy {
        block.bridge.defer_release(block.handle());
    }
}

/// Runs the target.
fn call_target(
    block: &ClosureBlock,
    callable: &Callable,
    target: &DispatchTarget,
    ctx: &ContextRef,
    inputs: Vec<Value>,
) -> Outcome {
    match target {
        DispatchTarget::Direct(Value::Callable(native)) => {
            match block.bridge.invoke(ctx, native, inputs) {
                Ok(values) => Outcome::Success(values),
                Err(e) => Outcome::Failure(Value::string(e.to_string())),
            }
        }
        DispatchTarget::Direct(value) => match ctx.call(value, inputs) {
            Ok(values) => Outcome::Success(values),
            Err(err) => Outcome::Failure(err),
        },
        DispatchTarget::Resumable(co) => match co.resume(inputs) {
            Resume::Yielded(values) | Resume::Returned(values) => Outcome::Success(values),
            Resume::Failed(err) if callable.throws => Outcome::Failure(err),
            Resume::Failed(err) => {
                block.context.borrow().raise(err);
                Outcome::Escalated
            }
        },
    }
}

unsafe fn marshal_inputs(
    m: &mut Marshaller<'_>,
    callable: &Callable,
    args: *const *const c_void,
    frame: &Frame<'_>,
) -> BridgeResult<Vec<Value>> {
    let mut values = Vec::with_capacity(callable.exposed_inputs());
    if callable.has_self {
        values.push(m.receiver_to_dynamic(callable, raw_arg(args, 0))?);
    }
    let base = callable.has_self as usize;
    for (i, param) in callable.params.iter().enumerate() {
        if param.internal || param.dir == Direction::Out {
            continue;
        }
        if callable.closure_marshal && i == 3 {
            values.push(closure_marshal_values(m, param.ty.as_deref(), args, base)?);
            continue;
        }
        let value = match frame.slot(i) {
            Some(source) => m.param_to_dynamic(callable, param, source, Parent::None, Some(frame))?,
            None => Value::Nil,
        };
        values.push(value);
    }
    Ok(values)
}

/// The fourth argument of a closure marshaller is an array of values sized
/// by the third one.
unsafe fn closure_marshal_values(
    m: &mut Marshaller<'_>,
    ty: Option<&crate::types::TypeInfo>,
    args: *const *const c_void,
    base: usize,
) -> BridgeResult<Value> {
    let record = match ty.map(|ty| &ty.kind) {
        Some(TypeKind::Record(record)) => record.clone(),
        _ => {
            return Err(BridgeError::BadTypeInfo(
                "closure marshal values must be records".to_string(),
            ))
        }
    };
    let count = (*raw_arg(args, base + 2)).v_uint32 as usize;
    let first = (*raw_arg(args, base + 3)).v_pointer as *mut u8;
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let item = first.add(i * record.size) as *mut c_void;
        values.push(m.bridge.records().to_dynamic(&record, item, false, None)?);
    }
    Ok(Value::array(values))
}

unsafe fn marshal_results(
    m: &mut Marshaller<'_>,
    callable: &Callable,
    result: *mut Argument,
    frame: &Frame<'_>,
    values: Vec<Value>,
) -> BridgeResult<()> {
    let first_is_set = values.first().map_or(false, |v| !v.is_nil());
    let mut values = values.into_iter();

    if !callable.retval.is_void() {
        if callable.ignore_retval {
            (*result).ffi_sarg = first_is_set as ffi_sarg;
        } else {
            let value = values.next().unwrap_or(Value::Nil);
            m.param_to_native(
                callable,
                &callable.retval,
                &value,
                result,
                Parent::ReturnValue,
                Some(frame),
            )?;
        }
    }

    for (i, param) in callable.params.iter().enumerate() {
        if param.internal || param.dir == Direction::In {
            continue;
        }
        let value = values.next().unwrap_or(Value::Nil);
        let Some(target) = frame.slot(i) else {
            continue;
        };
        let caller_alloc = param.caller_allocates
            && param
                .ty
                .as_ref()
                .map_or(false, |ty| matches!(ty.kind, TypeKind::Record(_)));
        let parent = if caller_alloc {
            Parent::CallerAlloc
        } else {
            Parent::None
        };
        m.param_to_native(callable, param, &value, target, parent, Some(frame))
            .map_err(|e| e.at_argument(i + 1, callable.name()))?;
    }
    Ok(())
}

/// Bytes native code reserved for out parameter `param`.
fn out_size(callable: &Callable, param: &Param) -> usize {
    let pointer = mem::size_of::<*mut c_void>();
    match (param.kind, &param.ty) {
        (ParamKind::Record(index), _) if param.caller_allocates => {
            callable.record_extra(index).map_or(0, |record| record.size)
        }
        (ParamKind::Record(_), _) => pointer,
        (ParamKind::Enum(_), None) => mem::size_of::<c_int>(),
        (_, Some(ty)) => match &ty.kind {
            TypeKind::Record(_) if !param.caller_allocates => pointer,
            TypeKind::Array(_) if param.caller_allocates => 0,
            _ => element_size(ty, false),
        },
        (ParamKind::Typed, None) => 0,
    }
}

/// Zeroes the return value and every out slot after a caught failure, so
/// native code never reads what the failed dispatch left behind.
unsafe fn clear_results(callable: &Callable, result: *mut Argument, frame: &Frame<'_>) {
    *result = Argument::zeroed();
    for (i, param) in callable.params.iter().enumerate() {
        if param.internal || param.dir == Direction::In {
            continue;
        }
        if let Some(target) = frame.slot(i) {
            ptr::write_bytes(target as *mut u8, 0, out_size(callable, param));
        }
    }
}

/// Stores `err` into the native error slot.
unsafe fn report_error(callable: &Callable, args: *const *const c_void, err: &Value) {
    let index = callable.has_self as usize + callable.params.len();
    let slot = (*raw_arg(args, index)).v_pointer as *mut *mut RawError;
    if !slot.is_null() {
        *slot = match err {
            Value::Error(e) => RawError::new(e.domain, e.code, &e.message),
            other => RawError::new(quark_from_str(CALLBACK_ERROR_DOMAIN), 1, &other.to_string()),
        };
    }
}
