// Callable Invocation
// Calls into native code through a built callable.

use super::Callable;
use crate::bridge::Bridge;
use crate::closure::BlockHandle;
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::{
    error_to_dynamic, CallerAlloc, Frame, Marshaller, Parent, Temporaries, Temporary,
};
use crate::native::error::RawError;
use crate::native::Argument;
use crate::runtime::ContextRef;
use crate::types::{Direction, Transfer};
use crate::value::Value;
use libffi::middle::CodePtr;
use libffi::raw;
use smallvec::{smallvec, SmallVec};
use std::ffi::{c_int, c_void};
use std::ptr;

/// Per-call native storage. Out arguments reach the callee through a
/// redirect entry pointing back at their storage slot.
struct CallFrame {
    storage: Vec<Argument>,
    redirect: SmallVec<[*mut c_void; 8]>,
    ffi_args: SmallVec<[*mut c_void; 8]>,
}

impl CallFrame {
    fn new(callable: &Callable) -> Self {
        let nargs = callable.params.len() + callable.has_self as usize;
        let total = nargs + callable.throws as usize;
        Self {
            storage: vec![Argument::zeroed(); nargs],
            redirect: smallvec![ptr::null_mut(); total],
            ffi_args: smallvec![ptr::null_mut(); total],
        }
    }

    fn slot(&mut self, index: usize) -> *mut Argument {
        // SAFETY: callers stay within the argument count.
        unsafe { self.storage.as_mut_ptr().add(index) }
    }

    /// Points the native argument list at storage, directly or through a redirect.
    fn wire(&mut self, index: usize, by_reference: bool) {
        let slot = self.slot(index) as *mut c_void;
        if by_reference {
            self.redirect[index] = slot;
            self.ffi_args[index] = &mut self.redirect[index] as *mut *mut c_void as *mut c_void;
        } else {
            self.ffi_args[index] = slot;
        }
    }
}

/// Invokes `callable` with dynamic `args`, returning its dynamic results.
pub(crate) fn call(
    bridge: &Bridge,
    ctx: &ContextRef,
    callable: &Callable,
    args: Vec<Value>,
) -> BridgeResult<Vec<Value>> {
    let expected = callable.exposed_inputs();
    if args.len() > expected {
        return Err(BridgeError::TooManyArguments {
            callable: callable.name().to_string(),
            expected,
            got: args.len(),
        });
    }
    if callable.address().is_null() {
        return Err(BridgeError::NoAddress(callable.name().to_string()));
    }

    let lock = ctx.state_lock();
    let _guard = lock.scoped();

    let base = callable.has_self as usize;
    let mut call = CallFrame::new(callable);
    if callable.has_self {
        call.wire(0, false);
    }
    for (i, param) in callable.params.iter().enumerate() {
        call.wire(i + base, param.dir != Direction::In);
    }
    let slots: SmallVec<[*mut Argument; 8]> =
        (0..callable.params.len()).map(|i| call.slot(i + base)).collect();
    let frame = Frame::new(&callable.params, slots);

    let mut temps = Temporaries::default();
    let mut pending: Vec<BlockHandle> = Vec::new();
    let mut caller_allocs: Vec<(usize, CallerAlloc)> = Vec::new();

    let prepared = prepare_blocks(bridge, ctx, callable, &mut call, &mut temps, &mut pending)
        .and_then(|()| {
            let mut m = Marshaller::new(bridge, Some(ctx), &mut temps);
            // SAFETY: every slot written below belongs to `call`.
            unsafe { marshal_inputs(&mut m, callable, args, &mut call, &frame, &mut caller_allocs) }
        });
    if let Err(e) = prepared {
        for block in pending {
            bridge.destroy_closure_block(block);
        }
        return Err(e);
    }

    let mut error: *mut RawError = ptr::null_mut();
    if callable.throws {
        let index = call.storage.len();
        call.redirect[index] = &mut error as *mut *mut RawError as *mut c_void;
        call.ffi_args[index] = &mut call.redirect[index] as *mut *mut c_void as *mut c_void;
    }

    let mut retval = Argument::zeroed();
    let code = CodePtr::from_ptr(callable.address() as *const c_void);
    let ffi_args = call.ffi_args.as_mut_ptr();
    lock.released(|| {
        // SAFETY: the cif describes the callee and every argument slot is wired.
        unsafe {
            raw::ffi_call(
                callable.cif.as_raw_ptr(),
                Some(*code.as_fun()),
                &mut retval as *mut Argument as *mut c_void,
                ffi_args,
            )
        }
    });
    drop(temps);

    let mut out = Temporaries::default();
    let mut m = Marshaller::new(bridge, Some(ctx), &mut out);
    let mut results = Vec::new();
    let retp: *mut Argument = &mut retval;

    // SAFETY: the callee filled the return slot and the out storage.
    unsafe {
        if callable.ignore_retval {
            (*retp).v_boolean = (*retp).ffi_sarg as c_int;
        } else if !callable.retval.is_void() {
            results.push(m.param_to_dynamic(
                callable,
                &callable.retval,
                retp,
                Parent::ReturnValue,
                Some(&frame),
            )?);
        }

        if !error.is_null() {
            if results.is_empty() {
                results.push(Value::Boolean(false));
            }
            results.push(error_to_dynamic(error, Transfer::Everything));
            return Ok(results);
        }

        let succeeded = !callable.ignore_retval || (*retp).v_boolean != 0;
        let mut allocs = caller_allocs.into_iter().peekable();
        for (i, param) in callable.params.iter().enumerate() {
            if param.internal || param.dir == Direction::In {
                continue;
            }
            let value = match allocs.next_if(|(index, _)| *index == i) {
                Some((_, mut alloc)) => m.caller_alloc_to_dynamic(&mut alloc)?,
                None => m.param_to_dynamic(
                    callable,
                    param,
                    call.slot(i + base),
                    Parent::None,
                    Some(&frame),
                )?,
            };
            results.push(if succeeded { value } else { Value::Nil });
        }
    }

    if results.is_empty() && callable.throws {
        results.push(Value::Boolean(true));
    }
    Ok(results)
}

/// Allocates the trampoline blocks user-data slots hand to native code.
fn prepare_blocks(
    bridge: &Bridge,
    ctx: &ContextRef,
    callable: &Callable,
    call: &mut CallFrame,
    temps: &mut Temporaries,
    pending: &mut Vec<BlockHandle>,
) -> BridgeResult<()> {
    let base = callable.has_self as usize;
    for (i, param) in callable.params.iter().enumerate() {
        if param.n_closures == 0 || param.internal_user_data {
            continue;
        }
        let block = bridge.allocate_closure_block(ctx, param.n_closures as usize)?;
        // SAFETY: the slot belongs to `call`.
        unsafe { (*call.slot(i + base)).v_pointer = block.as_user_data() };
        if param.call_scoped_user_data {
            temps.push(Temporary::Closure(bridge.clone(), block));
        } else {
            pending.push(block);
        }
    }
    Ok(())
}

unsafe fn marshal_inputs(
    m: &mut Marshaller<'_>,
    callable: &Callable,
    args: Vec<Value>,
    call: &mut CallFrame,
    frame: &Frame<'_>,
    caller_allocs: &mut Vec<(usize, CallerAlloc)>,
) -> BridgeResult<()> {
    let base = callable.has_self as usize;
    let mut inputs = args.into_iter();
    let mut position = 1;

    if callable.has_self {
        let value = inputs.next().unwrap_or(Value::Nil);
        m.receiver_to_native(callable, &value, call.slot(0))
            .map_err(|e| e.at_argument(position, callable.name()))?;
        m.pin(&value);
        position += 1;
    }

    for (i, param) in callable.params.iter().enumerate() {
        let argi = i + base;
        if param.internal {
            if param.internal_user_data {
                (*call.slot(argi)).v_pointer = callable.user_data();
            }
            continue;
        }
        if param.dir != Direction::Out {
            let value = inputs.next().unwrap_or(Value::Nil);
            m.param_to_native(callable, param, &value, call.slot(argi), Parent::None, Some(frame))
                .map_err(|e| e.at_argument(position, callable.name()))?;
            // Native code may borrow the value's storage until the call returns.
            m.pin(&value);
            position += 1;
            continue;
        }
        if !param.caller_allocates {
            continue;
        }
        let allocation = param.ty.as_ref().map(|ty| m.caller_alloc(ty)).transpose()?;
        if let Some((alloc, storage)) = allocation.flatten() {
            // The callee fills caller-allocated storage in place.
            (*call.slot(argi)).v_pointer = storage;
            call.wire(argi, false);
            caller_allocs.push((i, alloc));
        }
    }
    Ok(())
}
