// Closure Blocks
// Trampoline blocks: native entry points that call back into dynamic code.
//
// A block owns one or more slots, each with its own executable thunk. The
// thunk address is fixed when the block is allocated; binding a slot only
// attaches a callable and a target to it. Blocks are released explicitly,
// by the destroy notifier handed to native code, through a call-scoped
// temporary, or from the deferred queue after an autodestroy slot fired.

pub(crate) mod dispatch;

use crate::bridge::Bridge;
use crate::callable::Callable;
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::Temporaries;
use crate::runtime::{ContextRef, DispatchTarget, StateLock};
use crate::value::Value;
use libffi::low::{self, ffi_closure, CodePtr};
use rustc_hash::FxHashSet;
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

thread_local! {
    /// Addresses of blocks not yet freed, across every bridge on this thread.
    static LIVE_BLOCKS: RefCell<FxHashSet<usize>> = RefCell::new(FxHashSet::default());
}

fn is_allocated(block: BlockHandle) -> bool {
    LIVE_BLOCKS.with(|live| live.borrow().contains(&block.addr()))
}

#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) callable: Rc<Callable>,
    pub(crate) target: DispatchTarget,
    pub(crate) autodestroy: bool,
}

pub(crate) struct Slot {
    block: *const ClosureBlock,
    closure: *mut ffi_closure,
    code: CodePtr,
    binding: RefCell<Option<Binding>>,
}

pub(crate) struct ClosureBlock {
    bridge: Bridge,
    /// Context dispatch runs in; replaced when found suspended.
    context: RefCell<ContextRef>,
    lock: Arc<StateLock>,
    slots: Box<[Slot]>,
    /// Values returned with transfer none that native code may still read.
    keepalive: RefCell<Temporaries>,
    active: Cell<usize>,
    doomed: Cell<bool>,
}

impl ClosureBlock {
    fn handle(&self) -> BlockHandle {
        BlockHandle(NonNull::from(self))
    }
}

/// Opaque reference to a live trampoline block.
///
/// The handle is also the user-data pointer native code receives alongside
/// the entry points, and what [`destroy_notify`] expects back.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(NonNull<ClosureBlock>);

impl BlockHandle {
    pub fn as_user_data(self) -> *mut c_void {
        self.0.as_ptr() as *mut c_void
    }

    /// Reinterprets a user-data pointer; liveness is checked by the bridge.
    pub fn from_user_data(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr as *mut ClosureBlock).map(BlockHandle)
    }

    pub(crate) fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHandle({:p})", self.0.as_ptr())
    }
}

/// Allocates a block of `count` unbound slots hosted by `ctx`.
pub(crate) fn allocate(
    bridge: &Bridge,
    ctx: &ContextRef,
    count: usize,
) -> BridgeResult<BlockHandle> {
    let count = count.max(1);
    let mut slots: Vec<Slot> = Vec::with_capacity(count);
    for _ in 0..count {
        let (closure, code) = low::closure_alloc();
        if closure.is_null() {
            for slot in &slots {
                // SAFETY: allocated above and never prepared.
                unsafe { low::closure_free(slot.closure) };
            }
            return Err(BridgeError::PrepClosure {
                name: "closure block".to_string(),
                reason: "out of executable memory".to_string(),
            });
        }
        slots.push(Slot {
            block: std::ptr::null(),
            closure,
            code,
            binding: RefCell::new(None),
        });
    }

    let raw = Box::into_raw(Box::new(ClosureBlock {
        bridge: bridge.clone(),
        context: RefCell::new(ctx.clone()),
        lock: ctx.state_lock(),
        slots: slots.into_boxed_slice(),
        keepalive: RefCell::new(Temporaries::default()),
        active: Cell::new(0),
        doomed: Cell::new(false),
    }));
    // SAFETY: `raw` was just produced by `Box::into_raw`.
    unsafe {
        for slot in (*raw).slots.iter_mut() {
            slot.block = raw;
        }
    }
    let handle = BlockHandle(unsafe { NonNull::new_unchecked(raw) });
    LIVE_BLOCKS.with(|live| live.borrow_mut().insert(handle.addr()));
    bridge.register_block(handle);
    debug!(block = ?handle, slots = count, "allocated closure block");
    Ok(handle)
}

/// Binds the first free slot of `block` and returns its entry point.
pub(crate) fn bind(
    bridge: &Bridge,
    block: BlockHandle,
    callable: &Rc<Callable>,
    target: Value,
    autodestroy: bool,
) -> BridgeResult<*mut c_void> {
    if !bridge.is_live(block) {
        return Err(BridgeError::DeadBlock);
    }
    // SAFETY: live blocks are owned by the registry until destroyed.
    let block = unsafe { block.0.as_ref() };
    let slot = block
        .slots
        .iter()
        .find(|slot| slot.binding.borrow().is_none())
        .ok_or(BridgeError::BlockExhausted(block.slots.len()))?;

    // SAFETY: the cif lives as long as the callable, which the binding keeps.
    unsafe {
        low::prep_closure(
            slot.closure,
            callable.cif.as_raw_ptr(),
            dispatch::trampoline,
            slot as *const Slot,
            slot.code,
        )
    }
    .map_err(|e| BridgeError::PrepClosure {
        name: callable.name().to_string(),
        reason: format!("{:?}", e),
    })?;

    *slot.binding.borrow_mut() = Some(Binding {
        callable: callable.clone(),
        target: DispatchTarget::from_value(target),
        autodestroy,
    });
    Ok(slot.code.as_mut_ptr())
}

/// Releases `block`; postponed while one of its slots is running.
pub(crate) fn destroy(bridge: &Bridge, block: BlockHandle) {
    if !bridge.is_live(block) {
        return;
    }
    let raw = block.0.as_ptr();
    // SAFETY: the block is live, so it has not been freed yet.
    unsafe {
        if (*raw).active.get() > 0 {
            (*raw).doomed.set(true);
            return;
        }
    }
    bridge.unregister_block(block);
    LIVE_BLOCKS.with(|live| live.borrow_mut().remove(&block.addr()));
    // SAFETY: unregistered above, so this is the only release.
    let owned = unsafe { Box::from_raw(raw) };
    for slot in owned.slots.iter() {
        // SAFETY: the closure is not running and nothing else frees it.
        unsafe { low::closure_free(slot.closure) };
    }
    debug!(block = ?block, slots = owned.slots.len(), "destroyed closure block");
    drop(owned);
}

/// Destroy notifier for closure user data handed to native code.
///
/// Pointers that do not name an allocated block are ignored, so a repeated
/// notification is harmless.
pub extern "C" fn destroy_notify(data: *mut c_void) {
    let Some(block) = BlockHandle::from_user_data(data) else {
        return;
    };
    if !is_allocated(block) {
        debug!(block = ?block, "destroy notify for a block that is not allocated");
        return;
    }
    // SAFETY: allocated blocks are only freed after leaving `LIVE_BLOCKS`.
    let bridge = unsafe { block.0.as_ref().bridge.clone() };
    bridge.destroy_closure_block(block);
}

/// One-slot trampoline that lives as long as the guard.
pub struct ClosureGuard {
    bridge: Bridge,
    block: BlockHandle,
    entry: *mut c_void,
}

impl ClosureGuard {
    pub(crate) fn new(bridge: &Bridge, block: BlockHandle, entry: *mut c_void) -> Self {
        Self {
            bridge: bridge.clone(),
            block,
            entry,
        }
    }

    pub fn entry(&self) -> *mut c_void {
        self.entry
    }

    pub fn block(&self) -> BlockHandle {
        self.block
    }
}

impl Drop for ClosureGuard {
    fn drop(&mut self) {
        self.bridge.destroy_closure_block(self.block);
    }
}
