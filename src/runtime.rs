// Runtime Seams
// Seams to the embedding runtime: execution contexts, suspended computations
// and the per-context lock guarding every native/dynamic transition.

use crate::value::Value;
use parking_lot::lock_api::GetThreadId;
use parking_lot::{RawThreadId, ReentrantMutex};
use std::cell::RefCell;
use std::mem;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn current_thread() -> usize {
    RawThreadId::INIT.nonzero_thread_id().get()
}

/// Reentrant lock serializing access to one dynamic context.
///
/// Held while dynamic code runs; released around native calls so that
/// trampolines fired from other native threads can enter.
pub struct StateLock {
    mutex: ReentrantMutex<()>,
    owner: AtomicUsize,
    depth: AtomicUsize,
}

impl StateLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mutex: ReentrantMutex::new(()),
            owner: AtomicUsize::new(0),
            depth: AtomicUsize::new(0),
        })
    }

    pub fn enter(&self) {
        mem::forget(self.mutex.lock());
        self.owner.store(current_thread(), Ordering::Release);
        self.depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one level held by the current thread; a no-op for other threads.
    pub fn leave(&self) {
        if !self.held_here() {
            return;
        }
        if self.depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.owner.store(0, Ordering::Release);
        }
        // SAFETY: the current thread owns at least one level.
        unsafe { self.mutex.force_unlock() };
    }

    pub fn scoped(&self) -> StateGuard<'_> {
        self.enter();
        StateGuard { lock: self }
    }

    /// Runs `f` with every level held by the current thread released.
    pub fn released<R>(&self, f: impl FnOnce() -> R) -> R {
        if !self.held_here() {
            return f();
        }
        let depth = self.depth.swap(0, Ordering::AcqRel);
        self.owner.store(0, Ordering::Release);
        for _ in 0..depth {
            // SAFETY: ownership was checked above; depth counts our levels.
            unsafe { self.mutex.force_unlock() };
        }

        struct Reacquire<'a>(&'a StateLock, usize);
        impl Drop for Reacquire<'_> {
            fn drop(&mut self) {
                for _ in 0..self.1 {
                    mem::forget(self.0.mutex.lock());
                }
                self.0.owner.store(current_thread(), Ordering::Release);
                self.0.depth.store(self.1, Ordering::Release);
            }
        }

        let _reacquire = Reacquire(self, depth);
        f()
    }

    pub fn held_here(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread()
            && self.depth.load(Ordering::Acquire) > 0
    }

    pub fn depth(&self) -> usize {
        if self.held_here() {
            self.depth.load(Ordering::Acquire)
        } else {
            0
        }
    }
}

pub struct StateGuard<'a> {
    lock: &'a StateLock,
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.lock.leave();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    Running,
    Suspended,
    Dead,
}

/// Outcome of resuming a suspended computation.
#[derive(Debug, Clone)]
pub enum Resume {
    Yielded(Vec<Value>),
    Returned(Vec<Value>),
    Failed(Value),
}

pub trait Coroutine {
    fn status(&self) -> ContextStatus;
    fn resume(&self, args: Vec<Value>) -> Resume;
}

/// A dynamic-language execution context able to run callable values.
pub trait ExecutionContext {
    fn status(&self) -> ContextStatus;

    /// Calls `target` in protected mode; `Err` carries the raised value.
    fn call(&self, target: &Value, args: Vec<Value>) -> Result<Vec<Value>, Value>;

    /// Creates a fresh context sharing this one's lock.
    fn spawn(&self) -> ContextRef;

    fn state_lock(&self) -> Arc<StateLock>;

    /// Raises `error` in this context once control returns to it.
    fn raise(&self, error: Value);
}

pub type ContextRef = Rc<dyn ExecutionContext>;

/// What a trampoline slot runs when native code enters it.
#[derive(Clone)]
pub enum DispatchTarget {
    Direct(Value),
    Resumable(Rc<dyn Coroutine>),
}

impl DispatchTarget {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Coroutine(co) => DispatchTarget::Resumable(co),
            other => DispatchTarget::Direct(other),
        }
    }

    pub fn value(&self) -> Value {
        match self {
            DispatchTarget::Direct(v) => v.clone(),
            DispatchTarget::Resumable(co) => Value::Coroutine(co.clone()),
        }
    }
}

/// Minimal context that runs host functions and records escalated errors.
pub struct HostContext {
    lock: Arc<StateLock>,
    status: RefCell<ContextStatus>,
    raised: Rc<RefCell<Vec<Value>>>,
}

impl HostContext {
    pub fn new() -> Rc<Self> {
        Self::with_lock(StateLock::new(), Rc::new(RefCell::new(Vec::new())))
    }

    fn with_lock(lock: Arc<StateLock>, raised: Rc<RefCell<Vec<Value>>>) -> Rc<Self> {
        Rc::new(Self {
            lock,
            status: RefCell::new(ContextStatus::Running),
            raised,
        })
    }

    pub fn set_status(&self, status: ContextStatus) {
        *self.status.borrow_mut() = status;
    }

    /// Errors raised into this context or any context spawned from it.
    pub fn take_raised(&self) -> Vec<Value> {
        mem::take(&mut *self.raised.borrow_mut())
    }
}

impl ExecutionContext for HostContext {
    fn status(&self) -> ContextStatus {
        *self.status.borrow()
    }

    fn call(&self, target: &Value, args: Vec<Value>) -> Result<Vec<Value>, Value> {
        match target {
            Value::Function(f) => f(args),
            other => Err(Value::string(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    fn spawn(&self) -> ContextRef {
        HostContext::with_lock(self.lock.clone(), self.raised.clone())
    }

    fn state_lock(&self) -> Arc<StateLock> {
        self.lock.clone()
    }

    fn raise(&self, error: Value) {
        self.raised.borrow_mut().push(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_drops_all_levels() {
        let lock = StateLock::new();
        lock.enter();
        lock.enter();
        assert_eq!(lock.depth(), 2);
        lock.released(|| {
            assert!(!lock.held_here());
            let _inner = lock.scoped();
            assert_eq!(lock.depth(), 1);
        });
        assert_eq!(lock.depth(), 2);
        lock.leave();
        lock.leave();
        assert!(!lock.held_here());
    }

    #[test]
    fn test_leave_without_enter_is_noop() {
        let lock = StateLock::new();
        lock.leave();
        assert_eq!(lock.depth(), 0);
        assert_eq!(lock.released(|| 7), 7);
    }

    #[test]
    fn test_lock_is_usable_from_other_thread_while_released() {
        let lock = StateLock::new();
        lock.enter();
        let other = lock.clone();
        lock.released(move || {
            std::thread::spawn(move || {
                let _guard = other.scoped();
            })
            .join()
            .unwrap();
        });
        assert!(lock.held_here());
        lock.leave();
    }

    #[test]
    fn test_host_context_spawn_shares_lock_and_errors() {
        let ctx = HostContext::new();
        let child = ctx.spawn();
        assert!(Arc::ptr_eq(&ctx.state_lock(), &child.state_lock()));
        child.raise(Value::from("boom"));
        assert_eq!(ctx.take_raised(), vec![Value::from("boom")]);
    }

    #[test]
    fn test_dispatch_target_from_value() {
        let target = DispatchTarget::from_value(Value::Integer(1));
        assert!(matches!(target, DispatchTarget::Direct(Value::Integer(1))));
    }
}
