// Bridge Facade
// The bridge facade: builds callables, invokes them and manages trampolines.

use crate::callable::cache::{CacheKey, CallableCache};
use crate::callable::{invoke, Callable, CallableDecl, Param};
use crate::closure::{self, BlockHandle, ClosureGuard};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::{Frame, Marshaller, Site, Temporaries};
use crate::native::Argument;
use crate::runtime::ContextRef;
use crate::symbols::{SymbolResolver, SymbolTable};
use crate::types::{ArrayKind, CallableDescriptor, Direction, Transfer, TypeInfo, TypeKind, TypeTag};
use crate::value::Value;
use crate::wrappers::{ObjectMarshaller, OpaqueWrappers, RecordMarshaller};
use rustc_hash::FxHashSet;
use smallvec::smallvec;
use std::cell::RefCell;
use std::ffi::c_void;
use std::mem;
use std::rc::Rc;
use tracing::debug;

struct BridgeState {
    config: BridgeConfig,
    symbols: Box<dyn SymbolResolver>,
    records: Rc<dyn RecordMarshaller>,
    objects: Rc<dyn ObjectMarshaller>,
    cache: CallableCache,
    /// Addresses of blocks that have not been destroyed yet.
    live: RefCell<FxHashSet<usize>>,
    deferred: RefCell<Vec<BlockHandle>>,
}

/// Shared handle to one bridge instance; clones refer to the same state.
#[derive(Clone)]
pub struct Bridge {
    state: Rc<BridgeState>,
}

pub struct BridgeBuilder {
    config: BridgeConfig,
    symbols: Box<dyn SymbolResolver>,
    records: Rc<dyn RecordMarshaller>,
    objects: Rc<dyn ObjectMarshaller>,
}

impl BridgeBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn symbols(mut self, symbols: impl SymbolResolver + 'static) -> Self {
        self.symbols = Box::new(symbols);
        self
    }

    pub fn records(mut self, records: impl RecordMarshaller + 'static) -> Self {
        self.records = Rc::new(records);
        self
    }

    pub fn objects(mut self, objects: impl ObjectMarshaller + 'static) -> Self {
        self.objects = Rc::new(objects);
        self
    }

    pub fn build(self) -> Bridge {
        Bridge {
            state: Rc::new(BridgeState {
                config: self.config,
                symbols: self.symbols,
                records: self.records,
                objects: self.objects,
                cache: CallableCache::default(),
                live: RefCell::new(FxHashSet::default()),
                deferred: RefCell::new(Vec::new()),
            }),
        }
    }
}

/// Native container produced from a dynamic value.
///
/// Memory the container borrows is released with it; with full transfer the
/// container itself belongs to whoever receives `as_ptr()`.
pub struct NativeContainer {
    ptr: *mut c_void,
    length: Option<usize>,
    _temps: Temporaries,
}

impl std::fmt::Debug for NativeContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeContainer")
            .field("ptr", &self.ptr)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl NativeContainer {
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    /// Element count for arrays.
    pub fn len(&self) -> Option<usize> {
        self.length
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    /// Bridge with default config, an empty symbol table and opaque wrappers.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> BridgeBuilder {
        BridgeBuilder {
            config: BridgeConfig::default(),
            symbols: Box::new(SymbolTable::new()),
            records: Rc::new(OpaqueWrappers),
            objects: Rc::new(OpaqueWrappers),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.state.config
    }

    pub fn records(&self) -> &dyn RecordMarshaller {
        self.state.records.as_ref()
    }

    pub fn objects(&self) -> &dyn ObjectMarshaller {
        self.state.objects.as_ref()
    }

    /// Builds (or reuses) the callable for `descriptor`.
    ///
    /// `address` is required for callbacks, signals and virtual functions;
    /// functions resolve their symbol instead.
    pub fn build_callable(
        &self,
        descriptor: &Rc<dyn CallableDescriptor>,
        address: Option<*mut c_void>,
    ) -> BridgeResult<Rc<Callable>> {
        let key = CacheKey::Descriptor(
            Rc::as_ptr(descriptor) as *const u8 as usize,
            address.map_or(0, |a| a as usize),
        );
        let caching = self.state.config.cache_callables;
        if caching {
            if let Some(callable) = self.state.cache.get(&key) {
                return Ok(callable);
            }
        }
        let callable = Rc::new(Callable::from_descriptor(
            descriptor,
            address,
            self.state.symbols.as_ref(),
            &self.state.config,
        )?);
        if caching {
            self.state.cache.insert(key, &callable);
        }
        Ok(callable)
    }

    /// Builds a callable from a declarative table; cached only when it
    /// carries an address.
    pub fn declare_callable(&self, decl: &CallableDecl) -> BridgeResult<Rc<Callable>> {
        let key = decl
            .address
            .filter(|_| self.state.config.cache_callables)
            .map(|addr| CacheKey::Declared(decl.name.clone(), addr));
        if let Some(callable) = key.as_ref().and_then(|k| self.state.cache.get(k)) {
            return Ok(callable);
        }
        let callable = Rc::new(Callable::from_decl(decl, None)?);
        if let Some(key) = key {
            self.state.cache.insert(key, &callable);
        }
        Ok(callable)
    }

    /// Parses a JSON declarative table and builds its callable.
    pub fn parse_callable(&self, json: &str) -> BridgeResult<Rc<Callable>> {
        let decl = CallableDecl::from_json(json, self.records())?;
        self.declare_callable(&decl)
    }

    pub fn cached_callables(&self) -> usize {
        self.state.cache.len()
    }

    /// Calls `callable` with dynamic arguments.
    ///
    /// Native failures reported through the error slot are results, not `Err`:
    /// the call yields `[false, error]` or the return value followed by the error.
    pub fn invoke(
        &self,
        ctx: &ContextRef,
        callable: &Callable,
        args: Vec<Value>,
    ) -> BridgeResult<Vec<Value>> {
        let results = invoke::call(self, ctx, callable, args);
        self.collect();
        results
    }

    pub fn allocate_closure_block(
        &self,
        ctx: &ContextRef,
        slots: usize,
    ) -> BridgeResult<BlockHandle> {
        self.collect();
        closure::allocate(self, ctx, slots)
    }

    /// Binds a free slot of `block` to `target` and returns its native entry point.
    pub fn bind_closure(
        &self,
        block: BlockHandle,
        callable: &Rc<Callable>,
        target: Value,
        autodestroy: bool,
    ) -> BridgeResult<*mut c_void> {
        closure::bind(self, block, callable, target, autodestroy)
    }

    /// Releases `block`. Destroyed blocks are ignored; a block whose slot is
    /// currently running is released once the slot returns.
    pub fn destroy_closure_block(&self, block: BlockHandle) {
        closure::destroy(self, block);
    }

    pub fn is_live(&self, block: BlockHandle) -> bool {
        self.state.live.borrow().contains(&block.addr())
    }

    /// Standalone trampoline for `callable`, released with the guard.
    pub fn callback(
        &self,
        ctx: &ContextRef,
        callable: &Rc<Callable>,
        target: Value,
    ) -> BridgeResult<ClosureGuard> {
        let block = self.allocate_closure_block(ctx, 1)?;
        match self.bind_closure(block, callable, target, false) {
            Ok(entry) => Ok(ClosureGuard::new(self, block, entry)),
            Err(e) => {
                self.destroy_closure_block(block);
                Err(e)
            }
        }
    }

    /// Destroys blocks queued by finished autodestroy slots.
    pub fn collect(&self) -> usize {
        let queued = mem::take(&mut *self.state.deferred.borrow_mut());
        let count = queued.len();
        for block in queued {
            self.destroy_closure_block(block);
        }
        if count > 0 {
            debug!(count, "released deferred closure blocks");
        }
        count
    }

    pub(crate) fn register_block(&self, block: BlockHandle) {
        self.state.live.borrow_mut().insert(block.addr());
    }

    pub(crate) fn unregister_block(&self, block: BlockHandle) -> bool {
        self.state.live.borrow_mut().remove(&block.addr())
    }

    pub(crate) fn defer_release(&self, block: BlockHandle) {
        let mut deferred = self.state.deferred.borrow_mut();
        if !deferred.contains(&block) {
            deferred.push(block);
        }
    }

    /// Converts a native array, list or hash table to a dynamic value.
    ///
    /// `length` overrides the element count of C arrays.
    ///
    /// # Safety
    /// `ptr` must be null or point to a container matching `ty`.
    pub unsafe fn container_to_dynamic(
        &self,
        ty: &TypeInfo,
        ptr: *mut c_void,
        transfer: Transfer,
        length: Option<usize>,
    ) -> BridgeResult<Value> {
        let mut temps = Temporaries::default();
        let mut m = Marshaller::new(self, None, &mut temps);
        let mut slot = Argument::pointer(ptr);
        let site = Site::new(transfer);
        match &ty.kind {
            TypeKind::Array(array) => match length {
                Some(length) if array.kind == ArrayKind::C => {
                    let mut sized = array.clone();
                    sized.fixed_size = Some(length);
                    sized.length_arg = None;
                    sized.zero_terminated = false;
                    m.array_to_dynamic(&sized, site, &mut slot)
                }
                _ => m.array_to_dynamic(array, site, &mut slot),
            },
            TypeKind::SList(_) | TypeKind::List(_) | TypeKind::Hash { .. } => {
                m.to_dynamic(ty, site, &mut slot)
            }
            _ => Err(BridgeError::BadTypeInfo(format!("{} is not a container", ty.name()))),
        }
    }

    /// Builds a native array, list or hash table from a dynamic value.
    pub fn container_to_native(
        &self,
        ty: &TypeInfo,
        value: &Value,
        transfer: Transfer,
    ) -> BridgeResult<NativeContainer> {
        let mut temps = Temporaries::default();
        let mut slot = Argument::zeroed();
        let length = match &ty.kind {
            TypeKind::Array(array) => {
                // The length is written to a synthetic length argument.
                let params = [Param::typed(
                    TypeInfo::scalar(TypeTag::UInt64),
                    Direction::In,
                    Transfer::Nothing,
                )];
                let mut length = Argument::zeroed();
                let frame = Frame::new(&params, smallvec![&mut length as *mut Argument]);
                let mut linked = array.clone();
                linked.length_arg = Some(0);
                let mut m = Marshaller::new(self, None, &mut temps);
                // SAFETY: `slot` and `length` are full argument slots.
                unsafe {
                    let site = Site::new(transfer).frame(Some(&frame));
                    m.array_to_native(value, &linked, site, &mut slot)?;
                    Some(length.v_uint64 as usize)
                }
            }
            TypeKind::SList(_) | TypeKind::List(_) | TypeKind::Hash { .. } => {
                let mut m = Marshaller::new(self, None, &mut temps);
                // SAFETY: `slot` is a full argument slot.
                unsafe { m.to_native(value, ty, Site::new(transfer), &mut slot)? };
                None
            }
            _ => {
                return Err(BridgeError::BadTypeInfo(format!(
                    "{} is not a container",
                    ty.name()
                )))
            }
        };
        Ok(NativeContainer {
            // SAFETY: every container kind is stored as a pointer.
            ptr: unsafe { slot.v_pointer },
            length,
            _temps: temps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::ParamDecl;
    use crate::runtime::HostContext;
    use crate::types::{CallableInfo, TypeTag};

    extern "C" fn twice(x: i32) -> i32 {
        x * 2
    }

    #[test]
    fn test_descriptor_callables_are_cached() {
        let bridge = Bridge::builder()
            .symbols(SymbolTable::new().with("demo_twice", twice as *const c_void))
            .build();
        let info = CallableInfo::function("Demo", "twice", "demo_twice")
            .arg(crate::types::ArgInfo::new("x", TypeInfo::scalar(TypeTag::Int32)))
            .returns(TypeInfo::scalar(TypeTag::Int32), Transfer::Nothing)
            .build();
        let first = bridge.build_callable(&info, None).unwrap();
        let second = bridge.build_callable(&info, None).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(bridge.cached_callables(), 1);

        let ctx: ContextRef = HostContext::new();
        let results = bridge.invoke(&ctx, &first, vec![Value::Integer(21)]).unwrap();
        assert_eq!(results, vec![Value::Integer(42)]);
    }

    #[test]
    fn test_cache_can_be_disabled() {
        let config = BridgeConfig {
            cache_callables: false,
            ..BridgeConfig::default()
        };
        let bridge = Bridge::builder().config(config).build();
        let mut decl = CallableDecl::new("twice")
            .arg(ParamDecl::typed(TypeInfo::scalar(TypeTag::Int32)))
            .returns(ParamDecl::typed(TypeInfo::scalar(TypeTag::Int32)));
        decl.address = Some(twice as usize);
        let first = bridge.declare_callable(&decl).unwrap();
        let second = bridge.declare_callable(&decl).unwrap();
        assert!(!Rc::ptr_eq(&first, &second));
        assert_eq!(bridge.cached_callables(), 0);
    }

    #[test]
    fn test_too_many_arguments() {
        let bridge = Bridge::new();
        let ctx: ContextRef = HostContext::new();
        let mut decl =
            CallableDecl::new("twice").arg(ParamDecl::typed(TypeInfo::scalar(TypeTag::Int32)));
        decl.address = Some(twice as usize);
        let callable = bridge.declare_callable(&decl).unwrap();
        let err = bridge
            .invoke(&ctx, &callable, vec![Value::Integer(1), Value::Integer(2)])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "too many arguments to `twice' (expected at most 1, got 2)"
        );
    }

    #[test]
    fn test_missing_address() {
        let bridge = Bridge::new();
        let ctx: ContextRef = HostContext::new();
        let callable = bridge.declare_callable(&CallableDecl::new("nowhere")).unwrap();
        let err = bridge.invoke(&ctx, &callable, vec![]).unwrap_err();
        assert!(matches!(err, BridgeError::NoAddress(_)));
    }

    #[test]
    fn test_container_round_trip_with_length() {
        let bridge = Bridge::new();
        let ty = TypeInfo::array(ArrayKind::C, TypeInfo::scalar(TypeTag::Int32)).build();
        let value = Value::array(vec![Value::Integer(4), Value::Integer(5), Value::Integer(6)]);
        let native = bridge.container_to_native(&ty, &value, Transfer::Nothing).unwrap();
        assert_eq!(native.len(), Some(3));
        let back = unsafe {
            bridge.container_to_dynamic(&ty, native.as_ptr(), Transfer::Nothing, native.len())
        }
        .unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_non_containers_are_rejected() {
        let bridge = Bridge::new();
        let ty = TypeInfo::scalar(TypeTag::Int32);
        assert!(bridge.container_to_native(&ty, &Value::Integer(1), Transfer::Nothing).is_err());
    }
}
