#![allow(dead_code)]

use sald_bridge::{Bridge, ContextRef, HostContext, SymbolTable};
use std::cell::Cell;
use std::ffi::c_void;
use std::rc::Rc;

pub fn bridge(symbols: &[(&str, *const c_void)]) -> Bridge {
    let mut table = SymbolTable::new();
    for (name, address) in symbols {
        table.insert(name, *address);
    }
    Bridge::builder().symbols(table).build()
}

pub fn context() -> (Rc<HostContext>, ContextRef) {
    let host = HostContext::new();
    let ctx: ContextRef = host.clone();
    (host, ctx)
}

/// Counts drops of the values it is moved into.
pub struct Sentinel(pub Rc<Cell<usize>>);

impl Drop for Sentinel {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

pub fn sentinel() -> (Sentinel, Rc<Cell<usize>>) {
    let count = Rc::new(Cell::new(0));
    (Sentinel(count.clone()), count)
}
