// Callable Cache
// Reuses built callables keyed on descriptor identity

use super::Callable;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CacheKey {
    /// Descriptor identity plus the explicit address, if any.
    Descriptor(usize, usize),
    Declared(String, usize),
}

/// Built callables, kept only while something else references them.
#[derive(Default)]
pub(crate) struct CallableCache {
    entries: RefCell<FxHashMap<CacheKey, Weak<Callable>>>,
}

impl CallableCache {
    pub(crate) fn get(&self, key: &CacheKey) -> Option<Rc<Callable>> {
        let mut entries = self.entries.borrow_mut();
        match entries.get(key).map(Weak::upgrade) {
            Some(Some(callable)) => Some(callable),
            Some(None) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn insert(&self, key: CacheKey, callable: &Rc<Callable>) {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.insert(key, Rc::downgrade(callable));
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
