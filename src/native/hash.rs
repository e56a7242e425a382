// Native Hash Tables
// Pointer-keyed tables handed to native code

use super::free;
use rustc_hash::FxHashMap;
use std::ffi::{c_char, c_void, CStr};

/// How a table hashes and compares its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Keys are NUL-terminated strings, compared by content.
    Content,
    /// Keys point to 64-bit integers, compared by value.
    Int64,
    /// Keys are compared by pointer identity.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyRepr {
    Bytes(Vec<u8>),
    Word(i64),
    Address(usize),
}

/// Opaque native hash table mapping pointer-sized keys to pointer-sized values.
pub struct HashTable {
    mode: KeyMode,
    /// Keys are heap boxes released with the table.
    owns_keys: bool,
    index: FxHashMap<KeyRepr, usize>,
    entries: Vec<(*mut c_void, *mut c_void)>,
}

impl HashTable {
    pub fn new(mode: KeyMode) -> *mut Self {
        Box::into_raw(Box::new(Self {
            mode,
            owns_keys: false,
            index: FxHashMap::default(),
            entries: Vec::new(),
        }))
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    /// Makes the table free its keys with [`free`] when destroyed.
    pub fn set_owns_keys(&mut self, owns: bool) {
        self.owns_keys = owns;
    }

    unsafe fn repr(&self, key: *mut c_void) -> KeyRepr {
        match self.mode {
            KeyMode::Content if !key.is_null() => {
                KeyRepr::Bytes(CStr::from_ptr(key as *const c_char).to_bytes().to_vec())
            }
            KeyMode::Int64 if !key.is_null() => KeyRepr::Word(*(key as *const i64)),
            _ => KeyRepr::Address(key as usize),
        }
    }

    /// Inserts or replaces the value for `key`.
    ///
    /// # Safety
    /// `key` must be readable under the table's key mode.
    pub unsafe fn insert(&mut self, key: *mut c_void, value: *mut c_void) {
        let repr = self.repr(key);
        match self.index.get(&repr) {
            Some(&slot) => {
                self.entries[slot].1 = value;
                if self.owns_keys && self.entries[slot].0 != key {
                    free(key);
                }
            }
            None => {
                self.index.insert(repr, self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    /// # Safety
    /// `key` must be readable under the table's key mode.
    pub unsafe fn lookup(&self, key: *mut c_void) -> Option<*mut c_void> {
        self.index
            .get(&self.repr(key))
            .map(|&slot| self.entries[slot].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(*mut c_void, *mut c_void)] {
        &self.entries
    }

    /// # Safety
    /// `this` must come from [`HashTable::new`] and not be used afterwards.
    pub unsafe fn destroy(this: *mut Self) {
        if this.is_null() {
            return;
        }
        let table = Box::from_raw(this);
        if table.owns_keys {
            for &(key, _) in &table.entries {
                free(key);
            }
        }
    }
}
