// Symbol Resolution
// Looks up native entry points in tables and loaded libraries

use libloading::Library;
use rustc_hash::FxHashMap;
use std::ffi::c_void;
use tracing::debug;

/// Resolves native symbol addresses for function descriptors.
pub trait SymbolResolver {
    fn resolve(&self, namespace: &str, symbol: &str) -> Result<*mut c_void, String>;
}

/// Explicit symbol name to address map.
#[derive(Default)]
pub struct SymbolTable {
    symbols: FxHashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, address: *const c_void) {
        self.symbols.insert(symbol.to_string(), address as usize);
    }

    pub fn with(mut self, symbol: &str, address: *const c_void) -> Self {
        self.insert(symbol, address);
        self
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, _namespace: &str, symbol: &str) -> Result<*mut c_void, String> {
        self.symbols
            .get(symbol)
            .map(|&addr| addr as *mut c_void)
            .ok_or_else(|| format!("symbol `{}' is not registered", symbol))
    }
}

struct LoadedLibrary {
    library: Library,
    path: String,
}

/// Dynamic libraries searched in load order, optionally bound to a namespace.
#[derive(Default)]
pub struct Libraries {
    loaded: Vec<(Option<String>, LoadedLibrary)>,
}

impl Libraries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `path`; symbols of `namespace` (or any namespace when `None`) resolve in it.
    pub fn open(&mut self, namespace: Option<&str>, path: &str) -> Result<(), String> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| format!("Failed to load library '{}': {}", path, e))?;
        debug!(path, "opened native library");
        self.loaded.push((
            namespace.map(str::to_string),
            LoadedLibrary {
                library,
                path: path.to_string(),
            },
        ));
        Ok(())
    }
}

impl SymbolResolver for Libraries {
    fn resolve(&self, namespace: &str, symbol: &str) -> Result<*mut c_void, String> {
        let mut tried = Vec::new();
        for (bound, lib) in &self.loaded {
            if bound.as_deref().map_or(false, |ns| ns != namespace) {
                continue;
            }
            // SAFETY: the address is only handed to libffi with a matching signature.
            let found = unsafe { lib.library.get::<*mut c_void>(symbol.as_bytes()) };
            match found {
                Ok(sym) => return Ok(*sym),
                Err(_) => tried.push(lib.path.clone()),
            }
        }
        if tried.is_empty() {
            Err(format!("no library loaded for namespace `{}'", namespace))
        } else {
            Err(format!("undefined symbol in {}", tried.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn answer() -> i32 {
        42
    }

    #[test]
    fn test_symbol_table() {
        let table = SymbolTable::new().with("answer", answer as *const c_void);
        assert_eq!(
            table.resolve("Demo", "answer").unwrap() as usize,
            answer as usize
        );
        assert!(table.resolve("Demo", "missing").is_err());
    }

    #[test]
    fn test_missing_library() {
        let mut libs = Libraries::new();
        assert!(libs.open(None, "/nonexistent/libnothing.so").is_err());
        assert!(libs.resolve("Demo", "answer").is_err());
    }
}
