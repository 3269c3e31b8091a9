//! The extension registry: the mechanism by which the host embedding adds
//! native fundamentals beyond the builtin set (§4.G "extensions", §6).
//!
//! A safe Rust closure table lives here. The unsafe `extern "C"` surface
//! that lets a *non-Rust* host register a handler is the embedding API's
//! concern (`limn-runtime`'s `api.rs`), which wraps a raw function
//! pointer in exactly one of these closures and otherwise never touches
//! this registry's internals.

use crate::error::RuntimeError;
use crate::word::{SymbolId, Word};

/// Signature every extension handler implements: given the already
/// evaluated argument list (as a Lisp list `Word`) and mutable access to
/// the heap, produce a result word or an error.
pub type ExtensionFn = Box<dyn Fn(Word, &mut crate::heap::Heap) -> Result<Word, RuntimeError> + Send>;

struct ExtensionEntry {
    symbol: SymbolId,
    handler: ExtensionFn,
}

/// Fixed-capacity table of native extensions, keyed by the symbol that
/// names them in source.
pub struct ExtensionRegistry {
    capacity: u32,
    entries: Vec<ExtensionEntry>,
}

impl ExtensionRegistry {
    pub fn new(capacity: u32) -> Self {
        ExtensionRegistry {
            capacity,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register `handler` under `symbol`. Fails once `capacity` handlers
    /// are registered, and fails if `symbol` is already bound to an
    /// extension (re-registration is a host programming error).
    pub fn add_extension(&mut self, symbol: SymbolId, handler: ExtensionFn) -> Result<(), RuntimeError> {
        if self.entries.iter().any(|e| e.symbol == symbol) {
            return Err(RuntimeError::Fatal(format!(
                "extension already registered for symbol {symbol:?}"
            )));
        }
        if self.entries.len() as u32 >= self.capacity {
            return Err(RuntimeError::OutOfMemory);
        }
        self.entries.push(ExtensionEntry { symbol, handler });
        Ok(())
    }

    pub fn lookup(&self, symbol: SymbolId) -> Option<&ExtensionFn> {
        self.entries
            .iter()
            .find(|e| e.symbol == symbol)
            .map(|e| &e.handler)
    }

    pub fn is_registered(&self, symbol: SymbolId) -> bool {
        self.entries.iter().any(|e| e.symbol == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn add_and_lookup() {
        let mut reg = ExtensionRegistry::new(2);
        let sym = SymbolId(1000);
        reg.add_extension(sym, Box::new(|args, _heap| Ok(args)))
            .unwrap();
        assert!(reg.is_registered(sym));
        assert!(reg.lookup(sym).is_some());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut reg = ExtensionRegistry::new(1);
        reg.add_extension(SymbolId(1), Box::new(|a, _h| Ok(a)))
            .unwrap();
        let err = reg
            .add_extension(SymbolId(2), Box::new(|a, _h| Ok(a)))
            .unwrap_err();
        assert_eq!(err, RuntimeError::OutOfMemory);
    }

    #[test]
    fn double_registration_is_fatal() {
        let mut reg = ExtensionRegistry::new(4);
        reg.add_extension(SymbolId(1), Box::new(|a, _h| Ok(a)))
            .unwrap();
        let err = reg
            .add_extension(SymbolId(1), Box::new(|a, _h| Ok(a)))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn handler_runs_against_a_real_heap() {
        let mut reg = ExtensionRegistry::new(1);
        reg.add_extension(
            SymbolId(1),
            Box::new(|_args, heap| heap.cons(Word::Int(1), Word::Int(2))),
        )
        .unwrap();
        let mut heap = Heap::new(8, 64, 1, 1);
        let handler = reg.lookup(SymbolId(1)).unwrap();
        let result = handler(Word::Int(0), &mut heap).unwrap();
        assert!(heap.is_cons(result));
    }
}
