//! limn-core: the tagged-value heap, allocator, symbol table, constant
//! heap, extension registry and garbage collector underlying the Limn
//! embeddable Lisp (§3, §4.A–§4.E, §4.J).
//!
//! `limn-runtime` builds the evaluator, scheduler and embedding API on
//! top of the types exported here; this crate has no notion of
//! evaluation, special forms, or processes; it is the substrate, not
//! the interpreter.

pub mod aux;
pub mod config;
pub mod const_heap;
pub mod env;
pub mod error;
pub mod extensions;
pub mod gc;
pub mod heap;
pub mod kstack;
pub mod symbols;
pub mod word;

pub use aux::{AuxMemory, AuxOffset};
pub use config::{HeapConfig, HeapConfigBuilder};
pub use const_heap::ConstHeap;
pub use error::RuntimeError;
pub use extensions::{ExtensionFn, ExtensionRegistry};
pub use gc::{collect as gc_collect, GcStats};
pub use heap::{ArrayHeader, Cell, Heap};
pub use kstack::KStack;
pub use symbols::{reserved, SymbolTable, FIRST_DYNAMIC_ID};
pub use word::{CellIndex, ConstIndex, Numeric, Ptr, SymbolId, Word};
