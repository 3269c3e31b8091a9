//! Symbol table: interning of names to [`SymbolId`]s, with a reserved
//! range pre-populated at construction (§4.C, §7).
//!
//! Two tiers. Ids `0..FIRST_DYNAMIC_ID` are the reserved control symbols,
//! special-form keywords, error tags, fundamental names, fixed at
//! compile time so the evaluator's dispatch table can match on them
//! directly instead of looking names up by string every step. Ids from
//! `FIRST_DYNAMIC_ID` on are interned at runtime the first time a name is
//! read or constructed, backed by [`AuxMemory`] for the UTF-8 bytes.

use crate::aux::{AuxMemory, AuxOffset};
use crate::word::SymbolId;
use std::collections::HashMap;

/// The reserved control symbols, assigned contiguous ids starting at 0.
/// Order here fixes the numeric id, do not reorder without also bumping
/// any persisted heap image's format version (§4.N).
pub mod reserved {
    use crate::word::SymbolId;

    pub const QUOTE: SymbolId = SymbolId(0);
    pub const IF: SymbolId = SymbolId(1);
    pub const LAMBDA: SymbolId = SymbolId(2);
    pub const DEFINE: SymbolId = SymbolId(3);
    pub const LET: SymbolId = SymbolId(4);
    pub const LETREC: SymbolId = SymbolId(5);
    pub const SET: SymbolId = SymbolId(6);
    pub const BEGIN: SymbolId = SymbolId(7);
    pub const SPAWN: SymbolId = SymbolId(8);
    pub const SEND: SymbolId = SymbolId(9);
    pub const RECV: SymbolId = SymbolId(10);
    pub const CLOSURE: SymbolId = SymbolId(11);
    pub const NIL: SymbolId = SymbolId(12);
    pub const TRUE: SymbolId = SymbolId(13);
    pub const FALSE: SymbolId = SymbolId(14);
    pub const OUT_OF_MEMORY: SymbolId = SymbolId(15);
    pub const EVAL_ERROR: SymbolId = SymbolId(16);
    pub const TYPE_ERROR: SymbolId = SymbolId(17);
    pub const READ_ERROR: SymbolId = SymbolId(18);
    pub const NO_MATCH: SymbolId = SymbolId(19);

    // Concurrency-facing fundamentals beyond spawn/send/recv (§4.G).
    pub const YIELD: SymbolId = SymbolId(20);
    pub const SLEEP: SymbolId = SymbolId(21);
    pub const SELF_FN: SymbolId = SymbolId(22);

    // Numeric-tower arithmetic fundamentals.
    pub const ADD: SymbolId = SymbolId(23);
    pub const SUB: SymbolId = SymbolId(24);
    pub const MUL: SymbolId = SymbolId(25);
    pub const DIV: SymbolId = SymbolId(26);
    pub const NUM_EQ: SymbolId = SymbolId(27);
    pub const LT: SymbolId = SymbolId(28);
    pub const GT: SymbolId = SymbolId(29);
    pub const LE: SymbolId = SymbolId(30);
    pub const GE: SymbolId = SymbolId(31);

    // List-primitive fundamentals.
    pub const CONS: SymbolId = SymbolId(32);
    pub const CAR: SymbolId = SymbolId(33);
    pub const CDR: SymbolId = SymbolId(34);
    pub const SET_CAR: SymbolId = SymbolId(35);
    pub const SET_CDR: SymbolId = SymbolId(36);
    pub const NULL_P: SymbolId = SymbolId(37);
    pub const PAIR_P: SymbolId = SymbolId(38);

    // Tagged-value-lattice predicates.
    pub const EQ_P: SymbolId = SymbolId(39);
    pub const SYMBOL_P: SymbolId = SymbolId(40);
    pub const INTEGER_P: SymbolId = SymbolId(41);
    pub const FLOAT_P: SymbolId = SymbolId(42);
    pub const CLOSURE_P: SymbolId = SymbolId(43);

    // Process-lifecycle symbols (§6 "Error symbols", §4.H events).
    pub const DONE: SymbolId = SymbolId(44);
    pub const RECOVERED: SymbolId = SymbolId(45);
    pub const EVENT_WAIT: SymbolId = SymbolId(46);

    /// Names in declaration order, index == numeric id.
    pub const NAMES: &[&str] = &[
        "quote",
        "if",
        "lambda",
        "define",
        "let",
        "letrec",
        "set!",
        "begin",
        "spawn",
        "send",
        "recv",
        "closure",
        "nil",
        "true",
        "false",
        "out-of-memory",
        "eval-error",
        "type-error",
        "read-error",
        "no-match",
        "yield",
        "sleep",
        "self",
        "+",
        "-",
        "*",
        "/",
        "=",
        "<",
        ">",
        "<=",
        ">=",
        "cons",
        "car",
        "cdr",
        "set-car!",
        "set-cdr!",
        "null?",
        "pair?",
        "eq?",
        "symbol?",
        "integer?",
        "float?",
        "closure?",
        "done",
        "recovered",
        "event-wait",
    ];
}

/// First id available for dynamically interned (non-reserved) symbols.
pub const FIRST_DYNAMIC_ID: u32 = reserved::NAMES.len() as u32;

struct SymbolEntry {
    offset: AuxOffset,
    len: u32,
}

/// Bidirectional name/id table. Name bytes live in [`AuxMemory`]; the
/// table itself only ever grows (symbols are never collected, the spec
/// treats the symbol space as append-only for the program's lifetime).
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    by_name: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut by_name = HashMap::with_capacity(reserved::NAMES.len());
        for (ix, name) in reserved::NAMES.iter().enumerate() {
            by_name.insert((*name).to_string(), SymbolId(ix as u32));
        }
        SymbolTable {
            entries: Vec::new(),
            by_name,
        }
    }

    /// Intern `name`, allocating storage for it in `aux` the first time
    /// it is seen. Idempotent: interning the same name twice returns the
    /// same id.
    pub fn intern(&mut self, name: &str, aux: &mut AuxMemory) -> SymbolId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let offset = aux
            .alloc_bytes(name.as_bytes())
            .expect("symbol table exhausted auxiliary memory");
        let id = SymbolId(FIRST_DYNAMIC_ID + self.entries.len() as u32);
        self.entries.push(SymbolEntry {
            offset,
            len: name.len() as u32,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Recover the textual name of any symbol, reserved or dynamic.
    pub fn name_of<'a>(&self, id: SymbolId, aux: &'a AuxMemory) -> std::borrow::Cow<'a, str> {
        if id.0 < FIRST_DYNAMIC_ID {
            return std::borrow::Cow::Borrowed(reserved::NAMES[id.0 as usize]);
        }
        let entry = &self.entries[(id.0 - FIRST_DYNAMIC_ID) as usize];
        let bytes = aux.read(entry.offset, entry.len);
        String::from_utf8_lossy(bytes)
    }

    pub fn is_reserved(id: SymbolId) -> bool {
        id.0 < FIRST_DYNAMIC_ID
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_names_line_up_with_ids() {
        assert_eq!(reserved::NAMES[reserved::QUOTE.0 as usize], "quote");
        assert_eq!(reserved::NAMES[reserved::RECV.0 as usize], "recv");
        assert_eq!(
            reserved::NAMES[reserved::NO_MATCH.0 as usize],
            "no-match"
        );
    }

    #[test]
    fn intern_is_idempotent() {
        let mut aux = AuxMemory::new(256);
        let mut table = SymbolTable::new();
        let a = table.intern("frobnicate", &mut aux);
        let b = table.intern("frobnicate", &mut aux);
        assert_eq!(a, b);
        assert!(a.0 >= FIRST_DYNAMIC_ID);
    }

    #[test]
    fn reserved_names_resolve_without_aux_allocation() {
        let aux = AuxMemory::new(0);
        let table = SymbolTable::new();
        assert_eq!(table.name_of(reserved::LAMBDA, &aux), "lambda");
    }

    #[test]
    fn dynamic_symbol_name_round_trips_through_aux() {
        let mut aux = AuxMemory::new(256);
        let mut table = SymbolTable::new();
        let id = table.intern("my-var", &mut aux);
        assert_eq!(table.name_of(id, &aux), "my-var");
        assert!(!SymbolTable::is_reserved(id));
        assert!(SymbolTable::is_reserved(reserved::IF));
    }
}
