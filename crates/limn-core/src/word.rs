//! Tagged Value: the single machine word every Limn expression and every
//! heap slot is built from.
//!
//! Rather than hand-packing tag bits into a raw `u64` (the classic C
//! approach, and the one a microcontroller Lisp written in C would take),
//! `Word` is a small `Copy` enum. The Rust type system keeps pointer and
//! immediate variants from being confused with each other; the "4-bit
//! type-major tag / 2-bit pointer discriminator" of the original design is
//! reified as match arms instead of bit masks. See `DESIGN.md` for the
//! rationale (this mirrors the arena-plus-index reification used
//! throughout the heap).
//!
//! A `Word` is always stack-sized and `Copy`: pushing one onto a
//! continuation stack, storing one in a cons cell, or returning one from a
//! fundamental never allocates on its own.

use std::fmt;

/// Index of a cell within the mutable cons arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellIndex(pub u32);

impl fmt::Debug for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a cell within the append-only constant heap (§4.J).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstIndex(pub u32);

impl fmt::Debug for ConstIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C#{}", self.0)
    }
}

/// Interned symbol id. Ids below [`crate::symbols::FIRST_DYNAMIC_ID`] are
/// reserved and pre-populated at init; everything else is assigned
/// monotonically by [`crate::symbols::SymbolTable::intern`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

impl fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sym({})", self.0)
    }
}

/// A pointer into either the mutable cons arena or the immutable constant
/// heap. Kept as a distinct enum (rather than a raw index with a sentinel
/// bit) so that the borrow checker, not a convention, keeps the two arenas
/// from being confused.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Ptr {
    Heap(CellIndex),
    Const(ConstIndex),
}

/// The tagged value word (§3).
///
/// Five immediate/pointer categories, matching the spec exactly:
/// small integer, small unsigned, character, symbol id, and a cell
/// pointer. What the pointed-to cell *means* (plain cons, boxed numeric,
/// or array descriptor) is a property of the cell, not of the pointer
/// (see [`crate::heap::Cell`]).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Word {
    /// Small signed fixnum (the "integer" rank of the promotion ladder).
    Int(i32),
    /// Small unsigned fixnum (the "unsigned" rank of the promotion ladder).
    UInt(u32),
    /// A single character.
    Char(char),
    /// An interned symbol id, including every reserved control symbol.
    Symbol(SymbolId),
    /// A pointer to a cell in the mutable arena or the constant heap.
    Ptr(Ptr),
}

impl Word {
    #[inline]
    pub fn heap_ptr(ix: CellIndex) -> Self {
        Word::Ptr(Ptr::Heap(ix))
    }

    #[inline]
    pub fn const_ptr(ix: ConstIndex) -> Self {
        Word::Ptr(Ptr::Const(ix))
    }

    #[inline]
    pub fn is_immediate(&self) -> bool {
        !matches!(self, Word::Ptr(_))
    }

    /// Fixed 8-byte on-the-wire encoding used when a `Word` is stored as
    /// an array element (§4.B "vectors of words") rather than kept as a
    /// live Rust value: one tag byte plus a 4-byte little-endian
    /// payload, padded to 8 bytes so every element in a word-array is
    /// the same stride regardless of variant.
    pub fn encode(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        let (tag, payload): (u8, u32) = match self {
            Word::Int(v) => (0, v as u32),
            Word::UInt(v) => (1, v),
            Word::Char(c) => (2, c as u32),
            Word::Symbol(s) => (3, s.0),
            Word::Ptr(Ptr::Heap(ix)) => (4, ix.0),
            Word::Ptr(Ptr::Const(ix)) => (5, ix.0),
        };
        out[0] = tag;
        out[4..8].copy_from_slice(&payload.to_le_bytes());
        out
    }

    pub fn decode(bytes: [u8; 8]) -> Word {
        let payload = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        match bytes[0] {
            0 => Word::Int(payload as i32),
            1 => Word::UInt(payload),
            2 => Word::Char(char::from_u32(payload).unwrap_or('\u{FFFD}')),
            3 => Word::Symbol(SymbolId(payload)),
            4 => Word::Ptr(Ptr::Heap(CellIndex(payload))),
            5 => Word::Ptr(Ptr::Const(ConstIndex(payload))),
            other => panic!("corrupt word encoding, unknown tag {other}"),
        }
    }
}

/// The widened numeric tower used by arithmetic fundamentals (§4.G
/// tie-breaks). Ranks are listed in ascending promotion order; mixed-type
/// arithmetic promotes both operands to `max(rank_a, rank_b)` before
/// computing. This exact order, fixnum int, fixnum unsigned, boxed i32,
/// boxed u32, boxed f32, boxed i64, boxed u64, boxed f64, is the
/// implementation's documented resolution of the spec's open promotion
/// question (see DESIGN.md).
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Numeric {
    Int(i32),
    UInt(u32),
    I32(i32),
    U32(u32),
    F32(f32),
    I64(i64),
    U64(u64),
    F64(f64),
}

impl Numeric {
    pub const fn rank(&self) -> u8 {
        match self {
            Numeric::Int(_) => 0,
            Numeric::UInt(_) => 1,
            Numeric::I32(_) => 2,
            Numeric::U32(_) => 3,
            Numeric::F32(_) => 4,
            Numeric::I64(_) => 5,
            Numeric::U64(_) => 6,
            Numeric::F64(_) => 7,
        }
    }

    /// Widen this value to the given rank. `rank` must be `>= self.rank()`.
    pub fn widen_to(self, rank: u8) -> Numeric {
        if rank == self.rank() {
            return self;
        }
        // Always materialize through f64/i64 as an intermediate; every
        // rank below F64 fits losslessly in i64 or f64 for the domains
        // this interpreter targets (embedded control programs, not
        // numerical analysis).
        match rank {
            0 => Numeric::Int(self.as_i64() as i32),
            1 => Numeric::UInt(self.as_i64() as u32),
            2 => Numeric::I32(self.as_i64() as i32),
            3 => Numeric::U32(self.as_i64() as u32),
            4 => Numeric::F32(self.as_f64() as f32),
            5 => Numeric::I64(self.as_i64()),
            6 => Numeric::U64(self.as_i64() as u64),
            7 => Numeric::F64(self.as_f64()),
            _ => unreachable!("numeric rank out of range"),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            Numeric::Int(v) => v as i64,
            Numeric::UInt(v) => v as i64,
            Numeric::I32(v) => v as i64,
            Numeric::U32(v) => v as i64,
            Numeric::F32(v) => v as i64,
            Numeric::I64(v) => v,
            Numeric::U64(v) => v as i64,
            Numeric::F64(v) => v as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Numeric::Int(v) => v as f64,
            Numeric::UInt(v) => v as f64,
            Numeric::I32(v) => v as f64,
            Numeric::U32(v) => v as f64,
            Numeric::F32(v) => v as f64,
            Numeric::I64(v) => v as f64,
            Numeric::U64(v) => v as f64,
            Numeric::F64(v) => v,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Numeric::F32(_) | Numeric::F64(_))
    }
}
