//! The constant heap: a fixed-capacity, append-only region for values
//! baked in at build/flash time (§4.J).
//!
//! Slots are pre-sized at construction (one per constant the embedding
//! declares) and written exactly once. A second write to an already
//! populated slot is a programming error on the host's part, not a
//! recoverable runtime condition: it means the embedding's own
//! initialization code ran twice or raced, so it is reported as
//! [`RuntimeError::Fatal`] rather than threaded through as an ordinary
//! `Result` a Lisp program could observe and retry.

use crate::error::RuntimeError;
use crate::heap::Cell;

/// Fixed-size table of constant cells, indexed by [`crate::word::ConstIndex`].
pub struct ConstHeap {
    slots: Vec<Option<Cell>>,
}

impl ConstHeap {
    pub fn new(capacity: u32) -> Self {
        ConstHeap {
            slots: vec![None; capacity as usize],
        }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Write `cell` into slot `ix`. Idempotent if writing the identical
    /// cell again; fatal if the slot already holds something different.
    pub fn const_write(&mut self, ix: u32, cell: Cell) -> Result<(), RuntimeError> {
        let slot = self
            .slots
            .get_mut(ix as usize)
            .ok_or_else(|| RuntimeError::Fatal(format!("constant heap index {ix} out of range")))?;
        match slot {
            None => {
                *slot = Some(cell);
                Ok(())
            }
            Some(existing) if cells_equal(existing, &cell) => Ok(()),
            Some(_) => Err(RuntimeError::Fatal(format!(
                "constant heap slot {ix} written twice with different contents"
            ))),
        }
    }

    pub fn get(&self, ix: u32) -> Option<&Cell> {
        self.slots.get(ix as usize).and_then(|s| s.as_ref())
    }
}

fn cells_equal(a: &Cell, b: &Cell) -> bool {
    match (a, b) {
        (Cell::Cons { car: ca, cdr: da }, Cell::Cons { car: cb, cdr: db }) => ca == cb && da == db,
        (Cell::Boxed(na), Cell::Boxed(nb)) => na == nb,
        _ => false,
    }
}
