//! Runtime configuration (§4.M): a validating builder replacing the
//! positional arguments an `init(cells, aux, stack, ...)` C entry point
//! would take.
//!
//! Every capacity the interpreter needs up front is gathered here and
//! checked once, at construction, rather than scattered across each
//! subsystem's own constructor trusting its caller.

use crate::error::RuntimeError;

/// Sizing for every fixed-capacity region the heap and evaluator own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    pub cell_capacity: u32,
    pub aux_bytes: u32,
    pub const_capacity: u32,
    pub extension_capacity: u32,
    pub kstack_capacity: u32,
    pub gc_mark_stack_depth: u32,
}

impl HeapConfig {
    pub fn builder() -> HeapConfigBuilder {
        HeapConfigBuilder::default()
    }
}

/// Builder for [`HeapConfig`]. Every field has a small but usable
/// default; `build` rejects any configuration with a zero-sized region,
/// since a zero-capacity arena or stack can never make progress.
#[derive(Debug)]
pub struct HeapConfigBuilder {
    cell_capacity: u32,
    aux_bytes: u32,
    const_capacity: u32,
    extension_capacity: u32,
    kstack_capacity: u32,
    gc_mark_stack_depth: u32,
}

impl Default for HeapConfigBuilder {
    fn default() -> Self {
        HeapConfigBuilder {
            cell_capacity: 4096,
            aux_bytes: 64 * 1024,
            const_capacity: 256,
            extension_capacity: 64,
            kstack_capacity: 1024,
            gc_mark_stack_depth: 1024,
        }
    }
}

impl HeapConfigBuilder {
    pub fn cell_capacity(mut self, n: u32) -> Self {
        self.cell_capacity = n;
        self
    }

    pub fn aux_bytes(mut self, n: u32) -> Self {
        self.aux_bytes = n;
        self
    }

    pub fn const_capacity(mut self, n: u32) -> Self {
        self.const_capacity = n;
        self
    }

    pub fn extension_capacity(mut self, n: u32) -> Self {
        self.extension_capacity = n;
        self
    }

    pub fn kstack_capacity(mut self, n: u32) -> Self {
        self.kstack_capacity = n;
        self
    }

    pub fn gc_mark_stack_depth(mut self, n: u32) -> Self {
        self.gc_mark_stack_depth = n;
        self
    }

    pub fn build(self) -> Result<HeapConfig, RuntimeError> {
        if self.cell_capacity == 0
            || self.aux_bytes == 0
            || self.const_capacity == 0
            || self.kstack_capacity == 0
            || self.gc_mark_stack_depth == 0
        {
            return Err(RuntimeError::Fatal(
                "heap configuration cannot have a zero-sized region".into(),
            ));
        }
        Ok(HeapConfig {
            cell_capacity: self.cell_capacity,
            aux_bytes: self.aux_bytes,
            const_capacity: self.const_capacity,
            extension_capacity: self.extension_capacity,
            kstack_capacity: self.kstack_capacity,
            gc_mark_stack_depth: self.gc_mark_stack_depth,
        })
    }
}
