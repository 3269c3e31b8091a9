//! A single evaluator context: registers, continuation stack, and
//! mailbox (§4.G, §4.H, glossary "Context").

use limn_core::{reserved, KStack, Word};
use std::collections::VecDeque;

pub type ContextId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Ready,
    BlockedOnRecv,
    BlockedOnEvent,
    Sleeping,
    Done,
    Killed,
}

/// A context's evaluator registers (§4.G: `curr_exp, curr_env, r, K`).
pub struct Context {
    pub id: ContextId,
    pub curr_exp: Word,
    pub curr_env: Word,
    pub r: Word,
    pub apply_k: bool,
    pub kstack: KStack,
    pub state: ContextState,
    pub mailbox: VecDeque<Word>,
    pub mailbox_capacity: usize,
    pub wake_time_us: Option<u64>,
    pub blocked_event_tag: Option<Word>,
    /// Incremented on every reduction with no allocation; reset on
    /// progress. Two consecutive GC cycles without progress fail the
    /// context (§4.G allocation-failure retry protocol).
    pub no_progress_gc_cycles: u32,
}

impl Context {
    pub fn new(id: ContextId, entry_exp: Word, entry_env: Word, kstack_capacity: u32, mailbox_capacity: usize) -> Self {
        Context {
            id,
            curr_exp: entry_exp,
            curr_env: entry_env,
            r: Word::Symbol(reserved::NIL),
            apply_k: false,
            kstack: KStack::new(kstack_capacity),
            state: ContextState::Ready,
            mailbox: VecDeque::new(),
            mailbox_capacity,
            wake_time_us: None,
            blocked_event_tag: None,
            no_progress_gc_cycles: 0,
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.state == ContextState::Ready
    }

    /// Words this context still roots, for GC: the continuation stack
    /// plus the registers that may hold pointers.
    pub fn roots(&self) -> Vec<Word> {
        let mut roots: Vec<Word> = self.kstack.iter().copied().collect();
        roots.push(self.curr_exp);
        roots.push(self.curr_env);
        roots.push(self.r);
        roots.extend(self.mailbox.iter().copied());
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_is_ready_with_empty_mailbox() {
        let ctx = Context::new(0, Word::Int(1), Word::Symbol(reserved::NIL), 16, 4);
        assert!(ctx.is_runnable());
        assert!(ctx.mailbox.is_empty());
    }

    #[test]
    fn roots_include_registers_and_mailbox_contents() {
        let mut ctx = Context::new(0, Word::Int(1), Word::Int(2), 16, 4);
        ctx.r = Word::Int(3);
        ctx.mailbox.push_back(Word::Int(4));
        let roots = ctx.roots();
        assert!(roots.contains(&Word::Int(1)));
        assert!(roots.contains(&Word::Int(2)));
        assert!(roots.contains(&Word::Int(3)));
        assert!(roots.contains(&Word::Int(4)));
    }
}
