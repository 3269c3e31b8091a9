//! The cooperative scheduler (§4.H): context lifecycle, ready/blocked/
//! sleeping queues, quantum-based round-robin, mailboxes, and the event
//! queue.
//!
//! Intrusive doubly-linked lists in the base design become plain
//! id-queues here (§9 "pointer-heavy, cyclic data" re-architecture): the
//! arena of contexts is a `HashMap<ContextId, Context>` the scheduler
//! owns outright, and a context's "queue membership" is just which
//! `VecDeque`/`Vec` of ids currently contains it. Nothing but this module
//! ever walks those queues, so there is no dangling-pointer hazard when a
//! context is torn down.
//!
//! A production coroutine library (the teacher's own `may`-backed
//! scheduler) is deliberately not reused here: the spec calls for an
//! application-visible quantum, explicit ready/blocked/sleeping queues,
//! and a single safepoint as the sole preemption point (§9), semantics
//! an opaque third-party scheduler would hide. See `DESIGN.md`.

use crate::context::{Context, ContextId, ContextState};
use limn_core::{Heap, RuntimeError, Word};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace, warn};

/// One pending `(tag, payload)` entry in the event queue (§4.H "Events").
#[derive(Clone, Copy, Debug)]
pub struct Event {
    pub tag: Word,
    pub payload: Word,
}

/// Outcome of running one context for up to one quantum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The context used its whole quantum and is still runnable.
    QuantumExpired,
    /// The context suspended itself (yield, sleep, recv, event-wait).
    Suspended,
    /// The context reached `DONE`; it has been removed from the scheduler.
    Finished,
    /// The context failed with an unrecoverable error; removed from the
    /// scheduler. The error's reserved symbol was already left in `r`.
    Failed,
}

/// What the scheduler accomplished in one top-level `step`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// A context ran (see the nested [`RunOutcome`] for how it ended).
    Ran(RunOutcome),
    /// Nothing is ready, but some context is blocked or sleeping; the
    /// host should wait for an event, a message, or the next wake time.
    Idle,
    /// No contexts remain at all.
    AllDone,
}

/// Owns every evaluation context and the queues that multiplex them
/// (§4.H, §5).
pub struct Scheduler {
    contexts: HashMap<ContextId, Context>,
    ready: VecDeque<ContextId>,
    sleeping: Vec<ContextId>,
    blocked_recv: Vec<ContextId>,
    blocked_event: Vec<ContextId>,
    next_id: ContextId,
    quantum: u32,
    default_kstack_capacity: u32,
    default_mailbox_capacity: usize,
    event_queue: VecDeque<Event>,
    event_queue_capacity: usize,
}

impl Scheduler {
    pub fn new(quantum: u32, default_kstack_capacity: u32, default_mailbox_capacity: usize, event_queue_capacity: usize) -> Self {
        Scheduler {
            contexts: HashMap::new(),
            ready: VecDeque::new(),
            sleeping: Vec::new(),
            blocked_recv: Vec::new(),
            blocked_event: Vec::new(),
            next_id: 1,
            quantum,
            default_kstack_capacity,
            default_mailbox_capacity,
            event_queue: VecDeque::new(),
            event_queue_capacity,
        }
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn context(&self, cid: ContextId) -> Option<&Context> {
        self.contexts.get(&cid)
    }

    pub fn context_mut(&mut self, cid: ContextId) -> Option<&mut Context> {
        self.contexts.get_mut(&cid)
    }

    /// Temporarily remove a context so the evaluator can hold it by value
    /// while still calling back into the scheduler (e.g. `spawn`, `send`)
    /// without a double mutable borrow. Paired with [`Scheduler::put_context`].
    pub(crate) fn take_context(&mut self, cid: ContextId) -> Option<Context> {
        self.contexts.remove(&cid)
    }

    pub(crate) fn put_context(&mut self, ctx: Context) {
        self.contexts.insert(ctx.id, ctx);
    }

    pub fn contexts(&self) -> impl Iterator<Item = &Context> {
        self.contexts.values()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Every word every live context still roots, for GC (§3 invariants).
    pub fn all_roots(&self) -> Vec<Word> {
        self.contexts.values().flat_map(Context::roots).collect()
    }

    /// Spawn a new context with the given entry expression/environment,
    /// runnable immediately (§3 "Lifecycle").
    pub fn spawn(&mut self, entry_exp: Word, entry_env: Word) -> ContextId {
        let id = self.next_id;
        self.next_id += 1;
        let ctx = Context::new(id, entry_exp, entry_env, self.default_kstack_capacity, self.default_mailbox_capacity);
        self.contexts.insert(id, ctx);
        self.ready.push_back(id);
        debug!(context = id, "spawned");
        id
    }

    /// `send(cid, v)` (§4.H, §6): enqueue `v` into `cid`'s mailbox. Returns
    /// `false` on mailbox overflow or an unknown target; the sender is
    /// never blocked by a full mailbox.
    pub fn send(&mut self, cid: ContextId, v: Word) -> bool {
        let Some(ctx) = self.contexts.get_mut(&cid) else {
            warn!(context = cid, "send to unknown context");
            return false;
        };
        if ctx.mailbox.len() >= ctx.mailbox_capacity {
            warn!(context = cid, "mailbox overflow");
            return false;
        }
        ctx.mailbox.push_back(v);
        if ctx.state == ContextState::BlockedOnRecv {
            ctx.state = ContextState::Ready;
            self.blocked_recv.retain(|&id| id != cid);
            self.ready.push_back(cid);
            trace!(context = cid, "woken by message");
        }
        true
    }

    /// Push `(tag, payload)` onto the event queue, waking any context
    /// blocked on a matching tag (§4.H "Events").
    pub fn push_event(&mut self, tag: Word, payload: Word) -> bool {
        if self.event_queue.len() >= self.event_queue_capacity {
            warn!("event queue overflow");
            return false;
        }
        self.event_queue.push_back(Event { tag, payload });
        let mut woken = Vec::new();
        self.blocked_event.retain(|&cid| {
            let matches = self
                .contexts
                .get(&cid)
                .and_then(|c| c.blocked_event_tag)
                .is_some_and(|t| t == tag);
            if matches {
                woken.push(cid);
                false
            } else {
                true
            }
        });
        for cid in woken {
            if let Some(ctx) = self.contexts.get_mut(&cid) {
                ctx.state = ContextState::Ready;
                ctx.blocked_event_tag = None;
            }
            self.ready.push_back(cid);
            trace!(context = cid, "woken by event");
        }
        true
    }

    /// Pop the oldest queued event still matching `tag`, if any. Used by
    /// the evaluator's event-wait fundamental to check for an event that
    /// already arrived before the context asked for it.
    pub fn take_event(&mut self, tag: Word) -> Option<Word> {
        let pos = self.event_queue.iter().position(|e| e.tag == tag)?;
        Some(self.event_queue.remove(pos).unwrap().payload)
    }

    /// `kill(cid)` (§4.H "Cancellation", §5): asynchronous from the
    /// host's perspective, observed at the target's next safepoint.
    pub fn kill(&mut self, cid: ContextId) {
        if let Some(ctx) = self.contexts.get_mut(&cid) {
            ctx.state = ContextState::Killed;
            debug!(context = cid, "marked for kill");
        }
    }

    fn wake_sleepers(&mut self, now_us: u64) {
        let mut woken = Vec::new();
        self.sleeping.retain(|&cid| {
            let due = self
                .contexts
                .get(&cid)
                .and_then(|c| c.wake_time_us)
                .is_some_and(|t| t <= now_us);
            if due {
                woken.push(cid);
                false
            } else {
                true
            }
        });
        for cid in woken {
            if let Some(ctx) = self.contexts.get_mut(&cid) {
                ctx.state = ContextState::Ready;
                ctx.wake_time_us = None;
            }
            self.ready.push_back(cid);
            trace!(context = cid, "woken by timer");
        }
    }

    fn remove(&mut self, cid: ContextId) {
        self.contexts.remove(&cid);
        self.ready.retain(|&id| id != cid);
        self.sleeping.retain(|&id| id != cid);
        self.blocked_recv.retain(|&id| id != cid);
        self.blocked_event.retain(|&id| id != cid);
    }

    /// Drive the scheduler through exactly one scheduling decision (§4.H
    /// steps 1-4): wake due sleepers, pick the head of `ready`, run it for
    /// up to one quantum, and re-file it according to how it suspended.
    pub fn step(&mut self, heap: &mut Heap, now_us: u64) -> Result<StepOutcome, RuntimeError> {
        self.wake_sleepers(now_us);

        if self.contexts.is_empty() {
            return Ok(StepOutcome::AllDone);
        }

        let Some(cid) = self.ready.pop_front() else {
            return Ok(StepOutcome::Idle);
        };

        // A killed context may still be sitting in `ready` if it was
        // killed between scheduling opportunities; drop it here rather
        // than running it (§4.H "Cancellation").
        if matches!(self.contexts.get(&cid).map(|c| c.state), Some(ContextState::Killed)) {
            self.remove(cid);
            return Ok(StepOutcome::Ran(RunOutcome::Finished));
        }

        let quantum = self.quantum;
        let outcome = crate::evaluator::run_context(cid, self, heap, quantum, now_us)?;

        match outcome {
            RunOutcome::QuantumExpired => {
                self.ready.push_back(cid);
            }
            RunOutcome::Suspended => {
                let state = self.contexts.get(&cid).map(|c| c.state);
                match state {
                    Some(ContextState::Ready) => self.ready.push_back(cid),
                    Some(ContextState::Sleeping) => self.sleeping.push(cid),
                    Some(ContextState::BlockedOnRecv) => self.blocked_recv.push(cid),
                    Some(ContextState::BlockedOnEvent) => self.blocked_event.push(cid),
                    Some(ContextState::Killed) => self.remove(cid),
                    _ => {}
                }
            }
            RunOutcome::Finished | RunOutcome::Failed => {
                self.remove(cid);
            }
        }

        Ok(StepOutcome::Ran(outcome))
    }

    /// Run until every context has finished or the scheduler would need
    /// to idle waiting for an external event/message/timer (§4.H step 2).
    /// `now_us` is supplied by the caller each tick (the platform
    /// timestamp source is an external collaborator, §1).
    pub fn run_to_quiescence(&mut self, heap: &mut Heap, mut now_us: impl FnMut() -> u64) -> Result<(), RuntimeError> {
        loop {
            match self.step(heap, now_us())? {
                StepOutcome::AllDone => return Ok(()),
                StepOutcome::Idle => return Ok(()),
                StepOutcome::Ran(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limn_core::{reserved, Heap};

    fn nil() -> Word {
        Word::Symbol(reserved::NIL)
    }

    #[test]
    fn spawn_enqueues_context_ready() {
        let mut sched = Scheduler::new(100, 64, 8, 8);
        let cid = sched.spawn(Word::Int(1), nil());
        assert_eq!(sched.len(), 1);
        assert!(sched.context(cid).unwrap().is_runnable());
    }

    #[test]
    fn send_to_blocked_recv_context_wakes_it() {
        let mut sched = Scheduler::new(100, 64, 8, 8);
        let cid = sched.spawn(Word::Int(1), nil());
        sched.context_mut(cid).unwrap().state = ContextState::BlockedOnRecv;
        sched.blocked_recv.push(cid);
        assert!(sched.send(cid, Word::Int(42)));
        assert_eq!(sched.context(cid).unwrap().state, ContextState::Ready);
        assert_eq!(sched.context(cid).unwrap().mailbox.front(), Some(&Word::Int(42)));
    }

    #[test]
    fn mailbox_overflow_reports_failure_without_blocking_sender() {
        let mut sched = Scheduler::new(100, 64, 1, 8);
        let cid = sched.spawn(Word::Int(1), nil());
        assert!(sched.send(cid, Word::Int(1)));
        assert!(!sched.send(cid, Word::Int(2)));
    }

    #[test]
    fn send_to_unknown_context_fails() {
        let mut sched = Scheduler::new(100, 64, 8, 8);
        assert!(!sched.send(999, Word::Int(1)));
    }

    #[test]
    fn sleepers_wake_once_due() {
        let mut sched = Scheduler::new(100, 64, 8, 8);
        let cid = sched.spawn(Word::Int(1), nil());
        sched.context_mut(cid).unwrap().state = ContextState::Sleeping;
        sched.context_mut(cid).unwrap().wake_time_us = Some(1_000);
        sched.sleeping.push(cid);
        sched.wake_sleepers(500);
        assert_eq!(sched.context(cid).unwrap().state, ContextState::Sleeping);
        sched.wake_sleepers(1_000);
        assert_eq!(sched.context(cid).unwrap().state, ContextState::Ready);
    }

    #[test]
    fn kill_marks_context_and_step_drops_it() {
        let mut heap = Heap::new(64, 1024, 4, 4);
        let mut sched = Scheduler::new(100, 64, 8, 8);
        let cid = sched.spawn(Word::Symbol(reserved::NIL), nil());
        sched.kill(cid);
        let out = sched.step(&mut heap, 0).unwrap();
        assert_eq!(out, StepOutcome::Ran(RunOutcome::Finished));
        assert!(sched.context(cid).is_none());
    }

    #[test]
    fn step_on_empty_scheduler_is_all_done() {
        let mut heap = Heap::new(64, 1024, 4, 4);
        let mut sched = Scheduler::new(100, 64, 8, 8);
        assert_eq!(sched.step(&mut heap, 0).unwrap(), StepOutcome::AllDone);
    }

    #[test]
    fn push_event_wakes_matching_blocked_context() {
        let mut sched = Scheduler::new(100, 64, 8, 8);
        let cid = sched.spawn(Word::Int(1), nil());
        let tag = Word::Int(7);
        sched.context_mut(cid).unwrap().state = ContextState::BlockedOnEvent;
        sched.context_mut(cid).unwrap().blocked_event_tag = Some(tag);
        sched.blocked_event.push(cid);
        assert!(sched.push_event(tag, Word::Int(99)));
        assert_eq!(sched.context(cid).unwrap().state, ContextState::Ready);
    }

    #[test]
    fn event_queue_respects_capacity() {
        let mut sched = Scheduler::new(100, 64, 8, 1);
        assert!(sched.push_event(Word::Int(1), Word::Int(1)));
        assert!(!sched.push_event(Word::Int(2), Word::Int(2)));
    }
}
