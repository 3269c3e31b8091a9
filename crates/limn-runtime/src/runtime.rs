//! The aggregate embedding value (§9 "Global mutable state" design note,
//! §6 "Embedding API").
//!
//! Rather than a process-wide heap, scheduler and symbol table reached
//! through hidden statics, every one of those lives behind a single
//! `Runtime` constructed by the host at [`Runtime::init`] and threaded
//! explicitly through every subsequent call. This makes multiple
//! isolated interpreters in one process possible and keeps tests free of
//! shared global state.

use crate::channel::CharChannel;
use crate::scheduler::{RunOutcome, Scheduler, StepOutcome};
use limn_core::{reserved, ExtensionFn, Heap, HeapConfig, RuntimeError, SymbolId, Word};
use std::collections::HashMap;
use tracing::warn;

/// State reported by [`Runtime::eval_state`] (§6 `get_eval_state`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalState {
    /// No program has been loaded yet.
    None,
    /// The scheduler is actively making progress.
    Running,
    /// [`Runtime::pause_eval_with_gc`] was called; [`Runtime::continue_eval`]
    /// resumes.
    Paused,
    /// Every context has finished or been killed.
    Dead,
    /// [`Runtime::kill_eval`] tore every context down.
    Killed,
}

/// The handful of host-supplied callbacks named in §6: critical errors,
/// context completion, a monotonic microsecond clock, a sleep primitive,
/// dynamic loading of extensions, and formatted output. Each is optional;
/// a host embedding only the pieces it needs leaves the rest unset.
pub struct HostCallbacks {
    pub critical_error: Option<Box<dyn FnMut(&str) + Send>>,
    pub context_done: Option<Box<dyn FnMut(crate::context::ContextId, Word) + Send>>,
    pub timestamp_us: Option<Box<dyn FnMut() -> u64 + Send>>,
    pub usleep: Option<Box<dyn FnMut(u64) + Send>>,
    pub dynamic_loader: Option<Box<dyn FnMut(&str) -> Option<ExtensionFn> + Send>>,
    pub printf: Option<Box<dyn FnMut(&str) + Send>>,
}

impl HostCallbacks {
    fn now_us(&mut self) -> u64 {
        match &mut self.timestamp_us {
            Some(f) => f(),
            None => 0,
        }
    }
}

/// The single value a host constructs at startup and threads through
/// every subsequent embedding call (§6 `init`).
pub struct Runtime {
    pub heap: Heap,
    pub scheduler: Scheduler,
    pub config: HeapConfig,
    pub callbacks: HostCallbacks,
    state: EvalState,
    channels: HashMap<u32, Box<dyn CharChannel + Send>>,
    next_channel_id: u32,
}

impl Runtime {
    /// §6 `init`: build the heap, aux memory, scheduler, and extension
    /// table from a validated [`HeapConfig`].
    pub fn init(config: HeapConfig, quantum: u32, event_queue_capacity: usize) -> Self {
        let heap = Heap::new(
            config.cell_capacity,
            config.aux_bytes,
            config.const_capacity,
            config.extension_capacity,
        );
        let scheduler = Scheduler::new(
            quantum,
            config.kstack_capacity,
            16,
            event_queue_capacity,
        );
        Runtime {
            heap,
            scheduler,
            config,
            callbacks: HostCallbacks::default(),
            state: EvalState::None,
            channels: HashMap::new(),
            next_channel_id: 0,
        }
    }

    pub fn eval_state(&self) -> EvalState {
        self.state
    }

    /// §6 `create_string_char_channel`: register an in-memory character
    /// source and return a handle the host can later feed to an external
    /// parser. The parser itself is not this crate's concern (§1); this
    /// only satisfies the contract the core exposes.
    pub fn create_string_char_channel(&mut self, source: &str) -> u32 {
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        self.channels
            .insert(id, Box::new(crate::channel::StrChannel::new(source)));
        id
    }

    pub fn channel_mut(&mut self, id: u32) -> Option<&mut (dyn CharChannel + Send)> {
        self.channels.get_mut(&id).map(|b| b.as_mut())
    }

    /// §6 `send_message`.
    pub fn send_message(&mut self, cid: crate::context::ContextId, v: Word) -> bool {
        self.scheduler.send(cid, v)
    }

    /// §6 `add_extension`.
    pub fn add_extension(&mut self, name: &str, handler: ExtensionFn) -> Result<SymbolId, RuntimeError> {
        let id = self.heap.symbols.intern(name, &mut self.heap.aux);
        self.heap.extensions.add_extension(id, handler)?;
        Ok(id)
    }

    /// Spawn a context evaluating `entry_exp` in the global environment.
    pub fn spawn(&mut self, entry_exp: Word) -> crate::context::ContextId {
        let env = self.heap.global_env;
        self.state = EvalState::Running;
        self.scheduler.spawn(entry_exp, env)
    }

    /// §4.H cancellation: kill one context. Asynchronous from the host's
    /// perspective, observed at the target's next safepoint.
    pub fn kill_context(&mut self, cid: crate::context::ContextId) {
        self.scheduler.kill(cid);
    }

    /// §6 `kill_eval`: tear down every context and mark the runtime
    /// killed, rather than cancelling a single one.
    pub fn kill_eval(&mut self) {
        let ids: Vec<_> = self.scheduler.contexts().map(|c| c.id).collect();
        for cid in ids {
            self.scheduler.kill(cid);
        }
        self.state = EvalState::Killed;
    }

    /// §6 `pause_eval_with_gc`: run a GC cycle over every live root and
    /// mark the runtime paused. `ms_hint` is accepted for parity with the
    /// embedding contract; this in-process scheduler has no background
    /// thread to actually suspend.
    pub fn pause_eval_with_gc(&mut self, _ms_hint: u32) -> Result<(), RuntimeError> {
        self.collect_garbage()?;
        self.state = EvalState::Paused;
        Ok(())
    }

    pub fn continue_eval(&mut self) {
        if self.state == EvalState::Paused {
            self.state = EvalState::Running;
        }
    }

    /// Run one full GC cycle over every currently-live root (global
    /// environment plus every context's registers, continuation stack,
    /// and mailbox).
    pub fn collect_garbage(&mut self) -> Result<limn_core::GcStats, RuntimeError> {
        let mut roots = self.scheduler.all_roots();
        roots.push(self.heap.global_env);
        limn_core::gc_collect(&mut self.heap, &roots, self.config.gc_mark_stack_depth)
    }

    /// Drive the scheduler to quiescence (every context either finished
    /// or blocked), reporting fatal errors to the critical-error
    /// callback rather than unwinding past the embedding boundary.
    pub fn run_to_quiescence(&mut self) -> Result<(), RuntimeError> {
        loop {
            let now = self.callbacks.now_us();
            match self.scheduler.step(&mut self.heap, now) {
                Ok(StepOutcome::AllDone) => {
                    self.state = EvalState::Dead;
                    return Ok(());
                }
                Ok(StepOutcome::Idle) => return Ok(()),
                Ok(StepOutcome::Ran(RunOutcome::Failed)) => continue,
                Ok(StepOutcome::Ran(_)) => continue,
                Err(e) => {
                    if e.is_fatal() {
                        if let Some(cb) = &mut self.callbacks.critical_error {
                            cb(&e.to_string());
                        } else {
                            warn!(error = %e, "unhandled fatal runtime error");
                        }
                        return Err(e);
                    }
                    continue;
                }
            }
        }
    }

    /// §6 `load_and_eval_program_incremental`: evaluate top-level forms
    /// as they are produced. Since the textual reader is an external
    /// collaborator (§1), this accepts already-parsed forms (one `Word`
    /// per top-level expression) from the caller rather than driving a
    /// tokenizer itself, and reports each result through `done_cb`.
    pub fn load_and_eval_program_incremental(
        &mut self,
        forms: impl IntoIterator<Item = Word>,
        mut done_cb: impl FnMut(Word),
    ) -> Result<(), RuntimeError> {
        for form in forms {
            let cid = self.spawn(form);
            self.run_to_quiescence()?;
            let result = self
                .scheduler
                .context(cid)
                .map(|c| c.r)
                .unwrap_or(Word::Symbol(reserved::DONE));
            if let Some(cb) = &mut self.callbacks.context_done {
                cb(cid, result);
            }
            done_cb(result);
        }
        Ok(())
    }

    /// §6 `running_iterator`: invoke `f` once per runnable context with
    /// the scheduler quiesced.
    pub fn running_iterator(&self, mut f: impl FnMut(&crate::context::Context)) {
        for ctx in self.scheduler.contexts() {
            if ctx.is_runnable() {
                f(ctx);
            }
        }
    }

    /// §6 `blocked_iterator`: invoke `f` once per blocked or sleeping
    /// context.
    pub fn blocked_iterator(&self, mut f: impl FnMut(&crate::context::Context)) {
        for ctx in self.scheduler.contexts() {
            if !ctx.is_runnable() {
                f(ctx);
            }
        }
    }
}

impl Default for HostCallbacks {
    fn default() -> Self {
        HostCallbacks {
            critical_error: None,
            context_done: None,
            timestamp_us: None,
            usleep: None,
            dynamic_loader: None,
            printf: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limn_core::Numeric;

    fn runtime() -> Runtime {
        let config = HeapConfig::builder()
            .cell_capacity(64)
            .aux_bytes(4096)
            .const_capacity(4)
            .extension_capacity(4)
            .kstack_capacity(64)
            .gc_mark_stack_depth(64)
            .build()
            .unwrap();
        Runtime::init(config, 1000, 8)
    }

    #[test]
    fn init_starts_with_no_contexts_and_no_program() {
        let rt = runtime();
        assert_eq!(rt.eval_state(), EvalState::None);
        assert_eq!(rt.scheduler.len(), 0);
    }

    #[test]
    fn spawn_and_run_to_quiescence_finishes_a_self_evaluating_form() {
        let mut rt = runtime();
        let cid = rt.spawn(Word::Int(41));
        rt.run_to_quiescence().unwrap();
        assert!(rt.scheduler.context(cid).is_none());
    }

    #[test]
    fn kill_eval_tears_down_every_context_and_marks_killed() {
        let mut rt = runtime();
        rt.spawn(Word::Int(1));
        rt.spawn(Word::Int(2));
        rt.kill_eval();
        assert_eq!(rt.eval_state(), EvalState::Killed);
        assert!(rt.scheduler.contexts().all(|c| c.state == crate::context::ContextState::Killed));
    }

    #[test]
    fn create_string_char_channel_round_trips_characters() {
        let mut rt = runtime();
        let id = rt.create_string_char_channel("ab");
        let ch = rt.channel_mut(id).unwrap();
        assert_eq!(ch.get(), Some('a'));
        assert_eq!(ch.get(), Some('b'));
    }

    #[test]
    fn add_extension_then_lookup_through_the_heap() {
        let mut rt = runtime();
        rt.add_extension("double", Box::new(|args, heap| {
            let n = heap.numeric_of(heap.car(args)?)?;
            heap.alloc_boxed(Numeric::I64(n.as_i64() * 2))
        }))
        .unwrap();
        assert!(rt.heap.extensions.len() == 1);
    }

    #[test]
    fn pause_runs_a_gc_cycle_and_marks_paused() {
        let mut rt = runtime();
        rt.pause_eval_with_gc(0).unwrap();
        assert_eq!(rt.eval_state(), EvalState::Paused);
        rt.continue_eval();
        assert_eq!(rt.eval_state(), EvalState::Running);
    }

    #[test]
    fn load_and_eval_program_incremental_reports_each_result() {
        let mut rt = runtime();
        let mut results = Vec::new();
        rt.load_and_eval_program_incremental([Word::Int(1), Word::Int(2)], |r| results.push(r))
            .unwrap();
        assert_eq!(results, vec![Word::Int(1), Word::Int(2)]);
    }
}
