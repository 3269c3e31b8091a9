//! The CPS dispatch loop (§4.G): a tree-walking evaluator reified as an
//! explicit state machine over a context's registers, with no host
//! recursion. Every "call a function" or "evaluate a subexpression" that
//! a recursive-descent interpreter would do with the Rust call stack is
//! instead a register assignment plus, where the caller still has work
//! left to do afterward, a [`Frame`] push onto the context's [`KStack`].
//!
//! Tail calls are the absence of a push: applying a closure in tail
//! position overwrites `curr_exp`/`curr_env` directly rather than
//! recording anything to come back to, so a loop written as
//! self-recursion runs in constant continuation-stack space exactly as
//! §3's invariants require.

use crate::callable::{self, Callable};
use crate::context::{Context, ContextState};
use crate::frame::{self, Frame};
use crate::scheduler::{RunOutcome, Scheduler};
use limn_core::{gc_collect, reserved, ExtensionRegistry, Heap, RuntimeError, SymbolId, Word};
use tracing::trace;

/// Call a registered extension handler. The registry is swapped out for
/// an empty placeholder for the duration of the call so `heap` can be
/// passed to the handler mutably without aliasing `heap.extensions`,
/// which the handler itself never needs to see (§4.I).
fn call_extension(heap: &mut Heap, id: SymbolId, args: Word) -> Result<Word, RuntimeError> {
    let registry = std::mem::replace(&mut heap.extensions, ExtensionRegistry::new(0));
    let result = match registry.lookup(id) {
        Some(handler) => handler(args, heap),
        None => Err(RuntimeError::EvalError(format!("{id:?} is not a registered extension"))),
    };
    heap.extensions = registry;
    result
}

/// One pass through the dispatch loop either evaluates `curr_exp` (when
/// `apply_k` is false) or resumes the top continuation frame with the
/// value in `r` (when `apply_k` is true).
enum Reduction {
    Progress,
    Suspend(ContextState),
    Finished,
}

fn is_nil(w: Word) -> bool {
    matches!(w, Word::Symbol(s) if s == reserved::NIL)
}

fn nil() -> Word {
    Word::Symbol(reserved::NIL)
}

fn bool_word(b: bool) -> Word {
    Word::Symbol(if b { reserved::TRUE } else { reserved::FALSE })
}

/// §4.G "if-truthiness": only `false` is false. `nil`, `0`, and every
/// other value (including the empty list) are true, decided in
/// DESIGN.md since the base spec leaves this an open question.
fn is_truthy(w: Word) -> bool {
    !matches!(w, Word::Symbol(s) if s == reserved::FALSE)
}

fn list_to_vec(heap: &Heap, mut list: Word) -> Result<Vec<Word>, RuntimeError> {
    let mut out = Vec::new();
    while heap.is_cons(list) {
        out.push(heap.car(list)?);
        list = heap.cdr(list)?;
    }
    Ok(out)
}

fn vec_to_list(heap: &mut Heap, items: &[Word]) -> Result<Word, RuntimeError> {
    let mut out = nil();
    for &item in items.iter().rev() {
        out = heap.cons(item, out)?;
    }
    Ok(out)
}

/// Copy only the frame spine of `env` (§4.F "lambda" shallow copy):
/// later `extend`s of the defining environment must not leak new
/// bindings into a closure captured earlier, but mutation of a binding
/// already present (`set!`/`set-car!` on a shared pair) still should.
fn shallow_copy_env(heap: &mut Heap, env: Word) -> Result<Word, RuntimeError> {
    let frames = list_to_vec(heap, env)?;
    vec_to_list(heap, &frames)
}

/// Retry an allocation up to once, collecting garbage across every live
/// context's roots in between (§4.G allocation-failure retry protocol).
/// Two GC cycles in a row that fail to free enough space for `ctx` fails
/// the context outright rather than retrying forever.
fn with_alloc_retry<T>(
    ctx: &mut Context,
    heap: &mut Heap,
    scheduler: &Scheduler,
    mark_stack_capacity: u32,
    mut f: impl FnMut(&mut Heap) -> Result<T, RuntimeError>,
) -> Result<T, RuntimeError> {
    match f(heap) {
        Ok(v) => {
            ctx.no_progress_gc_cycles = 0;
            Ok(v)
        }
        Err(RuntimeError::OutOfMemory) => {
            let mut roots = scheduler.all_roots();
            roots.extend(ctx.roots());
            roots.push(heap.global_env);
            gc_collect(heap, &roots, mark_stack_capacity)?;
            match f(heap) {
                Ok(v) => {
                    ctx.no_progress_gc_cycles = 0;
                    Ok(v)
                }
                Err(RuntimeError::OutOfMemory) => {
                    // A second collection run back-to-back, with no
                    // intervening mutation, cannot free anything the
                    // first one didn't already reclaim, so this is the
                    // one genuinely non-progressing cycle the allocation-
                    // failure protocol allows before failing the context
                    // (§4.G; see DESIGN.md).
                    ctx.no_progress_gc_cycles += 1;
                    Err(RuntimeError::OutOfMemory)
                }
                other => other,
            }
        }
        other => other,
    }
}

/// Push `frame` onto `ctx`'s continuation stack, mapping a stack
/// overflow to the same `OutOfMemory` the allocator reports (§4.E).
fn push(ctx: &mut Context, frame: Frame) -> Result<(), RuntimeError> {
    frame::push_frame(&mut ctx.kstack, frame)
}

/// Run `ctx` for up to `quantum` reduction steps. Returns the way the
/// context stopped; the caller (normally [`Scheduler::step`]) re-files it
/// according to the returned state.
pub fn run_context(
    cid: crate::context::ContextId,
    scheduler: &mut Scheduler,
    heap: &mut Heap,
    quantum: u32,
    now_us: u64,
) -> Result<RunOutcome, RuntimeError> {
    let mut ctx = scheduler
        .take_context(cid)
        .ok_or_else(|| RuntimeError::Fatal(format!("scheduler has no context {cid}")))?;

    let mark_stack_capacity = ctx.kstack.capacity().max(64);
    let mut ticks = 0u32;
    let result = loop {
        if ctx.state == ContextState::Killed {
            break Ok(RunOutcome::Finished);
        }
        if ticks >= quantum {
            break Ok(RunOutcome::QuantumExpired);
        }
        match reduce_one(&mut ctx, heap, scheduler, now_us, mark_stack_capacity) {
            Ok(Reduction::Progress) => {
                ticks += 1;
            }
            Ok(Reduction::Suspend(state)) => {
                ctx.state = state;
                break Ok(RunOutcome::Suspended);
            }
            Ok(Reduction::Finished) => {
                ctx.state = ContextState::Done;
                break Ok(RunOutcome::Finished);
            }
            Err(e) if e.is_fatal() => break Err(e),
            Err(e) => {
                trace!(context = cid, error = %e, "context failed");
                ctx.r = Word::Symbol(e.as_reserved_symbol().expect("non-fatal error has a reserved symbol"));
                ctx.state = ContextState::Done;
                break Ok(RunOutcome::Failed);
            }
        }
    };

    scheduler.put_context(ctx);
    result
}

fn reduce_one(
    ctx: &mut Context,
    heap: &mut Heap,
    scheduler: &mut Scheduler,
    now_us: u64,
    mark_stack_capacity: u32,
) -> Result<Reduction, RuntimeError> {
    if ctx.apply_k {
        return resume(ctx, heap, scheduler, now_us, mark_stack_capacity);
    }
    dispatch(ctx, heap, scheduler, mark_stack_capacity)
}

/// Evaluate `ctx.curr_exp` in `ctx.curr_env` by exactly one step.
fn dispatch(ctx: &mut Context, heap: &mut Heap, scheduler: &Scheduler, mark_stack_capacity: u32) -> Result<Reduction, RuntimeError> {
    let exp = ctx.curr_exp;

    // Self-evaluating: numbers, characters, nil/true/false, and any
    // symbol that is itself a fundamental/extension name used as a bare
    // value rather than called, everything that is not a cons cell or a
    // variable reference.
    match exp {
        Word::Int(_) | Word::UInt(_) => {
            ctx.r = exp;
            ctx.apply_k = true;
            return Ok(Reduction::Progress);
        }
        Word::Ptr(_) if !heap.is_cons(exp) => {
            ctx.r = exp;
            ctx.apply_k = true;
            return Ok(Reduction::Progress);
        }
        Word::Symbol(sym) => {
            if sym == reserved::NIL || sym == reserved::TRUE || sym == reserved::FALSE {
                ctx.r = exp;
            } else if callable::is_fundamental(sym) || heap.extensions.is_registered(sym) {
                ctx.r = exp;
            } else {
                ctx.r = limn_core::env::lookup(heap, ctx.curr_env, sym)?;
            }
            ctx.apply_k = true;
            return Ok(Reduction::Progress);
        }
        _ => {}
    }

    // `exp` is a cons cell: either a special form or a function
    // application.
    let head = heap.car(exp)?;
    let rest = heap.cdr(exp)?;

    if let Word::Symbol(sym) = head {
        match sym {
            reserved::QUOTE => {
                ctx.r = heap.car(rest)?;
                ctx.apply_k = true;
                return Ok(Reduction::Progress);
            }
            reserved::IF => {
                let cur_env = ctx.curr_env;
                let test = heap.car(rest)?;
                let rest2 = heap.cdr(rest)?;
                let then = heap.car(rest2)?;
                let rest3 = heap.cdr(rest2)?;
                let else_ = if is_nil(rest3) { bool_word(false) } else { heap.car(rest3)? };
                push(ctx, Frame::If { then, else_, env: cur_env })?;
                ctx.curr_exp = test;
                ctx.apply_k = false;
                return Ok(Reduction::Progress);
            }
            reserved::LAMBDA => {
                let cur_env = ctx.curr_env;
                let params = heap.car(rest)?;
                let body = heap.cdr(rest)?;
                let captured = with_alloc_retry(ctx, heap, scheduler, mark_stack_capacity, |h| shallow_copy_env(h, cur_env))?;
                ctx.r = with_alloc_retry(ctx, heap, scheduler, mark_stack_capacity, |h| callable::make_closure(h, params, body, captured))?;
                ctx.apply_k = true;
                return Ok(Reduction::Progress);
            }
            reserved::DEFINE => {
                let name = match heap.car(rest)? {
                    Word::Symbol(s) => s,
                    _ => return Err(RuntimeError::EvalError("define requires a symbol name".into())),
                };
                let value_exp = heap.car(heap.cdr(rest)?)?;
                push(ctx, Frame::SetGlobalEnv { key: name })?;
                ctx.curr_exp = value_exp;
                ctx.apply_k = false;
                return Ok(Reduction::Progress);
            }
            reserved::SET => {
                let name = match heap.car(rest)? {
                    Word::Symbol(s) => s,
                    _ => return Err(RuntimeError::EvalError("set! requires a symbol name".into())),
                };
                let value_exp = heap.car(heap.cdr(rest)?)?;
                push(ctx, Frame::SetVar { env: ctx.curr_env, key: name })?;
                ctx.curr_exp = value_exp;
                ctx.apply_k = false;
                return Ok(Reduction::Progress);
            }
            reserved::BEGIN => {
                return eval_progn(ctx, heap, rest, ctx.curr_env);
            }
            reserved::LET | reserved::LETREC => {
                // (let ((name expr) ...) body...). §4.G: every name is
                // pre-bound to `nil` in one new frame, then each init
                // expression runs against that frame and is `modify`d in
                // before the next one, so `letrec` and `let` share this
                // evaluator's semantics (see `eval_let`, DESIGN.md).
                let bindings = heap.car(rest)?;
                let body = heap.cdr(rest)?;
                return eval_let(ctx, heap, scheduler, mark_stack_capacity, bindings, body);
            }
            reserved::RECV => {
                // (recv (params) body...), a special form: its body must
                // not be evaluated until a message has actually arrived
                // (§4.H "recv"), so it cannot be dispatched like an
                // ordinary fundamental.
                let params = heap.car(rest)?;
                let body = heap.cdr(rest)?;
                if let Some(msg) = ctx.mailbox.pop_front() {
                    let names = limn_core::env::build_params(heap, params)?;
                    if names.len() != 1 {
                        return Err(RuntimeError::EvalError("recv expects a single parameter".into()));
                    }
                    let recv_env = ctx.curr_env;
                    let new_env = with_alloc_retry(ctx, heap, scheduler, mark_stack_capacity, |h| {
                        limn_core::env::extend(h, recv_env, &names, &[msg])
                    })?;
                    return eval_progn(ctx, heap, body, new_env);
                }
                return Ok(Reduction::Suspend(ContextState::BlockedOnRecv));
            }
            _ => {}
        }
    }

    // Ordinary function application: evaluate `rest` (the argument
    // expressions) left to right, remembering the raw head to resolve
    // once every argument value is in hand (§4.G "Function"/"ArgList").
    let cur_env = ctx.curr_env;
    begin_call(ctx, heap, head, cur_env, rest)
}

/// Push a `Function` frame for `head_expr` (evaluated lazily once
/// arguments are ready) and kick off evaluating `args` one at a time.
/// Shared by ordinary application and `let` (which synthesizes a
/// `(quote closure)` head expression, see `eval_let`).
fn begin_call(ctx: &mut Context, heap: &mut Heap, head_expr: Word, env: Word, args: Word) -> Result<Reduction, RuntimeError> {
    push(ctx, Frame::Function { head: head_expr, env })?;
    if is_nil(args) {
        ctx.r = nil();
        ctx.apply_k = true;
    } else {
        let first = heap.car(args)?;
        let more = heap.cdr(args)?;
        push(ctx, Frame::ArgList { env, acc: nil(), rest: more })?;
        ctx.curr_exp = first;
        ctx.curr_env = env;
        ctx.apply_k = false;
    }
    Ok(Reduction::Progress)
}

/// Evaluate `let`/`letrec` bindings with letrec pre-binding (§4.G "let"
/// row): every name is pre-bound to `nil` in a single new frame prepended
/// to the outer environment, then each binding's init expression runs
/// against that same frame and `BIND_TO_KEY_REST` `modify`s the result in
/// before moving to the next binding - so a later init can observe an
/// earlier binding's already-installed value (§8 scenario 3).
fn eval_let(
    ctx: &mut Context,
    heap: &mut Heap,
    scheduler: &Scheduler,
    mark_stack_capacity: u32,
    bindings: Word,
    body: Word,
) -> Result<Reduction, RuntimeError> {
    let outer_env = ctx.curr_env;
    if is_nil(bindings) {
        return eval_progn(ctx, heap, body, outer_env);
    }
    let pairs = list_to_vec(heap, bindings)?;
    let mut names = Vec::with_capacity(pairs.len());
    for pair in &pairs {
        match heap.car(*pair)? {
            Word::Symbol(s) => names.push(s),
            _ => return Err(RuntimeError::EvalError("let binding name must be a symbol".into())),
        }
    }
    let nils = vec![nil(); names.len()];
    let new_env = with_alloc_retry(ctx, heap, scheduler, mark_stack_capacity, |h| {
        limn_core::env::extend(h, outer_env, &names, &nils)
    })?;

    let first_init = heap.car(heap.cdr(pairs[0])?)?;
    let rest = heap.cdr(bindings)?;

    push(ctx, Frame::BindToKeyRest { rest, env: new_env, key: names[0], body })?;
    ctx.curr_exp = first_init;
    ctx.curr_env = new_env;
    ctx.apply_k = false;
    Ok(Reduction::Progress)
}

/// Evaluate a body list (implicit `begin`) in `env`: the last form runs
/// in tail position (no frame pushed), every earlier one is sequenced
/// through `PrognRest`.
fn eval_progn(ctx: &mut Context, heap: &mut Heap, body: Word, env: Word) -> Result<Reduction, RuntimeError> {
    if is_nil(body) {
        ctx.r = nil();
        ctx.apply_k = true;
        return Ok(Reduction::Progress);
    }
    let first = heap.car(body)?;
    let more = heap.cdr(body)?;
    if is_nil(more) {
        ctx.curr_exp = first;
        ctx.curr_env = env;
        ctx.apply_k = false;
    } else {
        push(ctx, Frame::PrognRest { rest: more, env })?;
        ctx.curr_exp = first;
        ctx.curr_env = env;
        ctx.apply_k = false;
    }
    Ok(Reduction::Progress)
}

/// Resume execution with the top continuation frame and the value
/// already computed in `ctx.r`.
fn resume(
    ctx: &mut Context,
    heap: &mut Heap,
    scheduler: &mut Scheduler,
    now_us: u64,
    mark_stack_capacity: u32,
) -> Result<Reduction, RuntimeError> {
    let frame = frame::pop_frame(&mut ctx.kstack)
        .ok_or_else(|| RuntimeError::Fatal("continuation stack underflow".into()))?;

    match frame {
        Frame::Done => Ok(Reduction::Finished),

        Frame::SetGlobalEnv { key } => {
            let value = ctx.r;
            with_alloc_retry(ctx, heap, scheduler, mark_stack_capacity, |h| limn_core::env::global_set(h, key, value))?;
            ctx.r = Word::Symbol(key);
            ctx.apply_k = true;
            Ok(Reduction::Progress)
        }

        Frame::PrognRest { rest, env } => {
            ctx.curr_env = env;
            eval_progn(ctx, heap, rest, env)
        }

        Frame::If { then, else_, env } => {
            ctx.curr_env = env;
            ctx.curr_exp = if is_truthy(ctx.r) { then } else { else_ };
            ctx.apply_k = false;
            Ok(Reduction::Progress)
        }

        Frame::ArgList { env, acc, rest } => {
            let value = ctx.r;
            let new_acc = with_alloc_retry(ctx, heap, scheduler, mark_stack_capacity, |h| h.cons(value, acc))?;
            if is_nil(rest) {
                ctx.curr_env = env;
                ctx.r = new_acc;
                ctx.apply_k = true;
            } else {
                let next = heap.car(rest)?;
                let more = heap.cdr(rest)?;
                push(ctx, Frame::ArgList { env, acc: new_acc, rest: more })?;
                ctx.curr_exp = next;
                ctx.curr_env = env;
                ctx.apply_k = false;
            }
            Ok(Reduction::Progress)
        }

        Frame::Function { head, env } => {
            let args_reversed = ctx.r;
            ctx.curr_env = env;
            resolve_and_apply(ctx, heap, scheduler, now_us, mark_stack_capacity, head, env, args_reversed)
        }

        Frame::FunctionApp { args_reversed } => {
            let operator = ctx.r;
            apply_callable(ctx, heap, scheduler, now_us, mark_stack_capacity, operator, args_reversed)
        }

        Frame::BindToKeyRest { rest, env, key, body } => {
            let value = ctx.r;
            with_alloc_retry(ctx, heap, scheduler, mark_stack_capacity, |h| limn_core::env::modify(h, env, key, value))?;
            if is_nil(rest) {
                ctx.curr_env = env;
                eval_progn(ctx, heap, body, env)
            } else {
                let next_pair = heap.car(rest)?;
                let next_key = match heap.car(next_pair)? {
                    Word::Symbol(s) => s,
                    _ => return Err(RuntimeError::EvalError("let binding name must be a symbol".into())),
                };
                let next_init = heap.car(heap.cdr(next_pair)?)?;
                push(ctx, Frame::BindToKeyRest { rest: heap.cdr(rest)?, env, key: next_key, body })?;
                ctx.curr_exp = next_init;
                ctx.curr_env = env;
                ctx.apply_k = false;
                Ok(Reduction::Progress)
            }
        }

        Frame::SetVar { env, key } => {
            // `set!` rebinds the nearest lexical occurrence of `key` and
            // never creates a binding (§4.F "modify"); unlike a `let`
            // binding, the result is the assigned value itself.
            let value = ctx.r;
            with_alloc_retry(ctx, heap, scheduler, mark_stack_capacity, |h| limn_core::env::modify(h, env, key, value))?;
            ctx.curr_env = env;
            ctx.r = value;
            ctx.apply_k = true;
            Ok(Reduction::Progress)
        }
    }
}

/// Resolve a function-position `head` (a raw, possibly still-unevaluated
/// expression) and dispatch the call. A bare symbol or self-evaluating
/// literal resolves synchronously and applies immediately, the tail
/// call that makes `§3`'s "constant continuation-stack growth" invariant
/// hold. A compound head expression needs its own evaluation step first.
fn resolve_and_apply(
    ctx: &mut Context,
    heap: &mut Heap,
    scheduler: &mut Scheduler,
    now_us: u64,
    mark_stack_capacity: u32,
    head: Word,
    env: Word,
    args_reversed: Word,
) -> Result<Reduction, RuntimeError> {
    match head {
        Word::Symbol(sym) => {
            let operator = if callable::is_fundamental(sym) || heap.extensions.is_registered(sym) {
                head
            } else {
                limn_core::env::lookup(heap, env, sym)?
            };
            apply_callable(ctx, heap, scheduler, now_us, mark_stack_capacity, operator, args_reversed)
        }
        _ if !heap.is_cons(head) => {
            apply_callable(ctx, heap, scheduler, now_us, mark_stack_capacity, head, args_reversed)
        }
        _ => {
            push(ctx, Frame::FunctionApp { args_reversed })?;
            ctx.curr_exp = head;
            ctx.curr_env = env;
            ctx.apply_k = false;
            Ok(Reduction::Progress)
        }
    }
}

/// Apply an already-resolved `operator` to `args_reversed` (the
/// evaluated argument list, most-recently-evaluated first).
fn apply_callable(
    ctx: &mut Context,
    heap: &mut Heap,
    scheduler: &mut Scheduler,
    now_us: u64,
    mark_stack_capacity: u32,
    operator: Word,
    args_reversed: Word,
) -> Result<Reduction, RuntimeError> {
    match callable::classify(heap, operator)? {
        Callable::Fundamental(id) if is_concurrency_fundamental(id) => {
            apply_concurrency_fundamental(ctx, heap, scheduler, now_us, id, args_reversed)
        }
        Callable::Fundamental(id) => {
            let mut argv = list_to_vec(heap, args_reversed)?;
            argv.reverse();
            let result = with_alloc_retry(ctx, heap, scheduler, mark_stack_capacity, |h| crate::fundamentals::call(id, &argv, h))?;
            ctx.r = result;
            ctx.apply_k = true;
            Ok(Reduction::Progress)
        }
        Callable::Extension(id) => {
            let mut argv = list_to_vec(heap, args_reversed)?;
            argv.reverse();
            let args_list = vec_to_list(heap, &argv)?;
            let result = call_extension(heap, id, args_list)?;
            ctx.r = result;
            ctx.apply_k = true;
            Ok(Reduction::Progress)
        }
        Callable::Closure { params, body, env } => {
            let mut argv = list_to_vec(heap, args_reversed)?;
            argv.reverse();
            let names = limn_core::env::build_params(heap, params)?;
            if names.len() != argv.len() {
                return Err(RuntimeError::EvalError(format!(
                    "closure expected {} argument(s), got {}",
                    names.len(),
                    argv.len()
                )));
            }
            let new_env = with_alloc_retry(ctx, heap, scheduler, mark_stack_capacity, |h| limn_core::env::extend(h, env, &names, &argv))?;
            // Tail call: overwrite the registers directly, push no frame.
            ctx.curr_env = new_env;
            return eval_progn(ctx, heap, body, new_env);
        }
        Callable::NotCallable(v) => Err(RuntimeError::EvalError(format!("{v:?} is not callable"))),
    }
}

fn is_concurrency_fundamental(id: SymbolId) -> bool {
    matches!(
        id,
        reserved::SPAWN | reserved::SEND | reserved::YIELD | reserved::SLEEP | reserved::SELF_FN | reserved::EVENT_WAIT
    )
}

/// Dispatch the concurrency-facing fundamentals that need `Scheduler`
/// access and so cannot go through [`crate::fundamentals::call`] (§4.H).
fn apply_concurrency_fundamental(
    ctx: &mut Context,
    heap: &mut Heap,
    scheduler: &mut Scheduler,
    now_us: u64,
    id: SymbolId,
    args_reversed: Word,
) -> Result<Reduction, RuntimeError> {
    let mut argv = list_to_vec(heap, args_reversed)?;
    argv.reverse();

    match id {
        reserved::SPAWN => {
            // (spawn closure-or-thunk-expr): spawn a sibling context that
            // immediately applies the given zero-argument closure.
            if argv.len() != 1 {
                return Err(RuntimeError::EvalError("spawn expects one argument".into()));
            }
            let thunk = argv[0];
            let entry_exp = heap.cons(thunk, nil())?;
            let new_cid = scheduler.spawn(entry_exp, ctx.curr_env);
            ctx.r = Word::Int(new_cid as i64);
            ctx.apply_k = true;
            Ok(Reduction::Progress)
        }
        reserved::SEND => {
            if argv.len() != 2 {
                return Err(RuntimeError::EvalError("send expects (context message)".into()));
            }
            let target = match argv[0] {
                Word::Int(n) => n as crate::context::ContextId,
                _ => return Err(RuntimeError::TypeError("send target must be a context id".into())),
            };
            let delivered = scheduler.send(target, argv[1]);
            ctx.r = bool_word(delivered);
            ctx.apply_k = true;
            Ok(Reduction::Progress)
        }
        reserved::YIELD => {
            ctx.r = nil();
            ctx.apply_k = true;
            Ok(Reduction::Suspend(ContextState::Ready))
        }
        reserved::SLEEP => {
            if argv.len() != 1 {
                return Err(RuntimeError::EvalError("sleep expects (micros)".into()));
            }
            let micros = match argv[0] {
                Word::Int(n) => n.max(0) as u64,
                Word::UInt(n) => n,
                _ => return Err(RuntimeError::TypeError("sleep duration must be a number".into())),
            };
            ctx.wake_time_us = Some(now_us + micros);
            ctx.r = nil();
            ctx.apply_k = true;
            Ok(Reduction::Suspend(ContextState::Sleeping))
        }
        reserved::SELF_FN => {
            ctx.r = Word::Int(ctx.id as i64);
            ctx.apply_k = true;
            Ok(Reduction::Progress)
        }
        reserved::EVENT_WAIT => {
            if argv.len() != 1 {
                return Err(RuntimeError::EvalError("event-wait expects (tag)".into()));
            }
            let tag = argv[0];
            if let Some(payload) = scheduler.take_event(tag) {
                ctx.r = payload;
                ctx.apply_k = true;
                Ok(Reduction::Progress)
            } else {
                ctx.blocked_event_tag = Some(tag);
                ctx.r = nil();
                ctx.apply_k = true;
                Ok(Reduction::Suspend(ContextState::BlockedOnEvent))
            }
        }
        _ => unreachable!("is_concurrency_fundamental admitted a non-concurrency id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use limn_core::reserved as R;
    use limn_core::{Heap, SymbolTable};

    fn parse_add_one_two(heap: &mut Heap) -> Word {
        // (+ 1 2)
        let args = heap.cons(Word::Int(1), heap.cons(Word::Int(2), nil()).unwrap()).unwrap();
        heap.cons(Word::Symbol(R::ADD), args).unwrap()
    }

    // `step` removes a finished context before we can read its `r`, so
    // tests instead drive a single context directly through
    // `run_context` in a loop and inspect it before it's dropped.
    fn eval_expr(heap: &mut Heap, exp: Word, env: Word) -> Word {
        let mut sched = Scheduler::new(100_000, 256, 8, 8);
        let cid = sched.spawn(exp, env);
        loop {
            let outcome = run_context(cid, &mut sched, heap, 100_000, 0).unwrap();
            match outcome {
                RunOutcome::Finished => {
                    let ctx = sched.context(cid).unwrap();
                    return ctx.r;
                }
                RunOutcome::Failed => {
                    let ctx = sched.context(cid).unwrap();
                    panic!("evaluation failed with {:?}", ctx.r);
                }
                RunOutcome::Suspended => panic!("unexpected suspend in single-context eval test"),
                RunOutcome::QuantumExpired => continue,
            }
        }
    }

    fn intern(heap: &mut Heap, name: &str) -> SymbolId {
        heap.symbols.intern(name, &mut heap.aux)
    }

    #[test]
    fn self_evaluating_literal() {
        let mut heap = Heap::new(64, 1024, 4, 4);
        let r = eval_expr(&mut heap, Word::Int(42), nil());
        assert_eq!(r, Word::Int(42));
    }

    #[test]
    fn arithmetic_fundamental_application() {
        let mut heap = Heap::new(64, 1024, 4, 4);
        let exp = parse_add_one_two(&mut heap);
        let r = eval_expr(&mut heap, exp, nil());
        assert_eq!(r, Word::Int(3));
    }

    #[test]
    fn if_truthiness_picks_then_branch() {
        let mut heap = Heap::new(64, 1024, 4, 4);
        let exp = heap
            .cons(
                Word::Symbol(R::IF),
                heap.cons(bool_word(true), heap.cons(Word::Int(1), heap.cons(Word::Int(2), nil()).unwrap()).unwrap())
                    .unwrap(),
            )
            .unwrap();
        let r = eval_expr(&mut heap, exp, nil());
        assert_eq!(r, Word::Int(1));
    }

    #[test]
    fn if_truthiness_only_false_is_false() {
        let mut heap = Heap::new(64, 1024, 4, 4);
        // (if nil 1 2) -> 1, since nil is truthy under this evaluator.
        let exp = heap
            .cons(
                Word::Symbol(R::IF),
                heap.cons(nil(), heap.cons(Word::Int(1), heap.cons(Word::Int(2), nil()).unwrap()).unwrap())
                    .unwrap(),
            )
            .unwrap();
        let r = eval_expr(&mut heap, exp, nil());
        assert_eq!(r, Word::Int(1));
    }

    #[test]
    fn lambda_define_and_apply() {
        let mut heap = Heap::new(256, 4096, 4, 4);
        let f = intern(&mut heap, "f");
        let x = intern(&mut heap, "x");

        // (define f (lambda (x) (* x x)))
        let square_body = heap
            .cons(Word::Symbol(R::MUL), heap.cons(Word::Symbol(x), heap.cons(Word::Symbol(x), nil()).unwrap()).unwrap())
            .unwrap();
        let lambda_exp = heap
            .cons(
                Word::Symbol(R::LAMBDA),
                heap.cons(heap.cons(Word::Symbol(x), nil()).unwrap(), heap.cons(square_body, nil()).unwrap()).unwrap(),
            )
            .unwrap();
        let define_exp = heap.cons(Word::Symbol(R::DEFINE), heap.cons(Word::Symbol(f), heap.cons(lambda_exp, nil()).unwrap()).unwrap()).unwrap();
        eval_expr(&mut heap, define_exp, nil());

        // (f 7) against the (now-updated) global env.
        let call_exp = heap.cons(Word::Symbol(f), heap.cons(Word::Int(7), nil()).unwrap()).unwrap();
        let r = eval_expr(&mut heap, call_exp, heap.global_env);
        assert_eq!(r, Word::Int(49));
    }

    #[test]
    fn let_binds_all_names_before_evaluating_body() {
        let mut heap = Heap::new(256, 4096, 4, 4);
        let a = intern(&mut heap, "a");
        let b = intern(&mut heap, "b");
        let bindings = heap
            .cons(
                heap.cons(Word::Symbol(a), heap.cons(Word::Int(1), nil()).unwrap()).unwrap(),
                heap.cons(heap.cons(Word::Symbol(b), heap.cons(Word::Int(2), nil()).unwrap()).unwrap(), nil()).unwrap(),
            )
            .unwrap();
        let body = heap
            .cons(Word::Symbol(R::ADD), heap.cons(Word::Symbol(a), heap.cons(Word::Symbol(b), nil()).unwrap()).unwrap())
            .unwrap();
        let let_exp = heap.cons(Word::Symbol(R::LET), heap.cons(bindings, heap.cons(body, nil()).unwrap()).unwrap()).unwrap();
        let r = eval_expr(&mut heap, let_exp, nil());
        assert_eq!(r, Word::Int(3));
    }

    #[test]
    fn let_binding_init_observes_an_earlier_sibling_binding() {
        // (let ((a 1) (b (+ a 1))) (+ a b)) -> 3 (§8 scenario 3): `a` is
        // pre-bound to `nil` then updated to 1 before `b`'s init runs, so
        // `b`'s `(+ a 1)` sees the already-installed `a = 1` and evaluates
        // to 2, giving a final `(+ a b) = 1 + 2 = 3`.
        let mut heap = Heap::new(256, 4096, 4, 4);
        let a = intern(&mut heap, "a");
        let b = intern(&mut heap, "b");
        let b_init = heap
            .cons(Word::Symbol(R::ADD), heap.cons(Word::Symbol(a), heap.cons(Word::Int(1), nil()).unwrap()).unwrap())
            .unwrap();
        let bindings = heap
            .cons(
                heap.cons(Word::Symbol(a), heap.cons(Word::Int(1), nil()).unwrap()).unwrap(),
                heap.cons(heap.cons(Word::Symbol(b), heap.cons(b_init, nil()).unwrap()).unwrap(), nil()).unwrap(),
            )
            .unwrap();
        let body = heap
            .cons(Word::Symbol(R::ADD), heap.cons(Word::Symbol(a), heap.cons(Word::Symbol(b), nil()).unwrap()).unwrap())
            .unwrap();
        let let_exp = heap.cons(Word::Symbol(R::LET), heap.cons(bindings, heap.cons(body, nil()).unwrap()).unwrap()).unwrap();
        let r = eval_expr(&mut heap, let_exp, nil());
        assert_eq!(r, Word::Int(3));
    }

    #[test]
    fn let_bindings_are_not_visible_outside_the_let() {
        let mut heap = Heap::new(256, 4096, 4, 4);
        let a = intern(&mut heap, "a");
        let bindings = heap.cons(heap.cons(Word::Symbol(a), heap.cons(Word::Int(1), nil()).unwrap()).unwrap(), nil()).unwrap();
        let let_exp = heap
            .cons(Word::Symbol(R::LET), heap.cons(bindings, heap.cons(Word::Symbol(a), nil()).unwrap()).unwrap())
            .unwrap();
        eval_expr(&mut heap, let_exp, nil());
        assert!(limn_core::env::lookup(&heap, heap.global_env, a).is_err());
    }

    #[test]
    fn tail_recursive_loop_does_not_grow_continuation_stack() {
        // (define count-down (lambda (n) (if (= n 0) 0 (count-down (- n 1)))))
        // called with a large n; the kstack's high-water mark must stay
        // small regardless of n (§3 constant-space tail calls).
        let mut heap = Heap::new(4096, 16384, 4, 4);
        let count_down = intern(&mut heap, "count-down");
        let n = intern(&mut heap, "n");

        let recur_call = heap
            .cons(
                Word::Symbol(count_down),
                heap.cons(
                    heap.cons(Word::Symbol(R::SUB), heap.cons(Word::Symbol(n), heap.cons(Word::Int(1), nil()).unwrap()).unwrap()).unwrap(),
                    nil(),
                )
                .unwrap(),
            )
            .unwrap();
        let test = heap
            .cons(Word::Symbol(R::NUM_EQ), heap.cons(Word::Symbol(n), heap.cons(Word::Int(0), nil()).unwrap()).unwrap())
            .unwrap();
        let if_exp = heap
            .cons(Word::Symbol(R::IF), heap.cons(test, heap.cons(Word::Int(0), heap.cons(recur_call, nil()).unwrap()).unwrap()).unwrap())
            .unwrap();
        let lambda_exp = heap
            .cons(Word::Symbol(R::LAMBDA), heap.cons(heap.cons(Word::Symbol(n), nil()).unwrap(), heap.cons(if_exp, nil()).unwrap()).unwrap())
            .unwrap();
        let define_exp = heap
            .cons(Word::Symbol(R::DEFINE), heap.cons(Word::Symbol(count_down), heap.cons(lambda_exp, nil()).unwrap()).unwrap())
            .unwrap();
        eval_expr(&mut heap, define_exp, nil());

        let call_exp = heap.cons(Word::Symbol(count_down), heap.cons(Word::Int(2_000), nil()).unwrap()).unwrap();

        let mut sched = Scheduler::new(1_000_000, 256, 8, 8);
        let cid = sched.spawn(call_exp, heap.global_env);
        loop {
            match run_context(cid, &mut sched, &mut heap, 1_000_000, 0).unwrap() {
                RunOutcome::Finished => break,
                RunOutcome::QuantumExpired => continue,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        let ctx = sched.context(cid).unwrap();
        assert_eq!(ctx.r, Word::Int(0));
        assert!(ctx.kstack.max_sp() < 100, "kstack high-water mark grew with recursion depth: {}", ctx.kstack.max_sp());
    }

    #[test]
    fn recv_blocks_until_a_message_arrives_then_binds_it() {
        let mut heap = Heap::new(256, 4096, 4, 4);
        let msg = intern(&mut heap, "msg");
        let body = Word::Symbol(msg);
        let recv_exp = heap
            .cons(
                Word::Symbol(R::RECV),
                heap.cons(heap.cons(Word::Symbol(msg), nil()).unwrap(), heap.cons(body, nil()).unwrap()).unwrap(),
            )
            .unwrap();

        let mut sched = Scheduler::new(1000, 64, 4, 4);
        let cid = sched.spawn(recv_exp, nil());
        let outcome = run_context(cid, &mut sched, &mut heap, 1000, 0).unwrap();
        assert_eq!(outcome, RunOutcome::Suspended);
        assert_eq!(sched.context(cid).unwrap().state, ContextState::Ready); // set by caller normally; see below
        sched.context_mut(cid).unwrap().state = ContextState::BlockedOnRecv;
        assert!(sched.send(cid, Word::Int(99)));
        let outcome = run_context(cid, &mut sched, &mut heap, 1000, 0).unwrap();
        assert_eq!(outcome, RunOutcome::Finished);
        assert_eq!(sched.context(cid).unwrap().r, Word::Int(99));
    }

    #[test]
    fn spawn_send_round_trip_between_two_contexts() {
        // Context A spawns context B's entry expression directly via the
        // scheduler (bypassing the `spawn` fundamental's closure-call
        // convention, to keep this test focused on send/recv wiring), then
        // A sends B a value and B's recv result is observed.
        let mut heap = Heap::new(256, 4096, 4, 4);
        let msg = intern(&mut heap, "msg");
        let recv_exp = heap
            .cons(
                Word::Symbol(R::RECV),
                heap.cons(heap.cons(Word::Symbol(msg), nil()).unwrap(), heap.cons(Word::Symbol(msg), nil()).unwrap()).unwrap(),
            )
            .unwrap();

        let mut sched = Scheduler::new(1000, 64, 4, 4);
        let b = sched.spawn(recv_exp, nil());
        run_context(b, &mut sched, &mut heap, 1000, 0).unwrap();
        sched.context_mut(b).unwrap().state = ContextState::BlockedOnRecv;

        assert!(sched.send(b, Word::Int(42)));
        let outcome = run_context(b, &mut sched, &mut heap, 1000, 0).unwrap();
        assert_eq!(outcome, RunOutcome::Finished);
        assert_eq!(sched.context(b).unwrap().r, Word::Int(42));
    }
}
