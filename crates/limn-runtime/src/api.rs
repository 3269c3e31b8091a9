//! The `extern "C"` embedding surface (§6).
//!
//! [`crate::Runtime`] is the safe Rust API a same-language host embeds
//! directly; everything here adapts that API to a C ABI for a host
//! written in another language, following the same opaque-handle +
//! thread-local-error pattern as [`crate::error`]'s `limn_*_error`
//! functions.
//!
//! Not every embedding-API entry named in §6 has a literal C-ABI
//! counterpart here. The textual reader is an external collaborator
//! (§1), so any call that would need to marshal an already-parsed
//! s-expression across the FFI boundary (`load_and_eval_program_incremental`,
//! spawning an arbitrary expression) is Rust-API-only, reached through
//! [`crate::Runtime`] directly by a host linked at the Rust level rather
//! than through `dlopen`. The C surface covers the calls a foreign host
//! can drive with plain numbers and strings: lifecycle, scheduler
//! control, the character channel, and simple numeric extensions.

use crate::error::set_runtime_error;
use crate::runtime::{EvalState, Runtime};
use limn_core::{HeapConfig, Numeric, Word};
use std::ffi::{c_char, CStr};
use std::ptr;

/// Build a [`Runtime`] sized per §4.M and return an opaque handle, or
/// null if the requested capacities don't form a valid [`HeapConfig`].
#[unsafe(no_mangle)]
pub extern "C" fn limn_runtime_init(
    cell_capacity: u32,
    aux_bytes: u32,
    const_capacity: u32,
    extension_capacity: u32,
    kstack_capacity: u32,
    gc_mark_stack_depth: u32,
    quantum: u32,
    event_queue_capacity: u32,
) -> *mut Runtime {
    let config = HeapConfig::builder()
        .cell_capacity(cell_capacity)
        .aux_bytes(aux_bytes)
        .const_capacity(const_capacity)
        .extension_capacity(extension_capacity)
        .kstack_capacity(kstack_capacity)
        .gc_mark_stack_depth(gc_mark_stack_depth)
        .build();
    match config {
        Ok(cfg) => Box::into_raw(Box::new(Runtime::init(cfg, quantum, event_queue_capacity as usize))),
        Err(e) => {
            set_runtime_error(&e);
            ptr::null_mut()
        }
    }
}

/// Tear down a runtime built with [`limn_runtime_init`]. Passing null is
/// a no-op; passing a pointer not produced by `limn_runtime_init`, or
/// passing the same pointer twice, is undefined behavior (ordinary
/// `Box::from_raw` contract).
#[unsafe(no_mangle)]
pub extern "C" fn limn_runtime_destroy(rt: *mut Runtime) {
    if !rt.is_null() {
        drop(unsafe { Box::from_raw(rt) });
    }
}

/// §6 `eval_init_events`: the event queue's capacity is fixed at
/// [`limn_runtime_init`] time, so this only reports whether the runtime
/// already has room for events, kept for API parity with the
/// embedding contract's call sequence.
#[unsafe(no_mangle)]
pub extern "C" fn limn_eval_init_events(rt: *mut Runtime, capacity: u32) -> bool {
    let Some(rt) = (unsafe { rt.as_ref() }) else {
        return false;
    };
    rt.scheduler.quantum() > 0 && capacity > 0
}

fn runtime_mut<'a>(rt: *mut Runtime) -> Option<&'a mut Runtime> {
    unsafe { rt.as_mut() }
}

/// §6 `create_string_char_channel`: copy a NUL-terminated C string into
/// an in-memory channel and return its handle, or `u32::MAX` on a null
/// pointer or invalid UTF-8.
#[unsafe(no_mangle)]
pub extern "C" fn limn_create_string_char_channel(rt: *mut Runtime, s: *const c_char) -> u32 {
    let Some(rt) = runtime_mut(rt) else {
        return u32::MAX;
    };
    if s.is_null() {
        return u32::MAX;
    }
    match unsafe { CStr::from_ptr(s) }.to_str() {
        Ok(text) => rt.create_string_char_channel(text),
        Err(_) => u32::MAX,
    }
}

/// Consume and return the next character of channel `channel_id` as a
/// Unicode scalar value, or `-1` once the channel is exhausted or the
/// handle is invalid.
#[unsafe(no_mangle)]
pub extern "C" fn limn_channel_get(rt: *mut Runtime, channel_id: u32) -> i32 {
    let Some(rt) = runtime_mut(rt) else {
        return -1;
    };
    match rt.channel_mut(channel_id).and_then(|c| c.get()) {
        Some(c) => c as i32,
        None => -1,
    }
}

/// §6 `pause_eval_with_gc`.
#[unsafe(no_mangle)]
pub extern "C" fn limn_pause_eval_with_gc(rt: *mut Runtime, ms_hint: u32) -> bool {
    let Some(rt) = runtime_mut(rt) else {
        return false;
    };
    match rt.pause_eval_with_gc(ms_hint) {
        Ok(()) => true,
        Err(e) => {
            set_runtime_error(&e);
            false
        }
    }
}

/// §6 `continue_eval`.
#[unsafe(no_mangle)]
pub extern "C" fn limn_continue_eval(rt: *mut Runtime) {
    if let Some(rt) = runtime_mut(rt) {
        rt.continue_eval();
    }
}

/// §6 `kill_eval`.
#[unsafe(no_mangle)]
pub extern "C" fn limn_kill_eval(rt: *mut Runtime) {
    if let Some(rt) = runtime_mut(rt) {
        rt.kill_eval();
    }
}

/// §6 `get_eval_state`, encoded `{none=0, running=1, paused=2, dead=3, kill=4}`.
#[unsafe(no_mangle)]
pub extern "C" fn limn_get_eval_state(rt: *const Runtime) -> u32 {
    let Some(rt) = (unsafe { rt.as_ref() }) else {
        return 0;
    };
    match rt.eval_state() {
        EvalState::None => 0,
        EvalState::Running => 1,
        EvalState::Paused => 2,
        EvalState::Dead => 3,
        EvalState::Killed => 4,
    }
}

/// §6 `send_message`, restricted to an integer payload, the common
/// case for a foreign host that has no way to build an arbitrary tagged
/// value on this side of the FFI boundary.
#[unsafe(no_mangle)]
pub extern "C" fn limn_send_message_int(rt: *mut Runtime, cid: u32, value: i64) -> bool {
    let Some(rt) = runtime_mut(rt) else {
        return false;
    };
    rt.send_message(cid, Word::Int(value))
}

/// §6 `add_extension`, restricted to a simple numeric handler
/// `i64 -> i64`. A handler needing list/cons access registers through
/// [`Runtime::add_extension`] directly from Rust instead.
#[unsafe(no_mangle)]
pub extern "C" fn limn_add_extension_numeric(
    rt: *mut Runtime,
    name: *const c_char,
    handler: extern "C" fn(i64) -> i64,
) -> bool {
    let Some(rt) = runtime_mut(rt) else {
        return false;
    };
    if name.is_null() {
        return false;
    }
    let Ok(name) = unsafe { CStr::from_ptr(name) }.to_str() else {
        return false;
    };
    let name = name.to_owned();
    let result = rt.add_extension(
        &name,
        Box::new(move |args, heap| {
            let first = heap.car(args)?;
            let n = heap.numeric_of(first)?;
            let out = handler(n.as_i64());
            heap.alloc_boxed(Numeric::I64(out))
        }),
    );
    match result {
        Ok(_) => true,
        Err(e) => {
            set_runtime_error(&e);
            false
        }
    }
}

/// Number of contexts currently runnable, for a host polling before
/// deciding whether to call back into the scheduler.
#[unsafe(no_mangle)]
pub extern "C" fn limn_running_count(rt: *const Runtime) -> u32 {
    let Some(rt) = (unsafe { rt.as_ref() }) else {
        return 0;
    };
    let mut n = 0u32;
    rt.running_iterator(|_| n += 1);
    n
}

/// Number of contexts currently blocked or sleeping.
#[unsafe(no_mangle)]
pub extern "C" fn limn_blocked_count(rt: *const Runtime) -> u32 {
    let Some(rt) = (unsafe { rt.as_ref() }) else {
        return 0;
    };
    let mut n = 0u32;
    rt.blocked_iterator(|_| n += 1);
    n
}

/// Install the critical-error callback (§6). The callback receives a
/// NUL-terminated message valid only for the duration of the call.
#[unsafe(no_mangle)]
pub extern "C" fn limn_set_critical_error_callback(rt: *mut Runtime, cb: extern "C" fn(*const c_char)) {
    let Some(rt) = runtime_mut(rt) else { return };
    rt.callbacks.critical_error = Some(Box::new(move |msg: &str| {
        if let Ok(c) = std::ffi::CString::new(msg) {
            cb(c.as_ptr());
        }
    }));
}

/// Install the host's microsecond timestamp source (§6 `timestamp-μs`).
#[unsafe(no_mangle)]
pub extern "C" fn limn_set_timestamp_callback(rt: *mut Runtime, cb: extern "C" fn() -> u64) {
    let Some(rt) = runtime_mut(rt) else { return };
    rt.callbacks.timestamp_us = Some(Box::new(move || cb()));
}

/// Install the host's sleep primitive (§6 `usleep`).
#[unsafe(no_mangle)]
pub extern "C" fn limn_set_usleep_callback(rt: *mut Runtime, cb: extern "C" fn(u64)) {
    let Some(rt) = runtime_mut(rt) else { return };
    rt.callbacks.usleep = Some(Box::new(move |us| cb(us)));
}

/// Install the host's formatted-output sink (§6 `printf`).
#[unsafe(no_mangle)]
pub extern "C" fn limn_set_printf_callback(rt: *mut Runtime, cb: extern "C" fn(*const c_char)) {
    let Some(rt) = runtime_mut(rt) else { return };
    rt.callbacks.printf = Some(Box::new(move |msg: &str| {
        if let Ok(c) = std::ffi::CString::new(msg) {
            cb(c.as_ptr());
        }
    }));
}
