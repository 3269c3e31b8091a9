//! FFI-safe error reporting surface for the embedding API.
//!
//! A host linking against the `staticlib` surface cannot receive a Rust
//! `Result`. Every `extern "C"` entry point that can fail stashes its
//! [`RuntimeError`] here instead of panicking across the FFI boundary,
//! and the host polls or takes it afterward.

use limn_core::RuntimeError;
use std::cell::RefCell;
use std::ffi::CString;
use std::ptr;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
    static ERROR_CSTRING: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Record `err` as the thread's pending runtime error.
pub fn set_runtime_error(err: &RuntimeError) {
    ERROR_CSTRING.with(|cs| *cs.borrow_mut() = None);
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(err.to_string()));
}

pub fn take_runtime_error() -> Option<String> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

pub fn has_runtime_error() -> bool {
    LAST_ERROR.with(|e| e.borrow().is_some())
}

pub fn clear_runtime_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
    ERROR_CSTRING.with(|e| *e.borrow_mut() = None);
}

/// Check if there's a pending runtime error (FFI-safe).
#[unsafe(no_mangle)]
pub extern "C" fn limn_has_error() -> bool {
    has_runtime_error()
}

/// Get the last error message as a C string pointer (FFI-safe).
///
/// Returns null if no error is pending. The pointer is valid only until
/// the next call into this module from the same thread.
#[unsafe(no_mangle)]
pub extern "C" fn limn_get_error() -> *const std::os::raw::c_char {
    LAST_ERROR.with(|e| {
        let error = e.borrow();
        match &*error {
            Some(msg) => ERROR_CSTRING.with(|cs| {
                let safe_msg: String = msg.chars().map(|c| if c == '\0' { '?' } else { c }).collect();
                let cstring = CString::new(safe_msg).expect("null bytes already replaced");
                let ptr = cstring.as_ptr();
                *cs.borrow_mut() = Some(cstring);
                ptr
            }),
            None => ptr::null(),
        }
    })
}

/// Take (and clear) the last error, returning it as a C string (FFI-safe).
#[unsafe(no_mangle)]
pub extern "C" fn limn_take_error() -> *const std::os::raw::c_char {
    match take_runtime_error() {
        Some(s) => ERROR_CSTRING.with(|cs| {
            let safe_msg: String = s.chars().map(|c| if c == '\0' { '?' } else { c }).collect();
            let cstring = CString::new(safe_msg).expect("null bytes already replaced");
            let ptr = cstring.as_ptr();
            *cs.borrow_mut() = Some(cstring);
            ptr
        }),
        None => ptr::null(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn limn_clear_error() {
    clear_runtime_error();
}
