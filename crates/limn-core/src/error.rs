//! Runtime error taxonomy (§4.K, §7).
//!
//! Every fallible internal operation, allocator, GC, environment,
//! evaluator step, scheduler transition, returns a `RuntimeError` so
//! library code composes with `?`. At a safepoint this gets lowered to the
//! corresponding reserved error symbol (§7) so the value a Lisp program
//! observes stays a tagged `Word`, exactly as the base spec requires;
//! `RuntimeError` itself exists only on the Rust side of that boundary, to
//! carry enough detail for the diagnostics layer to log something more
//! useful than a bare symbol.

use crate::symbols::reserved;
use crate::word::SymbolId;
use std::fmt;

/// Rust-level error type unifying the reserved error symbols with
/// structured detail.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeError {
    /// Any allocation (cons, aux, stack) that could not be satisfied even
    /// after a GC cycle.
    OutOfMemory,
    /// Unbound symbol, malformed special form, arity mismatch, call of a
    /// non-callable value, or an internal state violation.
    EvalError(String),
    /// A fundamental/extension was called with an operand of the wrong
    /// kind.
    TypeError(String),
    /// Propagated from the parser through the character-channel contract.
    ReadError(String),
    /// A non-blocking `recv` found no matching pattern.
    NoMatch,
    /// Process-level fatal condition: GC marking-stack overflow,
    /// reserved-symbol table corruption, constant-heap write conflict.
    /// Routed to the host's critical-error callback rather than returned
    /// as a value (§7).
    Fatal(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::OutOfMemory => write!(f, "out-of-memory"),
            RuntimeError::EvalError(msg) => write!(f, "eval-error: {msg}"),
            RuntimeError::TypeError(msg) => write!(f, "type-error: {msg}"),
            RuntimeError::ReadError(msg) => write!(f, "read-error: {msg}"),
            RuntimeError::NoMatch => write!(f, "no-match"),
            RuntimeError::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl RuntimeError {
    /// The reserved symbol a Lisp-visible result is set to when this
    /// error reaches a safepoint. `Fatal` has no Lisp-visible
    /// representation: it is reported via the critical-error callback
    /// and the owning context is torn down.
    pub fn as_reserved_symbol(&self) -> Option<SymbolId> {
        match self {
            RuntimeError::OutOfMemory => Some(reserved::OUT_OF_MEMORY),
            RuntimeError::EvalError(_) => Some(reserved::EVAL_ERROR),
            RuntimeError::TypeError(_) => Some(reserved::TYPE_ERROR),
            RuntimeError::ReadError(_) => Some(reserved::READ_ERROR),
            RuntimeError::NoMatch => Some(reserved::NO_MATCH),
            RuntimeError::Fatal(_) => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_symbols_match_reserved_table() {
        assert_eq!(
            RuntimeError::OutOfMemory.as_reserved_symbol(),
            Some(reserved::OUT_OF_MEMORY)
        );
        assert_eq!(
            RuntimeError::NoMatch.as_reserved_symbol(),
            Some(reserved::NO_MATCH)
        );
        assert_eq!(RuntimeError::Fatal("x".into()).as_reserved_symbol(), None);
    }

    #[test]
    fn fatal_is_the_only_unreportable_variant() {
        assert!(RuntimeError::Fatal("bad".into()).is_fatal());
        assert!(!RuntimeError::OutOfMemory.is_fatal());
    }
}
