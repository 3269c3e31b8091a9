//! Lexical environments (§4.F).
//!
//! An environment is an ordinary Lisp list of frames, each frame an
//! ordinary list of `(symbol . value)` pairs, no separate environment
//! data type, so environments are heap values like any other and the GC
//! needs no special case for them. `extend` conses a new frame onto the
//! front; `lookup`/`modify` search frame-by-frame, pair-by-pair, from the
//! innermost scope outward.

use crate::error::RuntimeError;
use crate::heap::Heap;
use crate::word::{SymbolId, Word};

/// Search every frame of `env`, innermost first, for `name`.
pub fn lookup(heap: &Heap, env: Word, name: SymbolId) -> Result<Word, RuntimeError> {
    let mut frames = env;
    while heap.is_cons(frames) {
        let frame = heap.car(frames)?;
        let mut bindings = frame;
        while heap.is_cons(bindings) {
            let pair = heap.car(bindings)?;
            if let Word::Symbol(sym) = heap.car(pair)? {
                if sym == name {
                    return heap.cdr(pair);
                }
            }
            bindings = heap.cdr(bindings)?;
        }
        frames = heap.cdr(frames)?;
    }
    Err(RuntimeError::EvalError(format!("unbound symbol {name:?}")))
}

/// Prepend a new frame built from `names`/`values` (equal length, zipped
/// pairwise) onto `env`.
pub fn extend(heap: &mut Heap, env: Word, names: &[SymbolId], values: &[Word]) -> Result<Word, RuntimeError> {
    if names.len() != values.len() {
        return Err(RuntimeError::EvalError(
            "mismatched argument count binding a new frame".into(),
        ));
    }
    let mut frame = Word::Symbol(crate::symbols::reserved::NIL);
    for (name, value) in names.iter().zip(values.iter()).rev() {
        let pair = heap.cons(Word::Symbol(*name), *value)?;
        frame = heap.cons(pair, frame)?;
    }
    heap.cons(frame, env)
}

/// Destructively update the nearest binding of `name`, searching from the
/// innermost frame outward. Fails if `name` is unbound anywhere in `env`.
pub fn modify(heap: &mut Heap, env: Word, name: SymbolId, new_value: Word) -> Result<(), RuntimeError> {
    let mut frames = env;
    while heap.is_cons(frames) {
        let frame = heap.car(frames)?;
        let mut bindings = frame;
        while heap.is_cons(bindings) {
            let pair = heap.car(bindings)?;
            if let Word::Symbol(sym) = heap.car(pair)? {
                if sym == name {
                    heap.set_cdr(pair, new_value)?;
                    return Ok(());
                }
            }
            bindings = heap.cdr(bindings)?;
        }
        frames = heap.cdr(frames)?;
    }
    Err(RuntimeError::EvalError(format!("unbound symbol {name:?}")))
}

/// Bind or rebind `name` in the global frame. Unlike `modify`, this
/// creates the binding if absent, matching `define`'s semantics at top level.
pub fn global_set(heap: &mut Heap, name: SymbolId, value: Word) -> Result<(), RuntimeError> {
    let global = heap.global_env;
    if modify(heap, global, name, value).is_ok() {
        return Ok(());
    }
    let pair = heap.cons(Word::Symbol(name), value)?;
    let new_frame = heap.cons(pair, global)?;
    heap.global_env = new_frame;
    Ok(())
}

/// Build the list of parameter symbols from a `lambda` parameter-list
/// expression, rejecting anything that is not a proper list of symbols.
pub fn build_params(heap: &Heap, params: Word) -> Result<Vec<SymbolId>, RuntimeError> {
    let mut out = Vec::new();
    let mut cur = params;
    loop {
        if matches!(cur, Word::Symbol(s) if s == crate::symbols::reserved::NIL) {
            return Ok(out);
        }
        if !heap.is_cons(cur) {
            return Err(RuntimeError::EvalError(
                "lambda parameter list must be a proper list of symbols".into(),
            ));
        }
        match heap.car(cur)? {
            Word::Symbol(s) => out.push(s),
            _ => {
                return Err(RuntimeError::EvalError(
                    "lambda parameters must be symbols".into(),
                ))
            }
        }
        cur = heap.cdr(cur)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::reserved::NIL;

    fn nil() -> Word {
        Word::Symbol(NIL)
    }

    #[test]
    fn extend_then_lookup_finds_innermost_binding() {
        let mut heap = Heap::new(32, 256, 1, 1);
        let x = SymbolId(500);
        let env = extend(&mut heap, nil(), &[x], &[Word::Int(10)]).unwrap();
        assert_eq!(lookup(&heap, env, x).unwrap(), Word::Int(10));
    }

    #[test]
    fn inner_frame_shadows_outer() {
        let mut heap = Heap::new(32, 256, 1, 1);
        let x = SymbolId(500);
        let outer = extend(&mut heap, nil(), &[x], &[Word::Int(1)]).unwrap();
        let inner = extend(&mut heap, outer, &[x], &[Word::Int(2)]).unwrap();
        assert_eq!(lookup(&heap, inner, x).unwrap(), Word::Int(2));
    }

    #[test]
    fn lookup_of_unbound_symbol_is_eval_error() {
        let heap = Heap::new(32, 256, 1, 1);
        let err = lookup(&heap, nil(), SymbolId(999)).unwrap_err();
        assert!(matches!(err, RuntimeError::EvalError(_)));
    }

    #[test]
    fn modify_mutates_existing_binding_not_shadowed() {
        let mut heap = Heap::new(32, 256, 1, 1);
        let x = SymbolId(500);
        let env = extend(&mut heap, nil(), &[x], &[Word::Int(1)]).unwrap();
        modify(&mut heap, env, x, Word::Int(42)).unwrap();
        assert_eq!(lookup(&heap, env, x).unwrap(), Word::Int(42));
    }

    #[test]
    fn global_set_defines_then_redefines() {
        let mut heap = Heap::new(32, 256, 1, 1);
        let x = SymbolId(500);
        global_set(&mut heap, x, Word::Int(1)).unwrap();
        assert_eq!(lookup(&heap, heap.global_env, x).unwrap(), Word::Int(1));
        global_set(&mut heap, x, Word::Int(2)).unwrap();
        assert_eq!(lookup(&heap, heap.global_env, x).unwrap(), Word::Int(2));
    }

    #[test]
    fn build_params_rejects_improper_list() {
        let mut heap = Heap::new(32, 256, 1, 1);
        let x = SymbolId(500);
        let improper = heap.cons(Word::Symbol(x), Word::Int(3)).unwrap();
        assert!(build_params(&heap, improper).is_err());
    }

    #[test]
    fn build_params_collects_symbols_in_order() {
        let mut heap = Heap::new(32, 256, 1, 1);
        let a = SymbolId(501);
        let b = SymbolId(502);
        let list = heap.cons(Word::Symbol(a), nil()).unwrap();
        let list = heap.cons(Word::Symbol(b), list).unwrap();
        // list is (b a); build_params should preserve source order (b a)
        let params = build_params(&heap, list).unwrap();
        assert_eq!(params, vec![b, a]);
    }
}
