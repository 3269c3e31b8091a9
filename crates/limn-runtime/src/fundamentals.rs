//! Host-implemented fundamentals (§4.G "Fundamentals"): arithmetic, list
//! primitives, and tagged-value predicates. The concurrency-facing
//! fundamentals (`spawn send recv yield sleep self`) are *not* here:
//! they need access to the scheduler, not just the heap, and are
//! dispatched directly from the evaluator's `FUNCTION_APP` handling
//! (see `evaluator::apply_concurrency_fundamental`).
//!
//! Every fundamental shares one signature, `fn(&[Word], &mut Heap) ->
//! Result<Word, RuntimeError>`, mirroring the extension registry's
//! calling convention (§4.I) so both dispatch through the same
//! `FUNCTION_APP` arm.

use limn_core::{reserved, Heap, Numeric, RuntimeError, SymbolId, Word};

fn numeric_result(heap: &mut Heap, n: Numeric) -> Result<Word, RuntimeError> {
    match n {
        Numeric::Int(v) => Ok(Word::Int(v)),
        Numeric::UInt(v) => Ok(Word::UInt(v)),
        other => heap.alloc_boxed(other),
    }
}

fn bool_word(b: bool) -> Word {
    Word::Symbol(if b { reserved::TRUE } else { reserved::FALSE })
}

fn fold_numeric(
    args: &[Word],
    heap: &Heap,
    identity: Numeric,
    op: impl Fn(Numeric, Numeric) -> Result<Numeric, RuntimeError>,
) -> Result<Numeric, RuntimeError> {
    if args.is_empty() {
        return Ok(identity);
    }
    let mut acc = heap.numeric_of(args[0])?;
    for &a in &args[1..] {
        let n = heap.numeric_of(a)?;
        let rank = acc.rank().max(n.rank());
        acc = op(acc.widen_to(rank), n.widen_to(rank))?;
    }
    Ok(acc)
}

fn promote_pair(heap: &Heap, a: Word, b: Word) -> Result<(Numeric, Numeric), RuntimeError> {
    let na = heap.numeric_of(a)?;
    let nb = heap.numeric_of(b)?;
    let rank = na.rank().max(nb.rank());
    Ok((na.widen_to(rank), nb.widen_to(rank)))
}

fn numeric_add(a: Numeric, b: Numeric) -> Result<Numeric, RuntimeError> {
    Ok(if a.is_float() {
        Numeric::F64(a.as_f64() + b.as_f64()).widen_to(a.rank())
    } else {
        rewrap_int(a.rank(), a.as_i64().wrapping_add(b.as_i64()))
    })
}

fn numeric_sub(a: Numeric, b: Numeric) -> Result<Numeric, RuntimeError> {
    Ok(if a.is_float() {
        Numeric::F64(a.as_f64() - b.as_f64()).widen_to(a.rank())
    } else {
        rewrap_int(a.rank(), a.as_i64().wrapping_sub(b.as_i64()))
    })
}

fn numeric_mul(a: Numeric, b: Numeric) -> Result<Numeric, RuntimeError> {
    Ok(if a.is_float() {
        Numeric::F64(a.as_f64() * b.as_f64()).widen_to(a.rank())
    } else {
        rewrap_int(a.rank(), a.as_i64().wrapping_mul(b.as_i64()))
    })
}

fn numeric_div(a: Numeric, b: Numeric) -> Result<Numeric, RuntimeError> {
    if a.is_float() {
        return Ok(Numeric::F64(a.as_f64() / b.as_f64()).widen_to(a.rank()));
    }
    if b.as_i64() == 0 {
        return Err(RuntimeError::EvalError("division by zero".into()));
    }
    Ok(rewrap_int(a.rank(), a.as_i64().wrapping_div(b.as_i64())))
}

fn rewrap_int(rank: u8, v: i64) -> Numeric {
    Numeric::I64(v).widen_to(rank)
}

fn cmp_chain(args: &[Word], heap: &Heap, cmp: impl Fn(f64, f64) -> bool) -> Result<Word, RuntimeError> {
    if args.len() < 2 {
        return Ok(bool_word(true));
    }
    for pair in args.windows(2) {
        let (a, b) = promote_pair(heap, pair[0], pair[1])?;
        if !cmp(a.as_f64(), b.as_f64()) {
            return Ok(bool_word(false));
        }
    }
    Ok(bool_word(true))
}

/// Run the fundamental named by `id` against already-evaluated `args`.
pub fn call(id: SymbolId, args: &[Word], heap: &mut Heap) -> Result<Word, RuntimeError> {
    match id {
        reserved::ADD => {
            let n = fold_numeric(args, heap, Numeric::Int(0), numeric_add)?;
            numeric_result(heap, n)
        }
        reserved::MUL => {
            let n = fold_numeric(args, heap, Numeric::Int(1), numeric_mul)?;
            numeric_result(heap, n)
        }
        reserved::SUB => {
            if args.is_empty() {
                return Err(RuntimeError::EvalError("- needs at least one argument".into()));
            }
            if args.len() == 1 {
                let n = heap.numeric_of(args[0])?;
                let negated = if n.is_float() {
                    Numeric::F64(-n.as_f64()).widen_to(n.rank())
                } else {
                    rewrap_int(n.rank(), -n.as_i64())
                };
                return numeric_result(heap, negated);
            }
            let mut acc = heap.numeric_of(args[0])?;
            for &a in &args[1..] {
                let n = heap.numeric_of(a)?;
                let rank = acc.rank().max(n.rank());
                acc = numeric_sub(acc.widen_to(rank), n.widen_to(rank))?;
            }
            numeric_result(heap, acc)
        }
        reserved::DIV => {
            if args.is_empty() {
                return Err(RuntimeError::EvalError("/ needs at least one argument".into()));
            }
            let mut acc = heap.numeric_of(args[0])?;
            if args.len() == 1 {
                acc = numeric_div(Numeric::Int(1).widen_to(acc.rank().max(4)), acc)?;
                return numeric_result(heap, acc);
            }
            for &a in &args[1..] {
                let n = heap.numeric_of(a)?;
                let rank = acc.rank().max(n.rank());
                acc = numeric_div(acc.widen_to(rank), n.widen_to(rank))?;
            }
            numeric_result(heap, acc)
        }
        reserved::NUM_EQ => cmp_chain(args, heap, |a, b| a == b),
        reserved::LT => cmp_chain(args, heap, |a, b| a < b),
        reserved::GT => cmp_chain(args, heap, |a, b| a > b),
        reserved::LE => cmp_chain(args, heap, |a, b| a <= b),
        reserved::GE => cmp_chain(args, heap, |a, b| a >= b),

        reserved::CONS => {
            expect_arity(args, 2, "cons")?;
            heap.cons(args[0], args[1])
        }
        reserved::CAR => {
            expect_arity(args, 1, "car")?;
            heap.car(args[0])
        }
        reserved::CDR => {
            expect_arity(args, 1, "cdr")?;
            heap.cdr(args[0])
        }
        reserved::SET_CAR => {
            expect_arity(args, 2, "set-car!")?;
            heap.set_car(args[0], args[1])?;
            Ok(bool_word(true))
        }
        reserved::SET_CDR => {
            expect_arity(args, 2, "set-cdr!")?;
            heap.set_cdr(args[0], args[1])?;
            Ok(bool_word(true))
        }
        reserved::NULL_P => {
            expect_arity(args, 1, "null?")?;
            Ok(bool_word(matches!(args[0], Word::Symbol(s) if s == reserved::NIL)))
        }
        reserved::PAIR_P => {
            expect_arity(args, 1, "pair?")?;
            Ok(bool_word(heap.is_cons(args[0])))
        }

        reserved::EQ_P => {
            expect_arity(args, 2, "eq?")?;
            Ok(bool_word(args[0] == args[1]))
        }
        reserved::SYMBOL_P => {
            expect_arity(args, 1, "symbol?")?;
            Ok(bool_word(matches!(args[0], Word::Symbol(_))))
        }
        reserved::INTEGER_P => {
            expect_arity(args, 1, "integer?")?;
            let is_int = match heap.numeric_of(args[0]) {
                Ok(n) => !n.is_float(),
                Err(_) => false,
            };
            Ok(bool_word(is_int))
        }
        reserved::FLOAT_P => {
            expect_arity(args, 1, "float?")?;
            let is_float = match heap.numeric_of(args[0]) {
                Ok(n) => n.is_float(),
                Err(_) => false,
            };
            Ok(bool_word(is_float))
        }
        reserved::CLOSURE_P => {
            expect_arity(args, 1, "closure?")?;
            let is_closure = matches!(
                crate::callable::classify(heap, args[0])?,
                crate::callable::Callable::Closure { .. }
            );
            Ok(bool_word(is_closure))
        }

        other => Err(RuntimeError::EvalError(format!(
            "{other:?} is not a fundamental"
        ))),
    }
}

fn expect_arity(args: &[Word], n: usize, name: &str) -> Result<(), RuntimeError> {
    if args.len() != n {
        return Err(RuntimeError::EvalError(format!(
            "{name} expects {n} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}
