//! Continuation frames (§4.E, §4.G "Continuation frames").
//!
//! Every frame is flattened to a fixed-width run of [`Word`]s: a tag
//! plus four operand slots, padded with `nil` where a frame needs fewer,
//! pushed onto the context's [`KStack`] with `push_n`/`pop_n`. This
//! keeps the physical continuation stack exactly what §4.E specifies (a
//! word buffer with push/pop/push_n/pop_n/clear/sp/max_sp), while giving
//! the evaluator a typed [`Frame`] to match on.

use limn_core::{reserved, KStack, RuntimeError, SymbolId, Word};

const FRAME_WIDTH: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Frame {
    Done,
    SetGlobalEnv { key: SymbolId },
    /// `env` is the environment the remaining body forms run in. A tail
    /// call resolved while evaluating the current form overwrites
    /// `curr_env` and never restores it, so the next form needs its own
    /// copy rather than trusting whatever is left in the register.
    PrognRest { rest: Word, env: Word },
    If { then: Word, else_: Word, env: Word },
    ArgList { env: Word, acc: Word, rest: Word },
    /// `head` is the raw (unevaluated) operator expression; `env` is
    /// where it (and the arguments already collected into `r`) were
    /// found, for the same reason as `PrognRest`.
    Function { head: Word, env: Word },
    FunctionApp { args_reversed: Word },
    /// `let`/`letrec` binding chain (§4.G "BIND_TO_KEY_REST"): `env` is
    /// the frame every name was pre-bound to `nil` in, `key` is the
    /// binding just evaluated, `rest` is the remaining `(name . init)`
    /// pairs still to bind, `body` is the form to run once `rest` is
    /// empty.
    BindToKeyRest { rest: Word, env: Word, key: SymbolId, body: Word },
    /// `set!`'s single rebinding: `key`'s nearest lexical occurrence is
    /// overwritten with the value just computed, and that value (not
    /// `nil`) is the result (§4.F "modify"). `env` is captured at the
    /// point `set!` was evaluated, the same reason `PrognRest` captures
    /// `env`.
    SetVar { env: Word, key: SymbolId },
}

fn nil() -> Word {
    Word::Symbol(reserved::NIL)
}

fn tag_of(frame: &Frame) -> i32 {
    match frame {
        Frame::Done => 0,
        Frame::SetGlobalEnv { .. } => 1,
        Frame::PrognRest { .. } => 2,
        Frame::If { .. } => 3,
        Frame::ArgList { .. } => 4,
        Frame::Function { .. } => 5,
        Frame::FunctionApp { .. } => 6,
        Frame::BindToKeyRest { .. } => 7,
        Frame::SetVar { .. } => 8,
    }
}

pub fn push_frame(stack: &mut KStack, frame: Frame) -> Result<(), RuntimeError> {
    let words = match frame {
        Frame::Done => [nil(), nil(), nil(), nil()],
        Frame::SetGlobalEnv { key } => [Word::Symbol(key), nil(), nil(), nil()],
        Frame::PrognRest { rest, env } => [rest, env, nil(), nil()],
        Frame::If { then, else_, env } => [then, else_, env, nil()],
        Frame::ArgList { env, acc, rest } => [env, acc, rest, nil()],
        Frame::Function { head, env } => [head, env, nil(), nil()],
        Frame::FunctionApp { args_reversed } => [args_reversed, nil(), nil(), nil()],
        Frame::BindToKeyRest { rest, env, key, body } => [rest, env, Word::Symbol(key), body],
        Frame::SetVar { env, key } => [env, Word::Symbol(key), nil(), nil()],
    };
    stack.push(Word::Int(tag_of(&frame)))?;
    stack.push_n(&words)
}

pub fn pop_frame(stack: &mut KStack) -> Option<Frame> {
    let words = stack.pop_n(FRAME_WIDTH - 1)?;
    let tag = stack.pop()?;
    let tag = match tag {
        Word::Int(t) => t,
        _ => return None,
    };
    let sym = |w: Word| match w {
        Word::Symbol(s) => s,
        _ => reserved::NIL,
    };
    Some(match tag {
        0 => Frame::Done,
        1 => Frame::SetGlobalEnv { key: sym(words[0]) },
        2 => Frame::PrognRest { rest: words[0], env: words[1] },
        3 => Frame::If { then: words[0], else_: words[1], env: words[2] },
        4 => Frame::ArgList { env: words[0], acc: words[1], rest: words[2] },
        5 => Frame::Function { head: words[0], env: words[1] },
        6 => Frame::FunctionApp { args_reversed: words[0] },
        7 => Frame::BindToKeyRest {
            rest: words[0],
            env: words[1],
            key: sym(words[2]),
            body: words[3],
        },
        8 => Frame::SetVar { env: words[0], key: sym(words[1]) },
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trips_every_variant() {
        let mut stack = KStack::new(64);
        let frames = [
            Frame::Done,
            Frame::SetGlobalEnv { key: SymbolId(7) },
            Frame::PrognRest { rest: Word::Int(1), env: Word::Int(5) },
            Frame::If { then: Word::Int(1), else_: Word::Int(2), env: Word::Int(5) },
            Frame::ArgList { env: Word::Int(1), acc: Word::Int(2), rest: Word::Int(3) },
            Frame::Function { head: Word::Int(9), env: Word::Int(5) },
            Frame::FunctionApp { args_reversed: Word::Int(4) },
            Frame::BindToKeyRest {
                rest: Word::Int(1),
                env: Word::Int(2),
                key: SymbolId(3),
                body: Word::Int(4),
            },
            Frame::SetVar { env: Word::Int(2), key: SymbolId(3) },
        ];
        for f in frames {
            push_frame(&mut stack, f).unwrap();
            assert_eq!(pop_frame(&mut stack), Some(f));
        }
    }

    #[test]
    fn frames_nest_lifo() {
        let mut stack = KStack::new(64);
        push_frame(&mut stack, Frame::Done).unwrap();
        push_frame(&mut stack, Frame::Function { head: Word::Int(1), env: Word::Int(2) }).unwrap();
        assert_eq!(pop_frame(&mut stack), Some(Frame::Function { head: Word::Int(1), env: Word::Int(2) }));
        assert_eq!(pop_frame(&mut stack), Some(Frame::Done));
    }

    #[test]
    fn push_fails_when_capacity_exhausted() {
        let mut stack = KStack::new(3);
        let err = push_frame(&mut stack, Frame::Done).unwrap_err();
        assert_eq!(err, RuntimeError::OutOfMemory);
    }
}
