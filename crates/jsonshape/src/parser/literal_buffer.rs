//! Per-byte matcher for the JSON literals `true`, `false`, and `null`.

/// Which literal completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LiteralValue {
    Null,
    True,
    False,
}

/// What happened after feeding one more byte into the literal matcher?
pub(crate) enum Step {
    /// Byte matched, but the literal is not finished yet.
    NeedMore,
    /// Byte matched *and* it was the last byte of the literal.
    Done(LiteralValue),
    /// Byte did **not** match the expected one.
    Reject,
}

/// `(remaining_bytes, literal)` while matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LiteralBuffer(&'static [u8], LiteralValue);

impl LiteralBuffer {
    /// Start matching after the *first* byte (`n`, `t`, or `f`).
    ///
    /// Callers dispatch on the first byte, so any other input here is a
    /// logic error.
    pub(crate) fn new(first: u8) -> Self {
        match first {
            b'n' => Self(b"ull", LiteralValue::Null),
            b't' => Self(b"rue", LiteralValue::True),
            b'f' => Self(b"alse", LiteralValue::False),
            _ => unreachable!("literal dispatch byte"),
        }
    }

    /// Give the matcher the next input byte and learn what to do next.
    pub(crate) fn step(&mut self, b: u8) -> Step {
        match self.0.split_first() {
            Some((expected, rest)) if *expected == b => {
                if rest.is_empty() {
                    Step::Done(self.1)
                } else {
                    self.0 = rest;
                    Step::NeedMore
                }
            }
            _ => Step::Reject,
        }
    }
}
