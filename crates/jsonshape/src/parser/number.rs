//! Number scanning and terminal conversion.
//!
//! [`NumberScanner`] walks the JSON number grammar one byte at a time:
//! optional `-`, integer part (`0` or `[1-9][0-9]*`), optional `.[0-9]+`,
//! optional `[eE][+-]?[0-9]+`. A number has no terminator of its own; it
//! ends at the first byte that cannot extend it, which is left for the
//! enclosing state to consume. The scanner is a plain state value, so a
//! number split across chunk boundaries resumes where it left off.

use std::any::Any;

use crate::error::{ParseError, ParseErrorKind};
use crate::shape::ScalarKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberState {
    Sign,
    Zero,
    Integer,
    Point,
    Fraction,
    Exponent,
    ExponentSign,
    ExponentInteger,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum NumberStep {
    /// Byte consumed into the token.
    Consumed,
    /// Byte does not extend the number; the token is complete and the byte
    /// belongs to the enclosing state.
    Terminal,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct NumberScanner {
    state: NumberState,
}

impl NumberScanner {
    /// Start scanning at the dispatch byte (`-` or a digit), which the
    /// caller has already appended to the token.
    pub(crate) fn new(first: u8) -> Self {
        let state = match first {
            b'-' => NumberState::Sign,
            b'0' => NumberState::Zero,
            b'1'..=b'9' => NumberState::Integer,
            _ => unreachable!("number dispatch byte"),
        };
        Self { state }
    }

    pub(crate) fn step(&mut self, b: u8, token: &mut Vec<u8>) -> Result<NumberStep, ParseErrorKind> {
        use NumberState::*;

        let next = match (self.state, b) {
            (Sign, b'0') => Zero,
            (Sign, b'1'..=b'9') => Integer,

            (Zero, b'.') => Point,
            (Zero, b'e' | b'E') => Exponent,
            // A digit after a leading zero is not valid JSON.
            (Zero, b'0'..=b'9') => return Err(ParseErrorKind::UnexpectedToken),
            (Zero, _) => return Ok(NumberStep::Terminal),

            (Integer, b'0'..=b'9') => Integer,
            (Integer, b'.') => Point,
            (Integer, b'e' | b'E') => Exponent,
            (Integer, _) => return Ok(NumberStep::Terminal),

            (Point, b'0'..=b'9') => Fraction,

            (Fraction, b'0'..=b'9') => Fraction,
            (Fraction, b'e' | b'E') => Exponent,
            (Fraction, _) => return Ok(NumberStep::Terminal),

            (Exponent, b'+' | b'-') => ExponentSign,
            (Exponent, b'0'..=b'9') => ExponentInteger,

            (ExponentSign, b'0'..=b'9') => ExponentInteger,

            (ExponentInteger, b'0'..=b'9') => ExponentInteger,
            (ExponentInteger, _) => return Ok(NumberStep::Terminal),

            _ => return Err(ParseErrorKind::UnexpectedToken),
        };

        self.state = next;
        token.push(b);
        Ok(NumberStep::Consumed)
    }

    /// Whether end-of-input may legally terminate the number here.
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            NumberState::Zero | NumberState::Integer | NumberState::Fraction | NumberState::ExponentInteger
        )
    }
}

/// Convert a complete token to the target scalar kind.
///
/// `offset` is the position of the token's first byte; all conversion
/// failures point there.
pub(crate) fn convert(kind: ScalarKind, token: &[u8], offset: usize) -> Result<Box<dyn Any>, ParseError> {
    let text = std::str::from_utf8(token).expect("number tokens are ASCII");

    if kind.is_integer() && token.iter().any(|b| matches!(b, b'.' | b'e' | b'E')) {
        return Err(ParseError::new(ParseErrorKind::TypeMismatch, offset));
    }

    let out_of_range = || ParseError::new(ParseErrorKind::NumberOutOfRange, offset);

    macro_rules! int {
        ($ty:ty) => {
            Ok(Box::new(text.parse::<$ty>().map_err(|_| out_of_range())?) as Box<dyn Any>)
        };
    }

    match kind {
        ScalarKind::I8 => int!(i8),
        ScalarKind::I16 => int!(i16),
        ScalarKind::I32 => int!(i32),
        ScalarKind::I64 => int!(i64),
        ScalarKind::U8 => int!(u8),
        ScalarKind::U16 => int!(u16),
        ScalarKind::U32 => int!(u32),
        ScalarKind::U64 => int!(u64),
        ScalarKind::F32 => {
            let v = text.parse::<f32>().map_err(|_| out_of_range())?;
            if v.is_finite() {
                Ok(Box::new(v))
            } else {
                Err(out_of_range())
            }
        }
        ScalarKind::F64 => {
            let v = convert_f64(token, offset)?;
            Ok(Box::new(v))
        }
        ScalarKind::Bool | ScalarKind::Char | ScalarKind::String => {
            Err(ParseError::new(ParseErrorKind::TypeMismatch, offset))
        }
    }
}

/// Convert a complete token to `f64` (the representation of `Any` numbers).
pub(crate) fn convert_f64(token: &[u8], offset: usize) -> Result<f64, ParseError> {
    let text = std::str::from_utf8(token).expect("number tokens are ASCII");
    let v = text
        .parse::<f64>()
        .map_err(|_| ParseError::new(ParseErrorKind::NumberOutOfRange, offset))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ParseError::new(ParseErrorKind::NumberOutOfRange, offset))
    }
}
