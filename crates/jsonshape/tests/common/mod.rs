//! Helpers shared by the integration tests.
#![allow(dead_code)]

use jsonshape::{FieldSpec, ScalarKind, Shape};

/// Split `payload` into `parts` approximately equal byte chunks.
///
/// The parser is byte-resumable, so splits may land anywhere, including
/// inside multi-byte characters and escape sequences.
///
/// # Panics
///
/// Panics if `parts` is zero.
#[must_use]
pub fn produce_chunks(payload: &[u8], parts: usize) -> Vec<&[u8]> {
    assert!(parts > 0);
    let len = payload.len();
    let chunk_size = len.div_ceil(parts).max(1);
    payload.chunks(chunk_size).collect()
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub age: i32,
}

#[must_use]
pub fn person_shape() -> Shape {
    Shape::object::<Person>(vec![
        FieldSpec::required(
            "name",
            Shape::string(),
            |p: &mut Person, v| p.name = v,
            |p: &Person| &p.name,
        ),
        FieldSpec::required(
            "age",
            Shape::scalar(ScalarKind::I32),
            |p: &mut Person, v| p.age = v,
            |p: &Person| &p.age,
        ),
    ])
}
