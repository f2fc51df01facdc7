//! The writer engine: emission plans and the routines that execute them.
//!
//! A [`WriterPlan`] mirrors its shape: object nodes carry the declared field
//! order with pre-escaped key literals computed at plan build, list and map
//! nodes carry iteration closures plus a child plan, scalar nodes a typed
//! emitter. Execution descends the plan over a borrowed source value and
//! emits UTF-8 JSON into a [`ByteSink`].

mod sink;

pub use sink::{ByteSink, FixedSink, GrowableSink, StreamSink};

use std::any::Any;

use crate::error::WriteError;
use crate::options::PlanOptions;
use crate::shape::{EntryIterFn, GetterRef, IterFn, ScalarKind};
use crate::value::Value;

pub(crate) type NodeId = usize;

pub(crate) enum WriteNode {
    Scalar(ScalarKind),
    Object { fields: Vec<WriteField> },
    List { iter: IterFn, elem: NodeId },
    Map { key: ScalarKind, iter: EntryIterFn, value: NodeId },
    Any,
}

pub(crate) struct WriteField {
    /// `"name":` with the name already JSON-escaped, computed at plan build.
    pub(crate) key_literal: Vec<u8>,
    pub(crate) getter: GetterRef,
    pub(crate) child: NodeId,
}

/// A compiled writer for one shape.
///
/// Plans are immutable once built and shared behind `Arc` by the
/// [`Mapper`](crate::Mapper) cache. The source value must be fully
/// materialized; object fields are written in declared order regardless of
/// how the value was produced.
pub struct WriterPlan {
    pub(crate) nodes: Vec<WriteNode>,
    pub(crate) root: NodeId,
    pub(crate) options: PlanOptions,
    pub(crate) key: String,
}

impl WriterPlan {
    /// The canonical type key this plan was built for.
    #[must_use]
    pub fn type_key(&self) -> &str {
        &self.key
    }

    /// Emit `value` into `sink` and flush it.
    pub fn write(&self, value: &dyn Any, sink: &mut dyn ByteSink) -> Result<(), WriteError> {
        log::trace!("writing {}", self.key);
        self.emit(self.root, value, sink)?;
        sink.flush()
    }

    /// Emit `value` into a growable buffer.
    pub fn write_bytes(&self, value: &dyn Any) -> Result<Vec<u8>, WriteError> {
        let mut sink = GrowableSink::with_capacity(self.options.initial_output_capacity);
        self.write(value, &mut sink)?;
        Ok(sink.into_bytes())
    }

    /// Emit `value` as a `String`.
    pub fn write_string(&self, value: &dyn Any) -> Result<String, WriteError> {
        let bytes = self.write_bytes(value)?;
        Ok(String::from_utf8(bytes).expect("writer emits UTF-8"))
    }

    /// Emit `value` through a buffered sink into `out`.
    pub fn write_stream<W: std::io::Write>(&self, value: &dyn Any, out: W) -> Result<(), WriteError> {
        let mut sink = StreamSink::new(out);
        self.write(value, &mut sink)
    }

    fn emit(&self, node: NodeId, value: &dyn Any, sink: &mut dyn ByteSink) -> Result<(), WriteError> {
        match &self.nodes[node] {
            WriteNode::Scalar(kind) => emit_scalar(*kind, value, sink),
            WriteNode::Object { fields } => {
                sink.write_byte(b'{')?;
                let mut first = true;
                for field in fields {
                    match (field.getter)(value) {
                        Some(child) => {
                            if !first {
                                sink.write_byte(b',')?;
                            }
                            first = false;
                            sink.write_bytes(&field.key_literal)?;
                            self.emit(field.child, child, sink)?;
                        }
                        None if self.options.emit_null_for_absent => {
                            if !first {
                                sink.write_byte(b',')?;
                            }
                            first = false;
                            sink.write_bytes(&field.key_literal)?;
                            sink.write_bytes(b"null")?;
                        }
                        None => {}
                    }
                }
                sink.write_byte(b'}')
            }
            WriteNode::List { iter, elem } => {
                sink.write_byte(b'[')?;
                let mut first = true;
                iter(value, &mut |item| {
                    if !first {
                        sink.write_byte(b',')?;
                    }
                    first = false;
                    self.emit(*elem, item, sink)
                })?;
                sink.write_byte(b']')
            }
            WriteNode::Map { key, iter, value: child } => {
                sink.write_byte(b'{')?;
                let mut first = true;
                iter(value, &mut |k, v| {
                    if !first {
                        sink.write_byte(b',')?;
                    }
                    first = false;
                    emit_key(*key, k, sink)?;
                    sink.write_byte(b':')?;
                    self.emit(*child, v, sink)
                })?;
                sink.write_byte(b'}')
            }
            WriteNode::Any => {
                let value = value.downcast_ref::<Value>().expect("any source value");
                write_any(value, sink)
            }
        }
    }
}

macro_rules! emit_int {
    ($sink:expr, $value:expr, $ty:ty) => {{
        let v = $value.downcast_ref::<$ty>().expect("scalar source type");
        $sink.write_bytes(itoa::Buffer::new().format(*v).as_bytes())
    }};
}

fn emit_scalar(kind: ScalarKind, value: &dyn Any, sink: &mut dyn ByteSink) -> Result<(), WriteError> {
    match kind {
        ScalarKind::Bool => {
            let v = value.downcast_ref::<bool>().expect("scalar source type");
            sink.write_bytes(if *v { b"true" } else { b"false" })
        }
        ScalarKind::I8 => emit_int!(sink, value, i8),
        ScalarKind::I16 => emit_int!(sink, value, i16),
        ScalarKind::I32 => emit_int!(sink, value, i32),
        ScalarKind::I64 => emit_int!(sink, value, i64),
        ScalarKind::U8 => emit_int!(sink, value, u8),
        ScalarKind::U16 => emit_int!(sink, value, u16),
        ScalarKind::U32 => emit_int!(sink, value, u32),
        ScalarKind::U64 => emit_int!(sink, value, u64),
        ScalarKind::F32 => {
            let v = *value.downcast_ref::<f32>().expect("scalar source type");
            if !v.is_finite() {
                return Err(WriteError::NonFinite);
            }
            sink.write_bytes(ryu::Buffer::new().format_finite(v).as_bytes())
        }
        ScalarKind::F64 => {
            let v = *value.downcast_ref::<f64>().expect("scalar source type");
            if !v.is_finite() {
                return Err(WriteError::NonFinite);
            }
            sink.write_bytes(ryu::Buffer::new().format_finite(v).as_bytes())
        }
        ScalarKind::Char => {
            let v = *value.downcast_ref::<char>().expect("scalar source type");
            let mut utf8 = [0u8; 4];
            write_json_string(v.encode_utf8(&mut utf8), sink)
        }
        ScalarKind::String => {
            let v = value.downcast_ref::<String>().expect("scalar source type");
            write_json_string(v, sink)
        }
    }
}

fn emit_key(kind: ScalarKind, key: &dyn Any, sink: &mut dyn ByteSink) -> Result<(), WriteError> {
    macro_rules! quoted_int {
        ($ty:ty) => {{
            let v = key.downcast_ref::<$ty>().expect("map key type");
            sink.write_byte(b'"')?;
            sink.write_bytes(itoa::Buffer::new().format(*v).as_bytes())?;
            sink.write_byte(b'"')
        }};
    }

    match kind {
        ScalarKind::String => {
            let v = key.downcast_ref::<String>().expect("map key type");
            write_json_string(v, sink)
        }
        ScalarKind::Char => {
            let v = *key.downcast_ref::<char>().expect("map key type");
            let mut utf8 = [0u8; 4];
            write_json_string(v.encode_utf8(&mut utf8), sink)
        }
        ScalarKind::I8 => quoted_int!(i8),
        ScalarKind::I16 => quoted_int!(i16),
        ScalarKind::I32 => quoted_int!(i32),
        ScalarKind::I64 => quoted_int!(i64),
        ScalarKind::U8 => quoted_int!(u8),
        ScalarKind::U16 => quoted_int!(u16),
        ScalarKind::U32 => quoted_int!(u32),
        ScalarKind::U64 => quoted_int!(u64),
        _ => unreachable!("key kind validated at plan build"),
    }
}

/// Emit a quoted, escaped JSON string.
///
/// `"` and `\` take their two-byte escapes; bytes below 0x20 are escaped as
/// `\u00XX`; everything else passes through verbatim as UTF-8.
pub(crate) fn write_json_string(text: &str, sink: &mut dyn ByteSink) -> Result<(), WriteError> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    sink.write_byte(b'"')?;
    let bytes = text.as_bytes();
    let mut plain = 0;
    for (idx, &b) in bytes.iter().enumerate() {
        if b == b'"' || b == b'\\' || b < 0x20 {
            if plain < idx {
                sink.write_bytes(&bytes[plain..idx])?;
            }
            match b {
                b'"' => sink.write_bytes(b"\\\"")?,
                b'\\' => sink.write_bytes(b"\\\\")?,
                _ => {
                    sink.write_bytes(&[b'\\', b'u', b'0', b'0', HEX[(b >> 4) as usize], HEX[(b & 0xF) as usize]])?;
                }
            }
            plain = idx + 1;
        }
    }
    if plain < bytes.len() {
        sink.write_bytes(&bytes[plain..])?;
    }
    sink.write_byte(b'"')
}

/// Emit a dynamic [`Value`].
pub(crate) fn write_any(value: &Value, sink: &mut dyn ByteSink) -> Result<(), WriteError> {
    match value {
        Value::Null => sink.write_bytes(b"null"),
        Value::Boolean(b) => sink.write_bytes(if *b { b"true" } else { b"false" }),
        Value::Number(n) => {
            if !n.is_finite() {
                return Err(WriteError::NonFinite);
            }
            sink.write_bytes(ryu::Buffer::new().format_finite(*n).as_bytes())
        }
        Value::String(s) => write_json_string(s, sink),
        Value::Array(items) => {
            sink.write_byte(b'[')?;
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    sink.write_byte(b',')?;
                }
                write_any(item, sink)?;
            }
            sink.write_byte(b']')
        }
        Value::Object(map) => {
            sink.write_byte(b'{')?;
            for (idx, (k, v)) in map.iter().enumerate() {
                if idx > 0 {
                    sink.write_byte(b',')?;
                }
                write_json_string(k, sink)?;
                sink.write_byte(b':')?;
                write_any(v, sink)?;
            }
            sink.write_byte(b'}')
        }
    }
}

pub(crate) fn any_to_string(value: &Value) -> Result<String, WriteError> {
    let mut sink = GrowableSink::with_capacity(128);
    write_any(value, &mut sink)?;
    Ok(String::from_utf8(sink.into_bytes()).expect("writer emits UTF-8"))
}
