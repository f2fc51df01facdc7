//! The pull-style incremental parser core.
//!
//! A [`ParserPlan`] is a compiled state-machine tree for one shape: an arena
//! of [`ParserNode`]s addressed by index, with back-edges for recursive
//! shapes. A [`ParseSession`] executes a plan over byte chunks: each frame
//! on the state stack advances byte by byte, and when a fed chunk is
//! exhausted mid-value the session suspends — all in-flight token, escape,
//! and key-match state is plain data in the session, so the next chunk picks
//! up exactly where the previous one stopped.
//!
//! The session drives one frame at a time: a step either consumes input,
//! pushes a child frame, pops with a produced value, or fails with a byte
//! offset. Produced values travel to the parent frame's awaiting step; the
//! root value becomes the session result.

mod escape_buffer;
mod literal_buffer;
mod number;
mod trie;

#[cfg(test)]
mod tests;

use std::any::Any;

use escape_buffer::UnicodeEscapeBuffer;
use literal_buffer::{LiteralBuffer, LiteralValue, Step};
use number::{NumberScanner, NumberStep};
pub(crate) use trie::KeyTrie;

use crate::error::{Error, ParseError, ParseErrorKind};
use crate::options::PlanOptions;
use crate::shape::{InsertFn, MakeFn, PushFn, ScalarKind, SetterRef};
use crate::value::Value;

pub(crate) type NodeId = usize;

/// Sentinel for "key matched no declared field".
const FIELD_UNKNOWN: u32 = u32::MAX;

/// One state node of a compiled parser plan.
pub(crate) enum ParserNode {
    /// Typed scalar terminal.
    Scalar(ScalarKind),
    Object(ObjectNode),
    List(ListNode),
    Map(MapNode),
    /// Heterogeneous value dispatch: materializes [`Value`]. Also the
    /// machinery that parses and discards unknown object keys.
    Dispatch { object: NodeId, array: NodeId },
}

pub(crate) struct ObjectNode {
    pub(crate) make: MakeFn,
    pub(crate) fields: Vec<FieldNode>,
    pub(crate) trie: KeyTrie,
    /// Dispatch node used to consume values of unknown keys.
    pub(crate) discard: NodeId,
}

pub(crate) struct FieldNode {
    pub(crate) setter: SetterRef,
    pub(crate) child: NodeId,
    pub(crate) optional: bool,
}

pub(crate) struct ListNode {
    pub(crate) new: MakeFn,
    pub(crate) push: PushFn,
    pub(crate) elem: NodeId,
}

pub(crate) struct MapNode {
    pub(crate) new: MakeFn,
    pub(crate) insert: InsertFn,
    pub(crate) key: ScalarKind,
    pub(crate) value: NodeId,
    /// Set for the maps backing `Dispatch`; duplicate keys never fail there.
    pub(crate) any: bool,
}

/// A compiled parser for one shape.
///
/// Plans are immutable once built and are shared behind `Arc` by the
/// [`Mapper`](crate::Mapper) cache. Obtain a [`ParseSession`] with
/// [`start`](ParserPlan::start) for streaming use, or parse whole inputs
/// with the one-shot helpers.
pub struct ParserPlan {
    pub(crate) nodes: Vec<ParserNode>,
    pub(crate) root: NodeId,
    pub(crate) options: PlanOptions,
    pub(crate) key: String,
}

impl ParserPlan {
    /// The canonical type key this plan was built for.
    #[must_use]
    pub fn type_key(&self) -> &str {
        &self.key
    }

    /// Begin a streaming parse.
    #[must_use]
    pub fn start(&self) -> ParseSession<'_> {
        log::trace!("starting parse session for {}", self.key);
        ParseSession::new(self)
    }

    /// Parse a complete, fully buffered input.
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Box<dyn Any>, ParseError> {
        let mut session = self.start();
        session.feed(bytes)?;
        session.end()
    }

    /// Parse a complete JSON string.
    pub fn parse_str(&self, text: &str) -> Result<Box<dyn Any>, ParseError> {
        self.parse_bytes(text.as_bytes())
    }

    /// Parse from a reader, feeding fixed-size chunks until the root value
    /// completes or the stream ends.
    pub fn parse_stream(&self, mut input: impl std::io::Read) -> Result<Box<dyn Any>, Error> {
        let mut session = self.start();
        let mut buf = vec![0u8; self.options.stream_chunk_size.max(1)];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                return Ok(session.end()?);
            }
            if session.feed(&buf[..n])? == FeedStatus::Complete {
                return Ok(session.end()?);
            }
        }
    }
}

/// Outcome of feeding one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// The chunk was consumed but the root value is still in progress.
    NeedMore,
    /// The root value completed; in stream mode, stop feeding.
    Complete,
}

/// Escape progress inside a string token, preserved across chunk refills.
#[derive(Debug, Clone, Copy)]
enum EscapeState {
    None,
    /// A backslash was consumed; the escape selector byte is next.
    Start,
    Unicode(UnicodeEscapeBuffer),
    /// A high surrogate was decoded; `\` of the low half is next.
    HighBackslash(u16),
    /// Expecting the `u` of the low surrogate escape.
    HighU(u16),
    Low(u16, UnicodeEscapeBuffer),
}

struct Frame {
    node: NodeId,
    step: u8,
    /// Matched field index for objects, wrap marker for dispatch.
    field: u32,
    /// Fields already populated, for duplicate detection.
    seen: u128,
    trie_state: u32,
    /// Offset of the current key's opening quote.
    mark: usize,
}

impl Frame {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            step: 0,
            field: 0,
            seen: 0,
            trie_state: 0,
            mark: 0,
        }
    }
}

/// Partially constructed composite values, one per composite frame.
enum Building {
    Object(Box<dyn Any>),
    List(Box<dyn Any>),
    Map {
        map: Box<dyn Any>,
        key: Option<Box<dyn Any>>,
    },
}

enum Flow {
    Progress,
    NeedMore,
}

/// A single in-progress parse over a plan.
///
/// Sessions are single-threaded, scoped to one parse, and discarded after
/// [`end`](ParseSession::end) (or after an error; every failure poisons the
/// session).
pub struct ParseSession<'p> {
    plan: &'p ParserPlan,
    opts: PlanOptions,

    frames: Vec<Frame>,
    values: Vec<Building>,
    /// Value popped by a child frame, awaiting its parent.
    pending: Option<Box<dyn Any>>,

    /// Raw bytes of the number token in progress.
    token: Vec<u8>,
    /// Decoded bytes of the string token in progress.
    sbuf: Vec<u8>,
    /// Offset of the first byte of the token in progress.
    token_start: usize,
    escape: EscapeState,
    num: Option<NumberScanner>,
    literal: Option<LiteralBuffer>,

    /// Global byte offset across all fed chunks.
    pos: usize,
    suspended: bool,
    done: bool,
    result: Option<Box<dyn Any>>,
    error: Option<ParseError>,
}

impl<'p> ParseSession<'p> {
    fn new(plan: &'p ParserPlan) -> Self {
        Self {
            plan,
            opts: plan.options,
            frames: vec![Frame::new(plan.root)],
            values: Vec::new(),
            pending: None,
            token: Vec::new(),
            sbuf: Vec::new(),
            token_start: 0,
            escape: EscapeState::None,
            num: None,
            literal: None,
            pos: 0,
            suspended: false,
            done: false,
            result: None,
            error: None,
        }
    }

    /// Feed one chunk. The chunk is always fully consumed; `NeedMore` means
    /// the machine suspended with its state intact.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<FeedStatus, ParseError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let mut i = 0;
        match self.run(chunk, &mut i, false) {
            Ok(status) => Ok(status),
            Err(err) => {
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Declare end of input and take the root value.
    ///
    /// Fails with `UnexpectedEndOfInput` if a value is still in progress;
    /// numbers, which have no terminator of their own, complete here.
    pub fn end(&mut self) -> Result<Box<dyn Any>, ParseError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let mut i = 0;
        match self.run(&[], &mut i, true) {
            Ok(_) => self
                .result
                .take()
                .ok_or_else(|| ParseError::new(ParseErrorKind::UnexpectedEndOfInput, self.pos)),
            Err(err) => {
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Whether the last `feed` returned because input was exhausted.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Global byte offset consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    // --------------------------------------------------------------------
    // Driver
    // --------------------------------------------------------------------

    fn run(&mut self, chunk: &[u8], i: &mut usize, eof: bool) -> Result<FeedStatus, ParseError> {
        let plan = self.plan;
        loop {
            if self.done {
                while *i < chunk.len() {
                    match chunk[*i] {
                        b' ' | b'\t' | b'\n' | b'\r' => self.bump(i),
                        _ if self.opts.strict_trailing => {
                            return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos));
                        }
                        _ => {
                            self.pos += chunk.len() - *i;
                            *i = chunk.len();
                        }
                    }
                }
                self.suspended = false;
                return Ok(FeedStatus::Complete);
            }

            let nid = self.frames.last().expect("active frame").node;
            let flow = match &plan.nodes[nid] {
                ParserNode::Scalar(kind) => self.step_scalar(*kind, chunk, i, eof)?,
                ParserNode::Object(o) => self.step_object(o, chunk, i)?,
                ParserNode::List(l) => self.step_list(l, chunk, i)?,
                ParserNode::Map(m) => self.step_map(m, chunk, i)?,
                ParserNode::Dispatch { object, array } => {
                    self.step_dispatch(*object, *array, chunk, i, eof)?
                }
            };
            match flow {
                Flow::Progress => {}
                Flow::NeedMore => {
                    if eof {
                        return Err(ParseError::new(ParseErrorKind::UnexpectedEndOfInput, self.pos));
                    }
                    self.suspended = true;
                    return Ok(FeedStatus::NeedMore);
                }
            }
        }
    }

    // --------------------------------------------------------------------
    // State steps
    // --------------------------------------------------------------------

    fn step_scalar(
        &mut self,
        kind: ScalarKind,
        chunk: &[u8],
        i: &mut usize,
        eof: bool,
    ) -> Result<Flow, ParseError> {
        match self.top_step() {
            // Dispatch on the first non-whitespace byte.
            0 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                match kind {
                    ScalarKind::String | ScalarKind::Char if b == b'"' => {
                        self.token_start = self.pos;
                        self.bump(i);
                        self.sbuf.clear();
                        self.escape = EscapeState::None;
                        self.set_step(2);
                    }
                    ScalarKind::Bool if b == b't' || b == b'f' => {
                        self.token_start = self.pos;
                        self.literal = Some(LiteralBuffer::new(b));
                        self.bump(i);
                        self.set_step(3);
                    }
                    k if (k.is_integer() || k.is_float()) && (b == b'-' || b.is_ascii_digit()) => {
                        self.token_start = self.pos;
                        self.token.clear();
                        self.token.push(b);
                        self.num = Some(NumberScanner::new(b));
                        self.bump(i);
                        self.set_step(1);
                    }
                    _ => return Err(self.wrong_lead(b)),
                }
                Ok(Flow::Progress)
            }
            1 => {
                if self.scan_number(chunk, i, eof)? {
                    let value = number::convert(kind, &self.token, self.token_start)?;
                    self.pop_value(value);
                    Ok(Flow::Progress)
                } else {
                    Ok(Flow::NeedMore)
                }
            }
            2 => {
                if self.scan_string(chunk, i, None)? {
                    let text = self.take_string()?;
                    let value: Box<dyn Any> = match kind {
                        ScalarKind::String => Box::new(text),
                        ScalarKind::Char => {
                            let mut chars = text.chars();
                            match (chars.next(), chars.next()) {
                                (Some(c), None) => Box::new(c),
                                _ => {
                                    return Err(ParseError::new(
                                        ParseErrorKind::TypeMismatch,
                                        self.token_start,
                                    ));
                                }
                            }
                        }
                        _ => unreachable!("string terminal kind"),
                    };
                    self.pop_value(value);
                    Ok(Flow::Progress)
                } else {
                    Ok(Flow::NeedMore)
                }
            }
            3 => match self.scan_literal(chunk, i)? {
                Some(LiteralValue::True) => {
                    self.pop_value(Box::new(true));
                    Ok(Flow::Progress)
                }
                Some(LiteralValue::False) => {
                    self.pop_value(Box::new(false));
                    Ok(Flow::Progress)
                }
                Some(LiteralValue::Null) => unreachable!("bool dispatch"),
                None => Ok(Flow::NeedMore),
            },
            step => unreachable!("scalar step {step}"),
        }
    }

    fn step_object(&mut self, o: &ObjectNode, chunk: &[u8], i: &mut usize) -> Result<Flow, ParseError> {
        match self.top_step() {
            0 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                if b != b'{' {
                    return Err(self.wrong_lead(b));
                }
                self.bump(i);
                self.values.push(Building::Object((o.make)()));
                self.set_step(1);
                Ok(Flow::Progress)
            }
            // First key, or an immediately closed object.
            1 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                match b {
                    b'}' => {
                        self.bump(i);
                        self.finish_object();
                    }
                    b'"' => {
                        self.begin_key(i);
                        self.set_step(2);
                    }
                    _ => return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos)),
                }
                Ok(Flow::Progress)
            }
            // Key bytes, stepping the field trie as they arrive.
            2 => {
                let mut ts = self.frames.last().expect("active frame").trie_state;
                let done = self.scan_string(chunk, i, Some((&o.trie, &mut ts)))?;
                self.frames.last_mut().expect("active frame").trie_state = ts;
                if !done {
                    return Ok(Flow::NeedMore);
                }
                self.sbuf.clear();
                let mark = self.frames.last().expect("active frame").mark;
                match o.trie.terminal(ts) {
                    Some(idx) => {
                        let frame = self.frames.last_mut().expect("active frame");
                        if usize::from(idx) < 128
                            && frame.seen & (1u128 << idx) != 0
                            && self.opts.strict_duplicates
                        {
                            return Err(ParseError::new(ParseErrorKind::DuplicateField, mark));
                        }
                        frame.field = u32::from(idx);
                    }
                    None => {
                        if self.opts.fail_on_unknown {
                            return Err(ParseError::new(ParseErrorKind::UnknownField, mark));
                        }
                        self.frames.last_mut().expect("active frame").field = FIELD_UNKNOWN;
                    }
                }
                self.set_step(3);
                Ok(Flow::Progress)
            }
            // Colon, then the value state for the matched field.
            3 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                if b != b':' {
                    return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos));
                }
                self.bump(i);
                let field = self.top_field();
                if field == FIELD_UNKNOWN {
                    self.set_step(5);
                    self.push_child(o.discard)?;
                } else {
                    let spec = &o.fields[field as usize];
                    if spec.optional {
                        self.set_step(4);
                    } else {
                        self.set_step(5);
                        self.push_child(spec.child)?;
                    }
                }
                Ok(Flow::Progress)
            }
            // Optional field: `null` is accepted and leaves the default.
            4 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                if b == b'n' {
                    self.literal = Some(LiteralBuffer::new(b));
                    self.bump(i);
                    self.set_step(7);
                } else {
                    let child = o.fields[self.top_field() as usize].child;
                    self.set_step(5);
                    self.push_child(child)?;
                }
                Ok(Flow::Progress)
            }
            // Child value arrived: run the setter.
            5 => {
                let value = self.pending.take().expect("child value");
                let field = self.top_field();
                if field != FIELD_UNKNOWN {
                    let spec = &o.fields[field as usize];
                    match self.values.last_mut() {
                        Some(Building::Object(target)) => (spec.setter)(target.as_mut(), value),
                        _ => unreachable!("object under construction"),
                    }
                    self.mark_seen(field);
                }
                self.set_step(6);
                Ok(Flow::Progress)
            }
            // Comma or closing brace.
            6 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                match b {
                    b',' => {
                        self.bump(i);
                        self.set_step(8);
                    }
                    b'}' => {
                        self.bump(i);
                        self.finish_object();
                    }
                    _ => return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos)),
                }
                Ok(Flow::Progress)
            }
            // The `null` of an absent optional field.
            7 => match self.scan_literal(chunk, i)? {
                Some(LiteralValue::Null) => {
                    let field = self.top_field();
                    self.mark_seen(field);
                    self.set_step(6);
                    Ok(Flow::Progress)
                }
                Some(_) => unreachable!("null dispatch"),
                None => Ok(Flow::NeedMore),
            },
            // After a comma only a key may follow.
            8 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                if b != b'"' {
                    return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos));
                }
                self.begin_key(i);
                self.set_step(2);
                Ok(Flow::Progress)
            }
            step => unreachable!("object step {step}"),
        }
    }

    fn step_list(&mut self, l: &ListNode, chunk: &[u8], i: &mut usize) -> Result<Flow, ParseError> {
        match self.top_step() {
            0 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                if b != b'[' {
                    return Err(self.wrong_lead(b));
                }
                self.bump(i);
                self.values.push(Building::List((l.new)()));
                self.set_step(1);
                Ok(Flow::Progress)
            }
            1 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                if b == b']' {
                    self.bump(i);
                    self.finish_list();
                } else {
                    self.set_step(2);
                    self.push_child(l.elem)?;
                }
                Ok(Flow::Progress)
            }
            2 => {
                let value = self.pending.take().expect("child value");
                match self.values.last_mut() {
                    Some(Building::List(list)) => (l.push)(list.as_mut(), value),
                    _ => unreachable!("list under construction"),
                }
                self.set_step(3);
                Ok(Flow::Progress)
            }
            3 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                match b {
                    b',' => {
                        self.bump(i);
                        self.set_step(2);
                        self.push_child(l.elem)?;
                    }
                    b']' => {
                        self.bump(i);
                        self.finish_list();
                    }
                    _ => return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos)),
                }
                Ok(Flow::Progress)
            }
            step => unreachable!("list step {step}"),
        }
    }

    fn step_map(&mut self, m: &MapNode, chunk: &[u8], i: &mut usize) -> Result<Flow, ParseError> {
        match self.top_step() {
            0 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                if b != b'{' {
                    return Err(self.wrong_lead(b));
                }
                self.bump(i);
                self.values.push(Building::Map {
                    map: (m.new)(),
                    key: None,
                });
                self.set_step(1);
                Ok(Flow::Progress)
            }
            1 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                match b {
                    b'}' => {
                        self.bump(i);
                        self.finish_map();
                    }
                    b'"' => {
                        self.begin_key(i);
                        self.set_step(2);
                    }
                    _ => return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos)),
                }
                Ok(Flow::Progress)
            }
            2 => {
                if !self.scan_string(chunk, i, None)? {
                    return Ok(Flow::NeedMore);
                }
                let mark = self.frames.last().expect("active frame").mark;
                let key = self.coerce_key(m.key, mark)?;
                match self.values.last_mut() {
                    Some(Building::Map { key: slot, .. }) => *slot = Some(key),
                    _ => unreachable!("map under construction"),
                }
                self.set_step(3);
                Ok(Flow::Progress)
            }
            3 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                if b != b':' {
                    return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos));
                }
                self.bump(i);
                self.set_step(4);
                self.push_child(m.value)?;
                Ok(Flow::Progress)
            }
            4 => {
                let value = self.pending.take().expect("child value");
                let mark = self.frames.last().expect("active frame").mark;
                let replaced = match self.values.last_mut() {
                    Some(Building::Map { map, key }) => {
                        let key = key.take().expect("map key pending");
                        (m.insert)(map.as_mut(), key, value)
                    }
                    _ => unreachable!("map under construction"),
                };
                if replaced && self.opts.strict_duplicates && !m.any {
                    return Err(ParseError::new(ParseErrorKind::DuplicateField, mark));
                }
                self.set_step(5);
                Ok(Flow::Progress)
            }
            5 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                match b {
                    b',' => {
                        self.bump(i);
                        self.set_step(6);
                    }
                    b'}' => {
                        self.bump(i);
                        self.finish_map();
                    }
                    _ => return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos)),
                }
                Ok(Flow::Progress)
            }
            6 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                if b != b'"' {
                    return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos));
                }
                self.begin_key(i);
                self.set_step(2);
                Ok(Flow::Progress)
            }
            step => unreachable!("map step {step}"),
        }
    }

    fn step_dispatch(
        &mut self,
        object: NodeId,
        array: NodeId,
        chunk: &[u8],
        i: &mut usize,
        eof: bool,
    ) -> Result<Flow, ParseError> {
        match self.top_step() {
            0 => {
                let Some(b) = self.skip_ws(chunk, i) else {
                    return Ok(Flow::NeedMore);
                };
                match b {
                    b'{' => {
                        self.frames.last_mut().expect("active frame").field = 0;
                        self.set_step(1);
                        self.push_child(object)?;
                    }
                    b'[' => {
                        self.frames.last_mut().expect("active frame").field = 1;
                        self.set_step(1);
                        self.push_child(array)?;
                    }
                    b'"' => {
                        self.token_start = self.pos;
                        self.bump(i);
                        self.sbuf.clear();
                        self.escape = EscapeState::None;
                        self.set_step(2);
                    }
                    b'-' | b'0'..=b'9' => {
                        self.token_start = self.pos;
                        self.token.clear();
                        self.token.push(b);
                        self.num = Some(NumberScanner::new(b));
                        self.bump(i);
                        self.set_step(3);
                    }
                    b't' | b'f' | b'n' => {
                        self.token_start = self.pos;
                        self.literal = Some(LiteralBuffer::new(b));
                        self.bump(i);
                        self.set_step(4);
                    }
                    _ => return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos)),
                }
                Ok(Flow::Progress)
            }
            1 => {
                let value = self.pending.take().expect("child value");
                let wrapped = if self.top_field() == 0 {
                    let map = value.downcast::<crate::value::Map>().expect("dispatch object map");
                    Value::Object(*map)
                } else {
                    let items = value.downcast::<Vec<Value>>().expect("dispatch array items");
                    Value::Array(*items)
                };
                self.pop_value(Box::new(wrapped));
                Ok(Flow::Progress)
            }
            2 => {
                if self.scan_string(chunk, i, None)? {
                    let text = self.take_string()?;
                    self.pop_value(Box::new(Value::String(text)));
                    Ok(Flow::Progress)
                } else {
                    Ok(Flow::NeedMore)
                }
            }
            3 => {
                if self.scan_number(chunk, i, eof)? {
                    let n = number::convert_f64(&self.token, self.token_start)?;
                    self.pop_value(Box::new(Value::Number(n)));
                    Ok(Flow::Progress)
                } else {
                    Ok(Flow::NeedMore)
                }
            }
            4 => match self.scan_literal(chunk, i)? {
                Some(LiteralValue::True) => {
                    self.pop_value(Box::new(Value::Boolean(true)));
                    Ok(Flow::Progress)
                }
                Some(LiteralValue::False) => {
                    self.pop_value(Box::new(Value::Boolean(false)));
                    Ok(Flow::Progress)
                }
                Some(LiteralValue::Null) => {
                    self.pop_value(Box::new(Value::Null));
                    Ok(Flow::Progress)
                }
                None => Ok(Flow::NeedMore),
            },
            step => unreachable!("dispatch step {step}"),
        }
    }

    // --------------------------------------------------------------------
    // Token scanning
    // --------------------------------------------------------------------

    /// Scan string bytes into the decoded buffer, returning `true` when the
    /// closing quote is consumed. When a trie cursor is supplied, every
    /// decoded byte also steps the key matcher.
    fn scan_string(
        &mut self,
        chunk: &[u8],
        i: &mut usize,
        mut trie: Option<(&KeyTrie, &mut u32)>,
    ) -> Result<bool, ParseError> {
        loop {
            if *i >= chunk.len() {
                return Ok(false);
            }
            match self.escape {
                EscapeState::None => {
                    let b = chunk[*i];
                    match b {
                        b'"' => {
                            self.bump(i);
                            return Ok(true);
                        }
                        b'\\' => {
                            self.bump(i);
                            self.escape = EscapeState::Start;
                        }
                        0x00..=0x1F => {
                            return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos));
                        }
                        _ => {
                            // Bulk-copy the plain run; bytes pass through
                            // verbatim (input is assumed UTF-8).
                            let start = *i;
                            while *i < chunk.len() {
                                let b = chunk[*i];
                                if b == b'"' || b == b'\\' || b < 0x20 {
                                    break;
                                }
                                *i += 1;
                            }
                            let run = &chunk[start..*i];
                            self.pos += run.len();
                            self.sbuf.extend_from_slice(run);
                            if let Some((t, state)) = trie.as_mut() {
                                for &rb in run {
                                    **state = t.step(**state, rb);
                                }
                            }
                        }
                    }
                }
                EscapeState::Start => {
                    let b = chunk[*i];
                    self.bump(i);
                    let decoded = match b {
                        b'"' | b'\\' | b'/' => Some(b),
                        b'b' => Some(0x08),
                        b'f' => Some(0x0C),
                        b'n' => Some(b'\n'),
                        b'r' => Some(b'\r'),
                        b't' => Some(b'\t'),
                        b'u' => None,
                        _ => {
                            return Err(ParseError::new(ParseErrorKind::MalformedEscape, self.pos - 1));
                        }
                    };
                    match decoded {
                        Some(byte) => {
                            self.sbuf.push(byte);
                            if let Some((t, state)) = trie.as_mut() {
                                **state = t.step(**state, byte);
                            }
                            self.escape = EscapeState::None;
                        }
                        None => self.escape = EscapeState::Unicode(UnicodeEscapeBuffer::new()),
                    }
                }
                EscapeState::Unicode(mut buf) => {
                    let b = chunk[*i];
                    self.bump(i);
                    match buf.feed(b).map_err(|k| ParseError::new(k, self.pos - 1))? {
                        None => self.escape = EscapeState::Unicode(buf),
                        Some(unit @ 0xD800..=0xDBFF) => {
                            self.escape = EscapeState::HighBackslash(unit);
                        }
                        Some(0xDC00..=0xDFFF) => {
                            return Err(ParseError::new(ParseErrorKind::MalformedEscape, self.pos - 1));
                        }
                        Some(unit) => {
                            self.push_decoded(char::from_u32(u32::from(unit)).expect("BMP scalar"), &mut trie);
                            self.escape = EscapeState::None;
                        }
                    }
                }
                EscapeState::HighBackslash(hi) => {
                    if chunk[*i] != b'\\' {
                        return Err(ParseError::new(ParseErrorKind::MalformedEscape, self.pos));
                    }
                    self.bump(i);
                    self.escape = EscapeState::HighU(hi);
                }
                EscapeState::HighU(hi) => {
                    if chunk[*i] != b'u' {
                        return Err(ParseError::new(ParseErrorKind::MalformedEscape, self.pos));
                    }
                    self.bump(i);
                    self.escape = EscapeState::Low(hi, UnicodeEscapeBuffer::new());
                }
                EscapeState::Low(hi, mut buf) => {
                    let b = chunk[*i];
                    self.bump(i);
                    match buf.feed(b).map_err(|k| ParseError::new(k, self.pos - 1))? {
                        None => self.escape = EscapeState::Low(hi, buf),
                        Some(lo @ 0xDC00..=0xDFFF) => {
                            let c = 0x10000 + ((u32::from(hi) - 0xD800) << 10) + (u32::from(lo) - 0xDC00);
                            self.push_decoded(char::from_u32(c).expect("supplementary scalar"), &mut trie);
                            self.escape = EscapeState::None;
                        }
                        Some(_) => {
                            return Err(ParseError::new(ParseErrorKind::MalformedEscape, self.pos - 1));
                        }
                    }
                }
            }
        }
    }

    fn push_decoded(&mut self, c: char, trie: &mut Option<(&KeyTrie, &mut u32)>) {
        let mut utf8 = [0u8; 4];
        let bytes = c.encode_utf8(&mut utf8).as_bytes();
        self.sbuf.extend_from_slice(bytes);
        if let Some((t, state)) = trie.as_mut() {
            for &b in bytes {
                **state = t.step(**state, b);
            }
        }
    }

    fn scan_number(&mut self, chunk: &[u8], i: &mut usize, eof: bool) -> Result<bool, ParseError> {
        let mut scanner = self.num.expect("number scanner active");
        while *i < chunk.len() {
            match scanner
                .step(chunk[*i], &mut self.token)
                .map_err(|k| ParseError::new(k, self.pos))?
            {
                NumberStep::Consumed => self.bump(i),
                NumberStep::Terminal => {
                    self.num = None;
                    return Ok(true);
                }
            }
        }
        if eof {
            if scanner.is_terminal() {
                self.num = None;
                return Ok(true);
            }
            return Err(ParseError::new(ParseErrorKind::UnexpectedEndOfInput, self.pos));
        }
        self.num = Some(scanner);
        Ok(false)
    }

    fn scan_literal(&mut self, chunk: &[u8], i: &mut usize) -> Result<Option<LiteralValue>, ParseError> {
        let mut literal = self.literal.expect("literal matcher active");
        while *i < chunk.len() {
            match literal.step(chunk[*i]) {
                Step::NeedMore => self.bump(i),
                Step::Done(v) => {
                    self.bump(i);
                    self.literal = None;
                    return Ok(Some(v));
                }
                Step::Reject => {
                    return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos));
                }
            }
        }
        self.literal = Some(literal);
        Ok(None)
    }

    // --------------------------------------------------------------------
    // Helpers
    // --------------------------------------------------------------------

    fn skip_ws(&mut self, chunk: &[u8], i: &mut usize) -> Option<u8> {
        while *i < chunk.len() {
            match chunk[*i] {
                b' ' | b'\t' | b'\n' | b'\r' => self.bump(i),
                b => return Some(b),
            }
        }
        None
    }

    #[inline]
    fn bump(&mut self, i: &mut usize) {
        *i += 1;
        self.pos += 1;
    }

    fn top_step(&self) -> u8 {
        self.frames.last().expect("active frame").step
    }

    fn set_step(&mut self, step: u8) {
        self.frames.last_mut().expect("active frame").step = step;
    }

    fn top_field(&self) -> u32 {
        self.frames.last().expect("active frame").field
    }

    fn mark_seen(&mut self, field: u32) {
        if (field as usize) < 128 {
            self.frames.last_mut().expect("active frame").seen |= 1u128 << field;
        }
    }

    fn begin_key(&mut self, i: &mut usize) {
        let frame = self.frames.last_mut().expect("active frame");
        frame.mark = self.pos;
        frame.trie_state = KeyTrie::root();
        self.bump(i);
        self.sbuf.clear();
        self.escape = EscapeState::None;
    }

    fn push_child(&mut self, node: NodeId) -> Result<(), ParseError> {
        if self.frames.len() >= self.opts.max_depth {
            return Err(ParseError::new(ParseErrorKind::UnexpectedToken, self.pos));
        }
        self.frames.push(Frame::new(node));
        Ok(())
    }

    fn pop_value(&mut self, value: Box<dyn Any>) {
        self.frames.pop();
        if self.frames.is_empty() {
            self.result = Some(value);
            self.done = true;
        } else {
            self.pending = Some(value);
        }
    }

    fn finish_object(&mut self) {
        match self.values.pop() {
            Some(Building::Object(target)) => self.pop_value(target),
            _ => unreachable!("object under construction"),
        }
    }

    fn finish_list(&mut self) {
        match self.values.pop() {
            Some(Building::List(list)) => self.pop_value(list),
            _ => unreachable!("list under construction"),
        }
    }

    fn finish_map(&mut self) {
        match self.values.pop() {
            Some(Building::Map { map, .. }) => self.pop_value(map),
            _ => unreachable!("map under construction"),
        }
    }

    fn take_string(&mut self) -> Result<String, ParseError> {
        String::from_utf8(std::mem::take(&mut self.sbuf))
            .map_err(|_| ParseError::new(ParseErrorKind::UnexpectedToken, self.token_start))
    }

    fn coerce_key(&mut self, kind: ScalarKind, mark: usize) -> Result<Box<dyn Any>, ParseError> {
        let text = String::from_utf8(std::mem::take(&mut self.sbuf))
            .map_err(|_| ParseError::new(ParseErrorKind::UnexpectedToken, mark))?;

        fn looks_numeric(s: &str) -> bool {
            let digits = s.strip_prefix('-').unwrap_or(s);
            !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        }

        macro_rules! int_key {
            ($ty:ty) => {
                match text.parse::<$ty>() {
                    Ok(v) => Ok(Box::new(v) as Box<dyn Any>),
                    Err(_) if looks_numeric(&text) => {
                        Err(ParseError::new(ParseErrorKind::NumberOutOfRange, mark))
                    }
                    Err(_) => Err(ParseError::new(ParseErrorKind::TypeMismatch, mark)),
                }
            };
        }

        match kind {
            ScalarKind::String => Ok(Box::new(text)),
            ScalarKind::Char => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Box::new(c)),
                    _ => Err(ParseError::new(ParseErrorKind::TypeMismatch, mark)),
                }
            }
            ScalarKind::I8 => int_key!(i8),
            ScalarKind::I16 => int_key!(i16),
            ScalarKind::I32 => int_key!(i32),
            ScalarKind::I64 => int_key!(i64),
            ScalarKind::U8 => int_key!(u8),
            ScalarKind::U16 => int_key!(u16),
            ScalarKind::U32 => int_key!(u32),
            ScalarKind::U64 => int_key!(u64),
            _ => unreachable!("key kind validated at plan build"),
        }
    }

    fn wrong_lead(&self, b: u8) -> ParseError {
        let kind = if matches!(b, b'{' | b'[' | b'"' | b'-' | b'0'..=b'9' | b't' | b'f' | b'n') {
            ParseErrorKind::TypeMismatch
        } else {
            ParseErrorKind::UnexpectedToken
        };
        ParseError::new(kind, self.pos)
    }
}
