//! The codec plan builder.
//!
//! Both builders walk a [`Shape`] and materialize an arena of plan nodes.
//! A memo keyed by canonical type key registers each node *before* its
//! children are built, so shapes that refer back to themselves find the
//! in-progress node and wire a back-edge instead of recursing forever.
//! Parser and writer plans are built independently; each build reports the
//! object sub-shapes it referenced so the mapper can cache standalone plans
//! for them as well.

use std::collections::HashMap;

use crate::error::PlanError;
use crate::options::PlanOptions;
use crate::parser::{FieldNode, KeyTrie, ListNode, MapNode, ObjectNode, ParserNode, ParserPlan};
use crate::shape::{ScalarKind, Shape, ShapeNode};
use crate::value::{Map as ValueMap, Value};
use crate::writer::{WriteField, WriteNode, WriterPlan};

pub(crate) struct BuiltPlan<P> {
    pub(crate) plan: P,
    /// Object sub-shapes referenced by the plan, root excluded.
    pub(crate) referenced: Vec<Shape>,
}

pub(crate) fn build_parser_plan(
    shape: &Shape,
    options: PlanOptions,
) -> Result<BuiltPlan<ParserPlan>, PlanError> {
    let key = shape.type_key();
    let mut builder = ParserBuilder {
        nodes: Vec::new(),
        memo: HashMap::new(),
        referenced: Vec::new(),
        options,
    };
    let root = builder.node_for(shape)?;
    builder.referenced.retain(|s| s.type_key() != key);
    log::trace!("built parser plan for {key}");
    Ok(BuiltPlan {
        plan: ParserPlan {
            nodes: builder.nodes,
            root,
            options,
            key,
        },
        referenced: builder.referenced,
    })
}

pub(crate) fn build_writer_plan(
    shape: &Shape,
    options: PlanOptions,
) -> Result<BuiltPlan<WriterPlan>, PlanError> {
    let key = shape.type_key();
    let mut builder = WriterBuilder {
        nodes: Vec::new(),
        memo: HashMap::new(),
        referenced: Vec::new(),
    };
    let root = builder.node_for(shape)?;
    builder.referenced.retain(|s| s.type_key() != key);
    log::trace!("built writer plan for {key}");
    Ok(BuiltPlan {
        plan: WriterPlan {
            nodes: builder.nodes,
            root,
            options,
            key,
        },
        referenced: builder.referenced,
    })
}

fn check_key_kind(kind: ScalarKind) -> Result<(), PlanError> {
    if kind.is_key_coercible() {
        Ok(())
    } else {
        Err(PlanError(format!(
            "map key kind {} cannot be coerced from a string key",
            kind.name()
        )))
    }
}

struct ParserBuilder {
    nodes: Vec<ParserNode>,
    memo: HashMap<String, usize>,
    referenced: Vec<Shape>,
    options: PlanOptions,
}

impl ParserBuilder {
    /// Reserve a node id and register it in the memo before descending, so
    /// cyclic shapes resolve to the reserved id.
    fn reserve(&mut self, key: String) -> usize {
        let id = self.nodes.len();
        self.nodes.push(ParserNode::Dispatch { object: 0, array: 0 });
        self.memo.insert(key, id);
        id
    }

    fn node_for(&mut self, shape: &Shape) -> Result<usize, PlanError> {
        let shape = shape.resolved();
        let key = shape.type_key();
        if let Some(&id) = self.memo.get(&key) {
            return Ok(id);
        }

        match &*shape.node {
            ShapeNode::Scalar(kind) => {
                let id = self.nodes.len();
                self.nodes.push(ParserNode::Scalar(*kind));
                self.memo.insert(key, id);
                Ok(id)
            }
            ShapeNode::List { elem, binding } => {
                let id = self.reserve(key);
                let child = self.node_for(elem)?;
                self.nodes[id] = ParserNode::List(ListNode {
                    new: binding.new.clone(),
                    push: binding.push.clone(),
                    elem: child,
                });
                Ok(id)
            }
            ShapeNode::Map { key: key_kind, value, binding } => {
                check_key_kind(*key_kind)?;
                let id = self.reserve(key);
                let child = self.node_for(value)?;
                self.nodes[id] = ParserNode::Map(MapNode {
                    new: binding.new.clone(),
                    insert: binding.insert.clone(),
                    key: *key_kind,
                    value: child,
                    any: false,
                });
                Ok(id)
            }
            ShapeNode::Object(obj) => {
                if self.options.strict_duplicates && obj.fields.len() > 128 {
                    return Err(PlanError(format!(
                        "{} has {} fields; strict duplicate tracking supports at most 128",
                        obj.type_name,
                        obj.fields.len()
                    )));
                }
                self.referenced.push(shape.clone());
                let id = self.reserve(key);
                let discard = self.any_dispatch()?;
                let mut fields = Vec::with_capacity(obj.fields.len());
                for field in &obj.fields {
                    let child = self.node_for(&field.shape)?;
                    fields.push(FieldNode {
                        setter: field.setter.clone(),
                        child,
                        optional: field.optional,
                    });
                }
                let trie = KeyTrie::build(obj.fields.iter().map(|f| f.name.as_str()));
                self.nodes[id] = ParserNode::Object(ObjectNode {
                    make: obj.make.clone(),
                    fields,
                    trie,
                    discard,
                });
                Ok(id)
            }
            ShapeNode::Any => self.any_dispatch(),
            ShapeNode::Recur(_) => unreachable!("resolved above"),
        }
    }

    /// The dispatch triple for heterogeneous values: a dispatch node whose
    /// object and array children feed [`Value`] containers and loop back
    /// into the dispatch.
    fn any_dispatch(&mut self) -> Result<usize, PlanError> {
        if let Some(&id) = self.memo.get("any") {
            return Ok(id);
        }
        let dispatch = self.reserve("any".to_string());

        let object = self.nodes.len();
        self.nodes.push(ParserNode::Map(MapNode {
            new: std::sync::Arc::new(|| Box::new(ValueMap::new())),
            insert: std::sync::Arc::new(|map, key, value| {
                let map = map.downcast_mut::<ValueMap>().expect("value map target");
                let key = key.downcast::<String>().expect("value map key");
                let value = value.downcast::<Value>().expect("value map value");
                map.insert(*key, *value).is_some()
            }),
            key: ScalarKind::String,
            value: dispatch,
            any: true,
        }));

        let array = self.nodes.len();
        self.nodes.push(ParserNode::List(ListNode {
            new: std::sync::Arc::new(|| Box::new(Vec::<Value>::new())),
            push: std::sync::Arc::new(|list, value| {
                let list = list.downcast_mut::<Vec<Value>>().expect("value list target");
                let value = value.downcast::<Value>().expect("value list item");
                list.push(*value);
            }),
            elem: dispatch,
        }));

        self.nodes[dispatch] = ParserNode::Dispatch { object, array };
        Ok(dispatch)
    }
}

struct WriterBuilder {
    nodes: Vec<WriteNode>,
    memo: HashMap<String, usize>,
    referenced: Vec<Shape>,
}

impl WriterBuilder {
    fn reserve(&mut self, key: String) -> usize {
        let id = self.nodes.len();
        self.nodes.push(WriteNode::Any);
        self.memo.insert(key, id);
        id
    }

    fn node_for(&mut self, shape: &Shape) -> Result<usize, PlanError> {
        let shape = shape.resolved();
        let key = shape.type_key();
        if let Some(&id) = self.memo.get(&key) {
            return Ok(id);
        }

        match &*shape.node {
            ShapeNode::Scalar(kind) => {
                let id = self.nodes.len();
                self.nodes.push(WriteNode::Scalar(*kind));
                self.memo.insert(key, id);
                Ok(id)
            }
            ShapeNode::List { elem, binding } => {
                let id = self.reserve(key);
                let child = self.node_for(elem)?;
                self.nodes[id] = WriteNode::List {
                    iter: binding.iter.clone(),
                    elem: child,
                };
                Ok(id)
            }
            ShapeNode::Map { key: key_kind, value, binding } => {
                check_key_kind(*key_kind)?;
                let id = self.reserve(key);
                let child = self.node_for(value)?;
                self.nodes[id] = WriteNode::Map {
                    key: *key_kind,
                    iter: binding.iter.clone(),
                    value: child,
                };
                Ok(id)
            }
            ShapeNode::Object(obj) => {
                self.referenced.push(shape.clone());
                let id = self.reserve(key);
                let mut fields = Vec::with_capacity(obj.fields.len());
                for field in &obj.fields {
                    let child = self.node_for(&field.shape)?;
                    fields.push(WriteField {
                        key_literal: key_literal(&field.name),
                        getter: field.getter.clone(),
                        child,
                    });
                }
                self.nodes[id] = WriteNode::Object { fields };
                Ok(id)
            }
            ShapeNode::Any => {
                let id = self.nodes.len();
                self.nodes.push(WriteNode::Any);
                self.memo.insert(key, id);
                Ok(id)
            }
            ShapeNode::Recur(_) => unreachable!("resolved above"),
        }
    }
}

/// Pre-escape an object key into its `"name":` literal bytes.
fn key_literal(name: &str) -> Vec<u8> {
    let mut sink = crate::writer::GrowableSink::with_capacity(name.len() + 3);
    crate::writer::write_json_string(name, &mut sink).expect("growable sink cannot fail");
    let mut bytes = sink.into_bytes();
    bytes.push(b':');
    bytes
}
