//! Static shape descriptors and the accessor bindings that attach them to
//! concrete Rust types.
//!
//! A [`Shape`] describes the form of a value — scalars, lists, maps, objects
//! with named fields, or heterogeneous [`Any`](Shape::any) — and carries the
//! closures the compiled plans use to construct, populate, and walk the
//! target type. Shapes are cheap to clone and safe to share across threads.
//!
//! Plans are cached under a [canonical type key](Shape::type_key) derived
//! from the shape tree, so the same shape handed to a mapper twice resolves
//! to the same plan. Object keys are nominal (the captured target type
//! name); declare exactly one shape per target type.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::WriteError;

/// Setter bound at shape-construction time: `(target, value)`.
///
/// The value box holds the field's declared type; the target is the object
/// the enclosing shape constructs.
pub type SetterRef = Arc<dyn Fn(&mut dyn Any, Box<dyn Any>) + Send + Sync>;

/// Getter bound at shape-construction time: `(target) -> value`.
///
/// Returns `None` when an optional field is absent.
pub type GetterRef = Arc<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync>;

pub(crate) type MakeFn = Arc<dyn Fn() -> Box<dyn Any> + Send + Sync>;
pub(crate) type PushFn = Arc<dyn Fn(&mut dyn Any, Box<dyn Any>) + Send + Sync>;
/// Returns `true` when the key was already present.
pub(crate) type InsertFn = Arc<dyn Fn(&mut dyn Any, Box<dyn Any>, Box<dyn Any>) -> bool + Send + Sync>;
pub(crate) type IterFn =
    Arc<dyn Fn(&dyn Any, &mut dyn FnMut(&dyn Any) -> Result<(), WriteError>) -> Result<(), WriteError> + Send + Sync>;
pub(crate) type EntryIterFn = Arc<
    dyn Fn(&dyn Any, &mut dyn FnMut(&dyn Any, &dyn Any) -> Result<(), WriteError>) -> Result<(), WriteError>
        + Send
        + Sync,
>;

/// The scalar kinds a shape can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Char,
    String,
}

impl ScalarKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Char => "char",
            Self::String => "string",
        }
    }

    pub(crate) fn is_integer(self) -> bool {
        matches!(
            self,
            Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::U8 | Self::U16 | Self::U32 | Self::U64
        )
    }

    pub(crate) fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Whether a value of this kind can be coerced from a JSON object key.
    pub(crate) fn is_key_coercible(self) -> bool {
        matches!(self, Self::String | Self::Char) || self.is_integer()
    }
}

/// Container closures for a list-shaped target (e.g. `Vec<T>`).
#[derive(Clone)]
pub struct ListBinding {
    pub(crate) new: MakeFn,
    pub(crate) push: PushFn,
    pub(crate) iter: IterFn,
}

/// Container closures for a map-shaped target (e.g. `HashMap<String, V>`).
#[derive(Clone)]
pub struct MapBinding {
    pub(crate) new: MakeFn,
    pub(crate) insert: InsertFn,
    pub(crate) iter: EntryIterFn,
}

pub(crate) struct ObjectShape {
    pub(crate) type_name: String,
    pub(crate) make: MakeFn,
    pub(crate) fields: Vec<FieldSpec>,
}

pub(crate) enum ShapeNode {
    Scalar(ScalarKind),
    List { elem: Shape, binding: ListBinding },
    Map { key: ScalarKind, value: Shape, binding: MapBinding },
    Object(ObjectShape),
    Any,
    /// Back-reference inside a recursive shape; resolved during plan build.
    Recur(Weak<ShapeNode>),
}

/// A static description of a target data shape.
#[derive(Clone)]
pub struct Shape {
    pub(crate) node: Arc<ShapeNode>,
}

impl Shape {
    fn from_node(node: ShapeNode) -> Self {
        Self { node: Arc::new(node) }
    }

    /// A scalar of the given kind.
    #[must_use]
    pub fn scalar(kind: ScalarKind) -> Self {
        Self::from_node(ShapeNode::Scalar(kind))
    }

    /// Shorthand for `Shape::scalar(ScalarKind::String)`.
    #[must_use]
    pub fn string() -> Self {
        Self::scalar(ScalarKind::String)
    }

    /// Heterogeneous JSON, materialized as a [`Value`](crate::Value).
    #[must_use]
    pub fn any() -> Self {
        Self::from_node(ShapeNode::Any)
    }

    /// A list materialized as `Vec<T>`, where `T` is the Rust type `elem`
    /// produces.
    #[must_use]
    pub fn list_of<T: 'static>(elem: Shape) -> Self {
        let binding = ListBinding {
            new: Arc::new(|| Box::new(Vec::<T>::new())),
            push: Arc::new(|list, value| {
                let list = list.downcast_mut::<Vec<T>>().expect("list target type");
                let value = value.downcast::<T>().expect("list element type");
                list.push(*value);
            }),
            iter: Arc::new(|list, f| {
                let list = list.downcast_ref::<Vec<T>>().expect("list target type");
                for item in list {
                    f(item)?;
                }
                Ok(())
            }),
        };
        Self::from_node(ShapeNode::List { elem, binding })
    }

    /// A string-keyed map materialized as
    /// `std::collections::HashMap<String, V>`.
    #[must_use]
    pub fn map_of<V: 'static>(value: Shape) -> Self {
        Self::map_keyed::<String, V>(ScalarKind::String, value)
    }

    /// A map with a scalar key kind coercible from JSON object keys,
    /// materialized as `std::collections::HashMap<K, V>`.
    ///
    /// `K` must be the Rust type matching `key` (`String` for
    /// `ScalarKind::String`, `i32` for `ScalarKind::I32`, and so on); a
    /// mismatch is a programming error surfaced at parse time. Key kinds
    /// that cannot be read from a string key fail plan building.
    #[must_use]
    pub fn map_keyed<K, V>(key: ScalarKind, value: Shape) -> Self
    where
        K: std::hash::Hash + Eq + 'static,
        V: 'static,
    {
        let binding = MapBinding {
            new: Arc::new(|| Box::new(std::collections::HashMap::<K, V>::new())),
            insert: Arc::new(|map, k, v| {
                let map = map
                    .downcast_mut::<std::collections::HashMap<K, V>>()
                    .expect("map target type");
                let k = k.downcast::<K>().expect("map key type");
                let v = v.downcast::<V>().expect("map value type");
                map.insert(*k, *v).is_some()
            }),
            iter: Arc::new(|map, f| {
                let map = map
                    .downcast_ref::<std::collections::HashMap<K, V>>()
                    .expect("map target type");
                for (k, v) in map {
                    f(k, v)?;
                }
                Ok(())
            }),
        };
        Self::from_node(ShapeNode::Map { key, value, binding })
    }

    /// An object materialized as `T`, populated field by field through each
    /// [`FieldSpec`]'s setter. Fields are written by the writer in the order
    /// given here.
    #[must_use]
    pub fn object<T: Default + 'static>(fields: Vec<FieldSpec>) -> Self {
        Self::from_node(ShapeNode::Object(ObjectShape {
            type_name: std::any::type_name::<T>().to_string(),
            make: Arc::new(|| Box::new(T::default())),
            fields,
        }))
    }

    /// An object whose fields may refer back to the object's own shape,
    /// for self-referential types such as tree nodes.
    ///
    /// The closure receives a handle usable as a field shape; the handle is
    /// only valid inside shapes reachable from the object under
    /// construction.
    #[must_use]
    pub fn object_recursive<T, F>(build: F) -> Self
    where
        T: Default + 'static,
        F: FnOnce(&Shape) -> Vec<FieldSpec>,
    {
        let node = Arc::new_cyclic(|weak: &Weak<ShapeNode>| {
            let self_shape = Shape::from_node(ShapeNode::Recur(weak.clone()));
            ShapeNode::Object(ObjectShape {
                type_name: std::any::type_name::<T>().to_string(),
                make: Arc::new(|| Box::new(T::default())),
                fields: build(&self_shape),
            })
        });
        Self { node }
    }

    /// The canonical cache key for this shape. Equal shape trees produce
    /// equal keys; parametric shapes include every parameter.
    #[must_use]
    pub fn type_key(&self) -> String {
        let mut out = String::new();
        self.write_key(&mut out);
        out
    }

    fn write_key(&self, out: &mut String) {
        match &*self.node {
            ShapeNode::Scalar(kind) => out.push_str(kind.name()),
            ShapeNode::List { elem, .. } => {
                out.push_str("List<");
                elem.write_key(out);
                out.push('>');
            }
            ShapeNode::Map { key, value, .. } => {
                out.push_str("Map<");
                out.push_str(key.name());
                out.push(',');
                value.write_key(out);
                out.push('>');
            }
            ShapeNode::Object(obj) => out.push_str(&obj.type_name),
            ShapeNode::Any => out.push_str("any"),
            ShapeNode::Recur(weak) => {
                let node = weak.upgrade().expect("recursive shape used outside its definition");
                Shape { node }.write_key(out);
            }
        }
    }

    /// Resolve a `Recur` back-reference; other shapes return themselves.
    pub(crate) fn resolved(&self) -> Shape {
        match &*self.node {
            ShapeNode::Recur(weak) => Shape {
                node: weak.upgrade().expect("recursive shape used outside its definition"),
            },
            _ => self.clone(),
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shape").field(&self.type_key()).finish()
    }
}

/// One named field of an object shape.
pub struct FieldSpec {
    pub(crate) name: String,
    pub(crate) shape: Shape,
    pub(crate) setter: SetterRef,
    pub(crate) getter: GetterRef,
    pub(crate) optional: bool,
}

impl FieldSpec {
    /// A required field: the getter always yields a value, and JSON `null`
    /// is a type mismatch.
    pub fn required<T, V>(
        name: &str,
        shape: Shape,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
        get: impl for<'a> Fn(&'a T) -> &'a V + Send + Sync + 'static,
    ) -> Self
    where
        T: 'static,
        V: 'static,
    {
        let setter: SetterRef = Arc::new(move |target: &mut dyn Any, value: Box<dyn Any>| {
            let target = target.downcast_mut::<T>().expect("setter target type");
            let value = value.downcast::<V>().expect("setter value type");
            set(target, *value);
        });
        let getter: GetterRef = Arc::new(move |target: &dyn Any| {
            let target = target.downcast_ref::<T>().expect("getter target type");
            Some(get(target) as &dyn Any)
        });
        Self {
            name: name.to_string(),
            shape,
            setter,
            getter,
            optional: false,
        }
    }

    /// An optional field: JSON `null` (or absence) leaves the target's
    /// default, and a getter returning `None` writes `null` or omits the
    /// field per [`PlanOptions::emit_null_for_absent`](crate::PlanOptions).
    pub fn optional<T, V>(
        name: &str,
        shape: Shape,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
        get: impl for<'a> Fn(&'a T) -> Option<&'a V> + Send + Sync + 'static,
    ) -> Self
    where
        T: 'static,
        V: 'static,
    {
        let setter: SetterRef = Arc::new(move |target: &mut dyn Any, value: Box<dyn Any>| {
            let target = target.downcast_mut::<T>().expect("setter target type");
            let value = value.downcast::<V>().expect("setter value type");
            set(target, *value);
        });
        let getter: GetterRef = Arc::new(move |target: &dyn Any| {
            let target = target.downcast_ref::<T>().expect("getter target type");
            get(target).map(|v| v as &dyn Any)
        });
        Self {
            name: name.to_string(),
            shape,
            setter,
            getter,
            optional: true,
        }
    }
}
