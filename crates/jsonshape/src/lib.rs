//! Shape-directed JSON codec.
//!
//! Given a static [`Shape`] describing a target data structure, `jsonshape`
//! compiles a dedicated parser state machine and a dedicated writer plan for
//! that shape and executes them over byte buffers or byte streams — no
//! reflection or per-value dispatch at steady state. Parsing is pull-style
//! and incremental: a [`ParseSession`] can be fed input in arbitrary chunks
//! and suspends mid-value when a chunk runs out.
//!
//! Plans are cached per canonical type key by the [`Mapper`] facade, which
//! is safe to share across threads and guarantees at most one plan build
//! per key.
//!
//! # Examples
//!
//! ```
//! use jsonshape::{FieldSpec, Mapper, ScalarKind, Shape};
//!
//! #[derive(Default, Debug, PartialEq)]
//! struct Person {
//!     name: String,
//!     age: i32,
//! }
//!
//! let shape = Shape::object::<Person>(vec![
//!     FieldSpec::required(
//!         "name",
//!         Shape::string(),
//!         |p: &mut Person, v| p.name = v,
//!         |p: &Person| &p.name,
//!     ),
//!     FieldSpec::required(
//!         "age",
//!         Shape::scalar(ScalarKind::I32),
//!         |p: &mut Person, v| p.age = v,
//!         |p: &Person| &p.age,
//!     ),
//! ]);
//!
//! let mapper = Mapper::new();
//! let person: Person = mapper.read_str(&shape, r#"{"age":37,"name":"Ada"}"#)?;
//! assert_eq!(person, Person { name: "Ada".into(), age: 37 });
//!
//! // Fields are written in declared order, not input order.
//! let json = mapper.write_string(&shape, &person)?;
//! assert_eq!(json, r#"{"name":"Ada","age":37}"#);
//! # Ok::<(), jsonshape::Error>(())
//! ```

mod error;
mod mapper;
mod options;
mod parser;
mod plan;
mod shape;
mod value;
mod writer;

pub use error::{Error, ParseError, ParseErrorKind, PlanError, WriteError};
pub use mapper::{default_mapper, init_default_mapper, teardown_default_mapper, Mapper};
pub use options::PlanOptions;
pub use parser::{FeedStatus, ParseSession, ParserPlan};
pub use shape::{FieldSpec, GetterRef, ListBinding, MapBinding, ScalarKind, SetterRef, Shape};
pub use value::{Array, Map, Value};
pub use writer::{ByteSink, FixedSink, GrowableSink, StreamSink, WriterPlan};
