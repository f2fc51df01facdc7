//! The mapper facade: plan caches and the convenience codec surface.
//!
//! A [`Mapper`] owns two caches, parser plans and writer plans, each keyed
//! by canonical type key. Lookups go through a read lock; a miss takes the
//! per-cache build lock, re-checks, builds, and publishes, so at most one
//! plan is ever built per key and the hot path never contends after
//! warm-up. Building a plan also builds and caches plans for every object
//! sub-shape it references, so binding layers can look nested types up by
//! signature.

use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, PlanError};
use crate::options::PlanOptions;
use crate::parser::ParserPlan;
use crate::plan::{build_parser_plan, build_writer_plan};
use crate::shape::Shape;
use crate::writer::WriterPlan;

/// Long-lived, thread-safe entry point to the codec.
///
/// Plans are built lazily on first request for a type key and retained for
/// the mapper's lifetime. The mapper itself is cheap to share behind `Arc`.
pub struct Mapper {
    options: PlanOptions,
    parsers: RwLock<HashMap<String, Arc<ParserPlan>>>,
    parser_build: Mutex<()>,
    writers: RwLock<HashMap<String, Arc<WriterPlan>>>,
    writer_build: Mutex<()>,
}

impl Default for Mapper {
    fn default() -> Self {
        Self::new()
    }
}

impl Mapper {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(PlanOptions::default())
    }

    #[must_use]
    pub fn with_options(options: PlanOptions) -> Self {
        Self {
            options,
            parsers: RwLock::new(HashMap::new()),
            parser_build: Mutex::new(()),
            writers: RwLock::new(HashMap::new()),
            writer_build: Mutex::new(()),
        }
    }

    /// The options every plan from this mapper is built with.
    #[must_use]
    pub fn options(&self) -> PlanOptions {
        self.options
    }

    // --------------------------------------------------------------------
    // Plan cache
    // --------------------------------------------------------------------

    /// The parser plan for `shape`, building and caching it on first use.
    ///
    /// Concurrent requests for the same shape observe exactly one build.
    pub fn parser_for(&self, shape: &Shape) -> Result<Arc<ParserPlan>, PlanError> {
        let key = shape.type_key();
        if let Some(plan) = self.parsers.read().expect("parser cache").get(&key) {
            return Ok(Arc::clone(plan));
        }

        let _build = self.parser_build.lock().expect("parser build lock");
        if let Some(plan) = self.parsers.read().expect("parser cache").get(&key) {
            return Ok(Arc::clone(plan));
        }

        let built = build_parser_plan(shape, self.options)?;
        let plan = Arc::new(built.plan);
        self.parsers
            .write()
            .expect("parser cache")
            .insert(key, Arc::clone(&plan));

        // Transitively cache plans for referenced object sub-shapes.
        let mut pending = built.referenced;
        while let Some(sub) = pending.pop() {
            let sub_key = sub.type_key();
            if self.parsers.read().expect("parser cache").contains_key(&sub_key) {
                continue;
            }
            let sub_built = build_parser_plan(&sub, self.options)?;
            self.parsers
                .write()
                .expect("parser cache")
                .insert(sub_key, Arc::new(sub_built.plan));
            pending.extend(sub_built.referenced);
        }

        Ok(plan)
    }

    /// The writer plan for `shape`, building and caching it on first use.
    pub fn writer_for(&self, shape: &Shape) -> Result<Arc<WriterPlan>, PlanError> {
        let key = shape.type_key();
        if let Some(plan) = self.writers.read().expect("writer cache").get(&key) {
            return Ok(Arc::clone(plan));
        }

        let _build = self.writer_build.lock().expect("writer build lock");
        if let Some(plan) = self.writers.read().expect("writer cache").get(&key) {
            return Ok(Arc::clone(plan));
        }

        let built = build_writer_plan(shape, self.options)?;
        let plan = Arc::new(built.plan);
        self.writers
            .write()
            .expect("writer cache")
            .insert(key, Arc::clone(&plan));

        let mut pending = built.referenced;
        while let Some(sub) = pending.pop() {
            let sub_key = sub.type_key();
            if self.writers.read().expect("writer cache").contains_key(&sub_key) {
                continue;
            }
            let sub_built = build_writer_plan(&sub, self.options)?;
            self.writers
                .write()
                .expect("writer cache")
                .insert(sub_key, Arc::new(sub_built.plan));
            pending.extend(sub_built.referenced);
        }

        Ok(plan)
    }

    /// Pre-generate parser plans for every shape, caching them for lookup.
    pub fn parsers_for(&self, shapes: &[Shape]) -> Result<(), PlanError> {
        for shape in shapes {
            self.parser_for(shape)?;
        }
        Ok(())
    }

    /// Pre-generate writer plans for every shape, caching them for lookup.
    pub fn writers_for(&self, shapes: &[Shape]) -> Result<(), PlanError> {
        for shape in shapes {
            self.writer_for(shape)?;
        }
        Ok(())
    }

    /// Lookup-only access for binding layers: `None` means the signature
    /// was never preregistered, so bindings can fail fast.
    #[must_use]
    pub fn get_parser(&self, signature: &str) -> Option<Arc<ParserPlan>> {
        self.parsers.read().expect("parser cache").get(signature).cloned()
    }

    /// Lookup-only counterpart of [`get_parser`](Mapper::get_parser) for
    /// writers.
    #[must_use]
    pub fn get_writer(&self, signature: &str) -> Option<Arc<WriterPlan>> {
        self.writers.read().expect("writer cache").get(signature).cloned()
    }

    // --------------------------------------------------------------------
    // Read surface
    // --------------------------------------------------------------------

    /// Deserialize a complete byte buffer into `T`.
    pub fn read_bytes<T: 'static>(&self, shape: &Shape, bytes: &[u8]) -> Result<T, Error> {
        let plan = self.parser_for(shape)?;
        downcast(plan.parse_bytes(bytes)?)
    }

    /// Deserialize a complete JSON string into `T`.
    pub fn read_str<T: 'static>(&self, shape: &Shape, text: &str) -> Result<T, Error> {
        let plan = self.parser_for(shape)?;
        downcast(plan.parse_str(text)?)
    }

    /// Deserialize `T` from a reader, in chunks of
    /// [`PlanOptions::stream_chunk_size`].
    pub fn read_stream<T: 'static>(&self, shape: &Shape, input: impl io::Read) -> Result<T, Error> {
        let plan = self.parser_for(shape)?;
        downcast(plan.parse_stream(input)?)
    }

    // --------------------------------------------------------------------
    // Write surface
    // --------------------------------------------------------------------

    /// Serialize `value` to a byte buffer. Output is UTF-8.
    pub fn write_bytes<T: 'static>(&self, shape: &Shape, value: &T) -> Result<Vec<u8>, Error> {
        let plan = self.writer_for(shape)?;
        Ok(plan.write_bytes(value)?)
    }

    /// Serialize `value` to a `String`.
    pub fn write_string<T: 'static>(&self, shape: &Shape, value: &T) -> Result<String, Error> {
        let plan = self.writer_for(shape)?;
        Ok(plan.write_string(value)?)
    }

    /// Serialize `value` into a writer through a buffered sink.
    pub fn write_stream<T: 'static>(
        &self,
        shape: &Shape,
        value: &T,
        out: impl io::Write,
    ) -> Result<(), Error> {
        let plan = self.writer_for(shape)?;
        Ok(plan.write_stream(value, out)?)
    }
}

fn downcast<T: 'static>(value: Box<dyn Any>) -> Result<T, Error> {
    value.downcast::<T>().map(|v| *v).map_err(|_| {
        Error::Plan(PlanError(
            "requested type does not match the shape's target type".to_string(),
        ))
    })
}

// ------------------------------------------------------------------------
// Optional process-wide default mapper
// ------------------------------------------------------------------------

static DEFAULT_MAPPER: RwLock<Option<Arc<Mapper>>> = RwLock::new(None);

/// Install `mapper` as the process-wide default, replacing any previous
/// one, and return the shared handle.
pub fn init_default_mapper(mapper: Mapper) -> Arc<Mapper> {
    let mapper = Arc::new(mapper);
    *DEFAULT_MAPPER.write().expect("default mapper") = Some(Arc::clone(&mapper));
    mapper
}

/// The process-wide default mapper, if one was installed.
#[must_use]
pub fn default_mapper() -> Option<Arc<Mapper>> {
    DEFAULT_MAPPER.read().expect("default mapper").clone()
}

/// Drop the process-wide default mapper. Existing handles stay valid.
pub fn teardown_default_mapper() {
    *DEFAULT_MAPPER.write().expect("default mapper") = None;
}
