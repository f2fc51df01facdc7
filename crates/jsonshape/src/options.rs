/// Configuration fixed at plan-build time.
///
/// Options are baked into the plans a [`Mapper`](crate::Mapper) produces;
/// there are no runtime switches. Two mappers with different options hold
/// independent plan caches.
///
/// # Examples
///
/// ```
/// use jsonshape::{Mapper, PlanOptions};
///
/// let mapper = Mapper::with_options(PlanOptions {
///     strict_duplicates: true,
///     ..Default::default()
/// });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOptions {
    /// Whether the writer emits `null` for absent optional fields.
    ///
    /// When `false`, an absent optional field is omitted from the output
    /// entirely, including its key.
    ///
    /// # Default
    ///
    /// `true`
    pub emit_null_for_absent: bool,

    /// Initial capacity, in bytes, of the growable output buffer used by
    /// `write_bytes` and `write_string`. The buffer doubles as needed.
    ///
    /// # Default
    ///
    /// `1024`
    pub initial_output_capacity: usize,

    /// Chunk size, in bytes, used when reading from a stream.
    ///
    /// # Default
    ///
    /// `4096`
    pub stream_chunk_size: usize,

    /// Whether non-whitespace bytes after the root value fail a one-shot
    /// parse with `UnexpectedToken`.
    ///
    /// Trailing whitespace is always accepted. Stream reads stop at root
    /// completion and never see trailing bytes.
    ///
    /// # Default
    ///
    /// `true`
    pub strict_trailing: bool,

    /// Maximum nesting depth of the parser state stack. Exceeding it fails
    /// with `UnexpectedToken`.
    ///
    /// # Default
    ///
    /// `512`
    pub max_depth: usize,

    /// Whether a repeated object field or map key fails with
    /// `DuplicateField` at the offset of the second key.
    ///
    /// When `false`, the last occurrence wins.
    ///
    /// # Default
    ///
    /// `false`
    pub strict_duplicates: bool,

    /// Whether an object key with no matching field fails with
    /// `UnknownField`.
    ///
    /// When `false`, the unknown key's value is parsed for structural
    /// validity and discarded.
    ///
    /// # Default
    ///
    /// `false`
    pub fail_on_unknown: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            emit_null_for_absent: true,
            initial_output_capacity: 1024,
            stream_chunk_size: 4096,
            strict_trailing: true,
            max_depth: 512,
            strict_duplicates: false,
            fail_on_unknown: false,
        }
    }
}
