//! Error taxonomy shared by the compilers and the execution backends.

use thiserror::Error;

/// Construction errors: the condition tree cannot be rendered.
///
/// These are raised before any backend round trip. A compiler never answers a
/// malformed condition by dropping the predicate, because that would widen the
/// query instead of narrowing it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// A `list` or `reference` condition arrived without its nested field.
    #[error("condition `{key}` of type {data_type} requires a nested field")]
    MissingNestedField { key: String, data_type: String },

    /// A leaf condition arrived with a nested field.
    #[error("leaf condition `{key}` of type {data_type} must not carry a nested field")]
    UnexpectedNestedField { key: String, data_type: String },

    /// A `reference` condition without `ref_id`.
    #[error("reference condition `{key}` has no ref_id")]
    MissingReference { key: String },

    /// `ref_id` does not resolve to a known entity schema.
    #[error("reference condition `{key}` points at unknown entity `{ref_id}`")]
    UnknownReference { key: String, ref_id: String },

    /// Nested traversal deeper than one relationship hop.
    #[error("condition `{key}` nests a traversal inside a traversal")]
    TraversalTooDeep { key: String },

    /// The operator does not apply to the condition kind.
    #[error("operator `{op}` is not supported for `{key}` ({kind})")]
    UnsupportedOperator { key: String, op: String, kind: String },

    /// The graph compiler has no rendering for this data type.
    #[error("data type `{data_type}` of `{key}` cannot be rendered for the graph backend")]
    UnsupportedDataType { key: String, data_type: String },

    /// The value payload does not fit the data type.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },

    /// Schema lookup had no such field on the entity.
    #[error("entity `{entity_id}` has no field `{key}`")]
    UnknownField { entity_id: String, key: String },

    /// An aggregation was requested without a usable numeric target.
    #[error("aggregation over `{entity_id}` has no numeric target: {reason}")]
    MissingAggregateTarget { entity_id: String, reason: String },

    /// A write was requested without a record identity.
    #[error("upsert into `{entity_id}` requires an identity")]
    MissingIdentity { entity_id: String },
}

/// Errors surfaced by the execution services.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request was rejected before reaching storage.
    #[error("construction failed: {0}")]
    Compile(#[from] CompileError),

    /// The storage client failed; passed through unchanged.
    #[error("execution failed: {0:#}")]
    Execution(#[source] anyhow::Error),

    /// Storage answered with a row that lacks an expected column.
    #[error("execution failed: malformed row: {0}")]
    MalformedRow(String),
}

impl EngineError {
    /// Whether the failure happened before any backend round trip.
    pub fn is_construction(&self) -> bool {
        matches!(self, EngineError::Compile(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
