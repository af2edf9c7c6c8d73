//! Condition-to-query compiler and dual-backend segmentation engine.
//!
//! A tree of [`Field`](condition::Field) conditions is validated into
//! [`Condition`](condition::Condition)s, rendered either as PostgreSQL over a
//! JSON items table or as Cypher over a property graph, executed through the
//! storage traits in [`executor`], and hydrated back into ordered [`Item`]s.

pub mod backend;
pub mod condition;
pub mod config;
pub mod cypher_compiler;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod graph;
pub mod graph_pattern;
pub mod hydrate;
pub mod relational;
pub mod request;
pub mod rows;
pub mod schema;
pub mod sql_compiler;

pub use backend::{Segment, SegmentBackend};
pub use condition::{Condition, Field};
pub use config::{BackendKind, EngineConfig};
pub use engine::{BackendPreferences, ConfiguredPreferences, QueryEngine};
pub use error::{CompileError, EngineError};
pub use graph::GraphBackend;
pub use hydrate::{Item, ItemLoader};
pub use relational::RelationalBackend;
pub use request::{Grouping, Page, SegmentRequest, Sort, SortOrder};
pub use rows::{GroupedCounts, GroupedSums};
