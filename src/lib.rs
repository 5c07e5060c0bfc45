//! Aggregate Schema Compiler
//!
//! Compiles a declarative description of business aggregates into the
//! resolved model that source emitters consume: four consistent shapes per
//! aggregate, flattened instance keys, relationship edges and a
//! dependency-respecting emission order.
//!
//! ## Features
//!
//! - **Aggregate Graph**: Root, Child, Children-element and Variant aggregates
//!   with Scalar, Child, Children, Variation and Reference members
//! - **Diagnostics**: every schema problem is collected with a stable code;
//!   nothing is emitted while any error remains
//! - **Identity**: reference-based keys flattened transitively, with a
//!   reversible text form for instance keys
//! - **Shapes**: Persistence, SearchCondition, SearchResult and UiInstance
//! - **Deterministic**: the same input always yields the same fingerprint
//!
//! ## Pipeline
//!
//! ```text
//! source (JSON / NodeBuilder)
//!   └── graph::parser ── graph::validate ──> Diagnostics
//!         └── relation (keys, edges)
//!               └── shape (derivation, storage rows)
//!                     └── graph::order ──> CompiledModel
//! ```
//!
//! ```no_run
//! use aggregate_schema::{compile, CompilerConfig, JsonSource, ShapeKind};
//!
//! let source = JsonSource::from_path("schema/sales.schema.json".as_ref())?;
//! let model = compile(&source, &CompilerConfig::load()?)?;
//! for id in model.emission_order() {
//!     println!("{}", model.get_shape(*id, ShapeKind::Persistence));
//! }
//! # Ok::<(), aggregate_schema::CompileError>(())
//! ```

pub mod compiler;
pub mod config;
pub mod error;
pub mod graph;
pub mod relation;
pub mod shape;
pub mod source;
pub mod types;

pub use compiler::{compile, CompiledModel};
pub use config::CompilerConfig;
pub use error::{CompileError, Result};
pub use graph::{AggregateGraph, AggregateId, DiagnosticCode, Diagnostics, MemberId, Severity};
pub use relation::{InstanceKey, KeyError, KeyValue, ShapeInstance, UiIdentity};
pub use shape::{Field, FieldKind, Shape, ShapeKind};
pub use source::{JsonSource, NodeBuilder, RawNode, SchemaSource};
pub use types::{map_primitive_type, MappedType, OutputLanguage, PrimitiveType};
