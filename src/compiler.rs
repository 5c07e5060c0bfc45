//! Compiled Model
//!
//! The output contract consumed by emitters. [`compile`] runs the whole
//! pipeline once (parse, validate, flatten keys, resolve relationships,
//! derive every shape, order aggregates) and either returns an immutable
//! [`CompiledModel`] or refuses with the collected diagnostics.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::CompilerConfig;
use crate::error::{CompileError, Result};
use crate::graph::{self, AggregateGraph, AggregateId, Diagnostics, Member};
use crate::relation::{KeyColumn, KeyTable, Relationships};
use crate::shape::{Shape, ShapeEngine, ShapeKind, StorageRow};
use crate::source::SchemaSource;
use crate::types::{self, MappedType, OutputLanguage, PrimitiveType};

/// A fully resolved schema, ready for emission
#[derive(Debug, Clone)]
pub struct CompiledModel {
    graph: AggregateGraph,
    keys: KeyTable,
    relationships: Relationships,
    shapes: BTreeMap<(AggregateId, ShapeKind), Shape>,
    order: Vec<AggregateId>,
    storage: Vec<StorageRow>,
    diagnostics: Diagnostics,
    config: CompilerConfig,
}

/// Compile a schema source.
///
/// Returns [`CompileError::Rejected`] carrying every diagnostic when any
/// error was found (or any warning, with `warnings_as_errors`). On success
/// the model keeps the remaining warnings.
#[tracing::instrument(skip_all, fields(origin = %source.origin()))]
pub fn compile<S: SchemaSource + ?Sized>(
    source: &S,
    config: &CompilerConfig,
) -> Result<CompiledModel> {
    let (graph, mut diagnostics) = graph::parse_with(source, &config.validation_options());

    if config.diagnostics.warnings_as_errors {
        diagnostics.promote_warnings();
    }
    diagnostics.sort();

    if diagnostics.has_errors() {
        warn!(
            errors = diagnostics.error_count(),
            warnings = diagnostics.warning_count(),
            "schema rejected"
        );
        return Err(CompileError::Rejected(diagnostics));
    }

    let keys = KeyTable::build(&graph, &config.key_options());
    let relationships = Relationships::build(&graph);

    let shape_options = config.shape_options();
    let engine = ShapeEngine::new(&graph, &keys, &shape_options);
    let mut shapes = BTreeMap::new();
    for aggregate in graph.aggregates() {
        for kind in ShapeKind::ALL {
            shapes.insert((aggregate.id, kind), engine.derive(aggregate.id, kind));
        }
    }

    let order = graph::emission_order(&graph);

    let storage = graph
        .aggregates()
        .iter()
        .map(|aggregate| {
            StorageRow::from_persistence(
                &graph,
                &keys,
                &shapes[&(aggregate.id, ShapeKind::Persistence)],
                &shape_options.separator,
            )
        })
        .collect();

    info!(
        aggregates = graph.aggregate_count(),
        shapes = shapes.len(),
        relationships = relationships.len(),
        warnings = diagnostics.warning_count(),
        "schema compiled"
    );

    Ok(CompiledModel {
        graph,
        keys,
        relationships,
        shapes,
        order,
        storage,
        diagnostics,
        config: config.clone(),
    })
}

/// Canonical form hashed by [`CompiledModel::fingerprint`]
#[derive(Serialize)]
struct FingerprintInput<'a> {
    shapes: Vec<&'a Shape>,
    order: Vec<&'a str>,
}

impl CompiledModel {
    // --- Shapes ---

    /// The derived shape of an aggregate.
    ///
    /// # Panics
    ///
    /// If `aggregate` does not belong to this model.
    pub fn get_shape(&self, aggregate: AggregateId, kind: ShapeKind) -> &Shape {
        match self.shapes.get(&(aggregate, kind)) {
            Some(shape) => shape,
            None => panic!("no {} shape for aggregate {:?}", kind, aggregate),
        }
    }

    /// Shape lookup by aggregate path (`Order/Lines`)
    pub fn shape_by_path(&self, path: &str, kind: ShapeKind) -> Option<&Shape> {
        let aggregate = self.graph.find(path)?;
        self.shapes.get(&(aggregate, kind))
    }

    /// Every shape, ordered by aggregate then kind
    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.shapes.values()
    }

    /// Caller-facing view of a shape (Child shapes inlined)
    pub fn caller_view(&self, aggregate: AggregateId, kind: ShapeKind) -> Shape {
        self.get_shape(aggregate, kind)
            .caller_view(&self.config.naming.separator)
    }

    // --- Ordering ---

    /// Aggregates in emission order: dependencies first
    pub fn emission_order(&self) -> &[AggregateId] {
        &self.order
    }

    pub fn emission_order_paths(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|id| self.graph.aggregate(*id).path.as_str())
            .collect()
    }

    // --- Types ---

    /// Map a primitive to an output language, resolving enum value names
    pub fn map_primitive_type(
        &self,
        primitive: &PrimitiveType,
        language: OutputLanguage,
    ) -> MappedType {
        let values = match primitive {
            PrimitiveType::Enum(name) => self
                .graph
                .enum_def(name)
                .map(|e| e.value_names())
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        types::map_primitive_type(primitive, language, &values)
    }

    // --- Identity & relationships ---

    /// Flattened key of an aggregate
    pub fn flatten_key(&self, aggregate: AggregateId) -> &[KeyColumn] {
        self.keys.get(aggregate)
    }

    pub fn keys(&self) -> &KeyTable {
        &self.keys
    }

    pub fn relationships(&self) -> &Relationships {
        &self.relationships
    }

    pub fn storage_rows(&self) -> &[StorageRow] {
        &self.storage
    }

    pub fn storage_row(&self, aggregate: AggregateId) -> Option<&StorageRow> {
        self.storage.iter().find(|row| row.aggregate == aggregate)
    }

    // --- Model ---

    pub fn graph(&self) -> &AggregateGraph {
        &self.graph
    }

    /// Member of an aggregate by physical name
    pub fn member(&self, aggregate: AggregateId, name: &str) -> Option<&Member> {
        self.graph.members_of(aggregate).find(|m| m.name == name)
    }

    /// Warnings that did not block compilation
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// SHA-256 over the canonical JSON of all shapes and the emission order.
    ///
    /// Compiling the same source twice yields the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let input = FingerprintInput {
            shapes: self.shapes.values().collect(),
            order: self.emission_order_paths(),
        };
        let canonical = serde_json::to_string(&input).unwrap_or_default();
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DiagnosticCode;
    use crate::source::NodeBuilder;

    fn sales() -> crate::source::RawNode {
        NodeBuilder::document()
            .child(
                NodeBuilder::new("Status", "enum")
                    .child(NodeBuilder::new("Open", "enum-value"))
                    .child(NodeBuilder::new("Closed", "enum-value")),
            )
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("OrderId", "int").key())
                    .child(NodeBuilder::new("State", "Status"))
                    .child(
                        NodeBuilder::new("Lines", "children")
                            .child(NodeBuilder::new("LineNo", "int").key())
                            .child(NodeBuilder::new("Product", "ref-to:Product")),
                    ),
            )
            .child(
                NodeBuilder::new("Product", "data-aggregate")
                    .child(NodeBuilder::new("ProductId", "int").key()),
            )
            .build()
    }

    #[test]
    fn test_compile_sales() {
        let model = compile(&sales(), &CompilerConfig::default()).unwrap();
        assert_eq!(
            model.emission_order_paths(),
            vec!["Product", "Order/Lines", "Order"]
        );
        assert_eq!(model.shapes().count(), 3 * ShapeKind::ALL.len());
        assert_eq!(model.storage_rows().len(), 3);

        let lines = model.graph().find("Order/Lines").unwrap();
        let names: Vec<_> = model.flatten_key(lines).iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["OrderId", "LineNo"]);
        assert!(model.member(lines, "Product").is_some());
    }

    #[test]
    fn test_rejected_schema_carries_diagnostics() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("Memo", "word")),
            )
            .build();
        let err = compile(&doc, &CompilerConfig::default()).unwrap_err();
        let diagnostics = err.diagnostics().unwrap();
        assert_eq!(diagnostics.with_code(DiagnosticCode::MissingKey).count(), 1);
    }

    #[test]
    fn test_warnings_as_errors() {
        let doc = NodeBuilder::document()
            .child(NodeBuilder::new("Unused", "enum").child(NodeBuilder::new("A", "enum-value")))
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("Id", "int").key()),
            )
            .build();

        let model = compile(&doc, &CompilerConfig::default()).unwrap();
        assert_eq!(model.diagnostics().warning_count(), 1);

        let mut strict = CompilerConfig::default();
        strict.diagnostics.warnings_as_errors = true;
        assert!(matches!(compile(&doc, &strict), Err(CompileError::Rejected(_))));
    }

    #[test]
    fn test_map_enum_type() {
        let model = compile(&sales(), &CompilerConfig::default()).unwrap();
        let status = PrimitiveType::Enum("Status".to_string());

        let ts = model.map_primitive_type(&status, OutputLanguage::TypeScript);
        assert_eq!(ts.type_name, "'Open' | 'Closed'");
        let cs = model.map_primitive_type(&status, OutputLanguage::CSharp);
        assert_eq!(cs.render(true), "Status?");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = compile(&sales(), &CompilerConfig::default()).unwrap();
        let b = compile(&sales(), &CompilerConfig::default()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut renamed = CompilerConfig::default();
        renamed.naming.separator = "__".to_string();
        let c = compile(&sales(), &renamed).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
