//! Key Flattening
//!
//! `flatten_key(aggregate)` lists the primitive columns that identify one
//! instance of an aggregate:
//! 1. owned aggregates first borrow their owner's flattened key
//! 2. a scalar key member contributes itself
//! 3. a reference key member contributes the target's flattened key, each
//!    column renamed `<reference>_<leaf>`

use serde::{Deserialize, Serialize};

use crate::graph::{AggregateGraph, AggregateId, MemberId, MemberKind};
use crate::types::PrimitiveType;

/// One column of a flattened key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyColumn {
    pub name: String,
    pub primitive: PrimitiveType,
    /// The scalar member the value ultimately comes from
    pub origin: MemberId,
    /// Reference members walked to reach `origin`, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub via: Vec<MemberId>,
    /// Borrowed from the owner
    pub inherited: bool,
}

/// Flattening parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOptions {
    pub max_depth: usize,
    pub separator: String,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            max_depth: 32,
            separator: "_".to_string(),
        }
    }
}

/// Why a key could not be flattened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlattenError {
    /// Aggregates on the cycle, in walk order
    Cycle(Vec<AggregateId>),
    /// The chain walked before the depth bound was hit
    TooDeep(Vec<AggregateId>),
}

/// Flatten the key of `aggregate`.
///
/// Unresolved reference keys are skipped; validation reports them.
pub fn flatten_key(
    graph: &AggregateGraph,
    aggregate: AggregateId,
    options: &KeyOptions,
) -> Result<Vec<KeyColumn>, FlattenError> {
    let mut visiting = Vec::new();
    flatten(graph, aggregate, options, &mut visiting)
}

fn flatten(
    graph: &AggregateGraph,
    aggregate: AggregateId,
    options: &KeyOptions,
    visiting: &mut Vec<AggregateId>,
) -> Result<Vec<KeyColumn>, FlattenError> {
    if let Some(pos) = visiting.iter().position(|a| *a == aggregate) {
        return Err(FlattenError::Cycle(visiting[pos..].to_vec()));
    }
    if visiting.len() > options.max_depth {
        return Err(FlattenError::TooDeep(visiting.clone()));
    }
    visiting.push(aggregate);

    let mut columns = Vec::new();

    if let Some(owner) = graph.owner(aggregate) {
        for column in flatten(graph, owner, options, visiting)? {
            columns.push(KeyColumn {
                inherited: true,
                ..column
            });
        }
    }

    for member in graph.members_of(aggregate) {
        match &member.kind {
            MemberKind::Scalar {
                primitive,
                is_key: true,
                ..
            } => columns.push(KeyColumn {
                name: member.name.clone(),
                primitive: primitive.clone(),
                origin: member.id,
                via: Vec::new(),
                inherited: false,
            }),
            MemberKind::Reference {
                target: Some(target),
                is_key: true,
                ..
            } => {
                for column in flatten(graph, *target, options, visiting)? {
                    let mut via = Vec::with_capacity(column.via.len() + 1);
                    via.push(member.id);
                    via.extend(column.via);
                    columns.push(KeyColumn {
                        name: format!("{}{}{}", member.name, options.separator, column.name),
                        primitive: column.primitive,
                        origin: column.origin,
                        via,
                        inherited: false,
                    });
                }
            }
            _ => {}
        }
    }

    visiting.pop();
    Ok(columns)
}

/// Flattened keys of every aggregate, computed once
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyTable {
    keys: Vec<Vec<KeyColumn>>,
}

impl KeyTable {
    /// Flatten every aggregate of a validated graph.
    ///
    /// # Panics
    ///
    /// If a key cannot be flattened. Validation rejects such graphs, so
    /// reaching this is a bug in the compiler.
    pub fn build(graph: &AggregateGraph, options: &KeyOptions) -> Self {
        let keys = graph
            .aggregates()
            .iter()
            .map(|aggregate| match flatten_key(graph, aggregate.id, options) {
                Ok(columns) => columns,
                Err(e) => panic!(
                    "key of validated aggregate '{}' failed to flatten: {:?}",
                    aggregate.path, e
                ),
            })
            .collect();
        Self { keys }
    }

    pub fn get(&self, aggregate: AggregateId) -> &[KeyColumn] {
        &self.keys[aggregate.0]
    }

    /// Primitive types of the flattened key
    pub fn primitives(&self, aggregate: AggregateId) -> Vec<PrimitiveType> {
        self.get(aggregate).iter().map(|c| c.primitive.clone()).collect()
    }

    /// Slot of a scalar key member declared on `aggregate` itself
    pub fn scalar_slot(&self, aggregate: AggregateId, member: MemberId) -> Option<usize> {
        self.get(aggregate)
            .iter()
            .position(|c| !c.inherited && c.via.is_empty() && c.origin == member)
    }

    /// Slot of the `nth` column contributed by a key reference member
    pub fn reference_slot(
        &self,
        aggregate: AggregateId,
        member: MemberId,
        nth: usize,
    ) -> Option<usize> {
        self.get(aggregate)
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.inherited && c.via.first() == Some(&member))
            .nth(nth)
            .map(|(slot, _)| slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::parse;
    use crate::source::NodeBuilder;

    fn names(columns: &[KeyColumn]) -> Vec<&str> {
        columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_children_borrow_owner_key() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("OrderId", "int").key())
                    .child(
                        NodeBuilder::new("Lines", "children")
                            .child(NodeBuilder::new("LineNo", "int").key()),
                    ),
            )
            .build();
        let (graph, _) = parse(&doc);
        let lines = graph.find("Order/Lines").unwrap();

        let key = flatten_key(&graph, lines, &KeyOptions::default()).unwrap();
        assert_eq!(names(&key), vec!["OrderId", "LineNo"]);
        assert!(key[0].inherited);
        assert!(!key[1].inherited);
    }

    #[test]
    fn test_reference_key_is_prefixed_transitively() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Country", "data-aggregate")
                    .child(NodeBuilder::new("Code", "word").key()),
            )
            .child(
                NodeBuilder::new("Region", "data-aggregate")
                    .child(NodeBuilder::new("Country", "ref-to:Country").key())
                    .child(NodeBuilder::new("RegionNo", "int").key()),
            )
            .child(
                NodeBuilder::new("Office", "data-aggregate")
                    .child(NodeBuilder::new("Region", "ref-to:Region").key())
                    .child(NodeBuilder::new("Seq", "int").key()),
            )
            .build();
        let (graph, diagnostics) = parse(&doc);
        assert!(!diagnostics.has_errors(), "{}", diagnostics);

        let table = KeyTable::build(&graph, &KeyOptions::default());
        let office = graph.find("Office").unwrap();
        assert_eq!(
            names(table.get(office)),
            vec!["Region_Country_Code", "Region_RegionNo", "Seq"]
        );
        assert_eq!(
            table.primitives(office),
            vec![PrimitiveType::String, PrimitiveType::Int, PrimitiveType::Int]
        );
        assert_eq!(table.get(office)[0].via.len(), 2);

        let region_member = graph.members_of(office).next().unwrap().id;
        assert_eq!(table.reference_slot(office, region_member, 1), Some(1));
        assert_eq!(table.reference_slot(office, region_member, 2), None);
    }

    #[test]
    fn test_cycle_detected() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("A", "data-aggregate")
                    .child(NodeBuilder::new("B", "ref-to:B").key()),
            )
            .child(
                NodeBuilder::new("B", "data-aggregate")
                    .child(NodeBuilder::new("A", "ref-to:A").key()),
            )
            .build();
        let (graph, _) = parse(&doc);
        let a = graph.find("A").unwrap();
        let b = graph.find("B").unwrap();

        assert_eq!(
            flatten_key(&graph, a, &KeyOptions::default()),
            Err(FlattenError::Cycle(vec![a, b]))
        );
    }
}
