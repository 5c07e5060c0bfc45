//! Relationship & Identity Resolver
//!
//! Derived relationships between aggregates, resolved once per graph and
//! stored as explicit adjacency:
//! - Child: owned 1:1, cascade delete
//! - Children: owned 1:N, cascade delete
//! - Variation variant: owned 1:1 (one edge per variant), cascade delete
//! - Reference: non-owned N:1, restrict delete
//!
//! Key flattening lives in [`keys`], the instance-key algebra in
//! [`instance_key`].

pub mod instance_key;
pub mod keys;

pub use instance_key::{
    get_instance_key, get_reference_key, get_ui_identity, set_instance_key, set_reference_key,
    set_ui_identity, InstanceKey, KeyError, KeyValue, ShapeInstance, UiIdentity,
    IDENTITY_DISPLAY_NAME, IDENTITY_KEY,
};
pub use keys::{flatten_key, FlattenError, KeyColumn, KeyOptions, KeyTable};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::graph::{AggregateGraph, AggregateId, MemberId, MemberKind};

// =============================================================================
// Edge Types
// =============================================================================

/// Cardinality and ownership of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    OwnedOne,
    OwnedMany,
    NonOwnedManyToOne,
}

impl Multiplicity {
    pub fn is_owned(&self) -> bool {
        !matches!(self, Self::NonOwnedManyToOne)
    }

    /// Fixed delete policy of the multiplicity
    pub fn cascade(&self) -> CascadePolicy {
        if self.is_owned() {
            CascadePolicy::Cascade
        } else {
            CascadePolicy::Restrict
        }
    }
}

/// What deleting the target does to the owner side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Owned rows are deleted with their owner
    Cascade,
    /// Deleting a referenced row is rejected while references exist
    Restrict,
}

/// A derived relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub owner: AggregateId,
    pub member: MemberId,
    pub target: AggregateId,
    pub multiplicity: Multiplicity,
    pub cascade: CascadePolicy,
    /// Set for variation edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<i64>,
}

impl fmt::Display for RelationshipEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{:?}, {:?}]-> {}",
            self.owner, self.multiplicity, self.cascade, self.target
        )
    }
}

// =============================================================================
// Relationships
// =============================================================================

/// All relationship edges of a graph as adjacency
#[derive(Debug, Clone, Default)]
pub struct Relationships {
    graph: DiGraph<AggregateId, RelationshipEdge>,
}

impl Relationships {
    /// Resolve every relationship of `graph`; unresolved references are skipped
    pub fn build(graph: &AggregateGraph) -> Self {
        let mut adjacency = DiGraph::with_capacity(graph.aggregate_count(), graph.member_count());
        for aggregate in graph.aggregates() {
            adjacency.add_node(aggregate.id);
        }

        let mut add = |owner: AggregateId,
                       member: MemberId,
                       target: AggregateId,
                       multiplicity: Multiplicity,
                       discriminator: Option<i64>| {
            adjacency.add_edge(
                NodeIndex::new(owner.0),
                NodeIndex::new(target.0),
                RelationshipEdge {
                    owner,
                    member,
                    target,
                    multiplicity,
                    cascade: multiplicity.cascade(),
                    discriminator,
                },
            );
        };

        for member in graph.all_members() {
            match &member.kind {
                MemberKind::Child { target } => {
                    add(member.owner, member.id, *target, Multiplicity::OwnedOne, None)
                }
                MemberKind::Children { target } => {
                    add(member.owner, member.id, *target, Multiplicity::OwnedMany, None)
                }
                MemberKind::Variation { variants, .. } => {
                    for (discriminator, target) in variants {
                        add(
                            member.owner,
                            member.id,
                            *target,
                            Multiplicity::OwnedOne,
                            Some(*discriminator),
                        );
                    }
                }
                MemberKind::Reference {
                    target: Some(target),
                    ..
                } => add(
                    member.owner,
                    member.id,
                    *target,
                    Multiplicity::NonOwnedManyToOne,
                    None,
                ),
                _ => {}
            }
        }

        Self { graph: adjacency }
    }

    /// Every edge, in member id order
    pub fn edges(&self) -> impl Iterator<Item = &RelationshipEdge> {
        self.graph.edge_weights()
    }

    /// Edges leaving `aggregate` (its own members)
    pub fn outgoing(&self, aggregate: AggregateId) -> Vec<&RelationshipEdge> {
        self.directed(aggregate, Direction::Outgoing)
    }

    /// Edges arriving at `aggregate` (its owner and its referrers)
    pub fn incoming(&self, aggregate: AggregateId) -> Vec<&RelationshipEdge> {
        self.directed(aggregate, Direction::Incoming)
    }

    /// Aggregates holding a reference to `aggregate`
    pub fn referrers(&self, aggregate: AggregateId) -> Vec<&RelationshipEdge> {
        self.incoming(aggregate)
            .into_iter()
            .filter(|e| !e.multiplicity.is_owned())
            .collect()
    }

    /// Edge created by one member (the first, for variations)
    pub fn edge_of(&self, member: MemberId) -> Option<&RelationshipEdge> {
        self.edges().find(|e| e.member == member)
    }

    pub fn len(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.edge_count() == 0
    }

    fn directed(&self, aggregate: AggregateId, direction: Direction) -> Vec<&RelationshipEdge> {
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(NodeIndex::new(aggregate.0), direction)
            .map(|e| (e.id(), e.weight()))
            .collect();
        // petgraph walks adjacency lists newest first
        edges.sort_by_key(|(id, _)| *id);
        edges.into_iter().map(|(_, e)| e).collect()
    }
}
