//! Aggregate Graph
//!
//! The in-memory tree of aggregates and members built by the parser.
//! Aggregates and members live in two arenas indexed by [`AggregateId`] and
//! [`MemberId`]; an aggregate's id is its pre-order declaration index, so
//! "declaration order" is simply id order.
//!
//! The graph is immutable once parsing returns. Everything derived from it
//! (keys, relationships, shapes, emission order) is computed from a shared
//! reference.

pub mod diagnostics;
pub mod member;
pub mod order;
pub mod parser;
pub mod validate;

pub use diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics, Severity};
pub use member::{Member, MemberKind};
pub use order::{emission_order, key_reference_cycles, reference_components};
pub use parser::{parse, parse_with};
pub use validate::{validate, ValidationOptions};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::source::SourceLocation;

// =============================================================================
// Identifiers
// =============================================================================

/// Index of an aggregate in the graph (equals its declaration index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(pub usize);

/// Index of a member in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub usize);

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// Which model family a root aggregate belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootModel {
    Data,
    Query,
    Command,
}

impl RootModel {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "data-aggregate" => Some(Self::Data),
            "query-aggregate" => Some(Self::Query),
            "command-aggregate" => Some(Self::Command),
            _ => None,
        }
    }
}

/// Position of an aggregate in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateKind {
    Root { model: RootModel },
    Child,
    ChildrenElement,
    Variant { discriminator: i64 },
}

impl AggregateKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Root { .. } => "root",
            Self::Child => "child",
            Self::ChildrenElement => "children",
            Self::Variant { .. } => "variant",
        }
    }

    /// Root and Children-element aggregates have an identity of their own
    pub fn has_own_identity(&self) -> bool {
        matches!(self, Self::Root { .. } | Self::ChildrenElement)
    }
}

/// The member through which an aggregate is owned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub aggregate: AggregateId,
    pub member: MemberId,
}

/// A named entity node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub id: AggregateId,
    /// Physical name
    pub name: String,
    pub display_name: String,
    pub kind: AggregateKind,
    /// `None` only for roots
    pub owner: Option<Owner>,
    /// Members in declaration order
    pub members: Vec<MemberId>,
    /// Physical names from the root, `/`-separated (`Order/Lines`)
    pub path: String,
    pub location: SourceLocation,
}

impl Aggregate {
    pub fn is_root(&self) -> bool {
        matches!(self.kind, AggregateKind::Root { .. })
    }
}

/// An enum type definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    /// Value names with their integer codes, in declaration order
    pub values: Vec<(String, i64)>,
    pub location: SourceLocation,
}

impl EnumDef {
    pub fn value_names(&self) -> Vec<String> {
        self.values.iter().map(|(name, _)| name.clone()).collect()
    }
}

// =============================================================================
// Aggregate Graph
// =============================================================================

/// The parsed schema: aggregates, members and enums
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredGraph")]
pub struct AggregateGraph {
    aggregates: Vec<Aggregate>,
    members: Vec<Member>,
    enums: Vec<EnumDef>,
    roots: Vec<AggregateId>,
    #[serde(skip)]
    by_path: HashMap<String, AggregateId>,
}

/// Serialized form; the path index is rebuilt on load
#[derive(Deserialize)]
struct StoredGraph {
    aggregates: Vec<Aggregate>,
    members: Vec<Member>,
    enums: Vec<EnumDef>,
    roots: Vec<AggregateId>,
}

impl From<StoredGraph> for AggregateGraph {
    fn from(stored: StoredGraph) -> Self {
        let mut by_path = HashMap::with_capacity(stored.aggregates.len());
        for aggregate in &stored.aggregates {
            by_path.entry(aggregate.path.clone()).or_insert(aggregate.id);
        }
        Self {
            aggregates: stored.aggregates,
            members: stored.members,
            enums: stored.enums,
            roots: stored.roots,
            by_path,
        }
    }
}

impl AggregateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Construction (parser only) ---

    /// Append an aggregate; its id is the next declaration index
    pub(crate) fn push_aggregate(
        &mut self,
        name: String,
        display_name: String,
        kind: AggregateKind,
        path: String,
        location: SourceLocation,
    ) -> AggregateId {
        let id = AggregateId(self.aggregates.len());
        if matches!(kind, AggregateKind::Root { .. }) {
            self.roots.push(id);
        }
        // first declaration wins a duplicate path; validation reports the duplicate
        self.by_path.entry(path.clone()).or_insert(id);
        self.aggregates.push(Aggregate {
            id,
            name,
            display_name,
            kind,
            owner: None,
            members: Vec::new(),
            path,
            location,
        });
        id
    }

    pub(crate) fn push_member(
        &mut self,
        owner: AggregateId,
        name: String,
        display_name: String,
        kind: MemberKind,
        location: SourceLocation,
    ) -> MemberId {
        let id = MemberId(self.members.len());
        for nested in kind_nested(&kind) {
            self.aggregates[nested.0].owner = Some(Owner {
                aggregate: owner,
                member: id,
            });
        }
        self.members.push(Member {
            id,
            owner,
            name,
            display_name,
            kind,
            location,
        });
        self.aggregates[owner.0].members.push(id);
        id
    }

    pub(crate) fn member_mut(&mut self, id: MemberId) -> &mut Member {
        &mut self.members[id.0]
    }

    pub(crate) fn push_enum(&mut self, def: EnumDef) {
        self.enums.push(def);
    }

    // --- Lookup ---

    pub fn aggregate(&self, id: AggregateId) -> &Aggregate {
        &self.aggregates[id.0]
    }

    pub fn member(&self, id: MemberId) -> &Member {
        &self.members[id.0]
    }

    /// All aggregates in declaration order
    pub fn aggregates(&self) -> &[Aggregate] {
        &self.aggregates
    }

    pub fn all_members(&self) -> &[Member] {
        &self.members
    }

    /// Root aggregates in declaration order
    pub fn roots(&self) -> impl Iterator<Item = &Aggregate> {
        self.roots.iter().map(move |id| self.aggregate(*id))
    }

    pub fn enums(&self) -> &[EnumDef] {
        &self.enums
    }

    /// Enum definition by name (first declaration)
    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Aggregate by `/`-separated physical path
    pub fn find(&self, path: &str) -> Option<AggregateId> {
        self.by_path.get(path.trim_matches('/')).copied()
    }

    /// Members of an aggregate in declaration order
    pub fn members_of(&self, id: AggregateId) -> impl Iterator<Item = &Member> {
        self.aggregate(id).members.iter().map(move |m| self.member(*m))
    }

    /// The aggregate's display-name member, if one is marked
    pub fn name_member(&self, id: AggregateId) -> Option<&Member> {
        self.members_of(id).find(|m| m.is_name())
    }

    pub fn aggregate_count(&self) -> usize {
        self.aggregates.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    // --- Navigation ---

    /// Owning aggregate (`None` for roots)
    pub fn owner(&self, id: AggregateId) -> Option<AggregateId> {
        self.aggregate(id).owner.map(|o| o.aggregate)
    }

    /// Ancestors from the direct owner up to the root
    pub fn ancestors(&self, id: AggregateId) -> Vec<AggregateId> {
        let mut result = Vec::new();
        let mut current = self.owner(id);
        while let Some(owner) = current {
            result.push(owner);
            current = self.owner(owner);
        }
        result
    }

    /// The root that (transitively) owns this aggregate, or itself
    pub fn root_of(&self, id: AggregateId) -> AggregateId {
        self.ancestors(id).last().copied().unwrap_or(id)
    }

    /// Nested aggregates, depth-first in declaration order (excluding `id`)
    pub fn descendants(&self, id: AggregateId) -> Vec<AggregateId> {
        let mut result = Vec::new();
        let mut stack: Vec<AggregateId> = self.nested_of(id).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            result.push(next);
            stack.extend(self.nested_of(next).into_iter().rev());
        }
        result
    }

    /// Directly nested aggregates
    pub fn nested_of(&self, id: AggregateId) -> Vec<AggregateId> {
        self.members_of(id)
            .flat_map(|m| m.nested_aggregates())
            .collect()
    }

    /// Every known aggregate path, in declaration order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.aggregates.iter().map(|a| a.path.as_str())
    }

    // --- Export ---

    /// Export ownership and reference edges to GraphViz DOT format
    pub fn to_dot(&self) -> String {
        let mut output = String::new();

        output.push_str("digraph AggregateGraph {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str(
            "  node [shape=box, style=\"filled,rounded\", fontname=\"Helvetica\", fontsize=10];\n",
        );
        output.push_str("  edge [fontname=\"Helvetica\", fontsize=8];\n");
        output.push('\n');

        let color_map = [
            ("root", "#00BCD4"),
            ("child", "#FF9800"),
            ("children", "#4CAF50"),
            ("variant", "#9C27B0"),
        ];

        for aggregate in &self.aggregates {
            let color = color_map
                .iter()
                .find(|(kind, _)| *kind == aggregate.kind.label())
                .map(|(_, color)| *color)
                .unwrap_or("#9E9E9E");
            output.push_str(&format!(
                "  \"{}\" [label=\"{}\\n({})\", fillcolor=\"{}\"];\n",
                aggregate.path,
                aggregate.display_name,
                aggregate.kind.label(),
                color
            ));
        }

        output.push('\n');

        for member in &self.members {
            let from = &self.aggregate(member.owner).path;
            match &member.kind {
                MemberKind::Child { target } | MemberKind::Children { target } => {
                    output.push_str(&format!(
                        "  \"{}\" -> \"{}\" [label=\"{}\", style=bold];\n",
                        from,
                        self.aggregate(*target).path,
                        member.name
                    ));
                }
                MemberKind::Variation { variants, .. } => {
                    for (discriminator, target) in variants {
                        output.push_str(&format!(
                            "  \"{}\" -> \"{}\" [label=\"{}={}\", style=bold];\n",
                            from,
                            self.aggregate(*target).path,
                            member.name,
                            discriminator
                        ));
                    }
                }
                MemberKind::Reference {
                    target: Some(target),
                    is_key,
                    ..
                } => {
                    let style = if *is_key { "solid" } else { "dashed" };
                    output.push_str(&format!(
                        "  \"{}\" -> \"{}\" [label=\"{}\", style={}];\n",
                        from,
                        self.aggregate(*target).path,
                        member.name,
                        style
                    ));
                }
                _ => {}
            }
        }

        output.push_str("}\n");
        output
    }
}

fn kind_nested(kind: &MemberKind) -> Vec<AggregateId> {
    match kind {
        MemberKind::Child { target } | MemberKind::Children { target } => vec![*target],
        MemberKind::Variation { variants, .. } => variants.values().copied().collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::NodeBuilder;

    fn order_graph() -> AggregateGraph {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("OrderId", "int").key())
                    .child(
                        NodeBuilder::new("Lines", "children")
                            .child(NodeBuilder::new("LineNo", "int").key())
                            .child(
                                NodeBuilder::new("Note", "child")
                                    .child(NodeBuilder::new("Text", "string")),
                            ),
                    ),
            )
            .build();
        let (graph, diagnostics) = parse(&doc);
        assert!(!diagnostics.has_errors(), "{}", diagnostics);
        graph
    }

    #[test]
    fn test_navigation() {
        let graph = order_graph();
        let order = graph.find("Order").unwrap();
        let lines = graph.find("Order/Lines").unwrap();
        let note = graph.find("Order/Lines/Note").unwrap();

        assert_eq!(graph.owner(lines), Some(order));
        assert_eq!(graph.ancestors(note), vec![lines, order]);
        assert_eq!(graph.root_of(note), order);
        assert_eq!(graph.descendants(order), vec![lines, note]);
        assert!(order < lines && lines < note);
    }

    #[test]
    fn test_deserialized_graph_finds_paths() {
        let graph = order_graph();
        let text = serde_json::to_string(&graph).unwrap();
        let restored: AggregateGraph = serde_json::from_str(&text).unwrap();

        assert_eq!(restored, graph);
        assert_eq!(restored.find("Order/Lines/Note"), graph.find("Order/Lines/Note"));
        assert!(restored.find("Order/Lines/Note").is_some());
    }

    #[test]
    fn test_to_dot() {
        let graph = order_graph();
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph AggregateGraph {"));
        assert!(dot.contains("\"Order\" -> \"Order/Lines\""));
    }
}
