//! Validation Engine
//!
//! Structural rules over a completed graph. Every rule runs over the whole
//! graph and reports every violation it finds.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use super::diagnostics::{DiagnosticCode, Diagnostics};
use super::order::key_reference_cycles;
use super::{AggregateGraph, AggregateId, AggregateKind, MemberKind};
use crate::relation::keys::{flatten_key, FlattenError, KeyOptions};
use crate::source::SourceLocation;

/// Bounds used while validating
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Maximum depth of a key reference chain
    pub max_key_depth: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self { max_key_depth: 32 }
    }
}

/// Run every rule and collect the diagnostics
#[tracing::instrument(skip_all)]
pub fn validate(graph: &AggregateGraph, options: &ValidationOptions) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();

    check_duplicate_names(graph, &mut diagnostics);
    check_references(graph, &mut diagnostics);
    check_keys(graph, &mut diagnostics);
    check_variations(graph, &mut diagnostics);
    check_key_chains(graph, options, &mut diagnostics);
    check_unused_enums(graph, &mut diagnostics);

    debug!(
        errors = diagnostics.error_count(),
        warnings = diagnostics.warning_count(),
        "validation finished"
    );
    diagnostics
}

// =============================================================================
// Rules
// =============================================================================

/// No two names in one scope: the document (roots and enums), an
/// aggregate's members, a variation's variants, an enum's values
fn check_duplicate_names(graph: &AggregateGraph, diagnostics: &mut Diagnostics) {
    let document = graph
        .roots()
        .map(|a| (a.name.as_str(), &a.location))
        .chain(graph.enums().iter().map(|e| (e.name.as_str(), &e.location)));
    report_duplicates("", "document", document, diagnostics);

    for aggregate in graph.aggregates() {
        let members = graph
            .members_of(aggregate.id)
            .map(|m| (m.name.as_str(), &m.location));
        report_duplicates(&aggregate.path, &aggregate.path, members, diagnostics);

        for member in graph.members_of(aggregate.id) {
            if let MemberKind::Variation { variants, .. } = &member.kind {
                let scope = format!("{}/{}", aggregate.path, member.name);
                let names = variants.values().map(|v| {
                    let variant = graph.aggregate(*v);
                    (variant.name.as_str(), &variant.location)
                });
                report_duplicates(&aggregate.path, &scope, names, diagnostics);
            }
        }
    }

    for def in graph.enums() {
        let values = def.values.iter().map(|(name, _)| (name.as_str(), &def.location));
        report_duplicates(&def.name, &def.name, values, diagnostics);
    }
}

fn report_duplicates<'a>(
    path: &str,
    scope: &str,
    names: impl Iterator<Item = (&'a str, &'a SourceLocation)>,
    diagnostics: &mut Diagnostics,
) {
    let mut seen = HashSet::new();
    for (name, location) in names {
        if !seen.insert(name) {
            diagnostics.report(
                path.to_string(),
                DiagnosticCode::DuplicateName,
                location,
                format!("Duplicate name '{}' in {}", name, scope),
            );
        }
    }
}

/// Every reference resolves, and only to something with its own identity
fn check_references(graph: &AggregateGraph, diagnostics: &mut Diagnostics) {
    let matcher = SkimMatcherV2::default();
    let candidates: Vec<&str> = graph
        .aggregates()
        .iter()
        .filter(|a| a.kind.has_own_identity())
        .map(|a| a.path.as_str())
        .collect();

    for member in graph.all_members() {
        let MemberKind::Reference { target, path, .. } = &member.kind else {
            continue;
        };
        let owner_path = &graph.aggregate(member.owner).path;

        match target {
            None => {
                let suggestion = candidates
                    .iter()
                    .filter_map(|c| matcher.fuzzy_match(c, path).map(|score| (score, *c)))
                    .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
                    .map(|(_, c)| c);
                diagnostics.dangling_reference(
                    owner_path.clone(),
                    &member.location,
                    path,
                    suggestion,
                );
            }
            Some(target) => {
                let target = graph.aggregate(*target);
                if !target.kind.has_own_identity() {
                    diagnostics.report(
                        owner_path.clone(),
                        DiagnosticCode::InvalidReferenceTarget,
                        &member.location,
                        format!(
                            "Reference '{}' targets {} aggregate '{}'; only roots and children elements can be referenced",
                            member.name,
                            target.kind.label(),
                            target.path
                        ),
                    );
                }
            }
        }
    }
}

/// Roots and children elements declare a key; keys on one-to-one owned
/// aggregates are only appended to the borrowed parent key
fn check_keys(graph: &AggregateGraph, diagnostics: &mut Diagnostics) {
    for aggregate in graph.aggregates() {
        let has_key = graph.members_of(aggregate.id).any(|m| m.is_key());
        match aggregate.kind {
            AggregateKind::Root { .. } | AggregateKind::ChildrenElement if !has_key => {
                diagnostics.report(
                    aggregate.path.clone(),
                    DiagnosticCode::MissingKey,
                    &aggregate.location,
                    format!("Aggregate '{}' declares no key member", aggregate.path),
                );
            }
            AggregateKind::Child | AggregateKind::Variant { .. } if has_key => {
                diagnostics.report(
                    aggregate.path.clone(),
                    DiagnosticCode::KeyOnOwnedOneToOne,
                    &aggregate.location,
                    format!(
                        "Key declared on {} aggregate '{}' is appended to its owner's key",
                        aggregate.kind.label(),
                        aggregate.path
                    ),
                );
            }
            _ => {}
        }
    }
}

fn check_variations(graph: &AggregateGraph, diagnostics: &mut Diagnostics) {
    for member in graph.all_members() {
        if let MemberKind::Variation { variants, .. } = &member.kind {
            if variants.is_empty() {
                diagnostics.report(
                    graph.aggregate(member.owner).path.clone(),
                    DiagnosticCode::EmptyVariantSet,
                    &member.location,
                    format!("Variation '{}' has no variants", member.name),
                );
            }
        }
    }
}

/// Key flattening must terminate within the depth bound and without cycles.
///
/// Cycles are found twice: by flattening (which also sees cycles through
/// ownership) and by the orderer over key references. Each distinct cycle
/// is reported once, at its first-declared aggregate.
fn check_key_chains(
    graph: &AggregateGraph,
    options: &ValidationOptions,
    diagnostics: &mut Diagnostics,
) {
    let key_options = KeyOptions {
        max_depth: options.max_key_depth,
        ..KeyOptions::default()
    };
    let mut reported: HashSet<BTreeSet<AggregateId>> = HashSet::new();
    let mut cycles: Vec<Vec<AggregateId>> = Vec::new();

    for aggregate in graph.aggregates() {
        match flatten_key(graph, aggregate.id, &key_options) {
            Ok(_) => {}
            Err(FlattenError::Cycle(cycle)) => cycles.push(cycle),
            Err(FlattenError::TooDeep(chain)) => {
                diagnostics.push(
                    super::DiagnosticItem::new(
                        aggregate.path.clone(),
                        DiagnosticCode::KeyChainTooDeep,
                        format!(
                            "Key reference chain exceeds the maximum depth of {}",
                            options.max_key_depth
                        ),
                    )
                    .at(&aggregate.location)
                    .with_context(format!("Chain starts: {}", describe(graph, &chain, 5))),
                );
            }
        }
    }
    cycles.extend(key_reference_cycles(graph));

    for cycle in cycles {
        let members: BTreeSet<AggregateId> = cycle.iter().copied().collect();
        if !reported.insert(members.clone()) {
            continue;
        }
        let Some(first) = members.iter().next().copied() else {
            continue;
        };
        let anchor = graph.aggregate(first);
        let names: Vec<String> = cycle
            .iter()
            .chain(cycle.first())
            .map(|id| graph.aggregate(*id).path.clone())
            .collect();
        diagnostics.cyclic_key_reference(anchor.path.clone(), &anchor.location, &names);
    }
}

fn describe(graph: &AggregateGraph, chain: &[AggregateId], limit: usize) -> String {
    let mut parts: Vec<&str> = chain
        .iter()
        .take(limit)
        .map(|id| graph.aggregate(*id).path.as_str())
        .collect();
    if chain.len() > limit {
        parts.push("...");
    }
    parts.join(" -> ")
}

fn check_unused_enums(graph: &AggregateGraph, diagnostics: &mut Diagnostics) {
    let used: HashSet<&str> = graph
        .all_members()
        .iter()
        .filter_map(|m| match m.primitive() {
            Some(crate::types::PrimitiveType::Enum(name)) => Some(name.as_str()),
            _ => None,
        })
        .collect();

    for def in graph.enums() {
        if !used.contains(def.name.as_str()) {
            diagnostics.report(
                def.name.clone(),
                DiagnosticCode::UnusedEnum,
                &def.location,
                format!("Enum '{}' is never used", def.name),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{parse, parse_with, DiagnosticCode, ValidationOptions};
    use crate::source::NodeBuilder;

    fn codes(diagnostics: &crate::graph::Diagnostics) -> Vec<DiagnosticCode> {
        diagnostics.all().iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_collects_every_violation() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("Memo", "string"))
                    .child(NodeBuilder::new("Memo", "string"))
                    .child(NodeBuilder::new("Customer", "ref-to:Custmer"))
                    .child(NodeBuilder::new("Kind", "variation")),
            )
            .child(
                NodeBuilder::new("Customer", "data-aggregate")
                    .child(NodeBuilder::new("CustomerId", "int").key()),
            )
            .build();

        let (_, diagnostics) = parse(&doc);
        let codes = codes(&diagnostics);
        assert!(codes.contains(&DiagnosticCode::MissingKey));
        assert!(codes.contains(&DiagnosticCode::DuplicateName));
        assert!(codes.contains(&DiagnosticCode::DanglingReference));
        assert!(codes.contains(&DiagnosticCode::EmptyVariantSet));
    }

    #[test]
    fn test_dangling_reference_suggests_path() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("OrderId", "int").key())
                    .child(
                        NodeBuilder::new("Lines", "children")
                            .child(NodeBuilder::new("LineNo", "int").key()),
                    ),
            )
            .child(
                NodeBuilder::new("Shipment", "data-aggregate")
                    .child(NodeBuilder::new("ShipmentId", "int").key())
                    .child(NodeBuilder::new("Line", "ref-to:Order/Line")),
            )
            .build();

        let (_, diagnostics) = parse(&doc);
        let dangling = diagnostics
            .with_code(DiagnosticCode::DanglingReference)
            .next()
            .unwrap();
        assert_eq!(dangling.path, "Shipment");
        assert!(dangling.context[0].contains("Order/Lines"));
    }

    #[test]
    fn test_reference_to_child_rejected() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("OrderId", "int").key())
                    .child(
                        NodeBuilder::new("Address", "child")
                            .child(NodeBuilder::new("City", "string")),
                    ),
            )
            .child(
                NodeBuilder::new("Visit", "data-aggregate")
                    .child(NodeBuilder::new("VisitId", "int").key())
                    .child(NodeBuilder::new("Place", "ref-to:Order/Address")),
            )
            .build();

        let (_, diagnostics) = parse(&doc);
        assert_eq!(
            diagnostics
                .with_code(DiagnosticCode::InvalidReferenceTarget)
                .count(),
            1
        );
    }

    #[test]
    fn test_cyclic_key_reference_reported_once() {
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

        let (_, diagnostics) = parse(&doc);
        let cycles: Vec<_> = diagnostics
            .with_code(DiagnosticCode::CyclicKeyReference)
            .collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].path, "A");
    }

    #[test]
    fn test_mutual_non_key_references_are_legal() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("A", "data-aggregate")
                    .child(NodeBuilder::new("AId", "int").key())
                    .child(NodeBuilder::new("Partner", "ref-to:B")),
            )
            .child(
                NodeBuilder::new("B", "data-aggregate")
                    .child(NodeBuilder::new("BId", "int").key())
                    .child(NodeBuilder::new("Partner", "ref-to:A")),
            )
            .build();

        let (_, diagnostics) = parse(&doc);
        assert!(diagnostics.is_empty(), "{}", diagnostics);
    }

    #[test]
    fn test_key_chain_depth_bound() {
        // A0 <- A1 <- A2 <- A3, each keyed by a reference to the previous one
        let mut doc = NodeBuilder::document().child(
            NodeBuilder::new("A0", "data-aggregate").child(NodeBuilder::new("Id", "int").key()),
        );
        for i in 1..4 {
            doc = doc.child(
                NodeBuilder::new(format!("A{}", i), "data-aggregate")
                    .child(NodeBuilder::new("Prev", format!("ref-to:A{}", i - 1)).key()),
            );
        }
        let doc = doc.build();

        let (_, diagnostics) = parse(&doc);
        assert!(!diagnostics.has_errors());

        let (_, diagnostics) = parse_with(&doc, &ValidationOptions { max_key_depth: 2 });
        let deep: Vec<_> = diagnostics
            .with_code(DiagnosticCode::KeyChainTooDeep)
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(deep, vec!["A3"]);
    }

    #[test]
    fn test_warnings() {
        let doc = NodeBuilder::document()
            .child(NodeBuilder::new("Color", "enum").child(NodeBuilder::new("Red", "enum-value")))
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("OrderId", "int").key())
                    .child(
                        NodeBuilder::new("Address", "child")
                            .child(NodeBuilder::new("Seq", "int").key()),
                    ),
            )
            .build();

        let (_, diagnostics) = parse(&doc);
        assert!(!diagnostics.has_errors());
        let warnings: Vec<_> = diagnostics.warnings().map(|d| d.code).collect();
        assert_eq!(
            warnings,
            vec![DiagnosticCode::KeyOnOwnedOneToOne, DiagnosticCode::UnusedEnum]
        );
    }
}
