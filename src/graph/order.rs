//! Dependency Orderer
//!
//! Emission order is a topological sort of reference edges, pointing from
//! the referenced aggregate to the one that references it. Ownership is a
//! preference only: an owner waits for its nested aggregates while anything
//! else is ready, but never ahead of a reference target.
//!
//! Reference cycles are legal. They collapse into one strongly connected
//! component and are broken by declaration order, so the result is stable.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use super::{AggregateGraph, AggregateId, MemberKind};

/// Reference edges; node indices equal aggregate ids
fn reference_graph(graph: &AggregateGraph) -> DiGraph<AggregateId, bool> {
    let mut deps = DiGraph::with_capacity(graph.aggregate_count(), graph.member_count());
    for aggregate in graph.aggregates() {
        deps.add_node(aggregate.id);
    }

    for member in graph.all_members() {
        if let MemberKind::Reference {
            target: Some(target),
            is_key,
            ..
        } = &member.kind
        {
            deps.add_edge(
                NodeIndex::new(target.0),
                NodeIndex::new(member.owner.0),
                *is_key,
            );
        }
    }

    deps
}

/// Aggregates grouped by reference cycle.
///
/// Every aggregate appears in exactly one group; groups of one are
/// aggregates outside any cycle.
pub fn reference_components(graph: &AggregateGraph) -> Vec<Vec<AggregateId>> {
    let deps = reference_graph(graph);
    let mut components: Vec<Vec<AggregateId>> = kosaraju_scc(&deps)
        .into_iter()
        .map(|scc| {
            let mut ids: Vec<AggregateId> = scc.iter().map(|n| deps[*n]).collect();
            ids.sort();
            ids
        })
        .collect();
    components.sort();
    components
}

/// Topological emission order of every aggregate.
///
/// Ready components are released smallest-declaration-index first, except
/// that a component still waiting on one of its nested aggregates yields to
/// any component that is not. Inside a reference cycle, nested aggregates
/// precede their owners and ties fall back to declaration order.
#[tracing::instrument(skip_all)]
pub fn emission_order(graph: &AggregateGraph) -> Vec<AggregateId> {
    let deps = reference_graph(graph);
    let sccs = kosaraju_scc(&deps);

    let mut scc_of = vec![0usize; deps.node_count()];
    for (i, scc) in sccs.iter().enumerate() {
        for node in scc {
            scc_of[node.index()] = i;
        }
    }

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); sccs.len()];
    let mut in_degree = vec![0usize; sccs.len()];
    for edge in deps.edge_references() {
        let from = scc_of[edge.source().index()];
        let to = scc_of[edge.target().index()];
        if from != to && successors[from].insert(to) {
            in_degree[to] += 1;
        }
    }

    // nested aggregates in other components not yet emitted
    let mut pending_nested = vec![0usize; sccs.len()];
    for aggregate in graph.aggregates() {
        if let Some(owner) = &aggregate.owner {
            let (nested, owner) = (scc_of[aggregate.id.0], scc_of[owner.aggregate.0]);
            if nested != owner {
                pending_nested[owner] += 1;
            }
        }
    }

    let first_declared: Vec<usize> = sccs
        .iter()
        .map(|scc| scc.iter().map(|n| n.index()).min().unwrap_or(usize::MAX))
        .collect();

    // an owner can sit in both heaps; `emitted` drops the stale entry
    let mut free: BinaryHeap<Reverse<(usize, usize)>> = BinaryHeap::new();
    let mut waiting: BinaryHeap<Reverse<(usize, usize)>> = BinaryHeap::new();
    for scc in (0..sccs.len()).filter(|s| in_degree[*s] == 0) {
        let entry = Reverse((first_declared[scc], scc));
        if pending_nested[scc] == 0 {
            free.push(entry);
        } else {
            waiting.push(entry);
        }
    }

    let mut emitted = vec![false; sccs.len()];
    let mut order = Vec::with_capacity(deps.node_count());
    while let Some(Reverse((_, scc))) = free.pop().or_else(|| waiting.pop()) {
        if emitted[scc] {
            continue;
        }
        emitted[scc] = true;
        order.extend(order_component(graph, &sccs[scc]));

        for node in &sccs[scc] {
            let Some(owner) = &graph.aggregate(deps[*node]).owner else {
                continue;
            };
            let owner = scc_of[owner.aggregate.0];
            if owner == scc {
                continue;
            }
            pending_nested[owner] -= 1;
            if pending_nested[owner] == 0 && in_degree[owner] == 0 && !emitted[owner] {
                free.push(Reverse((first_declared[owner], owner)));
            }
        }

        for next in &successors[scc] {
            in_degree[*next] -= 1;
            if in_degree[*next] == 0 {
                let entry = Reverse((first_declared[*next], *next));
                if pending_nested[*next] == 0 {
                    free.push(entry);
                } else {
                    waiting.push(entry);
                }
            }
        }
    }

    order
}

/// Order inside one reference cycle: nested before owner, then declaration
fn order_component(graph: &AggregateGraph, component: &[NodeIndex]) -> Vec<AggregateId> {
    let mut ids: Vec<AggregateId> = component.iter().map(|n| AggregateId(n.index())).collect();
    if ids.len() == 1 {
        return ids;
    }
    ids.sort();

    let owner_in_component = |id: AggregateId| {
        graph
            .aggregate(id)
            .owner
            .as_ref()
            .map(|o| o.aggregate)
            .filter(|o| ids.contains(o))
    };

    let mut pending: std::collections::HashMap<AggregateId, usize> =
        ids.iter().map(|id| (*id, 0)).collect();
    for id in &ids {
        if let Some(owner) = owner_in_component(*id) {
            *pending.entry(owner).or_default() += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<AggregateId>> = ids
        .iter()
        .filter(|id| pending[*id] == 0)
        .map(|id| Reverse(*id))
        .collect();
    let mut order = Vec::with_capacity(ids.len());
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        if let Some(owner) = owner_in_component(id) {
            if let Some(count) = pending.get_mut(&owner) {
                *count -= 1;
                if *count == 0 {
                    ready.push(Reverse(owner));
                }
            }
        }
    }
    order
}

/// Cycles made only of key references (including a key reference to self).
///
/// Each cycle is returned with its aggregates in declaration order.
pub fn key_reference_cycles(graph: &AggregateGraph) -> Vec<Vec<AggregateId>> {
    let deps = reference_graph(graph);
    let key_only = deps.filter_map(|_, id| Some(*id), |_, key| key.then_some(()));

    let mut cycles: Vec<Vec<AggregateId>> = kosaraju_scc(&key_only)
        .into_iter()
        .filter(|scc| scc.len() > 1 || key_only.find_edge(scc[0], scc[0]).is_some())
        .map(|scc| {
            let mut ids: Vec<AggregateId> = scc.iter().map(|n| key_only[*n]).collect();
            ids.sort();
            ids
        })
        .collect();
    cycles.sort();
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::parse;
    use crate::source::NodeBuilder;

    fn paths(graph: &AggregateGraph, order: &[AggregateId]) -> Vec<String> {
        order.iter().map(|id| graph.aggregate(*id).path.clone()).collect()
    }

    #[test]
    fn test_reference_target_and_nested_come_first() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("OrderId", "int").key())
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
            .build();

        let (graph, diagnostics) = parse(&doc);
        assert!(!diagnostics.has_errors());
        assert_eq!(
            paths(&graph, &emission_order(&graph)),
            vec!["Product", "Order/Lines", "Order"]
        );
    }

    #[test]
    fn test_reference_cycle_is_stable_by_declaration() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("B", "data-aggregate")
                    .child(NodeBuilder::new("BId", "int").key())
                    .child(NodeBuilder::new("Other", "ref-to:A")),
            )
            .child(
                NodeBuilder::new("A", "data-aggregate")
                    .child(NodeBuilder::new("AId", "int").key())
                    .child(NodeBuilder::new("Other", "ref-to:B")),
            )
            .child(
                NodeBuilder::new("C", "data-aggregate")
                    .child(NodeBuilder::new("CId", "int").key())
                    .child(NodeBuilder::new("A", "ref-to:A")),
            )
            .build();

        let (graph, _) = parse(&doc);
        assert_eq!(paths(&graph, &emission_order(&graph)), vec!["B", "A", "C"]);
        assert!(key_reference_cycles(&graph).is_empty());
    }

    #[test]
    fn test_nested_reference_to_own_root() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("OrderId", "int").key())
                    .child(
                        NodeBuilder::new("Lines", "children")
                            .child(NodeBuilder::new("LineNo", "int").key())
                            .child(NodeBuilder::new("Replaces", "ref-to:Order")),
                    ),
            )
            .build();

        let (graph, diagnostics) = parse(&doc);
        assert!(!diagnostics.has_errors());
        assert_eq!(
            paths(&graph, &emission_order(&graph)),
            vec!["Order", "Order/Lines"]
        );
        assert_eq!(reference_components(&graph).len(), 2);
    }

    #[test]
    fn test_owner_waits_only_for_free_nested() {
        // Lines needs Customer, which needs Order; Order cannot wait for Lines
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("OrderId", "int").key())
                    .child(
                        NodeBuilder::new("Header", "child")
                            .child(NodeBuilder::new("Note", "word")),
                    )
                    .child(
                        NodeBuilder::new("Lines", "children")
                            .child(NodeBuilder::new("LineNo", "int").key())
                            .child(NodeBuilder::new("Customer", "ref-to:Customer")),
                    ),
            )
            .child(
                NodeBuilder::new("Customer", "data-aggregate")
                    .child(NodeBuilder::new("CustomerId", "int").key())
                    .child(NodeBuilder::new("LastOrder", "ref-to:Order")),
            )
            .build();

        let (graph, diagnostics) = parse(&doc);
        assert!(!diagnostics.has_errors());
        assert_eq!(
            paths(&graph, &emission_order(&graph)),
            vec!["Order/Header", "Order", "Customer", "Order/Lines"]
        );
    }

    #[test]
    fn test_reference_cycle_orders_nested_before_owner() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Team", "data-aggregate")
                    .child(NodeBuilder::new("TeamId", "int").key())
                    .child(NodeBuilder::new("Lead", "ref-to:Person"))
                    .child(
                        NodeBuilder::new("Seats", "children")
                            .child(NodeBuilder::new("SeatNo", "int").key())
                            .child(NodeBuilder::new("Holder", "ref-to:Person")),
                    ),
            )
            .child(
                NodeBuilder::new("Person", "data-aggregate")
                    .child(NodeBuilder::new("PersonId", "int").key())
                    .child(NodeBuilder::new("Team", "ref-to:Team")),
            )
            .build();

        let (graph, _) = parse(&doc);
        let components = reference_components(&graph);
        let team = graph.find("Team").unwrap();
        let person = graph.find("Person").unwrap();
        assert!(components.contains(&vec![team, person]));
        assert_eq!(
            paths(&graph, &emission_order(&graph)),
            vec!["Team", "Person", "Team/Seats"]
        );
    }

    #[test]
    fn test_key_self_reference_is_a_cycle() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Node", "data-aggregate")
                    .child(NodeBuilder::new("Parent", "ref-to:Node").key()),
            )
            .build();

        let (graph, _) = parse(&doc);
        let node = graph.find("Node").unwrap();
        assert_eq!(key_reference_cycles(&graph), vec![vec![node]]);
    }
}
