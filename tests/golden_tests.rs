//! Golden Tests for Compiled Models
//!
//! Compiles the fixture schemas and checks shapes, keys and emission order
//! against known-good results.

use std::collections::HashSet;

use petgraph::algo::kosaraju_scc;
use petgraph::graph::DiGraph;

use aggregate_schema::graph::MemberKind;
use aggregate_schema::relation::Multiplicity;
use aggregate_schema::{
    compile, AggregateId, CompiledModel, CompilerConfig, DiagnosticCode, FieldKind, JsonSource,
    PrimitiveType, ShapeKind,
};

fn compile_fixture(text: &str) -> CompiledModel {
    let source = JsonSource::from_json(text).unwrap();
    match compile(&source, &CompilerConfig::default()) {
        Ok(model) => model,
        Err(e) => panic!(
            "{}",
            e.diagnostics()
                .map(|d| d.format_all())
                .unwrap_or_else(|| e.to_string())
        ),
    }
}

fn order_model() -> CompiledModel {
    compile_fixture(include_str!("fixtures/order.json"))
}

fn payment_model() -> CompiledModel {
    compile_fixture(include_str!("fixtures/payment.json"))
}

fn identity_model() -> CompiledModel {
    compile_fixture(include_str!("fixtures/identity.json"))
}

fn ledger_model() -> CompiledModel {
    compile_fixture(include_str!("fixtures/ledger.json"))
}

// =============================================================================
// Order / Lines / Product
// =============================================================================

#[test]
fn test_order_line_key_is_flattened() {
    let model = order_model();
    let lines = model.graph().find("Order/Lines").unwrap();

    let key: Vec<(&str, &PrimitiveType)> = model
        .flatten_key(lines)
        .iter()
        .map(|c| (c.name.as_str(), &c.primitive))
        .collect();
    assert_eq!(
        key,
        vec![("OrderId", &PrimitiveType::Int), ("LineNo", &PrimitiveType::Int)]
    );
    assert!(model.flatten_key(lines)[0].inherited);
}

#[test]
fn test_order_line_persistence_shape() {
    let model = order_model();
    let shape = model
        .shape_by_path("Order/Lines", ShapeKind::Persistence)
        .unwrap();

    assert_eq!(
        shape.field_names(),
        vec!["OrderId", "LineNo", "Product_ProductId", "Product", "Quantity"]
    );
    let fk = shape.field("Product_ProductId").unwrap();
    assert_eq!(fk.kind.primitive(), Some(PrimitiveType::Int));
    assert!(!fk.nullable);
    assert_eq!(fk.ref_slot, Some(0));
    assert_eq!(fk.key_slot, None);
}

#[test]
fn test_order_emission_order() {
    let model = order_model();
    assert_eq!(
        model.emission_order_paths(),
        vec!["Product", "Order/Lines", "Order"]
    );
}

#[test]
fn test_order_root_shapes() {
    let model = order_model();
    let order = model.graph().find("Order").unwrap();

    let persistence = model.get_shape(order, ShapeKind::Persistence);
    assert_eq!(
        persistence.field_names(),
        vec!["OrderId", "OrderedAt", "Memo", "Lines", "Version"]
    );
    match &persistence.field("Lines").unwrap().kind {
        FieldKind::Collection { shape } => {
            // nested shapes never repeat the borrowed owner key
            assert_eq!(
                shape.field_names(),
                vec!["LineNo", "Product_ProductId", "Product", "Quantity"]
            );
        }
        other => panic!("expected collection, got {:?}", other),
    }

    let search = model.get_shape(order, ShapeKind::SearchResult);
    assert_eq!(search.field_names(), vec!["OrderId", "OrderedAt", "Memo", "Version"]);

    let ui = model.get_shape(order, ShapeKind::UiInstance);
    assert_eq!(
        ui.field_names(),
        vec!["OrderId", "OrderedAt", "Memo", "Lines", "InstanceKey"]
    );
}

#[test]
fn test_display_name_column_follows_name_member() {
    let model = order_model();
    let shape = model
        .shape_by_path("Order/Lines", ShapeKind::SearchResult)
        .unwrap();
    let display = shape.field("Product_DisplayName").unwrap();
    assert!(matches!(display.kind, FieldKind::DisplayName { .. }));
    assert_eq!(display.kind.primitive(), Some(PrimitiveType::String));
}

#[test]
fn test_storage_rows() {
    let model = order_model();
    let lines = model.graph().find("Order/Lines").unwrap();
    let order = model.graph().find("Order").unwrap();

    let row = model.storage_row(lines).unwrap();
    assert_eq!(row.table_name, "Order_Lines");
    assert_eq!(row.owner, Some(order));
    let keys: Vec<&str> = row.key_columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(keys, vec!["OrderId", "LineNo"]);
    assert_eq!(row.column_names(), vec!["OrderId", "LineNo", "Product_ProductId", "Quantity"]);
}

// =============================================================================
// Variations
// =============================================================================

#[test]
fn test_payment_method_search_condition() {
    let model = payment_model();
    let shape = model
        .shape_by_path("Sale/Payment", ShapeKind::SearchCondition)
        .unwrap();

    assert_eq!(
        shape.field_names(),
        vec!["PaymentMethod_Cash", "PaymentMethod_Card"]
    );
    for field in &shape.fields {
        assert!(matches!(field.kind, FieldKind::Toggle { .. }));
        assert_eq!(field.kind.primitive(), Some(PrimitiveType::Bool));
    }
}

#[test]
fn test_variation_arity() {
    let model = payment_model();
    let payment = model.graph().find("Sale/Payment").unwrap();

    let variants = model
        .graph()
        .members_of(payment)
        .find_map(|m| match &m.kind {
            MemberKind::Variation { variants, .. } => Some(variants.len()),
            _ => None,
        })
        .unwrap();
    assert_eq!(variants, 2);

    assert_eq!(
        model.get_shape(payment, ShapeKind::SearchCondition).fields.len(),
        variants
    );
    assert_eq!(
        model.get_shape(payment, ShapeKind::UiInstance).fields.len(),
        variants + 1
    );
}

#[test]
fn test_variant_edges_and_paths() {
    let model = payment_model();
    let payment = model.graph().find("Sale/Payment").unwrap();
    let cash = model.graph().find("Sale/Payment/PaymentMethod/Cash").unwrap();

    let edges = model.relationships().outgoing(payment);
    assert_eq!(edges.len(), 2);
    assert!(edges.iter().all(|e| e.multiplicity == Multiplicity::OwnedOne));
    let discriminators: Vec<Option<i64>> = edges.iter().map(|e| e.discriminator).collect();
    assert_eq!(discriminators, vec![Some(1), Some(2)]);

    let persistence = model.get_shape(cash, ShapeKind::Persistence);
    assert_eq!(persistence.field_names(), vec!["SaleId", "Tendered"]);
}

#[test]
fn test_grouped_variants_keep_first_position() {
    let model = payment_model();
    let refund = model.graph().find("Refund").unwrap();

    let condition = model.get_shape(refund, ShapeKind::SearchCondition);
    assert_eq!(
        condition.field_names(),
        vec!["RefundId", "Channel_InStore", "Channel_Online", "Reason"]
    );

    let persistence = model.get_shape(refund, ShapeKind::Persistence);
    assert_eq!(
        persistence.field_names(),
        vec![
            "RefundId",
            "Channel",
            "Channel_InStore",
            "Channel_Online",
            "Reason",
            "Version"
        ]
    );
    match &persistence.field("Channel").unwrap().kind {
        FieldKind::Discriminator { variants } => {
            assert_eq!(
                variants,
                &vec![(1, "InStore".to_string()), (2, "Online".to_string())]
            );
        }
        other => panic!("expected discriminator, got {:?}", other),
    }
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_determinism() {
    for text in [
        include_str!("fixtures/order.json"),
        include_str!("fixtures/payment.json"),
        include_str!("fixtures/identity.json"),
        include_str!("fixtures/ledger.json"),
    ] {
        let a = compile_fixture(text);
        let b = compile_fixture(text);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.emission_order(), b.emission_order());
        for (x, y) in a.shapes().zip(b.shapes()) {
            assert_eq!(
                serde_json::to_string(x).unwrap(),
                serde_json::to_string(y).unwrap()
            );
        }
    }
}

#[test]
fn test_foreign_key_arity() {
    for model in [order_model(), identity_model(), ledger_model()] {
        for member in model.graph().all_members() {
            let Some(target) = member.reference_target() else {
                continue;
            };
            let persistence = model.get_shape(member.owner, ShapeKind::Persistence);
            let columns = persistence
                .fields_of(member.id)
                .filter(|f| f.ref_slot.is_some())
                .count();
            assert_eq!(
                columns,
                model.flatten_key(target).len(),
                "reference {}",
                member.name
            );
        }
    }
}

/// Reference edges whose endpoints sit in the same reference cycle
fn reference_cycle_edges(model: &CompiledModel) -> HashSet<(AggregateId, AggregateId)> {
    let mut references = DiGraph::<AggregateId, ()>::new();
    let nodes: Vec<_> = model
        .graph()
        .aggregates()
        .iter()
        .map(|a| references.add_node(a.id))
        .collect();
    for edge in model.relationships().edges() {
        if edge.multiplicity == Multiplicity::NonOwnedManyToOne {
            references.add_edge(nodes[edge.target.0], nodes[edge.owner.0], ());
        }
    }

    let mut exempt = HashSet::new();
    for scc in kosaraju_scc(&references).into_iter().filter(|c| c.len() > 1) {
        for a in &scc {
            for b in &scc {
                exempt.insert((references[*a], references[*b]));
            }
        }
    }
    exempt
}

fn assert_topologically_valid(model: &CompiledModel) {
    let exempt = reference_cycle_edges(model);
    let position = |id| model.emission_order().iter().position(|a| *a == id).unwrap();

    for edge in model.relationships().edges() {
        if edge.multiplicity != Multiplicity::NonOwnedManyToOne
            || exempt.contains(&(edge.owner, edge.target))
        {
            continue;
        }
        assert!(
            position(edge.target) < position(edge.owner),
            "reference target must precede {}",
            edge
        );
    }
}

#[test]
fn test_topological_validity() {
    for model in [order_model(), payment_model(), identity_model(), ledger_model()] {
        assert_topologically_valid(&model);
    }
}

#[test]
fn test_reference_outranks_ownership() {
    // Store/Sections references Employee, which references Store
    let model = identity_model();
    assert!(reference_cycle_edges(&model).is_empty());
    assert_eq!(
        model.emission_order_paths(),
        vec!["Region", "Store/Address", "Store", "Employee", "Store/Sections"]
    );
}

#[test]
fn test_nested_key_reference_to_own_root() {
    let model = ledger_model();
    let entries = model.graph().find("Account/Entries").unwrap();

    let key: Vec<&str> = model
        .flatten_key(entries)
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(key, vec!["AccountId", "EntryNo", "Account_AccountId"]);

    // Account and Customer reference each other; Entries needs Account
    assert_eq!(reference_cycle_edges(&model).len(), 4);
    assert_eq!(
        model.emission_order_paths(),
        vec!["Account", "Customer", "Account/Entries"]
    );
}

#[test]
fn test_every_aggregate_emitted_once() {
    let model = identity_model();
    let emitted: HashSet<_> = model.emission_order().iter().collect();
    assert_eq!(emitted.len(), model.graph().aggregate_count());
    assert_eq!(model.emission_order().len(), model.graph().aggregate_count());
}

// =============================================================================
// Rejection
// =============================================================================

#[test]
fn test_errors_are_collected_not_thrown() {
    let source = JsonSource::from_json(include_str!("fixtures/errors.json")).unwrap();
    let err = compile(&source, &CompilerConfig::default()).unwrap_err();
    let diagnostics = err.diagnostics().unwrap();

    let codes: HashSet<DiagnosticCode> = diagnostics.all().iter().map(|d| d.code).collect();
    for code in [
        DiagnosticCode::DuplicateName,
        DiagnosticCode::DanglingReference,
        DiagnosticCode::MissingKey,
        DiagnosticCode::EmptyVariantSet,
        DiagnosticCode::CyclicKeyReference,
    ] {
        assert!(codes.contains(&code), "missing {:?} in\n{}", code, diagnostics);
    }

    assert_eq!(
        diagnostics
            .with_code(DiagnosticCode::CyclicKeyReference)
            .count(),
        1
    );

    let dangling = diagnostics
        .with_code(DiagnosticCode::DanglingReference)
        .next()
        .unwrap();
    assert_eq!(dangling.path, "Basket");
    assert!(dangling.context.iter().any(|c| c.contains("'Product'")));
    assert!(dangling.location.is_some());
}
