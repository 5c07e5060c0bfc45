//! Storage Rows
//!
//! The storage-side view of the persistence shape: one row type per Root,
//! Child, Children-element and Variant aggregate. Where callers see a Child
//! flattened into its parent, storage keeps it as its own row keyed by the
//! parent's key.

use serde::{Deserialize, Serialize};

use super::{FieldKind, Shape, ShapeKind};
use crate::graph::{AggregateGraph, AggregateId};
use crate::relation::{CascadePolicy, KeyTable};
use crate::types::PrimitiveType;

/// One stored column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageColumn {
    pub name: String,
    pub primitive: PrimitiveType,
    pub nullable: bool,
}

/// One storage row type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRow {
    pub aggregate: AggregateId,
    /// `Order_Lines` for `Order/Lines`
    pub table_name: String,
    /// Row of the owning aggregate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<AggregateId>,
    /// Delete policy towards the owner row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_owner_delete: Option<CascadePolicy>,
    /// Flattened key, in slot order
    pub key_columns: Vec<StorageColumn>,
    /// Remaining stored columns in declaration order
    pub columns: Vec<StorageColumn>,
}

impl StorageRow {
    /// Build the row from the aggregate's top-level persistence shape
    pub fn from_persistence(
        graph: &AggregateGraph,
        keys: &KeyTable,
        persistence: &Shape,
        separator: &str,
    ) -> Self {
        assert_eq!(
            persistence.kind,
            ShapeKind::Persistence,
            "storage rows derive from persistence shapes"
        );
        let aggregate = graph.aggregate(persistence.aggregate);
        let key_len = keys.get(aggregate.id).len();

        let mut key_columns: Vec<Option<StorageColumn>> = vec![None; key_len];
        let mut columns = Vec::new();

        for field in &persistence.fields {
            let primitive = match &field.kind {
                FieldKind::Column { primitive } => primitive.clone(),
                FieldKind::Discriminator { .. } | FieldKind::Version => PrimitiveType::Int,
                _ => continue,
            };
            let column = StorageColumn {
                name: field.name.clone(),
                primitive,
                nullable: field.nullable,
            };
            match field.key_slot {
                Some(slot) if slot < key_len => key_columns[slot] = Some(column),
                _ => columns.push(column),
            }
        }

        let key_columns = key_columns
            .into_iter()
            .enumerate()
            .map(|(slot, column)| {
                column.unwrap_or_else(|| {
                    panic!(
                        "persistence shape of '{}' has no column for key slot {}",
                        aggregate.path, slot
                    )
                })
            })
            .collect();

        let owner = graph.owner(aggregate.id);
        Self {
            aggregate: aggregate.id,
            table_name: aggregate.path.replace('/', separator),
            owner,
            on_owner_delete: owner.map(|_| CascadePolicy::Cascade),
            key_columns,
            columns,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.key_columns
            .iter()
            .chain(&self.columns)
            .map(|c| c.name.as_str())
            .collect()
    }
}
