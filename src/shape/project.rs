//! Shape Derivation
//!
//! Projects each member into zero or more fields per shape kind:
//!
//! | Member | Persistence | SearchCondition | SearchResult | UiInstance |
//! |---|---|---|---|---|
//! | Scalar | column | range / contains / exact condition | column | field |
//! | Child | owned nested shape | nested shape | inlined fields | nested shape |
//! | Children | owned collection | - | - | collection |
//! | Variation | discriminator + nested shape per variant | toggle per variant | discriminator | discriminator + nested shape per variant |
//! | Reference | key columns + navigation | identity condition | key columns + display name | identity |
//!
//! Top-level Persistence and SearchResult shapes of owned aggregates start
//! with the borrowed owner key; nested shapes never repeat it.

use tracing::trace;

use super::naming::{compose, disambiguate, to_identifier};
use super::{ConditionMode, Field, FieldKind, Shape, ShapeKind};
use crate::graph::{Aggregate, AggregateGraph, AggregateId, Member, MemberKind};
use crate::relation::KeyTable;
use crate::types::PrimitiveType;

/// Naming and synthetic-column settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeOptions {
    pub separator: String,
    /// Suffix of a reference's display-name column
    pub display_name_suffix: String,
    /// Name of the UI instance-key field
    pub instance_key_field: String,
    /// Name of the root concurrency column; `None` disables it
    pub version_column: Option<String>,
}

impl Default for ShapeOptions {
    fn default() -> Self {
        Self {
            separator: "_".to_string(),
            display_name_suffix: "DisplayName".to_string(),
            instance_key_field: "InstanceKey".to_string(),
            version_column: Some("Version".to_string()),
        }
    }
}

/// Derives shapes from a validated graph and its key table
pub struct ShapeEngine<'a> {
    graph: &'a AggregateGraph,
    keys: &'a KeyTable,
    options: &'a ShapeOptions,
}

impl<'a> ShapeEngine<'a> {
    pub fn new(graph: &'a AggregateGraph, keys: &'a KeyTable, options: &'a ShapeOptions) -> Self {
        Self {
            graph,
            keys,
            options,
        }
    }

    /// Derive one top-level shape
    pub fn derive(&self, aggregate: AggregateId, kind: ShapeKind) -> Shape {
        self.build(aggregate, kind, true)
    }

    fn build(&self, aggregate: AggregateId, kind: ShapeKind, top_level: bool) -> Shape {
        let agg = self.graph.aggregate(aggregate);
        let key = self.keys.get(aggregate);
        let mut fields = Vec::new();

        let stores_columns = matches!(kind, ShapeKind::Persistence | ShapeKind::SearchResult);

        if top_level && stores_columns {
            for (slot, column) in key.iter().enumerate().filter(|(_, c)| c.inherited) {
                fields.push(Field {
                    name: column.name.clone(),
                    display_name: column.name.clone(),
                    kind: FieldKind::Column {
                        primitive: column.primitive.clone(),
                    },
                    nullable: false,
                    member: None,
                    key_slot: Some(slot),
                    ref_slot: None,
                    qualifiers: Vec::new(),
                });
            }
        }

        for member in self.graph.members_of(aggregate) {
            self.project_member(agg, member, kind, &mut fields);
        }

        match (&self.options.version_column, kind) {
            (Some(version), ShapeKind::Persistence | ShapeKind::SearchResult) if agg.is_root() => {
                fields.push(synthetic(version, FieldKind::Version, false));
            }
            _ => {}
        }
        if kind == ShapeKind::UiInstance && agg.kind.has_own_identity() && !key.is_empty() {
            fields.push(synthetic(
                &self.options.instance_key_field,
                FieldKind::InstanceKey,
                true,
            ));
        }

        disambiguate(&mut fields, &agg.display_name, &self.options.separator);
        trace!(path = %agg.path, %kind, fields = fields.len(), "derived shape");

        Shape {
            aggregate,
            path: agg.path.clone(),
            display_name: agg.display_name.clone(),
            kind,
            key: self.keys.primitives(aggregate),
            fields,
        }
    }

    fn project_member(
        &self,
        agg: &Aggregate,
        member: &Member,
        kind: ShapeKind,
        out: &mut Vec<Field>,
    ) {
        let sep = self.options.separator.as_str();

        match &member.kind {
            MemberKind::Scalar {
                primitive,
                nullable,
                is_key,
                ..
            } => {
                let field_kind = match kind {
                    ShapeKind::SearchCondition => FieldKind::Condition {
                        primitive: primitive.clone(),
                        mode: ConditionMode::for_primitive(primitive),
                    },
                    _ => FieldKind::Column {
                        primitive: primitive.clone(),
                    },
                };
                let key_slot = match kind {
                    ShapeKind::Persistence | ShapeKind::SearchResult if *is_key => {
                        self.keys.scalar_slot(agg.id, member.id)
                    }
                    _ => None,
                };
                out.push(Field {
                    key_slot,
                    ..member_field(
                        member,
                        &member.name,
                        field_kind,
                        *nullable || kind == ShapeKind::SearchCondition,
                    )
                });
            }

            MemberKind::Child { target } => match kind {
                ShapeKind::SearchResult => {
                    let qualifier = to_identifier(&member.display_name);
                    for mut field in self.build(*target, kind, false).fields {
                        field.qualifiers.insert(0, qualifier.clone());
                        field.key_slot = None;
                        out.push(field);
                    }
                }
                _ => {
                    let shape = Box::new(self.build(*target, kind, false));
                    out.push(member_field(
                        member,
                        &member.name,
                        FieldKind::Owned { shape },
                        kind == ShapeKind::SearchCondition,
                    ));
                }
            },

            MemberKind::Children { target } => match kind {
                ShapeKind::Persistence | ShapeKind::UiInstance => {
                    let shape = Box::new(self.build(*target, kind, false));
                    out.push(member_field(
                        member,
                        &member.name,
                        FieldKind::Collection { shape },
                        false,
                    ));
                }
                ShapeKind::SearchCondition | ShapeKind::SearchResult => {}
            },

            MemberKind::Variation { variants, nullable } => {
                let named: Vec<(i64, &Aggregate)> = variants
                    .iter()
                    .map(|(d, v)| (*d, self.graph.aggregate(*v)))
                    .collect();

                if kind != ShapeKind::SearchCondition {
                    let discriminator = FieldKind::Discriminator {
                        variants: named.iter().map(|(d, v)| (*d, v.name.clone())).collect(),
                    };
                    out.push(member_field(member, &member.name, discriminator, *nullable));
                }

                for (discriminator, variant) in named {
                    let name = compose(&[&member.name, &variant.name], sep);
                    let field_kind = match kind {
                        ShapeKind::SearchCondition => FieldKind::Toggle {
                            discriminator,
                            default: true,
                        },
                        ShapeKind::Persistence | ShapeKind::UiInstance => FieldKind::Variant {
                            discriminator,
                            shape: Box::new(self.build(variant.id, kind, false)),
                        },
                        ShapeKind::SearchResult => continue,
                    };
                    out.push(Field {
                        display_name: variant.display_name.clone(),
                        ..member_field(
                            member,
                            &name,
                            field_kind,
                            kind != ShapeKind::SearchCondition,
                        )
                    });
                }
            }

            MemberKind::Reference {
                target,
                nullable,
                is_key,
                ..
            } => {
                let Some(target) = *target else {
                    panic!(
                        "reference '{}' of validated aggregate '{}' is unresolved",
                        member.name, agg.path
                    );
                };

                match kind {
                    ShapeKind::Persistence | ShapeKind::SearchResult => {
                        for (nth, column) in self.keys.get(target).iter().enumerate() {
                            let key_slot = if *is_key {
                                self.keys.reference_slot(agg.id, member.id, nth)
                            } else {
                                None
                            };
                            out.push(Field {
                                key_slot,
                                ref_slot: Some(nth),
                                ..member_field(
                                    member,
                                    &compose(&[&member.name, &column.name], sep),
                                    FieldKind::Column {
                                        primitive: column.primitive.clone(),
                                    },
                                    *nullable,
                                )
                            });
                        }

                        if kind == ShapeKind::Persistence {
                            out.push(member_field(
                                member,
                                &member.name,
                                FieldKind::Navigation { target },
                                *nullable,
                            ));
                        } else {
                            out.push(member_field(
                                member,
                                &compose(&[&member.name, &self.options.display_name_suffix], sep),
                                FieldKind::DisplayName {
                                    target,
                                    primitive: self.display_primitive(target),
                                },
                                true,
                            ));
                        }
                    }
                    ShapeKind::SearchCondition => out.push(member_field(
                        member,
                        &member.name,
                        FieldKind::IdentityCondition {
                            target,
                            key: self.keys.primitives(target),
                        },
                        true,
                    )),
                    ShapeKind::UiInstance => out.push(member_field(
                        member,
                        &member.name,
                        FieldKind::Identity {
                            target,
                            key: self.keys.primitives(target),
                        },
                        *nullable,
                    )),
                }
            }
        }
    }

    /// Type of the target's display name: its `name` scalar, else string
    fn display_primitive(&self, target: AggregateId) -> PrimitiveType {
        self.graph
            .name_member(target)
            .and_then(|m| m.primitive().cloned())
            .unwrap_or(PrimitiveType::String)
    }
}

fn member_field(member: &Member, name: &str, kind: FieldKind, nullable: bool) -> Field {
    Field {
        name: name.to_string(),
        display_name: member.display_name.clone(),
        kind,
        nullable,
        member: Some(member.id),
        key_slot: None,
        ref_slot: None,
        qualifiers: Vec::new(),
    }
}

fn synthetic(name: &str, kind: FieldKind, nullable: bool) -> Field {
    Field {
        name: name.to_string(),
        display_name: name.to_string(),
        kind,
        nullable,
        member: None,
        key_slot: None,
        ref_slot: None,
        qualifiers: Vec::new(),
    }
}
