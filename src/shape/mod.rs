//! Shapes
//!
//! A [`Shape`] is one structural projection of an aggregate. Four kinds are
//! derived for every aggregate:
//!
//! | Kind | Purpose |
//! |---|---|
//! | Persistence | columns and owned rows as stored |
//! | SearchCondition | filter fields for searching |
//! | SearchResult | flat result columns |
//! | UiInstance | one editable instance in the UI |
//!
//! Derivation lives in [`project`], collision handling in [`naming`] and the
//! per-table storage view in [`storage`].

pub mod naming;
pub mod project;
pub mod storage;

pub use project::{ShapeEngine, ShapeOptions};
pub use storage::{StorageColumn, StorageRow};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::graph::{AggregateId, MemberId};
use crate::relation::{self, InstanceKey, KeyError, ShapeInstance, UiIdentity};
use crate::types::PrimitiveType;

// =============================================================================
// Shape Kinds
// =============================================================================

/// The four projections
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Persistence,
    SearchCondition,
    SearchResult,
    UiInstance,
}

impl ShapeKind {
    pub const ALL: [ShapeKind; 4] = [
        Self::Persistence,
        Self::SearchCondition,
        Self::SearchResult,
        Self::UiInstance,
    ];

    /// Whether instances of this kind can carry an instance key at all
    pub fn can_represent_key(&self) -> bool {
        !matches!(self, Self::SearchCondition)
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persistence => write!(f, "Persistence"),
            Self::SearchCondition => write!(f, "SearchCondition"),
            Self::SearchResult => write!(f, "SearchResult"),
            Self::UiInstance => write!(f, "UiInstance"),
        }
    }
}

impl std::str::FromStr for ShapeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "persistence" => Ok(Self::Persistence),
            "searchcondition" => Ok(Self::SearchCondition),
            "searchresult" => Ok(Self::SearchResult),
            "uiinstance" | "ui" => Ok(Self::UiInstance),
            other => Err(format!("unknown shape kind '{}'", other)),
        }
    }
}

// =============================================================================
// Fields
// =============================================================================

/// How a scalar search condition matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
    /// `from`/`to` pair (numbers, dates)
    Range,
    /// Substring match (strings)
    Contains,
    /// Equality (enums, booleans)
    Exact,
}

impl ConditionMode {
    pub fn for_primitive(primitive: &PrimitiveType) -> Self {
        match primitive {
            PrimitiveType::Int | PrimitiveType::Decimal | PrimitiveType::Date => Self::Range,
            PrimitiveType::String => Self::Contains,
            PrimitiveType::Bool | PrimitiveType::Enum(_) => Self::Exact,
        }
    }
}

/// What a field holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    /// A primitive value (scalar, borrowed key, foreign-key column)
    Column { primitive: PrimitiveType },
    /// Scalar search condition
    Condition {
        primitive: PrimitiveType,
        mode: ConditionMode,
    },
    /// Per-variant search toggle
    Toggle { discriminator: i64, default: bool },
    /// Which variant is active (integer column)
    Discriminator { variants: Vec<(i64, String)> },
    /// Nested shape of a Child member
    Owned { shape: Box<Shape> },
    /// Nested shape of one variant
    Variant { discriminator: i64, shape: Box<Shape> },
    /// Collection of a Children member's element shape
    Collection { shape: Box<Shape> },
    /// Non-owned navigation to a referenced aggregate
    Navigation { target: AggregateId },
    /// Opaque "referenced instance is" search condition
    IdentityCondition {
        target: AggregateId,
        key: Vec<PrimitiveType>,
    },
    /// Opaque reference value: target key text plus cached display name
    Identity {
        target: AggregateId,
        key: Vec<PrimitiveType>,
    },
    /// Display name of a referenced instance
    DisplayName {
        target: AggregateId,
        primitive: PrimitiveType,
    },
    /// Optimistic concurrency counter
    Version,
    /// Serialized instance key of the shape's own aggregate
    InstanceKey,
}

impl FieldKind {
    /// Primitive type of a value-carrying field
    pub fn primitive(&self) -> Option<PrimitiveType> {
        match self {
            Self::Column { primitive }
            | Self::Condition { primitive, .. }
            | Self::DisplayName { primitive, .. } => Some(primitive.clone()),
            Self::Toggle { .. } => Some(PrimitiveType::Bool),
            Self::Discriminator { .. } | Self::Version => Some(PrimitiveType::Int),
            Self::InstanceKey => Some(PrimitiveType::String),
            _ => None,
        }
    }

    /// Nested shape, if any
    pub fn nested(&self) -> Option<&Shape> {
        match self {
            Self::Owned { shape } | Self::Variant { shape, .. } | Self::Collection { shape } => {
                Some(shape)
            }
            _ => None,
        }
    }
}

/// One field of a shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub display_name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    /// Declaring member; `None` for borrowed key columns and synthetic fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<MemberId>,
    /// Slot of the shape aggregate's flattened key this field carries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_slot: Option<usize>,
    /// For foreign-key columns: slot of the referenced aggregate's key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_slot: Option<usize>,
    /// Display names of enclosing members, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifiers: Vec<String>,
}

// =============================================================================
// Shape
// =============================================================================

/// A derived projection of one aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub aggregate: AggregateId,
    pub path: String,
    pub display_name: String,
    pub kind: ShapeKind,
    /// Primitive types of the aggregate's flattened key
    pub key: Vec<PrimitiveType>,
    pub fields: Vec<Field>,
}

impl Shape {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Fields declared by one member
    pub fn fields_of(&self, member: MemberId) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(move |f| f.member == Some(member))
    }

    /// The caller-facing view: Child shapes inlined into this field list.
    ///
    /// Storage keeps Child rows separate (see [`StorageRow`]); callers see one
    /// flat object. Inlined fields no longer carry key slots of this shape.
    pub fn caller_view(&self, separator: &str) -> Shape {
        fn inline(fields: &[Field], qualifiers: &[String], out: &mut Vec<Field>) {
            for field in fields {
                match &field.kind {
                    FieldKind::Owned { shape } => {
                        let mut nested = qualifiers.to_vec();
                        nested.push(naming::to_identifier(&field.display_name));
                        inline(&shape.fields, &nested, out);
                    }
                    _ => {
                        let mut field = field.clone();
                        if !qualifiers.is_empty() {
                            field.key_slot = None;
                            let mut all = qualifiers.to_vec();
                            all.append(&mut field.qualifiers);
                            field.qualifiers = all;
                        }
                        out.push(field);
                    }
                }
            }
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        inline(&self.fields, &[], &mut fields);
        naming::disambiguate(&mut fields, &self.display_name, separator);

        Shape {
            fields,
            ..self.clone()
        }
    }

    // --- Identity ---

    pub fn get_instance_key(&self, instance: &ShapeInstance) -> Result<InstanceKey, KeyError> {
        relation::get_instance_key(self, instance)
    }

    pub fn set_instance_key(
        &self,
        instance: &mut ShapeInstance,
        key: &InstanceKey,
    ) -> Result<(), KeyError> {
        relation::set_instance_key(self, instance, key)
    }

    /// Instance-key field of a UI shape, including unsaved instances
    pub fn get_ui_identity(&self, instance: &ShapeInstance) -> Result<UiIdentity, KeyError> {
        relation::get_ui_identity(self, instance)
    }

    pub fn set_ui_identity(
        &self,
        instance: &mut ShapeInstance,
        identity: &UiIdentity,
    ) -> Result<(), KeyError> {
        relation::set_ui_identity(self, instance, identity)
    }

    pub fn get_reference_key(
        &self,
        instance: &ShapeInstance,
        member: MemberId,
    ) -> Result<Option<InstanceKey>, KeyError> {
        relation::get_reference_key(self, instance, member)
    }

    pub fn set_reference_key(
        &self,
        instance: &mut ShapeInstance,
        member: MemberId,
        key: Option<&InstanceKey>,
    ) -> Result<(), KeyError> {
        relation::set_reference_key(self, instance, member, key)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[Field], depth: usize) -> fmt::Result {
            for field in fields {
                let indent = "  ".repeat(depth);
                let nullable = if field.nullable { "?" } else { "" };
                match &field.kind {
                    FieldKind::Owned { shape } => {
                        writeln!(f, "{}{}: {{", indent, field.name)?;
                        write_fields(f, &shape.fields, depth + 1)?;
                        writeln!(f, "{}}}", indent)?;
                    }
                    FieldKind::Variant { discriminator, shape } => {
                        writeln!(
                            f,
                            "{}{}{}: variant {} {{",
                            indent, field.name, nullable, discriminator
                        )?;
                        write_fields(f, &shape.fields, depth + 1)?;
                        writeln!(f, "{}}}", indent)?;
                    }
                    FieldKind::Collection { shape } => {
                        writeln!(f, "{}{}: [{{", indent, field.name)?;
                        write_fields(f, &shape.fields, depth + 1)?;
                        writeln!(f, "{}}}]", indent)?;
                    }
                    other => {
                        let ty = match other.primitive() {
                            Some(p) => p.to_string(),
                            None => "ref".to_string(),
                        };
                        let key = match field.key_slot {
                            Some(slot) => format!(" [key {}]", slot),
                            None => String::new(),
                        };
                        writeln!(f, "{}{}: {}{}{}", indent, field.name, ty, nullable, key)?;
                    }
                }
            }
            Ok(())
        }

        writeln!(f, "{} {} {{", self.path, self.kind)?;
        write_fields(f, &self.fields, 1)?;
        write!(f, "}}")
    }
}
