//! Member Kinds
//!
//! The five member kinds form a closed union. Every behavior that differs
//! per kind (nested aggregates, projection, key participation) is a `match`
//! over [`MemberKind`], so adding a kind is a compile error everywhere it
//! needs handling.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{AggregateId, MemberId};
use crate::source::SourceLocation;
use crate::types::PrimitiveType;

/// A typed attribute of an aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// Aggregate that declares this member
    pub owner: AggregateId,
    /// Physical name
    pub name: String,
    pub display_name: String,
    pub kind: MemberKind,
    pub location: SourceLocation,
}

/// Tagged union over the five member kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemberKind {
    /// A leaf value
    Scalar {
        primitive: PrimitiveType,
        nullable: bool,
        is_key: bool,
        /// Display-name member of its aggregate
        is_name: bool,
    },
    /// Exactly one nested aggregate
    Child { target: AggregateId },
    /// Zero or more nested aggregates, each with its own key
    Children { target: AggregateId },
    /// Exactly one of N nested aggregates is active
    Variation {
        variants: BTreeMap<i64, AggregateId>,
        nullable: bool,
    },
    /// Pointer-by-key to a Root or Children-element aggregate.
    ///
    /// `target` is `None` when the path did not resolve; validation reports it.
    Reference {
        target: Option<AggregateId>,
        path: String,
        nullable: bool,
        is_key: bool,
        is_name: bool,
    },
}

impl MemberKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Scalar { .. } => "scalar",
            Self::Child { .. } => "child",
            Self::Children { .. } => "children",
            Self::Variation { .. } => "variation",
            Self::Reference { .. } => "reference",
        }
    }
}

impl Member {
    /// Aggregates declared inside this member (empty for Scalar and Reference)
    pub fn nested_aggregates(&self) -> Vec<AggregateId> {
        match &self.kind {
            MemberKind::Child { target } | MemberKind::Children { target } => vec![*target],
            MemberKind::Variation { variants, .. } => variants.values().copied().collect(),
            MemberKind::Scalar { .. } | MemberKind::Reference { .. } => Vec::new(),
        }
    }

    /// Whether the member contributes to its aggregate's key
    pub fn is_key(&self) -> bool {
        match &self.kind {
            MemberKind::Scalar { is_key, .. } | MemberKind::Reference { is_key, .. } => *is_key,
            _ => false,
        }
    }

    /// Whether the member is the aggregate's display name
    pub fn is_name(&self) -> bool {
        match &self.kind {
            MemberKind::Scalar { is_name, .. } | MemberKind::Reference { is_name, .. } => *is_name,
            _ => false,
        }
    }

    pub fn nullable(&self) -> bool {
        match &self.kind {
            MemberKind::Scalar { nullable, .. }
            | MemberKind::Variation { nullable, .. }
            | MemberKind::Reference { nullable, .. } => *nullable,
            MemberKind::Child { .. } | MemberKind::Children { .. } => false,
        }
    }

    /// Scalar primitive type, if this is a scalar
    pub fn primitive(&self) -> Option<&PrimitiveType> {
        match &self.kind {
            MemberKind::Scalar { primitive, .. } => Some(primitive),
            _ => None,
        }
    }

    /// Resolved reference target, if this is a reference
    pub fn reference_target(&self) -> Option<AggregateId> {
        match &self.kind {
            MemberKind::Reference { target, .. } => *target,
            _ => None,
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MemberKind::Scalar { primitive, nullable, is_key, .. } => {
                write!(f, "{}: {}", self.name, primitive)?;
                if *nullable {
                    write!(f, "?")?;
                }
                if *is_key {
                    write!(f, " [key]")?;
                }
                Ok(())
            }
            MemberKind::Child { .. } => write!(f, "{}: child", self.name),
            MemberKind::Children { .. } => write!(f, "{}: children", self.name),
            MemberKind::Variation { variants, .. } => {
                write!(f, "{}: variation({})", self.name, variants.len())
            }
            MemberKind::Reference { path, is_key, .. } => {
                write!(f, "{}: ref-to:{}", self.name, path)?;
                if *is_key {
                    write!(f, " [key]")?;
                }
                Ok(())
            }
        }
    }
}
