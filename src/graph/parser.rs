//! Schema Parser
//!
//! Turns a raw node tree into an [`AggregateGraph`]. The parser never stops
//! at the first problem: malformed nodes are reported and skipped, dangling
//! references stay unresolved (`target: None`) and duplicates are kept, so
//! validation can report everything in one run.

use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;
use tracing::debug;

use super::diagnostics::{DiagnosticCode, Diagnostics};
use super::validate::{validate, ValidationOptions};
use super::{AggregateGraph, AggregateId, AggregateKind, EnumDef, MemberKind, RootModel};
use crate::source::{RawNode, SchemaSource, DOCUMENT_TAG};
use crate::types::PrimitiveType;

/// Tag of an include node (expanded by the loader)
pub const INCLUDE_TAG: &str = "include";

const ENUM_TAG: &str = "enum";
const ENUM_VALUE_TAG: &str = "enum-value";
const VARIANT_PREFIX: &str = "variant-of:";
const REFERENCE_PREFIX: &str = "ref-to:";

/// Parse with default validation options
pub fn parse<S: SchemaSource + ?Sized>(source: &S) -> (AggregateGraph, Diagnostics) {
    parse_with(source, &ValidationOptions::default())
}

/// Parse a schema source and validate the resulting graph
#[tracing::instrument(skip_all, fields(origin = %source.origin()))]
pub fn parse_with<S: SchemaSource + ?Sized>(
    source: &S,
    options: &ValidationOptions,
) -> (AggregateGraph, Diagnostics) {
    let mut parser = Parser::new();
    parser.parse_document(source.root());
    parser.resolve_references();

    let Parser {
        graph,
        mut diagnostics,
        ..
    } = parser;

    debug!(
        aggregates = graph.aggregate_count(),
        members = graph.member_count(),
        "parsed schema"
    );

    diagnostics.merge(validate(&graph, options));
    (graph, diagnostics)
}

// =============================================================================
// Type Tags
// =============================================================================

/// A classified type tag
#[derive(Debug, Clone, PartialEq, Eq)]
enum Tag<'a> {
    Document,
    Include,
    Aggregate(RootModel),
    Enum,
    EnumValue,
    Child,
    Children,
    Variation,
    /// `variant-of:<discriminator>` or `variant-of:<discriminator>:<variation>`
    VariantOf {
        discriminator: &'a str,
        variation: Option<&'a str>,
    },
    Reference(&'a str),
    Scalar(PrimitiveType),
    Unknown(&'a str),
}

fn classify(tag: &str) -> Tag<'_> {
    if let Some(model) = RootModel::from_tag(tag) {
        return Tag::Aggregate(model);
    }
    if let Some(primitive) = PrimitiveType::from_tag(tag) {
        return Tag::Scalar(primitive);
    }
    if let Some(rest) = tag.strip_prefix(VARIANT_PREFIX) {
        return match rest.split_once(':') {
            Some((discriminator, variation)) => Tag::VariantOf {
                discriminator,
                variation: Some(variation),
            },
            None => Tag::VariantOf {
                discriminator: rest,
                variation: None,
            },
        };
    }
    if let Some(path) = tag.strip_prefix(REFERENCE_PREFIX) {
        return Tag::Reference(path);
    }
    match tag {
        DOCUMENT_TAG => Tag::Document,
        INCLUDE_TAG => Tag::Include,
        ENUM_TAG => Tag::Enum,
        ENUM_VALUE_TAG => Tag::EnumValue,
        "child" => Tag::Child,
        "children" => Tag::Children,
        "variation" => Tag::Variation,
        other => Tag::Unknown(other),
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[\p{L}_][\p{L}\p{N}_]*$").expect("identifier pattern is valid")
    })
}

/// Whether `name` is usable as a physical name
pub fn is_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

// =============================================================================
// Parser
// =============================================================================

/// Attribute flags shared by scalar and reference members
struct MemberFlags {
    is_key: bool,
    is_name: bool,
    nullable: bool,
}

struct Parser {
    graph: AggregateGraph,
    diagnostics: Diagnostics,
    enum_names: HashSet<String>,
}

impl Parser {
    fn new() -> Self {
        Self {
            graph: AggregateGraph::new(),
            diagnostics: Diagnostics::new(),
            enum_names: HashSet::new(),
        }
    }

    fn parse_document(&mut self, root: &RawNode) {
        if classify(root.type_tag()) != Tag::Document {
            self.diagnostics.report(
                root.name.clone(),
                DiagnosticCode::MisplacedNode,
                root.source_location(),
                format!(
                    "Document root must have type '{}', found '{}'",
                    DOCUMENT_TAG,
                    root.type_tag()
                ),
            );
        }

        // enums first so scalar members can name them regardless of order
        for node in root.children() {
            if classify(node.type_tag()) == Tag::Enum {
                self.parse_enum(node);
            }
        }

        for node in root.children() {
            match classify(node.type_tag()) {
                Tag::Aggregate(model) => {
                    self.build_aggregate(node, AggregateKind::Root { model }, node.name.clone());
                }
                Tag::Enum => {}
                Tag::Unknown(tag) if !self.enum_names.contains(tag) => {
                    self.unknown_tag(node, &node.name);
                }
                _ => {
                    self.diagnostics.report(
                        node.name.clone(),
                        DiagnosticCode::MisplacedNode,
                        node.source_location(),
                        format!(
                            "'{}' ({}) cannot appear at document level",
                            node.name,
                            node.type_tag()
                        ),
                    );
                }
            }
        }
    }

    fn parse_enum(&mut self, node: &RawNode) {
        self.check_name(&node.name, &node.name, node);

        let mut values = Vec::new();
        let mut next_code = 0i64;
        for value in node.children() {
            if classify(value.type_tag()) != Tag::EnumValue {
                self.diagnostics.report(
                    node.name.clone(),
                    DiagnosticCode::MisplacedNode,
                    value.source_location(),
                    format!("Enum '{}' may only contain enum-value nodes", node.name),
                );
                continue;
            }
            self.check_name(&value.name, &node.name, value);

            let code = match value.attribute("value") {
                Some(raw) => match raw.trim().parse::<i64>() {
                    Ok(code) => code,
                    Err(_) => {
                        self.invalid_attribute(
                            &node.name,
                            value,
                            format!("Enum value '{}' has non-integer value '{}'", value.name, raw),
                        );
                        next_code
                    }
                },
                None => next_code,
            };
            next_code = code + 1;
            values.push((value.name.clone(), code));
        }

        self.enum_names.insert(node.name.clone());
        self.graph.push_enum(EnumDef {
            name: node.name.clone(),
            values,
            location: node.source_location().clone(),
        });
    }

    fn build_aggregate(
        &mut self,
        node: &RawNode,
        kind: AggregateKind,
        path: String,
    ) -> AggregateId {
        self.check_name(&node.name, &path, node);

        let display_name = node
            .attribute("display-name")
            .unwrap_or(&node.name)
            .to_string();
        let id = self.graph.push_aggregate(
            node.name.clone(),
            display_name,
            kind,
            path.clone(),
            node.source_location().clone(),
        );
        self.build_members(id, node.children(), &path);
        id
    }

    fn build_members(&mut self, owner: AggregateId, nodes: &[RawNode], path: &str) {
        // grouped variants declared directly in the aggregate, by variation name
        let mut groups: HashMap<&str, Vec<(&RawNode, &str)>> = HashMap::new();
        for node in nodes {
            if let Tag::VariantOf {
                discriminator,
                variation: Some(variation),
            } = classify(node.type_tag())
            {
                groups.entry(variation).or_default().push((node, discriminator));
            }
        }
        let mut emitted_groups: HashSet<&str> = HashSet::new();

        for node in nodes {
            match classify(node.type_tag()) {
                Tag::Scalar(primitive) => self.scalar_member(owner, node, path, primitive),
                Tag::Unknown(tag) if self.enum_names.contains(tag) => {
                    self.scalar_member(owner, node, path, PrimitiveType::Enum(tag.to_string()))
                }
                Tag::Reference(target_path) => {
                    self.check_name(&node.name, path, node);
                    let flags = self.member_flags(node, path);
                    self.graph.push_member(
                        owner,
                        node.name.clone(),
                        display_name_of(node),
                        MemberKind::Reference {
                            target: None,
                            path: target_path.trim_matches('/').to_string(),
                            nullable: flags.nullable,
                            is_key: flags.is_key,
                            is_name: flags.is_name,
                        },
                        node.source_location().clone(),
                    );
                }
                Tag::Child | Tag::Children => {
                    self.check_name(&node.name, path, node);
                    self.reject_scalar_flags(node, path);
                    let is_many = classify(node.type_tag()) == Tag::Children;
                    let kind = if is_many {
                        AggregateKind::ChildrenElement
                    } else {
                        AggregateKind::Child
                    };
                    let target =
                        self.build_aggregate(node, kind, format!("{}/{}", path, node.name));
                    let member_kind = if is_many {
                        MemberKind::Children { target }
                    } else {
                        MemberKind::Child { target }
                    };
                    self.graph.push_member(
                        owner,
                        node.name.clone(),
                        display_name_of(node),
                        member_kind,
                        node.source_location().clone(),
                    );
                }
                Tag::Variation => {
                    self.check_name(&node.name, path, node);
                    self.reject_scalar_flags(node, path);
                    let mut variant_nodes = Vec::new();
                    for variant in node.children() {
                        match classify(variant.type_tag()) {
                            Tag::VariantOf {
                                discriminator,
                                variation: None,
                            } => variant_nodes.push((variant, discriminator)),
                            _ => self.diagnostics.report(
                                path.to_string(),
                                DiagnosticCode::MisplacedNode,
                                variant.source_location(),
                                format!(
                                    "Variation '{}' may only contain variant-of nodes, found '{}'",
                                    node.name,
                                    variant.type_tag()
                                ),
                            ),
                        }
                    }
                    let nullable = self.optional_nullable(node, path);
                    self.variation_member(owner, path, node, &node.name, variant_nodes, nullable);
                }
                Tag::VariantOf {
                    variation: Some(variation),
                    ..
                } => {
                    if !emitted_groups.insert(variation) {
                        continue;
                    }
                    self.check_name(variation, path, node);
                    let variant_nodes = groups.remove(variation).unwrap_or_default();
                    self.variation_member(owner, path, node, variation, variant_nodes, true);
                }
                Tag::VariantOf { variation: None, .. } => {
                    self.diagnostics.report(
                        path.to_string(),
                        DiagnosticCode::MisplacedNode,
                        node.source_location(),
                        format!(
                            "Variant '{}' must be inside a variation or name one ('variant-of:<n>:<variation>')",
                            node.name
                        ),
                    );
                }
                Tag::Unknown(_) => self.unknown_tag(node, path),
                Tag::Document
                | Tag::Include
                | Tag::Aggregate(_)
                | Tag::Enum
                | Tag::EnumValue => {
                    self.diagnostics.report(
                        path.to_string(),
                        DiagnosticCode::MisplacedNode,
                        node.source_location(),
                        format!(
                            "'{}' ({}) cannot appear inside an aggregate",
                            node.name,
                            node.type_tag()
                        ),
                    );
                }
            }
        }
    }

    fn scalar_member(
        &mut self,
        owner: AggregateId,
        node: &RawNode,
        path: &str,
        primitive: PrimitiveType,
    ) {
        self.check_name(&node.name, path, node);
        let flags = self.member_flags(node, path);
        self.graph.push_member(
            owner,
            node.name.clone(),
            display_name_of(node),
            MemberKind::Scalar {
                primitive,
                nullable: flags.nullable,
                is_key: flags.is_key,
                is_name: flags.is_name,
            },
            node.source_location().clone(),
        );
    }

    fn variation_member(
        &mut self,
        owner: AggregateId,
        path: &str,
        node: &RawNode,
        variation: &str,
        variant_nodes: Vec<(&RawNode, &str)>,
        nullable: bool,
    ) {
        let mut variants = BTreeMap::new();
        for (variant, raw_discriminator) in variant_nodes {
            let discriminator = match raw_discriminator.trim().parse::<i64>() {
                Ok(value) => value,
                Err(_) => {
                    self.diagnostics.report(
                        path.to_string(),
                        DiagnosticCode::InvalidDiscriminator,
                        variant.source_location(),
                        format!(
                            "Variant '{}' has non-integer discriminator '{}'",
                            variant.name, raw_discriminator
                        ),
                    );
                    continue;
                }
            };
            if variants.contains_key(&discriminator) {
                self.diagnostics.report(
                    path.to_string(),
                    DiagnosticCode::DuplicateDiscriminator,
                    variant.source_location(),
                    format!(
                        "Variation '{}' already has a variant with discriminator {}",
                        variation, discriminator
                    ),
                );
                continue;
            }
            let target = self.build_aggregate(
                variant,
                AggregateKind::Variant { discriminator },
                format!("{}/{}/{}", path, variation, variant.name),
            );
            variants.insert(discriminator, target);
        }

        // grouped variants carry no container node; the first variant's
        // location stands in for the variation
        let display_name = if classify(node.type_tag()) == Tag::Variation {
            display_name_of(node)
        } else {
            variation.to_string()
        };
        self.graph.push_member(
            owner,
            variation.to_string(),
            display_name,
            MemberKind::Variation { variants, nullable },
            node.source_location().clone(),
        );
    }

    /// Link every reference to its target aggregate by path
    fn resolve_references(&mut self) {
        let unresolved: Vec<_> = self
            .graph
            .all_members()
            .iter()
            .filter_map(|m| match &m.kind {
                MemberKind::Reference { path, .. } => Some((m.id, path.clone())),
                _ => None,
            })
            .collect();

        for (id, path) in unresolved {
            if let Some(found) = self.graph.find(&path) {
                if let MemberKind::Reference { target, .. } = &mut self.graph.member_mut(id).kind {
                    *target = Some(found);
                }
            }
        }
    }

    // --- Attributes ---

    fn member_flags(&mut self, node: &RawNode, path: &str) -> MemberFlags {
        let is_key = self.flag(node, path, "key").unwrap_or(false);
        let is_name = self.flag(node, path, "name").unwrap_or(false);
        let nullable = if is_key {
            if node.attribute("nullable").is_some() {
                self.invalid_attribute(
                    path,
                    node,
                    format!("Key member '{}' cannot be declared nullable", node.name),
                );
            }
            false
        } else {
            self.optional_nullable(node, path)
        };
        MemberFlags {
            is_key,
            is_name,
            nullable,
        }
    }

    /// Explicit `nullable`, otherwise nullable unless `required`
    fn optional_nullable(&mut self, node: &RawNode, path: &str) -> bool {
        let required = self.flag(node, path, "required").unwrap_or(false);
        self.flag(node, path, "nullable").unwrap_or(!required)
    }

    fn flag(&mut self, node: &RawNode, path: &str, name: &str) -> Option<bool> {
        match node.flag(name)? {
            Ok(value) => Some(value),
            Err(raw) => {
                self.invalid_attribute(
                    path,
                    node,
                    format!(
                        "Attribute '{}' on '{}' must be true or false, found '{}'",
                        name, node.name, raw
                    ),
                );
                None
            }
        }
    }

    /// `key` and `name` only apply to scalar and reference members
    fn reject_scalar_flags(&mut self, node: &RawNode, path: &str) {
        for attribute in ["key", "name"] {
            if node.attribute(attribute).is_some() {
                self.invalid_attribute(
                    path,
                    node,
                    format!(
                        "Attribute '{}' is not allowed on {} member '{}'",
                        attribute,
                        node.type_tag(),
                        node.name
                    ),
                );
            }
        }
    }

    // --- Reporting ---

    fn check_name(&mut self, name: &str, path: &str, node: &RawNode) {
        if !is_identifier(name) {
            self.diagnostics.report(
                path.to_string(),
                DiagnosticCode::InvalidName,
                node.source_location(),
                format!("'{}' is not a valid physical name", name),
            );
        }
    }

    fn invalid_attribute(&mut self, path: &str, node: &RawNode, message: String) {
        self.diagnostics.report(
            path.to_string(),
            DiagnosticCode::InvalidAttribute,
            node.source_location(),
            message,
        );
    }

    fn unknown_tag(&mut self, node: &RawNode, path: &str) {
        self.diagnostics.report(
            path.to_string(),
            DiagnosticCode::UnknownTypeTag,
            node.source_location(),
            format!("Unknown type '{}' on '{}'", node.type_tag(), node.name),
        );
    }
}

fn display_name_of(node: &RawNode) -> String {
    node.attribute("display-name")
        .unwrap_or(&node.name)
        .to_string()
}
