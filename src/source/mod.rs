//! Schema Sources
//!
//! The compiler consumes a raw node tree: every node has a type tag, an
//! attribute map and ordered children. Where the tree came from does not
//! matter to the core:
//! - JSON documents on disk or in memory (see [`loader`])
//! - Trees assembled in Rust code with [`NodeBuilder`]
//!
//! Both satisfy [`SchemaSource`], which is the only thing the parser sees.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub use loader::{load_directory, load_file, load_str, JsonSource, LoadConfig};

/// Type tag of the document root node
pub const DOCUMENT_TAG: &str = "schema";

// =============================================================================
// Source Location
// =============================================================================

/// Where a node was declared.
///
/// Locations are structural rather than line based: the file (when known),
/// the chain of node names from the document root, and the node's position
/// among its siblings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Node names from the document root, e.g. `/Order/Lines/LineNo`
    pub node_path: String,
    /// Index among siblings
    pub index: usize,
}

impl SourceLocation {
    pub fn new(file: Option<PathBuf>, node_path: impl Into<String>, index: usize) -> Self {
        Self {
            file,
            node_path: node_path.into(),
            index,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}#{}", file.display(), self.node_path, self.index),
            None => write!(f, "{}#{}", self.node_path, self.index),
        }
    }
}

// =============================================================================
// Raw Node
// =============================================================================

/// One node of the raw schema tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNode {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RawNode>,
    #[serde(skip)]
    pub location: SourceLocation,
}

impl RawNode {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            location: SourceLocation::default(),
        }
    }

    /// The node's type tag
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Attribute value by name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Boolean attribute (`"true"` / `"false"`); `None` when absent
    pub fn flag(&self, name: &str) -> Option<Result<bool, String>> {
        self.attribute(name).map(|value| match value.trim() {
            "true" | "" => Ok(true),
            "false" => Ok(false),
            other => Err(other.to_string()),
        })
    }

    pub fn children(&self) -> &[RawNode] {
        &self.children
    }

    pub fn source_location(&self) -> &SourceLocation {
        &self.location
    }

    /// Assign structural locations to this node and all descendants
    pub fn assign_locations(&mut self, file: Option<&PathBuf>) {
        fn walk(node: &mut RawNode, file: Option<&PathBuf>, parent_path: &str, index: usize) {
            let node_path = if node.type_tag == DOCUMENT_TAG {
                String::new()
            } else {
                format!("{}/{}", parent_path, node.name)
            };
            node.location = SourceLocation::new(file.cloned(), node_path.clone(), index);
            for (i, child) in node.children.iter_mut().enumerate() {
                walk(child, file, &node_path, i);
            }
        }
        walk(self, file, "", 0);
    }
}

// =============================================================================
// Schema Source
// =============================================================================

/// Anything that can hand the parser a raw node tree
pub trait SchemaSource {
    /// Human-readable origin (file path, "builder", ...)
    fn origin(&self) -> String;

    /// The document root node (type tag [`DOCUMENT_TAG`])
    fn root(&self) -> &RawNode;
}

impl SchemaSource for RawNode {
    fn origin(&self) -> String {
        self.location
            .file
            .as_ref()
            .map(|f| f.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string())
    }

    fn root(&self) -> &RawNode {
        self
    }
}

// =============================================================================
// Node Builder
// =============================================================================

/// Builds a raw tree from Rust code.
///
/// ```
/// use aggregate_schema::source::NodeBuilder;
///
/// let doc = NodeBuilder::document()
///     .child(
///         NodeBuilder::new("Product", "data-aggregate")
///             .child(NodeBuilder::new("ProductId", "int").attr("key", "true")),
///     )
///     .build();
/// assert_eq!(doc.children.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    node: RawNode,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            node: RawNode::new(name, type_tag),
        }
    }

    /// A document root
    pub fn document() -> Self {
        Self::new("", DOCUMENT_TAG)
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.node.attributes.insert(name.into(), value.into());
        self
    }

    /// Shorthand for `attr("key", "true")`
    pub fn key(self) -> Self {
        self.attr("key", "true")
    }

    pub fn child(mut self, child: NodeBuilder) -> Self {
        self.node.children.push(child.node);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = NodeBuilder>) -> Self {
        self.node.children.extend(children.into_iter().map(|c| c.node));
        self
    }

    pub fn build(mut self) -> RawNode {
        self.node.assign_locations(None);
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assigns_locations() {
        let doc = NodeBuilder::document()
            .child(
                NodeBuilder::new("Order", "data-aggregate")
                    .child(NodeBuilder::new("OrderId", "int").key()),
            )
            .build();

        let order = &doc.children[0];
        assert_eq!(order.location.node_path, "/Order");
        assert_eq!(order.children[0].location.node_path, "/Order/OrderId");
        assert_eq!(order.children[0].attribute("key"), Some("true"));
    }

    #[test]
    fn test_flag_parsing() {
        let node = RawNode::new("X", "int");
        assert!(node.flag("key").is_none());

        let node = NodeBuilder::new("X", "int").attr("key", "false").build();
        assert_eq!(node.flag("key"), Some(Ok(false)));

        let node = NodeBuilder::new("X", "int").attr("key", "yes").build();
        assert_eq!(node.flag("key"), Some(Err("yes".to_string())));
    }
}
