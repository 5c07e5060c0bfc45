//! JSON Schema Documents
//!
//! Loads raw node trees from JSON text, files and directories.
//!
//! A document is one node object with type `schema`:
//! ```json
//! { "name": "sales", "type": "schema", "children": [
//!     { "name": "Order", "type": "data-aggregate", "children": [
//!         { "name": "OrderId", "type": "int", "attributes": { "key": "true" } }
//!     ] },
//!     { "name": "more", "type": "include", "attributes": { "path": "catalog.schema.json" } }
//! ] }
//! ```
//! `include` nodes are replaced by the top-level nodes of the referenced
//! document, resolved relative to the including file.

use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{RawNode, SchemaSource, DOCUMENT_TAG};
use crate::error::{CompileError, Result};
use crate::graph::parser::INCLUDE_TAG;

/// Configuration for directory loading
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// File name suffix of schema documents
    pub suffix: String,
    /// Skip files whose relative path starts with one of these
    pub skip_prefixes: Vec<String>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            suffix: ".schema.json".to_string(),
            skip_prefixes: vec![
                "target/".to_string(),
                ".git/".to_string(),
                "node_modules/".to_string(),
            ],
        }
    }
}

/// A schema loaded from JSON
#[derive(Debug, Clone)]
pub struct JsonSource {
    origin: String,
    root: RawNode,
}

impl JsonSource {
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self {
            origin: path.display().to_string(),
            root: load_file(path)?,
        })
    }

    pub fn from_directory(dir: &Path, config: &LoadConfig) -> Result<Self> {
        Ok(Self {
            origin: dir.display().to_string(),
            root: load_directory(dir, config)?,
        })
    }

    /// Load a file or, for a directory, every schema document inside it
    pub fn from_path(path: &Path) -> Result<Self> {
        if path.is_dir() {
            Self::from_directory(path, &LoadConfig::default())
        } else {
            Self::from_file(path)
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(Self {
            origin: "<memory>".to_string(),
            root: load_str(text, None)?,
        })
    }
}

impl SchemaSource for JsonSource {
    fn origin(&self) -> String {
        self.origin.clone()
    }

    fn root(&self) -> &RawNode {
        &self.root
    }
}

/// Parse one document. Includes resolve against the directory of `origin`
/// (or the working directory when there is none).
pub fn load_str(text: &str, origin: Option<&Path>) -> Result<RawNode> {
    let mut stack = Vec::new();
    if let Some(origin) = origin {
        stack.push(origin.to_path_buf());
    }
    parse_document(text, origin, &mut stack)
}

/// Load one document file with its includes
pub fn load_file(path: &Path) -> Result<RawNode> {
    let canonical = path.canonicalize()?;
    let text = std::fs::read_to_string(&canonical)?;
    let mut stack = vec![canonical.clone()];
    let root = parse_document(&text, Some(&canonical), &mut stack)?;
    debug!(path = %path.display(), nodes = root.children.len(), "loaded schema document");
    Ok(root)
}

/// Load every schema document under `dir`, merging their top-level nodes in
/// sorted path order
#[tracing::instrument(skip(config))]
pub fn load_directory(dir: &Path, config: &LoadConfig) -> Result<RawNode> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !file_name.ends_with(&config.suffix) {
            continue;
        }
        let relative = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        if config.skip_prefixes.iter().any(|p| relative.starts_with(p)) {
            continue;
        }
        files.push((relative, path.to_path_buf()));
    }
    files.sort();

    let mut merged = RawNode::new(
        dir.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("schema"),
        DOCUMENT_TAG,
    );
    for (_, path) in &files {
        let document = load_file(path)?;
        merged.children.extend(document.children);
    }

    info!(files = files.len(), nodes = merged.children.len(), "loaded schema directory");
    Ok(merged)
}

fn parse_document(text: &str, origin: Option<&Path>, stack: &mut Vec<PathBuf>) -> Result<RawNode> {
    let mut root: RawNode = serde_json::from_str(text)?;
    if root.type_tag != DOCUMENT_TAG {
        return Err(CompileError::InvalidDocument {
            path: describe(origin),
            message: format!(
                "root node must have type '{}', found '{}'",
                DOCUMENT_TAG, root.type_tag
            ),
        });
    }
    root.assign_locations(origin.map(Path::to_path_buf).as_ref());

    let base = origin
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    expand_includes(&mut root, &base, stack)?;
    Ok(root)
}

/// Replace `include` nodes (at any depth) with the included top-level nodes
fn expand_includes(node: &mut RawNode, base: &Path, stack: &mut Vec<PathBuf>) -> Result<()> {
    let mut expanded = Vec::with_capacity(node.children.len());
    for mut child in std::mem::take(&mut node.children) {
        if child.type_tag != INCLUDE_TAG {
            expand_includes(&mut child, base, stack)?;
            expanded.push(child);
            continue;
        }

        let relative = child.attribute("path").ok_or_else(|| CompileError::InvalidDocument {
            path: child.location.to_string(),
            message: "include node needs a 'path' attribute".to_string(),
        })?;
        let target = base.join(relative);
        let canonical = target
            .canonicalize()
            .map_err(|_| CompileError::IncludeNotFound(target.display().to_string()))?;
        if stack.contains(&canonical) {
            return Err(CompileError::InvalidDocument {
                path: canonical.display().to_string(),
                message: "include cycle".to_string(),
            });
        }

        let text = std::fs::read_to_string(&canonical)?;
        stack.push(canonical.clone());
        let included = parse_document(&text, Some(&canonical), stack)?;
        stack.pop();
        expanded.extend(included.children);
    }
    node.children = expanded;
    Ok(())
}

fn describe(origin: Option<&Path>) -> String {
    origin
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<memory>".to_string())
}
