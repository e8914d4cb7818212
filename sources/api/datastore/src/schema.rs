//! The schema oracle answers type questions about locations in the config tree, and converts
//! subtrees between raw JSON and their validated, schema-typed form.
//!
//! `ModelSchema` is a data-driven oracle: the schema is a tree of nodes loaded from a JSON
//! document, much like a compiled YANG entry tree.

use crate::error::{self, Result};
use crate::value;
use apitypes::{ModelData, Path, PathElem};
use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::{BTreeMap, HashSet};
use std::fs;

/// The type of a leaf value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "base", rename_all = "kebab-case")]
pub enum ScalarKind {
    String,
    Int { bits: u8 },
    Uint { bits: u8 },
    Bool,
    Decimal,
    Enumeration { values: Vec<String> },
    Binary,
}

/// The closed set of answers to "what is at this location?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaKind {
    Leaf(ScalarKind),
    LeafList(ScalarKind),
    Container,
    KeyedList(Vec<String>),
}

/// One node of the schema tree.  The module is inherited from the parent when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SchemaNode {
    Container {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        #[serde(default)]
        children: BTreeMap<String, SchemaNode>,
    },
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        keys: Vec<String>,
        #[serde(default)]
        children: BTreeMap<String, SchemaNode>,
    },
    Leaf {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        #[serde(rename = "type")]
        scalar: ScalarKind,
    },
    LeafList {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        #[serde(rename = "type")]
        scalar: ScalarKind,
    },
}

impl SchemaNode {
    pub fn kind(&self) -> SchemaKind {
        match self {
            SchemaNode::Container { .. } => SchemaKind::Container,
            SchemaNode::List { keys, .. } => SchemaKind::KeyedList(keys.clone()),
            SchemaNode::Leaf { scalar, .. } => SchemaKind::Leaf(scalar.clone()),
            SchemaNode::LeafList { scalar, .. } => SchemaKind::LeafList(scalar.clone()),
        }
    }

    pub fn module(&self) -> Option<&str> {
        match self {
            SchemaNode::Container { module, .. }
            | SchemaNode::List { module, .. }
            | SchemaNode::Leaf { module, .. }
            | SchemaNode::LeafList { module, .. } => module.as_deref(),
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, SchemaNode>> {
        match self {
            SchemaNode::Container { children, .. } | SchemaNode::List { children, .. } => {
                Some(children)
            }
            _ => None,
        }
    }

    /// Finds a child by name; a module-qualified name matches the bare child name.
    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        self.children()?.get(local_name(name))
    }

    pub fn list_keys(&self) -> Option<&[String]> {
        match self {
            SchemaNode::List { keys, .. } => Some(keys),
            _ => None,
        }
    }

    /// The value type of a leaf or leaf-list.
    pub fn scalar(&self) -> Option<&ScalarKind> {
        match self {
            SchemaNode::Leaf { scalar, .. } | SchemaNode::LeafList { scalar, .. } => Some(scalar),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, SchemaNode::List { .. })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, SchemaNode::Leaf { .. } | SchemaNode::LeafList { .. })
    }
}

/// Strips a `module:` qualifier from a member or element name.
pub fn local_name(name: &str) -> &str {
    name.split_once(':').map(|(_, n)| n).unwrap_or(name)
}

/// Renders a sequence of path elements for messages.
pub fn path_string(elems: &[PathElem]) -> String {
    Path::new(elems.to_vec()).to_string()
}

fn join(at: &str, name: &str) -> String {
    if at == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", at, name)
    }
}

/// A subtree that has been checked against the schema at `location`.  If the last element of the
/// location carries keys, `data` is one list entry; a keyed list addressed without keys holds an
/// array of entries.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedConfig {
    pub location: Vec<PathElem>,
    pub data: Value,
}

impl TypedConfig {
    pub fn root(data: Value) -> Self {
        Self {
            location: Vec::new(),
            data,
        }
    }

    pub fn is_root(&self) -> bool {
        self.location.is_empty()
    }

    fn is_entry(&self) -> bool {
        self.location.last().map(PathElem::is_keyed).unwrap_or(false)
    }
}

/// Member naming for marshaled JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    /// Module-qualified names (RFC 7951), where the module changes and at the top of the subtree.
    Ietf,
    /// Bare member names.
    Internal,
}

/// Answers type questions about tree locations and converts subtrees to and from their
/// schema-typed form.
pub trait SchemaOracle: Send + Sync {
    /// The schema modules this oracle covers.
    fn models(&self) -> &[ModelData];

    fn root(&self) -> &SchemaNode;

    /// Finds the schema node for a location.  Keys are ignored except that they may only appear
    /// on keyed lists, and only name key leaves.
    fn resolve(&self, path: &[PathElem]) -> Option<&SchemaNode>;

    fn resolve_type(&self, path: &[PathElem]) -> Option<SchemaKind> {
        self.resolve(path).map(SchemaNode::kind)
    }

    fn supports_model(&self, model: &ModelData) -> bool {
        self.models().iter().any(|m| m == model)
    }

    /// Parses a JSON payload for the given location into its schema-typed form.
    fn unmarshal(&self, location: &[PathElem], json: &[u8]) -> Result<TypedConfig>;

    /// Checks ranges, enumerations, and list keys.
    fn validate(&self, config: &TypedConfig) -> Result<()>;

    fn marshal(&self, config: &TypedConfig, naming: Naming) -> Result<Value>;
}

#[derive(Debug, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    models: Vec<ModelData>,
    root: SchemaNode,
}

/// A schema oracle backed by a schema tree loaded from JSON.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    models: Vec<ModelData>,
    root: SchemaNode,
}

impl ModelSchema {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: SchemaDocument = serde_json::from_str(json).context(error::SchemaParseSnafu)?;
        ensure!(
            matches!(doc.root, SchemaNode::Container { .. }),
            error::SchemaRootSnafu
        );
        check_schema_node(&doc.root, "/")?;
        Ok(Self {
            models: doc.models,
            root: doc.root,
        })
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).context(error::SchemaReadSnafu { path })?;
        Self::from_json_str(&json)
    }

    /// Walks the schema, tracking the effective module of each node along the way.
    fn walk(&self, path: &[PathElem]) -> Option<(&SchemaNode, Option<&str>)> {
        let mut node = &self.root;
        let mut module = self.root.module();
        for elem in path {
            let child = node.child(&elem.name)?;
            if elem.is_keyed() {
                let keys = child.list_keys()?;
                if !elem.keys.keys().all(|k| keys.contains(k)) {
                    return None;
                }
            }
            module = child.module().or(module);
            node = child;
        }
        Some((node, module))
    }

    fn walk_or_fail(&self, path: &[PathElem]) -> Result<(&SchemaNode, Option<&str>)> {
        self.walk(path).context(error::NotFoundSnafu {
            path: path_string(path),
        })
    }
}

/// List keys have to name leaves of the list.
fn check_schema_node(node: &SchemaNode, at: &str) -> Result<()> {
    if let SchemaNode::List { keys, children, .. } = node {
        ensure!(
            !keys.is_empty(),
            error::ValidationSnafu {
                path: at,
                msg: "schema list has no keys",
            }
        );
        for key in keys {
            ensure!(
                matches!(children.get(key), Some(SchemaNode::Leaf { .. })),
                error::ValidationSnafu {
                    path: at,
                    msg: format!("schema list key '{}' is not a leaf of the list", key),
                }
            );
        }
    }
    if let Some(children) = node.children() {
        for (name, child) in children {
            check_schema_node(child, &join(at, name))?;
        }
    }
    Ok(())
}

impl SchemaOracle for ModelSchema {
    fn models(&self) -> &[ModelData] {
        &self.models
    }

    fn root(&self) -> &SchemaNode {
        &self.root
    }

    fn resolve(&self, path: &[PathElem]) -> Option<&SchemaNode> {
        self.walk(path).map(|(node, _)| node)
    }

    fn unmarshal(&self, location: &[PathElem], json: &[u8]) -> Result<TypedConfig> {
        let (node, _) = self.walk_or_fail(location)?;
        let raw: Value = serde_json::from_slice(json).context(error::InvalidJsonSnafu)?;
        let entry = location.last().map(PathElem::is_keyed).unwrap_or(false);
        trace!("Unmarshaling payload at {}", path_string(location));
        let data = canonicalize(node, raw, &path_string(location), entry)?;
        Ok(TypedConfig {
            location: location.to_vec(),
            data,
        })
    }

    fn validate(&self, config: &TypedConfig) -> Result<()> {
        let (node, _) = self.walk_or_fail(&config.location)?;
        validate_node(
            node,
            &config.data,
            &path_string(&config.location),
            config.is_entry(),
        )
    }

    fn marshal(&self, config: &TypedConfig, naming: Naming) -> Result<Value> {
        let (node, module) = self.walk_or_fail(&config.location)?;
        Ok(emit(
            node,
            &config.data,
            naming,
            module,
            true,
            config.is_entry(),
        ))
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

// Unmarshal

fn canonicalize(node: &SchemaNode, raw: Value, at: &str, entry: bool) -> Result<Value> {
    match node {
        SchemaNode::Container { children, .. } => canonicalize_members(children, raw, at),
        SchemaNode::List { children, .. } if entry => canonicalize_members(children, raw, at),
        SchemaNode::List { children, .. } => match raw {
            Value::Array(entries) => entries
                .into_iter()
                .map(|e| canonicalize_members(children, e, at))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => error::InvalidValueSnafu {
                path: at,
                msg: format!("expected a list, got {}", other),
            }
            .fail(),
        },
        SchemaNode::Leaf { scalar, .. } => value::canonical_scalar(raw, scalar, at),
        SchemaNode::LeafList { scalar, .. } => match raw {
            Value::Array(items) => items
                .into_iter()
                .map(|v| value::canonical_scalar(v, scalar, at))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => error::InvalidValueSnafu {
                path: at,
                msg: format!("expected a leaf-list, got {}", other),
            }
            .fail(),
        },
    }
}

fn canonicalize_members(
    children: &BTreeMap<String, SchemaNode>,
    raw: Value,
    at: &str,
) -> Result<Value> {
    let members = match raw {
        Value::Object(members) => members,
        other => {
            return error::InvalidValueSnafu {
                path: at,
                msg: format!("expected an object, got {}", other),
            }
            .fail()
        }
    };

    let mut out = Map::new();
    for (name, v) in members {
        let bare = local_name(&name);
        let child = children.get(bare).context(error::UnknownFieldSnafu {
            path: at,
            field: name.as_str(),
        })?;
        ensure!(
            !v.is_null(),
            error::InvalidValueSnafu {
                path: join(at, bare),
                msg: "null value",
            }
        );
        let canonical = canonicalize(child, v, &join(at, bare), false)?;
        out.insert(bare.to_string(), canonical);
    }
    Ok(Value::Object(out))
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

// Validate

fn validate_node(node: &SchemaNode, data: &Value, at: &str, entry: bool) -> Result<()> {
    match node {
        SchemaNode::Container { children, .. } => validate_members(children, data, at),
        // A single entry takes its keys from the path it's written at, so they may be absent.
        SchemaNode::List { children, .. } if entry => validate_members(children, data, at),
        SchemaNode::List { keys, children, .. } => {
            let entries = data.as_array().context(error::ValidationSnafu {
                path: at,
                msg: "expected a list",
            })?;
            let mut seen = HashSet::new();
            for e in entries {
                let tuple = check_keys_present(keys, e, at)?;
                let entry_at = format!("{}[{}]", at, tuple.join(","));
                ensure!(
                    seen.insert(tuple),
                    error::ValidationSnafu {
                        path: entry_at,
                        msg: "duplicate list key",
                    }
                );
                validate_members(children, e, &entry_at)?;
            }
            Ok(())
        }
        SchemaNode::Leaf { scalar, .. } => value::check_scalar(data, scalar, at),
        SchemaNode::LeafList { scalar, .. } => {
            let items = data.as_array().context(error::ValidationSnafu {
                path: at,
                msg: "expected a leaf-list",
            })?;
            items
                .iter()
                .try_for_each(|v| value::check_scalar(v, scalar, at))
        }
    }
}

/// Returns the stringified key tuple of a list entry.
fn check_keys_present(keys: &[String], entry: &Value, at: &str) -> Result<Vec<String>> {
    let members = entry.as_object().context(error::ValidationSnafu {
        path: at,
        msg: "list entry is not an object",
    })?;
    keys.iter()
        .map(|k| {
            members
                .get(k)
                .map(value::key_string)
                .context(error::ValidationSnafu {
                    path: at,
                    msg: format!("list entry is missing key '{}'", k),
                })
        })
        .collect()
}

fn validate_members(children: &BTreeMap<String, SchemaNode>, data: &Value, at: &str) -> Result<()> {
    let members = data.as_object().context(error::ValidationSnafu {
        path: at,
        msg: "expected an object",
    })?;
    for (name, v) in members {
        let child = children.get(name).context(error::UnknownFieldSnafu {
            path: at,
            field: name.as_str(),
        })?;
        validate_node(child, v, &join(at, name), false)?;
    }
    Ok(())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

// Marshal

/// `module` is the effective module of `node`.  With IETF naming, members at the top of the
/// emitted subtree are always qualified; below that, only where the module changes.
fn emit(
    node: &SchemaNode,
    data: &Value,
    naming: Naming,
    module: Option<&str>,
    top: bool,
    entry: bool,
) -> Value {
    match (node, data) {
        (SchemaNode::List { .. }, Value::Array(entries)) if !entry => Value::Array(
            entries
                .iter()
                .map(|e| emit(node, e, naming, module, top, true))
                .collect(),
        ),
        (SchemaNode::Container { children, .. }, Value::Object(members))
        | (SchemaNode::List { children, .. }, Value::Object(members)) => {
            let mut out = Map::new();
            for (name, v) in members {
                let child = match children.get(name) {
                    Some(child) => child,
                    None => {
                        out.insert(name.clone(), v.clone());
                        continue;
                    }
                };
                let child_module = child.module().or(module);
                let qualified = match (naming, child_module) {
                    (Naming::Ietf, Some(m)) if top || child_module != module => {
                        format!("{}:{}", m, name)
                    }
                    _ => name.clone(),
                };
                out.insert(qualified, emit(child, v, naming, child_module, false, false));
            }
            Value::Object(out)
        }
        _ => data.clone(),
    }
}
