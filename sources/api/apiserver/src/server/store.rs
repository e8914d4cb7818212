//! The store owns the committed config tree and implements Capabilities, Get, and the Set
//! transaction on top of it.
//!
//! A set works on a copy of the committed tree.  Each operation is applied to the copy, the copy
//! is checked against the schema, and the device callback (if any) gets to see the candidate;
//! only if every operation succeeds does the copy replace the committed tree.  Readers never see
//! a partly applied set, since the whole transaction holds the write lock.

use super::apply::DeviceCallback;
use super::error::{self, Result};
use apitypes::{
    CapabilityResponse, DataType, Encoding, GetRequest, GetResponse, ModelData, Notification,
    Operation, Path, PathElem, SetRequest, SetResponse, TypedValue, Update, UpdateResult,
};
use datastore::schema::local_name;
use datastore::{navigator, value, Naming, SchemaKind, SchemaNode, SchemaOracle, TypedConfig};
use log::{debug, trace, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use snafu::{ensure, OptionExt, ResultExt};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

/// The protocol version we advertise.
pub const GNMI_VERSION: &str = "0.7.0";

/// Encodings accepted in Get and Subscribe requests.
pub const SUPPORTED_ENCODINGS: &[Encoding] = &[Encoding::Json, Encoding::JsonIetf];

pub struct Store<S> {
    schema: S,
    tree: RwLock<Value>,
    callback: Option<Box<dyn DeviceCallback>>,
}

impl<S: SchemaOracle> Store<S> {
    /// Creates a store holding the given initial config, or an empty tree.  If there's both an
    /// initial config and a callback, the device is sent the initial config first.
    pub fn new(
        schema: S,
        initial: Option<&[u8]>,
        callback: Option<Box<dyn DeviceCallback>>,
    ) -> Result<Self> {
        let tree = match initial {
            Some(json) => {
                let config = schema
                    .unmarshal(&[], json)
                    .context(error::InitialConfigSnafu)?;
                schema.validate(&config).context(error::InitialConfigSnafu)?;
                if let Some(callback) = &callback {
                    debug!("Sending initial config to device");
                    callback.apply(&config).context(error::InitialApplySnafu)?;
                }
                config.data
            }
            None => Value::Object(Map::new()),
        };

        Ok(Self {
            schema,
            tree: RwLock::new(tree),
            callback,
        })
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }

    pub fn capabilities(&self) -> CapabilityResponse {
        CapabilityResponse {
            supported_models: self.schema.models().to_vec(),
            supported_encodings: SUPPORTED_ENCODINGS.to_vec(),
            gnmi_version: GNMI_VERSION.to_string(),
        }
    }

    /// Makes sure we can serve the given encoding, and that we know every requested model.
    pub fn check_encoding_and_models(
        &self,
        encoding: Encoding,
        models: &[ModelData],
    ) -> Result<()> {
        ensure!(
            SUPPORTED_ENCODINGS.contains(&encoding),
            error::UnsupportedEncodingSnafu { encoding }
        );
        for model in models {
            ensure!(
                self.schema.supports_model(model),
                error::UnsupportedModelSnafu {
                    model: format!(
                        "{} (organization '{}', version '{}')",
                        model.name, model.organization, model.version
                    ),
                }
            );
        }
        Ok(())
    }

    /// Returns one notification per requested path.  All paths are read under one read lock, and
    /// if any of them isn't there, the whole request fails.
    pub fn get(&self, req: &GetRequest) -> Result<GetResponse> {
        ensure!(
            req.data_type == DataType::All,
            error::UnsupportedDataTypeSnafu {
                data_type: req.data_type
            }
        );
        self.check_encoding_and_models(req.encoding, &req.use_models)?;

        let tree = self.read_tree()?;
        let mut notification = Vec::with_capacity(req.path.len());
        for path in &req.path {
            let full = Path::full_path(req.prefix.as_ref(), path);
            let at = full.to_string();
            trace!("Looking up {}", at);

            let (node, node_schema) = match navigator::lookup(&tree, self.schema.root(), &full.elem)
            {
                Ok(Some(found)) => found,
                Ok(None) => return error::PathNotFoundSnafu { path: at }.fail(),
                Err(e) => {
                    debug!("Path {} isn't in the schema: {}", at, e);
                    return error::PathNotFoundSnafu { path: at }.fail();
                }
            };

            let val = match node_schema.scalar() {
                Some(scalar) => {
                    value::from_scalar(node, scalar, &at).context(error::ReadValueSnafu {
                        path: &at,
                    })?
                }
                None => {
                    ensure!(
                        req.use_models.is_empty(),
                        error::UseModelsSnafu { path: &at }
                    );
                    self.encode_subtree(&full.elem, node, req.encoding, &at)?
                }
            };

            notification.push(Notification {
                timestamp: timestamp(),
                prefix: req.prefix.clone(),
                update: vec![Update {
                    path: path.clone(),
                    val,
                }],
                delete: Vec::new(),
            });
        }

        Ok(GetResponse { notification })
    }

    /// JSON encoding gets bare member names; anything else gets module-qualified names.
    fn encode_subtree(
        &self,
        location: &[PathElem],
        node: &Value,
        encoding: Encoding,
        at: &str,
    ) -> Result<TypedValue> {
        let naming = match encoding {
            Encoding::Json => Naming::Internal,
            _ => Naming::Ietf,
        };
        let config = TypedConfig {
            location: location.to_vec(),
            data: node.clone(),
        };
        let json = self
            .schema
            .marshal(&config, naming)
            .context(error::ReadValueSnafu { path: at })?;
        let bytes = serde_json::to_vec(&json).context(error::EncodeSnafu { path: at })?;
        Ok(match naming {
            Naming::Internal => TypedValue::JsonVal(bytes),
            Naming::Ietf => TypedValue::JsonIetfVal(bytes),
        })
    }

    /// Applies deletes, then replaces, then updates, each in request order, to a copy of the
    /// committed tree.  The copy is committed only if every operation succeeds.
    pub fn set(&self, req: &SetRequest) -> Result<SetResponse> {
        let mut committed = self.write_tree()?;
        let mut working = committed.as_object().cloned().unwrap_or_default();
        let prefix = req.prefix.as_ref();
        let mut response = Vec::new();

        for path in &req.delete {
            let full = Path::full_path(prefix, path);
            debug!("Deleting {}", full);
            if self.apply_delete(&mut working, &full)? {
                self.apply_to_device(&working, &committed)?;
            }
            response.push(UpdateResult {
                path: path.clone(),
                op: Operation::Delete,
            });
        }

        for (op, updates) in [
            (Operation::Replace, &req.replace),
            (Operation::Update, &req.update),
        ] {
            for update in updates {
                let full = Path::full_path(prefix, &update.path);
                debug!("Applying {:?} at {}", op, full);
                self.apply_write(&mut working, op, &full, &update.val)?;
                self.apply_to_device(&working, &committed)?;
                response.push(UpdateResult {
                    path: update.path.clone(),
                    op,
                });
            }
        }

        let config = self.rederive(&working)?;
        *committed = config.data;

        Ok(SetResponse {
            prefix: req.prefix.clone(),
            response,
            timestamp: timestamp(),
        })
    }

    /// Writes one value into the committed tree without involving the device, for state that
    /// the device reports rather than config we push to it.
    pub fn update_state(&self, path: &Path, val: &TypedValue) -> Result<()> {
        let mut committed = self.write_tree()?;
        let mut working = committed.as_object().cloned().unwrap_or_default();
        self.apply_write(&mut working, Operation::Update, path, val)?;
        let config = self.rederive(&working)?;
        *committed = config.data;
        Ok(())
    }

    /// Runs `f` against a copy of the committed tree while holding the write lock; the result
    /// is committed if it's still valid.
    pub fn internal_update<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Value) -> T,
    {
        let mut committed = self.write_tree()?;
        let mut working = committed.clone();
        let out = f(&mut working);
        ensure!(working.is_object(), error::RootValueSnafu);
        let config = self.rederive(&working)?;
        *committed = config.data;
        Ok(out)
    }

    /// A copy of the committed tree.
    pub fn config(&self) -> Result<Value> {
        Ok(self.read_tree()?.clone())
    }

    pub(crate) fn read_tree(&self) -> Result<RwLockReadGuard<'_, Value>> {
        self.tree.read().ok().context(error::TreeLockSnafu)
    }

    fn write_tree(&self) -> Result<RwLockWriteGuard<'_, Value>> {
        self.tree.write().ok().context(error::TreeLockSnafu)
    }

    /// Flattens everything matching `path` into one update per leaf.  An element naming a keyed
    /// list without keys matches every entry.  Nothing matching is an error.
    pub(crate) fn leaf_updates(&self, tree: &Value, path: &Path) -> Result<Vec<Update>> {
        let at = path.to_string();
        let found = match navigator::lookup_wildcard(tree, self.schema.root(), &path.elem) {
            Ok(found) => found,
            Err(e) => {
                debug!("Path {} isn't in the schema: {}", at, e);
                return error::PathNotFoundSnafu { path: at }.fail();
            }
        };
        ensure!(!found.is_empty(), error::PathNotFoundSnafu { path: at });

        let mut updates = Vec::new();
        for located in found {
            for leaf in navigator::leaves(located.value, located.schema, &located.path) {
                let leaf_at = leaf.path.to_string();
                let scalar = leaf.schema.scalar().context(error::NodeTypeSnafu {
                    path: &leaf_at,
                    msg: "not a leaf",
                })?;
                let val = value::from_scalar(leaf.value, scalar, &leaf_at)
                    .context(error::ReadValueSnafu { path: &leaf_at })?;
                updates.push(Update {
                    path: leaf.path,
                    val,
                });
            }
        }
        Ok(updates)
    }

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    /// Removes the node at `path` from the working tree.  Returns whether anything was removed;
    /// a path that isn't there is not an error.
    fn apply_delete(&self, working: &mut Map<String, Value>, path: &Path) -> Result<bool> {
        let (parent, last) = match path.split_last() {
            Some(split) => split,
            None => {
                let removed = !working.is_empty();
                working.clear();
                return Ok(removed);
            }
        };

        let mut node = &mut *working;
        let mut schema = self.schema.root();
        for elem in parent {
            match navigator::descend(node, schema, elem, false) {
                Ok(Some((Value::Object(members), child_schema))) => {
                    node = members;
                    schema = child_schema;
                }
                Ok(_) => return Ok(false),
                Err(e) => {
                    debug!("Nothing to delete at {}: {}", path, e);
                    return Ok(false);
                }
            }
        }

        let removed = if last.is_keyed() {
            navigator::delete_list_entry(node, last).context(error::NavigateSnafu {
                path: path.to_string(),
            })?
        } else {
            node.remove(local_name(&last.name)).is_some()
        };
        // Containers the delete left empty go with it.
        if removed {
            navigator::prune_path(working, self.schema.root(), parent).context(
                error::NavigateSnafu {
                    path: path.to_string(),
                },
            )?;
        }
        Ok(removed)
    }

    /// Replaces or updates the node at `path` with `val`, creating whatever is missing on the
    /// way.  The value is checked against the schema at `path` first.
    fn apply_write(
        &self,
        working: &mut Map<String, Value>,
        op: Operation,
        path: &Path,
        val: &TypedValue,
    ) -> Result<()> {
        let at = path.to_string();
        ensure!(
            !path.is_root() || op == Operation::Replace,
            error::RootUpdateSnafu
        );

        let kind = self
            .schema
            .resolve_type(&path.elem)
            .context(error::NoSchemaSnafu { path: &at })?;
        let payload = match kind {
            SchemaKind::Leaf(_) | SchemaKind::LeafList(_) => {
                let scalar =
                    value::to_scalar(val, &at).context(error::InvalidValueSnafu { path: &at })?;
                serde_json::to_vec(&scalar).context(error::EncodeSnafu { path: &at })?
            }
            SchemaKind::Container | SchemaKind::KeyedList(_) => val
                .json_bytes()
                .context(error::ExpectedJsonSnafu { path: &at })?
                .to_vec(),
        };
        let config = self
            .schema
            .unmarshal(&path.elem, &payload)
            .context(error::InvalidValueSnafu { path: &at })?;
        self.schema
            .validate(&config)
            .context(error::InvalidValueSnafu { path: &at })?;

        let (parent, last) = match path.split_last() {
            Some(split) => split,
            None => {
                *working = match config.data {
                    Value::Object(members) => members,
                    _ => return error::RootValueSnafu.fail(),
                };
                return Ok(());
            }
        };

        let mut node = working;
        let mut schema = self.schema.root();
        for elem in parent {
            let (child, child_schema) = navigator::descend(node, schema, elem, true)
                .context(error::NavigateSnafu { path: &at })?
                .context(error::PathElemNotFoundSnafu {
                    elem: elem.to_string(),
                })?;
            node = match child {
                Value::Object(members) => members,
                Value::Array(_) => {
                    return error::IncompatibleElemSnafu {
                        elem: elem.to_string(),
                    }
                    .fail()
                }
                other => {
                    return error::NodeTypeSnafu {
                        path: &at,
                        msg: format!("expected a container at '{}', found {}", elem, other),
                    }
                    .fail()
                }
            };
            schema = child_schema;
        }

        if last.is_keyed() {
            let list = schema
                .child(&last.name)
                .context(error::NoSchemaSnafu { path: &at })?;
            set_with_keys(node, list, op, last, config.data, &at)
        } else {
            set_without_keys(node, op, local_name(&last.name), config.data);
            Ok(())
        }
    }

    /// Checks the working tree as a whole and shows it to the device.  If the device rejects it,
    /// the device is sent the committed config again so it matches what we still hold.
    fn apply_to_device(&self, working: &Map<String, Value>, committed: &Value) -> Result<()> {
        let candidate = self.rederive(working)?;
        let callback = match &self.callback {
            Some(callback) => callback,
            None => return Ok(()),
        };

        if let Err(e) = callback.apply(&candidate) {
            warn!("Device rejected candidate config, restoring committed config: {}", e);
            callback
                .apply(&TypedConfig::root(committed.clone()))
                .context(error::RollbackSnafu {
                    cause: e.to_string(),
                })?;
            return Err(e).context(error::ApplySnafu);
        }
        Ok(())
    }

    /// Rebuilds the typed root config from a tree, which checks it against the schema.
    fn rederive<T: Serialize + ?Sized>(&self, tree: &T) -> Result<TypedConfig> {
        let json = serde_json::to_vec(tree).context(error::EncodeSnafu { path: "/" })?;
        let config = self
            .schema
            .unmarshal(&[], &json)
            .context(error::RederiveSnafu)?;
        self.schema.validate(&config).context(error::RederiveSnafu)?;
        Ok(config)
    }
}

/// Replace, or a field that isn't there yet, overwrites; update of an existing container merges
/// the new members into it, one level deep.
fn set_without_keys(node: &mut Map<String, Value>, op: Operation, name: &str, new: Value) {
    let merge = op == Operation::Update
        && new.is_object()
        && node.get(name).map(Value::is_object).unwrap_or(false);
    if merge {
        if let (Some(Value::Object(existing)), Value::Object(members)) = (node.get_mut(name), new)
        {
            trace!("Merging {} members into '{}'", members.len(), name);
            existing.extend(members);
        }
    } else {
        node.insert(name.to_string(), new);
    }
}

/// Writes into the list entry named by `elem`, creating it if needed.  Replace clears the entry
/// first.  Members of `new` that name a key have to agree with the key in the path.
fn set_with_keys(
    node: &mut Map<String, Value>,
    list: &SchemaNode,
    op: Operation,
    elem: &PathElem,
    new: Value,
    at: &str,
) -> Result<()> {
    let entry = navigator::find_or_create_list_entry(node, list, elem, true)
        .context(error::NavigateSnafu { path: at })?
        .context(error::PathElemNotFoundSnafu {
            elem: elem.to_string(),
        })?;
    let entry = entry.as_object_mut().context(error::NodeTypeSnafu {
        path: at,
        msg: "list entry is not an object",
    })?;
    let members = match new {
        Value::Object(members) => members,
        _ => return error::ExpectedEntrySnafu { path: at }.fail(),
    };

    if op == Operation::Replace {
        entry.clear();
    }
    for (k, v) in &elem.keys {
        let kind = list.child(k).and_then(SchemaNode::scalar);
        entry.insert(k.clone(), value::key_value(v, kind));
    }
    for (k, v) in members {
        if let Some(key) = elem.keys.get(&k) {
            ensure!(
                value::key_string(&v) == *key,
                error::KeyConflictSnafu { path: at, key: &k }
            );
        }
        entry.insert(k, v);
    }
    Ok(())
}

/// Nanoseconds since the epoch.
pub(crate) fn timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}
