//! Schema-aware traversal of a config tree held as generic JSON.
//!
//! Containers are JSON objects and keyed lists are JSON arrays of entry objects.  An entry is
//! found by comparing the stringified form of each of its key members with the keys of the path
//! element, so a stored number `10` matches the key `"10"`.  List order isn't preserved across a
//! delete.

use crate::error::{self, Result};
use crate::schema::{local_name, SchemaNode};
use crate::value::{key_string, key_value};
use apitypes::{Path, PathElem};
use log::trace;
use serde_json::{Map, Value};
use snafu::{ensure, OptionExt};
use std::collections::BTreeMap;

/// Key value that matches every entry of a list, in subscriptions.
pub const WILDCARD: &str = "*";

/// Steps from `node` to the child named by `elem`.  Returns None if the child doesn't exist and
/// `create` is false; with `create`, a missing container or list entry is added.  A name the
/// schema doesn't know is an error.
pub fn descend<'a, 'b>(
    node: &'a mut Map<String, Value>,
    schema: &'b SchemaNode,
    elem: &PathElem,
    create: bool,
) -> Result<Option<(&'a mut Value, &'b SchemaNode)>> {
    let child_schema = child_schema(schema, elem)?;

    if elem.is_keyed() {
        return Ok(find_or_create_list_entry(node, child_schema, elem, create)?
            .map(|e| (e, child_schema)));
    }

    let name = local_name(&elem.name);
    if !node.contains_key(name) {
        if !create {
            return Ok(None);
        }
        trace!("Creating container '{}'", name);
        node.insert(name.to_string(), Value::Object(Map::new()));
    }
    Ok(node.get_mut(name).map(|child| (child, child_schema)))
}

/// Finds the entry of the list named by `elem` whose key members match the element's keys.  If
/// there isn't one and `create` is true, appends a new entry holding just the keys, creating the
/// list if needed.  `list` is the list's schema, which gives the type each key is stored as.
pub fn find_or_create_list_entry<'a>(
    node: &'a mut Map<String, Value>,
    list: &SchemaNode,
    elem: &PathElem,
    create: bool,
) -> Result<Option<&'a mut Value>> {
    let name = local_name(&elem.name);
    if !node.contains_key(name) {
        if !create {
            return Ok(None);
        }
        trace!("Creating list '{}'", name);
        node.insert(name.to_string(), Value::Array(Vec::new()));
    }

    let entries = match node.get_mut(name) {
        Some(Value::Array(entries)) => entries,
        _ => {
            return error::TypeMismatchSnafu {
                path: elem.to_string(),
                msg: "expected a keyed list",
            }
            .fail()
        }
    };

    let mut found = None;
    for (i, entry) in entries.iter().enumerate() {
        let members = entry.as_object().context(error::TypeMismatchSnafu {
            path: elem.to_string(),
            msg: "list entry is not an object",
        })?;
        if entry_matches(members, &elem.keys) {
            found = Some(i);
            break;
        }
    }

    match found {
        Some(i) => Ok(entries.get_mut(i)),
        None if create => {
            trace!("Creating list entry {}", elem);
            entries.push(new_entry(list, &elem.keys));
            Ok(entries.last_mut())
        }
        None => Ok(None),
    }
}

/// Removes the entry of the list named by `elem` matching its keys.  If it was the only entry,
/// the list itself is removed from `node`.  Returns whether anything was removed.
pub fn delete_list_entry(node: &mut Map<String, Value>, elem: &PathElem) -> Result<bool> {
    let name = local_name(&elem.name);
    let list = match node.get_mut(name) {
        None => return Ok(false),
        Some(Value::Array(list)) => list,
        Some(_) => {
            return error::TypeMismatchSnafu {
                path: elem.to_string(),
                msg: "expected a keyed list",
            }
            .fail()
        }
    };

    let position = list.iter().position(|entry| {
        entry
            .as_object()
            .map(|members| entry_matches(members, &elem.keys))
            .unwrap_or(false)
    });
    let len = list.len();

    match position {
        None => Ok(false),
        Some(_) if len == 1 => {
            trace!("Removing list '{}' with its last entry", name);
            node.remove(name);
            Ok(true)
        }
        Some(i) => {
            list.swap_remove(i);
            Ok(true)
        }
    }
}

/// Removes the containers along `path` that are left empty, deepest first, as after a delete
/// below them.  Nothing off the path is touched, and list entries are never removed since they
/// hold their keys.
pub fn prune_path(
    node: &mut Map<String, Value>,
    schema: &SchemaNode,
    path: &[PathElem],
) -> Result<()> {
    let (elem, rest) = match path.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };

    let emptied = match descend(node, schema, elem, false)? {
        Some((Value::Object(members), child_schema)) => {
            prune_path(members, child_schema, rest)?;
            members.is_empty()
        }
        _ => false,
    };
    if emptied && !elem.is_keyed() {
        trace!("Removing empty container '{}'", elem);
        node.remove(local_name(&elem.name));
    }
    Ok(())
}

/// Finds the node at `path` without changing anything.  Returns None if the data isn't there.
pub fn lookup<'a, 'b>(
    tree: &'a Value,
    schema: &'b SchemaNode,
    path: &[PathElem],
) -> Result<Option<(&'a Value, &'b SchemaNode)>> {
    let mut node = tree;
    let mut schema = schema;
    for elem in path {
        let next_schema = child_schema(schema, elem)?;
        let child = match node.as_object().and_then(|m| m.get(local_name(&elem.name))) {
            Some(child) => child,
            None => return Ok(None),
        };
        node = if elem.is_keyed() {
            let entry = child.as_array().and_then(|list| {
                list.iter().find(|entry| {
                    entry
                        .as_object()
                        .map(|members| entry_matches(members, &elem.keys))
                        .unwrap_or(false)
                })
            });
            match entry {
                Some(entry) => entry,
                None => return Ok(None),
            }
        } else {
            child
        };
        schema = next_schema;
    }
    Ok(Some((node, schema)))
}

/// A node found by a wildcard lookup, with the concrete path it was found at.
#[derive(Debug, Clone, PartialEq)]
pub struct Located<'a, 'b> {
    pub path: Path,
    pub value: &'a Value,
    pub schema: &'b SchemaNode,
}

/// Like `lookup`, but an element naming a keyed list without keys, or with a key value of `*`,
/// matches every entry of the list.  Each match comes back with its concrete path.
pub fn lookup_wildcard<'a, 'b>(
    tree: &'a Value,
    schema: &'b SchemaNode,
    path: &[PathElem],
) -> Result<Vec<Located<'a, 'b>>> {
    let mut found = Vec::new();
    wildcard_step(tree, schema, path, Path::root(), &mut found)?;
    Ok(found)
}

fn wildcard_step<'a, 'b>(
    node: &'a Value,
    schema: &'b SchemaNode,
    remaining: &[PathElem],
    at: Path,
    found: &mut Vec<Located<'a, 'b>>,
) -> Result<()> {
    let (elem, rest) = match remaining.split_first() {
        Some(split) => split,
        None => {
            found.push(Located {
                path: at,
                value: node,
                schema,
            });
            return Ok(());
        }
    };

    let next_schema = child_schema(schema, elem)?;
    let name = local_name(&elem.name);
    let child = match node.as_object().and_then(|m| m.get(name)) {
        Some(child) => child,
        None => return Ok(()),
    };

    let keys = match next_schema.list_keys() {
        Some(keys) => keys,
        None => return wildcard_step(child, next_schema, rest, at.child(PathElem::new(name)), found),
    };

    // Only the non-wildcard keys constrain the match.
    let wanted: BTreeMap<String, String> = elem
        .keys
        .iter()
        .filter(|(_, v)| v.as_str() != WILDCARD)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for entry in child.as_array().into_iter().flatten() {
        let members = match entry.as_object() {
            Some(members) => members,
            None => continue,
        };
        if entry_matches(members, &wanted) {
            let concrete = entry_elem(name, keys, members);
            wildcard_step(entry, next_schema, rest, at.child(concrete), found)?;
        }
    }
    Ok(())
}

/// A leaf found while flattening a subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf<'a, 'b> {
    pub path: Path,
    pub value: &'a Value,
    pub schema: &'b SchemaNode,
}

/// Flattens the subtree at `at` into its leaves, each with its full path.  Entries of keyed lists
/// contribute their keys to the paths of the leaves below them.
pub fn leaves<'a, 'b>(value: &'a Value, schema: &'b SchemaNode, at: &Path) -> Vec<Leaf<'a, 'b>> {
    let mut out = Vec::new();
    collect_leaves(value, schema, at, &mut out);
    out
}

fn collect_leaves<'a, 'b>(
    value: &'a Value,
    schema: &'b SchemaNode,
    at: &Path,
    out: &mut Vec<Leaf<'a, 'b>>,
) {
    if schema.is_leaf() {
        out.push(Leaf {
            path: at.clone(),
            value,
            schema,
        });
        return;
    }

    match value {
        // A whole list, as a member of its parent; each entry gets its own keyed element.
        Value::Array(entries) => {
            let (parent, last) = match at.split_last() {
                Some(split) => split,
                None => return,
            };
            let keys = schema.list_keys().unwrap_or_default();
            for members in entries.iter().filter_map(Value::as_object) {
                let mut entry_path = Path::new(parent.to_vec());
                entry_path.elem.push(entry_elem(&last.name, keys, members));
                collect_members(members, schema, &entry_path, out);
            }
        }
        Value::Object(members) => collect_members(members, schema, at, out),
        _ => {}
    }
}

fn collect_members<'a, 'b>(
    members: &'a Map<String, Value>,
    schema: &'b SchemaNode,
    at: &Path,
    out: &mut Vec<Leaf<'a, 'b>>,
) {
    for (name, v) in members {
        if let Some(child) = schema.child(name) {
            collect_leaves(v, child, &at.child(PathElem::new(name.as_str())), out);
        }
    }
}

fn child_schema<'b>(schema: &'b SchemaNode, elem: &PathElem) -> Result<&'b SchemaNode> {
    let child = schema.child(&elem.name).context(error::NotFoundSnafu {
        path: elem.to_string(),
    })?;
    ensure!(
        !elem.is_keyed() || child.is_list(),
        error::NotFoundSnafu {
            path: elem.to_string(),
        }
    );
    Ok(child)
}

fn entry_matches(members: &Map<String, Value>, keys: &BTreeMap<String, String>) -> bool {
    keys.iter().all(|(k, v)| {
        members
            .get(k)
            .map(|stored| key_string(stored) == *v)
            .unwrap_or(false)
    })
}

fn new_entry(list: &SchemaNode, keys: &BTreeMap<String, String>) -> Value {
    Value::Object(
        keys.iter()
            .map(|(k, v)| {
                let kind = list.child(k).and_then(SchemaNode::scalar);
                (k.clone(), key_value(v, kind))
            })
            .collect(),
    )
}

fn entry_elem(name: &str, keys: &[String], members: &Map<String, Value>) -> PathElem {
    let keys = keys
        .iter()
        .filter_map(|k| members.get(k).map(|v| (k.clone(), key_string(v))))
        .collect();
    PathElem::with_keys(local_name(name), keys)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::test::{path, schema};
    use crate::schema::SchemaOracle;
    use maplit::btreemap;
    use serde_json::json;

    fn components(names: &[&str]) -> Value {
        let entries: Vec<Value> = names
            .iter()
            .map(|n| json!({"name": n, "config": {"name": n}}))
            .collect();
        json!({"components": {"component": entries}})
    }

    fn keyed(name: &str, key: &str, value: &str) -> PathElem {
        PathElem::with_keys(name, btreemap! {key.to_string() => value.to_string()})
    }

    #[test]
    fn descend_creates_containers() {
        let s = schema();
        let mut tree = Map::new();
        let (child, child_schema) = descend(&mut tree, s.root(), &PathElem::new("system"), true)
            .unwrap()
            .unwrap();
        assert_eq!(child, &json!({}));
        assert!(child_schema.children().is_some());
        assert_eq!(Value::Object(tree), json!({"system": {}}));
    }

    #[test]
    fn descend_without_create() {
        let s = schema();
        let mut tree = Map::new();
        assert!(descend(&mut tree, s.root(), &PathElem::new("system"), false)
            .unwrap()
            .is_none());
        assert!(tree.is_empty());
    }

    #[test]
    fn descend_unknown_name() {
        let s = schema();
        let mut tree = Map::new();
        assert!(descend(&mut tree, s.root(), &PathElem::new("dummy"), true).is_err());
        // keys on a container
        assert!(descend(&mut tree, s.root(), &keyed("system", "name", "x"), true).is_err());
    }

    fn list_schema<'a>(s: &'a crate::ModelSchema, p: &str) -> &'a SchemaNode {
        s.resolve(&path(p)).unwrap()
    }

    const CONTROLLER: &str = "/system/openflow/controllers/controller";
    const CONNECTION: &str = "/system/openflow/controllers/controller/connections/connection";
    const COMPONENT: &str = "/components/component";

    #[test]
    fn list_entry_created_with_keys() {
        let s = schema();
        let mut node = Map::new();
        let entry = find_or_create_list_entry(
            &mut node,
            list_schema(&s, CONTROLLER),
            &keyed("controller", "name", "main"),
            true,
        )
        .unwrap()
        .unwrap();
        assert_eq!(entry, &json!({"name": "main"}));

        // Keys of numeric leaves are stored as numbers.
        let entry = find_or_create_list_entry(
            &mut node,
            list_schema(&s, CONNECTION),
            &keyed("connection", "aux-id", "0"),
            true,
        )
        .unwrap()
        .unwrap();
        assert_eq!(entry, &json!({"aux-id": 0}));
    }

    #[test]
    fn string_keys_stored_as_given() {
        let s = schema();
        let component = list_schema(&s, COMPONENT);
        let mut node = Map::new();
        for key in &["007", "1e3"] {
            let entry =
                find_or_create_list_entry(&mut node, component, &keyed("component", "name", key), true)
                    .unwrap()
                    .unwrap();
            assert_eq!(entry, &json!({"name": key}));
        }

        // Each is found again by the same text, and not by its numeric twin.
        for key in &["007", "1e3"] {
            assert!(
                find_or_create_list_entry(&mut node, component, &keyed("component", "name", key), false)
                    .unwrap()
                    .is_some()
            );
        }
        for key in &["7", "1000"] {
            assert!(
                find_or_create_list_entry(&mut node, component, &keyed("component", "name", key), false)
                    .unwrap()
                    .is_none()
            );
        }
        assert_eq!(node["component"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn list_entry_found_by_string_form() {
        let s = schema();
        let connection = list_schema(&s, CONNECTION);
        let mut node = json!({"connection": [{"aux-id": 1}, {"aux-id": 10}]})
            .as_object()
            .cloned()
            .unwrap();
        let entry =
            find_or_create_list_entry(&mut node, connection, &keyed("connection", "aux-id", "10"), false)
                .unwrap()
                .unwrap();
        entry["address"] = json!("10.0.0.1");
        assert_eq!(
            Value::Object(node.clone()),
            json!({"connection": [{"aux-id": 1}, {"aux-id": 10, "address": "10.0.0.1"}]})
        );

        // Not there, and not created
        assert!(
            find_or_create_list_entry(&mut node, connection, &keyed("connection", "aux-id", "2"), false)
                .unwrap()
                .is_none()
        );
        // Appended when created
        find_or_create_list_entry(&mut node, connection, &keyed("connection", "aux-id", "2"), true)
            .unwrap()
            .unwrap();
        assert_eq!(node["connection"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn list_entry_wrong_type() {
        let s = schema();
        let mut node = json!({"component": {"name": "c1"}}).as_object().cloned().unwrap();
        assert!(find_or_create_list_entry(
            &mut node,
            list_schema(&s, COMPONENT),
            &keyed("component", "name", "c1"),
            true
        )
        .is_err());
    }

    #[test]
    fn delete_last_entry_removes_list() {
        let mut node = components(&["c1"])["components"].as_object().cloned().unwrap();
        assert!(delete_list_entry(&mut node, &keyed("component", "name", "c1")).unwrap());
        assert!(node.is_empty());
    }

    #[test]
    fn delete_one_of_many() {
        let mut node = components(&["c1", "c2", "c3"])["components"]
            .as_object()
            .cloned()
            .unwrap();
        assert!(delete_list_entry(&mut node, &keyed("component", "name", "c1")).unwrap());
        let mut names: Vec<&str> = node["component"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        names.sort_unstable();
        assert_eq!(names, vec!["c2", "c3"]);

        assert!(!delete_list_entry(&mut node, &keyed("component", "name", "c9")).unwrap());
        assert!(!delete_list_entry(&mut node, &keyed("other", "name", "c2")).unwrap());
    }

    #[test]
    fn prune_only_along_path() {
        let s = schema();
        let mut tree = json!({
            "components": {},
            "system": {"config": {}, "clock": {"config": {}}},
            "interfaces": {"interface": [{"name": "eth0", "config": {}}]}
        })
        .as_object()
        .cloned()
        .unwrap();
        prune_path(&mut tree, s.root(), &path("/system/clock/config")).unwrap();
        assert_eq!(
            Value::Object(tree.clone()),
            json!({
                "components": {},
                "system": {"config": {}},
                "interfaces": {"interface": [{"name": "eth0", "config": {}}]}
            })
        );

        // Entries stay, even with nothing but their keys.
        prune_path(&mut tree, s.root(), &path("/interfaces/interface[name=eth0]/config")).unwrap();
        assert_eq!(tree["interfaces"], json!({"interface": [{"name": "eth0"}]}));

        // Nothing is removed below a container that still holds something.
        let before = tree.clone();
        prune_path(&mut tree, s.root(), &path("/system/dns/config")).unwrap();
        assert_eq!(tree, before);
    }

    #[test]
    fn lookup_entries_regardless_of_order() {
        let s = schema();
        for names in &[["c1", "c2", "c5"], ["c5", "c2", "c1"]] {
            let tree = components(names);
            let (value, node) = lookup(&tree, s.root(), &path("/components/component[name=c5]/config"))
                .unwrap()
                .unwrap();
            assert_eq!(value, &json!({"name": "c5"}));
            assert!(!node.is_leaf());
        }
    }

    #[test]
    fn lookup_misses() {
        let s = schema();
        let tree = components(&["c1"]);
        assert!(lookup(&tree, s.root(), &path("/components/component[name=c2]"))
            .unwrap()
            .is_none());
        assert!(lookup(&tree, s.root(), &path("/system/config")).unwrap().is_none());
        assert!(lookup(&tree, s.root(), &path("/dummy")).is_err());
    }

    #[test]
    fn wildcard_matches_all_entries() {
        let s = schema();
        let tree = components(&["c1", "c2"]);
        for p in &["/components/component/config", "/components/component[name=*]/config"] {
            let found = lookup_wildcard(&tree, s.root(), &path(p)).unwrap();
            let paths: Vec<String> = found.iter().map(|l| l.path.to_string()).collect();
            assert_eq!(
                paths,
                vec![
                    "/components/component[name=c1]/config",
                    "/components/component[name=c2]/config"
                ]
            );
        }

        let found = lookup_wildcard(&tree, s.root(), &path("/components/component[name=c2]")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, &json!({"name": "c2", "config": {"name": "c2"}}));
    }

    #[test]
    fn flatten_leaves() {
        let s = schema();
        let tree = json!({
            "system": {"config": {"hostname": "switch_a"}},
            "components": {"component": [{"name": "c1", "config": {"name": "c1"}}]}
        });
        let mut found: Vec<(String, Value)> = leaves(&tree, s.root(), &Path::root())
            .into_iter()
            .map(|l| (l.path.to_string(), l.value.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            found,
            vec![
                ("/components/component[name=c1]/config/name".to_string(), json!("c1")),
                ("/components/component[name=c1]/name".to_string(), json!("c1")),
                ("/system/config/hostname".to_string(), json!("switch_a")),
            ]
        );
    }
}
