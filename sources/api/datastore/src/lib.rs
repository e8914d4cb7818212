/*!
# Background

The config tree of a management target holds the device's configuration as one hierarchical
document.  Every node of the tree is described by a schema: containers hold named members, keyed
lists hold entries identified by their key members, and leaves hold typed scalars.

For more detail about how the tree is served, see [apiserver](../apiserver).

# Library

This library provides:

* The `SchemaOracle` trait, which answers type questions about a location in the tree and converts
  subtrees between raw JSON and their validated form, along with `ModelSchema`, an oracle backed
  by a schema tree loaded from a JSON document.
* The `navigator` module, which finds, creates, and deletes nodes of a tree held as generic JSON,
  including entries of keyed lists.
* The `value` module, which converts between typed protocol values and stored scalars.

We represent the tree itself with `serde_json::Value`, since the protocol exchanges subtrees as
JSON anyway, and it gives the navigator a convenient generic form to walk.

# Current limitations

* The user (e.g. apiserver) needs to handle locking.
* List entries are matched on the stringified form of their keys, so a key given as `10.0` won't
  match a stored `10`.
* Deleting a list entry doesn't preserve the order of the remaining entries.
*/

pub mod error;
pub mod navigator;
pub mod schema;
pub mod value;

pub use error::{Error, Result};
pub use schema::{ModelSchema, Naming, ScalarKind, SchemaKind, SchemaNode, SchemaOracle, TypedConfig};
