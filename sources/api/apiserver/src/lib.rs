/*!
# Background

This library provides the network management target: it holds a device's configuration as a
schema-typed tree and serves Capabilities, Get, Set, and Subscribe operations against it.

Paths, values, and messages are defined in [apitypes](../apitypes).  The tree is walked and
checked against the schema by [datastore](../datastore).

# Design

The `Store` owns the committed config tree behind a readers-writer lock.  Gets and
subscriptions read under the read lock.  A set holds the write lock for the whole transaction:
deletes, replaces, and updates are applied in that order to a copy of the tree, and the copy
replaces the committed tree only if every operation succeeds.

If a `DeviceCallback` is configured, it's shown the candidate config after every operation of a
set.  If it rejects one, it's sent the committed config again and the set is aborted.
`CommandApplier` is a callback that runs a program with the config as JSON on stdin.

Subscriptions in ONCE mode are served by three tasks: a producer reading the tree, a consumer
forwarding to the caller, and a watchdog that ends the subscription if the consumer stalls.

# Current limitations

* Only ONCE subscriptions are supported; POLL and STREAM are rejected as unimplemented.
* The HTTP surface carries one subscribe request per call.

The binary in `src/bin/apiserver.rs` serves all of this as JSON over HTTP.
*/

pub mod server;

pub use server::serve;
