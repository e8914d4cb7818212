/*!
# Background

The types in this crate describe the messages exchanged with the management target: paths into
the configuration tree, typed values, and the request and response bodies of the Capabilities,
Get, Set, and Subscribe operations.

They follow the shape of the gNMI protocol messages, but they're plain serde types so that any
transport can carry them.  The apiserver carries them as JSON.

# Paths

A [`Path`] is a sequence of [`PathElem`]s; an element may carry keys that select one entry of a
keyed list.  Paths can be parsed from and rendered to their xpath-like string form:

```
use apitypes::Path;

let path: Path = "/components/component[name=c1]/config".parse().unwrap();
assert_eq!(path.elem.len(), 3);
assert_eq!(path.elem[1].keys["name"], "c1");
assert_eq!(path.to_string(), "/components/component[name=c1]/config");
```
*/

pub mod message;
pub mod path;
pub mod status;
pub mod value;

pub use message::{
    CapabilityRequest, CapabilityResponse, DataType, GetRequest, GetResponse, Notification,
    Operation, Poll, SetRequest, SetResponse, SubscribeRequest, SubscribeResponse, Subscription,
    SubscriptionList, SubscriptionListMode, SubscriptionMode, Update, UpdateResult,
};
pub use path::{Path, PathElem};
pub use status::{Code, Status};
pub use value::{Encoding, ModelData, TypedValue};
