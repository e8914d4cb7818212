//! Request and response bodies of the four operations.

use crate::{Encoding, ModelData, Path, Status, TypedValue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    pub supported_models: Vec<ModelData>,
    pub supported_encodings: Vec<Encoding>,
    pub gnmi_version: String,
}

/// Data values at a set of paths, sampled at one time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Path>,
    #[serde(default)]
    pub update: Vec<Update>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<Path>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub path: Path,
    pub val: TypedValue,
}

/// Which kind of data a Get asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    #[default]
    All,
    Config,
    State,
    Operational,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(default)]
    pub prefix: Option<Path>,
    #[serde(default)]
    pub path: Vec<Path>,
    #[serde(default, rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub use_models: Vec<ModelData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    pub notification: Vec<Notification>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetRequest {
    #[serde(default)]
    pub prefix: Option<Path>,
    #[serde(default)]
    pub delete: Vec<Path>,
    #[serde(default)]
    pub replace: Vec<Update>,
    #[serde(default)]
    pub update: Vec<Update>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Delete,
    Replace,
    Update,
}

/// The outcome of one operation of a Set; the path is echoed from the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub path: Path,
    pub op: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Path>,
    pub response: Vec<UpdateResult>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionListMode {
    #[default]
    Stream,
    Once,
    Poll,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionMode {
    #[default]
    TargetDefined,
    OnChange,
    Sample,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub path: Path,
    #[serde(default)]
    pub mode: SubscriptionMode,
    /// Nanoseconds between samples, for SAMPLE subscriptions.
    #[serde(default)]
    pub sample_interval: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionList {
    #[serde(default)]
    pub prefix: Option<Path>,
    #[serde(default)]
    pub subscription: Vec<Subscription>,
    #[serde(default)]
    pub mode: SubscriptionListMode,
    #[serde(default)]
    pub allow_aggregation: bool,
    #[serde(default)]
    pub use_models: Vec<ModelData>,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default)]
    pub updates_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeRequest {
    Subscribe(SubscriptionList),
    Poll(Poll),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeResponse {
    Update(Notification),
    /// Marks the end of the initial snapshot.
    SyncResponse(bool),
    /// The stream's terminal error, for transports that can't carry one any other way.
    Error(Status),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::PathElem;
    use serde_json::json;

    #[test]
    fn minimal_get_request() {
        let req: GetRequest =
            serde_json::from_value(json!({"path": [{"elem": [{"name": "system"}]}]})).unwrap();
        assert_eq!(req.data_type, DataType::All);
        assert_eq!(req.encoding, Encoding::Json);
        assert!(req.prefix.is_none());
        assert_eq!(req.path[0].elem, vec![PathElem::new("system")]);
    }

    #[test]
    fn subscribe_request_shape() {
        let req: SubscribeRequest = serde_json::from_value(json!({
            "subscribe": {
                "mode": "ONCE",
                "subscription": [{"path": {"elem": [{"name": "system"}]}}]
            }
        }))
        .unwrap();
        match req {
            SubscribeRequest::Subscribe(list) => {
                assert_eq!(list.mode, SubscriptionListMode::Once);
                assert_eq!(list.subscription.len(), 1);
                assert!(!list.allow_aggregation);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn sync_response_shape() {
        let ser = serde_json::to_value(SubscribeResponse::SyncResponse(true)).unwrap();
        assert_eq!(ser, json!({"sync_response": true}));
    }
}
