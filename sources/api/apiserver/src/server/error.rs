use crate::server::apply;
use apitypes::{Code, DataType, Encoding, SubscriptionListMode};
use snafu::Snafu;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

// We want server (router/handler), store, and subscription errors together so it's easy to map
// every high-level type of error that could happen during a request to a status code.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    // Server errors
    #[snafu(display("Another thread poisoned the config tree lock by panicking"))]
    TreeLock,

    #[snafu(display("Unable to serialize response: {}", source))]
    ResponseSerialization { source: serde_json::Error },

    #[snafu(display("Unable to bind to {}: {}", addr, source))]
    BindAddress { addr: String, source: io::Error },

    #[snafu(display("Unable to start server: {}", source))]
    ServerStart { source: io::Error },

    #[snafu(display("Unable to load schema: {}", source))]
    SchemaLoad {
        #[snafu(source(from(datastore::Error, Box::new)))]
        source: Box<datastore::Error>,
    },

    #[snafu(display("Unable to read initial config from {}: {}", path.display(), source))]
    ConfigRead { path: PathBuf, source: io::Error },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Request checks
    #[snafu(display("Unsupported encoding: {:?}", encoding))]
    UnsupportedEncoding { encoding: Encoding },

    #[snafu(display("Unsupported model: {}", model))]
    UnsupportedModel { model: String },

    #[snafu(display("Unsupported request type: {:?}", data_type))]
    UnsupportedDataType { data_type: DataType },

    #[snafu(display("Filtering using use_models is unsupported for '{}'", path))]
    UseModels { path: String },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Store errors
    #[snafu(display("Path '{}' not found", path))]
    PathNotFound { path: String },

    #[snafu(display("Path '{}' is not found in the config structure", path))]
    NoSchema { path: String },

    #[snafu(display("Path elem not found: {}", elem))]
    PathElemNotFound { elem: String },

    #[snafu(display("Incompatible path elem: {}", elem))]
    IncompatibleElem { elem: String },

    #[snafu(display("Unable to navigate to '{}': {}", path, source))]
    Navigate {
        path: String,
        #[snafu(source(from(datastore::Error, Box::new)))]
        source: Box<datastore::Error>,
    },

    #[snafu(display("Wrong node type at '{}': {}", path, msg))]
    NodeType { path: String, msg: String },

    #[snafu(display("Invalid value for '{}': {}", path, source))]
    InvalidValue {
        path: String,
        #[snafu(source(from(datastore::Error, Box::new)))]
        source: Box<datastore::Error>,
    },

    #[snafu(display("Expected a JSON value for '{}'", path))]
    ExpectedJson { path: String },

    #[snafu(display("Expected a container value for list entry '{}'", path))]
    ExpectedEntry { path: String },

    #[snafu(display("Invalid config data: {} is a path attribute of '{}'", key, path))]
    KeyConflict { path: String, key: String },

    #[snafu(display("Update of the root of the config tree is unsupported"))]
    RootUpdate,

    #[snafu(display("Expected a tree to replace the root"))]
    RootValue,

    #[snafu(display("Unable to build config from the config tree: {}", source))]
    Rederive {
        #[snafu(source(from(datastore::Error, Box::new)))]
        source: Box<datastore::Error>,
    },

    #[snafu(display("Unable to encode '{}': {}", path, source))]
    Encode {
        path: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to read value at '{}': {}", path, source))]
    ReadValue {
        path: String,
        #[snafu(source(from(datastore::Error, Box::new)))]
        source: Box<datastore::Error>,
    },

    #[snafu(display("Invalid initial config: {}", source))]
    InitialConfig {
        #[snafu(source(from(datastore::Error, Box::new)))]
        source: Box<datastore::Error>,
    },

    #[snafu(display("Unable to apply initial config to device: {}", source))]
    InitialApply { source: apply::Error },

    #[snafu(display("Error in applying operation to device: {}", source))]
    Apply { source: apply::Error },

    #[snafu(display("Error in rollback the failed operation ({}): {}", cause, source))]
    Rollback { cause: String, source: apply::Error },

    // =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

    // Subscribe errors
    #[snafu(display("Request must contain a subscription"))]
    NotSubscriptionList,

    #[snafu(display("Aggregation is not supported"))]
    Aggregation,

    #[snafu(display("Subscription using use_models is not supported"))]
    SubscribeUseModels,

    #[snafu(display("Mode {:?} is not implemented", mode))]
    SubscribeMode { mode: SubscriptionListMode },

    #[snafu(display("Subscription timed out while sending, after {:?}", timeout))]
    SubscribeTimeout { timeout: Duration },

    #[snafu(display("Subscription stream was cancelled"))]
    SubscribeCancelled,
}

impl Error {
    /// Maps our error types to the protocol status code they should return.
    pub fn code(&self) -> Code {
        use Error::*;
        match self {
            // Bad requests
            InvalidValue { .. } => Code::InvalidArgument,
            ExpectedJson { .. } => Code::InvalidArgument,
            ExpectedEntry { .. } => Code::InvalidArgument,
            KeyConflict { .. } => Code::InvalidArgument,
            RootValue => Code::InvalidArgument,
            InitialConfig { .. } => Code::InvalidArgument,
            NotSubscriptionList => Code::InvalidArgument,

            // Nothing there
            PathNotFound { .. } => Code::NotFound,
            NoSchema { .. } => Code::NotFound,
            PathElemNotFound { .. } => Code::NotFound,
            IncompatibleElem { .. } => Code::NotFound,
            Navigate { source, .. } => match **source {
                datastore::Error::NotFound { .. } => Code::NotFound,
                _ => Code::Internal,
            },

            // Things we don't do
            UnsupportedEncoding { .. } => Code::Unimplemented,
            UnsupportedModel { .. } => Code::Unimplemented,
            UnsupportedDataType { .. } => Code::Unimplemented,
            UseModels { .. } => Code::Unimplemented,
            RootUpdate => Code::Unimplemented,
            Aggregation => Code::Unimplemented,
            SubscribeUseModels => Code::Unimplemented,
            SubscribeMode { .. } => Code::Unimplemented,

            // The device said no
            Apply { .. } => Code::Aborted,
            InitialApply { .. } => Code::Aborted,

            SubscribeTimeout { .. } => Code::DeadlineExceeded,
            SubscribeCancelled => Code::Cancelled,

            // Things that shouldn't happen
            TreeLock => Code::Internal,
            ResponseSerialization { .. } => Code::Internal,
            BindAddress { .. } => Code::Internal,
            ServerStart { .. } => Code::Internal,
            SchemaLoad { .. } => Code::Internal,
            ConfigRead { .. } => Code::Internal,
            NodeType { .. } => Code::Internal,
            Rederive { .. } => Code::Internal,
            Encode { .. } => Code::Internal,
            ReadValue { .. } => Code::Internal,
            Rollback { .. } => Code::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
