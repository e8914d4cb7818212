use snafu::Snafu;
use std::io;
use std::path::PathBuf;

/// Possible errors from schema and config tree operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Reading schema from '{}' failed: {}", path.display(), source))]
    SchemaRead { path: PathBuf, source: io::Error },

    #[snafu(display("Schema document is invalid: {}", source))]
    SchemaParse { source: serde_json::Error },

    #[snafu(display("Schema root must be a container"))]
    SchemaRoot,

    #[snafu(display("No schema node for path '{}'", path))]
    NotFound { path: String },

    #[snafu(display("Wrong node type at '{}': {}", path, msg))]
    TypeMismatch { path: String, msg: String },

    #[snafu(display("Payload is not valid JSON: {}", source))]
    InvalidJson { source: serde_json::Error },

    #[snafu(display("Unknown field '{}' under '{}'", field, path))]
    UnknownField { path: String, field: String },

    #[snafu(display("Invalid value at '{}': {}", path, msg))]
    InvalidValue { path: String, msg: String },

    #[snafu(display("Validation failed at '{}': {}", path, msg))]
    Validation { path: String, msg: String },
}

pub type Result<T> = std::result::Result<T, Error>;
