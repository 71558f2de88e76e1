//!A mod for the error types
use thiserror::Error;

use crate::registry::IoKind;

///Errors raised while validating the options of an IO object.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptionError {
    #[error("option \"{name}\" is required")]
    Required { name: &'static str },

    #[error("option \"{name}\" must be one of [{}], got \"{value}\"", choices.join(", "))]
    Choice {
        name: &'static str,
        value: String,
        choices: Vec<String>,
    },

    #[error("option \"{name}\" must have between {min} and {max} items, got {len}")]
    InvalidLength {
        name: &'static str,
        min: usize,
        max: usize,
        len: usize,
    },

    #[error("option \"{name}\" must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

///Common error type for tally IO objects.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error(transparent)]
    Option(#[from] OptionError),

    #[error("invalid options for {namespace}: {source}")]
    Options {
        namespace: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no io type registered for namespace \"{0}\"")]
    NamespaceNotFound(String),

    #[error("namespace \"{0}\" is already registered")]
    DuplicateNamespace(String),

    #[error("namespace \"{namespace}\" is not an {expected} namespace")]
    WrongKind { namespace: String, expected: IoKind },

    #[error("expected a {expected} tally config")]
    WrongConfigVariant { expected: &'static str },

    #[error("id \"{current}\" is already assigned, cannot assign \"{requested}\"")]
    IdAlreadyAssigned { current: String, requested: String },

    #[error("{namespace} has no id")]
    MissingId { namespace: &'static str },

    #[error("device error: {0}")]
    Device(String),

    #[error("config error: {0}")]
    Config(String),
}

impl TallyError {
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn options(namespace: &str, source: serde_json::Error) -> Self {
        Self::Options {
            namespace: namespace.to_string(),
            source,
        }
    }
}
