//!Namespace registry used to rebuild IO objects from their serialized form.
//!
//!Every concrete type registers a factory under its namespace once, at startup. Input
//!namespaces start with `input.` and output namespaces with `output.`.
use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    baseio::{Input, IoRecord, Output},
    error::TallyError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Input,
    Output,
}

impl IoKind {
    fn prefix(self) -> &'static str {
        match self {
            IoKind::Input => "input.",
            IoKind::Output => "output.",
        }
    }
}

impl fmt::Display for IoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoKind::Input => f.write_str("input"),
            IoKind::Output => f.write_str("output"),
        }
    }
}

pub type InputFactory =
    Box<dyn Fn(serde_json::Value) -> Result<Arc<dyn Input>, TallyError> + Send + Sync>;
pub type OutputFactory =
    Box<dyn Fn(serde_json::Value) -> Result<Arc<dyn Output>, TallyError> + Send + Sync>;

pub enum IoFactory {
    Input(InputFactory),
    Output(OutputFactory),
}

impl IoFactory {
    pub fn kind(&self) -> IoKind {
        match self {
            IoFactory::Input(_) => IoKind::Input,
            IoFactory::Output(_) => IoKind::Output,
        }
    }
}

#[derive(Default)]
pub struct IoRegistry {
    factories: BTreeMap<String, IoFactory>,
}

impl IoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self, namespace: &str, factory: IoFactory) -> Result<(), TallyError> {
        let kind = factory.kind();
        if !namespace.starts_with(kind.prefix()) {
            return Err(TallyError::WrongKind {
                namespace: namespace.to_string(),
                expected: kind,
            });
        }
        if self.factories.contains_key(namespace) {
            return Err(TallyError::DuplicateNamespace(namespace.to_string()));
        }
        debug!(namespace, "registered {kind} type");
        self.factories.insert(namespace.to_string(), factory);
        Ok(())
    }

    pub fn register_input<F>(&mut self, namespace: &str, factory: F) -> Result<(), TallyError>
    where
        F: Fn(serde_json::Value) -> Result<Arc<dyn Input>, TallyError> + Send + Sync + 'static,
    {
        self.register(namespace, IoFactory::Input(Box::new(factory)))
    }

    pub fn register_output<F>(&mut self, namespace: &str, factory: F) -> Result<(), TallyError>
    where
        F: Fn(serde_json::Value) -> Result<Arc<dyn Output>, TallyError> + Send + Sync + 'static,
    {
        self.register(namespace, IoFactory::Output(Box::new(factory)))
    }

    pub fn lookup(&self, namespace: &str) -> Result<&IoFactory, TallyError> {
        self.factories
            .get(namespace)
            .ok_or_else(|| TallyError::NamespaceNotFound(namespace.to_string()))
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.factories.contains_key(namespace)
    }

    pub fn namespaces(&self, kind: IoKind) -> impl Iterator<Item = &str> {
        self.factories
            .iter()
            .filter(move |(_, factory)| factory.kind() == kind)
            .map(|(namespace, _)| namespace.as_str())
    }

    pub fn deserialize_input(&self, record: &IoRecord) -> Result<Arc<dyn Input>, TallyError> {
        match self.lookup(&record.namespace)? {
            IoFactory::Input(factory) => factory(record.options.clone()),
            IoFactory::Output(_) => Err(TallyError::WrongKind {
                namespace: record.namespace.clone(),
                expected: IoKind::Input,
            }),
        }
    }

    pub fn deserialize_output(&self, record: &IoRecord) -> Result<Arc<dyn Output>, TallyError> {
        match self.lookup(&record.namespace)? {
            IoFactory::Output(factory) => factory(record.options.clone()),
            IoFactory::Input(_) => Err(TallyError::WrongKind {
                namespace: record.namespace.clone(),
                expected: IoKind::Output,
            }),
        }
    }
}

///Deserialize the options of `namespace`.
pub fn parse_options<T: DeserializeOwned>(
    namespace: &str,
    options: serde_json::Value,
) -> Result<T, TallyError> {
    serde_json::from_value(options).map_err(|err| TallyError::options(namespace, err))
}

///Serialize the options of `namespace`.
pub fn options_value<T: serde::Serialize>(
    namespace: &str,
    options: &T,
) -> Result<serde_json::Value, TallyError> {
    serde_json::to_value(options).map_err(|err| TallyError::options(namespace, err))
}
