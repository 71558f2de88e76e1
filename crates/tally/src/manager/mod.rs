//!Owns every configured input and output, keeps them bound to each other and persists them.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_util::future::join_all;
use tally_core::{
    binding::{bind_to_input, unbind_all, unbind_from_input},
    Input, IoRegistry, Output, TallyError,
};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigData, ConfigStore};

pub mod container;

pub use container::{ContainerEvent, IoContainer};

#[derive(Default)]
struct OverrideState {
    lock: Arc<Mutex<()>>,
    active: AtomicBool,
}

///Temporarily allows a readonly [`Manager`] to write its config.
///
///Only one guard can be held at a time, [`ReadonlyOverride::acquire`] waits for the current one.
#[derive(Clone, Default)]
pub struct ReadonlyOverride {
    state: Arc<OverrideState>,
}

impl ReadonlyOverride {
    pub async fn acquire(&self) -> ReadonlyOverrideGuard {
        let lock = self.state.lock.clone().lock_owned().await;
        self.state.active.store(true, Ordering::Release);
        ReadonlyOverrideGuard {
            _lock: lock,
            state: self.state.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Acquire)
    }
}

pub struct ReadonlyOverrideGuard {
    _lock: OwnedMutexGuard<()>,
    state: Arc<OverrideState>,
}

impl Drop for ReadonlyOverrideGuard {
    fn drop(&mut self) {
        self.state.active.store(false, Ordering::Release);
    }
}

fn log_failures(context: &str, failures: Vec<(String, TallyError)>) {
    for (key, err) in failures {
        error!(key = %key, "{context}: {err}");
    }
}

pub struct Manager {
    inputs: IoContainer<dyn Input>,
    outputs: IoContainer<dyn Output>,
    registry: IoRegistry,
    store: Arc<dyn ConfigStore>,
    readonly: bool,
    readonly_override: ReadonlyOverride,
    config_writes: watch::Sender<u64>,
    running: bool,
    config_read: bool,
}

impl Manager {
    pub fn new(registry: IoRegistry, store: Arc<dyn ConfigStore>, readonly: bool) -> Self {
        let (config_writes, _) = watch::channel(0);
        Self {
            inputs: IoContainer::new("input"),
            outputs: IoContainer::new("output"),
            registry,
            store,
            readonly,
            readonly_override: ReadonlyOverride::default(),
            config_writes,
            running: false,
            config_read: false,
        }
    }

    pub fn inputs(&self) -> &IoContainer<dyn Input> {
        &self.inputs
    }

    pub fn outputs(&self) -> &IoContainer<dyn Output> {
        &self.outputs
    }

    pub fn registry(&self) -> &IoRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    ///The readonly mode the manager was created with, ignoring overrides.
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn readonly_override(&self) -> ReadonlyOverride {
        self.readonly_override.clone()
    }

    ///Counts config writes.
    pub fn config_writes(&self) -> watch::Receiver<u64> {
        self.config_writes.subscribe()
    }

    fn writes_blocked(&self) -> bool {
        self.readonly && !self.readonly_override.is_active()
    }

    ///Read the config if needed, then open and bind everything.
    pub async fn open(&mut self) -> Result<(), TallyError> {
        if self.running {
            return Ok(());
        }
        info!("manager starting");
        if !self.config_read {
            let failures = self.read_config().await?;
            log_failures("could not load from config", failures);
        }
        log_failures("input failed to open", self.inputs.open().await);
        log_failures("output failed to open", self.outputs.open().await);
        self.running = true;
        self.bind_all().await;
        info!(
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            "manager running"
        );
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), TallyError> {
        if !self.running {
            return Ok(());
        }
        info!("manager stopping");
        self.running = false;
        for output in self.outputs.values() {
            unbind_all(output.as_ref());
        }
        log_failures("output failed to close", self.outputs.close().await);
        log_failures("input failed to close", self.inputs.close().await);
        info!("manager stopped");
        Ok(())
    }

    ///Load inputs and outputs from the store. Records that could not be built are returned.
    pub async fn read_config(&mut self) -> Result<Vec<(String, TallyError)>, TallyError> {
        let ConfigData { inputs, outputs } = self.store.read()?;
        let registry = &self.registry;
        let mut failures = self
            .inputs
            .deserialize(inputs, |record| registry.deserialize_input(record))
            .await;
        failures.extend(
            self.outputs
                .deserialize(outputs, |record| registry.deserialize_output(record))
                .await,
        );
        self.config_read = true;
        if self.running {
            self.bind_all().await;
        }
        debug!(failed = failures.len(), "config read");
        Ok(failures)
    }

    ///Write the current inputs and outputs to the store, unless readonly and not overridden.
    ///
    ///Returns whether anything was written.
    pub async fn write_config(&self) -> Result<bool, TallyError> {
        if self.writes_blocked() {
            debug!("readonly, config not written");
            return Ok(false);
        }
        let data = ConfigData {
            inputs: self.inputs.serialize()?,
            outputs: self.outputs.serialize()?,
        };
        self.store.write(&data)?;
        self.config_writes.send_modify(|count| *count += 1);
        debug!("config written");
        Ok(true)
    }

    async fn write_after_change(&self) {
        if let Err(err) = self.write_config().await {
            warn!("failed to write config: {err}");
        }
    }

    //bound listeners exist only while running
    async fn bind_all(&self) {
        for output in self.outputs.values() {
            self.bind_output(output).await;
        }
    }

    async fn bind_output(&self, output: &Arc<dyn Output>) {
        let results =
            join_all(self.inputs.values().map(|input| bind_to_input(output, input))).await;
        for err in results.into_iter().filter_map(Result::err) {
            error!(output = output.id(), "binding failed: {err}");
        }
    }

    async fn bind_input(&self, input: &Arc<dyn Input>) {
        let results =
            join_all(self.outputs.values().map(|output| bind_to_input(output, input))).await;
        for err in results.into_iter().filter_map(Result::err) {
            error!(input = input.id(), "binding failed: {err}");
        }
    }

    pub async fn add_input(&mut self, input: Arc<dyn Input>) -> Result<String, TallyError> {
        let key = self.inputs.add(input.clone(), None).await?;
        if self.running {
            self.bind_input(&input).await;
        }
        self.write_after_change().await;
        Ok(key)
    }

    pub async fn add_output(&mut self, output: Arc<dyn Output>) -> Result<String, TallyError> {
        let key = self.outputs.add(output.clone(), None).await?;
        if self.running {
            self.bind_output(&output).await;
        }
        self.write_after_change().await;
        Ok(key)
    }

    ///Removes and closes the input, unbinding it from every output.
    ///
    ///Outputs are pushed the merge of the inputs that remain.
    pub async fn remove_input(&mut self, key: &str) -> Option<Arc<dyn Input>> {
        let input = self.inputs.remove(key).await?;
        for output in self.outputs.values() {
            unbind_from_input(output, &input).await;
        }
        self.write_after_change().await;
        Some(input)
    }

    pub async fn remove_output(&mut self, key: &str) -> Option<Arc<dyn Output>> {
        let output = self.outputs.remove(key).await?;
        unbind_all(output.as_ref());
        self.write_after_change().await;
        Some(output)
    }
}
