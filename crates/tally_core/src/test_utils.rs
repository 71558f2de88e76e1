//!In-memory inputs and outputs for tests.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    baseio::{BaseIo, Input, IoCore, Output},
    binding::OutputBindings,
    common::{TallyColor, TallyKey, TallyType},
    config::{MultiTallyConfig, SingleTallyConfig, TallyConfig},
    error::{OptionError, TallyError},
    registry::{options_value, parse_options, IoRegistry},
    tally::{ChangedProps, InputEvent, Screen, Tally, TallyTable},
};

///Options of the test objects. Exactly one of the two configs is set.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SingleTallyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_config: Option<MultiTallyConfig>,
}

impl TestOptions {
    pub fn into_config(self) -> Result<TallyConfig, TallyError> {
        match (self.config, self.multi_config) {
            (Some(conf), None) => Ok(conf.into()),
            (None, Some(conf)) => Ok(conf.into()),
            _ => Err(OptionError::Required { name: "config" }.into()),
        }
    }
}

impl From<&TallyConfig> for TestOptions {
    fn from(config: &TallyConfig) -> Self {
        match config {
            TallyConfig::Single(conf) => Self {
                config: Some(conf.clone()),
                multi_config: None,
            },
            TallyConfig::Multi(conf) => Self {
                config: None,
                multi_config: Some(conf.clone()),
            },
        }
    }
}

///Register [`TableInput`] and [`RecordingOutput`].
pub fn register(registry: &mut IoRegistry) -> Result<(), TallyError> {
    registry.register_input(TableInput::NAMESPACE, |options| {
        Ok(Arc::new(TableInput::from_options(options)?) as Arc<dyn Input>)
    })?;
    registry.register_output(RecordingOutput::NAMESPACE, |options| {
        Ok(Arc::new(RecordingOutput::from_options(options)?) as Arc<dyn Output>)
    })
}

///Let spawned listeners drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub struct TableInput {
    core: IoCore,
    table: TallyTable,
}

impl TableInput {
    pub const NAMESPACE: &'static str = "input.test.TableInput";

    ///A single config gets its tally up front.
    pub fn new(config: impl Into<TallyConfig>) -> Self {
        let core = IoCore::new(config);
        let table = TallyTable::default();
        if let TallyConfig::Single(conf) = core.config() {
            table.add_tally(Tally::new(conf.tally_key()));
        }
        Self { core, table }
    }

    pub fn from_options(options: serde_json::Value) -> Result<Self, TallyError> {
        let options: TestOptions = parse_options(Self::NAMESPACE, options)?;
        Ok(Self::new(options.into_config()?))
    }

    fn single(&self) -> &SingleTallyConfig {
        match self.core.config() {
            TallyConfig::Single(conf) => conf,
            TallyConfig::Multi(_) => panic!("set_state needs a single config"),
        }
    }

    pub fn set_state(&self, state: bool) {
        let conf = self.single();
        let color = if state { conf.color_mask() } else { TallyColor::Off };
        self.set_color(conf.tally_key(), conf.tally_type(), color);
    }

    pub fn add_tally(&self, key: TallyKey) {
        self.table.add_tally(Tally::new(key));
    }

    pub fn set_color(&self, key: TallyKey, tally_type: TallyType, color: TallyColor) {
        self.table.update_tally(key, |tally| tally.set_color(tally_type, color));
    }
}

#[async_trait]
impl BaseIo for TableInput {
    fn namespace(&self) -> &'static str {
        Self::NAMESPACE
    }

    fn core(&self) -> &IoCore {
        &self.core
    }

    fn serialize_options(&self) -> Result<serde_json::Value, TallyError> {
        options_value(Self::NAMESPACE, &TestOptions::from(self.core.config()))
    }

    async fn open(&self) -> Result<(), TallyError> {
        self.core.set_running(true);
        Ok(())
    }

    async fn close(&self) -> Result<(), TallyError> {
        self.core.set_running(false);
        Ok(())
    }
}

impl Input for TableInput {
    fn get_screen(&self, screen_index: u16) -> Option<Screen> {
        self.table.screen(screen_index)
    }

    fn get_all_screens(&self) -> Vec<Screen> {
        self.table.screens()
    }

    fn get_tally(&self, key: TallyKey) -> Option<Tally> {
        self.table.tally(key)
    }

    fn get_all_tallies(&self, screen_index: Option<u16>) -> Vec<Tally> {
        self.table.tallies(screen_index)
    }

    fn subscribe(&self) -> broadcast::Receiver<InputEvent> {
        self.table.subscribe()
    }
}

///Remembers the last merged color per lamp and counts how often it changed.
pub struct RecordingOutput {
    core: IoCore,
    bindings: OutputBindings,
    last: Mutex<HashMap<(TallyKey, TallyType), TallyColor>>,
    changes: AtomicUsize,
}

impl RecordingOutput {
    pub const NAMESPACE: &'static str = "output.test.RecordingOutput";

    pub fn from_options(options: serde_json::Value) -> Result<Self, TallyError> {
        let options: TestOptions = parse_options(Self::NAMESPACE, options)?;
        Ok(Self::new(options.into_config()?))
    }

    pub fn new(config: impl Into<TallyConfig>) -> Self {
        Self {
            core: IoCore::new(config),
            bindings: OutputBindings::new(),
            last: Mutex::new(HashMap::new()),
            changes: AtomicUsize::new(0),
        }
    }

    pub fn last_color(&self, key: TallyKey, lamp: TallyType) -> Option<TallyColor> {
        self.last.lock().unwrap().get(&(key, lamp)).copied()
    }

    pub fn change_count(&self) -> usize {
        self.changes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseIo for RecordingOutput {
    fn namespace(&self) -> &'static str {
        Self::NAMESPACE
    }

    fn core(&self) -> &IoCore {
        &self.core
    }

    fn serialize_options(&self) -> Result<serde_json::Value, TallyError> {
        options_value(Self::NAMESPACE, &TestOptions::from(self.core.config()))
    }

    async fn open(&self) -> Result<(), TallyError> {
        self.core.set_running(true);
        Ok(())
    }

    async fn close(&self) -> Result<(), TallyError> {
        self.core.set_running(false);
        Ok(())
    }
}

#[async_trait]
impl Output for RecordingOutput {
    fn bindings(&self) -> &OutputBindings {
        &self.bindings
    }

    async fn on_receiver_tally_change(
        &self,
        _source: &Arc<dyn Input>,
        tally: &Tally,
        changed: &ChangedProps,
    ) -> Result<(), TallyError> {
        for lamp in self.covered_changes(tally, changed).lamps() {
            let color = self.get_merged_tally(tally.into(), lamp);
            let previous = self.last.lock().unwrap().insert((tally.id, lamp), color);
            if previous != Some(color) {
                self.changes.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}
