//!The capability model shared by every input and output.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    binding::{OutputBindings, TallyRef},
    common::{TallyColor, TallyKey, TallyType},
    config::{MatchTarget, SingleTallyConfig, TallyConfig},
    error::TallyError,
    tally::{ChangedProps, InputEvent, Screen, Tally},
};

///Serialized form of an IO object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoRecord {
    pub namespace: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

///State every IO object carries: its tally config, a running flag and the id a container gives it.
#[derive(Debug)]
pub struct IoCore {
    config: TallyConfig,
    running: AtomicBool,
    id: OnceLock<String>,
}

impl IoCore {
    pub fn new(config: impl Into<TallyConfig>) -> Self {
        Self {
            config: config.into(),
            running: AtomicBool::new(false),
            id: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &TallyConfig {
        &self.config
    }

    pub fn id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    ///Ids are assigned once. Reassigning the same id is accepted.
    pub fn assign_id(&self, id: &str) -> Result<(), TallyError> {
        let current = self.id.get_or_init(|| id.to_string());
        if current == id {
            Ok(())
        } else {
            Err(TallyError::IdAlreadyAssigned {
                current: current.clone(),
                requested: id.to_string(),
            })
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    ///Returns the previous value.
    pub fn set_running(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::AcqRel)
    }
}

#[async_trait]
pub trait BaseIo: Send + Sync + 'static {
    ///Dotted name identifying the concrete type, e.g. `output.gpio.LED`.
    fn namespace(&self) -> &'static str;

    fn core(&self) -> &IoCore;

    ///The options that rebuild this object through its registered factory.
    fn serialize_options(&self) -> Result<serde_json::Value, TallyError>;

    async fn open(&self) -> Result<(), TallyError>;

    ///Must succeed on objects that were never opened.
    async fn close(&self) -> Result<(), TallyError>;

    fn config(&self) -> &TallyConfig {
        self.core().config()
    }

    fn id(&self) -> Option<&str> {
        self.core().id()
    }

    fn is_running(&self) -> bool {
        self.core().is_running()
    }

    fn serialize(&self) -> Result<IoRecord, TallyError> {
        Ok(IoRecord {
            namespace: self.namespace().to_string(),
            options: self.serialize_options()?,
        })
    }

    fn screen_matches(&self, screen: &Screen) -> bool {
        self.config().matches_screen(screen)
    }

    fn tally_matches(&self, target: MatchTarget<'_>, tally_type: TallyType) -> bool {
        self.find_tally_match(target, tally_type).is_some()
    }

    ///The filter in this object's config that covers `target`.
    fn find_tally_match(
        &self,
        target: MatchTarget<'_>,
        tally_type: TallyType,
    ) -> Option<SingleTallyConfig> {
        self.config().find_match(target, tally_type)
    }
}

///A tally source.
pub trait Input: BaseIo {
    fn get_screen(&self, screen_index: u16) -> Option<Screen>;

    fn get_all_screens(&self) -> Vec<Screen>;

    fn get_tally(&self, key: TallyKey) -> Option<Tally>;

    ///All tallies, or only those on `screen_index`.
    fn get_all_tallies(&self, screen_index: Option<u16>) -> Vec<Tally>;

    fn subscribe(&self) -> broadcast::Receiver<InputEvent>;

    ///The color this input reports for `conf`, if `conf` is something this input provides.
    fn get_tally_color(&self, conf: &SingleTallyConfig) -> Option<TallyColor> {
        let matched = self.find_tally_match(MatchTarget::Config(conf), conf.tally_type())?;
        let tally = self.get_tally(conf.tally_key())?;
        Some(tally.color(conf.tally_type()) & matched.color_mask() & conf.color_mask())
    }
}

///A tally sink.
#[async_trait]
pub trait Output: BaseIo {
    fn bindings(&self) -> &OutputBindings;

    ///Called when a bound tally changes, and once with full state when it is first bound.
    async fn on_receiver_tally_change(
        &self,
        source: &Arc<dyn Input>,
        tally: &Tally,
        changed: &ChangedProps,
    ) -> Result<(), TallyError>;

    ///The OR of every bound input's color for `tally` and `tally_type`.
    fn get_merged_tally(&self, tally: TallyRef<'_>, tally_type: TallyType) -> TallyColor {
        self.bindings().merged_color(tally, tally_type)
    }

    ///Changed lamps this output's config covers for `tally`.
    fn covered_changes(&self, tally: &Tally, changed: &ChangedProps) -> TallyType {
        changed
            .lamp_types()
            .lamps()
            .filter(|lamp| self.tally_matches(MatchTarget::Tally(tally), *lamp))
            .fold(TallyType::NO_TALLY, |acc, lamp| acc | lamp)
    }
}
