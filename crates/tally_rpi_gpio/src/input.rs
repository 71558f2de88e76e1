use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_core::{
    registry::{options_value, parse_options},
    BaseIo, InputEvent, Input, IoCore, Screen, SingleTallyConfig, Tally, TallyColor, TallyError,
    TallyKey, TallyTable,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::pins::{InputPin, PinFactory};

pub const GPIO_INPUT_NAMESPACE: &str = "input.gpio.GpioInput";

fn default_pull_up() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpioInputOptions {
    pub config: SingleTallyConfig,
    pub pin: u8,
    #[serde(default = "default_pull_up")]
    pub pull_up: bool,
}

///A button (or any contact closure) on a GPIO pin driving a single tally.
///
///While the pin is active the configured lamps show the config's color mask, otherwise off.
pub struct GpioInput {
    core: IoCore,
    options: GpioInputOptions,
    pins: Arc<dyn PinFactory>,
    table: Arc<TallyTable>,
    pin: Mutex<Option<Box<dyn InputPin>>>,
}

fn apply_state(table: &TallyTable, config: &SingleTallyConfig, active: bool) {
    let color = if active {
        config.color_mask()
    } else {
        TallyColor::Off
    };
    table.update_tally(config.tally_key(), |tally| {
        tally.set_color(config.tally_type(), color)
    });
}

impl GpioInput {
    pub fn new(options: GpioInputOptions, pins: Arc<dyn PinFactory>) -> Self {
        Self {
            core: IoCore::new(options.config.clone()),
            options,
            pins,
            table: Arc::new(TallyTable::default()),
            pin: Mutex::new(None),
        }
    }

    pub fn from_options(
        options: serde_json::Value,
        pins: Arc<dyn PinFactory>,
    ) -> Result<Self, TallyError> {
        let options = parse_options(GPIO_INPUT_NAMESPACE, options)?;
        Ok(Self::new(options, pins))
    }

    pub fn options(&self) -> &GpioInputOptions {
        &self.options
    }

    pub fn tally_key(&self) -> TallyKey {
        self.options.config.tally_key()
    }

    pub fn set_tally_state(&self, active: bool) {
        apply_state(&self.table, &self.options.config, active);
    }
}

#[async_trait]
impl BaseIo for GpioInput {
    fn namespace(&self) -> &'static str {
        GPIO_INPUT_NAMESPACE
    }

    fn core(&self) -> &IoCore {
        &self.core
    }

    fn serialize_options(&self) -> Result<serde_json::Value, TallyError> {
        options_value(GPIO_INPUT_NAMESPACE, &self.options)
    }

    async fn open(&self) -> Result<(), TallyError> {
        if self.is_running() {
            return Ok(());
        }
        let table = self.table.clone();
        let config = self.options.config.clone();
        let pin = self.pins.input_pin(
            self.options.pin,
            self.options.pull_up,
            Box::new(move |active| apply_state(&table, &config, active)),
        )?;
        let active = pin.is_active();
        *self.pin.lock().unwrap_or_else(PoisonError::into_inner) = Some(pin);

        self.table.add_tally(Tally::new(self.tally_key()));
        self.set_tally_state(active);
        self.core.set_running(true);
        info!(pin = self.options.pin, tally = %self.tally_key(), "gpio input open");
        Ok(())
    }

    async fn close(&self) -> Result<(), TallyError> {
        self.core.set_running(false);
        let pin = self.pin.lock().unwrap_or_else(PoisonError::into_inner).take();
        if pin.is_some() {
            debug!(pin = self.options.pin, "gpio input closed");
        }
        drop(pin);
        self.table.clear();
        Ok(())
    }
}

impl Input for GpioInput {
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
