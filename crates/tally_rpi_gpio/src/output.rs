use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_core::{
    registry::{options_value, parse_options},
    BaseIo, ChangedProps, Input, IoCore, MatchTarget, OptionError, Output, OutputBindings,
    SingleTallyConfig, Tally, TallyColor, TallyError, TallyProp, TallyType,
};
use tracing::{debug, info};

use crate::{
    error::GpioError,
    pins::{OutputPin, PinFactory, PinMode, DEFAULT_PWM_FREQUENCY},
};

pub const LED_NAMESPACE: &str = "output.gpio.LED";
pub const PWM_LED_NAMESPACE: &str = "output.gpio.PWMLED";
pub const RGB_LED_NAMESPACE: &str = "output.gpio.RGBLED";

fn default_true() -> bool {
    true
}

fn default_brightness_scale() -> f64 {
    1.0
}

fn check_brightness_scale(value: f64) -> Result<(), OptionError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(OptionError::OutOfRange {
            name: "brightness_scale",
            min: 0.0,
            max: 1.0,
            value,
        })
    }
}

///Options for [`LED_NAMESPACE`] and [`PWM_LED_NAMESPACE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedOptions {
    pub config: SingleTallyConfig,
    pub pin: u8,
    #[serde(default = "default_true")]
    pub active_high: bool,
    #[serde(default = "default_brightness_scale")]
    pub brightness_scale: f64,
}

///Options for [`RGB_LED_NAMESPACE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RgbLedOptions {
    pub config: SingleTallyConfig,
    ///red, green and blue pins
    pub pins: Vec<u8>,
    #[serde(default = "default_true")]
    pub active_high: bool,
    #[serde(default = "default_brightness_scale")]
    pub brightness_scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedKind {
    Digital,
    Pwm,
    Rgb,
}

impl LedKind {
    pub fn namespace(self) -> &'static str {
        match self {
            LedKind::Digital => LED_NAMESPACE,
            LedKind::Pwm => PWM_LED_NAMESPACE,
            LedKind::Rgb => RGB_LED_NAMESPACE,
        }
    }
}

///Channel levels for each color, before brightness.
pub fn color_rgb(color: TallyColor) -> [f64; 3] {
    match color {
        TallyColor::Off => [0.0, 0.0, 0.0],
        TallyColor::Red => [1.0, 0.0, 0.0],
        TallyColor::Green => [0.0, 1.0, 0.0],
        TallyColor::Amber => [1.0, 0.75, 0.0],
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedState {
    pub color: TallyColor,
    pub brightness: f64,
}

struct LedDevice {
    pins: Vec<Box<dyn OutputPin>>,
}

impl LedDevice {
    fn write(&mut self, kind: LedKind, state: LedState) -> Result<(), GpioError> {
        let levels: Vec<f64> = match kind {
            LedKind::Digital => vec![f64::from(u8::from(state.color.is_on()))],
            LedKind::Pwm if state.color.is_on() => vec![state.brightness],
            LedKind::Pwm => vec![0.0],
            LedKind::Rgb => color_rgb(state.color)
                .iter()
                .map(|level| level * state.brightness)
                .collect(),
        };
        for (pin, level) in self.pins.iter_mut().zip(levels) {
            pin.set_value(level)?;
        }
        Ok(())
    }

    fn off(&mut self) -> Result<(), GpioError> {
        for pin in self.pins.iter_mut() {
            pin.set_value(0.0)?;
        }
        Ok(())
    }
}

///A single color LED, a dimmable LED or an RGB LED showing one tally.
pub struct GpioLed {
    core: IoCore,
    bindings: OutputBindings,
    kind: LedKind,
    pin_numbers: Vec<u8>,
    active_high: bool,
    brightness_scale: f64,
    pins: Arc<dyn PinFactory>,
    device: Mutex<Option<LedDevice>>,
    state: Mutex<Option<LedState>>,
}

impl GpioLed {
    fn build(
        kind: LedKind,
        config: SingleTallyConfig,
        pin_numbers: Vec<u8>,
        active_high: bool,
        brightness_scale: f64,
        pins: Arc<dyn PinFactory>,
    ) -> Result<Self, TallyError> {
        check_brightness_scale(brightness_scale)?;
        Ok(Self {
            core: IoCore::new(config),
            bindings: OutputBindings::new(),
            kind,
            pin_numbers,
            active_high,
            brightness_scale,
            pins,
            device: Mutex::new(None),
            state: Mutex::new(None),
        })
    }

    ///`kind` must be [`LedKind::Digital`] or [`LedKind::Pwm`].
    pub fn led(
        kind: LedKind,
        options: LedOptions,
        pins: Arc<dyn PinFactory>,
    ) -> Result<Self, TallyError> {
        if kind == LedKind::Rgb {
            return Err(TallyError::device("rgb leds need three pins"));
        }
        Self::build(
            kind,
            options.config,
            vec![options.pin],
            options.active_high,
            options.brightness_scale,
            pins,
        )
    }

    pub fn rgb(options: RgbLedOptions, pins: Arc<dyn PinFactory>) -> Result<Self, TallyError> {
        if options.pins.len() != 3 {
            return Err(OptionError::InvalidLength {
                name: "pins",
                min: 3,
                max: 3,
                len: options.pins.len(),
            }
            .into());
        }
        Self::build(
            LedKind::Rgb,
            options.config,
            options.pins,
            options.active_high,
            options.brightness_scale,
            pins,
        )
    }

    pub fn from_options(
        kind: LedKind,
        options: serde_json::Value,
        pins: Arc<dyn PinFactory>,
    ) -> Result<Self, TallyError> {
        match kind {
            LedKind::Rgb => Self::rgb(parse_options(kind.namespace(), options)?, pins),
            _ => Self::led(kind, parse_options(kind.namespace(), options)?, pins),
        }
    }

    pub fn kind(&self) -> LedKind {
        self.kind
    }

    fn single_config(&self) -> Result<&SingleTallyConfig, TallyError> {
        self.core.config().single()
    }

    fn lock_device(&self) -> MutexGuard<'_, Option<LedDevice>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<LedState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    ///What the LED currently shows, `None` until the first update after opening.
    pub fn current_state(&self) -> Option<LedState> {
        *self.lock_state()
    }

    pub fn set_led(&self, state: LedState) -> Result<(), TallyError> {
        let mut device = self.lock_device();
        let Some(device) = device.as_mut() else {
            return Ok(());
        };
        device.write(self.kind, state)?;
        debug!(
            namespace = self.kind.namespace(),
            color = %state.color,
            brightness = state.brightness,
            "led updated"
        );
        *self.lock_state() = Some(state);
        Ok(())
    }
}

#[async_trait]
impl BaseIo for GpioLed {
    fn namespace(&self) -> &'static str {
        self.kind.namespace()
    }

    fn core(&self) -> &IoCore {
        &self.core
    }

    fn serialize_options(&self) -> Result<serde_json::Value, TallyError> {
        let config = self.single_config()?.clone();
        match self.kind {
            LedKind::Rgb => options_value(
                self.namespace(),
                &RgbLedOptions {
                    config,
                    pins: self.pin_numbers.clone(),
                    active_high: self.active_high,
                    brightness_scale: self.brightness_scale,
                },
            ),
            _ => options_value(
                self.namespace(),
                &LedOptions {
                    config,
                    pin: self.pin_numbers[0],
                    active_high: self.active_high,
                    brightness_scale: self.brightness_scale,
                },
            ),
        }
    }

    async fn open(&self) -> Result<(), TallyError> {
        if self.is_running() {
            return Ok(());
        }
        let mode = match self.kind {
            LedKind::Digital => PinMode::Digital,
            _ => PinMode::Pwm {
                frequency: DEFAULT_PWM_FREQUENCY,
            },
        };
        //pins acquired so far are released on error
        let pins = self
            .pin_numbers
            .iter()
            .map(|pin| self.pins.output_pin(*pin, mode, self.active_high))
            .collect::<Result<Vec<_>, GpioError>>()?;
        *self.lock_device() = Some(LedDevice { pins });
        self.core.set_running(true);
        info!(namespace = self.namespace(), pins = ?self.pin_numbers, "led open");
        Ok(())
    }

    async fn close(&self) -> Result<(), TallyError> {
        self.core.set_running(false);
        let device = self.lock_device().take();
        *self.lock_state() = None;
        if let Some(mut device) = device {
            device.off()?;
            debug!(namespace = self.namespace(), "led closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Output for GpioLed {
    fn bindings(&self) -> &OutputBindings {
        &self.bindings
    }

    async fn on_receiver_tally_change(
        &self,
        _source: &Arc<dyn Input>,
        tally: &Tally,
        changed: &ChangedProps,
    ) -> Result<(), TallyError> {
        if !self.is_running()
            || !self.tally_matches(MatchTarget::Tally(tally), TallyType::ALL_TALLY)
        {
            return Ok(());
        }
        let covered = self.covered_changes(tally, changed);
        let brightness_changed =
            self.kind != LedKind::Digital && changed.contains(TallyProp::Brightness);
        if covered.is_empty() && !brightness_changed {
            return Ok(());
        }
        let state = LedState {
            color: self.get_merged_tally(tally.into(), self.single_config()?.tally_type()),
            brightness: tally.normalized_brightness() * self.brightness_scale,
        };
        if self.current_state() == Some(state) {
            return Ok(());
        }
        self.set_led(state)
    }
}
