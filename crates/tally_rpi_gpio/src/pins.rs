//!Pin access for the GPIO devices.
//!
//!Devices ask a [`PinFactory`] for pins. [`RppalPins`] hands out real Raspberry Pi pins and
//![`MockPins`] keeps pin state in memory and logs it, for running without hardware.
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rppal::gpio::{self as rpi, Level, Trigger};
use tracing::{debug, error};

use crate::error::GpioError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PinMode {
    Digital,
    //software pwm, can be noisy
    Pwm { frequency: f64 },
}

pub const DEFAULT_PWM_FREQUENCY: f64 = 100.0;

///What the pin should physically output for a logical `value` in `0.0..=1.0`.
pub fn physical_value(mode: PinMode, active_high: bool, value: f64) -> f64 {
    let value = value.clamp(0.0, 1.0);
    match (mode, active_high) {
        (PinMode::Digital, true) => f64::from(u8::from(value > 0.0)),
        (PinMode::Digital, false) => f64::from(u8::from(value <= 0.0)),
        (PinMode::Pwm { .. }, true) => value,
        (PinMode::Pwm { .. }, false) => 1.0 - value,
    }
}

pub trait OutputPin: Send {
    ///Set the logical value, `0.0` is off and `1.0` fully on.
    fn set_value(&mut self, value: f64) -> Result<(), GpioError>;
}

pub trait InputPin: Send {
    fn is_active(&self) -> bool;
}

///Called with the new active state whenever an input pin changes.
pub type PinCallback = Box<dyn FnMut(bool) + Send>;

pub trait PinFactory: Send + Sync {
    fn output_pin(
        &self,
        pin: u8,
        mode: PinMode,
        active_high: bool,
    ) -> Result<Box<dyn OutputPin>, GpioError>;

    ///A pull-up input is active when pulled low.
    fn input_pin(
        &self,
        pin: u8,
        pull_up: bool,
        on_change: PinCallback,
    ) -> Result<Box<dyn InputPin>, GpioError>;
}

pub struct RppalPins {
    gpio: rpi::Gpio,
}

impl RppalPins {
    pub fn new() -> Result<Self, GpioError> {
        let gpio = rpi::Gpio::new()?;
        Ok(Self { gpio })
    }
}

struct RppalOutput {
    pin: rpi::OutputPin,
    mode: PinMode,
    active_high: bool,
}

impl OutputPin for RppalOutput {
    fn set_value(&mut self, value: f64) -> Result<(), GpioError> {
        let physical = physical_value(self.mode, self.active_high, value);
        match self.mode {
            PinMode::Digital => {
                let level = if physical > 0.0 { Level::High } else { Level::Low };
                self.pin.write(level);
            }
            PinMode::Pwm { frequency } => self.pin.set_pwm_frequency(frequency, physical)?,
        }
        Ok(())
    }
}

struct RppalInput {
    pin: rpi::InputPin,
    active_level: Level,
}

impl InputPin for RppalInput {
    fn is_active(&self) -> bool {
        self.pin.read() == self.active_level
    }
}

impl PinFactory for RppalPins {
    fn output_pin(
        &self,
        pin: u8,
        mode: PinMode,
        active_high: bool,
    ) -> Result<Box<dyn OutputPin>, GpioError> {
        let pin = self
            .gpio
            .get(pin)
            .map_err(|source| GpioError::Pin { pin, source })?
            .into_output();
        let mut output = RppalOutput {
            pin,
            mode,
            active_high,
        };
        output.set_value(0.0)?;
        Ok(Box::new(output))
    }

    fn input_pin(
        &self,
        pin: u8,
        pull_up: bool,
        mut on_change: PinCallback,
    ) -> Result<Box<dyn InputPin>, GpioError> {
        let number = pin;
        let pin = self
            .gpio
            .get(pin)
            .map_err(|source| GpioError::Pin { pin, source })?;
        let (mut pin, active_level) = if pull_up {
            (pin.into_input_pullup(), Level::Low)
        } else {
            (pin.into_input_pulldown(), Level::High)
        };
        pin.set_async_interrupt(Trigger::Both, move |level| on_change(level == active_level))
            .map_err(|source| GpioError::Pin {
                pin: number,
                source,
            })?;
        Ok(Box::new(RppalInput { pin, active_level }))
    }
}

type SharedCallback = Arc<Mutex<PinCallback>>;

#[derive(Default)]
struct MockState {
    claimed: HashSet<u8>,
    outputs: HashMap<u8, f64>,
    inputs: HashMap<u8, (bool, SharedCallback)>,
}

///In-memory pins. Clones share state, so a test can keep one to drive inputs and read outputs.
#[derive(Clone, Default)]
pub struct MockPins {
    state: Arc<Mutex<MockState>>,
}

fn lock_state(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockPins {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&self, pin: u8) -> Result<(), GpioError> {
        if lock_state(&self.state).claimed.insert(pin) {
            Ok(())
        } else {
            Err(GpioError::PinBusy { pin })
        }
    }

    ///The physical value last written to an output pin.
    pub fn output_value(&self, pin: u8) -> Option<f64> {
        lock_state(&self.state).outputs.get(&pin).copied()
    }

    pub fn is_claimed(&self, pin: u8) -> bool {
        lock_state(&self.state).claimed.contains(&pin)
    }

    ///Drive an input pin, firing its callback if the state changed.
    pub fn drive(&self, pin: u8, active: bool) {
        let callback = {
            let mut state = lock_state(&self.state);
            match state.inputs.get_mut(&pin) {
                Some((current, callback)) if *current != active => {
                    *current = active;
                    Some(callback.clone())
                }
                _ => None,
            }
        };
        if let Some(callback) = callback {
            debug!(pin, active, "mock input pin changed");
            let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
            (*callback)(active);
        }
    }
}

struct MockOutput {
    pin: u8,
    mode: PinMode,
    active_high: bool,
    state: Arc<Mutex<MockState>>,
}

impl OutputPin for MockOutput {
    fn set_value(&mut self, value: f64) -> Result<(), GpioError> {
        let physical = physical_value(self.mode, self.active_high, value);
        debug!(pin = self.pin, value, physical, "mock output pin");
        lock_state(&self.state).outputs.insert(self.pin, physical);
        Ok(())
    }
}

impl Drop for MockOutput {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        state.claimed.remove(&self.pin);
        state.outputs.remove(&self.pin);
    }
}

struct MockInput {
    pin: u8,
    state: Arc<Mutex<MockState>>,
}

impl InputPin for MockInput {
    fn is_active(&self) -> bool {
        lock_state(&self.state)
            .inputs
            .get(&self.pin)
            .is_some_and(|(active, _)| *active)
    }
}

impl Drop for MockInput {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        state.claimed.remove(&self.pin);
        state.inputs.remove(&self.pin);
    }
}

impl PinFactory for MockPins {
    fn output_pin(
        &self,
        pin: u8,
        mode: PinMode,
        active_high: bool,
    ) -> Result<Box<dyn OutputPin>, GpioError> {
        self.claim(pin)?;
        let mut output = MockOutput {
            pin,
            mode,
            active_high,
            state: self.state.clone(),
        };
        if let Err(err) = output.set_value(0.0) {
            error!(pin, "mock output pin failed to reset: {err}");
        }
        Ok(Box::new(output))
    }

    fn input_pin(
        &self,
        pin: u8,
        _pull_up: bool,
        on_change: PinCallback,
    ) -> Result<Box<dyn InputPin>, GpioError> {
        self.claim(pin)?;
        lock_state(&self.state)
            .inputs
            .insert(pin, (false, Arc::new(Mutex::new(on_change))));
        Ok(Box::new(MockInput {
            pin,
            state: self.state.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn physical_values() {
        assert_eq!(physical_value(PinMode::Digital, true, 0.3), 1.0);
        assert_eq!(physical_value(PinMode::Digital, false, 0.3), 0.0);
        assert_eq!(physical_value(PinMode::Digital, false, 0.0), 1.0);
        let pwm = PinMode::Pwm { frequency: DEFAULT_PWM_FREQUENCY };
        assert_eq!(physical_value(pwm, true, 0.25), 0.25);
        assert_eq!(physical_value(pwm, false, 0.25), 0.75);
        assert_eq!(physical_value(pwm, true, 2.0), 1.0);
    }

    #[test]
    fn mock_pins_are_exclusive() {
        let pins = MockPins::new();
        let first = pins.output_pin(17, PinMode::Digital, true).unwrap();
        assert!(pins.output_pin(17, PinMode::Digital, true).is_err());
        assert!(pins.is_claimed(17));
        drop(first);
        assert!(!pins.is_claimed(17));
        assert!(pins.output_pin(17, PinMode::Digital, true).is_ok());
    }

    #[test]
    fn mock_inputs_fire_on_change() {
        let pins = MockPins::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let input = pins
            .input_pin(
                4,
                true,
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        pins.drive(4, true);
        pins.drive(4, true);
        assert!(input.is_active());
        pins.drive(4, false);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        drop(input);
        pins.drive(4, true);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
