//!Tally inputs and outputs on Raspberry Pi GPIO pins. Pin access goes through `rppal`, or an
//!in-memory mock when running without hardware.
use std::sync::Arc;

use tally_core::{Input, IoRegistry, Output, TallyError};

//internal error type for rpi gpio
pub mod error;

//pin access, real and mocked
pub mod pins;

//buttons
pub mod input;

//leds
pub mod output;

pub use rppal;

use input::{GpioInput, GPIO_INPUT_NAMESPACE};
use output::{GpioLed, LedKind};
use pins::PinFactory;

///Register every GPIO type with `registry`, all sharing `pins`.
pub fn register(registry: &mut IoRegistry, pins: Arc<dyn PinFactory>) -> Result<(), TallyError> {
    let input_pins = pins.clone();
    registry.register_input(GPIO_INPUT_NAMESPACE, move |options| {
        Ok(Arc::new(GpioInput::from_options(options, input_pins.clone())?) as Arc<dyn Input>)
    })?;

    for kind in [LedKind::Digital, LedKind::Pwm, LedKind::Rgb] {
        let led_pins = pins.clone();
        registry.register_output(kind.namespace(), move |options| {
            Ok(Arc::new(GpioLed::from_options(kind, options, led_pins.clone())?) as Arc<dyn Output>)
        })?;
    }
    Ok(())
}
