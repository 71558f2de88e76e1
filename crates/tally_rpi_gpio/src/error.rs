//!Errors raised while claiming or driving pins.
use tally_core::error::TallyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("gpio pin {pin} is already in use")]
    PinBusy { pin: u8 },

    #[error("gpio pin {pin}: {source}")]
    Pin {
        pin: u8,
        #[source]
        source: rppal::gpio::Error,
    },

    #[error("gpio: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

impl From<GpioError> for TallyError {
    fn from(err: GpioError) -> Self {
        TallyError::Device(err.to_string())
    }
}
