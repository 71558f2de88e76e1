//!Collects every IO type the daemon was built with into one registry.
#[cfg(any(feature = "rpi", feature = "devices"))]
use std::sync::Arc;

use tally_core::{IoRegistry, TallyError};
#[cfg(any(feature = "rpi", feature = "devices"))]
use tracing::info;

use crate::config::Settings;

//tally_rpi_gpio
#[cfg(feature = "rpi")]
use tally_rpi_gpio::pins::{MockPins, PinFactory, RppalPins};

//tally_devices
#[cfg(feature = "devices")]
use tally_devices::devices::rgbmatrix5x5::{DisplayProvider, MockDisplayProvider, NoDisplay};

#[cfg(feature = "rpi")]
fn gpio_pins(settings: &Settings) -> Result<Arc<dyn PinFactory>, TallyError> {
    if settings.mock_gpio() {
        info!("using mock gpio pins");
        Ok(Arc::new(MockPins::new()))
    } else {
        Ok(Arc::new(RppalPins::new()?))
    }
}

#[cfg(feature = "devices")]
fn display_provider(settings: &Settings) -> Arc<dyn DisplayProvider> {
    if settings.mock_rgbmatrix() {
        info!("using mock rgbmatrix5x5 display");
        Arc::new(MockDisplayProvider::new())
    } else {
        Arc::new(NoDisplay)
    }
}

#[cfg_attr(not(any(feature = "rpi", feature = "devices")), allow(unused_variables, unused_mut))]
pub fn build_registry(settings: &Settings) -> Result<IoRegistry, TallyError> {
    let mut registry = IoRegistry::new();

    //gpio inputs and leds
    #[cfg(feature = "rpi")]
    tally_rpi_gpio::register(&mut registry, gpio_pins(settings)?)?;

    //i2c displays
    #[cfg(feature = "devices")]
    tally_devices::register(&mut registry, display_provider(settings))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(all(feature = "rpi", feature = "devices"))]
    #[test]
    fn mocked_registry_has_every_type() {
        let settings = Settings {
            mock: "gpio,rgbmatrix".to_string(),
            ..Settings::default()
        };
        let registry = build_registry(&settings).unwrap();
        for namespace in [
            "input.gpio.GpioInput",
            "output.gpio.LED",
            "output.gpio.PWMLED",
            "output.gpio.RGBLED",
            "output.rgbmatrix5x5.Indicator",
            "output.rgbmatrix5x5.Matrix",
        ] {
            assert!(registry.contains(namespace), "{namespace} missing");
        }
    }
}
