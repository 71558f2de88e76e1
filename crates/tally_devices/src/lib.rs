//!Tally outputs for displays attached over i2c.
use std::sync::Arc;

use tally_core::{IoRegistry, Output, TallyError};

pub mod devices;

use devices::rgbmatrix5x5::{
    DisplayProvider, Indicator, Matrix, INDICATOR_NAMESPACE, MATRIX_NAMESPACE,
};

///Register the display outputs. `provider` opens the physical display for each of them.
pub fn register(
    registry: &mut IoRegistry,
    provider: Arc<dyn DisplayProvider>,
) -> Result<(), TallyError> {
    let indicator_provider = provider.clone();
    registry.register_output(INDICATOR_NAMESPACE, move |options| {
        let indicator = Indicator::from_options(options, indicator_provider.clone())?;
        Ok(Arc::new(indicator) as Arc<dyn Output>)
    })?;
    registry.register_output(MATRIX_NAMESPACE, move |options| {
        Ok(Arc::new(Matrix::from_options(options, provider.clone())?) as Arc<dyn Output>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use devices::rgbmatrix5x5::MockDisplayProvider;
    use tally_core::{BaseIo, IoKind, IoRecord};

    #[test]
    fn registers_displays() {
        let mut registry = IoRegistry::new();
        register(&mut registry, Arc::new(MockDisplayProvider::new())).unwrap();
        assert_eq!(
            registry.namespaces(IoKind::Output).collect::<Vec<_>>(),
            vec![INDICATOR_NAMESPACE, MATRIX_NAMESPACE]
        );

        let record = IoRecord {
            namespace: MATRIX_NAMESPACE.to_string(),
            options: serde_json::json!({"config": {"tally_index": 1, "screen_index": 2}}),
        };
        let matrix = registry.deserialize_output(&record).unwrap();
        assert_eq!(matrix.serialize().unwrap().options["brightness_scale"], 1.0);
    }
}
