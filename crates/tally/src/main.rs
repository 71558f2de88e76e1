use std::sync::Arc;

use tally::{
    config::{FileConfigStore, Settings},
    manager::Manager,
    registry::build_registry,
};
use tally_core::TallyError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn run(settings: Settings) -> Result<(), TallyError> {
    let registry = build_registry(&settings)?;
    info!(
        config_file = %settings.config_file.display(),
        readonly = settings.readonly,
        "tally daemon starting up"
    );
    let store = Arc::new(FileConfigStore::new(&settings.config_file));
    let mut manager = Manager::new(registry, store, settings.readonly);
    manager.open().await?;

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
    }
    info!("shutting down");
    manager.close().await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tally=info,tally_core=info,tally_rpi_gpio=info,tally_devices=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        warn!("at most one parameter, the settings file, is expected.");
        warn!("got {}", args.join(","));
        return;
    }

    match Settings::load(args.get(1).map(String::as_str)) {
        Ok(settings) => match run(settings).await {
            Ok(_) => info!("tally daemon shut down"),
            Err(err) => error!("tally daemon exited with an error: {err}"),
        },
        Err(err) => error!("failed to load settings: {:?}", err),
    }
}
