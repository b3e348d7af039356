#[macro_use]
extern crate tracing;

use pressureloop::{LoopResult, Role, Settings};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    // rumqttc reports through the `log` facade
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("unable to forward log records: {e}");
    }
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("unable to install tracing subscriber: {e}");
    }
}

fn load_settings() -> LoopResult<Settings> {
    let mut settings = Settings::load()?;
    if let Some(role) = std::env::args().nth(1) {
        settings.role = role.parse::<Role>()?;
    }
    debug!("effective settings:\n{}", settings.to_yaml());
    Ok(settings)
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match pressureloop::run(&settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
