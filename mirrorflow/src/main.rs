use std::error::Error;

use tracing::{error, info};

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let settings = cmdline::settings(&matches)?;

    info!(
        sources = settings.source_configs.len(),
        producers = settings.relay.num_senders,
        streams = settings.relay.num_streams,
        queue_size = settings.relay.channel_capacity,
        "Starting with args"
    );
    mirrorflow_core::run(settings, mirrorflow_core::shared::shutdown_signal())
        .await
        .map_err(|e| format!("Error running mirror: {e:?}"))?;

    Ok(())
}
