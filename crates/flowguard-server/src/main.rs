//! Main entry point for the Flowguard server.

use clap::Parser;
use flowguard_server::{
    AppContext,
    settings::{Cli, Settings},
    startup,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli)?;

    let _logging_guard = startup::init_logging(&settings.logging.logging_config())?;

    let shutdown = startup::wait_for_shutdown_signal();
    let context = AppContext::build(settings).await?;

    info!(
        servers = ?context.settings.nacos.server_addrs,
        namespace = %context.settings.nacos.namespace,
        "Flowguard server started"
    );

    shutdown.wait().await;
    info!("Flowguard server stopped");
    Ok(())
}
