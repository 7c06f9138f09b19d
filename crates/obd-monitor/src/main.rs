//! OBD-II Monitor - Main Entry Point

use obd_monitor::{config::MonitorConfig, init_logging, run};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let config = MonitorConfig::load(path.as_deref())?;
    init_logging(&config.log_level, config.json_logs)?;

    info!("=== OBD-II Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Adapter {} at {} baud", config.device, config.baud_rate);

    run(config).await
}
