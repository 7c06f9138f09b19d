//! OBD-II Monitor
//!
//! Connects to an ELM327 adapter, polls the configured PIDs and logs every
//! decoded value and trouble code.

pub mod config;

use crate::config::MonitorConfig;
use obd_protocol::ObdEvent;
use obd_scheduler::{connect_serial, Connection, ObdHandle};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
pub fn init_logging(
    level: &str,
    json: bool,
) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}

/// Run the monitor until the link drops or ctrl-c
pub async fn run(config: MonitorConfig) -> anyhow::Result<()> {
    let Connection {
        handle,
        mut events,
        task,
    } = connect_serial(&config.device, config.baud_rate, config.client.clone())?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(&handle, &config, event)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                if !request_disconnect(&handle).await {
                    break;
                }
            }
        }
    }

    task.await??;
    Ok(())
}

fn handle_event(
    handle: &ObdHandle,
    config: &MonitorConfig,
    event: ObdEvent,
) -> anyhow::Result<()> {
    match event {
        ObdEvent::Connected => {
            info!("Connected to adapter on {}", config.device);
            // Registered off the event loop so events keep draining meanwhile
            tokio::spawn(start_pollers(handle.clone(), config.clone()));
        }
        ObdEvent::Telemetry(reply) => {
            info!(target: "telemetry", "{}", serde_json::to_string(&reply)?);
        }
        ObdEvent::TroubleCodes(report) => {
            let event = serde_json::json!({ "value": report });
            warn!(target: "requestdtc", "{}", event);
        }
        ObdEvent::LinkError(e) => error!("Adapter link error: {}", e),
        ObdEvent::Disconnected { cause } => match cause {
            Some(cause) => warn!("Adapter disconnected: {}", cause),
            None => info!("Adapter disconnected"),
        },
    }
    Ok(())
}

/// Ask the session to disconnect. Returns false when it had already ended.
async fn request_disconnect(handle: &ObdHandle) -> bool {
    match handle.disconnect().await {
        Ok(()) => true,
        Err(e) => {
            info!("Session already closed: {}", e);
            false
        }
    }
}

async fn start_pollers(handle: ObdHandle, config: MonitorConfig) {
    for name in &config.pollers {
        if let Err(e) = handle.add_poller(name).await {
            warn!("Skipping poller {}: {}", name, e);
        }
    }

    match handle.start_polling(config.poll_interval()).await {
        Ok(period) => info!("Polling {} PIDs every {:?}", config.pollers.len(), period),
        Err(e) => warn!("Could not start polling: {}", e),
    }

    if config.request_dtc_on_connect {
        if let Err(e) = handle.request_value_by_name("requestdtc", 0, true).await {
            warn!("Trouble code request failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::ClientConfig;

    #[tokio::test]
    async fn test_disconnect_after_session_ended() {
        let (stream, adapter) = tokio::io::duplex(1024);
        let Connection { handle, task, .. } =
            obd_scheduler::connect(stream, ClientConfig::default());

        drop(adapter);
        task.await.unwrap().unwrap();

        assert!(!request_disconnect(&handle).await);
    }

    #[tokio::test]
    async fn test_disconnect_live_session() {
        let (stream, _adapter) = tokio::io::duplex(1024);
        let Connection { handle, task, .. } =
            obd_scheduler::connect(stream, ClientConfig::default());

        assert!(request_disconnect(&handle).await);
        task.await.unwrap().unwrap();
    }
}
