use crate::hub::SubscriptionHub;
use crate::now_ms;
use crate::protocol::ServerMessage;
use crate::state::SharedState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Periodic device-channel push: one device_update per device, then the full
/// device map. Skipped entirely while the simulation engine is down, so
/// subscribers never see stale data presented as fresh.
pub async fn poll_device_updates(
    hub: Arc<SubscriptionHub>,
    state: Arc<SharedState>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !state.modbus_running() {
                    debug!("simulation not running, skipping device push");
                    continue;
                }
                if hub.device_pool().is_empty() {
                    continue;
                }

                let devices = state.all_device_status();
                let timestamp = now_ms();
                let mut ids: Vec<_> = devices.keys().copied().collect();
                ids.sort_unstable();
                for id in ids {
                    if let Some(status) = devices.get(&id) {
                        let update = ServerMessage::device_update(id.to_string(), status.clone(), timestamp);
                        if let Ok(json) = update.to_json() {
                            hub.device_pool().broadcast(&json);
                        }
                    }
                }
                if let Ok(json) = ServerMessage::device_snapshot(&state).to_json() {
                    hub.device_pool().broadcast(&json);
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("device poller shutting down");
                    return;
                }
            }
        }
    }
}

/// Periodic system-channel push through the hub's bounded queue.
pub async fn poll_system_status(
    hub: Arc<SubscriptionHub>,
    state: Arc<SharedState>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Ok(json) = ServerMessage::system_snapshot(&state).to_json() {
                    hub.publish_system_status(json).await;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("system poller shutting down");
                    return;
                }
            }
        }
    }
}
