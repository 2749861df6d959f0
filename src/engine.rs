use crate::cache::SimulationCache;
use crate::config::{Device, DeviceId};
use crate::generator;
use crate::now_ms;
use crate::registers::{RegisterError, RegisterStore};
use crate::state::{DeviceStatus, SharedState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error("error limit exceeded ({0} errors within the reset window)")]
    ErrorLimitExceeded(u32),
    #[error("engine already stopped")]
    Stopped,
}

/// The simulation loop. One engine owns the full device table; each scan it
/// refreshes every device whose interval has elapsed, writing generated
/// values into the register store and publishing the snapshot.
///
/// Errors on individual devices are tolerated up to `max_errors` within one
/// rolling window; crossing the limit stops the engine for good.
pub struct SimulationEngine {
    devices: Vec<Device>,
    store: Arc<RegisterStore>,
    cache: Arc<SimulationCache>,
    state: Arc<SharedState>,
    tick_period: Duration,
    max_errors: u32,
    error_window: Duration,
    error_count: u32,
    window_started: Instant,
    last_updates: HashMap<DeviceId, Option<Instant>>,
    stopped: bool,
}

impl SimulationEngine {
    pub fn new(
        devices: Vec<Device>,
        store: Arc<RegisterStore>,
        cache: Arc<SimulationCache>,
        state: Arc<SharedState>,
        tick_period: Duration,
        max_errors: u32,
        error_window: Duration,
    ) -> Self {
        // Every device is due on the first scan.
        let last_updates = devices.iter().map(|d| (d.id, None)).collect();
        Self {
            devices,
            store,
            cache,
            state,
            tick_period,
            max_errors,
            error_window,
            error_count: 0,
            window_started: Instant::now(),
            last_updates,
            stopped: false,
        }
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    /// One scan over the device table. A failing device is skipped for this
    /// scan; its siblings still refresh. Only at the end of the scan does the
    /// accumulated error count get compared against the limit.
    pub fn tick(&mut self, now: Instant) -> Result<(), EngineError> {
        if self.stopped {
            return Err(EngineError::Stopped);
        }

        self.cache.sweep(now);

        if now.duration_since(self.window_started) >= self.error_window {
            if self.error_count > 0 {
                info!(errors = self.error_count, "error window elapsed, counter reset");
                self.state.clear_error();
            }
            self.error_count = 0;
            self.window_started = now;
        }

        for device in self.devices.clone() {
            let due = match self.last_updates.get(&device.id) {
                Some(Some(at)) => now.duration_since(*at) >= device.update_interval,
                _ => true,
            };
            if !due {
                continue;
            }

            match self.refresh_device(&device, now) {
                Ok(()) => {
                    self.last_updates.insert(device.id, Some(now));
                }
                Err(err) => {
                    warn!(device = device.id, %err, "device refresh failed");
                    self.state.set_error(err.to_string());
                    self.error_count += 1;
                }
            }
        }

        if self.error_count >= self.max_errors {
            self.stopped = true;
            error!(errors = self.error_count, "error limit exceeded, stopping engine");
            return Err(EngineError::ErrorLimitExceeded(self.error_count));
        }
        Ok(())
    }

    /// Refresh one device: reuse the cached value set while it is fresh,
    /// otherwise generate and memoize a new one, then write it to the
    /// register bank and publish the snapshot.
    fn refresh_device(&mut self, device: &Device, now: Instant) -> Result<(), RegisterError> {
        let values = match self.cache.get(device.id, now) {
            Some(values) => values,
            None => {
                let values = generator::generate(device.kind);
                self.cache.put(device.id, values.clone(), now);
                values
            }
        };

        self.store.write_set(device.id, &values)?;
        self.state.update_device_status(
            device.id,
            DeviceStatus {
                name: device.name.clone(),
                data: values,
                last_update: now_ms(),
            },
        );
        Ok(())
    }

    /// Drive the scan loop until shutdown or a fatal error. Marks the
    /// simulation running flag for the lifetime of the loop.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        self.state.set_modbus_running(true);
        info!(devices = self.devices.len(), period_ms = self.tick_period.as_millis() as u64, "simulation engine started");

        let mut interval = tokio::time::interval(self.tick_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick(Instant::now()) {
                        self.state.set_modbus_running(false);
                        return Err(err);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("simulation engine shutting down");
                        self.state.set_modbus_running(false);
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    fn engine_with_devices(devices: Vec<Device>) -> SimulationEngine {
        let config = SimConfig::default();
        let ids: Vec<DeviceId> = devices.iter().map(|d| d.id).collect();
        SimulationEngine::new(
            devices,
            Arc::new(RegisterStore::new(ids)),
            Arc::new(SimulationCache::new(
                config.cache_ttl(),
                config.cache_sweep_interval(),
            )),
            Arc::new(SharedState::new()),
            config.tick_period(),
            config.max_errors,
            config.error_window(),
        )
    }

    fn full_table() -> Vec<Device> {
        SimConfig::default().device_table()
    }

    #[test]
    fn first_scan_refreshes_every_device() {
        let devices = full_table();
        let state = Arc::new(SharedState::new());
        let ids: Vec<DeviceId> = devices.iter().map(|d| d.id).collect();
        let config = SimConfig::default();
        let mut engine = SimulationEngine::new(
            devices,
            Arc::new(RegisterStore::new(ids.clone())),
            Arc::new(SimulationCache::new(
                config.cache_ttl(),
                config.cache_sweep_interval(),
            )),
            state.clone(),
            config.tick_period(),
            config.max_errors,
            config.error_window(),
        );

        engine.tick(Instant::now()).unwrap();
        for id in ids {
            assert!(state.get_device_status(id).is_some(), "device {id} missing");
        }
    }

    #[test]
    fn interval_gates_refresh_between_scans() {
        let devices = full_table();
        let state = Arc::new(SharedState::new());
        let ids: Vec<DeviceId> = devices.iter().map(|d| d.id).collect();
        let config = SimConfig::default();
        let mut engine = SimulationEngine::new(
            devices,
            Arc::new(RegisterStore::new(ids)),
            Arc::new(SimulationCache::new(
                config.cache_ttl(),
                config.cache_sweep_interval(),
            )),
            state.clone(),
            config.tick_period(),
            config.max_errors,
            config.error_window(),
        );

        let t0 = Instant::now();
        engine.tick(t0).unwrap();
        let ac_first = state.get_device_status(3).unwrap();
        let plc_first = state.get_device_status(5).unwrap();

        // 300 ms later: only the 200 ms PLC is due again. The AC controller
        // (2 s interval) keeps its snapshot.
        engine.tick(t0 + Duration::from_millis(300)).unwrap();
        let ac_second = state.get_device_status(3).unwrap();
        assert_eq!(ac_first, ac_second);
        // PLC refreshed from the still-fresh cache entry, so values match
        // but the refresh itself did not error.
        assert!(state.get_device_status(5).unwrap().data == plc_first.data);
    }

    #[test]
    fn store_and_snapshot_agree_after_refresh() {
        let devices = full_table();
        let state = Arc::new(SharedState::new());
        let store = Arc::new(RegisterStore::new(devices.iter().map(|d| d.id)));
        let config = SimConfig::default();
        let mut engine = SimulationEngine::new(
            devices,
            store.clone(),
            Arc::new(SimulationCache::new(
                config.cache_ttl(),
                config.cache_sweep_interval(),
            )),
            state.clone(),
            config.tick_period(),
            config.max_errors,
            config.error_window(),
        );

        engine.tick(Instant::now()).unwrap();
        let snap = state.get_device_status(2).unwrap();
        for item in &snap.data {
            let stored = store.read_register(2, item.space, item.address).unwrap();
            assert_eq!(stored, item.value);
        }
    }

    #[test]
    fn cache_hit_republishes_identical_values() {
        let devices = full_table();
        let state = Arc::new(SharedState::new());
        let ids: Vec<DeviceId> = devices.iter().map(|d| d.id).collect();
        let config = SimConfig::default();
        let mut engine = SimulationEngine::new(
            devices,
            Arc::new(RegisterStore::new(ids)),
            Arc::new(SimulationCache::new(
                config.cache_ttl(),
                config.cache_sweep_interval(),
            )),
            state.clone(),
            config.tick_period(),
            config.max_errors,
            config.error_window(),
        );

        let t0 = Instant::now();
        engine.tick(t0).unwrap();
        let first = state.get_device_status(2).unwrap();

        // 1 s later the meter (0.5 s interval) is due, but the cached set
        // (5 s TTL) is still fresh: same values come back out.
        engine.tick(t0 + Duration::from_secs(1)).unwrap();
        let second = state.get_device_status(2).unwrap();
        assert_eq!(first.data, second.data);
    }

    // A device whose id has no register bank fails every refresh, which
    // exercises the error budget without touching the generator.
    fn poisoned_table() -> Vec<Device> {
        let mut devices = full_table();
        devices.push(Device {
            id: 99,
            name: "Ghost".to_owned(),
            class: crate::config::DeviceClass::Controller,
            kind: crate::config::DeviceKind::LightController,
            update_interval: Duration::from_millis(0),
        });
        devices
    }

    #[test]
    fn engine_stops_after_error_limit() {
        let devices = poisoned_table();
        let ids: Vec<DeviceId> = devices.iter().filter(|d| d.id != 99).map(|d| d.id).collect();
        let state = Arc::new(SharedState::new());
        let config = SimConfig::default();
        let mut engine = SimulationEngine::new(
            devices,
            Arc::new(RegisterStore::new(ids)),
            Arc::new(SimulationCache::new(
                config.cache_ttl(),
                config.cache_sweep_interval(),
            )),
            state.clone(),
            config.tick_period(),
            3,
            config.error_window(),
        );

        let t0 = Instant::now();
        // One failure per scan; the third crosses the limit.
        engine.tick(t0).unwrap();
        engine.tick(t0 + Duration::from_millis(100)).unwrap();
        let err = engine.tick(t0 + Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, EngineError::ErrorLimitExceeded(3)));
        assert!(state.last_error().is_some());

        // Once stopped, stays stopped.
        let err = engine.tick(t0 + Duration::from_millis(300)).unwrap_err();
        assert!(matches!(err, EngineError::Stopped));
    }

    #[test]
    fn healthy_devices_survive_a_sibling_failure() {
        let devices = poisoned_table();
        let ids: Vec<DeviceId> = devices.iter().filter(|d| d.id != 99).map(|d| d.id).collect();
        let state = Arc::new(SharedState::new());
        let config = SimConfig::default();
        let mut engine = SimulationEngine::new(
            devices,
            Arc::new(RegisterStore::new(ids.clone())),
            Arc::new(SimulationCache::new(
                config.cache_ttl(),
                config.cache_sweep_interval(),
            )),
            state.clone(),
            config.tick_period(),
            3,
            config.error_window(),
        );

        engine.tick(Instant::now()).unwrap();
        for id in ids {
            assert!(state.get_device_status(id).is_some());
        }
        assert!(state.get_device_status(99).is_none());
    }

    #[test]
    fn error_window_resets_the_counter() {
        let devices = poisoned_table();
        let ids: Vec<DeviceId> = devices.iter().filter(|d| d.id != 99).map(|d| d.id).collect();
        let state = Arc::new(SharedState::new());
        let config = SimConfig::default();
        let window = Duration::from_secs(60);
        let mut engine = SimulationEngine::new(
            devices,
            Arc::new(RegisterStore::new(ids)),
            Arc::new(SimulationCache::new(
                config.cache_ttl(),
                config.cache_sweep_interval(),
            )),
            state.clone(),
            config.tick_period(),
            3,
            window,
        );

        let t0 = Instant::now();
        engine.tick(t0).unwrap();
        engine.tick(t0 + Duration::from_millis(100)).unwrap();

        // Window elapses before the third failure: counter starts over and
        // the published error clears.
        engine.tick(t0 + window + Duration::from_millis(200)).unwrap();
        engine.tick(t0 + window + Duration::from_millis(300)).unwrap();
        assert!(state.last_error().is_some());
    }

    #[test]
    fn stopped_engine_rejects_ticks() {
        let mut engine = engine_with_devices(Vec::new());
        engine.stopped = true;
        assert!(matches!(
            engine.tick(Instant::now()),
            Err(EngineError::Stopped)
        ));
    }
}
