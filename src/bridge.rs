use crate::cache::SimulationCache;
use crate::config::DeviceId;
use crate::registers::{RegisterError, RegisterSpace, RegisterStore};
use crate::state::SharedState;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error("register endpoint unavailable: {0}")]
    Unavailable(String),
}

/// Write access to device registers for inbound control commands. The seam
/// lets the hub stay ignorant of whether writes land in-process or travel
/// over a socket to a separate endpoint.
pub trait RegisterWriter: Send + Sync {
    fn write_coil(&self, device: DeviceId, address: u16, on: bool) -> Result<(), WriteError>;
    fn write_holding(&self, device: DeviceId, address: u16, value: u16) -> Result<(), WriteError>;
}

/// In-process writer used when the register store lives in the same process
/// as the monitor. Besides the bank itself, a write reconciles the published
/// snapshot and the simulation cache, so the value survives the next engine
/// cycle instead of being reverted by a cache hit.
pub struct LoopbackClient {
    store: Arc<RegisterStore>,
    state: Arc<SharedState>,
    cache: Arc<SimulationCache>,
}

impl LoopbackClient {
    pub fn new(
        store: Arc<RegisterStore>,
        state: Arc<SharedState>,
        cache: Arc<SimulationCache>,
    ) -> Self {
        Self {
            store,
            state,
            cache,
        }
    }

    fn write(
        &self,
        device: DeviceId,
        space: RegisterSpace,
        address: u16,
        value: u16,
    ) -> Result<(), WriteError> {
        self.store.write_register(device, space, address, value)?;
        self.state.patch_device_value(device, space, address, value);
        self.cache.patch(device, space, address, value);
        info!(device, ?space, address, value, "control write applied");
        Ok(())
    }
}

impl RegisterWriter for LoopbackClient {
    fn write_coil(&self, device: DeviceId, address: u16, on: bool) -> Result<(), WriteError> {
        self.write(device, RegisterSpace::Coil, address, u16::from(on))
    }

    fn write_holding(&self, device: DeviceId, address: u16, value: u16) -> Result<(), WriteError> {
        self.write(device, RegisterSpace::HoldingRegister, address, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::RegisterValue;
    use crate::state::DeviceStatus;
    use std::time::{Duration, Instant};

    fn fixture() -> (
        Arc<RegisterStore>,
        Arc<SharedState>,
        Arc<SimulationCache>,
        LoopbackClient,
    ) {
        let store = Arc::new(RegisterStore::new([6]));
        let state = Arc::new(SharedState::new());
        let cache = Arc::new(SimulationCache::new(
            Duration::from_secs(5),
            Duration::from_secs(300),
        ));
        let client = LoopbackClient::new(store.clone(), state.clone(), cache.clone());
        (store, state, cache, client)
    }

    #[test]
    fn holding_write_reconciles_all_three_views() {
        let (store, state, cache, client) = fixture();
        let t0 = Instant::now();
        let values = vec![
            RegisterValue::new(RegisterSpace::Coil, 0, 1),
            RegisterValue::new(RegisterSpace::HoldingRegister, 0, 50),
        ];
        store.write_set(6, &values).unwrap();
        cache.put(6, values.clone(), t0);
        state.update_device_status(
            6,
            DeviceStatus {
                name: "Smart Light Controller".to_owned(),
                data: values,
                last_update: 0,
            },
        );

        client.write_holding(6, 0, 80).unwrap();

        assert_eq!(
            store
                .read_register(6, RegisterSpace::HoldingRegister, 0)
                .unwrap(),
            80
        );
        let snap = state.get_device_status(6).unwrap();
        assert_eq!(snap.data[1].value, 80);
        let cached = cache.get(6, t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(cached[1].value, 80);
    }

    #[test]
    fn coil_write_maps_bool_onto_bit() {
        let (store, _, _, client) = fixture();
        client.write_coil(6, 0, true).unwrap();
        assert_eq!(store.read_register(6, RegisterSpace::Coil, 0).unwrap(), 1);
        client.write_coil(6, 0, false).unwrap();
        assert_eq!(store.read_register(6, RegisterSpace::Coil, 0).unwrap(), 0);
    }

    #[test]
    fn unknown_device_write_propagates_error() {
        let (_, _, _, client) = fixture();
        let err = client.write_holding(42, 0, 1).unwrap_err();
        assert!(matches!(
            err,
            WriteError::Register(RegisterError::UnknownDevice(42))
        ));
    }
}
