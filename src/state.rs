use crate::config::DeviceId;
use crate::generator::ValueSet;
use crate::now_ms;
use crate::registers::RegisterSpace;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

/// The externally visible snapshot for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub name: String,
    pub data: ValueSet,
    /// Epoch milliseconds of the last update; monotonically non-decreasing.
    pub last_update: u64,
}

/// Single-slot error record, overwritten on every new error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: u64,
}

/// Process-wide shared state: the authoritative device status map, the
/// last-error slot and the component running flags. Owned explicitly and
/// handed to each component at construction; there are no ambient globals.
#[derive(Debug, Default)]
pub struct SharedState {
    devices: RwLock<HashMap<DeviceId, DeviceStatus>>,
    error: Mutex<Option<ErrorRecord>>,
    modbus_running: AtomicBool,
    web_running: AtomicBool,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a device's snapshot. last_update never moves backwards: an
    /// update carrying an older timestamp keeps the existing one.
    pub fn update_device_status(&self, device: DeviceId, mut status: DeviceStatus) {
        let mut devices = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = devices.get(&device) {
            status.last_update = status.last_update.max(existing.last_update);
        }
        devices.insert(device, status);
    }

    pub fn get_device_status(&self, device: DeviceId) -> Option<DeviceStatus> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device)
            .cloned()
    }

    /// Full-map copy; callers get an owned snapshot they cannot mutate
    /// through.
    pub fn all_device_status(&self) -> HashMap<DeviceId, DeviceStatus> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rewrite one value inside a device's snapshot after an external
    /// register write, stamping a fresh last_update.
    pub fn patch_device_value(
        &self,
        device: DeviceId,
        space: RegisterSpace,
        address: u16,
        value: u16,
    ) {
        let mut devices = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = devices.get_mut(&device) {
            if let Some(item) = status
                .data
                .iter_mut()
                .find(|v| v.space == space && v.address == address)
            {
                item.value = value;
                status.last_update = status.last_update.max(now_ms());
            }
        }
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(ErrorRecord {
            message: message.into(),
            at: now_ms(),
        });
    }

    pub fn clear_error(&self) {
        let mut slot = self.error.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }

    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_modbus_running(&self, running: bool) {
        self.modbus_running.store(running, Ordering::Relaxed);
    }

    pub fn modbus_running(&self) -> bool {
        self.modbus_running.load(Ordering::Relaxed)
    }

    pub fn set_web_running(&self, running: bool) {
        self.web_running.store(running, Ordering::Relaxed);
    }

    pub fn web_running(&self) -> bool {
        self.web_running.load(Ordering::Relaxed)
    }
}
