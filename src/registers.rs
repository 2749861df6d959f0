use crate::config::DeviceId;
use crate::generator::ValueSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Addressable slots per address space, matching the standard 100-slot
/// sequential blocks the protocol endpoint expects.
pub const BANK_SIZE: usize = 100;

/// The four independent register address spaces. The wire tags ("DI", "CO",
/// "IR", "HR") are the ones subscribers see inside value triples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterSpace {
    #[serde(rename = "DI")]
    DiscreteInput,
    #[serde(rename = "CO")]
    Coil,
    #[serde(rename = "IR")]
    InputRegister,
    #[serde(rename = "HR")]
    HoldingRegister,
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
    #[error("address {address} out of range for {space:?}")]
    AddressOutOfRange { space: RegisterSpace, address: u16 },
}

/// One device's registers: four fixed-size arrays, no cross-space aliasing.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    discrete_inputs: [u16; BANK_SIZE],
    coils: [u16; BANK_SIZE],
    input_registers: [u16; BANK_SIZE],
    holding_registers: [u16; BANK_SIZE],
}

impl RegisterBank {
    fn new() -> Self {
        Self {
            discrete_inputs: [0; BANK_SIZE],
            coils: [0; BANK_SIZE],
            input_registers: [0; BANK_SIZE],
            holding_registers: [0; BANK_SIZE],
        }
    }

    fn slots(&self, space: RegisterSpace) -> &[u16; BANK_SIZE] {
        match space {
            RegisterSpace::DiscreteInput => &self.discrete_inputs,
            RegisterSpace::Coil => &self.coils,
            RegisterSpace::InputRegister => &self.input_registers,
            RegisterSpace::HoldingRegister => &self.holding_registers,
        }
    }

    fn slots_mut(&mut self, space: RegisterSpace) -> &mut [u16; BANK_SIZE] {
        match space {
            RegisterSpace::DiscreteInput => &mut self.discrete_inputs,
            RegisterSpace::Coil => &mut self.coils,
            RegisterSpace::InputRegister => &mut self.input_registers,
            RegisterSpace::HoldingRegister => &mut self.holding_registers,
        }
    }

    pub fn read(&self, space: RegisterSpace, address: u16) -> Result<u16, RegisterError> {
        self.slots(space)
            .get(address as usize)
            .copied()
            .ok_or(RegisterError::AddressOutOfRange { space, address })
    }

    pub fn write(
        &mut self,
        space: RegisterSpace,
        address: u16,
        value: u16,
    ) -> Result<(), RegisterError> {
        let slot = self
            .slots_mut(space)
            .get_mut(address as usize)
            .ok_or(RegisterError::AddressOutOfRange { space, address })?;
        *slot = value;
        Ok(())
    }
}

/// In-memory register banks for every configured device. This is the
/// structure the protocol endpoint serves; the simulation engine writes into
/// it and remote clients write back through the same API.
#[derive(Debug)]
pub struct RegisterStore {
    banks: Mutex<HashMap<DeviceId, RegisterBank>>,
}

impl RegisterStore {
    pub fn new(device_ids: impl IntoIterator<Item = DeviceId>) -> Self {
        let banks = device_ids
            .into_iter()
            .map(|id| (id, RegisterBank::new()))
            .collect();
        Self {
            banks: Mutex::new(banks),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DeviceId, RegisterBank>> {
        self.banks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write every triple of a ValueSet into the device's bank, in triple
    /// order, last-writer-wins per address.
    pub fn write_set(&self, device: DeviceId, values: &ValueSet) -> Result<(), RegisterError> {
        let mut banks = self.lock();
        let bank = banks
            .get_mut(&device)
            .ok_or(RegisterError::UnknownDevice(device))?;
        for item in values {
            bank.write(item.space, item.address, item.value)?;
        }
        Ok(())
    }

    /// Single out-of-band write, used for remote coil/holding-register
    /// writes arriving through the protocol endpoint or the control bridge.
    pub fn write_register(
        &self,
        device: DeviceId,
        space: RegisterSpace,
        address: u16,
        value: u16,
    ) -> Result<(), RegisterError> {
        let mut banks = self.lock();
        let bank = banks
            .get_mut(&device)
            .ok_or(RegisterError::UnknownDevice(device))?;
        bank.write(space, address, value)
    }

    pub fn read_register(
        &self,
        device: DeviceId,
        space: RegisterSpace,
        address: u16,
    ) -> Result<u16, RegisterError> {
        let banks = self.lock();
        let bank = banks
            .get(&device)
            .ok_or(RegisterError::UnknownDevice(device))?;
        bank.read(space, address)
    }

    /// Contiguous block read for the endpoint's read function codes.
    pub fn read_block(
        &self,
        device: DeviceId,
        space: RegisterSpace,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, RegisterError> {
        let banks = self.lock();
        let bank = banks
            .get(&device)
            .ok_or(RegisterError::UnknownDevice(device))?;
        let end = start as usize + count as usize;
        if end > BANK_SIZE {
            return Err(RegisterError::AddressOutOfRange {
                space,
                address: end.saturating_sub(1) as u16,
            });
        }
        Ok(bank.slots(space)[start as usize..end].to_vec())
    }
}
