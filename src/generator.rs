use crate::config::DeviceKind;
use crate::registers::RegisterSpace;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One simulated register value: which space, which offset, what value.
/// Serializes as `{"type":"IR","address":0,"value":235}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterValue {
    #[serde(rename = "type")]
    pub space: RegisterSpace,
    pub address: u16,
    pub value: u16,
}

impl RegisterValue {
    pub fn new(space: RegisterSpace, address: u16, value: u16) -> Self {
        Self {
            space,
            address,
            value,
        }
    }
}

/// One generation cycle's output for a device, in write order.
pub type ValueSet = Vec<RegisterValue>;

/// Generate a fresh ValueSet for a device kind. Pure apart from the RNG:
/// the address layout per kind is fixed, only the values vary. Never fails;
/// an unknown kind produces an empty set as an explicit no-data signal.
pub fn generate(kind: DeviceKind) -> ValueSet {
    match kind {
        DeviceKind::TemperatureHumidity => temperature_humidity(),
        DeviceKind::PowerMeter => power_meter(),
        DeviceKind::AcController => ac_controller(),
        DeviceKind::AirQuality => air_quality(),
        DeviceKind::PlcIo => plc_io(),
        DeviceKind::LightController => light_controller(),
        DeviceKind::SmartPlug => smart_plug(),
        DeviceKind::Unknown => Vec::new(),
    }
}

fn ir(address: u16, value: u16) -> RegisterValue {
    RegisterValue::new(RegisterSpace::InputRegister, address, value)
}

fn hr(address: u16, value: u16) -> RegisterValue {
    RegisterValue::new(RegisterSpace::HoldingRegister, address, value)
}

fn co(address: u16, value: u16) -> RegisterValue {
    RegisterValue::new(RegisterSpace::Coil, address, value)
}

fn di(address: u16, value: u16) -> RegisterValue {
    RegisterValue::new(RegisterSpace::DiscreteInput, address, value)
}

fn temperature_humidity() -> ValueSet {
    let mut rng = rand::thread_rng();
    vec![
        ir(0, rng.gen_range(150..=350)), // 15.0-35.0 C
        ir(1, rng.gen_range(300..=800)), // 30.0-80.0 %RH
        ir(2, rng.gen_range(0..=100)),   // battery %
    ]
}

fn power_meter() -> ValueSet {
    let mut rng = rand::thread_rng();
    vec![
        ir(0, rng.gen_range(2200..=2400)), // 220.0-240.0 V
        ir(1, rng.gen_range(0..=1000)),    // 0.00-10.00 A
        ir(2, rng.gen_range(0..=24000)),   // 0-2400 W
        ir(3, rng.gen_range(0..=10000)),   // 0-1000 kWh
        ir(4, rng.gen_range(4900..=5100)), // 49.00-51.00 Hz
    ]
}

fn ac_controller() -> ValueSet {
    let mut rng = rand::thread_rng();
    vec![
        ir(0, rng.gen_range(150..=350)),  // room temperature
        hr(50, rng.gen_range(160..=300)), // setpoint 16.0-30.0 C
        hr(51, rng.gen_range(0..=2)),     // 0 off, 1 cool, 2 heat
        co(0, 0),                         // power, off until commanded
    ]
}

fn air_quality() -> ValueSet {
    let mut rng = rand::thread_rng();
    vec![
        ir(0, rng.gen_range(0..=1000)), // CO2 ppm
        ir(1, rng.gen_range(0..=500)),  // TVOC ppm
        ir(2, rng.gen_range(0..=100)),  // PM2.5
    ]
}

fn plc_io() -> ValueSet {
    let mut rng = rand::thread_rng();
    vec![
        di(0, rng.gen_range(0..=1)),
        di(1, rng.gen_range(0..=1)),
        co(0, rng.gen_range(0..=1)),
        co(1, rng.gen_range(0..=1)),
    ]
}

fn light_controller() -> ValueSet {
    let mut rng = rand::thread_rng();
    vec![
        co(0, rng.gen_range(0..=1)),       // power
        hr(0, rng.gen_range(0..=100)),     // brightness %
        hr(1, rng.gen_range(2700..=6500)), // color temperature K
    ]
}

fn smart_plug() -> ValueSet {
    let mut rng = rand::thread_rng();
    vec![
        ir(0, rng.gen_range(2200..=2400)),
        ir(1, rng.gen_range(0..=1000)),
        co(0, 0),
    ]
}
