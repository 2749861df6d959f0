use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Modbus-style unit identifier for a simulated device.
pub type DeviceId = u8;

pub const DEFAULT_MODBUS_PORT: u16 = 502;
pub const DEFAULT_WEB_PORT: u16 = 8000;

/// Coarse device classification used for interval configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Sensor,
    Meter,
    Controller,
}

/// Concrete device profile driving value generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    TemperatureHumidity,
    PowerMeter,
    AcController,
    AirQuality,
    PlcIo,
    LightController,
    SmartPlug,
    /// A device the simulator has no profile for; generates no data.
    Unknown,
}

impl DeviceKind {
    pub fn class(self) -> DeviceClass {
        match self {
            DeviceKind::TemperatureHumidity | DeviceKind::AirQuality => DeviceClass::Sensor,
            DeviceKind::PowerMeter => DeviceClass::Meter,
            DeviceKind::AcController
            | DeviceKind::PlcIo
            | DeviceKind::LightController
            | DeviceKind::SmartPlug
            | DeviceKind::Unknown => DeviceClass::Controller,
        }
    }
}

/// Static description of one simulated device. The device set is fixed at
/// startup; there is no dynamic add/remove.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub class: DeviceClass,
    pub kind: DeviceKind,
    pub update_interval: Duration,
}

/// Simulator configuration. Defaults mirror the documented deployment
/// (Modbus on 502, web monitor on 8000, 5 s cache TTL, 30 s heartbeats).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub modbus_host: String,
    pub modbus_port: u16,
    pub web_host: String,
    pub web_port: u16,

    /// Engine scan period in milliseconds.
    pub tick_millis: u64,

    pub cache_ttl_secs: f64,
    pub cache_sweep_secs: f64,

    /// Errors tolerated within one rolling window before a fatal stop.
    pub max_errors: u32,
    pub error_reset_secs: f64,

    pub heartbeat_timeout_secs: f64,
    pub liveness_period_secs: f64,
    pub max_connections: usize,
    pub system_queue_depth: usize,

    /// Device-channel poll/push period.
    pub device_push_secs: f64,
    /// System-channel poll/push period.
    pub system_push_secs: f64,

    pub sensor_interval_secs: f64,
    pub meter_interval_secs: f64,
    pub controller_interval_secs: f64,
    /// Per-device overrides on top of the class intervals.
    pub interval_overrides: HashMap<DeviceId, f64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        // The PLC scans fast, the AC controller slow; everything else takes
        // its class default.
        let mut interval_overrides = HashMap::new();
        interval_overrides.insert(3, 2.0);
        interval_overrides.insert(5, 0.2);
        interval_overrides.insert(7, 0.5);

        Self {
            modbus_host: "127.0.0.1".to_owned(),
            modbus_port: DEFAULT_MODBUS_PORT,
            web_host: "0.0.0.0".to_owned(),
            web_port: DEFAULT_WEB_PORT,
            tick_millis: 100,
            cache_ttl_secs: 5.0,
            cache_sweep_secs: 300.0,
            max_errors: 3,
            error_reset_secs: 60.0,
            heartbeat_timeout_secs: 30.0,
            liveness_period_secs: 30.0,
            max_connections: 100,
            system_queue_depth: 256,
            device_push_secs: 3.0,
            system_push_secs: 1.0,
            sensor_interval_secs: 1.0,
            meter_interval_secs: 0.5,
            controller_interval_secs: 1.0,
            interval_overrides,
        }
    }
}

impl SimConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.cache_ttl_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs_f64(self.cache_sweep_secs)
    }

    pub fn error_window(&self) -> Duration {
        Duration::from_secs_f64(self.error_reset_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_timeout_secs)
    }

    pub fn liveness_period(&self) -> Duration {
        Duration::from_secs_f64(self.liveness_period_secs)
    }

    pub fn device_push_period(&self) -> Duration {
        Duration::from_secs_f64(self.device_push_secs)
    }

    pub fn system_push_period(&self) -> Duration {
        Duration::from_secs_f64(self.system_push_secs)
    }

    fn class_interval(&self, class: DeviceClass) -> f64 {
        match class {
            DeviceClass::Sensor => self.sensor_interval_secs,
            DeviceClass::Meter => self.meter_interval_secs,
            DeviceClass::Controller => self.controller_interval_secs,
        }
    }

    fn update_interval(&self, id: DeviceId, class: DeviceClass) -> Duration {
        let secs = self
            .interval_overrides
            .get(&id)
            .copied()
            .unwrap_or_else(|| self.class_interval(class));
        Duration::from_secs_f64(secs)
    }

    /// The static device table for this deployment.
    pub fn device_table(&self) -> Vec<Device> {
        let specs: [(DeviceId, &str, DeviceKind); 7] = [
            (1, "Temperature and Humidity Sensor", DeviceKind::TemperatureHumidity),
            (2, "Power Meter", DeviceKind::PowerMeter),
            (3, "AC Controller", DeviceKind::AcController),
            (4, "Air Quality Sensor", DeviceKind::AirQuality),
            (5, "PLC/IO Module", DeviceKind::PlcIo),
            (6, "Smart Light Controller", DeviceKind::LightController),
            (7, "Smart Plug", DeviceKind::SmartPlug),
        ];

        specs
            .into_iter()
            .map(|(id, name, kind)| {
                let class = kind.class();
                Device {
                    id,
                    name: name.to_owned(),
                    class,
                    kind,
                    update_interval: self.update_interval(id, class),
                }
            })
            .collect()
    }
}
