use crate::now_ms;
use crate::state::{DeviceStatus, SharedState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Register kinds a subscriber is allowed to write through a control
/// command. Wire values match the triple tags: "CO" and "HR".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterKind {
    #[serde(rename = "CO")]
    Coil,
    #[serde(rename = "HR")]
    HoldingRegister,
}

/// Inbound subscriber messages, discriminated by a `type` field.
///
/// Control fields are optional at the parse level: a command missing any of
/// them is dropped by dispatch, not rejected back to the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Heartbeat,
    RequestData {
        #[serde(rename = "deviceId", default)]
        device_id: Option<String>,
        #[serde(rename = "requestType", default)]
        request_type: Option<String>,
    },
    Control {
        #[serde(rename = "deviceId", default)]
        device_id: Option<String>,
        #[serde(rename = "registerType", default)]
        register_type: Option<RegisterKind>,
        #[serde(default)]
        address: Option<u16>,
        #[serde(default)]
        value: Option<u16>,
    },
}

/// Outbound push messages, discriminated by a `type` field.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    DeviceUpdate {
        device_id: String,
        data: DeviceStatus,
        timestamp: u64,
    },
    DeviceStatus {
        devices: BTreeMap<String, DeviceStatus>,
        timestamp: u64,
    },
    SystemStatus {
        modbus_running: bool,
        web_running: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_time: Option<u64>,
        timestamp: u64,
    },
}

impl ServerMessage {
    pub fn device_update(device_id: impl Into<String>, data: DeviceStatus, timestamp: u64) -> Self {
        ServerMessage::DeviceUpdate {
            device_id: device_id.into(),
            data,
            timestamp,
        }
    }

    /// Full device map snapshot, read through the shared state.
    pub fn device_snapshot(state: &SharedState) -> Self {
        let devices = state
            .all_device_status()
            .into_iter()
            .map(|(id, status)| (id.to_string(), status))
            .collect();
        ServerMessage::DeviceStatus {
            devices,
            timestamp: now_ms(),
        }
    }

    /// Current system availability snapshot, including the last error slot.
    pub fn system_snapshot(state: &SharedState) -> Self {
        let error = state.last_error();
        ServerMessage::SystemStatus {
            modbus_running: state.modbus_running(),
            web_running: state.web_running(),
            error: error.as_ref().map(|e| e.message.clone()),
            error_time: error.as_ref().map(|e| e.at),
            timestamp: now_ms(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
