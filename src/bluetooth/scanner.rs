use async_trait::async_trait;
use bluer::{Address, Session};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;

/// A paired Bluetooth device.
#[derive(Debug, Clone, Serialize)]
pub struct BluetoothDevice {
    pub name: String,
    #[serde(serialize_with = "serialize_address")]
    pub address: Address,
    pub connected: bool,
}

fn serialize_address<S: serde::Serializer>(
    addr: &Address,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(addr)
}

/// Source of paired devices the user can pick from.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn list_paired_devices(&self) -> Result<Vec<BluetoothDevice>>;
}

/// Paired devices as known to BlueZ.
pub struct BluezDirectory;

#[async_trait]
impl DeviceDirectory for BluezDirectory {
    async fn list_paired_devices(&self) -> Result<Vec<BluetoothDevice>> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;

        let mut result = Vec::new();
        for addr in adapter.device_addresses().await? {
            let device = adapter.device(addr)?;
            if !device.is_paired().await? {
                continue;
            }
            let name = device.name().await?.unwrap_or_default();
            let connected = device.is_connected().await?;

            debug!("Found device: {} ({}), connected={}", name, addr, connected);
            result.push(BluetoothDevice {
                name,
                address: addr,
                connected,
            });
        }

        info!("Found {} paired devices", result.len());
        Ok(result)
    }
}

/// Check if a device name looks like a supported Sony headset.
pub fn is_known_device(name: &str) -> bool {
    const PREFIXES: &[&str] = &["WH-", "WF-", "WI-", "MDR-", "LE_WH-", "LE_WF-"];
    PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Paired devices, optionally restricted to known Sony headsets.
pub async fn list_devices<D: DeviceDirectory + ?Sized>(
    directory: &D,
    filter_known: bool,
) -> Result<Vec<BluetoothDevice>> {
    let mut devices = directory.list_paired_devices().await?;
    if filter_known {
        devices.retain(|d| is_known_device(&d.name));
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticDirectory(Vec<BluetoothDevice>);

    #[async_trait]
    impl DeviceDirectory for StaticDirectory {
        async fn list_paired_devices(&self) -> Result<Vec<BluetoothDevice>> {
            Ok(self.0.clone())
        }
    }

    fn device(name: &str, last: u8) -> BluetoothDevice {
        BluetoothDevice {
            name: name.into(),
            address: Address::new([0, 0, 0, 0, 0, last]),
            connected: false,
        }
    }

    #[test]
    fn test_known_devices() {
        assert!(is_known_device("WH-1000XM4"));
        assert!(is_known_device("WF-1000XM3"));
        assert!(is_known_device("WI-1000X"));
        assert!(is_known_device("LE_WH-1000XM5"));
        assert!(!is_known_device("HUAWEI FreeBuds Pro 3"));
        assert!(!is_known_device(""));
    }

    #[tokio::test]
    async fn test_list_devices_filters() {
        let dir = StaticDirectory(vec![device("WH-1000XM3", 1), device("Keyboard", 2)]);

        let known = list_devices(&dir, true).await.unwrap();
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].name, "WH-1000XM3");

        let all = list_devices(&dir, false).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_device_serializes_address_as_string() {
        let json = serde_json::to_string(&device("WH-1000XM4", 0xAB)).unwrap();
        assert!(json.contains("\"address\":\"00:00:00:00:00:AB\""));
    }
}
