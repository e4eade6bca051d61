//! Device registry
//!
//! Maps configured device names to live sessions. The registry owns no
//! transports itself; `open` builds a fresh transport for the named entry
//! and hands it to a new session, so several devices can be driven from
//! one configuration.

use crate::config::{Config, DeviceConfig, TransportKind};
use crate::error::{Error, Result};
use crate::protocol::capability::RetryPolicy;
use crate::session::ScanSession;
use crate::transport::{ScsiTransport, TcpTransport, Transport, UsbTransport};
use std::fs::OpenOptions;

pub struct DeviceRegistry {
    devices: Vec<DeviceConfig>,
    timeout: std::time::Duration,
    retry: RetryPolicy,
}

impl DeviceRegistry {
    pub fn from_config(config: &Config) -> Self {
        DeviceRegistry {
            devices: config.devices.clone(),
            timeout: config.engine.timeout(),
            retry: RetryPolicy {
                max_attempts: config.engine.warmup_max_retries,
                wait: config.engine.warmup_wait(),
            },
        }
    }

    /// Configured device names, in configuration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Connect to the named device and wrap it in a fresh session
    pub fn open(&self, name: &str) -> Result<ScanSession<Box<dyn Transport>>> {
        let device = self
            .get(name)
            .ok_or_else(|| Error::UnknownDevice(name.to_string()))?;
        let transport = self.connect(device)?;
        Ok(ScanSession::new(transport, self.retry.clone()))
    }

    fn connect(&self, device: &DeviceConfig) -> Result<Box<dyn Transport>> {
        match device.transport {
            TransportKind::Tcp => {
                let address = device.address.as_deref().ok_or_else(|| {
                    Error::InvalidParameter(format!("device {} has no address", device.name))
                })?;
                log::info!("Connecting to {} at {}", device.name, address);
                Ok(Box::new(TcpTransport::connect(address, self.timeout)?))
            }
            TransportKind::Scsi => {
                let path = self.device_path(device)?;
                log::info!("Opening {} at {}", device.name, path);
                let node = OpenOptions::new().read(true).write(true).open(path)?;
                Ok(Box::new(ScsiTransport::new(node)))
            }
            TransportKind::Usb => {
                let path = self.device_path(device)?;
                log::info!("Opening {} at {}", device.name, path);
                let node = OpenOptions::new().read(true).write(true).open(path)?;
                Ok(Box::new(UsbTransport::new(node)))
            }
        }
    }

    fn device_path<'a>(&self, device: &'a DeviceConfig) -> Result<&'a str> {
        device.path.as_deref().ok_or_else(|| {
            Error::InvalidParameter(format!("device {} has no path", device.name))
        })
    }
}
