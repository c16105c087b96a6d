//! macOS TUN device implementation

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

use super::{TunConfig, TunDevice};
use crate::error::{NodeError, NodeResult};

/// macOS utun device
pub struct MacOsTun {
    device: tokio::sync::Mutex<tun::AsyncDevice>,
    name: String,
    mtu: u16,
}

impl MacOsTun {
    /// Create and bring up a utun device with the configured address
    /// and netmask.
    pub async fn create(config: TunConfig) -> NodeResult<Self> {
        let mut tun_config = tun::Configuration::default();
        tun_config
            .name(&config.name)
            .address(config.address)
            .netmask(config.netmask)
            .mtu(config.mtu as i32)
            .up();

        let device = tun::create_as_async(&tun_config)
            .map_err(|e| NodeError::Tun(format!("create utun device failed: {}", e)))?;

        info!(
            name = %config.name,
            address = %config.address,
            netmask = %config.netmask,
            "created utun device"
        );

        Ok(Self {
            device: tokio::sync::Mutex::new(device),
            name: config.name,
            mtu: config.mtu,
        })
    }
}

#[async_trait]
impl TunDevice for MacOsTun {
    async fn read(&self) -> NodeResult<Bytes> {
        let mut buf = vec![0u8; self.mtu as usize + 4];
        let mut device = self.device.lock().await;
        let n = device
            .read(&mut buf)
            .await
            .map_err(|e| NodeError::Tun(format!("read from utun failed: {}", e)))?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    async fn write(&self, frame: &[u8]) -> NodeResult<()> {
        let mut device = self.device.lock().await;
        device
            .write_all(frame)
            .await
            .map_err(|e| NodeError::Tun(format!("write to utun failed: {}", e)))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}
