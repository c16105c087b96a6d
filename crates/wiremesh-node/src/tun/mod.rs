//! TUN Device Abstraction
//!
//! Platform-agnostic TUN device interface. The node core only needs
//! read/write of raw IPv4 frames; provisioning (address, netmask, up)
//! happens at creation time per platform.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::NodeResult;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::LinuxTun;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::MacOsTun;

/// TUN device configuration
#[derive(Clone, Debug)]
pub struct TunConfig {
    /// Device name; platforms that auto-assign names ignore it
    pub name: String,

    /// Local virtual address
    pub address: std::net::Ipv4Addr,

    /// Subnet mask (the overlay is a /16)
    pub netmask: std::net::Ipv4Addr,

    /// Maximum transmission unit
    pub mtu: u16,
}

impl TunConfig {
    pub fn new(address: std::net::Ipv4Addr) -> Self {
        Self {
            name: "wiremesh0".to_string(),
            address,
            netmask: std::net::Ipv4Addr::new(255, 255, 0, 0),
            mtu: 1500,
        }
    }
}

/// Platform-agnostic TUN device
#[async_trait]
pub trait TunDevice: Send + Sync {
    /// Read one IP frame from the device
    async fn read(&self) -> NodeResult<Bytes>;

    /// Write one IP frame to the device
    async fn write(&self, frame: &[u8]) -> NodeResult<()>;

    /// Device name
    fn name(&self) -> &str;

    /// Device MTU
    fn mtu(&self) -> u16;
}

/// Create a TUN device for the current platform.
pub async fn create_tun(config: TunConfig) -> NodeResult<Box<dyn TunDevice>> {
    #[cfg(target_os = "linux")]
    {
        let tun = LinuxTun::create(config).await?;
        Ok(Box::new(tun))
    }

    #[cfg(target_os = "macos")]
    {
        let tun = MacOsTun::create(config).await?;
        Ok(Box::new(tun))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = config;
        Err(crate::error::NodeError::PlatformNotSupported)
    }
}

/// IPv4 frame parsing helpers used by the TUN pump
pub mod ip {
    /// True when the frame's version nibble says IPv4
    pub fn is_ipv4(frame: &[u8]) -> bool {
        !frame.is_empty() && frame[0] >> 4 == 4
    }

    /// Destination address of an IPv4 frame
    pub fn ipv4_destination(frame: &[u8]) -> Option<std::net::Ipv4Addr> {
        if frame.len() < 20 {
            return None;
        }
        Some(std::net::Ipv4Addr::new(
            frame[16], frame[17], frame[18], frame[19],
        ))
    }

}
