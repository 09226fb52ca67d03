//! What the rack tells the region about its host when registering.

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use nix::sys::socket::SockaddrStorage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

use crate::error::Result;

/// An address configured on an interface, with its prefix length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceLink {
    pub address: IpAddr,
    pub prefix_len: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    pub links: Vec<InterfaceLink>,
}

/// Interfaces keyed by name.
pub type Interfaces = BTreeMap<String, InterfaceInfo>;

/// Reads host facts. Implementations may block; callers run them on a
/// blocking thread.
pub trait HostInventory: Send + Sync + 'static {
    fn hostname(&self) -> Result<String>;

    fn interfaces(&self) -> Result<Interfaces>;
}

/// Reads the running system via `gethostname(2)` and `getifaddrs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInventory;

impl HostInventory for SystemInventory {
    fn hostname(&self) -> Result<String> {
        let name = nix::unistd::gethostname().map_err(std::io::Error::from)?;
        Ok(name.to_string_lossy().into_owned())
    }

    fn interfaces(&self) -> Result<Interfaces> {
        let mut interfaces = Interfaces::new();
        for ifaddr in getifaddrs().map_err(std::io::Error::from)? {
            if ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK) {
                continue;
            }
            let entry = interfaces.entry(ifaddr.interface_name.clone()).or_default();
            entry.enabled = ifaddr.flags.contains(InterfaceFlags::IFF_UP);

            let Some(address) = ifaddr.address.as_ref() else {
                continue;
            };
            if let Some(link) = address.as_link_addr() {
                if let Some(mac) = link.addr() {
                    entry.mac_address = Some(format_mac(&mac));
                }
            } else if let Some(ip) = ip_of(address) {
                let prefix_len = ifaddr.netmask.as_ref().and_then(ip_of).map(prefix_len).unwrap_or(0);
                entry.links.push(InterfaceLink {
                    address: ip,
                    prefix_len,
                });
            }
        }
        Ok(interfaces)
    }
}

fn ip_of(addr: &SockaddrStorage) -> Option<IpAddr> {
    if let Some(v4) = addr.as_sockaddr_in() {
        return Some(IpAddr::V4(*SocketAddrV4::from(*v4).ip()));
    }
    addr.as_sockaddr_in6()
        .map(|v6| IpAddr::V6(*SocketAddrV6::from(*v6).ip()))
}

fn prefix_len(netmask: IpAddr) -> u32 {
    match netmask {
        IpAddr::V4(mask) => u32::from(mask).count_ones(),
        IpAddr::V6(mask) => u128::from(mask).count_ones(),
    }
}

fn format_mac(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// A fixed inventory.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    pub hostname: String,
    pub interfaces: Interfaces,
}

impl HostInventory for StaticInventory {
    fn hostname(&self) -> Result<String> {
        Ok(self.hostname.clone())
    }

    fn interfaces(&self) -> Result<Interfaces> {
        Ok(self.interfaces.clone())
    }
}
