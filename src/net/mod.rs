//! IPv4-over-Ethernet transmission with ARP resolution.

pub mod arp;
pub mod ethernet;
pub mod interface;

pub use arp::{ArpMessage, ArpOperation};
pub use ethernet::{EthernetFrame, MacAddr};
pub use interface::NetworkInterface;
