//! ARP message codec and the cache/in-flight-request bookkeeping used
//! by [`super::interface::NetworkInterface`].

use std::collections::HashMap;
use std::net::Ipv4Addr;

use super::ethernet::MacAddr;

pub const ARP_REQUEST_TTL_MS: u64 = 5_000;
pub const ARP_ENTRY_TTL_MS: u64 = 30_000;

const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;
const HLEN_ETHERNET: u8 = 6;
const PLEN_IPV4: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOperation {
    Request = 1,
    Reply = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpMessage {
    pub operation: ArpOperation,
    pub sender_ethernet_address: MacAddr,
    pub sender_ip_address: Ipv4Addr,
    pub target_ethernet_address: MacAddr,
    pub target_ip_address: Ipv4Addr,
}

impl ArpMessage {
    pub fn request(local_mac: MacAddr, local_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        ArpMessage {
            operation: ArpOperation::Request,
            sender_ethernet_address: local_mac,
            sender_ip_address: local_ip,
            target_ethernet_address: [0; 6],
            target_ip_address: target_ip,
        }
    }

    pub fn reply(
        local_mac: MacAddr,
        local_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        ArpMessage {
            operation: ArpOperation::Reply,
            sender_ethernet_address: local_mac,
            sender_ip_address: local_ip,
            target_ethernet_address: target_mac,
            target_ip_address: target_ip,
        }
    }

    pub fn encode(&self) -> [u8; 28] {
        let mut buf = [0u8; 28];
        buf[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        buf[2..4].copy_from_slice(&PTYPE_IPV4.to_be_bytes());
        buf[4] = HLEN_ETHERNET;
        buf[5] = PLEN_IPV4;
        buf[6..8].copy_from_slice(&(self.operation as u16).to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_ethernet_address);
        buf[14..18].copy_from_slice(&self.sender_ip_address.octets());
        buf[18..24].copy_from_slice(&self.target_ethernet_address);
        buf[24..28].copy_from_slice(&self.target_ip_address.octets());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<ArpMessage> {
        if bytes.len() < 28 {
            return None;
        }
        let htype = u16::from_be_bytes([bytes[0], bytes[1]]);
        let ptype = u16::from_be_bytes([bytes[2], bytes[3]]);
        if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 {
            return None;
        }
        if bytes[4] != HLEN_ETHERNET || bytes[5] != PLEN_IPV4 {
            return None;
        }
        let operation = match u16::from_be_bytes([bytes[6], bytes[7]]) {
            1 => ArpOperation::Request,
            2 => ArpOperation::Reply,
            _ => return None,
        };
        let mut sha = [0u8; 6];
        sha.copy_from_slice(&bytes[8..14]);
        let spa = Ipv4Addr::new(bytes[14], bytes[15], bytes[16], bytes[17]);
        let mut tha = [0u8; 6];
        tha.copy_from_slice(&bytes[18..24]);
        let tpa = Ipv4Addr::new(bytes[24], bytes[25], bytes[26], bytes[27]);

        Some(ArpMessage {
            operation,
            sender_ethernet_address: sha,
            sender_ip_address: spa,
            target_ethernet_address: tha,
            target_ip_address: tpa,
        })
    }
}

/// IPv4 -> Ethernet cache plus a record of in-flight ARP requests, each
/// with their own TTL (§4.6, §8 scenario 6).
#[derive(Debug, Default)]
pub struct ArpTable {
    cache: HashMap<Ipv4Addr, (MacAddr, u64)>,
    in_flight: HashMap<Ipv4Addr, u64>,
}

impl ArpTable {
    pub fn new() -> Self {
        ArpTable::default()
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.cache.get(&ip).map(|(mac, _)| *mac)
    }

    pub fn learn(&mut self, ip: Ipv4Addr, mac: MacAddr, now_ms: u64) {
        self.cache.insert(ip, (mac, now_ms));
        self.in_flight.remove(&ip);
    }

    /// True if a request for `ip` was sent within the last
    /// [`ARP_REQUEST_TTL_MS`].
    pub fn has_recent_request(&self, ip: Ipv4Addr, now_ms: u64) -> bool {
        self.in_flight
            .get(&ip)
            .is_some_and(|&sent| now_ms.saturating_sub(sent) < ARP_REQUEST_TTL_MS)
    }

    pub fn record_request(&mut self, ip: Ipv4Addr, now_ms: u64) {
        self.in_flight.insert(ip, now_ms);
    }

    /// Drops cache entries and in-flight requests older than their TTL.
    /// Returns the next-hops whose in-flight request just expired, so
    /// the caller can drop their queued frames too.
    pub fn expire(&mut self, now_ms: u64) -> Vec<Ipv4Addr> {
        self.cache
            .retain(|_, (_, learned)| now_ms.saturating_sub(*learned) < ARP_ENTRY_TTL_MS);

        let expired: Vec<Ipv4Addr> = self
            .in_flight
            .iter()
            .filter(|(_, &sent)| now_ms.saturating_sub(sent) >= ARP_REQUEST_TTL_MS)
            .map(|(&ip, _)| ip)
            .collect();
        for ip in &expired {
            self.in_flight.remove(ip);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_bytes() {
        let msg = ArpMessage::request(
            [1, 2, 3, 4, 5, 6],
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 5),
        );
        let bytes = msg.encode();
        assert_eq!(ArpMessage::decode(&bytes), Some(msg));
    }

    #[test]
    fn cache_entry_expires_after_ttl() {
        let mut t = ArpTable::new();
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        t.learn(ip, [9; 6], 0);
        assert_eq!(t.lookup(ip), Some([9; 6]));
        t.expire(ARP_ENTRY_TTL_MS - 1);
        assert_eq!(t.lookup(ip), Some([9; 6]));
        t.expire(ARP_ENTRY_TTL_MS);
        assert_eq!(t.lookup(ip), None);
    }

    #[test]
    fn in_flight_request_expires_and_is_reported() {
        let mut t = ArpTable::new();
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        t.record_request(ip, 0);
        assert!(t.has_recent_request(ip, ARP_REQUEST_TTL_MS - 1));
        let expired = t.expire(ARP_REQUEST_TTL_MS);
        assert_eq!(expired, vec![ip]);
        assert!(!t.has_recent_request(ip, ARP_REQUEST_TTL_MS));
    }
}
