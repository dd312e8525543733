//! Maps IPv4 next-hops to Ethernet addresses via ARP; queues frames
//! pending resolution.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use etherparse::Ipv4HeaderSlice;
use tracing::{debug, trace, warn};

use super::arp::{ArpMessage, ArpOperation, ArpTable};
use super::ethernet::{EthernetFrame, MacAddr, BROADCAST, ETHERTYPE_ARP, ETHERTYPE_IPV4};

/// A sink with a single operation: hand a fully-addressed frame off to
/// the wire. The driver loop supplies the concrete implementation
/// (e.g. a `tun_tap::Iface` wrapper).
pub trait OutputPort {
    fn transmit(&mut self, frame: &EthernetFrame);
}

#[derive(Debug)]
pub struct NetworkInterface<P: OutputPort> {
    ethernet_address: MacAddr,
    ip_address: Ipv4Addr,
    output: P,
    arp: ArpTable,
    /// IPv4 datagrams queued behind ARP resolution, keyed by next-hop.
    pending: HashMap<Ipv4Addr, VecDeque<Vec<u8>>>,
    inbound: VecDeque<Vec<u8>>,
    now_ms: u64,
}

impl<P: OutputPort> NetworkInterface<P> {
    pub fn new(ethernet_address: MacAddr, ip_address: Ipv4Addr, output: P) -> Self {
        NetworkInterface {
            ethernet_address,
            ip_address,
            output,
            arp: ArpTable::new(),
            pending: HashMap::new(),
            inbound: VecDeque::new(),
            now_ms: 0,
        }
    }

    pub fn ip_address(&self) -> Ipv4Addr {
        self.ip_address
    }

    pub fn ethernet_address(&self) -> MacAddr {
        self.ethernet_address
    }

    /// Sends `dgram` to `next_hop`, resolving its Ethernet address via
    /// ARP first if necessary.
    pub fn send_datagram(&mut self, dgram: Vec<u8>, next_hop: Ipv4Addr) {
        if let Some(mac) = self.arp.lookup(next_hop) {
            let frame = EthernetFrame::new(mac, self.ethernet_address, ETHERTYPE_IPV4, dgram);
            trace!(%next_hop, "sending IPv4 datagram, address already cached");
            self.output.transmit(&frame);
            return;
        }

        self.pending.entry(next_hop).or_default().push_back(dgram);

        if !self.arp.has_recent_request(next_hop, self.now_ms) {
            debug!(%next_hop, "no cached or in-flight ARP entry, broadcasting request");
            let request = ArpMessage::request(self.ethernet_address, self.ip_address, next_hop);
            let frame = EthernetFrame::new(
                BROADCAST,
                self.ethernet_address,
                ETHERTYPE_ARP,
                request.encode().to_vec(),
            );
            self.output.transmit(&frame);
            self.arp.record_request(next_hop, self.now_ms);
        }
    }

    pub fn recv_frame(&mut self, frame: &EthernetFrame) {
        if !frame.is_for(self.ethernet_address) {
            return;
        }

        match frame.ethertype {
            ETHERTYPE_IPV4 => {
                if Ipv4HeaderSlice::from_slice(&frame.payload).is_ok() {
                    self.inbound.push_back(frame.payload.clone());
                } else {
                    warn!("dropping unparseable IPv4 datagram");
                }
            }
            ETHERTYPE_ARP => self.handle_arp(frame),
            other => trace!(ethertype = other, "ignoring unknown ethertype"),
        }
    }

    fn handle_arp(&mut self, frame: &EthernetFrame) {
        let Some(msg) = ArpMessage::decode(&frame.payload) else {
            warn!("dropping unparseable ARP packet");
            return;
        };

        self.arp.learn(
            msg.sender_ip_address,
            msg.sender_ethernet_address,
            self.now_ms,
        );

        match msg.operation {
            ArpOperation::Reply => {
                if let Some(queued) = self.pending.remove(&msg.sender_ip_address) {
                    debug!(
                        ip = %msg.sender_ip_address,
                        count = queued.len(),
                        "ARP reply resolved queued datagrams"
                    );
                    for dgram in queued {
                        let out = EthernetFrame::new(
                            msg.sender_ethernet_address,
                            self.ethernet_address,
                            ETHERTYPE_IPV4,
                            dgram,
                        );
                        self.output.transmit(&out);
                    }
                }
            }
            ArpOperation::Request => {
                if msg.target_ip_address == self.ip_address {
                    let reply = ArpMessage::reply(
                        self.ethernet_address,
                        self.ip_address,
                        msg.sender_ethernet_address,
                        msg.sender_ip_address,
                    );
                    let out = EthernetFrame::new(
                        msg.sender_ethernet_address,
                        self.ethernet_address,
                        ETHERTYPE_ARP,
                        reply.encode().to_vec(),
                    );
                    self.output.transmit(&out);
                }
            }
        }
    }

    pub fn tick(&mut self, ms: u64) {
        self.now_ms += ms;
        let expired_next_hops = self.arp.expire(self.now_ms);
        for next_hop in expired_next_hops {
            // §9 open question: drop queued frames for a destination
            // whose ARP request timed out rather than retain them for
            // the next resolution attempt.
            if self.pending.remove(&next_hop).is_some() {
                debug!(%next_hop, "dropped queued datagrams after ARP request timeout");
            }
        }
    }

    pub fn pop_inbound_datagram(&mut self) -> Option<Vec<u8>> {
        self.inbound.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingPort {
        sent: Vec<EthernetFrame>,
    }

    impl OutputPort for RecordingPort {
        fn transmit(&mut self, frame: &EthernetFrame) {
            self.sent.push(frame.clone());
        }
    }

    fn interface() -> NetworkInterface<RecordingPort> {
        NetworkInterface::new(
            [0, 1, 2, 3, 4, 5],
            Ipv4Addr::new(192, 168, 0, 1),
            RecordingPort::default(),
        )
    }

    #[test]
    fn send_with_empty_cache_queues_and_broadcasts_arp() {
        let mut nic = interface();
        nic.send_datagram(vec![1, 2, 3], Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(nic.output.sent.len(), 1);
        assert_eq!(nic.output.sent[0].dst, BROADCAST);
        assert_eq!(nic.output.sent[0].ethertype, ETHERTYPE_ARP);
    }

    #[test]
    fn arp_reply_flushes_queue_and_caches_mac() {
        let mut nic = interface();
        let dest = Ipv4Addr::new(10, 0, 0, 5);
        nic.send_datagram(vec![1, 2, 3], dest);

        let reply = ArpMessage::reply(
            [9, 9, 9, 9, 9, 9],
            dest,
            nic.ethernet_address(),
            nic.ip_address(),
        );
        let frame = EthernetFrame::new(
            nic.ethernet_address(),
            [9, 9, 9, 9, 9, 9],
            ETHERTYPE_ARP,
            reply.encode().to_vec(),
        );
        nic.recv_frame(&frame);

        assert_eq!(nic.output.sent.len(), 2);
        assert_eq!(nic.output.sent[1].dst, [9, 9, 9, 9, 9, 9]);

        nic.send_datagram(vec![4, 5, 6], dest);
        assert_eq!(nic.output.sent.len(), 3);
        assert_eq!(nic.output.sent[2].dst, [9, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn cache_entry_expires_after_30s_of_ticks() {
        let mut nic = interface();
        nic.arp.learn(Ipv4Addr::new(10, 0, 0, 5), [9; 6], 0);
        nic.tick(29_999);
        assert!(nic.arp.lookup(Ipv4Addr::new(10, 0, 0, 5)).is_some());
        nic.tick(1);
        assert!(nic.arp.lookup(Ipv4Addr::new(10, 0, 0, 5)).is_none());
    }

    #[test]
    fn frame_for_someone_else_is_dropped() {
        let mut nic = interface();
        let frame = EthernetFrame::new(
            [7, 7, 7, 7, 7, 7],
            [1, 1, 1, 1, 1, 1],
            ETHERTYPE_IPV4,
            vec![1, 2, 3],
        );
        nic.recv_frame(&frame);
        assert!(nic.pop_inbound_datagram().is_none());
    }
}
