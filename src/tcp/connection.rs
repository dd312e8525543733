//! Wires one [`TCPSender`] and one [`TCPReceiver`] together into a
//! socket-facing connection, and handles the wire-level encode/decode
//! that the core spec treats as an external collaborator — kept here
//! in the teacher's style (build headers, compute the checksum,
//! `nic.send`) rather than reimplemented per packet.

use etherparse::{IpNumber, Ipv4Header, Ipv4HeaderSlice, TcpHeader, TcpHeaderSlice};
use std::io::{self, Write};
use std::net::Ipv4Addr;

use super::byte_stream::ByteStream;
use super::message::{TCPReceiverMessage, TCPSenderMessage};
use super::reassembler::Reassembler;
use super::receiver::TCPReceiver;
use super::sender::TCPSender;
use super::state::Available;
use super::wrap32::Wrap32;

const MTU: usize = 1500;
const TTL: u8 = 64;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct Tcp4Tuple {
    pub src: (Ipv4Addr, u16),
    pub dst: (Ipv4Addr, u16),
}

#[derive(Debug)]
pub struct Connection {
    sender: TCPSender,
    receiver: TCPReceiver,
    ip: Ipv4Header,
    tcp: TcpHeader,
}

impl Connection {
    /// Any state after the peer's FIN has been fully reassembled.
    pub fn is_recv_closed(&self) -> bool {
        self.receiver.inbound().is_finished()
    }

    fn availability(&self) -> Available {
        let mut avail = Available::empty();
        if self.is_recv_closed() || self.receiver.inbound().buffer_size() > 0 {
            avail |= Available::READ;
        }
        if self.sender.reader().available_capacity() > 0 {
            avail |= Available::WRITE;
        }
        avail
    }

    pub fn accept(
        nic: &tun_tap::Iface,
        ip: Ipv4HeaderSlice,
        tcp: TcpHeaderSlice,
        _data: &[u8],
        capacity: usize,
        initial_rto_ms: u64,
        local_isn: Wrap32,
    ) -> io::Result<Self> {
        if !tcp.syn() {
            return Err(crate::error::DriverError::UnexpectedSegment.into());
        }

        let mut receiver = TCPReceiver::new(Reassembler::new(ByteStream::new(capacity)));
        receiver.receive(TCPSenderMessage {
            seqno: Wrap32::new(tcp.sequence_number()),
            syn: true,
            payload: Vec::new(),
            fin: false,
            rst: tcp.rst(),
        });

        let sender = TCPSender::new(ByteStream::new(capacity), local_isn, initial_rto_ms);
        let initial_window = receiver.send().window_size;

        let resp_tcp = TcpHeader::new(
            tcp.destination_port(),
            tcp.source_port(),
            local_isn.raw_value(),
            initial_window,
        );
        let resp_ip = Ipv4Header::new(
            resp_tcp.header_len() as u16,
            TTL,
            IpNumber::TCP,
            ip.destination_addr().octets(),
            ip.source_addr().octets(),
        )
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

        let mut conn = Connection {
            sender,
            receiver,
            ip: resp_ip,
            tcp: resp_tcp,
        };

        conn.send_pending(nic)?;
        Ok(conn)
    }

    /// Pulls everything the sender is ready to emit right now and puts
    /// it on the wire. Returns whether anything was actually sent.
    fn send_pending(&mut self, nic: &tun_tap::Iface) -> io::Result<bool> {
        let mut segments = Vec::new();
        self.sender.push(|seg| segments.push(seg));
        let sent_any = !segments.is_empty();
        for seg in segments {
            self.transmit_segment(nic, &seg)?;
        }
        Ok(sent_any)
    }

    /// Encodes one `TCPSenderMessage`, combined with the receiver's
    /// current `TCPReceiverMessage` (ack/window), as a real IPv4+TCP
    /// packet and writes it to the TUN device.
    fn transmit_segment(&mut self, nic: &tun_tap::Iface, seg: &TCPSenderMessage) -> io::Result<()> {
        let ack: TCPReceiverMessage = self.receiver.send();

        self.tcp.sequence_number = seg.seqno.raw_value();
        self.tcp.syn = seg.syn;
        self.tcp.fin = seg.fin;
        self.tcp.rst = seg.rst || ack.rst;
        self.tcp.window_size = ack.window_size;
        if let Some(ackno) = ack.ackno {
            self.tcp.ack = true;
            self.tcp.acknowledgment_number = ackno.raw_value();
        } else {
            self.tcp.ack = false;
            self.tcp.acknowledgment_number = 0;
        }

        let mut buf = [0u8; MTU];
        let payload = &seg.payload;
        let _ = self
            .ip
            .set_payload_len(self.tcp.header_len() as usize + payload.len());

        let buf_len = buf.len();
        let mut unwritten = &mut buf[..];
        self.ip.write(&mut unwritten)?;
        let ip_header_end = buf_len - unwritten.len();

        unwritten = &mut unwritten[self.tcp.header_len() as usize..];
        let tcp_header_end = buf_len - unwritten.len();

        unwritten.write_all(payload)?;
        let payload_end = tcp_header_end + payload.len();

        self.tcp.checksum = self
            .tcp
            .calc_checksum_ipv4(&self.ip, &buf[tcp_header_end..payload_end])
            .expect("failed to compute checksum");

        let mut tcp_header_buf = &mut buf[ip_header_end..tcp_header_end];
        self.tcp.write(&mut tcp_header_buf)?;

        nic.send(&buf[..payload_end])?;
        Ok(())
    }

    pub fn on_packet(
        &mut self,
        nic: &tun_tap::Iface,
        _ip: Ipv4HeaderSlice,
        tcp: TcpHeaderSlice,
        data: &[u8],
    ) -> io::Result<Available> {
        self.receiver.receive(TCPSenderMessage {
            seqno: Wrap32::new(tcp.sequence_number()),
            syn: tcp.syn(),
            payload: data.to_vec(),
            fin: tcp.fin(),
            rst: tcp.rst(),
        });

        if tcp.ack() {
            self.sender.receive(TCPReceiverMessage {
                ackno: Some(Wrap32::new(tcp.acknowledgment_number())),
                window_size: tcp.window_size(),
                rst: tcp.rst(),
            });
        }

        let sent_any = self.send_pending(nic)?;
        if !sent_any {
            // Nothing new to piggyback an ack onto; still need to
            // acknowledge what we just accepted (or re-ack a duplicate).
            let ack = self.sender.make_empty_message();
            self.transmit_segment(nic, &ack)?;
        }

        Ok(self.availability())
    }

    /// Advance the retransmission timer by `ms` and resend the oldest
    /// outstanding segment if it has expired.
    pub fn on_timer(&mut self, nic: &tun_tap::Iface, ms: u64) -> io::Result<()> {
        let mut retransmits = Vec::new();
        self.sender.tick(ms, |seg| retransmits.push(seg));
        for seg in retransmits {
            self.transmit_segment(nic, &seg)?;
        }
        // Also push any new data/FIN that became sendable since the
        // window or the app's outbound stream moved.
        self.send_pending(nic)?;
        Ok(())
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let inbound = self.receiver.inbound_mut();
        let chunk = inbound.peek();
        let n = std::cmp::min(buf.len(), chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        inbound.pop(n);
        n
    }

    pub fn write(&mut self, buf: &[u8]) -> usize {
        let before = self.sender.reader().bytes_pushed();
        self.sender.writer().push(buf);
        (self.sender.reader().bytes_pushed() - before) as usize
    }

    /// Marks the outbound stream closed so the next `on_timer`/`on_packet`
    /// pass emits a FIN; does not touch the wire itself, since the caller
    /// (the socket-facing `TcpStream`) does not hold the `tun_tap::Iface`.
    pub fn mark_closing(&mut self) {
        self.sender.writer().close();
    }

    pub fn send_rst(&mut self, nic: &tun_tap::Iface) -> io::Result<()> {
        self.sender.writer().set_error();
        let mut rst = self.sender.make_empty_message();
        rst.rst = true;
        self.transmit_segment(nic, &rst)
    }
}
