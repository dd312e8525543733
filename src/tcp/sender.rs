//! Pulls bytes from an outbound [`ByteStream`] into segments, and
//! retransmits the oldest outstanding segment on a single timer with
//! exponential backoff.

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use super::byte_stream::ByteStream;
use super::message::{TCPReceiverMessage, TCPSenderMessage, MAX_PAYLOAD_SIZE};
use super::state::SenderState;
use super::wrap32::Wrap32;

#[derive(Debug, Clone, Copy)]
enum Timer {
    Stopped,
    Running { expiry_ms: u64 },
}

impl Timer {
    fn is_stopped(self) -> bool {
        matches!(self, Timer::Stopped)
    }
}

#[derive(Debug)]
pub struct TCPSender {
    isn: Wrap32,
    initial_rto_ms: u64,
    current_rto_ms: u64,
    consecutive_retransmissions: u64,
    window_size: u16,
    next_seqno: u64,
    last_ackno: u64,
    outstanding: BTreeMap<u64, TCPSenderMessage>,
    timer: Timer,
    now_ms: u64,
    syn_sent: bool,
    fin_sent: bool,
    outbound: ByteStream,
}

impl TCPSender {
    pub fn new(outbound: ByteStream, isn: Wrap32, initial_rto_ms: u64) -> Self {
        TCPSender {
            isn,
            initial_rto_ms,
            current_rto_ms: initial_rto_ms,
            consecutive_retransmissions: 0,
            window_size: 1,
            next_seqno: 0,
            last_ackno: 0,
            outstanding: BTreeMap::new(),
            timer: Timer::Stopped,
            now_ms: 0,
            syn_sent: false,
            fin_sent: false,
            outbound,
        }
    }

    pub fn writer(&mut self) -> &mut ByteStream {
        &mut self.outbound
    }

    pub fn reader(&self) -> &ByteStream {
        &self.outbound
    }

    pub fn sequence_numbers_in_flight(&self) -> u64 {
        self.next_seqno - self.last_ackno
    }

    pub fn consecutive_retransmissions(&self) -> u64 {
        self.consecutive_retransmissions
    }

    pub fn current_rto_ms(&self) -> u64 {
        self.current_rto_ms
    }

    pub fn state(&self) -> SenderState {
        if !self.syn_sent {
            return SenderState::Closed;
        }
        if self.last_ackno < 1 {
            return SenderState::SynSent;
        }
        if !self.fin_sent {
            return SenderState::Established;
        }
        if self.last_ackno == self.next_seqno {
            SenderState::FinAcked
        } else {
            SenderState::FinSent
        }
    }

    /// Fills the receiver's advertised window with as many segments as
    /// fit, emitting each via `transmit`.
    pub fn push(&mut self, mut transmit: impl FnMut(TCPSenderMessage)) {
        loop {
            let window = std::cmp::max(self.window_size as u64, 1);
            let in_flight = self.sequence_numbers_in_flight();
            if in_flight >= window {
                break;
            }

            let syn = !self.syn_sent;
            let remaining = (window - in_flight - u64::from(syn)) as usize;
            let payload_cap = std::cmp::min(remaining, MAX_PAYLOAD_SIZE);
            let payload = take_bytes(&mut self.outbound, payload_cap);

            let space_after_payload = remaining - payload.len();
            let fin =
                self.outbound.is_finished() && !self.fin_sent && space_after_payload > 0;

            let seg = TCPSenderMessage {
                seqno: Wrap32::wrap(self.next_seqno, self.isn),
                syn,
                payload,
                fin,
                rst: self.outbound.has_error(),
            };

            if seg.sequence_length() == 0 {
                break;
            }

            let start = self.next_seqno;
            self.next_seqno += seg.sequence_length() as u64;
            self.syn_sent |= syn;
            self.fin_sent |= fin;

            if self.timer.is_stopped() {
                self.timer = Timer::Running {
                    expiry_ms: self.now_ms + self.current_rto_ms,
                };
            }

            trace!(seqno = ?seg.seqno, len = seg.sequence_length(), "sending segment");
            transmit(seg.clone());
            self.outstanding.insert(start, seg);

            if self.fin_sent {
                break;
            }
        }
    }

    pub fn receive(&mut self, msg: TCPReceiverMessage) {
        if msg.rst {
            warn!("peer sent RST, erroring outbound stream");
            self.outbound.set_error();
            return;
        }

        self.window_size = msg.window_size;

        let Some(ackno) = msg.ackno else {
            return;
        };
        let a = ackno.unwrap(self.isn, self.next_seqno);
        if a > self.next_seqno {
            trace!("ignoring ack for data never sent");
            return;
        }

        let to_remove: Vec<u64> = self
            .outstanding
            .iter()
            .filter(|(&start, seg)| start + seg.sequence_length() as u64 <= a)
            .map(|(&start, _)| start)
            .collect();

        let removed_any = !to_remove.is_empty();
        for start in to_remove {
            self.outstanding.remove(&start);
        }

        if a > self.last_ackno {
            self.last_ackno = a;
        }

        if removed_any {
            debug!(ackno = a, "ack progressed, resetting RTO/backoff");
            self.current_rto_ms = self.initial_rto_ms;
            self.consecutive_retransmissions = 0;
            self.timer = if self.outstanding.is_empty() {
                Timer::Stopped
            } else {
                Timer::Running {
                    expiry_ms: self.now_ms + self.current_rto_ms,
                }
            };
        }
    }

    pub fn tick(&mut self, ms: u64, mut transmit: impl FnMut(TCPSenderMessage)) {
        self.now_ms += ms;

        if let Timer::Running { expiry_ms } = self.timer {
            if self.now_ms >= expiry_ms {
                if let Some((_, seg)) = self.outstanding.iter().next() {
                    let seg = seg.clone();
                    trace!(seqno = ?seg.seqno, "retransmitting oldest outstanding segment");
                    transmit(seg);
                }
                if self.window_size > 0 {
                    self.consecutive_retransmissions += 1;
                    self.current_rto_ms *= 2;
                }
                self.timer = Timer::Running {
                    expiry_ms: self.now_ms + self.current_rto_ms,
                };
            }
        }
    }

    pub fn make_empty_message(&self) -> TCPSenderMessage {
        TCPSenderMessage {
            seqno: Wrap32::wrap(self.next_seqno, self.isn),
            syn: false,
            payload: vec![],
            fin: false,
            rst: self.outbound.has_error(),
        }
    }
}

/// Reads up to `max` bytes out of `stream`, looping because `peek` may
/// only hand back a partial contiguous view at a time.
fn take_bytes(stream: &mut ByteStream, max: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(max);
    while out.len() < max {
        let chunk = stream.peek();
        if chunk.is_empty() {
            break;
        }
        let take = std::cmp::min(max - out.len(), chunk.len());
        out.extend_from_slice(&chunk[..take]);
        stream.pop(take);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(capacity: usize, initial_rto_ms: u64) -> TCPSender {
        TCPSender::new(ByteStream::new(capacity), Wrap32::new(0), initial_rto_ms)
    }

    #[test]
    fn handshake_sends_syn_then_data() {
        let mut s = sender(4000, 1000);
        let mut sent = Vec::new();
        s.push(|seg| sent.push(seg));
        assert_eq!(sent.len(), 1);
        assert!(sent[0].syn);
        assert_eq!(sent[0].seqno, Wrap32::new(0));
        assert_eq!(s.sequence_numbers_in_flight(), 1);

        s.receive(TCPReceiverMessage {
            ackno: Some(Wrap32::new(1)),
            window_size: 4000,
            rst: false,
        });
        assert_eq!(s.sequence_numbers_in_flight(), 0);
        assert_eq!(s.current_rto_ms(), 1000);

        s.writer().push(b"hello");
        sent.clear();
        s.push(|seg| sent.push(seg));
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].seqno, Wrap32::new(1));
        assert_eq!(sent[0].payload, b"hello");
    }

    #[test]
    fn retransmission_backs_off_exponentially() {
        let mut s = sender(4000, 1000);
        s.push(|_| {});
        assert_eq!(s.sequence_numbers_in_flight(), 1);

        let mut retransmits = 0;
        s.tick(999, |_| retransmits += 1);
        assert_eq!(retransmits, 0);

        s.tick(1, |_| retransmits += 1);
        assert_eq!(retransmits, 1);
        assert_eq!(s.current_rto_ms(), 2000);
        assert_eq!(s.consecutive_retransmissions(), 1);

        s.tick(2000, |_| retransmits += 1);
        assert_eq!(retransmits, 2);
        assert_eq!(s.current_rto_ms(), 4000);
        assert_eq!(s.consecutive_retransmissions(), 2);

        s.receive(TCPReceiverMessage {
            ackno: Some(Wrap32::new(1)),
            window_size: 4000,
            rst: false,
        });
        assert_eq!(s.consecutive_retransmissions(), 0);
        assert_eq!(s.current_rto_ms(), 1000);
    }

    #[test]
    fn zero_window_probes_with_one_byte_and_no_backoff_increment() {
        let mut s = sender(4000, 1000);
        s.push(|_| {});
        s.receive(TCPReceiverMessage {
            ackno: Some(Wrap32::new(1)),
            window_size: 0,
            rst: false,
        });
        s.writer().push(b"abc");
        let mut sent = Vec::new();
        s.push(|seg| sent.push(seg));
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.len(), 1);

        s.tick(1000, |_| {});
        assert_eq!(s.consecutive_retransmissions(), 0);
    }

    #[test]
    fn rst_from_peer_errors_outbound_stream() {
        let mut s = sender(4000, 1000);
        s.receive(TCPReceiverMessage {
            ackno: None,
            window_size: 0,
            rst: true,
        });
        assert!(s.reader().has_error());
    }
}
