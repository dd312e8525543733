//! Feeds incoming segments into a [`Reassembler`] and advertises an
//! ackno/window back to the peer.

use tracing::{debug, trace};

use super::message::{TCPReceiverMessage, TCPSenderMessage};
use super::reassembler::Reassembler;
use super::wrap32::Wrap32;

#[derive(Debug)]
pub struct TCPReceiver {
    isn: Option<Wrap32>,
    reassembler: Reassembler,
    rst: bool,
}

impl TCPReceiver {
    pub fn new(reassembler: Reassembler) -> Self {
        TCPReceiver {
            isn: None,
            reassembler,
            rst: false,
        }
    }

    pub fn receive(&mut self, seg: TCPSenderMessage) {
        if seg.rst {
            self.rst = true;
            self.reassembler.writer().set_error();
        }

        if self.isn.is_none() {
            if !seg.syn {
                trace!("ignoring segment before SYN seen");
                return;
            }
            self.isn = Some(seg.seqno);
            debug!(isn = ?seg.seqno, "TCP receiver saw SYN");
        }
        let isn = self.isn.unwrap();

        let checkpoint = self.reassembler.reader().bytes_pushed() + 1;
        let abs_seqno = seg.seqno.unwrap(isn, checkpoint);
        // The first payload byte occupies absolute sequence ISN+1; a
        // bare SYN consumes that slot itself.
        let stream_index = abs_seqno - 1 + u64::from(seg.syn);

        self.reassembler.insert(stream_index, &seg.payload, seg.fin);
    }

    pub fn send(&self) -> TCPReceiverMessage {
        let window_size = std::cmp::min(
            self.reassembler.reader().available_capacity(),
            u16::MAX as usize,
        ) as u16;

        let ackno = self.isn.map(|isn| {
            let pushed = self.reassembler.reader().bytes_pushed();
            let closed = self.reassembler.reader().is_closed();
            Wrap32::wrap(1 + pushed + u64::from(closed), isn)
        });

        TCPReceiverMessage {
            ackno,
            window_size,
            rst: self.rst || self.reassembler.reader().has_error(),
        }
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    pub fn reassembler_mut(&mut self) -> &mut Reassembler {
        &mut self.reassembler
    }

    pub fn inbound(&self) -> &super::byte_stream::ByteStream {
        self.reassembler.reader()
    }

    pub fn inbound_mut(&mut self) -> &mut super::byte_stream::ByteStream {
        self.reassembler.writer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::byte_stream::ByteStream;

    fn receiver(capacity: usize) -> TCPReceiver {
        TCPReceiver::new(Reassembler::new(ByteStream::new(capacity)))
    }

    #[test]
    fn no_ackno_before_syn() {
        let r = receiver(100);
        assert_eq!(r.send().ackno, None);
    }

    #[test]
    fn syn_then_data_advances_ackno() {
        let mut r = receiver(100);
        let isn = Wrap32::new(1000);
        r.receive(TCPSenderMessage {
            seqno: isn,
            syn: true,
            payload: vec![],
            fin: false,
            rst: false,
        });
        assert_eq!(r.send().ackno, Some(isn + 1));

        r.receive(TCPSenderMessage {
            seqno: isn + 1,
            syn: false,
            payload: b"hello".to_vec(),
            fin: false,
            rst: false,
        });
        assert_eq!(r.send().ackno, Some(isn + 6));
        assert_eq!(r.reassembler().reader().peek(), b"hello");
    }

    #[test]
    fn fin_closes_and_bumps_ackno_by_one() {
        let mut r = receiver(100);
        let isn = Wrap32::new(0);
        r.receive(TCPSenderMessage {
            seqno: isn,
            syn: true,
            payload: vec![],
            fin: false,
            rst: false,
        });
        r.receive(TCPSenderMessage {
            seqno: isn + 1,
            syn: false,
            payload: b"hi".to_vec(),
            fin: true,
            rst: false,
        });
        assert_eq!(r.send().ackno, Some(isn + 4));
        assert!(r.reassembler().reader().is_closed());
    }

    #[test]
    fn rst_flag_propagates_and_errors_stream() {
        let mut r = receiver(100);
        r.receive(TCPSenderMessage {
            seqno: Wrap32::new(0),
            syn: false,
            payload: vec![],
            fin: false,
            rst: true,
        });
        assert!(r.send().rst);
        assert!(r.reassembler().reader().has_error());
    }
}
