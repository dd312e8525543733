//! Connection-level state: the read/write availability flags used by
//! the socket layer, and the sender's handshake state machine.

use bitflags::bitflags;

bitflags! {
    /// Signals which capabilities of a [`crate::TcpStream`] became
    /// ready after processing an incoming segment, so the packet loop
    /// knows which condvar(s) to wake.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Available: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

/// The sender's view of the handshake: `CLOSED -> SYN_SENT ->
/// ESTABLISHED -> FIN_SENT -> FIN_ACKED`. This is derived, not stored —
/// [`crate::tcp::sender::TCPSender`] computes it on demand from
/// `syn_sent`/`fin_sent` and the ack progress already tracked in
/// `last_ackno`/`next_seqno`.
///
/// - `Closed`: no SYN has been sent yet.
/// - `SynSent`: SYN sent, not yet acknowledged.
/// - `Established`: SYN acknowledged, FIN not yet sent.
/// - `FinSent`: FIN sent, not yet acknowledged.
/// - `FinAcked`: FIN sent and acknowledged; the connection is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Closed,
    SynSent,
    Established,
    FinSent,
    FinAcked,
}
