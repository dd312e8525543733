//! Error types for the framing/driver layer. The core algorithms
//! (`ByteStream`, `Reassembler`, `TCPSender`/`TCPReceiver`,
//! `NetworkInterface`) are exception-free per the error-handling
//! design: every operation on them either succeeds or silently
//! no-ops. This enum exists only for the boundary that decodes wire
//! bytes and the socket-style API built on top of it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("malformed wire header: {0}")]
    HeaderParse(#[from] etherparse::ReadError),

    #[error("malformed ARP packet")]
    MalformedArp,

    #[error("unexpected non-SYN segment for unknown connection")]
    UnexpectedSegment,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The socket layer keeps returning `std::io::Result` (the contract
/// `io::Read`/`io::Write` requires), so framing failures get wrapped
/// here rather than threading `DriverError` through `TcpStream`.
impl From<DriverError> for std::io::Error {
    fn from(err: DriverError) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, err)
    }
}
