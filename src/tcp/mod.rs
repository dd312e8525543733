//! The reliable-byte-stream core: sequence arithmetic, the bounded
//! byte buffer, out-of-order reassembly, and the receiver/sender pair
//! that drive them.

pub mod byte_stream;
pub mod connection;
pub mod isn;
pub mod message;
pub mod reassembler;
pub mod receiver;
pub mod sender;
pub mod state;
pub mod wrap32;

pub use byte_stream::ByteStream;
pub use connection::{Connection, Tcp4Tuple};
pub use isn::generate_isn;
pub use message::{TCPReceiverMessage, TCPSenderMessage, MAX_PAYLOAD_SIZE};
pub use reassembler::Reassembler;
pub use receiver::TCPReceiver;
pub use sender::TCPSender;
pub use state::{Available, SenderState};
pub use wrap32::Wrap32;
