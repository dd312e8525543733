use std::io::{Read, Write};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tcprs::{Interface, StackConfig};

/// A userspace TCP/IP stack running over a TUN device.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Name of the TUN device to create/attach to.
    #[arg(long, default_value = "tun0")]
    tun_name: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// Capacity, in bytes, of each connection's inbound and outbound
    /// byte streams.
    #[arg(long, default_value_t = 64 * 1024)]
    stream_capacity: usize,

    /// Initial retransmission timeout, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    initial_rto_ms: u64,
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = StackConfig {
        stream_capacity: args.stream_capacity,
        initial_rto_ms: args.initial_rto_ms,
    };

    let mut iface = Interface::new(&args.tun_name, config)?;
    let mut listener = iface.bind(args.port)?;
    info!(tun = %args.tun_name, port = args.port, "listening");

    loop {
        let mut stream = listener.accept()?;
        info!("accepted connection");
        std::thread::spawn(move || -> std::io::Result<()> {
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                stream.write_all(&buf[..n])?;
            }
            Ok(())
        });
    }
}
