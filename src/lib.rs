use etherparse::{IpNumber, Ipv4HeaderSlice, TcpHeaderSlice};
use std::{
    collections::{hash_map, HashMap, VecDeque},
    io,
    sync::{Arc, Condvar, Mutex},
    thread,
    time::Duration,
};

use tracing::{debug, trace, warn};

pub mod error;
pub mod net;
pub mod tcp;

use tcp::{
    connection::{Connection, Tcp4Tuple},
    generate_isn,
    state::Available,
};

const BUFFER_SIZE: usize = 1504;
const SEND_QUEUE_SIZE: usize = 1024;
const TIMER_TICK: Duration = Duration::from_millis(100);

/// Per-connection tunables handed down from the CLI/config layer to
/// every [`Connection`] this interface accepts or opens.
#[derive(Debug, Clone, Copy)]
pub struct StackConfig {
    pub stream_capacity: usize,
    pub initial_rto_ms: u64,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            stream_capacity: 64 * 1024,
            initial_rto_ms: 1000,
        }
    }
}

type InterfaceHandle = Arc<InterfaceManager>;

struct InterfaceManager {
    manager: Mutex<ConnectionManager>,
    config: StackConfig,
    pending_var: Condvar,
    receive_var: Condvar,
}

#[derive(Default)]
pub struct ConnectionManager {
    pending: HashMap<u16, VecDeque<Tcp4Tuple>>,
    connections: HashMap<Tcp4Tuple, Connection>,
    terminate: bool,
}

/// Interface to the TCP implementation: owns the background thread
/// that drives the TUN device and every accepted connection.
pub struct Interface {
    ih: Option<InterfaceHandle>,
    jh: Option<thread::JoinHandle<io::Result<()>>>,
    timer_jh: Option<thread::JoinHandle<()>>,
}

fn packet_loop(nic: Arc<tun_tap::Iface>, ih: InterfaceHandle) -> io::Result<()> {
    let mut buf = [0u8; BUFFER_SIZE];

    loop {
        {
            let cm = ih.manager.lock().unwrap();
            if cm.terminate {
                return Ok(());
            }
        }

        let nbytes = nic.recv(&mut buf[..])?;
        let version = buf[0] >> 4;
        if version != 4 {
            continue;
        }
        match Ipv4HeaderSlice::from_slice(&buf[..nbytes]) {
            Ok(ip) => {
                let src = ip.source_addr();
                let dst = ip.destination_addr();
                let proto = ip.protocol();
                let ip_len = ip.slice().len();
                if proto != IpNumber::TCP {
                    continue;
                }
                let tcp_raw = &buf[ip_len..nbytes];
                match TcpHeaderSlice::from_slice(tcp_raw) {
                    Ok(tcp) => {
                        let srcp = tcp.source_port();
                        let dstp = tcp.destination_port();
                        let tcp_len = tcp.slice().len();
                        let data_off = ip_len + tcp_len;
                        let data = &buf[data_off..nbytes];

                        let mut cm_guard = ih.manager.lock().unwrap();
                        let cm = &mut *cm_guard;

                        let quad = Tcp4Tuple {
                            src: (src, srcp),
                            dst: (dst, dstp),
                        };

                        match cm.connections.entry(quad.clone()) {
                            hash_map::Entry::Occupied(mut entry) => {
                                let conn = entry.get_mut();
                                match conn.on_packet(&nic, ip, tcp, data) {
                                    Ok(avail) => {
                                        drop(cm_guard);
                                        if avail.contains(Available::READ) {
                                            ih.receive_var.notify_all();
                                        }
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "error processing packet");
                                    }
                                }
                            }
                            hash_map::Entry::Vacant(e) => {
                                if let Some(pending) = cm.pending.get_mut(&dstp) {
                                    let isn = generate_isn(&quad);
                                    match Connection::accept(
                                        &nic,
                                        ip,
                                        tcp,
                                        data,
                                        ih.config.stream_capacity,
                                        ih.config.initial_rto_ms,
                                        isn,
                                    ) {
                                        Ok(c) => {
                                            e.insert(c);
                                            pending.push_back(quad);
                                            drop(cm_guard);
                                            ih.pending_var.notify_all();
                                        }
                                        Err(e) => warn!(error = %e, "error accepting connection"),
                                    }
                                } else {
                                    trace!(port = dstp, "SYN for a port with no listener");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let err = error::DriverError::from(e);
                        debug!(error = %err, len = nbytes, "ignoring unparseable TCP segment");
                    }
                }
            }
            Err(e) => {
                let err = error::DriverError::from(e);
                debug!(error = %err, len = nbytes, "ignoring unparseable IPv4 datagram");
            }
        }
    }
}

fn timer_loop(nic: Arc<tun_tap::Iface>, ih: InterfaceHandle) {
    loop {
        thread::sleep(TIMER_TICK);
        let mut cm = ih.manager.lock().unwrap();
        if cm.terminate {
            return;
        }
        let ms = TIMER_TICK.as_millis() as u64;
        cm.connections.retain(|quad, conn| match conn.on_timer(&nic, ms) {
            Ok(()) => true,
            Err(e) => {
                warn!(?quad, error = %e, "dropping connection after timer error");
                false
            }
        });
    }
}

impl Interface {
    pub fn new(tun_name: &str, config: StackConfig) -> io::Result<Self> {
        let nic = Arc::new(tun_tap::Iface::without_packet_info(tun_name, tun_tap::Mode::Tun)?);
        let timer_nic = nic.clone();
        let ih: InterfaceHandle = Arc::new(InterfaceManager {
            manager: Mutex::new(ConnectionManager::default()),
            config,
            pending_var: Condvar::new(),
            receive_var: Condvar::new(),
        });

        let jh = {
            let ih = ih.clone();
            Some(thread::spawn(move || packet_loop(nic, ih)))
        };
        let timer_jh = {
            let ih = ih.clone();
            Some(thread::spawn(move || timer_loop(timer_nic, ih)))
        };

        Ok(Interface {
            ih: Some(ih),
            jh,
            timer_jh,
        })
    }

    pub fn bind(&mut self, port: u16) -> io::Result<TcpListener> {
        let mut cm = self.ih.as_mut().unwrap().manager.lock().unwrap();
        match cm.pending.entry(port) {
            hash_map::Entry::Vacant(v) => {
                v.insert(VecDeque::new());
            }
            hash_map::Entry::Occupied(_o) => {
                return Err(io::Error::new(io::ErrorKind::AddrInUse, "port in use"));
            }
        }
        drop(cm);
        Ok(TcpListener {
            ih: self.ih.as_mut().unwrap().clone(),
            port,
        })
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        if let Some(ih) = self.ih.as_ref() {
            ih.manager.lock().unwrap().terminate = true;
        }
        drop(self.ih.take());
        if let Some(jh) = self.jh.take() {
            let _ = jh.join();
        }
        if let Some(jh) = self.timer_jh.take() {
            let _ = jh.join();
        }
    }
}

pub struct TcpListener {
    ih: InterfaceHandle,
    port: u16,
}

impl TcpListener {
    pub fn accept(&mut self) -> io::Result<TcpStream> {
        let mut cm = self.ih.manager.lock().unwrap();
        loop {
            if let Some(quad) = cm
                .pending
                .get_mut(&self.port)
                .expect("port closed while listener is active")
                .pop_front()
            {
                return Ok(TcpStream {
                    ih: self.ih.clone(),
                    quad,
                });
            }
            cm = self.ih.pending_var.wait(cm).unwrap();
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        let mut cm = self.ih.manager.lock().unwrap();
        if let Some(pending) = cm.pending.remove(&self.port) {
            for quad in pending {
                debug!(?quad, "dropping pending connection on listener close");
            }
        }
    }
}

pub struct TcpStream {
    ih: InterfaceHandle,
    quad: Tcp4Tuple,
}

impl io::Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut cm = self.ih.manager.lock().unwrap();
        loop {
            let conn = cm
                .connections
                .get_mut(&self.quad)
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))?;

            let n = conn.read(buf);
            if n > 0 {
                return Ok(n);
            }
            if conn.is_recv_closed() {
                return Ok(0);
            }
            cm = self.ih.receive_var.wait(cm).unwrap();
        }
    }
}

impl io::Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut cm = self.ih.manager.lock().unwrap();

        let conn = cm
            .connections
            .get_mut(&self.quad)
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))?;

        if buf.len() > SEND_QUEUE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "too much data to write at once",
            ));
        }

        Ok(conn.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TcpStream {
    pub fn shutdown(&self, _how: std::net::Shutdown) -> io::Result<()> {
        let mut cm = self.ih.manager.lock().unwrap();
        if let Some(conn) = cm.connections.get_mut(&self.quad) {
            // best-effort: the background thread owns the real nic handle
            // for actually flushing a FIN onto the wire on the next timer
            // tick, so mark the outbound stream closed here.
            conn.mark_closing();
        }
        Ok(())
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        let mut cm = self.ih.manager.lock().unwrap();
        if let Some(conn) = cm.connections.get_mut(&self.quad) {
            conn.mark_closing();
        }
    }
}
