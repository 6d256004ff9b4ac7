//! Topology setup: registration, rank assignment and ring wiring.
//!
//! The root accepts workers on its listening port and assigns ranks in
//! arrival order starting at 1. Each worker has already bound its ring
//! listener and advertises it in the registration. Once registration closes,
//! every worker learns the ring address of the next-registered worker, so
//! ring adjacency is a pure function of arrival order:
//!
//! ```text
//! root(0) -> worker 1 -> worker 2 -> ... -> worker N
//! ```

use crate::algorithm::Command;
use crate::comm::{Communicator, CommunicatorBuilder};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::wire;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread;
use tracing::{debug, info, warn};

/// Signal the root sends every worker once the neighbor plan is out.
const READY: i32 = 1;

/// Where the root's registration loop gets the operator's command from.
///
/// Polled with the number of workers registered so far; `Ok(None)` keeps
/// registration open. Closures `FnMut(usize) -> Option<Command>` and
/// channel receivers both qualify.
pub trait CommandSource {
    /// Check for a command without blocking.
    fn poll_command(&mut self, registered: usize) -> Result<Option<Command>>;
}

impl<F> CommandSource for F
where
    F: FnMut(usize) -> Option<Command>,
{
    fn poll_command(&mut self, registered: usize) -> Result<Option<Command>> {
        Ok((*self)(registered))
    }
}

impl CommandSource for Receiver<Command> {
    /// A disconnected channel can never deliver a command, so it ends
    /// registration with [`Error::CommandSourceClosed`].
    fn poll_command(&mut self, _registered: usize) -> Result<Option<Command>> {
        match self.try_recv() {
            Ok(command) => Ok(Some(command)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::CommandSourceClosed),
        }
    }
}

/// A registered worker as the root sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    /// Assigned rank (1-based, arrival order)
    pub rank: i32,
    /// Address of the worker's ring listener
    pub ring_addr: SocketAddrV4,
    /// Remote address of the registration connection
    pub peer: SocketAddr,
}

/// The root's listening endpoint, before registration closes.
#[derive(Debug)]
pub struct Coordinator {
    listener: TcpListener,
    config: SessionConfig,
}

impl Coordinator {
    /// Listen on all interfaces at `config.coordinator_port`.
    pub fn bind(config: &SessionConfig) -> Result<Self> {
        Self::bind_addr(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.coordinator_port)),
            config,
        )
    }

    /// Listen on a specific address.
    pub fn bind_addr(addr: SocketAddr, config: &SessionConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!(addr = %listener.local_addr()?, "coordinator listening");
        Ok(Coordinator {
            listener,
            config: config.clone(),
        })
    }

    /// Address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Session configuration this coordinator was bound with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Accept registrations until `command` yields a command or the worker
    /// cap is reached, then send every worker its right-neighbor record.
    ///
    /// `command` is polled with the number of workers registered so far.
    /// After the cap is reached no more connections are accepted, but the
    /// root keeps polling until a command arrives. A peer that sends nothing
    /// within `registration_timeout` is dropped like a malformed one.
    pub fn accept_workers<S: CommandSource>(self, mut command: S) -> Result<Registration> {
        self.listener.set_nonblocking(true)?;
        let mut workers = Vec::new();
        let mut sockets = Vec::new();

        let chosen = loop {
            if let Some(chosen) = command.poll_command(workers.len())? {
                break chosen;
            }
            if workers.len() >= self.config.max_workers {
                info!(workers = workers.len(), "worker cap reached, waiting for command");
                break loop {
                    if let Some(chosen) = command.poll_command(workers.len())? {
                        break chosen;
                    }
                    thread::sleep(self.config.poll_interval);
                };
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let rank = workers.len() as i32 + 1;
                    match register(&stream, rank, &self.config) {
                        Ok(ring_addr) => {
                            info!(rank, %ring_addr, %peer, "worker registered");
                            workers.push(WorkerInfo {
                                rank,
                                ring_addr,
                                peer,
                            });
                            sockets.push(stream);
                        }
                        Err(e) => warn!(%peer, error = %e, "dropping connection"),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(self.config.poll_interval);
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        };

        info!(workers = workers.len(), command = %chosen, "registration closed");
        for (i, mut socket) in sockets.iter().enumerate() {
            let right = workers.get(i + 1).map(|w| w.ring_addr);
            wire::write_neighbor(&mut socket, right)?;
        }
        Ok(Registration {
            command: chosen,
            workers,
            sockets,
            config: self.config,
        })
    }
}

/// Read one registration and reply with the assigned rank.
fn register(mut stream: &TcpStream, rank: i32, config: &SessionConfig) -> Result<SocketAddrV4> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(config.registration_timeout))?;
    let ring_addr = wire::read_registration(&mut stream)?;
    // Session traffic blocks without a deadline
    stream.set_read_timeout(None)?;
    wire::write_int(&mut stream, rank)?;
    Ok(ring_addr)
}

/// What registration produced at the root: the command, the workers and
/// their live sockets. Consumed once to build the root communicator.
#[derive(Debug)]
pub struct Registration {
    command: Command,
    workers: Vec<WorkerInfo>,
    sockets: Vec<TcpStream>,
    config: SessionConfig,
}

impl Registration {
    /// Command chosen by the operator.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Registered workers in rank order.
    pub fn workers(&self) -> &[WorkerInfo] {
        &self.workers
    }

    /// Send READY, join the ring as worker 1's left neighbor, and hand every
    /// socket to a new root communicator.
    pub fn into_communicator(self) -> Result<Communicator> {
        for mut socket in &self.sockets {
            wire::write_int(&mut socket, READY)?;
        }

        let mut builder = CommunicatorBuilder::root(self.sockets).routing(self.config.routing);
        if let Some(first) = self.workers.first() {
            let link = TcpStream::connect(first.ring_addr)?;
            debug!(addr = %first.ring_addr, "connected to right neighbor (worker 1)");
            builder = builder.right(link);
        }
        builder.build()
    }
}

/// A worker's view after registering: its rank, its coordinator link and
/// where its ring successor listens.
#[derive(Debug)]
pub struct WorkerConnection {
    rank: i32,
    socket: TcpStream,
    ring_listener: TcpListener,
    own_addr: SocketAddrV4,
    right: Option<SocketAddrV4>,
    config: SessionConfig,
}

/// Bind the ring listener, connect to the root, register and learn the
/// right neighbor.
///
/// Blocks until the root closes registration.
pub fn connect_to_coordinator(
    coordinator: SocketAddr,
    config: &SessionConfig,
) -> Result<WorkerConnection> {
    let ring_listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.worker_port))?;
    info!(%coordinator, "connecting to coordinator");
    let mut socket = TcpStream::connect(coordinator)?;

    let local = wire::as_v4(socket.local_addr()?)?;
    let ip = advertised_ip(*local.ip(), config.advertise_ip, discover_local_ipv4);
    let own_addr = SocketAddrV4::new(ip, ring_listener.local_addr()?.port());
    wire::write_registration(&mut socket, own_addr)?;

    let rank = wire::read_int(&mut socket)?;
    if rank < 1 {
        return Err(Error::Registration(format!("coordinator assigned rank {rank}")));
    }
    info!(rank, %own_addr, "registered");

    let right = wire::read_neighbor(&mut socket)?;
    match right {
        Some(addr) => debug!(rank, %addr, "right neighbor announced"),
        None => debug!(rank, "no right neighbor (last worker)"),
    }

    Ok(WorkerConnection {
        rank,
        socket,
        ring_listener,
        own_addr,
        right,
        config: config.clone(),
    })
}

/// Pick the IP a worker advertises for its ring listener.
///
/// An explicit setting wins. Otherwise the local address of the coordinator
/// connection is used, since the root reached us there; a loopback address
/// is only reachable from this host, so it is swapped for a discovered
/// interface address when one exists.
fn advertised_ip<D>(connection: Ipv4Addr, configured: Option<Ipv4Addr>, discover: D) -> Ipv4Addr
where
    D: FnOnce() -> Option<Ipv4Addr>,
{
    if let Some(ip) = configured {
        return ip;
    }
    if !connection.is_loopback() {
        return connection;
    }
    match discover() {
        Some(ip) => {
            debug!(%ip, "coordinator reached over loopback, advertising interface address");
            ip
        }
        None => {
            warn!("no non-loopback IPv4 address found; ring peers on other hosts cannot reach us");
            connection
        }
    }
}

fn discover_local_ipv4() -> Option<Ipv4Addr> {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(ip)) if !ip.is_loopback() => Some(ip),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "local IP lookup failed");
            None
        }
    }
}

impl WorkerConnection {
    /// Rank assigned by the root.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Ring address this worker advertised.
    pub fn own_addr(&self) -> SocketAddrV4 {
        self.own_addr
    }

    /// Ring successor announced by the root, if any.
    pub fn right_neighbor(&self) -> Option<SocketAddrV4> {
        self.right
    }

    /// Wait for READY, accept the left neighbor, connect the right one and
    /// build the worker communicator.
    pub fn into_communicator(self) -> Result<Communicator> {
        let mut socket = &self.socket;
        let ready = wire::read_int(&mut socket)?;
        debug!(rank = self.rank, ready, "coordinator ready");

        // Worker 1's left neighbor is the root
        let (left, peer) = self.ring_listener.accept()?;
        debug!(rank = self.rank, %peer, "left neighbor connected");
        drop(self.ring_listener);

        let mut builder = CommunicatorBuilder::worker(self.rank, self.socket)?
            .routing(self.config.routing)
            .left(left);
        if let Some(addr) = self.right {
            let link = TcpStream::connect(addr)?;
            debug!(rank = self.rank, %addr, "connected to right neighbor");
            builder = builder.right(link);
        }
        builder.build()
    }
}
