//! Bus sockets
//!
//! Presence uses a multicast sender plus a listener joined to the group;
//! events arrive on one unicast socket whose port is advertised in presence.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use contracts::BusConfig;
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{BusError, Result};

/// The three bus sockets, bound but not yet registered with the runtime.
#[derive(Debug)]
pub struct BusSockets {
    pub(crate) presence_tx: UdpSocket,
    pub(crate) presence_rx: UdpSocket,
    pub(crate) events: UdpSocket,
    pub(crate) presence_dest: SocketAddr,
}

impl BusSockets {
    /// Bind the multicast pair and the unicast event socket.
    ///
    /// Failure here is fatal: the bus cannot run without its sockets.
    pub fn bind(config: &BusConfig) -> Result<Self> {
        let group = config.multicast_group;
        let presence_rx = multicast_listener(group, config.interface)?;
        let presence_tx = multicast_sender(config.interface, config.multicast_loop)?;

        let events_addr = SocketAddr::from((config.interface, 0));
        let events = udp_socket(events_addr).map_err(|e| BusError::bind("event", events_addr, e))?;

        Ok(Self {
            presence_tx,
            presence_rx,
            events,
            presence_dest: SocketAddr::V4(group),
        })
    }

    /// Plain unicast sockets on 127.0.0.1, presence addressed to this node's
    /// own listener. Lets nodes on one host talk without multicast routing.
    pub fn loopback() -> io::Result<Self> {
        let any = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let presence_rx = udp_socket(any)?;
        let presence_dest = presence_rx.local_addr()?;
        Ok(Self {
            presence_tx: udp_socket(any)?,
            presence_rx,
            events: udp_socket(any)?,
            presence_dest,
        })
    }

    /// Send presence packets to `dest` instead of the configured group.
    pub fn with_presence_dest(mut self, dest: SocketAddr) -> Self {
        self.presence_dest = dest;
        self
    }

    /// Address the presence listener is bound to.
    pub fn presence_addr(&self) -> io::Result<SocketAddr> {
        self.presence_rx.local_addr()
    }

    /// Address the event socket is bound to.
    pub fn events_addr(&self) -> io::Result<SocketAddr> {
        self.events.local_addr()
    }
}

fn udp_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Create a UDP socket joined to the presence group.
fn multicast_listener(group: SocketAddrV4, interface: Ipv4Addr) -> Result<UdpSocket> {
    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port()));
    let bind_err = |e| BusError::bind("presence listener", bind_addr, e);

    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    // Several bus nodes on one host share the group port
    socket.set_reuse_address(true).map_err(bind_err)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&bind_addr.into()).map_err(bind_err)?;

    socket
        .join_multicast_v4(group.ip(), &interface)
        .map_err(|source| BusError::JoinGroup {
            group: *group.ip(),
            interface,
            source,
        })?;

    Ok(socket.into())
}

/// Create a UDP socket suitable for sending to the presence group.
fn multicast_sender(interface: Ipv4Addr, multicast_loop: bool) -> Result<UdpSocket> {
    let bind_addr = SocketAddr::from((interface, 0));
    let bind_err = |e| BusError::bind("presence sender", bind_addr, e);

    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_multicast_if_v4(&interface).map_err(bind_err)?;
    socket.set_multicast_loop_v4(multicast_loop).map_err(bind_err)?;
    // TTL 1: presence stays on the local link
    socket.set_multicast_ttl_v4(1).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&bind_addr.into()).map_err(bind_err)?;

    Ok(socket.into())
}

/// Local address peers can reach us on.
///
/// An unspecified bind address is resolved by routing towards `probe`;
/// no packet is sent.
pub(crate) fn advertised_ip(bound: IpAddr, probe: SocketAddr) -> IpAddr {
    if !bound.is_unspecified() {
        return bound;
    }
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(probe)?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(bound)
}
