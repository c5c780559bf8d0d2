//! Blocking KNXnet/IP client that writes a single group value per call.
//!
//! Each [`KnxClient::group_write`] opens its own connection: a fresh UDP socket for
//! routing, or a full connect / tunnel / disconnect exchange for tunnelling. Calls are
//! rare (a handful per calendar event) so connection reuse is not worth the state.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::address::{GroupAddress, IndividualAddress};
use crate::dpt::Payload;
use crate::error::{KnxError, Result};
use crate::frame::{self, Frame, KNXNETIP_PORT, L_DATA_IND, L_DATA_REQ, ROUTING_MULTICAST};

/// How telegrams reach the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Unicast tunnel through an IP interface.
    Tunneling,
    /// Multicast routing indications on the IP backbone.
    Routing,
    /// Tunnel when a gateway is configured, route otherwise.
    #[default]
    Auto,
}

/// Connection parameters for [`KnxClient`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connection_type: ConnectionType,
    pub gateway_ip: Option<Ipv4Addr>,
    pub gateway_port: u16,
    pub local_ip: Option<Ipv4Addr>,
    /// Source address for routed telegrams. Tunnels use the gateway-assigned one.
    pub individual_address: IndividualAddress,
    /// Upper bound for each wait on the gateway (connect, ack, confirmation).
    pub timeout: Duration,
    pub multicast_group: SocketAddrV4,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::Auto,
            gateway_ip: None,
            gateway_port: KNXNETIP_PORT,
            local_ip: None,
            individual_address: IndividualAddress::default(),
            timeout: Duration::from_secs(5),
            multicast_group: SocketAddrV4::new(ROUTING_MULTICAST, KNXNETIP_PORT),
        }
    }
}

impl ConnectionConfig {
    /// The transport actually used once `Auto` is resolved.
    pub fn effective_type(&self) -> ConnectionType {
        match self.connection_type {
            ConnectionType::Auto if self.gateway_ip.is_some() => ConnectionType::Tunneling,
            ConnectionType::Auto => ConnectionType::Routing,
            other => other,
        }
    }
}

/// Writes group values onto a KNX installation over IP.
#[derive(Debug, Clone)]
pub struct KnxClient {
    config: ConnectionConfig,
}

impl KnxClient {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Send a `GroupValueWrite` of `payload` to `destination`.
    ///
    /// # Errors
    /// - `KnxError::NotConnected` if no tunnel could be established.
    /// - `KnxError::Timeout` if the gateway stopped answering mid-exchange.
    /// - `KnxError::Rejected` on a negative ack or confirmation.
    pub fn group_write(&self, destination: GroupAddress, payload: &Payload) -> Result<()> {
        match self.config.effective_type() {
            ConnectionType::Tunneling => self.tunnel_write(destination, payload),
            _ => self.route_write(destination, payload),
        }
    }

    fn bind(&self) -> Result<UdpSocket> {
        let local = SocketAddrV4::new(self.config.local_ip.unwrap_or(Ipv4Addr::UNSPECIFIED), 0);
        UdpSocket::bind(local).map_err(|e| KnxError::NotConnected(format!("bind {}: {}", local, e)))
    }

    fn route_write(&self, destination: GroupAddress, payload: &Payload) -> Result<()> {
        let socket = self.bind()?;
        socket.set_multicast_ttl_v4(16)?;
        let cemi = frame::group_write_cemi(
            L_DATA_IND,
            self.config.individual_address,
            destination,
            payload,
        );
        let datagram = frame::routing_indication(&cemi);
        socket.send_to(&datagram, self.config.multicast_group)?;
        debug!(
            group = %self.config.multicast_group,
            destination = %destination,
            "sent routing indication"
        );
        Ok(())
    }

    fn tunnel_write(&self, destination: GroupAddress, payload: &Payload) -> Result<()> {
        let gateway_ip = self
            .config
            .gateway_ip
            .ok_or_else(|| KnxError::NotConnected("tunnelling requires a gateway_ip".to_string()))?;
        let gateway = SocketAddrV4::new(gateway_ip, self.config.gateway_port);

        let socket = self.bind()?;
        socket
            .connect(gateway)
            .map_err(|e| KnxError::NotConnected(format!("connect {}: {}", gateway, e)))?;

        // With an explicit local_ip the gateway can reach us directly; otherwise ask it
        // to answer the datagram's source address (NAT mode).
        let control = match (self.config.local_ip, socket.local_addr()?) {
            (Some(_), SocketAddr::V4(local)) => local,
            _ => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
        };

        let tunnel = Tunnel::open(&socket, control, self.config.timeout)?;
        let result = tunnel.write(&socket, destination, payload);
        tunnel.close(&socket);
        result
    }
}

/// An established tunnelling connection.
struct Tunnel {
    channel: u8,
    control: SocketAddrV4,
    timeout: Duration,
}

impl Tunnel {
    fn open(socket: &UdpSocket, control: SocketAddrV4, timeout: Duration) -> Result<Self> {
        socket
            .send(&frame::connect_request(control, control))
            .map_err(|e| KnxError::NotConnected(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        loop {
            let frame = match recv_frame(socket, deadline) {
                Ok(frame) => frame,
                Err(KnxError::Timeout(_)) => {
                    return Err(KnxError::NotConnected(
                        "gateway did not answer CONNECT_REQUEST".into(),
                    ))
                }
                Err(e) => return Err(KnxError::NotConnected(e.to_string())),
            };
            if let Frame::ConnectResponse {
                channel,
                status,
                assigned,
            } = frame
            {
                if status != 0 {
                    return Err(KnxError::NotConnected(format!(
                        "gateway refused tunnel with status {:#04x}",
                        status
                    )));
                }
                debug!(channel, assigned = ?assigned.map(|a| a.to_string()), "tunnel established");
                return Ok(Self {
                    channel,
                    control,
                    timeout,
                });
            }
            trace!(?frame, "ignoring frame while connecting");
        }
    }

    fn write(
        &self,
        socket: &UdpSocket,
        destination: GroupAddress,
        payload: &Payload,
    ) -> Result<()> {
        // The gateway replaces the source with the tunnel's assigned address.
        let cemi = frame::group_write_cemi(
            L_DATA_REQ,
            IndividualAddress::from_raw(0),
            destination,
            payload,
        );
        let request = frame::tunneling_request(self.channel, 0, &cemi);

        // KNXnet/IP allows exactly one repetition of an unacknowledged request.
        let mut acked = false;
        for attempt in 0..2 {
            socket.send(&request)?;
            match self.await_ack(socket) {
                Ok(()) => {
                    acked = true;
                    break;
                }
                Err(KnxError::Timeout(what)) if attempt == 0 => {
                    warn!(channel = self.channel, "no {} received, repeating request", what);
                }
                Err(e) => return Err(e),
            }
        }
        if !acked {
            return Err(KnxError::Timeout("TUNNELING_ACK"));
        }

        self.await_confirmation(socket, destination)
    }

    fn await_ack(&self, socket: &UdpSocket) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match recv_frame(socket, deadline) {
                Ok(Frame::TunnelingAck {
                    channel,
                    sequence: 0,
                    status,
                }) if channel == self.channel => {
                    if status != 0 {
                        return Err(KnxError::Rejected(format!(
                            "TUNNELING_ACK status {:#04x}",
                            status
                        )));
                    }
                    return Ok(());
                }
                Ok(Frame::DisconnectRequest { channel }) if channel == self.channel => {
                    return Err(KnxError::NotConnected("gateway closed the tunnel".into()));
                }
                Ok(other) => trace!(frame = ?other, "ignoring frame while awaiting ack"),
                Err(KnxError::Timeout(_)) => return Err(KnxError::Timeout("TUNNELING_ACK")),
                Err(e) => return Err(e),
            }
        }
    }

    fn await_confirmation(&self, socket: &UdpSocket, destination: GroupAddress) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match recv_frame(socket, deadline) {
                Ok(Frame::TunnelingRequest {
                    channel,
                    sequence,
                    cemi,
                }) if channel == self.channel => {
                    socket.send(&frame::tunneling_ack(channel, sequence, 0))?;
                    match frame::confirmation(&cemi) {
                        Some(true) => {
                            debug!(destination = %destination, "telegram confirmed");
                            return Ok(());
                        }
                        Some(false) => {
                            return Err(KnxError::Rejected("negative L_Data.con".into()));
                        }
                        None => trace!("acknowledged bus indication"),
                    }
                }
                Ok(other) => trace!(frame = ?other, "ignoring frame while awaiting confirmation"),
                Err(KnxError::Timeout(_)) => return Err(KnxError::Timeout("L_Data.con")),
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&self, socket: &UdpSocket) {
        if let Err(e) = socket.send(&frame::disconnect_request(self.channel, self.control)) {
            warn!(channel = self.channel, error = %e, "failed to send DISCONNECT_REQUEST");
            return;
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            match recv_frame(socket, deadline) {
                Ok(Frame::DisconnectResponse { channel, .. }) if channel == self.channel => return,
                Ok(Frame::TunnelingRequest {
                    channel, sequence, ..
                }) if channel == self.channel => {
                    let _ = socket.send(&frame::tunneling_ack(channel, sequence, 0));
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(channel = self.channel, error = %e, "no DISCONNECT_RESPONSE");
                    return;
                }
            }
        }
    }
}

/// Receive and decode one frame, giving up at `deadline`.
fn recv_frame(socket: &UdpSocket, deadline: Instant) -> Result<Frame> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(KnxError::Timeout("gateway response"));
    }
    socket.set_read_timeout(Some(remaining))?;

    let mut buf = [0u8; 512];
    match socket.recv(&mut buf) {
        Ok(len) => frame::parse(&buf[..len]),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
            Err(KnxError::Timeout("gateway response"))
        }
        Err(e) => Err(e.into()),
    }
}
