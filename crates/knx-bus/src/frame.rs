//! KNXnet/IP and cEMI frame encoding.
//!
//! Only the services needed to write a group value are implemented: routing
//! indications for multicast, and the connect / tunnel / disconnect exchange for
//! unicast tunnelling.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::address::{GroupAddress, IndividualAddress};
use crate::dpt::Payload;
use crate::error::{KnxError, Result};

/// Default KNXnet/IP UDP port.
pub const KNXNETIP_PORT: u16 = 3671;

/// System-wide KNXnet/IP routing multicast group.
pub const ROUTING_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 12);

const HEADER_LEN: usize = 6;
const PROTOCOL_VERSION: u8 = 0x10;

const CONNECT_REQUEST: u16 = 0x0205;
const CONNECT_RESPONSE: u16 = 0x0206;
const DISCONNECT_REQUEST: u16 = 0x0209;
const DISCONNECT_RESPONSE: u16 = 0x020a;
const TUNNELING_REQUEST: u16 = 0x0420;
const TUNNELING_ACK: u16 = 0x0421;
const ROUTING_INDICATION: u16 = 0x0530;

/// cEMI message codes.
pub const L_DATA_REQ: u8 = 0x11;
pub const L_DATA_CON: u8 = 0x2e;
pub const L_DATA_IND: u8 = 0x29;

/// Standard frame, no repeat, broadcast, low priority.
const CTRL1: u8 = 0xbc;
/// Group destination, hop count 6.
const CTRL2: u8 = 0xe0;
const APCI_GROUP_WRITE: u8 = 0x80;

const HOST_PROTOCOL_UDP: u8 = 0x01;
const TUNNEL_CONNECTION: u8 = 0x04;
const TUNNEL_LINKLAYER: u8 = 0x02;

/// Build a cEMI `L_Data` frame carrying a `GroupValueWrite`.
pub fn group_write_cemi(
    message_code: u8,
    source: IndividualAddress,
    destination: GroupAddress,
    payload: &Payload,
) -> Vec<u8> {
    let mut cemi = vec![message_code, 0x00, CTRL1, CTRL2];
    cemi.extend_from_slice(&source.raw().to_be_bytes());
    cemi.extend_from_slice(&destination.raw().to_be_bytes());
    match payload {
        Payload::Compact(bits) => {
            cemi.extend_from_slice(&[0x01, 0x00, APCI_GROUP_WRITE | (bits & 0x3f)]);
        }
        Payload::Bytes(data) => {
            cemi.extend_from_slice(&[(data.len() + 1) as u8, 0x00, APCI_GROUP_WRITE]);
            cemi.extend_from_slice(data);
        }
    }
    cemi
}

/// Wrap a cEMI frame in a `ROUTING_INDICATION`.
pub fn routing_indication(cemi: &[u8]) -> Vec<u8> {
    with_header(ROUTING_INDICATION, cemi)
}

/// `CONNECT_REQUEST` for a link-layer tunnel. An unspecified (`0.0.0.0:0`) endpoint
/// asks the gateway to reply to the packet's source address.
pub fn connect_request(control: SocketAddrV4, data: SocketAddrV4) -> Vec<u8> {
    let mut body = hpai(control);
    body.extend_from_slice(&hpai(data));
    body.extend_from_slice(&[0x04, TUNNEL_CONNECTION, TUNNEL_LINKLAYER, 0x00]);
    with_header(CONNECT_REQUEST, &body)
}

pub fn tunneling_request(channel: u8, sequence: u8, cemi: &[u8]) -> Vec<u8> {
    let mut body = vec![0x04, channel, sequence, 0x00];
    body.extend_from_slice(cemi);
    with_header(TUNNELING_REQUEST, &body)
}

pub fn tunneling_ack(channel: u8, sequence: u8, status: u8) -> Vec<u8> {
    with_header(TUNNELING_ACK, &[0x04, channel, sequence, status])
}

pub fn disconnect_request(channel: u8, control: SocketAddrV4) -> Vec<u8> {
    let mut body = vec![channel, 0x00];
    body.extend_from_slice(&hpai(control));
    with_header(DISCONNECT_REQUEST, &body)
}

pub fn disconnect_response(channel: u8, status: u8) -> Vec<u8> {
    with_header(DISCONNECT_RESPONSE, &[channel, status])
}

/// A decoded inbound KNXnet/IP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    ConnectResponse {
        channel: u8,
        status: u8,
        /// Address the gateway assigned to this tunnel, present when `status == 0`.
        assigned: Option<IndividualAddress>,
    },
    TunnelingRequest {
        channel: u8,
        sequence: u8,
        cemi: Vec<u8>,
    },
    TunnelingAck {
        channel: u8,
        sequence: u8,
        status: u8,
    },
    DisconnectRequest {
        channel: u8,
    },
    DisconnectResponse {
        channel: u8,
        status: u8,
    },
    /// A well-formed frame of a service this client does not act on.
    Other(u16),
}

/// Decode a datagram received from a gateway.
pub fn parse(datagram: &[u8]) -> Result<Frame> {
    if datagram.len() < HEADER_LEN {
        return Err(KnxError::Frame(format!("{} bytes is shorter than a header", datagram.len())));
    }
    if datagram[0] as usize != HEADER_LEN || datagram[1] != PROTOCOL_VERSION {
        return Err(KnxError::Frame(format!(
            "unsupported header {:#04x}/{:#04x}",
            datagram[0], datagram[1]
        )));
    }
    let service = u16::from_be_bytes([datagram[2], datagram[3]]);
    let total = u16::from_be_bytes([datagram[4], datagram[5]]) as usize;
    if total != datagram.len() {
        return Err(KnxError::Frame(format!(
            "length field {} does not match datagram of {} bytes",
            total,
            datagram.len()
        )));
    }
    let body = &datagram[HEADER_LEN..];
    let short = || KnxError::Frame(format!("truncated body for service {:#06x}", service));

    let frame = match service {
        CONNECT_RESPONSE => {
            let [channel, status, ..] = *body else {
                return Err(short());
            };
            // CRD follows the 8-byte data endpoint HPAI: len, type, address.
            let assigned = (status == 0 && body.len() >= 14)
                .then(|| IndividualAddress::from_raw(u16::from_be_bytes([body[12], body[13]])));
            Frame::ConnectResponse {
                channel,
                status,
                assigned,
            }
        }
        TUNNELING_REQUEST => {
            if body.len() < 4 {
                return Err(short());
            }
            Frame::TunnelingRequest {
                channel: body[1],
                sequence: body[2],
                cemi: body[4..].to_vec(),
            }
        }
        TUNNELING_ACK => {
            let [_, channel, sequence, status, ..] = *body else {
                return Err(short());
            };
            Frame::TunnelingAck {
                channel,
                sequence,
                status,
            }
        }
        DISCONNECT_REQUEST => {
            let [channel, ..] = *body else {
                return Err(short());
            };
            Frame::DisconnectRequest { channel }
        }
        DISCONNECT_RESPONSE => {
            let [channel, status, ..] = *body else {
                return Err(short());
            };
            Frame::DisconnectResponse { channel, status }
        }
        other => Frame::Other(other),
    };
    Ok(frame)
}

/// Outcome of an `L_Data.con` cEMI frame, or `None` if `cemi` is not a confirmation.
pub fn confirmation(cemi: &[u8]) -> Option<bool> {
    match cemi {
        [L_DATA_CON, add_info_len, rest @ ..] => {
            let ctrl1 = rest.get(*add_info_len as usize)?;
            Some(ctrl1 & 0x01 == 0)
        }
        _ => None,
    }
}

fn hpai(endpoint: SocketAddrV4) -> Vec<u8> {
    let mut out = vec![0x08, HOST_PROTOCOL_UDP];
    out.extend_from_slice(&endpoint.ip().octets());
    out.extend_from_slice(&endpoint.port().to_be_bytes());
    out
}

fn with_header(service: u16, body: &[u8]) -> Vec<u8> {
    let total = (HEADER_LEN + body.len()) as u16;
    let mut out = Vec::with_capacity(total as usize);
    out.extend_from_slice(&[HEADER_LEN as u8, PROTOCOL_VERSION]);
    out.extend_from_slice(&service.to_be_bytes());
    out.extend_from_slice(&total.to_be_bytes());
    out.extend_from_slice(body);
    out
}
