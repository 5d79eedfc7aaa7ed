//! User Plane Path - NWt GRE socket
//!
//! A raw IPv4 socket bound to the IPsec gateway address catches the GRE
//! packets leaving the Child SAs. IP_PKTINFO tells which xfrm interface a
//! packet came in on, and so which PDU session it belongs to.
//!
//! `RawGreSocket` owns the non-blocking descriptor; `GreSocket` drives it
//! from tokio through `AsyncFd`.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use bytes::Bytes;
use libc::{c_int, c_void, sockaddr, sockaddr_in, socklen_t, AF_INET, IPPROTO_GRE, IPPROTO_IP, IP_PKTINFO, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW};
use tokio::io::unix::AsyncFd;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::context::{lock, GatewayContext, TngfError, TngfResult};
use crate::gre::{gre_to_gtp, GreHeader};

const IPV4_MIN_HEADER_LEN: usize = 20;
const GRE_MAX_PACKET_LEN: usize = 65535;

// ============================================================================
// Raw socket
// ============================================================================

/// Raw IPv4 socket for protocol GRE (non-blocking)
#[derive(Debug)]
pub struct RawGreSocket {
    fd: OwnedFd,
}

impl AsRawFd for RawGreSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn sockaddr_v4(ip: Ipv4Addr) -> sockaddr_in {
    let mut addr: sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = AF_INET as libc::sa_family_t;
    addr.sin_addr = libc::in_addr {
        s_addr: u32::from_ne_bytes(ip.octets()),
    };
    addr
}

impl RawGreSocket {
    pub fn bind(addr: Ipv4Addr) -> io::Result<Self> {
        let raw = unsafe { libc::socket(AF_INET, SOCK_RAW | SOCK_NONBLOCK | SOCK_CLOEXEC, IPPROTO_GRE) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let sock = Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        };

        let on: c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                sock.as_raw_fd(),
                IPPROTO_IP,
                IP_PKTINFO,
                &on as *const c_int as *const c_void,
                mem::size_of::<c_int>() as socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let local = sockaddr_v4(addr);
        let rc = unsafe {
            libc::bind(
                sock.as_raw_fd(),
                &local as *const sockaddr_in as *const sockaddr,
                mem::size_of::<sockaddr_in>() as socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sock)
    }

    /// Receive one IPv4 packet (header included) and its arrival ifindex
    pub fn try_recv(&self, buf: &mut [u8]) -> io::Result<(usize, Option<u32>)> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        let mut control = [0u64; 8];

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = mem::size_of_val(&control) as _;

        let received = unsafe { libc::recvmsg(self.as_raw_fd(), &mut msg, 0) };
        if received < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ifindex = None;
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == IPPROTO_IP && (*cmsg).cmsg_type == IP_PKTINFO {
                    let info = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo);
                    ifindex = u32::try_from(info.ipi_ifindex).ok();
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }
        Ok((received as usize, ifindex))
    }

    /// Send a GRE packet; the kernel prepends the IPv4 header
    pub fn try_send_to(&self, data: &[u8], dst: Ipv4Addr) -> io::Result<usize> {
        let remote = sockaddr_v4(dst);
        let sent = unsafe {
            libc::sendto(
                self.as_raw_fd(),
                data.as_ptr() as *const c_void,
                data.len(),
                libc::MSG_NOSIGNAL,
                &remote as *const sockaddr_in as *const sockaddr,
                mem::size_of::<sockaddr_in>() as socklen_t,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sent as usize)
    }
}

/// GRE socket usable from many tasks
#[derive(Debug)]
pub struct GreSocket {
    inner: AsyncFd<RawGreSocket>,
}

impl GreSocket {
    pub fn bind(addr: Ipv4Addr) -> io::Result<Self> {
        Ok(Self {
            inner: AsyncFd::new(RawGreSocket::bind(addr)?)?,
        })
    }

    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, Option<u32>)> {
        loop {
            let mut guard = self.inner.readable().await?;
            match guard.try_io(|inner| inner.get_ref().try_recv(buf)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn send_to(&self, data: &[u8], dst: Ipv4Addr) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| inner.get_ref().try_send_to(data, dst)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

// ============================================================================
// NWt -> N3
// ============================================================================

/// Source address and payload of a raw IPv4 packet
pub fn split_ipv4_header(packet: &[u8]) -> TngfResult<(Ipv4Addr, &[u8])> {
    if packet.len() < IPV4_MIN_HEADER_LEN || packet[0] >> 4 != 4 {
        return Err(TngfError::Transport("not an IPv4 packet".into()));
    }
    let header_len = usize::from(packet[0] & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_LEN || packet.len() < header_len {
        return Err(TngfError::Transport(format!("bad IPv4 header length {header_len}")));
    }
    let source = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    Ok((source, &packet[header_len..]))
}

/// Turn a GRE packet from a UE into the GTP-U datagram for its UPF
pub fn handle_uplink(ctx: &GatewayContext, ifindex: Option<u32>, packet: &[u8]) -> TngfResult<(SocketAddr, Bytes)> {
    let (inner_ip, gre) = split_ipv4_header(packet)?;
    let shared_ue = ctx
        .ue_by_inner_ip(inner_ip)
        .ok_or_else(|| TngfError::not_found("UE with inner IP", inner_ip))?;
    let ifindex = ifindex.ok_or_else(|| TngfError::Transport("no arrival interface".into()))?;

    let gtp = {
        let ue = lock(&shared_ue);
        let pdu_session_id = ue
            .child_sa_for_ifindex(ifindex)
            .and_then(|child| child.pdu_session_ids.first().copied())
            .ok_or_else(|| TngfError::not_found("PDU session on ifindex", ifindex))?;
        ue.pdu_sessions
            .get(&pdu_session_id)
            .and_then(|session| session.gtp)
            .ok_or_else(|| TngfError::not_found("GTP tunnel of PDU session", pdu_session_id))?
    };

    let (header, payload) = GreHeader::decode(gre)?;
    if header.key.is_none() {
        log::warn!("[{}] GRE packet without key, forwarded without QFI", inner_ip);
    }
    let message = gre_to_gtp(&header, payload, gtp.outgoing_teid);
    Ok((gtp.upf_address, message.encode()?.freeze()))
}

/// Bind the GRE socket and start its reader. Uplink packets leave through
/// `gtp`.
pub fn open(ctx: &Arc<GatewayContext>, gtp: Arc<UdpSocket>) -> TngfResult<(Arc<GreSocket>, JoinHandle<()>)> {
    let addr = ctx.settings.ipsec_gateway_address;
    let socket = Arc::new(
        GreSocket::bind(addr).map_err(|e| TngfError::Transport(format!("bind GRE {addr}: {e}")))?,
    );
    log::info!("GRE listener bound to {}", addr);
    let handle = tokio::spawn(receive_loop(ctx.clone(), socket.clone(), gtp));
    Ok((socket, handle))
}

async fn receive_loop(ctx: Arc<GatewayContext>, socket: Arc<GreSocket>, gtp: Arc<UdpSocket>) {
    let mut buf = vec![0u8; GRE_MAX_PACKET_LEN];
    loop {
        let (len, ifindex) = match socket.recv(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                log::error!("GRE receive failed: {}", e);
                continue;
            }
        };
        let ctx = ctx.clone();
        let gtp = gtp.clone();
        let packet = Bytes::copy_from_slice(&buf[..len]);
        tokio::spawn(async move {
            match handle_uplink(&ctx, ifindex, &packet) {
                Ok((upf, datagram)) => {
                    if let Err(e) = gtp.send_to(&datagram, upf).await {
                        log::error!("[{}] GTP-U send failed: {}", upf, e);
                    }
                }
                Err(e) => log::error!("Uplink packet dropped: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    use ogs_gtp::v1::{Gtp1uMessage, PduSessionInformationType};
    use ogs_ngap::SNssai;

    use crate::context::{ChildSecurityAssociation, GtpConnectionInfo};
    use crate::gre::GreKey;
    use crate::test_support::{test_context, test_settings};

    const IFINDEX: u32 = 108;

    fn ipv4_packet(source: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, 47, 0, 0];
        packet.extend_from_slice(&source.octets());
        packet.extend_from_slice(&[10, 0, 0, 1]);
        packet.extend_from_slice(payload);
        packet
    }

    fn gre(key: Option<GreKey>) -> Vec<u8> {
        let mut buf = BytesMut::new();
        GreHeader::ipv4(key).encode(&mut buf);
        buf.extend_from_slice(&[0x45, 0x00, 0x00, 0x14]);
        buf.to_vec()
    }

    /// UE with PDU session 5 carried by a Child SA on IFINDEX
    fn setup() -> (Arc<GatewayContext>, Ipv4Addr) {
        let (ctx, _rx) = test_context(test_settings());
        let shared = ctx.new_ue().unwrap();
        let mut ue = lock(&shared);
        let ran_ue_ngap_id = ue.ran_ue_ngap_id;
        let inner_ip = ctx.allocate_inner_ip(ran_ue_ngap_id).unwrap();
        ue.inner_ip = Some(inner_ip);
        ue.create_pdu_session(5, SNssai { sst: 1, sd: None }).unwrap().gtp = Some(GtpConnectionInfo {
            upf_address: "10.200.200.102:2152".parse().unwrap(),
            incoming_teid: 1,
            outgoing_teid: 0x77,
        });

        let spi = ctx.allocate_child_spi(ran_ue_ngap_id).unwrap();
        ctx.create_half_child_sa(&mut ue, 0, spi, vec![5], Bytes::new());
        let proposal = crate::ike_security::ChildTransforms::for_pdu_session(false).to_proposal(1, 0xc002);
        let child: &mut ChildSecurityAssociation = ctx.complete_child_sa(&mut ue, 0, 0xc002, &[proposal]).unwrap();
        child.xfrm_ifindex = Some(IFINDEX);
        drop(ue);
        (ctx, inner_ip)
    }

    #[test]
    fn test_split_ipv4_header() {
        let packet = ipv4_packet(Ipv4Addr::new(10, 0, 0, 2), &[0xaa]);
        let (source, payload) = split_ipv4_header(&packet).unwrap();
        assert_eq!(source, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(payload, &[0xaa]);
        assert!(split_ipv4_header(&packet[..10]).is_err());
        assert!(split_ipv4_header(&[0x60; 40]).is_err());
    }

    #[test]
    fn test_uplink_with_key_carries_qfi() {
        let (ctx, inner_ip) = setup();
        let packet = ipv4_packet(inner_ip, &gre(Some(GreKey::qos(1, false))));
        let (upf, datagram) = handle_uplink(&ctx, Some(IFINDEX), &packet).unwrap();
        assert_eq!(upf, "10.200.200.102:2152".parse().unwrap());

        let message = Gtp1uMessage::decode(&mut datagram.clone()).unwrap();
        assert_eq!(message.header.teid, 0x77);
        let container = message.pdu_session_container.unwrap();
        assert_eq!(container.pdu_type, PduSessionInformationType::Uplink);
        assert_eq!(container.qfi, 1);
        assert_eq!(&message.payload[..], &[0x45, 0x00, 0x00, 0x14]);
    }

    #[test]
    fn test_uplink_without_key_is_plain() {
        let (ctx, inner_ip) = setup();
        let packet = ipv4_packet(inner_ip, &gre(None));
        let (_, datagram) = handle_uplink(&ctx, Some(IFINDEX), &packet).unwrap();
        let message = Gtp1uMessage::decode(&mut datagram.clone()).unwrap();
        assert!(message.pdu_session_container.is_none());
    }

    #[test]
    fn test_uplink_needs_matching_interface_and_ue() {
        let (ctx, inner_ip) = setup();
        let packet = ipv4_packet(inner_ip, &gre(None));
        assert!(handle_uplink(&ctx, Some(IFINDEX + 1), &packet).is_err());
        assert!(handle_uplink(&ctx, None, &packet).is_err());
        let stranger = ipv4_packet(Ipv4Addr::new(10, 0, 0, 200), &gre(None));
        assert!(handle_uplink(&ctx, Some(IFINDEX), &stranger).is_err());
    }
}
