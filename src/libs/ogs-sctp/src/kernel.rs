//! Linux Kernel SCTP Implementation
//!
//! This module provides native SCTP socket support using the Linux kernel's
//! SCTP stack through `libc`. The SCTP kernel module must be loaded
//! (`modprobe sctp`).
//!
//! `KernelSctpSocket` owns the non-blocking descriptor; `SctpStream` drives it
//! from tokio through `AsyncFd`.

use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use libc::{
    self, c_int, c_void, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t, AF_INET,
    AF_INET6, IPPROTO_SCTP, SOCK_NONBLOCK, SOCK_STREAM, SOL_SOCKET, SO_ERROR,
};
use tokio::io::unix::AsyncFd;

use super::{Result, SctpError, DEFAULT_NUM_STREAMS};

// ============================================================================
// SCTP Constants
// ============================================================================

/// SCTP socket option level
pub const SOL_SCTP: c_int = 132;

/// SCTP socket options
pub const SCTP_INITMSG: c_int = 2;
pub const SCTP_NODELAY: c_int = 3;
pub const SCTP_EVENTS: c_int = 11;

/// Ancillary data type carrying `SctpSndRcvInfo`
pub const SCTP_SNDRCV: c_int = 1;

/// recvmsg flag set when the buffer holds a notification
pub const MSG_NOTIFICATION: c_int = 0x8000;

/// SCTP notification types (SCTP_SN_TYPE_BASE + n)
pub const SCTP_ASSOC_CHANGE: u16 = 0x8001;
pub const SCTP_PEER_ADDR_CHANGE: u16 = 0x8002;
pub const SCTP_SHUTDOWN_EVENT: u16 = 0x8005;

/// SCTP association change states
pub const SCTP_COMM_UP: u16 = 0;
pub const SCTP_COMM_LOST: u16 = 1;
pub const SCTP_RESTART: u16 = 2;
pub const SCTP_SHUTDOWN_COMP: u16 = 3;
pub const SCTP_CANT_STR_ASSOC: u16 = 4;

// ============================================================================
// SCTP Structures (matching kernel ABI)
// ============================================================================

/// SCTP initialization message
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct SctpInitmsg {
    pub sinit_num_ostreams: u16,
    pub sinit_max_instreams: u16,
    pub sinit_max_attempts: u16,
    pub sinit_max_init_timeo: u16,
}

/// SCTP event subscribe
#[repr(C)]
#[derive(Debug, Clone, Default)]
pub struct SctpEventSubscribe {
    pub sctp_data_io_event: u8,
    pub sctp_association_event: u8,
    pub sctp_address_event: u8,
    pub sctp_send_failure_event: u8,
    pub sctp_peer_error_event: u8,
    pub sctp_shutdown_event: u8,
    pub sctp_partial_delivery_event: u8,
    pub sctp_adaptation_layer_event: u8,
    pub sctp_authentication_event: u8,
    pub sctp_sender_dry_event: u8,
}

/// SCTP send/receive info
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SctpSndRcvInfo {
    pub sinfo_stream: u16,
    pub sinfo_ssn: u16,
    pub sinfo_flags: u16,
    pub sinfo_ppid: u32,
    pub sinfo_context: u32,
    pub sinfo_timetolive: u32,
    pub sinfo_tsn: u32,
    pub sinfo_cumtsn: u32,
    pub sinfo_assoc_id: i32,
}

/// Result of one receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SctpRecv {
    /// A user message of `len` bytes
    Data { len: usize, ppid: u32, stream_no: u16 },
    /// The association is gone (peer shutdown, COMM_LOST or EOF)
    AssociationDown,
    /// A notification that needs no action
    Notification(u16),
}

// ============================================================================
// Kernel SCTP Socket
// ============================================================================

/// Kernel SCTP socket wrapper (one-to-one style, non-blocking)
#[derive(Debug)]
pub struct KernelSctpSocket {
    fd: OwnedFd,
    remote_addr: SocketAddr,
}

impl AsRawFd for KernelSctpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl KernelSctpSocket {
    /// Create a socket and start a non-blocking connect to `remote`
    pub fn connect_nonblocking(remote: SocketAddr, local: Option<SocketAddr>) -> Result<Self> {
        let family = match remote {
            SocketAddr::V4(_) => AF_INET,
            SocketAddr::V6(_) => AF_INET6,
        };

        let raw = unsafe { libc::socket(family, SOCK_STREAM | SOCK_NONBLOCK, IPPROTO_SCTP) };
        if raw < 0 {
            return Err(SctpError::SocketCreation(io::Error::last_os_error()));
        }
        let sock = Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
            remote_addr: remote,
        };

        sock.set_sctp_events();
        sock.set_sctp_initmsg(DEFAULT_NUM_STREAMS, DEFAULT_NUM_STREAMS, 4, 30000);
        sock.set_nodelay();

        if let Some(local) = local {
            let (storage, len) = socketaddr_to_storage(&local);
            let rc = unsafe {
                libc::bind(sock.as_raw_fd(), &storage as *const _ as *const sockaddr, len)
            };
            if rc < 0 {
                return Err(SctpError::BindFailed(io::Error::last_os_error()));
            }
        }

        let (storage, len) = socketaddr_to_storage(&remote);
        let rc = unsafe { libc::connect(sock.as_raw_fd(), &storage as *const _ as *const sockaddr, len) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                return Err(SctpError::ConnectFailed(err));
            }
        }

        Ok(sock)
    }

    /// Remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Local address as bound by the kernel
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;
        let rc = unsafe {
            libc::getsockname(self.as_raw_fd(), &mut storage as *mut _ as *mut sockaddr, &mut len)
        };
        if rc < 0 {
            return Err(SctpError::SockoptFailed(io::Error::last_os_error()));
        }
        storage_to_socketaddr(&storage, len)
    }

    /// Pending socket error (SO_ERROR), used to finish a non-blocking connect
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        let mut value: c_int = 0;
        let mut len = mem::size_of::<c_int>() as socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                self.as_raw_fd(),
                SOL_SOCKET,
                SO_ERROR,
                &mut value as *mut _ as *mut c_void,
                &mut len,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((value != 0).then(|| io::Error::from_raw_os_error(value)))
    }

    /// Send one message with PPID and stream number
    pub fn try_send(&self, data: &[u8], ppid: u32, stream_no: u16) -> io::Result<usize> {
        let info = SctpSndRcvInfo {
            sinfo_stream: stream_no,
            // the kernel copies the PPID to the wire verbatim
            sinfo_ppid: ppid.to_be(),
            ..Default::default()
        };

        let mut iov = libc::iovec {
            iov_base: data.as_ptr() as *mut c_void,
            iov_len: data.len(),
        };
        let mut control = [0u64; 8];
        let info_len = mem::size_of::<SctpSndRcvInfo>() as u32;

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = unsafe { libc::CMSG_SPACE(info_len) } as _;

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            if cmsg.is_null() {
                return Err(io::Error::other("control buffer too small"));
            }
            (*cmsg).cmsg_level = SOL_SCTP;
            (*cmsg).cmsg_type = SCTP_SNDRCV;
            (*cmsg).cmsg_len = libc::CMSG_LEN(info_len) as _;
            std::ptr::copy_nonoverlapping(
                &info as *const SctpSndRcvInfo as *const u8,
                libc::CMSG_DATA(cmsg),
                info_len as usize,
            );
        }

        let sent = unsafe { libc::sendmsg(self.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sent as usize)
    }

    /// Receive one message or notification into `buf`
    pub fn try_recv(&self, buf: &mut [u8]) -> io::Result<SctpRecv> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        let mut control = [0u64; 16];

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = mem::size_of_val(&control) as _;

        let received = unsafe { libc::recvmsg(self.as_raw_fd(), &mut msg, 0) };
        if received < 0 {
            return Err(io::Error::last_os_error());
        }
        let len = received as usize;
        if len == 0 {
            return Ok(SctpRecv::AssociationDown);
        }

        if msg.msg_flags & MSG_NOTIFICATION != 0 {
            return Ok(parse_notification(&buf[..len]));
        }

        let mut ppid = 0;
        let mut stream_no = 0;
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == SOL_SCTP && (*cmsg).cmsg_type == SCTP_SNDRCV {
                    let info = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const SctpSndRcvInfo);
                    ppid = u32::from_be(info.sinfo_ppid);
                    stream_no = info.sinfo_stream;
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        Ok(SctpRecv::Data { len, ppid, stream_no })
    }

    fn set_sctp_events(&self) {
        let events = SctpEventSubscribe {
            sctp_data_io_event: 1,
            sctp_association_event: 1,
            sctp_shutdown_event: 1,
            ..Default::default()
        };
        if let Err(e) = self.setsockopt(SOL_SCTP, SCTP_EVENTS, &events) {
            log::warn!("Failed to set SCTP events: {}", e);
        }
    }

    fn set_sctp_initmsg(&self, num_ostreams: u16, max_instreams: u16, max_attempts: u16, max_init_timeo: u16) {
        let initmsg = SctpInitmsg {
            sinit_num_ostreams: num_ostreams,
            sinit_max_instreams: max_instreams,
            sinit_max_attempts: max_attempts,
            sinit_max_init_timeo: max_init_timeo,
        };
        if let Err(e) = self.setsockopt(SOL_SCTP, SCTP_INITMSG, &initmsg) {
            log::warn!("Failed to set SCTP initmsg: {}", e);
        }
    }

    fn set_nodelay(&self) {
        let on: c_int = 1;
        if let Err(e) = self.setsockopt(SOL_SCTP, SCTP_NODELAY, &on) {
            log::warn!("Failed to set SCTP_NODELAY: {}", e);
        }
    }

    fn setsockopt<T>(&self, level: c_int, name: c_int, value: &T) -> io::Result<()> {
        let rc = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                level,
                name,
                value as *const T as *const c_void,
                mem::size_of::<T>() as socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

// ============================================================================
// Async stream
// ============================================================================

/// Connected SCTP association usable from many tasks
#[derive(Debug)]
pub struct SctpStream {
    inner: AsyncFd<KernelSctpSocket>,
}

impl SctpStream {
    /// Connect to `remote`, waiting for the association to come up
    pub async fn connect(remote: SocketAddr, local: Option<SocketAddr>) -> Result<Self> {
        let sock = KernelSctpSocket::connect_nonblocking(remote, local)?;
        let inner = AsyncFd::new(sock).map_err(SctpError::SocketCreation)?;

        let mut guard = inner.writable().await.map_err(SctpError::ConnectFailed)?;
        match guard.get_inner().take_error() {
            Ok(None) => {}
            Ok(Some(err)) | Err(err) => return Err(SctpError::ConnectFailed(err)),
        }
        guard.clear_ready();
        drop(guard);

        log::info!("SCTP association up: {}", remote);
        Ok(Self { inner })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.get_ref().remote_addr()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.get_ref().local_addr()
    }

    /// Send one message
    pub async fn send(&self, data: &[u8], ppid: u32, stream_no: u16) -> Result<usize> {
        loop {
            let mut guard = self.inner.writable().await.map_err(SctpError::SendFailed)?;
            match guard.try_io(|inner| inner.get_ref().try_send(data, ppid, stream_no)) {
                Ok(result) => return result.map_err(SctpError::SendFailed),
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one message or notification
    pub async fn recv(&self, buf: &mut [u8]) -> Result<SctpRecv> {
        loop {
            let mut guard = self.inner.readable().await.map_err(SctpError::ReceiveFailed)?;
            match guard.try_io(|inner| inner.get_ref().try_recv(buf)) {
                Ok(result) => return result.map_err(SctpError::ReceiveFailed),
                Err(_would_block) => continue,
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Classify a notification buffer
pub fn parse_notification(buf: &[u8]) -> SctpRecv {
    if buf.len() < 2 {
        return SctpRecv::Notification(0);
    }
    let sn_type = u16::from_ne_bytes([buf[0], buf[1]]);
    match sn_type {
        SCTP_ASSOC_CHANGE if buf.len() >= 10 => {
            // sac_type(2) sac_flags(2) sac_length(4) sac_state(2)
            let state = u16::from_ne_bytes([buf[8], buf[9]]);
            match state {
                SCTP_COMM_LOST | SCTP_SHUTDOWN_COMP | SCTP_CANT_STR_ASSOC => SctpRecv::AssociationDown,
                _ => SctpRecv::Notification(sn_type),
            }
        }
        SCTP_SHUTDOWN_EVENT => SctpRecv::AssociationDown,
        _ => SctpRecv::Notification(sn_type),
    }
}

fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    match addr {
        SocketAddr::V4(v4) => {
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sin.sin_family = AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sin6.sin6_family = AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_scope_id = v6.scope_id();
            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}

fn storage_to_socketaddr(storage: &sockaddr_storage, len: socklen_t) -> Result<SocketAddr> {
    let family = storage.ss_family as c_int;

    if family == AF_INET && len >= mem::size_of::<sockaddr_in>() as socklen_t {
        let sin = unsafe { &*(storage as *const _ as *const sockaddr_in) };
        let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
        Ok(SocketAddr::new(IpAddr::V4(ip), u16::from_be(sin.sin_port)))
    } else if family == AF_INET6 && len >= mem::size_of::<sockaddr_in6>() as socklen_t {
        let sin6 = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
        let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
        Ok(SocketAddr::new(IpAddr::V6(ip), u16::from_be(sin6.sin6_port)))
    } else {
        Err(SctpError::NoValidAddress)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_sizes_match_kernel_abi() {
        assert_eq!(mem::size_of::<SctpInitmsg>(), 8);
        assert_eq!(mem::size_of::<SctpSndRcvInfo>(), 32);
    }

    #[test]
    fn test_socketaddr_conversion() {
        for text in ["127.0.0.1:38412", "[::1]:38412"] {
            let addr: SocketAddr = text.parse().unwrap();
            let (storage, len) = socketaddr_to_storage(&addr);
            assert_eq!(storage_to_socketaddr(&storage, len).unwrap(), addr);
        }
    }

    #[test]
    fn test_parse_notification() {
        let mut comm_lost = vec![0u8; 20];
        comm_lost[..2].copy_from_slice(&SCTP_ASSOC_CHANGE.to_ne_bytes());
        comm_lost[8..10].copy_from_slice(&SCTP_COMM_LOST.to_ne_bytes());
        assert_eq!(parse_notification(&comm_lost), SctpRecv::AssociationDown);

        let mut comm_up = comm_lost.clone();
        comm_up[8..10].copy_from_slice(&SCTP_COMM_UP.to_ne_bytes());
        assert_eq!(parse_notification(&comm_up), SctpRecv::Notification(SCTP_ASSOC_CHANGE));

        let shutdown = SCTP_SHUTDOWN_EVENT.to_ne_bytes();
        assert_eq!(parse_notification(&shutdown), SctpRecv::AssociationDown);
        assert_eq!(parse_notification(&[1]), SctpRecv::Notification(0));
    }
}
