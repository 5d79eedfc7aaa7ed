//! NAS Path - NWt TCP bridge
//!
//! After IKE_AUTH the UE opens a TCP connection to the IPsec gateway address
//! through the signalling Child SA. NAS PDUs on it are framed as a two-byte
//! big-endian length followed by the PDU.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::{lock, GatewayContext, NasConnection, TngfError, TngfResult};
use crate::ngap_build;

/// Size of the length prefix of a NAS envelope
pub const NAS_LENGTH_LEN: usize = 2;

const NAS_READ_BUFFER_LEN: usize = 4096;

/// `len(2) | nas`
pub fn encode_nas_envelope(nas: &[u8]) -> TngfResult<Bytes> {
    let len = u16::try_from(nas.len())
        .map_err(|_| TngfError::Transport(format!("NAS PDU of {} bytes does not fit the envelope", nas.len())))?;
    let mut buf = BytesMut::with_capacity(NAS_LENGTH_LEN + nas.len());
    buf.put_u16(len);
    buf.put_slice(nas);
    Ok(buf.freeze())
}

/// Take one complete envelope off the front of `buf`. A partial envelope is
/// left in place.
pub fn decode_nas_envelope(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() < NAS_LENGTH_LEN {
        return None;
    }
    let len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    if buf.len() < NAS_LENGTH_LEN + len {
        return None;
    }
    buf.advance(NAS_LENGTH_LEN);
    Some(buf.split_to(len).freeze())
}

/// Bind the NAS listener and start accepting UE connections
pub async fn open(ctx: &Arc<GatewayContext>) -> TngfResult<JoinHandle<()>> {
    let addr = SocketAddr::new(ctx.settings.ipsec_gateway_address.into(), ctx.settings.nas_tcp_port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| TngfError::Transport(format!("bind NAS {addr}: {e}")))?;
    log::info!("NAS server listening on {}", addr);
    Ok(tokio::spawn(accept_loop(ctx.clone(), listener)))
}

async fn accept_loop(ctx: Arc<GatewayContext>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let IpAddr::V4(inner_ip) = remote.ip() else {
                    log::warn!("[{}] IPv6 NAS connection refused", remote);
                    continue;
                };
                log::debug!("[{}] NAS connection accepted", remote);
                tokio::spawn(serve_connection(ctx.clone(), stream, inner_ip));
            }
            Err(e) => log::error!("NAS accept failed: {}", e),
        }
    }
}

/// Bind a UE's NAS connection, found by its inner IP, and serve it until the
/// UE closes it
pub async fn serve_connection<S>(ctx: Arc<GatewayContext>, stream: S, inner_ip: Ipv4Addr)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let Some(shared_ue) = ctx.ue_by_inner_ip(inner_ip) else {
        log::error!("[{}] No UE with this inner IP, NAS connection dropped", inner_ip);
        return;
    };
    let (mut reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    let id = ctx.next_nas_connection_id();
    tokio::spawn(write_loop(writer, rx, inner_ip));

    let ran_ue_ngap_id = {
        let mut ue = lock(&shared_ue);
        if ue.nas_connection.is_some() {
            log::info!("[ran_ue_ngap_id={}] NAS connection replaced", ue.ran_ue_ngap_id);
        }
        ue.attach_nas_connection(NasConnection { id, tx });
        ue.ran_ue_ngap_id
    };
    log::info!("[ran_ue_ngap_id={}] NAS connection up from {}", ran_ue_ngap_id, inner_ip);

    let mut buf = BytesMut::with_capacity(NAS_READ_BUFFER_LEN);
    loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                log::info!("[ran_ue_ngap_id={}] NAS connection closed by the UE", ran_ue_ngap_id);
                break;
            }
            Ok(_) => {
                while let Some(nas) = decode_nas_envelope(&mut buf) {
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        forward_uplink_nas(&ctx, ran_ue_ngap_id, &nas);
                    });
                }
            }
            Err(e) if is_transient(&e) => continue,
            Err(e) => {
                log::warn!("[ran_ue_ngap_id={}] NAS connection lost: {}", ran_ue_ngap_id, e);
                break;
            }
        }
    }

    if let Some(shared_ue) = ctx.ue_by_ran_id(ran_ue_ngap_id) {
        lock(&shared_ue).detach_nas_connection(id);
    }
}

/// Read errors after which the stream is still usable
fn is_transient(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock)
}

fn forward_uplink_nas(ctx: &GatewayContext, ran_ue_ngap_id: u32, nas: &[u8]) {
    match ctx.ue_by_ran_id(ran_ue_ngap_id) {
        Some(shared_ue) => ngap_build::send_uplink_nas_transport(ctx, &lock(&shared_ue), nas),
        None => log::error!("[ran_ue_ngap_id={}] UE gone, uplink NAS dropped", ran_ue_ngap_id),
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Bytes>, inner_ip: Ipv4Addr)
where
    W: AsyncWrite + Unpin,
{
    while let Some(nas) = rx.recv().await {
        let envelope = match encode_nas_envelope(&nas) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::error!("[{}] {}", inner_ip, e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(&envelope).await {
            log::error!("[{}] NAS write failed: {}", inner_ip, e);
            break;
        }
    }
    log::debug!("[{}] NAS writer stopped", inner_ip);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ogs_ngap::{decode_ngap_pdu, NgapMessage, UserLocationInformationTngf};

    use crate::context::SharedUe;
    use crate::test_support::{test_context, test_settings, RecordingTransport};

    fn amf_addr() -> SocketAddr {
        "127.0.0.1:38412".parse().unwrap()
    }

    fn setup() -> (Arc<GatewayContext>, Arc<RecordingTransport>, SharedUe, Ipv4Addr) {
        let (ctx, _rx) = test_context(test_settings());
        let transport = Arc::new(RecordingTransport::default());
        ctx.new_amf(amf_addr(), transport.clone());
        let shared = ctx.new_ue().unwrap();
        let inner_ip = {
            let mut ue = lock(&shared);
            ctx.attach_ue_to_amf(&mut ue, amf_addr()).unwrap();
            ue.amf_ue_ngap_id = 9;
            ue.user_location = Some(UserLocationInformationTngf {
                tnap_id: vec![0x01, 0x02],
                ip_address: Ipv4Addr::new(192, 168, 1, 50),
                port: Some(500),
            });
            let ip = ctx.allocate_inner_ip(ue.ran_ue_ngap_id).unwrap();
            ue.inner_ip = Some(ip);
            ip
        };
        (ctx, transport, shared, inner_ip)
    }

    #[test]
    fn test_envelope() {
        assert_eq!(&encode_nas_envelope(&[0x7e, 0x00]).unwrap()[..], &[0x00, 0x02, 0x7e, 0x00]);
        assert!(encode_nas_envelope(&vec![0; 70_000]).is_err());
    }

    #[test]
    fn test_deframing_waits_for_whole_frames() {
        let mut buf = BytesMut::from(&[0x00, 0x02, 0x7e, 0x00, 0x00, 0x03, 0x7e][..]);
        assert_eq!(decode_nas_envelope(&mut buf).as_deref(), Some(&[0x7e, 0x00][..]));
        assert_eq!(decode_nas_envelope(&mut buf), None);
        buf.extend_from_slice(&[0x01, 0x02]);
        assert_eq!(decode_nas_envelope(&mut buf).as_deref(), Some(&[0x7e, 0x01, 0x02][..]));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_connection_flushes_cache_and_forwards_uplink() {
        let (ctx, transport, shared, inner_ip) = setup();
        lock(&shared).deliver_nas(Bytes::from_static(&[0x7e, 0x00, 0x42]));

        let (mut ue_side, gateway_side) = tokio::io::duplex(1024);
        let server = tokio::spawn(serve_connection(ctx.clone(), gateway_side, inner_ip));

        // Cached downlink NAS arrives first
        let mut downlink = [0u8; 5];
        ue_side.read_exact(&mut downlink).await.unwrap();
        assert_eq!(downlink, [0x00, 0x03, 0x7e, 0x00, 0x42]);
        assert!(lock(&shared).cached_nas.is_empty());

        // One uplink envelope split across two writes
        ue_side.write_all(&[0x00, 0x03, 0x7e]).await.unwrap();
        ue_side.write_all(&[0x00, 0x55]).await.unwrap();
        let mut sent = Vec::new();
        for _ in 0..50 {
            sent = transport.take();
            if !sent.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        match decode_ngap_pdu(&sent[0]).unwrap() {
            NgapMessage::UplinkNasTransport(msg) => {
                assert_eq!(msg.amf_ue_ngap_id, 9);
                assert_eq!(msg.nas_pdu, vec![0x7e, 0x00, 0x55]);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Clean close keeps the UE but clears the connection
        drop(ue_side);
        server.await.unwrap();
        let ue = lock(&shared);
        assert!(ue.nas_connection.is_none());
        assert_eq!(ctx.ue_count(), 1);
    }

    /// Stream whose reads always fail with `kind`
    struct FailingStream(std::io::ErrorKind);

    impl AsyncRead for FailingStream {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(self.0.into()))
        }
    }

    impl AsyncWrite for FailingStream {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_transient_read_errors() {
        assert!(is_transient(&std::io::ErrorKind::Interrupted.into()));
        assert!(is_transient(&std::io::ErrorKind::WouldBlock.into()));
        assert!(!is_transient(&std::io::ErrorKind::InvalidData.into()));
        assert!(!is_transient(&std::io::ErrorKind::TimedOut.into()));
    }

    #[tokio::test]
    async fn test_persistent_read_error_ends_connection() {
        let (ctx, _transport, shared, inner_ip) = setup();
        tokio::time::timeout(
            Duration::from_secs(5),
            serve_connection(ctx.clone(), FailingStream(std::io::ErrorKind::InvalidData), inner_ip),
        )
        .await
        .unwrap();
        assert!(lock(&shared).nas_connection.is_none());
        assert_eq!(ctx.ue_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_from_unknown_address_is_dropped() {
        let (ctx, _transport, shared, _) = setup();
        let (_ue_side, gateway_side) = tokio::io::duplex(64);
        serve_connection(ctx, gateway_side, Ipv4Addr::new(10, 0, 0, 200)).await;
        assert!(lock(&shared).nas_connection.is_none());
    }
}
