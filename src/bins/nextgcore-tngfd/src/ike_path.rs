//! IKE Path - NWt UDP sockets
//!
//! Binds UDP 500 and the NAT-T port 4500 on the IKE bind address. On 4500
//! every IKE message carries the four-byte non-ESP marker; it is removed on
//! receive and added back on send.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ogs_ike::{IKE_NATT_UDP_PORT, IKE_UDP_PORT, NON_ESP_MARKER};

use crate::context::{GatewayContext, IkeDatagram, IkePeer, TngfError, TngfResult};
use crate::ike_handler;

/// Largest datagram read from either socket
const IKE_MAX_DATAGRAM_LEN: usize = 65535;

/// Strip the non-ESP marker of a NAT-T datagram. None for ESP or runts.
pub fn strip_non_esp_marker(data: &[u8]) -> Option<&[u8]> {
    data.strip_prefix(&NON_ESP_MARKER[..])
}

/// Bytes put on the wire for `datagram`
pub fn frame_outbound(datagram: &IkeDatagram) -> Bytes {
    if datagram.peer.local_port != IKE_NATT_UDP_PORT {
        return datagram.data.clone();
    }
    let mut framed = BytesMut::with_capacity(NON_ESP_MARKER.len() + datagram.data.len());
    framed.put_slice(&NON_ESP_MARKER);
    framed.put_slice(&datagram.data);
    framed.freeze()
}

async fn bind(ctx: &GatewayContext, port: u16) -> TngfResult<Arc<UdpSocket>> {
    let addr = SocketAddr::new(ctx.settings.ike_bind_address.into(), port);
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|e| TngfError::Transport(format!("bind IKE {addr}: {e}")))?;
    log::info!("IKE server bound to {}", addr);
    Ok(Arc::new(socket))
}

/// Bind both IKE sockets and start their reader tasks and the shared writer
pub async fn open(
    ctx: &Arc<GatewayContext>,
    outbound: mpsc::UnboundedReceiver<IkeDatagram>,
) -> TngfResult<Vec<JoinHandle<()>>> {
    let ike = bind(ctx, IKE_UDP_PORT).await?;
    let natt = bind(ctx, IKE_NATT_UDP_PORT).await?;

    Ok(vec![
        tokio::spawn(receive_loop(ctx.clone(), ike.clone(), IKE_UDP_PORT)),
        tokio::spawn(receive_loop(ctx.clone(), natt.clone(), IKE_NATT_UDP_PORT)),
        tokio::spawn(send_loop(ike, natt, outbound)),
    ])
}

async fn receive_loop(ctx: Arc<GatewayContext>, socket: Arc<UdpSocket>, local_port: u16) {
    let mut buf = vec![0u8; IKE_MAX_DATAGRAM_LEN];
    loop {
        let (len, remote) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                log::error!("IKE receive on port {} failed: {}", local_port, e);
                continue;
            }
        };
        let data = if local_port == IKE_NATT_UDP_PORT {
            match strip_non_esp_marker(&buf[..len]) {
                Some(ike) => ike,
                None => {
                    log::warn!("[{}] Datagram without non-ESP marker on port {}, dropped", remote, local_port);
                    continue;
                }
            }
        } else {
            &buf[..len]
        };

        log::trace!("[{}] IKE datagram ({} bytes) on port {}", remote, data.len(), local_port);
        let ctx = ctx.clone();
        let peer = IkePeer { remote, local_port };
        let data = Bytes::copy_from_slice(data);
        tokio::spawn(async move {
            ike_handler::dispatch(&ctx, peer, &data);
        });
    }
}

async fn send_loop(ike: Arc<UdpSocket>, natt: Arc<UdpSocket>, mut outbound: mpsc::UnboundedReceiver<IkeDatagram>) {
    while let Some(datagram) = outbound.recv().await {
        let socket = if datagram.peer.local_port == IKE_NATT_UDP_PORT {
            &natt
        } else {
            &ike
        };
        let wire = frame_outbound(&datagram);
        if let Err(e) = socket.send_to(&wire, datagram.peer.remote).await {
            log::error!("[{}] IKE send failed: {}", datagram.peer.remote, e);
        }
    }
    log::debug!("IKE writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(local_port: u16) -> IkeDatagram {
        IkeDatagram {
            peer: IkePeer {
                remote: "192.168.1.50:4500".parse().unwrap(),
                local_port,
            },
            data: Bytes::from_static(&[0x11, 0x22]),
        }
    }

    #[test]
    fn test_non_esp_marker() {
        assert_eq!(strip_non_esp_marker(&[0, 0, 0, 0, 0x11]), Some(&[0x11][..]));
        assert_eq!(strip_non_esp_marker(&[0, 0, 0, 0]), Some(&[][..]));
        // An ESP packet starts with a non-zero SPI
        assert_eq!(strip_non_esp_marker(&[0, 0, 0x10, 0x01, 0x11]), None);
        assert_eq!(strip_non_esp_marker(&[0, 0]), None);
    }

    #[test]
    fn test_marker_added_only_on_natt_port() {
        assert_eq!(&frame_outbound(&datagram(IKE_UDP_PORT))[..], &[0x11, 0x22]);
        assert_eq!(&frame_outbound(&datagram(IKE_NATT_UDP_PORT))[..], &[0, 0, 0, 0, 0x11, 0x22]);
    }
}
