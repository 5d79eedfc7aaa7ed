//! RADIUS Path - Ta UDP socket
//!
//! Binds the authentication port on the configured RADIUS address. Each
//! datagram is handled on its own task; replies queued through the context
//! are written back by a single writer task.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ogs_radius::message::RADIUS_MAX_PACKET_LEN;
use ogs_radius::RADIUS_AUTH_UDP_PORT;

use crate::context::{GatewayContext, RadiusDatagram, TngfResult};
use crate::radius_handler;

/// Bind the RADIUS socket and start its reader and writer tasks
pub async fn open(
    ctx: &Arc<GatewayContext>,
    outbound: mpsc::UnboundedReceiver<RadiusDatagram>,
) -> TngfResult<Vec<JoinHandle<()>>> {
    let addr = SocketAddr::new(ctx.settings.radius_bind_address.into(), RADIUS_AUTH_UDP_PORT);
    let socket = Arc::new(
        UdpSocket::bind(addr)
            .await
            .map_err(|e| crate::context::TngfError::Transport(format!("bind RADIUS {addr}: {e}")))?,
    );
    log::info!("RADIUS server bound to {}", addr);

    Ok(vec![
        tokio::spawn(receive_loop(ctx.clone(), socket.clone())),
        tokio::spawn(send_loop(socket, outbound)),
    ])
}

async fn receive_loop(ctx: Arc<GatewayContext>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; RADIUS_MAX_PACKET_LEN];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                log::trace!("[{}] RADIUS datagram ({} bytes)", peer, len);
                let ctx = ctx.clone();
                let data = Bytes::copy_from_slice(&buf[..len]);
                tokio::spawn(async move {
                    radius_handler::dispatch(&ctx, peer, &data);
                });
            }
            Err(e) => log::error!("RADIUS receive failed: {}", e),
        }
    }
}

async fn send_loop(socket: Arc<UdpSocket>, mut outbound: mpsc::UnboundedReceiver<RadiusDatagram>) {
    while let Some(datagram) = outbound.recv().await {
        if let Err(e) = socket.send_to(&datagram.data, datagram.peer).await {
            log::error!("[{}] RADIUS send failed: {}", datagram.peer, e);
        }
    }
    log::debug!("RADIUS writer stopped");
}
