//! NGAP Path - SCTP Associations toward the AMFs
//!
//! The gateway is the SCTP client on N2. For every configured AMF it opens an
//! association, registers the AMF, sends NG Setup Request and then reads
//! NGAP PDUs until the association goes down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ogs_sctp::{SctpRecv, SctpStream, DEFAULT_MAX_MESSAGE_SIZE, NGAP_PPID};

use crate::context::{GatewayContext, TngfError, TngfResult};
use crate::ngap_build;
use crate::ngap_handler;

// ============================================================================
// Constants
// ============================================================================

/// Connection attempts per AMF before giving up
pub const SCTP_CONNECT_ATTEMPTS: u32 = 3;

/// Pause between connection attempts
pub const SCTP_CONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// NGAP uses stream 0 for non-UE-associated and UE-associated signalling alike
const NGAP_STREAM_NO: u16 = 0;

// ============================================================================
// Transport
// ============================================================================

/// Outbound half of an AMF association
pub trait NgapTransport: Send + Sync {
    /// Queue one encoded NGAP PDU
    fn send(&self, data: &[u8]) -> TngfResult<()>;
}

/// Transport feeding the writer task of an SCTP association
#[derive(Debug, Clone)]
pub struct SctpTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl NgapTransport for SctpTransport {
    fn send(&self, data: &[u8]) -> TngfResult<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| TngfError::Transport("SCTP writer closed".to_string()))
    }
}

impl SctpTransport {
    /// Spawn the writer task for `stream` and return its transport
    pub fn spawn(stream: Arc<SctpStream>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            let remote = stream.remote_addr();
            while let Some(data) = rx.recv().await {
                if let Err(e) = stream.send(&data, NGAP_PPID, NGAP_STREAM_NO).await {
                    log::error!("[{}] SCTP send failed: {}", remote, e);
                }
            }
            log::debug!("[{}] SCTP writer stopped", remote);
        });
        Self { tx }
    }
}

// ============================================================================
// Association lifecycle
// ============================================================================

/// Start one association task per configured AMF
pub fn open(ctx: &Arc<GatewayContext>) -> Vec<JoinHandle<()>> {
    ctx.settings
        .amf_addresses
        .iter()
        .map(|addr| {
            let ctx = ctx.clone();
            let addr = *addr;
            tokio::spawn(async move {
                if let Err(e) = run_association(ctx, addr).await {
                    log::error!("[{}] AMF association failed: {}", addr, e);
                }
            })
        })
        .collect()
}

async fn connect_with_retry(addr: SocketAddr) -> TngfResult<SctpStream> {
    let mut attempt = 1;
    loop {
        match SctpStream::connect(addr, None).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < SCTP_CONNECT_ATTEMPTS => {
                log::warn!("[{}] SCTP connect attempt {} failed: {}", addr, attempt, e);
                attempt += 1;
                tokio::time::sleep(SCTP_CONNECT_INTERVAL).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Connect, register the AMF, send NG Setup and read until the association
/// is lost. The AMF is removed on exit.
pub async fn run_association(ctx: Arc<GatewayContext>, addr: SocketAddr) -> TngfResult<()> {
    let stream = Arc::new(connect_with_retry(addr).await?);
    let transport = Arc::new(SctpTransport::spawn(stream.clone()));
    ctx.new_amf(addr, transport);
    log::info!("[{}] AMF connected", addr);

    ngap_build::send_ng_setup_request(&ctx, addr);

    let result = receive_loop(&ctx, addr, &stream).await;
    ctx.remove_amf(&addr);
    log::info!("[{}] AMF disconnected", addr);
    result
}

async fn receive_loop(ctx: &Arc<GatewayContext>, addr: SocketAddr, stream: &SctpStream) -> TngfResult<()> {
    let mut buf = vec![0u8; DEFAULT_MAX_MESSAGE_SIZE];
    loop {
        match stream.recv(&mut buf).await? {
            SctpRecv::Data { len, ppid, stream_no } => {
                if ppid != NGAP_PPID {
                    log::warn!("[{}] Unexpected PPID {} on stream {}", addr, ppid, stream_no);
                }
                log::trace!("[{}] NGAP PDU ({} bytes)", addr, len);
                // Dispatch in arrival order: per-UE procedures must not overtake each other
                ngap_handler::dispatch(ctx, addr, &buf[..len]);
            }
            SctpRecv::Notification(kind) => {
                log::debug!("[{}] SCTP notification 0x{:04x}", addr, kind);
            }
            SctpRecv::AssociationDown => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sctp_transport_reports_closed_writer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = SctpTransport { tx };
        assert!(transport.send(&[0x00, 0x15]).is_ok());
        drop(rx);
        assert!(matches!(transport.send(&[0x00]), Err(TngfError::Transport(_))));
    }
}
