//! Shared fixtures for unit tests: a sample configuration, a context wired to
//! channel receivers, and recording stand-ins for the NGAP and XFRM seams.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::config::{GatewaySettings, TngfConfig};
use crate::context::{lock, ChildSecurityAssociation, GatewayContext, IkeDatagram, Outbound, RadiusDatagram, TngfResult};
use crate::ngap_path::NgapTransport;
use crate::xfrm::{XfrmInstaller, XfrmInterfaceConfig};

pub const SAMPLE_CONFIG: &str = r#"
info:
  version: 1.0.0
  description: TNGF test configuration
configuration:
  tngfInformation:
    globalTngfId:
      plmnId:
        mcc: "208"
        mnc: "93"
      tngfId: 135
    name: free5GC_TNGF
    supportedTaList:
      - tac: "000001"
        broadcastPlmnList:
          - plmnId:
              mcc: "208"
              mnc: "93"
            taiSliceSupportList:
              - snssai:
                  sst: "1"
                  sd: "010203"
  amfSctpAddresses:
    - ip:
        - 127.0.0.1
  ikeBindAddress: 192.168.127.1
  radiusBindAddress: 192.168.127.1
  ipSecTunnelAddress: 10.0.0.1
  ueIpAddressRange: 10.0.0.0/24
  gtpBindAddress: 127.0.0.1
  nasTcpPort: 20000
  fqdn: tngf.free5gc.org
  radiusSecret: testing123
"#;

pub fn test_settings() -> GatewaySettings {
    TngfConfig::from_yaml(SAMPLE_CONFIG)
        .and_then(|cfg| cfg.settings())
        .expect("sample configuration is valid")
}

/// Receivers of the context's outbound UDP queues
pub struct TestReceivers {
    pub ike: mpsc::UnboundedReceiver<IkeDatagram>,
    pub radius: mpsc::UnboundedReceiver<RadiusDatagram>,
}

pub fn test_context(settings: GatewaySettings) -> (Arc<GatewayContext>, TestReceivers) {
    test_context_with_xfrm(settings, Arc::new(RecordingXfrm::default()))
}

pub fn test_context_with_xfrm(
    settings: GatewaySettings,
    xfrm: Arc<dyn XfrmInstaller>,
) -> (Arc<GatewayContext>, TestReceivers) {
    let (ike_tx, ike) = mpsc::unbounded_channel();
    let (radius_tx, radius) = mpsc::unbounded_channel();
    let outbound = Outbound {
        ike: ike_tx,
        radius: radius_tx,
    };
    (
        Arc::new(GatewayContext::new(settings, xfrm, outbound)),
        TestReceivers { ike, radius },
    )
}

/// NGAP transport that keeps every sent PDU
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *lock(&self.sent))
    }
}

impl NgapTransport for RecordingTransport {
    fn send(&self, data: &[u8]) -> TngfResult<()> {
        lock(&self.sent).push(data.to_vec());
        Ok(())
    }
}

/// One call made on [`RecordingXfrm`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XfrmCall {
    SetupInterface { name: String, if_id: u32 },
    DeleteInterface(String),
    ApplyChildSa {
        inbound_spi: u32,
        outbound_spi: u32,
        local_is_initiator: bool,
        if_id: u32,
    },
}

/// XFRM installer that records calls; interfaces get ifindex 100 + if_id
#[derive(Debug, Default)]
pub struct RecordingXfrm {
    pub calls: Mutex<Vec<XfrmCall>>,
}

impl RecordingXfrm {
    pub fn calls(&self) -> Vec<XfrmCall> {
        lock(&self.calls).clone()
    }
}

impl XfrmInstaller for RecordingXfrm {
    fn setup_interface(&self, config: &XfrmInterfaceConfig) -> TngfResult<u32> {
        lock(&self.calls).push(XfrmCall::SetupInterface {
            name: config.name.clone(),
            if_id: config.if_id,
        });
        Ok(100 + config.if_id)
    }

    fn delete_interface(&self, name: &str) -> TngfResult<()> {
        lock(&self.calls).push(XfrmCall::DeleteInterface(name.to_string()));
        Ok(())
    }

    fn apply_child_sa(&self, child: &ChildSecurityAssociation, local_is_initiator: bool, if_id: u32) -> TngfResult<()> {
        lock(&self.calls).push(XfrmCall::ApplyChildSa {
            inbound_spi: child.inbound_spi,
            outbound_spi: child.outbound_spi,
            local_is_initiator,
            if_id,
        });
        Ok(())
    }
}
