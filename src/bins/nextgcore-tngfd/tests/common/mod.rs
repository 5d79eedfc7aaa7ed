//! Common test utilities for the TNGF integration tests
//!
//! A gateway context built from a sample configuration, with in-memory
//! stand-ins for the AMF association and the kernel XFRM state.

#![allow(dead_code)]

pub mod ue;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use nextgcore_tngfd::context::{ChildSecurityAssociation, IkeDatagram, RadiusDatagram};
use nextgcore_tngfd::ngap_path::NgapTransport;
use nextgcore_tngfd::{
    GatewayContext, GatewaySettings, Outbound, TngfConfig, TngfResult, XfrmInstaller, XfrmInterfaceConfig,
};

pub const TNGF_CONFIG: &str = r#"
info:
  version: 1.0.0
  description: TNGF integration test configuration
configuration:
  tngfInformation:
    globalTngfId:
      plmnId:
        mcc: "001"
        mnc: "01"
      tngfId: 42
    name: nextgcore-tngf
    supportedTaList:
      - tac: "000007"
        broadcastPlmnList:
          - plmnId:
              mcc: "001"
              mnc: "01"
            taiSliceSupportList:
              - snssai:
                  sst: "1"
  amfSctpAddresses:
    - ip:
        - 127.0.0.18
  ikeBindAddress: 127.0.0.1
  radiusBindAddress: 127.0.0.1
  ipSecTunnelAddress: 10.45.0.1
  ueIpAddressRange: 10.45.0.0/24
  gtpBindAddress: 127.0.0.1
  nasTcpPort: 20000
  fqdn: tngf.nextgcore.test
  radiusSecret: integration
"#;

pub fn amf_addr() -> SocketAddr {
    "127.0.0.18:38412".parse().unwrap()
}

pub fn settings() -> GatewaySettings {
    TngfConfig::from_yaml(TNGF_CONFIG)
        .and_then(|config| config.settings())
        .expect("integration configuration is valid")
}

/// Outbound IKE and RADIUS queues of a test gateway
pub struct Queues {
    pub ike: mpsc::UnboundedReceiver<IkeDatagram>,
    pub radius: mpsc::UnboundedReceiver<RadiusDatagram>,
}

pub struct TestGateway {
    pub ctx: Arc<GatewayContext>,
    pub queues: Queues,
    pub amf: Arc<CaptureTransport>,
    pub xfrm: Arc<CaptureXfrm>,
}

/// Gateway with one AMF association registered
pub fn gateway() -> TestGateway {
    let _ = env_logger::builder().is_test(true).try_init();

    let (ike_tx, ike) = mpsc::unbounded_channel();
    let (radius_tx, radius) = mpsc::unbounded_channel();
    let xfrm = Arc::new(CaptureXfrm::default());
    let ctx = Arc::new(GatewayContext::new(
        settings(),
        xfrm.clone(),
        Outbound {
            ike: ike_tx,
            radius: radius_tx,
        },
    ));
    let amf = Arc::new(CaptureTransport::default());
    ctx.new_amf(amf_addr(), amf.clone());

    TestGateway {
        ctx,
        queues: Queues { ike, radius },
        amf,
        xfrm,
    }
}

/// NGAP transport keeping what the gateway sent to the AMF
#[derive(Debug, Default)]
pub struct CaptureTransport {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl CaptureTransport {
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl NgapTransport for CaptureTransport {
    fn send(&self, data: &[u8]) -> TngfResult<()> {
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }
}

/// XFRM installer keeping interface names and installed inbound SPIs
#[derive(Debug, Default)]
pub struct CaptureXfrm {
    pub interfaces: Mutex<Vec<String>>,
    pub child_sas: Mutex<Vec<u32>>,
}

impl XfrmInstaller for CaptureXfrm {
    fn setup_interface(&self, config: &XfrmInterfaceConfig) -> TngfResult<u32> {
        self.interfaces.lock().unwrap().push(config.name.clone());
        Ok(200 + config.if_id)
    }

    fn delete_interface(&self, name: &str) -> TngfResult<()> {
        self.interfaces.lock().unwrap().retain(|n| n != name);
        Ok(())
    }

    fn apply_child_sa(&self, child: &ChildSecurityAssociation, _local_is_initiator: bool, _if_id: u32) -> TngfResult<()> {
        self.child_sas.lock().unwrap().push(child.inbound_spi);
        Ok(())
    }
}
