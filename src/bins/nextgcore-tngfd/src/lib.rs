//! NextGCore TNGF (Trusted Non-3GPP Gateway Function) Library
//!
//! The TNGF lets a UE on a trusted WLAN register with the 5G core:
//! - EAP-5G over RADIUS from the TNAP carries the first NAS exchange
//! - IKEv2 with the UE sets up the signalling and PDU Child SAs
//! - NGAP over SCTP relays UE-associated signalling with the AMF
//! - NAS travels over TCP inside the signalling Child SA
//! - user plane is bridged between GRE (NWt) and GTP-U (N3)

pub mod config;
pub mod context;
pub mod gre;
pub mod gtp_path;
pub mod ike_handler;
pub mod ike_path;
pub mod ike_security;
pub mod nas_path;
pub mod ngap_build;
pub mod ngap_handler;
pub mod ngap_path;
pub mod radius_handler;
pub mod radius_path;
pub mod up_path;
pub mod xfrm;

#[cfg(test)]
pub(crate) mod test_support;


pub use config::{GatewaySettings, TngfConfig};
pub use context::{GatewayContext, Outbound, TngfError, TngfResult};
pub use xfrm::{IpXfrmInstaller, XfrmInstaller, XfrmInterfaceConfig};
