//! XFRM Tunnel Installer
//!
//! Programs kernel IPsec state and policy for Child SAs and manages the xfrm
//! interfaces they are bound to. [`plan_child_sa`] is pure so the key and
//! direction choice can be checked without a kernel; [`IpXfrmInstaller`]
//! turns the plans into `ip xfrm` invocations.

use std::net::Ipv4Addr;
use std::process::Command;

use ogs_ike::{
    TrafficSelector, AUTH_AES_XCBC_96, AUTH_HMAC_MD5_96, AUTH_HMAC_SHA1_96, ENCR_3DES, ENCR_AES_CBC, ENCR_AES_CTR,
    ENCR_BLOWFISH, ENCR_CAST, ENCR_DES, ENCR_NULL, IP_PROTOCOL_ALL,
};

use crate::config::Ipv4Subnet;
use crate::context::{ChildSecurityAssociation, TngfError, TngfResult};

/// Kernel name of an ESP encryption transform
pub fn encryption_algorithm_name(transform_id: u16) -> Option<&'static str> {
    match transform_id {
        ENCR_DES => Some("cbc(des)"),
        ENCR_3DES => Some("cbc(des3_ede)"),
        ENCR_CAST => Some("cbc(cast5)"),
        ENCR_BLOWFISH => Some("cbc(blowfish)"),
        ENCR_NULL => Some("ecb(cipher_null)"),
        ENCR_AES_CBC => Some("cbc(aes)"),
        ENCR_AES_CTR => Some("rfc3686(ctr(aes))"),
        _ => None,
    }
}

/// Kernel name of an ESP integrity transform
pub fn integrity_algorithm_name(transform_id: u16) -> Option<&'static str> {
    match transform_id {
        AUTH_HMAC_MD5_96 => Some("hmac(md5)"),
        AUTH_HMAC_SHA1_96 => Some("hmac(sha1)"),
        AUTH_AES_XCBC_96 => Some("xcbc(aes)"),
        _ => None,
    }
}

fn key_hex(key: &[u8]) -> String {
    if key.is_empty() {
        return String::new();
    }
    let mut out = String::with_capacity(2 + key.len() * 2);
    out.push_str("0x");
    for byte in key {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// CIDR covering a traffic selector's address range
fn selector_cidr(selector: &TrafficSelector) -> String {
    let start = u32::from(selector.start_addr);
    let end = u32::from(selector.end_addr);
    let prefix_len = (start ^ end).leading_zeros();
    let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
    format!("{}/{}", Ipv4Addr::from(start & mask), prefix_len)
}

// ============================================================================
// Plans
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XfrmDirection {
    In,
    Out,
}

impl XfrmDirection {
    fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

/// One ESP tunnel-mode state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfrmStatePlan {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub spi: u32,
    pub reqid: u32,
    pub if_id: u32,
    pub encryption: &'static str,
    pub encryption_key: Vec<u8>,
    pub integrity: Option<(&'static str, Vec<u8>)>,
    /// ESP-in-UDP source and destination ports
    pub encap: Option<(u16, u16)>,
    pub esn: bool,
}

impl XfrmStatePlan {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = strings(&[
            "xfrm", "state", "add",
            "src", &self.src.to_string(),
            "dst", &self.dst.to_string(),
            "proto", "esp",
            "spi", &format!("0x{:08x}", self.spi),
            "reqid", &self.reqid.to_string(),
            "mode", "tunnel",
            "if_id", &self.if_id.to_string(),
            "enc", self.encryption, &key_hex(&self.encryption_key),
        ]);
        if let Some((name, key)) = &self.integrity {
            args.extend(["auth-trunc".to_string(), name.to_string(), key_hex(key), "96".to_string()]);
        }
        if let Some((sport, dport)) = self.encap {
            args.extend([
                "encap".to_string(),
                "espinudp".to_string(),
                sport.to_string(),
                dport.to_string(),
                "0.0.0.0".to_string(),
            ]);
        }
        if self.esn {
            args.extend(["flag".to_string(), "esn".to_string()]);
        }
        args
    }
}

/// One tunnel-mode policy with its template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfrmPolicyPlan {
    pub src: String,
    pub dst: String,
    pub ip_protocol: u8,
    pub direction: XfrmDirection,
    pub tmpl_src: Ipv4Addr,
    pub tmpl_dst: Ipv4Addr,
    pub reqid: u32,
    pub if_id: u32,
}

impl XfrmPolicyPlan {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = strings(&["xfrm", "policy", "add", "src", &self.src, "dst", &self.dst]);
        if self.ip_protocol != IP_PROTOCOL_ALL {
            args.extend(strings(&["proto", &self.ip_protocol.to_string()]));
        }
        args.extend(strings(&[
            "dir", self.direction.as_str(),
            "tmpl",
            "src", &self.tmpl_src.to_string(),
            "dst", &self.tmpl_dst.to_string(),
            "proto", "esp",
            "reqid", &self.reqid.to_string(),
            "mode", "tunnel",
            "if_id", &self.if_id.to_string(),
        ]));
        args
    }
}

/// States and policies for both directions of a Child SA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSaPlan {
    pub inbound_state: XfrmStatePlan,
    pub inbound_policy: XfrmPolicyPlan,
    pub outbound_state: XfrmStatePlan,
    pub outbound_policy: XfrmPolicyPlan,
}

/// Inbound uses the keys toward the local end: R->I when the gateway
/// initiated the Child SA, I->R when it responded. Outbound is the opposite.
pub fn plan_child_sa(child: &ChildSecurityAssociation, local_is_initiator: bool, if_id: u32) -> TngfResult<ChildSaPlan> {
    let transforms = &child.transforms;
    let encryption = encryption_algorithm_name(transforms.encryption.transform_id).ok_or_else(|| {
        TngfError::Xfrm(format!("unsupported encryption transform {}", transforms.encryption.transform_id))
    })?;
    let integrity = match transforms.integrity {
        Some(t) => Some(
            integrity_algorithm_name(t.transform_id)
                .ok_or_else(|| TngfError::Xfrm(format!("unsupported integrity transform {}", t.transform_id)))?,
        ),
        None => None,
    };

    let keys = &child.keys;
    let (in_encr, in_integ, out_encr, out_integ) = if local_is_initiator {
        (
            &keys.responder_to_initiator_encryption,
            &keys.responder_to_initiator_integrity,
            &keys.initiator_to_responder_encryption,
            &keys.initiator_to_responder_integrity,
        )
    } else {
        (
            &keys.initiator_to_responder_encryption,
            &keys.initiator_to_responder_integrity,
            &keys.responder_to_initiator_encryption,
            &keys.responder_to_initiator_integrity,
        )
    };

    let local = child.local_public_address;
    let peer = child.peer_public_address;
    let reqid = child.inbound_spi;

    let inbound_state = XfrmStatePlan {
        src: peer,
        dst: local,
        spi: child.inbound_spi,
        reqid,
        if_id,
        encryption,
        encryption_key: in_encr.clone(),
        integrity: integrity.map(|name| (name, in_integ.clone())),
        encap: child.nat.map(|nat| (nat.peer_port, nat.local_port)),
        esn: transforms.esn,
    };
    let outbound_state = XfrmStatePlan {
        src: local,
        dst: peer,
        spi: child.outbound_spi,
        reqid,
        if_id,
        encryption,
        encryption_key: out_encr.clone(),
        integrity: integrity.map(|name| (name, out_integ.clone())),
        encap: child.nat.map(|nat| (nat.local_port, nat.peer_port)),
        esn: transforms.esn,
    };

    let local_selector = selector_cidr(&child.local_selector);
    let peer_selector = selector_cidr(&child.peer_selector);
    let inbound_policy = XfrmPolicyPlan {
        src: peer_selector.clone(),
        dst: local_selector.clone(),
        ip_protocol: child.peer_selector.ip_protocol,
        direction: XfrmDirection::In,
        tmpl_src: peer,
        tmpl_dst: local,
        reqid,
        if_id,
    };
    let outbound_policy = XfrmPolicyPlan {
        src: local_selector,
        dst: peer_selector,
        ip_protocol: child.local_selector.ip_protocol,
        direction: XfrmDirection::Out,
        tmpl_src: local,
        tmpl_dst: peer,
        reqid,
        if_id,
    };

    Ok(ChildSaPlan {
        inbound_state,
        inbound_policy,
        outbound_state,
        outbound_policy,
    })
}

// ============================================================================
// Installer
// ============================================================================

/// xfrm interface to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfrmInterfaceConfig {
    pub name: String,
    pub if_id: u32,
    pub parent: Option<String>,
    /// Address and prefix length assigned to the interface
    pub address: Option<(Ipv4Addr, u8)>,
    /// Subnet routed through the interface
    pub route: Option<Ipv4Subnet>,
}

pub trait XfrmInstaller: Send + Sync {
    /// Create and bring up an interface; returns its ifindex
    fn setup_interface(&self, config: &XfrmInterfaceConfig) -> TngfResult<u32>;

    fn delete_interface(&self, name: &str) -> TngfResult<()>;

    /// Install both directions of a Child SA, inbound first
    fn apply_child_sa(&self, child: &ChildSecurityAssociation, local_is_initiator: bool, if_id: u32) -> TngfResult<()>;
}

/// Installer driving the `ip` command
#[derive(Debug, Default)]
pub struct IpXfrmInstaller;

impl IpXfrmInstaller {
    fn run_ip(args: &[String]) -> TngfResult<()> {
        let output = Command::new("ip")
            .args(args)
            .output()
            .map_err(|e| TngfError::Xfrm(format!("failed to run ip: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TngfError::Xfrm(format!("ip {} failed: {}", args.join(" "), stderr.trim())));
        }
        Ok(())
    }

    // Address and route may survive a previous run
    fn run_ip_allow_existing(args: &[String]) -> TngfResult<()> {
        match Self::run_ip(args) {
            Err(TngfError::Xfrm(reason)) if reason.contains("File exists") => {
                log::warn!("{}", reason);
                Ok(())
            }
            other => other,
        }
    }

    fn ifindex(name: &str) -> TngfResult<u32> {
        let path = format!("/sys/class/net/{name}/ifindex");
        let content = std::fs::read_to_string(&path).map_err(|e| TngfError::Xfrm(format!("{path}: {e}")))?;
        content
            .trim()
            .parse()
            .map_err(|e| TngfError::Xfrm(format!("{path}: {e}")))
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl XfrmInstaller for IpXfrmInstaller {
    fn setup_interface(&self, config: &XfrmInterfaceConfig) -> TngfResult<u32> {
        let if_id = config.if_id.to_string();
        let mut link = strings(&["link", "add", &config.name, "type", "xfrm"]);
        if let Some(parent) = &config.parent {
            link.extend(strings(&["dev", parent]));
        }
        link.extend(strings(&["if_id", &if_id]));
        Self::run_ip(&link)?;
        Self::run_ip(&strings(&["link", "set", &config.name, "up"]))?;

        if let Some((addr, prefix_len)) = config.address {
            let cidr = format!("{addr}/{prefix_len}");
            Self::run_ip_allow_existing(&strings(&["addr", "add", &cidr, "dev", &config.name]))?;
        }
        if let Some(route) = config.route {
            let cidr = route.to_string();
            Self::run_ip_allow_existing(&strings(&["route", "add", &cidr, "dev", &config.name]))?;
        }

        let ifindex = Self::ifindex(&config.name)?;
        log::info!(
            "xfrm interface {} up (if_id={}, ifindex={})",
            config.name,
            config.if_id,
            ifindex
        );
        Ok(ifindex)
    }

    fn delete_interface(&self, name: &str) -> TngfResult<()> {
        Self::run_ip(&strings(&["link", "del", name]))?;
        log::info!("xfrm interface {} deleted", name);
        Ok(())
    }

    fn apply_child_sa(&self, child: &ChildSecurityAssociation, local_is_initiator: bool, if_id: u32) -> TngfResult<()> {
        let plan = plan_child_sa(child, local_is_initiator, if_id)?;
        Self::run_ip(&plan.inbound_state.to_args())?;
        Self::run_ip(&plan.inbound_policy.to_args())?;
        Self::run_ip(&plan.outbound_state.to_args())?;
        Self::run_ip(&plan.outbound_policy.to_args())?;
        log::debug!(
            "Child SA installed (in={:08x}, out={:08x}, if_id={})",
            child.inbound_spi,
            child.outbound_spi,
            if_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NatPorts;
    use crate::ike_security::{ChildKeys, ChildTransforms};
    use bytes::Bytes;

    fn child(nat: Option<NatPorts>) -> ChildSecurityAssociation {
        let mut selector = TrafficSelector::host(Ipv4Addr::new(10, 0, 0, 1));
        selector.ip_protocol = 47;
        ChildSecurityAssociation {
            inbound_spi: 0x1111,
            outbound_spi: 0x2222,
            transforms: ChildTransforms::for_pdu_session(true),
            keys: ChildKeys {
                initiator_to_responder_encryption: Vec::new(),
                initiator_to_responder_integrity: vec![0xaa; 20],
                responder_to_initiator_encryption: Vec::new(),
                responder_to_initiator_integrity: vec![0xbb; 20],
            },
            local_nonce: Bytes::new(),
            local_public_address: Ipv4Addr::new(192, 168, 1, 1),
            peer_public_address: Ipv4Addr::new(192, 168, 1, 2),
            local_selector: selector,
            peer_selector: TrafficSelector::host(Ipv4Addr::new(10, 0, 0, 2)),
            nat,
            xfrm_if_id: 7,
            xfrm_ifindex: None,
            pdu_session_ids: vec![1],
            local_is_initiator: true,
        }
    }

    #[test]
    fn test_initiator_inbound_uses_responder_keys() {
        let plan = plan_child_sa(&child(None), true, 7).unwrap();
        assert_eq!(plan.inbound_state.integrity.as_ref().unwrap().1, vec![0xbb; 20]);
        assert_eq!(plan.outbound_state.integrity.as_ref().unwrap().1, vec![0xaa; 20]);
        assert_eq!(plan.inbound_state.src, Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(plan.inbound_state.spi, 0x1111);
        assert_eq!(plan.outbound_state.spi, 0x2222);
    }

    #[test]
    fn test_responder_inbound_uses_initiator_keys() {
        let plan = plan_child_sa(&child(None), false, 7).unwrap();
        assert_eq!(plan.inbound_state.integrity.as_ref().unwrap().1, vec![0xaa; 20]);
        assert_eq!(plan.outbound_state.integrity.as_ref().unwrap().1, vec![0xbb; 20]);
    }

    #[test]
    fn test_nat_ports_swap_per_direction() {
        let plan = plan_child_sa(
            &child(Some(NatPorts {
                local_port: 4500,
                peer_port: 31000,
            })),
            true,
            7,
        )
        .unwrap();
        assert_eq!(plan.inbound_state.encap, Some((31000, 4500)));
        assert_eq!(plan.outbound_state.encap, Some((4500, 31000)));
        let args = plan.outbound_state.to_args();
        assert!(args.windows(3).any(|w| w == ["espinudp", "4500", "31000"]));
    }

    #[test]
    fn test_state_args() {
        let plan = plan_child_sa(&child(None), true, 9).unwrap();
        let args = plan.inbound_state.to_args();
        assert_eq!(&args[..3], &["xfrm", "state", "add"]);
        assert!(args.windows(2).any(|w| w == ["enc", "ecb(cipher_null)"]));
        assert!(args.windows(2).any(|w| w == ["auth-trunc", "hmac(sha1)"]));
        assert!(args.windows(2).any(|w| w == ["if_id", "9"]));
        assert!(args.contains(&format!("0x{}", "bb".repeat(20))));
    }

    #[test]
    fn test_policy_args() {
        let plan = plan_child_sa(&child(None), true, 7).unwrap();
        let args = plan.outbound_policy.to_args();
        assert!(args.windows(2).any(|w| w == ["src", "10.0.0.1/32"]));
        assert!(args.windows(2).any(|w| w == ["proto", "47"]));
        assert!(args.windows(2).any(|w| w == ["dir", "out"]));
        let inbound = plan.inbound_policy.to_args();
        assert!(!inbound.contains(&"47".to_string()));
    }

    #[test]
    fn test_selector_cidr_range() {
        let mut selector = TrafficSelector::host(Ipv4Addr::new(10, 0, 0, 0));
        selector.end_addr = Ipv4Addr::new(10, 0, 0, 255);
        assert_eq!(selector_cidr(&selector), "10.0.0.0/24");
    }
}
