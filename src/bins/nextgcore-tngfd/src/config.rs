//! TNGF Configuration
//!
//! YAML configuration file (`tngf.yaml`) and its validated runtime form.
//! The raw file mirrors the operator-facing layout; [`TngfConfig::settings`]
//! normalises TAC/SST/SD strings, parses addresses and applies the defaults
//! that the gateway falls back to with a warning.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use ogs_ngap::{BroadcastPlmnItem, GlobalTngfId, SNssai, SupportedTaItem};
use ogs_radius::DEFAULT_RADIUS_SECRET;
use ogs_sctp::NGAP_SCTP_PORT;

/// Default xfrm interface name
pub const DEFAULT_XFRM_INTERFACE_NAME: &str = "ipsec";
/// Default xfrm interface id
pub const DEFAULT_XFRM_INTERFACE_ID: u32 = 7;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("invalid {field} '{value}': {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn invalid(field: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        value: value.to_string(),
        reason: reason.into(),
    }
}

// ============================================================================
// File layout
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TngfConfig {
    pub info: Info,
    pub configuration: Configuration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Info {
    pub version: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub tngf_information: TngfInformation,
    #[serde(default)]
    pub amf_sctp_addresses: Vec<AmfSctpAddress>,
    #[serde(default)]
    pub ike_bind_address: String,
    #[serde(default)]
    pub radius_bind_address: String,
    #[serde(default)]
    pub ip_sec_tunnel_address: String,
    #[serde(default)]
    pub ue_ip_address_range: String,
    #[serde(default)]
    pub gtp_bind_address: String,
    pub nas_tcp_port: u16,
    #[serde(default)]
    pub fqdn: String,
    #[serde(default)]
    pub radius_secret: Option<String>,
    #[serde(default)]
    pub xfrm_interface_name: Option<String>,
    #[serde(default)]
    pub xfrm_interface_id: Option<u32>,
    /// Interface the xfrm interfaces attach to; looked up from the IKE bind
    /// address when absent
    #[serde(default)]
    pub xfrm_parent_interface_name: Option<String>,
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TngfInformation {
    pub global_tngf_id: GlobalTngfIdConfig,
    #[serde(default)]
    pub name: Option<String>,
    pub supported_ta_list: Vec<SupportedTaConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTngfIdConfig {
    pub plmn_id: PlmnIdConfig,
    pub tngf_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlmnIdConfig {
    pub mcc: String,
    pub mnc: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedTaConfig {
    pub tac: String,
    pub broadcast_plmn_list: Vec<BroadcastPlmnConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastPlmnConfig {
    pub plmn_id: PlmnIdConfig,
    #[serde(default)]
    pub tai_slice_support_list: Vec<SliceSupportConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SliceSupportConfig {
    pub snssai: SnssaiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnssaiConfig {
    pub sst: String,
    #[serde(default)]
    pub sd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AmfSctpAddress {
    pub ip: Vec<String>,
    #[serde(default = "default_ngap_port")]
    pub port: u16,
}

fn default_ngap_port() -> u16 {
    NGAP_SCTP_PORT
}

// ============================================================================
// Runtime settings
// ============================================================================

/// IPv4 subnet in CIDR form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Subnet {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Subnet {
    pub fn parse(cidr: &str) -> ConfigResult<Self> {
        let (addr, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| invalid("ueIpAddressRange", cidr, "missing prefix length"))?;
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|e| invalid("ueIpAddressRange", cidr, format!("{e}")))?;
        let prefix_len: u8 = prefix
            .trim()
            .parse()
            .map_err(|e| invalid("ueIpAddressRange", cidr, format!("{e}")))?;
        if prefix_len > 30 {
            return Err(invalid("ueIpAddressRange", cidr, "prefix leaves no host addresses"));
        }
        let subnet = Self {
            network: Ipv4Addr::UNSPECIFIED,
            prefix_len,
        };
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & subnet.mask_bits()),
            prefix_len,
        })
    }

    fn mask_bits(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix_len))
        }
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !self.mask_bits())
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask_bits() == u32::from(self.network)
    }

    /// Number of host bits
    pub fn host_bits(&self) -> u32 {
        32 - u32::from(self.prefix_len)
    }
}

impl std::fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Validated configuration used by every component
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub global_tngf_id: GlobalTngfId,
    pub ran_node_name: Option<String>,
    pub supported_ta_list: Vec<SupportedTaItem>,
    pub amf_addresses: Vec<SocketAddr>,
    pub ike_bind_address: Ipv4Addr,
    pub radius_bind_address: Ipv4Addr,
    pub ipsec_gateway_address: Ipv4Addr,
    pub ue_subnet: Ipv4Subnet,
    pub gtp_bind_address: Ipv4Addr,
    pub nas_tcp_port: u16,
    pub fqdn: String,
    pub radius_secret: Vec<u8>,
    pub xfrm_interface_name: String,
    pub xfrm_interface_id: u32,
    pub xfrm_parent_interface: Option<String>,
    pub certificate_pem: Option<String>,
    pub private_key_pem: Option<String>,
}

impl GatewaySettings {
    /// PLMN identity the gateway serves (from the Global TNGF ID)
    pub fn plmn_identity(&self) -> [u8; 3] {
        self.global_tngf_id.plmn_identity
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl TngfConfig {
    /// Read and parse the YAML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate and convert to runtime settings
    pub fn settings(&self) -> ConfigResult<GatewaySettings> {
        let cfg = &self.configuration;
        let info = &cfg.tngf_information;

        let global_tngf_id = GlobalTngfId {
            plmn_identity: encode_plmn_id(&info.global_tngf_id.plmn_id)?,
            tngf_id: info.global_tngf_id.tngf_id,
        };

        if info.supported_ta_list.is_empty() {
            return Err(ConfigError::Missing {
                field: "tngfInformation.supportedTaList",
            });
        }
        let mut supported_ta_list = Vec::with_capacity(info.supported_ta_list.len());
        for ta in &info.supported_ta_list {
            let mut broadcast_plmn_list = Vec::with_capacity(ta.broadcast_plmn_list.len());
            for plmn in &ta.broadcast_plmn_list {
                let slices = plmn
                    .tai_slice_support_list
                    .iter()
                    .map(|slice| parse_snssai(&slice.snssai))
                    .collect::<ConfigResult<Vec<_>>>()?;
                broadcast_plmn_list.push(BroadcastPlmnItem {
                    plmn_identity: encode_plmn_id(&plmn.plmn_id)?,
                    tai_slice_support_list: slices,
                });
            }
            supported_ta_list.push(SupportedTaItem {
                tac: parse_tac(&ta.tac)?,
                broadcast_plmn_list,
            });
        }

        if cfg.amf_sctp_addresses.is_empty() {
            return Err(ConfigError::Missing {
                field: "amfSctpAddresses",
            });
        }
        let mut amf_addresses = Vec::new();
        for amf in &cfg.amf_sctp_addresses {
            // the SCTP client connects to the primary address only
            let first = amf.ip.first().ok_or(ConfigError::Missing {
                field: "amfSctpAddresses.ip",
            })?;
            let ip: Ipv4Addr = first
                .parse()
                .map_err(|e| invalid("amfSctpAddresses.ip", first, format!("{e}")))?;
            amf_addresses.push(SocketAddr::V4(SocketAddrV4::new(ip, amf.port)));
        }

        let ike_bind_address = parse_address("ikeBindAddress", &cfg.ike_bind_address)?;
        let radius_bind_address = parse_address("radiusBindAddress", &cfg.radius_bind_address)?;
        let ipsec_gateway_address = parse_address("ipSecTunnelAddress", &cfg.ip_sec_tunnel_address)?;
        let gtp_bind_address = parse_address("gtpBindAddress", &cfg.gtp_bind_address)?;

        if cfg.ue_ip_address_range.is_empty() {
            return Err(ConfigError::Missing {
                field: "ueIpAddressRange",
            });
        }
        let ue_subnet = Ipv4Subnet::parse(&cfg.ue_ip_address_range)?;

        if cfg.nas_tcp_port == 0 {
            return Err(ConfigError::Missing { field: "nasTcpPort" });
        }
        if cfg.fqdn.is_empty() {
            return Err(ConfigError::Missing { field: "fqdn" });
        }

        let radius_secret = match cfg.radius_secret.as_deref() {
            Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
            _ => {
                log::warn!("No RADIUS secret configured, using the default \"{DEFAULT_RADIUS_SECRET}\"");
                DEFAULT_RADIUS_SECRET.as_bytes().to_vec()
            }
        };

        let xfrm_interface_name = match cfg.xfrm_interface_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                log::warn!("No xfrm interface name configured, using \"{DEFAULT_XFRM_INTERFACE_NAME}\"");
                DEFAULT_XFRM_INTERFACE_NAME.to_string()
            }
        };
        let xfrm_interface_id = match cfg.xfrm_interface_id {
            Some(id) if id != 0 => id,
            _ => {
                log::warn!("No xfrm interface id configured, using {DEFAULT_XFRM_INTERFACE_ID}");
                DEFAULT_XFRM_INTERFACE_ID
            }
        };

        Ok(GatewaySettings {
            global_tngf_id,
            ran_node_name: info.name.clone().filter(|n| !n.is_empty()),
            supported_ta_list,
            amf_addresses,
            ike_bind_address,
            radius_bind_address,
            ipsec_gateway_address,
            ue_subnet,
            gtp_bind_address,
            nas_tcp_port: cfg.nas_tcp_port,
            fqdn: cfg.fqdn.clone(),
            radius_secret,
            xfrm_interface_name,
            xfrm_interface_id,
            xfrm_parent_interface: cfg.xfrm_parent_interface_name.clone().filter(|n| !n.is_empty()),
            certificate_pem: read_optional_pem(cfg.certificate.as_deref()),
            private_key_pem: read_optional_pem(cfg.private_key.as_deref()),
        })
    }
}

fn read_optional_pem(path: Option<&str>) -> Option<String> {
    let path = path.filter(|p| !p.is_empty())?;
    match std::fs::read_to_string(path) {
        Ok(pem) => Some(pem),
        Err(e) => {
            log::warn!("Cannot read {path}: {e}");
            None
        }
    }
}

fn parse_address(field: &'static str, value: &str) -> ConfigResult<Ipv4Addr> {
    if value.is_empty() {
        return Err(ConfigError::Missing { field });
    }
    value.parse().map_err(|e| invalid(field, value, format!("{e}")))
}

/// Decode a hex string of even length
fn decode_hex(field: &'static str, value: &str) -> ConfigResult<Vec<u8>> {
    if value.len() % 2 != 0 || !value.is_ascii() {
        return Err(invalid(field, value, "not a hex string"));
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&value[i..i + 2], 16).map_err(|e| invalid(field, value, format!("{e}"))))
        .collect()
}

/// Left-pad `value` with zeros to `width` hex digits
fn pad_hex(field: &'static str, value: &str, width: usize) -> ConfigResult<String> {
    if value.len() > width {
        return Err(invalid(field, value, format!("longer than {width} hex digits")));
    }
    Ok(format!("{value:0>width$}"))
}

/// TAC as 3 octets, left-padded to 6 hex digits
pub fn parse_tac(tac: &str) -> ConfigResult<[u8; 3]> {
    let padded = pad_hex("tac", tac, 6)?;
    let bytes = decode_hex("tac", &padded)?;
    Ok([bytes[0], bytes[1], bytes[2]])
}

/// S-NSSAI with SST padded to 2 and SD to 6 hex digits
pub fn parse_snssai(snssai: &SnssaiConfig) -> ConfigResult<SNssai> {
    let sst = decode_hex("sst", &pad_hex("sst", &snssai.sst, 2)?)?;
    let sd = match snssai.sd.as_deref() {
        Some(sd) if !sd.is_empty() => {
            let bytes = decode_hex("sd", &pad_hex("sd", sd, 6)?)?;
            Some([bytes[0], bytes[1], bytes[2]])
        }
        _ => None,
    };
    Ok(SNssai { sst: sst[0], sd })
}

/// MCC/MNC digits in the 3-octet TBCD layout of TS 38.413
pub fn encode_plmn_id(plmn: &PlmnIdConfig) -> ConfigResult<[u8; 3]> {
    let digits = |field: &'static str, value: &str| -> ConfigResult<Vec<u8>> {
        value
            .chars()
            .map(|c| {
                c.to_digit(10)
                    .map(|d| d as u8)
                    .ok_or_else(|| invalid(field, value, "not a decimal digit"))
            })
            .collect()
    };
    let mcc = digits("mcc", &plmn.mcc)?;
    let mnc = digits("mnc", &plmn.mnc)?;
    if mcc.len() != 3 {
        return Err(invalid("mcc", &plmn.mcc, "must be 3 digits"));
    }
    let mnc3 = match mnc.len() {
        2 => 0x0f,
        3 => mnc[2],
        _ => return Err(invalid("mnc", &plmn.mnc, "must be 2 or 3 digits")),
    };
    Ok([(mcc[1] << 4) | mcc[0], (mnc3 << 4) | mcc[2], (mnc[1] << 4) | mnc[0]])
}
