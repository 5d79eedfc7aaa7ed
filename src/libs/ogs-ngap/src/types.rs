//! NGAP Higher-Level Message Types
//!
//! Strongly-typed representations of the NGAP procedure messages exchanged
//! between a trusted non-3GPP gateway and the AMF (3GPP TS 38.413).
//! These types abstract over the raw ProtocolIeContainer.

use std::net::Ipv4Addr;

use ogs_asn1c::ngap::cause::Cause;
pub use ogs_asn1c::ngap::ies::{RrcEstablishmentCause, SNssai, TimeToWait};

// ============================================================================
// NG Setup (Section 9.2.6)
// ============================================================================

/// NG Setup Request - sent by the gateway to the AMF
#[derive(Debug, Clone, PartialEq)]
pub struct NgSetupRequest {
    pub global_ran_node_id: GlobalTngfId,
    pub ran_node_name: Option<String>,
    pub supported_ta_list: Vec<SupportedTaItem>,
    pub default_paging_drx: PagingDrx,
}

/// NG Setup Response - sent by AMF
#[derive(Debug, Clone, PartialEq)]
pub struct NgSetupResponse {
    pub amf_name: String,
    pub served_guami_list: Vec<ServedGuamiItem>,
    pub relative_amf_capacity: u8,
    pub plmn_support_list: Vec<PlmnSupportItem>,
}

/// NG Setup Failure - sent by AMF
#[derive(Debug, Clone, PartialEq)]
pub struct NgSetupFailure {
    pub cause: Cause,
    pub time_to_wait: Option<TimeToWait>,
}

// ============================================================================
// NAS Transport (Section 9.2.5)
// ============================================================================

/// Initial UE Message
#[derive(Debug, Clone, PartialEq)]
pub struct InitialUeMessage {
    pub ran_ue_ngap_id: u32,
    pub nas_pdu: Vec<u8>,
    pub user_location_info: UserLocationInformationTngf,
    pub rrc_establishment_cause: RrcEstablishmentCause,
    pub ue_context_request: bool,
}

/// Downlink NAS Transport
#[derive(Debug, Clone, PartialEq)]
pub struct DownlinkNasTransport {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub nas_pdu: Vec<u8>,
}

/// Uplink NAS Transport
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkNasTransport {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub nas_pdu: Vec<u8>,
    pub user_location_info: UserLocationInformationTngf,
}

// ============================================================================
// Initial Context Setup (Section 9.2.2)
// ============================================================================

/// Initial Context Setup Request - sent by AMF
#[derive(Debug, Clone, PartialEq)]
pub struct InitialContextSetupRequest {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub ue_ambr: Option<Ambr>,
    pub guami: Guami,
    pub pdu_session_list: Vec<PduSessionSetupItem>,
    pub allowed_nssai: Vec<SNssai>,
    pub ue_security_capabilities: UeSecurityCapabilities,
    /// Security Key (256 bits), used as Ktngf
    pub security_key: [u8; 32],
    pub nas_pdu: Option<Vec<u8>>,
}

/// Initial Context Setup Response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InitialContextSetupResponse {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub setup_list: Vec<PduSessionSetupResponseItem>,
    pub failed_list: Vec<PduSessionFailedItem>,
}

/// Initial Context Setup Failure
#[derive(Debug, Clone, PartialEq)]
pub struct InitialContextSetupFailure {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub failed_list: Vec<PduSessionFailedItem>,
    pub cause: Cause,
}

// ============================================================================
// PDU Session Resource procedures (Section 9.2.1)
// ============================================================================

/// PDU Session Resource Setup Request - sent by AMF
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionResourceSetupRequest {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub nas_pdu: Option<Vec<u8>>,
    pub setup_list: Vec<PduSessionSetupItem>,
    pub ue_ambr: Option<Ambr>,
}

/// Setup item shared by the CxtReq and SUReq lists
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionSetupItem {
    pub pdu_session_id: u8,
    pub nas_pdu: Option<Vec<u8>>,
    pub s_nssai: SNssai,
    /// Encoded PDUSessionResourceSetupRequestTransfer
    pub transfer: Vec<u8>,
}

/// PDU Session Resource Setup Response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PduSessionResourceSetupResponse {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub setup_list: Vec<PduSessionSetupResponseItem>,
    pub failed_list: Vec<PduSessionFailedItem>,
}

/// Successful setup item; `transfer` is an encoded PDUSessionResourceSetupResponseTransfer
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionSetupResponseItem {
    pub pdu_session_id: u8,
    pub transfer: Vec<u8>,
}

/// Failed setup item; `transfer` is an encoded PDUSessionResourceSetupUnsuccessfulTransfer
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionFailedItem {
    pub pdu_session_id: u8,
    pub transfer: Vec<u8>,
}

/// PDU Session Resource Release Command - sent by AMF
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionResourceReleaseCommand {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub nas_pdu: Option<Vec<u8>>,
    pub release_list: Vec<PduSessionReleaseItem>,
}

/// Release command item; `transfer` is an encoded PDUSessionResourceReleaseCommandTransfer
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionReleaseItem {
    pub pdu_session_id: u8,
    pub transfer: Vec<u8>,
}

/// PDU Session Resource Release Response
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionResourceReleaseResponse {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    /// Released items; transfers are encoded PDUSessionResourceReleaseResponseTransfer
    pub released_list: Vec<PduSessionReleaseItem>,
}

// ============================================================================
// UE Context Release (Section 9.2.2.5 - 9.2.2.7)
// ============================================================================

/// UE Context Release Request - sent by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct UeContextReleaseRequest {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
    pub pdu_session_ids: Vec<u8>,
    pub cause: Cause,
}

/// UE Context Release Command - sent by AMF
#[derive(Debug, Clone, PartialEq)]
pub struct UeContextReleaseCommand {
    pub ue_ngap_ids: UeNgapIds,
    pub cause: Cause,
}

/// UE Context Release Complete
#[derive(Debug, Clone, PartialEq)]
pub struct UeContextReleaseComplete {
    pub amf_ue_ngap_id: u64,
    pub ran_ue_ngap_id: u32,
}

// ============================================================================
// Interface management (Section 9.2.6)
// ============================================================================

/// NG Reset (either direction)
#[derive(Debug, Clone, PartialEq)]
pub struct NgReset {
    pub cause: Cause,
    pub reset_type: ResetType,
}

/// ResetType ::= CHOICE { nG-Interface, partOfNG-Interface, choice-Extensions }
#[derive(Debug, Clone, PartialEq)]
pub enum ResetType {
    /// Reset all UE-associated connections
    NgInterface,
    /// Reset only the listed connections
    PartOfNgInterface(Vec<UeAssociatedLogicalNgConnection>),
}

/// UE-associatedLogicalNG-connectionItem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UeAssociatedLogicalNgConnection {
    pub amf_ue_ngap_id: Option<u64>,
    pub ran_ue_ngap_id: Option<u32>,
}

/// NG Reset Acknowledge
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NgResetAcknowledge {
    pub connection_list: Vec<UeAssociatedLogicalNgConnection>,
}

/// Error Indication (either direction)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorIndication {
    pub amf_ue_ngap_id: Option<u64>,
    pub ran_ue_ngap_id: Option<u32>,
    pub cause: Option<Cause>,
}

/// AMF Configuration Update - sent by AMF
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AmfConfigurationUpdate {
    pub amf_name: Option<String>,
    pub served_guami_list: Option<Vec<ServedGuamiItem>>,
    pub relative_amf_capacity: Option<u8>,
    pub plmn_support_list: Option<Vec<PlmnSupportItem>>,
}

/// AMF Configuration Update Acknowledge (no TNL association lists are reported)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AmfConfigurationUpdateAcknowledge {}

/// AMF Configuration Update Failure
#[derive(Debug, Clone, PartialEq)]
pub struct AmfConfigurationUpdateFailure {
    pub cause: Cause,
    pub time_to_wait: Option<TimeToWait>,
}

/// Overload Start - sent by AMF
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverloadStart {
    pub overload_action: Option<OverloadAction>,
    /// AMFTrafficLoadReductionIndication (1..99)
    pub traffic_load_reduction: Option<u8>,
}

/// OverloadAction ::= ENUMERATED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OverloadAction {
    RejectNonEmergencyMoDt = 0,
    RejectRrcCrSignalling = 1,
    PermitEmergencySessionsAndMobileTerminatedServicesOnly = 2,
    PermitHighPrioritySessionsAndMobileTerminatedServicesOnly = 3,
}

impl OverloadAction {
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::RejectNonEmergencyMoDt),
            1 => Some(Self::RejectRrcCrSignalling),
            2 => Some(Self::PermitEmergencySessionsAndMobileTerminatedServicesOnly),
            3 => Some(Self::PermitHighPrioritySessionsAndMobileTerminatedServicesOnly),
            _ => None,
        }
    }
}

// ============================================================================
// PDU session transfers (Section 9.3.4)
// ============================================================================

/// PDUSessionResourceSetupRequestTransfer
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionResourceSetupRequestTransfer {
    pub session_ambr: Option<Ambr>,
    pub ul_ngu_up_tnl_info: Option<GtpTunnel>,
    pub pdu_session_type: PduSessionType,
    pub security_indication: Option<SecurityIndication>,
    pub network_instance: Option<u16>,
    pub qos_flow_setup_list: Vec<QosFlowSetupRequestItem>,
}

/// PDUSessionResourceSetupResponseTransfer (DL tunnel and associated flows)
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionResourceSetupResponseTransfer {
    pub dl_tunnel: GtpTunnel,
    pub associated_qfis: Vec<u8>,
}

/// PDUSessionResourceSetupUnsuccessfulTransfer
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionResourceSetupUnsuccessfulTransfer {
    pub cause: Cause,
}

/// PDUSessionResourceReleaseCommandTransfer
#[derive(Debug, Clone, PartialEq)]
pub struct PduSessionResourceReleaseCommandTransfer {
    pub cause: Cause,
}

/// GTPTunnel - transport address and TEID of a user plane endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GtpTunnel {
    pub address: Ipv4Addr,
    pub teid: u32,
}

/// PDUSessionType ::= ENUMERATED { ipv4, ipv6, ipv4v6, ethernet, unstructured, ... }
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PduSessionType {
    #[default]
    Ipv4 = 0,
    Ipv6 = 1,
    Ipv4v6 = 2,
    Ethernet = 3,
    Unstructured = 4,
}

/// SecurityIndication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityIndication {
    pub integrity_protection: ProtectionIndication,
    pub confidentiality_protection: ProtectionIndication,
}

/// IntegrityProtectionIndication / ConfidentialityProtectionIndication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtectionIndication {
    Required = 0,
    Preferred = 1,
    NotNeeded = 2,
}

/// QosFlowSetupRequestItem (non-dynamic 5QI)
#[derive(Debug, Clone, PartialEq)]
pub struct QosFlowSetupRequestItem {
    pub qfi: u8,
    pub five_qi: u8,
    pub arp: AllocationAndRetentionPriority,
    pub gbr: Option<GbrQosInformation>,
}

/// AllocationAndRetentionPriority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationAndRetentionPriority {
    /// 1..15
    pub priority_level: u8,
    pub may_trigger_pre_emption: bool,
    pub pre_emptable: bool,
}

/// GBR-QosInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GbrQosInformation {
    pub max_flow_bit_rate_dl: u64,
    pub max_flow_bit_rate_ul: u64,
    pub guaranteed_flow_bit_rate_dl: u64,
    pub guaranteed_flow_bit_rate_ul: u64,
}

// ============================================================================
// Common Types
// ============================================================================

/// UE NGAP ID pair or AMF-only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UeNgapIds {
    Pair { amf_ue_ngap_id: u64, ran_ue_ngap_id: u32 },
    AmfOnly { amf_ue_ngap_id: u64 },
}

/// GlobalTNGF-ID, carried in the choice-Extensions of GlobalRANNodeID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalTngfId {
    pub plmn_identity: [u8; 3],
    pub tngf_id: u32,
}

/// UserLocationInformationTNGF, carried in the choice-Extensions of UserLocationInformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLocationInformationTngf {
    pub tnap_id: Vec<u8>,
    pub ip_address: Ipv4Addr,
    pub port: Option<u16>,
}

/// Supported TA Item
#[derive(Debug, Clone, PartialEq)]
pub struct SupportedTaItem {
    pub tac: [u8; 3],
    pub broadcast_plmn_list: Vec<BroadcastPlmnItem>,
}

/// Broadcast PLMN Item
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastPlmnItem {
    pub plmn_identity: [u8; 3],
    pub tai_slice_support_list: Vec<SNssai>,
}

/// Served GUAMI Item
#[derive(Debug, Clone, PartialEq)]
pub struct ServedGuamiItem {
    pub guami: Guami,
    pub backup_amf_name: Option<String>,
}

/// GUAMI (Globally Unique AMF Identifier)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guami {
    pub plmn_identity: [u8; 3],
    pub amf_region_id: u8,
    /// 10 bits
    pub amf_set_id: u16,
    /// 6 bits
    pub amf_pointer: u8,
}

/// PLMN Support Item
#[derive(Debug, Clone, PartialEq)]
pub struct PlmnSupportItem {
    pub plmn_identity: [u8; 3],
    pub slice_support_list: Vec<SNssai>,
}

/// Paging DRX values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PagingDrx {
    V32 = 0,
    V64 = 1,
    #[default]
    V128 = 2,
    V256 = 3,
}

/// UE Security Capabilities (16-bit algorithm bitmaps)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UeSecurityCapabilities {
    pub nr_encryption_algorithms: u16,
    pub nr_integrity_algorithms: u16,
    pub eutra_encryption_algorithms: u16,
    pub eutra_integrity_algorithms: u16,
}

/// Aggregate maximum bit rate (UE or PDU session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ambr {
    pub dl: u64,
    pub ul: u64,
}
