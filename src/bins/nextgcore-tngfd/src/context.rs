//! TNGF Context Management
//!
//! The gateway context owns every registry: UE sessions, AMF associations,
//! IKE SAs, Child SA SPIs, TEIDs, inner IPs and RADIUS sessions. It is built
//! once at startup and shared by `Arc` with every path task.
//!
//! Per-session state sits behind its own mutex, never held across an await.
//! Lock order is UE session, then IKE SA, then AMF association. A registry
//! lock is never held while a session lock is acquired.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use ogs_crypt::{AesError, KdfError};
use ogs_gtp::GtpError;
use ogs_ike::{IkeError, Proposal, TrafficSelector};
use ogs_ngap::{
    Ambr, Guami, NgapError, OverloadAction, PduSessionFailedItem, PduSessionSetupResponseItem, PduSessionType,
    PlmnSupportItem, RrcEstablishmentCause, SNssai, ServedGuamiItem, UeSecurityCapabilities,
    UserLocationInformationTngf,
};
use ogs_radius::RadiusError;
use ogs_sctp::SctpError;

use crate::config::GatewaySettings;
use crate::gre::GreError;
use crate::ike_security::{ChildKeys, ChildTransforms, IkeKeys, IkeTransforms};
use crate::ngap_path::NgapTransport;
use crate::xfrm::XfrmInstaller;

// ============================================================================
// Constants
// ============================================================================

/// AMF-UE-NGAP-ID before the AMF assigns one
pub const AMF_UE_NGAP_ID_UNSPECIFIED: u64 = 0xFF_FFFF_FFFF;

/// Attempts before a random allocation gives up
pub const MAX_ALLOCATION_ATTEMPTS: usize = 1000;

/// Child SA SPIs below this value are reserved (RFC 4303)
pub const MIN_CHILD_SPI: u32 = 256;

/// Highest PDU session id
pub const MAX_PDU_SESSION_ID: u8 = 15;

/// Lifetime of an IKE SA awaiting IKE_AUTH and of a Child SA awaiting its
/// CREATE_CHILD_SA response
pub const HALF_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum TngfError {
    #[error("no half child SA for message id {0}")]
    NoHalfSa(u32),

    #[error("no proposal")]
    NoProposal,

    #[error("missing {0} payload")]
    MissingPayload(&'static str),

    #[error("IP pool exhausted")]
    IpPoolExhausted,

    #[error("{0} allocation exhausted")]
    AllocationExhausted(&'static str),

    #[error("duplicate PDU session id {0}")]
    DuplicatePduSession(u8),

    #[error("invalid PDU session id {0}")]
    InvalidPduSessionId(u8),

    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    #[error("integrity checksum mismatch")]
    ChecksumMismatch,

    #[error("crypto: {0}")]
    Crypto(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("xfrm: {0}")]
    Xfrm(String),

    #[error(transparent)]
    Aes(#[from] AesError),

    #[error(transparent)]
    Kdf(#[from] KdfError),

    #[error(transparent)]
    Ike(#[from] IkeError),

    #[error(transparent)]
    Ngap(#[from] NgapError),

    #[error(transparent)]
    Radius(#[from] RadiusError),

    #[error(transparent)]
    Gtp(#[from] GtpError),

    #[error(transparent)]
    Gre(#[from] GreError),

    #[error(transparent)]
    Sctp(#[from] SctpError),
}

impl TngfError {
    pub fn not_found(what: &'static str, id: impl std::fmt::Display) -> Self {
        TngfError::NotFound {
            what,
            id: id.to_string(),
        }
    }
}

pub type TngfResult<T> = Result<T, TngfError>;

/// Lock a session mutex, recovering the data if a holder panicked
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Registry
// ============================================================================

/// Concurrent map with atomic allocate-or-fail
#[derive(Debug)]
pub struct Registry<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Registry<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, V>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, V>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert only if the key is free
    pub fn insert_unique(&self, key: K, value: V) -> bool {
        match self.write().entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Insert or replace
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.write().insert(key, value)
    }

    /// Draw keys from `generate` until one is free, then store `make(key)`.
    /// A `None` candidate counts as a collision. Gives up after
    /// [`MAX_ALLOCATION_ATTEMPTS`].
    pub fn allocate_with<G, F>(&self, mut generate: G, make: F) -> Option<(K, V)>
    where
        G: FnMut() -> Option<K>,
        F: FnOnce(&K) -> V,
    {
        let mut entries = self.write();
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let Some(key) = generate() else {
                continue;
            };
            if let Entry::Vacant(slot) = entries.entry(key.clone()) {
                let value = make(&key);
                slot.insert(value.clone());
                return Some((key, value));
            }
        }
        None
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.read().get(key).cloned()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.write().remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn values(&self) -> Vec<V> {
        self.read().values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<K> {
        self.read().keys().cloned().collect()
    }
}

/// Monotonic id source wrapping within [min, max]
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
    min: u64,
    max: u64,
}

impl IdGenerator {
    pub fn new(min: u64, max: u64) -> Self {
        Self {
            next: AtomicU64::new(min),
            min,
            max,
        }
    }

    pub fn next(&self) -> u64 {
        let step = |current: u64| Some(if current >= self.max { self.min } else { current + 1 });
        match self.next.fetch_update(Ordering::SeqCst, Ordering::SeqCst, step) {
            Ok(id) | Err(id) => id,
        }
    }
}

// ============================================================================
// Transport handles
// ============================================================================

/// UE side of an IKE exchange: the remote address and the local port it hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IkePeer {
    pub remote: SocketAddr,
    pub local_port: u16,
}

/// IKE message queued for the UDP socket bound to `peer.local_port`
#[derive(Debug, Clone)]
pub struct IkeDatagram {
    pub peer: IkePeer,
    pub data: Bytes,
}

/// RADIUS reply queued for the authentication socket
#[derive(Debug, Clone)]
pub struct RadiusDatagram {
    pub peer: SocketAddr,
    pub data: Bytes,
}

/// Senders of the UDP writer tasks
#[derive(Debug, Clone)]
pub struct Outbound {
    pub ike: mpsc::UnboundedSender<IkeDatagram>,
    pub radius: mpsc::UnboundedSender<RadiusDatagram>,
}

/// Write half of a UE's NAS TCP connection
#[derive(Debug, Clone)]
pub struct NasConnection {
    pub id: u64,
    pub tx: mpsc::UnboundedSender<Bytes>,
}

// ============================================================================
// AMF association
// ============================================================================

pub type SharedAmf = Arc<Mutex<AmfAssociation>>;

pub struct AmfAssociation {
    pub addr: SocketAddr,
    pub transport: Arc<dyn NgapTransport>,
    pub name: Option<String>,
    pub served_guami_list: Vec<ServedGuamiItem>,
    pub relative_capacity: u8,
    pub plmn_support_list: Vec<PlmnSupportItem>,
    pub overload_action: Option<OverloadAction>,
    pub traffic_load_reduction: Option<u8>,
    /// RAN-UE-NGAP-IDs of attached UEs
    pub ues: HashSet<u32>,
}

impl AmfAssociation {
    pub fn new(addr: SocketAddr, transport: Arc<dyn NgapTransport>) -> Self {
        Self {
            addr,
            transport,
            name: None,
            served_guami_list: Vec::new(),
            relative_capacity: 0,
            plmn_support_list: Vec::new(),
            overload_action: None,
            traffic_load_reduction: None,
            ues: HashSet::new(),
        }
    }

    fn serves_guami(&self, guami: &Guami) -> bool {
        self.served_guami_list.iter().any(|item| item.guami == *guami)
    }

    fn supports_plmn(&self, plmn: &[u8; 3]) -> bool {
        self.plmn_support_list.iter().any(|item| item.plmn_identity == *plmn)
    }
}

impl std::fmt::Debug for AmfAssociation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmfAssociation")
            .field("addr", &self.addr)
            .field("name", &self.name)
            .field("ues", &self.ues.len())
            .finish()
    }
}

// ============================================================================
// IKE SA
// ============================================================================

pub type SharedIkeSa = Arc<Mutex<IkeSecurityAssociation>>;

/// IKE SA state. The EAP-5G exchange runs over RADIUS before IKE_SA_INIT,
/// so its sub-states are tracked by [`RadiusSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IkeSaState {
    InitSent,
    AuthComplete,
    Established,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct IkeSecurityAssociation {
    pub local_spi: u64,
    pub remote_spi: u64,
    pub state: IkeSaState,
    pub transforms: IkeTransforms,
    pub keys: IkeKeys,
    pub ni: Bytes,
    pub nr: Bytes,
    pub initiator_signed_octets: Vec<u8>,
    pub responder_signed_octets: Vec<u8>,
    /// Next message id expected on a request from the UE
    pub initiator_message_id: u32,
    /// Message id of the next request sent by the gateway
    pub responder_message_id: u32,
    pub peer: IkePeer,
    pub ue_behind_nat: bool,
    pub tngf_behind_nat: bool,
    pub ran_ue_ngap_id: Option<u32>,
    pub created_at: Instant,
}

impl IkeSecurityAssociation {
    pub fn nat_detected(&self) -> bool {
        self.ue_behind_nat || self.tngf_behind_nat
    }
}

// ============================================================================
// Child SA
// ============================================================================

/// NAT-T ports of an ESP-in-UDP Child SA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NatPorts {
    pub local_port: u16,
    pub peer_port: u16,
}

/// Child SA waiting for the peer's SA, keyed by request message id
#[derive(Debug, Clone)]
pub struct HalfChildSa {
    pub inbound_spi: u32,
    pub pdu_session_ids: Vec<u8>,
    pub local_nonce: Bytes,
    pub created_at: Instant,
}

#[derive(Debug, Clone)]
pub struct ChildSecurityAssociation {
    pub inbound_spi: u32,
    pub outbound_spi: u32,
    pub transforms: ChildTransforms,
    pub keys: ChildKeys,
    pub local_nonce: Bytes,
    pub local_public_address: Ipv4Addr,
    pub peer_public_address: Ipv4Addr,
    pub local_selector: TrafficSelector,
    pub peer_selector: TrafficSelector,
    pub nat: Option<NatPorts>,
    pub xfrm_if_id: u32,
    pub xfrm_ifindex: Option<u32>,
    pub pdu_session_ids: Vec<u8>,
    pub local_is_initiator: bool,
}

impl ChildSecurityAssociation {
    fn from_half(half: HalfChildSa, outbound_spi: u32, transforms: ChildTransforms) -> Self {
        Self {
            inbound_spi: half.inbound_spi,
            outbound_spi,
            transforms,
            keys: ChildKeys::default(),
            local_nonce: half.local_nonce,
            local_public_address: Ipv4Addr::UNSPECIFIED,
            peer_public_address: Ipv4Addr::UNSPECIFIED,
            local_selector: TrafficSelector::host(Ipv4Addr::UNSPECIFIED),
            peer_selector: TrafficSelector::host(Ipv4Addr::UNSPECIFIED),
            nat: None,
            xfrm_if_id: 0,
            xfrm_ifindex: None,
            pdu_session_ids: half.pdu_session_ids,
            local_is_initiator: false,
        }
    }
}

// ============================================================================
// PDU session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GtpConnectionInfo {
    pub upf_address: SocketAddr,
    pub incoming_teid: u32,
    pub outgoing_teid: u32,
}

#[derive(Debug, Clone)]
pub struct PduSession {
    pub id: u8,
    pub s_nssai: SNssai,
    pub ambr: Option<Ambr>,
    pub pdu_session_type: PduSessionType,
    pub qfis: Vec<u8>,
    pub integrity_required: bool,
    pub gtp: Option<GtpConnectionInfo>,
    pub child_sa_spi: Option<u32>,
    /// NAS PDU delivered once the Child SA is installed
    pub nas_pdu: Option<Bytes>,
}

impl PduSession {
    pub fn new(id: u8, s_nssai: SNssai) -> Self {
        Self {
            id,
            s_nssai,
            ambr: None,
            pdu_session_type: PduSessionType::default(),
            qfis: Vec::new(),
            integrity_required: false,
            gtp: None,
            child_sa_spi: None,
            nas_pdu: None,
        }
    }
}

/// NGAP procedure whose PDU session list is being set up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduSetupProcedure {
    InitialContextSetup,
    PduSessionResourceSetup,
}

/// PDU sessions queued for CREATE_CHILD_SA and the results collected so far
#[derive(Debug, Clone)]
pub struct PendingPduSetup {
    pub procedure: PduSetupProcedure,
    pub queue: VecDeque<u8>,
    pub setup_list: Vec<PduSessionSetupResponseItem>,
    pub failed_list: Vec<PduSessionFailedItem>,
}

impl PendingPduSetup {
    pub fn new(procedure: PduSetupProcedure) -> Self {
        Self {
            procedure,
            queue: VecDeque::new(),
            setup_list: Vec::new(),
            failed_list: Vec::new(),
        }
    }
}

// ============================================================================
// UE session
// ============================================================================

pub type SharedUe = Arc<Mutex<UeSession>>;

#[derive(Debug)]
pub struct UeSession {
    pub ran_ue_ngap_id: u32,
    pub amf_ue_ngap_id: u64,
    pub amf_addr: Option<SocketAddr>,
    /// AN-parameters UE identity, matched against IDi at IKE_AUTH
    pub identity: Option<Bytes>,
    pub user_location: Option<UserLocationInformationTngf>,
    pub rrc_establishment_cause: RrcEstablishmentCause,
    pub inner_ip: Option<Ipv4Addr>,
    pub ike_spi: Option<u64>,
    pub ike_peer: Option<IkePeer>,
    pub ike_established: bool,
    pub half_child_sas: HashMap<u32, HalfChildSa>,
    pub child_sas: HashMap<u32, ChildSecurityAssociation>,
    pub pdu_sessions: BTreeMap<u8, PduSession>,
    pub pdu_setup: Option<PendingPduSetup>,
    pub ktngf: Option<[u8; 32]>,
    pub ktnap: Option<[u8; 32]>,
    pub ktipsec: Option<[u8; 32]>,
    pub guami: Option<Guami>,
    pub allowed_nssai: Vec<SNssai>,
    pub security_capabilities: Option<UeSecurityCapabilities>,
    pub ue_ambr: Option<Ambr>,
    /// Calling-Station-Id of the RADIUS session that created the UE
    pub radius_session: Option<String>,
    pub nas_connection: Option<NasConnection>,
    pub cached_nas: Vec<Bytes>,
}

impl UeSession {
    pub fn new(ran_ue_ngap_id: u32) -> Self {
        Self {
            ran_ue_ngap_id,
            amf_ue_ngap_id: AMF_UE_NGAP_ID_UNSPECIFIED,
            amf_addr: None,
            identity: None,
            user_location: None,
            rrc_establishment_cause: RrcEstablishmentCause::default(),
            inner_ip: None,
            ike_spi: None,
            ike_peer: None,
            ike_established: false,
            half_child_sas: HashMap::new(),
            child_sas: HashMap::new(),
            pdu_sessions: BTreeMap::new(),
            pdu_setup: None,
            ktngf: None,
            ktnap: None,
            ktipsec: None,
            guami: None,
            allowed_nssai: Vec::new(),
            security_capabilities: None,
            ue_ambr: None,
            radius_session: None,
            nas_connection: None,
            cached_nas: Vec::new(),
        }
    }

    /// Register a new PDU session; ids run 1..=15 and must be unused
    pub fn create_pdu_session(&mut self, id: u8, s_nssai: SNssai) -> TngfResult<&mut PduSession> {
        if id == 0 || id > MAX_PDU_SESSION_ID {
            return Err(TngfError::InvalidPduSessionId(id));
        }
        match self.pdu_sessions.entry(id) {
            std::collections::btree_map::Entry::Occupied(_) => Err(TngfError::DuplicatePduSession(id)),
            std::collections::btree_map::Entry::Vacant(slot) => Ok(slot.insert(PduSession::new(id, s_nssai))),
        }
    }

    /// Write a NAS PDU to the TCP connection, caching it while none is open
    pub fn deliver_nas(&mut self, nas: Bytes) {
        let Some(connection) = &self.nas_connection else {
            self.cached_nas.push(nas);
            return;
        };
        if let Err(mpsc::error::SendError(nas)) = connection.tx.send(nas) {
            log::debug!("[ran_ue_ngap_id={}] NAS connection closed, caching", self.ran_ue_ngap_id);
            self.nas_connection = None;
            self.cached_nas.push(nas);
        }
    }

    /// Replace the NAS connection and flush the cache into it
    pub fn attach_nas_connection(&mut self, connection: NasConnection) {
        let cached = std::mem::take(&mut self.cached_nas);
        self.nas_connection = Some(connection);
        for nas in cached {
            self.deliver_nas(nas);
        }
    }

    /// Clear the connection if it is still the one identified by `id`
    pub fn detach_nas_connection(&mut self, id: u64) {
        if self.nas_connection.as_ref().is_some_and(|c| c.id == id) {
            self.nas_connection = None;
        }
    }

    /// Child SA carrying user plane on the xfrm interface `ifindex`
    pub fn child_sa_for_ifindex(&self, ifindex: u32) -> Option<&ChildSecurityAssociation> {
        self.child_sas
            .values()
            .find(|child| child.xfrm_ifindex == Some(ifindex) && !child.pdu_session_ids.is_empty())
    }
}

// ============================================================================
// RADIUS session
// ============================================================================

pub type SharedRadiusSession = Arc<Mutex<RadiusSession>>;

/// EAP-5G progress of a RADIUS session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eap5gState {
    Start,
    Nas,
    InitialContextSetup,
}

#[derive(Debug, Clone)]
pub struct RadiusSession {
    pub calling_station_id: String,
    pub state: Eap5gState,
    pub peer: SocketAddr,
    /// Identifier and authenticator of the last Access-Request, answered by
    /// the next downlink message
    pub identifier: u8,
    pub request_authenticator: [u8; 16],
    pub eap_identifier: u8,
    pub user_name: Option<Bytes>,
    pub ran_ue_ngap_id: Option<u32>,
}

// ============================================================================
// XFRM interfaces
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfrmInterface {
    pub name: String,
    pub if_id: u32,
    pub ifindex: u32,
}

// ============================================================================
// Gateway context
// ============================================================================

pub struct GatewayContext {
    pub settings: GatewaySettings,
    pub xfrm: Arc<dyn XfrmInstaller>,
    outbound: Outbound,

    ues: Registry<u32, SharedUe>,
    ran_ue_ids: IdGenerator,
    amfs: Registry<SocketAddr, SharedAmf>,
    /// NG Setup "reinitiation available" flag per AMF address
    ng_setup_reinitiation: Registry<SocketAddr, bool>,
    ike_sas: Registry<u64, SharedIkeSa>,
    child_spis: Registry<u32, u32>,
    teids: Registry<u32, u32>,
    teid_generator: IdGenerator,
    inner_ips: Registry<Ipv4Addr, u32>,
    radius_sessions: Registry<String, SharedRadiusSession>,
    xfrm_interfaces: Registry<u32, XfrmInterface>,
    xfrm_if_offset: AtomicU32,
    nas_connection_ids: IdGenerator,
}

impl GatewayContext {
    pub fn new(settings: GatewaySettings, xfrm: Arc<dyn XfrmInstaller>, outbound: Outbound) -> Self {
        Self {
            settings,
            xfrm,
            outbound,
            ues: Registry::new(),
            ran_ue_ids: IdGenerator::new(0, u64::from(u32::MAX)),
            amfs: Registry::new(),
            ng_setup_reinitiation: Registry::new(),
            ike_sas: Registry::new(),
            child_spis: Registry::new(),
            teids: Registry::new(),
            teid_generator: IdGenerator::new(1, u64::from(u32::MAX)),
            inner_ips: Registry::new(),
            radius_sessions: Registry::new(),
            xfrm_interfaces: Registry::new(),
            xfrm_if_offset: AtomicU32::new(0),
            nas_connection_ids: IdGenerator::new(1, u64::MAX),
        }
    }

    // ------------------------------------------------------------------------
    // Outbound datagrams
    // ------------------------------------------------------------------------

    pub fn send_ike(&self, peer: IkePeer, data: Bytes) {
        if self.outbound.ike.send(IkeDatagram { peer, data }).is_err() {
            log::error!("[{}] IKE writer is closed, message dropped", peer.remote);
        }
    }

    pub fn send_radius(&self, peer: SocketAddr, data: Bytes) {
        if self.outbound.radius.send(RadiusDatagram { peer, data }).is_err() {
            log::error!("[{}] RADIUS writer is closed, message dropped", peer);
        }
    }

    // ------------------------------------------------------------------------
    // UE
    // ------------------------------------------------------------------------

    pub fn new_ue(&self) -> TngfResult<SharedUe> {
        let (id, ue) = self
            .ues
            .allocate_with(
                || u32::try_from(self.ran_ue_ids.next()).ok(),
                |id| Arc::new(Mutex::new(UeSession::new(*id))),
            )
            .ok_or(TngfError::AllocationExhausted("RAN-UE-NGAP-ID"))?;
        log::debug!("[ran_ue_ngap_id={}] UE added", id);
        Ok(ue)
    }

    pub fn ue_by_ran_id(&self, ran_ue_ngap_id: u32) -> Option<SharedUe> {
        self.ues.get(&ran_ue_ngap_id)
    }

    pub fn ue_by_amf_ue_id(&self, amf_ue_ngap_id: u64) -> Option<SharedUe> {
        self.ues
            .values()
            .into_iter()
            .find(|ue| lock(ue).amf_ue_ngap_id == amf_ue_ngap_id)
    }

    pub fn ue_by_inner_ip(&self, ip: Ipv4Addr) -> Option<SharedUe> {
        self.inner_ips.get(&ip).and_then(|id| self.ues.get(&id))
    }

    pub fn ue_by_teid(&self, teid: u32) -> Option<SharedUe> {
        self.teids.get(&teid).and_then(|id| self.ues.get(&id))
    }

    pub fn ue_by_ike_spi(&self, spi: u64) -> Option<SharedUe> {
        let sa = self.ike_sas.get(&spi)?;
        let ran_ue_ngap_id = lock(&sa).ran_ue_ngap_id?;
        self.ues.get(&ran_ue_ngap_id)
    }

    /// UE whose AN-parameters identity equals `identity`
    pub fn ue_by_identity(&self, identity: &[u8]) -> Option<SharedUe> {
        self.ues
            .values()
            .into_iter()
            .find(|ue| lock(ue).identity.as_deref() == Some(identity))
    }

    pub fn ues(&self) -> Vec<SharedUe> {
        self.ues.values()
    }

    pub fn ue_count(&self) -> usize {
        self.ues.len()
    }

    /// Release everything the UE holds. A second call is a no-op.
    pub fn remove_ue(&self, ran_ue_ngap_id: u32) -> bool {
        let Some(shared) = self.ues.remove(&ran_ue_ngap_id) else {
            return false;
        };
        let mut ue = lock(&shared);

        if let Some(ip) = ue.inner_ip.take() {
            self.inner_ips.remove(&ip);
        }
        if let Some(spi) = ue.ike_spi.take() {
            if let Some(sa) = self.ike_sas.remove(&spi) {
                lock(&sa).state = IkeSaState::Deleted;
            }
        }
        let teids: Vec<u32> = ue
            .pdu_sessions
            .values()
            .filter_map(|session| session.gtp.map(|gtp| gtp.incoming_teid))
            .collect();
        for teid in teids {
            self.release_teid(teid);
        }
        for spi in ue.child_sas.keys().chain(ue.half_child_sas.values().map(|half| &half.inbound_spi)) {
            self.child_spis.remove(spi);
        }
        ue.child_sas.clear();
        ue.half_child_sas.clear();
        ue.pdu_sessions.clear();

        if let Some(addr) = ue.amf_addr.take() {
            if let Some(amf) = self.amfs.get(&addr) {
                lock(&amf).ues.remove(&ran_ue_ngap_id);
            }
        }
        // A restarted EAP session under the same station belongs to another UE
        if let Some(key) = ue.radius_session.take() {
            let owned = self
                .radius_sessions
                .get(&key)
                .is_some_and(|session| lock(&session).ran_ue_ngap_id == Some(ran_ue_ngap_id));
            if owned {
                self.radius_sessions.remove(&key);
            }
        }
        ue.nas_connection = None;
        ue.ike_established = false;

        log::debug!("[ran_ue_ngap_id={}] UE removed", ran_ue_ngap_id);
        true
    }

    // ------------------------------------------------------------------------
    // AMF
    // ------------------------------------------------------------------------

    pub fn new_amf(&self, addr: SocketAddr, transport: Arc<dyn NgapTransport>) -> SharedAmf {
        let amf = Arc::new(Mutex::new(AmfAssociation::new(addr, transport)));
        if self.amfs.insert(addr, amf.clone()).is_some() {
            log::warn!("[{}] AMF association replaced", addr);
        }
        self.ng_setup_reinitiation.insert_unique(addr, true);
        log::debug!("[{}] AMF added", addr);
        amf
    }

    pub fn amf_by_addr(&self, addr: &SocketAddr) -> Option<SharedAmf> {
        self.amfs.get(addr)
    }

    pub fn amfs(&self) -> Vec<SharedAmf> {
        self.amfs.values()
    }

    /// Remove the association and detach its UEs
    pub fn remove_amf(&self, addr: &SocketAddr) -> bool {
        let Some(amf) = self.amfs.remove(addr) else {
            return false;
        };
        let attached: Vec<u32> = lock(&amf).ues.drain().collect();
        for ran_ue_ngap_id in attached {
            if let Some(ue) = self.ues.get(&ran_ue_ngap_id) {
                let mut ue = lock(&ue);
                if ue.amf_addr == Some(*addr) {
                    ue.amf_addr = None;
                }
            }
        }
        log::debug!("[{}] AMF removed", addr);
        true
    }

    /// RAN-UE-NGAP-IDs attached to an AMF
    pub fn ues_of_amf(&self, addr: &SocketAddr) -> Vec<u32> {
        self.amfs
            .get(addr)
            .map(|amf| lock(&amf).ues.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Link a UE to its AMF on both sides. The caller holds the UE lock.
    pub fn attach_ue_to_amf(&self, ue: &mut UeSession, addr: SocketAddr) -> TngfResult<()> {
        let amf = self.amfs.get(&addr).ok_or_else(|| TngfError::not_found("AMF", addr))?;
        lock(&amf).ues.insert(ue.ran_ue_ngap_id);
        ue.amf_addr = Some(addr);
        Ok(())
    }

    /// AMF serving `guami`, else one supporting `plmn`
    pub fn select_amf(&self, guami: Option<&Guami>, plmn: Option<&[u8; 3]>) -> Option<SharedAmf> {
        let amfs = self.amfs.values();
        if let Some(guami) = guami {
            if let Some(amf) = amfs.iter().find(|amf| lock(amf).serves_guami(guami)) {
                return Some(amf.clone());
            }
        }
        let plmn = plmn?;
        amfs.iter().find(|amf| lock(amf).supports_plmn(plmn)).cloned()
    }

    pub fn ng_setup_reinitiation_available(&self, addr: &SocketAddr) -> bool {
        self.ng_setup_reinitiation.get(addr).unwrap_or(true)
    }

    pub fn set_ng_setup_reinitiation_available(&self, addr: SocketAddr, available: bool) {
        self.ng_setup_reinitiation.insert(addr, available);
    }

    // ------------------------------------------------------------------------
    // IKE SA
    // ------------------------------------------------------------------------

    /// Register an IKE SA under a fresh random local SPI
    pub fn new_ike_sa<F>(&self, make: F) -> TngfResult<(u64, SharedIkeSa)>
    where
        F: FnOnce(u64) -> IkeSecurityAssociation,
    {
        let (spi, sa) = self
            .ike_sas
            .allocate_with(
                || Some(rand::random::<u64>()).filter(|spi| *spi != 0),
                |spi| Arc::new(Mutex::new(make(*spi))),
            )
            .ok_or(TngfError::AllocationExhausted("IKE SPI"))?;
        log::debug!("[spi={:016x}] IKE SA added", spi);
        Ok((spi, sa))
    }

    pub fn ike_sa_by_spi(&self, spi: u64) -> Option<SharedIkeSa> {
        self.ike_sas.get(&spi)
    }

    /// Remove the IKE SAs that waited for IKE_AUTH longer than `timeout`.
    /// Returns their local SPIs.
    pub fn expire_ike_sas(&self, now: Instant, timeout: Duration) -> Vec<u64> {
        let expired: Vec<u64> = self
            .ike_sas
            .values()
            .into_iter()
            .filter_map(|sa| {
                let sa = lock(&sa);
                let stale = now.saturating_duration_since(sa.created_at) >= timeout;
                (sa.state == IkeSaState::InitSent && stale).then_some(sa.local_spi)
            })
            .collect();
        expired.into_iter().filter(|spi| self.remove_ike_sa(*spi)).collect()
    }

    pub fn remove_ike_sa(&self, spi: u64) -> bool {
        match self.ike_sas.remove(&spi) {
            Some(sa) => {
                lock(&sa).state = IkeSaState::Deleted;
                log::debug!("[spi={:016x}] IKE SA removed", spi);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Child SA
    // ------------------------------------------------------------------------

    /// Reserve a random inbound SPI for the UE
    pub fn allocate_child_spi(&self, ran_ue_ngap_id: u32) -> TngfResult<u32> {
        self.child_spis
            .allocate_with(
                || Some(rand::random::<u32>()).filter(|spi| *spi >= MIN_CHILD_SPI),
                |_| ran_ue_ngap_id,
            )
            .map(|(spi, _)| spi)
            .ok_or(TngfError::AllocationExhausted("child SA SPI"))
    }

    /// Record a Child SA whose peer half is still unknown
    pub fn create_half_child_sa(
        &self,
        ue: &mut UeSession,
        message_id: u32,
        inbound_spi: u32,
        pdu_session_ids: Vec<u8>,
        local_nonce: Bytes,
    ) {
        if !self.child_spis.contains(&inbound_spi) {
            self.child_spis.insert(inbound_spi, ue.ran_ue_ngap_id);
        }
        ue.half_child_sas.insert(
            message_id,
            HalfChildSa {
                inbound_spi,
                pdu_session_ids,
                local_nonce,
                created_at: Instant::now(),
            },
        );
    }

    /// Drop the half Child SAs older than `timeout`, releasing their SPIs
    pub fn take_expired_half_child_sas(&self, ue: &mut UeSession, now: Instant, timeout: Duration) -> Vec<HalfChildSa> {
        let expired: Vec<u32> = ue
            .half_child_sas
            .iter()
            .filter(|(_, half)| now.saturating_duration_since(half.created_at) >= timeout)
            .map(|(message_id, _)| *message_id)
            .collect();
        let mut removed = Vec::with_capacity(expired.len());
        for message_id in expired {
            if let Some(half) = ue.half_child_sas.remove(&message_id) {
                self.child_spis.remove(&half.inbound_spi);
                log::debug!(
                    "[ran_ue_ngap_id={}] Half Child SA {:08x} expired (message id {})",
                    ue.ran_ue_ngap_id,
                    half.inbound_spi,
                    message_id
                );
                removed.push(half);
            }
        }
        removed
    }

    /// Complete the half SA of `message_id` with the peer SPI and the first
    /// acceptable proposal
    pub fn complete_child_sa<'a>(
        &self,
        ue: &'a mut UeSession,
        message_id: u32,
        outbound_spi: u32,
        proposals: &[Proposal],
    ) -> TngfResult<&'a mut ChildSecurityAssociation> {
        if !ue.half_child_sas.contains_key(&message_id) {
            return Err(TngfError::NoHalfSa(message_id));
        }
        let transforms = proposals
            .first()
            .and_then(ChildTransforms::from_proposal)
            .ok_or(TngfError::NoProposal)?;
        let half = ue
            .half_child_sas
            .remove(&message_id)
            .ok_or(TngfError::NoHalfSa(message_id))?;

        let child = ChildSecurityAssociation::from_half(half, outbound_spi, transforms);
        let inbound_spi = child.inbound_spi;
        log::debug!(
            "[ran_ue_ngap_id={}] Child SA completed (in={:08x}, out={:08x})",
            ue.ran_ue_ngap_id,
            inbound_spi,
            outbound_spi
        );
        Ok(ue.child_sas.entry(inbound_spi).or_insert(child))
    }

    pub fn child_sa_by_spi(&self, inbound_spi: u32) -> Option<SharedUe> {
        self.child_spis.get(&inbound_spi).and_then(|id| self.ues.get(&id))
    }

    pub fn remove_child_sa(&self, ue: &mut UeSession, inbound_spi: u32) -> Option<ChildSecurityAssociation> {
        self.child_spis.remove(&inbound_spi);
        ue.child_sas.remove(&inbound_spi)
    }

    // ------------------------------------------------------------------------
    // PDU session resources
    // ------------------------------------------------------------------------

    pub fn allocate_teid(&self, ran_ue_ngap_id: u32) -> TngfResult<u32> {
        self.teids
            .allocate_with(
                || u32::try_from(self.teid_generator.next()).ok(),
                |_| ran_ue_ngap_id,
            )
            .map(|(teid, _)| teid)
            .ok_or(TngfError::AllocationExhausted("TEID"))
    }

    pub fn release_teid(&self, teid: u32) -> bool {
        self.teids.remove(&teid).is_some()
    }

    /// Drop a PDU session, its TEID and its place in Child SA lists
    pub fn release_pdu_session(&self, ue: &mut UeSession, id: u8) -> Option<PduSession> {
        let session = ue.pdu_sessions.remove(&id)?;
        if let Some(gtp) = session.gtp {
            self.release_teid(gtp.incoming_teid);
        }
        for child in ue.child_sas.values_mut() {
            child.pdu_session_ids.retain(|pdu| *pdu != id);
        }
        Some(session)
    }

    // ------------------------------------------------------------------------
    // Inner IP
    // ------------------------------------------------------------------------

    /// Random host address of the UE subnet, never the network, broadcast or
    /// gateway address. A nearly full pool falls back to the lowest free host.
    pub fn allocate_inner_ip(&self, ran_ue_ngap_id: u32) -> TngfResult<Ipv4Addr> {
        let subnet = self.settings.ue_subnet;
        let gateway = self.settings.ipsec_gateway_address;
        let host_mask = ((1u64 << subnet.host_bits()) - 1) as u32;
        let network = u32::from(subnet.network);
        let broadcast = subnet.broadcast();
        let usable = |ip: &Ipv4Addr| *ip != subnet.network && *ip != broadcast && *ip != gateway;

        let drawn = self.inner_ips.allocate_with(
            || Some(Ipv4Addr::from(network | (rand::random::<u32>() & host_mask))).filter(usable),
            |_| ran_ue_ngap_id,
        );
        if let Some((ip, _)) = drawn {
            return Ok(ip);
        }
        (1..host_mask)
            .map(|host| Ipv4Addr::from(network | host))
            .filter(usable)
            .find(|ip| self.inner_ips.insert_unique(*ip, ran_ue_ngap_id))
            .ok_or(TngfError::IpPoolExhausted)
    }

    pub fn release_inner_ip(&self, ip: Ipv4Addr) -> bool {
        self.inner_ips.remove(&ip).is_some()
    }

    // ------------------------------------------------------------------------
    // RADIUS session
    // ------------------------------------------------------------------------

    pub fn radius_session(&self, calling_station_id: &str) -> Option<SharedRadiusSession> {
        self.radius_sessions.get(&calling_station_id.to_string())
    }

    /// Start or restart the session of a Calling-Station-Id
    pub fn new_radius_session(&self, calling_station_id: &str, peer: SocketAddr) -> SharedRadiusSession {
        let session = Arc::new(Mutex::new(RadiusSession {
            calling_station_id: calling_station_id.to_string(),
            state: Eap5gState::Start,
            peer,
            identifier: 0,
            request_authenticator: [0; 16],
            eap_identifier: 0,
            user_name: None,
            ran_ue_ngap_id: None,
        }));
        self.radius_sessions.insert(calling_station_id.to_string(), session.clone());
        session
    }

    pub fn remove_radius_session(&self, calling_station_id: &str) -> bool {
        self.radius_sessions.remove(&calling_station_id.to_string()).is_some()
    }

    // ------------------------------------------------------------------------
    // XFRM interfaces and NAS connections
    // ------------------------------------------------------------------------

    /// Interface id for a per-session xfrm interface: base + offset
    pub fn next_xfrm_interface_id(&self) -> u32 {
        let offset = self.xfrm_if_offset.fetch_add(1, Ordering::SeqCst) + 1;
        self.settings.xfrm_interface_id.wrapping_add(offset)
    }

    pub fn register_xfrm_interface(&self, interface: XfrmInterface) {
        self.xfrm_interfaces.insert(interface.if_id, interface);
    }

    pub fn xfrm_interface(&self, if_id: u32) -> Option<XfrmInterface> {
        self.xfrm_interfaces.get(&if_id)
    }

    pub fn xfrm_interfaces(&self) -> Vec<XfrmInterface> {
        self.xfrm_interfaces.values()
    }

    pub fn next_nas_connection_id(&self) -> u64 {
        self.nas_connection_ids.next()
    }

    /// Number of live values in each allocator, for teardown checks
    pub fn allocation_counts(&self) -> AllocationCounts {
        AllocationCounts {
            ues: self.ues.len(),
            ike_sas: self.ike_sas.len(),
            child_spis: self.child_spis.len(),
            teids: self.teids.len(),
            inner_ips: self.inner_ips.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationCounts {
    pub ues: usize,
    pub ike_sas: usize,
    pub child_spis: usize,
    pub teids: usize,
    pub inner_ips: usize,
}
