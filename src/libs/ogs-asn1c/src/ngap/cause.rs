//! NGAP Cause Types
//!
//! Cause types from NGAP-IEs (3GPP TS 38.413)

use crate::per::{AperDecode, AperDecoder, AperEncode, AperEncoder, Constraint, PerError, PerResult};

/// Declares an ENUMERATED cause group with an extensible root of `$root` values.
/// Values past the root are encoded in the extension range.
macro_rules! cause_enum {
    ($(#[$meta:meta])* $name:ident, root = $root:expr, { $($variant:ident = $value:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value,)+
        }

        impl $name {
            pub const CONSTRAINT: Constraint = Constraint::extensible(0, $root - 1);

            pub fn from_value(value: i64) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl AperEncode for $name {
            fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
                encoder.encode_enumerated(*self as i64, &Self::CONSTRAINT)
            }
        }

        impl AperDecode for $name {
            fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
                let value = decoder.decode_enumerated(&Self::CONSTRAINT)?;
                Self::from_value(value).ok_or_else(|| {
                    PerError::DecodeError(format!(
                        concat!("Unknown ", stringify!($name), " value: {}"),
                        value
                    ))
                })
            }
        }
    };
}

cause_enum! {
    /// CauseRadioNetwork ::= ENUMERATED { unspecified, ..., release-due-to-cn-detected-mobility, ... }
    CauseRadioNetwork, root = 45, {
        Unspecified = 0,
        TxnrelocoverallExpiry = 1,
        SuccessfulHandover = 2,
        ReleaseDueToNgranGeneratedReason = 3,
        ReleaseDueTo5gcGeneratedReason = 4,
        HandoverCancelled = 5,
        PartialHandover = 6,
        HoFailureInTarget5gcNgranNodeOrTargetSystem = 7,
        HoTargetNotAllowed = 8,
        TngrelocoverallExpiry = 9,
        TngrelocprepExpiry = 10,
        CellNotAvailable = 11,
        UnknownTargetId = 12,
        NoRadioResourcesAvailableInTargetCell = 13,
        UnknownLocalUeNgapId = 14,
        InconsistentRemoteUeNgapId = 15,
        HandoverDesirableForRadioReason = 16,
        TimeCriticalHandover = 17,
        ResourceOptimisationHandover = 18,
        ReduceLoadInServingCell = 19,
        UserInactivity = 20,
        RadioConnectionWithUeLost = 21,
        RadioResourcesNotAvailable = 22,
        InvalidQosCombination = 23,
        FailureInRadioInterfaceProcedure = 24,
        InteractionWithOtherProcedure = 25,
        UnknownPduSessionId = 26,
        UnknownQosFlowId = 27,
        MultiplePduSessionIdInstances = 28,
        MultipleQosFlowIdInstances = 29,
        EncryptionAndOrIntegrityProtectionAlgorithmsNotSupported = 30,
        NgIntraSystemHandoverTriggered = 31,
        NgInterSystemHandoverTriggered = 32,
        XnHandoverTriggered = 33,
        NotSupported5qiValue = 34,
        UeContextTransfer = 35,
        ImsVoiceEpsFallbackOrRatFallbackTriggered = 36,
        UpIntegrityProtectionNotPossible = 37,
        UpConfidentialityProtectionNotPossible = 38,
        SliceNotSupported = 39,
        UeInRrcInactiveStateNotReachable = 40,
        Redirection = 41,
        ResourcesNotAvailableForTheSlice = 42,
        UeMaxIntegrityProtectedDataRateReason = 43,
        ReleaseDueToCnDetectedMobility = 44,
        N26InterfaceNotAvailable = 45,
        ReleaseDueToPreEmption = 46,
    }
}

cause_enum! {
    /// CauseTransport ::= ENUMERATED { transport-resource-unavailable, unspecified, ... }
    CauseTransport, root = 2, {
        TransportResourceUnavailable = 0,
        Unspecified = 1,
    }
}

cause_enum! {
    /// CauseNas ::= ENUMERATED { normal-release, authentication-failure, deregister, unspecified, ... }
    CauseNas, root = 4, {
        NormalRelease = 0,
        AuthenticationFailure = 1,
        Deregister = 2,
        Unspecified = 3,
    }
}

cause_enum! {
    /// CauseProtocol ::= ENUMERATED { transfer-syntax-error, ..., unspecified, ... }
    CauseProtocol, root = 7, {
        TransferSyntaxError = 0,
        AbstractSyntaxErrorReject = 1,
        AbstractSyntaxErrorIgnoreAndNotify = 2,
        MessageNotCompatibleWithReceiverState = 3,
        SemanticError = 4,
        AbstractSyntaxErrorFalselyConstructedMessage = 5,
        Unspecified = 6,
    }
}

cause_enum! {
    /// CauseMisc ::= ENUMERATED { control-processing-overload, ..., unspecified, ... }
    CauseMisc, root = 6, {
        ControlProcessingOverload = 0,
        NotEnoughUserPlaneProcessingResources = 1,
        HardwareFailure = 2,
        OmIntervention = 3,
        UnknownPlmnOrSnpn = 4,
        Unspecified = 5,
    }
}

/// Cause ::= CHOICE { radioNetwork, transport, nas, protocol, misc, choice-Extensions }
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    RadioNetwork(CauseRadioNetwork),
    Transport(CauseTransport),
    Nas(CauseNas),
    Protocol(CauseProtocol),
    Misc(CauseMisc),
}

impl Cause {
    // Five groups plus choice-Extensions, no extension marker
    pub const NUM_ALTERNATIVES: usize = 6;
}

impl AperEncode for Cause {
    fn encode_aper(&self, encoder: &mut AperEncoder) -> PerResult<()> {
        match self {
            Cause::RadioNetwork(v) => {
                encoder.encode_choice_index(0, Self::NUM_ALTERNATIVES, false)?;
                v.encode_aper(encoder)
            }
            Cause::Transport(v) => {
                encoder.encode_choice_index(1, Self::NUM_ALTERNATIVES, false)?;
                v.encode_aper(encoder)
            }
            Cause::Nas(v) => {
                encoder.encode_choice_index(2, Self::NUM_ALTERNATIVES, false)?;
                v.encode_aper(encoder)
            }
            Cause::Protocol(v) => {
                encoder.encode_choice_index(3, Self::NUM_ALTERNATIVES, false)?;
                v.encode_aper(encoder)
            }
            Cause::Misc(v) => {
                encoder.encode_choice_index(4, Self::NUM_ALTERNATIVES, false)?;
                v.encode_aper(encoder)
            }
        }
    }
}

impl AperDecode for Cause {
    fn decode_aper(decoder: &mut AperDecoder) -> PerResult<Self> {
        match decoder.decode_choice_index(Self::NUM_ALTERNATIVES, false)? {
            0 => Ok(Cause::RadioNetwork(CauseRadioNetwork::decode_aper(decoder)?)),
            1 => Ok(Cause::Transport(CauseTransport::decode_aper(decoder)?)),
            2 => Ok(Cause::Nas(CauseNas::decode_aper(decoder)?)),
            3 => Ok(Cause::Protocol(CauseProtocol::decode_aper(decoder)?)),
            4 => Ok(Cause::Misc(CauseMisc::decode_aper(decoder)?)),
            index => Err(PerError::InvalidChoiceIndex {
                index,
                max: Self::NUM_ALTERNATIVES - 2,
            }),
        }
    }
}
