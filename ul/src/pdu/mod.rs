//! The protocol data units of the association layer.
//!
//! Every PDU is framed as
//! `type (1) | reserved (1) | length (4, big endian) | body`.
//! Variable items inside association PDUs use the same style
//! with a 16-bit length.
pub mod reader;
pub mod writer;

pub use reader::read_pdu;
pub use writer::write_pdu;

/// The default maximum PDU size
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU size allowed by the protocol
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The maximum PDU size accepted by this implementation
pub const MAXIMUM_PDU_SIZE: u32 = 131_072;

/// The length of the PDU header:
/// type, reserved byte, and 32-bit length.
pub const PDU_HEADER_SIZE: u32 = 6;

/// A presentation context as proposed in an A-ASSOCIATE-RQ.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PresentationContextProposed {
    /// the context identifier, an odd number between 1 and 255
    pub id: u8,
    /// the abstract syntax (SOP class) UID
    pub abstract_syntax: String,
    /// the transfer syntax UIDs offered for this context
    pub transfer_syntaxes: Vec<String>,
}

/// A presentation context as answered in an A-ASSOCIATE-AC.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PresentationContextResult {
    pub id: u8,
    pub reason: PresentationContextResultReason,
    /// the single accepted transfer syntax
    /// (not significant unless the reason is acceptance)
    pub transfer_syntax: String,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PresentationContextResultReason::Acceptance),
            1 => Some(PresentationContextResultReason::UserRejection),
            2 => Some(PresentationContextResultReason::NoReason),
            3 => Some(PresentationContextResultReason::AbstractSyntaxNotSupported),
            4 => Some(PresentationContextResultReason::TransferSyntaxesNotSupported),
            _ => None,
        }
    }
}

/// The rejection result of an A-ASSOCIATE-RJ.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRjResult {
    Permanent,
    Transient,
}

impl AssociationRjResult {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AssociationRjResult::Permanent),
            2 => Some(AssociationRjResult::Transient),
            _ => None,
        }
    }
}

/// The rejection source and reason of an A-ASSOCIATE-RJ.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AssociationRjSource {
    ServiceUser(ServiceUserReason),
    ServiceProviderAcse(ServiceProviderAcseReason),
    ServiceProviderPresentation(ServiceProviderPresentationReason),
}

impl AssociationRjSource {
    fn from_u8(source: u8, reason: u8) -> Option<Self> {
        match source {
            1 => Some(AssociationRjSource::ServiceUser(match reason {
                1 => ServiceUserReason::NoReasonGiven,
                2 => ServiceUserReason::ApplicationContextNameNotSupported,
                3 => ServiceUserReason::CallingAeTitleNotRecognized,
                7 => ServiceUserReason::CalledAeTitleNotRecognized,
                other => ServiceUserReason::Reserved(other),
            })),
            2 => Some(AssociationRjSource::ServiceProviderAcse(match reason {
                2 => ServiceProviderAcseReason::ProtocolVersionNotSupported,
                _ => ServiceProviderAcseReason::NoReasonGiven,
            })),
            3 => Some(AssociationRjSource::ServiceProviderPresentation(
                match reason {
                    1 => ServiceProviderPresentationReason::TemporaryCongestion,
                    2 => ServiceProviderPresentationReason::LocalLimitExceeded,
                    other => ServiceProviderPresentationReason::Reserved(other),
                },
            )),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAeTitleNotRecognized,
    CalledAeTitleNotRecognized,
    Reserved(u8),
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ServiceProviderAcseReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

/// The source of an A-ABORT.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AbortSource {
    ServiceUser,
    ServiceProvider(AbortServiceProviderReason),
}

impl AbortSource {
    fn from_u8(source: u8, reason: u8) -> Option<Self> {
        match source {
            0 => Some(AbortSource::ServiceUser),
            2 => Some(AbortSource::ServiceProvider(match reason {
                1 => AbortServiceProviderReason::UnrecognizedPdu,
                2 => AbortServiceProviderReason::UnexpectedPdu,
                4 => AbortServiceProviderReason::UnrecognizedPduParameter,
                5 => AbortServiceProviderReason::UnexpectedPduParameter,
                6 => AbortServiceProviderReason::InvalidPduParameter,
                _ => AbortServiceProviderReason::ReasonNotSpecified,
            })),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AbortServiceProviderReason {
    ReasonNotSpecified,
    UnrecognizedPdu,
    UnexpectedPdu,
    UnrecognizedPduParameter,
    UnexpectedPduParameter,
    InvalidPduParameter,
}

/// One presentation data value fragment inside a P-DATA-TF.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PDataValue {
    pub presentation_context_id: u8,
    pub value_type: PDataValueType,
    pub is_last: bool,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum PDataValueType {
    Command,
    Data,
}

/// A user information sub-item of an association PDU.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum UserVariableItem {
    Unknown(u8, Vec<u8>),
    MaxLength(u32),
    ImplementationClassUid(String),
    ImplementationVersionName(String),
}

/// The body of an A-ASSOCIATE-RQ.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct AssociationRq {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextProposed>,
    pub user_variables: Vec<UserVariableItem>,
}

/// The body of an A-ASSOCIATE-AC.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct AssociationAc {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextResult>,
    pub user_variables: Vec<UserVariableItem>,
}

/// The body of an A-ASSOCIATE-RJ.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct AssociationRj {
    pub result: AssociationRjResult,
    pub source: AssociationRjSource,
}

/// A protocol data unit of the association layer.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Pdu {
    AssociationRq(AssociationRq),
    AssociationAc(AssociationAc),
    AssociationRj(AssociationRj),
    PData { data: Vec<PDataValue> },
    ReleaseRq,
    ReleaseRp,
    AbortRq { source: AbortSource },
    Unknown { pdu_type: u8, data: Vec<u8> },
}

impl Pdu {
    /// A one-line description for the session log.
    pub fn short_description(&self) -> &'static str {
        match self {
            Pdu::AssociationRq { .. } => "A-ASSOCIATE-RQ",
            Pdu::AssociationAc { .. } => "A-ASSOCIATE-AC",
            Pdu::AssociationRj { .. } => "A-ASSOCIATE-RJ",
            Pdu::PData { .. } => "P-DATA-TF",
            Pdu::ReleaseRq => "A-RELEASE-RQ",
            Pdu::ReleaseRp => "A-RELEASE-RP",
            Pdu::AbortRq { .. } => "A-ABORT",
            Pdu::Unknown { .. } => "unknown PDU",
        }
    }
}
