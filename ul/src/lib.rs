//! Types and methods for the DICOM upper layer protocol:
//! the association PDU codec,
//! acceptor and requestor association state machines,
//! and presentation data fragmentation.
pub mod association;
pub mod pdu;

pub use association::client::{ClientAssociation, ClientAssociationOptions};
pub use association::server::{ServerAssociation, ServerAssociationOptions};
pub use pdu::Pdu;

/// The implementation class UID published in association negotiation.
pub use ferrodicom_core::uids::IMPLEMENTATION_CLASS_UID;
/// The implementation version name published in association negotiation.
pub use ferrodicom_core::uids::IMPLEMENTATION_VERSION_NAME;
