//! Association state machines for both sides of the upper layer protocol:
//! the acceptor ([`server`]) and the requestor ([`client`]).
pub mod client;
pub mod pdata;
pub mod server;

use snafu::Snafu;

use crate::pdu::{AssociationRj, Pdu, PresentationContextResultReason};

/// The lifecycle state of an association.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssociationState {
    /// transport accepted, waiting for the association request
    Idle,
    /// request accepted, negotiated contexts are fixed
    Associated,
    /// presentation data transfer in progress for some message
    Receiving,
    /// release requested, flushing
    Releasing,
    /// terminal
    Aborted,
}

/// A presentation context after negotiation.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PresentationContextNegotiated {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntax: String,
    pub reason: PresentationContextResultReason,
}

impl PresentationContextNegotiated {
    /// Whether the context was accepted by the acceptor.
    pub fn is_accepted(&self) -> bool {
        self.reason == PresentationContextResultReason::Acceptance
    }
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// at least one abstract syntax is required to negotiate
    MissingAbstractSyntax,

    /// could not connect to peer
    Connect { source: std::io::Error },

    /// could not configure the socket
    ConfigureSocket { source: std::io::Error },

    /// failed to send PDU
    Send {
        source: crate::pdu::writer::Error,
    },

    /// failed to send PDU over the wire
    WireSend { source: std::io::Error },

    /// failed to receive PDU
    Receive {
        source: crate::pdu::reader::Error,
    },

    /// failed to receive PDU over the wire
    WireReceive { source: std::io::Error },

    #[snafu(display("protocol version {} is not supported", got))]
    ProtocolVersionUnsupported { got: u16 },

    #[snafu(display("association rejected: {:?}", rejection))]
    Rejected { rejection: AssociationRj },

    /// no presentation contexts were accepted
    NoAcceptedContexts,

    /// association aborted
    Aborted,

    #[snafu(display("unexpected PDU {}", pdu.short_description()))]
    UnexpectedPdu { pdu: Box<Pdu> },

    #[snafu(display("operation `{}` is not legal in state {:?}", operation, state))]
    InvalidState {
        operation: &'static str,
        state: AssociationState,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
