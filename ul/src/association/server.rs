//! Association acceptor module.
//!
//! [`ServerAssociationOptions`] negotiates incoming association requests
//! into [`ServerAssociation`] values.
//! Unlike the client options, a value of this type
//! can be reused for multiple connections.
use snafu::{ensure, ResultExt};
use std::collections::HashSet;
use std::net::TcpStream;
use std::time::Duration;

use ferrodicom_core::uids;
use ferrodicom_encoding::transfer_syntax::{self, entries};

use crate::association::pdata::fragment_pdvs;
use crate::association::{
    AssociationState, Error, PresentationContextNegotiated, Result,
};
use crate::pdu::{
    read_pdu, write_pdu, AbortServiceProviderReason, AbortSource, AssociationAc, AssociationRj,
    AssociationRjResult, AssociationRjSource, AssociationRq, PDataValueType, Pdu,
    PresentationContextResult, PresentationContextResultReason, ServiceUserReason,
    UserVariableItem, DEFAULT_MAX_PDU,
};
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

/// Common interface for application entity access control policies.
pub trait AccessControl {
    /// Decide whether to accept an association request
    /// based on the recorded application entity titles.
    ///
    /// Returns `Ok(())` to give the requester clearance,
    /// otherwise the service user reason for the rejection.
    fn check_access(
        &self,
        this_ae_title: &str,
        calling_ae_title: &str,
        called_ae_title: &str,
    ) -> std::result::Result<(), ServiceUserReason>;
}

/// An access control rule that accepts any association request.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq)]
pub struct AcceptAny;

impl AccessControl for AcceptAny {
    fn check_access(
        &self,
        _this_ae_title: &str,
        _calling_ae_title: &str,
        _called_ae_title: &str,
    ) -> std::result::Result<(), ServiceUserReason> {
        Ok(())
    }
}

/// An access control rule driven by calling AE title lists:
/// a blocked title is always rejected,
/// and a non-empty allow list rejects every title outside it.
#[derive(Debug, Default, Clone)]
pub struct CallingAeTitleLists {
    allowed: HashSet<String>,
    blocked: HashSet<String>,
}

impl CallingAeTitleLists {
    pub fn new(
        allowed: impl IntoIterator<Item = String>,
        blocked: impl IntoIterator<Item = String>,
    ) -> Self {
        CallingAeTitleLists {
            allowed: allowed.into_iter().collect(),
            blocked: blocked.into_iter().collect(),
        }
    }
}

impl AccessControl for CallingAeTitleLists {
    fn check_access(
        &self,
        _this_ae_title: &str,
        calling_ae_title: &str,
        _called_ae_title: &str,
    ) -> std::result::Result<(), ServiceUserReason> {
        if self.blocked.contains(calling_ae_title) {
            return Err(ServiceUserReason::CallingAeTitleNotRecognized);
        }
        if !self.allowed.is_empty() && !self.allowed.contains(calling_ae_title) {
            return Err(ServiceUserReason::CallingAeTitleNotRecognized);
        }
        Ok(())
    }
}

/// The transfer syntaxes this acceptor prefers, most preferred first.
/// Encapsulated syntaxes are accepted after these, when recognized.
const TRANSFER_SYNTAX_PREFERENCE: &[&str] = &[
    "1.2.840.10008.1.2.1",
    "1.2.840.10008.1.2",
    "1.2.840.10008.1.2.2",
];

/// A DICOM association builder for an acceptor node,
/// usually taking the role of a service class provider.
#[derive(Debug, Clone)]
pub struct ServerAssociationOptions<A> {
    ae_title: String,
    ae_access_control: A,
    application_context_name: String,
    abstract_syntax_uids: Vec<String>,
    protocol_version: u16,
    max_pdu_length: u32,
    strict: bool,
    read_timeout: Option<Duration>,
}

impl Default for ServerAssociationOptions<AcceptAny> {
    fn default() -> Self {
        ServerAssociationOptions {
            ae_title: "THIS-SCP".to_string(),
            ae_access_control: AcceptAny,
            application_context_name: uids::APPLICATION_CONTEXT_NAME.to_string(),
            abstract_syntax_uids: Vec::new(),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            read_timeout: None,
        }
    }
}

impl ServerAssociationOptions<AcceptAny> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A> ServerAssociationOptions<A>
where
    A: AccessControl,
{
    /// Change the access control policy.
    pub fn ae_access_control<P>(self, access_control: P) -> ServerAssociationOptions<P>
    where
        P: AccessControl,
    {
        let ServerAssociationOptions {
            ae_title,
            ae_access_control: _,
            application_context_name,
            abstract_syntax_uids,
            protocol_version,
            max_pdu_length,
            strict,
            read_timeout,
        } = self;
        ServerAssociationOptions {
            ae_title,
            ae_access_control: access_control,
            application_context_name,
            abstract_syntax_uids,
            protocol_version,
            max_pdu_length,
            strict,
            read_timeout,
        }
    }

    /// Define the application entity title of this node.
    pub fn ae_title(mut self, ae_title: impl Into<String>) -> Self {
        self.ae_title = ae_title.into();
        self
    }

    /// Add an abstract syntax this node is willing to serve.
    pub fn with_abstract_syntax(mut self, uid: impl Into<String>) -> Self {
        self.abstract_syntax_uids
            .push(ferrodicom_core::trim_uid(&uid.into()).to_string());
        self
    }

    /// Override the maximum PDU length published in the answer.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode:
    /// whether incoming PDUs may not surpass the maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the read timeout of the underlying socket.
    /// Expiry aborts the association.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Negotiate an association over the given TCP stream.
    pub fn establish(&self, mut socket: TcpStream) -> Result<ServerAssociation> {
        ensure!(
            !self.abstract_syntax_uids.is_empty(),
            crate::association::MissingAbstractSyntaxSnafu
        );

        socket
            .set_read_timeout(self.read_timeout)
            .context(crate::association::ConfigureSocketSnafu)?;
        socket
            .set_write_timeout(self.read_timeout)
            .context(crate::association::ConfigureSocketSnafu)?;

        let msg = read_pdu(&mut socket, self.max_pdu_length, self.strict)
            .context(crate::association::ReceiveSnafu)?;
        match self.process_association_rq(msg) {
            Ok((pdu, contexts, peer_ae_title, peer_max_pdu_length)) => {
                let mut buffer = Vec::with_capacity(1024);
                write_pdu(&mut buffer, &pdu).context(crate::association::SendSnafu)?;
                std::io::Write::write_all(&mut socket, &buffer)
                    .context(crate::association::WireSendSnafu)?;
                Ok(ServerAssociation {
                    socket,
                    presentation_contexts: contexts,
                    peer_ae_title,
                    peer_max_pdu_length,
                    max_pdu_length: self.max_pdu_length,
                    strict: self.strict,
                    state: AssociationState::Associated,
                })
            }
            Err((pdu, err)) => {
                let mut buffer = Vec::with_capacity(128);
                if write_pdu(&mut buffer, &pdu).is_ok() {
                    let _ = std::io::Write::write_all(&mut socket, &buffer);
                }
                Err(err)
            }
        }
    }

    /// Process an association request PDU.
    ///
    /// On success, returns the answer PDU to send,
    /// the negotiated contexts, the calling AE title
    /// and the requestor's maximum PDU length.
    /// On failure, returns the rejection or abort PDU to send
    /// along with the error.
    #[allow(clippy::type_complexity)]
    fn process_association_rq(
        &self,
        msg: Pdu,
    ) -> std::result::Result<
        (Pdu, Vec<PresentationContextNegotiated>, String, u32),
        (Pdu, Error),
    > {
        match msg {
            Pdu::AssociationRq(AssociationRq {
                protocol_version,
                calling_ae_title,
                called_ae_title,
                application_context_name,
                presentation_contexts,
                user_variables,
            }) => {
                if protocol_version != self.protocol_version {
                    let rejection = AssociationRj {
                        result: AssociationRjResult::Permanent,
                        source: AssociationRjSource::ServiceProviderAcse(
                            crate::pdu::ServiceProviderAcseReason::ProtocolVersionNotSupported,
                        ),
                    };
                    return Err((
                        Pdu::AssociationRj(rejection),
                        Error::ProtocolVersionUnsupported {
                            got: protocol_version,
                        },
                    ));
                }

                if application_context_name != self.application_context_name {
                    let rejection = AssociationRj {
                        result: AssociationRjResult::Permanent,
                        source: AssociationRjSource::ServiceUser(
                            ServiceUserReason::ApplicationContextNameNotSupported,
                        ),
                    };
                    return Err((
                        Pdu::AssociationRj(rejection),
                        Error::Rejected { rejection },
                    ));
                }

                if let Err(reason) = self.ae_access_control.check_access(
                    &self.ae_title,
                    &calling_ae_title,
                    &called_ae_title,
                ) {
                    let rejection = AssociationRj {
                        result: AssociationRjResult::Permanent,
                        source: AssociationRjSource::ServiceUser(reason),
                    };
                    tracing::info!(
                        calling = calling_ae_title.as_str(),
                        "rejecting association: {:?}",
                        reason
                    );
                    return Err((
                        Pdu::AssociationRj(rejection),
                        Error::Rejected { rejection },
                    ));
                }

                let peer_max_pdu_length = user_variables
                    .iter()
                    .find_map(|item| match item {
                        UserVariableItem::MaxLength(len) => Some(*len),
                        _ => None,
                    })
                    .unwrap_or(DEFAULT_MAX_PDU);
                // zero means unlimited
                let peer_max_pdu_length = if peer_max_pdu_length == 0 {
                    u32::MAX
                } else {
                    peer_max_pdu_length
                };

                let negotiated: Vec<PresentationContextNegotiated> = presentation_contexts
                    .into_iter()
                    .map(|pc| {
                        let abstract_syntax =
                            ferrodicom_core::trim_uid(&pc.abstract_syntax).to_string();
                        if !self
                            .abstract_syntax_uids
                            .iter()
                            .any(|uid| *uid == abstract_syntax)
                        {
                            return PresentationContextNegotiated {
                                id: pc.id,
                                abstract_syntax,
                                transfer_syntax: entries::IMPLICIT_VR_LITTLE_ENDIAN
                                    .uid()
                                    .to_string(),
                                reason:
                                    PresentationContextResultReason::AbstractSyntaxNotSupported,
                            };
                        }
                        match choose_transfer_syntax(&pc.transfer_syntaxes) {
                            Some(ts) => PresentationContextNegotiated {
                                id: pc.id,
                                abstract_syntax,
                                transfer_syntax: ts,
                                reason: PresentationContextResultReason::Acceptance,
                            },
                            None => PresentationContextNegotiated {
                                id: pc.id,
                                abstract_syntax,
                                transfer_syntax: entries::IMPLICIT_VR_LITTLE_ENDIAN
                                    .uid()
                                    .to_string(),
                                reason:
                                    PresentationContextResultReason::TransferSyntaxesNotSupported,
                            },
                        }
                    })
                    .collect();

                let pdu = Pdu::AssociationAc(AssociationAc {
                    protocol_version: self.protocol_version,
                    calling_ae_title: calling_ae_title.clone(),
                    called_ae_title,
                    application_context_name,
                    presentation_contexts: negotiated
                        .iter()
                        .map(|pc| PresentationContextResult {
                            id: pc.id,
                            reason: pc.reason,
                            transfer_syntax: pc.transfer_syntax.clone(),
                        })
                        .collect(),
                    user_variables: vec![
                        UserVariableItem::MaxLength(self.max_pdu_length),
                        UserVariableItem::ImplementationClassUid(
                            IMPLEMENTATION_CLASS_UID.to_string(),
                        ),
                        UserVariableItem::ImplementationVersionName(
                            IMPLEMENTATION_VERSION_NAME.to_string(),
                        ),
                    ],
                });
                Ok((pdu, negotiated, calling_ae_title, peer_max_pdu_length))
            }
            Pdu::ReleaseRq => Err((Pdu::ReleaseRp, Error::Aborted)),
            pdu @ (Pdu::AssociationAc { .. }
            | Pdu::AssociationRj { .. }
            | Pdu::PData { .. }
            | Pdu::ReleaseRp
            | Pdu::AbortRq { .. }) => Err((
                Pdu::AbortRq {
                    source: AbortSource::ServiceProvider(
                        AbortServiceProviderReason::UnexpectedPdu,
                    ),
                },
                Error::UnexpectedPdu { pdu: Box::new(pdu) },
            )),
            pdu @ Pdu::Unknown { .. } => Err((
                Pdu::AbortRq {
                    source: AbortSource::ServiceProvider(
                        AbortServiceProviderReason::UnrecognizedPdu,
                    ),
                },
                Error::UnexpectedPdu { pdu: Box::new(pdu) },
            )),
        }
    }
}

/// Pick a transfer syntax among the proposed ones:
/// the first hit in the preference order
/// (explicit little endian, implicit little endian, explicit big endian),
/// then any recognized encapsulated syntax.
fn choose_transfer_syntax(proposed: &[String]) -> Option<String> {
    for preferred in TRANSFER_SYNTAX_PREFERENCE {
        if proposed
            .iter()
            .any(|uid| ferrodicom_core::trim_uid(uid) == *preferred)
        {
            return Some((*preferred).to_string());
        }
    }
    proposed
        .iter()
        .map(|uid| ferrodicom_core::trim_uid(uid))
        .find(|uid| {
            transfer_syntax::lookup(uid)
                .map(|ts| ts.is_encapsulated() || ts.is_deflated())
                .unwrap_or(false)
        })
        .map(str::to_string)
}

/// A negotiated association from the acceptor side.
#[derive(Debug)]
pub struct ServerAssociation {
    socket: TcpStream,
    presentation_contexts: Vec<PresentationContextNegotiated>,
    peer_ae_title: String,
    peer_max_pdu_length: u32,
    max_pdu_length: u32,
    strict: bool,
    state: AssociationState,
}

impl ServerAssociation {
    /// The negotiated presentation contexts, accepted and rejected.
    pub fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
        &self.presentation_contexts
    }

    /// The accepted presentation context with the given id, if any.
    pub fn accepted_context(&self, id: u8) -> Option<&PresentationContextNegotiated> {
        self.presentation_contexts
            .iter()
            .find(|pc| pc.id == id && pc.is_accepted())
    }

    /// The calling AE title of the peer.
    pub fn peer_ae_title(&self) -> &str {
        &self.peer_ae_title
    }

    /// The maximum PDU length advertised by the peer.
    pub fn peer_max_pdu_length(&self) -> u32 {
        self.peer_max_pdu_length
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    /// Read the next PDU from the peer, tracking the state machine.
    pub fn receive(&mut self) -> Result<Pdu> {
        ensure!(
            self.state != AssociationState::Aborted,
            crate::association::InvalidStateSnafu {
                operation: "receive",
                state: self.state,
            }
        );
        let pdu = match read_pdu(&mut self.socket, self.max_pdu_length, self.strict) {
            Ok(pdu) => pdu,
            Err(e) => {
                self.state = AssociationState::Aborted;
                return Err(e).context(crate::association::ReceiveSnafu);
            }
        };
        match &pdu {
            Pdu::PData { data } => {
                if data.iter().any(|pdv| !pdv.is_last) {
                    self.state = AssociationState::Receiving;
                } else {
                    self.state = AssociationState::Associated;
                }
            }
            Pdu::ReleaseRq => self.state = AssociationState::Releasing,
            Pdu::AbortRq { .. } => self.state = AssociationState::Aborted,
            _ => {}
        }
        Ok(pdu)
    }

    /// Read the next PDU without blocking.
    /// Returns `Ok(None)` when no complete PDU header
    /// is waiting on the socket.
    pub fn try_receive(&mut self) -> Result<Option<Pdu>> {
        let mut header = [0u8; 6];
        self.socket
            .set_nonblocking(true)
            .context(crate::association::ConfigureSocketSnafu)?;
        let peeked = self.socket.peek(&mut header);
        self.socket
            .set_nonblocking(false)
            .context(crate::association::ConfigureSocketSnafu)?;
        match peeked {
            Ok(n) if n >= header.len() => self.receive().map(Some),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                self.state = AssociationState::Aborted;
                Err(e).context(crate::association::WireReceiveSnafu)
            }
        }
    }

    /// Send a PDU to the peer, tracking the state machine.
    pub fn send(&mut self, pdu: &Pdu) -> Result<()> {
        ensure!(
            self.state != AssociationState::Aborted,
            crate::association::InvalidStateSnafu {
                operation: "send",
                state: self.state,
            }
        );
        let mut buffer = Vec::with_capacity(self.peer_max_pdu_length.min(16_384) as usize);
        write_pdu(&mut buffer, pdu).context(crate::association::SendSnafu)?;
        std::io::Write::write_all(&mut self.socket, &buffer)
            .context(crate::association::WireSendSnafu)?;
        match pdu {
            Pdu::AbortRq { .. } => self.state = AssociationState::Aborted,
            Pdu::ReleaseRp => self.state = AssociationState::Releasing,
            _ => {}
        }
        Ok(())
    }

    /// Send a message payload on the given context,
    /// fragmented to the peer's maximum PDU length.
    pub fn send_payload(
        &mut self,
        presentation_context_id: u8,
        value_type: PDataValueType,
        payload: &[u8],
    ) -> Result<()> {
        for pdu in fragment_pdvs(
            presentation_context_id,
            value_type,
            payload,
            self.peer_max_pdu_length,
        ) {
            self.send(&pdu)?;
        }
        Ok(())
    }

    /// Abort the association and mark it terminal.
    pub fn abort(&mut self) -> Result<()> {
        let out = self.send(&Pdu::AbortRq {
            source: AbortSource::ServiceProvider(
                AbortServiceProviderReason::ReasonNotSpecified,
            ),
        });
        self.state = AssociationState::Aborted;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::PresentationContextProposed;

    fn options() -> ServerAssociationOptions<AcceptAny> {
        ServerAssociationOptions::new()
            .ae_title("TEST-SCP")
            .with_abstract_syntax(uids::VERIFICATION)
            .with_abstract_syntax(uids::CT_IMAGE_STORAGE)
    }

    fn request(contexts: Vec<PresentationContextProposed>) -> Pdu {
        Pdu::AssociationRq(AssociationRq {
            protocol_version: 1,
            calling_ae_title: "TEST-SCU".to_string(),
            called_ae_title: "TEST-SCP".to_string(),
            application_context_name: uids::APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: contexts,
            user_variables: vec![UserVariableItem::MaxLength(32_768)],
        })
    }

    #[test]
    fn accepted_ids_are_a_subset_of_proposed_ids() {
        let proposed = vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: uids::VERIFICATION.to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "1.2.840.10008.5.1.4.1.1.77".to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            },
        ];
        let (pdu, negotiated, peer, max) = options()
            .process_association_rq(request(proposed.clone()))
            .unwrap();
        assert_eq!(peer, "TEST-SCU");
        assert_eq!(max, 32_768);

        let Pdu::AssociationAc(ac) = pdu else {
            panic!("expected an A-ASSOCIATE-AC")
        };
        let proposed_ids: Vec<u8> = proposed.iter().map(|pc| pc.id).collect();
        for pc in &ac.presentation_contexts {
            assert!(proposed_ids.contains(&pc.id));
        }
        assert_eq!(negotiated.len(), 2);
        assert!(negotiated[0].is_accepted());
        assert_eq!(
            negotiated[1].reason,
            PresentationContextResultReason::AbstractSyntaxNotSupported
        );
    }

    #[test]
    fn transfer_syntax_preference_order() {
        let proposed = vec![PresentationContextProposed {
            id: 1,
            abstract_syntax: uids::CT_IMAGE_STORAGE.to_string(),
            transfer_syntaxes: vec![
                "1.2.840.10008.1.2".to_string(),
                "1.2.840.10008.1.2.1".to_string(),
            ],
        }];
        let (_, negotiated, _, _) = options()
            .process_association_rq(request(proposed))
            .unwrap();
        // explicit little endian wins over implicit
        assert_eq!(negotiated[0].transfer_syntax, "1.2.840.10008.1.2.1");
    }

    #[test]
    fn unsupported_transfer_syntaxes_reject_with_reason_4() {
        let proposed = vec![PresentationContextProposed {
            id: 1,
            abstract_syntax: uids::CT_IMAGE_STORAGE.to_string(),
            transfer_syntaxes: vec!["1.2.3.999".to_string()],
        }];
        let (_, negotiated, _, _) = options()
            .process_association_rq(request(proposed))
            .unwrap();
        assert_eq!(
            negotiated[0].reason,
            PresentationContextResultReason::TransferSyntaxesNotSupported
        );
    }

    #[test]
    fn encapsulated_syntaxes_are_accepted_when_nothing_plain_is_offered() {
        let proposed = vec![PresentationContextProposed {
            id: 1,
            abstract_syntax: uids::CT_IMAGE_STORAGE.to_string(),
            transfer_syntaxes: vec!["1.2.840.10008.1.2.4.50".to_string()],
        }];
        let (_, negotiated, _, _) = options()
            .process_association_rq(request(proposed))
            .unwrap();
        assert!(negotiated[0].is_accepted());
        assert_eq!(negotiated[0].transfer_syntax, "1.2.840.10008.1.2.4.50");
    }

    #[test]
    fn blocked_calling_ae_title_is_rejected() {
        let opts = options().ae_access_control(CallingAeTitleLists::new(
            vec!["GOOD".to_string()],
            vec![],
        ));
        let (pdu, err) = opts
            .process_association_rq(request(vec![PresentationContextProposed {
                id: 1,
                abstract_syntax: uids::VERIFICATION.to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            }]))
            .unwrap_err();
        let Pdu::AssociationRj(rj) = pdu else {
            panic!("expected an A-ASSOCIATE-RJ")
        };
        assert_eq!(rj.result, AssociationRjResult::Permanent);
        assert_eq!(
            rj.source,
            AssociationRjSource::ServiceUser(ServiceUserReason::CallingAeTitleNotRecognized)
        );
        assert!(matches!(err, Error::Rejected { .. }));
    }

    #[test]
    fn protocol_version_mismatch_is_rejected() {
        let mut rq = request(vec![]);
        if let Pdu::AssociationRq(ref mut body) = rq {
            body.protocol_version = 2;
        }
        let (pdu, err) = options().process_association_rq(rq).unwrap_err();
        assert!(matches!(pdu, Pdu::AssociationRj { .. }));
        assert!(matches!(err, Error::ProtocolVersionUnsupported { got: 2 }));
    }
}
