//! Association requestor module.
//!
//! [`ClientAssociationOptions`] proposes presentation contexts
//! to a peer node and yields a [`ClientAssociation`] on acceptance.
use snafu::{ensure, ResultExt};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ferrodicom_core::uids;

use crate::association::pdata::fragment_pdvs;
use crate::association::{
    AssociationState, Error, PresentationContextNegotiated, Result,
};
use crate::pdu::{
    read_pdu, write_pdu, AbortSource, AssociationRq, PDataValueType, Pdu,
    PresentationContextProposed, UserVariableItem, DEFAULT_MAX_PDU,
};
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

/// The transfer syntaxes proposed by default
/// when a presentation context does not name its own.
const DEFAULT_TRANSFER_SYNTAXES: &[&str] = &["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"];

/// A DICOM association builder for a requestor node,
/// usually taking the role of a service class user.
#[derive(Debug, Clone)]
pub struct ClientAssociationOptions {
    calling_ae_title: String,
    called_ae_title: String,
    application_context_name: String,
    /// proposed pairs of abstract syntax and transfer syntax lists
    presentation_contexts: Vec<(String, Vec<String>)>,
    protocol_version: u16,
    max_pdu_length: u32,
    read_timeout: Option<Duration>,
}

impl Default for ClientAssociationOptions {
    fn default() -> Self {
        ClientAssociationOptions {
            calling_ae_title: "THIS-SCU".to_string(),
            called_ae_title: "ANY-SCP".to_string(),
            application_context_name: uids::APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: Vec::new(),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            read_timeout: None,
        }
    }
}

impl ClientAssociationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the calling AE title, referring to this node.
    pub fn calling_ae_title(mut self, title: impl Into<String>) -> Self {
        self.calling_ae_title = title.into();
        self
    }

    /// Define the called AE title, referring to the target node.
    pub fn called_ae_title(mut self, title: impl Into<String>) -> Self {
        self.called_ae_title = title.into();
        self
    }

    /// Propose a presentation context for this abstract syntax
    /// with the default transfer syntaxes.
    pub fn with_abstract_syntax(mut self, uid: impl Into<String>) -> Self {
        self.presentation_contexts.push((
            ferrodicom_core::trim_uid(&uid.into()).to_string(),
            DEFAULT_TRANSFER_SYNTAXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ));
        self
    }

    /// Propose a presentation context
    /// with an explicit list of transfer syntaxes.
    pub fn with_presentation_context(
        mut self,
        abstract_syntax: impl Into<String>,
        transfer_syntaxes: Vec<String>,
    ) -> Self {
        self.presentation_contexts.push((
            ferrodicom_core::trim_uid(&abstract_syntax.into()).to_string(),
            transfer_syntaxes,
        ));
        self
    }

    /// Override the maximum PDU length advertised to the peer.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Set the read timeout of the underlying socket.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Connect to the peer and negotiate the association.
    pub fn establish<A: ToSocketAddrs>(self, address: A) -> Result<ClientAssociation> {
        ensure!(
            !self.presentation_contexts.is_empty(),
            crate::association::MissingAbstractSyntaxSnafu
        );

        let mut socket =
            TcpStream::connect(address).context(crate::association::ConnectSnafu)?;
        socket
            .set_read_timeout(self.read_timeout)
            .context(crate::association::ConfigureSocketSnafu)?;
        socket
            .set_write_timeout(self.read_timeout)
            .context(crate::association::ConfigureSocketSnafu)?;

        let proposed: Vec<PresentationContextProposed> = self
            .presentation_contexts
            .iter()
            .enumerate()
            .map(|(i, (abstract_syntax, transfer_syntaxes))| PresentationContextProposed {
                // identifiers are the odd numbers 1..255
                id: (i as u8) * 2 + 1,
                abstract_syntax: abstract_syntax.clone(),
                transfer_syntaxes: transfer_syntaxes.clone(),
            })
            .collect();

        let rq = Pdu::AssociationRq(AssociationRq {
            protocol_version: self.protocol_version,
            calling_ae_title: self.calling_ae_title.clone(),
            called_ae_title: self.called_ae_title.clone(),
            application_context_name: self.application_context_name.clone(),
            presentation_contexts: proposed.clone(),
            user_variables: vec![
                UserVariableItem::MaxLength(self.max_pdu_length),
                UserVariableItem::ImplementationClassUid(IMPLEMENTATION_CLASS_UID.to_string()),
                UserVariableItem::ImplementationVersionName(
                    IMPLEMENTATION_VERSION_NAME.to_string(),
                ),
            ],
        });

        let mut buffer = Vec::with_capacity(1024);
        write_pdu(&mut buffer, &rq).context(crate::association::SendSnafu)?;
        std::io::Write::write_all(&mut socket, &buffer)
            .context(crate::association::WireSendSnafu)?;

        let answer = read_pdu(&mut socket, self.max_pdu_length, false)
            .context(crate::association::ReceiveSnafu)?;
        match answer {
            Pdu::AssociationAc(ac) => {
                ensure!(
                    ac.protocol_version == self.protocol_version,
                    crate::association::ProtocolVersionUnsupportedSnafu {
                        got: ac.protocol_version,
                    }
                );

                let peer_max_pdu_length = ac
                    .user_variables
                    .iter()
                    .find_map(|item| match item {
                        UserVariableItem::MaxLength(len) => Some(*len),
                        _ => None,
                    })
                    .unwrap_or(DEFAULT_MAX_PDU);
                let peer_max_pdu_length = if peer_max_pdu_length == 0 {
                    u32::MAX
                } else {
                    peer_max_pdu_length
                };

                // keep the accepted contexts which answer a proposed id
                // with one of the transfer syntaxes we offered
                let accepted: Vec<PresentationContextNegotiated> = ac
                    .presentation_contexts
                    .iter()
                    .filter(|result| result.reason == crate::pdu::PresentationContextResultReason::Acceptance)
                    .filter_map(|result| {
                        let proposal = proposed.iter().find(|pc| pc.id == result.id)?;
                        let transfer_syntax =
                            ferrodicom_core::trim_uid(&result.transfer_syntax).to_string();
                        if !proposal
                            .transfer_syntaxes
                            .iter()
                            .any(|uid| ferrodicom_core::trim_uid(uid) == transfer_syntax)
                        {
                            tracing::warn!(
                                id = result.id,
                                "association answer names a transfer syntax we did not propose"
                            );
                            return None;
                        }
                        Some(PresentationContextNegotiated {
                            id: result.id,
                            abstract_syntax: proposal.abstract_syntax.clone(),
                            transfer_syntax,
                            reason: result.reason,
                        })
                    })
                    .collect();

                if accepted.is_empty() {
                    let mut buffer = Vec::with_capacity(16);
                    let _ = write_pdu(&mut buffer, &Pdu::AbortRq {
                        source: AbortSource::ServiceUser,
                    });
                    let _ = std::io::Write::write_all(&mut socket, &buffer);
                    return Err(Error::NoAcceptedContexts);
                }

                Ok(ClientAssociation {
                    socket,
                    presentation_contexts: accepted,
                    peer_max_pdu_length,
                    max_pdu_length: self.max_pdu_length,
                    state: AssociationState::Associated,
                })
            }
            Pdu::AssociationRj(rejection) => Err(Error::Rejected { rejection }),
            Pdu::AbortRq { .. } => Err(Error::Aborted),
            pdu => Err(Error::UnexpectedPdu { pdu: Box::new(pdu) }),
        }
    }
}

/// A negotiated association from the requestor side.
#[derive(Debug)]
pub struct ClientAssociation {
    socket: TcpStream,
    presentation_contexts: Vec<PresentationContextNegotiated>,
    peer_max_pdu_length: u32,
    max_pdu_length: u32,
    state: AssociationState,
}

impl ClientAssociation {
    /// The accepted presentation contexts.
    pub fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
        &self.presentation_contexts
    }

    /// The accepted context serving the given abstract syntax, if any.
    pub fn context_for(&self, abstract_syntax: &str) -> Option<&PresentationContextNegotiated> {
        let wanted = ferrodicom_core::trim_uid(abstract_syntax);
        self.presentation_contexts
            .iter()
            .find(|pc| pc.abstract_syntax == wanted)
    }

    /// The accepted context with the given identifier, if any.
    pub fn context_by_id(&self, id: u8) -> Option<&PresentationContextNegotiated> {
        self.presentation_contexts.iter().find(|pc| pc.id == id)
    }

    /// The maximum PDU length advertised by the peer.
    pub fn peer_max_pdu_length(&self) -> u32 {
        self.peer_max_pdu_length
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    /// Send a PDU to the peer.
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
        if matches!(pdu, Pdu::AbortRq { .. }) {
            self.state = AssociationState::Aborted;
        }
        Ok(())
    }

    /// Read the next PDU from the peer.
    pub fn receive(&mut self) -> Result<Pdu> {
        ensure!(
            self.state != AssociationState::Aborted,
            crate::association::InvalidStateSnafu {
                operation: "receive",
                state: self.state,
            }
        );
        let pdu = match read_pdu(&mut self.socket, self.max_pdu_length, false) {
            Ok(pdu) => pdu,
            Err(e) => {
                self.state = AssociationState::Aborted;
                return Err(e).context(crate::association::ReceiveSnafu);
            }
        };
        if matches!(pdu, Pdu::AbortRq { .. }) {
            self.state = AssociationState::Aborted;
        }
        Ok(pdu)
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

    /// Release the association gracefully,
    /// draining until the peer confirms.
    pub fn release(mut self) -> Result<()> {
        self.send(&Pdu::ReleaseRq)?;
        self.state = AssociationState::Releasing;
        loop {
            match read_pdu(&mut self.socket, self.max_pdu_length, false) {
                Ok(Pdu::ReleaseRp) => return Ok(()),
                Ok(Pdu::AbortRq { .. }) => return Err(Error::Aborted),
                Ok(other) => {
                    tracing::debug!(
                        "discarding {} while awaiting release",
                        other.short_description()
                    );
                }
                Err(crate::pdu::reader::Error::NoPduAvailable) => return Ok(()),
                Err(e) => return Err(e).context(crate::association::ReceiveSnafu),
            }
        }
    }

    /// Abort the association unilaterally.
    pub fn abort(mut self) -> Result<()> {
        let out = self.send(&Pdu::AbortRq {
            source: AbortSource::ServiceUser,
        });
        self.state = AssociationState::Aborted;
        match out {
            Err(Error::InvalidState { .. }) => Ok(()),
            other => other,
        }
    }
}
