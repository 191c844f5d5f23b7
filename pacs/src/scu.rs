//! The client orchestrator:
//! drives C-ECHO, C-STORE, C-FIND, C-MOVE and C-GET requests
//! over a negotiated association and drains the response streams.
//!
//! The server reuses this module for C-MOVE sub-operations.
use snafu::{OptionExt, ResultExt, Snafu};
use std::borrow::Cow;
use std::net::ToSocketAddrs;
use std::time::Duration;

use ferrodicom_core::{uids, DataSet};
use ferrodicom_dimse::command::{CommandField, CommandSet, Priority, SubOperations};
use ferrodicom_dimse::message::{message_pdus, Message, MessageAssembler};
use ferrodicom_dimse::Status;
use ferrodicom_encoding::{decode, encode};
use ferrodicom_ul::association::client::{ClientAssociation, ClientAssociationOptions};
use ferrodicom_ul::pdu::Pdu;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ScuError {
    #[snafu(display("association failed"))]
    Association {
        source: ferrodicom_ul::association::Error,
    },

    #[snafu(display("could not handle command set"))]
    Command {
        source: ferrodicom_dimse::command::Error,
    },

    #[snafu(display("could not assemble message"))]
    Assemble {
        source: ferrodicom_dimse::message::Error,
    },

    #[snafu(display("could not encode data set"))]
    EncodeDataSet {
        source: encode::Error,
    },

    #[snafu(display("could not decode data set"))]
    DecodeDataSet {
        source: decode::Error,
    },

    #[snafu(display("no accepted presentation context for {}", sop_class_uid))]
    NoContextFor { sop_class_uid: String },

    #[snafu(display("the peer aborted the association"))]
    PeerAborted,

    #[snafu(display("unexpected {} from the peer", description))]
    UnexpectedPeerMessage { description: &'static str },
}

pub type Result<T, E = ScuError> = std::result::Result<T, E>;

/// Options for connecting a client.
#[derive(Debug, Clone)]
pub struct ScuOptions {
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub max_pdu_length: u32,
    pub read_timeout: Option<Duration>,
}

impl Default for ScuOptions {
    fn default() -> Self {
        ScuOptions {
            calling_ae_title: "FERRO-SCU".to_string(),
            called_ae_title: "ANY-SCP".to_string(),
            max_pdu_length: ferrodicom_ul::pdu::DEFAULT_MAX_PDU,
            read_timeout: None,
        }
    }
}

/// An instance received through C-GET.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedInstance {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub transfer_syntax_uid: String,
    pub dataset: Vec<u8>,
}

/// A DIMSE service class user over one association.
pub struct DimseClient {
    association: ClientAssociation,
    assembler: MessageAssembler,
    next_message_id: u16,
}

impl DimseClient {
    /// Connect and negotiate an association
    /// proposing one presentation context per entry in `contexts`
    /// (abstract syntax plus its transfer syntax offers).
    pub fn connect<A: ToSocketAddrs>(
        address: A,
        options: &ScuOptions,
        contexts: &[(String, Vec<String>)],
    ) -> Result<DimseClient> {
        let mut builder = ClientAssociationOptions::new()
            .calling_ae_title(options.calling_ae_title.clone())
            .called_ae_title(options.called_ae_title.clone())
            .max_pdu_length(options.max_pdu_length);
        if let Some(timeout) = options.read_timeout {
            builder = builder.read_timeout(timeout);
        }
        for (abstract_syntax, transfer_syntaxes) in contexts {
            builder = if transfer_syntaxes.is_empty() {
                builder.with_abstract_syntax(abstract_syntax.clone())
            } else {
                builder
                    .with_presentation_context(abstract_syntax.clone(), transfer_syntaxes.clone())
            };
        }
        let association = builder.establish(address).context(AssociationSnafu)?;
        Ok(DimseClient {
            association,
            assembler: MessageAssembler::new(),
            next_message_id: 1,
        })
    }

    /// The negotiated association.
    pub fn association(&self) -> &ClientAssociation {
        &self.association
    }

    fn next_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        id
    }

    fn send_message(
        &mut self,
        context_id: u8,
        command: &CommandSet,
        dataset: Option<&[u8]>,
    ) -> Result<()> {
        let pdus = message_pdus(
            context_id,
            command,
            dataset,
            self.association.peer_max_pdu_length(),
        )
        .context(AssembleSnafu)?;
        for pdu in pdus {
            self.association.send(&pdu).context(AssociationSnafu)?;
        }
        Ok(())
    }

    fn receive_message(&mut self) -> Result<(u8, Message)> {
        loop {
            match self.association.receive().context(AssociationSnafu)? {
                Pdu::PData { data } => {
                    for pdv in data {
                        if let Some(found) = self.assembler.push(pdv).context(AssembleSnafu)? {
                            return Ok(found);
                        }
                    }
                }
                Pdu::AbortRq { .. } => return PeerAbortedSnafu.fail(),
                Pdu::ReleaseRq => {
                    return UnexpectedPeerMessageSnafu {
                        description: "release request",
                    }
                    .fail()
                }
                _ => {
                    return UnexpectedPeerMessageSnafu {
                        description: "association PDU",
                    }
                    .fail()
                }
            }
        }
    }

    /// Verify connectivity with a C-ECHO exchange.
    pub fn echo(&mut self) -> Result<Status> {
        let context = self
            .association
            .context_for(uids::VERIFICATION)
            .context(NoContextForSnafu {
                sop_class_uid: uids::VERIFICATION,
            })?;
        let context_id = context.id;
        let message_id = self.next_id();
        let command = CommandSet::echo_rq(message_id);
        self.send_message(context_id, &command, None)?;
        let (_, message) = self.receive_message()?;
        message.command.status().context(CommandSnafu)
    }

    /// Store one instance whose data set is already coded
    /// under `transfer_syntax_uid`.
    /// The payload is re-coded only if the accepted context
    /// negotiated a different plain transfer syntax.
    pub fn store(
        &mut self,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        transfer_syntax_uid: &str,
        dataset: &[u8],
    ) -> Result<Status> {
        let context = self
            .association
            .context_for(sop_class_uid)
            .context(NoContextForSnafu { sop_class_uid })?;
        let context_id = context.id;
        let negotiated_ts = context.transfer_syntax.clone();

        let payload: Cow<[u8]> =
            if ferrodicom_core::trim_uid(transfer_syntax_uid) == negotiated_ts {
                Cow::Borrowed(dataset)
            } else {
                let decoded = decode::read_dataset_by_uid(dataset, transfer_syntax_uid)
                    .context(DecodeDataSetSnafu)?;
                Cow::Owned(
                    encode::write_dataset_by_uid(&decoded, &negotiated_ts)
                        .context(EncodeDataSetSnafu)?,
                )
            };

        let message_id = self.next_id();
        let command =
            CommandSet::store_rq(message_id, sop_class_uid, sop_instance_uid, Priority::Medium);
        self.send_message(context_id, &command, Some(&payload))?;

        loop {
            let (_, message) = self.receive_message()?;
            let command = &message.command;
            if command.command_field().context(CommandSnafu)? == CommandField::CStoreRsp
                && command.message_id_responded().context(CommandSnafu)? == message_id
            {
                return command.status().context(CommandSnafu);
            }
            tracing::warn!("ignoring out-of-band message while awaiting C-STORE response");
        }
    }

    /// Run a C-FIND against the given information model,
    /// collecting the pending identifiers until the terminal status.
    pub fn find(&mut self, model_uid: &str, query: &DataSet) -> Result<(Status, Vec<DataSet>)> {
        let context = self
            .association
            .context_for(model_uid)
            .context(NoContextForSnafu {
                sop_class_uid: model_uid,
            })?;
        let context_id = context.id;
        let transfer_syntax = context.transfer_syntax.clone();

        let message_id = self.next_id();
        let command = CommandSet::find_rq(message_id, model_uid, Priority::Medium);
        let query_bytes =
            encode::write_dataset_by_uid(query, &transfer_syntax).context(EncodeDataSetSnafu)?;
        self.send_message(context_id, &command, Some(&query_bytes))?;

        let mut matches = Vec::new();
        loop {
            let (_, message) = self.receive_message()?;
            let status = message.command.status().context(CommandSnafu)?;
            if status.is_pending() {
                if let Some(bytes) = &message.dataset {
                    let identifier = decode::read_dataset_by_uid(bytes, &transfer_syntax)
                        .context(DecodeDataSetSnafu)?;
                    matches.push(identifier);
                }
                continue;
            }
            return Ok((status, matches));
        }
    }

    /// Run a C-MOVE towards `destination`,
    /// returning the final status and sub-operation counters.
    pub fn move_to(
        &mut self,
        model_uid: &str,
        destination: &str,
        query: &DataSet,
    ) -> Result<(Status, SubOperations)> {
        let context = self
            .association
            .context_for(model_uid)
            .context(NoContextForSnafu {
                sop_class_uid: model_uid,
            })?;
        let context_id = context.id;
        let transfer_syntax = context.transfer_syntax.clone();

        let message_id = self.next_id();
        let command =
            CommandSet::move_rq(message_id, model_uid, destination, Priority::Medium);
        let query_bytes =
            encode::write_dataset_by_uid(query, &transfer_syntax).context(EncodeDataSetSnafu)?;
        self.send_message(context_id, &command, Some(&query_bytes))?;

        let mut counters = SubOperations::default();
        loop {
            let (_, message) = self.receive_message()?;
            let status = message.command.status().context(CommandSnafu)?;
            if let Some(progress) = message.command.sub_operations() {
                counters = progress;
            }
            if status.is_terminal() {
                return Ok((status, counters));
            }
        }
    }

    /// Run a C-GET, accepting the reversed C-STORE sub-operations
    /// on this same association.
    pub fn get(
        &mut self,
        model_uid: &str,
        query: &DataSet,
    ) -> Result<(Status, SubOperations, Vec<RetrievedInstance>)> {
        let context = self
            .association
            .context_for(model_uid)
            .context(NoContextForSnafu {
                sop_class_uid: model_uid,
            })?;
        let context_id = context.id;
        let transfer_syntax = context.transfer_syntax.clone();

        let message_id = self.next_id();
        let command = CommandSet::get_rq(message_id, model_uid, Priority::Medium);
        let query_bytes =
            encode::write_dataset_by_uid(query, &transfer_syntax).context(EncodeDataSetSnafu)?;
        self.send_message(context_id, &command, Some(&query_bytes))?;

        let mut counters = SubOperations::default();
        let mut retrieved = Vec::new();
        loop {
            let (message_context, message) = self.receive_message()?;
            match message.command.command_field().context(CommandSnafu)? {
                CommandField::CGetRsp => {
                    let status = message.command.status().context(CommandSnafu)?;
                    if let Some(progress) = message.command.sub_operations() {
                        counters = progress;
                    }
                    if status.is_terminal() {
                        return Ok((status, counters, retrieved));
                    }
                }
                CommandField::CStoreRq => {
                    let sub_id = message.command.message_id().context(CommandSnafu)?;
                    let sop_class_uid =
                        message.command.affected_sop_class_uid().unwrap_or_default();
                    let sop_instance_uid = message
                        .command
                        .affected_sop_instance_uid()
                        .unwrap_or_default();
                    let store_ts = self
                        .association
                        .context_by_id(message_context)
                        .map(|pc| pc.transfer_syntax.clone())
                        .unwrap_or_else(|| transfer_syntax.clone());
                    let status = match message.dataset {
                        Some(dataset) => {
                            retrieved.push(RetrievedInstance {
                                sop_class_uid: sop_class_uid.clone(),
                                sop_instance_uid: sop_instance_uid.clone(),
                                transfer_syntax_uid: store_ts,
                                dataset,
                            });
                            Status::SUCCESS
                        }
                        None => Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS,
                    };
                    let response = CommandSet::store_rsp(
                        sub_id,
                        &sop_class_uid,
                        &sop_instance_uid,
                        status,
                    );
                    self.send_message(message_context, &response, None)?;
                }
                _ => {
                    return UnexpectedPeerMessageSnafu {
                        description: "message during C-GET",
                    }
                    .fail()
                }
            }
        }
    }

    /// Release the association gracefully.
    pub fn release(self) -> Result<()> {
        self.association.release().context(AssociationSnafu)
    }

    /// Abort the association unilaterally.
    pub fn abort(self) {
        let _ = self.association.abort();
    }
}
