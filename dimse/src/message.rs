//! Assembly of presentation data value fragments into whole messages,
//! and fragmentation of outgoing messages.
//!
//! A logical message is zero or more non-last command fragments,
//! one last command fragment,
//! and, when the command set announces a data set,
//! zero or more non-last data fragments followed by one last data fragment,
//! all sharing one presentation context.
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;

use ferrodicom_ul::association::pdata::fragment_pdvs;
use ferrodicom_ul::pdu::{PDataValue, PDataValueType, Pdu};

use crate::command::{self, CommandSet};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not parse command set on context {}", context_id))]
    BadCommand {
        context_id: u8,
        source: command::Error,
    },

    #[snafu(display(
        "data fragment on context {} without a preceding command",
        context_id
    ))]
    DataWithoutCommand { context_id: u8 },

    #[snafu(display(
        "command fragment on context {} while a data set is in transfer",
        context_id
    ))]
    CommandInsideDataTransfer { context_id: u8 },

    #[snafu(display("could not encode command set"))]
    EncodeCommand { source: command::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A fully assembled DIMSE message:
/// the command set and the reassembled data set bytes, if any.
///
/// The data set stays in its coded form here,
/// because only the presentation context knows its transfer syntax.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub command: CommandSet,
    pub dataset: Option<Vec<u8>>,
}

#[derive(Default)]
struct PartialMessage {
    command_bytes: Vec<u8>,
    command: Option<CommandSet>,
    dataset_bytes: Vec<u8>,
}

/// A per-context reassembler of incoming presentation data values.
#[derive(Default)]
pub struct MessageAssembler {
    partial: HashMap<u8, PartialMessage>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        MessageAssembler::default()
    }

    /// Feed one presentation data value.
    /// Returns a complete message with its context id
    /// once the last expected fragment arrives.
    pub fn push(&mut self, pdv: PDataValue) -> Result<Option<(u8, Message)>> {
        let context_id = pdv.presentation_context_id;
        let mut partial = self.partial.remove(&context_id).unwrap_or_default();

        match pdv.value_type {
            PDataValueType::Command => {
                if partial.command.is_some() {
                    return CommandInsideDataTransferSnafu { context_id }.fail();
                }
                partial.command_bytes.extend_from_slice(&pdv.data);
                if !pdv.is_last {
                    self.partial.insert(context_id, partial);
                    return Ok(None);
                }
                let command = CommandSet::from_bytes(&partial.command_bytes)
                    .context(BadCommandSnafu { context_id })?;
                if command.has_dataset() {
                    // hold on for the data fragments
                    partial.command_bytes.clear();
                    partial.dataset_bytes.clear();
                    partial.command = Some(command);
                    self.partial.insert(context_id, partial);
                    Ok(None)
                } else {
                    Ok(Some((
                        context_id,
                        Message {
                            command,
                            dataset: None,
                        },
                    )))
                }
            }
            PDataValueType::Data => {
                let Some(command) = partial.command.take() else {
                    return DataWithoutCommandSnafu { context_id }.fail();
                };
                partial.dataset_bytes.extend_from_slice(&pdv.data);
                if !pdv.is_last {
                    partial.command = Some(command);
                    self.partial.insert(context_id, partial);
                    return Ok(None);
                }
                Ok(Some((
                    context_id,
                    Message {
                        command,
                        dataset: Some(partial.dataset_bytes),
                    },
                )))
            }
        }
    }
}

/// Encode a message into P-DATA-TF PDUs bounded by the peer's
/// maximum PDU length.
/// Command and data fragments are never mixed in one PDU.
pub fn message_pdus(
    presentation_context_id: u8,
    command: &CommandSet,
    dataset: Option<&[u8]>,
    max_pdu_length: u32,
) -> Result<Vec<Pdu>> {
    let command_bytes = command.to_bytes().context(EncodeCommandSnafu)?;
    let mut pdus = fragment_pdvs(
        presentation_context_id,
        PDataValueType::Command,
        &command_bytes,
        max_pdu_length,
    );
    if let Some(dataset) = dataset {
        pdus.extend(fragment_pdvs(
            presentation_context_id,
            PDataValueType::Data,
            dataset,
            max_pdu_length,
        ));
    }
    Ok(pdus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Priority;
    use crate::status::Status;
    use ferrodicom_core::uids;

    fn pdvs_of(pdus: &[Pdu]) -> Vec<PDataValue> {
        pdus.iter()
            .flat_map(|pdu| match pdu {
                Pdu::PData { data } => data.clone(),
                _ => panic!("expected P-DATA-TF"),
            })
            .collect()
    }

    #[test]
    fn command_only_message_roundtrip() {
        let command = CommandSet::echo_rq(1);
        let pdus = message_pdus(1, &command, None, 16_384).unwrap();

        let mut assembler = MessageAssembler::new();
        let mut out = None;
        for pdv in pdvs_of(&pdus) {
            if let Some(found) = assembler.push(pdv).unwrap() {
                assert!(out.is_none(), "only one message expected");
                out = Some(found);
            }
        }
        let (ctx, message) = out.expect("message should assemble");
        assert_eq!(ctx, 1);
        assert_eq!(message.command, command);
        assert_eq!(message.dataset, None);
    }

    #[test]
    fn fragmented_message_reassembles_identically() {
        let command = CommandSet::store_rq(9, uids::CT_IMAGE_STORAGE, "1.2.3", Priority::Medium);
        let dataset: Vec<u8> = (0..40_000u32).map(|i| (i % 253) as u8).collect();
        // a small maximum forces fragmentation of both parts
        let pdus = message_pdus(5, &command, Some(&dataset), 4096).unwrap();
        assert!(pdus.len() > 10);

        let mut assembler = MessageAssembler::new();
        let mut out = None;
        for pdv in pdvs_of(&pdus) {
            assert!(pdv.data.len() + 6 <= 4096);
            if let Some(found) = assembler.push(pdv).unwrap() {
                out = Some(found);
            }
        }
        let (ctx, message) = out.expect("message should assemble");
        assert_eq!(ctx, 5);
        assert_eq!(message.command, command);
        assert_eq!(message.dataset.as_deref(), Some(&dataset[..]));
    }

    #[test]
    fn data_without_command_is_a_protocol_error() {
        let mut assembler = MessageAssembler::new();
        let err = assembler
            .push(PDataValue {
                presentation_context_id: 3,
                value_type: PDataValueType::Data,
                is_last: true,
                data: vec![0; 8],
            })
            .unwrap_err();
        assert!(matches!(err, Error::DataWithoutCommand { context_id: 3 }));
    }

    #[test]
    fn interleaved_contexts_assemble_independently() {
        let echo = CommandSet::echo_rq(1);
        let find = CommandSet::find_rsp(
            2,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            Status::SUCCESS,
            false,
        );
        let mut assembler = MessageAssembler::new();
        let first = pdvs_of(&message_pdus(1, &echo, None, 16_384).unwrap());
        let second = pdvs_of(&message_pdus(3, &find, None, 16_384).unwrap());

        let mut done = Vec::new();
        for pdv in second.into_iter().chain(first) {
            if let Some(found) = assembler.push(pdv).unwrap() {
                done.push(found);
            }
        }
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].0, 3);
        assert_eq!(done[1].0, 1);
    }
}
