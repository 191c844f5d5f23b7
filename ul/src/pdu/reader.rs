//! PDU reader module
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom};

use crate::pdu::*;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("invalid maximum PDU length {}", max_pdu_length))]
    InvalidMaxPdu { max_pdu_length: u32 },

    #[snafu(display("no PDU available"))]
    NoPduAvailable,

    #[snafu(display("could not read PDU"))]
    ReadPdu { source: std::io::Error },

    #[snafu(display("could not read PDU field `{}`", field))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
    },

    #[snafu(display("invalid presentation data item length {} (must be >= 2)", length))]
    InvalidItemLength { length: u32 },

    #[snafu(display(
        "incoming PDU of length {} exceeds the maximum of {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
    },

    #[snafu(display("PDU field `{}` holds invalid text", field))]
    DecodeText { field: &'static str },

    #[snafu(display("invalid reject source or reason"))]
    InvalidRejectSourceOrReason,

    #[snafu(display("invalid abort source or reason"))]
    InvalidAbortSourceOrReason,

    #[snafu(display("invalid presentation context result reason {}", value))]
    InvalidResultReason { value: u8 },

    #[snafu(display("unknown sub-item type {:#04x} in presentation context", item_type))]
    UnknownPresentationContextSubItem { item_type: u8 },

    #[snafu(display("missing application context name"))]
    MissingApplicationContextName,

    #[snafu(display("missing abstract syntax"))]
    MissingAbstractSyntax,

    #[snafu(display("missing transfer syntax"))]
    MissingTransferSyntax,

    #[snafu(display("multiple transfer syntaxes in a context result"))]
    MultipleTransferSyntaxesAccepted,
}

pub type Result<T> = std::result::Result<T, Error>;

fn read_n<R>(reader: &mut R, bytes_to_read: usize) -> std::io::Result<Vec<u8>>
where
    R: Read,
{
    let mut result = Vec::new();
    reader.take(bytes_to_read as u64).read_to_end(&mut result)?;
    if result.len() < bytes_to_read {
        return Err(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "incomplete PDU content",
        ));
    }
    Ok(result)
}

fn decode_text(bytes: &[u8], field: &'static str) -> Result<String> {
    let text = std::str::from_utf8(bytes).ok().context(DecodeTextSnafu { field })?;
    Ok(text.trim_matches([' ', '\0']).to_string())
}

/// Read a single PDU from the stream.
///
/// In strict mode, PDUs longer than `max_pdu_length` are an error;
/// otherwise they are tolerated up to this implementation's hard maximum.
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: Read,
{
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );

    // An EOF on the first two bytes means the peer closed the
    // transport without starting another PDU; after that, an EOF is a
    // genuine protocol error.
    let mut bytes = [0; 2];
    if let Err(e) = reader.read_exact(&mut bytes) {
        ensure!(e.kind() != ErrorKind::UnexpectedEof, NoPduAvailableSnafu);
        return Err(e).context(ReadPduFieldSnafu { field: "type" });
    }

    let pdu_type = bytes[0];
    let pdu_length = reader
        .read_u32::<BigEndian>()
        .context(ReadPduFieldSnafu { field: "length" })?;

    if strict {
        ensure!(
            pdu_length <= max_pdu_length,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length
            }
        );
    } else {
        ensure!(
            pdu_length <= MAXIMUM_PDU_SIZE,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: MAXIMUM_PDU_SIZE
            }
        );
        if pdu_length > max_pdu_length {
            tracing::warn!(
                "incoming PDU of length {} exceeds the negotiated maximum of {}",
                pdu_length,
                max_pdu_length
            );
        }
    }

    let bytes = read_n(reader, pdu_length as usize).context(ReadPduSnafu)?;
    let mut cursor = Cursor::new(bytes);

    match pdu_type {
        0x01 | 0x02 => {
            // A-ASSOCIATE-RQ / A-ASSOCIATE-AC
            let protocol_version = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                field: "Protocol-version",
            })?;

            // reserved
            cursor
                .read_u16::<BigEndian>()
                .context(ReadPduFieldSnafu { field: "reserved" })?;

            let mut ae_bytes = [0; 16];
            cursor
                .read_exact(&mut ae_bytes)
                .context(ReadPduFieldSnafu {
                    field: "Called-AE-title",
                })?;
            let called_ae_title = decode_text(&ae_bytes, "Called-AE-title")?;

            let mut ae_bytes = [0; 16];
            cursor
                .read_exact(&mut ae_bytes)
                .context(ReadPduFieldSnafu {
                    field: "Calling-AE-title",
                })?;
            let calling_ae_title = decode_text(&ae_bytes, "Calling-AE-title")?;

            // 32 reserved bytes
            cursor
                .seek(SeekFrom::Current(32))
                .context(ReadPduFieldSnafu { field: "reserved" })?;

            let mut application_context_name: Option<String> = None;
            let mut proposed = vec![];
            let mut results = vec![];
            let mut user_variables = vec![];

            while cursor.position() < cursor.get_ref().len() as u64 {
                match read_pdu_variable(&mut cursor)? {
                    PduVariableItem::ApplicationContext(val) => {
                        application_context_name = Some(val);
                    }
                    PduVariableItem::PresentationContextProposed(val) => proposed.push(val),
                    PduVariableItem::PresentationContextResult(val) => results.push(val),
                    PduVariableItem::UserVariables(val) => user_variables = val,
                    PduVariableItem::Unknown(item_type) => {
                        tracing::debug!(
                            "ignoring unknown variable item {:#04x} in association PDU",
                            item_type
                        );
                    }
                }
            }

            let application_context_name =
                application_context_name.context(MissingApplicationContextNameSnafu)?;

            if pdu_type == 0x01 {
                Ok(Pdu::AssociationRq(AssociationRq {
                    protocol_version,
                    calling_ae_title,
                    called_ae_title,
                    application_context_name,
                    presentation_contexts: proposed,
                    user_variables,
                }))
            } else {
                Ok(Pdu::AssociationAc(AssociationAc {
                    protocol_version,
                    calling_ae_title,
                    called_ae_title,
                    application_context_name,
                    presentation_contexts: results,
                    user_variables,
                }))
            }
        }
        0x03 => {
            // A-ASSOCIATE-RJ
            cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "reserved" })?;
            let result = AssociationRjResult::from_u8(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Result" })?,
            )
            .context(InvalidRejectSourceOrReasonSnafu)?;
            let source_byte = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason_byte = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Reason/Diag.",
            })?;
            let source = AssociationRjSource::from_u8(source_byte, reason_byte)
                .context(InvalidRejectSourceOrReasonSnafu)?;
            Ok(Pdu::AssociationRj(AssociationRj { result, source }))
        }
        0x04 => {
            // P-DATA-TF: one or more presentation data value items
            let mut values = vec![];
            while cursor.position() < cursor.get_ref().len() as u64 {
                let item_length = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-length",
                })?;
                ensure!(
                    item_length >= 2,
                    InvalidItemLengthSnafu {
                        length: item_length
                    }
                );

                let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Presentation-context-ID",
                })?;

                // message control header:
                // bit 0 = command fragment, bit 1 = last fragment
                let header = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Message Control Header",
                })?;
                let value_type = if header & 0x01 != 0 {
                    PDataValueType::Command
                } else {
                    PDataValueType::Data
                };
                let is_last = (header & 0x02) != 0;

                let data =
                    read_n(&mut cursor, (item_length - 2) as usize).context(ReadPduFieldSnafu {
                        field: "Presentation-data-value",
                    })?;

                values.push(PDataValue {
                    presentation_context_id,
                    value_type,
                    is_last,
                    data,
                });
            }
            Ok(Pdu::PData { data: values })
        }
        0x05 => {
            cursor
                .seek(SeekFrom::Current(4))
                .context(ReadPduFieldSnafu { field: "reserved" })?;
            Ok(Pdu::ReleaseRq)
        }
        0x06 => {
            cursor
                .seek(SeekFrom::Current(4))
                .context(ReadPduFieldSnafu { field: "reserved" })?;
            Ok(Pdu::ReleaseRp)
        }
        0x07 => {
            let mut buf = [0u8; 2];
            cursor
                .read_exact(&mut buf)
                .context(ReadPduFieldSnafu { field: "reserved" })?;
            let source_byte = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason_byte = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Reason/Diag",
            })?;
            let source = AbortSource::from_u8(source_byte, reason_byte)
                .context(InvalidAbortSourceOrReasonSnafu)?;
            Ok(Pdu::AbortRq { source })
        }
        _ => {
            let data = cursor.into_inner();
            Ok(Pdu::Unknown { pdu_type, data })
        }
    }
}

enum PduVariableItem {
    Unknown(u8),
    ApplicationContext(String),
    PresentationContextProposed(PresentationContextProposed),
    PresentationContextResult(PresentationContextResult),
    UserVariables(Vec<UserVariableItem>),
}

fn read_pdu_variable<R>(reader: &mut R) -> Result<PduVariableItem>
where
    R: Read,
{
    let item_type = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;
    reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "reserved" })?;
    let item_length = reader.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })?;
    let bytes = read_n(reader, item_length as usize).context(ReadPduSnafu)?;
    let mut cursor = Cursor::new(bytes);

    match item_type {
        0x10 => {
            // application context item
            let val = decode_text(cursor.get_ref(), "Application-context-name")?;
            Ok(PduVariableItem::ApplicationContext(val))
        }
        0x20 => {
            // proposed presentation context item
            let mut abstract_syntax: Option<String> = None;
            let mut transfer_syntaxes = vec![];

            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            cursor
                .seek(SeekFrom::Current(3))
                .context(ReadPduFieldSnafu { field: "reserved" })?;

            while cursor.position() < cursor.get_ref().len() as u64 {
                let item_type = cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Item-type" })?;
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "reserved" })?;
                let item_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-length",
                })?;
                match item_type {
                    0x30 => {
                        let bytes = read_n(&mut cursor, item_length as usize).context(
                            ReadPduFieldSnafu {
                                field: "Abstract-syntax-name",
                            },
                        )?;
                        abstract_syntax = Some(decode_text(&bytes, "Abstract-syntax-name")?);
                    }
                    0x40 => {
                        let bytes = read_n(&mut cursor, item_length as usize).context(
                            ReadPduFieldSnafu {
                                field: "Transfer-syntax-name",
                            },
                        )?;
                        transfer_syntaxes.push(decode_text(&bytes, "Transfer-syntax-name")?);
                    }
                    _ => {
                        return UnknownPresentationContextSubItemSnafu { item_type }.fail();
                    }
                }
            }

            ensure!(!transfer_syntaxes.is_empty(), MissingTransferSyntaxSnafu);

            Ok(PduVariableItem::PresentationContextProposed(
                PresentationContextProposed {
                    id: presentation_context_id,
                    abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
                    transfer_syntaxes,
                },
            ))
        }
        0x21 => {
            // presentation context result item
            let mut transfer_syntax: Option<String> = None;

            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;
            cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "reserved" })?;
            let reason_byte = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Result/Reason",
            })?;
            let reason = PresentationContextResultReason::from_u8(reason_byte)
                .context(InvalidResultReasonSnafu { value: reason_byte })?;
            cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "reserved" })?;

            while cursor.position() < cursor.get_ref().len() as u64 {
                let item_type = cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Item-type" })?;
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "reserved" })?;
                let item_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-length",
                })?;
                match item_type {
                    0x40 => {
                        ensure!(
                            transfer_syntax.is_none(),
                            MultipleTransferSyntaxesAcceptedSnafu
                        );
                        let bytes = read_n(&mut cursor, item_length as usize).context(
                            ReadPduFieldSnafu {
                                field: "Transfer-syntax-name",
                            },
                        )?;
                        transfer_syntax = Some(decode_text(&bytes, "Transfer-syntax-name")?);
                    }
                    _ => {
                        return UnknownPresentationContextSubItemSnafu { item_type }.fail();
                    }
                }
            }

            Ok(PduVariableItem::PresentationContextResult(
                PresentationContextResult {
                    id: presentation_context_id,
                    reason,
                    transfer_syntax: transfer_syntax.context(MissingTransferSyntaxSnafu)?,
                },
            ))
        }
        0x50 => {
            // user information item
            let mut user_variables = vec![];
            while cursor.position() < cursor.get_ref().len() as u64 {
                let item_type = cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Item-type" })?;
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "reserved" })?;
                let item_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-length",
                })?;
                match item_type {
                    0x51 => {
                        user_variables.push(UserVariableItem::MaxLength(
                            cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                                field: "Maximum-length-received",
                            })?,
                        ));
                    }
                    0x52 => {
                        let bytes = read_n(&mut cursor, item_length as usize).context(
                            ReadPduFieldSnafu {
                                field: "Implementation-class-uid",
                            },
                        )?;
                        user_variables.push(UserVariableItem::ImplementationClassUid(
                            decode_text(&bytes, "Implementation-class-uid")?,
                        ));
                    }
                    0x55 => {
                        let bytes = read_n(&mut cursor, item_length as usize).context(
                            ReadPduFieldSnafu {
                                field: "Implementation-version-name",
                            },
                        )?;
                        user_variables.push(UserVariableItem::ImplementationVersionName(
                            decode_text(&bytes, "Implementation-version-name")?,
                        ));
                    }
                    _ => {
                        let bytes = read_n(&mut cursor, item_length as usize)
                            .context(ReadPduFieldSnafu { field: "Unknown" })?;
                        user_variables.push(UserVariableItem::Unknown(item_type, bytes));
                    }
                }
            }
            Ok(PduVariableItem::UserVariables(user_variables))
        }
        _ => Ok(PduVariableItem::Unknown(item_type)),
    }
}
