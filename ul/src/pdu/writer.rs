//! PDU writer module
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use snafu::{ResultExt, Snafu};
use std::io::Write;

use crate::pdu::*;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not write PDU field `{}`", field))]
    WriteField {
        field: &'static str,
        source: std::io::Error,
    },

    #[snafu(display("could not write chunk `{}`", name))]
    WriteChunk {
        name: &'static str,
        source: WriteChunkError,
    },
}

#[derive(Debug, Snafu)]
pub enum WriteChunkError {
    #[snafu(display("failed to build chunk"))]
    BuildChunk { source: Box<Error> },

    #[snafu(display("failed to write chunk length"))]
    WriteLength { source: std::io::Error },

    #[snafu(display("failed to write chunk data"))]
    WriteData { source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

fn write_chunk_u32<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;
    writer
        .write_u32::<BigEndian>(data.len() as u32)
        .context(WriteLengthSnafu)?;
    writer.write_all(&data).context(WriteDataSnafu)?;
    Ok(())
}

fn write_chunk_u16<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;
    writer
        .write_u16::<BigEndian>(data.len() as u16)
        .context(WriteLengthSnafu)?;
    writer.write_all(&data).context(WriteDataSnafu)?;
    Ok(())
}

fn write_ae_title(writer: &mut Vec<u8>, title: &str, field: &'static str) -> Result<()> {
    let mut bytes = title.as_bytes().to_vec();
    bytes.resize(16, b' ');
    writer.write_all(&bytes).context(WriteFieldSnafu { field })
}

fn write_user_information(
    writer: &mut Vec<u8>,
    user_variables: &[UserVariableItem],
) -> Result<()> {
    writer
        .write_u8(0x50)
        .context(WriteFieldSnafu { field: "Item-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteFieldSnafu { field: "reserved" })?;
    write_chunk_u16(writer, |writer| {
        for item in user_variables {
            match item {
                UserVariableItem::MaxLength(max_length) => {
                    writer
                        .write_u8(0x51)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer.write_u32::<BigEndian>(*max_length).context(
                            WriteFieldSnafu {
                                field: "Maximum-length-received",
                            },
                        )
                    })
                    .context(WriteChunkSnafu { name: "Max Length" })?;
                }
                UserVariableItem::ImplementationClassUid(uid) => {
                    writer
                        .write_u8(0x52)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer.write_all(uid.as_bytes()).context(WriteFieldSnafu {
                            field: "Implementation-class-uid",
                        })
                    })
                    .context(WriteChunkSnafu {
                        name: "Implementation Class UID",
                    })?;
                }
                UserVariableItem::ImplementationVersionName(name) => {
                    writer
                        .write_u8(0x55)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer.write_all(name.as_bytes()).context(WriteFieldSnafu {
                            field: "Implementation-version-name",
                        })
                    })
                    .context(WriteChunkSnafu {
                        name: "Implementation Version Name",
                    })?;
                }
                UserVariableItem::Unknown(item_type, data) => {
                    writer
                        .write_u8(*item_type)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_all(data)
                            .context(WriteFieldSnafu { field: "Unknown" })
                    })
                    .context(WriteChunkSnafu {
                        name: "Unknown sub-item",
                    })?;
                }
            }
        }
        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "User Information",
    })
}

/// Write a single PDU into the writer.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    match pdu {
        Pdu::AssociationRq(AssociationRq {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            writer
                .write_u8(0x01)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "reserved" })?;

            write_chunk_u32(writer, |writer| {
                writer
                    .write_u16::<BigEndian>(*protocol_version)
                    .context(WriteFieldSnafu {
                        field: "Protocol-version",
                    })?;
                writer
                    .write_u16::<BigEndian>(0x00)
                    .context(WriteFieldSnafu { field: "reserved" })?;
                write_ae_title(writer, called_ae_title, "Called-AE-title")?;
                write_ae_title(writer, calling_ae_title, "Calling-AE-title")?;
                writer
                    .write_all(&[0; 32])
                    .context(WriteFieldSnafu { field: "reserved" })?;

                // application context, presentation contexts, user info
                writer
                    .write_u8(0x10)
                    .context(WriteFieldSnafu { field: "Item-type" })?;
                writer
                    .write_u8(0x00)
                    .context(WriteFieldSnafu { field: "reserved" })?;
                write_chunk_u16(writer, |writer| {
                    writer
                        .write_all(application_context_name.as_bytes())
                        .context(WriteFieldSnafu {
                            field: "Application-context-name",
                        })
                })
                .context(WriteChunkSnafu {
                    name: "Application Context",
                })?;

                for pc in presentation_contexts {
                    writer
                        .write_u8(0x20)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer.write_u8(pc.id).context(WriteFieldSnafu {
                            field: "Presentation-context-ID",
                        })?;
                        writer
                            .write_all(&[0; 3])
                            .context(WriteFieldSnafu { field: "reserved" })?;

                        writer
                            .write_u8(0x30)
                            .context(WriteFieldSnafu { field: "Item-type" })?;
                        writer
                            .write_u8(0x00)
                            .context(WriteFieldSnafu { field: "reserved" })?;
                        write_chunk_u16(writer, |writer| {
                            writer
                                .write_all(pc.abstract_syntax.as_bytes())
                                .context(WriteFieldSnafu {
                                    field: "Abstract-syntax-name",
                                })
                        })
                        .context(WriteChunkSnafu {
                            name: "Abstract Syntax",
                        })?;

                        for ts in &pc.transfer_syntaxes {
                            writer
                                .write_u8(0x40)
                                .context(WriteFieldSnafu { field: "Item-type" })?;
                            writer
                                .write_u8(0x00)
                                .context(WriteFieldSnafu { field: "reserved" })?;
                            write_chunk_u16(writer, |writer| {
                                writer.write_all(ts.as_bytes()).context(WriteFieldSnafu {
                                    field: "Transfer-syntax-name",
                                })
                            })
                            .context(WriteChunkSnafu {
                                name: "Transfer Syntax",
                            })?;
                        }
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "Presentation Context",
                    })?;
                }

                write_user_information(writer, user_variables)
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RQ",
            })?;
            Ok(())
        }
        Pdu::AssociationAc(AssociationAc {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            writer
                .write_u8(0x02)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "reserved" })?;

            write_chunk_u32(writer, |writer| {
                writer
                    .write_u16::<BigEndian>(*protocol_version)
                    .context(WriteFieldSnafu {
                        field: "Protocol-version",
                    })?;
                writer
                    .write_u16::<BigEndian>(0x00)
                    .context(WriteFieldSnafu { field: "reserved" })?;
                write_ae_title(writer, called_ae_title, "Called-AE-title")?;
                write_ae_title(writer, calling_ae_title, "Calling-AE-title")?;
                writer
                    .write_all(&[0; 32])
                    .context(WriteFieldSnafu { field: "reserved" })?;

                writer
                    .write_u8(0x10)
                    .context(WriteFieldSnafu { field: "Item-type" })?;
                writer
                    .write_u8(0x00)
                    .context(WriteFieldSnafu { field: "reserved" })?;
                write_chunk_u16(writer, |writer| {
                    writer
                        .write_all(application_context_name.as_bytes())
                        .context(WriteFieldSnafu {
                            field: "Application-context-name",
                        })
                })
                .context(WriteChunkSnafu {
                    name: "Application Context",
                })?;

                for pc in presentation_contexts {
                    writer
                        .write_u8(0x21)
                        .context(WriteFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WriteFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer.write_u8(pc.id).context(WriteFieldSnafu {
                            field: "Presentation-context-ID",
                        })?;
                        writer
                            .write_u8(0x00)
                            .context(WriteFieldSnafu { field: "reserved" })?;
                        writer.write_u8(pc.reason as u8).context(WriteFieldSnafu {
                            field: "Result/Reason",
                        })?;
                        writer
                            .write_u8(0x00)
                            .context(WriteFieldSnafu { field: "reserved" })?;

                        writer
                            .write_u8(0x40)
                            .context(WriteFieldSnafu { field: "Item-type" })?;
                        writer
                            .write_u8(0x00)
                            .context(WriteFieldSnafu { field: "reserved" })?;
                        write_chunk_u16(writer, |writer| {
                            writer
                                .write_all(pc.transfer_syntax.as_bytes())
                                .context(WriteFieldSnafu {
                                    field: "Transfer-syntax-name",
                                })
                        })
                        .context(WriteChunkSnafu {
                            name: "Transfer Syntax",
                        })?;
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "Presentation Context",
                    })?;
                }

                write_user_information(writer, user_variables)
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-AC",
            })?;
            Ok(())
        }
        Pdu::AssociationRj(AssociationRj { result, source }) => {
            writer
                .write_u8(0x03)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "reserved" })?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_u8(0x00)
                    .context(WriteFieldSnafu { field: "reserved" })?;
                writer
                    .write_u8(match result {
                        AssociationRjResult::Permanent => 0x01,
                        AssociationRjResult::Transient => 0x02,
                    })
                    .context(WriteFieldSnafu { field: "Result" })?;
                let (source_byte, reason_byte) = match source {
                    AssociationRjSource::ServiceUser(reason) => (
                        0x01,
                        match reason {
                            ServiceUserReason::NoReasonGiven => 0x01,
                            ServiceUserReason::ApplicationContextNameNotSupported => 0x02,
                            ServiceUserReason::CallingAeTitleNotRecognized => 0x03,
                            ServiceUserReason::CalledAeTitleNotRecognized => 0x07,
                            ServiceUserReason::Reserved(data) => *data,
                        },
                    ),
                    AssociationRjSource::ServiceProviderAcse(reason) => (
                        0x02,
                        match reason {
                            ServiceProviderAcseReason::NoReasonGiven => 0x01,
                            ServiceProviderAcseReason::ProtocolVersionNotSupported => 0x02,
                        },
                    ),
                    AssociationRjSource::ServiceProviderPresentation(reason) => (
                        0x03,
                        match reason {
                            ServiceProviderPresentationReason::TemporaryCongestion => 0x01,
                            ServiceProviderPresentationReason::LocalLimitExceeded => 0x02,
                            ServiceProviderPresentationReason::Reserved(data) => *data,
                        },
                    ),
                };
                writer
                    .write_u8(source_byte)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason_byte).context(WriteFieldSnafu {
                    field: "Reason/Diag.",
                })
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RJ",
            })?;
            Ok(())
        }
        Pdu::PData { data } => {
            writer
                .write_u8(0x04)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "reserved" })?;
            write_chunk_u32(writer, |writer| {
                for pdv in data {
                    write_chunk_u32(writer, |writer| {
                        writer.push(pdv.presentation_context_id);
                        let mut header = 0x00u8;
                        if pdv.value_type == PDataValueType::Command {
                            header |= 0x01;
                        }
                        if pdv.is_last {
                            header |= 0x02;
                        }
                        writer.push(header);
                        writer.extend_from_slice(&pdv.data);
                        Ok(())
                    })
                    .context(WriteChunkSnafu {
                        name: "Presentation-data-value",
                    })?;
                }
                Ok(())
            })
            .context(WriteChunkSnafu { name: "P-DATA-TF" })?;
            Ok(())
        }
        Pdu::ReleaseRq => {
            writer
                .write_u8(0x05)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "reserved" })?;
            writer
                .write_u32::<BigEndian>(4)
                .context(WriteFieldSnafu { field: "length" })?;
            writer
                .write_all(&[0; 4])
                .context(WriteFieldSnafu { field: "reserved" })?;
            Ok(())
        }
        Pdu::ReleaseRp => {
            writer
                .write_u8(0x06)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "reserved" })?;
            writer
                .write_u32::<BigEndian>(4)
                .context(WriteFieldSnafu { field: "length" })?;
            writer
                .write_all(&[0; 4])
                .context(WriteFieldSnafu { field: "reserved" })?;
            Ok(())
        }
        Pdu::AbortRq { source } => {
            writer
                .write_u8(0x07)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "reserved" })?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_all(&[0; 2])
                    .context(WriteFieldSnafu { field: "reserved" })?;
                let (source_byte, reason_byte) = match source {
                    AbortSource::ServiceUser => (0x00, 0x00),
                    AbortSource::ServiceProvider(reason) => (
                        0x02,
                        match reason {
                            AbortServiceProviderReason::ReasonNotSpecified => 0x00,
                            AbortServiceProviderReason::UnrecognizedPdu => 0x01,
                            AbortServiceProviderReason::UnexpectedPdu => 0x02,
                            AbortServiceProviderReason::UnrecognizedPduParameter => 0x04,
                            AbortServiceProviderReason::UnexpectedPduParameter => 0x05,
                            AbortServiceProviderReason::InvalidPduParameter => 0x06,
                        },
                    ),
                };
                writer
                    .write_u8(source_byte)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason_byte).context(WriteFieldSnafu {
                    field: "Reason/Diag",
                })
            })
            .context(WriteChunkSnafu { name: "A-ABORT" })?;
            Ok(())
        }
        Pdu::Unknown { pdu_type, data } => {
            writer
                .write_u8(*pdu_type)
                .context(WriteFieldSnafu { field: "PDU-type" })?;
            writer
                .write_u8(0x00)
                .context(WriteFieldSnafu { field: "reserved" })?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_all(data)
                    .context(WriteFieldSnafu { field: "data" })
            })
            .context(WriteChunkSnafu { name: "Unknown" })?;
            Ok(())
        }
    }
}
