//! The DIMSE service handlers of the server.
//!
//! Service errors become response statuses and the association stays open;
//! protocol violations abort the association.
use std::collections::BTreeSet;
use std::net::TcpStream;

use ferrodicom_core::{tags, uids};
use ferrodicom_dimse::command::{CommandField, CommandSet, SubOperations};
use ferrodicom_dimse::message::{message_pdus, Message, MessageAssembler};
use ferrodicom_dimse::Status;
use ferrodicom_encoding::{decode, encode, ByteReader, Endianness};
use ferrodicom_object::meta::FileMetaTable;
use ferrodicom_object::FileMetaTableBuilder;
use ferrodicom_ul::association::server::{
    CallingAeTitleLists, ServerAssociation, ServerAssociationOptions,
};
use ferrodicom_ul::pdu::Pdu;

use crate::index::MetadataRecord;
use crate::matching::QueryLevel;
use crate::scu::{DimseClient, ScuOptions};
use crate::server::ServerInner;
use crate::storage::StorageError;

type UlResult<T> = Result<T, ferrodicom_ul::association::Error>;

/// Serve one accepted connection until release, abort or failure.
pub(crate) fn run_session(inner: &ServerInner, stream: TcpStream, session_id: u64) {
    let options = session_options(inner);
    let mut association = match options.establish(stream) {
        Ok(association) => association,
        Err(e) => {
            inner.stats.connection_failed();
            tracing::info!("association not established: {}", e);
            return;
        }
    };
    tracing::info!(
        peer = association.peer_ae_title(),
        session = session_id,
        "association established"
    );

    let mut assembler = MessageAssembler::new();
    loop {
        match association.receive() {
            Ok(Pdu::PData { data }) => {
                let mut complete = Vec::new();
                for pdv in data {
                    inner.stats.bytes_received(pdv.data.len() as u64);
                    match assembler.push(pdv) {
                        Ok(Some(found)) => complete.push(found),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!("message assembly failed: {}", e);
                            let _ = association.abort();
                            return;
                        }
                    }
                }
                for (context_id, message) in complete {
                    if let Err(e) =
                        dispatch(inner, &mut association, &mut assembler, context_id, message)
                    {
                        tracing::warn!("session ended during service handling: {}", e);
                        return;
                    }
                }
            }
            Ok(Pdu::ReleaseRq) => {
                let _ = association.send(&Pdu::ReleaseRp);
                tracing::info!(peer = association.peer_ae_title(), "association released");
                return;
            }
            Ok(Pdu::AbortRq { source }) => {
                tracing::info!("association aborted by peer: {:?}", source);
                return;
            }
            Ok(other) => {
                tracing::warn!("unexpected {} mid-association", other.short_description());
                let _ = association.abort();
                return;
            }
            Err(ferrodicom_ul::association::Error::Receive {
                source: ferrodicom_ul::pdu::reader::Error::NoPduAvailable,
            }) => {
                // peer closed the transport without a release
                return;
            }
            Err(e) => {
                tracing::info!("session ended: {}", e);
                return;
            }
        }
    }
}

fn session_options(inner: &ServerInner) -> ServerAssociationOptions<CallingAeTitleLists> {
    let mut options = ServerAssociationOptions::new()
        .ae_title(inner.config.ae_title.clone())
        .max_pdu_length(inner.config.max_pdu_length)
        .ae_access_control(CallingAeTitleLists::new(
            inner.config.allowed_calling_ae_titles.iter().cloned(),
            inner.config.blocked_calling_ae_titles.iter().cloned(),
        ));
    options = options.with_abstract_syntax(uids::VERIFICATION);
    for uid in uids::STORAGE_SOP_CLASSES {
        options = options.with_abstract_syntax(*uid);
    }
    for uid in uids::QUERY_RETRIEVE_SOP_CLASSES {
        options = options.with_abstract_syntax(*uid);
    }
    options
}

fn send_message(
    inner: &ServerInner,
    association: &mut ServerAssociation,
    context_id: u8,
    command: &CommandSet,
    dataset: Option<&[u8]>,
) -> UlResult<()> {
    let pdus = match message_pdus(
        context_id,
        command,
        dataset,
        association.peer_max_pdu_length(),
    ) {
        Ok(pdus) => pdus,
        Err(e) => {
            tracing::error!("could not encode response message: {}", e);
            return association.abort();
        }
    };
    for pdu in pdus {
        if let Pdu::PData { data } = &pdu {
            for pdv in data {
                inner.stats.bytes_sent(pdv.data.len() as u64);
            }
        }
        association.send(&pdu)?;
    }
    Ok(())
}

fn dispatch(
    inner: &ServerInner,
    association: &mut ServerAssociation,
    assembler: &mut MessageAssembler,
    context_id: u8,
    message: Message,
) -> UlResult<()> {
    let field = match message.command.command_field() {
        Ok(field) => field,
        Err(e) => {
            tracing::warn!("unusable command set: {}", e);
            return association.abort();
        }
    };
    match field {
        CommandField::CEchoRq => handle_echo(inner, association, context_id, &message),
        CommandField::CStoreRq => handle_store(inner, association, context_id, &message),
        CommandField::CFindRq => {
            handle_find(inner, association, assembler, context_id, &message)
        }
        CommandField::CMoveRq => {
            handle_move(inner, association, assembler, context_id, &message)
        }
        CommandField::CGetRq => {
            handle_get(inner, association, assembler, context_id, &message)
        }
        CommandField::CCancelRq => {
            // nothing is in progress on this context anymore
            tracing::debug!("ignoring C-CANCEL outside of an active operation");
            Ok(())
        }
        other => {
            tracing::warn!("unsupported service {:?}", other);
            association.abort()
        }
    }
}

fn handle_echo(
    inner: &ServerInner,
    association: &mut ServerAssociation,
    context_id: u8,
    message: &Message,
) -> UlResult<()> {
    inner.stats.request("C-ECHO");
    let message_id = message.command.message_id().unwrap_or(0);
    let response = CommandSet::echo_rsp(message_id, Status::SUCCESS);
    send_message(inner, association, context_id, &response, None)?;
    inner.stats.completed("C-ECHO");
    Ok(())
}

/// Map a data set decoding failure onto a C-STORE status:
/// unreadable coding is unrecoverable,
/// malformed content does not match the SOP class.
fn store_status_for(e: &decode::Error) -> Status {
    match e {
        decode::Error::UnsupportedTransferSyntax { .. } | decode::Error::Inflate { .. } => {
            Status::PROCESSING_FAILURE
        }
        _ => Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS,
    }
}

fn handle_store(
    inner: &ServerInner,
    association: &mut ServerAssociation,
    context_id: u8,
    message: &Message,
) -> UlResult<()> {
    inner.stats.request("C-STORE");
    let command = &message.command;
    let message_id = command.message_id().unwrap_or(0);
    let sop_class_uid = command.affected_sop_class_uid().unwrap_or_default();
    let sop_instance_uid = command.affected_sop_instance_uid().unwrap_or_default();

    let status = match store_instance(inner, association, context_id, message, &sop_class_uid) {
        Ok(()) => {
            inner.stats.completed("C-STORE");
            inner.stats.instance_stored();
            Status::SUCCESS
        }
        Err(status) => {
            inner.stats.failed("C-STORE");
            status
        }
    };
    let response = CommandSet::store_rsp(message_id, &sop_class_uid, &sop_instance_uid, status);
    send_message(inner, association, context_id, &response, None)
}

/// The storage flow proper; failures map onto the response status.
fn store_instance(
    inner: &ServerInner,
    association: &ServerAssociation,
    context_id: u8,
    message: &Message,
    sop_class_uid: &str,
) -> Result<(), Status> {
    let context = association
        .accepted_context(context_id)
        .ok_or(Status::PROCESSING_FAILURE)?;
    let transfer_syntax_uid = context.transfer_syntax.clone();
    let dataset_bytes = message
        .dataset
        .as_deref()
        .ok_or(Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS)?;

    let dataset = decode::read_dataset_by_uid(dataset_bytes, &transfer_syntax_uid)
        .map_err(|e| {
            tracing::warn!("rejecting C-STORE data set: {}", e);
            store_status_for(&e)
        })?;

    let inner_sop_class = dataset.opt_string(tags::SOP_CLASS_UID).unwrap_or_default();
    if !sop_class_uid.is_empty() && !inner_sop_class.is_empty() && inner_sop_class != sop_class_uid
    {
        tracing::warn!(
            affected = sop_class_uid,
            found = inner_sop_class.as_str(),
            "SOP class mismatch between command and data set"
        );
        return Err(Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS);
    }

    // the record tells us where the file belongs
    let record = MetadataRecord::from_dataset(&dataset, Default::default(), 0)
        .map_err(|e| {
            tracing::warn!("cannot index data set: {}", e);
            Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS
        })?;

    let meta = FileMetaTableBuilder::new()
        .media_storage_sop_class_uid(&record.instance.sop_class_uid)
        .media_storage_sop_instance_uid(&record.instance.sop_instance_uid)
        .transfer_syntax(&transfer_syntax_uid)
        .source_application_entity_title(association.peer_ae_title())
        .build()
        .map_err(|e| {
            tracing::warn!("cannot build file meta group: {}", e);
            Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS
        })?;
    let meta_bytes = meta.to_bytes().map_err(|e| {
        tracing::error!("cannot encode file meta group: {}", e);
        Status::PROCESSING_FAILURE
    })?;

    // received data set bytes are preserved verbatim behind the envelope
    let mut file_bytes =
        Vec::with_capacity(128 + 4 + meta_bytes.len() + dataset_bytes.len());
    file_bytes.extend_from_slice(&[0u8; 128]);
    file_bytes.extend_from_slice(b"DICM");
    file_bytes.extend_from_slice(&meta_bytes);
    file_bytes.extend_from_slice(dataset_bytes);

    let path = inner
        .storage
        .place(
            &record.study.uid,
            &record.series.uid,
            &record.instance.sop_instance_uid,
            &file_bytes,
        )
        .map_err(|e| {
            tracing::error!("storage failure: {}", e);
            match e {
                // transient: the peer may retry later
                StorageError::DiskFull { .. } => Status::OUT_OF_RESOURCES,
                // identifiers unusable as a storage path are bad data
                StorageError::InvalidPathComponent { .. } => {
                    Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS
                }
                _ => Status::PROCESSING_FAILURE,
            }
        })?;

    let MetadataRecord {
        patient,
        study,
        series,
        instance,
    } = record;
    let record = MetadataRecord {
        patient,
        study,
        series,
        instance: crate::index::InstanceRecord {
            path,
            size: file_bytes.len() as u64,
            ..instance
        },
    };
    let mut index = inner.index.lock().unwrap_or_else(|e| e.into_inner());
    index.insert(record).map_err(|e| {
        tracing::warn!("index rejected instance: {}", e);
        Status::PROCESSING_FAILURE
    })?;
    Ok(())
}

/// Drain any PDUs already waiting on the socket,
/// looking for a C-CANCEL of the given message.
fn poll_cancel(
    association: &mut ServerAssociation,
    assembler: &mut MessageAssembler,
    message_id: u16,
) -> UlResult<bool> {
    while let Some(pdu) = association.try_receive()? {
        match pdu {
            Pdu::PData { data } => {
                for pdv in data {
                    let complete = match assembler.push(pdv) {
                        Ok(complete) => complete,
                        Err(e) => {
                            tracing::warn!("message assembly failed: {}", e);
                            association.abort()?;
                            return Err(ferrodicom_ul::association::Error::Aborted);
                        }
                    };
                    if let Some((_, message)) = complete {
                        let is_cancel = message
                            .command
                            .command_field()
                            .map(|f| f == CommandField::CCancelRq)
                            .unwrap_or(false);
                        let responds_to = message.command.message_id_responded().ok();
                        if is_cancel && responds_to == Some(message_id) {
                            return Ok(true);
                        }
                        tracing::warn!(
                            "discarding message received while an operation is in progress"
                        );
                    }
                }
            }
            Pdu::AbortRq { .. } => return Err(ferrodicom_ul::association::Error::Aborted),
            other => {
                tracing::warn!("unexpected {} while polling", other.short_description());
            }
        }
    }
    Ok(false)
}

fn handle_find(
    inner: &ServerInner,
    association: &mut ServerAssociation,
    assembler: &mut MessageAssembler,
    context_id: u8,
    message: &Message,
) -> UlResult<()> {
    inner.stats.request("C-FIND");
    let command = &message.command;
    let message_id = command.message_id().unwrap_or(0);
    let model_uid = command.affected_sop_class_uid().unwrap_or_default();

    let transfer_syntax_uid = match association.accepted_context(context_id) {
        Some(pc) => pc.transfer_syntax.clone(),
        None => return association.abort(),
    };

    let query = message.dataset.as_deref().and_then(|bytes| {
        decode::read_dataset_by_uid(bytes, &transfer_syntax_uid)
            .map_err(|e| tracing::warn!("unreadable C-FIND identifier: {}", e))
            .ok()
    });
    let level = query.as_ref().and_then(QueryLevel::of);
    let (Some(query), Some(level)) = (query, level) else {
        inner.stats.failed("C-FIND");
        let response = CommandSet::find_rsp(
            message_id,
            &model_uid,
            Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS,
            false,
        );
        return send_message(inner, association, context_id, &response, None);
    };

    // a consistent snapshot of the matching set, then release the lock
    let matches = {
        let index = inner.index.lock().unwrap_or_else(|e| e.into_inner());
        index.query(level, &query)
    };
    tracing::debug!(
        level = level.keyword(),
        matches = matches.len(),
        "running C-FIND"
    );

    for identifier in &matches {
        if poll_cancel(association, assembler, message_id)? {
            tracing::info!("C-FIND canceled by the peer");
            let response =
                CommandSet::find_rsp(message_id, &model_uid, Status::CANCEL, false);
            return send_message(inner, association, context_id, &response, None);
        }
        let identifier_bytes =
            match encode::write_dataset_by_uid(identifier, &transfer_syntax_uid) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("could not encode match: {}", e);
                    inner.stats.failed("C-FIND");
                    let response = CommandSet::find_rsp(
                        message_id,
                        &model_uid,
                        Status::PROCESSING_FAILURE,
                        false,
                    );
                    return send_message(inner, association, context_id, &response, None);
                }
            };
        let pending = CommandSet::find_rsp(message_id, &model_uid, Status::PENDING, true);
        send_message(
            inner,
            association,
            context_id,
            &pending,
            Some(&identifier_bytes),
        )?;
    }

    let done = CommandSet::find_rsp(message_id, &model_uid, Status::SUCCESS, false);
    send_message(inner, association, context_id, &done, None)?;
    inner.stats.completed("C-FIND");
    Ok(())
}

/// One instance loaded back from storage for a retrieve sub-operation.
struct LoadedInstance {
    sop_class_uid: String,
    sop_instance_uid: String,
    transfer_syntax_uid: String,
    dataset: Vec<u8>,
}

/// Read the stored envelope and slice out the coded data set,
/// without decoding the data set itself.
fn load_instance(
    inner: &ServerInner,
    record: &crate::index::InstanceRecord,
) -> Option<LoadedInstance> {
    let bytes = inner
        .storage
        .read(&record.path)
        .map_err(|e| tracing::error!("cannot load stored instance: {}", e))
        .ok()?;
    if bytes.len() < 132 || &bytes[128..132] != b"DICM" {
        tracing::error!(path = %record.path.display(), "stored file lost its envelope");
        return None;
    }
    let mut reader = ByteReader::new(&bytes[132..], Endianness::Little);
    let meta = FileMetaTable::read_from(&mut reader)
        .map_err(|e| tracing::error!("stored file has a bad meta group: {}", e))
        .ok()?;
    let dataset = bytes[bytes.len() - reader.remaining()..].to_vec();
    Some(LoadedInstance {
        sop_class_uid: meta.media_storage_sop_class_uid,
        sop_instance_uid: meta.media_storage_sop_instance_uid,
        transfer_syntax_uid: meta.transfer_syntax_uid,
        dataset,
    })
}

/// Decode the retrieve identifier and resolve the selected instances.
fn resolve_retrieve(
    inner: &ServerInner,
    message: &Message,
    transfer_syntax_uid: &str,
) -> Result<Vec<LoadedInstance>, Status> {
    let bytes = message
        .dataset
        .as_deref()
        .ok_or(Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS)?;
    let query = decode::read_dataset_by_uid(bytes, transfer_syntax_uid).map_err(|e| {
        tracing::warn!("unreadable retrieve identifier: {}", e);
        Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS
    })?;
    let level = QueryLevel::of(&query).ok_or(Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS)?;
    let records = {
        let index = inner.index.lock().unwrap_or_else(|e| e.into_inner());
        index.retrieve(level, &query)
    };
    Ok(records
        .iter()
        .filter_map(|record| load_instance(inner, record))
        .collect())
}

fn handle_move(
    inner: &ServerInner,
    association: &mut ServerAssociation,
    assembler: &mut MessageAssembler,
    context_id: u8,
    message: &Message,
) -> UlResult<()> {
    inner.stats.request("C-MOVE");
    let command = &message.command;
    let message_id = command.message_id().unwrap_or(0);
    let model_uid = command.affected_sop_class_uid().unwrap_or_default();

    let transfer_syntax_uid = match association.accepted_context(context_id) {
        Some(pc) => pc.transfer_syntax.clone(),
        None => return association.abort(),
    };

    let finish = |inner: &ServerInner,
                  association: &mut ServerAssociation,
                  status: Status,
                  counters: SubOperations|
     -> UlResult<()> {
        let response = CommandSet::move_rsp(message_id, &model_uid, status, counters);
        send_message(inner, association, context_id, &response, None)
    };

    // the configuration seam: destination AE title to endpoint
    let destination = command.move_destination().unwrap_or_default();
    let Some(endpoint) = inner.config.move_destination(&destination) else {
        tracing::warn!(destination = destination.as_str(), "unknown move destination");
        inner.stats.failed("C-MOVE");
        return finish(
            inner,
            association,
            Status::MOVE_DESTINATION_UNKNOWN,
            SubOperations::default(),
        );
    };
    let endpoint = endpoint.to_string();

    let instances = match resolve_retrieve(inner, message, &transfer_syntax_uid) {
        Ok(instances) => instances,
        Err(status) => {
            inner.stats.failed("C-MOVE");
            return finish(inner, association, status, SubOperations::default());
        }
    };

    // one context per distinct storage class and coding
    let proposals: Vec<(String, Vec<String>)> = instances
        .iter()
        .map(|i| (i.sop_class_uid.clone(), i.transfer_syntax_uid.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|(sop_class, ts)| (sop_class, vec![ts]))
        .collect();

    let scu_options = ScuOptions {
        calling_ae_title: inner.config.ae_title.clone(),
        called_ae_title: destination.clone(),
        max_pdu_length: inner.config.max_pdu_length,
        read_timeout: None,
    };
    let mut sub_client = match DimseClient::connect(&*endpoint, &scu_options, &proposals) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(
                destination = destination.as_str(),
                "cannot reach move destination: {}",
                e
            );
            inner.stats.failed("C-MOVE");
            return finish(
                inner,
                association,
                Status::OUT_OF_RESOURCES,
                SubOperations::default(),
            );
        }
    };

    let total = instances.len() as u16;
    let mut counters = SubOperations {
        remaining: total,
        ..SubOperations::default()
    };
    for instance in &instances {
        if poll_cancel(association, assembler, message_id)? {
            tracing::info!("C-MOVE canceled by the peer");
            sub_client.abort();
            return finish(inner, association, Status::CANCEL, counters);
        }
        let outcome = sub_client.store(
            &instance.sop_class_uid,
            &instance.sop_instance_uid,
            &instance.transfer_syntax_uid,
            &instance.dataset,
        );
        counters.remaining -= 1;
        match outcome {
            Ok(status) if status.is_success() => counters.completed += 1,
            Ok(status) => {
                tracing::warn!(
                    sop_instance = instance.sop_instance_uid.as_str(),
                    "sub-operation refused with status {}",
                    status
                );
                counters.failed += 1;
            }
            Err(e) => {
                tracing::warn!(
                    sop_instance = instance.sop_instance_uid.as_str(),
                    "sub-operation failed: {}",
                    e
                );
                counters.failed += 1;
            }
        }
        let pending = CommandSet::move_rsp(message_id, &model_uid, Status::PENDING, counters);
        send_message(inner, association, context_id, &pending, None)?;
    }
    let _ = sub_client.release();

    let status = if counters.failed == 0 {
        inner.stats.completed("C-MOVE");
        Status::SUCCESS
    } else {
        inner.stats.failed("C-MOVE");
        Status::SUB_OPERATIONS_COMPLETE_WITH_FAILURES
    };
    finish(inner, association, status, counters)
}

fn handle_get(
    inner: &ServerInner,
    association: &mut ServerAssociation,
    assembler: &mut MessageAssembler,
    context_id: u8,
    message: &Message,
) -> UlResult<()> {
    inner.stats.request("C-GET");
    let command = &message.command;
    let message_id = command.message_id().unwrap_or(0);
    let model_uid = command.affected_sop_class_uid().unwrap_or_default();

    let transfer_syntax_uid = match association.accepted_context(context_id) {
        Some(pc) => pc.transfer_syntax.clone(),
        None => return association.abort(),
    };

    let finish = |inner: &ServerInner,
                  association: &mut ServerAssociation,
                  status: Status,
                  counters: SubOperations|
     -> UlResult<()> {
        let response = CommandSet::get_rsp(message_id, &model_uid, status, counters);
        send_message(inner, association, context_id, &response, None)
    };

    let instances = match resolve_retrieve(inner, message, &transfer_syntax_uid) {
        Ok(instances) => instances,
        Err(status) => {
            inner.stats.failed("C-GET");
            return finish(inner, association, status, SubOperations::default());
        }
    };

    let total = instances.len() as u16;
    let mut counters = SubOperations {
        remaining: total,
        ..SubOperations::default()
    };
    let mut sub_message_id = 0x4000u16;
    for instance in &instances {
        if poll_cancel(association, assembler, message_id)? {
            tracing::info!("C-GET canceled by the peer");
            return finish(inner, association, Status::CANCEL, counters);
        }
        counters.remaining -= 1;
        match get_sub_store(
            inner,
            association,
            assembler,
            instance,
            &mut sub_message_id,
        )? {
            true => counters.completed += 1,
            false => counters.failed += 1,
        }
        let pending = CommandSet::get_rsp(message_id, &model_uid, Status::PENDING, counters);
        send_message(inner, association, context_id, &pending, None)?;
    }

    let status = if counters.failed == 0 {
        inner.stats.completed("C-GET");
        Status::SUCCESS
    } else {
        inner.stats.failed("C-GET");
        Status::SUB_OPERATIONS_COMPLETE_WITH_FAILURES
    };
    finish(inner, association, status, counters)
}

/// Run one reversed C-STORE on the same association.
/// The requester must have negotiated the storage class inbound.
fn get_sub_store(
    inner: &ServerInner,
    association: &mut ServerAssociation,
    assembler: &mut MessageAssembler,
    instance: &LoadedInstance,
    sub_message_id: &mut u16,
) -> UlResult<bool> {
    let Some(store_context) = association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.is_accepted() && pc.abstract_syntax == instance.sop_class_uid)
        .cloned()
    else {
        tracing::warn!(
            sop_class = instance.sop_class_uid.as_str(),
            "peer negotiated no inbound context for this storage class"
        );
        return Ok(false);
    };

    // re-code the data set when the inbound context wants another syntax
    let payload = if store_context.transfer_syntax
        == ferrodicom_core::trim_uid(&instance.transfer_syntax_uid)
    {
        instance.dataset.clone()
    } else {
        let decoded =
            match decode::read_dataset_by_uid(&instance.dataset, &instance.transfer_syntax_uid) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!("cannot decode stored instance for recoding: {}", e);
                    return Ok(false);
                }
            };
        match encode::write_dataset_by_uid(&decoded, &store_context.transfer_syntax) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("cannot recode instance: {}", e);
                return Ok(false);
            }
        }
    };

    *sub_message_id = sub_message_id.wrapping_add(1).max(1);
    let store_rq = CommandSet::store_rq(
        *sub_message_id,
        &instance.sop_class_uid,
        &instance.sop_instance_uid,
        ferrodicom_dimse::command::Priority::Medium,
    );
    send_message(
        inner,
        association,
        store_context.id,
        &store_rq,
        Some(&payload),
    )?;

    // await the peer's store response
    loop {
        match association.receive()? {
            Pdu::PData { data } => {
                for pdv in data {
                    inner.stats.bytes_received(pdv.data.len() as u64);
                    let complete = match assembler.push(pdv) {
                        Ok(complete) => complete,
                        Err(e) => {
                            tracing::warn!("message assembly failed: {}", e);
                            association.abort()?;
                            return Err(ferrodicom_ul::association::Error::Aborted);
                        }
                    };
                    if let Some((_, message)) = complete {
                        let field = message.command.command_field().ok();
                        if field == Some(CommandField::CStoreRsp)
                            && message.command.message_id_responded().ok()
                                == Some(*sub_message_id)
                        {
                            let ok = message
                                .command
                                .status()
                                .map(Status::is_success)
                                .unwrap_or(false);
                            return Ok(ok);
                        }
                        tracing::warn!("discarding message while awaiting sub-store response");
                    }
                }
            }
            Pdu::AbortRq { .. } => return Err(ferrodicom_ul::association::Error::Aborted),
            other => {
                tracing::warn!(
                    "unexpected {} while awaiting sub-store response",
                    other.short_description()
                );
                association.abort()?;
                return Err(ferrodicom_ul::association::Error::Aborted);
            }
        }
    }
}
