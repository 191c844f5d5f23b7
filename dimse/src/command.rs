//! The command set: a data set of group 0x0000 elements,
//! always coded in implicit VR little endian.
use snafu::{ResultExt, Snafu};

use ferrodicom_core::{tags, DataElement, DataSet, Tag, VR};
use ferrodicom_encoding::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use ferrodicom_encoding::{decode, encode};

use crate::status::Status;

/// The command data set type value meaning "no data set follows".
pub const NO_DATA_SET: u16 = 0x0101;
/// A command data set type value meaning "a data set follows".
pub const DATA_SET_FOLLOWS: u16 = 0x0001;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not decode command set"))]
    DecodeCommand { source: decode::Error },

    #[snafu(display("could not encode command set"))]
    EncodeCommand { source: encode::Error },

    #[snafu(display("command set is missing {}", name))]
    MissingField {
        name: &'static str,
        source: ferrodicom_core::dataset::AccessError,
    },

    #[snafu(display("unknown service in command field {:#06x}", value))]
    UnknownService { value: u16 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The service identifier of a command set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandField {
    CStoreRq,
    CStoreRsp,
    CGetRq,
    CGetRsp,
    CFindRq,
    CFindRsp,
    CMoveRq,
    CMoveRsp,
    CEchoRq,
    CEchoRsp,
    CCancelRq,
}

impl CommandField {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(CommandField::CStoreRq),
            0x8001 => Some(CommandField::CStoreRsp),
            0x0010 => Some(CommandField::CGetRq),
            0x8010 => Some(CommandField::CGetRsp),
            0x0020 => Some(CommandField::CFindRq),
            0x8020 => Some(CommandField::CFindRsp),
            0x0021 => Some(CommandField::CMoveRq),
            0x8021 => Some(CommandField::CMoveRsp),
            0x0030 => Some(CommandField::CEchoRq),
            0x8030 => Some(CommandField::CEchoRsp),
            0x0FFF => Some(CommandField::CCancelRq),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            CommandField::CStoreRq => 0x0001,
            CommandField::CStoreRsp => 0x8001,
            CommandField::CGetRq => 0x0010,
            CommandField::CGetRsp => 0x8010,
            CommandField::CFindRq => 0x0020,
            CommandField::CFindRsp => 0x8020,
            CommandField::CMoveRq => 0x0021,
            CommandField::CMoveRsp => 0x8021,
            CommandField::CEchoRq => 0x0030,
            CommandField::CEchoRsp => 0x8030,
            CommandField::CCancelRq => 0x0FFF,
        }
    }

    /// Whether this is a response service code (request code | 0x8000).
    pub fn is_response(self) -> bool {
        self.to_u16() & 0x8000 != 0
    }

    /// The response service code paired with this request.
    pub fn response(self) -> Option<CommandField> {
        CommandField::from_u16(self.to_u16() | 0x8000)
    }
}

/// The priority of a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    fn to_u16(self) -> u16 {
        match self {
            Priority::Medium => 0x0000,
            Priority::High => 0x0001,
            Priority::Low => 0x0002,
        }
    }
}

/// Running counters of C-MOVE and C-GET sub-operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct SubOperations {
    pub remaining: u16,
    pub completed: u16,
    pub failed: u16,
    pub warning: u16,
}

/// A command set carried in the command fragments of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSet {
    dataset: DataSet,
}

impl CommandSet {
    /// Decode a command set from reassembled command fragment bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<CommandSet> {
        let mut dataset =
            decode::read_dataset(bytes, &IMPLICIT_VR_LITTLE_ENDIAN).context(DecodeCommandSnafu)?;
        // the group length is recomputed on write
        dataset.remove(tags::COMMAND_GROUP_LENGTH);
        Ok(CommandSet { dataset })
    }

    /// Encode the command set, group length element included.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = encode::write_dataset(&self.dataset, &IMPLICIT_VR_LITTLE_ENDIAN)
            .context(EncodeCommandSnafu)?;
        let mut prefix = DataSet::new();
        prefix.put(DataElement::new(
            tags::COMMAND_GROUP_LENGTH,
            VR::UL,
            body.len() as u32,
        ));
        let mut out = encode::write_dataset(&prefix, &IMPLICIT_VR_LITTLE_ENDIAN)
            .context(EncodeCommandSnafu)?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Access the underlying group 0x0000 data set.
    pub fn dataset(&self) -> &DataSet {
        &self.dataset
    }

    pub fn command_field(&self) -> Result<CommandField> {
        let value = self
            .dataset
            .uint16(tags::COMMAND_FIELD)
            .context(MissingFieldSnafu {
                name: "CommandField",
            })?;
        CommandField::from_u16(value).ok_or(Error::UnknownService { value })
    }

    pub fn message_id(&self) -> Result<u16> {
        self.dataset
            .uint16(tags::MESSAGE_ID)
            .context(MissingFieldSnafu { name: "MessageID" })
    }

    pub fn message_id_responded(&self) -> Result<u16> {
        self.dataset
            .uint16(tags::MESSAGE_ID_BEING_RESPONDED_TO)
            .context(MissingFieldSnafu {
                name: "MessageIDBeingRespondedTo",
            })
    }

    pub fn affected_sop_class_uid(&self) -> Option<String> {
        self.dataset.opt_string(tags::AFFECTED_SOP_CLASS_UID)
    }

    pub fn affected_sop_instance_uid(&self) -> Option<String> {
        self.dataset.opt_string(tags::AFFECTED_SOP_INSTANCE_UID)
    }

    pub fn move_destination(&self) -> Option<String> {
        self.dataset.opt_string(tags::MOVE_DESTINATION)
    }

    /// Whether a data set follows the command set.
    pub fn has_dataset(&self) -> bool {
        self.dataset
            .uint16(tags::COMMAND_DATA_SET_TYPE)
            .map(|v| v != NO_DATA_SET)
            .unwrap_or(false)
    }

    pub fn status(&self) -> Result<Status> {
        self.dataset
            .uint16(tags::STATUS)
            .map(Status)
            .context(MissingFieldSnafu { name: "Status" })
    }

    /// The sub-operation counters, when all four are present.
    pub fn sub_operations(&self) -> Option<SubOperations> {
        Some(SubOperations {
            remaining: self
                .dataset
                .uint16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS)
                .ok()?,
            completed: self
                .dataset
                .uint16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS)
                .ok()?,
            failed: self
                .dataset
                .uint16(tags::NUMBER_OF_FAILED_SUBOPERATIONS)
                .ok()?,
            warning: self
                .dataset
                .uint16(tags::NUMBER_OF_WARNING_SUBOPERATIONS)
                .ok()?,
        })
    }

    // request builders

    pub fn echo_rq(message_id: u16) -> CommandSet {
        let mut ds = base(CommandField::CEchoRq, NO_DATA_SET);
        ds.put_u16(tags::MESSAGE_ID, VR::US, message_id);
        put_uid(&mut ds, tags::AFFECTED_SOP_CLASS_UID, ferrodicom_core::uids::VERIFICATION);
        CommandSet { dataset: ds }
    }

    pub fn store_rq(
        message_id: u16,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        priority: Priority,
    ) -> CommandSet {
        let mut ds = base(CommandField::CStoreRq, DATA_SET_FOLLOWS);
        ds.put_u16(tags::MESSAGE_ID, VR::US, message_id);
        ds.put_u16(tags::PRIORITY, VR::US, priority.to_u16());
        put_uid(&mut ds, tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
        put_uid(&mut ds, tags::AFFECTED_SOP_INSTANCE_UID, sop_instance_uid);
        CommandSet { dataset: ds }
    }

    pub fn find_rq(message_id: u16, sop_class_uid: &str, priority: Priority) -> CommandSet {
        let mut ds = base(CommandField::CFindRq, DATA_SET_FOLLOWS);
        ds.put_u16(tags::MESSAGE_ID, VR::US, message_id);
        ds.put_u16(tags::PRIORITY, VR::US, priority.to_u16());
        put_uid(&mut ds, tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
        CommandSet { dataset: ds }
    }

    pub fn move_rq(
        message_id: u16,
        sop_class_uid: &str,
        destination: &str,
        priority: Priority,
    ) -> CommandSet {
        let mut ds = base(CommandField::CMoveRq, DATA_SET_FOLLOWS);
        ds.put_u16(tags::MESSAGE_ID, VR::US, message_id);
        ds.put_u16(tags::PRIORITY, VR::US, priority.to_u16());
        put_uid(&mut ds, tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
        ds.put(DataElement::new(tags::MOVE_DESTINATION, VR::AE, destination));
        CommandSet { dataset: ds }
    }

    pub fn get_rq(message_id: u16, sop_class_uid: &str, priority: Priority) -> CommandSet {
        let mut ds = base(CommandField::CGetRq, DATA_SET_FOLLOWS);
        ds.put_u16(tags::MESSAGE_ID, VR::US, message_id);
        ds.put_u16(tags::PRIORITY, VR::US, priority.to_u16());
        put_uid(&mut ds, tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
        CommandSet { dataset: ds }
    }

    pub fn cancel_rq(message_id_responded: u16) -> CommandSet {
        let mut ds = base(CommandField::CCancelRq, NO_DATA_SET);
        ds.put_u16(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            message_id_responded,
        );
        CommandSet { dataset: ds }
    }

    // response builders

    pub fn echo_rsp(message_id: u16, status: Status) -> CommandSet {
        let mut ds = base(CommandField::CEchoRsp, NO_DATA_SET);
        ds.put_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, message_id);
        ds.put_u16(tags::STATUS, VR::US, status.0);
        put_uid(&mut ds, tags::AFFECTED_SOP_CLASS_UID, ferrodicom_core::uids::VERIFICATION);
        CommandSet { dataset: ds }
    }

    pub fn store_rsp(
        message_id: u16,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        status: Status,
    ) -> CommandSet {
        let mut ds = base(CommandField::CStoreRsp, NO_DATA_SET);
        ds.put_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, message_id);
        ds.put_u16(tags::STATUS, VR::US, status.0);
        put_uid(&mut ds, tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
        put_uid(&mut ds, tags::AFFECTED_SOP_INSTANCE_UID, sop_instance_uid);
        CommandSet { dataset: ds }
    }

    pub fn find_rsp(
        message_id: u16,
        sop_class_uid: &str,
        status: Status,
        with_dataset: bool,
    ) -> CommandSet {
        let data_set_type = if with_dataset {
            DATA_SET_FOLLOWS
        } else {
            NO_DATA_SET
        };
        let mut ds = base(CommandField::CFindRsp, data_set_type);
        ds.put_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, message_id);
        ds.put_u16(tags::STATUS, VR::US, status.0);
        put_uid(&mut ds, tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
        CommandSet { dataset: ds }
    }

    pub fn move_rsp(
        message_id: u16,
        sop_class_uid: &str,
        status: Status,
        sub_operations: SubOperations,
    ) -> CommandSet {
        let mut ds = base(CommandField::CMoveRsp, NO_DATA_SET);
        ds.put_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, message_id);
        ds.put_u16(tags::STATUS, VR::US, status.0);
        put_uid(&mut ds, tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
        put_sub_operations(&mut ds, sub_operations);
        CommandSet { dataset: ds }
    }

    pub fn get_rsp(
        message_id: u16,
        sop_class_uid: &str,
        status: Status,
        sub_operations: SubOperations,
    ) -> CommandSet {
        let mut ds = base(CommandField::CGetRsp, NO_DATA_SET);
        ds.put_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO, VR::US, message_id);
        ds.put_u16(tags::STATUS, VR::US, status.0);
        put_uid(&mut ds, tags::AFFECTED_SOP_CLASS_UID, sop_class_uid);
        put_sub_operations(&mut ds, sub_operations);
        CommandSet { dataset: ds }
    }
}

fn base(field: CommandField, data_set_type: u16) -> DataSet {
    let mut ds = DataSet::new();
    ds.put_u16(tags::COMMAND_FIELD, VR::US, field.to_u16());
    ds.put_u16(tags::COMMAND_DATA_SET_TYPE, VR::US, data_set_type);
    ds
}

fn put_uid(ds: &mut DataSet, tag: Tag, uid: &str) {
    ds.put(DataElement::new(tag, VR::UI, uid));
}

fn put_sub_operations(ds: &mut DataSet, counters: SubOperations) {
    ds.put_u16(
        tags::NUMBER_OF_REMAINING_SUBOPERATIONS,
        VR::US,
        counters.remaining,
    );
    ds.put_u16(
        tags::NUMBER_OF_COMPLETED_SUBOPERATIONS,
        VR::US,
        counters.completed,
    );
    ds.put_u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS, VR::US, counters.failed);
    ds.put_u16(
        tags::NUMBER_OF_WARNING_SUBOPERATIONS,
        VR::US,
        counters.warning,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrodicom_core::uids;

    #[test]
    fn response_codes_set_the_high_bit() {
        assert_eq!(
            CommandField::CStoreRq.response(),
            Some(CommandField::CStoreRsp)
        );
        assert_eq!(
            CommandField::CEchoRq.response(),
            Some(CommandField::CEchoRsp)
        );
        assert!(CommandField::CFindRsp.is_response());
        assert!(!CommandField::CFindRq.is_response());
        assert_eq!(CommandField::from_u16(0x0FFF), Some(CommandField::CCancelRq));
        assert_eq!(CommandField::from_u16(0x4242), None);
    }

    #[test]
    fn command_set_roundtrip() {
        let cmd = CommandSet::store_rq(7, uids::CT_IMAGE_STORAGE, "1.2.3", Priority::Medium);
        let bytes = cmd.to_bytes().unwrap();
        let back = CommandSet::from_bytes(&bytes).unwrap();
        assert_eq!(back, cmd);
        assert_eq!(back.command_field().unwrap(), CommandField::CStoreRq);
        assert_eq!(back.message_id().unwrap(), 7);
        assert_eq!(
            back.affected_sop_class_uid().as_deref(),
            Some(uids::CT_IMAGE_STORAGE)
        );
        assert_eq!(back.affected_sop_instance_uid().as_deref(), Some("1.2.3"));
        assert!(back.has_dataset());
    }

    #[test]
    fn group_length_covers_the_remainder() {
        let cmd = CommandSet::echo_rq(1);
        let bytes = cmd.to_bytes().unwrap();
        // implicit VR LE: tag (4), length (4), value (4)
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x00, 0x00]);
        let declared = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(declared as usize, bytes.len() - 12);
    }

    #[test]
    fn echo_response_pairs_by_message_id() {
        let rsp = CommandSet::echo_rsp(41, Status::SUCCESS);
        assert_eq!(rsp.command_field().unwrap(), CommandField::CEchoRsp);
        assert_eq!(rsp.message_id_responded().unwrap(), 41);
        assert!(rsp.status().unwrap().is_success());
        assert!(!rsp.has_dataset());
    }

    #[test]
    fn move_response_counters_roundtrip() {
        let rsp = CommandSet::move_rsp(
            3,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
            Status::PENDING,
            SubOperations {
                remaining: 2,
                completed: 1,
                failed: 0,
                warning: 0,
            },
        );
        let back = CommandSet::from_bytes(&rsp.to_bytes().unwrap()).unwrap();
        let counters = back.sub_operations().unwrap();
        assert_eq!(counters.remaining, 2);
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 0);
    }
}
