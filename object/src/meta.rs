//! The file meta information group.
//!
//! The meta group is always coded in explicit VR little endian,
//! regardless of the transfer syntax of the main data set.
//! Its first element is the group length,
//! which must equal the byte count of the remainder of the group.
use snafu::{OptionExt, ResultExt, Snafu};

use ferrodicom_core::value::Value;
use ferrodicom_core::{tags, uids, DataElement, DataSet, Tag, VR};
use ferrodicom_encoding::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;
use ferrodicom_encoding::{decode, encode, ByteReader, Endianness};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not decode file meta group"))]
    DecodeMeta { source: decode::Error },

    #[snafu(display("could not encode file meta group"))]
    EncodeMeta { source: encode::Error },

    #[snafu(display("file meta group is truncated"))]
    TruncatedMeta {
        source: ferrodicom_encoding::bytes::OutOfBoundsError,
    },

    #[snafu(display("expected file meta group length element, found {}", tag))]
    MissingGroupLength { tag: Tag },

    #[snafu(display("file meta group contains element {} outside group 0002", tag))]
    ElementOutsideMetaGroup { tag: Tag },

    #[snafu(display("missing mandatory file meta attribute {}", name))]
    MissingAttribute { name: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The decoded file meta information of a DICOM file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetaTable {
    pub media_storage_sop_class_uid: String,
    pub media_storage_sop_instance_uid: String,
    pub transfer_syntax_uid: String,
    pub implementation_class_uid: String,
    pub implementation_version_name: Option<String>,
    pub source_application_entity_title: Option<String>,
}

impl FileMetaTable {
    /// Create a builder for a new file meta table.
    pub fn builder() -> FileMetaTableBuilder {
        FileMetaTableBuilder::new()
    }

    /// Read the file meta group from the cursor,
    /// leaving it positioned at the first byte of the main data set.
    pub fn read_from(reader: &mut ByteReader) -> Result<FileMetaTable> {
        // the group length element bounds the rest of the group
        let mut header = ByteReader::new(
            reader.take(12).context(TruncatedMetaSnafu)?,
            Endianness::Little,
        );
        let group = header.read_u16().context(TruncatedMetaSnafu)?;
        let element = header.read_u16().context(TruncatedMetaSnafu)?;
        let tag = Tag(group, element);
        if tag != tags::FILE_META_INFORMATION_GROUP_LENGTH {
            return MissingGroupLengthSnafu { tag }.fail();
        }
        // VR "UL", 16-bit length 4, then the value
        header.skip(4).context(TruncatedMetaSnafu)?;
        let group_length = header.read_u32().context(TruncatedMetaSnafu)?;

        let body = reader
            .take(group_length as usize)
            .context(TruncatedMetaSnafu)?;
        let dataset = decode::read_dataset(body, &EXPLICIT_VR_LITTLE_ENDIAN)
            .context(DecodeMetaSnafu)?;
        if let Some(tag) = dataset.tags().find(|t| !t.is_file_meta()) {
            return ElementOutsideMetaGroupSnafu { tag }.fail();
        }

        Ok(FileMetaTable {
            media_storage_sop_class_uid: dataset
                .opt_string(tags::MEDIA_STORAGE_SOP_CLASS_UID)
                .context(MissingAttributeSnafu {
                    name: "MediaStorageSOPClassUID",
                })?,
            media_storage_sop_instance_uid: dataset
                .opt_string(tags::MEDIA_STORAGE_SOP_INSTANCE_UID)
                .context(MissingAttributeSnafu {
                    name: "MediaStorageSOPInstanceUID",
                })?,
            transfer_syntax_uid: dataset
                .opt_string(tags::TRANSFER_SYNTAX_UID)
                .context(MissingAttributeSnafu {
                    name: "TransferSyntaxUID",
                })?,
            implementation_class_uid: dataset
                .opt_string(tags::IMPLEMENTATION_CLASS_UID)
                .context(MissingAttributeSnafu {
                    name: "ImplementationClassUID",
                })?,
            implementation_version_name: dataset.opt_string(tags::IMPLEMENTATION_VERSION_NAME),
            source_application_entity_title: dataset
                .opt_string(tags::SOURCE_APPLICATION_ENTITY_TITLE),
        })
    }

    /// Encode the full meta group, group length element included.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut group = DataSet::new();
        group.put(DataElement::new(
            tags::FILE_META_INFORMATION_VERSION,
            VR::OB,
            Value::Primitive(vec![0x00u8, 0x01].into()),
        ));
        group.put(DataElement::new(
            tags::MEDIA_STORAGE_SOP_CLASS_UID,
            VR::UI,
            self.media_storage_sop_class_uid.as_str(),
        ));
        group.put(DataElement::new(
            tags::MEDIA_STORAGE_SOP_INSTANCE_UID,
            VR::UI,
            self.media_storage_sop_instance_uid.as_str(),
        ));
        group.put(DataElement::new(
            tags::TRANSFER_SYNTAX_UID,
            VR::UI,
            self.transfer_syntax_uid.as_str(),
        ));
        group.put(DataElement::new(
            tags::IMPLEMENTATION_CLASS_UID,
            VR::UI,
            self.implementation_class_uid.as_str(),
        ));
        if let Some(name) = &self.implementation_version_name {
            group.put(DataElement::new(
                tags::IMPLEMENTATION_VERSION_NAME,
                VR::SH,
                name.as_str(),
            ));
        }
        if let Some(title) = &self.source_application_entity_title {
            group.put(DataElement::new(
                tags::SOURCE_APPLICATION_ENTITY_TITLE,
                VR::AE,
                title.as_str(),
            ));
        }

        let body =
            encode::write_dataset(&group, &EXPLICIT_VR_LITTLE_ENDIAN).context(EncodeMetaSnafu)?;

        let mut length_elem = DataSet::new();
        length_elem.put(DataElement::new(
            tags::FILE_META_INFORMATION_GROUP_LENGTH,
            VR::UL,
            body.len() as u32,
        ));
        let mut out = encode::write_dataset(&length_elem, &EXPLICIT_VR_LITTLE_ENDIAN)
            .context(EncodeMetaSnafu)?;
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// A builder for [`FileMetaTable`] values,
/// filling in this implementation's identifiers by default.
#[derive(Debug, Default, Clone)]
pub struct FileMetaTableBuilder {
    media_storage_sop_class_uid: Option<String>,
    media_storage_sop_instance_uid: Option<String>,
    transfer_syntax_uid: Option<String>,
    implementation_class_uid: Option<String>,
    implementation_version_name: Option<String>,
    source_application_entity_title: Option<String>,
}

impl FileMetaTableBuilder {
    pub fn new() -> Self {
        FileMetaTableBuilder::default()
    }

    pub fn media_storage_sop_class_uid(mut self, uid: impl Into<String>) -> Self {
        self.media_storage_sop_class_uid = Some(uid.into());
        self
    }

    pub fn media_storage_sop_instance_uid(mut self, uid: impl Into<String>) -> Self {
        self.media_storage_sop_instance_uid = Some(uid.into());
        self
    }

    pub fn transfer_syntax(mut self, uid: impl Into<String>) -> Self {
        self.transfer_syntax_uid = Some(uid.into());
        self
    }

    pub fn implementation_class_uid(mut self, uid: impl Into<String>) -> Self {
        self.implementation_class_uid = Some(uid.into());
        self
    }

    pub fn implementation_version_name(mut self, name: impl Into<String>) -> Self {
        self.implementation_version_name = Some(name.into());
        self
    }

    pub fn source_application_entity_title(mut self, title: impl Into<String>) -> Self {
        self.source_application_entity_title = Some(title.into());
        self
    }

    pub fn build(self) -> Result<FileMetaTable> {
        Ok(FileMetaTable {
            media_storage_sop_class_uid: self.media_storage_sop_class_uid.context(
                MissingAttributeSnafu {
                    name: "MediaStorageSOPClassUID",
                },
            )?,
            media_storage_sop_instance_uid: self.media_storage_sop_instance_uid.context(
                MissingAttributeSnafu {
                    name: "MediaStorageSOPInstanceUID",
                },
            )?,
            transfer_syntax_uid: self.transfer_syntax_uid.context(MissingAttributeSnafu {
                name: "TransferSyntaxUID",
            })?,
            implementation_class_uid: self
                .implementation_class_uid
                .unwrap_or_else(|| uids::IMPLEMENTATION_CLASS_UID.to_string()),
            implementation_version_name: Some(
                self.implementation_version_name
                    .unwrap_or_else(|| uids::IMPLEMENTATION_VERSION_NAME.to_string()),
            ),
            source_application_entity_title: self.source_application_entity_title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileMetaTable {
        FileMetaTable::builder()
            .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid("1.2.3.4")
            .transfer_syntax("1.2.840.10008.1.2.1")
            .build()
            .unwrap()
    }

    #[test]
    fn group_length_matches_remainder() {
        let bytes = sample().to_bytes().unwrap();
        let mut reader = ByteReader::new(&bytes[8..], Endianness::Little);
        let declared = reader.read_u32().unwrap();
        assert_eq!(declared as usize, bytes.len() - 12);
    }

    #[test]
    fn meta_roundtrip() {
        let table = sample();
        let bytes = table.to_bytes().unwrap();
        let mut reader = ByteReader::new(&bytes, Endianness::Little);
        let back = FileMetaTable::read_from(&mut reader).unwrap();
        assert_eq!(back, table);
        assert!(reader.is_empty());
    }

    #[test]
    fn builder_requires_mandatory_attributes() {
        let err = FileMetaTableBuilder::new()
            .media_storage_sop_class_uid("1.2")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::MissingAttribute { .. }));
    }
}
