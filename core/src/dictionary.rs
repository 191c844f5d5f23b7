//! A registry of standard attributes,
//! used to resolve value representations under implicit VR encoding.
//!
//! This is a working subset of the standard data dictionary,
//! restricted to the attributes this toolkit reads or writes.
//! Attributes outside the subset decode as `UN`.
use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::tag::Tag;
use crate::vr::VR;

/// One entry of the attribute dictionary.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DictionaryEntry {
    pub tag: Tag,
    pub vr: VR,
    pub name: &'static str,
}

macro_rules! entry {
    ($g:expr, $e:expr, $vr:ident, $name:expr) => {
        DictionaryEntry {
            tag: Tag($g, $e),
            vr: VR::$vr,
            name: $name,
        }
    };
}

const ENTRIES: &[DictionaryEntry] = &[
    entry!(0x0000, 0x0000, UL, "CommandGroupLength"),
    entry!(0x0000, 0x0002, UI, "AffectedSOPClassUID"),
    entry!(0x0000, 0x0100, US, "CommandField"),
    entry!(0x0000, 0x0110, US, "MessageID"),
    entry!(0x0000, 0x0120, US, "MessageIDBeingRespondedTo"),
    entry!(0x0000, 0x0600, AE, "MoveDestination"),
    entry!(0x0000, 0x0700, US, "Priority"),
    entry!(0x0000, 0x0800, US, "CommandDataSetType"),
    entry!(0x0000, 0x0900, US, "Status"),
    entry!(0x0000, 0x1000, UI, "AffectedSOPInstanceUID"),
    entry!(0x0000, 0x1020, US, "NumberOfRemainingSuboperations"),
    entry!(0x0000, 0x1021, US, "NumberOfCompletedSuboperations"),
    entry!(0x0000, 0x1022, US, "NumberOfFailedSuboperations"),
    entry!(0x0000, 0x1023, US, "NumberOfWarningSuboperations"),
    entry!(0x0002, 0x0000, UL, "FileMetaInformationGroupLength"),
    entry!(0x0002, 0x0001, OB, "FileMetaInformationVersion"),
    entry!(0x0002, 0x0002, UI, "MediaStorageSOPClassUID"),
    entry!(0x0002, 0x0003, UI, "MediaStorageSOPInstanceUID"),
    entry!(0x0002, 0x0010, UI, "TransferSyntaxUID"),
    entry!(0x0002, 0x0012, UI, "ImplementationClassUID"),
    entry!(0x0002, 0x0013, SH, "ImplementationVersionName"),
    entry!(0x0002, 0x0016, AE, "SourceApplicationEntityTitle"),
    entry!(0x0008, 0x0005, CS, "SpecificCharacterSet"),
    entry!(0x0008, 0x0008, CS, "ImageType"),
    entry!(0x0008, 0x0016, UI, "SOPClassUID"),
    entry!(0x0008, 0x0018, UI, "SOPInstanceUID"),
    entry!(0x0008, 0x0020, DA, "StudyDate"),
    entry!(0x0008, 0x0021, DA, "SeriesDate"),
    entry!(0x0008, 0x0030, TM, "StudyTime"),
    entry!(0x0008, 0x0050, SH, "AccessionNumber"),
    entry!(0x0008, 0x0052, CS, "QueryRetrieveLevel"),
    entry!(0x0008, 0x0054, AE, "RetrieveAETitle"),
    entry!(0x0008, 0x0060, CS, "Modality"),
    entry!(0x0008, 0x0070, LO, "Manufacturer"),
    entry!(0x0008, 0x0090, PN, "ReferringPhysicianName"),
    entry!(0x0008, 0x1030, LO, "StudyDescription"),
    entry!(0x0008, 0x103E, LO, "SeriesDescription"),
    entry!(0x0008, 0x1110, SQ, "ReferencedStudySequence"),
    entry!(0x0008, 0x1115, SQ, "ReferencedSeriesSequence"),
    entry!(0x0008, 0x1150, UI, "ReferencedSOPClassUID"),
    entry!(0x0008, 0x1155, UI, "ReferencedSOPInstanceUID"),
    entry!(0x0010, 0x0010, PN, "PatientName"),
    entry!(0x0010, 0x0020, LO, "PatientID"),
    entry!(0x0010, 0x0030, DA, "PatientBirthDate"),
    entry!(0x0010, 0x0040, CS, "PatientSex"),
    entry!(0x0018, 0x0015, CS, "BodyPartExamined"),
    entry!(0x0018, 0x1030, LO, "ProtocolName"),
    entry!(0x0020, 0x000D, UI, "StudyInstanceUID"),
    entry!(0x0020, 0x000E, UI, "SeriesInstanceUID"),
    entry!(0x0020, 0x0010, SH, "StudyID"),
    entry!(0x0020, 0x0011, IS, "SeriesNumber"),
    entry!(0x0020, 0x0013, IS, "InstanceNumber"),
    entry!(0x0028, 0x0002, US, "SamplesPerPixel"),
    entry!(0x0028, 0x0004, CS, "PhotometricInterpretation"),
    entry!(0x0028, 0x0008, IS, "NumberOfFrames"),
    entry!(0x0028, 0x0010, US, "Rows"),
    entry!(0x0028, 0x0011, US, "Columns"),
    entry!(0x0028, 0x0100, US, "BitsAllocated"),
    entry!(0x0028, 0x0101, US, "BitsStored"),
    entry!(0x0028, 0x0102, US, "HighBit"),
    entry!(0x0028, 0x0103, US, "PixelRepresentation"),
    entry!(0x7FE0, 0x0010, OW, "PixelData"),
];

lazy_static! {
    static ref BY_TAG: HashMap<Tag, &'static DictionaryEntry> =
        ENTRIES.iter().map(|e| (e.tag, e)).collect();
}

/// Look up an attribute by tag.
pub fn entry(tag: Tag) -> Option<&'static DictionaryEntry> {
    BY_TAG.get(&tag).copied()
}

/// Look up an attribute by its keyword, e.g. `PatientName`.
pub fn entry_by_name(name: &str) -> Option<&'static DictionaryEntry> {
    ENTRIES.iter().find(|e| e.name == name)
}

/// Resolve the value representation of an attribute under implicit VR
/// encoding.
///
/// Group length elements are always `UL`.
/// Attributes not in the dictionary (private attributes included)
/// resolve to `UN`.
pub fn vr_of(tag: Tag) -> VR {
    if tag.is_group_length() {
        return VR::UL;
    }
    entry(tag).map(|e| e.vr).unwrap_or(VR::UN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags;

    #[test]
    fn known_attributes() {
        assert_eq!(vr_of(tags::PATIENT_NAME), VR::PN);
        assert_eq!(vr_of(tags::SOP_INSTANCE_UID), VR::UI);
        assert_eq!(vr_of(tags::SERIES_NUMBER), VR::IS);
        assert_eq!(vr_of(tags::REFERENCED_STUDY_SEQUENCE), VR::SQ);
        assert_eq!(vr_of(tags::PIXEL_DATA), VR::OW);
    }

    #[test]
    fn group_lengths_and_unknowns() {
        assert_eq!(vr_of(Tag(0x0008, 0x0000)), VR::UL);
        assert_eq!(vr_of(Tag(0x0009, 0x1001)), VR::UN);
        assert_eq!(entry(Tag(0x0010, 0x0010)).unwrap().name, "PatientName");
    }
}
