//! Whole-file reading and writing.
use snafu::{ensure, ResultExt, Snafu};
use std::io::{Read, Write};
use std::path::Path;

use ferrodicom_core::DataSet;
use ferrodicom_encoding::{decode, encode, transfer_syntax, ByteReader, Endianness};

use crate::meta::{self, FileMetaTable};

/// The length of the opaque preamble preceding the magic code.
pub const PREAMBLE_LENGTH: usize = 128;

/// The magic code following the preamble.
pub const MAGIC_CODE: &[u8; 4] = b"DICM";

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not open file {}", path))]
    OpenFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("could not write file {}", path))]
    WriteFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("file is too short to hold a DICOM envelope ({} bytes)", len))]
    FileTooShort { len: usize },

    #[snafu(display("missing the DICM magic code"))]
    NotDicom,

    #[snafu(display("invalid file meta information"))]
    Meta { source: meta::Error },

    #[snafu(display("could not decode the main data set"))]
    DecodeDataSet { source: decode::Error },

    #[snafu(display("could not encode the main data set"))]
    EncodeDataSet { source: encode::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A DICOM file in memory:
/// the preamble kept opaque, the decoded meta group,
/// and the main data set.
///
/// The encoding of the main data set is determined solely
/// by the transfer syntax UID declared in the meta group.
#[derive(Debug, Clone, PartialEq)]
pub struct DicomFile {
    preamble: [u8; PREAMBLE_LENGTH],
    meta: FileMetaTable,
    dataset: DataSet,
}

impl DicomFile {
    /// Assemble a file from a meta table and a main data set.
    /// The preamble is zero-filled.
    pub fn new(meta: FileMetaTable, dataset: DataSet) -> Self {
        DicomFile {
            preamble: [0; PREAMBLE_LENGTH],
            meta,
            dataset,
        }
    }

    #[inline]
    pub fn meta(&self) -> &FileMetaTable {
        &self.meta
    }

    #[inline]
    pub fn dataset(&self) -> &DataSet {
        &self.dataset
    }

    pub fn into_dataset(self) -> DataSet {
        self.dataset
    }

    /// Read and decode a DICOM file from a filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DicomFile> {
        let path = path.as_ref();
        let mut bytes = Vec::new();
        std::fs::File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .context(OpenFileSnafu {
                path: path.display().to_string(),
            })?;
        Self::from_bytes(&bytes)
    }

    /// Decode a DICOM file from a full in-memory buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<DicomFile> {
        ensure!(
            bytes.len() >= PREAMBLE_LENGTH + MAGIC_CODE.len(),
            FileTooShortSnafu { len: bytes.len() }
        );
        let mut preamble = [0u8; PREAMBLE_LENGTH];
        preamble.copy_from_slice(&bytes[..PREAMBLE_LENGTH]);
        ensure!(
            &bytes[PREAMBLE_LENGTH..PREAMBLE_LENGTH + 4] == MAGIC_CODE,
            NotDicomSnafu
        );

        let mut reader = ByteReader::new(&bytes[PREAMBLE_LENGTH + 4..], Endianness::Little);
        let meta = FileMetaTable::read_from(&mut reader).context(MetaSnafu)?;

        let remainder = &bytes[bytes.len() - reader.remaining()..];
        let dataset = decode::read_dataset_by_uid(remainder, &meta.transfer_syntax_uid)
            .context(DecodeDataSetSnafu)?;
        tracing::debug!(
            sop_instance_uid = meta.media_storage_sop_instance_uid.as_str(),
            transfer_syntax = meta.transfer_syntax_uid.as_str(),
            "decoded DICOM file"
        );
        Ok(DicomFile {
            preamble,
            meta,
            dataset,
        })
    }

    /// Encode the whole file envelope into a buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let meta_bytes = self.meta.to_bytes().context(MetaSnafu)?;
        let dataset_bytes =
            encode::write_dataset_by_uid(&self.dataset, &self.meta.transfer_syntax_uid)
                .context(EncodeDataSetSnafu)?;
        let mut out =
            Vec::with_capacity(PREAMBLE_LENGTH + 4 + meta_bytes.len() + dataset_bytes.len());
        out.extend_from_slice(&self.preamble);
        out.extend_from_slice(MAGIC_CODE);
        out.extend_from_slice(&meta_bytes);
        out.extend_from_slice(&dataset_bytes);
        Ok(out)
    }

    /// Encode and write the file to a filesystem path.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::File::create(path)
            .and_then(|mut f| f.write_all(&bytes))
            .context(WriteFileSnafu {
                path: path.display().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrodicom_core::{tags, uids, DataElement, VR};

    fn sample_file() -> DicomFile {
        let meta = FileMetaTable::builder()
            .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid("1.2.3.4.5")
            .transfer_syntax("1.2.840.10008.1.2.1")
            .build()
            .unwrap();
        let mut ds = DataSet::new();
        ds.put(DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            uids::CT_IMAGE_STORAGE,
        ));
        ds.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, "1.2.3.4.5"));
        ds.put(DataElement::new(tags::PATIENT_ID, VR::LO, "P9"));
        DicomFile::new(meta, ds)
    }

    #[test]
    fn envelope_roundtrip() {
        let file = sample_file();
        let bytes = file.to_bytes().unwrap();
        assert_eq!(&bytes[128..132], b"DICM");
        let back = DicomFile::from_bytes(&bytes).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn dataset_encoding_follows_meta_declaration() {
        let mut file = sample_file();
        file.meta.transfer_syntax_uid = "1.2.840.10008.1.2".to_string();
        let implicit = file.to_bytes().unwrap();
        file.meta.transfer_syntax_uid = "1.2.840.10008.1.2.1".to_string();
        let explicit = file.to_bytes().unwrap();
        assert_ne!(implicit, explicit);
        assert_eq!(
            DicomFile::from_bytes(&implicit).unwrap().dataset(),
            DicomFile::from_bytes(&explicit).unwrap().dataset()
        );
    }

    #[test]
    fn rejects_non_dicom_input() {
        let err = DicomFile::from_bytes(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, Error::FileTooShort { .. }));
        let mut bytes = vec![0u8; 132];
        bytes[128..132].copy_from_slice(b"DICX");
        assert!(matches!(
            DicomFile::from_bytes(&bytes).unwrap_err(),
            Error::NotDicom
        ));
    }

    #[test]
    fn file_io_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ct.dcm");
        let file = sample_file();
        file.save(&path).unwrap();
        let back = DicomFile::open(&path).unwrap();
        assert_eq!(back, file);
    }
}
