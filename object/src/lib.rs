//! The DICOM file envelope:
//! preamble, magic code, file meta information,
//! and the main data set under the declared transfer syntax.
pub mod file;
pub mod meta;

pub use file::{DicomFile, Error as FileError};
pub use meta::{FileMetaTable, FileMetaTableBuilder};
