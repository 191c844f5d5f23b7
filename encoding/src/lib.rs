//! Encoding and decoding of DICOM data sets
//! under the supported transfer syntaxes.
//!
//! The decoder and encoder in this crate work over in-memory buffers,
//! which matches how data sets arrive from both the file layer
//! (after the envelope is read)
//! and the network layer (after message reassembly).
pub mod bytes;
pub mod decode;
pub mod deflate;
pub mod encode;
pub mod transfer_syntax;

pub use byteordered::Endianness;
pub use bytes::{ByteReader, ByteWriter};
pub use decode::read_dataset;
pub use encode::write_dataset;
pub use transfer_syntax::TransferSyntax;
