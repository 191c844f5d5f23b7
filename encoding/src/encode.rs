//! Encoding of data sets into their coded form.
//!
//! Elements are written in ascending tag order.
//! Sequences are written with an explicit length when the total size
//! is known (always the case for owned subtrees), except that empty
//! sequences use the undefined-length form with a sequence delimiter.
//! Encapsulated pixel data always uses the undefined-length form.
use snafu::Snafu;

use ferrodicom_core::value::{PrimitiveValue, Value};
use ferrodicom_core::{is_valid_uid, tags, DataElement, DataSet, Tag, VR};

use crate::bytes::ByteWriter;
use crate::transfer_syntax::{self, TransferSyntax};

const UNDEFINED: u32 = 0xFFFF_FFFF;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display(
        "value of {} is too long for {} ({} > {} bytes)",
        tag,
        vr,
        len,
        max
    ))]
    ValueTooLongForVr { tag: Tag, vr: VR, len: u32, max: u32 },

    #[snafu(display("value of {} is not a valid unique identifier", tag))]
    InvalidUid { tag: Tag },

    #[snafu(display(
        "pixel fragment #{} has an odd length {} and cannot be padded",
        index,
        length
    ))]
    OddLengthWithoutPadding { index: usize, length: usize },

    #[snafu(display("value of {} does not fit a 16-bit length field", tag))]
    ValueTooLargeForLengthField { tag: Tag },

    #[snafu(display("unsupported transfer syntax `{}`", uid))]
    UnsupportedTransferSyntax { uid: String },

    #[snafu(display("could not deflate data set"))]
    Deflate { source: std::io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Encode a full data set under the transfer syntax identified by `uid`.
pub fn write_dataset_by_uid(dataset: &DataSet, uid: &str) -> Result<Vec<u8>> {
    let ts = transfer_syntax::lookup(uid).ok_or_else(|| Error::UnsupportedTransferSyntax {
        uid: uid.to_string(),
    })?;
    write_dataset(dataset, ts)
}

/// Encode a full data set under a transfer syntax.
pub fn write_dataset(dataset: &DataSet, ts: &TransferSyntax) -> Result<Vec<u8>> {
    let mut writer = ByteWriter::new(ts.endianness());
    for elem in dataset.iter() {
        write_element(&mut writer, elem, ts.is_explicit_vr())?;
    }
    let coded = writer.into_inner();
    if ts.is_deflated() {
        return crate::deflate::deflate(&coded).map_err(|source| Error::Deflate { source });
    }
    Ok(coded)
}

/// Encode a single data element, header and value.
pub fn write_element(writer: &mut ByteWriter, elem: &DataElement, explicit_vr: bool) -> Result<()> {
    match elem.value() {
        Value::Primitive(value) => {
            let bytes = primitive_bytes(elem.tag(), elem.vr(), value, writer)?;
            write_header(writer, elem.tag(), elem.vr(), bytes.len() as u32, explicit_vr)?;
            writer.write_all(&bytes);
        }
        Value::Sequence(items) => {
            if items.is_empty() {
                // empty sequences keep the delimited form
                write_header(writer, elem.tag(), VR::SQ, UNDEFINED, explicit_vr)?;
                write_delimiter(writer, tags::SEQUENCE_DELIMITATION_ITEM);
                return Ok(());
            }
            let mut body = ByteWriter::new(writer.endianness());
            for item in items {
                let mut item_body = ByteWriter::new(writer.endianness());
                for elem in item.iter() {
                    write_element(&mut item_body, elem, explicit_vr)?;
                }
                let item_bytes = item_body.into_inner();
                body.write_u16(tags::ITEM.group());
                body.write_u16(tags::ITEM.element());
                body.write_u32(item_bytes.len() as u32);
                body.write_all(&item_bytes);
            }
            let body = body.into_inner();
            write_header(writer, elem.tag(), VR::SQ, body.len() as u32, explicit_vr)?;
            writer.write_all(&body);
        }
        Value::PixelSequence {
            offset_table,
            fragments,
        } => {
            write_header(writer, elem.tag(), elem.vr(), UNDEFINED, explicit_vr)?;
            // basic offset table item, possibly empty
            writer.write_u16(tags::ITEM.group());
            writer.write_u16(tags::ITEM.element());
            writer.write_u32((offset_table.len() * 4) as u32);
            for offset in offset_table {
                writer.write_u32(*offset);
            }
            for (index, fragment) in fragments.iter().enumerate() {
                if fragment.len() % 2 != 0 {
                    // fragments are opaque and must stay verbatim
                    return OddLengthWithoutPaddingSnafu {
                        index,
                        length: fragment.len(),
                    }
                    .fail();
                }
                writer.write_u16(tags::ITEM.group());
                writer.write_u16(tags::ITEM.element());
                writer.write_u32(fragment.len() as u32);
                writer.write_all(fragment);
            }
            write_delimiter(writer, tags::SEQUENCE_DELIMITATION_ITEM);
        }
    }
    Ok(())
}

fn write_delimiter(writer: &mut ByteWriter, tag: Tag) {
    writer.write_u16(tag.group());
    writer.write_u16(tag.element());
    writer.write_u32(0);
}

fn write_header(
    writer: &mut ByteWriter,
    tag: Tag,
    vr: VR,
    length: u32,
    explicit_vr: bool,
) -> Result<()> {
    writer.write_u16(tag.group());
    writer.write_u16(tag.element());
    if !explicit_vr {
        writer.write_u32(length);
        return Ok(());
    }
    writer.write_all(&vr.to_bytes());
    if vr.uses_long_length() {
        writer.write_u16(0);
        writer.write_u32(length);
    } else {
        if length > u32::from(u16::MAX) {
            return ValueTooLargeForLengthFieldSnafu { tag }.fail();
        }
        writer.write_u16(length as u16);
    }
    Ok(())
}

/// Produce the padded value field of a primitive value,
/// checking VR conformance on the way.
fn primitive_bytes(
    tag: Tag,
    vr: VR,
    value: &PrimitiveValue,
    writer: &ByteWriter,
) -> Result<Vec<u8>> {
    let mut out = match value {
        PrimitiveValue::Empty => Vec::new(),
        PrimitiveValue::Str(s) => {
            check_str_conformance(tag, vr, s)?;
            s.clone().into_bytes()
        }
        PrimitiveValue::U16s(v) => {
            let mut w = ByteWriter::with_capacity(writer.endianness(), v.len() * 2);
            for x in v {
                w.write_u16(*x);
            }
            w.into_inner()
        }
        PrimitiveValue::I16s(v) => {
            let mut w = ByteWriter::with_capacity(writer.endianness(), v.len() * 2);
            for x in v {
                w.write_i16(*x);
            }
            w.into_inner()
        }
        PrimitiveValue::U32s(v) => {
            let mut w = ByteWriter::with_capacity(writer.endianness(), v.len() * 4);
            for x in v {
                w.write_u32(*x);
            }
            w.into_inner()
        }
        PrimitiveValue::I32s(v) => {
            let mut w = ByteWriter::with_capacity(writer.endianness(), v.len() * 4);
            for x in v {
                w.write_i32(*x);
            }
            w.into_inner()
        }
        PrimitiveValue::F32s(v) => {
            let mut w = ByteWriter::with_capacity(writer.endianness(), v.len() * 4);
            for x in v {
                w.write_f32(*x);
            }
            w.into_inner()
        }
        PrimitiveValue::F64s(v) => {
            let mut w = ByteWriter::with_capacity(writer.endianness(), v.len() * 8);
            for x in v {
                w.write_f64(*x);
            }
            w.into_inner()
        }
        PrimitiveValue::Bytes(v) => v.clone(),
    };
    if out.len() % 2 != 0 {
        out.push(vr.pad_byte());
    }
    Ok(out)
}

fn check_str_conformance(tag: Tag, vr: VR, value: &str) -> Result<()> {
    let max = match vr.max_value_len() {
        Some(max) => max,
        None => return Ok(()),
    };
    let pieces: Vec<&str> = if vr.properties().is_multi_valued {
        value.split('\\').collect()
    } else {
        vec![value]
    };
    for piece in pieces {
        if piece.len() as u32 > max {
            return ValueTooLongForVrSnafu {
                tag,
                vr,
                len: piece.len() as u32,
                max,
            }
            .fail();
        }
        if vr == VR::UI && !piece.is_empty() && !is_valid_uid(piece) {
            return InvalidUidSnafu { tag }.fail();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::read_dataset;
    use crate::transfer_syntax::entries;
    use ferrodicom_core::DataSet;

    fn sample() -> DataSet {
        let mut ds = DataSet::new();
        ds.put(DataElement::new(tags::MODALITY, VR::CS, "CT"));
        ds.put(DataElement::new(tags::PATIENT_ID, VR::LO, "P01"));
        ds.put(DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            "1.2.840.1.5",
        ));
        ds.put(DataElement::new(tags::ROWS, VR::US, 512u16));
        let mut item = DataSet::new();
        item.put(DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            "1.2.840.1.9",
        ));
        ds.put_seq(tags::REFERENCED_SERIES_SEQUENCE, vec![item]);
        ds
    }

    #[test]
    fn roundtrip_across_plain_syntaxes() {
        let ds = sample();
        let syntaxes = [
            &entries::IMPLICIT_VR_LITTLE_ENDIAN,
            &entries::EXPLICIT_VR_LITTLE_ENDIAN,
            &entries::EXPLICIT_VR_BIG_ENDIAN,
        ];
        let mut encodings = Vec::new();
        for ts in syntaxes {
            let bytes = write_dataset(&ds, ts).unwrap();
            let back = read_dataset(&bytes, ts).unwrap();
            assert_eq!(back, ds, "round trip under {}", ts.name());
            encodings.push(bytes);
        }
        // the same data set yields three distinct byte sequences
        assert_ne!(encodings[0], encodings[1]);
        assert_ne!(encodings[1], encodings[2]);
        assert_ne!(encodings[0], encodings[2]);
    }

    #[test]
    fn roundtrip_deflated() {
        let ds = sample();
        let ts = &entries::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN;
        let bytes = write_dataset(&ds, ts).unwrap();
        // the coded form is a deflate stream, not a plain data set
        assert!(read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).is_err());
        assert_eq!(read_dataset(&bytes, ts).unwrap(), ds);
    }

    #[test]
    fn odd_length_values_are_padded() {
        let mut ds = DataSet::new();
        ds.put(DataElement::new(tags::PATIENT_ID, VR::LO, "P1X"));
        ds.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, "1.2.3"));
        let bytes = write_dataset(&ds, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(bytes.len() % 2, 0);
        // elements come out in tag order: UI pads with NUL, LO with space
        assert_eq!(&bytes[8..14], b"1.2.3\0");
        assert_eq!(&bytes[22..26], b"P1X ");

        let back = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(back, ds);
    }

    #[test]
    fn zero_length_roundtrip() {
        let mut ds = DataSet::new();
        ds.put(DataElement::empty(tags::STUDY_DATE, VR::DA));
        let bytes = write_dataset(&ds, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        let back = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(back, ds);
    }

    #[test]
    fn empty_sequence_uses_delimited_form() {
        let mut ds = DataSet::new();
        ds.put_seq(tags::REFERENCED_STUDY_SEQUENCE, Vec::new());
        let bytes = write_dataset(&ds, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        // SQ header with undefined length, then a sequence delimitation item
        assert_eq!(&bytes[8..12], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[12..16], &[0xFE, 0xFF, 0xDD, 0xE0]);
        let back = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(back, ds);
    }

    #[test]
    fn pixel_sequence_roundtrip() {
        let mut ds = DataSet::new();
        ds.put(DataElement::new(
            tags::PIXEL_DATA,
            VR::OB,
            Value::PixelSequence {
                offset_table: vec![0],
                fragments: vec![vec![1, 2, 3, 4], vec![5, 6]],
            },
        ));
        let bytes = write_dataset(&ds, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        let back = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(back, ds);
    }

    #[test]
    fn max_length_boundary() {
        let mut ds = DataSet::new();
        let at_limit = "A".repeat(16);
        ds.put(DataElement::new(
            tags::RETRIEVE_AE_TITLE,
            VR::AE,
            at_limit.as_str(),
        ));
        assert!(write_dataset(&ds, &entries::EXPLICIT_VR_LITTLE_ENDIAN).is_ok());

        let over = "A".repeat(17);
        ds.put(DataElement::new(
            tags::RETRIEVE_AE_TITLE,
            VR::AE,
            over.as_str(),
        ));
        let err = write_dataset(&ds, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap_err();
        assert!(matches!(err, Error::ValueTooLongForVr { .. }));
    }

    #[test]
    fn invalid_uid_is_rejected() {
        let mut ds = DataSet::new();
        ds.put(DataElement::new(tags::SOP_CLASS_UID, VR::UI, "1.bad.3"));
        let err = write_dataset(&ds, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap_err();
        assert!(matches!(err, Error::InvalidUid { .. }));
    }

    #[test]
    fn numeric_strings_reencode_verbatim() {
        let mut ds = DataSet::new();
        // textual form preserved, including non-canonical spelling
        ds.put(DataElement::new(tags::SERIES_NUMBER, VR::IS, "007"));
        let bytes = write_dataset(&ds, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        let back = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(back.string(tags::SERIES_NUMBER).unwrap(), "007");
        assert_eq!(back.int32(tags::SERIES_NUMBER).unwrap(), 7);
    }
}
