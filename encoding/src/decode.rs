//! Decoding of data sets from their coded form.
//!
//! Sequences and encapsulated pixel data are both delimited item streams,
//! so a single item header reader serves both shapes.
use byteordered::Endianness;
use snafu::{ResultExt, Snafu};

use ferrodicom_core::value::{PrimitiveValue, Value, C};
use ferrodicom_core::{dictionary, tags, DataElement, DataSet, Tag, VR};

use crate::bytes::{ByteReader, OutOfBoundsError};
use crate::transfer_syntax::{self, TransferSyntax};

// the undefined length sentinel
const UNDEFINED: u32 = 0xFFFF_FFFF;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not read {}", field))]
    Truncated {
        field: &'static str,
        source: OutOfBoundsError,
    },

    #[snafu(display("unexpected tag {} at position {}", tag, position))]
    BadTag { tag: Tag, position: usize },

    #[snafu(display(
        "bad value representation code {:?} for element {}",
        std::str::from_utf8(bytes).unwrap_or("??"),
        tag
    ))]
    BadVr { tag: Tag, bytes: [u8; 2] },

    #[snafu(display(
        "value length {} of element {} overruns its container ({} bytes available)",
        length,
        tag,
        available
    ))]
    LengthOverrun {
        tag: Tag,
        length: u32,
        available: usize,
    },

    #[snafu(display("element {} has an odd value length {}", tag, length))]
    NonEvenLength { tag: Tag, length: u32 },

    #[snafu(display("element {} must not have an undefined length", tag))]
    UndefinedLengthMisuse { tag: Tag },

    #[snafu(display("unsupported transfer syntax `{}`", uid))]
    UnsupportedTransferSyntax { uid: String },

    #[snafu(display("could not inflate deflated data set"))]
    Inflate { source: std::io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Decode a full data set from a byte buffer
/// under the transfer syntax identified by `uid`.
pub fn read_dataset_by_uid(bytes: &[u8], uid: &str) -> Result<DataSet> {
    let ts = transfer_syntax::lookup(uid).ok_or_else(|| Error::UnsupportedTransferSyntax {
        uid: uid.to_string(),
    })?;
    read_dataset(bytes, ts)
}

/// Decode a full data set from a byte buffer under a transfer syntax.
pub fn read_dataset(bytes: &[u8], ts: &TransferSyntax) -> Result<DataSet> {
    if ts.is_deflated() {
        let inflated = crate::deflate::inflate(bytes).context(InflateSnafu)?;
        tracing::trace!(
            packed = bytes.len(),
            inflated = inflated.len(),
            "inflated deflated data set"
        );
        let mut decoder = Decoder::new(&inflated, ts.endianness(), ts.is_explicit_vr());
        return decoder.read_all();
    }
    let mut decoder = Decoder::new(bytes, ts.endianness(), ts.is_explicit_vr());
    decoder.read_all()
}

/// A stateful data set decoder over a bounded byte buffer.
pub struct Decoder<'a> {
    reader: ByteReader<'a>,
    explicit_vr: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8], endianness: Endianness, explicit_vr: bool) -> Self {
        Decoder {
            reader: ByteReader::new(buf, endianness),
            explicit_vr,
        }
    }

    fn bounded(&mut self, n: u32, tag: Tag) -> Result<Decoder<'a>> {
        let available = self.reader.remaining();
        let sub = self
            .reader
            .sub_reader(n as usize)
            .map_err(|_| Error::LengthOverrun {
                tag,
                length: n,
                available,
            })?;
        Ok(Decoder {
            reader: sub,
            explicit_vr: self.explicit_vr,
        })
    }

    /// Decode elements until the input is exhausted.
    pub fn read_all(&mut self) -> Result<DataSet> {
        let mut dataset = DataSet::new();
        while !self.reader.is_empty() {
            dataset.put(self.read_element()?);
        }
        Ok(dataset)
    }

    /// Decode a single data element at the cursor.
    pub fn read_element(&mut self) -> Result<DataElement> {
        let position = self.reader.position();
        let tag = self.read_tag()?;
        if tag.is_delimitation() {
            // delimiters are consumed by the container readers,
            // never expected at element position
            return BadTagSnafu { tag, position }.fail();
        }
        let (vr, length) = self.read_header(tag)?;

        if length == UNDEFINED {
            return self.read_undefined_length_value(tag, vr);
        }

        if vr == VR::SQ {
            let mut sub = self.bounded(length, tag)?;
            let items = sub.read_items_to_end()?;
            return Ok(DataElement::new(tag, vr, Value::Sequence(items)));
        }

        if length % 2 != 0 {
            return NonEvenLengthSnafu { tag, length }.fail();
        }

        let available = self.reader.remaining();
        let bytes = self
            .reader
            .take(length as usize)
            .map_err(|_| Error::LengthOverrun {
                tag,
                length,
                available,
            })?;
        let value = decode_primitive(vr, bytes, self.reader.endianness());
        Ok(DataElement::new(tag, vr, Value::Primitive(value)))
    }

    fn read_tag(&mut self) -> Result<Tag> {
        let group = self.reader.read_u16().context(TruncatedSnafu {
            field: "tag group number",
        })?;
        let element = self.reader.read_u16().context(TruncatedSnafu {
            field: "tag element number",
        })?;
        Ok(Tag(group, element))
    }

    fn read_header(&mut self, tag: Tag) -> Result<(VR, u32)> {
        if !self.explicit_vr {
            let vr = dictionary::vr_of(tag);
            let length = self
                .reader
                .read_u32()
                .context(TruncatedSnafu { field: "length" })?;
            return Ok((vr, length));
        }

        let vr_bytes = self
            .reader
            .take(2)
            .context(TruncatedSnafu { field: "VR code" })?;
        let vr_bytes = [vr_bytes[0], vr_bytes[1]];
        let vr = VR::from_binary(vr_bytes).ok_or(Error::BadVr {
            tag,
            bytes: vr_bytes,
        })?;

        let length = if vr.uses_long_length() {
            self.reader.skip(2).context(TruncatedSnafu {
                field: "reserved header bytes",
            })?;
            self.reader
                .read_u32()
                .context(TruncatedSnafu { field: "length" })?
        } else {
            u32::from(
                self.reader
                    .read_u16()
                    .context(TruncatedSnafu { field: "length" })?,
            )
        };
        Ok((vr, length))
    }

    fn read_undefined_length_value(&mut self, tag: Tag, vr: VR) -> Result<DataElement> {
        if vr == VR::SQ {
            let items = self.read_items_delimited()?;
            return Ok(DataElement::new(tag, vr, Value::Sequence(items)));
        }
        if tag == tags::PIXEL_DATA && matches!(vr, VR::OB | VR::OW | VR::UN) {
            let (offset_table, fragments) = self.read_pixel_items()?;
            return Ok(DataElement::new(
                tag,
                vr,
                Value::PixelSequence {
                    offset_table,
                    fragments,
                },
            ));
        }
        UndefinedLengthMisuseSnafu { tag }.fail()
    }

    /// Read one item or delimitation header:
    /// a tag and a 32-bit length, with no VR in any encoding.
    fn read_item_header(&mut self) -> Result<(Tag, u32)> {
        let position = self.reader.position();
        let tag = self.read_tag()?;
        if !tag.is_delimitation() {
            return BadTagSnafu { tag, position }.fail();
        }
        let length = self.reader.read_u32().context(TruncatedSnafu {
            field: "item length",
        })?;
        Ok((tag, length))
    }

    /// Read sequence items until the bounded input is exhausted.
    fn read_items_to_end(&mut self) -> Result<Vec<DataSet>> {
        let mut items = Vec::new();
        while !self.reader.is_empty() {
            let position = self.reader.position();
            let (tag, length) = self.read_item_header()?;
            if !tag.is_item() {
                return BadTagSnafu { tag, position }.fail();
            }
            items.push(self.read_item_body(tag, length)?);
        }
        Ok(items)
    }

    /// Read sequence items until a sequence delimitation item.
    fn read_items_delimited(&mut self) -> Result<Vec<DataSet>> {
        let mut items = Vec::new();
        loop {
            let position = self.reader.position();
            let (tag, length) = self.read_item_header()?;
            if tag.is_sequence_delimiter() {
                return Ok(items);
            }
            if !tag.is_item() {
                return BadTagSnafu { tag, position }.fail();
            }
            items.push(self.read_item_body(tag, length)?);
        }
    }

    fn read_item_body(&mut self, tag: Tag, length: u32) -> Result<DataSet> {
        if length == UNDEFINED {
            // sealed at the item delimitation item
            let mut item = DataSet::new();
            loop {
                if self.consume_item_delimiter()? {
                    return Ok(item);
                }
                item.put(self.read_element()?);
            }
        }
        let mut sub = self.bounded(length, tag)?;
        sub.read_all()
    }

    /// Consume an item delimitation item if one sits at the cursor.
    fn consume_item_delimiter(&mut self) -> Result<bool> {
        let mut probe = self.reader.clone();
        let group = probe.read_u16().context(TruncatedSnafu {
            field: "tag group number",
        })?;
        let element = probe.read_u16().context(TruncatedSnafu {
            field: "tag element number",
        })?;
        if !Tag(group, element).is_item_delimiter() {
            return Ok(false);
        }
        self.read_tag()?;
        self.reader.read_u32().context(TruncatedSnafu {
            field: "item delimiter length",
        })?;
        Ok(true)
    }

    /// Read the basic offset table and pixel fragments
    /// of an encapsulated pixel data element.
    fn read_pixel_items(&mut self) -> Result<(Vec<u32>, Vec<Vec<u8>>)> {
        let mut offset_table = Vec::new();
        let mut fragments = Vec::new();
        let mut first = true;
        loop {
            let position = self.reader.position();
            let (tag, length) = self.read_item_header()?;
            if tag.is_sequence_delimiter() {
                return Ok((offset_table, fragments));
            }
            if !tag.is_item() {
                return BadTagSnafu { tag, position }.fail();
            }
            if length == UNDEFINED {
                return UndefinedLengthMisuseSnafu { tag }.fail();
            }
            let available = self.reader.remaining();
            let bytes = self
                .reader
                .take(length as usize)
                .map_err(|_| Error::LengthOverrun {
                    tag,
                    length,
                    available,
                })?;
            if first {
                // item 0 is the basic offset table, possibly empty
                first = false;
                let mut table_reader = ByteReader::new(bytes, self.reader.endianness());
                while !table_reader.is_empty() {
                    offset_table.push(table_reader.read_u32().context(TruncatedSnafu {
                        field: "basic offset table entry",
                    })?);
                }
            } else {
                fragments.push(bytes.to_vec());
            }
        }
    }
}

fn chunked_u16(bytes: &[u8], endianness: Endianness) -> C<u16> {
    bytes
        .chunks_exact(2)
        .map(|b| match endianness {
            Endianness::Little => u16::from_le_bytes([b[0], b[1]]),
            Endianness::Big => u16::from_be_bytes([b[0], b[1]]),
        })
        .collect()
}

fn chunked_u32(bytes: &[u8], endianness: Endianness) -> C<u32> {
    bytes
        .chunks_exact(4)
        .map(|b| match endianness {
            Endianness::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            Endianness::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        })
        .collect()
}

fn chunked_u64(bytes: &[u8], endianness: Endianness) -> C<u64> {
    bytes
        .chunks_exact(8)
        .map(|b| match endianness {
            Endianness::Little => {
                u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
            Endianness::Big => {
                u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
        })
        .collect()
}

/// Decode a primitive value field according to its VR.
///
/// String values lose at most one trailing padding byte,
/// which the encoder deterministically restores;
/// pixel data payloads are never byte-swapped here.
fn decode_primitive(vr: VR, bytes: &[u8], endianness: Endianness) -> PrimitiveValue {
    if bytes.is_empty() {
        return PrimitiveValue::Empty;
    }
    if vr.is_string() {
        let mut text = String::from_utf8_lossy(bytes).into_owned();
        if text.as_bytes().last() == Some(&vr.pad_byte()) {
            text.pop();
        }
        return PrimitiveValue::Str(text);
    }
    match vr {
        VR::US => PrimitiveValue::U16s(chunked_u16(bytes, endianness)),
        VR::SS => PrimitiveValue::I16s(
            chunked_u16(bytes, endianness)
                .into_iter()
                .map(|v| v as i16)
                .collect(),
        ),
        VR::UL => PrimitiveValue::U32s(chunked_u32(bytes, endianness)),
        VR::SL => PrimitiveValue::I32s(
            chunked_u32(bytes, endianness)
                .into_iter()
                .map(|v| v as i32)
                .collect(),
        ),
        VR::FL => PrimitiveValue::F32s(
            chunked_u32(bytes, endianness)
                .into_iter()
                .map(f32::from_bits)
                .collect(),
        ),
        VR::FD => PrimitiveValue::F64s(
            chunked_u64(bytes, endianness)
                .into_iter()
                .map(f64::from_bits)
                .collect(),
        ),
        _ => PrimitiveValue::Bytes(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer_syntax::entries;

    #[test]
    fn explicit_le_element() {
        // (0010,0020) LO, length 2, "P1"
        let bytes = [
            0x10, 0x00, 0x20, 0x00, b'L', b'O', 0x02, 0x00, b'P', b'1',
        ];
        let ds = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.string(tags::PATIENT_ID).unwrap(), "P1");
        assert_eq!(ds.get(tags::PATIENT_ID).unwrap().vr(), VR::LO);
    }

    #[test]
    fn implicit_le_element_resolves_vr() {
        // (0010,0010), length 4, "DOE " (padded)
        let bytes = [
            0x10, 0x00, 0x10, 0x00, 0x04, 0x00, 0x00, 0x00, b'D', b'O', b'E', b' ',
        ];
        let ds = read_dataset(&bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN).unwrap();
        let elem = ds.get(tags::PATIENT_NAME).unwrap();
        assert_eq!(elem.vr(), VR::PN);
        assert_eq!(ds.string(tags::PATIENT_NAME).unwrap(), "DOE");
    }

    #[test]
    fn explicit_be_numbers() {
        // (0028,0010) US, length 2, 512
        let bytes = [0x00, 0x28, 0x00, 0x10, b'U', b'S', 0x00, 0x02, 0x02, 0x00];
        let ds = read_dataset(&bytes, &entries::EXPLICIT_VR_BIG_ENDIAN).unwrap();
        assert_eq!(ds.uint16(tags::ROWS).unwrap(), 512);
    }

    #[test]
    fn zero_length_element() {
        let bytes = [0x08, 0x00, 0x20, 0x00, b'D', b'A', 0x00, 0x00];
        let ds = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert!(ds.get(tags::STUDY_DATE).unwrap().is_empty());
    }

    #[test]
    fn long_length_vr_has_reserved_bytes() {
        // (7FE0,0010) OW, reserved, length 4
        let bytes = [
            0xE0, 0x7F, 0x10, 0x00, b'O', b'W', 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 1, 2, 3, 4,
        ];
        let ds = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        let elem = ds.get(tags::PIXEL_DATA).unwrap();
        assert_eq!(
            elem.value().primitive().unwrap().as_bytes().unwrap(),
            &[1, 2, 3, 4]
        );
    }

    #[test]
    fn undefined_length_sequence() {
        let mut bytes = vec![
            // (0008,1115) SQ, reserved, undefined length
            0x08, 0x00, 0x15, 0x11, b'S', b'Q', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        // item, undefined length
        bytes.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0, 0xFF, 0xFF, 0xFF, 0xFF]);
        // (0020,000E) UI len 4 "1.2\0"
        bytes.extend_from_slice(&[
            0x20, 0x00, 0x0E, 0x00, b'U', b'I', 0x04, 0x00, b'1', b'.', b'2', 0x00,
        ]);
        // item delimiter
        bytes.extend_from_slice(&[0xFE, 0xFF, 0x0D, 0xE0, 0x00, 0x00, 0x00, 0x00]);
        // sequence delimiter
        bytes.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0, 0x00, 0x00, 0x00, 0x00]);

        let ds = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        let items = ds.items(tags::REFERENCED_SERIES_SEQUENCE).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].uid(tags::SERIES_INSTANCE_UID).unwrap(), "1.2");
    }

    #[test]
    fn undefined_length_sequence_with_zero_items() {
        let mut bytes = vec![
            0x08, 0x00, 0x15, 0x11, b'S', b'Q', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        bytes.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0, 0x00, 0x00, 0x00, 0x00]);
        let ds = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        assert_eq!(
            ds.items(tags::REFERENCED_SERIES_SEQUENCE).unwrap().len(),
            0
        );
    }

    #[test]
    fn encapsulated_pixel_data_with_empty_offset_table() {
        let mut bytes = vec![
            // (7FE0,0010) OB, reserved, undefined length
            0xE0, 0x7F, 0x10, 0x00, b'O', b'B', 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        // empty basic offset table
        bytes.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0, 0x00, 0x00, 0x00, 0x00]);
        // one fragment of 4 bytes
        bytes.extend_from_slice(&[0xFE, 0xFF, 0x00, 0xE0, 0x04, 0x00, 0x00, 0x00, 9, 8, 7, 6]);
        // sequence delimiter
        bytes.extend_from_slice(&[0xFE, 0xFF, 0xDD, 0xE0, 0x00, 0x00, 0x00, 0x00]);

        let ds = read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap();
        match ds.get(tags::PIXEL_DATA).unwrap().value() {
            Value::PixelSequence {
                offset_table,
                fragments,
            } => {
                assert!(offset_table.is_empty());
                assert_eq!(fragments.len(), 1);
                assert_eq!(fragments[0], vec![9, 8, 7, 6]);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn truncated_input() {
        let bytes = [0x10, 0x00, 0x20, 0x00, b'L', b'O', 0x08, 0x00, b'P'];
        let err =
            read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap_err();
        assert!(matches!(err, Error::LengthOverrun { .. }));

        let err = read_dataset(&[0x10, 0x00], &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn bad_vr_code() {
        let bytes = [0x10, 0x00, 0x20, 0x00, b'?', b'?', 0x02, 0x00, b'P', b'1'];
        let err =
            read_dataset(&bytes, &entries::EXPLICIT_VR_LITTLE_ENDIAN).unwrap_err();
        assert!(matches!(err, Error::BadVr { .. }));
    }

    #[test]
    fn undefined_length_misuse() {
        // undefined length on a LO element is not legal
        let bytes = [
            0x10, 0x00, 0x20, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
        ];
        let err =
            read_dataset(&bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN).unwrap_err();
        assert!(matches!(err, Error::UndefinedLengthMisuse { .. }));
    }

    #[test]
    fn unknown_transfer_syntax_is_rejected() {
        let err = read_dataset_by_uid(&[], "1.2.3.4.5").unwrap_err();
        assert!(matches!(err, Error::UnsupportedTransferSyntax { .. }));
    }
}
