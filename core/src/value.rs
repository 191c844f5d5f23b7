//! Value types for DICOM data elements.
//!
//! A primitive value holds the decoded content of a non-sequence element.
//! String values keep the textual form found in the input,
//! so that numeric strings (IS, DS) re-encode byte for byte
//! and are only re-parsed on typed access.
use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;

use crate::dataset::DataSet;

/// The container type for multi-valued numeric content.
pub type C<T> = SmallVec<[T; 2]>;

/// A primitive (non-nested) DICOM value.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    /// no content
    Empty,
    /// the raw value field of a string VR,
    /// possibly a backslash-delimited list
    Str(String),
    /// unsigned 16-bit integers
    U16s(C<u16>),
    /// signed 16-bit integers
    I16s(C<i16>),
    /// unsigned 32-bit integers
    U32s(C<u32>),
    /// signed 32-bit integers
    I32s(C<i32>),
    /// single precision floating point numbers
    F32s(C<f32>),
    /// double precision floating point numbers
    F64s(C<f64>),
    /// raw binary content (OB, OW, OF, OD, OL, UN)
    Bytes(Vec<u8>),
}

impl PrimitiveValue {
    /// The number of bytes this value occupies before padding.
    pub fn byte_len(&self) -> usize {
        use PrimitiveValue::*;
        match self {
            Empty => 0,
            Str(s) => s.len(),
            U16s(v) => v.len() * 2,
            I16s(v) => v.len() * 2,
            U32s(v) => v.len() * 4,
            I32s(v) => v.len() * 4,
            F32s(v) => v.len() * 4,
            F64s(v) => v.len() * 8,
            Bytes(v) => v.len(),
        }
    }

    /// The number of values in this content.
    pub fn multiplicity(&self) -> usize {
        use PrimitiveValue::*;
        match self {
            Empty => 0,
            Str(s) => {
                if s.is_empty() {
                    0
                } else {
                    s.split('\\').count()
                }
            }
            U16s(v) => v.len(),
            I16s(v) => v.len(),
            U32s(v) => v.len(),
            I32s(v) => v.len(),
            F32s(v) => v.len(),
            F64s(v) => v.len(),
            Bytes(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.byte_len() == 0
    }

    /// Render the whole value as a single string.
    /// Multi-valued numeric content is joined with backslashes.
    pub fn to_str(&self) -> Cow<str> {
        use PrimitiveValue::*;
        fn join<T: ToString>(v: &[T]) -> String {
            v.iter()
                .map(T::to_string)
                .collect::<Vec<_>>()
                .join("\\")
        }
        match self {
            Empty => Cow::from(""),
            Str(s) => Cow::from(s.as_str()),
            U16s(v) => Cow::from(join(v)),
            I16s(v) => Cow::from(join(v)),
            U32s(v) => Cow::from(join(v)),
            I32s(v) => Cow::from(join(v)),
            F32s(v) => Cow::from(join(v)),
            F64s(v) => Cow::from(join(v)),
            Bytes(v) => Cow::from(format!("<{} bytes>", v.len())),
        }
    }

    /// Split the value into its individual string forms,
    /// trimmed of insignificant padding.
    pub fn strings(&self) -> Vec<String> {
        match self {
            PrimitiveValue::Str(s) => {
                if s.is_empty() {
                    Vec::new()
                } else {
                    s.split('\\')
                        .map(|v| v.trim_matches(|c| c == ' ' || c == '\0').to_string())
                        .collect()
                }
            }
            PrimitiveValue::Empty => Vec::new(),
            other => other
                .to_str()
                .split('\\')
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// The first value as an unsigned 16-bit integer, if convertible.
    /// Integer strings are re-parsed on demand.
    pub fn uint16(&self) -> Option<u16> {
        use PrimitiveValue::*;
        match self {
            U16s(v) => v.first().copied(),
            I16s(v) => v.first().and_then(|&x| u16::try_from(x).ok()),
            U32s(v) => v.first().and_then(|&x| u16::try_from(x).ok()),
            I32s(v) => v.first().and_then(|&x| u16::try_from(x).ok()),
            Str(s) => s.split('\\').next()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// The first value as an unsigned 32-bit integer, if convertible.
    pub fn uint32(&self) -> Option<u32> {
        use PrimitiveValue::*;
        match self {
            U16s(v) => v.first().map(|&x| u32::from(x)),
            U32s(v) => v.first().copied(),
            I16s(v) => v.first().and_then(|&x| u32::try_from(x).ok()),
            I32s(v) => v.first().and_then(|&x| u32::try_from(x).ok()),
            Str(s) => s.split('\\').next()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// The first value as a signed 32-bit integer, if convertible.
    pub fn int32(&self) -> Option<i32> {
        use PrimitiveValue::*;
        match self {
            U16s(v) => v.first().map(|&x| i32::from(x)),
            I16s(v) => v.first().map(|&x| i32::from(x)),
            U32s(v) => v.first().and_then(|&x| i32::try_from(x).ok()),
            I32s(v) => v.first().copied(),
            Str(s) => s.split('\\').next()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// The first value as a double precision float, if convertible.
    pub fn float64(&self) -> Option<f64> {
        use PrimitiveValue::*;
        match self {
            F32s(v) => v.first().map(|&x| f64::from(x)),
            F64s(v) => v.first().copied(),
            U16s(v) => v.first().map(|&x| f64::from(x)),
            I16s(v) => v.first().map(|&x| f64::from(x)),
            U32s(v) => v.first().map(|&x| f64::from(x)),
            I32s(v) => v.first().map(|&x| f64::from(x)),
            Str(s) => s.split('\\').next()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Access the raw binary content, if this is a binary value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PrimitiveValue::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_str())
    }
}

impl From<&str> for PrimitiveValue {
    fn from(v: &str) -> Self {
        PrimitiveValue::Str(v.to_string())
    }
}

impl From<String> for PrimitiveValue {
    fn from(v: String) -> Self {
        PrimitiveValue::Str(v)
    }
}

impl From<u16> for PrimitiveValue {
    fn from(v: u16) -> Self {
        PrimitiveValue::U16s(smallvec::smallvec![v])
    }
}

impl From<u32> for PrimitiveValue {
    fn from(v: u32) -> Self {
        PrimitiveValue::U32s(smallvec::smallvec![v])
    }
}

impl From<i32> for PrimitiveValue {
    fn from(v: i32) -> Self {
        PrimitiveValue::I32s(smallvec::smallvec![v])
    }
}

impl From<f64> for PrimitiveValue {
    fn from(v: f64) -> Self {
        PrimitiveValue::F64s(smallvec::smallvec![v])
    }
}

impl From<Vec<u8>> for PrimitiveValue {
    fn from(v: Vec<u8>) -> Self {
        PrimitiveValue::Bytes(v)
    }
}

/// The value of a data element:
/// primitive content, a sequence of items,
/// or an encapsulated pixel data stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// a primitive value
    Primitive(PrimitiveValue),
    /// a sequence of items, each an owned subtree
    Sequence(Vec<DataSet>),
    /// encapsulated pixel data:
    /// a basic offset table (one entry per frame, possibly empty)
    /// and one or more fragments kept verbatim
    PixelSequence {
        offset_table: Vec<u32>,
        fragments: Vec<Vec<u8>>,
    },
}

impl Value {
    /// Access the primitive content of this value, if primitive.
    pub fn primitive(&self) -> Option<&PrimitiveValue> {
        match self {
            Value::Primitive(v) => Some(v),
            _ => None,
        }
    }

    /// Access the item list of this value, if it is a sequence.
    pub fn items(&self) -> Option<&[DataSet]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Access the fragment list, if this is an encapsulated pixel stream.
    pub fn fragments(&self) -> Option<&[Vec<u8>]> {
        match self {
            Value::PixelSequence { fragments, .. } => Some(fragments),
            _ => None,
        }
    }

    /// Render primitive content as a single string
    /// (empty for sequences and pixel streams).
    pub fn to_str(&self) -> Cow<str> {
        match self {
            Value::Primitive(v) => v.to_str(),
            _ => Cow::from(""),
        }
    }
}

impl<T> From<T> for Value
where
    T: Into<PrimitiveValue>,
{
    fn from(v: T) -> Self {
        Value::Primitive(v.into())
    }
}

impl From<Vec<DataSet>> for Value {
    fn from(items: Vec<DataSet>) -> Self {
        Value::Sequence(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_multiplicity() {
        let v = PrimitiveValue::from("1.2.3\\1.2.4");
        assert_eq!(v.multiplicity(), 2);
        assert_eq!(v.strings(), vec!["1.2.3", "1.2.4"]);
        assert_eq!(PrimitiveValue::Empty.multiplicity(), 0);
        assert_eq!(PrimitiveValue::from("").multiplicity(), 0);
    }

    #[test]
    fn lazy_numeric_strings() {
        let v = PrimitiveValue::from("42 ");
        assert_eq!(v.uint16(), Some(42));
        assert_eq!(v.int32(), Some(42));
        let bad = PrimitiveValue::from("4x");
        assert_eq!(bad.uint16(), None);
    }

    #[test]
    fn numeric_conversions() {
        let v = PrimitiveValue::U16s(smallvec::smallvec![7, 9]);
        assert_eq!(v.uint16(), Some(7));
        assert_eq!(v.uint32(), Some(7));
        assert_eq!(v.byte_len(), 4);
        assert_eq!(v.to_str(), "7\\9");
    }
}
