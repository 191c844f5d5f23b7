//! The data set type: an ordered mapping from tags to data elements,
//! with typed access and conformance-checked mutation.
use snafu::Snafu;
use std::borrow::Cow;
use std::collections::btree_map::{self, BTreeMap};

use crate::tag::Tag;
use crate::value::{PrimitiveValue, Value};
use crate::vr::VR;
use crate::{is_valid_uid, trim_uid};

/// An error obtaining or converting a value from a data set.
#[derive(Debug, Snafu)]
pub enum AccessError {
    #[snafu(display("no such data element {}", tag))]
    MissingElement { tag: Tag },

    #[snafu(display("element {} does not hold a value of the requested type", tag))]
    CastMismatch { tag: Tag },

    #[snafu(display("element {} holds malformed content `{}`", tag, content))]
    MalformedValue { tag: Tag, content: String },
}

/// An error raised by typed setters
/// when a value does not conform to its value representation.
#[derive(Debug, Snafu)]
pub enum ConformanceError {
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
}

/// A DICOM data element: a tag, a value representation, and a value.
///
/// Two elements are equal when tag, VR and value are equal;
/// the encoded length is a property of serialization, not of the element.
#[derive(Debug, Clone, PartialEq)]
pub struct DataElement {
    tag: Tag,
    vr: VR,
    value: Value,
}

impl DataElement {
    /// Create a data element from the given parts.
    /// This constructor does not check
    /// that the value conforms to the value representation.
    pub fn new<V>(tag: Tag, vr: VR, value: V) -> Self
    where
        V: Into<Value>,
    {
        DataElement {
            tag,
            vr,
            value: value.into(),
        }
    }

    /// Create an empty data element.
    pub fn empty(tag: Tag, vr: VR) -> Self {
        DataElement {
            tag,
            vr,
            value: Value::Primitive(PrimitiveValue::Empty),
        }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    #[inline]
    pub fn vr(&self) -> VR {
        self.vr
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[inline]
    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Retrieve the element's value as a single string.
    pub fn to_str(&self) -> Cow<str> {
        self.value.to_str()
    }

    /// Whether the element has no content.
    pub fn is_empty(&self) -> bool {
        match &self.value {
            Value::Primitive(v) => v.is_empty(),
            Value::Sequence(items) => items.is_empty(),
            Value::PixelSequence { fragments, .. } => fragments.is_empty(),
        }
    }
}

/// An ordered collection of DICOM data elements,
/// keyed and iterated in ascending tag order.
///
/// A data set exclusively owns its elements;
/// items of nested sequences are owned by the sequence element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSet {
    elements: BTreeMap<Tag, DataElement>,
}

pub type Result<T, E = AccessError> = std::result::Result<T, E>;

impl DataSet {
    /// Create an empty data set.
    pub fn new() -> Self {
        DataSet::default()
    }

    /// Insert a data element, replacing any element with the same tag.
    /// Returns the replaced element, if any.
    pub fn put(&mut self, elem: DataElement) -> Option<DataElement> {
        self.elements.insert(elem.tag(), elem)
    }

    /// Insert a string value after checking VR conformance:
    /// every individual value must fit the VR's maximum length,
    /// and UI values must be valid unique identifiers.
    pub fn put_str(
        &mut self,
        tag: Tag,
        vr: VR,
        value: impl Into<String>,
    ) -> Result<(), ConformanceError> {
        let value = value.into();
        if let Some(max) = vr.max_value_len() {
            let pieces: Vec<&str> = if vr.properties().is_multi_valued {
                value.split('\\').collect()
            } else {
                vec![value.as_str()]
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
        }
        self.put(DataElement::new(tag, vr, value));
        Ok(())
    }

    /// Insert an unsigned 16-bit value.
    pub fn put_u16(&mut self, tag: Tag, vr: VR, value: u16) {
        self.put(DataElement::new(tag, vr, value));
    }

    /// Insert a sequence element with the given items.
    pub fn put_seq(&mut self, tag: Tag, items: Vec<DataSet>) {
        self.put(DataElement::new(tag, VR::SQ, Value::Sequence(items)));
    }

    /// Remove an element by tag, returning it if present.
    pub fn remove(&mut self, tag: Tag) -> Option<DataElement> {
        self.elements.remove(&tag)
    }

    /// Get a reference to the element with the given tag, if present.
    pub fn get(&self, tag: Tag) -> Option<&DataElement> {
        self.elements.get(&tag)
    }

    /// Get a reference to the element with the given tag,
    /// or a missing element error.
    pub fn element(&self, tag: Tag) -> Result<&DataElement> {
        self.elements
            .get(&tag)
            .ok_or(AccessError::MissingElement { tag })
    }

    /// Whether the data set contains an element with this tag.
    pub fn contains(&self, tag: Tag) -> bool {
        self.elements.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Iterate over the elements in ascending tag order.
    pub fn iter(&self) -> btree_map::Values<'_, Tag, DataElement> {
        self.elements.values()
    }

    /// Iterate over the tags in ascending order.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.elements.keys().copied()
    }

    /// Merge another data set into this one,
    /// overwriting elements with matching tags.
    pub fn merge(&mut self, other: DataSet) {
        for (tag, elem) in other.elements {
            self.elements.insert(tag, elem);
        }
    }

    // typed accessors

    /// The element's value as a string,
    /// trimmed of insignificant trailing padding.
    pub fn string(&self, tag: Tag) -> Result<Cow<str>> {
        let elem = self.element(tag)?;
        match elem.value() {
            Value::Primitive(v) => Ok(match v.to_str() {
                Cow::Borrowed(s) => Cow::Borrowed(s.trim_end_matches([' ', '\0'])),
                Cow::Owned(s) => Cow::Owned(s.trim_end_matches([' ', '\0']).to_string()),
            }),
            _ => CastMismatchSnafu { tag }.fail(),
        }
    }

    /// The element's value as a string, or `None` when absent.
    pub fn opt_string(&self, tag: Tag) -> Option<String> {
        self.string(tag).ok().map(|s| s.into_owned())
    }

    /// The element's individual string values, trimmed.
    pub fn strings(&self, tag: Tag) -> Result<Vec<String>> {
        let elem = self.element(tag)?;
        match elem.value() {
            Value::Primitive(v) => Ok(v.strings()),
            _ => CastMismatchSnafu { tag }.fail(),
        }
    }

    /// The element's value as a unique identifier,
    /// trimmed of padding.
    pub fn uid(&self, tag: Tag) -> Result<&str> {
        let elem = self.element(tag)?;
        match elem.value() {
            Value::Primitive(PrimitiveValue::Str(s)) => Ok(trim_uid(s)),
            Value::Primitive(PrimitiveValue::Empty) => Ok(""),
            _ => CastMismatchSnafu { tag }.fail(),
        }
    }

    /// The element's first value as an unsigned 16-bit integer.
    pub fn uint16(&self, tag: Tag) -> Result<u16> {
        let elem = self.element(tag)?;
        match elem.value() {
            Value::Primitive(v) => v.uint16().ok_or_else(|| AccessError::MalformedValue {
                tag,
                content: v.to_str().into_owned(),
            }),
            _ => CastMismatchSnafu { tag }.fail(),
        }
    }

    /// The element's first value as an unsigned 32-bit integer.
    pub fn uint32(&self, tag: Tag) -> Result<u32> {
        let elem = self.element(tag)?;
        match elem.value() {
            Value::Primitive(v) => v.uint32().ok_or_else(|| AccessError::MalformedValue {
                tag,
                content: v.to_str().into_owned(),
            }),
            _ => CastMismatchSnafu { tag }.fail(),
        }
    }

    /// The element's first value as a signed 32-bit integer.
    /// Integer strings are parsed on demand.
    pub fn int32(&self, tag: Tag) -> Result<i32> {
        let elem = self.element(tag)?;
        match elem.value() {
            Value::Primitive(v) => v.int32().ok_or_else(|| AccessError::MalformedValue {
                tag,
                content: v.to_str().into_owned(),
            }),
            _ => CastMismatchSnafu { tag }.fail(),
        }
    }

    /// The element's value as a calendar date (DA, `YYYYMMDD`).
    pub fn date(&self, tag: Tag) -> Result<chrono::NaiveDate> {
        let text = self.string(tag)?.into_owned();
        chrono::NaiveDate::parse_from_str(text.trim(), "%Y%m%d").map_err(|_| {
            AccessError::MalformedValue {
                tag,
                content: text,
            }
        })
    }

    /// The element's sequence items, if the element is a sequence.
    pub fn items(&self, tag: Tag) -> Option<&[DataSet]> {
        self.get(tag).and_then(|e| e.value().items())
    }
}

impl IntoIterator for DataSet {
    type Item = DataElement;
    type IntoIter = std::collections::btree_map::IntoValues<Tag, DataElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_values()
    }
}

impl FromIterator<DataElement> for DataSet {
    fn from_iter<T: IntoIterator<Item = DataElement>>(iter: T) -> Self {
        let mut ds = DataSet::new();
        for elem in iter {
            ds.put(elem);
        }
        ds
    }
}
