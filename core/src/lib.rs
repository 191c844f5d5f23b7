//! Core data model for DICOM compliant systems:
//! attribute tags, value representations, primitive values,
//! data sets and the standard attribute dictionary subset
//! needed for implicit VR decoding.
//!
//! This crate is transport and encoding agnostic.
//! Byte-level concerns live in `ferrodicom-encoding`.
pub mod dataset;
pub mod dictionary;
pub mod tag;
pub mod tags;
pub mod uids;
pub mod value;
pub mod vr;

pub use dataset::{AccessError, DataElement, DataSet};
pub use tag::{Length, Tag};
pub use value::{PrimitiveValue, Value};
pub use vr::VR;

/// Check whether a string is a valid DICOM unique identifier:
/// dot-separated numeric components, no component with a leading zero
/// (except the component `0` itself), at most 64 characters in total.
pub fn is_valid_uid(uid: &str) -> bool {
    let uid = uid.trim_end_matches('\0');
    if uid.is_empty() || uid.len() > 64 {
        return false;
    }
    uid.split('.').all(|part| {
        !part.is_empty()
            && part.bytes().all(|b| b.is_ascii_digit())
            && (part.len() == 1 || !part.starts_with('0'))
    })
}

/// Trim the characters which are insignificant in a UID value:
/// trailing NUL padding and surrounding spaces.
pub fn trim_uid(uid: &str) -> &str {
    uid.trim_matches(|c| c == '\0' || c == ' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_validation() {
        assert!(is_valid_uid("1.2.840.10008.1.1"));
        assert!(is_valid_uid("1.2.3"));
        assert!(is_valid_uid("1.2.3\0"));
        assert!(is_valid_uid("0.1"));
        assert!(!is_valid_uid(""));
        assert!(!is_valid_uid("1..2"));
        assert!(!is_valid_uid("1.02"));
        assert!(!is_valid_uid("1.2a"));
        let too_long = "1.".repeat(33);
        assert!(!is_valid_uid(&too_long));
    }

    #[test]
    fn uid_trimming() {
        assert_eq!(trim_uid("1.2.3\0"), "1.2.3");
        assert_eq!(trim_uid(" 1.2.3 "), "1.2.3");
    }
}
