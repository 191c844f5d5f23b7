//! The catalog of recognized transfer syntaxes.
//!
//! Three orthogonal attributes fully determine how a data set is coded:
//! byte order, VR explicitness, and whether pixel data is encapsulated.
//! The deflated syntax additionally wraps the whole data set
//! (but never the file meta group) in a raw deflate stream.
use byteordered::Endianness;
use lazy_static::lazy_static;
use std::collections::HashMap;

use ferrodicom_core::trim_uid;

/// A transfer syntax descriptor.
#[derive(Debug, PartialEq, Eq)]
pub struct TransferSyntax {
    uid: &'static str,
    name: &'static str,
    endianness: Endianness,
    explicit_vr: bool,
    encapsulated: bool,
    deflated: bool,
}

impl TransferSyntax {
    /// The unique identifier of this transfer syntax.
    #[inline]
    pub fn uid(&self) -> &'static str {
        self.uid
    }

    /// A human readable name, e.g. "Explicit VR Little Endian".
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Whether data elements carry their VR code in the encoding.
    #[inline]
    pub fn is_explicit_vr(&self) -> bool {
        self.explicit_vr
    }

    /// Whether pixel data is stored as an encapsulated fragment stream.
    /// Encapsulated payloads are preserved verbatim, never decompressed.
    #[inline]
    pub fn is_encapsulated(&self) -> bool {
        self.encapsulated
    }

    /// Whether the main data set is wrapped in a deflate stream.
    #[inline]
    pub fn is_deflated(&self) -> bool {
        self.deflated
    }
}

pub mod entries {
    use super::*;

    macro_rules! ts {
        ($uid:expr, $name:expr, $endianness:ident, $explicit:expr, $encapsulated:expr, $deflated:expr) => {
            TransferSyntax {
                uid: $uid,
                name: $name,
                endianness: Endianness::$endianness,
                explicit_vr: $explicit,
                encapsulated: $encapsulated,
                deflated: $deflated,
            }
        };
    }

    pub const IMPLICIT_VR_LITTLE_ENDIAN: TransferSyntax = ts!(
        "1.2.840.10008.1.2",
        "Implicit VR Little Endian",
        Little,
        false,
        false,
        false
    );
    pub const EXPLICIT_VR_LITTLE_ENDIAN: TransferSyntax = ts!(
        "1.2.840.10008.1.2.1",
        "Explicit VR Little Endian",
        Little,
        true,
        false,
        false
    );
    pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: TransferSyntax = ts!(
        "1.2.840.10008.1.2.1.99",
        "Deflated Explicit VR Little Endian",
        Little,
        true,
        false,
        true
    );
    // retired, but grandfathered for interoperability
    pub const EXPLICIT_VR_BIG_ENDIAN: TransferSyntax = ts!(
        "1.2.840.10008.1.2.2",
        "Explicit VR Big Endian",
        Big,
        true,
        false,
        false
    );
    pub const JPEG_BASELINE: TransferSyntax = ts!(
        "1.2.840.10008.1.2.4.50",
        "JPEG Baseline (Process 1)",
        Little,
        true,
        true,
        false
    );
    pub const JPEG_EXTENDED: TransferSyntax = ts!(
        "1.2.840.10008.1.2.4.51",
        "JPEG Extended (Process 2 & 4)",
        Little,
        true,
        true,
        false
    );
    pub const JPEG_LOSSLESS_SV1: TransferSyntax = ts!(
        "1.2.840.10008.1.2.4.70",
        "JPEG Lossless, Non-Hierarchical, First-Order Prediction",
        Little,
        true,
        true,
        false
    );
    pub const JPEG_LS_LOSSLESS: TransferSyntax = ts!(
        "1.2.840.10008.1.2.4.80",
        "JPEG-LS Lossless",
        Little,
        true,
        true,
        false
    );
    pub const JPEG_LS_LOSSY: TransferSyntax = ts!(
        "1.2.840.10008.1.2.4.81",
        "JPEG-LS Lossy (Near-Lossless)",
        Little,
        true,
        true,
        false
    );
    pub const JPEG_2000_LOSSLESS: TransferSyntax = ts!(
        "1.2.840.10008.1.2.4.90",
        "JPEG 2000 (Lossless Only)",
        Little,
        true,
        true,
        false
    );
    pub const JPEG_2000: TransferSyntax = ts!(
        "1.2.840.10008.1.2.4.91",
        "JPEG 2000",
        Little,
        true,
        true,
        false
    );
    pub const RLE_LOSSLESS: TransferSyntax = ts!(
        "1.2.840.10008.1.2.5",
        "RLE Lossless",
        Little,
        true,
        true,
        false
    );

    pub(super) const ALL: &[&TransferSyntax] = &[
        &IMPLICIT_VR_LITTLE_ENDIAN,
        &EXPLICIT_VR_LITTLE_ENDIAN,
        &DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN,
        &EXPLICIT_VR_BIG_ENDIAN,
        &JPEG_BASELINE,
        &JPEG_EXTENDED,
        &JPEG_LOSSLESS_SV1,
        &JPEG_LS_LOSSLESS,
        &JPEG_LS_LOSSY,
        &JPEG_2000_LOSSLESS,
        &JPEG_2000,
        &RLE_LOSSLESS,
    ];
}

lazy_static! {
    static ref REGISTRY: HashMap<&'static str, &'static TransferSyntax> =
        entries::ALL.iter().map(|ts| (ts.uid(), *ts)).collect();
}

/// Look up a transfer syntax by UID.
///
/// Trailing padding in the UID value is ignored.
/// Returns `None` for unknown transfer syntaxes,
/// which callers surface as an unsupported transfer syntax error.
pub fn lookup(uid: &str) -> Option<&'static TransferSyntax> {
    REGISTRY.get(trim_uid(uid)).copied()
}

/// Iterate over all recognized transfer syntaxes.
pub fn all() -> impl Iterator<Item = &'static TransferSyntax> {
    entries::ALL.iter().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_uid() {
        let ts = lookup("1.2.840.10008.1.2.1").unwrap();
        assert_eq!(ts, &entries::EXPLICIT_VR_LITTLE_ENDIAN);
        assert!(ts.is_explicit_vr());
        assert_eq!(ts.endianness(), Endianness::Little);
        assert!(!ts.is_encapsulated());

        assert!(lookup("1.2.840.10008.1.2.4.100").is_none());
    }

    #[test]
    fn trailing_padding_is_ignored() {
        assert_eq!(
            lookup("1.2.840.10008.1.2\0").unwrap(),
            &entries::IMPLICIT_VR_LITTLE_ENDIAN
        );
    }

    #[test]
    fn attribute_axes() {
        assert!(!entries::IMPLICIT_VR_LITTLE_ENDIAN.is_explicit_vr());
        assert_eq!(
            entries::EXPLICIT_VR_BIG_ENDIAN.endianness(),
            Endianness::Big
        );
        assert!(entries::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN.is_deflated());
        assert!(entries::JPEG_BASELINE.is_encapsulated());
        assert!(entries::RLE_LOSSLESS.is_encapsulated());
    }
}
