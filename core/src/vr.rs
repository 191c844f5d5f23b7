//! The closed set of value representations and their encoding properties.
use std::fmt;
use std::str::{from_utf8, FromStr};

/// An enum type for a DICOM value representation.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, Ord, PartialOrd)]
pub enum VR {
    /// Application Entity
    AE,
    /// Age String
    AS,
    /// Code String
    CS,
    /// Date
    DA,
    /// Decimal String
    DS,
    /// Date Time
    DT,
    /// Floating Point Single
    FL,
    /// Floating Point Double
    FD,
    /// Integer String
    IS,
    /// Long String
    LO,
    /// Long Text
    LT,
    /// Other Byte
    OB,
    /// Other Double
    OD,
    /// Other Float
    OF,
    /// Other Long
    OL,
    /// Other Word
    OW,
    /// Person Name
    PN,
    /// Short String
    SH,
    /// Signed Long
    SL,
    /// Sequence of Items
    SQ,
    /// Signed Short
    SS,
    /// Short Text
    ST,
    /// Time
    TM,
    /// Unique Identifier
    UI,
    /// Unsigned Long
    UL,
    /// Unknown
    UN,
    /// Unsigned Short
    US,
    /// Unlimited Text
    UT,
}

/// The encoding properties of a value representation.
///
/// Parsing and printing dispatch over this table
/// instead of over methods of each VR.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VrProperties {
    /// maximum length of a single value in bytes (0 = unbounded)
    pub max_len: u32,
    /// the byte used to pad values to an even length
    pub pad_byte: u8,
    /// whether the explicit VR length field is 32 bits wide
    /// (with two reserved bytes before it)
    pub long_length: bool,
    /// whether values are character strings
    pub is_string: bool,
    /// whether a value field may hold a backslash-delimited list of values
    pub is_multi_valued: bool,
}

const PAD_SPACE: u8 = b' ';
const PAD_NUL: u8 = 0x00;

macro_rules! props {
    ($max:expr, $pad:expr, $long:expr, $string:expr, $multi:expr) => {
        VrProperties {
            max_len: $max,
            pad_byte: $pad,
            long_length: $long,
            is_string: $string,
            is_multi_valued: $multi,
        }
    };
}

impl VR {
    /// Obtain the value representation corresponding to the given two bytes,
    /// each an upper case alphabetic character.
    pub fn from_binary(chars: [u8; 2]) -> Option<Self> {
        from_utf8(chars.as_ref())
            .ok()
            .and_then(|s| VR::from_str(s).ok())
    }

    /// Retrieve a string representation of this VR.
    pub fn to_str(self) -> &'static str {
        use VR::*;
        match self {
            AE => "AE",
            AS => "AS",
            CS => "CS",
            DA => "DA",
            DS => "DS",
            DT => "DT",
            FL => "FL",
            FD => "FD",
            IS => "IS",
            LO => "LO",
            LT => "LT",
            OB => "OB",
            OD => "OD",
            OF => "OF",
            OL => "OL",
            OW => "OW",
            PN => "PN",
            SH => "SH",
            SL => "SL",
            SQ => "SQ",
            SS => "SS",
            ST => "ST",
            TM => "TM",
            UI => "UI",
            UL => "UL",
            UN => "UN",
            US => "US",
            UT => "UT",
        }
    }

    /// Retrieve a copy of this VR's two-byte code.
    pub fn to_bytes(self) -> [u8; 2] {
        let bytes = self.to_str().as_bytes();
        [bytes[0], bytes[1]]
    }

    /// The encoding properties of this VR.
    pub fn properties(self) -> &'static VrProperties {
        use VR::*;
        static TABLE: [VrProperties; 28] = [
            // AE
            props!(16, PAD_SPACE, false, true, true),
            // AS
            props!(4, PAD_SPACE, false, true, true),
            // CS
            props!(16, PAD_SPACE, false, true, true),
            // DA
            props!(18, PAD_SPACE, false, true, true),
            // DS
            props!(16, PAD_SPACE, false, true, true),
            // DT
            props!(54, PAD_SPACE, false, true, true),
            // FL
            props!(4, PAD_NUL, false, false, false),
            // FD
            props!(8, PAD_NUL, false, false, false),
            // IS
            props!(12, PAD_SPACE, false, true, true),
            // LO
            props!(64, PAD_SPACE, false, true, true),
            // LT
            props!(10240, PAD_SPACE, false, true, false),
            // OB
            props!(0, PAD_NUL, true, false, false),
            // OD
            props!(0, PAD_NUL, true, false, false),
            // OF
            props!(0, PAD_NUL, true, false, false),
            // OL
            props!(0, PAD_NUL, true, false, false),
            // OW
            props!(0, PAD_NUL, true, false, false),
            // PN
            props!(64, PAD_SPACE, false, true, true),
            // SH
            props!(16, PAD_SPACE, false, true, true),
            // SL
            props!(4, PAD_NUL, false, false, false),
            // SQ
            props!(0, PAD_NUL, true, false, false),
            // SS
            props!(2, PAD_NUL, false, false, false),
            // ST
            props!(1024, PAD_SPACE, false, true, false),
            // TM
            props!(28, PAD_SPACE, false, true, true),
            // UI
            props!(64, PAD_NUL, false, true, true),
            // UL
            props!(4, PAD_NUL, false, false, false),
            // UN
            props!(0, PAD_NUL, true, false, false),
            // US
            props!(2, PAD_NUL, false, false, false),
            // UT
            props!(0, PAD_SPACE, true, true, false),
        ];
        let index = match self {
            AE => 0,
            AS => 1,
            CS => 2,
            DA => 3,
            DS => 4,
            DT => 5,
            FL => 6,
            FD => 7,
            IS => 8,
            LO => 9,
            LT => 10,
            OB => 11,
            OD => 12,
            OF => 13,
            OL => 14,
            OW => 15,
            PN => 16,
            SH => 17,
            SL => 18,
            SQ => 19,
            SS => 20,
            ST => 21,
            TM => 22,
            UI => 23,
            UL => 24,
            UN => 25,
            US => 26,
            UT => 27,
        };
        &TABLE[index]
    }

    /// Whether this is the sequence of items VR.
    #[inline]
    pub fn is_sequence(self) -> bool {
        self == VR::SQ
    }

    /// Whether values of this VR are character strings.
    #[inline]
    pub fn is_string(self) -> bool {
        self.properties().is_string
    }

    /// Whether the explicit form uses a 32-bit length field.
    #[inline]
    pub fn uses_long_length(self) -> bool {
        self.properties().long_length
    }

    /// The byte used to pad odd-length values of this VR.
    #[inline]
    pub fn pad_byte(self) -> u8 {
        self.properties().pad_byte
    }

    /// The maximum byte length of a single value (`None` = unbounded).
    #[inline]
    pub fn max_value_len(self) -> Option<u32> {
        match self.properties().max_len {
            0 => None,
            n => Some(n),
        }
    }

    /// The width in bytes of one binary value of this VR,
    /// for the fixed-width numeric representations.
    pub fn value_width(self) -> Option<usize> {
        match self {
            VR::US | VR::SS => Some(2),
            VR::UL | VR::SL | VR::FL => Some(4),
            VR::FD => Some(8),
            _ => None,
        }
    }
}

impl FromStr for VR {
    type Err = &'static str;

    fn from_str(string: &str) -> std::result::Result<Self, Self::Err> {
        use VR::*;
        match string {
            "AE" => Ok(AE),
            "AS" => Ok(AS),
            "CS" => Ok(CS),
            "DA" => Ok(DA),
            "DS" => Ok(DS),
            "DT" => Ok(DT),
            "FL" => Ok(FL),
            "FD" => Ok(FD),
            "IS" => Ok(IS),
            "LO" => Ok(LO),
            "LT" => Ok(LT),
            "OB" => Ok(OB),
            "OD" => Ok(OD),
            "OF" => Ok(OF),
            "OL" => Ok(OL),
            "OW" => Ok(OW),
            "PN" => Ok(PN),
            "SH" => Ok(SH),
            "SL" => Ok(SL),
            "SQ" => Ok(SQ),
            "SS" => Ok(SS),
            "ST" => Ok(ST),
            "TM" => Ok(TM),
            "UI" => Ok(UI),
            "UL" => Ok(UL),
            "UN" => Ok(UN),
            "US" => Ok(US),
            "UT" => Ok(UT),
            _ => Err("no such value representation"),
        }
    }
}

impl fmt::Display for VR {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(VR::to_str(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vr_binary_form() {
        assert_eq!(VR::from_binary([b'P', b'N']), Some(VR::PN));
        assert_eq!(VR::from_binary([b'O', b'B']), Some(VR::OB));
        assert_eq!(VR::from_binary([b'Z', b'Z']), None);
        assert_eq!(VR::UI.to_bytes(), [b'U', b'I']);
    }

    #[test]
    fn length_field_widths() {
        for vr in [VR::OB, VR::OW, VR::OF, VR::OD, VR::OL, VR::SQ, VR::UN, VR::UT] {
            assert!(vr.uses_long_length(), "{} should use a 32-bit length", vr);
        }
        for vr in [VR::AE, VR::CS, VR::UI, VR::US, VR::FD, VR::PN] {
            assert!(!vr.uses_long_length(), "{} should use a 16-bit length", vr);
        }
    }

    #[test]
    fn padding_bytes() {
        assert_eq!(VR::UI.pad_byte(), 0);
        assert_eq!(VR::OB.pad_byte(), 0);
        assert_eq!(VR::CS.pad_byte(), b' ');
        assert_eq!(VR::PN.pad_byte(), b' ');
    }

    #[test]
    fn value_bounds() {
        assert_eq!(VR::UI.max_value_len(), Some(64));
        assert_eq!(VR::AE.max_value_len(), Some(16));
        assert_eq!(VR::OB.max_value_len(), None);
        assert_eq!(VR::US.value_width(), Some(2));
        assert_eq!(VR::FD.value_width(), Some(8));
        assert_eq!(VR::CS.value_width(), None);
    }
}
