//! DIMSE status codes and their classification.
use std::fmt;

/// A DIMSE response status code.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Status(pub u16);

/// The broad class of a status code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Success,
    Pending,
    Warning,
    Refused,
    Failure,
    Cancel,
    Other,
}

impl Status {
    pub const SUCCESS: Status = Status(0x0000);
    pub const PENDING: Status = Status(0xFF00);
    pub const PENDING_WARNING: Status = Status(0xFF01);
    pub const CANCEL: Status = Status(0xFE00);

    /// refused: out of resources
    pub const OUT_OF_RESOURCES: Status = Status(0xA700);
    /// refused: move destination unknown
    pub const MOVE_DESTINATION_UNKNOWN: Status = Status(0xA801);
    /// error: data set does not match SOP class
    pub const DATA_SET_DOES_NOT_MATCH_SOP_CLASS: Status = Status(0xA900);
    /// failure: cannot understand / processing failure
    pub const PROCESSING_FAILURE: Status = Status(0xC000);
    /// warning: sub-operations complete, one or more failures
    pub const SUB_OPERATIONS_COMPLETE_WITH_FAILURES: Status = Status(0xB000);

    pub fn class(self) -> StatusClass {
        match self.0 {
            0x0000 => StatusClass::Success,
            0xFF00 | 0xFF01 => StatusClass::Pending,
            0xFE00 => StatusClass::Cancel,
            0xB000..=0xBFFF => StatusClass::Warning,
            0xA000..=0xAFFF => StatusClass::Refused,
            0xC000..=0xCFFF => StatusClass::Failure,
            _ => StatusClass::Other,
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self.class() == StatusClass::Success
    }

    #[inline]
    pub fn is_pending(self) -> bool {
        self.class() == StatusClass::Pending
    }

    /// Whether this status terminates a response stream.
    #[inline]
    pub fn is_terminal(self) -> bool {
        !self.is_pending()
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Status({:#06X}, {:?})", self.0, self.class())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

impl From<u16> for Status {
    fn from(value: u16) -> Self {
        Status(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(Status::SUCCESS.class(), StatusClass::Success);
        assert_eq!(Status::PENDING.class(), StatusClass::Pending);
        assert_eq!(Status::PENDING_WARNING.class(), StatusClass::Pending);
        assert_eq!(Status::CANCEL.class(), StatusClass::Cancel);
        assert_eq!(Status(0xB007).class(), StatusClass::Warning);
        assert_eq!(Status::OUT_OF_RESOURCES.class(), StatusClass::Refused);
        assert_eq!(
            Status::DATA_SET_DOES_NOT_MATCH_SOP_CLASS.class(),
            StatusClass::Refused
        );
        assert_eq!(Status(0xC123).class(), StatusClass::Failure);
        assert_eq!(Status(0x0107).class(), StatusClass::Other);
    }

    #[test]
    fn terminality() {
        assert!(!Status::PENDING.is_terminal());
        assert!(Status::SUCCESS.is_terminal());
        assert!(Status::CANCEL.is_terminal());
        assert!(Status(0xA700).is_terminal());
    }
}
