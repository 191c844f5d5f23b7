//! The DICOM message service element:
//! command sets carried over an association,
//! their status codes,
//! and the assembly of command/data fragments into whole messages.
pub mod command;
pub mod message;
pub mod status;

pub use command::{CommandField, CommandSet, Priority, SubOperations};
pub use message::{Message, MessageAssembler};
pub use status::{Status, StatusClass};
