//! A PACS node built on the ferrodicom crates:
//! a hierarchical metadata index with wildcard query matching,
//! a content-addressed storage layout,
//! a server orchestrator dispatching the DIMSE services,
//! and the client orchestrator used both standalone
//! and for C-MOVE sub-operations.
pub mod config;
mod handlers;
pub mod index;
pub mod matching;
pub mod scu;
pub mod server;
pub mod stats;
pub mod storage;

pub use config::Config;
pub use index::{MetadataIndex, MetadataRecord};
pub use scu::DimseClient;
pub use server::PacsServer;
pub use stats::ServerStats;
pub use storage::Storage;
