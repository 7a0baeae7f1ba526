//! Core domain types for the depot store.
//!
//! This crate defines the data model shared by every other crate:
//! - Typed hashes and the hashing service
//! - Store path derivation, parsing and validation
//! - Path metadata and its signing fingerprint
//! - The validity registration text format and narinfo documents
//! - NAR serialisation
//! - Configuration

pub mod config;
pub mod error;
pub mod hash;
pub mod nar;
pub mod narinfo;
pub mod path_info;
pub mod registration;
pub mod store_path;

pub use config::DepotConfig;
pub use error::{Error, Result};
pub use hash::{Hash, HashAlgorithm, Hasher};
pub use narinfo::NarInfo;
pub use path_info::{PathInfoRecord, ValidPathInfo};
pub use store_path::{StoreDir, StorePath, StorePathHash, show_paths};
