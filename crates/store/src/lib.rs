//! Stores for depot.
//!
//! This crate provides:
//! - The [`StoreBackend`] capability set and its backends: local
//!   filesystem, daemon client and `file://` binary cache
//! - [`Store`], the tiered path-info cache layered over any backend
//! - [`StoreRegistry`], resolving connection strings to stores
//! - The daemon server and store-to-store operations

pub mod backends;
pub mod cache;
pub mod error;
pub mod ops;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod substituters;
pub mod traits;

pub use backends::{BinaryCacheStore, DaemonStore, LocalStore};
pub use cache::{Store, StoreStats};
pub use error::{StoreError, StoreResult};
pub use ops::{copy_store_path, make_validity_registration, register_validity};
pub use registry::{StoreConstructor, StoreParams, StoreRegistry, parse_uri};
pub use server::{serve_connection, serve_daemon};
pub use substituters::SubstituterSet;
pub use traits::{BackendKind, StoreBackend};
