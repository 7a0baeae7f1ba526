//! Concrete store backends.

pub mod binary_cache;
pub mod daemon;
pub mod local;

pub use binary_cache::BinaryCacheStore;
pub use daemon::DaemonStore;
pub use local::LocalStore;
