pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{TestEnv, nar_of_file, source_info};
#[allow(unused_imports)]
pub use mocks::CountingBackend;
