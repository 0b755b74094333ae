//! Common test utilities and fixtures.

pub mod faulty;
pub mod fixtures;
pub mod metadata;
pub mod server;
pub mod solver;

#[allow(unused_imports)]
pub use faulty::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use metadata::*;
#[allow(unused_imports)]
pub use server::*;
#[allow(unused_imports)]
pub use solver::*;
