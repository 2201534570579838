//! Common test utilities for ipatool-dl end-to-end tests

#[allow(dead_code)]
pub mod events;
#[cfg(unix)]
#[allow(dead_code)]
pub mod fake_tool;

#[allow(unused_imports)]
pub use events::*;
#[cfg(unix)]
#[allow(unused_imports)]
pub use fake_tool::*;
