// Library crate for the binary and integration tests.

pub mod config;
pub mod error;
pub mod evaluation;
pub mod process;
pub mod settings;
