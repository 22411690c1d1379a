//! Configuration module.

mod command;
mod loader;
mod types;

pub use command::*;
pub use loader::*;
pub use types::*;
