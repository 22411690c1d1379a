//! Supervisor module: port reclaim, health polling and the server lifecycle.

mod health;
mod identity;
mod policy;
mod probe;
mod process;
mod runner;
mod state;
mod table;

pub use health::*;
pub use identity::*;
pub use policy::*;
pub use probe::*;
pub use process::*;
pub use runner::*;
pub use state::*;
pub use table::*;
