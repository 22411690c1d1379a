//! Chat with a running server: request types, the streaming decoder and
//! the HTTP client.

mod client;
mod stream;
mod types;

pub use client::*;
pub use stream::*;
pub use types::*;
