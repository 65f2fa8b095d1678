//! cachette — in-memory key-value cache server
//!
//! Strings, lists and hashes keyed by byte strings with per-key
//! expiration, served over a tagged binary TCP protocol and an optional
//! HTTP facade, with shared-password authentication and an optional
//! crash-safe command journal replayed on startup. The [`client`] module
//! carries the matching async client, including sharded multi-server
//! support.

pub mod client;
pub mod commands;
pub mod journal;
pub mod server;
pub mod session;
pub mod store;
pub mod value;
pub mod wire;

pub use client::{Cache, ClientError, Options as ClientOptions};
pub use commands::{CommandError, Dispatcher, build_registry};
pub use journal::{FileJournal, JournalError};
pub use server::{HttpServer, HttpState, TelnetServer};
pub use session::Session;
pub use store::Storage;
pub use value::Value;
pub use wire::{Payload, WireError};
