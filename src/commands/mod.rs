//! Command registry, dispatch and the built-in command set

pub mod builtin;
pub mod handler;
pub mod journal;
pub mod registry;

use thiserror::Error;

pub use builtin::build_registry;
pub use handler::{DispatchQueue, Dispatcher, Request, start_queue};
pub use registry::{ArgKind, Args, Registry, RegistryBuilder, RegistryError, RegistryOptions};

/// Everything a command invocation can fail with; each variant's message is
/// what the client sees in the wire error payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("auth required")]
    AuthRequired,

    #[error("forbidden")]
    Forbidden,

    #[error("unknown command")]
    UnknownCommand,

    #[error("wrong number of arguments")]
    WrongNumberOfArguments,

    #[error("non str")]
    NotStr,

    #[error("non int")]
    NotInt,

    #[error("accessing a key holding the wrong type of value")]
    WrongType,

    #[error("empty storage")]
    EmptyStorage,

    #[error("argument decoder mismatch")]
    ArgMismatch,

    #[error("quit")]
    Quit,
}

/// Command flag bits.
pub mod flag {
    pub const WRITE: u8 = 1 << 0;
    pub const READ: u8 = 1 << 1;
    pub const TIME_DEPENDENT: u8 = 1 << 2;
    pub const AUTH: u8 = 1 << 3;

    pub fn has(flags: u8, expected: u8) -> bool {
        flags & expected != 0
    }
}
